//! PICA shader JIT CLI
//!
//! Command-line tool for compiling PICA200 vertex-shader dumps to native
//! code and inspecting the result.

use anyhow::Context;
use byteorder::{LittleEndian, ReadBytesExt};
use clap::{Parser, ValueEnum};
use pica_jit::{compile_with_options, CompilerOptions, Instruction, JitShader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// PICA200 vertex-shader JIT compiler.
///
/// Compiles shader program dumps (raw little-endian 32-bit instruction
/// words) to native x86-64 code and reports on the generated function.
#[derive(Parser, Debug)]
#[command(name = "pica-jit")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Program dump(s) to compile
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Operand-descriptor table dump (raw little-endian words)
    #[arg(short, long)]
    swizzle: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "human")]
    format: OutputFormat,

    /// Print a decoded instruction listing before compiling
    #[arg(short, long)]
    list: bool,

    /// Hex-dump the generated native code
    #[arg(short = 'd', long)]
    dump_code: bool,

    /// Force the SSE4.1 fast paths on or off (default: detect)
    #[arg(long)]
    sse41: Option<bool>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .init();
    }

    let swizzle = match args.swizzle.as_deref().map(read_words).transpose() {
        Ok(words) => words.unwrap_or_default(),
        Err(err) => {
            eprintln!("error: {:#}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut failures = 0u32;
    for file in &args.files {
        if let Err(err) = process_file(file, &swizzle, &args) {
            eprintln!("{}: error: {:#}", file.display(), err);
            failures += 1;
        }
    }

    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn process_file(path: &Path, swizzle: &[u32], args: &Args) -> anyhow::Result<()> {
    let program = read_words(path)?;

    if args.list {
        for (offset, &word) in program.iter().enumerate() {
            println!("{:4}: {:08x}  {}", offset, word, Instruction(word));
        }
    }

    let mut options = CompilerOptions::new();
    if let Some(sse41) = args.sse41 {
        options = options.with_sse41(sse41);
    }
    let shader = compile_with_options(&program, swizzle, &options)
        .with_context(|| format!("compiling {}", path.display()))?;

    match args.format {
        OutputFormat::Human => print_human(path, &shader),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&shader.report())?),
    }

    if args.dump_code {
        dump_code(&shader);
    }
    Ok(())
}

fn print_human(path: &Path, shader: &JitShader) {
    let report = shader.report();
    println!("{}", path.display());
    println!("  instructions:  {}", report.program_len);
    println!("  code size:     {} bytes", report.code_size);
    println!("  sse4.1:        {}", report.sse41);
    if report.return_offsets.is_empty() {
        println!("  return points: none");
    } else {
        let offsets: Vec<String> = report
            .return_offsets
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("  return points: {}", offsets.join(", "));
    }
}

fn dump_code(shader: &JitShader) {
    for (i, chunk) in shader.code().chunks(16).enumerate() {
        println!("{:6x}: {}", i * 16, hex::encode(chunk));
    }
}

/// Read a file of raw little-endian 32-bit words.
fn read_words(path: &Path) -> anyhow::Result<Vec<u32>> {
    let data =
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    anyhow::ensure!(
        data.len() % 4 == 0,
        "{} is not a whole number of 32-bit words",
        path.display()
    );
    let mut cursor = std::io::Cursor::new(&data);
    let mut words = Vec::with_capacity(data.len() / 4);
    for _ in 0..data.len() / 4 {
        words.push(cursor.read_u32::<LittleEndian>()?);
    }
    Ok(words)
}
