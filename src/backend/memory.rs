//! Executable code buffers.
//!
//! Code is assembled into an ordinary `Vec<u8>` first; sealing copies it
//! into an anonymous mapping and flips the pages read-execute, so writable
//! and executable never overlap in time.

use memmap::Mmap;

/// A sealed, read-execute mapping holding generated code.
#[derive(Debug)]
pub struct ExecutableBuffer {
    map: Mmap,
    len: usize,
}

impl ExecutableBuffer {
    /// Copy `code` into a fresh anonymous mapping and seal it read-execute.
    pub fn from_code(code: &[u8]) -> std::io::Result<Self> {
        let mut map = memmap::MmapMut::map_anon(code.len().max(1))?;
        map[..code.len()].copy_from_slice(code);
        Ok(ExecutableBuffer {
            map: map.make_exec()?,
            len: code.len(),
        })
    }

    /// Base address of the mapped code.
    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    /// Number of code bytes (the mapping itself is page-rounded).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
