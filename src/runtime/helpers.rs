//! Foreign helpers referenced by generated code.
//!
//! Rust function items have no guaranteed address representation, so the
//! compiler binds these through `extern "C"` trampolines whose addresses are
//! taken as plain pointers and materialised into the code stream.

use std::os::raw::c_char;

/// Scalar base-2 exponential, standard C ABI.
pub extern "C" fn jit_exp2(x: f32) -> f32 {
    x.exp2()
}

/// Scalar base-2 logarithm, standard C ABI.
pub extern "C" fn jit_log2(x: f32) -> f32 {
    x.log2()
}

/// Logging shim taking a NUL-terminated message.
///
/// # Safety
///
/// `msg` must point to a valid NUL-terminated string; the compiler only
/// passes addresses of `'static` literals it embedded itself.
pub unsafe extern "C" fn jit_log_message(msg: *const c_char) {
    let text = unsafe { std::ffi::CStr::from_ptr(msg) };
    tracing::warn!("shader: {}", text.to_string_lossy());
}
