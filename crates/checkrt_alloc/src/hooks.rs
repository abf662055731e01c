//! C entry points into the global budget.
//!
//! A C test program links the staticlib and calls these instead of the
//! libc names (usually through a `#define malloc checkrt_malloc` shim).
use core::ffi::c_void;

use libc::size_t;

use crate::global::GLOBAL_BUDGET;

/// # Safety
/// See malloc(3)
#[unsafe(export_name = "checkrt_malloc")]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    unsafe { GLOBAL_BUDGET.malloc(size) }
}

/// # Safety
/// See calloc(3)
#[unsafe(export_name = "checkrt_calloc")]
pub unsafe extern "C" fn calloc(nobj: size_t, size: size_t) -> *mut c_void {
    unsafe { GLOBAL_BUDGET.calloc(nobj, size) }
}

/// # Safety
/// See realloc(3)
#[unsafe(export_name = "checkrt_realloc")]
pub unsafe extern "C" fn realloc(p: *mut c_void, size: size_t) -> *mut c_void {
    unsafe { GLOBAL_BUDGET.realloc(p, size) }
}

/// # Safety
/// See reallocf(3)
#[unsafe(export_name = "checkrt_reallocf")]
pub unsafe extern "C" fn reallocf(p: *mut c_void, size: size_t) -> *mut c_void {
    unsafe { GLOBAL_BUDGET.reallocf(p, size) }
}

/// # Safety
/// See aligned_alloc(3)
#[unsafe(export_name = "checkrt_aligned_alloc")]
pub unsafe extern "C" fn aligned_alloc(alignment: size_t, size: size_t) -> *mut c_void {
    if alignment == 0 || !alignment.is_power_of_two() {
        checkrt_core::os::set_errno(libc::EINVAL);
        return core::ptr::null_mut();
    }
    unsafe { GLOBAL_BUDGET.aligned_alloc(alignment, size) }
}

/// # Safety
/// See free(3)
#[unsafe(export_name = "checkrt_free")]
pub unsafe extern "C" fn free(p: *mut c_void) {
    unsafe { GLOBAL_BUDGET.free(p) }
}

#[unsafe(export_name = "checkrt_alloc_limit_set_no_limit")]
pub extern "C" fn alloc_limit_set_no_limit() {
    GLOBAL_BUDGET.set_no_limit();
}

#[unsafe(export_name = "checkrt_alloc_limit_set_total")]
pub extern "C" fn alloc_limit_set_total(limit: size_t) {
    GLOBAL_BUDGET.set_total(limit);
}

#[unsafe(export_name = "checkrt_alloc_limit_set_peak")]
pub extern "C" fn alloc_limit_set_peak(limit: size_t) {
    GLOBAL_BUDGET.set_peak(limit);
}
