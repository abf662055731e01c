//! # global
//! The process-wide budget, and the ways to reach it: plain functions for
//! Rust callers and [`BudgetedAlloc`] for `#[global_allocator]`.
use core::{
    alloc::{GlobalAlloc, Layout},
    ffi::c_void,
    ptr,
};

use crate::{
    backend::{LibcAlloc, MIN_ALIGN},
    budget::{Budget, Mode},
};

/// The one budget every hook and [`BudgetedAlloc`] charge against.
pub static GLOBAL_BUDGET: Budget<LibcAlloc> = Budget::new(LibcAlloc);

/// Lift every limit.
pub fn set_no_limit() {
    GLOBAL_BUDGET.set_no_limit();
}

/// Limit the bytes granted from now on to `n`, counted cumulatively.
pub fn set_total(n: usize) {
    GLOBAL_BUDGET.set_total(n);
}

/// Limit the bytes live at once to `n`, counting only blocks allocated
/// from now on.
pub fn set_peak(n: usize) {
    GLOBAL_BUDGET.set_peak(n);
}

/// Headroom left in the global budget.
pub fn remaining() -> usize {
    GLOBAL_BUDGET.remaining()
}

/// Mode of the global budget.
pub fn mode() -> Mode {
    GLOBAL_BUDGET.mode()
}

/// See malloc(3), charged to the global budget.
///
/// # Safety
/// The result must be released with [`free`], [`realloc`] or [`reallocf`].
pub unsafe fn malloc(size: usize) -> *mut c_void {
    unsafe { GLOBAL_BUDGET.malloc(size) }
}

/// See calloc(3), charged to the global budget.
///
/// # Safety
/// As for [`malloc`].
pub unsafe fn calloc(count: usize, size: usize) -> *mut c_void {
    unsafe { GLOBAL_BUDGET.calloc(count, size) }
}

/// See realloc(3), charged to the global budget.
///
/// # Safety
/// `ptr` must be null or come from this module.
pub unsafe fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    unsafe { GLOBAL_BUDGET.realloc(ptr, size) }
}

/// See reallocf(3), charged to the global budget.
///
/// # Safety
/// `ptr` must be null or come from this module.
pub unsafe fn reallocf(ptr: *mut c_void, size: usize) -> *mut c_void {
    unsafe { GLOBAL_BUDGET.reallocf(ptr, size) }
}

/// See free(3)
///
/// # Safety
/// `ptr` must be null or come from this module.
pub unsafe fn free(ptr: *mut c_void) {
    unsafe { GLOBAL_BUDGET.free(ptr) }
}

/// Installs the global budget as a Rust allocator.
///
/// ```ignore
/// #[global_allocator]
/// static ALLOC: checkrt_alloc::BudgetedAlloc = checkrt_alloc::BudgetedAlloc;
/// ```
///
/// Every `Box`, `Vec` and `String` in the process is then charged, the
/// standard library's own bookkeeping included.
#[derive(Debug, Default, Clone, Copy)]
pub struct BudgetedAlloc;

fn fits_malloc(layout: Layout) -> bool {
    layout.align() <= MIN_ALIGN && layout.align() <= layout.size()
}

unsafe impl GlobalAlloc for BudgetedAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe {
            if fits_malloc(layout) {
                GLOBAL_BUDGET.malloc(layout.size())
            } else {
                GLOBAL_BUDGET.aligned_alloc(layout.align(), layout.size())
            }
        };
        ptr.cast()
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if fits_malloc(layout) {
            return unsafe { GLOBAL_BUDGET.calloc(1, layout.size()) }.cast();
        }
        let ptr = unsafe { self.alloc(layout) };
        if !ptr.is_null() {
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { GLOBAL_BUDGET.free(ptr.cast()) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() <= MIN_ALIGN && layout.align() <= new_size {
            return unsafe { GLOBAL_BUDGET.realloc(ptr.cast(), new_size) }.cast();
        }

        // realloc(3) does not preserve over-alignment
        let Ok(new_layout) = Layout::from_size_align(new_size, layout.align()) else {
            return ptr::null_mut();
        };
        let moved = unsafe { self.alloc(new_layout) };
        if !moved.is_null() {
            unsafe {
                ptr::copy_nonoverlapping(ptr, moved, layout.size().min(new_size));
                self.dealloc(ptr, layout);
            }
        }
        moved
    }
}
