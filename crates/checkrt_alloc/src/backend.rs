//! # backend
//! The real allocator underneath the budget. The budget only decides
//! whether a request may go ahead and keeps the books; the memory itself
//! always comes from a [`RawAlloc`].
use core::{
    alloc::Layout,
    ffi::c_void,
    fmt::Debug,
    mem::size_of,
    ptr::{NonNull, null_mut},
};

use allocator_api2::alloc::{AllocError, Allocator};

/// Alignment every `malloc` result is guaranteed to have.
pub const MIN_ALIGN: usize = 2 * size_of::<usize>();

/// The four classic allocation primitives, plus an aligned variant.
///
/// # Safety
/// Implementations must behave like their C namesakes: null on failure,
/// `realloc` leaves the old block untouched when it fails, `free(null)`
/// is a no-op.
pub unsafe trait RawAlloc: Debug {
    /// See malloc(3)
    unsafe fn malloc(&self, size: usize) -> *mut c_void;
    /// See calloc(3)
    unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void;
    /// See realloc(3)
    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void;
    /// See posix_memalign(3); returns null instead of an error code.
    unsafe fn aligned_alloc(&self, align: usize, size: usize) -> *mut c_void;
    /// See free(3)
    unsafe fn free(&self, ptr: *mut c_void);
}

/// The C library's allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibcAlloc;

unsafe impl RawAlloc for LibcAlloc {
    unsafe fn malloc(&self, size: usize) -> *mut c_void {
        unsafe { libc::malloc(size) }
    }

    unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void {
        unsafe { libc::calloc(count, size) }
    }

    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        unsafe { libc::realloc(ptr, size) }
    }

    unsafe fn aligned_alloc(&self, align: usize, size: usize) -> *mut c_void {
        let mut out = null_mut();
        let align = align.max(size_of::<usize>());
        match unsafe { libc::posix_memalign(&raw mut out, align, size) } {
            0 => out,
            _ => null_mut(),
        }
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        unsafe { libc::free(ptr) }
    }
}

/// Lets collections allocate straight from libc, bypassing whatever
/// `#[global_allocator]` is installed. The ledger relies on this so that
/// its own bookkeeping is never charged to, or re-enters, the budget.
unsafe impl Allocator for LibcAlloc {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        let size = layout.size().max(1);
        let ptr = unsafe {
            if layout.align() <= MIN_ALIGN {
                RawAlloc::malloc(self, size)
            } else {
                RawAlloc::aligned_alloc(self, layout.align(), size)
            }
        };
        NonNull::new(ptr.cast::<u8>())
            .map(|ptr| NonNull::slice_from_raw_parts(ptr, layout.size()))
            .ok_or(AllocError)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        unsafe { RawAlloc::free(self, ptr.as_ptr().cast()) }
    }
}
