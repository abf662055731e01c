//! # budget
//! The budget state machine and the allocator that consults it.
//!
//! [`BudgetState`] is pure bookkeeping: it never touches memory. [`Budget`]
//! puts it behind a lock together with a [`RawAlloc`] backend and a
//! [`TraceSink`], and exposes the malloc family on top.
//!
//! Every entry point takes the lock before deciding and only drops it after
//! charging, so check-then-charge is atomic even with several threads.
use core::{ffi::c_void, ptr::null_mut};

use checkrt_core::os::{raw_exit, set_errno, write_all_raw};
use hashbrown::TryReserveError;
use spin::{Mutex, MutexGuard, Once};

use crate::{
    backend::RawAlloc,
    config::{LEDGER_FAILURE_EXIT, LimitConfig},
    ledger::Ledger,
    trace::TraceSink,
};

/// What the budget is currently limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Not configured yet; the first allocation reads the environment.
    Uninitialized,
    /// Everything the backend grants is fine.
    NoLimit,
    /// Cumulative bytes ever granted; frees give nothing back.
    LimitTotal,
    /// Bytes live at once; frees give headroom back.
    LimitPeak,
}

/// Bookkeeping for one budget.
///
/// `remaining` only means something in [`Mode::LimitTotal`] and
/// [`Mode::LimitPeak`]; the ledger is only filled in [`Mode::LimitPeak`].
#[derive(Debug)]
pub struct BudgetState {
    mode: Mode,
    remaining: usize,
    ledger: Ledger,
}

impl Default for BudgetState {
    fn default() -> Self {
        Self::new()
    }
}

impl BudgetState {
    /// A budget that has not been configured.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mode: Mode::Uninitialized,
            remaining: 0,
            ledger: Ledger::new(),
        }
    }

    /// Switches mode and headroom, forgetting every tracked block.
    ///
    /// The blocks themselves stay allocated; freeing one later simply finds
    /// no ledger entry and gives nothing back.
    pub fn reset(&mut self, mode: Mode, remaining: usize) {
        self.mode = mode;
        self.remaining = remaining;
        self.ledger.clear();
    }

    /// Applies a configuration read from the environment.
    pub fn configure(&mut self, config: LimitConfig) {
        match config {
            LimitConfig::NoLimit => self.reset(Mode::NoLimit, 0),
            LimitConfig::Total(n) => self.reset(Mode::LimitTotal, n),
            LimitConfig::Peak(n) => self.reset(Mode::LimitPeak, n),
        }
    }

    /// The current mode
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Headroom left, in bytes
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Number of blocks in the ledger
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.ledger.len()
    }

    /// Bytes currently charged to ledger entries
    #[must_use]
    pub fn tracked_bytes(&self) -> usize {
        self.ledger.total()
    }

    fn is_limited(&self) -> bool {
        matches!(self.mode, Mode::LimitTotal | Mode::LimitPeak)
    }

    /// Whether a request for `n` more bytes fits.
    #[must_use]
    pub fn admits(&self, n: usize) -> bool {
        !self.is_limited() || n <= self.remaining
    }

    /// Books a granted block of `n` bytes at `addr`.
    pub fn charge(&mut self, addr: usize, n: usize) -> Result<(), TryReserveError> {
        if self.mode == Mode::LimitPeak {
            self.ledger.insert(addr, n)?;
        }
        if self.is_limited() {
            self.remaining -= n;
        }
        Ok(())
    }

    /// Books the release of the block at `addr`.
    ///
    /// Only peak mode gives anything back, and only for tracked blocks.
    pub fn release(&mut self, addr: usize) {
        if self.mode != Mode::LimitPeak {
            return;
        }
        if let Some(n) = self.ledger.remove(addr) {
            self.remaining = self.remaining.saturating_add(n);
        }
    }

    /// Extra bytes a peak-mode resize of `addr` to `new_size` needs.
    ///
    /// Untracked blocks count as size zero.
    #[must_use]
    pub fn resize_need(&self, addr: usize, new_size: usize) -> usize {
        let old_size = self.ledger.get(addr).unwrap_or(0);
        new_size.saturating_sub(old_size)
    }

    /// Books a successful peak-mode resize that moved `old_addr` to
    /// `new_addr` (possibly the same) with `new_size` bytes.
    pub fn resized(
        &mut self,
        old_addr: usize,
        new_addr: usize,
        new_size: usize,
    ) -> Result<(), TryReserveError> {
        let old_size = self.ledger.remove(old_addr).unwrap_or(0);
        self.remaining = self
            .remaining
            .saturating_add(old_size)
            .saturating_sub(new_size);
        self.ledger.insert(new_addr, new_size)
    }
}

/// An allocator that grants requests only while they fit in its budget.
///
/// Refusals look exactly like real exhaustion to the caller: a null result
/// with `errno` set to `ENOMEM`.
#[derive(Debug)]
pub struct Budget<B: RawAlloc> {
    backend: B,
    state: Mutex<BudgetState>,
    trace: Once<TraceSink>,
}

impl<B: RawAlloc> Budget<B> {
    /// An unconfigured budget over `backend`. Configuration and the trace
    /// destination are read from the environment on first use.
    pub const fn new(backend: B) -> Self {
        Self {
            backend,
            state: Mutex::new(BudgetState::new()),
            trace: Once::new(),
        }
    }

    /// Like [`Budget::new`], but tracing goes to `sink` instead of wherever
    /// `CHECKRT_TRACE` points.
    pub const fn with_trace(backend: B, sink: TraceSink) -> Self {
        Self {
            backend,
            state: Mutex::new(BudgetState::new()),
            trace: Once::initialized(sink),
        }
    }

    /// Grant everything from now on.
    pub fn set_no_limit(&self) {
        self.state.lock().reset(Mode::NoLimit, 0);
    }

    /// Allow `n` more bytes in total, ever.
    pub fn set_total(&self, n: usize) {
        self.state.lock().reset(Mode::LimitTotal, n);
    }

    /// Allow at most `n` bytes live at once, counting from now.
    pub fn set_peak(&self, n: usize) {
        self.state.lock().reset(Mode::LimitPeak, n);
    }

    /// The current mode, initialising from the environment if needed.
    pub fn mode(&self) -> Mode {
        self.lock().mode()
    }

    /// Remaining headroom, initialising from the environment if needed.
    pub fn remaining(&self) -> usize {
        self.lock().remaining()
    }

    /// Number of blocks the ledger tracks.
    pub fn tracked(&self) -> usize {
        self.state.lock().tracked()
    }

    fn trace(&self) -> &TraceSink {
        self.trace.call_once(TraceSink::from_env)
    }

    /// Locks the state, reading the environment first if nobody has
    /// configured the budget yet. The environment is read without the lock
    /// held: a malformed value exits the process.
    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        {
            let state = self.state.lock();
            if state.mode() != Mode::Uninitialized {
                return state;
            }
        }
        let config = LimitConfig::from_env_or_exit();
        let mut state = self.state.lock();
        if state.mode() == Mode::Uninitialized {
            state.configure(config);
        }
        state
    }

    fn admit(&self, state: &BudgetState, n: usize) -> bool {
        if state.admits(n) {
            return true;
        }
        self.trace().line(format_args!(
            "checkrt_alloc: preventing allocation of {n} bytes because remaining limit is {}",
            state.remaining()
        ));
        set_errno(libc::ENOMEM);
        false
    }

    fn book(result: Result<(), TryReserveError>) {
        if result.is_err() {
            let _ = write_all_raw(
                libc::STDERR_FILENO,
                b"checkrt_alloc: could not grow the allocation ledger\n",
            );
            raw_exit(LEDGER_FAILURE_EXIT);
        }
    }

    /// Admit, allocate, charge.
    fn grant(
        &self,
        state: &mut BudgetState,
        n: usize,
        allocate: impl FnOnce() -> *mut c_void,
    ) -> *mut c_void {
        if !self.admit(state, n) {
            return null_mut();
        }
        let ptr = allocate();
        if !ptr.is_null() {
            Self::book(state.charge(ptr as usize, n));
        }
        ptr
    }

    fn release(&self, state: &mut BudgetState, ptr: *mut c_void) {
        if ptr.is_null() {
            return;
        }
        state.release(ptr as usize);
        unsafe { self.backend.free(ptr) };
    }

    fn resize(&self, state: &mut BudgetState, ptr: *mut c_void, new_size: usize) -> *mut c_void {
        if ptr.is_null() {
            return self.grant(state, new_size, || unsafe { self.backend.malloc(new_size) });
        }
        if new_size == 0 {
            self.release(state, ptr);
            return null_mut();
        }

        match state.mode() {
            Mode::Uninitialized | Mode::NoLimit => unsafe { self.backend.realloc(ptr, new_size) },
            Mode::LimitTotal => {
                if !self.admit(state, new_size) {
                    return null_mut();
                }
                let moved = unsafe { self.backend.realloc(ptr, new_size) };
                if !moved.is_null() {
                    Self::book(state.charge(moved as usize, new_size));
                }
                moved
            }
            Mode::LimitPeak => {
                if !self.admit(state, state.resize_need(ptr as usize, new_size)) {
                    return null_mut();
                }
                let moved = unsafe { self.backend.realloc(ptr, new_size) };
                if !moved.is_null() {
                    Self::book(state.resized(ptr as usize, moved as usize, new_size));
                }
                moved
            }
        }
    }

    /// See malloc(3)
    ///
    /// # Safety
    /// The result must be released through this same budget.
    pub unsafe fn malloc(&self, size: usize) -> *mut c_void {
        let mut state = self.lock();
        self.trace().line(format_args!("malloc({size})"));
        self.grant(&mut state, size, || unsafe { self.backend.malloc(size) })
    }

    /// See calloc(3). `count * size` overflowing is refused up front.
    ///
    /// # Safety
    /// The result must be released through this same budget.
    pub unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void {
        let mut state = self.lock();
        self.trace().line(format_args!("calloc({count}, {size})"));
        let Some(total) = count.checked_mul(size) else {
            set_errno(libc::ENOMEM);
            return null_mut();
        };
        self.grant(&mut state, total, || unsafe {
            self.backend.calloc(count, size)
        })
    }

    /// Allocates `size` bytes aligned to `align`, budgeted like `malloc`.
    ///
    /// # Safety
    /// `align` must be a power of two. The result must be released through
    /// this same budget.
    pub unsafe fn aligned_alloc(&self, align: usize, size: usize) -> *mut c_void {
        let mut state = self.lock();
        self.trace()
            .line(format_args!("aligned_alloc({align}, {size})"));
        self.grant(&mut state, size, || unsafe {
            self.backend.aligned_alloc(align, size)
        })
    }

    /// See realloc(3). On failure `ptr` stays valid and nothing is charged;
    /// a `size` of zero frees `ptr` and returns null.
    ///
    /// # Safety
    /// `ptr` must be null or a live block from this same budget.
    pub unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        let mut state = self.lock();
        self.trace().line(format_args!("realloc({ptr:p}, {size})"));
        self.resize(&mut state, ptr, size)
    }

    /// See reallocf(3): like [`Budget::realloc`], but on failure `ptr` is
    /// freed (and refunded) before null is returned.
    ///
    /// # Safety
    /// `ptr` must be null or a live block from this same budget; it must
    /// not be used after a null result.
    pub unsafe fn reallocf(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        let mut state = self.lock();
        self.trace().line(format_args!("reallocf({ptr:p}, {size})"));
        let moved = self.resize(&mut state, ptr, size);
        // a zero size already freed ptr inside resize
        if moved.is_null() && size != 0 {
            self.release(&mut state, ptr);
        }
        moved
    }

    /// See free(3)
    ///
    /// # Safety
    /// `ptr` must be null or a live block from this same budget.
    pub unsafe fn free(&self, ptr: *mut c_void) {
        let mut state = self.lock();
        self.trace().line(format_args!("free({ptr:p})"));
        self.release(&mut state, ptr);
    }
}

#[cfg(test)]
mod tests {
    use core::{ffi::c_void, ptr::null_mut};

    use super::{Budget, BudgetState, Mode};
    use crate::{backend::LibcAlloc, trace::TraceSink};

    fn last_errno() -> i32 {
        std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
    }

    fn budget() -> Budget<LibcAlloc> {
        Budget::with_trace(LibcAlloc, TraceSink::disabled())
    }

    /// Live blocks, freed when the test is done with them.
    struct Blocks<'a> {
        budget: &'a Budget<LibcAlloc>,
        live: Vec<(*mut c_void, usize)>,
    }

    impl<'a> Blocks<'a> {
        fn new(budget: &'a Budget<LibcAlloc>) -> Self {
            Self {
                budget,
                live: Vec::new(),
            }
        }

        #[track_caller]
        fn malloc_success(&mut self, size: usize) {
            let ptr = unsafe { self.budget.malloc(size) };
            assert!(!ptr.is_null(), "malloc({size}) should succeed");
            self.live.push((ptr, size));
        }

        #[track_caller]
        fn malloc_failure(&mut self, size: usize) {
            let ptr = unsafe { self.budget.malloc(size) };
            assert!(ptr.is_null(), "malloc({size}) should fail");
            assert_eq!(last_errno(), libc::ENOMEM);
        }

        fn free_one(&mut self, size: usize) {
            let at = self.live.iter().position(|&(_, s)| s == size).unwrap();
            let (ptr, _) = self.live.swap_remove(at);
            unsafe { self.budget.free(ptr) };
        }

        fn free_all(&mut self) {
            for (ptr, _) in self.live.drain(..) {
                unsafe { self.budget.free(ptr) };
            }
        }
    }

    impl Drop for Blocks<'_> {
        fn drop(&mut self) {
            self.free_all();
        }
    }

    #[test]
    fn test_state_total_never_refunds() {
        let mut state = BudgetState::new();
        state.reset(Mode::LimitTotal, 10);
        state.charge(0x10, 6).unwrap();
        state.release(0x10);
        assert_eq!(state.remaining(), 4);
        assert_eq!(state.tracked(), 0);
        assert!(state.admits(4));
        assert!(!state.admits(5));
    }

    #[test]
    fn test_state_peak_refunds_exactly() {
        let mut state = BudgetState::new();
        state.reset(Mode::LimitPeak, 10);
        state.charge(0x10, 6).unwrap();
        state.charge(0x20, 3).unwrap();
        assert_eq!(state.remaining(), 1);
        state.release(0x10);
        assert_eq!(state.remaining(), 7);
        assert_eq!(state.tracked_bytes(), 3);
        // unknown pointers are tolerated
        state.release(0x30);
        assert_eq!(state.remaining(), 7);
    }

    #[test]
    fn test_no_limit_grants_everything() {
        let budget = budget();
        budget.set_no_limit();
        let mut blocks = Blocks::new(&budget);
        for i in 1..20 {
            blocks.malloc_success(1 << i);
        }
        assert_eq!(budget.tracked(), 0);
    }

    #[test]
    fn test_limit_total() {
        let budget = budget();
        budget.set_total(10);
        let mut blocks = Blocks::new(&budget);

        blocks.malloc_success(4);
        blocks.malloc_failure(8);
        blocks.malloc_success(4);
        blocks.malloc_success(1);
        blocks.malloc_failure(2);
        blocks.free_all();
        // freeing gives nothing back
        blocks.malloc_failure(2);
        assert_eq!(budget.remaining(), 1);
    }

    #[test]
    fn test_limit_peak() {
        let budget = budget();
        budget.set_peak(10);
        let mut blocks = Blocks::new(&budget);

        blocks.malloc_success(4);
        blocks.malloc_failure(8);
        blocks.malloc_success(4);
        blocks.malloc_failure(4);
        blocks.malloc_success(1);
        blocks.malloc_failure(2);

        blocks.free_one(4);

        blocks.malloc_success(5);
        blocks.malloc_failure(1);
        assert_eq!(budget.remaining(), 0);
        assert_eq!(budget.tracked(), 3);
    }

    #[test]
    fn test_reset_limit_repeatedly() {
        let budget = budget();
        for _ in 0..2 {
            budget.set_total(10);
            let mut blocks = Blocks::new(&budget);
            blocks.malloc_success(10);
            blocks.malloc_failure(1);
        }
        budget.set_peak(10);
        let mut blocks = Blocks::new(&budget);
        blocks.malloc_success(10);
        blocks.malloc_failure(1);
        blocks.free_all();
        budget.set_no_limit();
        budget.set_no_limit();
        blocks.malloc_success(1 << 20);
    }

    #[test]
    fn test_reset_forgets_ledger_but_not_blocks() {
        let budget = budget();
        budget.set_peak(10);
        let early = unsafe { budget.malloc(8) };
        assert!(!early.is_null());
        assert_eq!(budget.tracked(), 1);

        budget.set_peak(10);
        assert_eq!(budget.tracked(), 0);
        // freeing a block from before the reset gives nothing back
        unsafe { budget.free(early) };
        assert_eq!(budget.remaining(), 10);
    }

    #[test]
    fn test_calloc_overflow_and_charge() {
        let budget = budget();
        budget.set_total(64);
        let overflow = unsafe { budget.calloc(usize::MAX, 2) };
        assert!(overflow.is_null());
        assert_eq!(last_errno(), libc::ENOMEM);
        assert_eq!(budget.remaining(), 64);

        let zeroed = unsafe { budget.calloc(4, 8) };
        assert!(!zeroed.is_null());
        let bytes = unsafe { core::slice::from_raw_parts(zeroed.cast::<u8>(), 32) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(budget.remaining(), 32);
        unsafe { budget.free(zeroed) };
    }

    #[test]
    fn test_realloc_total_charges_new_size() {
        let budget = budget();
        budget.set_total(100);
        let p = unsafe { budget.malloc(10) };
        let q = unsafe { budget.realloc(p, 30) };
        assert!(!q.is_null());
        assert_eq!(budget.remaining(), 60);

        // refusal leaves the block alone and charges nothing
        let r = unsafe { budget.realloc(q, 61) };
        assert!(r.is_null());
        assert_eq!(budget.remaining(), 60);
        unsafe { budget.free(q) };
    }

    #[test]
    fn test_realloc_peak_round_trip() {
        let budget = budget();
        budget.set_peak(100);
        let p = unsafe { budget.malloc(40) };
        assert_eq!(budget.remaining(), 60);

        let smaller = unsafe { budget.realloc(p, 10) };
        assert!(!smaller.is_null());
        assert_eq!(budget.remaining(), 90);

        let back = unsafe { budget.realloc(smaller, 40) };
        assert!(!back.is_null());
        assert_eq!(budget.remaining(), 60);
        assert_eq!(budget.tracked(), 1);

        unsafe { budget.free(back) };
        assert_eq!(budget.remaining(), 100);
    }

    #[test]
    fn test_realloc_total_round_trip_with_room() {
        let budget = budget();
        budget.set_total(100);
        let p = unsafe { budget.malloc(40) };
        let smaller = unsafe { budget.realloc(p, 10) };
        assert!(!smaller.is_null());
        let back = unsafe { budget.realloc(smaller, 40) };
        assert!(!back.is_null());
        // every resize is a fresh charge
        assert_eq!(budget.remaining(), 10);
        unsafe { budget.free(back) };
        assert_eq!(budget.remaining(), 10);
    }

    #[test]
    fn test_realloc_peak_growth_needs_only_the_delta() {
        let budget = budget();
        budget.set_peak(50);
        let p = unsafe { budget.malloc(40) };
        // 40 -> 50 needs 10, which is exactly what is left
        let q = unsafe { budget.realloc(p, 50) };
        assert!(!q.is_null());
        assert_eq!(budget.remaining(), 0);
        assert!(unsafe { budget.realloc(q, 51) }.is_null());
        unsafe { budget.free(q) };
        assert_eq!(budget.remaining(), 50);
    }

    #[test]
    fn test_realloc_untracked_block_is_charged_fully() {
        let budget = budget();
        budget.set_no_limit();
        let p = unsafe { budget.malloc(16) };
        budget.set_peak(20);
        assert!(unsafe { budget.realloc(p, 21) }.is_null());
        let q = unsafe { budget.realloc(p, 20) };
        assert!(!q.is_null());
        assert_eq!(budget.remaining(), 0);
        unsafe { budget.free(q) };
        assert_eq!(budget.remaining(), 20);
    }

    #[test]
    fn test_realloc_null_and_zero() {
        let budget = budget();
        budget.set_peak(16);
        let p = unsafe { budget.realloc(null_mut(), 16) };
        assert!(!p.is_null());
        assert_eq!(budget.remaining(), 0);
        let gone = unsafe { budget.realloc(p, 0) };
        assert!(gone.is_null());
        assert_eq!(budget.remaining(), 16);
        assert_eq!(budget.tracked(), 0);
    }

    #[test]
    fn test_reallocf_frees_on_failure() {
        let budget = budget();
        budget.set_peak(16);
        let p = unsafe { budget.malloc(8) };
        let q = unsafe { budget.reallocf(p, 17) };
        assert!(q.is_null());
        assert_eq!(budget.remaining(), 16);
        assert_eq!(budget.tracked(), 0);

        let p = unsafe { budget.malloc(8) };
        let q = unsafe { budget.reallocf(p, 0) };
        assert!(q.is_null());
        assert_eq!(budget.remaining(), 16);
    }

    #[test]
    fn test_trace_lines() {
        use std::io::{Read, Seek};

        let mut file = tempfile::tempfile().unwrap();
        let budget = Budget::with_trace(
            LibcAlloc,
            TraceSink::to_file(file.try_clone().unwrap()),
        );
        budget.set_total(8);
        unsafe {
            let p = budget.malloc(8);
            assert!(budget.malloc(1).is_null());
            budget.free(p);
            budget.free(null_mut());
        }

        file.rewind().unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "malloc(8)");
        assert_eq!(lines[1], "malloc(1)");
        assert_eq!(
            lines[2],
            "checkrt_alloc: preventing allocation of 1 bytes because remaining limit is 0"
        );
        assert!(lines[3].starts_with("free(0x"));
        assert_eq!(lines[4], "free(0x0)");
    }
}
