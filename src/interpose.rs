//! Literal libc-symbol interposition (§4.8): `extern "C" fn malloc/calloc/
//! realloc/free`, meant to be built as a `cdylib` and `LD_PRELOAD`-ed onto a
//! process this crate is not linked into as an ordinary Rust dependency —
//! the non-Rust-or-already-linked-libc counterpart to assigning [`Heap`] to
//! a `#[global_allocator]` (see [`crate::global`] for that, the
//! always-available path).
//!
//! This is a thin adapter over [`HeapCore`](crate::heap::HeapCore), ported
//! from the reference implementation's `malloc_stub.c`: lazy
//! initialization on first entry, and a thread-local reentrancy flag so that
//! the `log::trace!` tracing calls (which may themselves go through the
//! standard I/O subsystem, which may itself allocate) never recurse back
//! into this module.
//!
//! Requires the `interpose` feature (which pulls in `libc` and `std`: a
//! real OS thread model is what gives the reentrancy flag and the
//! lazily-initialized process-wide heap somewhere to live).

use crate::arena::OwnedArena;
use crate::global::Heap;
use std::cell::Cell;
use std::sync::OnceLock;

/// Default size of the process-wide arena the shim allocates on first use.
/// Arbitrary but generous for a debugging build; real deployments that need
/// a different size should use [`Heap`] directly instead of this shim.
const DEFAULT_ARENA_SIZE: usize = 64 * 1024 * 1024;

static HEAP: OnceLock<Heap<OwnedArena>> = OnceLock::new();

/// Lazily initialize (§4.1, mirroring `malloc_stub.c`'s `init()`/
/// `static int first_use`) and return the process-wide default heap.
fn heap() -> &'static Heap<OwnedArena> {
    HEAP.get_or_init(|| Heap::new(OwnedArena::new(DEFAULT_ARENA_SIZE)))
}

std::thread_local! {
    /// Per-thread reentrancy guard for the tracing path only (§5: this flag
    /// protects `log::trace!`, not the heap itself — concurrent callers
    /// still race on the free list exactly as documented for the core).
    static IN_TRACE: Cell<bool> = const { Cell::new(false) };
}

/// Emit a trace-level log line unless already inside one on this thread.
/// `msg` is only evaluated (formatting allocates a `String`) when tracing is
/// both enabled and not already reentered.
fn trace(msg: impl FnOnce() -> std::string::String) {
    IN_TRACE.with(|guard| {
        if guard.get() || !log::log_enabled!(log::Level::Trace) {
            return;
        }
        guard.set(true);
        log::trace!("{}", msg());
        guard.set(false);
    });
}

/// Overrides libc's `malloc`.
///
/// # Safety
/// Callable from any context libc's own `malloc` would be callable from.
#[no_mangle]
pub unsafe extern "C" fn malloc(size: usize) -> *mut libc::c_void {
    trace(|| std::format!("malloc({size})"));
    heap().alloc_bytes(size).cast()
}

/// Overrides libc's `calloc`. Per §4.8/§9, `count * size` is not checked for
/// overflow — preserved as-is from the reference implementation, which has
/// the same documented limitation.
///
/// # Safety
/// Callable from any context libc's own `calloc` would be callable from.
#[no_mangle]
pub unsafe extern "C" fn calloc(count: usize, size: usize) -> *mut libc::c_void {
    let total = count * size;
    trace(|| std::format!("calloc({count}, {size})"));
    let ptr = heap().alloc_bytes(total);
    if !ptr.is_null() {
        // SAFETY: `alloc_bytes` just returned `ptr` as a fresh, exclusively
        // owned allocation of at least `total` bytes.
        unsafe { std::ptr::write_bytes(ptr, 0, total) };
    }
    ptr.cast()
}

/// Overrides libc's `realloc`.
///
/// # Safety
/// `ptr` must be null, or a pointer previously returned by this module's
/// `malloc`/`calloc`/`realloc` and not yet freed.
#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut libc::c_void, size: usize) -> *mut libc::c_void {
    trace(|| std::format!("realloc({ptr:p}, {size})"));
    // SAFETY: forwarded from this fn's own safety contract.
    unsafe { heap().resize_bytes(ptr.cast(), size) }.cast()
}

/// Overrides libc's `free`. A null pointer is a documented no-op (§4.4 step
/// 1), matching both the reference shim's explicit `if (ptr != NULL)` guard
/// and ordinary libc `free` semantics.
///
/// # Safety
/// `ptr` must be null, or a pointer previously returned by this module's
/// `malloc`/`calloc`/`realloc` and not yet freed.
#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut libc::c_void) {
    if ptr.is_null() {
        trace(|| std::string::String::from("free(NULL)"));
        return;
    }
    trace(|| std::format!("free({ptr:p})"));
    // SAFETY: forwarded from this fn's own safety contract.
    unsafe { heap().free_bytes(ptr.cast()) };
}
