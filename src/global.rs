//! `Heap<M>`: the Rust-idiomatic rendition of "redirect the process-wide
//! allocation entry points" (§4.8, §2.1). A `spin::Mutex`-guarded
//! [`HeapCore<M>`] implementing [`core::alloc::GlobalAlloc`]: assigning a
//! [`Heap`] to a `#[global_allocator]` static is the interposition, for any
//! Rust binary that links this crate, with none of the `extern "C"`
//! symbol-override games the literal libc shim ([`crate::interpose`]) needs
//! for non-Rust or already-linked-libc processes.
//!
//! `HeapCore::init` is not a `const fn` (it writes the initial free-block
//! header through a pointer, which [`MemorySpace::base`] only produces at
//! runtime), but a `#[global_allocator]` static must be constructible in a
//! `const` initializer. So `Heap::new` defers `HeapCore::init` to the first
//! real operation instead, mirroring the reference implementation's own
//! `static int first_use` lazy-init flag in `malloc_stub.c`'s `init()`.

use crate::arena::MemorySpace;
use crate::heap::HeapCore;
use crate::policy::FitStrategy;
use core::alloc::{GlobalAlloc, Layout};
use core::mem::MaybeUninit;
use core::ptr::NonNull;
use spin::Mutex;

/// A lazily-initialized `HeapCore<M>`: either still holding the raw arena
/// provider it will be built from, or already built.
///
/// `#[repr(u8)]` with explicit discriminants (stable since Rust 1.66) pins
/// `Pending`'s tag to `0`, rather than leaving it to the unspecified default
/// `#[repr(Rust)]` layout: a `Heap::new` constructed through the all-zero
/// sentinel secret (see [`Heap::new`]) is then a genuinely all-zero-or-undef
/// static initializer — `Pending`'s tag is `0`, its `MaybeUninit` payload
/// contributes no concrete bytes of its own beyond the `0u64` sentinel secret
/// — so it is eligible for `.bss` rather than `.data` placement. A naive
/// `Option`-wrapped payload would reintroduce the exact class of bug the
/// teacher crate's issue #30 fixed: any non-zero byte anywhere in a static's
/// initializer forces the *whole* object, arena included, into `.data`.
#[repr(u8)]
enum State<M> {
    Pending(MaybeUninit<(M, u64)>) = 0,
    Ready(HeapCore<M>) = 1,
}

/// The `GlobalAlloc`-implementing wrapper around [`HeapCore`]. Only one
/// `Mutex` guards the whole heap, exactly as the reference implementation's
/// bare global statics are, in effect, guarded by nothing at all within a
/// single thread of control (§5) — the mutex exists to satisfy Rust's `&self`
/// requirement on `GlobalAlloc`, not to add fairness or a scheduling model.
pub struct Heap<M> {
    state: Mutex<State<M>>,
}

impl<M: MemorySpace> Heap<M> {
    /// Create a new, not-yet-initialized heap over `space`. Cheap and
    /// `const`, so it can back a `#[global_allocator]` static; the real
    /// [`HeapCore::init`] work happens on first use.
    ///
    /// Stores the sentinel secret `0` rather than [`crate::block::DEFAULT_SECRET`]
    /// directly, so that the common case keeps the static's initializer
    /// all-zero-or-undef (see [`State`]); `0` is substituted for the real
    /// default secret lazily, inside [`Heap::with_core`]. An explicit
    /// `with_secret(space, 0)` call is indistinguishable from this and is
    /// treated the same way — `0` is never usable as a literal guard secret,
    /// since XOR-ing with it would make every guard equal to its own block
    /// address, defeating the point.
    pub const fn new(space: M) -> Self {
        Self::with_secret(space, 0)
    }

    /// As [`Heap::new`], but with an explicit guard secret (see §4.1). Note
    /// that supplying a non-zero `secret` here makes this static's
    /// initializer non-zero, which forces the whole allocator (arena
    /// included) out of `.bss` and into `.data` — accept that cost only if
    /// you actually need a non-default secret.
    pub const fn with_secret(space: M, secret: u64) -> Self {
        Self {
            state: Mutex::new(State::Pending(MaybeUninit::new((space, secret)))),
        }
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut HeapCore<M>) -> R) -> R {
        let mut guard = self.state.lock();
        if let State::Pending(cell) = &mut *guard {
            // SAFETY: every `State::Pending` is constructed holding a fully
            // initialized `(M, u64)` (see `new`/`with_secret`), and this is
            // the only place that ever reads out of it; `*guard` is
            // unconditionally overwritten immediately below, so the bits
            // read here can never be observed or read again through the old
            // `MaybeUninit`.
            let (space, secret) = unsafe { cell.as_ptr().read() };
            let secret = if secret == 0 { crate::block::DEFAULT_SECRET } else { secret };
            log::debug!("redzone-heap: initializing arena on first use (secret = {secret:#x})");
            *guard = State::Ready(HeapCore::with_secret(space, secret));
        }
        match &mut *guard {
            State::Ready(core) => f(core),
            State::Pending(_) => unreachable!("just initialized above"),
        }
    }

    /// Install a new placement policy by name (§4.2). Forces lazy
    /// initialization if this heap has not been touched yet.
    pub fn set_policy(&self, strategy: FitStrategy) {
        self.with_core(|core| core.set_policy(strategy));
    }

    /// Allocate `user_size` bytes through the core (§4.3), bypassing
    /// `GlobalAlloc`'s `Layout`/alignment machinery. Used directly by the
    /// `interpose` shim, which only ever receives a byte count from libc
    /// callers.
    pub fn alloc_bytes(&self, user_size: usize) -> *mut u8 {
        self.with_core(|core| core.alloc(user_size))
            .map_or(core::ptr::null_mut(), |p| p.as_ptr())
    }

    /// Free a raw payload pointer through the core (§4.4).
    ///
    /// # Safety
    /// `ptr`, if non-null, must be a pointer this heap itself previously
    /// returned from [`Heap::alloc_bytes`] or `GlobalAlloc::alloc`, not yet
    /// freed.
    pub unsafe fn free_bytes(&self, ptr: *mut u8) {
        self.with_core(|core| core.free(NonNull::new(ptr)));
    }

    /// Resize a raw payload pointer through the core (§4.7).
    ///
    /// # Safety
    /// Same contract as [`Heap::free_bytes`] for `ptr`.
    pub unsafe fn resize_bytes(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        self.with_core(|core| core.resize(NonNull::new(ptr), new_size))
            .map_or(core::ptr::null_mut(), |p| p.as_ptr())
    }

    /// The user-visible size of a previously-allocated payload pointer, or
    /// `0` on a null/out-of-arena/corrupted pointer (§4.5).
    pub fn size_of(&self, ptr: *mut u8) -> usize {
        self.with_core(|core| core.size(NonNull::new(ptr)))
    }

    /// Iterate every block in the arena in address order (§4.5).
    pub fn show(&self, mut visitor: impl FnMut(NonNull<u8>, usize, bool)) {
        self.with_core(|core| core.show(&mut visitor));
    }
}

// SAFETY: `GlobalAlloc` requires `Sync`; `Mutex<State<M>>` is `Sync` whenever
// `State<M>` is `Send`, which holds whenever `M: Send` (`HeapCore<M>: Send`
// is already established in `heap`, and `(M, u64)` is `Send` under the same
// bound).
unsafe impl<M: MemorySpace + Send> GlobalAlloc for Heap<M> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // Non-goal (§1, §9): alignment beyond the natural word alignment the
        // header layout implies. The redzone scheme recovers a block's header
        // from a fixed `ptr - Ha` offset (§4.4), so unlike the teacher
        // crate's `align_to` over-allocation trick, this design cannot hand
        // back an interior, padded pointer without breaking `free`/`resize`'s
        // guard recovery. Rather than silently return an under-aligned
        // pointer, alignment requests stricter than the natural 8-byte
        // alignment fail outright.
        if layout.align() > core::mem::align_of::<u64>() {
            return core::ptr::null_mut();
        }
        self.alloc_bytes(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: forwarded from this fn's own safety contract.
        unsafe { self.free_bytes(ptr) };
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: forwarded from this fn's own safety contract.
        unsafe { self.resize_bytes(ptr, new_size) }
    }
}
