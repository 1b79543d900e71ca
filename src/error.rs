//! The small set of typed errors this crate's internal helpers return.
//!
//! The public, caller-facing surface (`HeapCore::alloc`/`resize`/`size`)
//! deliberately does *not* use these: out-of-memory and out-of-arena-pointer
//! are ordinary, expected outcomes with nothing more to say than "absent",
//! so they are plain `Option`s, matching both the reference C `NULL`-
//! returning contract and the teacher crate's own `Option`-returning
//! `RawAllocator::alloc`. These error types exist for implementation-level
//! helpers that do distinguish more than one failure mode, the same reason
//! the teacher crate has its own `raw_allocator::FreeError`.

/// Why a pointer handed to [`crate::heap::HeapCore::free`]-adjacent helpers
/// was rejected before any guard check could even run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsError {
    /// The pointer was null / `None`.
    Null,
    /// The pointer lies outside `[MIN, MAX)`.
    OutOfArena,
}

/// The outcome of validating an allocated block's redzone guards.
///
/// A [`GuardError`] is never returned to a library caller: per §7, a guard
/// mismatch is a fatal programming bug, surfaced as a `panic!`, not a
/// recoverable `Result`. This type exists so the guard-check helper itself
/// stays a pure function the fatal path and the non-fatal
/// [`crate::heap::HeapCore::size`] path can share, with each deciding
/// separately how to react to a mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardError {
    /// The header's `guard` field did not match `address ^ SECRET`.
    HeaderMismatch,
    /// The trailing 8-byte guard did not match `address ^ SECRET`.
    TrailerMismatch,
}
