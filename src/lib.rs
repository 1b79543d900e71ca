//! A user-space general-purpose heap allocator over a single, fixed,
//! contiguous arena of raw bytes, with address-ordered free-list
//! coalescing, a pluggable placement policy, and redzone-based corruption
//! detection.
//!
//! This crate implements the classical quartet — allocate, free, resize,
//! size-query — on top of a single-linked free list threaded through the
//! free blocks themselves (no external per-block metadata). Every allocated
//! block carries two 8-byte guard cookies, one in its header and one as a
//! trailer at the end of its payload, both derived from the block's own
//! address XOR a process-wide secret; they are checked on every inbound
//! pointer and a mismatch is treated as a fatal programming bug, not a
//! recoverable error (see [`heap`] for why).
//!
//! # Usage
//! The intended way to use this crate is as a `#[global_allocator]`, backed
//! by a statically embedded arena (no heap of its own needed to come into
//! being):
//! ```no_run
//! use redzone_heap::{Heap, StaticArena};
//!
//! #[global_allocator]
//! static ALLOCATOR: Heap<StaticArena<65536>> = Heap::new(StaticArena::new());
//!
//! extern crate alloc;
//! ```
//! Afterwards every `Vec`, `String`, `Box`, etc. in the binary is
//! transparently redirected through this allocator; no further interaction
//! with `ALLOCATOR` is required. For interposing on processes this crate is
//! not linked into as an ordinary Rust dependency (e.g. `LD_PRELOAD`-ing a
//! `cdylib` onto a non-Rust binary), see the `interpose` feature and
//! [`interpose`] instead.
//!
//! # Design
//! The arena is supplied by an external [`MemorySpace`](arena::MemorySpace)
//! collaborator; this crate ships [`StaticArena`] (const-generic, suited to
//! backing a `#[global_allocator]` static) and [`OwnedArena`] (heap-backed,
//! for hosted/testing use and the `interpose` shim's own default instance).
//! Every byte of the arena belongs to exactly one block — free or allocated
//! — laid out back-to-back with no external bookkeeping. Free blocks are
//! threaded into a single strictly-address-ordered list; inserting a newly
//! freed block coalesces it with an adjacent free neighbour on either side
//! in the same pass, so three consecutive free spans always collapse into
//! one. Three placement policies are provided ([`FitStrategy`]): first-fit
//! (the default), best-fit and worst-fit.
//!
//! This is explicitly **not** a thread-safe, multi-arena, or
//! fragmentation-avoiding allocator: it manages a single fixed-size arena
//! for a single logical sequence of operations, with [`Heap`]'s
//! `spin::Mutex` existing only to satisfy `GlobalAlloc`'s `&self`
//! requirement, not to provide real concurrency safety beyond mutual
//! exclusion of the raw free-list bookkeeping. Nor does it support
//! alignment beyond the natural 8-byte word alignment implied by the header
//! layout — see [`global`] for what that means for `GlobalAlloc` callers
//! requesting a stricter alignment.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

extern crate alloc;

pub mod arena;
pub mod block;
pub mod error;
mod global;
pub mod heap;
#[cfg(feature = "interpose")]
pub mod interpose;
mod list;
pub mod policy;

pub use arena::{MemorySpace, OwnedArena, StaticArena};
pub use block::GUARD_SIZE;
pub use error::{BoundsError, GuardError};
pub use global::Heap;
pub use heap::HeapCore;
pub use policy::{FitStrategy, Policy};
