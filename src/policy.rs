//! Placement policies: first-fit, best-fit and worst-fit.
//!
//! Each policy walks the free list from `head` and picks a block whose
//! `size` is at least `req`, where `req` is already expressed in the block's
//! own accounting units (see `heap::alloc` for how a user size becomes
//! `req`). A policy never returns a block smaller than `req` (invariant I7).

use crate::block::{self, FreeHeader};
use core::ptr::NonNull;

/// A placement function: given the free-list head and a required size,
/// returns the chosen block, or `None` if no block is large enough.
///
/// # Safety
/// Implementations only read `size`/`next` through the list; they must not
/// assume the returned block has been removed from the list yet.
pub type Policy = fn(Option<NonNull<FreeHeader>>, usize) -> Option<NonNull<FreeHeader>>;

/// The three placement strategies the allocator can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitStrategy {
    /// The first free block encountered with enough room. Cheapest to
    /// evaluate; can leave more fragmentation than best-fit.
    #[default]
    FirstFit,
    /// The smallest free block with enough room (ties broken by address).
    /// Minimises wasted space per allocation at the cost of a full scan.
    BestFit,
    /// The largest free block with enough room (ties broken by address).
    /// Tends to keep one big block available at the expense of everything
    /// else fragmenting.
    WorstFit,
}

impl FitStrategy {
    /// Resolve this strategy to the concrete placement function.
    pub const fn function(self) -> Policy {
        match self {
            Self::FirstFit => first_fit,
            Self::BestFit => best_fit,
            Self::WorstFit => worst_fit,
        }
    }
}

/// # Safety
/// `head` must either be `None` or point to a valid, live [`FreeHeader`]
/// that is part of a well-formed free list (every `next` in the chain is
/// likewise `None` or valid).
unsafe fn walk(head: Option<NonNull<FreeHeader>>) -> impl Iterator<Item = NonNull<FreeHeader>> {
    core::iter::successors(head, |&node| unsafe { block::load_free(node).next })
}

/// First-fit: the first free block with `size >= req`.
pub fn first_fit(head: Option<NonNull<FreeHeader>>, req: usize) -> Option<NonNull<FreeHeader>> {
    // SAFETY: caller contract of `Policy`/`walk`.
    unsafe { walk(head) }.find(|&node| unsafe { block::load_free(node).size } >= req)
}

/// Best-fit: among free blocks with `size >= req`, the smallest one. Ties
/// (equal size) are broken by picking the first one encountered, i.e. the
/// one at the lower address, since the list is address-ordered.
pub fn best_fit(head: Option<NonNull<FreeHeader>>, req: usize) -> Option<NonNull<FreeHeader>> {
    // SAFETY: caller contract of `Policy`/`walk`.
    let mut best: Option<(NonNull<FreeHeader>, usize)> = None;
    for node in unsafe { walk(head) } {
        let size = unsafe { block::load_free(node).size };
        if size < req {
            continue;
        }
        match best {
            Some((_, best_size)) if size >= best_size => {}
            _ => best = Some((node, size)),
        }
    }
    best.map(|(node, _)| node)
}

/// Worst-fit: among free blocks with `size >= req`, the strictly largest
/// one. Ties are broken by picking the first one encountered.
pub fn worst_fit(head: Option<NonNull<FreeHeader>>, req: usize) -> Option<NonNull<FreeHeader>> {
    // SAFETY: caller contract of `Policy`/`walk`.
    let mut worst: Option<(NonNull<FreeHeader>, usize)> = None;
    for node in unsafe { walk(head) } {
        let size = unsafe { block::load_free(node).size };
        if size < req {
            continue;
        }
        match worst {
            Some((_, worst_size)) if size <= worst_size => {}
            _ => worst = Some((node, size)),
        }
    }
    worst.map(|(node, _)| node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::{boxed::Box, vec::Vec};
    use core::mem::MaybeUninit;

    /// Build a small, detached chain of [`FreeHeader`]s (not backed by a real
    /// arena) purely to exercise the three placement functions in isolation.
    struct Chain {
        // Leaked boxes so the `NonNull`s stay valid for the test's lifetime.
        nodes: Vec<NonNull<FreeHeader>>,
    }
    impl Chain {
        fn new(sizes: &[usize]) -> Self {
            let mut nodes = Vec::new();
            for &size in sizes.iter().rev() {
                let next = nodes.last().copied();
                let boxed: Box<MaybeUninit<FreeHeader>> =
                    Box::new(MaybeUninit::new(FreeHeader::new(size, next)));
                let ptr = Box::leak(boxed);
                nodes.push(NonNull::from(ptr).cast());
            }
            nodes.reverse();
            Self { nodes }
        }
        fn head(&self) -> Option<NonNull<FreeHeader>> {
            self.nodes.first().copied()
        }
    }

    #[test]
    fn first_fit_picks_earliest_match() {
        let chain = Chain::new(&[4, 16, 8]);
        let found = first_fit(chain.head(), 8).unwrap();
        assert_eq!(unsafe { block::load_free(found).size }, 16);
    }

    #[test]
    fn best_fit_picks_smallest_match() {
        let chain = Chain::new(&[32, 8, 16]);
        let found = best_fit(chain.head(), 8).unwrap();
        assert_eq!(unsafe { block::load_free(found).size }, 8);
    }

    #[test]
    fn best_fit_breaks_ties_by_address() {
        let chain = Chain::new(&[8, 8]);
        let found = best_fit(chain.head(), 8).unwrap();
        assert_eq!(found, chain.nodes[0]);
    }

    #[test]
    fn worst_fit_picks_largest_match() {
        let chain = Chain::new(&[8, 32, 16]);
        let found = worst_fit(chain.head(), 8).unwrap();
        assert_eq!(unsafe { block::load_free(found).size }, 32);
    }

    #[test]
    fn no_block_fits_returns_none() {
        let chain = Chain::new(&[4, 4]);
        assert!(first_fit(chain.head(), 100).is_none());
        assert!(best_fit(chain.head(), 100).is_none());
        assert!(worst_fit(chain.head(), 100).is_none());
    }

    #[test]
    fn empty_list_returns_none() {
        assert!(first_fit(None, 1).is_none());
        assert!(best_fit(None, 1).is_none());
        assert!(worst_fit(None, 1).is_none());
    }
}
