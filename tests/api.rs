use redzone_heap::{FitStrategy, Heap, StaticArena};

#[test]
fn is_usable_in_const_contexts() {
    const _ALLOCATOR1: Heap<StaticArena<32>> = Heap::new(StaticArena::new());
    static _ALLOCATOR2: Heap<StaticArena<32>> = Heap::new(StaticArena::new());
}

#[test]
fn supports_global_alloc() {
    fn assert<T: core::alloc::GlobalAlloc>(_: T) {}
    assert(Heap::new(StaticArena::<64>::new()))
}

#[test]
fn construction_alone_does_not_touch_the_arena() {
    // Unlike the teacher crate, this allocator initializes lazily: a heap
    // that is merely constructed over a too-small arena must not panic until
    // something actually tries to use it.
    let _allocator: Heap<StaticArena<4>> = Heap::new(StaticArena::new());
}

#[test]
#[should_panic(expected = "arena too small")]
fn first_use_panics_on_a_too_small_arena() {
    let allocator: Heap<StaticArena<4>> = Heap::new(StaticArena::new());
    allocator.alloc_bytes(1); // panics here, on first real use
}

#[test]
fn setting_a_fit_strategy_forces_initialization_and_still_allocates() {
    let allocator: Heap<StaticArena<4096>> = Heap::new(StaticArena::new());
    allocator.set_policy(FitStrategy::WorstFit);
    let ptr = allocator.alloc_bytes(64);
    assert!(!ptr.is_null());
}

#[test]
fn size_of_a_null_pointer_is_zero() {
    let allocator: Heap<StaticArena<64>> = Heap::new(StaticArena::new());
    assert_eq!(allocator.size_of(core::ptr::null_mut()), 0);
}
