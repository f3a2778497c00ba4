#[cfg(test)]
pub mod tests {
    use std::collections::HashMap;
    use std::ptr::NonNull;

    use vk_host_alloc::{vk, AllocError, Block, Policy, TrackedAllocator};

    const ALIGNMENTS: [usize; 8] = [1, 2, 4, 8, 16, 32, 64, 4096];
    const SIZES: [usize; 9] = [1, 3, 7, 8, 10, 63, 100, 1000, 4097];

    fn allocator() -> TrackedAllocator {
        TrackedAllocator::with_policy(Policy::new())
    }

    fn fill(ptr: NonNull<u8>, len: usize, seed: u8) {
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) };
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = seed.wrapping_mul(31).wrapping_add(i as u8);
        }
    }

    fn read(ptr: NonNull<u8>, len: usize) -> Vec<u8> {
        unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) }.to_vec()
    }

    #[test]
    fn test_allocate_then_free_restores_table() {
        let allocator = allocator();
        let keep = allocator.allocate(40, 8, vk::SystemAllocationScope::INSTANCE);
        let before = allocator.blocks();

        for &alignment in &ALIGNMENTS {
            for &size in &SIZES {
                let ptr = allocator
                    .allocate(size, alignment, vk::SystemAllocationScope::OBJECT)
                    .expect("allocation failed");
                assert_eq!(ptr.as_ptr() as usize % alignment, 0);
                assert_eq!(allocator.live_blocks(), before.len() + 1);

                allocator.free(Some(ptr));
                assert_eq!(allocator.blocks(), before);
            }
        }

        allocator.free(keep);
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_alignment_rounding() {
        let allocator = allocator();

        for &alignment in &ALIGNMENTS {
            for &size in SIZES.iter().filter(|&&size| size % alignment != 0) {
                let ptr = allocator
                    .allocate(size, alignment, vk::SystemAllocationScope::COMMAND)
                    .expect("allocation failed");
                let block = allocator.block(ptr).expect("block not tracked");

                let expected = size.div_ceil(alignment) * alignment;
                assert_eq!(block.size, expected, "size {size} alignment {alignment}");
                assert_eq!(block.alignment, alignment);
                assert_eq!(block.scope, vk::SystemAllocationScope::COMMAND);

                allocator.free(Some(ptr));
            }
        }

        assert!(allocator.stats().rounded_allocations > 0);
    }

    #[test]
    fn test_double_free_is_a_noop() {
        let allocator = allocator();
        let ptr = allocator.allocate(24, 8, vk::SystemAllocationScope::OBJECT);
        let other = allocator.allocate(24, 8, vk::SystemAllocationScope::OBJECT);

        allocator.free(ptr);
        let before = allocator.blocks();
        allocator.free(ptr);

        assert_eq!(allocator.blocks(), before);
        assert_eq!(allocator.stats().untracked_frees, 1);
        assert_eq!(allocator.stats().frees, 1);

        allocator.free(other);
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_unknown_free_leaves_table_alone() {
        let allocator = allocator();
        let live = allocator.allocate(64, 16, vk::SystemAllocationScope::CACHE);
        let before = allocator.blocks();

        let mut foreign = Box::new([0u8; 32]);
        let foreign_ptr = NonNull::new(foreign.as_mut_ptr()).unwrap();

        assert_eq!(
            allocator.try_free(foreign_ptr),
            Err(AllocError::UntrackedFree(foreign_ptr.as_ptr() as usize))
        );
        allocator.free(Some(foreign_ptr));
        allocator.free(None);

        assert_eq!(allocator.blocks(), before);
        assert_eq!(foreign[0], 0);

        allocator.free(live);
    }

    #[test]
    fn test_reallocation_preserves_prefix() {
        let allocator = allocator();

        for (seed, &old_size) in SIZES.iter().enumerate() {
            for &new_size in &SIZES {
                let ptr = allocator
                    .allocate(old_size, 8, vk::SystemAllocationScope::OBJECT)
                    .expect("allocation failed");
                fill(ptr, old_size, seed as u8);
                let old_bytes = read(ptr, old_size);

                let new_ptr = allocator
                    .reallocate(Some(ptr), new_size, 8, vk::SystemAllocationScope::OBJECT)
                    .expect("reallocation failed");

                let kept = old_size.min(new_size);
                assert_eq!(read(new_ptr, kept), old_bytes[..kept]);
                assert_eq!(allocator.live_blocks(), 1);

                allocator.free(Some(new_ptr));
            }
        }

        assert!(allocator.is_empty());
    }

    #[test]
    fn test_reallocate_null_acts_as_allocate() {
        let tracked = allocator();
        let reference = allocator();

        let a = tracked
            .reallocate(None, 10, 8, vk::SystemAllocationScope::DEVICE)
            .expect("reallocation failed");
        let b = reference
            .allocate(10, 8, vk::SystemAllocationScope::DEVICE)
            .expect("allocation failed");

        let a_blocks: Vec<Block> = tracked.blocks().into_values().collect();
        let b_blocks: Vec<Block> = reference.blocks().into_values().collect();
        assert_eq!(a_blocks, b_blocks);
        assert_eq!(a_blocks, vec![Block::new(16, 8, vk::SystemAllocationScope::DEVICE)]);

        tracked.free(Some(a));
        reference.free(Some(b));
    }

    #[test]
    fn test_reallocate_to_zero_frees_even_with_padding() {
        let padded = TrackedAllocator::with_policy(
            Policy::new().with_padding_multiplier(vk_host_alloc::VENDOR_PADDING_MULTIPLIER),
        );

        let empty = padded
            .allocate(0, 8, vk::SystemAllocationScope::OBJECT)
            .expect("allocation failed");
        assert_eq!(padded.block(empty).unwrap().size, 8 * 32);

        assert!(padded
            .reallocate(Some(empty), 0, 8, vk::SystemAllocationScope::OBJECT)
            .is_none());
        assert!(padded.is_empty());
        assert_eq!(padded.stats().frees, 1);
    }

    #[test]
    fn test_reallocate_untracked_is_refused() {
        let allocator = allocator();
        let live = allocator.allocate(16, 8, vk::SystemAllocationScope::OBJECT);
        let before = allocator.blocks();

        let mut foreign = [7u8; 16];
        let foreign_ptr = NonNull::new(foreign.as_mut_ptr()).unwrap();

        assert!(allocator
            .reallocate(Some(foreign_ptr), 64, 8, vk::SystemAllocationScope::OBJECT)
            .is_none());
        assert_eq!(
            allocator.try_reallocate(Some(foreign_ptr), 64, 8, vk::SystemAllocationScope::OBJECT),
            Err(AllocError::UntrackedReallocation(
                foreign_ptr.as_ptr() as usize
            ))
        );
        assert_eq!(allocator.blocks(), before);
        assert_eq!(allocator.stats().untracked_reallocations, 2);
        assert_eq!(foreign, [7u8; 16]);

        allocator.free(live);
    }

    #[test]
    fn test_failed_reallocation_keeps_original() {
        let allocator = allocator();
        let ptr = allocator
            .allocate(32, 8, vk::SystemAllocationScope::OBJECT)
            .expect("allocation failed");

        assert!(allocator
            .reallocate(Some(ptr), usize::MAX - 4, 8, vk::SystemAllocationScope::OBJECT)
            .is_none());
        assert_eq!(
            allocator.block(ptr),
            Some(Block::new(32, 8, vk::SystemAllocationScope::OBJECT))
        );

        allocator.free(Some(ptr));
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_allocate_reallocate_free_scenario() {
        let allocator = allocator();

        let first = allocator
            .allocate(10, 8, vk::SystemAllocationScope::OBJECT)
            .expect("allocation failed");
        assert_eq!(
            allocator.block(first),
            Some(Block::new(16, 8, vk::SystemAllocationScope::OBJECT))
        );
        fill(first, 16, 42);
        let first_bytes = read(first, 16);
        let first_addr = first.as_ptr() as usize;

        let second = allocator
            .reallocate(Some(first), 20, 8, vk::SystemAllocationScope::OBJECT)
            .expect("reallocation failed");
        assert_eq!(
            allocator.block(second),
            Some(Block::new(24, 8, vk::SystemAllocationScope::OBJECT))
        );
        assert_eq!(read(second, 16), first_bytes);

        let blocks: HashMap<usize, Block> = allocator.blocks();
        assert_eq!(blocks.len(), 1);
        assert!(blocks.contains_key(&(second.as_ptr() as usize)));
        if second.as_ptr() as usize != first_addr {
            assert!(!blocks.contains_key(&first_addr));
        }

        allocator.free(Some(second));
        assert!(allocator.is_empty());
        assert_eq!(allocator.live_bytes(), 0);
    }

    #[test]
    fn test_vendor_padding_is_tracked() {
        let allocator = TrackedAllocator::with_policy(
            Policy::new().with_padding_multiplier(vk_host_alloc::VENDOR_PADDING_MULTIPLIER),
        );

        let ptr = allocator
            .allocate(10, 8, vk::SystemAllocationScope::OBJECT)
            .expect("allocation failed");
        assert_eq!(allocator.block(ptr).unwrap().size, 16 + 8 * 32);

        let ptr = allocator
            .reallocate(Some(ptr), 20, 8, vk::SystemAllocationScope::OBJECT)
            .expect("reallocation failed");
        assert_eq!(allocator.block(ptr).unwrap().size, 24 + 8 * 32);

        allocator.free(Some(ptr));
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_concurrent_callers() {
        let allocator = allocator();

        std::thread::scope(|scope| {
            for t in 0..4u8 {
                let allocator = &allocator;
                scope.spawn(move || {
                    let mut live = Vec::new();
                    for i in 0..200usize {
                        let ptr = allocator
                            .allocate(1 + i % 97, 8, vk::SystemAllocationScope::COMMAND)
                            .expect("allocation failed");
                        fill(ptr, 1 + i % 97, t);
                        live.push(ptr);
                        if i % 3 == 0 {
                            let ptr = live.swap_remove(0);
                            allocator.free(Some(ptr));
                        }
                    }
                    for ptr in live {
                        allocator.free(Some(ptr));
                    }
                });
            }
        });

        assert!(allocator.is_empty());
        let stats = allocator.stats();
        assert_eq!(stats.allocations, 800);
        assert_eq!(stats.frees, 800);
        assert_eq!(stats.untracked_frees, 0);
    }
}
