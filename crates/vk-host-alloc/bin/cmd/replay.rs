use std::ffi::c_void;

use clap::Parser;
use eyre::{bail, eyre, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vk_host_alloc::{vk, AllocatorReport, Format, TrackedAllocator};

const ALIGNMENTS: [usize; 7] = [1, 2, 4, 8, 16, 32, 64];
const SCOPES: [vk::SystemAllocationScope; 5] = [
    vk::SystemAllocationScope::COMMAND,
    vk::SystemAllocationScope::OBJECT,
    vk::SystemAllocationScope::CACHE,
    vk::SystemAllocationScope::DEVICE,
    vk::SystemAllocationScope::INSTANCE,
];
const MAX_BLOCK_SIZE: usize = 512;

#[derive(Debug, Parser)]
pub struct ReplayArgs {
    #[arg(long, default_value_t = 64, help = "Number of driver calls to replay")]
    pub blocks: usize,

    #[arg(long, default_value_t = 1, help = "Seed of the workload generator")]
    pub seed: u64,

    #[arg(
        long,
        default_value_t = 0,
        help = "Blocks left live when the report is taken"
    )]
    pub keep: usize,

    #[arg(
        long,
        default_value_t = Format::Table,
        help = "Report format: table, json or json-pretty"
    )]
    pub format: Format,
}

impl ReplayArgs {
    pub fn run(&self) -> Result<()> {
        let allocator = TrackedAllocator::new();
        let callbacks = allocator.callbacks();
        let driver = Driver::new(&callbacks)?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut live: Vec<LiveBlock> = Vec::new();

        // Half of the calls allocate, a quarter reallocate, a quarter free.
        for _ in 0..self.blocks {
            match rng.random_range(0..4) {
                2 if !live.is_empty() => {
                    let index = rng.random_range(0..live.len());
                    let block = live[index];
                    let size = rng.random_range(1..=MAX_BLOCK_SIZE);
                    let memory =
                        driver.reallocate(block.memory, size, block.alignment, block.scope);
                    if memory.is_null() {
                        bail!("reallocation of {} bytes failed", size);
                    }
                    let preserved = block.size.min(size);
                    if !holds_pattern(memory, preserved, block.tag) {
                        bail!("reallocation lost the first {} bytes of a block", preserved);
                    }
                    fill_pattern(memory, size, block.tag);
                    live[index] = LiveBlock {
                        memory,
                        size,
                        ..block
                    };
                }
                3 if !live.is_empty() => {
                    let block = live.swap_remove(rng.random_range(0..live.len()));
                    driver.free(block.memory);
                }
                _ => {
                    let size = rng.random_range(1..=MAX_BLOCK_SIZE);
                    let alignment = ALIGNMENTS[rng.random_range(0..ALIGNMENTS.len())];
                    let scope = SCOPES[rng.random_range(0..SCOPES.len())];
                    let memory = driver.allocate(size, alignment, scope);
                    if memory.is_null() {
                        bail!("allocation of {} bytes failed", size);
                    }
                    let tag: u8 = rng.random();
                    fill_pattern(memory, size, tag);
                    live.push(LiveBlock {
                        memory,
                        size,
                        alignment,
                        scope,
                        tag,
                    });
                }
            }
        }

        self.misbehave(&driver)?;

        while live.len() > self.keep {
            if let Some(block) = live.pop() {
                driver.free(block.memory);
            }
        }

        let report = AllocatorReport::new("replay", &allocator);
        self.format
            .reporter()
            .report(&report)
            .map_err(|e| eyre!("failed to print report: {}", e))?;

        for block in live.drain(..) {
            driver.free(block.memory);
        }

        if !allocator.is_empty() {
            bail!("{} blocks still tracked after replay", allocator.live_blocks());
        }

        Ok(())
    }

    /// The calls a buggy driver would make: a double free, a reallocation of memory
    /// it never got from us and the internal allocation notifications.
    fn misbehave(&self, driver: &Driver) -> Result<()> {
        let memory = driver.allocate(16, 8, vk::SystemAllocationScope::COMMAND);
        if memory.is_null() {
            bail!("allocation of 16 bytes failed");
        }
        driver.free(memory);
        driver.free(memory);

        let mut foreign = [0u64; 4];
        let refused = driver.reallocate(
            foreign.as_mut_ptr().cast(),
            64,
            8,
            vk::SystemAllocationScope::OBJECT,
        );
        if !refused.is_null() {
            bail!("reallocation of a foreign pointer was not refused");
        }

        driver.internal_allocation(
            4096,
            vk::InternalAllocationType::EXECUTABLE,
            vk::SystemAllocationScope::DEVICE,
        );
        driver.internal_free(
            4096,
            vk::InternalAllocationType::EXECUTABLE,
            vk::SystemAllocationScope::DEVICE,
        );

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveBlock {
    memory: *mut c_void,
    size: usize,
    alignment: usize,
    scope: vk::SystemAllocationScope,
    tag: u8,
}

fn fill_pattern(memory: *mut c_void, size: usize, tag: u8) {
    // SAFETY: `memory` was returned by the allocator for at least `size` bytes.
    let bytes = unsafe { std::slice::from_raw_parts_mut(memory.cast::<u8>(), size) };
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = tag.wrapping_add(i as u8);
    }
}

fn holds_pattern(memory: *mut c_void, size: usize, tag: u8) -> bool {
    // SAFETY: `memory` was returned by the allocator for at least `size` bytes.
    let bytes = unsafe { std::slice::from_raw_parts(memory.cast::<u8>(), size) };
    bytes
        .iter()
        .enumerate()
        .all(|(i, &byte)| byte == tag.wrapping_add(i as u8))
}

/// Calls the callback table the way a Vulkan implementation does.
struct Driver {
    user_data: *mut c_void,
    allocation: unsafe extern "system" fn(
        *mut c_void,
        usize,
        usize,
        vk::SystemAllocationScope,
    ) -> *mut c_void,
    reallocation: unsafe extern "system" fn(
        *mut c_void,
        *mut c_void,
        usize,
        usize,
        vk::SystemAllocationScope,
    ) -> *mut c_void,
    free: unsafe extern "system" fn(*mut c_void, *mut c_void),
    internal_allocation: unsafe extern "system" fn(
        *mut c_void,
        usize,
        vk::InternalAllocationType,
        vk::SystemAllocationScope,
    ),
    internal_free: unsafe extern "system" fn(
        *mut c_void,
        usize,
        vk::InternalAllocationType,
        vk::SystemAllocationScope,
    ),
}

impl Driver {
    fn new(callbacks: &vk::AllocationCallbacks<'_>) -> Result<Self> {
        Ok(Self {
            user_data: callbacks.p_user_data,
            allocation: callbacks
                .pfn_allocation
                .ok_or_else(|| eyre!("callback table has no pfnAllocation"))?,
            reallocation: callbacks
                .pfn_reallocation
                .ok_or_else(|| eyre!("callback table has no pfnReallocation"))?,
            free: callbacks
                .pfn_free
                .ok_or_else(|| eyre!("callback table has no pfnFree"))?,
            internal_allocation: callbacks
                .pfn_internal_allocation
                .ok_or_else(|| eyre!("callback table has no pfnInternalAllocation"))?,
            internal_free: callbacks
                .pfn_internal_free
                .ok_or_else(|| eyre!("callback table has no pfnInternalFree"))?,
        })
    }

    fn allocate(
        &self,
        size: usize,
        alignment: usize,
        scope: vk::SystemAllocationScope,
    ) -> *mut c_void {
        unsafe { (self.allocation)(self.user_data, size, alignment, scope) }
    }

    fn reallocate(
        &self,
        original: *mut c_void,
        size: usize,
        alignment: usize,
        scope: vk::SystemAllocationScope,
    ) -> *mut c_void {
        unsafe { (self.reallocation)(self.user_data, original, size, alignment, scope) }
    }

    fn free(&self, memory: *mut c_void) {
        unsafe { (self.free)(self.user_data, memory) }
    }

    fn internal_allocation(
        &self,
        size: usize,
        kind: vk::InternalAllocationType,
        scope: vk::SystemAllocationScope,
    ) {
        unsafe { (self.internal_allocation)(self.user_data, size, kind, scope) }
    }

    fn internal_free(
        &self,
        size: usize,
        kind: vk::InternalAllocationType,
        scope: vk::SystemAllocationScope,
    ) {
        unsafe { (self.internal_free)(self.user_data, size, kind, scope) }
    }
}
