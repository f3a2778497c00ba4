use thiserror::Error;

use crate::block::Address;

/// Failures of the fallible allocator entry points.
///
/// None of these ever cross the driver boundary: the callback table turns each of
/// them into a null pointer or a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The host allocator returned no memory
    #[error("host allocation of {size} bytes aligned to {alignment} failed")]
    AllocationFailed { size: usize, alignment: usize },

    /// Alignment is not a power of two, the reserved size is zero or overflows
    #[error("invalid allocation layout: {size} bytes aligned to {alignment}")]
    InvalidLayout { size: usize, alignment: usize },

    /// Free of an address that is not tracked (double free or foreign pointer)
    #[error("request freeing of nonallocated address {0:#x}")]
    UntrackedFree(Address),

    /// Reallocation of an address that is not tracked
    #[error("reallocating of nonallocated address {0:#x}")]
    UntrackedReallocation(Address),
}
