//! Reservation policy: alignment rounding and vendor padding.
//!
//! Both toggles are cargo features read once at build time. [`Policy::BUILD`] is the
//! policy every [`TrackedAllocator::new`](crate::TrackedAllocator::new) uses; an
//! explicit [`Policy`] can still be passed to
//! [`TrackedAllocator::with_policy`](crate::TrackedAllocator::with_policy).

/// Extra slack, in multiples of the alignment, added to every allocation when
/// `vendor-padding` is enabled.
///
/// The NVIDIA Optimus layer overflows its heap buffers below 32.
pub const VENDOR_PADDING_MULTIPLIER: usize = 32;

cfg_if::cfg_if! {
    if #[cfg(feature = "vendor-padding")] {
        const BUILD_PADDING_MULTIPLIER: usize = VENDOR_PADDING_MULTIPLIER;
    } else {
        const BUILD_PADDING_MULTIPLIER: usize = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Emit a trace event whenever a requested size is rounded up to the alignment
    pub trace_alignment_mismatch: bool,
    /// Number of alignment units appended to each reservation
    pub padding_multiplier: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self::BUILD
    }
}

impl Policy {
    /// Policy selected by the `align-trace` and `vendor-padding` features.
    pub const BUILD: Policy = Policy {
        trace_alignment_mismatch: cfg!(feature = "align-trace"),
        padding_multiplier: BUILD_PADDING_MULTIPLIER,
    };

    /// No tracing, no padding, whatever features are enabled.
    ///
    /// Unlike [`Policy::default`], which returns [`Policy::BUILD`], this ignores the
    /// `align-trace` and `vendor-padding` features.
    pub const fn new() -> Self {
        Self {
            trace_alignment_mismatch: false,
            padding_multiplier: 0,
        }
    }

    pub const fn with_alignment_trace(mut self, enabled: bool) -> Self {
        self.trace_alignment_mismatch = enabled;
        self
    }

    pub const fn with_padding_multiplier(mut self, multiplier: usize) -> Self {
        self.padding_multiplier = multiplier;
        self
    }

    /// Smallest multiple of `alignment` that holds `requested` bytes.
    ///
    /// `alignment` must be non-zero. Returns `None` on overflow.
    #[inline]
    pub fn round_up(requested: usize, alignment: usize) -> Option<usize> {
        match requested % alignment {
            0 => Some(requested),
            rem => requested.checked_add(alignment - rem),
        }
    }

    /// Number of bytes to actually reserve for a request.
    ///
    /// Returns `None` when `alignment` is not a power of two or the size overflows.
    pub fn reserved_size(&self, requested: usize, alignment: usize) -> Option<usize> {
        if !alignment.is_power_of_two() {
            return None;
        }

        let aligned = Self::round_up(requested, alignment)?;

        if aligned != requested && self.trace_alignment_mismatch {
            tracing::trace!(
                requested,
                alignment,
                aligned,
                "driver requested {requested} bytes not divisible by alignment {alignment}, allocating {aligned} bytes instead"
            );
        }

        let padding = alignment.checked_mul(self.padding_multiplier)?;
        aligned.checked_add(padding)
    }
}
