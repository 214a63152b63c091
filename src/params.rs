//! Functions for configuring the kernel at setup time.

use crate::utils::time::Span;

/// A structure containing configuration data for the kernel, handed to
/// `setup` once and never mutated afterwards (except through the explicit
/// scheduler setters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    /// Capture logical call-site history in execution contexts. Costs an
    /// allocation per derived context, so it defaults to off.
    pub record_backtraces: bool,
    /// Run expensive consistency checks over the queues and the timing
    /// wheel at the end of every cycle.
    pub check_invariants: bool,
    /// Panic when the scheduler is driven from a thread other than the one
    /// that called `setup`.
    pub detect_invalid_access_from_thread: bool,
    /// How many jobs a single cycle may run in each priority band before
    /// handing control back to the caller.
    pub max_num_jobs_per_priority_per_cycle: usize,
    pub timing_wheel: WheelParams,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            record_backtraces: false,
            check_invariants: false,
            detect_invalid_access_from_thread: true,
            max_num_jobs_per_priority_per_cycle: 500,
            timing_wheel: WheelParams::default(),
        }
    }
}

/// Level widths and base resolution of the timing wheel.
///
/// Level `l` holds `2^level_bits[l]` buckets; a bucket at level 0 spans
/// exactly one `resolution`, and each higher level's bucket spans the whole
/// of the level below it. The wheel horizon is the product of all bucket
/// counts times the resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WheelParams {
    pub level_bits: Vec<u8>,
    pub resolution: Span,
}

impl Default for WheelParams {
    fn default() -> Self {
        // Four levels of 1024 buckets at 1us covers roughly 12.7 days.
        WheelParams {
            level_bits: vec![10, 10, 10, 10],
            resolution: Span::from_micros(1),
        }
    }
}
