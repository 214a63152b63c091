pub use crate::clock::{self, Event, Fired, Repeat, TimeoutResult};
pub use crate::ivar::{self, Deferred, Ivar};
pub use crate::params::{Params, WheelParams};
pub use crate::pipe;
pub use crate::sched::{self, ExecutionContext, Fault, Monitor, Priority};
pub use crate::throttle::{Condition, Throttle};
pub use crate::utils::time::{ManualTimeSource, Span, Time};

pub use crate::{discard, run_cycle, setup, setup_with_time_source, valid};
