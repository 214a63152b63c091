//! Panic capture at the job boundary.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// What a job left behind when it panicked. The caller decides whether
/// to route it into the monitor tree or to keep unwinding.
pub struct Caught(Box<dyn Any + Send>);

impl Caught {
    /// Renders the payload as an error value. Panic payloads are almost
    /// always `&str` or `String`; anything else is reported opaquely.
    pub fn into_error(self) -> failure::Error {
        if let Some(message) = self.0.downcast_ref::<&'static str>() {
            format_err!("{}", message)
        } else if let Some(message) = self.0.downcast_ref::<String>() {
            format_err!("{}", message)
        } else {
            format_err!("job failed with a non-string panic payload")
        }
    }

    /// Continues unwinding with the original payload, untouched.
    pub fn resume(self) -> ! {
        panic::resume_unwind(self.0)
    }
}

/// Runs `f`, trapping any panic. The trapped computation can be treated
/// as exception safe: a caught panic is always either resumed or turned
/// into an error for the monitor tree.
pub fn trap<F, R>(f: F) -> Result<R, Caught>
where
    F: FnOnce() -> R,
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(Caught)
}
