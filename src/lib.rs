//! # What is This?
//!
//! `tempo` is the kernel of an asynchronous execution library: a
//! single-threaded cooperative scheduler coordinating thousands of
//! fine-grained tasks whose results are exchanged through single-assignment
//! cells. It provides structured error containment through a supervision
//! tree, timed events on a hierarchical timing wheel, back-pressured
//! streaming pipes and bounded-concurrency throttles.
//!
//! The most intuitive and simple setup could be something like:
//!
//! ```ignore
//! tempo::setup(tempo::Params::default());
//! tempo::sched::install_uncaught_handler(|fault| eprintln!("boom: {}", fault));
//!
//! let done = tempo::clock::after(tempo::Span::from_millis(10));
//! done.upon(|_| println!("ten milliseconds later"));
//! tempo::sched::run_cycles_until_determined(&done);
//!
//! tempo::discard();
//! ```
//!
//! Jobs run to completion on the thread that called `setup`; nothing is
//! preempted, and time only advances between cycles. Foreign threads may
//! hand work in through `sched::external_handle()`, which is the kernel's
//! only cross-thread surface.

#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

extern crate crossbeam_deque;
extern crate rand;
extern crate smallvec;

pub mod errors;

pub mod clock;
pub mod ivar;
pub mod params;
pub mod pipe;
pub mod prelude;
pub mod sched;
pub mod throttle;
pub mod utils;
pub mod wheel;

pub use crate::ivar::{Deferred, Ivar};
pub use crate::params::Params;
pub use crate::sched::{discard, run_cycle, setup, setup_with_time_source, valid};
pub use crate::utils::time::{Span, Time};
