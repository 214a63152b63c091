//! Commonly used utilities like arenas, fast hashing and time.

pub mod arena;
pub mod hash;
pub mod time;

pub mod prelude {
    pub use super::arena::{Arena, Handle};
    pub use super::hash::{FastHashMap, FastHashSet};
    pub use super::time::{ManualTimeSource, Span, Time};
}
