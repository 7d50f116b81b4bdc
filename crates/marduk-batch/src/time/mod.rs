//! Time subsystem.
//!
//! Animations never read the wall clock themselves; callers pass a timestamp
//! into `update`. A [`Clock`] is the usual source of that timestamp:
//! - [`MonotonicClock`] for real frame loops
//! - [`ManualClock`] for deterministic stepping in tests and offline renders

mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};
