//! Data types carried through the relay pipeline.

pub mod heartrate;

pub use heartrate::{now_millis, Reading};
