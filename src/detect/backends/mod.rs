pub mod motion;

pub use motion::{MotionConfig, MotionDetector, ReferenceReset};
