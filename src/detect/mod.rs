mod backend;
mod backends;
mod filter;
mod region;

pub use backend::DetectorBackend;
pub use backends::{MotionConfig, MotionDetector, ReferenceReset};
pub use filter::RegionFilter;
pub use region::{AreaMode, BoundingBox, Region, RoiOffset};
