use anyhow::Result;

use crate::detect::region::Region;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend is owned by the capture context and never shared across threads,
/// so `detect` takes `&mut self` and may keep state between frames (reference
/// frames, counters). Implementations must not retain the frame past the call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Candidate motion regions for one frame, in detector space, unfiltered.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Region>>;

    /// Report how many of the last frame's regions survived filtering.
    ///
    /// Backends that adapt their baseline to slow scene drift hook in here.
    fn observe_filtered(&mut self, _retained: usize) {}

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
