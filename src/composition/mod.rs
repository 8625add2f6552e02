//! Video compositions: render size, frame cadence and per-track layer transforms.

/// Default (aspect-fit) composition synthesis.
pub mod builder;
/// CPU rendering of a layer transform into a render-size frame.
pub mod raster;

use crate::foundation::core::{Affine, Size};
use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::time::{MediaTime, TimeRange};

/// How decoded video tracks are rendered into output frames.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VideoComposition {
    /// Size of every rendered frame.
    pub render_size: Size,
    /// Interval between rendered frames (`1 / frame rate`).
    pub frame_duration: MediaTime,
    /// Time-ranged instructions in timeline order.
    pub instructions: Vec<CompositionInstruction>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CompositionInstruction {
    pub time_range: TimeRange,
    /// Layers bottom to top.
    pub layers: Vec<LayerInstruction>,
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LayerInstruction {
    pub track_id: u32,
    /// Maps the track's coded frame into render space.
    pub transform: Affine,
}

impl VideoComposition {
    /// Frames per second implied by `frame_duration`.
    pub fn frame_rate(&self) -> f64 {
        let secs = self.frame_duration.seconds();
        if secs > 0.0 { 1.0 / secs } else { 0.0 }
    }

    /// First instruction whose range contains `t`, falling back to the last instruction.
    pub fn instruction_at(&self, t: MediaTime) -> Option<&CompositionInstruction> {
        self.instructions
            .iter()
            .find(|i| i.time_range.contains(t))
            .or_else(|| self.instructions.last())
    }

    /// Transform applied to `track_id` at `t`; identity when no layer mentions the track.
    pub fn layer_transform(&self, track_id: u32, t: MediaTime) -> Affine {
        self.instruction_at(t)
            .and_then(|i| i.layers.iter().find(|l| l.track_id == track_id))
            .map(|l| l.transform)
            .unwrap_or(Affine::IDENTITY)
    }

    pub fn validate(&self) -> ExportResult<()> {
        if !(self.render_size.width > 0.0 && self.render_size.height > 0.0) {
            return Err(ExportError::validation(
                "composition render size must be non-zero",
            ));
        }
        if self.frame_duration.value <= 0 {
            return Err(ExportError::validation(
                "composition frame duration must be positive",
            ));
        }
        Ok(())
    }
}
