pub mod engine;
pub mod spike;
pub mod stats;

pub use engine::{AnomalyEngine, DetectionHandle};
pub use spike::{SpikeDetector, SpikeError, SpikePoint};
pub use stats::{Summary, ZScoreDetector, z_threshold};
pub use tokio_util::sync::CancellationToken;
