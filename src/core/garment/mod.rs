//! 服装候选检测
//!
//! 输入一批抽好的视频帧，输出去重、排序后的服装裁剪候选和一份运行汇总。

pub mod budget;
pub mod candidate;
pub mod config;
pub mod crop;
pub mod deduplicator;
pub mod embed;
pub mod error;
pub mod frame;
pub mod hash;
pub mod pipeline;
pub mod quality;
pub mod reason;
pub mod roi;
pub mod state_machine;
pub mod summary;
pub mod workers;

#[cfg(test)]
pub(crate) mod test_support;

pub use budget::{Clock, SystemClock, TimeBudget};
pub use candidate::{CandidateStatus, DetectedCandidate};
pub use config::{Config, ConfigBuilder, CONFIG_VERSION};
pub use deduplicator::{dedupe, DedupeResult};
pub use embed::{Embedder, GridEmbedder};
pub use error::{ConfigError, EncodeError, FrameError};
pub use frame::{FrameInput, FrameLoader, FrameSource, FsFrameLoader};
pub use pipeline::{DetectionOutput, DetectionRequest, GarmentDetector};
pub use reason::ReasonCode;
pub use roi::CropBox;
pub use summary::{RunCounts, RunSummary};
