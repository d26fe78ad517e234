use serde::{Deserialize, Serialize};
use std::fmt;

/// 决策原因码 - 封闭词表，只追加不改名
///
/// 每个流水线决策至少附带一个原因码；`Ok` 表示没有任何问题。
/// 原因码只用于观测与排查，不参与控制流。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Ok,
    // 帧质量
    LowSharpness,
    TooDark,
    TooBright,
    Clipped,
    BusyBackground,
    NoRegionDetected,
    // ROI
    RoiMinSizeFloor,
    RoiClampedOrigin,
    RoiClampedSize,
    RoiRecentered,
    RoiFrameTooSmall,
    RoiRefined,
    // 解码 / 编码
    DecodeFailed,
    EncodeFailed,
    // 上限与提前退出
    FrameCapReached,
    CropCapReached,
    CandidateCap,
    TimeBudget,
    // 去重
    Unique,
    DuplicatePhash,
    DuplicateEmbedding,
    // 兜底
    FallbackCenterFrame,
    FallbackRejected,
}

impl ReasonCode {
    pub const ALL: [ReasonCode; 24] = [
        ReasonCode::Ok,
        ReasonCode::LowSharpness,
        ReasonCode::TooDark,
        ReasonCode::TooBright,
        ReasonCode::Clipped,
        ReasonCode::BusyBackground,
        ReasonCode::NoRegionDetected,
        ReasonCode::RoiMinSizeFloor,
        ReasonCode::RoiClampedOrigin,
        ReasonCode::RoiClampedSize,
        ReasonCode::RoiRecentered,
        ReasonCode::RoiFrameTooSmall,
        ReasonCode::RoiRefined,
        ReasonCode::DecodeFailed,
        ReasonCode::EncodeFailed,
        ReasonCode::FrameCapReached,
        ReasonCode::CropCapReached,
        ReasonCode::CandidateCap,
        ReasonCode::TimeBudget,
        ReasonCode::Unique,
        ReasonCode::DuplicatePhash,
        ReasonCode::DuplicateEmbedding,
        ReasonCode::FallbackCenterFrame,
        ReasonCode::FallbackRejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Ok => "OK",
            ReasonCode::LowSharpness => "LOW_SHARPNESS",
            ReasonCode::TooDark => "TOO_DARK",
            ReasonCode::TooBright => "TOO_BRIGHT",
            ReasonCode::Clipped => "CLIPPED",
            ReasonCode::BusyBackground => "BUSY_BACKGROUND",
            ReasonCode::NoRegionDetected => "NO_REGION_DETECTED",
            ReasonCode::RoiMinSizeFloor => "ROI_MIN_SIZE_FLOOR",
            ReasonCode::RoiClampedOrigin => "ROI_CLAMPED_ORIGIN",
            ReasonCode::RoiClampedSize => "ROI_CLAMPED_SIZE",
            ReasonCode::RoiRecentered => "ROI_RECENTERED",
            ReasonCode::RoiFrameTooSmall => "ROI_FRAME_TOO_SMALL",
            ReasonCode::RoiRefined => "ROI_REFINED",
            ReasonCode::DecodeFailed => "DECODE_FAILED",
            ReasonCode::EncodeFailed => "ENCODE_FAILED",
            ReasonCode::FrameCapReached => "FRAME_CAP_REACHED",
            ReasonCode::CropCapReached => "CROP_CAP_REACHED",
            ReasonCode::CandidateCap => "CANDIDATE_CAP",
            ReasonCode::TimeBudget => "TIME_BUDGET",
            ReasonCode::Unique => "UNIQUE",
            ReasonCode::DuplicatePhash => "DUPLICATE_PHASH",
            ReasonCode::DuplicateEmbedding => "DUPLICATE_EMBEDDING",
            ReasonCode::FallbackCenterFrame => "FALLBACK_CENTER_FRAME",
            ReasonCode::FallbackRejected => "FALLBACK_REJECTED",
        }
    }

    /// 是否为提前退出类原因（写入 summary.early_exit_reason）
    pub fn is_early_exit(&self) -> bool {
        matches!(self, ReasonCode::CandidateCap | ReasonCode::TimeBudget)
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
