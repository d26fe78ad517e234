use crate::core::garment::{DetectedCandidate, DetectionRequest, FrameInput, RunSummary};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 抽帧方给出的一帧：路径或内联字节，二选一（路径优先）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameDescriptor {
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Vec<u8>>,
}

impl FrameDescriptor {
    /// 两者都没有时给出空字节，由流水线按解码失败处理
    pub fn into_frame_input(self) -> FrameInput {
        match (self.path, self.bytes) {
            (Some(path), _) => FrameInput::from_path(self.timestamp_ms, PathBuf::from(path)),
            (None, Some(bytes)) => FrameInput::from_bytes(self.timestamp_ms, bytes),
            (None, None) => FrameInput::from_bytes(self.timestamp_ms, Vec::new()),
        }
    }
}

/// 任务队列投递的检测任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionJob {
    #[serde(rename = "videoId")]
    pub video_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub frames: Vec<FrameDescriptor>,
    #[serde(rename = "configOverrides", default, skip_serializing_if = "Option::is_none")]
    pub config_overrides: Option<serde_json::Value>,
    #[serde(default)]
    pub debug: bool,
    #[serde(rename = "timeBudgetMs", default, skip_serializing_if = "Option::is_none")]
    pub time_budget_ms: Option<u64>,
}

impl DetectionJob {
    pub fn into_request(self) -> DetectionRequest {
        let frames = self
            .frames
            .into_iter()
            .map(FrameDescriptor::into_frame_input)
            .collect();
        DetectionRequest {
            video_id: self.video_id,
            user_id: self.user_id,
            frames,
            overrides: self.config_overrides,
            debug: self.debug,
            time_budget_ms: self.time_budget_ms,
        }
    }
}

/// 检测结果（候选 + 汇总）
#[derive(Debug, Clone, Serialize)]
pub struct DetectionOutcome {
    pub candidates: Vec<DetectedCandidate>,
    pub summary: RunSummary,
}
