//! 单次运行的汇总 - 每次运行恰好输出一条结构化日志

use super::candidate::{DetectedCandidate, SuppressedCandidate};
use super::reason::ReasonCode;
use super::state_machine::StageTimings;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

pub const SUMMARY_LOG_TARGET: &str = "garment_detect::summary";

/// 各阶段计数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub frames_seen: usize,
    /// 超出 max_frames_scored 未处理的帧
    pub frames_over_cap: usize,
    pub frames_decoded: usize,
    pub frames_failed_decode: usize,
    pub frames_scored: usize,
    pub frames_selected: usize,
    pub crops_generated: usize,
    pub crops_rejected_presence: usize,
    pub crops_failed_encode: usize,
    /// 超出 max_candidates_hard 未裁剪的帧
    pub crops_capped: usize,
    pub candidates_before_dedup: usize,
    pub deduped_phash: usize,
    pub deduped_embedding: usize,
    pub dedupe_unexamined: usize,
    pub candidates_returned: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub video_id: String,
    pub user_id: String,
    pub config_version: String,
    #[serde(flatten)]
    pub counts: RunCounts,
    pub selected_frame_timestamps: Vec<u64>,
    /// 是否尝试了兜底
    pub fallback_used: bool,
    /// 兜底候选是否被输出
    pub fallback_emitted: bool,
    pub early_exit_reason: Option<ReasonCode>,
    pub timings: StageTimings,
    pub reason_counts: BTreeMap<ReasonCode, u32>,
}

/// 运行日志收集器
///
/// 流水线各阶段向这里登记原因码与事件，结束时 `finalize` 生成汇总并输出一条 info 日志。
/// 逐候选的 debug 日志只在 `debug` 打开时输出。
pub struct RunLogger {
    video_id: String,
    user_id: String,
    debug: bool,
    reason_counts: BTreeMap<ReasonCode, u32>,
    selected: Vec<u64>,
    fallback_used: bool,
    fallback_emitted: bool,
    early_exit: Option<ReasonCode>,
}

impl RunLogger {
    pub fn new(video_id: &str, user_id: &str, debug: bool) -> Self {
        Self {
            video_id: video_id.to_string(),
            user_id: user_id.to_string(),
            debug,
            reason_counts: BTreeMap::new(),
            selected: Vec::new(),
            fallback_used: false,
            fallback_emitted: false,
            early_exit: None,
        }
    }

    pub fn record(&mut self, code: ReasonCode) {
        *self.reason_counts.entry(code).or_insert(0) += 1;
    }

    pub fn record_all(&mut self, codes: &[ReasonCode]) {
        for &code in codes {
            self.record(code);
        }
    }

    /// 登记提前退出；只保留第一次，非提前退出类的原因码被忽略
    pub fn note_early_exit(&mut self, code: ReasonCode) {
        if !code.is_early_exit() {
            warn!("⚠️ {} 不是提前退出原因，忽略", code);
            return;
        }
        if self.early_exit.is_none() {
            info!("⏱️ 提前结束: {} (video={})", code, self.video_id);
            self.early_exit = Some(code);
        }
    }

    pub fn early_exit(&self) -> Option<ReasonCode> {
        self.early_exit
    }

    pub fn select_frames(&mut self, timestamps: impl IntoIterator<Item = u64>) {
        self.selected = timestamps.into_iter().collect();
    }

    pub fn mark_fallback(&mut self, emitted: bool) {
        self.fallback_used = true;
        self.fallback_emitted = emitted;
    }

    pub fn log_candidate(&self, candidate: &DetectedCandidate) {
        if !self.debug {
            return;
        }
        debug!(
            "🧥 候选 #{} id={} ts={} box={} conf={:.3} phash={} reasons={:?}",
            candidate.rank,
            candidate.id,
            candidate.frame_timestamp_ms,
            candidate.crop_box,
            candidate.confidence,
            candidate.perceptual_hash,
            candidate.reason_codes
        );
    }

    pub fn log_suppressed(&self, suppressed: &SuppressedCandidate) {
        if !self.debug {
            return;
        }
        debug!(
            "🗑️ 丢弃 id={} ts={} reason={} dup_of={:?}",
            suppressed.candidate.id(),
            suppressed.candidate.raw.frame_timestamp_ms,
            suppressed.reason,
            suppressed.duplicate_of
        );
    }

    /// 生成汇总并输出唯一的一条汇总日志
    pub fn finalize(self, counts: RunCounts, timings: StageTimings, config_version: &str) -> RunSummary {
        let summary = RunSummary {
            video_id: self.video_id,
            user_id: self.user_id,
            config_version: config_version.to_string(),
            counts,
            selected_frame_timestamps: self.selected,
            fallback_used: self.fallback_used,
            fallback_emitted: self.fallback_emitted,
            early_exit_reason: self.early_exit,
            timings,
            reason_counts: self.reason_counts,
        };

        match serde_json::to_string(&summary) {
            Ok(json) => info!(target: SUMMARY_LOG_TARGET, "📊 {}", json),
            Err(e) => warn!(target: SUMMARY_LOG_TARGET, "❌ 汇总序列化失败: {}", e),
        }
        summary
    }
}
