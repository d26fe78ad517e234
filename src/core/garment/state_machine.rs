use super::budget::Clock;
use log::warn;
use serde::Serialize;
use std::sync::Arc;

/// 流水线阶段（只能向前推进，可以跳过）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
    Decode,
    Score,
    SelectTopK,
    CropEncode,
    HashEmbed,
    Dedupe,
    Fallback,
    Finalize,
    Summarize,
    Done,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Decode => "decode",
            PipelineStage::Score => "score",
            PipelineStage::SelectTopK => "select_top_k",
            PipelineStage::CropEncode => "crop_encode",
            PipelineStage::HashEmbed => "hash_embed",
            PipelineStage::Dedupe => "dedupe",
            PipelineStage::Fallback => "fallback",
            PipelineStage::Finalize => "finalize",
            PipelineStage::Summarize => "summarize",
            PipelineStage::Done => "done",
        }
    }

    pub fn can_transition(&self, to: PipelineStage) -> bool {
        to > *self
    }
}

/// 各阶段耗时（毫秒）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageTimings {
    pub decode_ms: u64,
    pub score_ms: u64,
    pub select_ms: u64,
    pub crop_encode_ms: u64,
    pub hash_embed_ms: u64,
    pub dedupe_ms: u64,
    pub fallback_ms: u64,
    pub finalize_ms: u64,
    pub total_ms: u64,
}

impl StageTimings {
    fn slot(&mut self, stage: PipelineStage) -> Option<&mut u64> {
        match stage {
            PipelineStage::Decode => Some(&mut self.decode_ms),
            PipelineStage::Score => Some(&mut self.score_ms),
            PipelineStage::SelectTopK => Some(&mut self.select_ms),
            PipelineStage::CropEncode => Some(&mut self.crop_encode_ms),
            PipelineStage::HashEmbed => Some(&mut self.hash_embed_ms),
            PipelineStage::Dedupe => Some(&mut self.dedupe_ms),
            PipelineStage::Fallback => Some(&mut self.fallback_ms),
            PipelineStage::Finalize => Some(&mut self.finalize_ms),
            PipelineStage::Summarize | PipelineStage::Done => None,
        }
    }
}

/// 阶段跟踪器：记录当前阶段并累计耗时
pub struct StageTracker {
    clock: Arc<dyn Clock>,
    stage: PipelineStage,
    started_ms: u64,
    entered_ms: u64,
    timings: StageTimings,
}

impl StageTracker {
    pub fn start(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            clock,
            stage: PipelineStage::Decode,
            started_ms: now,
            entered_ms: now,
            timings: StageTimings::default(),
        }
    }

    /// 进入指定阶段；非法（回退）转换被忽略并返回 false
    pub fn enter(&mut self, to: PipelineStage) -> bool {
        if !self.stage.can_transition(to) {
            warn!(
                "⚠️ 非法阶段转换: {} -> {}",
                self.stage.as_str(),
                to.as_str()
            );
            return false;
        }

        let now = self.clock.now_ms();
        let elapsed = now.saturating_sub(self.entered_ms);
        if let Some(slot) = self.timings.slot(self.stage) {
            *slot += elapsed;
        }
        self.stage = to;
        self.entered_ms = now;
        true
    }

    /// 结束跟踪，返回含总耗时的计时
    pub fn finish(mut self) -> StageTimings {
        if self.stage != PipelineStage::Done {
            self.enter(PipelineStage::Done);
        }
        self.timings.total_ms = self.clock.now_ms().saturating_sub(self.started_ms);
        self.timings
    }
}
