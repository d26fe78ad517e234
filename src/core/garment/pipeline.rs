//! 检测流水线 - 解码 → 评分 → 选帧 → 裁剪编码 → 指纹 → 去重 → 兜底 → 输出 → 汇总
//!
//! 业务上的降级（坏帧、超时、没有候选）都不会返回错误，
//! 唯一的错误路径是配置非法。

use super::budget::{Clock, SystemClock, TimeBudget};
use super::candidate::{DetectedCandidate, HashedCandidate, RawCandidate};
use super::config::Config;
use super::crop::crop_and_encode;
use super::deduplicator::dedupe;
use super::embed::{Embedder, GridEmbedder};
use super::error::ConfigError;
use super::frame::{decode, DecodedImage, FrameInput, FrameLoader, FsFrameLoader};
use super::quality::{presence_of_whole, rank_frames, score_frame, ScoredFrame};
use super::reason::ReasonCode;
use super::roi::{locate_roi, torso_roi};
use super::state_machine::{PipelineStage, StageTracker};
use super::summary::{RunCounts, RunLogger, RunSummary};
use super::workers;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// 一次检测请求
#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub video_id: String,
    pub user_id: String,
    /// 按时间顺序
    pub frames: Vec<FrameInput>,
    /// 本次请求的配置覆盖（深度合并到检测器配置上）
    pub overrides: Option<Value>,
    pub debug: bool,
    pub time_budget_ms: Option<u64>,
}

impl DetectionRequest {
    pub fn new(video_id: impl Into<String>, user_id: impl Into<String>, frames: Vec<FrameInput>) -> Self {
        Self {
            video_id: video_id.into(),
            user_id: user_id.into(),
            frames,
            overrides: None,
            debug: false,
            time_budget_ms: None,
        }
    }

    pub fn with_overrides(mut self, overrides: Value) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_time_budget_ms(mut self, ms: u64) -> Self {
        self.time_budget_ms = Some(ms);
        self
    }
}

/// 检测结果：候选（可能为空）+ 唯一的运行汇总
#[derive(Debug, Clone)]
pub struct DetectionOutput {
    pub candidates: Vec<DetectedCandidate>,
    pub summary: RunSummary,
}

/// 服装候选检测器
///
/// 帧加载、嵌入、时钟都是注入的能力；未注入嵌入时按配置使用 [`GridEmbedder`]。
pub struct GarmentDetector {
    config: Config,
    loader: Arc<dyn FrameLoader>,
    embedder: Option<Arc<dyn Embedder>>,
    clock: Arc<dyn Clock>,
}

impl GarmentDetector {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            loader: Arc::new(FsFrameLoader),
            embedder: None,
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn FrameLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 合并请求级覆盖项，得到本次运行的配置
    ///
    /// 每次运行都重新校验，检测器持有的配置即使被改过也不会带着非法值进入流水线。
    pub fn resolve_config(&self, request: &DetectionRequest) -> Result<Config, ConfigError> {
        let mut builder = self.config.derive();
        if let Some(overrides) = &request.overrides {
            builder = builder.overrides(overrides.clone());
        }
        if let Some(ms) = request.time_budget_ms {
            builder = builder.request_time_budget_ms(ms);
        }
        builder.build()
    }

    pub fn detect(&self, request: &DetectionRequest) -> Result<DetectionOutput, ConfigError> {
        let config = self.resolve_config(request)?;
        let embedder: Arc<dyn Embedder> = match &self.embedder {
            Some(embedder) => embedder.clone(),
            None => Arc::new(GridEmbedder::from_config(&config.embedding)),
        };

        let run = DetectionRun::new(
            &config,
            request,
            self.loader.as_ref(),
            embedder.as_ref(),
            self.clock.clone(),
        );
        Ok(run.execute())
    }
}

struct DecodedFrame {
    index: usize,
    timestamp_ms: u64,
    image: DecodedImage,
}

enum DecodeOutcome {
    Decoded(DecodedFrame),
    Failed,
    Skipped,
}

enum CropOutcome {
    Generated(RawCandidate),
    Rejected,
    Failed,
    Skipped,
}

/// 单次运行的状态（不跨请求共享）
struct DetectionRun<'a> {
    config: &'a Config,
    request: &'a DetectionRequest,
    loader: &'a dyn FrameLoader,
    embedder: &'a dyn Embedder,
    budget: TimeBudget,
    tracker: StageTracker,
    logger: RunLogger,
    counts: RunCounts,
}

impl<'a> DetectionRun<'a> {
    fn new(
        config: &'a Config,
        request: &'a DetectionRequest,
        loader: &'a dyn FrameLoader,
        embedder: &'a dyn Embedder,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let budget = TimeBudget::start(config.budget.time_budget_ms, clock.clone());
        let tracker = StageTracker::start(clock);
        let debug = request.debug || config.debug.log_candidates;
        Self {
            config,
            request,
            loader,
            embedder,
            budget,
            tracker,
            logger: RunLogger::new(&request.video_id, &request.user_id, debug),
            counts: RunCounts {
                frames_seen: request.frames.len(),
                ..Default::default()
            },
        }
    }

    fn should_exit(&self) -> bool {
        self.budget.should_exit(self.config.budget.min_remaining_ms)
    }

    fn execute(mut self) -> DetectionOutput {
        info!(
            "🎬 开始检测: video={} frames={} budget={}ms",
            self.request.video_id,
            self.request.frames.len(),
            self.budget.budget_ms()
        );

        let decoded = self.decode_stage();
        self.tracker.enter(PipelineStage::Score);
        let (scored, unscored) = self.score_stage(decoded);
        self.tracker.enter(PipelineStage::SelectTopK);
        let selected = self.select_stage(scored);
        self.tracker.enter(PipelineStage::CropEncode);
        let raws = self.crop_stage(&selected);
        self.tracker.enter(PipelineStage::HashEmbed);
        let hashed = self.hash_stage(raws);
        self.tracker.enter(PipelineStage::Dedupe);
        let mut finals = self.dedupe_stage(hashed);

        if finals.is_empty() && self.counts.frames_seen > 0 {
            self.tracker.enter(PipelineStage::Fallback);
            finals.extend(self.fallback_stage(selected.first(), unscored.first()));
        }

        self.tracker.enter(PipelineStage::Finalize);
        let candidates = self.finalize_stage(finals);

        self.tracker.enter(PipelineStage::Summarize);
        self.counts.candidates_returned = candidates.len();
        let timings = self.tracker.finish();
        let summary = self
            .logger
            .finalize(self.counts, timings, &self.config.version);

        DetectionOutput {
            candidates,
            summary,
        }
    }

    /// 解码：超过 max_frames_scored 的帧不处理，坏帧跳过
    fn decode_stage(&mut self) -> Vec<DecodedFrame> {
        let request = self.request;
        let frames = &request.frames;
        let cap = self.config.frames.max_frames_scored;
        if frames.len() > cap {
            self.counts.frames_over_cap = frames.len() - cap;
            self.logger.record(ReasonCode::FrameCapReached);
            info!(
                "✂️ 帧数 {} 超过上限 {}，多余 {} 帧不处理",
                frames.len(),
                cap,
                frames.len() - cap
            );
        }

        let max_width = self.config.frames.max_working_width;
        let loader = self.loader;
        let this = &*self;
        let outcomes: Vec<DecodeOutcome> = workers::install(|| {
            frames
                .par_iter()
                .take(cap)
                .enumerate()
                .map(|(index, frame)| {
                    if this.should_exit() {
                        return DecodeOutcome::Skipped;
                    }
                    let result = loader
                        .load(&frame.source)
                        .and_then(|bytes| decode(&bytes, max_width));
                    match result {
                        Ok(image) => DecodeOutcome::Decoded(DecodedFrame {
                            index,
                            timestamp_ms: frame.timestamp_ms,
                            image,
                        }),
                        Err(e) => {
                            warn!("⚠️ 帧解码失败 ts={}: {}", frame.timestamp_ms, e);
                            DecodeOutcome::Failed
                        }
                    }
                })
                .collect()
        });

        let mut decoded = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                DecodeOutcome::Decoded(frame) => decoded.push(frame),
                DecodeOutcome::Failed => {
                    self.counts.frames_failed_decode += 1;
                    self.logger.record(ReasonCode::DecodeFailed);
                }
                DecodeOutcome::Skipped => {
                    self.logger.record(ReasonCode::TimeBudget);
                    self.logger.note_early_exit(ReasonCode::TimeBudget);
                }
            }
        }
        self.counts.frames_decoded = decoded.len();
        debug!(
            "🖼️ 解码完成: {} 成功, {} 失败",
            decoded.len(),
            self.counts.frames_failed_decode
        );
        decoded
    }

    /// 评分；预算耗尽后未评分的帧原样返回（供兜底使用）
    fn score_stage(&mut self, decoded: Vec<DecodedFrame>) -> (Vec<ScoredFrame>, Vec<DecodedFrame>) {
        let config = self.config;
        let this = &*self;
        let outcomes: Vec<Result<ScoredFrame, DecodedFrame>> = workers::install(|| {
            decoded
                .into_par_iter()
                .map(|frame| {
                    if this.should_exit() {
                        return Err(frame);
                    }
                    let roi = locate_roi(&frame.image, config);
                    let score = score_frame(&frame.image, &roi.crop_box, config);
                    Ok(ScoredFrame {
                        index: frame.index,
                        timestamp_ms: frame.timestamp_ms,
                        image: frame.image,
                        roi,
                        score,
                    })
                })
                .collect()
        });

        let mut scored = Vec::with_capacity(outcomes.len());
        let mut unscored = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(frame) => {
                    self.logger.record_all(&frame.score.reasons);
                    self.logger.record_all(&frame.roi.reasons);
                    scored.push(frame);
                }
                Err(frame) => {
                    self.logger.record(ReasonCode::TimeBudget);
                    self.logger.note_early_exit(ReasonCode::TimeBudget);
                    unscored.push(frame);
                }
            }
        }
        self.counts.frames_scored = scored.len();
        (scored, unscored)
    }

    /// 按综合分取前 K 帧
    fn select_stage(&mut self, mut scored: Vec<ScoredFrame>) -> Vec<ScoredFrame> {
        rank_frames(&mut scored);
        scored.truncate(self.config.frames.top_k_frames);

        self.counts.frames_selected = scored.len();
        self.logger
            .select_frames(scored.iter().map(|f| f.timestamp_ms));
        debug!(
            "🎯 选中 {} 帧: {:?}",
            scored.len(),
            scored.iter().map(|f| f.timestamp_ms).collect::<Vec<_>>()
        );
        scored
    }

    /// 裁剪 + 编码 + 存在性检查；裁剪数不超过 max_candidates_hard
    fn crop_stage(&mut self, selected: &[ScoredFrame]) -> Vec<RawCandidate> {
        let hard_cap = self.config.candidates.max_candidates_hard;
        if selected.len() > hard_cap {
            self.counts.crops_capped = selected.len() - hard_cap;
            self.logger.record(ReasonCode::CropCapReached);
        }

        let config = self.config;
        let quality = config.encoding.jpeg_quality;
        let this = &*self;
        let outcomes: Vec<CropOutcome> = workers::install(|| {
            selected
                .par_iter()
                .take(hard_cap)
                .enumerate()
                .map(|(ordinal, frame)| {
                    if this.should_exit() {
                        return CropOutcome::Skipped;
                    }
                    let encoded = match crop_and_encode(&frame.image, &frame.roi.crop_box, quality) {
                        Ok(encoded) => encoded,
                        Err(e) => {
                            warn!("⚠️ 裁剪编码失败 ts={}: {}", frame.timestamp_ms, e);
                            return CropOutcome::Failed;
                        }
                    };
                    let presence = presence_of_whole(&encoded.gray, encoded.width, encoded.height, config);
                    if !presence.passes {
                        return CropOutcome::Rejected;
                    }
                    CropOutcome::Generated(RawCandidate {
                        id: Uuid::new_v4().to_string(),
                        ordinal,
                        frame_timestamp_ms: frame.timestamp_ms,
                        crop_box: frame.roi.crop_box,
                        score: frame.score.composite,
                        bytes: encoded.bytes,
                        width: encoded.width,
                        height: encoded.height,
                        gray: encoded.gray,
                        frame_reasons: frame.score.reasons.clone(),
                        roi_reasons: frame.roi.reasons.clone(),
                        fallback: false,
                    })
                })
                .collect()
        });

        let mut raws = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                CropOutcome::Generated(raw) => raws.push(raw),
                CropOutcome::Rejected => {
                    self.counts.crops_rejected_presence += 1;
                    self.logger.record(ReasonCode::NoRegionDetected);
                }
                CropOutcome::Failed => {
                    self.counts.crops_failed_encode += 1;
                    self.logger.record(ReasonCode::EncodeFailed);
                }
                CropOutcome::Skipped => {
                    self.logger.record(ReasonCode::TimeBudget);
                    self.logger.note_early_exit(ReasonCode::TimeBudget);
                }
            }
        }
        self.counts.crops_generated = raws.len();
        raws
    }

    fn hash_stage(&mut self, raws: Vec<RawCandidate>) -> Vec<HashedCandidate> {
        if raws.is_empty() {
            return Vec::new();
        }
        if self.should_exit() {
            for _ in &raws {
                self.logger.record(ReasonCode::TimeBudget);
            }
            self.logger.note_early_exit(ReasonCode::TimeBudget);
            return Vec::new();
        }

        let hashed: Vec<HashedCandidate> =
            workers::install(|| raws.into_par_iter().map(HashedCandidate::from_raw).collect());
        self.counts.candidates_before_dedup = hashed.len();
        hashed
    }

    fn dedupe_stage(&mut self, hashed: Vec<HashedCandidate>) -> Vec<HashedCandidate> {
        if hashed.is_empty() {
            return Vec::new();
        }

        let result = dedupe(hashed, self.config, Some(self.embedder), Some(&self.budget));
        self.counts.deduped_phash = result.counts.deduped_phash;
        self.counts.deduped_embedding = result.counts.deduped_embedding;
        self.counts.dedupe_unexamined = result.counts.unexamined;

        for suppressed in &result.suppressed {
            self.logger.record(suppressed.reason);
            self.logger.log_suppressed(suppressed);
        }
        if let Some(reason) = result.early_exit_reason {
            self.logger.note_early_exit(reason);
        }
        debug!(
            "🔁 去重: 输入 {} 保留 {} (phash {}, embedding {})",
            result.counts.input,
            result.counts.kept,
            result.counts.deduped_phash,
            result.counts.deduped_embedding
        );
        result.kept
    }

    /// 兜底：即使预算耗尽也会执行，保证至少尝试一次
    fn fallback_stage(
        &mut self,
        best: Option<&ScoredFrame>,
        first_unscored: Option<&DecodedFrame>,
    ) -> Option<HashedCandidate> {
        let config = self.config;
        let source = match (best, first_unscored) {
            (Some(frame), _) => Some((
                frame.timestamp_ms,
                &frame.image,
                frame.score.composite,
                frame.score.reasons.clone(),
            )),
            (None, Some(frame)) => {
                let roi = torso_roi(frame.image.width, frame.image.height, config);
                let score = score_frame(&frame.image, &roi.crop_box, config);
                Some((frame.timestamp_ms, &frame.image, score.composite, score.reasons))
            }
            (None, None) => None,
        };

        let Some((timestamp_ms, image, score, frame_reasons)) = source else {
            info!("🚫 兜底放弃: 没有可用的解码帧");
            return self.reject_fallback(None);
        };

        let roi = torso_roi(image.width, image.height, config);
        let encoded = match crop_and_encode(image, &roi.crop_box, config.encoding.jpeg_quality) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("⚠️ 兜底裁剪编码失败 ts={}: {}", timestamp_ms, e);
                self.counts.crops_failed_encode += 1;
                return self.reject_fallback(Some(ReasonCode::EncodeFailed));
            }
        };

        let presence = presence_of_whole(&encoded.gray, encoded.width, encoded.height, config);
        if !presence.passes {
            info!(
                "🚫 兜底放弃: ts={} 未检测到前景 (diff={:.3}, edge={:.3}, var={:.1})",
                timestamp_ms, presence.diff_ratio, presence.edge_density, presence.variance
            );
            self.counts.crops_rejected_presence += 1;
            return self.reject_fallback(Some(ReasonCode::NoRegionDetected));
        }

        self.logger.record(ReasonCode::FallbackCenterFrame);
        self.logger.mark_fallback(true);
        info!("🛟 使用兜底帧 ts={}", timestamp_ms);

        let raw = RawCandidate {
            id: Uuid::new_v4().to_string(),
            ordinal: 0,
            frame_timestamp_ms: timestamp_ms,
            crop_box: roi.crop_box,
            score: score.min(config.candidates.fallback_confidence_cap),
            bytes: encoded.bytes,
            width: encoded.width,
            height: encoded.height,
            gray: encoded.gray,
            frame_reasons,
            roi_reasons: roi.reasons,
            fallback: true,
        };
        Some(HashedCandidate::from_raw(raw))
    }

    fn reject_fallback(&mut self, cause: Option<ReasonCode>) -> Option<HashedCandidate> {
        if let Some(cause) = cause {
            self.logger.record(cause);
        }
        self.logger.record(ReasonCode::FallbackRejected);
        self.logger.mark_fallback(false);
        None
    }

    fn finalize_stage(&mut self, finals: Vec<HashedCandidate>) -> Vec<DetectedCandidate> {
        let model = self.embedder.model().to_string();
        let mut out = Vec::with_capacity(finals.len());

        for (rank, mut candidate) in finals.into_iter().enumerate() {
            candidate.ensure_embedding(self.embedder);
            // 兜底候选的结论码已在兜底阶段登记
            let decision = if candidate.raw.fallback {
                ReasonCode::FallbackCenterFrame
            } else {
                self.logger.record(ReasonCode::Unique);
                ReasonCode::Unique
            };
            let confidence = candidate.score();
            let detected = DetectedCandidate::finalize(
                candidate,
                &self.request.video_id,
                &self.request.user_id,
                rank + 1,
                confidence,
                decision,
                &model,
            );
            self.logger.log_candidate(&detected);
            out.push(detected);
        }
        out
    }
}
