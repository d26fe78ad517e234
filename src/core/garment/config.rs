//! 检测配置 - 构建一次，经校验后不可变
//!
//! 所有阈值与上限都在这里；流水线各阶段只读取传入的 `Config`，
//! 不读取环境变量或全局状态。

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CONFIG_VERSION: &str = "garment-detect/1";

pub const TIME_BUDGET_CEILING_MS: u64 = 60_000;
pub const MAX_FRAMES_SCORED_CEILING: usize = 240;
pub const TOP_K_CEILING: usize = 64;
pub const MAX_CANDIDATES_HARD_CEILING: usize = 64;
pub const WORKING_WIDTH_RANGE: (u32, u32) = (64, 4096);
pub const MIN_CROP_DIM_RANGE: (u32, u32) = (8, 1024);
pub const EMBEDDING_GRID_RANGE: (u32, u32) = (4, 64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    /// 单次运行的总时间预算（毫秒）
    pub time_budget_ms: u64,
    /// 剩余时间低于该值即停止新工作，留给汇总与返回
    pub min_remaining_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: 2_000,
            min_remaining_ms: 150,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameConfig {
    pub max_frames_scored: usize,
    pub top_k_frames: usize,
    pub max_working_width: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frames_scored: 48,
            top_k_frames: 12,
            max_working_width: 640,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CandidateConfig {
    /// 去重后最多保留的候选数
    pub max_candidates: usize,
    /// 去重前裁剪数量的安全阀
    pub max_candidates_hard: usize,
    pub min_crop_dim: u32,
    /// 兜底候选的置信度上限
    pub fallback_confidence_cap: f64,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            max_candidates: 8,
            max_candidates_hard: 24,
            min_crop_dim: 64,
            fallback_confidence_cap: 0.35,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoreWeights {
    pub sharpness: f64,
    pub exposure: f64,
    pub background: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            sharpness: 0.45,
            exposure: 0.30,
            background: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualityConfig {
    /// 拉普拉斯方差低于该值视为模糊
    pub sharpness_min_var: f64,
    /// 模糊帧的清晰度贡献乘数
    pub low_sharpness_factor: f64,
    pub exposure_mean_min: f64,
    pub exposure_mean_max: f64,
    /// 近黑/近白像素占比上限
    pub clip_ratio_max: f64,
    pub clip_low_level: u8,
    pub clip_high_level: u8,
    pub exposure_damp: f64,
    pub clip_damp: f64,
    /// |gx|+|gy| 超过该值计为边缘
    pub edge_threshold: u32,
    pub background_stride: usize,
    /// ROI 外边缘密度超过该值标记 BUSY_BACKGROUND
    pub busy_background_density: f64,
    pub weights: ScoreWeights,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            sharpness_min_var: 60.0,
            low_sharpness_factor: 0.35,
            exposure_mean_min: 40.0,
            exposure_mean_max: 215.0,
            clip_ratio_max: 0.25,
            clip_low_level: 8,
            clip_high_level: 247,
            exposure_damp: 0.5,
            clip_damp: 0.6,
            edge_threshold: 40,
            background_stride: 2,
            busy_background_density: 0.25,
            weights: ScoreWeights::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PresenceConfig {
    /// 与边框均值的亮度差超过该值的像素算作前景
    pub delta: u8,
    pub min_diff_ratio: f64,
    pub min_edge_density: f64,
    pub min_variance: f64,
    /// 边框带宽度（占区域宽高的比例）
    pub border_band: f64,
    pub pass_factor: f64,
    pub fail_factor: f64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            delta: 24,
            min_diff_ratio: 0.08,
            min_edge_density: 0.02,
            min_variance: 60.0,
            border_band: 0.12,
            pass_factor: 1.0,
            fail_factor: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoiConfig {
    pub x_pct: f64,
    pub y_pct: f64,
    pub w_pct: f64,
    pub h_pct: f64,
    /// 向下偏移（占帧高比例），躯干通常略低于画面中心
    pub down_bias_pct: f64,
    /// 收缩到 ROI 内前景像素的包围盒
    pub refine_to_foreground: bool,
    pub refine_padding_pct: f64,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            x_pct: 0.18,
            y_pct: 0.18,
            w_pct: 0.64,
            h_pct: 0.70,
            down_bias_pct: 0.04,
            refine_to_foreground: false,
            refine_padding_pct: 0.08,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DedupeConfig {
    pub phash_hamming_threshold: u32,
    pub embedding_cosine_threshold: f64,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            phash_hamming_threshold: 6,
            embedding_cosine_threshold: 0.97,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    pub grid_w: u32,
    pub grid_h: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            grid_w: 16,
            grid_h: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncodingConfig {
    pub jpeg_quality: u8,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self { jpeg_quality: 85 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebugConfig {
    /// 逐候选输出 debug 日志（不替代汇总日志）
    pub log_candidates: bool,
}

/// 经过校验的完整配置
///
/// 只能通过 [`ConfigBuilder`] 构建；外部无法直接构造或反序列化。
/// 各节字段公开只读使用；克隆后改动的副本不再视为已校验，
/// [`GarmentDetector`](super::pipeline::GarmentDetector) 每次运行前都会重新校验。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub version: String,
    pub budget: BudgetConfig,
    pub frames: FrameConfig,
    pub candidates: CandidateConfig,
    pub quality: QualityConfig,
    pub presence: PresenceConfig,
    pub roi: RoiConfig,
    pub dedupe: DedupeConfig,
    pub embedding: EmbeddingConfig,
    pub encoding: EncodingConfig,
    pub debug: DebugConfig,
    #[serde(skip)]
    sealed: Sealed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Sealed;

/// 反序列化用的镜像结构，合并覆盖项后转换为 `Config`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigDoc {
    version: String,
    budget: BudgetConfig,
    frames: FrameConfig,
    candidates: CandidateConfig,
    quality: QualityConfig,
    presence: PresenceConfig,
    roi: RoiConfig,
    dedupe: DedupeConfig,
    embedding: EmbeddingConfig,
    encoding: EncodingConfig,
    debug: DebugConfig,
}

impl ConfigDoc {
    fn defaults() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            ..Default::default()
        }
    }

    fn into_config(self) -> Config {
        Config {
            version: self.version,
            budget: self.budget,
            frames: self.frames,
            candidates: self.candidates,
            quality: self.quality,
            presence: self.presence,
            roi: self.roi,
            dedupe: self.dedupe,
            embedding: self.embedding,
            encoding: self.encoding,
            debug: self.debug,
            sealed: Sealed,
        }
    }

    fn from_config(config: &Config) -> Self {
        Self {
            version: config.version.clone(),
            budget: config.budget.clone(),
            frames: config.frames.clone(),
            candidates: config.candidates.clone(),
            quality: config.quality.clone(),
            presence: config.presence.clone(),
            roi: config.roi.clone(),
            dedupe: config.dedupe.clone(),
            embedding: config.embedding.clone(),
            encoding: config.encoding.clone(),
            debug: config.debug.clone(),
        }
    }
}

impl Default for Config {
    /// 文档化的默认值（由测试保证可通过校验）
    fn default() -> Self {
        ConfigDoc::defaults().into_config()
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// 将 JSON 覆盖项深度合并到默认值上并校验
    pub fn build(overrides: Option<Value>) -> Result<Config, ConfigError> {
        let mut builder = ConfigBuilder::new();
        if let Some(overrides) = overrides {
            builder = builder.overrides(overrides);
        }
        builder.build()
    }

    /// 以当前配置为基础派生新配置（用于单次请求的覆盖）
    pub fn derive(&self) -> ConfigBuilder {
        ConfigBuilder::from_config(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::invalid(
                "version",
                format!("unsupported version {:?}, expected {:?}", self.version, CONFIG_VERSION),
            ));
        }

        let b = &self.budget;
        range_u64("budget.time_budget_ms", b.time_budget_ms, 1, TIME_BUDGET_CEILING_MS)?;
        check(
            b.min_remaining_ms < b.time_budget_ms,
            "budget.min_remaining_ms",
            || format!("must be below time_budget_ms ({})", b.time_budget_ms),
        )?;

        let f = &self.frames;
        range_u64(
            "frames.max_frames_scored",
            f.max_frames_scored as u64,
            1,
            MAX_FRAMES_SCORED_CEILING as u64,
        )?;
        range_u64("frames.top_k_frames", f.top_k_frames as u64, 1, TOP_K_CEILING as u64)?;
        range_u64(
            "frames.max_working_width",
            f.max_working_width as u64,
            WORKING_WIDTH_RANGE.0 as u64,
            WORKING_WIDTH_RANGE.1 as u64,
        )?;

        let c = &self.candidates;
        range_u64(
            "candidates.max_candidates_hard",
            c.max_candidates_hard as u64,
            1,
            MAX_CANDIDATES_HARD_CEILING as u64,
        )?;
        range_u64(
            "candidates.max_candidates",
            c.max_candidates as u64,
            1,
            c.max_candidates_hard as u64,
        )?;
        range_u64(
            "candidates.min_crop_dim",
            c.min_crop_dim as u64,
            MIN_CROP_DIM_RANGE.0 as u64,
            MIN_CROP_DIM_RANGE.1 as u64,
        )?;
        range_open_low("candidates.fallback_confidence_cap", c.fallback_confidence_cap, 0.0, 1.0)?;

        let q = &self.quality;
        check(
            q.sharpness_min_var.is_finite() && q.sharpness_min_var > 0.0,
            "quality.sharpness_min_var",
            || "must be a positive finite number".to_string(),
        )?;
        range_open_low("quality.low_sharpness_factor", q.low_sharpness_factor, 0.0, 1.0)?;
        range_f64("quality.exposure_mean_min", q.exposure_mean_min, 0.0, 255.0)?;
        range_f64("quality.exposure_mean_max", q.exposure_mean_max, 0.0, 255.0)?;
        check(
            q.exposure_mean_min < q.exposure_mean_max,
            "quality.exposure_mean_min",
            || "must be below exposure_mean_max".to_string(),
        )?;
        range_open_low("quality.clip_ratio_max", q.clip_ratio_max, 0.0, 1.0)?;
        check(
            q.clip_low_level < q.clip_high_level,
            "quality.clip_low_level",
            || "must be below clip_high_level".to_string(),
        )?;
        range_open_low("quality.exposure_damp", q.exposure_damp, 0.0, 1.0)?;
        range_open_low("quality.clip_damp", q.clip_damp, 0.0, 1.0)?;
        range_u64("quality.edge_threshold", q.edge_threshold as u64, 1, 1020)?;
        range_u64("quality.background_stride", q.background_stride as u64, 1, 16)?;
        range_f64("quality.busy_background_density", q.busy_background_density, 0.0, 1.0)?;
        let w = &q.weights;
        range_f64("quality.weights.sharpness", w.sharpness, 0.0, 1.0)?;
        range_f64("quality.weights.exposure", w.exposure, 0.0, 1.0)?;
        range_f64("quality.weights.background", w.background, 0.0, 1.0)?;
        check(
            w.sharpness + w.exposure + w.background > 0.0,
            "quality.weights",
            || "weights must not all be zero".to_string(),
        )?;

        let p = &self.presence;
        range_u64("presence.delta", p.delta as u64, 1, 254)?;
        range_f64("presence.min_diff_ratio", p.min_diff_ratio, 0.0, 1.0)?;
        range_f64("presence.min_edge_density", p.min_edge_density, 0.0, 1.0)?;
        check(
            p.min_variance.is_finite() && p.min_variance >= 0.0,
            "presence.min_variance",
            || "must be a non-negative finite number".to_string(),
        )?;
        range_open_low("presence.border_band", p.border_band, 0.0, 0.45)?;
        range_open_low("presence.pass_factor", p.pass_factor, 0.0, 1.0)?;
        range_open_low("presence.fail_factor", p.fail_factor, 0.0, 1.0)?;
        check(
            p.fail_factor <= p.pass_factor,
            "presence.fail_factor",
            || "must not exceed pass_factor".to_string(),
        )?;

        let r = &self.roi;
        range_f64("roi.x_pct", r.x_pct, 0.0, 1.0)?;
        range_f64("roi.y_pct", r.y_pct, 0.0, 1.0)?;
        range_open_low("roi.w_pct", r.w_pct, 0.0, 1.0)?;
        range_open_low("roi.h_pct", r.h_pct, 0.0, 1.0)?;
        range_f64("roi.down_bias_pct", r.down_bias_pct, -0.2, 0.2)?;
        check(r.x_pct + r.w_pct <= 1.0 + 1e-9, "roi.w_pct", || {
            format!("x_pct + w_pct = {:.3} exceeds the frame", r.x_pct + r.w_pct)
        })?;
        let top = r.y_pct + r.down_bias_pct;
        check(top >= -1e-9, "roi.down_bias_pct", || {
            format!("y_pct + down_bias_pct = {:.3} is above the frame", top)
        })?;
        check(top + r.h_pct <= 1.0 + 1e-9, "roi.h_pct", || {
            format!("y_pct + down_bias_pct + h_pct = {:.3} exceeds the frame", top + r.h_pct)
        })?;
        range_f64("roi.refine_padding_pct", r.refine_padding_pct, 0.0, 0.5)?;

        let d = &self.dedupe;
        range_u64("dedupe.phash_hamming_threshold", d.phash_hamming_threshold as u64, 0, 64)?;
        range_open_low(
            "dedupe.embedding_cosine_threshold",
            d.embedding_cosine_threshold,
            0.0,
            1.0,
        )?;

        let e = &self.embedding;
        range_u64(
            "embedding.grid_w",
            e.grid_w as u64,
            EMBEDDING_GRID_RANGE.0 as u64,
            EMBEDDING_GRID_RANGE.1 as u64,
        )?;
        range_u64(
            "embedding.grid_h",
            e.grid_h as u64,
            EMBEDDING_GRID_RANGE.0 as u64,
            EMBEDDING_GRID_RANGE.1 as u64,
        )?;

        range_u64("encoding.jpeg_quality", self.encoding.jpeg_quality as u64, 1, 100)?;

        Ok(())
    }
}

/// 配置构建器：默认值 + 若干层 JSON 覆盖 → 校验 → `Config`
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    base: Option<Config>,
    layers: Vec<Value>,
    request_budget_ms: Option<u64>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            base: None,
            layers: Vec::new(),
            request_budget_ms: None,
        }
    }

    pub fn from_config(base: &Config) -> Self {
        Self {
            base: Some(base.clone()),
            layers: Vec::new(),
            request_budget_ms: None,
        }
    }

    /// 追加一层覆盖（后追加的优先）
    pub fn overrides(mut self, overrides: Value) -> Self {
        self.layers.push(overrides);
        self
    }

    fn set(self, section: &str, key: &str, value: Value) -> Self {
        let mut inner = Map::new();
        inner.insert(key.to_string(), value);
        let mut outer = Map::new();
        outer.insert(section.to_string(), Value::Object(inner));
        self.overrides(Value::Object(outer))
    }

    pub fn time_budget_ms(self, ms: u64) -> Self {
        self.set("budget", "time_budget_ms", Value::from(ms))
    }

    /// 调用方给出的单次预算：在所有覆盖层之后生效，
    /// 安全余量随之收紧到预算的一半以内
    pub fn request_time_budget_ms(mut self, ms: u64) -> Self {
        self.request_budget_ms = Some(ms);
        self
    }

    pub fn min_remaining_ms(self, ms: u64) -> Self {
        self.set("budget", "min_remaining_ms", Value::from(ms))
    }

    pub fn max_frames_scored(self, n: usize) -> Self {
        self.set("frames", "max_frames_scored", Value::from(n))
    }

    pub fn top_k_frames(self, n: usize) -> Self {
        self.set("frames", "top_k_frames", Value::from(n))
    }

    pub fn max_working_width(self, width: u32) -> Self {
        self.set("frames", "max_working_width", Value::from(width))
    }

    pub fn max_candidates(self, n: usize) -> Self {
        self.set("candidates", "max_candidates", Value::from(n))
    }

    pub fn max_candidates_hard(self, n: usize) -> Self {
        self.set("candidates", "max_candidates_hard", Value::from(n))
    }

    pub fn min_crop_dim(self, dim: u32) -> Self {
        self.set("candidates", "min_crop_dim", Value::from(dim))
    }

    pub fn phash_hamming_threshold(self, bits: u32) -> Self {
        self.set("dedupe", "phash_hamming_threshold", Value::from(bits))
    }

    pub fn embedding_cosine_threshold(self, threshold: f64) -> Self {
        self.set("dedupe", "embedding_cosine_threshold", Value::from(threshold))
    }

    pub fn embedding_grid(self, grid_w: u32, grid_h: u32) -> Self {
        self.set("embedding", "grid_w", Value::from(grid_w))
            .set("embedding", "grid_h", Value::from(grid_h))
    }

    pub fn jpeg_quality(self, quality: u8) -> Self {
        self.set("encoding", "jpeg_quality", Value::from(quality))
    }

    pub fn refine_to_foreground(self, enabled: bool) -> Self {
        self.set("roi", "refine_to_foreground", Value::from(enabled))
    }

    pub fn log_candidates(self, enabled: bool) -> Self {
        self.set("debug", "log_candidates", Value::from(enabled))
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let doc = match &self.base {
            Some(base) => ConfigDoc::from_config(base),
            None => ConfigDoc::defaults(),
        };
        let mut merged = serde_json::to_value(doc)?;
        let request_budget_ms = self.request_budget_ms;

        for layer in self.layers {
            if !layer.is_object() {
                return Err(ConfigError::OverridesNotObject(json_kind(&layer).to_string()));
            }
            deep_merge(&mut merged, layer);
        }

        let mut doc: ConfigDoc = serde_json::from_value(merged)?;
        if let Some(ms) = request_budget_ms {
            doc.budget.time_budget_ms = ms;
            doc.budget.min_remaining_ms = doc.budget.min_remaining_ms.min(ms / 2);
        }
        let config = doc.into_config();
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 对象递归合并，其余类型直接替换
fn deep_merge(target: &mut Value, overlay: Value) {
    match (target, overlay) {
        (Value::Object(target_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match target_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check(cond: bool, field: &str, reason: impl FnOnce() -> String) -> Result<(), ConfigError> {
    if cond {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, reason()))
    }
}

fn range_u64(field: &str, value: u64, lo: u64, hi: u64) -> Result<(), ConfigError> {
    check(value >= lo && value <= hi, field, || {
        format!("{} is outside [{}, {}]", value, lo, hi)
    })
}

fn range_f64(field: &str, value: f64, lo: f64, hi: f64) -> Result<(), ConfigError> {
    check(value.is_finite() && value >= lo && value <= hi, field, || {
        format!("{} is outside [{}, {}]", value, lo, hi)
    })
}

/// (lo, hi] 区间
fn range_open_low(field: &str, value: f64, lo: f64, hi: f64) -> Result<(), ConfigError> {
    check(value.is_finite() && value > lo && value <= hi, field, || {
        format!("{} is outside ({}, {}]", value, lo, hi)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_validate() {
        let config = Config::build(None).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.candidates.max_candidates, 8);
        assert_eq!(config.roi.x_pct, 0.18);
    }

    #[test]
    fn test_deep_merge_keeps_siblings() {
        let config = Config::build(Some(json!({
            "dedupe": { "phash_hamming_threshold": 4 },
            "quality": { "weights": { "background": 0.5 } }
        })))
        .unwrap();

        assert_eq!(config.dedupe.phash_hamming_threshold, 4);
        assert_eq!(config.dedupe.embedding_cosine_threshold, 0.97);
        assert_eq!(config.quality.weights.background, 0.5);
        assert_eq!(config.quality.weights.sharpness, 0.45);
    }

    #[test]
    fn test_later_layers_win() {
        let config = Config::builder()
            .max_candidates(3)
            .overrides(json!({ "candidates": { "max_candidates": 5 } }))
            .build()
            .unwrap();
        assert_eq!(config.candidates.max_candidates, 5);
    }

    #[test]
    fn test_invalid_field_is_named() {
        let err = Config::builder().time_budget_ms(0).build().unwrap_err();
        assert_eq!(err.field(), Some("budget.time_budget_ms"));

        let err = Config::builder()
            .max_candidates_hard(4)
            .max_candidates(5)
            .build()
            .unwrap_err();
        assert_eq!(err.field(), Some("candidates.max_candidates"));

        let err = Config::builder().jpeg_quality(0).build().unwrap_err();
        assert_eq!(err.field(), Some("encoding.jpeg_quality"));

        let err = Config::builder()
            .embedding_cosine_threshold(1.5)
            .build()
            .unwrap_err();
        assert_eq!(err.field(), Some("dedupe.embedding_cosine_threshold"));
    }

    #[test]
    fn test_roi_must_stay_inside_frame() {
        let err = Config::build(Some(json!({ "roi": { "x_pct": 0.5, "w_pct": 0.6 } }))).unwrap_err();
        assert_eq!(err.field(), Some("roi.w_pct"));

        let err = Config::build(Some(json!({ "roi": { "y_pct": 0.2, "h_pct": 0.8 } }))).unwrap_err();
        assert_eq!(err.field(), Some("roi.h_pct"));

        let err = Config::build(Some(json!({ "roi": { "x_pct": -0.1 } }))).unwrap_err();
        assert_eq!(err.field(), Some("roi.x_pct"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = Config::build(Some(json!({ "dedupe": { "hamming": 3 } }))).unwrap_err();
        assert!(matches!(err, ConfigError::Overrides(_)));

        let err = Config::build(Some(json!([1, 2]))).unwrap_err();
        assert!(matches!(err, ConfigError::OverridesNotObject(_)));
    }

    #[test]
    fn test_derive_from_existing_config() {
        let base = Config::builder().max_candidates(3).build().unwrap();
        let derived = base.derive().time_budget_ms(5_000).build().unwrap();
        assert_eq!(derived.candidates.max_candidates, 3);
        assert_eq!(derived.budget.time_budget_ms, 5_000);
        assert_eq!(base.budget.time_budget_ms, 2_000);
    }

    #[test]
    fn test_request_budget_shrinks_margin() {
        let config = Config::builder().request_time_budget_ms(120).build().unwrap();
        assert_eq!(config.budget.time_budget_ms, 120);
        assert_eq!(config.budget.min_remaining_ms, 60);

        let config = Config::builder()
            .overrides(json!({ "budget": { "time_budget_ms": 9_000, "min_remaining_ms": 20 } }))
            .request_time_budget_ms(1_000)
            .build()
            .unwrap();
        assert_eq!(config.budget.time_budget_ms, 1_000);
        assert_eq!(config.budget.min_remaining_ms, 20);

        let config = Config::builder().request_time_budget_ms(1).build().unwrap();
        assert_eq!(config.budget.min_remaining_ms, 0);

        let err = Config::builder().request_time_budget_ms(0).build().unwrap_err();
        assert_eq!(err.field(), Some("budget.time_budget_ms"));
    }

    #[test]
    fn test_margin_must_fit_budget() {
        let err = Config::builder()
            .time_budget_ms(100)
            .min_remaining_ms(100)
            .build()
            .unwrap_err();
        assert_eq!(err.field(), Some("budget.min_remaining_ms"));
    }
}
