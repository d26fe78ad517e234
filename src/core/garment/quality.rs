//! 帧质量评分 - 清晰度 / 曝光 / 背景简洁度 / 前景存在性
//!
//! 全部是灰度平面上的纯函数，不依赖帧以外的状态。

use super::config::{Config, PresenceConfig, QualityConfig};
use super::frame::DecodedImage;
use super::reason::ReasonCode;
use super::roi::{CropBox, RoiResult};
use std::cmp::Ordering;

/// 背景简洁度里"内部有结构"的饱和点
const INSIDE_STRUCTURE_SATURATION: f64 = 0.10;
const OUTSIDE_WEIGHT: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureStats {
    pub mean: f64,
    pub dark_ratio: f64,
    pub bright_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundReport {
    pub inside_density: f64,
    pub outside_density: f64,
    pub simplicity: f64,
}

/// 前景存在性：中心区域相对其边框带的差异
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresenceReport {
    pub diff_ratio: f64,
    pub edge_density: f64,
    pub variance: f64,
    pub passes: bool,
}

impl PresenceReport {
    fn empty() -> Self {
        Self {
            diff_ratio: 0.0,
            edge_density: 0.0,
            variance: 0.0,
            passes: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameScore {
    /// 综合分，约在 [0, 1]
    pub composite: f64,
    pub laplacian_var: f64,
    pub sharpness: f64,
    pub exposure: ExposureStats,
    pub exposure_factor: f64,
    pub background: BackgroundReport,
    pub presence: PresenceReport,
    pub reasons: Vec<ReasonCode>,
}

/// 已评分的帧（评分后不可变）
#[derive(Debug, Clone)]
pub struct ScoredFrame {
    /// 输入顺序
    pub index: usize,
    pub timestamp_ms: u64,
    pub image: DecodedImage,
    pub roi: RoiResult,
    pub score: FrameScore,
}

/// 3x3 拉普拉斯响应的方差（仅内部像素）
pub fn laplacian_variance(gray: &[u8], width: u32, height: u32) -> f64 {
    let w = width as usize;
    let h = height as usize;
    if w < 3 || h < 3 || gray.len() < w * h {
        return 0.0;
    }

    let mut sum = 0f64;
    let mut sum_sq = 0f64;
    let mut n = 0usize;

    for y in 1..h - 1 {
        let row = y * w;
        for x in 1..w - 1 {
            let idx = row + x;
            let lap = gray[idx - w] as i32 + gray[idx + w] as i32 + gray[idx - 1] as i32
                + gray[idx + 1] as i32
                - 4 * gray[idx] as i32;
            let v = lap as f64;
            sum += v;
            sum_sq += v * v;
            n += 1;
        }
    }

    let mean = sum / n as f64;
    (sum_sq / n as f64 - mean * mean).max(0.0)
}

pub fn exposure_stats(gray: &[u8], quality: &QualityConfig) -> ExposureStats {
    if gray.is_empty() {
        return ExposureStats {
            mean: 0.0,
            dark_ratio: 0.0,
            bright_ratio: 0.0,
        };
    }

    let mut sum = 0u64;
    let mut dark = 0usize;
    let mut bright = 0usize;
    for &p in gray {
        sum += p as u64;
        if p <= quality.clip_low_level {
            dark += 1;
        }
        if p >= quality.clip_high_level {
            bright += 1;
        }
    }

    let n = gray.len() as f64;
    ExposureStats {
        mean: sum as f64 / n,
        dark_ratio: dark as f64 / n,
        bright_ratio: bright as f64 / n,
    }
}

/// 中心差分梯度 |gx| + |gy|，调用方保证 (x, y) 不在帧边缘
#[inline]
fn gradient_at(gray: &[u8], w: usize, x: usize, y: usize) -> u32 {
    let idx = y * w + x;
    let gx = gray[idx + 1] as i32 - gray[idx - 1] as i32;
    let gy = gray[idx + w] as i32 - gray[idx - w] as i32;
    (gx.abs() + gy.abs()) as u32
}

/// ROI 内外的边缘密度（按步长抽样）
pub fn background_simplicity(
    gray: &[u8],
    width: u32,
    height: u32,
    roi: &CropBox,
    quality: &QualityConfig,
) -> BackgroundReport {
    let w = width as usize;
    let h = height as usize;
    let stride = quality.background_stride.max(1);

    let mut inside_edges = 0usize;
    let mut inside_total = 0usize;
    let mut outside_edges = 0usize;
    let mut outside_total = 0usize;

    if w >= 3 && h >= 3 && gray.len() >= w * h {
        for y in (1..h - 1).step_by(stride) {
            for x in (1..w - 1).step_by(stride) {
                let is_edge = gradient_at(gray, w, x, y) > quality.edge_threshold;
                if roi.contains(x as u32, y as u32) {
                    inside_total += 1;
                    inside_edges += is_edge as usize;
                } else {
                    outside_total += 1;
                    outside_edges += is_edge as usize;
                }
            }
        }
    }

    let inside_density = ratio(inside_edges, inside_total);
    let outside_density = ratio(outside_edges, outside_total);
    let structure = (inside_density / INSIDE_STRUCTURE_SATURATION).min(1.0);
    let simplicity =
        OUTSIDE_WEIGHT * (1.0 - outside_density) + (1.0 - OUTSIDE_WEIGHT) * structure;

    BackgroundReport {
        inside_density,
        outside_density,
        simplicity: simplicity.clamp(0.0, 1.0),
    }
}

/// 边框带宽度（像素），至少 1
pub(crate) fn border_band(region: &CropBox, presence: &PresenceConfig) -> (u32, u32) {
    let bx = ((region.w as f64 * presence.border_band).round() as u32).max(1);
    let by = ((region.h as f64 * presence.border_band).round() as u32).max(1);
    (bx, by)
}

/// 区域边框带的平均亮度
pub(crate) fn border_mean(gray: &[u8], width: u32, region: &CropBox, band: (u32, u32)) -> f64 {
    let w = width as usize;
    let (bx, by) = band;
    let mut sum = 0u64;
    let mut n = 0u64;

    for y in region.y..region.bottom() {
        let in_band_row = y < region.y + by || y >= region.bottom().saturating_sub(by);
        let row = y as usize * w;
        for x in region.x..region.right() {
            let in_band = in_band_row || x < region.x + bx || x >= region.right().saturating_sub(bx);
            if in_band {
                sum += gray[row + x as usize] as u64;
                n += 1;
            }
        }
    }

    if n == 0 {
        0.0
    } else {
        sum as f64 / n as f64
    }
}

/// 前景存在性闸门
///
/// 中心子区域与边框带比较：差异像素占比、边缘密度、亮度方差三者须同时达标。
pub fn presence(
    gray: &[u8],
    width: u32,
    height: u32,
    region: &CropBox,
    presence: &PresenceConfig,
    edge_threshold: u32,
) -> PresenceReport {
    let w = width as usize;
    if gray.len() < w * height as usize
        || region.right() > width
        || region.bottom() > height
        || region.w == 0
        || region.h == 0
    {
        return PresenceReport::empty();
    }

    let band = border_band(region, presence);
    if region.w <= band.0 * 2 || region.h <= band.1 * 2 {
        return PresenceReport::empty();
    }

    let reference = border_mean(gray, width, region, band);
    let delta = presence.delta as f64;

    let (x0, x1) = (region.x + band.0, region.right() - band.0);
    let (y0, y1) = (region.y + band.1, region.bottom() - band.1);

    let mut differing = 0usize;
    let mut edges = 0usize;
    let mut total = 0usize;
    let mut sum = 0f64;
    let mut sum_sq = 0f64;

    for y in y0..y1 {
        let row = y as usize * w;
        for x in x0..x1 {
            let p = gray[row + x as usize] as f64;
            if (p - reference).abs() > delta {
                differing += 1;
            }
            if gradient_at(gray, w, x as usize, y as usize) > edge_threshold {
                edges += 1;
            }
            sum += p;
            sum_sq += p * p;
            total += 1;
        }
    }

    let mean = sum / total as f64;
    let variance = (sum_sq / total as f64 - mean * mean).max(0.0);
    let diff_ratio = ratio(differing, total);
    let edge_density = ratio(edges, total);

    PresenceReport {
        diff_ratio,
        edge_density,
        variance,
        passes: diff_ratio >= presence.min_diff_ratio
            && edge_density >= presence.min_edge_density
            && variance >= presence.min_variance,
    }
}

/// 整张图作为区域的存在性检查（用于裁剪结果）
pub fn presence_of_whole(gray: &[u8], width: u32, height: u32, config: &Config) -> PresenceReport {
    let region = CropBox::full(width, height);
    presence(
        gray,
        width,
        height,
        &region,
        &config.presence,
        config.quality.edge_threshold,
    )
}

/// 单帧综合评分
pub fn score_frame(image: &DecodedImage, roi: &CropBox, config: &Config) -> FrameScore {
    let q = &config.quality;
    let mut reasons = Vec::new();

    let laplacian_var = laplacian_variance(&image.gray, image.width, image.height);
    let mut sharpness = (laplacian_var / (q.sharpness_min_var * 4.0)).min(1.0);
    if laplacian_var < q.sharpness_min_var {
        reasons.push(ReasonCode::LowSharpness);
        sharpness *= q.low_sharpness_factor;
    }

    let exposure = exposure_stats(&image.gray, q);
    let mut exposure_factor = 1.0;
    if exposure.mean < q.exposure_mean_min {
        reasons.push(ReasonCode::TooDark);
        exposure_factor *= q.exposure_damp;
    } else if exposure.mean > q.exposure_mean_max {
        reasons.push(ReasonCode::TooBright);
        exposure_factor *= q.exposure_damp;
    }
    if exposure.dark_ratio > q.clip_ratio_max || exposure.bright_ratio > q.clip_ratio_max {
        reasons.push(ReasonCode::Clipped);
        exposure_factor *= q.clip_damp;
    }

    let background = background_simplicity(&image.gray, image.width, image.height, roi, q);
    if background.outside_density > q.busy_background_density {
        reasons.push(ReasonCode::BusyBackground);
    }

    let presence = presence(
        &image.gray,
        image.width,
        image.height,
        roi,
        &config.presence,
        q.edge_threshold,
    );
    let presence_factor = if presence.passes {
        config.presence.pass_factor
    } else {
        reasons.push(ReasonCode::NoRegionDetected);
        config.presence.fail_factor
    };

    let wt = &q.weights;
    let weight_sum = wt.sharpness + wt.exposure + wt.background;
    let weighted = (wt.sharpness * sharpness
        + wt.exposure * exposure_factor
        + wt.background * background.simplicity)
        / weight_sum;
    let composite = weighted * presence_factor;

    if reasons.is_empty() {
        reasons.push(ReasonCode::Ok);
    }

    FrameScore {
        composite,
        laplacian_var,
        sharpness,
        exposure,
        exposure_factor,
        background,
        presence,
        reasons,
    }
}

/// 帧排序：综合分降序，同分按时间戳字符串升序
pub fn compare_frames(a: &ScoredFrame, b: &ScoredFrame) -> Ordering {
    b.score
        .composite
        .total_cmp(&a.score.composite)
        .then_with(|| a.timestamp_ms.to_string().cmp(&b.timestamp_ms.to_string()))
        .then_with(|| a.index.cmp(&b.index))
}

/// 稳定排序
pub fn rank_frames(frames: &mut [ScoredFrame]) {
    frames.sort_by(compare_frames);
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::garment::frame::decode;
    use crate::core::garment::roi::torso_roi;
    use crate::core::garment::test_support::{encode_png, garment_rgb, solid_rgb, FRAME_H, FRAME_W};

    fn decoded(rgb: &[u8], w: u32, h: u32) -> DecodedImage {
        decode(&encode_png(rgb, w, h), 4096).unwrap()
    }

    fn checkerboard(w: u32, h: u32, cell: u32) -> Vec<u8> {
        (0..h)
            .flat_map(|y| (0..w).map(move |x| if ((x / cell) + (y / cell)) % 2 == 0 { 20 } else { 230 }))
            .collect()
    }

    #[test]
    fn test_laplacian_flat_is_zero() {
        let gray = vec![128u8; 64 * 64];
        assert_eq!(laplacian_variance(&gray, 64, 64), 0.0);
        assert_eq!(laplacian_variance(&gray[..4], 2, 2), 0.0);
    }

    #[test]
    fn test_laplacian_detail_is_high() {
        let sharp = checkerboard(64, 64, 2);
        let soft = checkerboard(64, 64, 16);
        let sharp_var = laplacian_variance(&sharp, 64, 64);
        let soft_var = laplacian_variance(&soft, 64, 64);
        assert!(sharp_var > soft_var);
        assert!(sharp_var > 1_000.0);
    }

    #[test]
    fn test_exposure_stats() {
        let q = QualityConfig::default();
        let mut gray = vec![0u8; 50];
        gray.extend(vec![255u8; 50]);
        let stats = exposure_stats(&gray, &q);
        assert!((stats.mean - 127.5).abs() < 1e-9);
        assert!((stats.dark_ratio - 0.5).abs() < 1e-9);
        assert!((stats.bright_ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_presence_rejects_blank_region() {
        let config = Config::default();
        let gray = vec![90u8; 200 * 200];
        let report = presence_of_whole(&gray, 200, 200, &config);
        assert!(!report.passes);
        assert_eq!(report.diff_ratio, 0.0);
        assert_eq!(report.variance, 0.0);
    }

    #[test]
    fn test_presence_accepts_garment() {
        let config = Config::default();
        let image = decoded(&garment_rgb(3), FRAME_W, FRAME_H);
        let roi = torso_roi(image.width, image.height, &config);
        let report = presence(
            &image.gray,
            image.width,
            image.height,
            &roi.crop_box,
            &config.presence,
            config.quality.edge_threshold,
        );
        assert!(report.passes, "{:?}", report);
        assert!(report.diff_ratio > 0.9);
    }

    #[test]
    fn test_presence_needs_all_three_signals() {
        let config = Config::default();
        // 中心整块变亮：差异大，但内部没有纹理
        let mut gray = vec![60u8; 400 * 400];
        for y in 48..352 {
            for x in 48..352 {
                gray[y * 400 + x] = 200;
            }
        }
        let report = presence_of_whole(&gray, 400, 400, &config);
        assert!(report.diff_ratio > 0.9);
        assert!(report.edge_density < config.presence.min_edge_density);
        assert_eq!(report.variance, 0.0);
        assert!(!report.passes);
    }

    #[test]
    fn test_score_blank_frame() {
        let config = Config::default();
        let image = decoded(&solid_rgb(FRAME_W, FRAME_H, [128; 3]), FRAME_W, FRAME_H);
        let roi = torso_roi(image.width, image.height, &config);
        let score = score_frame(&image, &roi.crop_box, &config);

        assert!(score.reasons.contains(&ReasonCode::LowSharpness));
        assert!(score.reasons.contains(&ReasonCode::NoRegionDetected));
        assert!(!score.reasons.contains(&ReasonCode::Ok));
        assert!(score.composite > 0.0);
        assert!(score.composite < 0.5);
    }

    #[test]
    fn test_score_garment_frame_is_clean() {
        let config = Config::default();
        let image = decoded(&garment_rgb(11), FRAME_W, FRAME_H);
        let roi = torso_roi(image.width, image.height, &config);
        let score = score_frame(&image, &roi.crop_box, &config);

        assert_eq!(score.reasons, vec![ReasonCode::Ok]);
        assert!(score.presence.passes);
        assert!(score.composite > 0.8 && score.composite <= 1.0);
        assert_eq!(score.background.outside_density, 0.0);
    }

    #[test]
    fn test_exposure_reasons() {
        let config = Config::default();
        let dark = decoded(&solid_rgb(64, 64, [3; 3]), 64, 64);
        let roi = CropBox::full(64, 64);
        let score = score_frame(&dark, &roi, &config);
        assert!(score.reasons.contains(&ReasonCode::TooDark));
        assert!(score.reasons.contains(&ReasonCode::Clipped));

        let bright = decoded(&solid_rgb(64, 64, [230; 3]), 64, 64);
        let score = score_frame(&bright, &roi, &config);
        assert!(score.reasons.contains(&ReasonCode::TooBright));
        assert!(!score.reasons.contains(&ReasonCode::Clipped));
    }

    #[test]
    fn test_busy_background_flagged() {
        let config = Config::default();
        let gray = checkerboard(100, 100, 2);
        let rgba: Vec<u8> = gray.iter().flat_map(|&g| [g, g, g, 255]).collect();
        let image = DecodedImage::from_rgba(100, 100, rgba);
        let roi = CropBox::new(40, 40, 20, 20, 100, 100);
        let report = background_simplicity(&image.gray, 100, 100, &roi, &config.quality);
        assert!(report.outside_density > 0.9);
        let score = score_frame(&image, &roi, &config);
        assert!(score.reasons.contains(&ReasonCode::BusyBackground));
    }

    #[test]
    fn test_rank_ties_use_timestamp_strings() {
        let config = Config::default();
        let image = decoded(&solid_rgb(32, 32, [100; 3]), 32, 32);
        let roi = torso_roi(32, 32, &config);
        let score = score_frame(&image, &roi.crop_box, &config);
        let make = |index: usize, timestamp_ms: u64| ScoredFrame {
            index,
            timestamp_ms,
            image: image.clone(),
            roi: roi.clone(),
            score: score.clone(),
        };

        let mut frames = vec![make(0, 200), make(1, 1000), make(2, 30)];
        rank_frames(&mut frames);
        let order: Vec<u64> = frames.iter().map(|f| f.timestamp_ms).collect();
        // "1000" < "200" < "30"
        assert_eq!(order, vec![1000, 200, 30]);
    }
}
