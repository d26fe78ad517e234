//! 躯干 ROI 估计与裁剪框约束
//!
//! 所有框都会被夹到帧内并满足最小尺寸；每一次调整都附带原因码。

use super::config::Config;
use super::frame::DecodedImage;
use super::quality::{border_band, border_mean};
use super::reason::ReasonCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 像素坐标裁剪框（附带所在帧的尺寸）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub frame_w: u32,
    pub frame_h: u32,
}

impl CropBox {
    pub fn new(x: u32, y: u32, w: u32, h: u32, frame_w: u32, frame_h: u32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            frame_w,
            frame_h,
        }
    }

    /// 覆盖整帧
    pub fn full(frame_w: u32, frame_h: u32) -> Self {
        Self::new(0, 0, frame_w, frame_h, frame_w, frame_h)
    }

    pub fn right(&self) -> u32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn is_within_frame(&self) -> bool {
        self.right() <= self.frame_w && self.bottom() <= self.frame_h
    }
}

impl fmt::Display for CropBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@({},{}) in {}x{}",
            self.w, self.h, self.x, self.y, self.frame_w, self.frame_h
        )
    }
}

/// 约束后的框与调整原因
#[derive(Debug, Clone, PartialEq)]
pub struct RoiResult {
    pub crop_box: CropBox,
    pub reasons: Vec<ReasonCode>,
}

/// 按配置比例估计躯干区域
pub fn torso_roi(frame_w: u32, frame_h: u32, config: &Config) -> RoiResult {
    let r = &config.roi;
    let fw = frame_w as f64;
    let fh = frame_h as f64;

    clamp_box(
        (fw * r.x_pct).round() as i64,
        (fh * (r.y_pct + r.down_bias_pct)).round() as i64,
        (fw * r.w_pct).round() as i64,
        (fh * r.h_pct).round() as i64,
        frame_w,
        frame_h,
        config.candidates.min_crop_dim,
    )
}

/// 将任意（可能越界、可能非正）的框约束到帧内
pub fn clamp_box(
    x: i64,
    y: i64,
    w: i64,
    h: i64,
    frame_w: u32,
    frame_h: u32,
    min_dim: u32,
) -> RoiResult {
    let mut reasons = Vec::new();
    let (x, w) = clamp_axis(x, w, frame_w, min_dim, &mut reasons);
    let (y, h) = clamp_axis(y, h, frame_h, min_dim, &mut reasons);

    RoiResult {
        crop_box: CropBox::new(x, y, w, h, frame_w, frame_h),
        reasons: unique(reasons),
    }
}

fn clamp_axis(
    pos: i64,
    len: i64,
    frame: u32,
    min_dim: u32,
    reasons: &mut Vec<ReasonCode>,
) -> (u32, u32) {
    let frame = frame as i64;
    let floor = min_dim as i64;

    // 帧本身比最小尺寸还小：整轴作为框
    if frame == 0 || frame < floor {
        reasons.push(ReasonCode::RoiFrameTooSmall);
        return (0, frame as u32);
    }

    let mut len = len;
    if len <= 0 {
        reasons.push(ReasonCode::RoiMinSizeFloor);
        len = floor;
    }
    // 中心点（乘 2 避免小数）
    let center2 = pos * 2 + len;

    let mut start = pos;
    if start < 0 {
        reasons.push(ReasonCode::RoiClampedOrigin);
        start = 0;
    } else if start > frame - 1 {
        reasons.push(ReasonCode::RoiClampedOrigin);
        start = frame - 1;
    }

    if len > frame || start + len > frame {
        reasons.push(ReasonCode::RoiClampedSize);
        len = (frame - start).min(len);
    }

    if len < floor {
        reasons.push(ReasonCode::RoiRecentered);
        len = floor;
        start = (center2 - len).div_euclid(2).clamp(0, frame - len);
    }

    (start as u32, len as u32)
}

fn unique(reasons: Vec<ReasonCode>) -> Vec<ReasonCode> {
    let mut out: Vec<ReasonCode> = Vec::with_capacity(reasons.len());
    for r in reasons {
        if !out.contains(&r) {
            out.push(r);
        }
    }
    out
}

/// 在 ROI 内收缩到前景像素的包围盒（加边距后重新约束）
///
/// 前景像素少于 ROI 面积的 1% 时返回 None，保持原 ROI。
pub fn refine_to_foreground(image: &DecodedImage, roi: &CropBox, config: &Config) -> Option<RoiResult> {
    if !roi.is_within_frame() || roi.w == 0 || roi.h == 0 {
        return None;
    }

    let band = border_band(roi, &config.presence);
    let reference = border_mean(&image.gray, image.width, roi, band);
    let delta = config.presence.delta as f64;
    let w = image.width as usize;

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
    let mut count = 0u64;
    for y in roi.y..roi.bottom() {
        let row = y as usize * w;
        for x in roi.x..roi.right() {
            let p = image.gray[row + x as usize] as f64;
            if (p - reference).abs() > delta {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                count += 1;
            }
        }
    }

    if count == 0 || count * 100 < roi.area() {
        return None;
    }

    let bw = (max_x - min_x + 1) as f64;
    let bh = (max_y - min_y + 1) as f64;
    let pad_x = (bw * config.roi.refine_padding_pct).round() as i64;
    let pad_y = (bh * config.roi.refine_padding_pct).round() as i64;

    let mut refined = clamp_box(
        min_x as i64 - pad_x,
        min_y as i64 - pad_y,
        bw as i64 + pad_x * 2,
        bh as i64 + pad_y * 2,
        image.width,
        image.height,
        config.candidates.min_crop_dim,
    );
    refined.reasons.push(ReasonCode::RoiRefined);
    Some(refined)
}

/// 帧的最终 ROI：躯干估计，按配置可选收缩到前景
pub fn locate_roi(image: &DecodedImage, config: &Config) -> RoiResult {
    let torso = torso_roi(image.width, image.height, config);
    if !config.roi.refine_to_foreground {
        return torso;
    }

    match refine_to_foreground(image, &torso.crop_box, config) {
        Some(refined) => {
            let mut reasons = torso.reasons;
            reasons.extend(refined.reasons);
            RoiResult {
                crop_box: refined.crop_box,
                reasons: unique(reasons),
            }
        }
        None => torso,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::garment::frame::decode;
    use crate::core::garment::test_support::{encode_png, garment_rgb, FRAME_H, FRAME_W};

    #[test]
    fn test_default_torso_roi() {
        let config = Config::default();
        let roi = torso_roi(320, 480, &config);
        assert_eq!(roi.crop_box, CropBox::new(58, 106, 205, 336, 320, 480));
        assert!(roi.reasons.is_empty());
    }

    #[test]
    fn test_tiny_frame_uses_whole_frame() {
        let config = Config::default();
        let roi = torso_roi(40, 30, &config);
        assert_eq!(roi.crop_box, CropBox::full(40, 30));
        assert_eq!(roi.reasons, vec![ReasonCode::RoiFrameTooSmall]);
    }

    #[test]
    fn test_narrow_frame_recenters() {
        let config = Config::default();
        let roi = torso_roi(80, 400, &config);
        assert_eq!(roi.crop_box.x, 7);
        assert_eq!(roi.crop_box.w, 64);
        assert!(roi.reasons.contains(&ReasonCode::RoiRecentered));
    }

    #[test]
    fn test_clamp_negative_and_degenerate() {
        let roi = clamp_box(-10, -5, 0, 50, 200, 200, 64);
        assert_eq!(roi.crop_box, CropBox::new(0, 0, 64, 64, 200, 200));
        assert_eq!(
            roi.reasons,
            vec![
                ReasonCode::RoiMinSizeFloor,
                ReasonCode::RoiClampedOrigin,
                ReasonCode::RoiRecentered
            ]
        );
    }

    #[test]
    fn test_clamp_overflowing_box() {
        let roi = clamp_box(150, 500, 100, 100, 200, 200, 64);
        assert!(roi.crop_box.is_within_frame());
        assert_eq!(roi.crop_box.x, 136);
        assert_eq!(roi.crop_box.w, 64);
        assert_eq!(roi.crop_box.y, 136);
        assert!(roi.reasons.contains(&ReasonCode::RoiClampedSize));
        assert!(roi.reasons.contains(&ReasonCode::RoiClampedOrigin));
    }

    #[test]
    fn test_clamp_invariants_hold_everywhere() {
        let sizes = [1u32, 7, 8, 63, 64, 65, 100, 333, 640, 1024];
        let boxes: [(i64, i64, i64, i64); 7] = [
            (0, 0, 10, 10),
            (-100, -100, 50, 50),
            (5, 5, 10_000, 10_000),
            (900, 900, 30, 30),
            (10, 10, -20, 0),
            (3, 400, 64, 64),
            (-1, 2, 700, 1),
        ];

        for &fw in &sizes {
            for &fh in &sizes {
                for &(x, y, w, h) in &boxes {
                    let roi = clamp_box(x, y, w, h, fw, fh, 64);
                    let b = roi.crop_box;
                    assert!(b.is_within_frame(), "{} from {:?}", b, (x, y, w, h));
                    assert!(b.w >= 64.min(fw), "{}", b);
                    assert!(b.h >= 64.min(fh), "{}", b);
                    if fw < 64 || fh < 64 {
                        assert!(roi.reasons.contains(&ReasonCode::RoiFrameTooSmall));
                    }
                }
            }
        }
    }

    #[test]
    fn test_refine_shrinks_to_garment() {
        let config = Config::builder().refine_to_foreground(true).build().unwrap();
        let image = decode(&encode_png(&garment_rgb(5), FRAME_W, FRAME_H), 640).unwrap();
        let roi = locate_roi(&image, &config);
        let b = roi.crop_box;

        assert!(roi.reasons.contains(&ReasonCode::RoiRefined));
        assert!(b.is_within_frame());
        // 方格区域 x 80..240, y 120..408，加边距后仍在其附近
        assert!(b.x <= 80 && b.x >= 60, "{}", b);
        assert!(b.right() >= 240 && b.right() <= 263, "{}", b);
        assert!(b.y <= 120, "{}", b);
    }

    #[test]
    fn test_refine_gives_up_on_blank() {
        let config = Config::default();
        let rgba = vec![100u8; 200 * 200 * 4];
        let image = DecodedImage::from_rgba(200, 200, rgba);
        let roi = torso_roi(200, 200, &config);
        assert!(refine_to_foreground(&image, &roi.crop_box, &config).is_none());
    }
}
