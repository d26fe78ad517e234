//! 测试用合成帧

use super::frame::FrameInput;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageEncoder, ImageFormat, RgbImage};
use std::io::Cursor;

pub const FRAME_W: u32 = 320;
pub const FRAME_H: u32 = 480;
pub const BACKGROUND: u8 = 120;

/// 简单 LCG，保证测试图案跨平台一致
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ 0xD1B5_4A32_D192_ED03)
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) as u32
    }
}

pub fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    color
        .iter()
        .copied()
        .cycle()
        .take((width * height * 3) as usize)
        .collect()
}

/// 背景均匀、中间一块随机明暗方格的"衣服"帧
pub fn garment_rgb(seed: u64) -> Vec<u8> {
    let mut rgb = solid_rgb(FRAME_W, FRAME_H, [BACKGROUND; 3]);
    let mut rng = Lcg::new(seed);
    let (x0, x1, y0, y1) = (80u32, 240u32, 120u32, 408u32);
    let block = 32u32;
    let cols = (x1 - x0) / block;
    let rows = (y1 - y0) / block;
    let levels: Vec<u8> = (0..cols * rows)
        .map(|_| if rng.next_u32() & 1 == 0 { 24 } else { 232 })
        .collect();

    for y in y0..y1 {
        for x in x0..x1 {
            let v = levels[(((y - y0) / block) * cols + (x - x0) / block) as usize];
            let idx = ((y * FRAME_W + x) * 3) as usize;
            rgb[idx] = v;
            rgb[idx + 1] = v.saturating_sub(10);
            rgb[idx + 2] = v.saturating_sub(20);
        }
    }
    rgb
}

pub fn encode_png(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_raw(width, height, rgb.to_vec()).expect("rgb buffer size");
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("png encode");
    buffer.into_inner()
}

pub fn encode_jpeg(rgb: &[u8], width: u32, height: u32, quality: u8) -> Vec<u8> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .write_image(rgb, width, height, image::ExtendedColorType::Rgb8)
        .expect("jpeg encode");
    buffer
}

pub fn garment_frame(timestamp_ms: u64, seed: u64) -> FrameInput {
    FrameInput::from_bytes(timestamp_ms, encode_png(&garment_rgb(seed), FRAME_W, FRAME_H))
}

pub fn blank_frame(timestamp_ms: u64, value: u8) -> FrameInput {
    FrameInput::from_bytes(
        timestamp_ms,
        encode_png(&solid_rgb(FRAME_W, FRAME_H, [value; 3]), FRAME_W, FRAME_H),
    )
}

/// 与 garment_rgb 相同，只改动 ROI 之外的一个角落像素
pub fn garment_frame_jittered(timestamp_ms: u64, seed: u64, jitter: u8) -> FrameInput {
    let mut rgb = garment_rgb(seed);
    rgb[0] = BACKGROUND.wrapping_add(jitter);
    FrameInput::from_bytes(timestamp_ms, encode_png(&rgb, FRAME_W, FRAME_H))
}
