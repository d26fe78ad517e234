use super::error::FrameError;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::io::Cursor;
use std::path::PathBuf;

/// 帧来源：原始字节或可加载的路径
#[derive(Debug, Clone)]
pub enum FrameSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// 外部抽帧工具给出的一帧（调用方持有，流水线只读）
#[derive(Debug, Clone)]
pub struct FrameInput {
    /// 相对视频起点的时间戳（毫秒）
    pub timestamp_ms: u64,
    pub source: FrameSource,
}

impl FrameInput {
    pub fn from_bytes(timestamp_ms: u64, bytes: Vec<u8>) -> Self {
        Self {
            timestamp_ms,
            source: FrameSource::Bytes(bytes),
        }
    }

    pub fn from_path(timestamp_ms: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            timestamp_ms,
            source: FrameSource::Path(path.into()),
        }
    }
}

/// 帧加载能力（路径或字节 → 字节），由调用方注入
pub trait FrameLoader: Send + Sync {
    fn load(&self, source: &FrameSource) -> Result<Vec<u8>, FrameError>;
}

/// 默认加载器：字节原样返回，路径从本地文件系统读取
#[derive(Debug, Default, Clone, Copy)]
pub struct FsFrameLoader;

impl FrameLoader for FsFrameLoader {
    fn load(&self, source: &FrameSource) -> Result<Vec<u8>, FrameError> {
        let bytes = match source {
            FrameSource::Bytes(bytes) => bytes.clone(),
            FrameSource::Path(path) => std::fs::read(path)?,
        };
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }
        Ok(bytes)
    }
}

/// 解码后的帧：RGBA + 固定权重灰度平面
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub gray: Vec<u8>,
}

impl DecodedImage {
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Self {
        let gray = rgba_to_gray(&rgba);
        Self {
            width,
            height,
            rgba,
            gray,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// RGB → 灰度，整数权重固定不变（下游哈希的确定性依赖于此）
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

pub fn rgba_to_gray(rgba: &[u8]) -> Vec<u8> {
    rgba.chunks_exact(4)
        .map(|px| luma(px[0], px[1], px[2]))
        .collect()
}

pub fn rgb_to_gray(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| luma(px[0], px[1], px[2]))
        .collect()
}

/// 解码一帧：方向校正 → 等比缩小到不超过 max_width（不放大） → 灰度
pub fn decode(bytes: &[u8], max_width: u32) -> Result<DecodedImage, FrameError> {
    if bytes.is_empty() {
        return Err(FrameError::Empty);
    }

    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);

    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        return Err(FrameError::ZeroSize);
    }

    let img = if width > max_width {
        let target_h = ((height as u64 * max_width as u64 + width as u64 / 2) / width as u64).max(1) as u32;
        img.resize_exact(max_width, target_h, FilterType::Triangle)
    } else {
        img
    };

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(DecodedImage::from_rgba(width, height, rgba.into_raw()))
}
