use super::error::EncodeError;
use super::frame::{rgb_to_gray, DecodedImage};
use super::roi::CropBox;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};

/// 按框裁剪出的 RGBA 区域
#[derive(Debug, Clone)]
pub struct CroppedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl CroppedImage {
    pub fn to_rgb(&self) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for chunk in self.rgba.chunks_exact(4) {
            rgb.push(chunk[0]);
            rgb.push(chunk[1]);
            rgb.push(chunk[2]);
        }
        rgb
    }
}

/// 编码后的裁剪
///
/// `gray` 取自编码产物解码回来的像素，保证指纹描述的是实际交付的字节。
#[derive(Debug, Clone)]
pub struct EncodedCrop {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub gray: Vec<u8>,
}

/// 逐行拷贝裁剪区域
pub fn crop_rgba(image: &DecodedImage, crop_box: &CropBox) -> Result<CroppedImage, EncodeError> {
    if crop_box.w == 0 || crop_box.h == 0 {
        return Err(EncodeError::EmptyCrop);
    }
    if crop_box.right() > image.width || crop_box.bottom() > image.height {
        return Err(EncodeError::OutOfBounds(crop_box.to_string()));
    }

    let stride = image.width as usize * 4;
    let row_len = crop_box.w as usize * 4;
    let mut rgba = Vec::with_capacity(row_len * crop_box.h as usize);
    for y in crop_box.y..crop_box.bottom() {
        let start = y as usize * stride + crop_box.x as usize * 4;
        rgba.extend_from_slice(&image.rgba[start..start + row_len]);
    }

    Ok(CroppedImage {
        width: crop_box.w,
        height: crop_box.h,
        rgba,
    })
}

/// JPEG 编码（RGB，固定质量）
pub fn encode_jpeg(crop: &CroppedImage, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let rgb = crop.to_rgb();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality).write_image(
        &rgb,
        crop.width,
        crop.height,
        ExtendedColorType::Rgb8,
    )?;
    Ok(buffer)
}

/// 解码 JPEG 字节得到灰度平面
pub fn decode_jpeg_gray(bytes: &[u8]) -> Result<(u32, u32, Vec<u8>), EncodeError> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?.to_rgb8();
    let (width, height) = img.dimensions();
    Ok((width, height, rgb_to_gray(img.as_raw())))
}

/// 裁剪 → 编码 → 回读灰度
pub fn crop_and_encode(
    image: &DecodedImage,
    crop_box: &CropBox,
    quality: u8,
) -> Result<EncodedCrop, EncodeError> {
    let crop = crop_rgba(image, crop_box)?;
    let bytes = encode_jpeg(&crop, quality)?;
    let (width, height, gray) = decode_jpeg_gray(&bytes)?;
    Ok(EncodedCrop {
        bytes,
        width,
        height,
        gray,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(w: u32, h: u32) -> DecodedImage {
        let mut rgba = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                rgba.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, 50, 255]);
            }
        }
        DecodedImage::from_rgba(w, h, rgba)
    }

    #[test]
    fn test_crop_copies_rows() {
        let image = gradient_image(100, 80);
        let crop = crop_rgba(&image, &CropBox::new(10, 20, 30, 40, 100, 80)).unwrap();

        assert_eq!((crop.width, crop.height), (30, 40));
        assert_eq!(crop.rgba.len(), 30 * 40 * 4);
        assert_eq!(&crop.rgba[..4], &[10, 20, 50, 255]);
        let last = crop.rgba.len() - 4;
        assert_eq!(&crop.rgba[last..], &[39, 59, 50, 255]);
    }

    #[test]
    fn test_crop_rejects_bad_boxes() {
        let image = gradient_image(50, 50);
        assert!(matches!(
            crop_rgba(&image, &CropBox::new(0, 0, 0, 10, 50, 50)),
            Err(EncodeError::EmptyCrop)
        ));
        assert!(matches!(
            crop_rgba(&image, &CropBox::new(40, 0, 20, 10, 50, 50)),
            Err(EncodeError::OutOfBounds(_))
        ));
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let image = gradient_image(120, 90);
        let encoded = crop_and_encode(&image, &CropBox::new(0, 0, 120, 90, 120, 90), 85).unwrap();

        assert_eq!(&encoded.bytes[..2], &[0xFF, 0xD8]);
        assert_eq!((encoded.width, encoded.height), (120, 90));
        assert_eq!(encoded.gray.len(), 120 * 90);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let image = gradient_image(64, 64);
        let b = CropBox::full(64, 64);
        let a = crop_and_encode(&image, &b, 85).unwrap();
        let c = crop_and_encode(&image, &b, 85).unwrap();
        assert_eq!(a.bytes, c.bytes);
        assert_eq!(a.gray, c.gray);
    }
}
