//! 指纹：DCT 感知哈希 + 内容 SHA-256

use rustdct::DctPlanner;
use sha2::{Digest, Sha256};

/// pHash 采样边长
const PHASH_SAMPLE: usize = 32;
/// 低频块边长
const PHASH_BLOCK: usize = 8;

/// 整数边界的盒式下采样，输出 tw*th 个均值
pub fn box_downscale(gray: &[u8], width: u32, height: u32, tw: usize, th: usize) -> Vec<f32> {
    let w = width as usize;
    let h = height as usize;
    let mut out = vec![0f32; tw * th];
    if w == 0 || h == 0 || gray.len() < w * h {
        return out;
    }

    for ty in 0..th {
        let y0 = ty * h / th;
        let y1 = ((ty + 1) * h / th).max(y0 + 1).min(h);
        for tx in 0..tw {
            let x0 = tx * w / tw;
            let x1 = ((tx + 1) * w / tw).max(x0 + 1).min(w);

            let mut sum = 0u32;
            for y in y0..y1 {
                let row = y * w;
                for x in x0..x1 {
                    sum += gray[row + x] as u32;
                }
            }
            let count = ((y1 - y0) * (x1 - x0)) as f32;
            out[ty * tw + tx] = sum as f32 / count;
        }
    }
    out
}

/// 64 位 DCT 感知哈希
///
/// 灰度 → 32x32 → 二维 DCT-II → 左上 8x8 低频块，
/// 与 63 个交流系数的中位数比较得到各位，直流位恒为 0。
pub fn phash64(gray: &[u8], width: u32, height: u32) -> u64 {
    if width == 0 || height == 0 {
        return 0;
    }

    let n = PHASH_SAMPLE;
    let mut pixels = box_downscale(gray, width, height, n, n);
    let mut planner = DctPlanner::<f32>::new();
    let dct = planner.plan_dct2(n);

    // 行变换
    for row in pixels.chunks_exact_mut(n) {
        dct.process_dct2(row);
    }
    // 列变换
    let mut column = vec![0f32; n];
    for x in 0..n {
        for y in 0..n {
            column[y] = pixels[y * n + x];
        }
        dct.process_dct2(&mut column);
        for y in 0..n {
            pixels[y * n + x] = column[y];
        }
    }

    let mut block = [0f32; PHASH_BLOCK * PHASH_BLOCK];
    for v in 0..PHASH_BLOCK {
        for u in 0..PHASH_BLOCK {
            block[v * PHASH_BLOCK + u] = pixels[v * n + u];
        }
    }

    let mut ac: Vec<f32> = block[1..].to_vec();
    ac.sort_by(|a, b| a.total_cmp(b));
    let median = ac[ac.len() / 2];

    let mut hash = 0u64;
    for (i, &coef) in block.iter().enumerate().skip(1) {
        if coef > median {
            hash |= 1 << (63 - i);
        }
    }
    hash
}

/// 16 位小写十六进制
pub fn phash_hex(hash: u64) -> String {
    format!("{:016x}", hash)
}

pub fn parse_phash_hex(s: &str) -> Option<u64> {
    if s.len() != 16 {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
