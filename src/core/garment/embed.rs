use super::config::EmbeddingConfig;
use super::hash::box_downscale;

/// 嵌入能力（可替换为真实模型），实现需确定性
pub trait Embedder: Send + Sync {
    /// 模型标识，随候选一起输出
    fn model(&self) -> &str;
    /// 灰度裁剪 → L2 归一化向量
    fn embed(&self, gray: &[u8], width: u32, height: u32) -> Vec<f32>;
}

/// 内置嵌入：亮度网格 + 全局均值/方差
#[derive(Debug, Clone)]
pub struct GridEmbedder {
    grid_w: usize,
    grid_h: usize,
    model: String,
}

impl GridEmbedder {
    pub fn new(grid_w: u32, grid_h: u32) -> Self {
        Self {
            grid_w: grid_w.max(1) as usize,
            grid_h: grid_h.max(1) as usize,
            model: format!("grid-luma-{}x{}-v1", grid_w, grid_h),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::new(config.grid_w, config.grid_h)
    }

    pub fn dimension(&self) -> usize {
        self.grid_w * self.grid_h + 2
    }
}

impl Default for GridEmbedder {
    fn default() -> Self {
        Self::from_config(&EmbeddingConfig::default())
    }
}

impl Embedder for GridEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn embed(&self, gray: &[u8], width: u32, height: u32) -> Vec<f32> {
        let mut vector: Vec<f32> = box_downscale(gray, width, height, self.grid_w, self.grid_h)
            .into_iter()
            .map(|v| v / 255.0)
            .collect();

        let n = vector.len() as f32;
        let mean = vector.iter().sum::<f32>() / n;
        let variance = vector.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        vector.push(mean);
        vector.push(variance);

        l2_normalize(&mut vector);
        vector
    }
}

/// 原地 L2 归一化；零向量保持不变
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// 余弦相似度；长度不一致或含零向量时为 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0f32;
    let mut na = 0f32;
    let mut nb = 0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }

    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_shape_and_norm() {
        let embedder = GridEmbedder::default();
        assert_eq!(embedder.model(), "grid-luma-16x16-v1");

        let gray: Vec<u8> = (0..64 * 48).map(|i| (i % 251) as u8).collect();
        let v = embedder.embed(&gray, 64, 48);
        assert_eq!(v.len(), embedder.dimension());
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_black_crop_is_zero_vector() {
        let embedder = GridEmbedder::new(4, 4);
        let v = embedder.embed(&[0u8; 100], 10, 10);
        assert!(v.iter().all(|&x| x == 0.0));
        assert_eq!(cosine_similarity(&v, &v), 0.0);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_similar_crops_embed_close() {
        let embedder = GridEmbedder::default();
        let a: Vec<u8> = (0..128 * 128).map(|i| ((i % 128) * 2) as u8).collect();
        let b: Vec<u8> = a.iter().map(|&p| p.saturating_add(2)).collect();
        let flipped: Vec<u8> = a.iter().map(|&p| 255 - p).collect();

        let va = embedder.embed(&a, 128, 128);
        let vb = embedder.embed(&b, 128, 128);
        let vf = embedder.embed(&flipped, 128, 128);
        assert!(cosine_similarity(&va, &vb) > 0.99);
        assert!(cosine_similarity(&va, &vf) < cosine_similarity(&va, &vb));
    }
}
