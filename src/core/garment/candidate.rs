//! 候选在各阶段的形态
//!
//! 原因码按阶段分开保存，后续阶段只追加自己的列表，不改动前面的。

use super::embed::Embedder;
use super::hash::{phash64, phash_hex, sha256_hex};
use super::reason::ReasonCode;
use super::roi::CropBox;
use serde::Serialize;

/// 裁剪并通过存在性检查的候选
#[derive(Debug, Clone)]
pub struct RawCandidate {
    pub id: String,
    /// 生成顺序，用于同分时的确定性排序
    pub ordinal: usize,
    pub frame_timestamp_ms: u64,
    pub crop_box: CropBox,
    pub score: f64,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 编码产物回读的灰度
    pub gray: Vec<u8>,
    pub frame_reasons: Vec<ReasonCode>,
    pub roi_reasons: Vec<ReasonCode>,
    /// 兜底帧生成的候选
    pub fallback: bool,
}

impl RawCandidate {
    pub fn reason_codes(&self) -> Vec<ReasonCode> {
        let mut codes = self.frame_reasons.clone();
        codes.extend_from_slice(&self.roi_reasons);
        codes
    }
}

/// 已计算指纹的候选
#[derive(Debug, Clone)]
pub struct HashedCandidate {
    pub raw: RawCandidate,
    pub phash: u64,
    pub content_hash: String,
    /// 懒计算，去重第二阶段或输出时填充
    pub embedding: Option<Vec<f32>>,
}

impl HashedCandidate {
    pub fn from_raw(raw: RawCandidate) -> Self {
        let phash = phash64(&raw.gray, raw.width, raw.height);
        let content_hash = sha256_hex(&raw.bytes);
        Self {
            raw,
            phash,
            content_hash,
            embedding: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.raw.id
    }

    pub fn score(&self) -> f64 {
        self.raw.score
    }

    pub fn byte_length(&self) -> usize {
        self.raw.bytes.len()
    }

    pub fn reason_codes(&self) -> Vec<ReasonCode> {
        self.raw.reason_codes()
    }

    /// 取嵌入，必要时计算并缓存；返回是否新算了一次
    pub fn ensure_embedding(&mut self, embedder: &dyn Embedder) -> bool {
        if self.embedding.is_some() {
            return false;
        }
        self.embedding = Some(embedder.embed(&self.raw.gray, self.raw.width, self.raw.height));
        true
    }
}

/// 被去重丢弃的候选
#[derive(Debug, Clone)]
pub struct SuppressedCandidate {
    pub candidate: HashedCandidate,
    pub reason: ReasonCode,
    /// 与之重复的已保留候选
    pub duplicate_of: Option<String>,
}

impl SuppressedCandidate {
    pub fn reason_codes(&self) -> Vec<ReasonCode> {
        let mut codes = self.candidate.reason_codes();
        codes.push(self.reason);
        codes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    Generated,
}

/// 最终输出的候选
#[derive(Debug, Clone, Serialize)]
pub struct DetectedCandidate {
    pub id: String,
    pub video_id: String,
    pub user_id: String,
    pub frame_timestamp_ms: u64,
    pub crop_box: CropBox,
    /// [0, 1]
    pub confidence: f64,
    pub reason_codes: Vec<ReasonCode>,
    pub perceptual_hash: String,
    pub content_hash: String,
    pub byte_length: usize,
    pub embedding_model: String,
    /// 从 1 开始
    pub rank: usize,
    pub status: CandidateStatus,
    #[serde(skip)]
    pub crop_bytes: Vec<u8>,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl DetectedCandidate {
    /// 组装输出；`decision` 是最后一个阶段（去重或兜底）的结论码
    pub fn finalize(
        candidate: HashedCandidate,
        video_id: &str,
        user_id: &str,
        rank: usize,
        confidence: f64,
        decision: ReasonCode,
        embedding_model: &str,
    ) -> Self {
        let mut reason_codes = candidate.reason_codes();
        reason_codes.push(decision);

        let perceptual_hash = phash_hex(candidate.phash);
        let byte_length = candidate.byte_length();
        let HashedCandidate {
            raw,
            content_hash,
            embedding,
            ..
        } = candidate;

        Self {
            id: raw.id,
            video_id: video_id.to_string(),
            user_id: user_id.to_string(),
            frame_timestamp_ms: raw.frame_timestamp_ms,
            crop_box: raw.crop_box,
            confidence: confidence.clamp(0.0, 1.0),
            reason_codes,
            perceptual_hash,
            content_hash,
            byte_length,
            embedding_model: embedding_model.to_string(),
            rank,
            status: CandidateStatus::Generated,
            crop_bytes: raw.bytes,
            embedding: embedding.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::garment::embed::GridEmbedder;

    pub(crate) fn raw_candidate(ordinal: usize, score: f64, gray: Vec<u8>, w: u32, h: u32) -> RawCandidate {
        RawCandidate {
            id: format!("cand-{}", ordinal),
            ordinal,
            frame_timestamp_ms: ordinal as u64 * 100,
            crop_box: CropBox::full(w, h),
            score,
            bytes: gray.clone(),
            width: w,
            height: h,
            gray,
            frame_reasons: vec![ReasonCode::Ok],
            roi_reasons: Vec::new(),
            fallback: false,
        }
    }

    #[test]
    fn test_reason_lists_are_appended_per_stage() {
        let mut raw = raw_candidate(0, 0.8, vec![10; 64 * 64], 64, 64);
        raw.roi_reasons.push(ReasonCode::RoiRecentered);
        let hashed = HashedCandidate::from_raw(raw);
        let suppressed = SuppressedCandidate {
            candidate: hashed.clone(),
            reason: ReasonCode::DuplicatePhash,
            duplicate_of: Some("cand-9".to_string()),
        };

        assert_eq!(
            suppressed.reason_codes(),
            vec![ReasonCode::Ok, ReasonCode::RoiRecentered, ReasonCode::DuplicatePhash]
        );
        assert_eq!(
            hashed.reason_codes(),
            vec![ReasonCode::Ok, ReasonCode::RoiRecentered]
        );
    }

    #[test]
    fn test_finalize_fills_output_fields() {
        let gray: Vec<u8> = (0..64 * 64).map(|i| (i % 200) as u8).collect();
        let mut hashed = HashedCandidate::from_raw(raw_candidate(3, 1.7, gray, 64, 64));
        let embedder = GridEmbedder::default();
        assert!(hashed.ensure_embedding(&embedder));
        assert!(!hashed.ensure_embedding(&embedder));

        let out = DetectedCandidate::finalize(
            hashed,
            "video-1",
            "user-1",
            1,
            1.7,
            ReasonCode::Unique,
            embedder.model(),
        );

        assert_eq!(out.rank, 1);
        assert_eq!(out.confidence, 1.0);
        assert_eq!(out.perceptual_hash.len(), 16);
        assert_eq!(out.content_hash.len(), 64);
        assert_eq!(out.byte_length, 64 * 64);
        assert_eq!(out.reason_codes.last(), Some(&ReasonCode::Unique));
        assert_eq!(out.embedding.len(), embedder.dimension());

        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["status"], "generated");
        assert_eq!(json["reason_codes"][1], "UNIQUE");
        assert!(json.get("crop_bytes").is_none());
        assert!(json.get("embedding").is_none());
    }
}
