use super::budget::TimeBudget;
use super::candidate::{HashedCandidate, SuppressedCandidate};
use super::config::Config;
use super::embed::{cosine_similarity, Embedder};
use super::hash::hamming_distance;
use super::reason::ReasonCode;
use log::debug;
use serde::Serialize;
use std::cmp::Ordering;

/// 去重计数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupeCounts {
    pub input: usize,
    pub kept: usize,
    pub deduped_phash: usize,
    pub deduped_embedding: usize,
    /// 因上限或预算未被检查的候选
    pub unexamined: usize,
    pub embeddings_computed: usize,
}

#[derive(Debug, Clone)]
pub struct DedupeResult {
    /// 按保留顺序（即最终排名顺序）
    pub kept: Vec<HashedCandidate>,
    pub suppressed: Vec<SuppressedCandidate>,
    pub counts: DedupeCounts,
    pub early_exit_reason: Option<ReasonCode>,
}

/// 候选排序：分数降序，其次生成顺序，最后 id
pub fn compare_candidates(a: &HashedCandidate, b: &HashedCandidate) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| a.raw.ordinal.cmp(&b.raw.ordinal))
        .then_with(|| a.id().cmp(b.id()))
}

/// 两阶段去重 - 先 pHash 汉明距离，再嵌入余弦相似度
///
/// 按分数从高到低逐个检查，与已保留集合比较：
/// - 汉明距离 ≤ 阈值 → DUPLICATE_PHASH
/// - 余弦相似度 ≥ 阈值 → DUPLICATE_EMBEDDING
/// - 否则保留
///
/// 保留数达到 `max_candidates` 或预算耗尽时停止，剩余候选记为未检查。
/// 嵌入只在第二阶段需要时计算，并缓存在候选上。
pub fn dedupe(
    candidates: Vec<HashedCandidate>,
    config: &Config,
    embedder: Option<&dyn Embedder>,
    budget: Option<&TimeBudget>,
) -> DedupeResult {
    let mut ordered = candidates;
    ordered.sort_by(compare_candidates);

    let max_keep = config.candidates.max_candidates;
    let hamming_threshold = config.dedupe.phash_hamming_threshold;
    let cosine_threshold = config.dedupe.embedding_cosine_threshold;
    let min_remaining_ms = config.budget.min_remaining_ms;

    let mut counts = DedupeCounts {
        input: ordered.len(),
        ..Default::default()
    };
    let mut kept: Vec<HashedCandidate> = Vec::with_capacity(max_keep.min(ordered.len()));
    let mut suppressed = Vec::new();
    let mut early_exit_reason = None;

    let mut queue = ordered.into_iter();
    while let Some(mut candidate) = queue.next() {
        let exit = if kept.len() >= max_keep {
            Some(ReasonCode::CandidateCap)
        } else if budget.map_or(false, |b| b.should_exit(min_remaining_ms)) {
            Some(ReasonCode::TimeBudget)
        } else {
            None
        };

        if let Some(reason) = exit {
            early_exit_reason = Some(reason);
            debug!(
                "⏹️ 去重提前结束: {} (已保留 {}, 剩余 {})",
                reason,
                kept.len(),
                queue.len() + 1
            );
            for rest in std::iter::once(candidate).chain(queue.by_ref()) {
                counts.unexamined += 1;
                suppressed.push(SuppressedCandidate {
                    candidate: rest,
                    reason,
                    duplicate_of: None,
                });
            }
            break;
        }

        // 阶段 1：感知哈希
        if let Some(original) = kept
            .iter()
            .find(|k| hamming_distance(k.phash, candidate.phash) <= hamming_threshold)
        {
            counts.deduped_phash += 1;
            let duplicate_of = Some(original.id().to_string());
            suppressed.push(SuppressedCandidate {
                candidate,
                reason: ReasonCode::DuplicatePhash,
                duplicate_of,
            });
            continue;
        }

        // 阶段 2：嵌入（只有需要比较时才计算）
        if let (Some(embedder), false) = (embedder, kept.is_empty()) {
            counts.embeddings_computed += candidate.ensure_embedding(embedder) as usize;
        }
        let mut duplicate_of = None;
        if let Some(current) = candidate.embedding.as_deref() {
            for k in kept.iter_mut() {
                if let Some(embedder) = embedder {
                    counts.embeddings_computed += k.ensure_embedding(embedder) as usize;
                }
                let Some(existing) = k.embedding.as_deref() else {
                    continue;
                };
                if cosine_similarity(current, existing) as f64 >= cosine_threshold {
                    duplicate_of = Some(k.id().to_string());
                    break;
                }
            }
        }

        if duplicate_of.is_some() {
            counts.deduped_embedding += 1;
            suppressed.push(SuppressedCandidate {
                candidate,
                reason: ReasonCode::DuplicateEmbedding,
                duplicate_of,
            });
            continue;
        }

        kept.push(candidate);
    }

    counts.kept = kept.len();
    DedupeResult {
        kept,
        suppressed,
        counts,
        early_exit_reason,
    }
}
