//! Character n-gram vectors and batched cosine ranking for addresses that
//! found no exact partner.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s\s+").expect("whitespace pattern"));

/// Unit-length sparse vector, sorted by term id.
pub type SparseVector = Vec<(usize, f64)>;

#[derive(Debug, Clone)]
pub struct NgramVectorizer {
    n: usize,
    vocabulary: HashMap<String, usize>,
}

impl NgramVectorizer {
    /// Build the vocabulary from `documents`. Terms unseen here are ignored
    /// by `transform`.
    pub fn fit<S: AsRef<str>>(n: usize, documents: &[S]) -> Self {
        let mut vocabulary = HashMap::new();
        for doc in documents {
            for gram in ngrams(doc.as_ref(), n) {
                let next = vocabulary.len();
                vocabulary.entry(gram).or_insert(next);
            }
        }
        Self { n, vocabulary }
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn transform(&self, document: &str) -> SparseVector {
        let mut counts: HashMap<usize, f64> = HashMap::new();
        for gram in ngrams(document, self.n) {
            if let Some(&id) = self.vocabulary.get(&gram) {
                *counts.entry(id).or_insert(0.0) += 1.0;
            }
        }
        let norm = counts.values().map(|c| c * c).sum::<f64>().sqrt();
        let mut vector: SparseVector = counts
            .into_iter()
            .map(|(id, c)| (id, if norm > 0.0 { c / norm } else { 0.0 }))
            .collect();
        vector.sort_by_key(|(id, _)| *id);
        vector
    }
}

/// Lowercased character n-grams with whitespace runs collapsed.
fn ngrams(text: &str, n: usize) -> Vec<String> {
    let lowered = text.to_lowercase();
    let collapsed = WHITESPACE_RUN.replace_all(&lowered, " ");
    let chars: Vec<char> = collapsed.chars().collect();
    if n == 0 || chars.len() < n {
        return Vec::new();
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

pub fn cosine(a: &SparseVector, b: &SparseVector) -> f64 {
    let (mut i, mut j, mut dot) = (0, 0, 0.0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    dot
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub secondary: usize,
    pub score: f64,
}

/// Top `k` secondary candidates for every primary document, best first.
/// Equal scores keep the lower secondary index first.
///
/// Similarities are computed `batch_size` primary rows at a time against the
/// whole secondary side so the score block never exceeds
/// `batch_size * secondary.len()` cells.
pub fn rank_candidates(
    primary: &[SparseVector],
    secondary: &[SparseVector],
    k: usize,
    batch_size: usize,
) -> Vec<Vec<Candidate>> {
    let mut postings: HashMap<usize, Vec<(usize, f64)>> = HashMap::new();
    for (s, vector) in secondary.iter().enumerate() {
        for &(term, weight) in vector {
            postings.entry(term).or_default().push((s, weight));
        }
    }

    let batch_size = batch_size.max(1);
    let mut ranked = Vec::with_capacity(primary.len());
    for (batch_no, batch) in primary.chunks(batch_size).enumerate() {
        let mut block = vec![0.0f64; batch.len() * secondary.len()];
        for (row, vector) in batch.iter().enumerate() {
            let scores = &mut block[row * secondary.len()..(row + 1) * secondary.len()];
            for &(term, weight) in vector {
                if let Some(list) = postings.get(&term) {
                    for &(s, w) in list {
                        scores[s] += weight * w;
                    }
                }
            }
        }
        for row in 0..batch.len() {
            let scores = &block[row * secondary.len()..(row + 1) * secondary.len()];
            ranked.push(top_k(scores, k));
        }
        debug!("Scored similarity batch {} ({} rows)", batch_no + 1, batch.len());
    }
    ranked
}

fn top_k(scores: &[f64], k: usize) -> Vec<Candidate> {
    let mut best: Vec<Candidate> = Vec::with_capacity(k + 1);
    for (secondary, &score) in scores.iter().enumerate() {
        if best.len() == k && best.last().map_or(true, |c| score <= c.score) {
            continue;
        }
        let at = best.partition_point(|c| c.score >= score);
        best.insert(at, Candidate { secondary, score });
        best.truncate(k);
    }
    best
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FuzzyResult {
    Granted(Candidate),
    Unmatched { best_score: Option<f64> },
}

/// Grant every primary document its best candidate when the score reaches
/// `threshold`. Several primary documents may share one secondary document.
pub fn grant_matches(candidates: &[Vec<Candidate>], threshold: f64) -> Vec<FuzzyResult> {
    candidates
        .iter()
        .map(|list| match list.first() {
            Some(best) if best.score >= threshold => FuzzyResult::Granted(*best),
            best => FuzzyResult::Unmatched {
                best_score: best.map(|c| c.score),
            },
        })
        .collect()
}
