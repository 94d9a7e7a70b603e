//! Landmark recognition over a fixed vocabulary.
//!
//! The matcher is model-agnostic: a [`LabelScorer`] turns an image and the
//! vocabulary into one probability per label, and the matcher applies the
//! arg-max and confidence threshold.

use crate::landmarks::LandmarkTable;
use crate::types::LandmarkMatch;
use image::DynamicImage;
use thiserror::Error;

pub const DEFAULT_THRESHOLD: f32 = 0.15;
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("label {0:?} has no text embedding")]
    MissingLabel(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("scorer: {0}")]
    Score(#[from] ScoreError),
    #[error("scorer returned {actual} scores for {expected} labels")]
    ScoreCount { expected: usize, actual: usize },
}

/// Vision-language model boundary.
///
/// Implementations are loaded once and shared; `score` returns one value per
/// label, in label order, forming a distribution over the labels.
pub trait LabelScorer: Send + Sync {
    fn score(&self, image: &DynamicImage, labels: &[String]) -> Result<Vec<f32>, ScoreError>;
}

/// Numerically stable softmax. Empty input gives empty output.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|e| e / sum).collect()
    } else {
        exps
    }
}

/// Picks the best landmark for an image if it clears the threshold.
pub struct LandmarkMatcher {
    scorer: Box<dyn LabelScorer>,
    vocabulary: Vec<String>,
    threshold: f32,
    top_k: usize,
}

impl LandmarkMatcher {
    /// Matcher over every name in `table`, in table order.
    pub fn new(scorer: Box<dyn LabelScorer>, table: &LandmarkTable) -> Self {
        Self {
            scorer,
            vocabulary: table.names(),
            threshold: DEFAULT_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Number of ranked candidates written to the debug log.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Score every label, best first. Ties keep vocabulary order.
    pub fn rank(&self, image: &DynamicImage) -> Result<Vec<LandmarkMatch>, MatchError> {
        let mut ranked: Vec<LandmarkMatch> = self
            .scores(image)?
            .into_iter()
            .zip(&self.vocabulary)
            .map(|(score, name)| LandmarkMatch { name: name.clone(), score })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(ranked)
    }

    /// Best landmark above the threshold, or `None`.
    ///
    /// Scorer failures are logged and treated as no match.
    pub fn detect(&self, image: &DynamicImage) -> Option<LandmarkMatch> {
        let scores = match self.scores(image) {
            Ok(scores) => scores,
            Err(e) => {
                tracing::warn!(error = %e, "landmark scoring failed");
                return None;
            }
        };

        if tracing::enabled!(tracing::Level::DEBUG) {
            let mut order: Vec<usize> = (0..scores.len()).collect();
            order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
            for (rank, &i) in order.iter().take(self.top_k).enumerate() {
                tracing::debug!(rank = rank + 1, name = %self.vocabulary[i], score = scores[i], "landmark rank");
            }
        }

        let (best_idx, best_score) = best(&scores)?;
        let name = self.vocabulary[best_idx].to_lowercase();

        if best_score >= self.threshold {
            tracing::info!(name = %name, score = best_score, "landmark match");
            Some(LandmarkMatch { name, score: best_score })
        } else {
            tracing::info!(
                best = %name,
                score = best_score,
                threshold = self.threshold,
                "landmark below threshold"
            );
            None
        }
    }

    fn scores(&self, image: &DynamicImage) -> Result<Vec<f32>, MatchError> {
        if self.vocabulary.is_empty() {
            return Ok(Vec::new());
        }
        let scores = self.scorer.score(image, &self.vocabulary)?;
        if scores.len() != self.vocabulary.len() {
            return Err(MatchError::ScoreCount {
                expected: self.vocabulary.len(),
                actual: scores.len(),
            });
        }
        Ok(scores)
    }
}

/// First index holding the maximum score; NaN never wins.
fn best(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((i, score));
        }
    }
    best
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Returns fixed per-label scores; labels not listed score `rest`.
    pub struct FixedScorer {
        pub scores: Vec<(String, f32)>,
        pub rest: f32,
        pub calls: Arc<AtomicUsize>,
    }

    impl FixedScorer {
        pub fn new(scores: &[(&str, f32)], rest: f32) -> Self {
            Self {
                scores: scores.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
                rest,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl LabelScorer for FixedScorer {
        fn score(&self, _image: &DynamicImage, labels: &[String]) -> Result<Vec<f32>, ScoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(labels
                .iter()
                .map(|l| {
                    self.scores
                        .iter()
                        .find(|(n, _)| n == l)
                        .map_or(self.rest, |(_, s)| *s)
                })
                .collect())
        }
    }

    pub struct FailingScorer;

    impl LabelScorer for FailingScorer {
        fn score(&self, _image: &DynamicImage, _labels: &[String]) -> Result<Vec<f32>, ScoreError> {
            Err(ScoreError::InferenceFailed("model not loaded".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::{FailingScorer, FixedScorer};
    use super::*;

    fn table() -> LandmarkTable {
        LandmarkTable::embedded().unwrap()
    }

    fn image() -> DynamicImage {
        DynamicImage::new_rgb8(8, 8)
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn test_softmax_large_logits_stable() {
        let p = softmax(&[1000.0, 1000.0]);
        assert!((p[0] - 0.5).abs() < 1e-6);
        assert!(softmax(&[]).is_empty());
    }

    #[test]
    fn test_detect_above_threshold() {
        let scorer = FixedScorer::new(&[("petronas towers", 0.42)], 0.01);
        let matcher = LandmarkMatcher::new(Box::new(scorer), &table());
        let m = matcher.detect(&image()).unwrap();
        assert_eq!(m.name, "petronas towers");
        assert!((m.score - 0.42).abs() < 1e-6);
    }

    #[test]
    fn test_detect_below_threshold() {
        let scorer = FixedScorer::new(&[("petronas towers", 0.05)], 0.01);
        let matcher = LandmarkMatcher::new(Box::new(scorer), &table());
        assert!(matcher.detect(&image()).is_none());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let scorer = FixedScorer::new(&[("big ben", 0.15)], 0.01);
        let matcher = LandmarkMatcher::new(Box::new(scorer), &table()).with_threshold(0.15);
        assert_eq!(matcher.detect(&image()).unwrap().name, "big ben");
    }

    #[test]
    fn test_tie_goes_to_first_in_vocabulary() {
        // "klcc" precedes "taj mahal" in the table.
        let scorer = FixedScorer::new(&[("taj mahal", 0.3), ("klcc", 0.3)], 0.0);
        let matcher = LandmarkMatcher::new(Box::new(scorer), &table());
        assert_eq!(matcher.detect(&image()).unwrap().name, "klcc");
    }

    #[test]
    fn test_rank_orders_descending_and_stable() {
        let scorer = FixedScorer::new(&[("louvre", 0.5), ("taj mahal", 0.2), ("klcc", 0.2)], 0.0);
        let matcher = LandmarkMatcher::new(Box::new(scorer), &table());
        let ranked = matcher.rank(&image()).unwrap();
        let top: Vec<&str> = ranked.iter().take(3).map(|m| m.name.as_str()).collect();
        assert_eq!(top, vec!["louvre", "klcc", "taj mahal"]);
        assert_eq!(ranked.len(), table().len());
    }

    #[test]
    fn test_nan_scores_never_win() {
        assert_eq!(best(&[f32::NAN, 0.2, 0.1]), Some((1, 0.2)));
        assert_eq!(best(&[f32::NAN]), None);
        assert_eq!(best(&[]), None);
    }

    #[test]
    fn test_scorer_failure_is_no_match() {
        let matcher = LandmarkMatcher::new(Box::new(FailingScorer), &table());
        assert!(matcher.detect(&image()).is_none());
        assert!(matches!(matcher.rank(&image()), Err(MatchError::Score(_))));
    }

    struct ShortScorer;

    impl LabelScorer for ShortScorer {
        fn score(&self, _image: &DynamicImage, _labels: &[String]) -> Result<Vec<f32>, ScoreError> {
            Ok(vec![1.0])
        }
    }

    #[test]
    fn test_score_count_mismatch() {
        let matcher = LandmarkMatcher::new(Box::new(ShortScorer), &table());
        assert!(matches!(
            matcher.rank(&image()),
            Err(MatchError::ScoreCount { actual: 1, .. })
        ));
        assert!(matcher.detect(&image()).is_none());
    }

    #[test]
    fn test_empty_vocabulary() {
        let empty = LandmarkTable::from_toml("").unwrap();
        let matcher = LandmarkMatcher::new(Box::new(FailingScorer), &empty);
        assert!(matcher.detect(&image()).is_none());
    }
}
