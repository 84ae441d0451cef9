//! Candidate scoring and selection

use super::CandidateMatch;
use crate::normalize::{normalize_author, normalize_title};
use std::collections::HashSet;

/// Description length that earns a full description score
pub const TARGET_DESC_LEN: f64 = 800.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Confidence {
    /// `identity * description`
    pub overall: f64,
    pub identity: f64,
    pub description: f64,
}

fn tokens(value: Option<String>) -> HashSet<String> {
    value
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Jaccard similarity of normalized author tokens
pub fn author_similarity(query: &str, candidate: &str) -> f64 {
    let query = tokens(normalize_author(query));
    let candidate = tokens(normalize_author(candidate));
    if query.is_empty() || candidate.is_empty() {
        return 0.0;
    }
    let overlap = query.intersection(&candidate).count();
    let union = query.union(&candidate).count();
    overlap as f64 / union as f64
}

/// Share of the query's title tokens found in the candidate title
pub fn title_token_overlap(query: &str, candidate: &str) -> f64 {
    let query = tokens(normalize_title(query));
    let candidate = tokens(normalize_title(candidate));
    if query.is_empty() || candidate.is_empty() {
        return 0.0;
    }
    let overlap = query.intersection(&candidate).count();
    overlap as f64 / query.len() as f64
}

/// Longer descriptions score higher, capped at 1.0
pub fn desc_score(description: Option<&str>) -> f64 {
    match description {
        Some(text) if !text.is_empty() => {
            (text.chars().count() as f64 / TARGET_DESC_LEN).min(1.0)
        }
        _ => 0.0,
    }
}

pub fn confidence_score(
    query_title: &str,
    query_author: &str,
    candidate_title: Option<&str>,
    candidate_author: Option<&str>,
    description: Option<&str>,
) -> Confidence {
    let author = author_similarity(query_author, candidate_author.unwrap_or_default());
    let title = title_token_overlap(query_title, candidate_title.unwrap_or_default());
    let identity = (author + title) / 2.0;
    let description = desc_score(description);
    Confidence {
        overall: identity * description,
        identity,
        description,
    }
}

/// Pick the candidate with the highest confidence.
///
/// Ties keep the first-seen candidate. Missing or NaN confidences rank
/// below every real score.
pub fn select_best(candidates: &[CandidateMatch]) -> Option<&CandidateMatch> {
    let score = |c: &CandidateMatch| c.confidence.filter(|v| !v.is_nan());

    let mut iter = candidates.iter();
    let mut best = iter.next()?;
    let mut best_score = score(best);
    for candidate in iter {
        let candidate_score = score(candidate);
        let better = match (candidate_score, best_score) {
            (Some(value), Some(current)) => value > current,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if better {
            best = candidate;
            best_score = candidate_score;
        }
    }
    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, confidence: Option<f64>) -> CandidateMatch {
        CandidateMatch {
            result_id: id.to_string(),
            title: None,
            author: None,
            description: None,
            categories: Vec::new(),
            confidence,
            source: "test".to_string(),
            identity_score: None,
            desc_score: None,
        }
    }

    #[test]
    fn test_select_best_stable_tie_break() {
        let candidates = vec![
            candidate("a", Some(0.2)),
            candidate("b", Some(0.9)),
            candidate("c", Some(0.9)),
        ];
        assert_eq!(select_best(&candidates).unwrap().result_id, "b");
    }

    #[test]
    fn test_select_best_empty() {
        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn test_missing_and_nan_rank_lowest() {
        let candidates = vec![
            candidate("missing", None),
            candidate("nan", Some(f64::NAN)),
            candidate("zero", Some(0.0)),
        ];
        assert_eq!(select_best(&candidates).unwrap().result_id, "zero");

        let unscored = vec![candidate("first", None), candidate("second", None)];
        assert_eq!(select_best(&unscored).unwrap().result_id, "first");
    }

    #[test]
    fn test_negative_confidence_beats_missing() {
        let candidates = vec![
            candidate("missing", None),
            candidate("negative", Some(-2.5)),
            candidate("nan", Some(f64::NAN)),
        ];
        assert_eq!(select_best(&candidates).unwrap().result_id, "negative");
    }

    #[test]
    fn test_author_similarity() {
        assert_eq!(author_similarity("Jane Doe", "Jane Doe"), 1.0);
        let partial = author_similarity("Jane Doe", "Jane A. Doe");
        assert!(partial > 0.0 && partial < 1.0);
        assert_eq!(author_similarity("", "Jane Doe"), 0.0);
    }

    #[test]
    fn test_title_overlap_ignores_case_and_series_markers() {
        assert_eq!(title_token_overlap("The Divine Comedy", "the divine comedy"), 1.0);
        assert_eq!(title_token_overlap("Dune (Book 1)", "Dune"), 1.0);
    }

    #[test]
    fn test_desc_score_caps_at_one() {
        assert_eq!(desc_score(Some(&"a".repeat(2000))), 1.0);
        assert_eq!(desc_score(Some(&"a".repeat(400))), 0.5);
        assert_eq!(desc_score(None), 0.0);
    }

    #[test]
    fn test_confidence_combines() {
        let description = "a".repeat(800);
        let score = confidence_score(
            "Great Book",
            "Jane Doe",
            Some("Great Book"),
            Some("Jane Doe"),
            Some(&description),
        );
        assert_eq!(score.description, 1.0);
        assert_eq!(score.identity, 1.0);
        assert_eq!(score.overall, 1.0);
    }
}
