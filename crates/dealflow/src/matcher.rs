//! Fuzzy entity matching: link a free-text name to a company or historical deal.
//!
//! Every call reads the full candidate list from the store. Fine for pipelines
//! of a few thousand entities; beyond that a trigram index in the store would
//! be needed.

use uuid::Uuid;

use crate::store::{DealStore, StoreResult};
use crate::types::{EntityKind, MatchResult};

pub const DEFAULT_THRESHOLD: f64 = 0.3;

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Similarity in `[0, 1]`: `1 - levenshtein / max(char_len)`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - strsim::levenshtein(&a, &b) as f64 / longest as f64
}

/// Pick the closest candidate to `search`.
///
/// An exact (normalized) hit returns at once with similarity 1. Otherwise the
/// first candidate with the smallest relative edit distance wins, and is kept
/// only if `1 - similarity <= threshold`.
pub fn best_match(
    search: &str,
    candidates: &[(Uuid, String, EntityKind)],
    threshold: f64,
) -> Option<MatchResult> {
    let needle = normalize(search);
    if needle.is_empty() {
        return None;
    }

    let mut best: Option<(&(Uuid, String, EntityKind), f64)> = None;
    for candidate in candidates {
        let name = normalize(&candidate.1);
        if name == needle {
            return Some(MatchResult {
                id: candidate.0,
                name: candidate.1.clone(),
                kind: candidate.2,
                similarity: 1.0,
            });
        }
        let longest = needle.chars().count().max(name.chars().count());
        let score = 1.0 - strsim::levenshtein(&needle, &name) as f64 / longest as f64;
        match best {
            Some((_, current)) if score <= current => {}
            _ => best = Some((candidate, score)),
        }
    }

    let (candidate, score) = best?;
    if 1.0 - score <= threshold {
        Some(MatchResult {
            id: candidate.0,
            name: candidate.1.clone(),
            kind: candidate.2,
            similarity: score,
        })
    } else {
        None
    }
}

/// Search companies first, then historical deals.
pub async fn find_best_match(
    store: &dyn DealStore,
    search_name: &str,
    threshold: f64,
) -> StoreResult<Option<MatchResult>> {
    let mut candidates: Vec<(Uuid, String, EntityKind)> = store
        .company_names()
        .await?
        .into_iter()
        .map(|(id, name)| (id, name, EntityKind::Company))
        .collect();
    candidates.extend(
        store
            .historical_deal_names()
            .await?
            .into_iter()
            .map(|(id, name)| (id, name, EntityKind::HistoricalDeal)),
    );

    let result = best_match(search_name, &candidates, threshold);
    tracing::debug!(
        search = search_name,
        candidates = candidates.len(),
        matched = result.as_ref().map(|m| m.name.as_str()).unwrap_or("-"),
        "Fuzzy match"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::{Company, HistoricalDeal};

    fn candidates(names: &[&str]) -> Vec<(Uuid, String, EntityKind)> {
        names
            .iter()
            .map(|n| (Uuid::new_v4(), n.to_string(), EntityKind::Company))
            .collect()
    }

    #[test]
    fn test_exact_match_ignores_case_and_whitespace() {
        let list = candidates(&["Nordic Logistics AB", "Acme Corp"]);
        let hit = best_match("  acme corp ", &list, 0.0).unwrap();
        assert_eq!(hit.id, list[1].0);
        assert_eq!(hit.similarity, 1.0);
    }

    #[test]
    fn test_threshold_zero_only_accepts_exact() {
        let list = candidates(&["Acme Corp"]);
        assert!(best_match("Acme Crop", &list, 0.0).is_none());
        assert!(best_match("Acme Crop", &list, 0.3).is_some());
    }

    #[test]
    fn test_symmetric_under_normalization() {
        let list = candidates(&["Helios Energy", "Hermes Freight"]);
        let a = best_match("HELIOS ENERGIE", &list, 0.3).unwrap();
        let b = best_match("  helios energie", &list, 0.3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_candidates_and_empty_search() {
        assert!(best_match("anything", &[], 0.3).is_none());
        assert!(best_match("   ", &candidates(&["Acme"]), 1.0).is_none());
    }

    #[test]
    fn test_first_seen_wins_ties() {
        let list = candidates(&["abcx", "abcy"]);
        let hit = best_match("abcz", &list, 0.5).unwrap();
        assert_eq!(hit.id, list[0].0);
        assert!((hit.similarity - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_far_names_rejected() {
        let list = candidates(&["Completely Different"]);
        assert!(best_match("Acme", &list, 0.3).is_none());
    }

    #[tokio::test]
    async fn test_find_best_match_spans_companies_and_deals() {
        let store = InMemoryStore::new();
        store.upsert_company(Company::new("Acme Corp")).await.unwrap();
        let deal = store
            .upsert_historical_deal(HistoricalDeal::new("Project Falcon"))
            .await
            .unwrap();

        let hit = find_best_match(&store, "project falcon", DEFAULT_THRESHOLD)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, deal.id);
        assert_eq!(hit.kind, EntityKind::HistoricalDeal);
    }
}
