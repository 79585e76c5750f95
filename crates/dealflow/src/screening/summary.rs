//! Derived screening views. Pure functions of the current rows; nothing here
//! is stored or updated incrementally.

use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::types::{Screening, ScreeningResult, ScreeningState};

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CompanyScreeningSummary {
    pub company_id: Uuid,
    pub total: usize,
    /// Rows no longer pending. Includes `failed` rows.
    pub completed: usize,
    pub passed: usize,
    /// Business "fail" results only.
    pub failed: usize,
    pub inconclusive: usize,
    /// Rows whose evaluation could not run (state `failed`).
    pub errored: usize,
    pub pending: usize,
    pub all_passed: bool,
}

impl CompanyScreeningSummary {
    pub fn is_resolved(&self) -> bool {
        self.pending == 0 && self.completed == self.total
    }
}

/// Count the given rows, whatever company they belong to.
pub fn aggregate(company_id: Uuid, rows: &[&Screening]) -> CompanyScreeningSummary {
    let mut summary = CompanyScreeningSummary {
        company_id,
        total: rows.len(),
        ..Default::default()
    };
    for row in rows {
        match row.state() {
            ScreeningState::Pending => summary.pending += 1,
            ScreeningState::Completed => summary.completed += 1,
            ScreeningState::Failed => {
                summary.completed += 1;
                summary.errored += 1;
            }
        }
        if row.state() == ScreeningState::Completed {
            match row.result() {
                Some(ScreeningResult::Pass) => summary.passed += 1,
                Some(ScreeningResult::Fail) => summary.failed += 1,
                Some(ScreeningResult::Inconclusive) => summary.inconclusive += 1,
                Some(ScreeningResult::Error) | None => {}
            }
        }
    }
    summary.all_passed = summary.completed == summary.total && summary.passed == summary.total;
    summary
}

/// Summary of one company's rows; rows of other companies are ignored.
pub fn derive_summary(company_id: Uuid, rows: &[Screening]) -> CompanyScreeningSummary {
    let own: Vec<&Screening> = rows.iter().filter(|r| r.company_id == company_id).collect();
    aggregate(company_id, &own)
}

/// Live progress across every company that has screening rows.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ScreeningProgress {
    /// Companies with pending rows.
    pub in_progress: Vec<CompanyScreeningSummary>,
    /// Fully resolved and every criterion passed.
    pub passed: Vec<CompanyScreeningSummary>,
    /// Fully resolved with at least one non-pass.
    pub not_passed: Vec<CompanyScreeningSummary>,
}

impl ScreeningProgress {
    pub fn company_count(&self) -> usize {
        self.in_progress.len() + self.passed.len() + self.not_passed.len()
    }
}

/// Partition companies by progress. Buckets are ordered by company id so the
/// result does not depend on row order.
pub fn derive_progress(rows: &[Screening]) -> ScreeningProgress {
    let mut by_company: BTreeMap<Uuid, Vec<&Screening>> = BTreeMap::new();
    for row in rows {
        by_company.entry(row.company_id).or_default().push(row);
    }

    let mut progress = ScreeningProgress::default();
    for (company_id, rows) in by_company {
        let summary = aggregate(company_id, &rows);
        if !summary.is_resolved() {
            progress.in_progress.push(summary);
        } else if summary.all_passed {
            progress.passed.push(summary);
        } else {
            progress.not_passed.push(summary);
        }
    }
    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    fn completed(company: Uuid, result: ScreeningResult) -> Screening {
        let mut row = Screening::pending(company, Uuid::new_v4());
        row.complete(result, None);
        row
    }

    #[test]
    fn test_summary_counts() {
        let company = Uuid::new_v4();
        let mut errored = Screening::pending(company, Uuid::new_v4());
        errored.fail("timeout");
        let rows = vec![
            completed(company, ScreeningResult::Pass),
            completed(company, ScreeningResult::Fail),
            completed(company, ScreeningResult::Inconclusive),
            errored,
            Screening::pending(company, Uuid::new_v4()),
            completed(Uuid::new_v4(), ScreeningResult::Pass),
        ];
        let s = derive_summary(company, &rows);
        assert_eq!(s.total, 5);
        assert_eq!(s.completed, 4);
        assert_eq!(s.passed, 1);
        assert_eq!(s.failed, 1);
        assert_eq!(s.inconclusive, 1);
        assert_eq!(s.errored, 1);
        assert_eq!(s.pending, 1);
        assert!(!s.all_passed);
    }

    #[test]
    fn test_empty_rows_summary() {
        let s = derive_summary(Uuid::new_v4(), &[]);
        assert_eq!(s.total, 0);
        assert!(s.all_passed);
    }

    #[test]
    fn test_progress_buckets() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![
            completed(a, ScreeningResult::Pass),
            completed(a, ScreeningResult::Pass),
            completed(b, ScreeningResult::Pass),
            Screening::pending(b, Uuid::new_v4()),
            completed(c, ScreeningResult::Fail),
        ];
        let progress = derive_progress(&rows);
        assert_eq!(progress.passed.iter().map(|s| s.company_id).collect::<Vec<_>>(), vec![a]);
        assert_eq!(progress.in_progress.iter().map(|s| s.company_id).collect::<Vec<_>>(), vec![b]);
        assert_eq!(progress.not_passed.iter().map(|s| s.company_id).collect::<Vec<_>>(), vec![c]);
    }

    #[test]
    fn test_views_ignore_row_order() {
        let companies: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let results = [ScreeningResult::Pass, ScreeningResult::Fail, ScreeningResult::Inconclusive];
        let mut rows = Vec::new();
        for (i, company) in companies.iter().enumerate() {
            for j in 0..3 {
                if (i + j) % 4 == 0 {
                    rows.push(Screening::pending(*company, Uuid::new_v4()));
                } else {
                    rows.push(completed(*company, results[(i * j) % 3]));
                }
            }
        }

        let expected_progress = derive_progress(&rows);
        let expected_summary = derive_summary(companies[1], &rows);
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            rows.shuffle(&mut rng);
            assert_eq!(derive_progress(&rows), expected_progress);
            assert_eq!(derive_summary(companies[1], &rows), expected_summary);
        }
    }
}
