//! Domain records shared by the store, the tools and the screening workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ordered pipeline position of a company, from sourcing (L0) to closing (L5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    L0,
    L1,
    L2,
    L3,
    L4,
    L5,
}

impl Stage {
    pub const ALL: [Stage; 6] = [Stage::L0, Stage::L1, Stage::L2, Stage::L3, Stage::L4, Stage::L5];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::L0 => "L0",
            Stage::L1 => "L1",
            Stage::L2 => "L2",
            Stage::L3 => "L3",
            Stage::L4 => "L4",
            Stage::L5 => "L5",
        }
    }

    /// The following stage, or `None` at L5.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::L0 => Some(Stage::L1),
            Stage::L1 => Some(Stage::L2),
            Stage::L2 => Some(Stage::L3),
            Stage::L3 => Some(Stage::L4),
            Stage::L4 => Some(Stage::L5),
            Stage::L5 => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "L0" => Ok(Stage::L0),
            "L1" => Ok(Stage::L1),
            "L2" => Ok(Stage::L2),
            "L3" => Ok(Stage::L3),
            "L4" => Ok(Stage::L4),
            "L5" => Ok(Stage::L5),
            other => Err(format!("unknown stage '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct YearlyFinancials {
    pub year: i32,
    pub revenue: Option<f64>,
    pub ebitda: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub sector: Option<String>,
    pub segment: Option<String>,
    pub country: Option<String>,
    pub financials: Vec<YearlyFinancials>,
    pub enterprise_value: Option<f64>,
    pub focus: Option<String>,
    pub stage: Stage,
    /// Free-form status set by promotions, e.g. "screening_passed".
    pub status: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Company {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            sector: None,
            segment: None,
            country: None,
            financials: Vec::new(),
            enterprise_value: None,
            focus: None,
            stage: Stage::L0,
            status: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Financials for the most recent year that has any figure.
    pub fn latest_financials(&self) -> Option<&YearlyFinancials> {
        self.financials
            .iter()
            .filter(|f| f.revenue.is_some() || f.ebitda.is_some())
            .max_by_key(|f| f.year)
    }

    pub fn latest_revenue(&self) -> Option<f64> {
        self.latest_financials().and_then(|f| f.revenue)
    }

    pub fn latest_ebitda(&self) -> Option<f64> {
        self.latest_financials().and_then(|f| f.ebitda)
    }
}

/// A closed transaction kept for benchmarking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoricalDeal {
    pub id: Uuid,
    pub name: String,
    pub target: Option<String>,
    pub acquirer: Option<String>,
    pub sector: Option<String>,
    pub announced_year: Option<i32>,
    pub enterprise_value: Option<f64>,
    pub revenue: Option<f64>,
    pub ebitda: Option<f64>,
    pub description: Option<String>,
}

impl HistoricalDeal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            target: None,
            acquirer: None,
            sector: None,
            announced_year: None,
            enterprise_value: None,
            revenue: None,
            ebitda: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Company,
    HistoricalDeal,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Company => "company",
            EntityKind::HistoricalDeal => "historical_deal",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "company" => Ok(EntityKind::Company),
            "historical_deal" | "deal" => Ok(EntityKind::HistoricalDeal),
            other => Err(format!("unknown entity kind '{}'", other)),
        }
    }
}

/// Output of the fuzzy matcher. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub similarity: f64,
}

/// A user-authored natural-language screening rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Criterion {
    pub id: Uuid,
    pub name: String,
    pub prompt: String,
}

impl Criterion {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            prompt: prompt.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScreeningState {
    Pending,
    Completed,
    Failed,
}

impl ScreeningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreeningState::Pending => "pending",
            ScreeningState::Completed => "completed",
            ScreeningState::Failed => "failed",
        }
    }
}

impl FromStr for ScreeningState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScreeningState::Pending),
            "completed" => Ok(ScreeningState::Completed),
            "failed" => Ok(ScreeningState::Failed),
            other => Err(format!("unknown screening state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScreeningResult {
    Pass,
    Fail,
    Inconclusive,
    Error,
}

impl ScreeningResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreeningResult::Pass => "pass",
            ScreeningResult::Fail => "fail",
            ScreeningResult::Inconclusive => "inconclusive",
            ScreeningResult::Error => "error",
        }
    }
}

impl FromStr for ScreeningResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pass" | "passed" => Ok(ScreeningResult::Pass),
            "fail" | "failed" => Ok(ScreeningResult::Fail),
            "inconclusive" | "unknown" => Ok(ScreeningResult::Inconclusive),
            "error" => Ok(ScreeningResult::Error),
            other => Err(format!("unknown screening result '{}'", other)),
        }
    }
}

/// Evaluation of one criterion against one company.
///
/// Fields are private to the crate so the only way to change state is through
/// the transition methods, which keep `pending ⇒ result = None` and
/// `completed ⇒ result = Some(_)` true at all times.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "ScreeningRecord")]
pub struct Screening {
    pub id: Uuid,
    pub company_id: Uuid,
    pub criteria_id: Uuid,
    pub(crate) state: ScreeningState,
    pub(crate) result: Option<ScreeningResult>,
    pub(crate) remarks: Option<String>,
    /// Regenerated on every reset; a dispatch only writes back if it still matches.
    pub(crate) run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wire shape of a screening; validated through [`Screening::from_parts`].
#[derive(Deserialize)]
struct ScreeningRecord {
    id: Uuid,
    company_id: Uuid,
    criteria_id: Uuid,
    state: ScreeningState,
    #[serde(default)]
    result: Option<ScreeningResult>,
    #[serde(default)]
    remarks: Option<String>,
    run_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ScreeningRecord> for Screening {
    type Error = String;

    fn try_from(r: ScreeningRecord) -> Result<Self, Self::Error> {
        Screening::from_parts(
            r.id,
            r.company_id,
            r.criteria_id,
            r.state,
            r.result,
            r.remarks,
            r.run_id,
            r.created_at,
            r.updated_at,
        )
    }
}

impl Screening {
    pub fn pending(company_id: Uuid, criteria_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company_id,
            criteria_id,
            state: ScreeningState::Pending,
            result: None,
            remarks: None,
            run_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a row read back from a store. Rejects combinations that break
    /// the state/result invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: Uuid,
        company_id: Uuid,
        criteria_id: Uuid,
        state: ScreeningState,
        result: Option<ScreeningResult>,
        remarks: Option<String>,
        run_id: Uuid,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, String> {
        match (state, result) {
            (ScreeningState::Pending, Some(_)) => {
                return Err(format!("screening {} is pending but carries a result", id))
            }
            (ScreeningState::Completed, None) => {
                return Err(format!("screening {} is completed without a result", id))
            }
            _ => {}
        }
        Ok(Self {
            id,
            company_id,
            criteria_id,
            state,
            result,
            remarks,
            run_id,
            created_at,
            updated_at,
        })
    }

    pub fn state(&self) -> ScreeningState {
        self.state
    }

    pub fn result(&self) -> Option<ScreeningResult> {
        self.result
    }

    pub fn remarks(&self) -> Option<&str> {
        self.remarks.as_deref()
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_pending(&self) -> bool {
        self.state == ScreeningState::Pending
    }

    /// Back to pending for a fresh evaluation; clears the previous outcome.
    pub fn reset_pending(&mut self) {
        self.state = ScreeningState::Pending;
        self.result = None;
        self.remarks = None;
        self.run_id = Uuid::new_v4();
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self, result: ScreeningResult, remarks: Option<String>) {
        self.state = ScreeningState::Completed;
        self.result = Some(result);
        self.remarks = remarks;
        self.updated_at = Utc::now();
    }

    /// Execution or transport failure. Not a business "fail".
    pub fn fail(&mut self, remarks: impl Into<String>) {
        self.state = ScreeningState::Failed;
        self.result = Some(ScreeningResult::Error);
        self.remarks = Some(remarks.into());
        self.updated_at = Utc::now();
    }

    pub fn apply(&mut self, outcome: &ScreeningOutcome) {
        match outcome {
            ScreeningOutcome::Completed { result, remarks } => {
                self.complete(*result, remarks.clone())
            }
            ScreeningOutcome::Failed { remarks } => self.fail(remarks.clone()),
        }
    }
}

/// Terminal write-back of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreeningOutcome {
    Completed {
        result: ScreeningResult,
        remarks: Option<String>,
    },
    Failed {
        remarks: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(format!("unknown processing status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkedEntity {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeetingNote {
    pub id: Uuid,
    pub file_name: String,
    pub raw_text: String,
    pub structured_json: Option<serde_json::Value>,
    pub tags: Vec<String>,
    pub matched_companies: Vec<LinkedEntity>,
    pub processing_status: ProcessingStatus,
    pub created_at: DateTime<Utc>,
}

impl MeetingNote {
    pub fn new(file_name: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            raw_text: raw_text.into(),
            structured_json: None,
            tags: Vec::new(),
            matched_companies: Vec::new(),
            processing_status: ProcessingStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Excerpt of a meeting note attached to a company or historical deal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityNote {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub entity_kind: EntityKind,
    pub meeting_note_id: Option<Uuid>,
    pub excerpt: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: Uuid,
    pub company_id: Uuid,
    pub action: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(company_id: Uuid, action: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id,
            action: action.into(),
            detail,
            created_at: Utc::now(),
        }
    }
}

/// Cached record from the external company-search provider, keyed by its id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompanyProfile {
    pub provider_id: String,
    pub name: String,
    pub domain: Option<String>,
    pub country: Option<String>,
    pub sector: Option<String>,
    pub employees: Option<u64>,
    pub revenue: Option<f64>,
    pub description: Option<String>,
    #[serde(default)]
    pub raw: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_parse() {
        assert!(Stage::L0 < Stage::L1);
        assert_eq!(Stage::L4.next(), Some(Stage::L5));
        assert_eq!(Stage::L5.next(), None);
        assert_eq!("l3".parse::<Stage>().unwrap(), Stage::L3);
        assert!("L9".parse::<Stage>().is_err());
    }

    #[test]
    fn test_screening_transitions_keep_invariant() {
        let mut row = Screening::pending(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(row.result(), None);

        row.complete(ScreeningResult::Fail, Some("EBITDA below floor".into()));
        assert_eq!(row.state(), ScreeningState::Completed);
        assert_eq!(row.result(), Some(ScreeningResult::Fail));

        let previous_run = row.run_id();
        row.reset_pending();
        assert!(row.is_pending());
        assert_eq!(row.result(), None);
        assert_eq!(row.remarks(), None);
        assert_ne!(row.run_id(), previous_run);

        row.fail("timeout");
        assert_eq!(row.state(), ScreeningState::Failed);
    }

    #[test]
    fn test_from_parts_rejects_broken_rows() {
        let now = Utc::now();
        let broken = Screening::from_parts(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            ScreeningState::Completed,
            None,
            None,
            Uuid::new_v4(),
            now,
            now,
        );
        assert!(broken.is_err());
    }

    #[test]
    fn test_deserialize_validates_state_and_result() {
        let mut row = Screening::pending(Uuid::new_v4(), Uuid::new_v4());
        row.complete(ScreeningResult::Pass, Some("meets threshold".into()));

        let value = serde_json::to_value(&row).unwrap();
        let back: Screening = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(back, row);

        let mut missing_result = value.clone();
        missing_result["result"] = serde_json::Value::Null;
        let err = serde_json::from_value::<Screening>(missing_result).unwrap_err();
        assert!(err.to_string().contains("completed without a result"));

        let mut pending_with_result = value;
        pending_with_result["state"] = serde_json::to_value(ScreeningState::Pending).unwrap();
        assert!(serde_json::from_value::<Screening>(pending_with_result).is_err());
    }

    #[test]
    fn test_latest_financials_skips_empty_years() {
        let mut company = Company::new("Acme");
        company.financials = vec![
            YearlyFinancials { year: 2022, revenue: Some(10.0), ebitda: Some(2.0) },
            YearlyFinancials { year: 2024, revenue: None, ebitda: None },
            YearlyFinancials { year: 2023, revenue: Some(12.0), ebitda: Some(2.5) },
        ];
        assert_eq!(company.latest_revenue(), Some(12.0));
    }
}
