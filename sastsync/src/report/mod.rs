pub mod aggregate;
pub mod raw;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use aggregate::aggregate;
pub use raw::RawNode;

pub type IssueId = u64;

/// Display names for severity levels 0 through 5.
pub const SEVERITY_NAMES: [&str; 6] = [
    "Information",
    "Very Low",
    "Low",
    "Medium",
    "High",
    "Very High",
];

pub fn severity_name(level: u8) -> &'static str {
    SEVERITY_NAMES
        .get(usize::from(level))
        .copied()
        .unwrap_or("Unknown")
}

/// A detailed report folded into cross-indexed summaries. Every issue id
/// listed by an index has an entry in `flaws`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedReport {
    pub scan: ScanSummary,
    pub severities: BTreeMap<u8, SeveritySummary>,
    pub categories: BTreeMap<u32, CategorySummary>,
    pub cwes: BTreeMap<u32, CweSummary>,
    pub flaws: BTreeMap<IssueId, FlawRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub app_id: String,
    pub app_name: String,
    pub sandbox_id: Option<String>,
    pub scan_name: String,
    pub policy_compliance_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeveritySummary {
    pub name: String,
    pub count: usize,
    pub flaws: Vec<IssueId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub name: String,
    pub pci_related: bool,
    pub description: String,
    pub recommendations: Vec<String>,
    pub count: usize,
    pub flaws: Vec<IssueId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CweSummary {
    pub name: String,
    pub pci_related: bool,
    pub owasp: Option<String>,
    pub owasp2013: Option<String>,
    pub sans: Option<String>,
    pub description: String,
    pub count: usize,
    pub flaws: Vec<IssueId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub path: String,
    pub line: Option<u32>,
    pub scope: String,
    pub function_prototype: String,
}

/// One comment on a flaw. `seq` is the position in which the report
/// listed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub date: String,
    pub description: String,
    pub user: String,
    pub seq: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationEntry {
    pub action: String,
    pub date: String,
    pub description: String,
    pub user: String,
    pub seq: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlawRecord {
    pub issue_id: IssueId,
    pub severity: u8,
    pub category_id: u32,
    pub category_name: String,
    pub cwe_id: u32,
    pub cwe_name: String,
    pub module: String,
    pub flaw_type: String,
    pub description: String,
    pub remediation_status: String,
    pub mitigation_status: String,
    pub mitigation_status_desc: String,
    pub affects_policy_compliance: bool,
    pub source: SourceLocation,
    pub cia_impact: String,
    pub grace_period_expires: Option<String>,
    pub date_first_occurrence: Option<String>,
    pub exploit_level: Option<String>,
    /// Newest first.
    pub comments: Vec<HistoryEntry>,
    /// Newest first.
    pub mitigations: Vec<MitigationEntry>,
}

impl FlawRecord {
    /// Fixed by code or covered by an accepted mitigation.
    pub fn is_resolved(&self) -> bool {
        self.remediation_status.eq_ignore_ascii_case("fixed")
            || self.mitigation_status.eq_ignore_ascii_case("accepted")
    }

    /// The ticket key from the first comment, in report order, that starts
    /// with `prefix`.
    pub fn ticket_key(&self, prefix: &str) -> Option<&str> {
        self.comments
            .iter()
            .filter(|c| c.description.starts_with(prefix))
            .min_by_key(|c| c.seq)
            .map(|c| c.description[prefix.len()..].trim())
            .filter(|key| !key.is_empty())
    }
}

impl AggregatedReport {
    pub fn total_flaws(&self) -> usize {
        self.flaws.len()
    }

    pub fn policy_affecting(&self) -> impl Iterator<Item = &FlawRecord> {
        self.flaws.values().filter(|f| f.affects_policy_compliance)
    }
}
