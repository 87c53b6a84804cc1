pub mod jira;
pub mod sync;
pub mod tracker;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::report::{AggregatedReport, FlawRecord, IssueId};

pub use sync::{SyncOutcome, apply_actions};
pub use tracker::{IssueTracker, create_tracker};

/// Which flaws are eligible for ticket synchronisation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFilter {
    #[default]
    All,
    PolicyAffecting,
}

impl SyncFilter {
    pub fn admits(self, flaw: &FlawRecord) -> bool {
        match self {
            SyncFilter::All => true,
            SyncFilter::PolicyAffecting => flaw.affects_policy_compliance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Update,
    Close,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Create => write!(f, "create"),
            ActionKind::Update => write!(f, "update"),
            ActionKind::Close => write!(f, "close"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketAction {
    pub flaw_issue_id: IssueId,
    pub kind: ActionKind,
    pub existing_ticket_key: Option<String>,
}

/// The comment prefix under which a tracker's ticket key is recorded on a
/// flaw, e.g. `"JIRA Issue Key: "`.
pub fn key_prefix(tracker_type: &str) -> String {
    format!("{} Issue Key: ", tracker_type.to_uppercase())
}

/// Decide, per flaw, what the tracker needs so that it reflects the report.
/// Flaws are visited in issue id order.
///
/// | ticket key | resolved | action    |
/// |------------|----------|-----------|
/// | absent     | no       | create    |
/// | absent     | yes      | none      |
/// | present    | yes      | close     |
/// | present    | no       | update    |
pub fn reconcile(
    report: &AggregatedReport,
    filter: SyncFilter,
    key_prefix: &str,
) -> Vec<TicketAction> {
    report
        .flaws
        .values()
        .filter(|flaw| filter.admits(flaw))
        .filter_map(|flaw| decide(flaw, key_prefix))
        .collect()
}

fn decide(flaw: &FlawRecord, key_prefix: &str) -> Option<TicketAction> {
    let key = flaw.ticket_key(key_prefix).map(String::from);
    let kind = match (key.is_some(), flaw.is_resolved()) {
        (false, false) => ActionKind::Create,
        (false, true) => return None,
        (true, true) => ActionKind::Close,
        (true, false) => ActionKind::Update,
    };
    Some(TicketAction {
        flaw_issue_id: flaw.issue_id,
        kind,
        existing_ticket_key: key,
    })
}

pub fn issue_summary(flaw: &FlawRecord) -> String {
    format!("Veracode Flaw: {} Flaw {}", flaw.category_name, flaw.issue_id)
}

pub fn issue_description(flaw: &FlawRecord) -> String {
    let location = match flaw.source.line {
        Some(line) => format!("{}{}:{line}", flaw.source.path, flaw.source.file),
        None => format!("{}{}", flaw.source.path, flaw.source.file),
    };
    let mut out = String::new();
    out.push_str(&format!("CWE: CWE-{} {}\n", flaw.cwe_id, flaw.cwe_name));
    out.push_str(&format!("Severity: {}\n", crate::report::severity_name(flaw.severity)));
    out.push_str(&format!("Module: {}\n", flaw.module));
    out.push_str(&format!("Source: {location}\n"));
    out.push_str(&format!("Attack Vector: {}\n", flaw.flaw_type));
    out.push_str(&format!("Remediation Status: {}\n", flaw.remediation_status));
    out.push_str(&format!("Mitigation Status: {}\n", flaw.mitigation_status_desc));
    out.push('\n');
    out.push_str(&flaw.description);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::{comment, flaw, report_with};

    const PREFIX: &str = "JIRA Issue Key: ";

    fn keyed(issue_id: IssueId, key: &str) -> FlawRecord {
        let mut f = flaw(issue_id);
        f.comments = vec![comment(0, "2024-03-01 10:00:00 UTC", &format!("{PREFIX}{key}"))];
        f
    }

    #[test]
    fn open_flaw_without_key_is_created() {
        let actions = reconcile(&report_with(vec![flaw(1)]), SyncFilter::All, PREFIX);
        assert_eq!(
            actions,
            vec![TicketAction {
                flaw_issue_id: 1,
                kind: ActionKind::Create,
                existing_ticket_key: None,
            }]
        );
    }

    #[test]
    fn fixed_flaw_without_key_is_ignored() {
        let mut f = flaw(1);
        f.remediation_status = "Fixed".into();
        assert!(reconcile(&report_with(vec![f]), SyncFilter::All, PREFIX).is_empty());
    }

    #[test]
    fn accepted_flaw_with_key_is_closed() {
        let mut f = keyed(1, "SEC-4");
        f.mitigation_status = "accepted".into();
        let actions = reconcile(&report_with(vec![f]), SyncFilter::All, PREFIX);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Close);
        assert_eq!(actions[0].existing_ticket_key.as_deref(), Some("SEC-4"));
    }

    #[test]
    fn open_flaw_with_key_is_updated() {
        let actions = reconcile(&report_with(vec![keyed(1, "SEC-4")]), SyncFilter::All, PREFIX);
        assert_eq!(actions[0].kind, ActionKind::Update);
        assert_eq!(actions[0].existing_ticket_key.as_deref(), Some("SEC-4"));
    }

    #[test]
    fn decision_ignores_severity_and_category() {
        let mut low = flaw(1);
        low.severity = 0;
        low.category_id = 999;
        let mut high = flaw(2);
        high.severity = 5;
        let actions = reconcile(&report_with(vec![high, low]), SyncFilter::All, PREFIX);
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|a| a.kind == ActionKind::Create));
        assert_eq!(actions[0].flaw_issue_id, 1);
    }

    #[test]
    fn policy_filter_skips_non_policy_flaws() {
        let mut informational = flaw(2);
        informational.affects_policy_compliance = false;
        let report = report_with(vec![flaw(1), informational]);
        let actions = reconcile(&report, SyncFilter::PolicyAffecting, PREFIX);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].flaw_issue_id, 1);
        assert_eq!(reconcile(&report, SyncFilter::All, PREFIX).len(), 2);
    }

    #[test]
    fn key_of_another_tracker_does_not_count() {
        let mut f = flaw(1);
        f.comments = vec![comment(0, "", "GITLAB Issue Key: 5")];
        let actions = reconcile(&report_with(vec![f]), SyncFilter::All, PREFIX);
        assert_eq!(actions[0].kind, ActionKind::Create);
    }

    #[test]
    fn prefix_is_uppercased_tracker() {
        assert_eq!(key_prefix("jira"), PREFIX);
    }

    #[test]
    fn sync_filter_parses_snake_case() {
        let f: SyncFilter = serde_json::from_str("\"policy_affecting\"").unwrap();
        assert_eq!(f, SyncFilter::PolicyAffecting);
    }

    #[test]
    fn summary_and_description() {
        let f = flaw(12);
        assert_eq!(issue_summary(&f), "Veracode Flaw: SQL Injection Flaw 12");
        let desc = issue_description(&f);
        assert!(desc.contains("CWE-89"));
        assert!(desc.contains("com/example/dao/UserDao.java:42"));
        assert!(desc.contains("Attack Vector: java.sql.Statement.executeQuery"));
        assert!(desc.ends_with("This database query contains a SQL injection flaw."));
    }
}
