use std::cmp::Ordering;
use std::collections::btree_map::Entry;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::{debug, warn};

use super::raw::RawNode;
use super::{
    AggregatedReport, CategorySummary, CweSummary, FlawRecord, HistoryEntry, IssueId,
    MitigationEntry, ScanSummary, SeveritySummary, SourceLocation, severity_name,
};

const HISTORY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fold a detailed report tree into its severity, category, CWE and flaw
/// indexes. The walk follows the report's fixed nesting
/// (severity, category, cwe, staticflaws/flaw) one level at a time.
///
/// Counts are distinct flaws per bucket, not one per listing: a flaw listed
/// more than once under the same bucket is counted once and the first
/// listing supplies its record.
pub fn aggregate(root: &RawNode) -> Result<AggregatedReport> {
    let mut report = AggregatedReport {
        scan: scan_summary(root),
        ..Default::default()
    };

    for severity in root.children_named("severity") {
        let level: u8 = parse_id(severity, "level")?;
        for category in severity.children_named("category") {
            let category_id: u32 = parse_id(category, "categoryid")?;
            for cwe in category.children_named("cwe") {
                let cwe_id: u32 = parse_id(cwe, "cweid")?;
                for flaw in cwe.descendants(&["staticflaws", "flaw"]) {
                    let record = flaw_record(flaw, level, category, cwe_id, cwe)?;
                    index_flaw(&mut report, record, level, category_id, category, cwe);
                }
            }
        }
    }

    for summary in report.severities.values_mut() {
        summary.count = summary.flaws.len();
    }
    for summary in report.categories.values_mut() {
        summary.count = summary.flaws.len();
    }
    for summary in report.cwes.values_mut() {
        summary.count = summary.flaws.len();
    }

    debug!(
        flaws = report.flaws.len(),
        severities = report.severities.len(),
        categories = report.categories.len(),
        cwes = report.cwes.len(),
        "aggregated detailed report"
    );
    Ok(report)
}

fn scan_summary(root: &RawNode) -> ScanSummary {
    ScanSummary {
        app_id: root.attr_or_empty("app_id"),
        app_name: root.attr_or_empty("app_name"),
        sandbox_id: root.attr("sandbox_id").filter(|s| !s.is_empty()).map(String::from),
        scan_name: root.attr_or_empty("version"),
        policy_compliance_status: root.attr_or_empty("policy_compliance_status"),
    }
}

fn index_flaw(
    report: &mut AggregatedReport,
    record: FlawRecord,
    level: u8,
    category_id: u32,
    category: &RawNode,
    cwe: &RawNode,
) {
    let issue_id = record.issue_id;
    let cwe_id = record.cwe_id;

    let severity_entry = report.severities.entry(level).or_insert_with(|| SeveritySummary {
        name: severity_name(level).to_string(),
        count: 0,
        flaws: Vec::new(),
    });
    insert_sorted(&mut severity_entry.flaws, issue_id, "severity");

    let category_entry = report
        .categories
        .entry(category_id)
        .or_insert_with(|| category_summary(category));
    insert_sorted(&mut category_entry.flaws, issue_id, "category");

    let cwe_entry = report.cwes.entry(cwe_id).or_insert_with(|| cwe_summary(cwe));
    insert_sorted(&mut cwe_entry.flaws, issue_id, "cwe");

    if let Entry::Vacant(slot) = report.flaws.entry(issue_id) {
        slot.insert(record);
    }
}

fn insert_sorted(flaws: &mut Vec<IssueId>, issue_id: IssueId, index: &str) {
    match flaws.binary_search(&issue_id) {
        Ok(_) => warn!(issue_id, index, "flaw listed more than once; counted once"),
        Err(pos) => flaws.insert(pos, issue_id),
    }
}

fn category_summary(category: &RawNode) -> CategorySummary {
    CategorySummary {
        name: category.attr_or_empty("categoryname"),
        pci_related: flag(category.attr("pcirelated")),
        description: paragraphs(category, "desc").join("\n"),
        recommendations: paragraphs(category, "recommendations"),
        count: 0,
        flaws: Vec::new(),
    }
}

fn cwe_summary(cwe: &RawNode) -> CweSummary {
    let description = cwe
        .descendants(&["description", "text"])
        .into_iter()
        .filter_map(|t| t.attr("text"))
        .collect::<Vec<_>>()
        .join("\n");
    CweSummary {
        name: cwe.attr_or_empty("cwename"),
        pci_related: flag(cwe.attr("pcirelated")),
        owasp: optional(cwe, "owasp"),
        owasp2013: optional(cwe, "owasp2013"),
        sans: optional(cwe, "sans"),
        description,
        count: 0,
        flaws: Vec::new(),
    }
}

fn paragraphs(node: &RawNode, section: &str) -> Vec<String> {
    node.descendants(&[section, "para"])
        .into_iter()
        .filter_map(|p| p.attr("text"))
        .map(String::from)
        .collect()
}

fn flaw_record(
    flaw: &RawNode,
    level: u8,
    category: &RawNode,
    cwe_id: u32,
    cwe: &RawNode,
) -> Result<FlawRecord> {
    let issue_id: IssueId = parse_id(flaw, "issueid")?;
    let category_name = flaw
        .attr("categoryname")
        .unwrap_or_else(|| category.attr("categoryname").unwrap_or_default())
        .to_string();

    Ok(FlawRecord {
        issue_id,
        severity: level,
        category_id: parse_id(category, "categoryid")?,
        category_name,
        cwe_id,
        cwe_name: cwe.attr_or_empty("cwename"),
        module: flaw.attr_or_empty("module"),
        flaw_type: flaw.attr_or_empty("type"),
        description: flaw.attr_or_empty("description"),
        remediation_status: flaw.attr_or_empty("remediation_status"),
        mitigation_status: flaw.attr_or_empty("mitigation_status"),
        mitigation_status_desc: flaw.attr_or_empty("mitigation_status_desc"),
        affects_policy_compliance: flag(flaw.attr("affects_policy_compliance")),
        source: SourceLocation {
            file: flaw.attr_or_empty("sourcefile"),
            path: flaw.attr_or_empty("sourcefilepath"),
            line: flaw.attr("line").and_then(|l| l.trim().parse().ok()),
            scope: flaw.attr_or_empty("scope"),
            function_prototype: flaw.attr_or_empty("functionprototype"),
        },
        cia_impact: flaw.attr_or_empty("cia_impact"),
        grace_period_expires: optional(flaw, "grace_period_expires"),
        date_first_occurrence: optional(flaw, "date_first_occurrence"),
        exploit_level: optional(flaw, "exploitLevel"),
        comments: comments(flaw),
        mitigations: mitigations(flaw),
    })
}

fn comments(flaw: &RawNode) -> Vec<HistoryEntry> {
    let mut entries: Vec<HistoryEntry> = flaw
        .descendants(&["annotations", "annotation"])
        .into_iter()
        .enumerate()
        .map(|(seq, a)| HistoryEntry {
            date: a.attr_or_empty("date"),
            description: a.attr_or_empty("description"),
            user: a.attr_or_empty("user"),
            seq,
        })
        .collect();
    entries.sort_by(|a, b| newest_first(&a.date, a.seq, &b.date, b.seq));
    entries
}

fn mitigations(flaw: &RawNode) -> Vec<MitigationEntry> {
    let mut entries: Vec<MitigationEntry> = flaw
        .descendants(&["mitigations", "mitigation"])
        .into_iter()
        .enumerate()
        .map(|(seq, m)| MitigationEntry {
            action: m.attr_or_empty("action"),
            date: m.attr_or_empty("date"),
            description: m.attr_or_empty("description"),
            user: m.attr_or_empty("user"),
            seq,
        })
        .collect();
    entries.sort_by(|a, b| newest_first(&a.date, a.seq, &b.date, b.seq));
    entries
}

/// Dated entries newest first, undated ones last; ties keep report order.
fn newest_first(a_date: &str, a_seq: usize, b_date: &str, b_seq: usize) -> Ordering {
    match (history_date(a_date), history_date(b_date)) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then(a_seq.cmp(&b_seq))
}

fn history_date(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix("UTC").unwrap_or(trimmed).trim_end();
    NaiveDateTime::parse_from_str(trimmed, HISTORY_DATE_FORMAT).ok()
}

fn parse_id<T: std::str::FromStr>(node: &RawNode, key: &str) -> Result<T> {
    let raw = node
        .attr(key)
        .with_context(|| format!("<{}> is missing '{key}'", node.name))?;
    raw.trim()
        .parse()
        .ok()
        .with_context(|| format!("<{}> has non-numeric {key} '{raw}'", node.name))
}

fn flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

fn optional(node: &RawNode, key: &str) -> Option<String> {
    node.attr(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}
