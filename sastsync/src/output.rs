use std::io::Write;

use crate::context::ExecutionContext;
use crate::report::AggregatedReport;
use crate::stages::TicketSyncReport;

pub trait OutputFormatter {
    fn write_context(
        &self,
        ctx: &ExecutionContext,
        tickets: Option<&TicketSyncReport>,
        writer: &mut dyn Write,
    ) -> std::io::Result<()>;

    fn write_report(&self, report: &AggregatedReport, writer: &mut dyn Write) -> std::io::Result<()>;
}

pub struct TextOutput;

impl TextOutput {
    fn write_summary(&self, report: &AggregatedReport, writer: &mut dyn Write) -> std::io::Result<()> {
        let scan = &report.scan;
        writeln!(writer, "app: {} ({})", scan.app_name, scan.app_id)?;
        if let Some(sandbox) = &scan.sandbox_id {
            writeln!(writer, "  sandbox: {sandbox}")?;
        }
        if !scan.scan_name.is_empty() {
            writeln!(writer, "  scan: {}", scan.scan_name)?;
        }
        if !scan.policy_compliance_status.is_empty() {
            writeln!(writer, "  policy: {}", scan.policy_compliance_status)?;
        }
        writeln!(writer, "  flaws: {}", report.total_flaws())?;
        for (level, severity) in report.severities.iter().rev() {
            writeln!(writer, "    {} ({level}): {}", severity.name, severity.count)?;
        }
        if !report.categories.is_empty() {
            writeln!(writer, "  categories:")?;
            for (id, category) in &report.categories {
                writeln!(writer, "    {} [{id}]: {}", category.name, category.count)?;
            }
        }
        Ok(())
    }
}

impl OutputFormatter for TextOutput {
    fn write_context(
        &self,
        ctx: &ExecutionContext,
        tickets: Option<&TicketSyncReport>,
        writer: &mut dyn Write,
    ) -> std::io::Result<()> {
        writeln!(writer, "branch: {}", ctx.branch)?;
        if let Some(build) = &ctx.build_id {
            writeln!(writer, "build: {build}")?;
        }
        if let Some(sandbox) = &ctx.sandbox_id {
            writeln!(writer, "sandbox: {sandbox}")?;
        }
        if let Some(name) = &ctx.scan_name {
            writeln!(writer, "scan: {name}")?;
        }
        if let Some(results) = &ctx.results {
            self.write_summary(results, writer)?;
        }

        if let Some(tickets) = tickets {
            let label = if tickets.dry_run { "tickets (dry run)" } else { "tickets" };
            if tickets.planned.is_empty() {
                writeln!(writer, "{label}: none")?;
            } else {
                writeln!(writer, "{label}:")?;
                for action in &tickets.planned {
                    let applied = tickets
                        .applied
                        .iter()
                        .find(|o| o.action.flaw_issue_id == action.flaw_issue_id);
                    let key = applied
                        .map(|o| o.ticket_key.as_str())
                        .or(action.existing_ticket_key.as_deref());
                    match key {
                        Some(key) => writeln!(writer, "  {} flaw {} ({key})", action.kind, action.flaw_issue_id)?,
                        None => writeln!(writer, "  {} flaw {}", action.kind, action.flaw_issue_id)?,
                    }
                }
            }
        }

        if let Some(error) = &ctx.error {
            writeln!(writer, "error: [{}] {}: {}", error.stage, error.kind, error.message)?;
        }
        Ok(())
    }

    fn write_report(&self, report: &AggregatedReport, writer: &mut dyn Write) -> std::io::Result<()> {
        self.write_summary(report, writer)
    }
}

pub struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn write_context(
        &self,
        ctx: &ExecutionContext,
        _tickets: Option<&TicketSyncReport>,
        writer: &mut dyn Write,
    ) -> std::io::Result<()> {
        serde_json::to_writer_pretty(&mut *writer, ctx)?;
        writeln!(writer)?;
        Ok(())
    }

    fn write_report(&self, report: &AggregatedReport, writer: &mut dyn Write) -> std::io::Result<()> {
        serde_json::to_writer_pretty(&mut *writer, report)?;
        writeln!(writer)?;
        Ok(())
    }
}

pub fn formatter(json: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonOutput)
    } else {
        Box::new(TextOutput)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::report::SeveritySummary;
    use crate::report::fixtures::{flaw, report_with};
    use crate::tickets::{ActionKind, SyncOutcome, TicketAction};

    fn render(fmt: &dyn OutputFormatter, ctx: &ExecutionContext, tickets: Option<&TicketSyncReport>) -> String {
        let mut buf = Vec::new();
        fmt.write_context(ctx, tickets, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn results() -> AggregatedReport {
        let mut report = report_with(vec![flaw(1)]);
        report.scan.app_id = "42".into();
        report.scan.app_name = "storefront".into();
        report.scan.policy_compliance_status = "Did Not Pass".into();
        report.severities.insert(
            3,
            SeveritySummary {
                name: "Medium".into(),
                count: 1,
                flaws: vec![1],
            },
        );
        report
    }

    #[test]
    fn text_output_basic() {
        let mut ctx = ExecutionContext::new("main");
        ctx.build_id = Some("77".into());
        let out = render(&TextOutput, &ctx, None);
        assert!(out.contains("branch: main"));
        assert!(out.contains("build: 77"));
        assert!(!out.contains("error"));
    }

    #[test]
    fn text_output_with_results() {
        let mut ctx = ExecutionContext::new("main");
        ctx.results = Some(results());
        let out = render(&TextOutput, &ctx, None);
        assert!(out.contains("app: storefront (42)"));
        assert!(out.contains("policy: Did Not Pass"));
        assert!(out.contains("Medium (3): 1"));
    }

    #[test]
    fn text_output_with_tickets() {
        let ctx = ExecutionContext::new("main");
        let tickets = TicketSyncReport {
            dry_run: false,
            planned: vec![
                TicketAction {
                    flaw_issue_id: 1,
                    kind: ActionKind::Create,
                    existing_ticket_key: None,
                },
                TicketAction {
                    flaw_issue_id: 2,
                    kind: ActionKind::Close,
                    existing_ticket_key: Some("SEC-2".into()),
                },
            ],
            applied: vec![SyncOutcome {
                action: TicketAction {
                    flaw_issue_id: 1,
                    kind: ActionKind::Create,
                    existing_ticket_key: None,
                },
                ticket_key: "SEC-9".into(),
            }],
        };
        let out = render(&TextOutput, &ctx, Some(&tickets));
        assert!(out.contains("create flaw 1 (SEC-9)"));
        assert!(out.contains("close flaw 2 (SEC-2)"));
    }

    #[test]
    fn text_output_with_error() {
        let mut ctx = ExecutionContext::new("main");
        ctx.record_error("start", &SyncError::NothingToUpload.into());
        let out = render(&TextOutput, &ctx, None);
        assert!(out.contains("error: [start] nothing_to_upload"));
    }

    #[test]
    fn json_output_is_the_context() {
        let mut ctx = ExecutionContext::new("main");
        ctx.results = Some(results());
        let out = render(&JsonOutput, &ctx, None);
        let back: ExecutionContext = serde_json::from_str(&out).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn formatter_factory() {
        let ctx = ExecutionContext::new("main");
        assert!(render(formatter(true).as_ref(), &ctx, None).starts_with('{'));
        assert!(render(formatter(false).as_ref(), &ctx, None).starts_with("branch"));
    }
}
