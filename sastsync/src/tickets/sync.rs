use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument};

use crate::config::TicketingConfig;
use crate::report::AggregatedReport;
use crate::service::ScanService;

use super::tracker::IssueTracker;
use super::{ActionKind, TicketAction, issue_description, issue_summary, key_prefix};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    #[serde(flatten)]
    pub action: TicketAction,
    /// Key of the issue the action touched; for creates, the new key.
    pub ticket_key: String,
}

/// Carry out `actions` against the tracker. New issues are recorded on the
/// flaw as a `"<TRACKER> Issue Key: <key>"` comment so the next run finds
/// them. Stops at the first failure; each completed action is pushed onto
/// `outcomes` as it finishes, so the ones before a failure are kept.
#[instrument(skip_all, fields(actions = actions.len(), build_id = %build_id))]
pub async fn apply_actions(
    actions: &[TicketAction],
    report: &AggregatedReport,
    tracker: &dyn IssueTracker,
    service: &dyn ScanService,
    ticketing: &TicketingConfig,
    build_id: &str,
    outcomes: &mut Vec<SyncOutcome>,
) -> Result<()> {
    let prefix = key_prefix(tracker.tracker_type());
    outcomes.reserve(actions.len());

    for action in actions {
        let flaw = report
            .flaws
            .get(&action.flaw_issue_id)
            .with_context(|| format!("flaw {} is not in the report", action.flaw_issue_id))?;
        let summary = issue_summary(flaw);

        let ticket_key = match (action.kind, action.existing_ticket_key.as_deref()) {
            (ActionKind::Create, _) => {
                let key = tracker
                    .create_issue(
                        &ticketing.project,
                        &ticketing.issue_type,
                        &summary,
                        &issue_description(flaw),
                    )
                    .await
                    .with_context(|| format!("failed to create issue for flaw {}", flaw.issue_id))?;
                service
                    .add_comment(build_id, &[flaw.issue_id], &format!("{prefix}{key}"))
                    .await
                    .with_context(|| format!("failed to annotate flaw {} with {key}", flaw.issue_id))?;
                key
            }
            (ActionKind::Update, Some(key)) => {
                tracker
                    .update_issue(key, &summary, &issue_description(flaw))
                    .await
                    .with_context(|| format!("failed to update {key}"))?;
                key.to_string()
            }
            (ActionKind::Close, Some(key)) => {
                tracker
                    .close_issue(key, &ticketing.close_transition)
                    .await
                    .with_context(|| format!("failed to close {key}"))?;
                key.to_string()
            }
            (kind, None) => anyhow::bail!("{kind} for flaw {} has no ticket key", flaw.issue_id),
        };

        info!(issue_id = flaw.issue_id, kind = %action.kind, key = %ticket_key, "ticket synced");
        outcomes.push(SyncOutcome {
            action: action.clone(),
            ticket_key,
        });
    }
    Ok(())
}
