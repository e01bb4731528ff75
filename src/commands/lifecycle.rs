//! Command status transition rules
//!
//! Pure functions over [`Command`], independent of transport and storage.
//! Status only moves forward through
//! `pending -> sent -> acknowledged -> {completed | failed}`, with `timeout`
//! reachable from any non-terminal state. Duplicate reports are absorbed
//! idempotently; conflicting reports are rejected without mutation.

use chrono::{DateTime, Utc};

use super::types::{Command, CommandStatus, ReportedStatus, StatusReport};
use crate::{Error, Result};

/// Outcome of applying a node report to a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The report advanced the command's status
    Advanced(CommandStatus),
    /// The report duplicated state the command already holds
    Duplicate,
}

/// Transition a pending command to sent, stamping `sent_at` exactly once.
///
/// # Errors
///
/// Returns [`Error::Conflict`] if the command is not pending.
pub fn mark_sent(cmd: &mut Command, now: DateTime<Utc>) -> Result<()> {
    if cmd.status != CommandStatus::Pending {
        return Err(Error::Conflict(format!(
            "command {} cannot be sent from status {}",
            cmd.id, cmd.status
        )));
    }
    cmd.status = CommandStatus::Sent;
    cmd.sent_at = Some(now);
    Ok(())
}

/// Apply a node's status report.
///
/// Acknowledgements are idempotent: `acknowledged_at` is stamped on the
/// first one and repeats are duplicates. A terminal report while the
/// command is still `sent` folds in the implied acknowledgement (the ack
/// report travels over an unreliable network and may never arrive).
/// Re-reporting an already-terminal command with the same terminal status
/// is a duplicate; any other report against a terminal command conflicts.
///
/// # Errors
///
/// Returns [`Error::Conflict`] when the report contradicts stored state;
/// the command is left unmodified.
pub fn apply_report(cmd: &mut Command, report: &StatusReport, now: DateTime<Utc>) -> Result<Applied> {
    match report.status {
        ReportedStatus::Acknowledged => apply_ack(cmd, now),
        ReportedStatus::Completed | ReportedStatus::Failed => apply_terminal(cmd, report, now),
    }
}

fn apply_ack(cmd: &mut Command, now: DateTime<Utc>) -> Result<Applied> {
    match cmd.status {
        CommandStatus::Sent => {
            cmd.status = CommandStatus::Acknowledged;
            if cmd.acknowledged_at.is_none() {
                cmd.acknowledged_at = Some(now);
            }
            Ok(Applied::Advanced(CommandStatus::Acknowledged))
        }
        // Repeated ack, or a late duplicate of an ack that was already
        // honored on the way to a terminal state.
        CommandStatus::Acknowledged
        | CommandStatus::Completed
        | CommandStatus::Failed
        | CommandStatus::Timeout => Ok(Applied::Duplicate),
        CommandStatus::Pending => Err(Error::Conflict(format!(
            "command {} acknowledged before being sent",
            cmd.id
        ))),
    }
}

fn apply_terminal(cmd: &mut Command, report: &StatusReport, now: DateTime<Utc>) -> Result<Applied> {
    let target = report.status.target();

    match cmd.status {
        CommandStatus::Sent | CommandStatus::Acknowledged => {
            if cmd.acknowledged_at.is_none() {
                cmd.acknowledged_at = Some(now);
            }
            cmd.status = target;
            cmd.completed_at = Some(now);
            cmd.result = report.result.clone();
            cmd.error = report.error.clone();
            Ok(Applied::Advanced(target))
        }
        CommandStatus::Completed | CommandStatus::Failed | CommandStatus::Timeout => {
            if cmd.status == target {
                Ok(Applied::Duplicate)
            } else {
                Err(Error::Conflict(format!(
                    "command {} already {}, conflicting report {}",
                    cmd.id, cmd.status, target
                )))
            }
        }
        CommandStatus::Pending => Err(Error::Conflict(format!(
            "command {} reported {} before being sent",
            cmd.id, target
        ))),
    }
}

/// Time out a command that never reached a terminal state.
///
/// # Errors
///
/// Returns [`Error::Conflict`] if the command is already terminal.
pub fn mark_timed_out(cmd: &mut Command, now: DateTime<Utc>) -> Result<()> {
    if cmd.status.is_terminal() {
        return Err(Error::Conflict(format!(
            "command {} already terminal ({})",
            cmd.id, cmd.status
        )));
    }
    cmd.status = CommandStatus::Timeout;
    cmd.completed_at = Some(now);
    Ok(())
}

/// Whether a command may be cancelled (deleted) by an operator
#[must_use]
pub const fn is_cancellable(status: CommandStatus) -> bool {
    matches!(status, CommandStatus::Pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::types::CommandType;

    fn pending() -> Command {
        Command::new("node-1", CommandType::Ping, None, None)
    }

    fn sent() -> Command {
        let mut cmd = pending();
        mark_sent(&mut cmd, Utc::now()).unwrap();
        cmd
    }

    fn report(status: ReportedStatus) -> StatusReport {
        StatusReport {
            status,
            result: None,
            error: None,
        }
    }

    #[test]
    fn sent_stamps_sent_at_once() {
        let mut cmd = pending();
        let now = Utc::now();
        mark_sent(&mut cmd, now).unwrap();
        assert_eq!(cmd.status, CommandStatus::Sent);
        assert_eq!(cmd.sent_at, Some(now));

        // a second send attempt is a conflict, not a restamp
        assert!(mark_sent(&mut cmd, Utc::now()).is_err());
        assert_eq!(cmd.sent_at, Some(now));
    }

    #[test]
    fn ack_is_idempotent() {
        let mut cmd = sent();
        let first = Utc::now();
        let applied = apply_report(&mut cmd, &report(ReportedStatus::Acknowledged), first).unwrap();
        assert_eq!(applied, Applied::Advanced(CommandStatus::Acknowledged));
        assert_eq!(cmd.acknowledged_at, Some(first));

        let applied =
            apply_report(&mut cmd, &report(ReportedStatus::Acknowledged), Utc::now()).unwrap();
        assert_eq!(applied, Applied::Duplicate);
        assert_eq!(cmd.acknowledged_at, Some(first), "timestamp not restamped");
    }

    #[test]
    fn ack_before_send_conflicts() {
        let mut cmd = pending();
        let err = apply_report(&mut cmd, &report(ReportedStatus::Acknowledged), Utc::now());
        assert!(err.is_err());
        assert_eq!(cmd.status, CommandStatus::Pending);
    }

    #[test]
    fn completed_from_acknowledged() {
        let mut cmd = sent();
        apply_report(&mut cmd, &report(ReportedStatus::Acknowledged), Utc::now()).unwrap();

        let mut done = report(ReportedStatus::Completed);
        done.result = Some(serde_json::json!({"message": "pong"}));
        let applied = apply_report(&mut cmd, &done, Utc::now()).unwrap();
        assert_eq!(applied, Applied::Advanced(CommandStatus::Completed));
        assert_eq!(cmd.result, done.result);
        assert!(cmd.completed_at.is_some());
    }

    #[test]
    fn terminal_from_sent_folds_in_ack() {
        let mut cmd = sent();
        assert!(cmd.acknowledged_at.is_none());

        apply_report(&mut cmd, &report(ReportedStatus::Failed), Utc::now()).unwrap();
        assert_eq!(cmd.status, CommandStatus::Failed);
        assert!(cmd.acknowledged_at.is_some());
    }

    #[test]
    fn duplicate_terminal_report_is_noop() {
        let mut cmd = sent();
        let mut done = report(ReportedStatus::Completed);
        done.result = Some(serde_json::json!({"n": 1}));
        apply_report(&mut cmd, &done, Utc::now()).unwrap();
        let completed_at = cmd.completed_at;

        let mut retry = report(ReportedStatus::Completed);
        retry.result = Some(serde_json::json!({"n": 2}));
        let applied = apply_report(&mut cmd, &retry, Utc::now()).unwrap();
        assert_eq!(applied, Applied::Duplicate);
        assert_eq!(cmd.result, Some(serde_json::json!({"n": 1})), "original retained");
        assert_eq!(cmd.completed_at, completed_at);
    }

    #[test]
    fn conflicting_terminal_report_rejected() {
        let mut cmd = sent();
        apply_report(&mut cmd, &report(ReportedStatus::Completed), Utc::now()).unwrap();

        let err = apply_report(&mut cmd, &report(ReportedStatus::Failed), Utc::now());
        assert!(matches!(err, Err(Error::Conflict(_))));
        assert_eq!(cmd.status, CommandStatus::Completed);
    }

    #[test]
    fn late_ack_after_terminal_is_noop() {
        let mut cmd = sent();
        apply_report(&mut cmd, &report(ReportedStatus::Completed), Utc::now()).unwrap();

        let applied =
            apply_report(&mut cmd, &report(ReportedStatus::Acknowledged), Utc::now()).unwrap();
        assert_eq!(applied, Applied::Duplicate);
        assert_eq!(cmd.status, CommandStatus::Completed);
    }

    #[test]
    fn timeout_from_any_non_terminal() {
        for make in [pending, sent] {
            let mut cmd = make();
            mark_timed_out(&mut cmd, Utc::now()).unwrap();
            assert_eq!(cmd.status, CommandStatus::Timeout);
            assert!(cmd.completed_at.is_some());
        }

        let mut cmd = sent();
        apply_report(&mut cmd, &report(ReportedStatus::Completed), Utc::now()).unwrap();
        assert!(mark_timed_out(&mut cmd, Utc::now()).is_err());
    }

    #[test]
    fn only_pending_is_cancellable() {
        assert!(is_cancellable(CommandStatus::Pending));
        assert!(!is_cancellable(CommandStatus::Sent));
        assert!(!is_cancellable(CommandStatus::Completed));
    }
}
