//! Command model and lifecycle state machine

pub mod lifecycle;
pub mod types;

pub use lifecycle::{Applied, apply_report, is_cancellable, mark_sent, mark_timed_out};
pub use types::{Command, CommandBrief, CommandStatus, CommandType, ReportedStatus, StatusReport};
