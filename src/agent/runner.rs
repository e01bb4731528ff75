//! Node agent main loop
//!
//! Registers with the controller (blocking, with capped exponential
//! backoff), then heartbeats at the configured interval: each heartbeat
//! pulls due commands, which are acknowledged, dispatched through the
//! action registry, and reported back in receipt order. Three consecutive
//! heartbeat failures force a re-registration. One cooperative task, one
//! heartbeat in flight at a time; the shutdown flag is polled at the top
//! of both loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::actions::ActionRegistry;
use super::client::ControllerClient;
use super::metrics::MetricsSource;
use crate::Result;
use crate::commands::{CommandBrief, ReportedStatus, StatusReport};
use crate::config::AgentConfig;
use crate::db::NodeRegistration;

/// First registration retry delay; doubles up to the configured cap
const INITIAL_REGISTRATION_BACKOFF: Duration = Duration::from_secs(5);

/// Consecutive heartbeat failures before forcing re-registration
const HEARTBEAT_FAILURE_THRESHOLD: u32 = 3;

/// Idle tick between loop iterations
const LOOP_TICK: Duration = Duration::from_secs(1);

/// The node agent
pub struct NodeAgent {
    config: AgentConfig,
    client: ControllerClient,
    registry: ActionRegistry,
    metrics: Box<dyn MetricsSource>,
    shutdown: Arc<AtomicBool>,
    registered: bool,
}

impl NodeAgent {
    /// Create an agent from its configuration and collaborators
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed
    pub fn new(
        config: AgentConfig,
        registry: ActionRegistry,
        metrics: Box<dyn MetricsSource>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let client = ControllerClient::new(&config)?;
        Ok(Self {
            config,
            client,
            registry,
            metrics,
            shutdown,
            registered: false,
        })
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Load a previously persisted auth token, if any
    fn load_persisted_token(&mut self) {
        let path = self.config.token_path();
        match std::fs::read_to_string(&path) {
            Ok(token) => {
                let token = token.trim().to_string();
                if !token.is_empty() {
                    tracing::info!("loaded saved authentication token");
                    self.client.set_token(Some(token));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "cannot read saved token"),
        }
    }

    fn persist_token(&self, token: &str) {
        let path = self.config.token_path();
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, token)
        };
        if let Err(e) = write() {
            tracing::warn!(path = %path.display(), error = %e, "cannot persist auth token");
        }
    }

    fn registration_payload(&self) -> NodeRegistration {
        let host = hostname::get().ok().and_then(|h| h.into_string().ok());

        NodeRegistration {
            node_id: self.config.node_id.clone(),
            name: self.config.name.clone(),
            node_type: self.config.node_type.clone(),
            metadata: Some(serde_json::json!({
                "hostname": host,
                "platform": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
                "agent_version": env!("CARGO_PKG_VERSION"),
            })),
            ..Default::default()
        }
    }

    /// One registration attempt; persists the token on success
    async fn register_once(&mut self) -> bool {
        let payload = self.registration_payload();
        match self.client.register(&payload).await {
            Ok(token) => {
                self.persist_token(&token);
                self.registered = true;
                tracing::info!("registered with controller");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "registration failed");
                false
            }
        }
    }

    /// Block until registered or shut down, backing off between attempts
    async fn registration_loop(&mut self) {
        let max_delay = Duration::from_secs(self.config.registration_backoff_max_seconds);
        let mut delay = INITIAL_REGISTRATION_BACKOFF;

        while !self.registered && !self.shutdown_requested() {
            if self.register_once().await {
                break;
            }
            tracing::warn!(?delay, "registration failed, retrying");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(max_delay);
        }
    }

    /// Acknowledge, dispatch, and report one command
    async fn process_command(&mut self, brief: &CommandBrief) {
        tracing::info!(
            command_id = %brief.id,
            command_type = %brief.command_type,
            "executing command"
        );

        let ack = StatusReport {
            status: ReportedStatus::Acknowledged,
            result: None,
            error: None,
        };
        self.client.report_result(&brief.id, &ack).await;

        let outcome = self
            .registry
            .execute(&brief.command_type.key(), brief.payload.as_ref())
            .await;
        let success = outcome.success;
        let error = outcome.error.clone();

        self.client
            .report_result(&brief.id, &outcome.into_report())
            .await;

        if success {
            tracing::info!(command_id = %brief.id, "command completed");
        } else {
            tracing::error!(command_id = %brief.id, error = ?error, "command failed");
        }
    }

    /// One heartbeat cycle; returns whether the controller answered
    async fn heartbeat_once(&mut self) -> bool {
        let sample = self.metrics.sample();
        let node_id = self.config.node_id.clone();
        match self.client.heartbeat(&node_id, &sample).await {
            Ok(commands) => {
                tracing::debug!(pending = commands.len(), "heartbeat acknowledged");
                for brief in &commands {
                    self.process_command(brief).await;
                }
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat failed - controller unreachable");
                false
            }
        }
    }

    /// Run until the shutdown flag is raised
    ///
    /// # Errors
    ///
    /// Currently infallible after construction; kept fallible for parity
    /// with the crate's other entry points
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(node_id = %self.config.node_id, "starting node agent");

        self.load_persisted_token();
        self.registration_loop().await;
        if self.shutdown_requested() {
            tracing::info!("node agent shutting down before registration completed");
            return Ok(());
        }

        let interval = Duration::from_secs(self.config.heartbeat_interval_seconds);
        let mut failures: u32 = 0;
        let mut last_heartbeat: Option<Instant> = None;

        while !self.shutdown_requested() {
            let due = last_heartbeat.is_none_or(|t| t.elapsed() >= interval);

            if due {
                if self.heartbeat_once().await {
                    failures = 0;
                } else {
                    failures += 1;
                    if failures >= HEARTBEAT_FAILURE_THRESHOLD {
                        tracing::warn!(failures, "repeated heartbeat failures, re-registering");
                        self.registered = false;
                        if self.register_once().await {
                            failures = 0;
                        }
                    }
                }
                last_heartbeat = Some(Instant::now());
            }

            tokio::time::sleep(LOOP_TICK).await;
        }

        tracing::info!("node agent shutting down");
        Ok(())
    }
}
