//! Controller daemon: wires storage, guards, and the HTTP API together

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::api::{self, ApiState, rate_limit};
use crate::config::ControllerConfig;
use crate::db;
use crate::security::{PasswordHasher, Sha256Hasher, TokenIssuer, validate_complexity};
use crate::{Error, Result};

/// Cadence of the command-timeout sweep
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The controller daemon
pub struct Daemon {
    config: ControllerConfig,
    state: Arc<ApiState>,
}

impl Daemon {
    /// Initialize storage and build the shared API state
    ///
    /// The lockout and revocation guards are created here, once, and live
    /// for the life of the process inside [`ApiState`].
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be initialized
    pub fn new(config: ControllerConfig) -> Result<Self> {
        let pool = db::init(&config.database_path)?;
        let tokens = TokenIssuer::new(&config.jwt_secret, config.jwt_expiry_minutes);
        let hasher: Arc<dyn PasswordHasher> = Arc::new(Sha256Hasher);
        let rate_limiter = config
            .login_rate_limit_per_minute
            .map(rate_limit::create_limiter);

        let state = Arc::new(ApiState::new(
            pool,
            tokens,
            hasher,
            config.heartbeat_timeout_seconds,
            rate_limiter,
        ));

        Ok(Self { config, state })
    }

    /// Shared API state (for embedding the router in tests or other servers)
    #[must_use]
    pub fn state(&self) -> Arc<ApiState> {
        self.state.clone()
    }

    /// Create an operator account from the CLI
    ///
    /// # Errors
    ///
    /// Returns error if the password fails complexity validation or the
    /// username is taken
    pub fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        password: &str,
        role: db::Role,
    ) -> Result<db::User> {
        let problems = validate_complexity(password);
        if !problems.is_empty() {
            return Err(Error::Validation(problems.join("; ")));
        }

        let digest = self.state.password_hasher.hash(password);
        let user = self.state.user_repo.create(username, email, &digest, role)?;
        tracing::info!(username = %user.username, role = %user.role, "user created");
        Ok(user)
    }

    /// Serve the API until Ctrl-C
    ///
    /// Also runs the command-timeout sweep on a coarse interval; the sweep
    /// is a caller of the lifecycle hook, not part of it.
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot bind or the server fails
    pub async fn run(self, port: u16) -> Result<()> {
        let sweeper = {
            let state = self.state.clone();
            let horizon = self.config.command_timeout_seconds;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(TIMEOUT_SWEEP_INTERVAL);
                loop {
                    tick.tick().await;
                    match state.command_repo.timeout_overdue(horizon) {
                        Ok(0) => {}
                        Ok(n) => tracing::info!(count = n, "commands timed out"),
                        Err(e) => tracing::error!(error = %e, "timeout sweep failed"),
                    }
                }
            })
        };

        if self.state.user_repo.count()? == 0 {
            tracing::warn!("no users exist - create one with `tether create-user`");
        }

        let app = api::router(self.state);
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        tracing::info!(port, "controller listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown requested");
            })
            .await?;

        sweeper.abort();
        tracing::info!("controller stopped");
        Ok(())
    }
}
