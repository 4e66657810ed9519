//! skilld - progressive skill disclosure agent daemon
//!
//! Library components for the daemon process: skill registry, matcher,
//! lazy loader, tier resolver, session store, delegation, and the turn
//! orchestrator.

pub mod a2a;
pub mod loader;
pub mod matcher;
pub mod orchestrator;
pub mod registry;
pub mod render;
pub mod resolver;
pub mod session;
pub mod tools;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use skilld_core::a2a::DelegationMessage;
use skilld_core::Config;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use a2a::{AppState, DelegationHandler, DelegationRouter, HttpTransport};
use matcher::KeywordMatcher;
use orchestrator::{ModelBackend, Orchestrator, TurnError, TurnOutcome};
use registry::Registry;
use resolver::TierResolver;
use session::SessionStore;
use tools::ToolRegistry;

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Workspace root for resolving project-local skill directories.
    pub workspace_root: PathBuf,
    /// Path to skilld.conf; missing file means defaults.
    pub config_path: Option<PathBuf>,
    /// A2A server port (default: 7710).
    pub port: u16,
    /// Auth token for inbound delegations (optional).
    pub auth_token: Option<String>,
    /// Idle session time-to-live.
    pub session_ttl: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_path: None,
            port: 7710,
            auth_token: std::env::var("SKILLD_AUTH_TOKEN").ok(),
            session_ttl: Duration::from_secs(3600),
        }
    }
}

/// The assembled agent runtime shared by local turns and inbound
/// delegations.
pub struct AgentRuntime {
    config: Config,
    registry: Arc<Registry>,
    orchestrator: Arc<Orchestrator>,
    sessions: Arc<SessionStore>,
    workspace_root: PathBuf,
    session_ttl: chrono::Duration,
    cancel: CancellationToken,
}

impl AgentRuntime {
    /// Wire up the runtime from configuration. Scans skills immediately;
    /// scan errors are logged per skill, never fatal.
    pub fn new(
        config: Config,
        workspace_root: PathBuf,
        tools: ToolRegistry,
        backend: Arc<dyn ModelBackend>,
        auth_token: Option<String>,
        session_ttl: Duration,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let registry = Arc::new(Registry::new());
        let errors = registry.rescan(&config, &workspace_root);
        for e in &errors {
            warn!(skill = %e.name, path = %e.path.display(), error = %e.error, "skill skipped");
        }
        info!(
            skills = registry.snapshot().len(),
            skipped = errors.len(),
            "skill registry ready"
        );

        let resolver = Arc::new(TierResolver::from_config(&config));
        let transport = Arc::new(HttpTransport::new(auth_token)?);
        let router = Arc::new(DelegationRouter::new(
            transport,
            config.peer_agents.clone(),
            Duration::from_secs(u64::from(config.delegation_timeout_sec)),
            config.agent_id.clone(),
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            Arc::clone(&registry),
            Arc::new(KeywordMatcher),
            resolver,
            router,
            Arc::new(tools),
            backend,
        ));

        Ok(Self {
            config,
            registry,
            orchestrator,
            sessions: Arc::new(SessionStore::new()),
            workspace_root,
            session_ttl: chrono::Duration::from_std(session_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600)),
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Re-read skill directories and swap the registry snapshot.
    pub fn rescan_skills(&self) -> usize {
        let errors = self.registry.rescan(&self.config, &self.workspace_root);
        for e in &errors {
            warn!(skill = %e.name, error = %e.error, "skill skipped on rescan");
        }
        self.registry.snapshot().len()
    }

    /// Run one turn. A `None` session id starts a fresh session; the id
    /// in the return value addresses follow-up turns.
    pub async fn handle_turn(
        &self,
        session_id: Option<Uuid>,
        query: &str,
    ) -> Result<(Uuid, TurnOutcome), TurnError> {
        let handle = match session_id {
            Some(id) => self.sessions.get_or_create(id),
            None => self.sessions.create(),
        };
        let mut session = handle.lock().await;
        let result = self
            .orchestrator
            .run_turn(&mut session, query, &self.cancel)
            .await;
        // Idle expiry counts from the latest activity, successful or not.
        session.set_ttl(self.session_ttl);
        Ok((session.id, result?))
    }

    /// Cancellation token covering every in-flight turn.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.cancel.cancel();
    }
}

#[async_trait]
impl DelegationHandler for AgentRuntime {
    fn can_handle(&self, capability: &str) -> bool {
        self.orchestrator.serves_capability(capability)
    }

    async fn handle(&self, message: &DelegationMessage) -> Result<String, String> {
        // Each inbound delegation runs in its own session so peer
        // disclosures never bleed into local conversations.
        let (_, outcome) = self
            .handle_turn(None, &message.payload)
            .await
            .map_err(|e| e.to_string())?;
        Ok(outcome.response)
    }
}

/// Daemon wrapper: A2A server plus periodic session reaping.
pub struct Daemon {
    config: DaemonConfig,
    runtime: Arc<AgentRuntime>,
}

impl Daemon {
    pub fn new(
        config: DaemonConfig,
        tools: ToolRegistry,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let mut agent_config = match &config.config_path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        agent_config.resolve_paths(&config.workspace_root);

        let runtime = Arc::new(AgentRuntime::new(
            agent_config,
            config.workspace_root.clone(),
            tools,
            backend,
            config.auth_token.clone(),
            config.session_ttl,
        )?);

        Ok(Self { config, runtime })
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    /// Run until shutdown: serve inbound delegations and reap idle
    /// sessions once a minute.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            agent_id = %self.runtime.config().agent_id,
            port = self.config.port,
            "skilld starting"
        );
        if self.config.auth_token.is_some() {
            info!("auth token: enabled");
        }

        let state = Arc::new(AppState::new(
            Arc::clone(&self.runtime) as Arc<dyn DelegationHandler>,
            self.runtime.config().agent_id.clone(),
            self.config.auth_token.clone(),
        ));
        let port = self.config.port;
        let server_handle = tokio::spawn(async move {
            if let Err(e) = a2a::start_server(state, port).await {
                error!("a2a server error: {}", e);
            }
        });

        let mut reap_interval = tokio::time::interval(Duration::from_secs(60));
        let cancel = self.runtime.cancel_token().clone();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("shutdown signal received, exiting");
                    break;
                }
                _ = reap_interval.tick() => {
                    self.runtime.sessions().reap_expired();
                }
            }
        }

        server_handle.abort();
        Ok(())
    }

    pub fn shutdown(&self) {
        self.runtime.shutdown();
    }
}
