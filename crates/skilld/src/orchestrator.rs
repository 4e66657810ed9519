//! Turn orchestration.
//!
//! One turn runs match -> disclose -> tier aggregation -> dispatch.
//! Dispatch goes to a peer when a selected skill needs a capability this
//! agent lacks (an unserved tier or unregistered tools), otherwise the
//! turn executes locally against the resolved model. Every step charges
//! or consults session state under a single `&mut Session`, so a turn is
//! race-free by construction.

use async_trait::async_trait;
use skilld_core::config::Config;
use skilld_core::events::{
    EventPayload, SkillsMatchedPayload, TierDegradedPayload, TurnCompletedPayload,
    TurnFailedPayload,
};
use skilld_core::skills::SkillDescriptor;
use skilld_core::tier::ModelTier;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::a2a::{DelegationError, DelegationRouter};
use crate::loader::{LoadError, SkillLoader};
use crate::matcher::Matcher;
use crate::registry::Registry;
use crate::render::render_context;
use crate::resolver::{ModelHandle, ResolveError, TierResolver};
use crate::session::Session;
use crate::tools::ToolRegistry;

#[derive(Debug, thiserror::Error)]
#[error("model execution failed: {0}")]
pub struct BackendError(pub String);

/// Boundary to the model provider SDK.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(
        &self,
        handle: &ModelHandle,
        context: &str,
        query: &str,
        tools: &ToolRegistry,
    ) -> Result<String, BackendError>;
}

/// Deterministic stand-in backend used until a provider SDK is wired in.
/// Replies with the serving model and the disclosed context size.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoBackend;

#[async_trait]
impl ModelBackend for EchoBackend {
    async fn complete(
        &self,
        handle: &ModelHandle,
        context: &str,
        query: &str,
        _tools: &ToolRegistry,
    ) -> Result<String, BackendError> {
        Ok(format!(
            "[{}/{}] {} (context: {} chars)",
            handle.provider,
            handle.model,
            query,
            context.len()
        ))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Delegation(#[from] DelegationError),

    #[error("skill '{skill}' requires unregistered tools: {missing}")]
    MissingTools { skill: String, missing: String },

    #[error("turn cancelled")]
    Cancelled,

    #[error("model execution failed: {reason}")]
    Execution { reason: String },
}

impl TurnError {
    /// Fatal errors end the turn with no fallback; everything else
    /// leaves the session usable for the next turn.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Resolve(ResolveError::NoModelAvailable { .. }))
    }
}

/// Result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    /// Skills disclosed for this turn, in rank order.
    pub skills: Vec<String>,
    /// Tier that served the turn.
    pub tier: ModelTier,
    /// Model handle for a locally-served turn; absent when delegated.
    pub model: Option<Arc<ModelHandle>>,
    pub delegated: bool,
}

/// Drives the turn pipeline over shared runtime components.
pub struct Orchestrator {
    config: Config,
    registry: Arc<Registry>,
    matcher: Arc<dyn Matcher>,
    loader: SkillLoader,
    resolver: Arc<TierResolver>,
    router: Arc<DelegationRouter>,
    tools: Arc<ToolRegistry>,
    backend: Arc<dyn ModelBackend>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        registry: Arc<Registry>,
        matcher: Arc<dyn Matcher>,
        resolver: Arc<TierResolver>,
        router: Arc<DelegationRouter>,
        tools: Arc<ToolRegistry>,
        backend: Arc<dyn ModelBackend>,
    ) -> Self {
        let loader = SkillLoader::new(config.max_body_chars, config.context_budget_chars);
        Self {
            config,
            registry,
            matcher,
            loader,
            resolver,
            router,
            tools,
            backend,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Whether any registered skill or tool serves the capability.
    pub fn serves_capability(&self, capability: &str) -> bool {
        let snapshot = self.registry.snapshot();
        snapshot.get(capability).is_some()
            || snapshot
                .skills()
                .iter()
                .any(|s| s.tags.iter().any(|t| t == capability))
            || self.tools.has(capability)
    }

    /// Run one turn. Failures are recorded as a TURN_FAILED event before
    /// surfacing.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        match self.run_turn_inner(session, query, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                session.record_event(EventPayload::TurnFailed(TurnFailedPayload {
                    session_id: session.id,
                    reason: e.to_string(),
                }));
                Err(e)
            }
        }
    }

    async fn run_turn_inner(
        &self,
        session: &mut Session,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        if cancel.is_cancelled() {
            return Err(TurnError::Cancelled);
        }
        session.touch();

        // Match against the frozen snapshot; a concurrent rescan cannot
        // change this turn's selection.
        let snapshot = self.registry.snapshot();
        let selection = self
            .matcher
            .select(&snapshot, query, self.config.match_top_k);
        for problem in &selection.errors {
            warn!(%problem, "skill selection problem");
        }
        let matched: Vec<SkillDescriptor> = selection
            .skills
            .into_iter()
            .map(|m| m.descriptor)
            .collect();
        session.record_event(EventPayload::SkillsMatched(SkillsMatchedPayload {
            session_id: session.id,
            query: query.to_string(),
            skills: matched.iter().map(|d| d.name.clone()).collect(),
        }));
        debug!(
            count = matched.len(),
            strategy = ?selection.strategy,
            "skills matched"
        );

        // Disclose bodies lazily, in rank order.
        for descriptor in &matched {
            self.loader.load(descriptor, session)?;
        }

        // The turn runs at the strongest tier any selected skill prefers.
        let required_tier = matched
            .iter()
            .filter_map(|d| d.preferred_tier)
            .max()
            .unwrap_or(ModelTier::Fast);

        // A skill whose capability this agent cannot serve routes the
        // turn to a peer instead.
        let delegatable = matched.iter().find_map(|d| {
            let missing = self.tools.missing(&d.required_tools);
            let tier_gap = d
                .preferred_tier
                .is_some_and(|t| !self.resolver.tier_available(t));
            if !missing.is_empty() || tier_gap {
                Some((d, missing))
            } else {
                None
            }
        });

        if let Some((descriptor, missing)) = delegatable {
            if self.router.has_peers() {
                match self
                    .router
                    .delegate(session, &descriptor.name, query, cancel)
                    .await
                {
                    Ok(message) => {
                        let outcome = TurnOutcome {
                            response: message.result.unwrap_or_default(),
                            skills: matched.iter().map(|d| d.name.clone()).collect(),
                            tier: required_tier,
                            model: None,
                            delegated: true,
                        };
                        self.record_completed(session, &outcome);
                        return Ok(outcome);
                    }
                    Err(e) => {
                        // A peer failure is recoverable locally only when
                        // every declared tool is actually registered.
                        if missing.is_empty() {
                            warn!(
                                skill = %descriptor.name,
                                error = %e,
                                "delegation failed, retrying locally"
                            );
                        } else {
                            return Err(e.into());
                        }
                    }
                }
            } else if !missing.is_empty() {
                return Err(TurnError::MissingTools {
                    skill: descriptor.name.clone(),
                    missing: missing.join(", "),
                });
            }
            // A tier gap without peers degrades locally below.
        }

        self.run_local(session, query, &matched, required_tier, cancel)
            .await
    }

    async fn run_local(
        &self,
        session: &mut Session,
        query: &str,
        matched: &[SkillDescriptor],
        required_tier: ModelTier,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let resolution = self.resolver.resolve(required_tier)?;
        if resolution.degraded() {
            session.record_event(EventPayload::TierDegraded(TierDegradedPayload {
                session_id: session.id,
                requested: required_tier,
                resolved: resolution.handle.tier,
                provider: resolution.handle.provider.clone(),
            }));
        }

        let snapshot = self.registry.snapshot();
        let disclosed = session.disclosed_bodies();
        let context = render_context(snapshot.skills(), &disclosed);

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(TurnError::Cancelled),
            result = self.backend.complete(&resolution.handle, &context, query, &self.tools) => {
                result.map_err(|e| TurnError::Execution { reason: e.0 })?
            }
        };

        let outcome = TurnOutcome {
            response,
            skills: matched.iter().map(|d| d.name.clone()).collect(),
            tier: resolution.handle.tier,
            model: Some(Arc::clone(&resolution.handle)),
            delegated: false,
        };
        self.record_completed(session, &outcome);
        Ok(outcome)
    }

    fn record_completed(&self, session: &mut Session, outcome: &TurnOutcome) {
        session.record_event(EventPayload::TurnCompleted(TurnCompletedPayload {
            session_id: session.id,
            skills: outcome.skills.clone(),
            tier: outcome.tier,
            delegated: outcome.delegated,
        }));
        info!(
            session_id = %session.id,
            skills = outcome.skills.len(),
            tier = %outcome.tier,
            delegated = outcome.delegated,
            "turn completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::{DelegationTransport, TransportError};
    use crate::matcher::KeywordMatcher;
    use crate::resolver::{ProviderCatalog, StaticCatalog};
    use skilld_core::a2a::{DelegationMessage, DelegationStatus};
    use skilld_core::events::EventType;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NeverTransport;

    #[async_trait]
    impl DelegationTransport for NeverTransport {
        async fn send(
            &self,
            _peer: &str,
            _message: &DelegationMessage,
        ) -> Result<DelegationMessage, TransportError> {
            std::future::pending().await
        }
    }

    struct CompletingTransport;

    #[async_trait]
    impl DelegationTransport for CompletingTransport {
        async fn send(
            &self,
            _peer: &str,
            message: &DelegationMessage,
        ) -> Result<DelegationMessage, TransportError> {
            let mut reply = message.clone();
            reply.status = DelegationStatus::Completed;
            reply.result = Some(format!("peer handled {}", message.capability_required));
            Ok(reply)
        }
    }

    /// Catalog restricted to a single tier.
    struct OnlyTier(ModelTier);

    impl ProviderCatalog for OnlyTier {
        fn model_for(&self, _provider: &str, tier: ModelTier) -> Option<String> {
            (tier == self.0).then(|| format!("{}-model", tier.as_str()))
        }
    }

    struct Fixture {
        _tmp: TempDir,
        config: Config,
        registry: Arc<Registry>,
    }

    fn skills_fixture(skills: &[(&str, &str, &str)]) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let skills_dir = tmp.path().join("skills");
        fs::create_dir_all(&skills_dir).unwrap();
        for (name, extra_frontmatter, body) in skills {
            let dir = skills_dir.join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(
                dir.join("SKILL.md"),
                format!(
                    "---\nname: {name}\ndescription: Works with {name} tasks.\n{extra_frontmatter}---\n{body}"
                ),
            )
            .unwrap();
        }

        let mut config = Config::default();
        config.skills_dirs = vec![skills_dir];

        let registry = Arc::new(Registry::new());
        let errors = registry.rescan(&config, tmp.path());
        assert!(errors.is_empty());

        Fixture {
            _tmp: tmp,
            config,
            registry,
        }
    }

    fn orchestrator_with(
        fixture: &Fixture,
        resolver: TierResolver,
        transport: Arc<dyn DelegationTransport>,
        peers: Vec<String>,
    ) -> Orchestrator {
        let router = DelegationRouter::new(
            transport,
            peers,
            Duration::from_millis(100),
            "skilld-test",
        );
        Orchestrator::new(
            fixture.config.clone(),
            Arc::clone(&fixture.registry),
            Arc::new(KeywordMatcher),
            Arc::new(resolver),
            Arc::new(router),
            Arc::new(ToolRegistry::new()),
            Arc::new(EchoBackend),
        )
    }

    fn event_types(session: &Session) -> Vec<EventType> {
        session
            .events()
            .iter()
            .map(|e| e.payload.event_type())
            .collect()
    }

    #[tokio::test]
    async fn pdf_query_discloses_and_completes_locally() {
        let fixture = skills_fixture(&[
            ("pdf-processing", "tags:\n  - pdf\n", "Use the pdf tool."),
            ("code-review", "", "Review code carefully."),
        ]);
        let orchestrator = orchestrator_with(
            &fixture,
            TierResolver::from_config(&fixture.config),
            Arc::new(CompletingTransport),
            Vec::new(),
        );
        let mut session = Session::new();
        let cancel = CancellationToken::new();

        let outcome = orchestrator
            .run_turn(&mut session, "Extract text from this pdf report", &cancel)
            .await
            .unwrap();

        assert!(!outcome.delegated);
        assert!(outcome.skills.contains(&"pdf-processing".to_string()));
        assert!(session.is_disclosed("pdf-processing"));
        assert!(!session.is_disclosed("code-review"));

        let types = event_types(&session);
        assert!(types.contains(&EventType::SkillsMatched));
        assert!(types.contains(&EventType::SkillDisclosed));
        assert!(types.contains(&EventType::TurnCompleted));
    }

    #[tokio::test]
    async fn second_turn_reuses_disclosed_body() {
        let fixture = skills_fixture(&[(
            "pdf-processing",
            "tags:\n  - pdf\n",
            "Use the pdf tool.",
        )]);
        let orchestrator = orchestrator_with(
            &fixture,
            TierResolver::from_config(&fixture.config),
            Arc::new(CompletingTransport),
            Vec::new(),
        );
        let mut session = Session::new();
        let cancel = CancellationToken::new();

        orchestrator
            .run_turn(&mut session, "summarize the pdf", &cancel)
            .await
            .unwrap();
        let charged = session.disclosed_chars();
        let disclosures = event_types(&session)
            .iter()
            .filter(|t| **t == EventType::SkillDisclosed)
            .count();

        orchestrator
            .run_turn(&mut session, "now redact the pdf", &cancel)
            .await
            .unwrap();

        assert_eq!(session.disclosed_chars(), charged);
        let disclosures_after = event_types(&session)
            .iter()
            .filter(|t| **t == EventType::SkillDisclosed)
            .count();
        assert_eq!(disclosures, disclosures_after);
    }

    #[tokio::test]
    async fn pro_preference_degrades_to_fast_without_peers() {
        let fixture = skills_fixture(&[(
            "deep-analysis",
            "tags:\n  - analysis\ntier: pro\n",
            "Think hard.",
        )]);
        let resolver = TierResolver::new(
            Arc::new(OnlyTier(ModelTier::Fast)),
            vec!["anthropic".to_string()],
        );
        let orchestrator =
            orchestrator_with(&fixture, resolver, Arc::new(CompletingTransport), Vec::new());
        let mut session = Session::new();
        let cancel = CancellationToken::new();

        let outcome = orchestrator
            .run_turn(&mut session, "run a deep analysis", &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.tier, ModelTier::Fast);
        assert!(!outcome.delegated);
        assert!(event_types(&session).contains(&EventType::TierDegraded));
    }

    #[tokio::test]
    async fn tier_gap_with_peer_delegates() {
        let fixture = skills_fixture(&[(
            "deep-analysis",
            "tags:\n  - analysis\ntier: pro\n",
            "Think hard.",
        )]);
        let resolver = TierResolver::new(
            Arc::new(OnlyTier(ModelTier::Fast)),
            vec!["anthropic".to_string()],
        );
        let orchestrator = orchestrator_with(
            &fixture,
            resolver,
            Arc::new(CompletingTransport),
            vec!["http://127.0.0.1:9101".to_string()],
        );
        let mut session = Session::new();
        let cancel = CancellationToken::new();

        let outcome = orchestrator
            .run_turn(&mut session, "run a deep analysis", &cancel)
            .await
            .unwrap();

        assert!(outcome.delegated);
        assert_eq!(outcome.response, "peer handled deep-analysis");
        let types = event_types(&session);
        assert!(types.contains(&EventType::DelegationSent));
        assert!(types.contains(&EventType::DelegationCompleted));
    }

    #[tokio::test(start_paused = true)]
    async fn delegation_timeout_surfaces_when_not_locally_capable() {
        let fixture = skills_fixture(&[(
            "pdf-processing",
            "tags:\n  - pdf\nrequired-tools: pdf_extract\n",
            "Use the pdf tool.",
        )]);
        let orchestrator = orchestrator_with(
            &fixture,
            TierResolver::from_config(&fixture.config),
            Arc::new(NeverTransport),
            vec!["http://127.0.0.1:9102".to_string()],
        );
        let mut session = Session::new();
        let cancel = CancellationToken::new();

        let err = orchestrator
            .run_turn(&mut session, "extract the pdf tables", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TurnError::Delegation(DelegationError::Timeout { .. })
        ));
        let history = session.delegation_history();
        assert_eq!(history[0].status, DelegationStatus::Failed);
        assert!(event_types(&session).contains(&EventType::TurnFailed));
    }

    #[tokio::test]
    async fn missing_tools_without_peers_fails_the_turn() {
        let fixture = skills_fixture(&[(
            "pdf-processing",
            "tags:\n  - pdf\nrequired-tools: pdf_extract\n",
            "Use the pdf tool.",
        )]);
        let orchestrator = orchestrator_with(
            &fixture,
            TierResolver::from_config(&fixture.config),
            Arc::new(CompletingTransport),
            Vec::new(),
        );
        let mut session = Session::new();
        let cancel = CancellationToken::new();

        let err = orchestrator
            .run_turn(&mut session, "extract the pdf tables", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, TurnError::MissingTools { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn no_model_anywhere_is_fatal() {
        let fixture = skills_fixture(&[("pdf-processing", "tags:\n  - pdf\n", "Use it.")]);
        let resolver = TierResolver::new(
            Arc::new(StaticCatalog::new()),
            vec!["unknown-provider".to_string()],
        );
        let orchestrator =
            orchestrator_with(&fixture, resolver, Arc::new(CompletingTransport), Vec::new());
        let mut session = Session::new();
        let cancel = CancellationToken::new();

        let err = orchestrator
            .run_turn(&mut session, "extract the pdf", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TurnError::Resolve(ResolveError::NoModelAvailable { .. })
        ));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn cancelled_turn_short_circuits() {
        let fixture = skills_fixture(&[("pdf-processing", "", "Use it.")]);
        let orchestrator = orchestrator_with(
            &fixture,
            TierResolver::from_config(&fixture.config),
            Arc::new(CompletingTransport),
            Vec::new(),
        );
        let mut session = Session::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .run_turn(&mut session, "anything", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Cancelled));
    }

    #[tokio::test]
    async fn serves_capability_by_skill_name_and_tag() {
        let fixture = skills_fixture(&[("pdf-processing", "tags:\n  - pdf\n", "Use it.")]);
        let orchestrator = orchestrator_with(
            &fixture,
            TierResolver::from_config(&fixture.config),
            Arc::new(CompletingTransport),
            Vec::new(),
        );

        assert!(orchestrator.serves_capability("pdf-processing"));
        assert!(orchestrator.serves_capability("pdf"));
        assert!(!orchestrator.serves_capability("video-editing"));
    }
}
