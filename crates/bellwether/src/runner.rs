//! Audit runner: config in, sealed baseline (and optional diff) out.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bellwether_baseline::{
    Baseline, BaselineBuilder, BaselineDiff, BuildContext, diff_baselines,
};
use bellwether_client::{McpClient, McpClientConfig};
use bellwether_core::{AuditError, ErrorCode};
use bellwether_interview::{
    InterviewConfig, InterviewMode, InterviewResult, InterviewScheduler, Persona, Scenario,
    WorkflowDefinition, load_scenarios, load_workflows,
};
use bellwether_llm::{
    BudgetConfig, BudgetTracker, FallbackClient, LlmProvider, OllamaConfig, OllamaProvider,
    OpenAiCompatConfig, OpenAiCompatProvider,
};
use bellwether_transport::{
    HttpTransport, HttpTransportConfig, SseTransport, SseTransportConfig, StdioTransport,
    StdioTransportConfig, Transport, TransportKind,
};

use crate::config::{AuditConfig, AuditMode};
use crate::exit::ExitStatus;

/// Initialize tracing with an env-filter, the way the CLI entrypoints do.
pub fn init_tracing(level: Option<&str>) {
    use tracing_subscriber::EnvFilter;
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Everything one audit run produced.
#[derive(Debug)]
pub struct AuditOutcome {
    /// The sealed baseline
    pub baseline: Baseline,
    /// The interview behind it
    pub interview: InterviewResult,
    /// Diff against the prior baseline, when one was configured
    pub diff: Option<BaselineDiff>,
    /// Exit status under the configured drift policy
    pub exit: ExitStatus,
}

/// Wires transport, client, LLM stack, scheduler, and baseline builder
/// from an [`AuditConfig`].
pub struct AuditRunner {
    config: AuditConfig,
    api_key: Option<String>,
}

impl std::fmt::Debug for AuditRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRunner")
            .field("config", &self.config.mode)
            .finish()
    }
}

impl AuditRunner {
    /// Create a runner over a validated configuration.
    pub fn new(config: AuditConfig) -> Result<Self, AuditError> {
        config.validate()?;
        Ok(Self {
            config,
            api_key: None,
        })
    }

    /// Attach the resolved API credential (resolution itself lives in the
    /// CLI's credential chain).
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Build the configured transport.
    pub fn build_transport(&self) -> Result<Arc<dyn Transport>, AuditError> {
        let server = &self.config.server;
        let transport: Arc<dyn Transport> = match server.effective_transport() {
            TransportKind::Stdio => {
                let command = server.command.clone().ok_or_else(|| {
                    AuditError::new(ErrorCode::ValidationConfig, "server.command missing")
                })?;
                Arc::new(StdioTransport::new(StdioTransportConfig {
                    command,
                    args: server.args.clone(),
                    env: server.env.clone(),
                    ..Default::default()
                }))
            }
            TransportKind::Http => {
                let config = HttpTransportConfig {
                    base_url: server.url.clone().unwrap_or_default(),
                    timeout: server.timeout_duration(),
                    read_timeout: server.timeout_duration(),
                    ..Default::default()
                };
                Arc::new(
                    HttpTransport::new(config)
                        .map_err(AuditError::from)?,
                )
            }
            kind @ (TransportKind::Sse | TransportKind::StreamableHttp) => {
                let config = SseTransportConfig {
                    http: HttpTransportConfig {
                        base_url: server.url.clone().unwrap_or_default(),
                        timeout: server.timeout_duration(),
                        read_timeout: server.timeout_duration(),
                        ..Default::default()
                    },
                    kind,
                    ..Default::default()
                };
                Arc::new(
                    SseTransport::new(config)
                        .map_err(AuditError::from)?,
                )
            }
        };
        Ok(transport)
    }

    /// Build the LLM stack for explore mode: configured provider first,
    /// wrapped in the fallback chain, all reporting into the budget.
    fn build_llm(
        &self,
        budget: &Arc<BudgetTracker>,
    ) -> Result<Option<Arc<dyn LlmProvider>>, AuditError> {
        if self.config.mode == AuditMode::Structural {
            return Ok(None);
        }

        let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();
        let provider_id = self.config.llm.provider.as_deref().unwrap_or("openai");

        match provider_id {
            "ollama" => {
                let mut config = OllamaConfig::default();
                if let Some(base_url) = &self.config.llm.base_url {
                    config.base_url = base_url.clone();
                }
                if let Some(model) = &self.config.llm.model {
                    config.default_model = model.clone();
                }
                providers.push(Arc::new(OllamaProvider::new(config).map_err(AuditError::from)?));
            }
            other => {
                let Some(api_key) = self.api_key.clone() else {
                    warn!("no API credential resolved; falling back to structural mode");
                    return Ok(None);
                };
                let mut config = OpenAiCompatConfig {
                    id: other.to_string(),
                    api_key,
                    // Keep generation prompts inside a conservative window
                    context_budget_tokens: Some(32_000),
                    ..Default::default()
                };
                if let Some(base_url) = &self.config.llm.base_url {
                    config.base_url = base_url.clone();
                }
                if let Some(model) = &self.config.llm.model {
                    config.default_model = model.clone();
                }
                providers.push(Arc::new(
                    OpenAiCompatProvider::new(config).map_err(AuditError::from)?,
                ));
            }
        }

        let chain = FallbackClient::new(providers, Some(budget.usage_callback()));
        Ok(Some(Arc::new(chain)))
    }

    fn resolve_personas(&self) -> Vec<Persona> {
        if self.config.test.personas.is_empty() {
            return Persona::defaults();
        }
        let mut personas = Vec::new();
        for id in &self.config.test.personas {
            match Persona::builtin(id) {
                Some(persona) => personas.push(persona),
                None => warn!("unknown persona '{}', skipping", id),
            }
        }
        if personas.is_empty() {
            Persona::defaults()
        } else {
            personas
        }
    }

    fn load_scenarios(&self) -> Result<Vec<Scenario>, AuditError> {
        match &self.config.scenarios.path {
            Some(path) => load_scenarios(Path::new(path)),
            None => Ok(Vec::new()),
        }
    }

    fn load_workflows(&self) -> Result<Vec<WorkflowDefinition>, AuditError> {
        match &self.config.workflows.path {
            Some(path) => load_workflows(Path::new(path)),
            None => Ok(Vec::new()),
        }
    }

    fn interview_config(&self) -> InterviewConfig {
        InterviewConfig {
            personas: self.resolve_personas(),
            max_questions_per_tool: self.config.test.max_questions_per_tool,
            parallel_personas: self.config.test.parallel_personas,
            skip_error_tests: self.config.test.skip_error_tests,
            mode: match self.config.mode {
                AuditMode::Structural => InterviewMode::Structural,
                AuditMode::Explore => InterviewMode::Explore,
            },
            cache_enabled: self.config.cache.enabled,
            discover_workflows: self.config.workflows.discover,
            ..Default::default()
        }
    }

    /// Run the audit end to end.
    pub async fn run(&self, cancel: CancellationToken) -> Result<AuditOutcome, AuditError> {
        let scenarios = self.load_scenarios()?;
        let workflows = self.load_workflows()?;

        let transport = self.build_transport()?;
        let (client, _notifications) =
            McpClient::connect(transport, McpClientConfig::default()).await?;

        let discovery = client.discover().await?;
        client.ping().await?;
        info!(
            "connected to {} v{} over {}",
            discovery.server_info.name,
            discovery.server_info.version,
            self.config.server.effective_transport()
        );

        let budget = Arc::new(BudgetTracker::new(BudgetConfig::default()));
        let llm = self.build_llm(&budget)?;

        let client = Arc::new(client);
        let scheduler = InterviewScheduler::new(
            Arc::clone(&client) as Arc<dyn bellwether_interview::ToolInvoker>,
            llm,
            Some(Arc::clone(&budget)),
            self.interview_config(),
        );
        let interview = scheduler
            .run(&discovery, &scenarios, &workflows, cancel)
            .await;

        client.close().await.ok();

        let context = BuildContext {
            mode: match self.config.mode {
                AuditMode::Structural => "check".to_string(),
                AuditMode::Explore => "explore".to_string(),
            },
            cli_version: env!("CARGO_PKG_VERSION").to_string(),
            server_command: self.config.server.command.as_ref().map(|command| {
                let mut full = command.clone();
                for arg in &self.config.server.args {
                    full.push(' ');
                    full.push_str(arg);
                }
                full
            }),
            model: self.config.llm.model.clone(),
        };
        let baseline = BaselineBuilder::build(&discovery, &interview, &context);

        let (diff, exit) = match &self.config.baseline.compare_path {
            Some(path) => {
                let prior = Baseline::load(Path::new(path))?;
                if !prior.diff_compatible(&baseline) {
                    return Err(AuditError::new(
                        ErrorCode::ValidationConfig,
                        format!(
                            "baseline {} (v{}) is not diff-compatible with v{}",
                            path, prior.version, baseline.version
                        ),
                    ));
                }
                let diff = diff_baselines(&prior, &baseline);
                let exit =
                    ExitStatus::from_drift(diff.severity, self.config.baseline.fail_on_drift);
                (Some(diff), exit)
            }
            None => (None, ExitStatus::Success),
        };

        Ok(AuditOutcome {
            baseline,
            interview,
            diff,
            exit,
        })
    }
}
