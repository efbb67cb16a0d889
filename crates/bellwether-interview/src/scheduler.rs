//! Interview scheduler.
//!
//! Fans a discovered server out across `(persona, tool)` pairs: question
//! generation (LLM-backed or structural), tool invocation, outcome
//! analysis, then scripted scenarios and workflows, and finally profile
//! synthesis. Personas may run in parallel up to a bounded concurrency;
//! tools within a persona run serially, and no tool ever has more than one
//! outstanding call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value, json};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bellwether_client::{Discovery, McpClient};
use bellwether_core::AuditError;
use bellwether_llm::{
    BudgetTracker, ChatMessage, CompletionOptions, LlmProvider, parse_json,
};
use bellwether_protocol::{CallToolResult, GetPromptResult, ReadResourceResult, Tool};

use crate::cache::ResponseCache;
use crate::persona::Persona;
use crate::question::{
    Question, build_generation_prompt, generate_structural_questions, parse_generated_questions,
};
use crate::scenario::{Scenario, ScenarioResult, evaluate_assertions};
use crate::types::{
    ExpectedOutcome, Interaction, InterviewPhase, InterviewResult, PromptCheck, ResourceCheck,
    ToolProfile,
};
use crate::autogen;
use crate::workflow::{WorkflowDefinition, WorkflowResult, execute_workflow};

/// Surface the scheduler drives tool calls through.
///
/// `McpClient` is the production implementation; tests plug in doubles.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Call a tool.
    async fn call_tool(
        &self,
        name: &str,
        args: Option<Map<String, Value>>,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult, AuditError>;

    /// Render a prompt.
    async fn get_prompt(
        &self,
        name: &str,
        args: Option<Map<String, Value>>,
    ) -> Result<GetPromptResult, AuditError>;

    /// Read a resource.
    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, AuditError>;
}

#[async_trait]
impl ToolInvoker for McpClient {
    async fn call_tool(
        &self,
        name: &str,
        args: Option<Map<String, Value>>,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult, AuditError> {
        McpClient::call_tool(self, name, args, cancel).await
    }

    async fn get_prompt(
        &self,
        name: &str,
        args: Option<Map<String, Value>>,
    ) -> Result<GetPromptResult, AuditError> {
        McpClient::get_prompt(self, name, args).await
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, AuditError> {
        McpClient::read_resource(self, uri).await
    }
}

/// Interview mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterviewMode {
    /// No LLM: questions synthesized from schemas, template synthesis
    Structural,
    /// LLM-driven question generation, analysis, and synthesis
    Explore,
}

/// Scheduler configuration.
#[derive(Clone)]
pub struct InterviewConfig {
    /// Personas to interview with
    pub personas: Vec<Persona>,
    /// Question cap per `(persona, tool)` pair
    pub max_questions_per_tool: usize,
    /// Run personas in parallel
    pub parallel_personas: bool,
    /// Worker bound when personas run in parallel
    pub persona_concurrency: usize,
    /// Skip deliberately-failing questions
    pub skip_error_tests: bool,
    /// Interview mode
    pub mode: InterviewMode,
    /// Serve repeated `(persona, tool, args)` calls from the cache
    pub cache_enabled: bool,
    /// Auto-generate workflows from the tool list
    pub discover_workflows: bool,
    /// Cap on auto-generated workflows
    pub max_workflows: usize,
    /// Wall-clock deadline for the whole interview
    pub global_deadline: Option<Duration>,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            personas: Persona::defaults(),
            max_questions_per_tool: 5,
            parallel_personas: false,
            persona_concurrency: 2,
            skip_error_tests: false,
            mode: InterviewMode::Explore,
            cache_enabled: true,
            discover_workflows: true,
            max_workflows: 5,
            global_deadline: None,
        }
    }
}

impl std::fmt::Debug for InterviewConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterviewConfig")
            .field("personas", &self.personas.len())
            .field("max_questions_per_tool", &self.max_questions_per_tool)
            .field("parallel_personas", &self.parallel_personas)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Progress event delivered through the callback.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Current phase
    pub phase: InterviewPhase,
    /// Human-readable detail
    pub detail: String,
}

/// Progress callback type.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Token estimates used for budget admission before LLM calls.
const EST_GENERATION_TOKENS: (u64, u64) = (1500, 800);
const EST_ANALYSIS_TOKENS: (u64, u64) = (600, 150);
const EST_SYNTHESIS_TOKENS: (u64, u64) = (2000, 500);

/// The interview scheduler.
pub struct InterviewScheduler {
    invoker: Arc<dyn ToolInvoker>,
    llm: Option<Arc<dyn LlmProvider>>,
    budget: Option<Arc<BudgetTracker>>,
    config: InterviewConfig,
    cache: Arc<ResponseCache>,
    /// One outstanding call per tool, regardless of persona parallelism
    tool_locks: Arc<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for InterviewScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterviewScheduler")
            .field("config", &self.config)
            .field("llm", &self.llm.is_some())
            .finish()
    }
}

impl InterviewScheduler {
    /// Create a scheduler.
    pub fn new(
        invoker: Arc<dyn ToolInvoker>,
        llm: Option<Arc<dyn LlmProvider>>,
        budget: Option<Arc<BudgetTracker>>,
        config: InterviewConfig,
    ) -> Self {
        Self {
            invoker,
            llm,
            budget,
            config,
            cache: Arc::new(ResponseCache::new()),
            tool_locks: Arc::new(DashMap::new()),
            progress: None,
        }
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    fn emit(&self, phase: InterviewPhase, detail: impl Into<String>) {
        if let Some(progress) = &self.progress {
            progress(&ProgressEvent {
                phase,
                detail: detail.into(),
            });
        }
    }

    /// Whether LLM calls are available and admitted right now.
    fn llm_admitted(&self, estimate: (u64, u64)) -> bool {
        if self.config.mode == InterviewMode::Structural {
            return false;
        }
        let Some(_llm) = &self.llm else {
            return false;
        };
        match &self.budget {
            Some(budget) => !budget.would_exceed(estimate.0, estimate.1),
            None => true,
        }
    }

    /// Run the full interview.
    ///
    /// Cancellation is cooperative: no new work starts after the signal,
    /// in-flight tool calls are cancelled through the multiplexer, and the
    /// partial result comes back with `cancelled = true`.
    pub async fn run(
        &self,
        discovery: &Discovery,
        scenarios: &[Scenario],
        workflows: &[WorkflowDefinition],
        cancel: CancellationToken,
    ) -> InterviewResult {
        let started_at = chrono::Utc::now();
        self.emit(
            InterviewPhase::Starting,
            format!(
                "interviewing {} tools with {} personas",
                discovery.tools.len(),
                self.config.personas.len()
            ),
        );
        self.cache.clear();

        // The global deadline cancels a child token; everything below
        // watches the child, so an external cancel propagates too.
        let run_token = cancel.child_token();
        if let Some(deadline) = self.config.global_deadline {
            let deadline_token = run_token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                deadline_token.cancel();
            });
        }

        // Phase 1: per-tool fanout across personas
        self.emit(InterviewPhase::Interviewing, "running persona interviews");
        let interactions = self.run_personas(discovery, &run_token).await;

        // Phase 2: prompts
        self.emit(InterviewPhase::Prompts, "rendering discovered prompts");
        let prompt_checks = self.check_prompts(discovery, &run_token).await;

        // Phase 3: resources
        self.emit(InterviewPhase::Resources, "reading discovered resources");
        let resource_checks = self.check_resources(discovery, &run_token).await;

        // Phase 4: scenarios and workflows, in declaration order
        self.emit(InterviewPhase::Workflows, "running scenarios and workflows");
        let scenario_results = self.run_scenarios(scenarios, &run_token).await;
        let mut all_workflows: Vec<WorkflowDefinition> = workflows.to_vec();
        if self.config.discover_workflows {
            all_workflows.extend(autogen::generate_workflows(
                &discovery.tools,
                self.config.max_workflows,
            ));
        }
        let workflow_results = self.run_workflows(&all_workflows, &run_token).await;

        // Phase 5: synthesis
        self.emit(InterviewPhase::Synthesizing, "synthesizing tool profiles");
        let tool_profiles = self
            .synthesize_profiles(&discovery.tools, &interactions, &scenario_results, &run_token)
            .await;
        let summary = self.synthesize_summary(discovery, &interactions, &tool_profiles);

        let cancelled = run_token.is_cancelled();
        self.emit(
            InterviewPhase::Complete,
            if cancelled { "cancelled" } else { "complete" },
        );

        InterviewResult {
            interactions,
            tool_profiles,
            prompt_checks,
            resource_checks,
            scenario_results,
            workflow_results,
            summary,
            personas: self.config.personas.iter().map(|p| p.id.clone()).collect(),
            cancelled,
            started_at,
            finished_at: chrono::Utc::now(),
        }
    }

    /// Run every `(persona, tool)` pair, honoring the concurrency policy.
    async fn run_personas(
        &self,
        discovery: &Discovery,
        cancel: &CancellationToken,
    ) -> Vec<Interaction> {
        if !self.config.parallel_personas || self.config.personas.len() <= 1 {
            let mut interactions = Vec::new();
            for persona in &self.config.personas {
                if cancel.is_cancelled() {
                    break;
                }
                interactions.extend(self.run_one_persona(persona, discovery, cancel).await);
            }
            return interactions;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.persona_concurrency.max(1)));
        let mut handles = Vec::new();
        for persona in self.config.personas.clone() {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let scheduler = self.clone_for_worker();
            let discovery = discovery.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return Vec::new();
                };
                if cancel.is_cancelled() {
                    return Vec::new();
                }
                scheduler.run_one_persona(&persona, &discovery, &cancel).await
            }));
        }

        let mut interactions = Vec::new();
        for handle in handles {
            if let Ok(batch) = handle.await {
                interactions.extend(batch);
            }
        }
        interactions
    }

    /// A cheap clone sharing cache, locks, and collaborators.
    fn clone_for_worker(&self) -> Self {
        Self {
            invoker: Arc::clone(&self.invoker),
            llm: self.llm.clone(),
            budget: self.budget.clone(),
            config: self.config.clone(),
            cache: Arc::clone(&self.cache),
            tool_locks: Arc::clone(&self.tool_locks),
            progress: self.progress.clone(),
        }
    }

    /// Tools within one persona run serially.
    async fn run_one_persona(
        &self,
        persona: &Persona,
        discovery: &Discovery,
        cancel: &CancellationToken,
    ) -> Vec<Interaction> {
        let mut interactions = Vec::new();
        for tool in &discovery.tools {
            if cancel.is_cancelled() {
                break;
            }
            self.emit(
                InterviewPhase::Interviewing,
                format!("{} x {}", persona.id, tool.name),
            );
            interactions.extend(self.interview_tool(persona, tool, cancel).await);
        }
        interactions
    }

    /// Interview one `(persona, tool)` pair.
    async fn interview_tool(
        &self,
        persona: &Persona,
        tool: &Tool,
        cancel: &CancellationToken,
    ) -> Vec<Interaction> {
        let questions = self.generate_questions(persona, tool, cancel).await;
        let mut interactions = Vec::new();

        for question in questions {
            if cancel.is_cancelled() {
                break;
            }
            let interaction = self
                .ask_question(persona, tool, question, cancel)
                .await;
            interactions.push(interaction);
        }
        interactions
    }

    async fn generate_questions(
        &self,
        persona: &Persona,
        tool: &Tool,
        cancel: &CancellationToken,
    ) -> Vec<Question> {
        let max = self.config.max_questions_per_tool;

        if self.llm_admitted(EST_GENERATION_TOKENS) && !cancel.is_cancelled() {
            let llm = self.llm.as_ref().expect("admitted implies llm");
            let (system, user) = build_generation_prompt(tool, persona, max);
            let options = CompletionOptions::json()
                .with_system_prompt(system)
                .with_cancel(cancel.clone());
            match llm.chat(&[ChatMessage::user(user)], &options).await {
                Ok(outcome) => match parse_generated_questions(&outcome.text, max) {
                    Ok(questions) if !questions.is_empty() => {
                        let mut questions = questions;
                        if self.config.skip_error_tests {
                            questions.retain(|q| {
                                q.category.expected_outcome() != ExpectedOutcome::Error
                            });
                        }
                        return questions;
                    }
                    Ok(_) => warn!("LLM produced no usable questions for {}", tool.name),
                    Err(e) => warn!("failed to parse questions for {}: {}", tool.name, e),
                },
                Err(e) => warn!("question generation failed for {}: {}", tool.name, e),
            }
        }

        // Structural fallback keeps the interview moving without an LLM.
        generate_structural_questions(tool, max, self.config.skip_error_tests)
    }

    async fn ask_question(
        &self,
        persona: &Persona,
        tool: &Tool,
        question: Question,
        cancel: &CancellationToken,
    ) -> Interaction {
        let expected = question.category.expected_outcome();
        let args_map = question
            .args
            .as_object()
            .cloned()
            .unwrap_or_default();

        // Cache hit: skip the tool call entirely
        if self.config.cache_enabled
            && let Some(cached) = self.cache.get(&persona.id, &tool.name, &question.args)
        {
            debug!("cache hit for {} / {}", persona.id, tool.name);
            let mut interaction = Interaction {
                tool_name: tool.name.clone(),
                persona: persona.id.clone(),
                question: question.question,
                category: question.category,
                args: question.args,
                response: Some(cached),
                error: None,
                latency_ms: 0,
                expected_outcome: expected,
                outcome_correct: None,
                from_cache: true,
            };
            interaction.outcome_correct = Some(heuristic_outcome(&interaction));
            return interaction;
        }

        // At most one outstanding call per tool
        let lock = self
            .tool_locks
            .entry(tool.name.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let started = Instant::now();
        let outcome = {
            let _guard = lock.lock().await;
            self.invoker
                .call_tool(&tool.name, Some(args_map), cancel)
                .await
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut interaction = match outcome {
            Ok(response) => {
                if self.config.cache_enabled {
                    self.cache
                        .insert(&persona.id, &tool.name, &question.args, response.clone());
                }
                Interaction {
                    tool_name: tool.name.clone(),
                    persona: persona.id.clone(),
                    question: question.question,
                    category: question.category,
                    args: question.args,
                    response: Some(response),
                    error: None,
                    latency_ms,
                    expected_outcome: expected,
                    outcome_correct: None,
                    from_cache: false,
                }
            }
            Err(error) => Interaction {
                // Failures in error/security categories are signal, kept as
                // recorded outcomes rather than retried.
                tool_name: tool.name.clone(),
                persona: persona.id.clone(),
                question: question.question,
                category: question.category,
                args: question.args,
                response: None,
                error: Some(error),
                latency_ms,
                expected_outcome: expected,
                outcome_correct: None,
                from_cache: false,
            },
        };

        interaction.outcome_correct = Some(self.assess_outcome(&interaction, cancel).await);
        interaction
    }

    /// Judge whether the observed outcome matched the question's intent.
    async fn assess_outcome(&self, interaction: &Interaction, cancel: &CancellationToken) -> bool {
        let heuristic = heuristic_outcome(interaction);

        if !self.llm_admitted(EST_ANALYSIS_TOKENS) || cancel.is_cancelled() {
            return heuristic;
        }
        let llm = self.llm.as_ref().expect("admitted implies llm");

        let observed = match (&interaction.response, &interaction.error) {
            (Some(response), _) => format!(
                "tool responded (is_error={}): {}",
                response.is_error(),
                truncate(&response.text(), 600)
            ),
            (None, Some(error)) => format!("call failed: {error}"),
            (None, None) => "no outcome recorded".to_string(),
        };
        let prompt = format!(
            "A test asked: {}\nExpected outcome: {:?}\nObserved: {}\n\n\
             Did the observed outcome match the test's intent? Respond with \
             JSON: {{\"correct\": true|false}}.",
            interaction.question, interaction.expected_outcome, observed
        );
        let options = CompletionOptions::json().with_cancel(cancel.clone());

        match llm.chat(&[ChatMessage::user(prompt)], &options).await {
            Ok(outcome) => match parse_json::<Value>(&outcome.text) {
                Ok(value) => value
                    .get("correct")
                    .and_then(Value::as_bool)
                    .unwrap_or(heuristic),
                Err(_) => heuristic,
            },
            Err(e) => {
                debug!("outcome analysis failed, using heuristic: {}", e);
                heuristic
            }
        }
    }

    async fn check_prompts(
        &self,
        discovery: &Discovery,
        cancel: &CancellationToken,
    ) -> Vec<PromptCheck> {
        let mut checks = Vec::new();
        for prompt in &discovery.prompts {
            if cancel.is_cancelled() {
                break;
            }
            let mut args = Map::new();
            for argument in prompt.arguments.as_deref().unwrap_or_default() {
                if argument.required.unwrap_or(false) {
                    args.insert(argument.name.clone(), json!("example"));
                }
            }
            let check = match self.invoker.get_prompt(&prompt.name, Some(args)).await {
                Ok(result) => PromptCheck {
                    name: prompt.name.clone(),
                    ok: true,
                    error: None,
                    message_count: result.messages.len(),
                },
                Err(error) => PromptCheck {
                    name: prompt.name.clone(),
                    ok: false,
                    error: Some(error.to_string()),
                    message_count: 0,
                },
            };
            checks.push(check);
        }
        checks
    }

    async fn check_resources(
        &self,
        discovery: &Discovery,
        cancel: &CancellationToken,
    ) -> Vec<ResourceCheck> {
        let mut checks = Vec::new();
        for resource in &discovery.resources {
            if cancel.is_cancelled() {
                break;
            }
            let check = match self.invoker.read_resource(&resource.uri).await {
                Ok(_) => ResourceCheck {
                    uri: resource.uri.clone(),
                    ok: true,
                    error: None,
                },
                Err(error) => ResourceCheck {
                    uri: resource.uri.clone(),
                    ok: false,
                    error: Some(error.to_string()),
                },
            };
            checks.push(check);
        }
        checks
    }

    async fn run_scenarios(
        &self,
        scenarios: &[Scenario],
        cancel: &CancellationToken,
    ) -> Vec<ScenarioResult> {
        let mut results = Vec::new();
        for scenario in scenarios {
            if cancel.is_cancelled() {
                break;
            }
            results.push(self.run_scenario(scenario, cancel).await);
        }
        results
    }

    async fn run_scenario(&self, scenario: &Scenario, cancel: &CancellationToken) -> ScenarioResult {
        let args = scenario.args.as_object().cloned().unwrap_or_default();
        let expected = scenario.category.expected_outcome();

        if let Some(tool) = &scenario.tool {
            match self.invoker.call_tool(tool, Some(args), cancel).await {
                Ok(response) => {
                    let observed = json!({ "result": response_value(&response) });
                    let assertion_results = evaluate_assertions(&observed, &scenario.assertions);
                    let outcome_met = outcome_matches(expected, !response.is_error());
                    let all_pass = assertion_results.iter().all(|r| r.passed);
                    ScenarioResult {
                        name: scenario.name.clone(),
                        target: tool.clone(),
                        passed: outcome_met && all_pass,
                        expected_outcome_met: outcome_met,
                        assertion_results,
                        error: response.is_error().then(|| response.text()),
                    }
                }
                Err(error) => {
                    let outcome_met = outcome_matches(expected, false);
                    ScenarioResult {
                        name: scenario.name.clone(),
                        target: tool.clone(),
                        passed: outcome_met && scenario.assertions.is_empty(),
                        expected_outcome_met: outcome_met,
                        assertion_results: Vec::new(),
                        error: Some(error.to_string()),
                    }
                }
            }
        } else if let Some(prompt) = &scenario.prompt {
            match self.invoker.get_prompt(prompt, Some(args)).await {
                Ok(result) => {
                    let observed = serde_json::to_value(&result).unwrap_or(Value::Null);
                    let assertion_results = evaluate_assertions(&observed, &scenario.assertions);
                    let outcome_met = outcome_matches(expected, true);
                    let all_pass = assertion_results.iter().all(|r| r.passed);
                    ScenarioResult {
                        name: scenario.name.clone(),
                        target: prompt.clone(),
                        passed: outcome_met && all_pass,
                        expected_outcome_met: outcome_met,
                        assertion_results,
                        error: None,
                    }
                }
                Err(error) => {
                    let outcome_met = outcome_matches(expected, false);
                    ScenarioResult {
                        name: scenario.name.clone(),
                        target: prompt.clone(),
                        passed: outcome_met && scenario.assertions.is_empty(),
                        expected_outcome_met: outcome_met,
                        assertion_results: Vec::new(),
                        error: Some(error.to_string()),
                    }
                }
            }
        } else {
            ScenarioResult {
                name: scenario.name.clone(),
                target: String::new(),
                passed: false,
                expected_outcome_met: false,
                assertion_results: Vec::new(),
                error: Some("scenario names neither a tool nor a prompt".to_string()),
            }
        }
    }

    async fn run_workflows(
        &self,
        workflows: &[WorkflowDefinition],
        cancel: &CancellationToken,
    ) -> Vec<WorkflowResult> {
        let mut results = Vec::new();
        for workflow in workflows {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = workflow.validate() {
                warn!("skipping invalid workflow '{}': {}", workflow.name, e);
                continue;
            }
            results.push(execute_workflow(self.invoker.as_ref(), workflow, cancel).await);
        }
        results
    }

    async fn synthesize_profiles(
        &self,
        tools: &[Tool],
        interactions: &[Interaction],
        scenario_results: &[ScenarioResult],
        cancel: &CancellationToken,
    ) -> Vec<ToolProfile> {
        let mut profiles = Vec::new();
        for tool in tools {
            let owned: Vec<Interaction> = interactions
                .iter()
                .filter(|i| i.tool_name == tool.name)
                .cloned()
                .collect();

            let mut profile = template_profile(&tool.name, &owned);
            if self.llm_admitted(EST_SYNTHESIS_TOKENS) && !cancel.is_cancelled() {
                if let Some(refined) = self.llm_profile(tool, &owned, cancel).await {
                    profile.behavioral_notes = refined.0;
                    profile.limitations = refined.1;
                    profile.security_notes = refined.2;
                }
            }

            // Scenario assertion results feed the profile too.
            for scenario in scenario_results.iter().filter(|s| s.target == tool.name) {
                if scenario.passed {
                    profile
                        .behavioral_notes
                        .push(format!("scenario '{}' passed", scenario.name));
                } else {
                    let failed_assertions: Vec<&str> = scenario
                        .assertion_results
                        .iter()
                        .filter(|a| !a.passed)
                        .map(|a| a.path.as_str())
                        .collect();
                    let detail = if failed_assertions.is_empty() {
                        "unexpected outcome".to_string()
                    } else {
                        format!("failed assertions at {}", failed_assertions.join(", "))
                    };
                    profile
                        .limitations
                        .push(format!("scenario '{}': {}", scenario.name, detail));
                }
            }
            profiles.push(profile);
        }
        profiles
    }

    /// One LLM call summarizing a tool's interactions.
    async fn llm_profile(
        &self,
        tool: &Tool,
        interactions: &[Interaction],
        cancel: &CancellationToken,
    ) -> Option<(Vec<String>, Vec<String>, Vec<String>)> {
        let llm = self.llm.as_ref()?;
        let mut transcript = String::new();
        for interaction in interactions.iter().take(20) {
            let outcome = match (&interaction.response, &interaction.error) {
                (Some(response), _) => format!(
                    "is_error={} body={}",
                    response.is_error(),
                    truncate(&response.text(), 200)
                ),
                (None, Some(error)) => format!("failed: {error}"),
                _ => "none".to_string(),
            };
            transcript.push_str(&format!(
                "- q: {} | args: {} | outcome: {}\n",
                interaction.question,
                truncate(&interaction.args.to_string(), 150),
                outcome
            ));
        }

        let prompt = format!(
            "Summarize the behavior of the tool `{}` from these test interactions:\n{}\n\
             Respond with JSON: {{\"behavioral_notes\": [..], \"limitations\": [..], \
             \"security_notes\": [..]}} (short strings, empty arrays where nothing applies).",
            tool.name, transcript
        );
        let options = CompletionOptions::json().with_cancel(cancel.clone());
        let outcome = llm.chat(&[ChatMessage::user(prompt)], &options).await.ok()?;
        let value: Value = parse_json(&outcome.text).ok()?;
        let pick = |key: &str| -> Vec<String> {
            value
                .get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default()
        };
        Some((pick("behavioral_notes"), pick("limitations"), pick("security_notes")))
    }

    fn synthesize_summary(
        &self,
        discovery: &Discovery,
        interactions: &[Interaction],
        profiles: &[ToolProfile],
    ) -> String {
        let failed = interactions.iter().filter(|i| i.failed()).count();
        let average_confidence = if profiles.is_empty() {
            0.0
        } else {
            profiles.iter().map(|p| p.confidence).sum::<f64>() / profiles.len() as f64
        };
        format!(
            "Interviewed {} v{}: {} tools, {} interactions ({} failed), \
             average confidence {:.2}",
            discovery.server_info.name,
            discovery.server_info.version,
            discovery.tools.len(),
            interactions.len(),
            failed,
            average_confidence
        )
    }
}

/// Heuristic outcome assessment used without an LLM.
fn heuristic_outcome(interaction: &Interaction) -> bool {
    let failed = interaction.failed();
    match interaction.expected_outcome {
        ExpectedOutcome::Success => !failed,
        ExpectedOutcome::Error => failed,
        ExpectedOutcome::Either => true,
    }
}

fn outcome_matches(expected: ExpectedOutcome, succeeded: bool) -> bool {
    match expected {
        ExpectedOutcome::Success => succeeded,
        ExpectedOutcome::Error => !succeeded,
        ExpectedOutcome::Either => true,
    }
}

/// Template-based profile for structural mode and LLM fallback.
fn template_profile(tool_name: &str, interactions: &[Interaction]) -> ToolProfile {
    let total = interactions.len();
    let failures: Vec<&Interaction> = interactions.iter().filter(|i| i.failed()).collect();
    let mut behavioral_notes = Vec::new();
    let mut limitations = Vec::new();
    let mut security_notes = Vec::new();

    if total > 0 {
        behavioral_notes.push(format!(
            "{} of {} calls completed without failure",
            total - failures.len(),
            total
        ));
        let max_latency = interactions.iter().map(|i| i.latency_ms).max().unwrap_or(0);
        behavioral_notes.push(format!("worst observed latency {max_latency}ms"));
    }

    for interaction in interactions {
        match interaction.category {
            crate::question::QuestionCategory::Error => {
                if interaction.failed() {
                    limitations.push(format!("rejects invalid input: {}", interaction.question));
                } else {
                    limitations.push(format!(
                        "accepted input it should reject: {}",
                        interaction.question
                    ));
                }
            }
            crate::question::QuestionCategory::Security => {
                if !interaction.failed() {
                    security_notes.push(format!(
                        "security probe succeeded: {}",
                        interaction.question
                    ));
                }
            }
            _ => {}
        }
    }
    limitations.dedup();

    ToolProfile {
        name: tool_name.to_string(),
        behavioral_notes,
        limitations,
        security_notes,
        confidence: ToolProfile::confidence_from(interactions),
        interaction_count: total,
    }
}

/// Response value for assertion evaluation: structured content, parsed
/// text, or raw text.
fn response_value(result: &CallToolResult) -> Value {
    if let Some(structured) = &result.structured_content {
        return structured.clone();
    }
    let text = result.text();
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let cut = text.char_indices().nth(max).map_or(text.len(), |(i, _)| i);
    format!("{}...", &text[..cut])
}
