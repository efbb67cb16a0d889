//! Interview engine for Bellwether.
//!
//! Drives a discovered MCP server through generated and scripted
//! interactions: per-persona question generation (LLM-backed or structural),
//! declarative scenarios with assertions, multi-step workflows with data
//! flow, and a scheduler that fans the work out under bounded concurrency
//! with cooperative cancellation.

pub mod autogen;
pub mod cache;
pub mod persona;
pub mod question;
pub mod scenario;
pub mod scheduler;
pub mod types;
pub mod workflow;

pub use autogen::generate_workflows;
pub use cache::ResponseCache;
pub use persona::Persona;
pub use question::{Question, QuestionCategory, generate_structural_questions};
pub use scenario::{
    Assertion, AssertionCondition, AssertionResult, Scenario, ScenarioCategory, ScenarioResult,
    evaluate_assertions, load_scenarios,
};
pub use scheduler::{
    InterviewConfig, InterviewMode, InterviewScheduler, ProgressCallback, ProgressEvent,
    ToolInvoker,
};
pub use types::{
    ExpectedOutcome, Interaction, InterviewPhase, InterviewResult, PromptCheck, ResourceCheck,
    ToolProfile,
};
pub use workflow::{
    DataFlowEdge, StepResult, WorkflowDefinition, WorkflowResult, WorkflowStep, execute_workflow,
    load_workflows,
};
