//! Bellwether audits Model Context Protocol servers.
//!
//! It connects over a chosen transport, discovers the server's
//! capabilities, drives it through generated and scripted interactions,
//! and produces a reproducible baseline that can be diffed against prior
//! baselines to catch breaking changes in CI.
//!
//! This crate is the facade: configuration schema, exit-code mapping, the
//! audit runner, and re-exports of the workspace crates.

pub mod config;
pub mod exit;
pub mod runner;

pub use config::{
    AuditConfig, AuditMode, BaselineSection, CacheSection, LlmSection, LoggingSection,
    OutputFormat, OutputSection, ScenariosSection, ServerSection, TestSection, WorkflowsSection,
};
pub use exit::{ExitStatus, remediation_hint};
pub use runner::{AuditOutcome, AuditRunner, init_tracing};

pub use bellwether_baseline as baseline;
pub use bellwether_client as client;
pub use bellwether_interview as interview;
pub use bellwether_llm as llm;
pub use bellwether_protocol as protocol;
pub use bellwether_transport as transport;

pub use bellwether_core::{AuditError, ErrorCode, Result, Retryability, Severity};
