//! Baseline model and drift analysis for Bellwether.
//!
//! A baseline is a canonical, deterministic snapshot of a server's
//! discovered capabilities and observed behavior: stable orderings,
//! normalized numbers and strings, and a content-addressed integrity hash.
//! The diff analyzer compares two baselines and classifies every change as
//! `none | info | warning | breaking` with a migration plan.

pub mod builder;
pub mod canonical;
pub mod diff;
pub mod model;

pub use builder::{BaselineBuilder, BuildContext};
pub use canonical::{canonical_hash, canonical_string, canonicalize, short_hash};
pub use diff::{
    ActionItem, ActionPriority, BaselineDiff, ChangeKind, DiffSeverity, MigrationComplexity,
    SchemaChange, ToolDiff, diff_baselines,
};
pub use model::{
    Baseline, BaselineAssertion, BaselineMetadata, CloudAssertionKind, PromptCapability,
    ResourceCapability, ServerFingerprint, ToolCapability, WorkflowRecord,
};
