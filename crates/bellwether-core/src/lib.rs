//! Foundation layer for Bellwether.
//!
//! Provides the shared error taxonomy used by every other crate, the dotted
//! JSON path resolver backing scenario assertions and workflow data flow,
//! the incremental SSE decoder shared by the transport and LLM layers, and
//! the injectable clock seam that keeps time-sensitive logic testable.

pub mod clock;
pub mod error;
pub mod path;
pub mod sse;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    AuditError, ErrorCode, ErrorContext, Result, RetryInfo, Retryability, Severity,
};
pub use path::{resolve_path, value_type_name};
pub use sse::{SseDecoder, SseEvent};
