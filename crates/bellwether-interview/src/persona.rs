//! Question-generation personas.

use serde::{Deserialize, Serialize};

/// A named question-generation strategy with a guiding prompt.
///
/// Immutable once loaded; the scheduler references personas by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Stable identifier
    pub id: String,
    /// System prompt framing the persona
    pub system_prompt: String,
    /// Guidance steering the kinds of questions this persona asks
    pub guidance: String,
}

impl Persona {
    /// The default persona set: one careful user, one adversarial tester.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self {
                id: "careful-user".to_string(),
                system_prompt: "You are a careful, well-intentioned user exploring an API. \
                                You read tool descriptions closely and supply realistic, \
                                well-formed arguments."
                    .to_string(),
                guidance: "Favor happy-path and realistic edge-case questions. Use values a \
                           real integration would send."
                    .to_string(),
            },
            Self {
                id: "adversarial-tester".to_string(),
                system_prompt: "You are a security-minded tester probing an API for weak \
                                input validation and unsafe behavior."
                    .to_string(),
                guidance: "Favor error and security questions: missing required fields, \
                           wrong types, boundary values, injection-shaped strings, and \
                           oversized inputs."
                    .to_string(),
            },
        ]
    }

    /// Look up a persona by id among the defaults.
    pub fn builtin(id: &str) -> Option<Self> {
        Self::defaults().into_iter().find(|p| p.id == id)
    }
}
