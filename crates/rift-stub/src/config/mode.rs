//! Response selection policy for contract-driven responses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Governs whether a synthesized body comes from a declared example, a
/// generated value, or either with fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseMode {
    /// Ignore examples and always generate from the schema.
    #[default]
    AlwaysGenerate,
    /// Use the first declared example; fail when there is none.
    ExamplesOnly,
    /// Use the first declared example, generating from the schema when there is none.
    PreferExamples,
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseMode::AlwaysGenerate => "alwaysGenerate",
            ResponseMode::ExamplesOnly => "examplesOnly",
            ResponseMode::PreferExamples => "preferExamples",
        };
        f.write_str(name)
    }
}

impl FromStr for ResponseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "alwaysgenerate" | "generate" => Ok(ResponseMode::AlwaysGenerate),
            "examplesonly" | "examples" => Ok(ResponseMode::ExamplesOnly),
            "preferexamples" | "prefer" => Ok(ResponseMode::PreferExamples),
            other => Err(format!(
                "unknown response mode '{other}' (expected alwaysGenerate, examplesOnly or preferExamples)"
            )),
        }
    }
}
