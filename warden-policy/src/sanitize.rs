//! Heuristic detection of prompt injection and unsafe tool arguments.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::pattern::contains_traversal;

static INJECTION_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    let sources = [
        (
            r"(?i)(ignore|disregard|forget)\s+(all\s+|any\s+|the\s+)?(previous|prior|above|earlier|system)\s+(instructions?|prompts?|rules?)",
            "instruction override attempt",
        ),
        (
            r"(?i)(reveal|show|print|output|repeat|leak)\s+(me\s+)?(your\s+|the\s+)?system\s+prompt",
            "system prompt exfiltration attempt",
        ),
        (
            r"(?i)(reveal|expose|print|output|leak)\s+(your\s+|the\s+|any\s+)?(secrets?|credentials?|api\s*keys?|passwords?)",
            "secret exfiltration attempt",
        ),
        (
            r"(?i)you\s+are\s+no\s+longer\s+bound\s+by",
            "instruction override attempt",
        ),
        (
            r"(?i)new\s+instructions?\s*:",
            "instruction override attempt",
        ),
    ];
    sources
        .into_iter()
        .map(|(source, label)| (Regex::new(source).expect("static pattern"), label))
        .collect()
});

static SHELL_META: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[;&|`$<>]|\$\(|&&|\|\|").expect("static pattern"));

/// Destination of the text under inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizeContext {
    /// A user message bound for an LLM; findings are fatal.
    LlmMessage,
    /// A tool argument that reaches a shell; findings are advisory but
    /// include shell-metacharacter detection.
    ShellArgument,
    /// Any other tool argument; findings are advisory.
    ToolArgument,
}

/// Result of a sanitization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizeReport {
    /// `false` when at least one detector fired.
    pub safe: bool,
    /// Human-readable description of each finding.
    pub warnings: Vec<String>,
}

impl SanitizeReport {
    fn clean() -> Self {
        Self {
            safe: true,
            warnings: Vec::new(),
        }
    }
}

/// Stateless detector set applied to user-supplied text.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputSanitizer;

impl InputSanitizer {
    /// Creates a sanitizer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Inspects `text` for injection and traversal markers.
    #[must_use]
    pub fn inspect(&self, text: &str, context: SanitizeContext) -> SanitizeReport {
        let mut report = SanitizeReport::clean();

        for (pattern, label) in INJECTION_PATTERNS.iter() {
            if pattern.is_match(text) {
                report.safe = false;
                report.warnings.push((*label).to_owned());
            }
        }

        if contains_traversal(text) {
            report.safe = false;
            report.warnings.push("path traversal sequence".to_owned());
        }

        if context == SanitizeContext::ShellArgument && SHELL_META.is_match(text) {
            report.safe = false;
            report
                .warnings
                .push("shell metacharacter or command chaining".to_owned());
        }

        report
    }
}
