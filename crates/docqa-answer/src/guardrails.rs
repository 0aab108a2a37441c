//! Input and output checks. Every check is a pure predicate; none fails.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use docqa_core::config::{GuardrailSettings, DEFAULT_DENYLIST};
use docqa_core::types::RetrievalResult;

pub const CITATION_MARKER: &str = "[Source";

/// Integers and decimals. A trailing sentence period is not part of the number.
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("numeric pattern"));

pub struct GuardrailEngine {
    denylist: Vec<String>,
    min_top_score: f64,
}

impl Default for GuardrailEngine {
    fn default() -> Self { Self::new(DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(), 0.30) }
}

impl GuardrailEngine {
    pub fn new(denylist: Vec<String>, min_top_score: f64) -> Self {
        let denylist = denylist.into_iter().map(|t| t.to_lowercase()).filter(|t| !t.is_empty()).collect();
        Self { denylist, min_top_score }
    }

    pub fn from_settings(settings: &GuardrailSettings) -> Self { Self::new(settings.denylist.clone(), settings.min_top_score) }

    /// False when the lowercased query contains any denylisted substring.
    pub fn moderate_input(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        !self.denylist.iter().any(|term| query.contains(term.as_str()))
    }

    /// False for an empty result list or a top score below the threshold.
    pub fn confidence_gate(&self, results: &[RetrievalResult]) -> bool {
        results.first().is_some_and(|top| top.score >= self.min_top_score)
    }

    pub fn check_answer(&self, answer: &str, context: &str) -> AnswerVerdict {
        AnswerVerdict { cited: citation_check(answer), numbers_grounded: numeric_consistency_check(answer, context) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerVerdict {
    pub cited: bool,
    pub numbers_grounded: bool,
}

impl AnswerVerdict {
    pub fn passed(&self) -> bool { self.cited && self.numbers_grounded }
}

pub fn citation_check(answer: &str) -> bool { answer.contains(CITATION_MARKER) }

/// Every number in `answer` appears verbatim among the numbers in `context`.
pub fn numeric_consistency_check(answer: &str, context: &str) -> bool {
    let available = numbers(context);
    numbers(answer).is_subset(&available)
}

fn numbers(text: &str) -> HashSet<&str> { NUMBER_RE.find_iter(text).map(|m| m.as_str()).collect() }
