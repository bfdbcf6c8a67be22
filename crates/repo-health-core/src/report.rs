//! Health-report schema and LLM output parsing.
//!
//! The model is asked for a single JSON object (see [`REPORT_SCHEMA`]).
//! [`parse_report`] is tolerant of the ways models commonly wrap that
//! object (markdown fences, leading prose) and of the legacy field names
//! `code_quality_score` / `overall_summary`, but it refuses output that
//! has no usable score or summary. Metadata fields (`languages_detected`
//! and friends) are never taken from the model; the generator fills them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output contract sent to the model with every report prompt.
pub const REPORT_SCHEMA: &str = r#"{
  "overall_score": <number between 0 and 100>,
  "summary": "<comprehensive summary of the codebase health>",
  "vulnerabilities": [
    {
      "severity": "<critical|high|medium|low>",
      "affected_component": "<component or file, optional>",
      "description": "<detailed description>",
      "recommendation": "<how to fix>"
    }
  ],
  "tech_debt_items": [
    {
      "category": "<code_smell|duplication|complexity|outdated_patterns|...>",
      "priority": "<high|medium|low>",
      "description": "<detailed description>",
      "file_path": "<file path, optional>"
    }
  ],
  "modernization_suggestions": [
    {
      "type": "<dependency_upgrade|refactoring|containerization|ci_cd|security|...>",
      "effort_estimate": "<low|medium|high>",
      "description": "<detailed description>",
      "rationale": "<why this is important>"
    }
  ],
  "recommendations": ["<short actionable recommendation>"]
}"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vulnerability {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub affected_component: Option<String>,
    pub description: String,
    #[serde(default)]
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TechDebtItem {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub priority: Option<String>,
    pub description: String,
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModernizationSuggestion {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub effort_estimate: Option<String>,
    pub description: String,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// A completed repository health report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    /// Always within `0.0..=100.0`.
    pub overall_score: f64,
    pub summary: String,
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
    #[serde(default)]
    pub tech_debt_items: Vec<TechDebtItem>,
    #[serde(default)]
    pub modernization_suggestions: Vec<ModernizationSuggestion>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Display language name → file count.
    #[serde(default)]
    pub languages_detected: BTreeMap<String, usize>,
    /// Ecosystem → package names.
    #[serde(default)]
    pub dependencies_found: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub total_files_analyzed: usize,
    #[serde(default)]
    pub analysis_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ReportParseError {
    #[error("response contains no JSON object")]
    NoJson,

    #[error("response is not valid report JSON: {0}")]
    InvalidJson(String),

    #[error("report has no numeric overall_score")]
    MissingScore,

    #[error("report has no summary")]
    MissingSummary,
}

#[derive(Deserialize)]
struct RawReport {
    #[serde(alias = "code_quality_score")]
    overall_score: Option<serde_json::Value>,
    #[serde(alias = "overall_summary")]
    summary: Option<String>,
    #[serde(default)]
    vulnerabilities: Option<Vec<Vulnerability>>,
    #[serde(default)]
    tech_debt_items: Option<Vec<TechDebtItem>>,
    #[serde(default)]
    modernization_suggestions: Option<Vec<ModernizationSuggestion>>,
    #[serde(default)]
    recommendations: Option<Vec<String>>,
}

/// Parse a model response into a [`Report`] with empty metadata.
pub fn parse_report(raw: &str) -> Result<Report, ReportParseError> {
    let body = extract_json_object(strip_code_fences(raw)).ok_or(ReportParseError::NoJson)?;
    let parsed: RawReport =
        serde_json::from_str(body).map_err(|e| ReportParseError::InvalidJson(e.to_string()))?;

    let score = parsed
        .overall_score
        .as_ref()
        .and_then(score_from_value)
        .ok_or(ReportParseError::MissingScore)?;

    let summary = parsed
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ReportParseError::MissingSummary)?;

    Ok(Report {
        overall_score: clamp_score(score),
        summary,
        vulnerabilities: parsed.vulnerabilities.unwrap_or_default(),
        tech_debt_items: parsed.tech_debt_items.unwrap_or_default(),
        modernization_suggestions: parsed.modernization_suggestions.unwrap_or_default(),
        recommendations: parsed.recommendations.unwrap_or_default(),
        languages_detected: BTreeMap::new(),
        dependencies_found: BTreeMap::new(),
        total_files_analyzed: 0,
        analysis_timestamp: None,
    })
}

/// Clamp a score into `[0, 100]`.
pub fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

fn score_from_value(v: &serde_json::Value) -> Option<f64> {
    let n = match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Return the contents of the first fenced block, preferring a ```` ```json ```` fence.
pub fn strip_code_fences(raw: &str) -> &str {
    fn inner(after: &str) -> Option<&str> {
        let body = match after.find('\n') {
            // Skip the info string (e.g. "json") on the opening fence line.
            Some(nl) if !after[..nl].contains('{') => &after[nl + 1..],
            _ => after,
        };
        body.find("```").map(|end| body[..end].trim())
    }

    if let Some(start) = raw.find("```json") {
        if let Some(s) = inner(&raw[start + 3..]) {
            return s;
        }
    }
    if let Some(start) = raw.find("```") {
        if let Some(s) = inner(&raw[start + 3..]) {
            return s;
        }
    }
    raw.trim()
}

fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}
