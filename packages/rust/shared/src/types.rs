//! Core domain types for paper summarization runs.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{PaperBriefError, Result};

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ArxivId
// ---------------------------------------------------------------------------

static NEW_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:arxiv:)?(\d{4}\.\d{4,5})(?:v(\d+))?$").expect("valid regex")
});

static OLD_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:arxiv:)?([a-z][a-z\-]*(?:\.[a-z]{2})?/\d{7})(?:v(\d+))?$")
        .expect("valid regex")
});

static EMBEDDED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:arxiv\.org/(?:abs|pdf)/|arxiv:)?(\d{4}\.\d{4,5})(?:v(\d+))?")
        .expect("valid regex")
});

/// Canonical arXiv identifier (version suffix stripped).
///
/// The version a caller asked for is kept in [`ArxivId::version`] but never
/// participates in equality, so `2401.01234v1` and `2401.01234v3` share
/// cache entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArxivId {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<u32>,
}

impl ArxivId {
    /// Normalize a raw id, an `arXiv:` prefixed id, or an arxiv.org
    /// `abs`/`pdf` URL into a canonical identifier.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PaperBriefError::not_found(input));
        }

        let lowered = trimmed.to_ascii_lowercase();
        if lowered.starts_with("http://")
            || lowered.starts_with("https://")
            || lowered.contains("arxiv.org/")
        {
            return Self::from_url(trimmed).ok_or_else(|| PaperBriefError::not_found(input));
        }

        Self::from_bare(trimmed).ok_or_else(|| PaperBriefError::not_found(input))
    }

    /// Find the first new-style identifier embedded in free text.
    pub fn extract_first(text: &str) -> Option<Self> {
        let caps = EMBEDDED.captures(text)?;
        Some(Self {
            id: caps.get(1)?.as_str().to_string(),
            version: caps.get(2).and_then(|v| v.as_str().parse().ok()),
        })
    }

    fn from_bare(raw: &str) -> Option<Self> {
        let caps = NEW_STYLE
            .captures(raw)
            .or_else(|| OLD_STYLE.captures(raw))?;
        Some(Self {
            id: caps.get(1)?.as_str().to_string(),
            version: caps.get(2).and_then(|v| v.as_str().parse().ok()),
        })
    }

    fn from_url(raw: &str) -> Option<Self> {
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{raw}")
        };
        let url = Url::parse(&with_scheme).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        if host != "arxiv.org" && !host.ends_with(".arxiv.org") {
            return None;
        }

        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
        match segments.next()? {
            "abs" | "pdf" => {}
            _ => return None,
        }
        let rest = segments.collect::<Vec<_>>().join("/");
        let rest = rest.strip_suffix(".pdf").unwrap_or(&rest);
        Self::from_bare(rest)
    }

    /// Canonical id without version.
    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// Version the caller asked for, if any.
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    /// Id with the requested version appended, as the arXiv API expects it.
    pub fn versioned(&self) -> String {
        match self.version {
            Some(v) => format!("{}v{v}", self.id),
            None => self.id.clone(),
        }
    }

    /// Filesystem-safe form (old-style ids contain `/`).
    pub fn file_stem(&self) -> String {
        self.id.replace('/', "_")
    }
}

impl PartialEq for ArxivId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ArxivId {}

impl std::hash::Hash for ArxivId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for ArxivId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

impl std::str::FromStr for ArxivId {
    type Err = PaperBriefError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// PaperMetadata
// ---------------------------------------------------------------------------

/// Normalized paper metadata as returned by the retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub id: ArxivId,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub categories: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_category: Option<String>,
    pub published: DateTime<Utc>,
    pub entry_url: String,
    pub pdf_url: String,
}

impl PaperMetadata {
    /// Primary category, or the first category alphabetically.
    pub fn category(&self) -> &str {
        self.primary_category
            .as_deref()
            .or_else(|| self.categories.iter().next().map(String::as_str))
            .unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Requester classification controlling rate-limit ceilings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Default,
    Trusted,
    Admin,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Trusted => "trusted",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = PaperBriefError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "trusted" => Ok(Self::Trusted),
            "admin" => Ok(Self::Admin),
            other => Err(PaperBriefError::validation(format!("unknown tier: {other}"))),
        }
    }
}

/// Per-request model choices that override the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOverrides {
    /// Stage B summarizer model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Stage A sanitizer model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_pre: Option<String>,
    /// Stage C validator model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_val: Option<String>,
}

/// One `summarize` invocation. Lives only for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    pub arxiv_id: ArxivId,
    pub requester_id: String,
    pub tier: Tier,
    pub overrides: ModelOverrides,
}

// ---------------------------------------------------------------------------
// Stage results
// ---------------------------------------------------------------------------

/// The three language-model passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageName {
    /// Metadata sanitizer.
    A,
    /// Main summarizer.
    B,
    /// Output validator.
    C,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one model invocation inside a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageName,
    /// 1-based attempt number within the stage.
    pub attempt: u32,
    pub model: String,
    pub raw_output: String,
    /// Parsed payload, `None` when the output was unusable.
    pub payload: Option<serde_json::Value>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub latency_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// SummaryPayload
// ---------------------------------------------------------------------------

/// Section names in display order.
pub const SECTION_NAMES: [&str; 4] = ["intro", "background", "method", "conclusion"];

/// Structured Traditional-Chinese summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub intro: String,
    pub background: String,
    pub method: String,
    pub conclusion: String,
    pub bullet_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limitations: Option<String>,
    /// Built by the non-LLM fallback; rendered as lower-confidence output.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub heuristic: bool,
}

impl SummaryPayload {
    /// The four named sections paired with their keys.
    pub fn sections(&self) -> [(&'static str, &str); 4] {
        [
            (SECTION_NAMES[0], self.intro.as_str()),
            (SECTION_NAMES[1], self.background.as_str()),
            (SECTION_NAMES[2], self.method.as_str()),
            (SECTION_NAMES[3], self.conclusion.as_str()),
        ]
    }
}

// ---------------------------------------------------------------------------
// CostRecord
// ---------------------------------------------------------------------------

/// Per-run token, cost and latency accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub tokens_in: u64,
    pub tokens_out: u64,
    /// USD estimate from the pricing table.
    pub cost_estimated: f64,
    pub duration_ms: u64,
    pub cache_hit: bool,
    /// Primary (Stage B) model for the run.
    pub model: String,
}

impl CostRecord {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Fold one invocation's usage into the record.
    pub fn add_usage(&mut self, tokens_in: u64, tokens_out: u64, cost: f64) {
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;
        self.cost_estimated += cost;
    }
}
