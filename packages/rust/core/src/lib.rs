//! Summarization pipeline for arXiv papers.
//!
//! [`SummaryService`] is the entry point: it admits a request through the
//! [`RateLimiter`], then drives a [`Pipeline`] run (sanitize, summarize,
//! validate) that reports progress as a stream and ends in a [`RunOutcome`].

pub mod cost;
pub mod fallback;
pub mod llm;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod ratelimit;
pub mod report;
pub mod service;
pub mod validator;

pub use cost::{DailyCost, PricingTable, daily_cost, record_daily};
pub use llm::{ModelClient, ModelClientConfig, ModelError, OpenAiClient, RetryPolicy};
pub use pipeline::{Pipeline, PipelineConfig, RunError, RunOutcome, RunStatus};
pub use progress::{EventKind, Phase, ProgressEvent, ProgressStream};
pub use ratelimit::{Admission, RateLimiter, RateLimits};
pub use report::{MarkdownReportExporter, ReportArtifact, ReportError, ReportExporter, render_markdown};
pub use service::{RunHandle, SummaryService};
