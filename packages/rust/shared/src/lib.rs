//! Shared types, error model, and configuration for paperbrief.
//!
//! This crate is the foundation depended on by all other paperbrief crates.
//! It provides:
//! - [`PaperBriefError`] and [`ErrorCode`], the unified error model
//! - Domain types ([`ArxivId`], [`PaperMetadata`], [`SummaryPayload`], [`CostRecord`], ...)
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ArxivConfig, CacheBackend, CacheConfig, LlmConfig, ModelPricing,
    PipelineSettings, RateLimitConfig, ReportConfig, VIOLATIONS_PLACEHOLDER, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_api_key,
    validate_api_key, validate_config,
};
pub use error::{ErrorCode, PaperBriefError, Result};
pub use types::{
    ArxivId, CostRecord, ModelOverrides, PaperMetadata, PipelineRequest, RunId, SECTION_NAMES,
    StageName, StageResult, SummaryPayload, Tier,
};
