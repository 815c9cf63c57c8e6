//! Report export boundary.
//!
//! The pipeline marks a run `Done` whether or not a report can be produced;
//! exporters signal "show the text instead" with [`ReportError::TextOnly`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use paperbrief_shared::{PaperMetadata, ReportConfig, SummaryPayload};
use paperbrief_storage::{CacheStore, keys, set_json};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::pipeline::RunOutcome;

/// Display titles for the payload sections, in section order.
const SECTION_TITLES: [&str; 4] = ["簡介", "背景", "方法", "結論"];

const HEURISTIC_BANNER: &str =
    "> ⚠ 此摘要由原始摘要自動擷取產生，未經語言模型整理，可信度較低。";

/// A written report file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// No report could be produced; present the summary as text.
    #[error("report unavailable, falling back to text: {0}")]
    TextOnly(String),
}

pub trait ReportExporter: Send + Sync {
    fn export(
        &self,
        meta: &PaperMetadata,
        payload: &SummaryPayload,
    ) -> Result<ReportArtifact, ReportError>;
}

// ---------------------------------------------------------------------------
// Markdown exporter
// ---------------------------------------------------------------------------

/// Writes `{id}_report.md` into a directory.
#[derive(Debug, Clone)]
pub struct MarkdownReportExporter {
    output_dir: PathBuf,
}

impl From<&ReportConfig> for MarkdownReportExporter {
    fn from(config: &ReportConfig) -> Self {
        Self::new(&config.output_dir)
    }
}

impl MarkdownReportExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn write(&self, target: &Path, content: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        let temp = target.with_extension("md.tmp");
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, target)
    }
}

impl ReportExporter for MarkdownReportExporter {
    fn export(
        &self,
        meta: &PaperMetadata,
        payload: &SummaryPayload,
    ) -> Result<ReportArtifact, ReportError> {
        let content = render_markdown(meta, payload);
        let target = self
            .output_dir
            .join(format!("{}_report.md", meta.id.file_stem()));

        self.write(&target, &content).map_err(|e| {
            ReportError::TextOnly(format!("cannot write {}: {e}", target.display()))
        })?;

        let sha256 = format!("{:x}", Sha256::digest(content.as_bytes()));
        debug!(path = %target.display(), size = content.len(), "wrote report");
        Ok(ReportArtifact {
            path: target,
            size_bytes: content.len() as u64,
            sha256,
            created_at: Utc::now(),
        })
    }
}

/// Markdown rendering of a summary, also used for text-only output.
pub fn render_markdown(meta: &PaperMetadata, payload: &SummaryPayload) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", meta.title));
    out.push_str(&format!("- arXiv：{}\n", meta.id));
    if !meta.authors.is_empty() {
        out.push_str(&format!("- 作者：{}\n", meta.authors.join(", ")));
    }
    out.push_str(&format!("- 類別：{}\n", meta.category()));
    out.push_str(&format!("- 發表日期：{}\n", meta.published.format("%Y-%m-%d")));
    if !meta.entry_url.is_empty() {
        out.push_str(&format!("- 連結：{}\n", meta.entry_url));
    }
    out.push('\n');

    if payload.heuristic {
        out.push_str(HEURISTIC_BANNER);
        out.push_str("\n\n");
    }

    for ((_, text), title) in payload.sections().into_iter().zip(SECTION_TITLES) {
        out.push_str(&format!("## {title}\n\n{text}\n\n"));
    }

    if !payload.bullet_points.is_empty() {
        out.push_str("## 重點摘要\n\n");
        for bullet in &payload.bullet_points {
            out.push_str(&format!("- {bullet}\n"));
        }
        out.push('\n');
    }

    if let Some(limitations) = &payload.limitations {
        out.push_str(&format!("## 限制\n\n{limitations}\n"));
    }

    out
}

/// Export the outcome's payload and remember the artifact under the report
/// key. Heuristic payloads are exported but not recorded.
pub async fn export_and_record(
    exporter: &dyn ReportExporter,
    cache: &dyn CacheStore,
    outcome: &RunOutcome,
    prompt_version: &str,
) -> Result<ReportArtifact, ReportError> {
    let (Some(meta), Some(payload)) = (&outcome.metadata, &outcome.payload) else {
        return Err(ReportError::TextOnly("run produced no summary".into()));
    };

    let artifact = exporter.export(meta, payload)?;
    info!(path = %artifact.path.display(), sha256 = %artifact.sha256, "report exported");

    if !payload.heuristic {
        let key = keys::report(&outcome.arxiv_id, &outcome.cost.model, prompt_version);
        if let Err(e) = set_json(cache, &key, &artifact, keys::ttl::REPORT).await {
            warn!(error = %e, "failed to record report artifact");
        }
    }
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::heuristic_summary;
    use crate::pipeline::tests::sample_meta;
    use crate::pipeline::RunStatus;
    use crate::validator::tests::valid_payload;
    use paperbrief_shared::{CostRecord, RunId};
    use paperbrief_storage::{MemoryCache, get_json};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("pb-report-test-{}", uuid::Uuid::now_v7()))
    }

    fn outcome(payload: SummaryPayload) -> RunOutcome {
        let meta = sample_meta();
        RunOutcome {
            run_id: RunId::new(),
            arxiv_id: meta.id.clone(),
            status: if payload.heuristic { RunStatus::Fallback } else { RunStatus::Done },
            payload: Some(payload),
            metadata: Some(meta),
            error: None,
            cost: CostRecord::new("gpt-4o-mini"),
            stages: Vec::new(),
            violations: Vec::new(),
        }
    }

    #[test]
    fn markdown_has_all_sections() {
        let md = render_markdown(&sample_meta(), &valid_payload());
        assert!(md.starts_with("# Sparse Experts for Long-Context Retrieval\n"));
        for heading in ["## 簡介", "## 背景", "## 方法", "## 結論", "## 重點摘要", "## 限制"] {
            assert!(md.contains(heading), "missing {heading}");
        }
        assert!(md.contains("- 推論成本減半\n"));
        assert!(!md.contains(HEURISTIC_BANNER));
    }

    #[test]
    fn heuristic_payload_is_marked() {
        let meta = sample_meta();
        let md = render_markdown(&meta, &heuristic_summary(&meta));
        assert!(md.contains(HEURISTIC_BANNER));
        assert!(!md.contains("## 重點摘要"));
    }

    #[test]
    fn exporter_writes_file_with_digest() {
        let dir = temp_dir();
        let exporter = MarkdownReportExporter::new(&dir);
        let artifact = exporter.export(&sample_meta(), &valid_payload()).unwrap();

        assert_eq!(artifact.path, dir.join("2401.01234_report.md"));
        let written = std::fs::read_to_string(&artifact.path).unwrap();
        assert_eq!(written.len() as u64, artifact.size_bytes);
        assert_eq!(artifact.sha256, format!("{:x}", Sha256::digest(written.as_bytes())));
        assert_eq!(artifact.sha256.len(), 64);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unwritable_directory_signals_text_only() {
        let file = std::env::temp_dir().join(format!("pb-report-file-{}", uuid::Uuid::now_v7()));
        std::fs::write(&file, "not a directory").unwrap();
        let exporter = MarkdownReportExporter::new(&file);

        let err = exporter.export(&sample_meta(), &valid_payload()).unwrap_err();
        assert!(matches!(err, ReportError::TextOnly(_)));

        let _ = std::fs::remove_file(&file);
    }

    #[tokio::test]
    async fn export_records_artifact_for_llm_summaries_only() {
        let dir = temp_dir();
        let exporter = MarkdownReportExporter::new(&dir);
        let cache = MemoryCache::new();
        let key = keys::report(&sample_meta().id, "gpt-4o-mini", "v1");

        let artifact = export_and_record(&exporter, &cache, &outcome(valid_payload()), "v1")
            .await
            .unwrap();
        let recorded: Option<ReportArtifact> = get_json(&cache, &key).await.unwrap();
        assert_eq!(recorded, Some(artifact));

        cache.delete(&key).await.unwrap();
        let meta = sample_meta();
        export_and_record(&exporter, &cache, &outcome(heuristic_summary(&meta)), "v1")
            .await
            .unwrap();
        let recorded: Option<ReportArtifact> = get_json(&cache, &key).await.unwrap();
        assert!(recorded.is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn outcome_without_payload_is_text_only() {
        let mut failed = outcome(valid_payload());
        failed.payload = None;
        failed.status = RunStatus::Failed;
        let exporter = MarkdownReportExporter::new(temp_dir());
        let err = export_and_record(&exporter, &MemoryCache::new(), &failed, "v1")
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::TextOnly(_)));
    }
}
