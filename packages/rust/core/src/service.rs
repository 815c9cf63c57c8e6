//! Command surface: `summarize(identifier_or_url)`.
//!
//! Normalizes the identifier, asks the rate limiter for admission, then
//! starts the run on its own task behind the global concurrency ceiling.

use std::sync::Arc;

use paperbrief_retriever::MetadataSource;
use paperbrief_shared::{
    AppConfig, ArxivId, ModelOverrides, PaperBriefError, PipelineRequest, RateLimitConfig, Result,
    RunId, Tier,
};
use paperbrief_storage::CacheStore;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::cost::PricingTable;
use crate::llm::ModelClient;
use crate::pipeline::{Pipeline, PipelineConfig, RunOutcome};
use crate::progress::{self, ProgressStream};
use crate::ratelimit::{Admission, RateLimiter, RateLimits};

pub struct SummaryService {
    pipeline: Arc<Pipeline>,
    limiter: RateLimiter,
    tiers: RateLimitConfig,
    permits: Arc<Semaphore>,
}

impl SummaryService {
    pub fn new(
        pipeline: Pipeline,
        limiter: RateLimiter,
        tiers: RateLimitConfig,
        max_concurrent_runs: usize,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            limiter,
            tiers,
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
        }
    }

    /// Wire every component from the loaded configuration.
    pub fn from_config(
        config: &AppConfig,
        source: Arc<dyn MetadataSource>,
        client: Arc<dyn ModelClient>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        let pipeline = Pipeline::new(
            PipelineConfig::from(config),
            source,
            client,
            Arc::clone(&cache),
            PricingTable::from(config),
        );
        let limiter = RateLimiter::new(RateLimits::from(config), cache);
        Self::new(
            pipeline,
            limiter,
            config.rate_limits.clone(),
            config.pipeline.max_concurrent_runs,
        )
    }

    /// Start a run. Fails fast with `NotFound` for input that holds no
    /// arXiv identifier and `AdmissionDenied` when the requester is over
    /// their ceiling; every other outcome arrives through the handle.
    ///
    /// `tier` overrides the tier derived from the configured requester lists.
    #[instrument(skip_all, fields(requester = %requester_id))]
    pub async fn summarize(
        &self,
        input: &str,
        requester_id: &str,
        tier: Option<Tier>,
        overrides: ModelOverrides,
    ) -> Result<RunHandle> {
        let arxiv_id = ArxivId::parse(input)
            .or_else(|e| ArxivId::extract_first(input).ok_or(e))?;
        let tier = tier.unwrap_or_else(|| self.tiers.tier_for(requester_id));

        if let Admission::Denied { retry_after } = self.limiter.admit(requester_id, tier).await? {
            return Err(PaperBriefError::AdmissionDenied {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        let request = PipelineRequest {
            arxiv_id: arxiv_id.clone(),
            requester_id: requester_id.to_string(),
            tier,
            overrides,
        };
        let run_id = RunId::new();
        let (tx, events) = progress::channel(run_id);
        let cancel = CancellationToken::new();
        info!(%run_id, %arxiv_id, requested_version = ?arxiv_id.version(), %tier, "run admitted");

        let pipeline = Arc::clone(&self.pipeline);
        let permits = Arc::clone(&self.permits);
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            // Cancellation while queued skips straight to the run, which
            // reports it without doing any work.
            let _permit = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                permit = permits.acquire_owned() => permit.ok(),
            };
            debug!(%run_id, "run slot acquired");
            pipeline.run(run_id, &request, &tx, &token).await
        });

        Ok(RunHandle {
            run_id,
            arxiv_id,
            events,
            cancel,
            task,
        })
    }
}

/// A started run. Dropping the handle cancels the run.
pub struct RunHandle {
    pub run_id: RunId,
    pub arxiv_id: ArxivId,
    events: ProgressStream,
    cancel: CancellationToken,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    /// Progress events, in order. Ends when the run reaches a terminal state.
    pub fn events(&mut self) -> &mut ProgressStream {
        &mut self.events
    }

    /// Request cancellation. Nothing is cached for a cancelled run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the terminal outcome.
    pub async fn finish(mut self) -> Result<RunOutcome> {
        (&mut self.task)
            .await
            .map_err(|e| PaperBriefError::internal(format!("run task failed: {e}")))
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
