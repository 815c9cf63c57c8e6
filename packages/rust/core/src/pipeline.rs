//! Pipeline orchestrator: one summarization run as an explicit state machine.
//!
//! ```text
//! Fetching ─▶ StageA ─▶ StageB ─▶ StageC ─▶ Done
//!    │          (raw      │ ▲        │
//!    │        metadata    │ └ regen ─┤
//!    ▼        on failure) ▼          ▼
//!  Failed              Fallback ◀────┘
//! ```
//!
//! Stage-local model failures are absorbed here and never escape: Stage A
//! degrades to raw metadata, Stage B and Stage C degrade to the heuristic
//! fallback. Only metadata errors (and cancellation) end a run without a
//! payload. The summary cache is written on `Done` and nowhere else.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use paperbrief_retriever::MetadataSource;
use paperbrief_shared::{
    AppConfig, ArxivId, CostRecord, ErrorCode, PaperBriefError, PaperMetadata, PipelineRequest,
    RunId, StageName, StageResult, SummaryPayload,
};
use paperbrief_storage::{CacheStore, get_json, keys, set_json};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cost::{self, PricingTable};
use crate::fallback;
use crate::llm::{DeltaSink, ModelClient, ModelError, ModelRequest, ModelResponse, RetryPolicy, invoke_with_retry};
use crate::progress::{EventKind, Phase, ProgressSender};
use crate::prompts::{self, SummaryInput};
use crate::validator;

/// How often a run waiting on another run's in-flight marker re-checks the cache.
const LOCK_POLL: Duration = Duration::from_millis(500);

/// Sanitizer temperature.
const STAGE_A_TEMPERATURE: f64 = 0.1;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Stage B model.
    pub model: String,
    /// Stage A model.
    pub model_pre: String,
    /// Stage C model.
    pub model_val: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    /// Part of every summary cache key.
    pub prompt_version: String,
    /// Hard ceiling for a whole run.
    pub run_timeout: Duration,
    pub stage_a_attempts: u32,
    /// Total Stage B attempts on malformed output.
    pub stage_b_attempts: u32,
    /// Ask the validator model for a corrected payload when local checks fail.
    pub llm_validation: bool,
    pub lock_ttl: Duration,
    pub lock_wait: Duration,
    /// Template with a `{violations}` placeholder.
    pub correction_instruction: String,
    pub retry: RetryPolicy,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        let p = &config.pipeline;
        Self {
            model: config.llm.model.clone(),
            model_pre: config.llm.model_pre.clone(),
            model_val: config.llm.model_val.clone(),
            temperature: config.llm.temperature,
            max_output_tokens: config.llm.max_output_tokens,
            prompt_version: p.prompt_version.clone(),
            run_timeout: Duration::from_secs(p.run_timeout_secs),
            stage_a_attempts: p.stage_a_attempts.max(1),
            stage_b_attempts: p.stage_b_attempts.max(1),
            llm_validation: p.llm_validation,
            lock_ttl: Duration::from_secs(p.lock_ttl_secs),
            lock_wait: Duration::from_secs(p.lock_wait_secs),
            correction_instruction: p.correction_instruction.clone(),
            retry: RetryPolicy::from(config),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Fallback,
    Failed,
    Cancelled,
}

/// Stable code plus message for a run that ended without a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunError {
    pub code: ErrorCode,
    pub message: String,
    /// Localized text for end users.
    pub user_message: String,
}

impl From<&PaperBriefError> for RunError {
    fn from(err: &PaperBriefError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            user_message: err.user_message(),
        }
    }
}

/// Everything a caller gets back from one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub arxiv_id: ArxivId,
    pub status: RunStatus,
    /// Present for `Done` and `Fallback`.
    pub payload: Option<SummaryPayload>,
    pub metadata: Option<PaperMetadata>,
    pub error: Option<RunError>,
    pub cost: CostRecord,
    pub stages: Vec<StageResult>,
    /// Last Stage C findings when validation never passed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl RunOutcome {
    /// The payload came from the heuristic fallback.
    pub fn is_heuristic(&self) -> bool {
        self.payload.as_ref().is_some_and(|p| p.heuristic)
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

struct Models {
    summary: String,
    sanitizer: String,
    validator: String,
}

struct RunState {
    run_id: RunId,
    arxiv_id: ArxivId,
    models: Models,
    metadata: Option<PaperMetadata>,
    stages: Vec<StageResult>,
    cost: CostRecord,
    violations: Vec<String>,
    lock_key: Option<String>,
}

impl RunState {
    fn new(run_id: RunId, request: &PipelineRequest, config: &PipelineConfig) -> Self {
        let pick = |o: &Option<String>, default: &str| o.clone().unwrap_or_else(|| default.to_string());
        let models = Models {
            summary: pick(&request.overrides.model, &config.model),
            sanitizer: pick(&request.overrides.model_pre, &config.model_pre),
            validator: pick(&request.overrides.model_val, &config.model_val),
        };
        Self {
            run_id,
            arxiv_id: request.arxiv_id.clone(),
            cost: CostRecord::new(models.summary.clone()),
            models,
            metadata: None,
            stages: Vec::new(),
            violations: Vec::new(),
            lock_key: None,
        }
    }

    fn record(&mut self, result: StageResult, pricing: &PricingTable) {
        let cost = pricing.estimate(&result.model, result.tokens_in, result.tokens_out);
        self.cost.add_usage(result.tokens_in, result.tokens_out, cost);
        debug!(
            stage = %result.stage,
            attempt = result.attempt,
            success = result.success,
            tokens_in = result.tokens_in,
            tokens_out = result.tokens_out,
            latency_ms = result.latency_ms,
            "model call recorded"
        );
        self.stages.push(result);
    }

    fn attempts_in(&self, stage: StageName) -> u32 {
        self.stages.iter().filter(|s| s.stage == stage).count() as u32
    }
}

/// Where `drive` left the run.
enum Transition {
    Done { payload: SummaryPayload, cache_hit: bool },
    Fallback(String),
    Failed(PaperBriefError),
    Cancelled,
}

fn attempt_result(
    stage: StageName,
    attempt: u32,
    model: &str,
    latency: Duration,
    response: &Result<ModelResponse, ModelError>,
) -> StageResult {
    let (raw_output, tokens_in, tokens_out, error) = match response {
        Ok(r) => (r.text.clone(), r.tokens_in, r.tokens_out, None),
        Err(e) => (String::new(), 0, 0, Some(e.to_string())),
    };
    StageResult {
        stage,
        attempt,
        model: model.to_string(),
        raw_output,
        payload: None,
        tokens_in,
        tokens_out,
        latency_ms: latency.as_millis() as u64,
        success: false,
        error,
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<dyn MetadataSource>,
    client: Arc<dyn ModelClient>,
    cache: Arc<dyn CacheStore>,
    pricing: PricingTable,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn MetadataSource>,
        client: Arc<dyn ModelClient>,
        cache: Arc<dyn CacheStore>,
        pricing: PricingTable,
    ) -> Self {
        Self {
            config,
            source,
            client,
            cache,
            pricing,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run to a terminal state. Never returns an error: failures
    /// are reported through [`RunOutcome::status`] and [`RunOutcome::error`].
    #[instrument(skip_all, fields(run_id = %run_id, arxiv_id = %request.arxiv_id, requester = %request.requester_id))]
    pub async fn run(
        &self,
        run_id: RunId,
        request: &PipelineRequest,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let started = Instant::now();
        let mut state = RunState::new(run_id, request, &self.config);
        info!(model = %state.models.summary, "run started");

        let finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(self.config.run_timeout, self.drive(&mut state, progress, cancel)) => Some(result),
        };

        let transition = match finished {
            None => Transition::Cancelled,
            Some(Ok(transition)) => transition,
            Some(Err(_)) if state.metadata.is_some() => {
                warn!(timeout_secs = self.config.run_timeout.as_secs(), "run timed out mid-pipeline");
                Transition::Fallback("run timed out".into())
            }
            Some(Err(_)) => Transition::Failed(PaperBriefError::Timeout(
                "metadata fetch exceeded the run deadline".into(),
            )),
        };

        self.finish(state, transition, started, progress).await
    }

    async fn drive(
        &self,
        state: &mut RunState,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Transition {
        // --- Fetching ---
        progress.started(Phase::Fetching);
        let meta = match self.source.fetch(&state.arxiv_id).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(error = %e, "metadata fetch failed");
                return Transition::Failed(e);
            }
        };
        progress.completed(Phase::Fetching, 1);
        state.metadata = Some(meta.clone());

        let summary_key = keys::summary(
            &state.arxiv_id,
            &state.models.summary,
            &self.config.prompt_version,
        );
        if let Some(payload) = self.cached_summary(&summary_key).await {
            return Transition::Done {
                payload,
                cache_hit: true,
            };
        }
        if let Some(payload) = self.claim(state, &summary_key).await {
            return Transition::Done {
                payload,
                cache_hit: true,
            };
        }

        // --- Stage A ---
        if cancel.is_cancelled() {
            return Transition::Cancelled;
        }
        let input = self.sanitize(state, &meta, progress).await;

        // --- Stage B ---
        if cancel.is_cancelled() {
            return Transition::Cancelled;
        }
        progress.started(Phase::StageB);
        let attempts = self.config.stage_b_attempts;
        let payload = match self.generate(state, &input, None, attempts, Some(progress)).await {
            Ok(payload) => payload,
            Err(reason) => return Transition::Fallback(reason),
        };
        progress.completed(Phase::StageB, state.attempts_in(StageName::B));

        // --- Stage C ---
        if cancel.is_cancelled() {
            return Transition::Cancelled;
        }
        progress.started(Phase::StageC);
        let violations = match self.check(state, payload, 1).await {
            Ok(valid) => {
                progress.completed(Phase::StageC, 1);
                return Transition::Done {
                    payload: valid,
                    cache_hit: false,
                };
            }
            Err(violations) => violations,
        };

        // One regeneration through Stage B with the findings attached.
        warn!(?violations, "summary failed validation, regenerating");
        progress.retry(Phase::StageC, 2, violations.join(","));
        if cancel.is_cancelled() {
            return Transition::Cancelled;
        }
        let correction =
            prompts::correction_instruction(&self.config.correction_instruction, &violations);
        let regenerated = match self.generate(state, &input, Some(&correction), 1, None).await {
            Ok(payload) => payload,
            Err(reason) => return Transition::Fallback(reason),
        };
        match self.check(state, regenerated, 2).await {
            Ok(valid) => {
                progress.completed(Phase::StageC, 2);
                Transition::Done {
                    payload: valid,
                    cache_hit: false,
                }
            }
            Err(violations) => {
                let err = PaperBriefError::ValidationFailed {
                    violations: violations.clone(),
                };
                state.violations = violations;
                Transition::Fallback(err.to_string())
            }
        }
    }

    async fn finish(
        &self,
        mut state: RunState,
        transition: Transition,
        started: Instant,
        progress: &ProgressSender,
    ) -> RunOutcome {
        // The marker may have expired and been claimed by another run.
        if let Some(lock_key) = state.lock_key.take() {
            let token = state.run_id.to_string();
            match self.cache.delete_if(&lock_key, token.as_bytes()).await {
                Ok(true) => {}
                Ok(false) => debug!("in-flight marker no longer ours, leaving it"),
                Err(e) => warn!(error = %e, "failed to release in-flight marker"),
            }
        }
        state.cost.duration_ms = started.elapsed().as_millis() as u64;

        let (status, payload, error) = match transition {
            Transition::Done { payload, cache_hit } => {
                if cache_hit {
                    state.cost.cache_hit = true;
                } else {
                    self.store_summary(&state, &payload).await;
                }
                progress.completed(Phase::Done, 1);
                (RunStatus::Done, Some(payload), None)
            }
            Transition::Fallback(reason) => {
                warn!(%reason, "using heuristic summary");
                let payload = state.metadata.as_ref().map(fallback::heuristic_summary);
                progress.emit(Phase::Fallback, EventKind::Completed, 1, Some(reason));
                (RunStatus::Fallback, payload, None)
            }
            Transition::Failed(err) => {
                progress.emit(Phase::Failed, EventKind::Failed, 1, Some(err.code().to_string()));
                (RunStatus::Failed, None, Some(RunError::from(&err)))
            }
            Transition::Cancelled => {
                let err = PaperBriefError::Cancelled;
                progress.emit(Phase::Failed, EventKind::Failed, 1, Some(err.code().to_string()));
                (RunStatus::Cancelled, None, Some(RunError::from(&err)))
            }
        };

        if !state.stages.is_empty() || state.cost.cache_hit {
            let today = Utc::now().date_naive();
            if let Err(e) = cost::record_daily(self.cache.as_ref(), today, &state.cost).await {
                warn!(error = %e, "failed to update daily cost aggregate");
            }
        }

        info!(
            status = ?status,
            cache_hit = state.cost.cache_hit,
            tokens_in = state.cost.tokens_in,
            tokens_out = state.cost.tokens_out,
            cost_usd = state.cost.cost_estimated,
            duration_ms = state.cost.duration_ms,
            "run finished"
        );

        RunOutcome {
            run_id: state.run_id,
            arxiv_id: state.arxiv_id,
            status,
            payload,
            metadata: state.metadata,
            error,
            cost: state.cost,
            stages: state.stages,
            violations: state.violations,
        }
    }

    // -----------------------------------------------------------------------
    // Cache
    // -----------------------------------------------------------------------

    async fn cached_summary(&self, key: &str) -> Option<SummaryPayload> {
        match get_json::<SummaryPayload>(self.cache.as_ref(), key).await {
            Ok(Some(payload)) if !payload.heuristic => {
                debug!(key, "summary cache hit");
                Some(payload)
            }
            Ok(_) => {
                debug!(key, "summary cache miss");
                None
            }
            Err(e) => {
                warn!(error = %e, "summary cache read failed");
                None
            }
        }
    }

    /// Take the in-flight marker for `summary_key`. When another run holds
    /// it, wait up to `lock_wait` for that run's cache write and return it.
    async fn claim(&self, state: &mut RunState, summary_key: &str) -> Option<SummaryPayload> {
        let lock_key = keys::summary_lock(
            &state.arxiv_id,
            &state.models.summary,
            &self.config.prompt_version,
        );
        let token = state.run_id.to_string();

        let deadline = tokio::time::Instant::now() + self.config.lock_wait;
        loop {
            match self
                .cache
                .set_nx(&lock_key, token.as_bytes(), self.config.lock_ttl)
                .await
            {
                Ok(true) => {
                    state.lock_key = Some(lock_key);
                    return None;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "in-flight marker unavailable, continuing without it");
                    return None;
                }
            }

            if tokio::time::Instant::now() >= deadline {
                warn!("in-flight run did not finish in time, computing anyway");
                return None;
            }
            debug!("another run is summarizing this paper, waiting");
            tokio::time::sleep(LOCK_POLL).await;
            if let Some(payload) = self.cached_summary(summary_key).await {
                return Some(payload);
            }
        }
    }

    async fn store_summary(&self, state: &RunState, payload: &SummaryPayload) {
        let key = keys::summary(
            &state.arxiv_id,
            &state.models.summary,
            &self.config.prompt_version,
        );
        if let Err(e) = set_json(self.cache.as_ref(), &key, payload, keys::ttl::SUMMARY).await {
            warn!(error = %e, "failed to cache summary");
        }
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    async fn call(
        &self,
        request: &ModelRequest,
        on_delta: Option<DeltaSink<'_>>,
    ) -> (Result<ModelResponse, ModelError>, Duration) {
        let started = Instant::now();
        let result =
            invoke_with_retry(self.client.as_ref(), request, &self.config.retry, on_delta).await;
        (result, started.elapsed())
    }

    /// Stage A. Falls back to the raw metadata when every attempt fails.
    async fn sanitize(
        &self,
        state: &mut RunState,
        meta: &PaperMetadata,
        progress: &ProgressSender,
    ) -> SummaryInput {
        progress.started(Phase::StageA);

        for attempt in 1..=self.config.stage_a_attempts {
            if attempt > 1 {
                progress.retry(Phase::StageA, attempt, "unusable sanitizer output");
            }
            let prompt = prompts::sanitizer(meta, attempt > 1);
            let request = ModelRequest {
                model: state.models.sanitizer.clone(),
                system: prompt.system,
                prompt: prompt.user,
                temperature: STAGE_A_TEMPERATURE,
                max_tokens: self.config.max_output_tokens,
                json_mode: true,
            };
            let (response, latency) = self.call(&request, None).await;
            let mut result = attempt_result(StageName::A, attempt, &request.model, latency, &response);

            let parsed = response
                .ok()
                .and_then(|r| validator::parse_json_object(&r.text));
            let input = parsed.as_ref().and_then(|v| sanitized_input(v, meta));
            result.payload = parsed;

            match input {
                Some(input) => {
                    result.success = true;
                    state.record(result, &self.pricing);
                    progress.completed(Phase::StageA, attempt);
                    return input;
                }
                None => {
                    if result.error.is_none() {
                        result.error = Some("unusable sanitizer output".into());
                    }
                    warn!(attempt, error = ?result.error, "stage A attempt failed");
                    state.record(result, &self.pricing);
                }
            }
        }

        warn!("stage A exhausted, using raw metadata");
        progress.emit(
            Phase::StageA,
            EventKind::Completed,
            self.config.stage_a_attempts,
            Some("raw metadata".into()),
        );
        SummaryInput::raw(meta)
    }

    /// Stage B. Malformed output is retried up to `attempts` total; other
    /// model failures end the stage immediately. The error string is the
    /// fallback reason.
    async fn generate(
        &self,
        state: &mut RunState,
        input: &SummaryInput,
        correction: Option<&str>,
        attempts: u32,
        progress: Option<&ProgressSender>,
    ) -> Result<SummaryPayload, String> {
        let prompt = prompts::summarizer(input, correction);
        let base = state.attempts_in(StageName::B);
        let mut last_error = String::from("no attempts made");

        for i in 1..=attempts {
            let attempt = base + i;
            if let Some(p) = progress.filter(|_| i > 1) {
                p.retry(Phase::StageB, attempt, last_error.clone());
            }
            let request = ModelRequest {
                model: state.models.summary.clone(),
                system: prompt.system.clone(),
                prompt: prompt.user.clone(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_output_tokens,
                json_mode: true,
            };

            let (response, latency) = match progress {
                Some(p) => {
                    let buffer = Mutex::new(String::new());
                    let on_delta = |delta: &str| {
                        if let Ok(mut text) = buffer.lock() {
                            text.push_str(delta);
                            p.partial(attempt, &text);
                        }
                    };
                    let sink: DeltaSink<'_> = &on_delta;
                    self.call(&request, Some(sink)).await
                }
                None => self.call(&request, None).await,
            };
            let mut result = attempt_result(StageName::B, attempt, &request.model, latency, &response);

            match response {
                Ok(r) => match validator::parse_summary(&r.text) {
                    Ok(payload) => {
                        result.success = true;
                        result.payload = serde_json::to_value(&payload).ok();
                        state.record(result, &self.pricing);
                        return Ok(payload);
                    }
                    Err(problems) => {
                        last_error = format!("malformed summary: {}", problems.join(","));
                        warn!(attempt, %last_error, "stage B output rejected");
                        result.error = Some(last_error.clone());
                        state.record(result, &self.pricing);
                    }
                },
                Err(ModelError::InvalidResponse(msg)) => {
                    last_error = format!("invalid response: {msg}");
                    warn!(attempt, %last_error, "stage B output rejected");
                    state.record(result, &self.pricing);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "stage B model call failed");
                    state.record(result, &self.pricing);
                    return Err(PaperBriefError::from(e).to_string());
                }
            }
        }
        Err(last_error)
    }

    /// Stage C. Local checks decide; the validator model is only consulted
    /// for a corrected payload, which must itself pass the local checks.
    async fn check(
        &self,
        state: &mut RunState,
        payload: SummaryPayload,
        attempt: u32,
    ) -> Result<SummaryPayload, Vec<String>> {
        let violations = validator::validate(&payload);
        if violations.is_empty() {
            debug!(attempt, "summary passed validation");
            return Ok(payload);
        }
        warn!(attempt, ?violations, "summary failed local validation");
        if !self.config.llm_validation {
            return Err(violations);
        }

        let summary_json = serde_json::to_string_pretty(&payload).unwrap_or_default();
        let prompt = prompts::validator(&summary_json);
        let request = ModelRequest {
            model: state.models.validator.clone(),
            system: prompt.system,
            prompt: prompt.user,
            temperature: 0.0,
            max_tokens: self.config.max_output_tokens,
            json_mode: true,
        };
        let (response, latency) = self.call(&request, None).await;
        let mut result = attempt_result(StageName::C, attempt, &request.model, latency, &response);

        let verdict = response
            .ok()
            .and_then(|r| validator::parse_json_object(&r.text));
        let fixed = verdict
            .as_ref()
            .and_then(|v| v.get("fixed"))
            .filter(|f| f.is_object())
            .and_then(|f| validator::payload_from_value(f).ok())
            .filter(|f| validator::validate(f).is_empty());
        result.payload = verdict;
        result.success = fixed.is_some();
        if !result.success && result.error.is_none() {
            result.error = Some("validator supplied no usable correction".into());
        }
        state.record(result, &self.pricing);

        match fixed {
            Some(fixed) => {
                info!(attempt, "validator supplied a corrected summary");
                Ok(fixed)
            }
            None => Err(violations),
        }
    }
}

/// Read the Stage A JSON object. `None` when the required fields are missing.
fn sanitized_input(value: &Value, meta: &PaperMetadata) -> Option<SummaryInput> {
    let title = value.get("title")?.as_str()?.trim();
    if title.is_empty() {
        return None;
    }
    let cleaned = value.get("abstract")?.as_str()?.trim();
    // An emptied abstract never replaces a real one.
    let (abstract_text, from_raw) = if cleaned.is_empty() {
        (meta.abstract_text.trim().to_string(), true)
    } else {
        (cleaned.to_string(), false)
    };
    let authors = match value.get("authors") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        Some(Value::String(s)) => s.trim().to_string(),
        _ => meta.authors.join(", "),
    };
    let category = value
        .get("category")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(meta.category())
        .to_string();
    let missing_abstract = abstract_text.is_empty()
        || (!from_raw
            && value
                .get("missing_abstract")
                .and_then(Value::as_bool)
                .unwrap_or(false));

    Some(SummaryInput {
        title: title.to_string(),
        authors,
        category,
        published: meta.published.format("%Y-%m-%d").to_string(),
        abstract_text,
        missing_abstract,
    })
}
