//! Forward-only progress events for one run.
//!
//! The orchestrator owns a [`ProgressSender`]; the caller reads the matching
//! [`ProgressStream`]. The stream ends once the run reaches a terminal phase
//! and the sender is dropped. Dropping the stream early is harmless: later
//! events are discarded.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use paperbrief_shared::{RunId, StageName};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Fetching,
    StageA,
    StageB,
    StageC,
    Done,
    Fallback,
    Failed,
}

impl Phase {
    /// Short user-facing status line.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Fetching => "正在擷取論文資料",
            Self::StageA => "正在整理論文資訊",
            Self::StageB => "正在生成摘要",
            Self::StageC => "正在驗證摘要",
            Self::Done => "摘要完成",
            Self::Fallback => "改用簡易摘要",
            Self::Failed => "處理失敗",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Fallback | Self::Failed)
    }

    pub fn stage(&self) -> Option<StageName> {
        match self {
            Self::StageA => Some(StageName::A),
            Self::StageB => Some(StageName::B),
            Self::StageC => Some(StageName::C),
            _ => None,
        }
    }
}

impl From<StageName> for Phase {
    fn from(stage: StageName) -> Self {
        match stage {
            StageName::A => Self::StageA,
            StageName::B => Self::StageB,
            StageName::C => Self::StageC,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    /// Another attempt within the same phase.
    Retry,
    /// Incremental model output (Stage B only).
    Partial,
    Completed,
    Failed,
}

/// One entry of the progress sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub run_id: RunId,
    pub phase: Phase,
    pub kind: EventKind,
    pub status: &'static str,
    /// 1-based attempt within the phase.
    pub attempt: u32,
    /// Accumulated Stage B text so far, on `Partial` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Create a connected sender/stream pair for `run_id`.
pub fn channel(run_id: RunId) -> (ProgressSender, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { run_id, tx }, ProgressStream { rx })
}

/// Producer half, held by the orchestrator.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    run_id: RunId,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    /// A sender whose events go nowhere.
    pub fn detached(run_id: RunId) -> Self {
        channel(run_id).0
    }

    pub fn emit(&self, phase: Phase, kind: EventKind, attempt: u32, detail: Option<String>) {
        self.send(ProgressEvent {
            run_id: self.run_id,
            phase,
            kind,
            status: phase.status(),
            attempt,
            partial: None,
            detail,
        });
    }

    pub fn started(&self, phase: Phase) {
        self.emit(phase, EventKind::Started, 1, None);
    }

    pub fn completed(&self, phase: Phase, attempt: u32) {
        self.emit(phase, EventKind::Completed, attempt, None);
    }

    pub fn retry(&self, phase: Phase, attempt: u32, reason: impl Into<String>) {
        self.emit(phase, EventKind::Retry, attempt, Some(reason.into()));
    }

    pub fn partial(&self, attempt: u32, text: &str) {
        self.send(ProgressEvent {
            run_id: self.run_id,
            phase: Phase::StageB,
            kind: EventKind::Partial,
            status: Phase::StageB.status(),
            attempt,
            partial: Some(text.to_string()),
            detail: None,
        });
    }

    fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            trace!(run_id = %self.run_id, "progress consumer gone, event dropped");
        }
    }
}

/// Consumer half: a finite, non-restartable stream of events.
#[derive(Debug)]
pub struct ProgressStream {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressStream {
    /// Stop accepting events. Already-buffered events can still be read.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn events_arrive_in_order_and_stream_ends() {
        let (tx, stream) = channel(RunId::new());
        tx.started(Phase::Fetching);
        tx.completed(Phase::Fetching, 1);
        tx.started(Phase::StageB);
        tx.partial(1, "{\"intro\":");
        tx.completed(Phase::Done, 1);
        drop(tx);

        let events: Vec<ProgressEvent> = stream.collect().await;
        let kinds: Vec<(Phase, EventKind)> = events.iter().map(|e| (e.phase, e.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (Phase::Fetching, EventKind::Started),
                (Phase::Fetching, EventKind::Completed),
                (Phase::StageB, EventKind::Started),
                (Phase::StageB, EventKind::Partial),
                (Phase::Done, EventKind::Completed),
            ]
        );
        assert_eq!(events[3].partial.as_deref(), Some("{\"intro\":"));
        assert_eq!(events[4].status, "摘要完成");
    }

    #[test]
    fn dropped_consumer_does_not_panic() {
        let (tx, stream) = channel(RunId::new());
        drop(stream);
        tx.retry(Phase::StageA, 2, "invalid json");
        ProgressSender::detached(RunId::new()).started(Phase::Fetching);
    }

    #[test]
    fn phase_helpers() {
        assert!(Phase::Fallback.is_terminal());
        assert!(!Phase::StageC.is_terminal());
        assert_eq!(Phase::from(StageName::B), Phase::StageB);
        assert_eq!(Phase::StageA.stage(), Some(StageName::A));
        assert_eq!(Phase::Done.stage(), None);
    }

    #[test]
    fn event_serializes_snake_case() {
        let (tx, mut stream) = channel(RunId::new());
        tx.retry(Phase::StageC, 2, "too_long:intro");
        let event = stream.rx.try_recv().expect("event");
        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(json["phase"], "stage_c");
        assert_eq!(json["kind"], "retry");
        assert_eq!(json["detail"], "too_long:intro");
        assert!(json.get("partial").is_none());
    }
}
