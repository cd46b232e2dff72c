//! Streamed multi-symbol backtest runs.
//!
//! A [`StreamAggregator`] owns at most one live stream. Starting a new run
//! closes the previous one before the new connection is opened. Items are
//! appended in arrival order and the [`AggregateSnapshot`] is recomputed from
//! the full item list after every append, so the two never disagree. Once a
//! run reaches a terminal state its data stops changing.

pub mod event;
pub mod transport;

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use btdash_core::report::{AggregateSnapshot, BacktestItem, BackendSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::HubError;
use event::StreamEvent;
use transport::EventStream;

/// Tolerance when comparing the backend's averages with the local ones.
const SUMMARY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }
}

/// What subscribers see after every change.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunProgress {
    pub run_id: Option<Uuid>,
    pub state: RunState,
    pub count: usize,
    pub snapshot: AggregateSnapshot,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct RunData {
    run_id: Option<Uuid>,
    state: RunState,
    items: Vec<BacktestItem>,
    snapshot: AggregateSnapshot,
    backend_summary: Option<BackendSummary>,
    error: Option<HubError>,
    skipped: usize,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl RunData {
    fn idle() -> Self {
        Self {
            run_id: None,
            state: RunState::Idle,
            items: Vec::new(),
            snapshot: AggregateSnapshot::default(),
            backend_summary: None,
            error: None,
            skipped: 0,
            started_at: None,
            finished_at: None,
        }
    }

    fn progress(&self) -> RunProgress {
        RunProgress {
            run_id: self.run_id,
            state: self.state,
            count: self.items.len(),
            snapshot: self.snapshot,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// How a run ended.
#[derive(Debug)]
enum Outcome {
    Summary(BackendSummary),
    Closed,
    Failed(HubError),
    Cancelled,
}

/// Run data shared between the aggregator and its stream task.
struct RunShared {
    data: RwLock<RunData>,
    progress: watch::Sender<RunProgress>,
}

impl RunShared {
    fn new() -> Self {
        let data = RunData::idle();
        let (progress, _) = watch::channel(data.progress());
        Self {
            data: RwLock::new(data),
            progress,
        }
    }

    fn read<T>(&self, f: impl FnOnce(&RunData) -> T) -> T {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        f(&data)
    }

    /// Apply `f` and publish the resulting progress.
    fn update(&self, f: impl FnOnce(&mut RunData)) {
        let progress = {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut data);
            data.progress()
        };
        self.progress.send_replace(progress);
    }

    fn reset(&self, run_id: Uuid) {
        self.update(|d| {
            *d = RunData::idle();
            d.run_id = Some(run_id);
            d.state = RunState::Connecting;
            d.started_at = Some(Utc::now());
        });
    }

    fn opened(&self) {
        self.update(|d| {
            if d.state == RunState::Connecting {
                d.state = RunState::Streaming;
            }
        });
    }

    fn push_item(&self, item: BacktestItem) {
        self.update(|d| {
            if d.state.is_terminal() {
                return;
            }
            d.items.push(item);
            d.snapshot = AggregateSnapshot::from_items(&d.items);
        });
    }

    fn skip(&self) {
        self.update(|d| {
            if !d.state.is_terminal() {
                d.skipped += 1;
            }
        });
    }

    fn finish(&self, outcome: Outcome) {
        self.update(|d| {
            if d.state.is_terminal() {
                return;
            }
            d.finished_at = Some(Utc::now());
            match outcome {
                Outcome::Summary(summary) => {
                    if summary.diverges_from(&d.snapshot, SUMMARY_TOLERANCE) {
                        warn!(
                            run_id = ?d.run_id,
                            local_return = d.snapshot.average_return,
                            backend_return = summary.avg_return,
                            local_count = d.snapshot.count,
                            "backend summary differs from received items; keeping local aggregate"
                        );
                    }
                    d.backend_summary = Some(summary);
                    d.state = RunState::Completed;
                }
                Outcome::Closed => {
                    debug!(run_id = ?d.run_id, "stream closed without summary");
                    d.state = RunState::Completed;
                }
                Outcome::Failed(e) => {
                    error!(run_id = ?d.run_id, "backtest stream failed: {e}");
                    d.error = Some(e);
                    d.state = RunState::Failed;
                }
                Outcome::Cancelled => d.state = RunState::Cancelled,
            }
            info!(
                run_id = ?d.run_id,
                state = ?d.state,
                count = d.snapshot.count,
                avg_return = d.snapshot.average_return,
                skipped = d.skipped,
                "backtest run finished"
            );
        });
    }
}

struct ActiveRun {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Consumes one streamed multi-symbol run at a time.
pub struct StreamAggregator {
    shared: Arc<RunShared>,
    active: Option<ActiveRun>,
    open_timeout: Duration,
    idle_timeout: Duration,
}

impl StreamAggregator {
    pub fn new(open_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(RunShared::new()),
            active: None,
            open_timeout,
            idle_timeout,
        }
    }

    /// Begin a new run. Any previous stream is closed first; its data is
    /// replaced by the new run's once this returns.
    pub async fn start<S, F>(&mut self, connect: F) -> Uuid
    where
        S: EventStream,
        F: Future<Output = Result<S, HubError>> + Send + 'static,
    {
        self.cancel().await;

        let run_id = Uuid::new_v4();
        self.shared.reset(run_id);
        info!(%run_id, "backtest run starting");

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(drive(
            Arc::clone(&self.shared),
            connect,
            cancel_rx,
            self.open_timeout,
            self.idle_timeout,
        ));
        self.active = Some(ActiveRun {
            cancel: cancel_tx,
            task,
        });
        run_id
    }

    /// Stop the current run, if any, and wait until its stream is closed.
    pub async fn cancel(&mut self) {
        let Some(run) = self.active.take() else {
            return;
        };
        let _ = run.cancel.send(());
        if let Err(e) = run.task.await {
            warn!("stream task ended abnormally: {e}");
        }
        // Covers a task that died before it could record its own outcome.
        self.shared.finish(Outcome::Cancelled);
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.shared.read(|d| d.run_id)
    }

    pub fn state(&self) -> RunState {
        self.shared.read(|d| d.state)
    }

    /// Items in arrival order.
    pub fn items(&self) -> Vec<BacktestItem> {
        self.shared.read(|d| d.items.clone())
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        self.shared.read(|d| d.snapshot)
    }

    /// Items and snapshot from the same instant.
    pub fn view(&self) -> (Vec<BacktestItem>, AggregateSnapshot) {
        self.shared.read(|d| (d.items.clone(), d.snapshot))
    }

    /// Averages the backend reported in its summary event, if one arrived.
    pub fn backend_summary(&self) -> Option<BackendSummary> {
        self.shared.read(|d| d.backend_summary)
    }

    pub fn error(&self) -> Option<HubError> {
        self.shared.read(|d| d.error.clone())
    }

    /// Number of malformed events ignored in the current run.
    pub fn skipped(&self) -> usize {
        self.shared.read(|d| d.skipped)
    }

    pub fn progress(&self) -> RunProgress {
        self.shared.read(RunData::progress)
    }

    pub fn subscribe(&self) -> watch::Receiver<RunProgress> {
        self.shared.progress.subscribe()
    }

    /// Resolves once the current run is no longer connecting or streaming.
    pub async fn wait_terminal(&self) -> RunProgress {
        let mut rx = self.subscribe();
        let res = rx.wait_for(|p| !p.state.is_active()).await.map(|p| p.clone());
        match res {
            Ok(progress) => progress,
            Err(_) => self.progress(),
        }
    }
}

impl Drop for StreamAggregator {
    fn drop(&mut self) {
        if let Some(run) = self.active.take() {
            let _ = run.cancel.send(());
        }
    }
}

enum Step {
    Message(String),
    Closed,
    Failed(HubError),
    Cancelled,
}

async fn drive<S, F>(
    shared: Arc<RunShared>,
    connect: F,
    mut cancel_rx: oneshot::Receiver<()>,
    open_timeout: Duration,
    idle_timeout: Duration,
) where
    S: EventStream,
    F: Future<Output = Result<S, HubError>> + Send + 'static,
{
    let opened = tokio::select! {
        _ = &mut cancel_rx => {
            shared.finish(Outcome::Cancelled);
            return;
        }
        res = tokio::time::timeout(open_timeout, connect) => res,
    };
    let mut stream = match opened {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            shared.finish(Outcome::Failed(e));
            return;
        }
        Err(_) => {
            shared.finish(Outcome::Failed(HubError::Timeout(format!(
                "stream did not open within {}ms",
                open_timeout.as_millis()
            ))));
            return;
        }
    };
    shared.opened();

    let outcome = loop {
        let step = tokio::select! {
            _ = &mut cancel_rx => Step::Cancelled,
            next = tokio::time::timeout(idle_timeout, stream.next_message()) => match next {
                Ok(Some(Ok(text))) => Step::Message(text),
                Ok(Some(Err(e))) => Step::Failed(e),
                Ok(None) => Step::Closed,
                Err(_) => Step::Failed(HubError::Timeout(format!(
                    "no event for {}ms",
                    idle_timeout.as_millis()
                ))),
            },
        };
        match step {
            Step::Message(text) => match StreamEvent::parse(&text) {
                Ok(StreamEvent::Item(item)) => {
                    debug!(code = %item.code, "item");
                    shared.push_item(item);
                }
                Ok(StreamEvent::Summary(summary)) => break Outcome::Summary(summary),
                Ok(StreamEvent::Other(kind)) => debug!(%kind, "ignoring event"),
                Err(e) => {
                    debug!("skipping malformed event: {e}");
                    shared.skip();
                }
            },
            Step::Closed => break Outcome::Closed,
            Step::Failed(e) => break Outcome::Failed(e),
            Step::Cancelled => break Outcome::Cancelled,
        }
    };

    stream.close().await;
    shared.finish(outcome);
}
