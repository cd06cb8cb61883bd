//! Typed work and result channels.
//!
//! The dispatcher and the worker pool only ever see the four traits
//! below, all with try-receive semantics so the cooperative loop never
//! blocks on an empty queue. Production and tests both use the
//! in-process implementation over unbounded `tokio::sync::mpsc`; a
//! deployment that moves workers out of process substitutes its own
//! transport behind the same traits.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, error::TryRecvError};

use taskfabric_runner::{ErrorInfo, RunState};

use crate::error::{ExecError, Result};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Dispatch message: "run this task".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkMessage {
    /// The claimed task to execute.
    pub task_id: String,
}

/// Result envelope published by a worker after a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// The task this envelope reports on.
    pub task_id: String,
    /// Terminal outcome of the run.
    pub state: RunState,
    /// Text destined for the completion notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_output: Option<String>,
    /// Artifacts produced by the run.
    #[serde(default)]
    pub artifact_refs: Vec<String>,
    /// Failure details when `state` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// The work payload's `meta`, carried through to the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Producer side of the work channel (dispatcher → workers).
#[async_trait]
pub trait WorkSender: Send + Sync {
    /// Enqueue a dispatch message.
    async fn send(&self, message: WorkMessage) -> Result<()>;
}

/// Consumer side of the work channel, shareable across worker units.
#[async_trait]
pub trait WorkReceiver: Send + Sync {
    /// Non-blocking receive; `None` when the queue is empty.
    async fn try_recv(&self) -> Result<Option<WorkMessage>>;
}

/// Producer side of the result channel (workers → dispatcher).
#[async_trait]
pub trait ResultSender: Send + Sync {
    /// Publish a result envelope.
    async fn send(&self, envelope: ResultEnvelope) -> Result<()>;
}

/// Consumer side of the result channel.
#[async_trait]
pub trait ResultReceiver: Send + Sync {
    /// Non-blocking receive; `None` when the queue is empty.
    async fn try_recv(&self) -> Result<Option<ResultEnvelope>>;
}

// ---------------------------------------------------------------------------
// In-process implementation
// ---------------------------------------------------------------------------

/// Sending half of an in-process channel.
pub struct InProcSender<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for InProcSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Receiving half of an in-process channel.
///
/// The receiver is behind a `tokio::sync::Mutex` so multiple worker
/// units can share one queue; each `try_recv` takes the lock only for
/// the non-blocking pop.
pub struct InProcReceiver<T> {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<T>>>,
}

impl<T> Clone for InProcReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

/// Create an unbounded in-process channel pair.
pub fn in_proc_channel<T>() -> (InProcSender<T>, InProcReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        InProcSender { tx },
        InProcReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

impl<T: Send> InProcSender<T> {
    fn send_inner(&self, value: T) -> Result<()> {
        self.tx
            .send(value)
            .map_err(|_| ExecError::ChannelClosed("receiver dropped".into()))
    }
}

impl<T: Send> InProcReceiver<T> {
    async fn try_recv_inner(&self) -> Result<Option<T>> {
        let mut rx = self.rx.lock().await;
        match rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(ExecError::ChannelClosed("sender dropped".into()))
            }
        }
    }
}

#[async_trait]
impl WorkSender for InProcSender<WorkMessage> {
    async fn send(&self, message: WorkMessage) -> Result<()> {
        self.send_inner(message)
    }
}

#[async_trait]
impl WorkReceiver for InProcReceiver<WorkMessage> {
    async fn try_recv(&self) -> Result<Option<WorkMessage>> {
        self.try_recv_inner().await
    }
}

#[async_trait]
impl ResultSender for InProcSender<ResultEnvelope> {
    async fn send(&self, envelope: ResultEnvelope) -> Result<()> {
        self.send_inner(envelope)
    }
}

#[async_trait]
impl ResultReceiver for InProcReceiver<ResultEnvelope> {
    async fn try_recv(&self) -> Result<Option<ResultEnvelope>> {
        self.try_recv_inner().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
