//! # taskfabric-exec
//!
//! The execution fabric: scheduling and state machinery that lets a
//! synchronous conversational main path coexist with long-running
//! background work.
//!
//! ```text
//!  main path                      work path
//!  ─────────                      ─────────
//!  Session ──► TaskStore          producer ──► TaskStore (work, queued)
//!     │          │                                │
//!     │        claim                        Dispatcher (claim + dispatch)
//!     ▼          │                                │
//!  Runner ◄──────┘                          Work Channel
//!     │                                          │
//!  finalize + assistant turn               WorkerPool ──► Runner
//!                                                │
//!                                          Result Channel
//!                                                │
//!                                   Dispatcher (finalize + notification)
//!                                                │
//!                                   Session::drain_notifications ──► UI
//! ```
//!
//! Guarantees the surrounding layers rely on:
//!
//! - each task is claimed by exactly one worker at a time under a
//!   time-bounded lease;
//! - main-path and worker-path execution are isolated — the workers run
//!   on a dedicated single-threaded runtime, so a slow worker never
//!   stalls the conversation;
//! - completed worker output surfaces as a `notification` task consumed
//!   by [`Session::drain_notifications`], without loss.

pub mod channel;
pub mod codes;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod exec_loop;
pub mod session;
pub mod time;
pub mod worker;

// ── re-exports ───────────────────────────────────────────────────────

pub use channel::{
    InProcReceiver, InProcSender, ResultEnvelope, ResultReceiver, ResultSender, WorkMessage,
    WorkReceiver, WorkSender, in_proc_channel,
};
pub use config::{ExecConfig, SessionConfig};
pub use dispatcher::{DispatchConfig, Dispatcher, MIN_REPEAT_INTERVAL_SECONDS};
pub use error::{ExecError, Result};
pub use exec_loop::{ExecutionLoop, LoopConfig, StopHandle};
pub use session::{MessageResult, Session};
pub use worker::{WorkWorker, WorkerPool};
