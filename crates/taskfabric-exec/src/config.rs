//! Fabric configuration.
//!
//! Defaults match the documented recognized options; `from_env` lets a
//! deployment override them with `TASKFABRIC_*` environment variables
//! without a config file.

use std::time::Duration;

use crate::dispatcher::DispatchConfig;
use crate::exec_loop::LoopConfig;

/// Session (main path) configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Conversation whose journal the main path reads and writes.
    pub conversation_id: String,
    /// Lease length for session-initiated claims.
    pub claim_ttl_seconds: i64,
    /// Hard wall-clock deadline for the main-path runner. Zero disables
    /// the deadline.
    pub main_runner_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            conversation_id: "default".to_string(),
            claim_ttl_seconds: 30,
            main_runner_timeout: Duration::from_secs(600),
        }
    }
}

/// Top-level configuration for the execution fabric.
#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    /// Dispatcher limits and timeouts.
    pub dispatch: DispatchConfig,
    /// Background loop cadence.
    pub exec_loop: LoopConfig,
    /// Main-path settings.
    pub session: SessionConfig,
}

impl ExecConfig {
    /// Defaults overridden by `TASKFABRIC_*` environment variables.
    ///
    /// Recognized: `TASKFABRIC_WORKER_COUNT`, `TASKFABRIC_POLL_INTERVAL_MS`,
    /// `TASKFABRIC_WORKER_TIMEOUT_SECONDS`,
    /// `TASKFABRIC_WORK_QUEUE_TIMEOUT_SECONDS`,
    /// `TASKFABRIC_MAIN_TIMEOUT_SECONDS`, `TASKFABRIC_CLAIM_TTL_SECONDS`.
    /// Unset or unparseable variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(count) = env_parse::<usize>("TASKFABRIC_WORKER_COUNT") {
            config.dispatch.worker_count = count;
        }
        if let Some(ms) = env_parse::<u64>("TASKFABRIC_POLL_INTERVAL_MS") {
            config.exec_loop.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("TASKFABRIC_WORKER_TIMEOUT_SECONDS") {
            config.dispatch.worker_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("TASKFABRIC_WORK_QUEUE_TIMEOUT_SECONDS") {
            config.dispatch.work_queue_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("TASKFABRIC_MAIN_TIMEOUT_SECONDS") {
            config.session.main_runner_timeout = Duration::from_secs(secs);
        }
        if let Some(ttl) = env_parse::<i64>("TASKFABRIC_CLAIM_TTL_SECONDS") {
            config.session.claim_ttl_seconds = ttl;
            config.dispatch.claim_ttl_seconds = ttl;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_options() {
        let config = ExecConfig::default();
        assert_eq!(config.dispatch.worker_count, 2);
        assert_eq!(config.dispatch.worker_timeout, Duration::from_secs(600));
        assert_eq!(config.dispatch.work_queue_timeout, Duration::from_secs(1800));
        assert_eq!(config.session.main_runner_timeout, Duration::from_secs(600));
        assert_eq!(config.session.claim_ttl_seconds, 30);
        assert_eq!(config.exec_loop.poll_interval, Duration::from_millis(100));
    }
}
