//! Engine configuration

use msgbridge_core::env::{env_get, env_get_ms};
use std::time::Duration;

/// Upper bound on completion worker threads
pub const MAX_WORKERS: usize = 64;

/// Configuration for an [`Engine`](crate::Engine)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Completion worker threads (default: CPU count, clamped to 2..=8)
    pub num_workers: usize,

    /// Maximum live completion slots before allocation fails with `NoMem`
    pub max_aios: usize,

    /// Default per-socket receive queue depth (`recv-buffer`)
    pub recv_buffer: usize,

    /// Longest the timer thread sleeps without re-checking its heap
    pub timer_max_sleep: Duration,

    /// Longest an idle worker parks before re-checking the queue
    pub park_timeout: Duration,

    /// Prefix for engine thread names
    pub thread_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let num_cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            num_workers: num_cpus.clamp(2, 8),
            max_aios: 1 << 20,
            recv_buffer: 128,
            timer_max_sleep: Duration::from_millis(100),
            park_timeout: Duration::from_millis(50),
            thread_prefix: "msgb".into(),
        }
    }
}

impl EngineConfig {
    /// Library defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `MSGB_*` environment variables
    ///
    /// - `MSGB_NUM_WORKERS`
    /// - `MSGB_MAX_AIOS`
    /// - `MSGB_RECV_BUFFER`
    /// - `MSGB_TIMER_MAX_SLEEP_MS`
    /// - `MSGB_PARK_TIMEOUT_MS`
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            num_workers: env_get("MSGB_NUM_WORKERS", d.num_workers).min(MAX_WORKERS),
            max_aios: env_get("MSGB_MAX_AIOS", d.max_aios),
            recv_buffer: env_get("MSGB_RECV_BUFFER", d.recv_buffer),
            timer_max_sleep: env_get_ms("MSGB_TIMER_MAX_SLEEP_MS", d.timer_max_sleep),
            park_timeout: env_get_ms("MSGB_PARK_TIMEOUT_MS", d.park_timeout),
            thread_prefix: d.thread_prefix,
        }
    }

    /// Set number of completion workers
    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n.min(MAX_WORKERS);
        self
    }

    /// Set the live completion slot limit
    pub fn max_aios(mut self, n: usize) -> Self {
        self.max_aios = n;
        self
    }

    /// Set default receive queue depth
    pub fn recv_buffer(mut self, n: usize) -> Self {
        self.recv_buffer = n;
        self
    }

    /// Set the timer thread's longest sleep
    pub fn timer_max_sleep(mut self, d: Duration) -> Self {
        self.timer_max_sleep = d;
        self
    }

    /// Set the idle worker park timeout
    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    /// Set thread name prefix
    pub fn thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_prefix = prefix.into();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.num_workers == 0 {
            return Err("num_workers must be at least 1");
        }
        if self.num_workers > MAX_WORKERS {
            return Err("num_workers exceeds maximum");
        }
        if self.max_aios == 0 {
            return Err("max_aios must be at least 1");
        }
        if self.timer_max_sleep.is_zero() {
            return Err("timer_max_sleep must be non-zero");
        }
        if self.park_timeout.is_zero() {
            return Err("park_timeout must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let c = EngineConfig::default();
        assert!(c.validate().is_ok());
        assert!(c.num_workers >= 2);
    }

    #[test]
    fn test_builder() {
        let c = EngineConfig::new()
            .num_workers(1000)
            .max_aios(4)
            .recv_buffer(0)
            .thread_prefix("t");
        assert_eq!(c.num_workers, MAX_WORKERS);
        assert_eq!(c.max_aios, 4);
        assert_eq!(c.recv_buffer, 0);
        assert_eq!(c.thread_prefix, "t");
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(EngineConfig::new().num_workers(0).validate().is_err());
        assert!(EngineConfig::new().max_aios(0).validate().is_err());
        assert!(EngineConfig::new()
            .park_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
