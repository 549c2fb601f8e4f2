use std::time::Duration;

use serde::Deserialize;

/// Scheduler tuning knobs. All fields have working defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on the distributed lock-acquire wait per firing.
    /// Kept short on purpose: the lock guards only the claim decision.
    pub lock_timeout_ms: u64,
    /// Maximum number of task bodies running concurrently in this process.
    pub pool_size: usize,
    /// How long `shutdown` waits for in-flight executions before aborting them.
    pub shutdown_timeout_ms: u64,
    pub logging: TaskLoggingConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 50,
            pool_size: 4,
            shutdown_timeout_ms: 10_000,
            logging: TaskLoggingConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Controls the info-level start/finish/fail log lines per task.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskLoggingConfig {
    pub enabled: bool,
    /// Task names exempt from info-level execution logging (chatty tasks).
    pub ignored_tasks: Vec<String>,
}

impl Default for TaskLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ignored_tasks: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SchedulerConfig::default();
        assert_eq!(config.lock_timeout(), Duration::from_millis(50));
        assert_eq!(config.pool_size, 4);
        assert!(config.logging.enabled);
        assert!(config.logging.ignored_tasks.is_empty());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: SchedulerConfig = serde_json::from_str(
            r#"{ "lock_timeout_ms": 100, "logging": { "ignored_tasks": ["Heartbeat-ping"] } }"#,
        )
        .unwrap();
        assert_eq!(config.lock_timeout_ms, 100);
        assert_eq!(config.pool_size, 4);
        assert!(config.logging.enabled);
        assert_eq!(config.logging.ignored_tasks, vec!["Heartbeat-ping"]);
    }
}
