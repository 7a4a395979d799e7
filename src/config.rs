//! Controller configuration, loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::convergence::{BackoffStrategy, RetryPolicy};
use crate::manifest::TemplateSource;

pub const DEFAULT_INSTALL_NAMESPACE: &str = "keda";
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime settings for the reconciler.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace the controller is installed in (from KEDA_INSTALL_NAMESPACE)
    pub install_namespace: String,
    /// Component manifest (file from KEDA_TEMPLATE_PATH, or the embedded one)
    pub template: TemplateSource,
    /// Bound on every store call (from KEDA_CALL_TIMEOUT_MS)
    pub call_timeout: Duration,
    /// Backoff for transient store errors (KEDA_MAX_RETRIES, KEDA_RETRY_STRATEGY,
    /// KEDA_RETRY_BASE_MS)
    pub retry: RetryPolicy,
    /// Delay before re-running a retryable failure (from KEDA_REQUEUE_AFTER_MS)
    pub requeue_after: Option<Duration>,
}

impl ControllerConfig {
    /// Defaults with the embedded template and no requeue.
    pub fn new() -> Self {
        Self {
            install_namespace: DEFAULT_INSTALL_NAMESPACE.to_string(),
            template: TemplateSource::Embedded,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            retry: RetryPolicy::default(),
            requeue_after: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`; unset or unparsable values keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new();
        let millis = |name: &str| {
            lookup(name)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        if let Some(namespace) = lookup("KEDA_INSTALL_NAMESPACE").filter(|s| !s.is_empty()) {
            config.install_namespace = namespace;
        }
        if let Some(path) = lookup("KEDA_TEMPLATE_PATH").filter(|s| !s.is_empty()) {
            config.template = TemplateSource::File(PathBuf::from(path));
        }
        if let Some(timeout) = millis("KEDA_CALL_TIMEOUT_MS") {
            config.call_timeout = timeout;
        }
        if let Some(retries) = lookup("KEDA_MAX_RETRIES").and_then(|s| s.trim().parse::<u32>().ok()) {
            config.retry.max_retries = retries;
        }
        if let Some(strategy) = lookup("KEDA_RETRY_STRATEGY")
            .and_then(|s| BackoffStrategy::from_str(s.trim()))
        {
            config.retry.strategy = strategy;
        }
        if let Some(base) = millis("KEDA_RETRY_BASE_MS") {
            config.retry.base_delay = base;
        }
        config.requeue_after = millis("KEDA_REQUEUE_AFTER_MS").filter(|d| !d.is_zero());
        config
    }

    pub fn with_install_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.install_namespace = namespace.into();
        self
    }

    pub fn with_template(mut self, template: TemplateSource) -> Self {
        self.template = template;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_requeue_after(mut self, requeue_after: Option<Duration>) -> Self {
        self.requeue_after = requeue_after;
        self
    }

    /// Settings for tests: fixed 1ms backoff, short call timeout.
    pub fn for_testing() -> Self {
        Self::new()
            .with_call_timeout(Duration::from_millis(500))
            .with_retry(RetryPolicy::new(3, BackoffStrategy::Fixed, Duration::from_millis(1)))
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = ControllerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.install_namespace, "keda");
        assert_eq!(config.template, TemplateSource::Embedded);
        assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(config.retry.max_retries, 5);
        assert!(config.requeue_after.is_none());
    }

    #[test]
    fn reads_every_variable() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("KEDA_INSTALL_NAMESPACE", "operators"),
            ("KEDA_TEMPLATE_PATH", "/etc/keda/keda.yaml"),
            ("KEDA_CALL_TIMEOUT_MS", "250"),
            ("KEDA_MAX_RETRIES", "2"),
            ("KEDA_RETRY_STRATEGY", "linear"),
            ("KEDA_RETRY_BASE_MS", "40"),
            ("KEDA_REQUEUE_AFTER_MS", "1000"),
        ]));
        assert_eq!(config.install_namespace, "operators");
        assert_eq!(
            config.template,
            TemplateSource::File(PathBuf::from("/etc/keda/keda.yaml"))
        );
        assert_eq!(config.call_timeout, Duration::from_millis(250));
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.strategy, BackoffStrategy::Linear);
        assert_eq!(config.retry.base_delay, Duration::from_millis(40));
        assert_eq!(config.requeue_after, Some(Duration::from_secs(1)));
    }

    #[test]
    fn unparsable_values_keep_defaults() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("KEDA_CALL_TIMEOUT_MS", "soon"),
            ("KEDA_MAX_RETRIES", "-1"),
            ("KEDA_RETRY_STRATEGY", "random"),
            ("KEDA_REQUEUE_AFTER_MS", "0"),
        ]));
        assert_eq!(config.retry.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(config.retry.max_retries, 5);
        assert!(config.requeue_after.is_none());
    }
}
