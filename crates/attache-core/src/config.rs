//! Pipeline configuration
//!
//! Loaded once at startup; the hook concurrency strategy is a deployment
//! decision, not a per-request one.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the caller-supplied hook is scheduled across a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStrategy {
    /// One invocation per intent, in submission order, awaited one at a time.
    PerItemSequential,
    /// One invocation per intent, all concurrent; every invocation is
    /// drained before results are inspected.
    PerItemConcurrent,
    /// A single invocation receiving the whole batch.
    WholeBatch,
}

impl HookStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "per_item_sequential" | "sequential" => Some(Self::PerItemSequential),
            "per_item_concurrent" | "concurrent" => Some(Self::PerItemConcurrent),
            "whole_batch" | "batch" => Some(Self::WholeBatch),
            _ => None,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hook scheduling strategy for the whole deployment.
    pub hook_strategy: HookStrategy,
    /// Deadline applied to each individual store call. A timed-out call is
    /// treated like any other per-intent failure.
    pub store_timeout: Duration,
    /// Chunk size used when streaming object bodies to a sink.
    pub download_chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hook_strategy: HookStrategy::PerItemSequential,
            store_timeout: Duration::from_secs(30),
            download_chunk_size: 64 * 1024,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("ATTACHE_HOOK_STRATEGY") {
            if let Some(strategy) = HookStrategy::parse(&v) {
                config.hook_strategy = strategy;
            }
        }
        if let Ok(v) = std::env::var("ATTACHE_STORE_TIMEOUT_SECONDS") {
            if let Ok(secs) = v.parse::<u64>() {
                config.store_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("ATTACHE_DOWNLOAD_CHUNK_SIZE") {
            if let Ok(size) = v.parse::<usize>() {
                config.download_chunk_size = size.max(1);
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.hook_strategy, HookStrategy::PerItemSequential);
        assert_eq!(config.store_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            HookStrategy::parse("per_item_concurrent"),
            Some(HookStrategy::PerItemConcurrent)
        );
        assert_eq!(HookStrategy::parse("whole_batch"), Some(HookStrategy::WholeBatch));
        assert_eq!(HookStrategy::parse("bogus"), None);
    }
}
