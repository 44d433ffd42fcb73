//! Configuration for the index engine, the indexer and the searchable source.
//!
//! All structs deserialize from JSON with every field optional.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CanopyError, Result};

/// Configuration for an [`IndexEngine`](crate::index::IndexEngine).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Check that the source lists a workspace before creating its index.
    pub verify_workspaces: bool,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Configuration for an [`Indexer`](crate::indexer::Indexer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Maximum depth fetched from the source in one branch read.
    pub max_depth_per_read: usize,
    /// Threads reading from the source; 0 reads on the calling thread.
    pub read_threads: usize,
    /// Changes applied before the processor is flushed mid-crawl; 0 commits
    /// only when the indexer closes.
    pub commit_interval: usize,
    /// How long `close` waits for in-flight reads.
    pub shutdown_timeout_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            max_depth_per_read: 10,
            read_threads: 1,
            commit_interval: 10_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl IndexerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_depth_per_read(mut self, depth: usize) -> Self {
        self.max_depth_per_read = depth;
        self
    }

    pub fn with_read_threads(mut self, threads: usize) -> Self {
        self.read_threads = threads;
        self
    }

    pub fn with_commit_interval(mut self, changes: usize) -> Self {
        self.commit_interval = changes;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_depth_per_read == 0 {
            return Err(CanopyError::invalid_argument(
                "max_depth_per_read must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Configuration for a [`SearchableSource`](crate::searchable::SearchableSource).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchableConfig {
    /// Dispatch source requests on the worker pool concurrently with index work.
    pub parallel_connections: bool,
    /// Update indexes on the worker pool instead of before the change returns.
    pub asynchronous_updates: bool,
    /// Worker pool size; 0 runs everything on the calling thread.
    pub worker_threads: usize,
    /// Maximum number of queued jobs before submitters block.
    pub queue_capacity: usize,
    /// How long `shutdown` waits for the worker pool.
    pub shutdown_timeout_ms: u64,
}

impl Default for SearchableConfig {
    fn default() -> Self {
        SearchableConfig {
            parallel_connections: false,
            asynchronous_updates: false,
            worker_threads: 0,
            queue_capacity: 1024,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl SearchableConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Synchronous dispatch and inline index updates on the calling thread.
    pub fn synchronous() -> Self {
        Self::default()
    }

    /// Parallel dispatch on a pool of `threads` workers.
    pub fn parallel(threads: usize) -> Self {
        SearchableConfig {
            parallel_connections: true,
            worker_threads: threads,
            ..Self::default()
        }
    }

    pub fn with_asynchronous_updates(mut self, asynchronous: bool) -> Self {
        self.asynchronous_updates = asynchronous;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(CanopyError::invalid_argument(
                "queue_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}
