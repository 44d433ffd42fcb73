//! A decorator that makes a non-searchable content source searchable.
//!
//! [`SearchableSource`] wraps a [`Source`] and answers full-text searches and
//! access queries from its own [`IndexEngine`]. Every other request goes to
//! the wrapped source. Committed changes reported by the wrapped source are
//! applied to the index, inline or on the worker pool, before being passed
//! on to the decorator's own observers. Pool-applied batches keep the order
//! in which the source committed them.
//!
//! # Module Structure
//!
//! - [`connection`] - Synchronous and parallel connection strategies

pub mod connection;

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::config::{EngineConfig, IndexerConfig, SearchableConfig};
use crate::error::{CanopyError, Result};
use crate::index::{IndexEngine, ProcessorFactory, WorkspaceFactory};
use crate::indexer::Indexer;
use crate::model::{Changes, ExecutionContext};
use crate::source::{
    Capabilities, ChangeObserver, Connection, ConnectionFactory, Observers, Source,
};
use crate::util::WorkerPool;

pub use self::connection::{ParallelConnection, SyncConnection};

/// Connection factory that resolves the decorated source's own name to the
/// wrapped source, so index work never re-enters the decorator.
pub struct LoopbackConnections {
    wrapped: Arc<dyn Source>,
    fallback: Option<Arc<dyn ConnectionFactory>>,
}

impl LoopbackConnections {
    pub fn new(wrapped: Arc<dyn Source>) -> Self {
        LoopbackConnections {
            wrapped,
            fallback: None,
        }
    }

    /// Resolve every other source name through `fallback`.
    pub fn with_fallback(mut self, fallback: Arc<dyn ConnectionFactory>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl ConnectionFactory for LoopbackConnections {
    fn create_connection(&self, source_name: &str) -> Result<Box<dyn Connection>> {
        if source_name == self.wrapped.name() {
            return self.wrapped.connection();
        }
        match &self.fallback {
            Some(fallback) => fallback.create_connection(source_name),
            None => Err(CanopyError::source(format!(
                "no source named '{source_name}'"
            ))),
        }
    }
}

impl fmt::Debug for LoopbackConnections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackConnections")
            .field("wrapped", &self.wrapped.name())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Committed batches waiting for the index. At most one pool job drains
/// them at a time, in arrival order.
#[derive(Default)]
struct UpdateQueue {
    pending: VecDeque<Changes>,
    draining: bool,
}

pub(crate) struct SearchableInner {
    pub(crate) wrapped: Arc<dyn Source>,
    pub(crate) engine: IndexEngine,
    pub(crate) config: SearchableConfig,
    pub(crate) pool: Option<Arc<WorkerPool>>,
    updates: Mutex<UpdateQueue>,
    observers: Observers,
    connections: Arc<LoopbackConnections>,
}

impl SearchableInner {
    fn changes_committed(self: &Arc<Self>, changes: &Changes) {
        if self.config.asynchronous_updates {
            if let Some(pool) = &self.pool {
                self.enqueue(pool, changes);
                self.observers.notify(changes);
                return;
            }
        }
        if let Err(err) = self.engine.index_changes(changes) {
            error!(
                "index update of {} changes from '{}' failed: {err}",
                changes.len(),
                changes.source_name
            );
        }
        self.observers.notify(changes);
    }

    fn enqueue(self: &Arc<Self>, pool: &WorkerPool, changes: &Changes) {
        let start_draining = {
            let mut queue = self.updates.lock();
            queue.pending.push_back(changes.clone());
            !std::mem::replace(&mut queue.draining, true)
        };
        if !start_draining {
            return;
        }
        let inner = self.clone();
        if let Err(err) = pool.execute(move || inner.drain_updates()) {
            warn!("could not schedule index updates, applying inline: {err}");
            self.drain_updates();
        }
    }

    fn drain_updates(&self) {
        loop {
            let batch = {
                let mut queue = self.updates.lock();
                match queue.pending.pop_front() {
                    Some(batch) => batch,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            if let Err(err) = self.engine.index_changes(&batch) {
                error!(
                    "asynchronous index update of {} changes from '{}' failed: {err}",
                    batch.len(),
                    batch.source_name
                );
            }
        }
    }
}

/// Receives the wrapped source's changes. Holds the decorator weakly since
/// the wrapped source owns the observer.
struct IndexingObserver {
    inner: Weak<SearchableInner>,
}

impl ChangeObserver for IndexingObserver {
    fn notify(&self, changes: &Changes) {
        match self.inner.upgrade() {
            Some(inner) => inner.changes_committed(changes),
            None => debug!(
                "dropping {} changes from '{}': searchable source is gone",
                changes.len(),
                changes.source_name
            ),
        }
    }
}

/// A content source whose searches and queries are answered by an index.
#[derive(Clone)]
pub struct SearchableSource {
    inner: Arc<SearchableInner>,
}

impl SearchableSource {
    /// Wrap `wrapped`, building its index engine from the two factories.
    pub fn new(
        wrapped: Arc<dyn Source>,
        workspace_factory: Arc<dyn WorkspaceFactory>,
        processor_factory: Arc<dyn ProcessorFactory>,
        engine_config: EngineConfig,
        config: SearchableConfig,
    ) -> Result<Self> {
        config.validate()?;
        let name = wrapped.name().to_string();
        let pool = match config.worker_threads {
            0 => None,
            threads => Some(Arc::new(WorkerPool::new(
                format!("searchable-{name}"),
                threads,
                config.queue_capacity,
            )?)),
        };
        if pool.is_none() && (config.parallel_connections || config.asynchronous_updates) {
            debug!("no worker threads for '{name}'; requests and index updates run inline");
        }

        let connections = Arc::new(LoopbackConnections::new(wrapped.clone()));
        let engine = IndexEngine::new(
            name.clone(),
            engine_config,
            connections.clone(),
            workspace_factory,
            processor_factory,
        );
        let inner = Arc::new(SearchableInner {
            wrapped: wrapped.clone(),
            engine,
            config,
            pool,
            updates: Mutex::new(UpdateQueue::default()),
            observers: Observers::new(),
            connections,
        });
        wrapped.register_observer(Arc::new(IndexingObserver {
            inner: Arc::downgrade(&inner),
        }));
        info!("source '{name}' is now searchable");
        Ok(SearchableSource { inner })
    }

    /// Like [`new`](Self::new) with one value implementing both factories.
    pub fn with_backend<B>(
        wrapped: Arc<dyn Source>,
        backend: Arc<B>,
        engine_config: EngineConfig,
        config: SearchableConfig,
    ) -> Result<Self>
    where
        B: WorkspaceFactory + ProcessorFactory + 'static,
    {
        Self::new(wrapped, backend.clone(), backend, engine_config, config)
    }

    pub fn engine(&self) -> &IndexEngine {
        &self.inner.engine
    }

    pub fn wrapped(&self) -> &Arc<dyn Source> {
        &self.inner.wrapped
    }

    pub fn config(&self) -> &SearchableConfig {
        &self.inner.config
    }

    /// Connections that reach the wrapped source directly.
    pub fn loopback_connections(&self) -> Arc<dyn ConnectionFactory> {
        self.inner.connections.clone()
    }

    /// An indexer that reads from the wrapped source into this index.
    pub fn indexer(&self, context: ExecutionContext, config: IndexerConfig) -> Result<Indexer> {
        Indexer::new(
            &self.inner.engine,
            self.inner.connections.as_ref(),
            context,
            config,
        )
    }

    /// Stop the worker pool, waiting a bounded time for queued index updates,
    /// then shut the engine down.
    pub fn shutdown(&self) -> Result<()> {
        if let Some(pool) = &self.inner.pool {
            pool.shutdown(self.inner.config.shutdown_timeout());
        }
        self.inner.engine.shutdown()
    }
}

impl Source for SearchableSource {
    fn name(&self) -> &str {
        self.inner.wrapped.name()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_searches: true,
            supports_queries: true,
            ..self.inner.wrapped.capabilities()
        }
    }

    fn connection(&self) -> Result<Box<dyn Connection>> {
        let delegate: Arc<dyn Connection> = Arc::from(self.inner.wrapped.connection()?);
        match &self.inner.pool {
            Some(pool) if self.inner.config.parallel_connections => Ok(Box::new(
                ParallelConnection::new(self.inner.clone(), delegate, pool.clone()),
            )),
            _ => Ok(Box::new(SyncConnection::new(self.inner.clone(), delegate))),
        }
    }

    fn register_observer(&self, observer: Arc<dyn ChangeObserver>) {
        self.inner.observers.register(observer);
    }
}

impl fmt::Debug for SearchableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchableSource")
            .field("name", &self.name())
            .field("config", &self.inner.config)
            .field("engine", &self.inner.engine)
            .finish()
    }
}
