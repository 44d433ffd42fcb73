//! Content source contracts.
//!
//! A content source owns the hierarchical content; this crate only talks to it
//! through [`Connection`]s, watches it through a [`ChangeObserver`] and asks it
//! which workspaces exist.
//!
//! - [`request`] - Request and response types
//! - [`memory`] - In-memory content source

pub mod memory;
pub mod request;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CanopyError, Result};
use crate::model::{Changes, ExecutionContext};

pub use self::memory::MemorySource;
pub use self::request::{BranchNode, ChildRef, NodeData, ReadBranch, Request, Response};

/// What a source can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub supports_searches: bool,
    pub supports_queries: bool,
    pub supports_updates: bool,
    pub supports_same_name_siblings: bool,
    pub supports_creating_workspaces: bool,
}

/// An open session with a content source.
pub trait Connection: Send + Sync {
    fn source_name(&self) -> &str;

    /// Execute one request (simple or composite) synchronously.
    fn execute(&self, context: &ExecutionContext, request: Request) -> Result<Response>;

    /// Release the connection. Executing afterwards fails.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens connections to named sources.
pub trait ConnectionFactory: Send + Sync {
    fn create_connection(&self, source_name: &str) -> Result<Box<dyn Connection>>;
}

/// Receives batches of committed change requests.
pub trait ChangeObserver: Send + Sync {
    fn notify(&self, changes: &Changes);
}

/// A content source.
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn connection(&self) -> Result<Box<dyn Connection>>;

    /// Subscribe to committed changes. Delivery order matches commit order
    /// per workspace.
    fn register_observer(&self, observer: Arc<dyn ChangeObserver>);
}

/// A list of observers that all receive every batch.
#[derive(Default)]
pub struct Observers {
    list: RwLock<Vec<Arc<dyn ChangeObserver>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn ChangeObserver>) {
        self.list.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    pub fn notify(&self, changes: &Changes) {
        if changes.is_empty() {
            return;
        }
        // Snapshot so observers may register further observers.
        let observers = self.list.read().clone();
        for observer in observers {
            observer.notify(changes);
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.len())
            .finish()
    }
}

/// A [`ConnectionFactory`] over a set of named sources.
#[derive(Default)]
pub struct SourceConnections {
    sources: RwLock<HashMap<String, Arc<dyn Source>>>,
}

impl SourceConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, source: Arc<dyn Source>) {
        self.sources
            .write()
            .insert(source.name().to_string(), source);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.sources.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.sources.read().get(name).cloned()
    }
}

impl ConnectionFactory for SourceConnections {
    fn create_connection(&self, source_name: &str) -> Result<Box<dyn Connection>> {
        let source = self.get(source_name).ok_or_else(|| {
            CanopyError::source(format!("no source named '{source_name}'"))
        })?;
        source.connection()
    }
}

impl fmt::Debug for SourceConnections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.sources.read().keys().cloned().collect();
        f.debug_struct("SourceConnections")
            .field("sources", &names)
            .finish()
    }
}
