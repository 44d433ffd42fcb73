//! Index engine, workspace registry and processors.
//!
//! # Module Structure
//!
//! - [`engine`] - The [`IndexEngine`] owning the workspace registry
//! - [`registry`] - Thread-safe workspace registry ([`Workspaces`])
//! - [`processor`] - Single-use [`Processor`] with commit/rollback semantics
//! - [`memory`] - In-memory index technology
//!
//! The concrete index technology plugs in through two capability traits
//! supplied at construction: [`WorkspaceFactory`] creates the per-workspace
//! state and [`ProcessorFactory`] opens an [`IndexSession`] over it.

pub mod engine;
pub mod memory;
pub mod processor;
pub mod registry;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{ChangeRequest, ExecutionContext};
use crate::query::{AccessQuery, FullTextSearch, QueryResults, SearchResults};

pub use self::engine::IndexEngine;
pub use self::memory::{IndexedNode, MemoryIndex, MemoryWorkspaceIndex};
pub use self::processor::{Processor, ProcessorState};
pub use self::registry::Workspaces;

/// The persisted index state of one workspace.
///
/// Instances are owned by the engine's registry; processors and sessions only
/// ever hold shared references.
pub trait WorkspaceIndex: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Wipe the index storage. Called when the workspace is deleted upstream.
    fn destroy(&self) -> Result<()>;

    /// Release any resources held by this index.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Access to the concrete type, for sessions of the same technology.
    fn as_any(&self) -> &dyn Any;
}

/// Creates workspace indexes for an engine.
pub trait WorkspaceFactory: Send + Sync {
    fn create_workspace(&self, source_name: &str, name: &str) -> Result<Arc<dyn WorkspaceIndex>>;
}

/// Opens index sessions bound to an engine's registry.
pub trait ProcessorFactory: Send + Sync {
    fn create_session(
        &self,
        context: &ExecutionContext,
        workspaces: Workspaces,
        read_only: bool,
    ) -> Result<Box<dyn IndexSession>>;
}

/// The technology-specific half of a [`Processor`].
///
/// Change requests must be applied in the order they are passed in.
pub trait IndexSession: Send {
    fn apply(&mut self, change: &ChangeRequest) -> Result<()>;

    fn search(&mut self, request: &FullTextSearch) -> Result<SearchResults>;

    fn query(&mut self, request: &AccessQuery) -> Result<QueryResults>;

    /// Make everything applied since the previous commit durable. May be
    /// called more than once per session.
    fn commit(&mut self) -> Result<()>;

    /// Discard everything applied since the previous commit.
    fn rollback(&mut self) -> Result<()>;

    /// Release resources; called once after commit or rollback.
    fn release(&mut self) {}
}
