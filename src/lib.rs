//! # Canopy
//!
//! Search and indexing for hierarchical content repositories.
//!
//! ## Features
//!
//! - Per-workspace search indexes behind a thread-safe registry
//! - Single-use processors with commit/rollback semantics
//! - A bounded-depth crawler that (re)builds index state from live content
//! - A decorator that makes any content source searchable and keeps its
//!   index up to date from change notifications
//! - An in-memory content source and index technology
// Core modules
pub mod config;
mod error;
pub mod index;
pub mod indexer;
pub mod model;
pub mod query;
pub mod searchable;
pub mod source;
pub mod util;

// Re-exports for the public API
pub use config::{EngineConfig, IndexerConfig, SearchableConfig};
pub use error::{CanopyError, ErrorKind, Result};
pub use index::{
    IndexEngine, IndexSession, IndexedNode, MemoryIndex, MemoryWorkspaceIndex, Processor,
    ProcessorFactory, ProcessorState, WorkspaceFactory, WorkspaceIndex, Workspaces,
};
pub use indexer::{Depth, Indexer};
pub use model::{
    ChangeRequest, Changes, ExecutionContext, Location, Path, Properties, Property,
    PropertyValue, Segment, properties,
};
pub use query::{
    AccessQuery, Constraint, FullTextSearch, QueryResults, QueryRow, SearchHit, SearchResults,
};
pub use searchable::{LoopbackConnections, SearchableSource};
pub use source::{
    BranchNode, Capabilities, ChangeObserver, ChildRef, Connection, ConnectionFactory,
    MemorySource, NodeData, Observers, Request, Response, Source, SourceConnections,
};
pub use util::{Interrupt, WorkerPool};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
