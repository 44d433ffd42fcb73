//! Bounded-depth crawler that (re)builds index state from live content.
//!
//! The indexer reads the content tree in branch reads of at most
//! [`IndexerConfig::max_depth_per_read`] levels and turns every node it sees
//! into a change request for its write [`Processor`]. Children beyond a read's
//! depth are queued and fetched by follow-up reads, so a subtree is never held
//! in memory as a whole. The processor is flushed every
//! [`IndexerConfig::commit_interval`] changes, which bounds the mutations
//! waiting for a commit as well.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use canopy::{
//!     EngineConfig, ExecutionContext, IndexEngine, Indexer, IndexerConfig, MemoryIndex,
//!     MemorySource, Path, Property, SourceConnections,
//! };
//!
//! # fn main() -> canopy::Result<()> {
//! let source = MemorySource::new("content", "default");
//! source.add_node("default", &Path::root(), "a", vec![Property::new("title", "hello")])?;
//!
//! let connections = Arc::new(SourceConnections::new());
//! connections.add(Arc::new(source));
//! let engine = IndexEngine::with_backend(
//!     "content",
//!     EngineConfig::default(),
//!     connections.clone(),
//!     Arc::new(MemoryIndex::new()),
//! );
//!
//! let mut indexer = Indexer::new(
//!     &engine,
//!     connections.as_ref(),
//!     ExecutionContext::new(),
//!     IndexerConfig::default(),
//! )?;
//! indexer.index_workspace("default")?;
//! indexer.close()?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::IndexerConfig;
use crate::error::{CanopyError, Result};
use crate::index::{IndexEngine, Processor};
use crate::model::{
    ChangeRequest, ExecutionContext, Location, Path, Properties, Property, PropertyValue,
    PRIMARY_TYPE, ROOT_PRIMARY_TYPE,
};
use crate::source::{BranchNode, Connection, ConnectionFactory, Request};
use crate::util::{Interrupt, WorkerPool, run_or_submit};

/// Queue capacity of the indexer's read pool; reads are waited one at a time.
const READ_QUEUE_CAPACITY: usize = 4;

/// How far below the starting location to index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Unbounded,
    /// Number of levels including the starting node; must be at least 1.
    Levels(usize),
}

impl Depth {
    fn levels(self) -> Result<usize> {
        match self {
            Depth::Unbounded => Ok(usize::MAX),
            Depth::Levels(0) => Err(CanopyError::invalid_argument(
                "index depth must be at least 1",
            )),
            Depth::Levels(n) => Ok(n),
        }
    }
}

/// Crawls a content source and feeds the result into one write processor.
///
/// Changes become visible to searches when the processor is flushed, every
/// `commit_interval` changes, and once the indexer is closed.
pub struct Indexer {
    source_name: String,
    context: ExecutionContext,
    config: IndexerConfig,
    connection: Arc<dyn Connection>,
    processor: Option<Processor>,
    pool: Option<WorkerPool>,
    interrupt: Interrupt,
    /// Changes applied since the last flush.
    unflushed: usize,
    closed: bool,
}

/// Crawl state carried across follow-up reads: children still to be read and
/// the locations of their parents.
struct Walk {
    pending: VecDeque<Location>,
    parents: HashMap<Path, Location>,
}

impl Indexer {
    pub fn new(
        engine: &IndexEngine,
        connections: &dyn ConnectionFactory,
        context: ExecutionContext,
        config: IndexerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let source_name = engine.source_name().to_string();
        let connection: Arc<dyn Connection> =
            Arc::from(connections.create_connection(&source_name)?);
        let processor = engine.create_processor(&context, None, false)?;
        let pool = match config.read_threads {
            0 => None,
            threads => Some(WorkerPool::new(
                format!("indexer-{source_name}"),
                threads,
                READ_QUEUE_CAPACITY,
            )?),
        };
        Ok(Indexer {
            source_name,
            context,
            config,
            connection,
            processor: Some(processor),
            pool,
            interrupt: Interrupt::new(),
            unflushed: 0,
            closed: false,
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// A handle that cancels the current (or next) read from another thread.
    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Rebuild the whole index of `workspace`.
    pub fn index_workspace(&mut self, workspace: &str) -> Result<()> {
        self.index(workspace, &Location::root(), Depth::Unbounded)
    }

    /// Rebuild the index of every workspace the source lists.
    pub fn index_all_workspaces(&mut self) -> Result<()> {
        self.check_open()?;
        let workspaces = self
            .connection
            .execute(&self.context, Request::GetWorkspaces)?
            .into_workspaces()?;
        for workspace in workspaces {
            self.index_workspace(&workspace)?;
        }
        Ok(())
    }

    /// Reindex the subtree at `location` down to `depth` levels.
    ///
    /// `Depth::Levels(1)` only refreshes the node's own properties. An
    /// interrupted crawl returns `Ok` with the index partially updated;
    /// running the same call again repairs it.
    pub fn index(&mut self, workspace: &str, location: &Location, depth: Depth) -> Result<()> {
        self.check_open()?;
        let levels = depth.levels()?;
        info!(
            "indexing '{}' workspace '{workspace}' at {location} ({depth:?})",
            self.source_name
        );
        match self.index_subgraph(workspace, location, levels) {
            Err(err) if err.is_cancelled() => {
                warn!("indexing of workspace '{workspace}' at {location} was interrupted");
                Ok(())
            }
            Err(err) => Err(err),
            Ok(()) => {
                info!("indexed workspace '{workspace}' at {location}");
                Ok(())
            }
        }
    }

    /// Shut down the connection and read pool, then commit the processor.
    /// Closing again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(err) = self.connection.close() {
            warn!("closing indexer connection to '{}' failed: {err}", self.source_name);
        }
        if let Some(pool) = self.pool.take() {
            pool.shutdown(self.config.shutdown_timeout());
        }
        match self.processor.take() {
            Some(processor) => processor.close().map(|_| ()),
            None => Ok(()),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(CanopyError::illegal_state(format!(
                "indexer for '{}' is closed",
                self.source_name
            )));
        }
        Ok(())
    }

    fn apply(&mut self, change: ChangeRequest) -> Result<()> {
        let processor = self.processor.as_mut().ok_or_else(|| {
            CanopyError::illegal_state(format!("indexer for '{}' is closed", self.source_name))
        })?;
        processor.apply(change)?;
        self.unflushed += 1;
        if self.config.commit_interval > 0 && self.unflushed >= self.config.commit_interval {
            processor.flush()?;
            self.unflushed = 0;
        }
        Ok(())
    }

    /// Read the branch at `location`. A missing location is turned into a
    /// delete of that branch and reported as `None`.
    fn read(
        &mut self,
        workspace: &str,
        location: &Location,
        depth: usize,
    ) -> Result<Option<Vec<BranchNode>>> {
        if self.interrupt.take() {
            return Err(CanopyError::cancelled("indexer was interrupted"));
        }
        debug!("reading {location} in '{workspace}' to depth {depth}");
        let connection = self.connection.clone();
        let context = self.context.clone();
        let request = Request::read_branch(workspace, location.clone(), depth);
        let task = run_or_submit(self.pool.as_ref(), move || {
            connection.execute(&context, request)?.into_branch()
        })?;
        match task.wait(Some(&self.interrupt)) {
            Ok(nodes) if nodes.is_empty() => Err(CanopyError::source(format!(
                "branch read at {location} returned no nodes"
            ))),
            Ok(nodes) => Ok(Some(nodes)),
            Err(err) if err.is_not_found() => {
                debug!("{location} in '{workspace}' no longer exists; removing it");
                self.apply(ChangeRequest::delete_branch(workspace, location.clone()))?;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn index_subgraph(&mut self, workspace: &str, start: &Location, depth: usize) -> Result<()> {
        let first_depth = depth.min(self.config.max_depth_per_read);
        let Some(nodes) = self.read(workspace, start, first_depth)? else {
            return Ok(());
        };
        let mut nodes = nodes.into_iter();
        let Some(root) = nodes.next() else {
            return Ok(());
        };

        if depth == 1 {
            let properties = node_properties(&root);
            return self.apply(ChangeRequest::update_properties(
                workspace,
                root.location,
                properties,
                true,
            ));
        }

        if start.is_root() {
            self.apply(ChangeRequest::delete_branch(workspace, root.location.clone()))?;
        } else {
            self.apply(ChangeRequest::delete_children(workspace, root.location.clone()))?;
        }
        self.apply(ChangeRequest::update_properties(
            workspace,
            root.location.clone(),
            node_properties(&root),
            true,
        ))?;

        let mut walk = Walk {
            pending: VecDeque::new(),
            parents: HashMap::new(),
        };
        self.create_batch(workspace, root, nodes, &mut walk)?;

        let start_len = start.path().len();
        while let Some(location) = walk.pending.pop_front() {
            let below = location.path().len().saturating_sub(start_len);
            if below >= depth {
                continue;
            }
            let remaining = depth - below;
            let Some(nodes) =
                self.read(workspace, &location, remaining.min(self.config.max_depth_per_read))?
            else {
                continue;
            };
            let mut nodes = nodes.into_iter();
            let Some(root) = nodes.next() else {
                continue;
            };
            let parent = parent_location(root.location.path(), &HashMap::new(), &walk.parents);
            self.apply(ChangeRequest::create_node(
                workspace,
                parent,
                root.location.clone(),
                node_properties(&root),
            ))?;
            self.create_batch(workspace, root, nodes, &mut walk)?;
        }
        Ok(())
    }

    /// Issue a create for every node after the batch root, in pre-order, and
    /// queue children the read did not include.
    fn create_batch(
        &mut self,
        workspace: &str,
        root: BranchNode,
        rest: impl Iterator<Item = BranchNode>,
        walk: &mut Walk,
    ) -> Result<()> {
        let mut batch: HashMap<Path, Location> = HashMap::new();
        walk.note_unread(&root);
        batch.insert(root.location.path().clone(), root.location);

        for node in rest {
            let parent = parent_location(node.location.path(), &batch, &walk.parents);
            walk.note_unread(&node);
            self.apply(ChangeRequest::create_node(
                workspace,
                parent,
                node.location.clone(),
                node.properties,
            ))?;
            batch.insert(node.location.path().clone(), node.location);
        }
        Ok(())
    }
}

impl Walk {
    fn note_unread(&mut self, node: &BranchNode) {
        let before = self.pending.len();
        self.pending.extend(node.unread_children().cloned());
        if self.pending.len() > before {
            self.parents
                .insert(node.location.path().clone(), node.location.clone());
        }
    }
}

fn parent_location(
    path: &Path,
    batch: &HashMap<Path, Location>,
    parents: &HashMap<Path, Location>,
) -> Location {
    let parent = path.parent().unwrap_or_default();
    batch
        .get(&parent)
        .or_else(|| parents.get(&parent))
        .cloned()
        .unwrap_or_else(|| Location::new(parent))
}

/// The node's properties; the root also gets its primary type, which sources
/// leave out of their property reads.
fn node_properties(node: &BranchNode) -> Properties {
    let mut properties = node.properties.clone();
    if node.location.is_root() && !properties.contains_key(PRIMARY_TYPE) {
        properties.insert(
            PRIMARY_TYPE.to_string(),
            Property::new(PRIMARY_TYPE, PropertyValue::Name(ROOT_PRIMARY_TYPE.to_string())),
        );
    }
    properties
}

impl Drop for Indexer {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.close() {
                warn!("closing indexer for '{}' on drop failed: {err}", self.source_name);
            }
        }
    }
}

impl fmt::Debug for Indexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indexer")
            .field("source_name", &self.source_name)
            .field("config", &self.config)
            .field("threaded", &self.pool.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}
