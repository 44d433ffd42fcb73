//! The index engine: owner of the workspace registry and processor factory.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{CanopyError, Result};
use crate::index::processor::Processor;
use crate::index::registry::Workspaces;
use crate::index::{ProcessorFactory, WorkspaceFactory, WorkspaceIndex};
use crate::model::{Changes, ExecutionContext};
use crate::source::{ChangeObserver, ConnectionFactory};

/// Keeps the search indexes of one content source.
///
/// The engine is the only component that creates or destroys workspace
/// indexes. Everything else works through [`Processor`]s, which are bound to
/// the live registry at creation time.
pub struct IndexEngine {
    source_name: String,
    config: EngineConfig,
    workspaces: Workspaces,
    processors: Arc<dyn ProcessorFactory>,
    closed: AtomicBool,
}

impl IndexEngine {
    /// Create an engine for `source_name`.
    ///
    /// `connections` is used to verify workspaces against the source when
    /// [`EngineConfig::verify_workspaces`] is set.
    pub fn new(
        source_name: impl Into<String>,
        config: EngineConfig,
        connections: Arc<dyn ConnectionFactory>,
        workspace_factory: Arc<dyn WorkspaceFactory>,
        processor_factory: Arc<dyn ProcessorFactory>,
    ) -> Self {
        let source_name = source_name.into();
        let verifier = config.verify_workspaces.then_some(connections);
        let workspaces = Workspaces::new(source_name.clone(), workspace_factory, verifier);
        IndexEngine {
            source_name,
            config,
            workspaces,
            processors: processor_factory,
            closed: AtomicBool::new(false),
        }
    }

    /// Create an engine from one value implementing both factories.
    pub fn with_backend<B>(
        source_name: impl Into<String>,
        config: EngineConfig,
        connections: Arc<dyn ConnectionFactory>,
        backend: Arc<B>,
    ) -> Self
    where
        B: WorkspaceFactory + ProcessorFactory + 'static,
    {
        Self::new(
            source_name,
            config,
            connections,
            backend.clone(),
            backend,
        )
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn workspaces(&self) -> &Workspaces {
        &self.workspaces
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// See [`Workspaces::get`].
    pub fn get_workspace(
        &self,
        context: &ExecutionContext,
        name: &str,
        create_if_missing: bool,
    ) -> Result<Option<Arc<dyn WorkspaceIndex>>> {
        self.check_closed()?;
        self.workspaces.get(context, name, create_if_missing)
    }

    /// Detach the index for `name`; the caller releases it.
    pub fn remove_workspace(&self, name: &str) -> Option<Arc<dyn WorkspaceIndex>> {
        self.workspaces.remove(name)
    }

    /// Drain the registry; the caller releases every returned index.
    pub fn remove_all_workspaces(&self) -> HashMap<String, Arc<dyn WorkspaceIndex>> {
        self.workspaces.remove_all()
    }

    /// Open a processor bound to the current registry.
    pub fn create_processor(
        &self,
        context: &ExecutionContext,
        observer: Option<Arc<dyn ChangeObserver>>,
        read_only: bool,
    ) -> Result<Processor> {
        self.check_closed()?;
        let session =
            self.processors
                .create_session(context, self.workspaces.clone(), read_only)?;
        Ok(Processor::new(
            self.source_name.clone(),
            context.clone(),
            read_only,
            session,
            observer,
        ))
    }

    /// Apply a batch of committed content changes through one write
    /// processor. The whole batch rolls back if any change fails.
    pub fn index_changes(&self, changes: &Changes) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut processor = self.create_processor(&changes.context, None, false)?;
        for change in &changes.requests {
            if let Err(err) = processor.apply(change.clone()) {
                processor.mark_for_rollback();
                processor.close()?;
                return Err(err);
            }
        }
        processor.close()?;
        debug!(
            "indexed {} changes from source '{}'",
            changes.len(),
            changes.source_name
        );
        Ok(())
    }

    /// Drain the registry and close every workspace index. Further processors
    /// cannot be created.
    pub fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = None;
        for (name, index) in self.remove_all_workspaces() {
            if let Err(err) = index.close() {
                warn!("closing index for workspace '{name}' failed: {err}");
                first_error.get_or_insert(err);
            }
        }
        info!("index engine for '{}' shut down", self.source_name);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_closed(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CanopyError::illegal_state(format!(
                "index engine for '{}' is shut down",
                self.source_name
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for IndexEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexEngine")
            .field("source_name", &self.source_name)
            .field("config", &self.config)
            .field("workspaces", &self.workspaces)
            .field("closed", &self.is_closed())
            .finish()
    }
}
