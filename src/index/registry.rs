//! Thread-safe registry of workspace indexes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Mutex, RwLock};

use crate::error::{CanopyError, Result};
use crate::index::{WorkspaceFactory, WorkspaceIndex};
use crate::model::ExecutionContext;
use crate::source::{ConnectionFactory, Request};

struct RegistryInner {
    source_name: String,
    entries: RwLock<HashMap<String, Arc<dyn WorkspaceIndex>>>,
    /// One gate per workspace name under construction.
    creating: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    factory: Arc<dyn WorkspaceFactory>,
    /// Set when workspaces must be listed by the source before creation.
    verifier: Option<Arc<dyn ConnectionFactory>>,
}

/// Handle to the workspace registry of one engine.
///
/// Clones share the same registry, so a processor holding a handle sees
/// workspaces created or removed after it was opened.
#[derive(Clone)]
pub struct Workspaces {
    inner: Arc<RegistryInner>,
}

impl Workspaces {
    pub(crate) fn new(
        source_name: String,
        factory: Arc<dyn WorkspaceFactory>,
        verifier: Option<Arc<dyn ConnectionFactory>>,
    ) -> Self {
        Workspaces {
            inner: Arc::new(RegistryInner {
                source_name,
                entries: RwLock::new(HashMap::new()),
                creating: Mutex::new(HashMap::new()),
                factory,
                verifier,
            }),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.inner.source_name
    }

    /// Return the index for `name`, creating it when missing and allowed.
    ///
    /// Returns `Ok(None)` when the workspace is missing and
    /// `create_if_missing` is false. Fails with `InvalidWorkspace` when
    /// verification is enabled and the source does not list `name`.
    pub fn get(
        &self,
        context: &ExecutionContext,
        name: &str,
        create_if_missing: bool,
    ) -> Result<Option<Arc<dyn WorkspaceIndex>>> {
        if let Some(existing) = self.inner.entries.read().get(name) {
            return Ok(Some(existing.clone()));
        }
        if !create_if_missing {
            return Ok(None);
        }

        // Verify without holding any lock; this talks to the source.
        self.verify(context, name)?;

        // Contenders for the same name queue on its gate, not on the map.
        let gate = self
            .inner
            .creating
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        let _creating = gate.lock();
        let index = match self.existing(name) {
            // Another thread created it while we were waiting.
            Some(existing) => Ok(existing),
            None => self
                .inner
                .factory
                .create_workspace(&self.inner.source_name, name)
                .map(|index| self.install(name, index)),
        };
        self.inner.creating.lock().remove(name);
        index.map(Some)
    }

    /// Verify `name` against the source and construct its index without
    /// registering it. Pair with [`install`](Self::install).
    pub(crate) fn build(
        &self,
        context: &ExecutionContext,
        name: &str,
    ) -> Result<Arc<dyn WorkspaceIndex>> {
        self.verify(context, name)?;
        self.inner
            .factory
            .create_workspace(&self.inner.source_name, name)
    }

    /// Register `index` under `name` unless an entry already exists, and
    /// return whichever index is registered afterwards.
    pub(crate) fn install(
        &self,
        name: &str,
        index: Arc<dyn WorkspaceIndex>,
    ) -> Arc<dyn WorkspaceIndex> {
        let mut entries = self.inner.entries.write();
        if let Some(existing) = entries.get(name) {
            return existing.clone();
        }
        entries.insert(name.to_string(), index.clone());
        drop(entries);
        info!(
            "created index for workspace '{name}' of source '{}'",
            self.inner.source_name
        );
        index
    }

    /// Like [`get`](Self::get) with creation allowed; never returns `None`.
    pub fn get_or_create(
        &self,
        context: &ExecutionContext,
        name: &str,
    ) -> Result<Arc<dyn WorkspaceIndex>> {
        self.get(context, name, true)?
            .ok_or_else(|| CanopyError::invalid_workspace(name.to_string()))
    }

    /// The index for `name` if it has been created.
    pub fn existing(&self, name: &str) -> Option<Arc<dyn WorkspaceIndex>> {
        self.inner.entries.read().get(name).cloned()
    }

    /// Detach the entry for `name`. The caller releases its resources.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn WorkspaceIndex>> {
        let removed = self.inner.entries.write().remove(name);
        if removed.is_some() {
            debug!("removed index for workspace '{name}'");
        }
        removed
    }

    /// Drain every entry. The caller releases their resources.
    pub fn remove_all(&self) -> HashMap<String, Arc<dyn WorkspaceIndex>> {
        std::mem::take(&mut *self.inner.entries.write())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    fn verify(&self, context: &ExecutionContext, name: &str) -> Result<()> {
        let Some(connections) = &self.inner.verifier else {
            return Ok(());
        };
        let connection = connections.create_connection(&self.inner.source_name)?;
        let listed = connection.execute(context, Request::GetWorkspaces);
        connection.close()?;
        if listed?.into_workspaces()?.iter().any(|ws| ws == name) {
            Ok(())
        } else {
            Err(CanopyError::invalid_workspace(format!(
                "source '{}' has no workspace '{name}'",
                self.inner.source_name
            )))
        }
    }
}

impl fmt::Debug for Workspaces {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspaces")
            .field("source_name", &self.inner.source_name)
            .field("names", &self.names())
            .field("verifying", &self.inner.verifier.is_some())
            .finish()
    }
}
