//! In-memory hierarchical content source.
//!
//! Supports several workspaces, same-name siblings and stable identifiers,
//! and publishes every committed mutation to its observers. It cannot search;
//! wrap it in a [`SearchableSource`](crate::searchable::SearchableSource) for
//! that.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{CanopyError, Result};
use crate::model::{
    ChangeRequest, Changes, ExecutionContext, Location, Path, Properties, Property, Segment,
};
use crate::source::request::{BranchNode, ChildRef, NodeData, ReadBranch, Request, Response};
use crate::source::{Capabilities, ChangeObserver, Connection, Observers, Source};

#[derive(Debug, Clone)]
struct MemoryNode {
    parent: Option<Uuid>,
    name: String,
    properties: Properties,
    children: Vec<Uuid>,
}

#[derive(Debug, Clone)]
struct MemoryWorkspace {
    root: Uuid,
    nodes: HashMap<Uuid, MemoryNode>,
}

impl MemoryWorkspace {
    fn new() -> Self {
        let root = Uuid::new_v4();
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            MemoryNode {
                parent: None,
                name: String::new(),
                properties: Properties::new(),
                children: Vec::new(),
            },
        );
        MemoryWorkspace { root, nodes }
    }

    fn node(&self, id: Uuid) -> Result<&MemoryNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| CanopyError::not_found(format!("node {id}")))
    }

    fn find(&self, location: &Location) -> Result<Uuid> {
        if let Some(id) = location.id() {
            if self.nodes.contains_key(&id) {
                return Ok(id);
            }
        }
        let mut current = self.root;
        for segment in location.path().segments() {
            let node = self.node(current)?;
            current = node
                .children
                .iter()
                .copied()
                .filter(|child| self.nodes[child].name == segment.name)
                .nth(segment.index as usize - 1)
                .ok_or_else(|| CanopyError::not_found(location.path().to_string()))?;
        }
        Ok(current)
    }

    fn segment_of(&self, id: Uuid) -> Option<Segment> {
        let node = &self.nodes[&id];
        let parent = node.parent?;
        let index = self.nodes[&parent]
            .children
            .iter()
            .take_while(|sibling| **sibling != id)
            .filter(|sibling| self.nodes[*sibling].name == node.name)
            .count()
            + 1;
        Some(Segment::with_index(node.name.clone(), index as u32))
    }

    fn path_of(&self, id: Uuid) -> Path {
        let mut segments = Vec::new();
        let mut current = id;
        while let Some(segment) = self.segment_of(current) {
            segments.push(segment);
            current = self.nodes[&current].parent.unwrap_or(self.root);
        }
        segments.reverse();
        Path::from_segments(segments)
    }

    fn location_of(&self, id: Uuid) -> Location {
        Location::with_id(self.path_of(id), id)
    }

    fn read_branch(&self, start: Uuid, max_depth: usize) -> Vec<BranchNode> {
        let mut out = Vec::new();
        let mut stack = vec![(start, 0usize)];
        while let Some((id, level)) = stack.pop() {
            let node = &self.nodes[&id];
            let include_children = level + 1 < max_depth;
            out.push(BranchNode {
                location: self.location_of(id),
                properties: node.properties.clone(),
                children: node
                    .children
                    .iter()
                    .map(|child| ChildRef {
                        location: self.location_of(*child),
                        included: include_children,
                    })
                    .collect(),
            });
            if include_children {
                for child in node.children.iter().rev() {
                    stack.push((*child, level + 1));
                }
            }
        }
        out
    }

    fn remove_subtree(&mut self, id: Uuid) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
            }
        }
    }

    fn delete_children(&mut self, id: Uuid) {
        let children = self
            .nodes
            .get_mut(&id)
            .map(|node| std::mem::take(&mut node.children))
            .unwrap_or_default();
        for child in children {
            self.remove_subtree(child);
        }
    }
}

struct MemoryStore {
    name: String,
    default_workspace: String,
    workspaces: RwLock<BTreeMap<String, MemoryWorkspace>>,
    observers: Observers,
}

impl MemoryStore {
    /// Execute one request, collecting the committed changes into `changes`.
    fn execute(&self, request: Request, changes: &mut Vec<ChangeRequest>) -> Result<Response> {
        match request {
            Request::ReadNode {
                workspace,
                location,
            } => {
                let workspaces = self.workspaces.read();
                let ws = lookup(&workspaces, &workspace)?;
                let id = ws.find(&location)?;
                let node = ws.node(id)?;
                Ok(Response::Node(NodeData {
                    location: ws.location_of(id),
                    properties: node.properties.clone(),
                    children: node.children.iter().map(|c| ws.location_of(*c)).collect(),
                }))
            }
            Request::ReadBranch(ReadBranch {
                workspace,
                location,
                max_depth,
            }) => {
                if max_depth == 0 {
                    return Err(CanopyError::invalid_argument(
                        "branch reads need a depth of at least 1",
                    ));
                }
                let workspaces = self.workspaces.read();
                let ws = lookup(&workspaces, &workspace)?;
                let id = ws.find(&location)?;
                Ok(Response::Branch(ws.read_branch(id, max_depth)))
            }
            Request::GetWorkspaces => Ok(Response::Workspaces(
                self.workspaces.read().keys().cloned().collect(),
            )),
            Request::CreateWorkspace { name } => {
                let mut workspaces = self.workspaces.write();
                if workspaces.contains_key(&name) {
                    return Err(CanopyError::invalid_workspace(format!(
                        "workspace '{name}' already exists"
                    )));
                }
                workspaces.insert(name, MemoryWorkspace::new());
                Ok(Response::Done)
            }
            Request::DestroyWorkspace { name } => {
                self.apply(ChangeRequest::DestroyWorkspace { workspace: name }, changes)?;
                Ok(Response::Done)
            }
            Request::Change(change) => self.apply(change, changes).map(Response::Changed),
            Request::FullTextSearch(_) | Request::AccessQuery(_) => Err(CanopyError::unsupported(
                format!("source '{}' cannot answer searches or queries", self.name),
            )),
            Request::Composite(requests) => {
                let outcomes = requests
                    .into_iter()
                    .map(|request| self.execute(request, changes))
                    .collect();
                Ok(Response::Composite(outcomes))
            }
        }
    }

    fn apply(
        &self,
        change: ChangeRequest,
        changes: &mut Vec<ChangeRequest>,
    ) -> Result<Option<Location>> {
        let mut workspaces = self.workspaces.write();
        let (applied, affected) = match change {
            ChangeRequest::CreateNode {
                workspace,
                parent,
                name,
                properties,
                ..
            } => {
                let ws = lookup_mut(&mut workspaces, &workspace)?;
                let parent_id = ws.find(&parent)?;
                let id = Uuid::new_v4();
                ws.nodes.insert(
                    id,
                    MemoryNode {
                        parent: Some(parent_id),
                        name: name.clone(),
                        properties: properties.clone(),
                        children: Vec::new(),
                    },
                );
                if let Some(node) = ws.nodes.get_mut(&parent_id) {
                    node.children.push(id);
                }
                let actual = ws.location_of(id);
                (
                    ChangeRequest::CreateNode {
                        workspace,
                        parent: ws.location_of(parent_id),
                        name,
                        properties,
                        actual: Some(actual.clone()),
                    },
                    Some(actual),
                )
            }
            ChangeRequest::UpdateProperties {
                workspace,
                location,
                properties,
                replace_all,
            } => {
                let ws = lookup_mut(&mut workspaces, &workspace)?;
                let id = ws.find(&location)?;
                let resolved = ws.location_of(id);
                if let Some(node) = ws.nodes.get_mut(&id) {
                    if replace_all {
                        node.properties = properties.clone();
                    } else {
                        node.properties.extend(properties.clone());
                    }
                }
                (
                    ChangeRequest::update_properties(
                        workspace,
                        resolved.clone(),
                        properties,
                        replace_all,
                    ),
                    Some(resolved),
                )
            }
            ChangeRequest::DeleteBranch {
                workspace,
                location,
            } => {
                let ws = lookup_mut(&mut workspaces, &workspace)?;
                let id = ws.find(&location)?;
                let resolved = ws.location_of(id);
                if id == ws.root {
                    ws.delete_children(id);
                    if let Some(root) = ws.nodes.get_mut(&id) {
                        root.properties.clear();
                    }
                } else {
                    let parent = ws.nodes[&id].parent;
                    if let Some(parent) = parent.and_then(|p| ws.nodes.get_mut(&p)) {
                        parent.children.retain(|child| *child != id);
                    }
                    ws.remove_subtree(id);
                }
                (
                    ChangeRequest::delete_branch(workspace, resolved.clone()),
                    Some(resolved),
                )
            }
            ChangeRequest::DeleteChildren {
                workspace,
                location,
            } => {
                let ws = lookup_mut(&mut workspaces, &workspace)?;
                let id = ws.find(&location)?;
                let resolved = ws.location_of(id);
                ws.delete_children(id);
                (
                    ChangeRequest::delete_children(workspace, resolved.clone()),
                    Some(resolved),
                )
            }
            ChangeRequest::DestroyWorkspace { workspace } => {
                if workspaces.remove(&workspace).is_none() {
                    return Err(CanopyError::invalid_workspace(workspace));
                }
                (ChangeRequest::DestroyWorkspace { workspace }, None)
            }
        };
        changes.push(applied);
        Ok(affected)
    }
}

fn lookup<'a>(
    workspaces: &'a BTreeMap<String, MemoryWorkspace>,
    name: &str,
) -> Result<&'a MemoryWorkspace> {
    workspaces
        .get(name)
        .ok_or_else(|| CanopyError::invalid_workspace(name.to_string()))
}

fn lookup_mut<'a>(
    workspaces: &'a mut BTreeMap<String, MemoryWorkspace>,
    name: &str,
) -> Result<&'a mut MemoryWorkspace> {
    workspaces
        .get_mut(name)
        .ok_or_else(|| CanopyError::invalid_workspace(name.to_string()))
}

/// An in-memory content source without search capability.
#[derive(Clone)]
pub struct MemorySource {
    store: Arc<MemoryStore>,
}

impl MemorySource {
    /// Create a source with one empty workspace named `default_workspace`.
    pub fn new(name: impl Into<String>, default_workspace: impl Into<String>) -> Self {
        let default_workspace = default_workspace.into();
        let mut workspaces = BTreeMap::new();
        workspaces.insert(default_workspace.clone(), MemoryWorkspace::new());
        MemorySource {
            store: Arc::new(MemoryStore {
                name: name.into(),
                default_workspace,
                workspaces: RwLock::new(workspaces),
                observers: Observers::new(),
            }),
        }
    }

    pub fn default_workspace(&self) -> &str {
        &self.store.default_workspace
    }

    /// Execute a request outside of any connection.
    pub fn execute(&self, context: &ExecutionContext, request: Request) -> Result<Response> {
        execute_and_publish(&self.store, context, request)
    }

    pub fn create_workspace(&self, name: &str) -> Result<()> {
        self.execute(
            &ExecutionContext::new(),
            Request::CreateWorkspace {
                name: name.to_string(),
            },
        )
        .map(|_| ())
    }

    /// Add a node below `parent` and return its location.
    pub fn add_node(
        &self,
        workspace: &str,
        parent: &Path,
        name: &str,
        props: Vec<Property>,
    ) -> Result<Location> {
        let change = ChangeRequest::CreateNode {
            workspace: workspace.to_string(),
            parent: Location::new(parent.clone()),
            name: name.to_string(),
            properties: crate::model::properties(props),
            actual: None,
        };
        self.execute(&ExecutionContext::new(), Request::Change(change))?
            .into_location()
    }

    /// Number of nodes in a workspace, including its root.
    pub fn node_count(&self, workspace: &str) -> Result<usize> {
        let workspaces = self.store.workspaces.read();
        Ok(lookup(&workspaces, workspace)?.nodes.len())
    }
}

fn execute_and_publish(
    store: &MemoryStore,
    context: &ExecutionContext,
    request: Request,
) -> Result<Response> {
    let kind = request.kind();
    let mut changes = Vec::new();
    let result = store.execute(request, &mut changes);
    debug!(
        "source '{}' executed {kind} ({} changes)",
        store.name,
        changes.len()
    );
    // Publish outside of any workspace lock so observers may read back.
    if !changes.is_empty() {
        store
            .observers
            .notify(&Changes::new(store.name.clone(), context.clone(), changes));
    }
    result
}

impl Source for MemorySource {
    fn name(&self) -> &str {
        &self.store.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_searches: false,
            supports_queries: false,
            supports_updates: true,
            supports_same_name_siblings: true,
            supports_creating_workspaces: true,
        }
    }

    fn connection(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MemoryConnection {
            store: self.store.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn register_observer(&self, observer: Arc<dyn ChangeObserver>) {
        self.store.observers.register(observer);
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("name", &self.store.name)
            .field("workspaces", &self.store.workspaces.read().len())
            .finish()
    }
}

struct MemoryConnection {
    store: Arc<MemoryStore>,
    closed: AtomicBool,
}

impl Connection for MemoryConnection {
    fn source_name(&self) -> &str {
        &self.store.name
    }

    fn execute(&self, context: &ExecutionContext, request: Request) -> Result<Response> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CanopyError::illegal_state(format!(
                "connection to '{}' is closed",
                self.store.name
            )));
        }
        execute_and_publish(&self.store, context, request)
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
