//! In-memory index technology.
//!
//! Each workspace keeps its committed node records keyed by path, an
//! identifier map and an inverted term index. Write sessions stage their
//! change requests and apply them on commit under the workspace's write lock,
//! after every target index has been resolved.

mod query;

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, trace};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{CanopyError, Result};
use crate::index::registry::Workspaces;
use crate::index::{IndexSession, ProcessorFactory, WorkspaceFactory, WorkspaceIndex};
use crate::model::{ChangeRequest, ExecutionContext, Location, Path, Properties, Segment};
use crate::query::{AccessQuery, FullTextSearch, QueryResults, SearchResults};
use crate::util::text::terms;

/// A node as recorded in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedNode {
    pub location: Location,
    pub properties: Properties,
}

/// Term → path → property → term frequency.
type Postings = AHashMap<String, BTreeMap<Path, AHashMap<String, u32>>>;

#[derive(Debug, Default)]
pub(crate) struct IndexState {
    nodes: BTreeMap<Path, IndexedNode>,
    ids: HashMap<Uuid, Path>,
    postings: Postings,
}

impl IndexState {
    fn resolve(&self, location: &Location) -> Path {
        location
            .id()
            .and_then(|id| self.ids.get(&id).cloned())
            .unwrap_or_else(|| location.path().clone())
    }

    fn next_sibling_index(&self, parent: &Path, name: &str) -> u32 {
        let mut index = 1;
        while self
            .nodes
            .contains_key(&parent.child(Segment::with_index(name, index)))
        {
            index += 1;
        }
        index
    }

    fn apply(&mut self, change: &ChangeRequest) {
        match change {
            ChangeRequest::CreateNode {
                parent,
                name,
                properties,
                actual,
                ..
            } => {
                let location = match actual {
                    Some(actual) => actual.clone(),
                    None => {
                        let parent = self.resolve(parent);
                        let index = self.next_sibling_index(&parent, name);
                        Location::new(parent.child(Segment::with_index(name.clone(), index)))
                    }
                };
                self.insert(location, properties.clone());
            }
            ChangeRequest::UpdateProperties {
                location,
                properties,
                replace_all,
                ..
            } => {
                let path = self.resolve(location);
                let merged = match self.nodes.get(&path) {
                    Some(existing) if !*replace_all => {
                        let mut merged = existing.properties.clone();
                        merged.extend(properties.clone());
                        merged
                    }
                    _ => properties.clone(),
                };
                let id = self
                    .nodes
                    .get(&path)
                    .and_then(|existing| existing.location.id())
                    .or(location.id());
                let location = match id {
                    Some(id) => Location::with_id(path, id),
                    None => Location::new(path),
                };
                self.insert(location, merged);
            }
            ChangeRequest::DeleteBranch { location, .. } => {
                let path = self.resolve(location);
                if path.is_root() {
                    self.clear();
                } else if self.remove_at_or_below(&path, true) {
                    self.shift_siblings(&path);
                }
            }
            ChangeRequest::DeleteChildren { location, .. } => {
                let path = self.resolve(location);
                self.remove_at_or_below(&path, false);
            }
            ChangeRequest::DestroyWorkspace { .. } => self.clear(),
        }
    }

    fn insert(&mut self, location: Location, properties: Properties) {
        let path = location.path().clone();
        self.remove_node(&path);
        for property in properties.values() {
            for value in property.values() {
                let Some(text) = value.indexable_text() else {
                    continue;
                };
                for term in terms(&text) {
                    *self
                        .postings
                        .entry(term)
                        .or_default()
                        .entry(path.clone())
                        .or_default()
                        .entry(property.name().to_string())
                        .or_insert(0) += 1;
                }
            }
        }
        if let Some(id) = location.id() {
            self.ids.insert(id, path.clone());
        }
        self.nodes.insert(path, IndexedNode { location, properties });
    }

    fn remove_node(&mut self, path: &Path) -> Option<IndexedNode> {
        let node = self.nodes.remove(path)?;
        if let Some(id) = node.location.id() {
            self.ids.remove(&id);
        }
        for property in node.properties.values() {
            for value in property.values() {
                let Some(text) = value.indexable_text() else {
                    continue;
                };
                for term in terms(&text) {
                    if let Some(paths) = self.postings.get_mut(&term) {
                        paths.remove(path);
                        if paths.is_empty() {
                            self.postings.remove(&term);
                        }
                    }
                }
            }
        }
        Some(node)
    }

    /// Remove every node below `path`, and `path` itself when `inclusive`.
    /// Returns whether anything was removed.
    fn remove_at_or_below(&mut self, path: &Path, inclusive: bool) -> bool {
        // Descendants sort directly after their ancestor.
        let doomed: Vec<Path> = self
            .subtree(path)
            .into_iter()
            .filter(|p| inclusive || p != path)
            .collect();
        for p in &doomed {
            self.remove_node(p);
        }
        !doomed.is_empty()
    }

    fn subtree(&self, path: &Path) -> Vec<Path> {
        self.nodes
            .range(path.clone()..)
            .map(|(p, _)| p)
            .take_while(|p| p.is_at_or_below(path))
            .cloned()
            .collect()
    }

    /// Close the gap a removed node leaves among its same-name siblings:
    /// `name[k]` moves to `name[k-1]` for every later sibling, subtree included.
    fn shift_siblings(&mut self, removed: &Path) {
        let (Some(parent), Some(segment)) = (removed.parent(), removed.last_segment()) else {
            return;
        };
        let depth = parent.len();
        let name = segment.name.clone();
        let mut index = segment.index + 1;
        loop {
            let from = parent.child(Segment::with_index(name.clone(), index));
            if !self.nodes.contains_key(&from) {
                break;
            }
            for path in self.subtree(&from) {
                let Some(node) = self.remove_node(&path) else {
                    continue;
                };
                let mut segments = path.segments().to_vec();
                if let Some(slot) = segments.get_mut(depth) {
                    *slot = Segment::with_index(name.clone(), index - 1);
                }
                let moved = Path::from_segments(segments);
                let location = match node.location.id() {
                    Some(id) => Location::with_id(moved, id),
                    None => Location::new(moved),
                };
                self.insert(location, node.properties);
            }
            index += 1;
        }
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.ids.clear();
        self.postings.clear();
    }
}

/// The index of one workspace.
pub struct MemoryWorkspaceIndex {
    name: String,
    state: RwLock<IndexState>,
}

impl MemoryWorkspaceIndex {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryWorkspaceIndex {
            name: name.into(),
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// Indexed paths in tree order.
    pub fn paths(&self) -> Vec<Path> {
        self.state.read().nodes.keys().cloned().collect()
    }

    pub fn node(&self, path: &Path) -> Option<IndexedNode> {
        self.state.read().nodes.get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.state.read().nodes.contains_key(path)
    }

    pub fn search(&self, request: &FullTextSearch) -> SearchResults {
        query::search(&self.state.read(), request)
    }

    pub fn query(&self, request: &AccessQuery) -> QueryResults {
        query::evaluate(&self.state.read(), request)
    }

    fn apply_all<'a>(&self, changes: impl IntoIterator<Item = &'a ChangeRequest>) {
        let mut state = self.state.write();
        for change in changes {
            state.apply(change);
        }
    }
}

impl WorkspaceIndex for MemoryWorkspaceIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn destroy(&self) -> Result<()> {
        self.state.write().clear();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for MemoryWorkspaceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryWorkspaceIndex")
            .field("name", &self.name)
            .field("nodes", &self.node_count())
            .finish()
    }
}

/// Creates [`MemoryWorkspaceIndex`]es and sessions over them.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryIndex;

impl MemoryIndex {
    pub fn new() -> Self {
        MemoryIndex
    }
}

impl WorkspaceFactory for MemoryIndex {
    fn create_workspace(&self, _source_name: &str, name: &str) -> Result<Arc<dyn WorkspaceIndex>> {
        Ok(Arc::new(MemoryWorkspaceIndex::new(name)))
    }
}

impl ProcessorFactory for MemoryIndex {
    fn create_session(
        &self,
        context: &ExecutionContext,
        workspaces: Workspaces,
        read_only: bool,
    ) -> Result<Box<dyn IndexSession>> {
        Ok(Box::new(MemorySession {
            context: context.clone(),
            workspaces,
            read_only,
            staged: Vec::new(),
        }))
    }
}

fn as_memory(index: &dyn WorkspaceIndex) -> Result<&MemoryWorkspaceIndex> {
    index
        .as_any()
        .downcast_ref::<MemoryWorkspaceIndex>()
        .ok_or_else(|| {
            CanopyError::index(format!(
                "workspace index '{}' is not an in-memory index",
                index.name()
            ))
        })
}

struct MemorySession {
    context: ExecutionContext,
    workspaces: Workspaces,
    read_only: bool,
    staged: Vec<ChangeRequest>,
}

/// One step of a commit, resolved before anything is applied.
enum Step {
    Destroy(String),
    Apply {
        workspace: String,
        run: Range<usize>,
        index: Arc<dyn WorkspaceIndex>,
        /// Built for this commit; registered when the step runs.
        install: bool,
    },
}

impl MemorySession {
    /// Split the staged changes into runs and resolve the index each run
    /// targets. Verification and index construction happen here, so a failure
    /// leaves every index untouched.
    fn plan(&self, staged: &[ChangeRequest]) -> Result<Vec<Step>> {
        let mut steps = Vec::new();
        let mut resolved: HashMap<&str, Arc<dyn WorkspaceIndex>> = HashMap::new();
        let mut destroyed: HashSet<&str> = HashSet::new();
        let mut start = 0;
        while start < staged.len() {
            let workspace = staged[start].workspace();
            // Each destroy is its own run so later changes see a fresh index.
            if let ChangeRequest::DestroyWorkspace { .. } = staged[start] {
                resolved.remove(workspace);
                destroyed.insert(workspace);
                steps.push(Step::Destroy(workspace.to_string()));
                start += 1;
                continue;
            }
            let mut end = start + 1;
            while end < staged.len()
                && staged[end].workspace() == workspace
                && !matches!(staged[end], ChangeRequest::DestroyWorkspace { .. })
            {
                end += 1;
            }

            let (index, install) = match resolved.get(workspace) {
                Some(index) => (index.clone(), false),
                None => {
                    let registered = if destroyed.contains(workspace) {
                        None
                    } else {
                        self.workspaces.existing(workspace)
                    };
                    match registered {
                        Some(index) => (index, false),
                        None => (self.workspaces.build(&self.context, workspace)?, true),
                    }
                }
            };
            as_memory(index.as_ref())?;
            resolved.insert(workspace, index.clone());
            steps.push(Step::Apply {
                workspace: workspace.to_string(),
                run: start..end,
                index,
                install,
            });
            start = end;
        }
        Ok(steps)
    }
}

impl IndexSession for MemorySession {
    fn apply(&mut self, change: &ChangeRequest) -> Result<()> {
        if self.read_only {
            return Err(CanopyError::illegal_state("session is read-only"));
        }
        self.staged.push(change.clone());
        Ok(())
    }

    fn search(&mut self, request: &FullTextSearch) -> Result<SearchResults> {
        match self.workspaces.existing(&request.workspace) {
            Some(index) => Ok(as_memory(index.as_ref())?.search(request)),
            None => Ok(SearchResults::default()),
        }
    }

    fn query(&mut self, request: &AccessQuery) -> Result<QueryResults> {
        match self.workspaces.existing(&request.workspace) {
            Some(index) => Ok(as_memory(index.as_ref())?.query(request)),
            None => Ok(QueryResults {
                columns: request.columns.clone(),
                rows: Vec::new(),
            }),
        }
    }

    fn commit(&mut self) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        let steps = self.plan(&staged)?;
        // Indexes registered by this commit, by workspace.
        let mut installed: HashMap<String, Arc<dyn WorkspaceIndex>> = HashMap::new();
        for step in steps {
            match step {
                Step::Destroy(workspace) => {
                    installed.remove(&workspace);
                    if let Some(index) = self.workspaces.remove(&workspace) {
                        index.destroy()?;
                        debug!("destroyed index for workspace '{workspace}'");
                    }
                }
                Step::Apply {
                    workspace,
                    run,
                    index,
                    install,
                } => {
                    let index = if install {
                        let live = self.workspaces.install(&workspace, index);
                        installed.insert(workspace.clone(), live.clone());
                        live
                    } else {
                        installed.get(&workspace).cloned().unwrap_or(index)
                    };
                    let changes = &staged[run];
                    as_memory(index.as_ref())?.apply_all(changes);
                    trace!("applied {} changes to workspace '{workspace}'", changes.len());
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.staged.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Property, properties};

    fn state_with(changes: &[ChangeRequest]) -> IndexState {
        let mut state = IndexState::default();
        for change in changes {
            state.apply(change);
        }
        state
    }

    fn loc(path: &str) -> Location {
        Location::parse(path).unwrap()
    }

    fn create(parent: &str, path: &str, title: &str) -> ChangeRequest {
        ChangeRequest::create_node(
            "default",
            loc(parent),
            loc(path),
            properties(vec![Property::new("title", title)]),
        )
    }

    #[test]
    fn test_create_without_actual_numbers_siblings() {
        let change = |name: &str| ChangeRequest::CreateNode {
            workspace: "default".into(),
            parent: Location::root(),
            name: name.into(),
            properties: Properties::new(),
            actual: None,
        };
        let state = state_with(&[change("n"), change("n"), change("m")]);
        let paths: Vec<String> = state.nodes.keys().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["/m", "/n", "/n[2]"]);
    }

    #[test]
    fn test_delete_branch_and_children() {
        let base = [
            create("/", "/a", "a"),
            create("/a", "/a/x", "x"),
            create("/a", "/a/y", "y"),
            create("/a/y", "/a/y/z", "z"),
            create("/", "/ab", "ab"),
        ];

        let mut state = state_with(&base);
        state.apply(&ChangeRequest::delete_children("default", loc("/a")));
        let paths: Vec<String> = state.nodes.keys().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["/a", "/ab"]);

        let mut state = state_with(&base);
        state.apply(&ChangeRequest::delete_branch("default", loc("/a/y")));
        assert_eq!(state.nodes.len(), 3);
        assert!(!state.postings.contains_key("z"));

        let mut state = state_with(&base);
        state.apply(&ChangeRequest::delete_branch("default", Location::root()));
        assert!(state.nodes.is_empty());
        assert!(state.postings.is_empty());
    }

    #[test]
    fn test_delete_renumbers_later_siblings() {
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let at = |path: &str, id: Uuid| Location::with_id(Path::parse(path).unwrap(), id);
        let mut state = state_with(&[
            ChangeRequest::create_node(
                "default",
                Location::root(),
                at("/n", ids[0]),
                properties(vec![Property::new("title", "alpha")]),
            ),
            ChangeRequest::create_node(
                "default",
                Location::root(),
                at("/n[2]", ids[1]),
                properties(vec![Property::new("title", "beta")]),
            ),
            ChangeRequest::create_node(
                "default",
                at("/n[2]", ids[1]),
                at("/n[2]/c", ids[2]),
                properties(vec![Property::new("title", "child")]),
            ),
        ]);

        state.apply(&ChangeRequest::delete_branch("default", at("/n", ids[0])));
        let paths: Vec<String> = state.nodes.keys().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["/n", "/n/c"]);
        assert_eq!(state.ids[&ids[1]], Path::parse("/n").unwrap());
        assert_eq!(state.ids[&ids[2]], Path::parse("/n/c").unwrap());
        assert!(state.postings["beta"].contains_key(&Path::parse("/n").unwrap()));

        // The next sibling lands in the freed slot without clobbering "beta".
        state.apply(&ChangeRequest::create_node(
            "default",
            Location::root(),
            at("/n[2]", ids[3]),
            properties(vec![Property::new("title", "gamma")]),
        ));
        assert_eq!(state.nodes.len(), 3);
        assert_eq!(state.ids[&ids[1]], Path::parse("/n").unwrap());
        assert_eq!(state.ids[&ids[3]], Path::parse("/n[2]").unwrap());
    }

    #[test]
    fn test_update_replaces_or_merges() {
        let mut state = state_with(&[create("/", "/a", "old title")]);
        let update = |replace_all| {
            ChangeRequest::update_properties(
                "default",
                loc("/a"),
                properties(vec![Property::new("body", "text")]),
                replace_all,
            )
        };

        state.apply(&update(false));
        assert_eq!(state.nodes[&Path::parse("/a").unwrap()].properties.len(), 2);

        state.apply(&update(true));
        let node = &state.nodes[&Path::parse("/a").unwrap()];
        assert_eq!(node.properties.len(), 1);
        assert!(!state.postings.contains_key("old"));
        assert!(state.postings.contains_key("text"));
    }

    #[test]
    fn test_identifier_resolves_moved_location() {
        let id = Uuid::new_v4();
        let mut state = IndexState::default();
        state.apply(&ChangeRequest::create_node(
            "default",
            Location::root(),
            Location::with_id(Path::parse("/a").unwrap(), id),
            Properties::new(),
        ));
        // A stale path with the right identifier still hits the node.
        state.apply(&ChangeRequest::delete_branch(
            "default",
            Location::with_id(Path::parse("/elsewhere").unwrap(), id),
        ));
        assert!(state.nodes.is_empty());
        assert!(state.ids.is_empty());
    }

    #[test]
    fn test_session_stages_until_commit() {
        let workspaces = Workspaces::new("content".into(), Arc::new(MemoryIndex::new()), None);
        let ctx = ExecutionContext::new();
        let mut session = MemoryIndex
            .create_session(&ctx, workspaces.clone(), false)
            .unwrap();

        session.apply(&create("/", "/a", "hello")).unwrap();
        assert!(workspaces.existing("default").is_none());
        session.commit().unwrap();

        let index = workspaces.existing("default").unwrap();
        assert_eq!(as_memory(index.as_ref()).unwrap().node_count(), 1);

        session.apply(&create("/", "/b", "dropped")).unwrap();
        session.rollback().unwrap();
        session.commit().unwrap();
        assert_eq!(as_memory(index.as_ref()).unwrap().node_count(), 1);
    }

    #[test]
    fn test_destroy_workspace_removes_entry() {
        let workspaces = Workspaces::new("content".into(), Arc::new(MemoryIndex::new()), None);
        let ctx = ExecutionContext::new();
        let mut session = MemoryIndex
            .create_session(&ctx, workspaces.clone(), false)
            .unwrap();
        session.apply(&create("/", "/a", "hello")).unwrap();
        session
            .apply(&ChangeRequest::DestroyWorkspace {
                workspace: "default".into(),
            })
            .unwrap();
        session.apply(&create("/", "/b", "again")).unwrap();
        session.commit().unwrap();

        let index = workspaces.existing("default").unwrap();
        let memory = as_memory(index.as_ref()).unwrap();
        assert_eq!(memory.paths(), vec![Path::parse("/b").unwrap()]);
    }

    #[test]
    fn test_failed_commit_leaves_indexes_untouched() {
        let workspaces = Workspaces::new("content".into(), Arc::new(FailingFactory), None);
        let ctx = ExecutionContext::new();
        let existing = Arc::new(MemoryWorkspaceIndex::new("default"));
        workspaces.install("default", existing.clone());

        let mut session = MemoryIndex
            .create_session(&ctx, workspaces.clone(), false)
            .unwrap();
        session.apply(&create("/", "/a", "kept out")).unwrap();
        session
            .apply(&ChangeRequest::create_node(
                "broken",
                Location::root(),
                loc("/b"),
                Properties::new(),
            ))
            .unwrap();
        assert!(session.commit().is_err());
        assert_eq!(existing.node_count(), 0);
        assert_eq!(workspaces.names(), vec!["default".to_string()]);
    }

    /// Builds indexes for every workspace except "broken".
    struct FailingFactory;

    impl WorkspaceFactory for FailingFactory {
        fn create_workspace(
            &self,
            _source_name: &str,
            name: &str,
        ) -> Result<Arc<dyn WorkspaceIndex>> {
            match name {
                "broken" => Err(CanopyError::index("cannot build index")),
                _ => Ok(Arc::new(MemoryWorkspaceIndex::new(name))),
            }
        }
    }

    #[test]
    fn test_read_only_session_rejects_changes() {
        let workspaces = Workspaces::new("content".into(), Arc::new(MemoryIndex::new()), None);
        let mut session = MemoryIndex
            .create_session(&ExecutionContext::new(), workspaces, true)
            .unwrap();
        assert!(session.apply(&create("/", "/a", "x")).is_err());
        let results = session
            .search(&FullTextSearch::new("missing", "anything"))
            .unwrap();
        assert!(results.is_empty());
    }
}
