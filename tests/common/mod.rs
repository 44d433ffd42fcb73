#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use canopy::{
    AccessQuery, Capabilities, CanopyError, ChangeObserver, ChangeRequest, Changes, Connection,
    ExecutionContext, FullTextSearch, IndexSession, Location, MemorySource, Path,
    ProcessorFactory, Property, QueryResults, Request, Response, SearchResults, Source,
    WorkspaceFactory, WorkspaceIndex, Workspaces,
};

/// Everything a [`RecordingIndex`] saw.
#[derive(Default)]
pub struct Recorder {
    pub changes: Mutex<Vec<ChangeRequest>>,
    pub sessions: AtomicUsize,
    pub read_only_sessions: AtomicUsize,
    pub workspaces_created: AtomicUsize,
    pub searches: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub fail_searches: AtomicBool,
    pub fail_applies: AtomicBool,
}

impl Recorder {
    /// The recorded changes as `"<kind> <path>"` strings.
    pub fn described(&self) -> Vec<String> {
        self.changes.lock().iter().map(describe).collect()
    }

    pub fn clear(&self) {
        self.changes.lock().clear();
    }
}

pub fn describe(change: &ChangeRequest) -> String {
    let kind = match change {
        ChangeRequest::CreateNode { .. } => "create",
        ChangeRequest::UpdateProperties { .. } => "update",
        ChangeRequest::DeleteBranch { .. } => "delete-branch",
        ChangeRequest::DeleteChildren { .. } => "delete-children",
        ChangeRequest::DestroyWorkspace { .. } => "destroy",
    };
    match change.target() {
        Some(location) => format!("{kind} {}", location.path()),
        None => format!("{kind} {}", change.workspace()),
    }
}

/// Index technology that records every call instead of indexing.
#[derive(Default)]
pub struct RecordingIndex {
    pub recorder: Arc<Recorder>,
    pub create_delay: Duration,
}

impl RecordingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_delay(delay: Duration) -> Self {
        RecordingIndex {
            create_delay: delay,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub struct RecordingWorkspace {
    name: String,
}

impl WorkspaceIndex for RecordingWorkspace {
    fn name(&self) -> &str {
        &self.name
    }

    fn destroy(&self) -> canopy::Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl WorkspaceFactory for RecordingIndex {
    fn create_workspace(
        &self,
        _source_name: &str,
        name: &str,
    ) -> canopy::Result<Arc<dyn WorkspaceIndex>> {
        std::thread::sleep(self.create_delay);
        self.recorder
            .workspaces_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingWorkspace {
            name: name.to_string(),
        }))
    }
}

impl ProcessorFactory for RecordingIndex {
    fn create_session(
        &self,
        _context: &ExecutionContext,
        _workspaces: Workspaces,
        read_only: bool,
    ) -> canopy::Result<Box<dyn IndexSession>> {
        self.recorder.sessions.fetch_add(1, Ordering::SeqCst);
        if read_only {
            self.recorder
                .read_only_sessions
                .fetch_add(1, Ordering::SeqCst);
        }
        Ok(Box::new(RecordingSession {
            recorder: self.recorder.clone(),
        }))
    }
}

struct RecordingSession {
    recorder: Arc<Recorder>,
}

impl IndexSession for RecordingSession {
    fn apply(&mut self, change: &ChangeRequest) -> canopy::Result<()> {
        if self.recorder.fail_applies.load(Ordering::SeqCst) {
            return Err(CanopyError::index("apply rejected"));
        }
        self.recorder.changes.lock().push(change.clone());
        Ok(())
    }

    fn search(&mut self, _request: &FullTextSearch) -> canopy::Result<SearchResults> {
        self.recorder.searches.fetch_add(1, Ordering::SeqCst);
        if self.recorder.fail_searches.load(Ordering::SeqCst) {
            return Err(CanopyError::index("search failed"));
        }
        Ok(SearchResults::default())
    }

    fn query(&mut self, request: &AccessQuery) -> canopy::Result<QueryResults> {
        self.recorder.searches.fetch_add(1, Ordering::SeqCst);
        Ok(QueryResults {
            columns: request.columns.clone(),
            rows: Vec::new(),
        })
    }

    fn commit(&mut self) -> canopy::Result<()> {
        self.recorder.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> canopy::Result<()> {
        self.recorder.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Wraps a [`MemorySource`], counting executions and optionally pretending
/// some paths are gone or the whole source is down.
pub struct ScriptedSource {
    pub inner: MemorySource,
    pub executions: Arc<AtomicUsize>,
    pub missing: Arc<Mutex<Vec<Path>>>,
    pub down: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(inner: MemorySource) -> Self {
        ScriptedSource {
            inner,
            executions: Arc::new(AtomicUsize::new(0)),
            missing: Arc::new(Mutex::new(Vec::new())),
            down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn hide(&self, path: &str) {
        self.missing.lock().push(Path::parse(path).unwrap());
    }
}

impl Source for ScriptedSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn connection(&self) -> canopy::Result<Box<dyn Connection>> {
        Ok(Box::new(ScriptedConnection {
            inner: self.inner.connection()?,
            executions: self.executions.clone(),
            missing: self.missing.clone(),
            down: self.down.clone(),
        }))
    }

    fn register_observer(&self, observer: Arc<dyn ChangeObserver>) {
        self.inner.register_observer(observer);
    }
}

struct ScriptedConnection {
    inner: Box<dyn Connection>,
    executions: Arc<AtomicUsize>,
    missing: Arc<Mutex<Vec<Path>>>,
    down: Arc<AtomicBool>,
}

impl Connection for ScriptedConnection {
    fn source_name(&self) -> &str {
        self.inner.source_name()
    }

    fn execute(&self, context: &ExecutionContext, request: Request) -> canopy::Result<Response> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(CanopyError::source("source is down"));
        }
        if let Request::ReadBranch(read) = &request {
            if self.missing.lock().contains(read.location.path()) {
                return Err(CanopyError::not_found(read.location.path().to_string()));
            }
        }
        self.inner.execute(context, request)
    }

    fn close(&self) -> canopy::Result<()> {
        self.inner.close()
    }
}

/// Observer that keeps every batch it receives.
#[derive(Default)]
pub struct CollectingObserver {
    pub batches: Mutex<Vec<Changes>>,
}

impl ChangeObserver for CollectingObserver {
    fn notify(&self, changes: &Changes) {
        self.batches.lock().push(changes.clone());
    }
}

pub fn path(s: &str) -> Path {
    Path::parse(s).unwrap()
}

pub fn loc(s: &str) -> Location {
    Location::parse(s).unwrap()
}

/// `/a` with children `/a/x`, `/a/y` and grandchild `/a/y/z`.
pub fn sample_source() -> MemorySource {
    let source = MemorySource::new("content", "default");
    source
        .add_node(
            "default",
            &Path::root(),
            "a",
            vec![Property::new("title", "Alpha node")],
        )
        .unwrap();
    source
        .add_node("default", &path("/a"), "x", vec![Property::new("title", "Xylophone")])
        .unwrap();
    source
        .add_node("default", &path("/a"), "y", vec![Property::new("body", "yellow alpha")])
        .unwrap();
    source
        .add_node("default", &path("/a/y"), "z", vec![Property::new("title", "Zebra")])
        .unwrap();
    source
}

/// A chain `/n0/n1/.../n{depth-1}` where every node also has a leaf `leaf`.
pub fn deep_source(depth: usize) -> MemorySource {
    let source = MemorySource::new("content", "default");
    let mut parent = Path::root();
    for level in 0..depth {
        let location = source
            .add_node("default", &parent, &format!("n{level}"), vec![])
            .unwrap();
        source
            .add_node("default", location.path(), "leaf", vec![])
            .unwrap();
        parent = location.into_path();
    }
    source
}
