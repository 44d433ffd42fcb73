mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use canopy::model::{PRIMARY_TYPE, ROOT_PRIMARY_TYPE};
use canopy::{
    ChangeRequest, Depth, EngineConfig, ErrorKind, ExecutionContext, FullTextSearch, IndexEngine,
    IndexedNode, Indexer, IndexerConfig, Location, MemoryIndex, MemorySource, MemoryWorkspaceIndex,
    Path, Property, Source, SourceConnections,
};

use common::{RecordingIndex, Recorder, ScriptedSource, deep_source, loc, sample_source};

struct Harness {
    engine: IndexEngine,
    connections: Arc<SourceConnections>,
    recorder: Arc<Recorder>,
}

impl Harness {
    fn recording(source: Arc<dyn Source>) -> Self {
        let connections = Arc::new(SourceConnections::new());
        connections.add(source);
        let backend = Arc::new(RecordingIndex::new());
        let recorder = backend.recorder.clone();
        let engine = IndexEngine::with_backend(
            "content",
            EngineConfig::default(),
            connections.clone(),
            backend,
        );
        Harness {
            engine,
            connections,
            recorder,
        }
    }

    fn memory(source: Arc<dyn Source>) -> Self {
        let connections = Arc::new(SourceConnections::new());
        connections.add(source);
        let engine = IndexEngine::with_backend(
            "content",
            EngineConfig::default(),
            connections.clone(),
            Arc::new(MemoryIndex::new()),
        );
        Harness {
            engine,
            connections,
            recorder: Arc::new(Recorder::default()),
        }
    }

    fn indexer(&self, max_depth_per_read: usize) -> canopy::Result<Indexer> {
        Indexer::new(
            &self.engine,
            self.connections.as_ref(),
            ExecutionContext::new(),
            IndexerConfig::default()
                .with_max_depth_per_read(max_depth_per_read)
                .with_read_threads(0),
        )
    }

    fn snapshot(&self, workspace: &str) -> Vec<IndexedNode> {
        let Some(index) = self.engine.workspaces().existing(workspace) else {
            return Vec::new();
        };
        let memory = index
            .as_any()
            .downcast_ref::<MemoryWorkspaceIndex>()
            .expect("memory index");
        memory
            .paths()
            .iter()
            .filter_map(|path| memory.node(path))
            .collect()
    }
}

#[test]
fn test_crawl_order_with_follow_up_read() -> canopy::Result<()> {
    let harness = Harness::recording(Arc::new(sample_source()));

    let mut indexer = harness.indexer(2)?;
    indexer.index("default", &loc("/a"), Depth::Unbounded)?;
    indexer.close()?;

    assert_eq!(
        harness.recorder.described(),
        vec![
            "delete-children /a",
            "update /a",
            "create /a/x",
            "create /a/y",
            "create /a/y/z",
        ]
    );
    Ok(())
}

#[test]
fn test_crawl_order_with_read_threads() -> canopy::Result<()> {
    let harness = Harness::recording(Arc::new(sample_source()));

    let mut indexer = Indexer::new(
        &harness.engine,
        harness.connections.as_ref(),
        ExecutionContext::new(),
        IndexerConfig::default()
            .with_max_depth_per_read(2)
            .with_read_threads(2),
    )?;
    indexer.index("default", &loc("/a"), Depth::Unbounded)?;
    indexer.close()?;

    assert_eq!(harness.recorder.described().len(), 5);
    assert_eq!(harness.recorder.commits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_root_reindex_clears_workspace_and_marks_root() -> canopy::Result<()> {
    let harness = Harness::recording(Arc::new(sample_source()));

    let mut indexer = harness.indexer(10)?;
    indexer.index_workspace("default")?;
    indexer.close()?;

    assert_eq!(
        harness.recorder.described(),
        vec![
            "delete-branch /",
            "update /",
            "create /a",
            "create /a/x",
            "create /a/y",
            "create /a/y/z",
        ]
    );

    let changes = harness.recorder.changes.lock();
    let ChangeRequest::UpdateProperties {
        properties,
        replace_all,
        ..
    } = &changes[1]
    else {
        panic!("expected an update of the root");
    };
    assert!(*replace_all);
    assert_eq!(
        properties[PRIMARY_TYPE].first_value().as_str(),
        Some(ROOT_PRIMARY_TYPE)
    );
    Ok(())
}

#[test]
fn test_every_node_visited_once_for_any_read_depth() -> canopy::Result<()> {
    // 6 chain nodes, each with a leaf.
    let source = Arc::new(deep_source(6));

    for max_depth_per_read in 1..=8 {
        let harness = Harness::recording(source.clone());
        let mut indexer = harness.indexer(max_depth_per_read)?;
        indexer.index_workspace("default")?;
        indexer.close()?;

        let created: Vec<String> = harness
            .recorder
            .described()
            .into_iter()
            .filter(|c| c.starts_with("create "))
            .collect();
        let unique: BTreeSet<&String> = created.iter().collect();
        assert_eq!(created.len(), 12, "max_depth_per_read = {max_depth_per_read}");
        assert_eq!(unique.len(), 12, "max_depth_per_read = {max_depth_per_read}");
    }
    Ok(())
}

#[test]
fn test_bounded_depth_stops_at_level() -> canopy::Result<()> {
    let source = Arc::new(deep_source(6));

    for max_depth_per_read in [1, 2, 5] {
        let harness = Harness::recording(source.clone());
        let mut indexer = harness.indexer(max_depth_per_read)?;
        indexer.index("default", &Location::root(), Depth::Levels(3))?;
        indexer.close()?;

        let created: BTreeSet<String> = harness
            .recorder
            .described()
            .into_iter()
            .filter(|c| c.starts_with("create "))
            .collect();
        let expected: BTreeSet<String> = [
            "create /n0",
            "create /n0/leaf",
            "create /n0/n1",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(created, expected, "max_depth_per_read = {max_depth_per_read}");
    }
    Ok(())
}

#[test]
fn test_depth_one_only_updates_properties() -> canopy::Result<()> {
    let harness = Harness::recording(Arc::new(sample_source()));

    let mut indexer = harness.indexer(10)?;
    indexer.index("default", &loc("/a"), Depth::Levels(1))?;
    indexer.close()?;

    assert_eq!(harness.recorder.described(), vec!["update /a"]);
    Ok(())
}

#[test]
fn test_missing_start_location_is_deleted() -> canopy::Result<()> {
    let harness = Harness::recording(Arc::new(sample_source()));

    let mut indexer = harness.indexer(10)?;
    indexer.index("default", &loc("/gone"), Depth::Unbounded)?;
    indexer.close()?;

    assert_eq!(harness.recorder.described(), vec!["delete-branch /gone"]);
    Ok(())
}

#[test]
fn test_node_removed_before_follow_up_read_is_deleted() -> canopy::Result<()> {
    let source = ScriptedSource::new(sample_source());
    source.hide("/a/y/z");
    let harness = Harness::recording(Arc::new(source));

    let mut indexer = harness.indexer(2)?;
    indexer.index("default", &loc("/a"), Depth::Unbounded)?;
    indexer.close()?;

    let described = harness.recorder.described();
    assert_eq!(
        described,
        vec![
            "delete-children /a",
            "update /a",
            "create /a/x",
            "create /a/y",
            "delete-branch /a/y/z",
        ]
    );
    let deletes = described
        .iter()
        .filter(|c| c.starts_with("delete-branch"))
        .count();
    assert_eq!(deletes, 1);
    Ok(())
}

#[test]
fn test_source_failure_propagates() -> canopy::Result<()> {
    let source = ScriptedSource::new(sample_source());
    source.down.store(true, Ordering::SeqCst);
    let harness = Harness::recording(Arc::new(source));

    let mut indexer = harness.indexer(10)?;
    let err = indexer.index_workspace("default").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Source);
    indexer.close()?;
    Ok(())
}

#[test]
fn test_reindex_is_idempotent() -> canopy::Result<()> {
    let harness = Harness::memory(Arc::new(sample_source()));

    for target in [Location::root(), loc("/a")] {
        let mut indexer = harness.indexer(2)?;
        indexer.index("default", &target, Depth::Unbounded)?;
        indexer.close()?;
        let first = harness.snapshot("default");

        let mut indexer = harness.indexer(2)?;
        indexer.index("default", &target, Depth::Unbounded)?;
        indexer.close()?;
        let second = harness.snapshot("default");

        assert_eq!(first, second);
    }

    let paths: Vec<String> = harness
        .snapshot("default")
        .iter()
        .map(|node| node.location.path().to_string())
        .collect();
    assert_eq!(paths, vec!["/", "/a", "/a/x", "/a/y", "/a/y/z"]);
    Ok(())
}

#[test]
fn test_index_all_workspaces_then_search() -> canopy::Result<()> {
    let source = sample_source();
    source.create_workspace("archive")?;
    source.add_node(
        "archive",
        &Path::root(),
        "old",
        vec![Property::new("title", "Alpha archive")],
    )?;
    let harness = Harness::memory(Arc::new(source));

    let mut indexer = harness.indexer(10)?;
    indexer.index_all_workspaces()?;
    indexer.close()?;

    let mut processor = harness
        .engine
        .create_processor(&ExecutionContext::new(), None, true)?;
    let default_hits = processor.search(&FullTextSearch::new("default", "alpha"))?;
    let archive_hits = processor.search(&FullTextSearch::new("archive", "alpha"))?;
    processor.close()?;

    assert_eq!(default_hits.paths(), vec!["/a", "/a/y"]);
    assert_eq!(archive_hits.paths(), vec!["/old"]);
    Ok(())
}

#[test]
fn test_changes_invisible_until_close() -> canopy::Result<()> {
    let source: Arc<MemorySource> = Arc::new(sample_source());
    let harness = Harness::memory(source);

    let mut indexer = harness.indexer(10)?;
    indexer.index_workspace("default")?;
    assert!(harness.snapshot("default").is_empty());

    indexer.close()?;
    assert_eq!(harness.snapshot("default").len(), 5);
    Ok(())
}

#[test]
fn test_commit_interval_flushes_during_crawl() -> canopy::Result<()> {
    let harness = Harness::memory(Arc::new(sample_source()));
    let mut indexer = Indexer::new(
        &harness.engine,
        harness.connections.as_ref(),
        ExecutionContext::new(),
        IndexerConfig::default()
            .with_read_threads(0)
            .with_commit_interval(4),
    )?;
    // delete-branch /, update /, create /a, create /a/x, then a flush.
    indexer.index_workspace("default")?;
    let paths: Vec<String> = harness
        .snapshot("default")
        .iter()
        .map(|node| node.location.path().to_string())
        .collect();
    assert_eq!(paths, vec!["/", "/a", "/a/x"]);

    indexer.close()?;
    assert_eq!(harness.snapshot("default").len(), 5);

    let harness = Harness::recording(Arc::new(sample_source()));
    let mut indexer = Indexer::new(
        &harness.engine,
        harness.connections.as_ref(),
        ExecutionContext::new(),
        IndexerConfig::default()
            .with_read_threads(0)
            .with_commit_interval(2),
    )?;
    indexer.index_workspace("default")?;
    assert_eq!(harness.recorder.commits.load(Ordering::SeqCst), 3);
    indexer.close()?;
    assert_eq!(harness.recorder.commits.load(Ordering::SeqCst), 4);
    Ok(())
}
