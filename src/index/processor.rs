//! Single-use processors with commit/rollback semantics.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::error::{CanopyError, Result};
use crate::index::IndexSession;
use crate::model::{ChangeRequest, Changes, ExecutionContext};
use crate::query::{AccessQuery, FullTextSearch, QueryResults, SearchResults};
use crate::source::{ChangeObserver, Request, Response};

/// Lifecycle state of a [`Processor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Open,
    Committed,
    RolledBack,
}

/// A unit of index work: accumulates change requests and/or answers searches
/// and queries, then is closed exactly once.
///
/// `close` consumes the processor, so closing twice cannot be expressed. A
/// processor dropped while still open is rolled back.
///
/// Closing runs, in order: commit (or rollback, when marked), publication of
/// the committed changes to the observer, release of the session.
pub struct Processor {
    source_name: String,
    context: ExecutionContext,
    read_only: bool,
    session: Box<dyn IndexSession>,
    observer: Option<Arc<dyn ChangeObserver>>,
    rollback_only: bool,
    /// Only recorded when there is an observer to publish to.
    changes: Vec<ChangeRequest>,
    applied: usize,
    state: ProcessorState,
}

impl Processor {
    pub(crate) fn new(
        source_name: String,
        context: ExecutionContext,
        read_only: bool,
        session: Box<dyn IndexSession>,
        observer: Option<Arc<dyn ChangeObserver>>,
    ) -> Self {
        Processor {
            source_name,
            context,
            read_only,
            session,
            observer,
            rollback_only: false,
            changes: Vec::new(),
            applied: 0,
            state: ProcessorState::Open,
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn is_marked_for_rollback(&self) -> bool {
        self.rollback_only
    }

    /// Number of change requests applied so far.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Force `close` to roll back regardless of what has been applied.
    pub fn mark_for_rollback(&mut self) {
        self.rollback_only = true;
    }

    /// Apply one change request. Requests are applied in submission order.
    pub fn apply(&mut self, change: ChangeRequest) -> Result<()> {
        if self.read_only {
            return Err(CanopyError::illegal_state(
                "read-only processor cannot apply changes",
            ));
        }
        self.session.apply(&change)?;
        self.applied += 1;
        if self.observer.is_some() {
            self.changes.push(change);
        }
        Ok(())
    }

    /// Commit what has been applied so far and keep the processor open.
    ///
    /// Flushed changes are visible to searches and survive a later rollback,
    /// which only discards what was applied after the last flush. A processor
    /// marked for rollback never commits, so flushing it does nothing.
    pub fn flush(&mut self) -> Result<()> {
        if self.read_only || self.rollback_only {
            return Ok(());
        }
        if let Err(err) = self.session.commit() {
            self.rollback_only = true;
            return Err(err);
        }
        debug!(
            "flushed processor for '{}' after {} changes",
            self.source_name, self.applied
        );
        Ok(())
    }

    pub fn search(&mut self, request: &FullTextSearch) -> Result<SearchResults> {
        self.session.search(request)
    }

    pub fn query(&mut self, request: &AccessQuery) -> Result<QueryResults> {
        self.session.query(request)
    }

    /// Handle one request. Composite requests record each sub-request's
    /// outcome separately.
    pub fn process(&mut self, request: Request) -> Result<Response> {
        match request {
            Request::Change(change) => {
                let target = change.target();
                self.apply(change)?;
                Ok(Response::Changed(target))
            }
            Request::FullTextSearch(search) => self.search(&search).map(Response::Search),
            Request::AccessQuery(query) => self.query(&query).map(Response::Query),
            Request::Composite(requests) => Ok(Response::Composite(
                requests.into_iter().map(|r| self.process(r)).collect(),
            )),
            other => Err(CanopyError::unsupported(format!(
                "processors cannot handle {} requests",
                other.kind()
            ))),
        }
    }

    /// Commit (or roll back, when marked), publish the committed changes and
    /// release the session.
    pub fn close(mut self) -> Result<ProcessorState> {
        let outcome = if self.rollback_only {
            self.session.rollback().map(|_| ProcessorState::RolledBack)
        } else {
            match self.session.commit() {
                Ok(()) => Ok(ProcessorState::Committed),
                Err(err) => {
                    if let Err(rollback_err) = self.session.rollback() {
                        warn!("rollback after failed commit also failed: {rollback_err}");
                    }
                    Err(err)
                }
            }
        };
        self.state = match outcome {
            Ok(state) => state,
            Err(_) => ProcessorState::RolledBack,
        };

        let changes = std::mem::take(&mut self.changes);
        if self.state == ProcessorState::Committed && !changes.is_empty() {
            if let Some(observer) = &self.observer {
                observer.notify(&Changes::new(
                    self.source_name.clone(),
                    self.context.clone(),
                    changes,
                ));
            }
        }

        self.session.release();
        debug!(
            "closed processor for '{}' as {:?} after {} changes",
            self.source_name, self.state, self.applied
        );
        outcome
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        if self.state != ProcessorState::Open {
            return;
        }
        warn!(
            "processor for '{}' dropped without close; rolling back {} changes",
            self.source_name, self.applied
        );
        if let Err(err) = self.session.rollback() {
            warn!("rollback of dropped processor failed: {err}");
        }
        self.session.release();
        self.state = ProcessorState::RolledBack;
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("source_name", &self.source_name)
            .field("read_only", &self.read_only)
            .field("state", &self.state)
            .field("rollback_only", &self.rollback_only)
            .field("applied", &self.applied)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Calls {
        log: Mutex<Vec<&'static str>>,
    }

    struct ScriptedSession {
        calls: Arc<Calls>,
        fail_commit: bool,
    }

    impl IndexSession for ScriptedSession {
        fn apply(&mut self, _change: &ChangeRequest) -> Result<()> {
            self.calls.log.lock().push("apply");
            Ok(())
        }

        fn search(&mut self, _request: &FullTextSearch) -> Result<SearchResults> {
            self.calls.log.lock().push("search");
            Ok(SearchResults::default())
        }

        fn query(&mut self, _request: &AccessQuery) -> Result<QueryResults> {
            self.calls.log.lock().push("query");
            Ok(QueryResults::default())
        }

        fn commit(&mut self) -> Result<()> {
            self.calls.log.lock().push("commit");
            if self.fail_commit {
                Err(CanopyError::index("disk full"))
            } else {
                Ok(())
            }
        }

        fn rollback(&mut self) -> Result<()> {
            self.calls.log.lock().push("rollback");
            Ok(())
        }

        fn release(&mut self) {
            self.calls.log.lock().push("release");
        }
    }

    struct ObserverCalls(Arc<Calls>);

    impl ChangeObserver for ObserverCalls {
        fn notify(&self, _changes: &Changes) {
            self.0.log.lock().push("notify");
        }
    }

    fn processor(read_only: bool, fail_commit: bool) -> (Processor, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let session = ScriptedSession {
            calls: calls.clone(),
            fail_commit,
        };
        let processor = Processor::new(
            "content".to_string(),
            ExecutionContext::new(),
            read_only,
            Box::new(session),
            Some(Arc::new(ObserverCalls(calls.clone()))),
        );
        (processor, calls)
    }

    fn change() -> ChangeRequest {
        ChangeRequest::delete_branch("default", crate::model::Location::parse("/a").unwrap())
    }

    #[test]
    fn test_commit_then_notify_then_release() {
        let (mut processor, calls) = processor(false, false);
        processor.apply(change()).unwrap();
        assert_eq!(processor.close().unwrap(), ProcessorState::Committed);
        assert_eq!(
            *calls.log.lock(),
            vec!["apply", "commit", "notify", "release"]
        );
    }

    #[test]
    fn test_marked_processor_rolls_back_and_never_commits() {
        let (mut processor, calls) = processor(false, false);
        processor.apply(change()).unwrap();
        processor.apply(change()).unwrap();
        processor.mark_for_rollback();
        assert_eq!(processor.close().unwrap(), ProcessorState::RolledBack);

        let log = calls.log.lock();
        assert!(!log.contains(&"commit"));
        assert!(!log.contains(&"notify"));
        assert_eq!(*log, vec!["apply", "apply", "rollback", "release"]);
    }

    #[test]
    fn test_flush_commits_and_stays_open() {
        let (mut processor, calls) = processor(false, false);
        processor.apply(change()).unwrap();
        processor.flush().unwrap();
        processor.apply(change()).unwrap();
        assert_eq!(processor.state(), ProcessorState::Open);
        assert_eq!(processor.close().unwrap(), ProcessorState::Committed);
        assert_eq!(
            *calls.log.lock(),
            vec!["apply", "commit", "apply", "commit", "notify", "release"]
        );
    }

    #[test]
    fn test_flush_of_marked_processor_never_commits() {
        let (mut processor, calls) = processor(false, false);
        processor.apply(change()).unwrap();
        processor.mark_for_rollback();
        processor.flush().unwrap();
        processor.close().unwrap();
        assert!(!calls.log.lock().contains(&"commit"));
    }

    #[test]
    fn test_failed_commit_rolls_back_and_reports() {
        let (mut processor, calls) = processor(false, true);
        processor.apply(change()).unwrap();
        let err = processor.close().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Index);
        assert_eq!(
            *calls.log.lock(),
            vec!["apply", "commit", "rollback", "release"]
        );
    }

    #[test]
    fn test_read_only_rejects_changes() {
        let (mut processor, _calls) = processor(true, false);
        let err = processor.apply(change()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IllegalState);
        processor
            .search(&FullTextSearch::new("default", "hello"))
            .unwrap();
        processor.close().unwrap();
    }

    #[test]
    fn test_dropped_processor_rolls_back() {
        let (mut processor, calls) = processor(false, false);
        processor.apply(change()).unwrap();
        drop(processor);
        assert_eq!(*calls.log.lock(), vec!["apply", "rollback", "release"]);
    }

    #[test]
    fn test_composite_records_each_outcome() {
        let (mut processor, _calls) = processor(true, false);
        let response = processor
            .process(Request::Composite(vec![
                Request::FullTextSearch(FullTextSearch::new("default", "hello")),
                Request::Change(change()),
                Request::GetWorkspaces,
            ]))
            .unwrap();
        let outcomes = response.into_composite().unwrap();
        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].is_err());
        assert!(outcomes[2].is_err());
        processor.close().unwrap();
    }
}
