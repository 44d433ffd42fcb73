//! Connection strategies of the searchable decorator.
//!
//! Both strategies route the same way: searches and access queries go to one
//! read-only [`Processor`](crate::index::Processor), everything else goes to
//! the wrapped source in one call. A composite request is split into those two
//! portions, at any nesting depth, and reassembled in submission order.

use std::fmt;
use std::sync::Arc;

use log::{trace, warn};

use crate::error::{CanopyError, Result};
use crate::model::ExecutionContext;
use crate::searchable::SearchableInner;
use crate::source::{Connection, Request, Response};
use crate::util::{Task, WorkerPool};

/// Where each sub-request of a composite goes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Index,
    Delegate,
    /// A nested composite holding at least one search.
    Nested(Vec<Slot>),
}

enum Routed {
    Index(Request),
    Delegate(Request),
    Composite {
        slots: Vec<Slot>,
        searches: Vec<Request>,
        forwarded: Vec<Request>,
    },
}

fn has_search(request: &Request) -> bool {
    match request {
        Request::Composite(requests) => requests.iter().any(has_search),
        request => request.is_search(),
    }
}

/// Pull searches out of `requests` at any nesting depth. Everything else is
/// flattened into `forwarded`; nested composites without searches travel whole.
fn split(
    requests: Vec<Request>,
    searches: &mut Vec<Request>,
    forwarded: &mut Vec<Request>,
) -> Vec<Slot> {
    let mut slots = Vec::with_capacity(requests.len());
    for request in requests {
        match request {
            Request::Composite(nested) if nested.iter().any(has_search) => {
                slots.push(Slot::Nested(split(nested, searches, forwarded)));
            }
            request if request.is_search() => {
                slots.push(Slot::Index);
                searches.push(request);
            }
            request => {
                slots.push(Slot::Delegate);
                forwarded.push(request);
            }
        }
    }
    slots
}

fn route(request: Request) -> Routed {
    match request {
        Request::Composite(requests) => {
            let mut searches = Vec::new();
            let mut forwarded = Vec::new();
            let slots = split(requests, &mut searches, &mut forwarded);
            Routed::Composite {
                slots,
                searches,
                forwarded,
            }
        }
        request if request.is_search() => Routed::Index(request),
        request => Routed::Delegate(request),
    }
}

/// Answer every search with one read-only processor. Failures land in the
/// slot of the request they belong to.
fn run_searches(
    inner: &SearchableInner,
    context: &ExecutionContext,
    searches: Vec<Request>,
) -> Vec<Result<Response>> {
    if searches.is_empty() {
        return Vec::new();
    }
    let mut processor = match inner.engine.create_processor(context, None, true) {
        Ok(processor) => processor,
        Err(err) => return searches.iter().map(|_| Err(err.replicate())).collect(),
    };
    let outcomes = searches
        .into_iter()
        .map(|request| processor.process(request))
        .collect();
    if let Err(err) = processor.close() {
        warn!("closing read-only processor failed: {err}");
    }
    outcomes
}

fn run_search(
    inner: &SearchableInner,
    context: &ExecutionContext,
    request: Request,
) -> Result<Response> {
    run_searches(inner, context, vec![request])
        .pop()
        .unwrap_or_else(|| Err(CanopyError::index("search produced no outcome")))
}

/// Merge both portions back into submission order, rebuilding nesting.
fn assemble(
    slots: Vec<Slot>,
    searched: Vec<Result<Response>>,
    delegated: Vec<Result<Response>>,
) -> Response {
    let mut searched = searched.into_iter();
    let mut delegated = delegated.into_iter();
    Response::Composite(fill(slots, &mut searched, &mut delegated))
}

fn fill<S, D>(slots: Vec<Slot>, searched: &mut S, delegated: &mut D) -> Vec<Result<Response>>
where
    S: Iterator<Item = Result<Response>>,
    D: Iterator<Item = Result<Response>>,
{
    slots
        .into_iter()
        .map(|slot| {
            let next = match slot {
                Slot::Index => searched.next(),
                Slot::Delegate => delegated.next(),
                Slot::Nested(children) => {
                    return Ok(Response::Composite(fill(children, searched, delegated)));
                }
            };
            next.unwrap_or_else(|| {
                Err(CanopyError::source(
                    "composite response has fewer outcomes than requests",
                ))
            })
        })
        .collect()
}

fn delegate_composite(
    delegate: &dyn Connection,
    context: &ExecutionContext,
    forwarded: Vec<Request>,
) -> Result<Vec<Result<Response>>> {
    if forwarded.is_empty() {
        return Ok(Vec::new());
    }
    delegate
        .execute(context, Request::Composite(forwarded))?
        .into_composite()
}

/// Handles every request on the calling thread.
pub struct SyncConnection {
    inner: Arc<SearchableInner>,
    delegate: Arc<dyn Connection>,
}

impl SyncConnection {
    pub(crate) fn new(inner: Arc<SearchableInner>, delegate: Arc<dyn Connection>) -> Self {
        SyncConnection { inner, delegate }
    }
}

impl Connection for SyncConnection {
    fn source_name(&self) -> &str {
        self.inner.wrapped.name()
    }

    fn execute(&self, context: &ExecutionContext, request: Request) -> Result<Response> {
        trace!("sync connection executing {}", request.kind());
        match route(request) {
            Routed::Index(request) => run_search(&self.inner, context, request),
            Routed::Delegate(request) => self.delegate.execute(context, request),
            Routed::Composite {
                slots,
                searches,
                forwarded,
            } => {
                let searched = run_searches(&self.inner, context, searches);
                let delegated = delegate_composite(self.delegate.as_ref(), context, forwarded)?;
                Ok(assemble(slots, searched, delegated))
            }
        }
    }

    fn close(&self) -> Result<()> {
        self.delegate.close()
    }
}

impl fmt::Debug for SyncConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConnection")
            .field("source", &self.source_name())
            .finish()
    }
}

/// Sends the wrapped source's portion of each request to the worker pool and
/// answers searches on the calling thread meanwhile.
pub struct ParallelConnection {
    inner: Arc<SearchableInner>,
    delegate: Arc<dyn Connection>,
    pool: Arc<WorkerPool>,
}

impl ParallelConnection {
    pub(crate) fn new(
        inner: Arc<SearchableInner>,
        delegate: Arc<dyn Connection>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        ParallelConnection {
            inner,
            delegate,
            pool,
        }
    }

    fn submit<T, F>(&self, context: &ExecutionContext, job: F) -> Result<Task<T>>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Connection, &ExecutionContext) -> Result<T> + Send + 'static,
    {
        let delegate = self.delegate.clone();
        let context = context.clone();
        self.pool.submit(move || job(delegate.as_ref(), &context))
    }
}

impl Connection for ParallelConnection {
    fn source_name(&self) -> &str {
        self.inner.wrapped.name()
    }

    fn execute(&self, context: &ExecutionContext, request: Request) -> Result<Response> {
        trace!("parallel connection executing {}", request.kind());
        match route(request) {
            Routed::Index(request) => run_search(&self.inner, context, request),
            Routed::Delegate(request) => self
                .submit(context, move |delegate, context| {
                    delegate.execute(context, request)
                })?
                .wait(None),
            Routed::Composite {
                slots,
                searches,
                forwarded,
            } => {
                let task = self.submit(context, move |delegate, context| {
                    delegate_composite(delegate, context, forwarded)
                })?;
                let searched = run_searches(&self.inner, context, searches);
                // Both portions have finished before the outcome is reported.
                let delegated = task.wait(None)?;
                Ok(assemble(slots, searched, delegated))
            }
        }
    }

    fn close(&self) -> Result<()> {
        self.delegate.close()
    }
}

impl fmt::Debug for ParallelConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelConnection")
            .field("source", &self.source_name())
            .field("pool", &self.pool.name())
            .finish()
    }
}
