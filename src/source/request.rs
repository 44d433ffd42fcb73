//! Requests a connection executes and the responses it returns.

use serde::{Deserialize, Serialize};

use crate::error::{CanopyError, Result};
use crate::model::{ChangeRequest, Location, Properties};
use crate::query::{AccessQuery, FullTextSearch, QueryResults, SearchResults};

/// A bounded read of the branch below `location`.
///
/// `max_depth` counts levels including the starting node: 1 reads only the
/// node itself, 2 the node and its children, and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadBranch {
    pub workspace: String,
    pub location: Location,
    pub max_depth: usize,
}

/// One request against a content source or a searchable decorator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    ReadNode {
        workspace: String,
        location: Location,
    },
    ReadBranch(ReadBranch),
    GetWorkspaces,
    CreateWorkspace {
        name: String,
    },
    DestroyWorkspace {
        name: String,
    },
    Change(ChangeRequest),
    FullTextSearch(FullTextSearch),
    AccessQuery(AccessQuery),
    /// Several requests submitted and completed together.
    Composite(Vec<Request>),
}

impl Request {
    pub fn read_node(workspace: impl Into<String>, location: Location) -> Self {
        Request::ReadNode {
            workspace: workspace.into(),
            location,
        }
    }

    pub fn read_branch(workspace: impl Into<String>, location: Location, max_depth: usize) -> Self {
        Request::ReadBranch(ReadBranch {
            workspace: workspace.into(),
            location,
            max_depth,
        })
    }

    /// True for the request kinds only an index can answer.
    pub fn is_search(&self) -> bool {
        matches!(self, Request::FullTextSearch(_) | Request::AccessQuery(_))
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Request::Composite(_))
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::ReadNode { .. } => "read-node",
            Request::ReadBranch(_) => "read-branch",
            Request::GetWorkspaces => "get-workspaces",
            Request::CreateWorkspace { .. } => "create-workspace",
            Request::DestroyWorkspace { .. } => "destroy-workspace",
            Request::Change(_) => "change",
            Request::FullTextSearch(_) => "full-text-search",
            Request::AccessQuery(_) => "access-query",
            Request::Composite(_) => "composite",
        }
    }
}

/// A node with its properties and its children's locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub location: Location,
    pub properties: Properties,
    pub children: Vec<Location>,
}

/// Reference to a child from a branch read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRef {
    pub location: Location,
    /// False when the child exists but lies beyond the read's depth.
    pub included: bool,
}

/// One node of a branch read result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchNode {
    pub location: Location,
    pub properties: Properties,
    pub children: Vec<ChildRef>,
}

impl BranchNode {
    pub fn unread_children(&self) -> impl Iterator<Item = &Location> {
        self.children
            .iter()
            .filter(|child| !child.included)
            .map(|child| &child.location)
    }
}

/// The outcome of executing a [`Request`].
#[derive(Debug)]
pub enum Response {
    Node(NodeData),
    /// Branch nodes in pre-order; the first node is the starting node.
    Branch(Vec<BranchNode>),
    Workspaces(Vec<String>),
    /// A change was applied; carries the affected location when there is one.
    Changed(Option<Location>),
    Done,
    Search(SearchResults),
    Query(QueryResults),
    /// One outcome per sub-request, in submission order.
    Composite(Vec<Result<Response>>),
}

impl Response {
    pub fn into_node(self) -> Result<NodeData> {
        match self {
            Response::Node(node) => Ok(node),
            other => Err(unexpected("node", &other)),
        }
    }

    pub fn into_branch(self) -> Result<Vec<BranchNode>> {
        match self {
            Response::Branch(nodes) => Ok(nodes),
            other => Err(unexpected("branch", &other)),
        }
    }

    pub fn into_workspaces(self) -> Result<Vec<String>> {
        match self {
            Response::Workspaces(names) => Ok(names),
            other => Err(unexpected("workspaces", &other)),
        }
    }

    pub fn into_search(self) -> Result<SearchResults> {
        match self {
            Response::Search(results) => Ok(results),
            other => Err(unexpected("search", &other)),
        }
    }

    pub fn into_query(self) -> Result<QueryResults> {
        match self {
            Response::Query(results) => Ok(results),
            other => Err(unexpected("query", &other)),
        }
    }

    pub fn into_composite(self) -> Result<Vec<Result<Response>>> {
        match self {
            Response::Composite(outcomes) => Ok(outcomes),
            other => Err(unexpected("composite", &other)),
        }
    }

    /// The created node's location for a create change.
    pub fn into_location(self) -> Result<Location> {
        match self {
            Response::Changed(Some(location)) => Ok(location),
            other => Err(unexpected("changed location", &other)),
        }
    }

    fn variant(&self) -> &'static str {
        match self {
            Response::Node(_) => "node",
            Response::Branch(_) => "branch",
            Response::Workspaces(_) => "workspaces",
            Response::Changed(_) => "changed",
            Response::Done => "done",
            Response::Search(_) => "search",
            Response::Query(_) => "query",
            Response::Composite(_) => "composite",
        }
    }
}

fn unexpected(expected: &str, got: &Response) -> CanopyError {
    CanopyError::source(format!(
        "expected a {expected} response but got {}",
        got.variant()
    ))
}
