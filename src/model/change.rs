//! Change requests: the unit of mutation a processor consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::context::ExecutionContext;
use crate::model::location::Location;
use crate::model::path::Segment;
use crate::model::property::Properties;

/// One mutation of a workspace tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeRequest {
    /// Create `name` under `parent`. `actual` is the resulting location once
    /// known (a source fills it in before publishing the change).
    CreateNode {
        workspace: String,
        parent: Location,
        name: String,
        properties: Properties,
        actual: Option<Location>,
    },
    /// Set properties on a node; with `replace_all` every property not in
    /// `properties` is removed.
    UpdateProperties {
        workspace: String,
        location: Location,
        properties: Properties,
        replace_all: bool,
    },
    /// Remove the node and all its descendants. On the root this clears the
    /// whole workspace.
    DeleteBranch {
        workspace: String,
        location: Location,
    },
    /// Remove all descendants and keep the node itself.
    DeleteChildren {
        workspace: String,
        location: Location,
    },
    /// The workspace was deleted upstream.
    DestroyWorkspace { workspace: String },
}

impl ChangeRequest {
    /// Create request for a node whose final location is already known.
    pub fn create_node(
        workspace: impl Into<String>,
        parent: Location,
        actual: Location,
        properties: Properties,
    ) -> Self {
        let name = actual
            .path()
            .last_segment()
            .map(|s| s.name.clone())
            .unwrap_or_default();
        ChangeRequest::CreateNode {
            workspace: workspace.into(),
            parent,
            name,
            properties,
            actual: Some(actual),
        }
    }

    pub fn update_properties(
        workspace: impl Into<String>,
        location: Location,
        properties: Properties,
        replace_all: bool,
    ) -> Self {
        ChangeRequest::UpdateProperties {
            workspace: workspace.into(),
            location,
            properties,
            replace_all,
        }
    }

    pub fn delete_branch(workspace: impl Into<String>, location: Location) -> Self {
        ChangeRequest::DeleteBranch {
            workspace: workspace.into(),
            location,
        }
    }

    pub fn delete_children(workspace: impl Into<String>, location: Location) -> Self {
        ChangeRequest::DeleteChildren {
            workspace: workspace.into(),
            location,
        }
    }

    pub fn workspace(&self) -> &str {
        match self {
            ChangeRequest::CreateNode { workspace, .. }
            | ChangeRequest::UpdateProperties { workspace, .. }
            | ChangeRequest::DeleteBranch { workspace, .. }
            | ChangeRequest::DeleteChildren { workspace, .. }
            | ChangeRequest::DestroyWorkspace { workspace } => workspace,
        }
    }

    /// The location the change is about; the new node for a create.
    pub fn target(&self) -> Option<Location> {
        match self {
            ChangeRequest::CreateNode {
                parent,
                name,
                actual,
                ..
            } => Some(
                actual
                    .clone()
                    .unwrap_or_else(|| parent.child(Segment::new(name.clone()))),
            ),
            ChangeRequest::UpdateProperties { location, .. }
            | ChangeRequest::DeleteBranch { location, .. }
            | ChangeRequest::DeleteChildren { location, .. } => Some(location.clone()),
            ChangeRequest::DestroyWorkspace { .. } => None,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, ChangeRequest::CreateNode { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            ChangeRequest::DeleteBranch { .. } | ChangeRequest::DeleteChildren { .. }
        )
    }
}

/// A batch of committed change requests, in commit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Changes {
    pub source_name: String,
    pub context: ExecutionContext,
    pub timestamp: DateTime<Utc>,
    pub requests: Vec<ChangeRequest>,
}

impl Changes {
    pub fn new(
        source_name: impl Into<String>,
        context: ExecutionContext,
        requests: Vec<ChangeRequest>,
    ) -> Self {
        Changes {
            source_name: source_name.into(),
            context,
            timestamp: Utc::now(),
            requests,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}
