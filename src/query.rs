//! Search and query request/result types.
//!
//! Two request kinds are served exclusively by the index engine:
//!
//! - [`FullTextSearch`]: free-text terms, optionally restricted to one property.
//! - [`AccessQuery`]: a pre-planned constraint tree with selected columns.
//!
//! Parsing a query language into an [`AccessQuery`] is left to the caller.

use serde::{Deserialize, Serialize};

use crate::model::{Location, Path, PropertyValue};

/// A full-text search against one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullTextSearch {
    pub workspace: String,
    /// Free text; every term must match.
    pub expression: String,
    /// Restrict matching to this property.
    pub property: Option<String>,
    /// Maximum number of hits to return.
    pub limit: usize,
    /// Number of hits to skip before returning (for pagination).
    pub offset: usize,
}

impl FullTextSearch {
    pub fn new(workspace: impl Into<String>, expression: impl Into<String>) -> Self {
        FullTextSearch {
            workspace: workspace.into(),
            expression: expression.into(),
            property: None,
            limit: 10,
            offset: 0,
        }
    }

    pub fn property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// One full-text hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub location: Location,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    /// Number of matching nodes before paging.
    pub total: usize,
}

impl SearchResults {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.hits
            .iter()
            .map(|hit| hit.location.path().to_string())
            .collect()
    }
}

/// A constraint in a pre-planned access query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    /// Some value of the property equals `value`.
    PropertyEquals { name: String, value: PropertyValue },
    PropertyExists { name: String },
    /// The node's own name (last path segment) equals `name`.
    NodeName { name: String },
    /// Direct child of `parent`.
    ChildOf { parent: Path },
    /// Strictly below `ancestor`.
    DescendantOf { ancestor: Path },
    /// Matches a full-text expression over all properties.
    FullText { expression: String },
    And(Box<Constraint>, Box<Constraint>),
    Or(Box<Constraint>, Box<Constraint>),
    Not(Box<Constraint>),
}

impl Constraint {
    pub fn property_equals(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Constraint::PropertyEquals {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn and(self, other: Constraint) -> Self {
        Constraint::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Constraint) -> Self {
        Constraint::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Constraint::Not(Box::new(self))
    }
}

/// A structured query that has already been planned by an upstream layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessQuery {
    pub workspace: String,
    /// `None` selects every node.
    pub constraint: Option<Constraint>,
    /// Property names returned for each row.
    pub columns: Vec<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl AccessQuery {
    pub fn new(workspace: impl Into<String>) -> Self {
        AccessQuery {
            workspace: workspace.into(),
            constraint: None,
            columns: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(name.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// One result row: the node plus the value of each selected column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRow {
    pub location: Location,
    /// Same order as [`QueryResults::columns`]; `None` when the node lacks it.
    pub values: Vec<Option<PropertyValue>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResults {
    pub columns: Vec<String>,
    pub rows: Vec<QueryRow>,
}

impl QueryResults {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|row| row.location.path().to_string())
            .collect()
    }
}
