use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::model::path::{Path, Segment};

/// Identifies one node: a path plus an optional stable identifier.
///
/// Two locations are equal when both carry an identifier and the identifiers
/// match, or, when either side lacks one, when their paths match. That
/// relation is not transitive, so `Location` implements neither `Eq` nor
/// `Hash`; key maps by [`Path`] or [`Uuid`] instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    path: Path,
    id: Option<Uuid>,
}

impl Location {
    pub fn new(path: Path) -> Self {
        Location { path, id: None }
    }

    pub fn with_id(path: Path, id: Uuid) -> Self {
        Location { path, id: Some(id) }
    }

    pub fn root() -> Self {
        Location::new(Path::root())
    }

    /// Convenience for `Location::new(Path::parse(path)?)`.
    pub fn parse(path: &str) -> Result<Self> {
        Ok(Location::new(Path::parse(path)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn is_root(&self) -> bool {
        self.path.is_root()
    }

    pub fn child(&self, segment: Segment) -> Location {
        Location::new(self.path.child(segment))
    }

    pub fn into_path(self) -> Path {
        self.path
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.path == other.path,
        }
    }
}

impl From<Path> for Location {
    fn from(path: Path) -> Self {
        Location::new(path)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} ({id})", self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_prefers_identifier() {
        let id = Uuid::new_v4();
        let a = Location::with_id(Path::parse("/a").unwrap(), id);
        let moved = Location::with_id(Path::parse("/b").unwrap(), id);
        assert_eq!(a, moved);

        let other = Location::with_id(Path::parse("/a").unwrap(), Uuid::new_v4());
        assert_ne!(a, other);
    }

    #[test]
    fn test_equality_falls_back_to_path() {
        let a = Location::parse("/a").unwrap();
        let with_id = Location::with_id(Path::parse("/a").unwrap(), Uuid::new_v4());
        assert_eq!(a, with_id);
        assert_ne!(a, Location::parse("/b").unwrap());
    }
}
