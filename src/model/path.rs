//! Hierarchical paths.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CanopyError, Result};

/// One path segment: a name plus its 1-based same-name-sibling index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub index: u32,
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_index(name, 1)
    }

    pub fn with_index(name: impl Into<String>, index: u32) -> Self {
        Segment {
            name: name.into(),
            index: index.max(1),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index > 1 {
            write!(f, "{}[{}]", self.name, self.index)
        } else {
            f.write_str(&self.name)
        }
    }
}

impl FromStr for Segment {
    type Err = CanopyError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(CanopyError::invalid_argument("empty path segment"));
        }
        match s.strip_suffix(']').and_then(|rest| rest.split_once('[')) {
            Some((name, index)) => {
                if name.is_empty() {
                    return Err(CanopyError::invalid_argument(format!(
                        "segment '{s}' has no name"
                    )));
                }
                let index: u32 = index.parse().map_err(|_| {
                    CanopyError::invalid_argument(format!("bad sibling index in segment '{s}'"))
                })?;
                if index == 0 {
                    return Err(CanopyError::invalid_argument(format!(
                        "sibling index in segment '{s}' must be at least 1"
                    )));
                }
                Ok(Segment::with_index(name, index))
            }
            None => Ok(Segment::new(s)),
        }
    }
}

/// An absolute path in a workspace tree. The root is the empty sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    pub fn root() -> Self {
        Path::default()
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Path { segments }
    }

    /// Parse an absolute path such as `/a/b[2]/c`.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments; the root has length 0.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn last_segment(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        Some(Path {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn child(&self, segment: Segment) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Path { segments }
    }

    /// True if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        self.len() < other.len() && other.segments.starts_with(&self.segments)
    }

    /// True if `self` is a strict descendant of `other`.
    pub fn is_descendant_of(&self, other: &Path) -> bool {
        other.is_ancestor_of(self)
    }

    /// True if `self` equals `other` or lies below it.
    pub fn is_at_or_below(&self, other: &Path) -> bool {
        self.segments.starts_with(&other.segments)
    }

    /// Number of levels `self` lies below `ancestor`, if it is at or below it.
    pub fn relative_depth(&self, ancestor: &Path) -> Option<usize> {
        self.is_at_or_below(ancestor)
            .then(|| self.len() - ancestor.len())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = CanopyError;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s.strip_prefix('/').ok_or_else(|| {
            CanopyError::invalid_argument(format!("path '{s}' is not absolute"))
        })?;
        if rest.is_empty() {
            return Ok(Path::root());
        }
        let segments = rest
            .split('/')
            .map(Segment::from_str)
            .collect::<Result<Vec<_>>>()?;
        Ok(Path { segments })
    }
}
