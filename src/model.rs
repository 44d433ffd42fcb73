//! Content tree model: paths, locations, properties and change requests.
//!
//! These are the value types exchanged between a content source, the index
//! engine and the decorator.

pub mod change;
pub mod context;
pub mod location;
pub mod path;
pub mod property;

pub use change::{ChangeRequest, Changes};
pub use context::ExecutionContext;
pub use location::Location;
pub use path::{Path, Segment};
pub use property::{Properties, Property, PropertyValue, properties};

/// Name of the property holding a node's primary type.
pub const PRIMARY_TYPE: &str = "jcr:primaryType";

/// Name of the property holding a node's stable identifier.
pub const UUID: &str = "jcr:uuid";

/// Primary type marker of the root node of every workspace.
pub const ROOT_PRIMARY_TYPE: &str = "mode:root";
