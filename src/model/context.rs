use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of the caller on whose behalf a request runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    id: Uuid,
    user: Option<String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        ExecutionContext {
            id: Uuid::new_v4(),
            user: None,
        }
    }

    pub fn with_user(user: impl Into<String>) -> Self {
        ExecutionContext {
            id: Uuid::new_v4(),
            user: Some(user.into()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
