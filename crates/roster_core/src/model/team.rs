//! Team entity.

use super::ValidationError;
use serde::{Deserialize, Serialize};

/// Storage-assigned team identifier.
pub type TeamId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// `None` until the team is saved.
    pub id: Option<TeamId>,
    pub name: String,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::BlankTeamName);
        }
        Ok(())
    }
}
