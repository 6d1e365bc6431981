//! Read-only query projections.

use super::member::MemberId;
use serde::{Deserialize, Serialize};

/// Member joined with its team name. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDto {
    pub id: MemberId,
    pub username: String,
    pub team_name: String,
}

impl MemberDto {
    pub fn new(id: MemberId, username: impl Into<String>, team_name: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            team_name: team_name.into(),
        }
    }
}
