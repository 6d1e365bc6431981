//! Member entity and its team reference.
//!
//! # Invariants
//! - `id` is `None` only before the first save.
//! - A `TeamRef` always names a persisted team once the member is saved.
//! - Equality of team references is by team id; loading state is ignored.

use super::team::{Team, TeamId};
use super::ValidationError;

/// Storage-assigned member identifier.
pub type MemberId = i64;

/// Association from a member to its team.
///
/// Lazy queries yield `Unloaded`; fetch-join and entity-graph style queries
/// yield `Loaded` with the team row read in the same statement.
#[derive(Debug, Clone)]
pub enum TeamRef {
    Unloaded(TeamId),
    Loaded(Team),
}

impl TeamRef {
    /// Team id, or `None` for a loaded team that was never saved.
    pub fn id(&self) -> Option<TeamId> {
        match self {
            Self::Unloaded(id) => Some(*id),
            Self::Loaded(team) => team.id,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    pub fn as_loaded(&self) -> Option<&Team> {
        match self {
            Self::Unloaded(_) => None,
            Self::Loaded(team) => Some(team),
        }
    }
}

impl PartialEq for TeamRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for TeamRef {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: Option<MemberId>,
    pub username: String,
    pub age: i32,
    pub team: Option<TeamRef>,
}

impl Member {
    /// New unsaved member with age 0 and no team.
    pub fn new(username: impl Into<String>) -> Self {
        Self::with_age(username, 0)
    }

    pub fn with_age(username: impl Into<String>, age: i32) -> Self {
        Self {
            id: None,
            username: username.into(),
            age,
            team: None,
        }
    }

    pub fn with_team(username: impl Into<String>, age: i32, team: &Team) -> Self {
        let mut member = Self::with_age(username, age);
        member.change_team(team);
        member
    }

    /// Points this member at `team`.
    pub fn change_team(&mut self, team: &Team) {
        self.team = Some(TeamRef::Loaded(team.clone()));
    }

    pub fn clear_team(&mut self) {
        self.team = None;
    }

    pub fn team_id(&self) -> Option<TeamId> {
        self.team.as_ref().and_then(TeamRef::id)
    }

    /// Team data, when it was materialized by the query that produced `self`.
    pub fn loaded_team(&self) -> Option<&Team> {
        self.team.as_ref().and_then(TeamRef::as_loaded)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.username.trim().is_empty() {
            return Err(ValidationError::BlankUsername);
        }
        if self.age < 0 {
            return Err(ValidationError::NegativeAge(self.age));
        }
        if matches!(&self.team, Some(team) if team.id().is_none()) {
            return Err(ValidationError::UnsavedTeam);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Member, TeamRef};
    use crate::model::team::Team;
    use crate::model::ValidationError;

    fn saved_team(id: i64, name: &str) -> Team {
        Team {
            id: Some(id),
            name: name.to_string(),
        }
    }

    #[test]
    fn team_refs_compare_by_id_only() {
        let loaded = TeamRef::Loaded(saved_team(3, "teamA"));
        assert_eq!(loaded, TeamRef::Unloaded(3));
        assert_ne!(loaded, TeamRef::Unloaded(4));
    }

    #[test]
    fn change_team_keeps_loaded_copy() {
        let team = saved_team(1, "teamA");
        let mut member = Member::with_age("memberA", 10);
        member.change_team(&team);

        assert_eq!(member.team_id(), Some(1));
        assert_eq!(member.loaded_team().map(|t| t.name.as_str()), Some("teamA"));

        member.clear_team();
        assert!(member.team.is_none());
    }

    #[test]
    fn validate_rejects_bad_fields() {
        assert_eq!(
            Member::with_age("  ", 1).validate(),
            Err(ValidationError::BlankUsername)
        );
        assert_eq!(
            Member::with_age("m", -1).validate(),
            Err(ValidationError::NegativeAge(-1))
        );
        assert_eq!(
            Member::with_team("m", 1, &Team::new("unsaved")).validate(),
            Err(ValidationError::UnsavedTeam)
        );
        assert!(Member::new("memberA").validate().is_ok());
    }
}
