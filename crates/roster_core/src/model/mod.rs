//! Domain model for members, teams and read projections.
//!
//! # Invariants
//! - Ids are assigned by storage on first persist and never change.
//! - `Member.team` is the owning side of the member/team association.

pub mod dto;
pub mod member;
pub mod team;

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Field-level validation failures raised before any SQL runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    BlankUsername,
    NegativeAge(i32),
    BlankTeamName,
    /// A member points at a team that was never persisted.
    UnsavedTeam,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankUsername => write!(f, "member username must not be blank"),
            Self::NegativeAge(age) => write!(f, "member age must not be negative, got {age}"),
            Self::BlankTeamName => write!(f, "team name must not be blank"),
            Self::UnsavedTeam => write!(f, "member references a team without an id"),
        }
    }
}

impl Error for ValidationError {}
