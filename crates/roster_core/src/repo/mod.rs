//! Repository layer: data access contracts and SQLite implementations.
//!
//! # Responsibility
//! - Define member/team access contracts independent of SQL.
//! - Keep every statement inside the persistence boundary.
//!
//! # Invariants
//! - Writes validate the model before any SQL runs.
//! - Repositories are only reachable through a `UnitOfWork`.

pub mod error;
pub mod member_repo;
pub mod page;
pub mod team_repo;
