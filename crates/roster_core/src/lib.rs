//! Member/team persistence core for roster.
//! Every query is an explicit SQLite statement behind a repository trait,
//! scoped to an explicit unit of work.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod uow;

pub use config::{ConfigError, DatabaseConfig, LoggingConfig, StoreConfig};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::dto::MemberDto;
pub use model::member::{Member, MemberId, TeamRef};
pub use model::team::{Team, TeamId};
pub use model::ValidationError;
pub use repo::error::{EntityKey, RepoError, RepoResult};
pub use repo::member_repo::{MemberRepository, SqliteMemberRepository};
pub use repo::page::{Direction, MemberProperty, Page, PageRequest, PageRequestError, Sort};
pub use repo::team_repo::{SqliteTeamRepository, TeamRepository};
pub use uow::{in_unit_of_work, in_unit_of_work_with, BeginMode, UnitOfWork};

/// Liveness check used by `roster_cli` to confirm the library links.
pub fn ping() -> &'static str {
    "pong"
}

/// Version of `roster_core`, as printed by `roster_cli`.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
