//! Team repository contract and SQLite implementation.
//!
//! # Invariants
//! - Team writes go straight to SQL; teams are not tracked by the persistence context.
//! - A rename refreshes the team copies held by managed members.
//! - Member changes are flushed first, so team deletes see current `team_id` values.
//! - A team referenced by any member cannot be deleted.

use super::error::{EntityKey, RepoError, RepoResult};
use super::member_repo::{flush_members, load_members, TeamLoading};
use crate::model::member::Member;
use crate::model::team::{Team, TeamId};
use crate::uow::PersistenceContext;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::cell::RefCell;

/// Repository interface for team persistence.
pub trait TeamRepository {
    /// Inserts a new team (assigning its id) or renames a persisted one.
    fn save(&self, team: &mut Team) -> RepoResult<TeamId>;
    fn find_by_id(&self, id: TeamId) -> RepoResult<Option<Team>>;
    fn find_all(&self) -> RepoResult<Vec<Team>>;
    fn count(&self) -> RepoResult<u64>;
    /// Fails with `ConstraintViolation` while members still reference the team.
    fn delete_by_id(&self, id: TeamId) -> RepoResult<()>;
    /// Members whose `team_id` is `id`, ordered by member id.
    fn find_members(&self, id: TeamId) -> RepoResult<Vec<Member>>;
}

/// SQLite-backed team repository, scoped to one unit of work.
pub struct SqliteTeamRepository<'uow> {
    conn: &'uow Connection,
    context: &'uow RefCell<PersistenceContext>,
}

impl<'uow> SqliteTeamRepository<'uow> {
    pub(crate) fn new(conn: &'uow Connection, context: &'uow RefCell<PersistenceContext>) -> Self {
        Self { conn, context }
    }
}

impl TeamRepository for SqliteTeamRepository<'_> {
    fn save(&self, team: &mut Team) -> RepoResult<TeamId> {
        team.validate()?;

        match team.id {
            None => {
                self.conn
                    .execute("INSERT INTO team (name) VALUES (?1);", [team.name.as_str()])?;
                let id = self.conn.last_insert_rowid();
                team.id = Some(id);
                debug!("event=team_save module=repo status=inserted team_id={id}");
                Ok(id)
            }
            Some(id) => {
                let changed = self.conn.execute(
                    "UPDATE team SET name = ?1 WHERE id = ?2;",
                    params![team.name.as_str(), id],
                )?;
                if changed == 0 {
                    return Err(RepoError::NotFound(EntityKey::Team(id)));
                }
                self.context.borrow_mut().refresh_team(team);
                debug!("event=team_save module=repo status=renamed team_id={id}");
                Ok(id)
            }
        }
    }

    fn find_by_id(&self, id: TeamId) -> RepoResult<Option<Team>> {
        let team = self
            .conn
            .query_row("SELECT id, name FROM team WHERE id = ?1;", [id], parse_team_row)
            .optional()?;
        Ok(team)
    }

    fn find_all(&self) -> RepoResult<Vec<Team>> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM team ORDER BY id ASC;")?;
        let teams = stmt
            .query_map([], parse_team_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(teams)
    }

    fn count(&self) -> RepoResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM team;", [], |row| row.get(0))?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative row count {count}")))
    }

    fn delete_by_id(&self, id: TeamId) -> RepoResult<()> {
        flush_members(self.conn, self.context)?;
        let changed = self.conn.execute("DELETE FROM team WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityKey::Team(id)));
        }
        Ok(())
    }

    fn find_members(&self, id: TeamId) -> RepoResult<Vec<Member>> {
        flush_members(self.conn, self.context)?;
        let sql = format!(
            "{} WHERE m.team_id = ?1 ORDER BY m.id ASC;",
            TeamLoading::Lazy.select_sql()
        );
        load_members(
            self.conn,
            self.context,
            &sql,
            [id],
            TeamLoading::Lazy,
            false,
        )
    }
}

fn parse_team_row(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: Some(row.get(0)?),
        name: row.get(1)?,
    })
}
