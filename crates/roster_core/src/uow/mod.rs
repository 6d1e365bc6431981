//! Explicit unit of work: one SQLite transaction plus a member persistence context.
//!
//! # Responsibility
//! - Scope repository access to a single transaction.
//! - Hold managed members, flush staged changes, commit or roll back.
//!
//! # Invariants
//! - A unit of work only begins on a fully migrated connection.
//! - `commit` flushes before committing; dropping without commit rolls back.
//! - One unit of work per connection at a time (enforced by `&mut Connection`).

mod context;

pub(crate) use context::PersistenceContext;

use crate::db::migrations::{current_version, latest_version};
use crate::model::member::MemberId;
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::member_repo::SqliteMemberRepository;
use crate::repo::team_repo::SqliteTeamRepository;
use log::{debug, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Deserialize;
use std::cell::RefCell;
use std::time::Instant;

const REQUIRED_TABLES: [&str; 2] = ["team", "member"];

/// How the underlying transaction acquires SQLite locks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeginMode {
    /// Locks are taken lazily by the first read or write.
    #[default]
    Deferred,
    /// The write lock is taken at begin.
    Immediate,
}

impl BeginMode {
    fn behavior(self) -> TransactionBehavior {
        match self {
            Self::Deferred => TransactionBehavior::Deferred,
            Self::Immediate => TransactionBehavior::Immediate,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Deferred => "deferred",
            Self::Immediate => "immediate",
        }
    }
}

pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
    context: RefCell<PersistenceContext>,
    started_at: Instant,
}

impl<'conn> UnitOfWork<'conn> {
    /// Begins a deferred unit of work.
    pub fn begin(conn: &'conn mut Connection) -> RepoResult<Self> {
        Self::begin_with(conn, BeginMode::Deferred)
    }

    pub fn begin_with(conn: &'conn mut Connection, mode: BeginMode) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        let tx = conn.transaction_with_behavior(mode.behavior())?;
        debug!("event=uow_begin module=uow status=ok mode={}", mode.as_str());
        Ok(Self {
            tx,
            context: RefCell::new(PersistenceContext::default()),
            started_at: Instant::now(),
        })
    }

    /// Member repository bound to this unit of work.
    pub fn members(&self) -> SqliteMemberRepository<'_> {
        SqliteMemberRepository::new(&self.tx, &self.context)
    }

    /// Team repository bound to this unit of work.
    pub fn teams(&self) -> SqliteTeamRepository<'_> {
        SqliteTeamRepository::new(&self.tx, &self.context)
    }

    /// Writes staged member changes. Returns the number of rows written.
    pub fn flush(&self) -> RepoResult<usize> {
        self.members().flush()
    }

    /// Evicts every managed member without writing staged changes.
    pub fn clear(&self) -> usize {
        self.context.borrow_mut().clear()
    }

    pub fn detach(&self, id: MemberId) -> bool {
        self.context.borrow_mut().detach(id)
    }

    pub fn is_managed(&self, id: MemberId) -> bool {
        self.context.borrow().contains(id)
    }

    pub fn managed_count(&self) -> usize {
        self.context.borrow().len()
    }

    pub fn commit(self) -> RepoResult<()> {
        let flushed = self.flush()?;
        let Self { tx, started_at, .. } = self;
        tx.commit()?;
        info!(
            "event=uow_commit module=uow status=ok flushed={flushed} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    pub fn rollback(self) -> RepoResult<()> {
        let Self { tx, started_at, .. } = self;
        tx.rollback()?;
        info!(
            "event=uow_rollback module=uow status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }
}

/// Runs `work` in a deferred unit of work: commit on `Ok`, roll back on `Err`.
pub fn in_unit_of_work<T, F>(conn: &mut Connection, work: F) -> RepoResult<T>
where
    F: FnOnce(&UnitOfWork<'_>) -> RepoResult<T>,
{
    in_unit_of_work_with(conn, BeginMode::Deferred, work)
}

pub fn in_unit_of_work_with<T, F>(
    conn: &mut Connection,
    mode: BeginMode,
    work: F,
) -> RepoResult<T>
where
    F: FnOnce(&UnitOfWork<'_>) -> RepoResult<T>,
{
    let uow = UnitOfWork::begin_with(conn, mode)?;
    match work(&uow) {
        Ok(value) => {
            uow.commit()?;
            Ok(value)
        }
        Err(err) => {
            warn!("event=uow_rollback module=uow status=start reason=work_failed error={err}");
            uow.rollback()?;
            Err(err)
        }
    }
}

fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }

    Ok(())
}
