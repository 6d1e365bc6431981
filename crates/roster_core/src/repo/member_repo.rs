//! Member repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Expose every member query as an explicit, parameterized statement.
//! - Route loaded rows through the unit of work's persistence context.
//!
//! # Invariants
//! - Staged changes are flushed before every query, so SQL sees them.
//! - Single-result lookups fail with `CardinalityViolation` on two or more rows.
//! - Bulk updates clear the persistence context once they complete.
//! - Eager operations read the team in the same statement as the member.

use super::error::{EntityKey, RepoError, RepoResult};
use super::page::{assemble_page, Page, PageRequest, Sort};
use crate::model::dto::MemberDto;
use crate::model::member::{Member, MemberId, TeamRef};
use crate::model::team::Team;
use crate::uow::PersistenceContext;
use log::{debug, info, warn};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Params, Row};
use std::cell::RefCell;

const MEMBER_COLUMNS: &str = "m.id AS member_id, m.username AS username, m.age AS age, m.team_id AS team_id";

/// How a query treats the member's team association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TeamLoading {
    /// Team left as an id reference.
    Lazy,
    /// `INNER JOIN team`: members without a team are dropped.
    FetchJoin,
    /// `LEFT JOIN team`: members without a team are kept.
    EntityGraph,
}

impl TeamLoading {
    pub(crate) fn select_sql(self) -> String {
        match self {
            Self::Lazy => format!("SELECT {MEMBER_COLUMNS} FROM member m"),
            Self::FetchJoin => format!(
                "SELECT {MEMBER_COLUMNS}, t.name AS team_name
                 FROM member m
                 INNER JOIN team t ON t.id = m.team_id"
            ),
            Self::EntityGraph => format!(
                "SELECT {MEMBER_COLUMNS}, t.name AS team_name
                 FROM member m
                 LEFT JOIN team t ON t.id = m.team_id"
            ),
        }
    }
}

/// Repository interface for member persistence and queries.
pub trait MemberRepository {
    /// Inserts a new member (assigning its id) or stages changes to a persisted one.
    fn save(&self, member: &mut Member) -> RepoResult<MemberId>;
    fn save_all(&self, members: &mut [Member]) -> RepoResult<Vec<MemberId>>;
    fn find_by_id(&self, id: MemberId) -> RepoResult<Option<Member>>;
    fn exists_by_id(&self, id: MemberId) -> RepoResult<bool>;
    fn find_all_by_ids(&self, ids: &[MemberId]) -> RepoResult<Vec<Member>>;
    fn find_all_paged(&self, request: &PageRequest) -> RepoResult<Page<Member>>;
    fn count(&self) -> RepoResult<u64>;
    /// Deletes `member` if it was ever saved. A row already gone is not an error.
    fn delete(&self, member: &Member) -> RepoResult<()>;
    fn delete_by_id(&self, id: MemberId) -> RepoResult<()>;
    fn delete_all(&self) -> RepoResult<usize>;

    /// Members named `username` with age strictly greater than `min_age`.
    fn find_by_username_and_age_greater_than(
        &self,
        username: &str,
        min_age: i32,
    ) -> RepoResult<Vec<Member>>;
    fn find_by_username(&self, username: &str) -> RepoResult<Vec<Member>>;
    fn find_user(&self, username: &str, age: i32) -> RepoResult<Vec<Member>>;
    fn find_username_list(&self) -> RepoResult<Vec<String>>;
    /// Members joined to their team; members without a team are excluded.
    fn find_member_dto(&self) -> RepoResult<Vec<MemberDto>>;
    fn find_by_names<S: AsRef<str>>(&self, names: &[S]) -> RepoResult<Vec<Member>>;
    fn find_list_by_username(&self, username: &str) -> RepoResult<Vec<Member>>;
    /// `None` when nothing matches.
    fn find_member_by_username(&self, username: &str) -> RepoResult<Option<Member>>;
    /// `None` when nothing matches, `CardinalityViolation` when several do.
    fn find_optional_by_username(&self, username: &str) -> RepoResult<Option<Member>>;
    fn find_by_age(&self, age: i32, request: &PageRequest) -> RepoResult<Page<Member>>;
    /// All members via `LEFT JOIN team`, counted over `member` alone.
    fn find_member_all_count_by(&self, request: &PageRequest) -> RepoResult<Page<Member>>;
    /// Adds one to the age of every member aged `age` or more.
    ///
    /// Fails with `ConstraintViolation`, changing no rows, when an age would
    /// leave the `i32` range.
    fn bulk_age_plus(&self, age: i32) -> RepoResult<usize>;
    fn find_member_fetch_join(&self) -> RepoResult<Vec<Member>>;
    /// All members with their team materialized when present.
    fn find_all(&self) -> RepoResult<Vec<Member>>;
    fn find_all_sorted(&self, sort: &Sort) -> RepoResult<Vec<Member>>;
    fn find_member_entity_graph(&self) -> RepoResult<Vec<Member>>;
    fn find_entity_graph_by_username(&self, username: &str) -> RepoResult<Vec<Member>>;
    /// Result is never written back by flush, whatever the caller stages.
    fn find_read_only_by_username(&self, username: &str) -> RepoResult<Option<Member>>;
    /// Takes the store's write lock before reading; held until the unit of work ends.
    fn find_lock_by_username(&self, username: &str) -> RepoResult<Vec<Member>>;
}

/// SQLite-backed member repository, scoped to one unit of work.
pub struct SqliteMemberRepository<'uow> {
    conn: &'uow Connection,
    context: &'uow RefCell<PersistenceContext>,
}

impl<'uow> SqliteMemberRepository<'uow> {
    pub(crate) fn new(conn: &'uow Connection, context: &'uow RefCell<PersistenceContext>) -> Self {
        Self { conn, context }
    }

    /// Writes every dirty, non-read-only managed member.
    pub fn flush(&self) -> RepoResult<usize> {
        flush_members(self.conn, self.context)
    }

    /// Resolves a lazy team reference in place.
    ///
    /// This is the per-member secondary lookup that the eager operations avoid.
    pub fn fetch_team(&self, member: &mut Member) -> RepoResult<()> {
        let Some(TeamRef::Unloaded(team_id)) = member.team else {
            return Ok(());
        };

        let team = self
            .conn
            .query_row(
                "SELECT id, name FROM team WHERE id = ?1;",
                [team_id],
                |row| {
                    Ok(Team {
                        id: Some(row.get(0)?),
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| {
                RepoError::InvalidData(format!("member.team_id {team_id} has no team row"))
            })?;
        debug!("event=member_team_fetch module=repo status=ok team_id={team_id}");

        if let Some(member_id) = member.id {
            self.context.borrow_mut().upgrade_team(member_id, &team);
        }
        member.team = Some(TeamRef::Loaded(team));
        Ok(())
    }

    fn query<P: Params>(
        &self,
        sql: &str,
        params: P,
        loading: TeamLoading,
    ) -> RepoResult<Vec<Member>> {
        self.flush()?;
        load_members(self.conn, self.context, sql, params, loading, false)
    }

    fn load_row(&self, id: MemberId) -> RepoResult<Option<Member>> {
        let sql = format!("{} WHERE m.id = ?1;", TeamLoading::Lazy.select_sql());
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_member_row(row, TeamLoading::Lazy)?)),
            None => Ok(None),
        }
    }

    fn count_where(&self, sql: &str, params: impl Params) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(sql, params, |row| row.get(0))?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative row count {count}")))
    }
}

impl MemberRepository for SqliteMemberRepository<'_> {
    fn save(&self, member: &mut Member) -> RepoResult<MemberId> {
        member.validate()?;

        let Some(id) = member.id else {
            self.conn.execute(
                "INSERT INTO member (username, age, team_id) VALUES (?1, ?2, ?3);",
                params![member.username.as_str(), member.age, member.team_id()],
            )?;
            let id = self.conn.last_insert_rowid();
            member.id = Some(id);
            self.context.borrow_mut().attach_inserted(member);
            debug!("event=member_save module=repo status=inserted member_id={id}");
            return Ok(id);
        };

        if self.context.borrow_mut().stage(member) {
            return Ok(id);
        }

        // Detached: re-attach the persisted row, then stage the caller's state.
        let persisted = self
            .load_row(id)?
            .ok_or(RepoError::NotFound(EntityKey::Member(id)))?;
        let mut context = self.context.borrow_mut();
        context.attach_loaded(persisted, false);
        context.stage(member);
        debug!("event=member_save module=repo status=merged member_id={id}");
        Ok(id)
    }

    fn save_all(&self, members: &mut [Member]) -> RepoResult<Vec<MemberId>> {
        members.iter_mut().map(|member| self.save(member)).collect()
    }

    fn find_by_id(&self, id: MemberId) -> RepoResult<Option<Member>> {
        if let Some(managed) = self.context.borrow().get(id) {
            return Ok(Some(managed));
        }
        let sql = format!("{} WHERE m.id = ?1;", TeamLoading::Lazy.select_sql());
        let mut found = self.query(&sql, [id], TeamLoading::Lazy)?;
        Ok(found.pop())
    }

    fn exists_by_id(&self, id: MemberId) -> RepoResult<bool> {
        self.flush()?;
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM member WHERE id = ?1);",
            [id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn find_all_by_ids(&self, ids: &[MemberId]) -> RepoResult<Vec<Member>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "{} WHERE m.id IN ({}) ORDER BY m.id ASC;",
            TeamLoading::Lazy.select_sql(),
            placeholders(ids.len())
        );
        self.query(&sql, params_from_iter(ids.iter()), TeamLoading::Lazy)
    }

    fn find_all_paged(&self, request: &PageRequest) -> RepoResult<Page<Member>> {
        let sql = format!(
            "{}{}{};",
            TeamLoading::Lazy.select_sql(),
            request.sort().order_by_sql(),
            request.limit_offset_sql()
        );
        let content = self.query(&sql, [], TeamLoading::Lazy)?;
        assemble_page(content, request, || {
            self.count_where("SELECT COUNT(*) FROM member;", [])
        })
    }

    fn count(&self) -> RepoResult<u64> {
        self.flush()?;
        self.count_where("SELECT COUNT(*) FROM member;", [])
    }

    fn delete(&self, member: &Member) -> RepoResult<()> {
        let Some(id) = member.id else {
            return Ok(());
        };
        self.flush()?;
        self.conn.execute("DELETE FROM member WHERE id = ?1;", [id])?;
        self.context.borrow_mut().detach(id);
        Ok(())
    }

    fn delete_by_id(&self, id: MemberId) -> RepoResult<()> {
        self.flush()?;
        let changed = self.conn.execute("DELETE FROM member WHERE id = ?1;", [id])?;
        self.context.borrow_mut().detach(id);
        if changed == 0 {
            return Err(RepoError::NotFound(EntityKey::Member(id)));
        }
        Ok(())
    }

    fn delete_all(&self) -> RepoResult<usize> {
        self.flush()?;
        let deleted = self.conn.execute("DELETE FROM member;", [])?;
        self.context.borrow_mut().clear();
        Ok(deleted)
    }

    fn find_by_username_and_age_greater_than(
        &self,
        username: &str,
        min_age: i32,
    ) -> RepoResult<Vec<Member>> {
        let sql = format!(
            "{} WHERE m.username = ?1 AND m.age > ?2 ORDER BY m.id ASC;",
            TeamLoading::Lazy.select_sql()
        );
        self.query(&sql, params![username, min_age], TeamLoading::Lazy)
    }

    fn find_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        let sql = format!(
            "{} WHERE m.username = ?1 ORDER BY m.id ASC;",
            TeamLoading::Lazy.select_sql()
        );
        self.query(&sql, [username], TeamLoading::Lazy)
    }

    fn find_user(&self, username: &str, age: i32) -> RepoResult<Vec<Member>> {
        let sql = format!(
            "{} WHERE m.username = ?1 AND m.age = ?2 ORDER BY m.id ASC;",
            TeamLoading::Lazy.select_sql()
        );
        self.query(&sql, params![username, age], TeamLoading::Lazy)
    }

    fn find_username_list(&self) -> RepoResult<Vec<String>> {
        self.flush()?;
        let mut stmt = self
            .conn
            .prepare("SELECT m.username FROM member m ORDER BY m.id ASC;")?;
        let usernames = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(usernames)
    }

    fn find_member_dto(&self) -> RepoResult<Vec<MemberDto>> {
        self.flush()?;
        let mut stmt = self.conn.prepare(
            "SELECT m.id, m.username, t.name
             FROM member m
             INNER JOIN team t ON t.id = m.team_id
             ORDER BY m.id ASC;",
        )?;
        let dtos = stmt
            .query_map([], |row| {
                Ok(MemberDto {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    team_name: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(dtos)
    }

    fn find_by_names<S: AsRef<str>>(&self, names: &[S]) -> RepoResult<Vec<Member>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "{} WHERE m.username IN ({}) ORDER BY m.id ASC;",
            TeamLoading::Lazy.select_sql(),
            placeholders(names.len())
        );
        let names = names.iter().map(|name| name.as_ref());
        self.query(&sql, params_from_iter(names), TeamLoading::Lazy)
    }

    fn find_list_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        self.find_by_username(username)
    }

    fn find_member_by_username(&self, username: &str) -> RepoResult<Option<Member>> {
        at_most_one("find_member_by_username", self.find_by_username(username)?)
    }

    fn find_optional_by_username(&self, username: &str) -> RepoResult<Option<Member>> {
        at_most_one("find_optional_by_username", self.find_by_username(username)?)
    }

    fn find_by_age(&self, age: i32, request: &PageRequest) -> RepoResult<Page<Member>> {
        let sql = format!(
            "{} WHERE m.age = ?1{}{};",
            TeamLoading::Lazy.select_sql(),
            request.sort().order_by_sql(),
            request.limit_offset_sql()
        );
        let content = self.query(&sql, [age], TeamLoading::Lazy)?;
        assemble_page(content, request, || {
            self.count_where("SELECT COUNT(*) FROM member m WHERE m.age = ?1;", [age])
        })
    }

    fn find_member_all_count_by(&self, request: &PageRequest) -> RepoResult<Page<Member>> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS}
             FROM member m
             LEFT JOIN team t ON t.id = m.team_id{}{};",
            request.sort().order_by_sql(),
            request.limit_offset_sql()
        );
        let content = self.query(&sql, [], TeamLoading::Lazy)?;
        assemble_page(content, request, || {
            self.count_where("SELECT COUNT(m.username) FROM member m;", [])
        })
    }

    fn bulk_age_plus(&self, age: i32) -> RepoResult<usize> {
        self.flush()?;
        let updated = self
            .conn
            .execute("UPDATE member SET age = age + 1 WHERE age >= ?1;", [age])?;
        let evicted = self.context.borrow_mut().clear();
        info!(
            "event=member_bulk_update module=repo status=ok op=bulk_age_plus rows={updated} evicted={evicted}"
        );
        Ok(updated)
    }

    fn find_member_fetch_join(&self) -> RepoResult<Vec<Member>> {
        let sql = format!("{} ORDER BY m.id ASC;", TeamLoading::FetchJoin.select_sql());
        self.query(&sql, [], TeamLoading::FetchJoin)
    }

    fn find_all(&self) -> RepoResult<Vec<Member>> {
        self.find_all_sorted(&Sort::unsorted())
    }

    fn find_all_sorted(&self, sort: &Sort) -> RepoResult<Vec<Member>> {
        let sql = format!(
            "{}{};",
            TeamLoading::EntityGraph.select_sql(),
            sort.order_by_sql()
        );
        self.query(&sql, [], TeamLoading::EntityGraph)
    }

    fn find_member_entity_graph(&self) -> RepoResult<Vec<Member>> {
        self.find_all()
    }

    fn find_entity_graph_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        let sql = format!(
            "{} WHERE m.username = ?1 ORDER BY m.id ASC;",
            TeamLoading::EntityGraph.select_sql()
        );
        self.query(&sql, [username], TeamLoading::EntityGraph)
    }

    fn find_read_only_by_username(&self, username: &str) -> RepoResult<Option<Member>> {
        self.flush()?;
        let sql = format!(
            "{} WHERE m.username = ?1 ORDER BY m.id ASC;",
            TeamLoading::Lazy.select_sql()
        );
        let found = load_members(
            self.conn,
            self.context,
            &sql,
            [username],
            TeamLoading::Lazy,
            true,
        )?;
        at_most_one("find_read_only_by_username", found)
    }

    fn find_lock_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        self.flush()?;
        // SQLite has no row locks; a write statement takes the RESERVED lock,
        // which blocks other writers until this transaction ends.
        self.conn.execute(
            "UPDATE member SET username = username WHERE username = ?1;",
            [username],
        )?;
        debug!("event=member_lock module=repo status=acquired mode=pessimistic_write");

        let sql = format!(
            "{} WHERE m.username = ?1 ORDER BY m.id ASC;",
            TeamLoading::Lazy.select_sql()
        );
        load_members(
            self.conn,
            self.context,
            &sql,
            [username],
            TeamLoading::Lazy,
            false,
        )
    }
}

/// Loads member rows and attaches them to `context`.
pub(crate) fn load_members<P: Params>(
    conn: &Connection,
    context: &RefCell<PersistenceContext>,
    sql: &str,
    params: P,
    loading: TeamLoading,
    read_only: bool,
) -> RepoResult<Vec<Member>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut loaded = Vec::new();
    while let Some(row) = rows.next()? {
        loaded.push(parse_member_row(row, loading)?);
    }

    let mut context = context.borrow_mut();
    Ok(loaded
        .into_iter()
        .map(|member| context.attach_loaded(member, read_only))
        .collect())
}

pub(crate) fn flush_members(
    conn: &Connection,
    context: &RefCell<PersistenceContext>,
) -> RepoResult<usize> {
    let pending = context.borrow().pending_writes();
    if pending.is_empty() {
        return Ok(0);
    }

    for member in &pending {
        let Some(id) = member.id else {
            continue;
        };
        let changed = conn.execute(
            "UPDATE member SET username = ?1, age = ?2, team_id = ?3 WHERE id = ?4;",
            params![member.username.as_str(), member.age, member.team_id(), id],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityKey::Member(id)));
        }
        context.borrow_mut().mark_flushed(id);
    }

    debug!("event=uow_flush module=uow status=ok rows={}", pending.len());
    Ok(pending.len())
}

fn at_most_one(operation: &'static str, mut found: Vec<Member>) -> RepoResult<Option<Member>> {
    match found.len() {
        0 | 1 => Ok(found.pop()),
        count => {
            warn!("event=member_query module=repo status=error op={operation} error_code=cardinality_violation rows={count}");
            Err(RepoError::CardinalityViolation {
                operation,
                found: count,
            })
        }
    }
}

fn parse_member_row(row: &Row<'_>, loading: TeamLoading) -> RepoResult<Member> {
    let id: MemberId = row.get("member_id")?;
    let team_id: Option<i64> = row.get("team_id")?;

    let team = match (team_id, loading) {
        (None, _) => None,
        (Some(team_id), TeamLoading::Lazy) => Some(TeamRef::Unloaded(team_id)),
        (Some(team_id), TeamLoading::FetchJoin | TeamLoading::EntityGraph) => {
            let name: Option<String> = row.get("team_name")?;
            let name = name.ok_or_else(|| {
                RepoError::InvalidData(format!(
                    "member {id} references team {team_id} with no team row"
                ))
            })?;
            Some(TeamRef::Loaded(Team {
                id: Some(team_id),
                name,
            }))
        }
    };

    Ok(Member {
        id: Some(id),
        username: row.get("username")?,
        age: row.get("age")?,
        team,
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
