//! Member identity map with flush snapshots.
//!
//! # Invariants
//! - At most one managed copy per member id.
//! - `snapshot` mirrors the row as of the last load or flush.
//! - Read-only entries are never reported as pending writes.

use crate::model::member::{Member, MemberId, TeamRef};
use crate::model::team::Team;
use log::debug;
use std::collections::HashMap;

#[derive(Debug)]
struct ManagedMember {
    snapshot: Member,
    current: Member,
    read_only: bool,
}

impl ManagedMember {
    fn is_dirty(&self) -> bool {
        self.current != self.snapshot
    }
}

#[derive(Debug, Default)]
pub(crate) struct PersistenceContext {
    entries: HashMap<MemberId, ManagedMember>,
}

impl PersistenceContext {
    /// Returns the managed copy for `id`.
    pub(crate) fn get(&self, id: MemberId) -> Option<Member> {
        self.entries.get(&id).map(|entry| entry.current.clone())
    }

    pub(crate) fn contains(&self, id: MemberId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Registers a freshly loaded row and returns the copy callers should see.
    ///
    /// When the id is already managed the managed copy wins, so unflushed
    /// or stale in-memory state shadows the row just read. A team the row
    /// materialized still replaces the cached copy of the same team.
    pub(crate) fn attach_loaded(&mut self, loaded: Member, read_only: bool) -> Member {
        let Some(id) = loaded.id else {
            return loaded;
        };

        match self.entries.get_mut(&id) {
            Some(entry) => {
                if let Some(TeamRef::Loaded(team)) = &loaded.team {
                    refresh_team(&mut entry.current, team);
                    refresh_team(&mut entry.snapshot, team);
                }
                entry.current.clone()
            }
            None => {
                self.entries.insert(
                    id,
                    ManagedMember {
                        snapshot: loaded.clone(),
                        current: loaded.clone(),
                        read_only,
                    },
                );
                loaded
            }
        }
    }

    /// Registers a member that was just inserted.
    pub(crate) fn attach_inserted(&mut self, member: &Member) {
        if let Some(id) = member.id {
            self.entries.insert(
                id,
                ManagedMember {
                    snapshot: member.clone(),
                    current: member.clone(),
                    read_only: false,
                },
            );
        }
    }

    /// Replaces the managed state of `member`. Returns `false` when it is not managed.
    pub(crate) fn stage(&mut self, member: &Member) -> bool {
        let Some(entry) = member.id.and_then(|id| self.entries.get_mut(&id)) else {
            return false;
        };
        entry.current = member.clone();
        true
    }

    /// Dirty entries that flush must write.
    pub(crate) fn pending_writes(&self) -> Vec<Member> {
        let mut pending: Vec<Member> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_dirty())
            .filter_map(|(id, entry)| {
                if entry.read_only {
                    debug!("event=uow_flush module=uow status=skipped reason=read_only member_id={id}");
                    return None;
                }
                Some(entry.current.clone())
            })
            .collect();
        pending.sort_by_key(|member| member.id);
        pending
    }

    pub(crate) fn mark_flushed(&mut self, id: MemberId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.snapshot = entry.current.clone();
        }
    }

    pub(crate) fn upgrade_team(&mut self, id: MemberId, team: &Team) {
        if let Some(entry) = self.entries.get_mut(&id) {
            refresh_team(&mut entry.current, team);
            refresh_team(&mut entry.snapshot, team);
        }
    }

    /// Replaces every managed copy of `team`, loaded or not.
    pub(crate) fn refresh_team(&mut self, team: &Team) {
        for entry in self.entries.values_mut() {
            refresh_team(&mut entry.current, team);
            refresh_team(&mut entry.snapshot, team);
        }
    }

    pub(crate) fn detach(&mut self, id: MemberId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Evicts everything and returns how many entries were dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let evicted = self.entries.len();
        self.entries.clear();
        evicted
    }
}

fn refresh_team(member: &mut Member, team: &Team) {
    if team.id.is_none() {
        return;
    }
    if let Some(team_ref) = member.team.as_mut() {
        if team_ref.id() == team.id {
            *team_ref = TeamRef::Loaded(team.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PersistenceContext;
    use crate::model::member::{Member, TeamRef};
    use crate::model::team::Team;

    fn persisted(id: i64, username: &str, age: i32) -> Member {
        Member {
            id: Some(id),
            username: username.to_string(),
            age,
            team: None,
        }
    }

    #[test]
    fn managed_copy_shadows_reloaded_row() {
        let mut context = PersistenceContext::default();
        context.attach_loaded(persisted(1, "memberA", 10), false);

        let reloaded = context.attach_loaded(persisted(1, "memberA", 11), false);
        assert_eq!(reloaded.age, 10);
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn staged_changes_become_pending_until_flushed() {
        let mut context = PersistenceContext::default();
        let mut member = context.attach_loaded(persisted(1, "memberA", 10), false);
        assert!(context.pending_writes().is_empty());

        member.age = 20;
        assert!(context.stage(&member));
        assert_eq!(context.pending_writes(), vec![member.clone()]);

        context.mark_flushed(1);
        assert!(context.pending_writes().is_empty());
    }

    #[test]
    fn read_only_entries_never_pend() {
        let mut context = PersistenceContext::default();
        let mut member = context.attach_loaded(persisted(2, "memberB", 10), true);
        member.age = 99;
        assert!(context.stage(&member));
        assert!(context.pending_writes().is_empty());
        assert_eq!(context.get(2).map(|m| m.age), Some(99));
    }

    #[test]
    fn stage_reports_unmanaged_members() {
        let mut context = PersistenceContext::default();
        assert!(!context.stage(&persisted(5, "ghost", 1)));
        assert!(!context.stage(&Member::new("unsaved")));
    }

    #[test]
    fn loaded_team_upgrades_lazy_reference() {
        let mut context = PersistenceContext::default();
        let mut lazy = persisted(1, "memberA", 10);
        lazy.team = Some(TeamRef::Unloaded(7));
        context.attach_loaded(lazy, false);

        let mut eager = persisted(1, "memberA", 10);
        eager.team = Some(TeamRef::Loaded(Team {
            id: Some(7),
            name: "teamA".to_string(),
        }));
        let seen = context.attach_loaded(eager, false);

        assert_eq!(seen.loaded_team().map(|t| t.name.as_str()), Some("teamA"));
        assert!(context.pending_writes().is_empty());
    }

    #[test]
    fn reloaded_team_replaces_stale_loaded_copy() {
        let mut context = PersistenceContext::default();
        let mut member = persisted(1, "memberA", 10);
        member.team = Some(TeamRef::Loaded(Team {
            id: Some(7),
            name: "teamA".to_string(),
        }));
        context.attach_loaded(member, false);

        context.refresh_team(&Team {
            id: Some(7),
            name: "teamB".to_string(),
        });
        let seen = context.get(1).unwrap();
        assert_eq!(seen.loaded_team().map(|t| t.name.as_str()), Some("teamB"));
        assert!(context.pending_writes().is_empty());

        let mut reread = persisted(1, "memberA", 10);
        reread.team = Some(TeamRef::Loaded(Team {
            id: Some(7),
            name: "teamC".to_string(),
        }));
        let seen = context.attach_loaded(reread, false);
        assert_eq!(seen.loaded_team().map(|t| t.name.as_str()), Some("teamC"));

        context.refresh_team(&Team {
            id: Some(8),
            name: "other".to_string(),
        });
        assert_eq!(context.get(1).unwrap().team_id(), Some(7));
    }

    #[test]
    fn clear_and_detach_evict() {
        let mut context = PersistenceContext::default();
        context.attach_loaded(persisted(1, "a", 1), false);
        context.attach_loaded(persisted(2, "b", 2), false);

        assert!(context.detach(1));
        assert!(!context.contains(1));
        assert_eq!(context.clear(), 1);
        assert_eq!(context.len(), 0);
    }
}
