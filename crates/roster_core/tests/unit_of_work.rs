use roster_core::db::{open_db_in_memory, open_with_config};
use roster_core::{
    in_unit_of_work, BeginMode, DatabaseConfig, EntityKey, Member, MemberRepository, RepoError,
    UnitOfWork,
};
use rusqlite::Connection;

/// member1(10), member2(19), member3(20), member4(21), member5(40).
fn seed(conn: &mut Connection) {
    let uow = UnitOfWork::begin(conn).unwrap();
    let members = uow.members();
    for (username, age) in [
        ("member1", 10),
        ("member2", 19),
        ("member3", 20),
        ("member4", 21),
        ("member5", 40),
    ] {
        members.save(&mut Member::with_age(username, age)).unwrap();
    }
    uow.commit().unwrap();
}

fn age_of(conn: &mut Connection, username: &str) -> i32 {
    let uow = UnitOfWork::begin(conn).unwrap();
    let member = uow
        .members()
        .find_member_by_username(username)
        .unwrap()
        .expect("member should exist");
    member.age
}

#[test]
fn bulk_age_plus_counts_rows_and_invalidates_managed_copies() {
    let mut conn = open_db_in_memory().unwrap();
    seed(&mut conn);

    let uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = uow.members();
    let before = members.find_member_by_username("member5").unwrap().unwrap();
    assert_eq!(before.age, 40);
    assert!(uow.is_managed(before.id.unwrap()));

    let updated = members.bulk_age_plus(20).unwrap();
    assert_eq!(updated, 3);
    assert_eq!(uow.managed_count(), 0);

    let after = members.find_by_id(before.id.unwrap()).unwrap().unwrap();
    assert_eq!(after.age, 41);

    let ages: Vec<i32> = members
        .find_all()
        .unwrap()
        .iter()
        .map(|member| member.age)
        .collect();
    assert_eq!(ages, vec![10, 19, 21, 22, 41]);
}

#[test]
fn bulk_update_sees_changes_staged_before_it() {
    let mut conn = open_db_in_memory().unwrap();
    seed(&mut conn);

    let uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = uow.members();
    let mut member2 = members.find_member_by_username("member2").unwrap().unwrap();
    member2.age = 25;
    members.save(&mut member2).unwrap();

    assert_eq!(members.bulk_age_plus(20).unwrap(), 4);
    let reloaded = members.find_by_id(member2.id.unwrap()).unwrap().unwrap();
    assert_eq!(reloaded.age, 26);
}

#[test]
fn bulk_update_past_max_age_fails_without_changing_rows() {
    let mut conn = open_db_in_memory().unwrap();
    let uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = uow.members();
    members
        .save(&mut Member::with_age("oldest", i32::MAX))
        .unwrap();
    members.save(&mut Member::with_age("young", 10)).unwrap();

    let err = members.bulk_age_plus(0).unwrap_err();
    assert!(matches!(err, RepoError::ConstraintViolation(_)));

    let ages: Vec<i32> = members
        .find_all()
        .unwrap()
        .iter()
        .map(|member| member.age)
        .collect();
    assert_eq!(ages, vec![i32::MAX, 10]);

    let mut oldest = members.find_member_by_username("oldest").unwrap().unwrap();
    oldest.age = i32::MAX - 1;
    members.save(&mut oldest).unwrap();
    assert_eq!(members.bulk_age_plus(0).unwrap(), 2);

    let ages: Vec<i32> = members
        .find_all()
        .unwrap()
        .iter()
        .map(|member| member.age)
        .collect();
    assert_eq!(ages, vec![i32::MAX, 11]);
}

#[test]
fn managed_copy_is_returned_within_one_unit_of_work() {
    let mut conn = open_db_in_memory().unwrap();
    seed(&mut conn);

    let uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = uow.members();
    let mut member1 = members.find_member_by_username("member1").unwrap().unwrap();
    let id = member1.id.unwrap();

    member1.age = 11;
    members.save(&mut member1).unwrap();
    assert_eq!(members.find_by_id(id).unwrap().unwrap().age, 11);

    assert!(uow.detach(id));
    assert!(!uow.is_managed(id));
    assert!(!uow.detach(id));

    members.find_all().unwrap();
    assert_eq!(uow.managed_count(), 5);
    assert_eq!(uow.clear(), 5);
    assert_eq!(uow.managed_count(), 0);
}

#[test]
fn queries_flush_staged_changes_first() {
    let mut conn = open_db_in_memory().unwrap();
    seed(&mut conn);

    let uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = uow.members();
    let mut member1 = members.find_member_by_username("member1").unwrap().unwrap();
    member1.username = "renamed".to_string();
    members.save(&mut member1).unwrap();

    let found = members.find_by_username("renamed").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, member1.id);
    assert!(members.find_by_username("member1").unwrap().is_empty());
}

#[test]
fn explicit_flush_reports_written_rows() {
    let mut conn = open_db_in_memory().unwrap();
    seed(&mut conn);

    let uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = uow.members();
    let mut member1 = members.find_member_by_username("member1").unwrap().unwrap();
    assert_eq!(uow.flush().unwrap(), 0);

    member1.age = 12;
    members.save(&mut member1).unwrap();
    assert_eq!(uow.flush().unwrap(), 1);
    assert_eq!(uow.flush().unwrap(), 0);
}

#[test]
fn read_only_result_is_never_written_back() {
    let mut conn = open_db_in_memory().unwrap();
    seed(&mut conn);

    let uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = uow.members();
    let mut member1 = members
        .find_read_only_by_username("member1")
        .unwrap()
        .unwrap();
    member1.age = 99;
    members.save(&mut member1).unwrap();
    assert_eq!(uow.flush().unwrap(), 0);
    uow.commit().unwrap();

    assert_eq!(age_of(&mut conn, "member1"), 10);
}

#[test]
fn read_only_lookup_does_not_change_query_semantics() {
    let mut conn = open_db_in_memory().unwrap();
    seed(&mut conn);

    let uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = uow.members();
    assert!(members
        .find_read_only_by_username("nobody")
        .unwrap()
        .is_none());
    assert_eq!(
        members
            .find_read_only_by_username("member3")
            .unwrap()
            .map(|m| m.age),
        Some(20)
    );
}

#[test]
fn dropping_without_commit_rolls_back() {
    let mut conn = open_db_in_memory().unwrap();
    seed(&mut conn);

    {
        let uow = UnitOfWork::begin(&mut conn).unwrap();
        uow.members().save(&mut Member::new("temporary")).unwrap();
        let mut member1 = uow
            .members()
            .find_member_by_username("member1")
            .unwrap()
            .unwrap();
        member1.age = 77;
        uow.members().save(&mut member1).unwrap();
    }

    let uow = UnitOfWork::begin(&mut conn).unwrap();
    assert_eq!(uow.members().count().unwrap(), 5);
    uow.rollback().unwrap();
    assert_eq!(age_of(&mut conn, "member1"), 10);
}

#[test]
fn in_unit_of_work_commits_on_ok_and_rolls_back_on_err() {
    let mut conn = open_db_in_memory().unwrap();

    let id = in_unit_of_work(&mut conn, |uow| {
        uow.members().save(&mut Member::with_age("kept", 1))
    })
    .unwrap();

    let err = in_unit_of_work(&mut conn, |uow| {
        uow.members().save(&mut Member::with_age("discarded", 2))?;
        Err::<(), _>(RepoError::NotFound(EntityKey::Member(0)))
    })
    .unwrap_err();
    assert!(matches!(err, RepoError::NotFound(_)));

    let names = in_unit_of_work(&mut conn, |uow| uow.members().find_username_list()).unwrap();
    assert_eq!(names, vec!["kept"]);

    let kept = in_unit_of_work(&mut conn, |uow| uow.members().find_by_id(id)).unwrap();
    assert_eq!(kept.map(|m| m.age), Some(1));
}

fn file_config(dir: &tempfile::TempDir) -> DatabaseConfig {
    DatabaseConfig {
        path: Some(dir.path().join("locks.db")),
        busy_timeout_ms: 50,
        ..DatabaseConfig::default()
    }
}

#[test]
fn lock_by_username_blocks_writers_on_other_connections() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&dir);
    let mut holder = open_with_config(&config).unwrap();
    let mut contender = open_with_config(&config).unwrap();
    seed(&mut holder);

    let locking = UnitOfWork::begin(&mut holder).unwrap();
    let locked = locking.members().find_lock_by_username("member1").unwrap();
    assert_eq!(locked.len(), 1);

    {
        let blocked = UnitOfWork::begin(&mut contender).unwrap();
        let err = blocked
            .members()
            .save(&mut Member::new("intruder"))
            .unwrap_err();
        assert!(err.is_lock_timeout(), "unexpected error: {err}");
    }

    locking.commit().unwrap();

    let retry = UnitOfWork::begin(&mut contender).unwrap();
    retry.members().save(&mut Member::new("intruder")).unwrap();
    retry.commit().unwrap();
}

#[test]
fn immediate_unit_of_work_holds_write_lock_from_begin() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&dir);
    let mut first = open_with_config(&config).unwrap();
    let mut second = open_with_config(&config).unwrap();

    let holder = UnitOfWork::begin_with(&mut first, BeginMode::Immediate).unwrap();
    let err = UnitOfWork::begin_with(&mut second, BeginMode::Immediate)
        .err()
        .expect("second immediate begin must time out");
    assert!(err.is_lock_timeout(), "unexpected error: {err}");

    holder.rollback().unwrap();
    UnitOfWork::begin_with(&mut second, BeginMode::Immediate)
        .unwrap()
        .commit()
        .unwrap();
}
