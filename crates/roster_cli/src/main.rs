//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `roster_core` linkage end to end: config, logging, storage, queries.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `roster_cli [config.json]`. Without a config the database is in-memory.

use log::error;
use roster_core::{
    in_unit_of_work_with, init_logging, Member, MemberRepository, RepoResult, StoreConfig, Team,
    TeamRepository,
};
use std::process::ExitCode;

fn main() -> ExitCode {
    let config = match std::env::args().nth(1) {
        Some(path) => match StoreConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("roster_cli: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => StoreConfig::default(),
    };

    if let Err(err) = init_logging(&config.logging) {
        eprintln!("roster_cli: {err}");
        return ExitCode::FAILURE;
    }

    println!("roster_core ping={}", roster_core::ping());
    println!("roster_core version={}", roster_core::core_version());

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            eprintln!("roster_cli: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &StoreConfig) -> RepoResult<()> {
    let mut conn = roster_core::db::open_with_config(&config.database)?;

    let rows = in_unit_of_work_with(&mut conn, config.database.begin_mode, |uow| {
        let mut team = Team::new("teamA");
        uow.teams().save(&mut team)?;

        let members = uow.members();
        members.save(&mut Member::with_team("memberA", 10, &team))?;
        members.save(&mut Member::with_team("memberB", 20, &team))?;
        members.save(&mut Member::with_age("loner", 30))?;

        members.find_member_dto()
    })?;

    for dto in rows {
        println!(
            "member id={} username={} team={}",
            dto.id, dto.username, dto.team_name
        );
    }
    Ok(())
}
