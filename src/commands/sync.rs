// src/commands/sync.rs

//! `-S`: refresh, search, info, install/upgrade and cache cleaning

use super::{Session, not_found, open_database, report, transact};
use crate::cache;
use crate::catalog::Catalog;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::query;
use crate::repository;
use crate::request::{GlobalFlags, OperationRequest, SyncAction, SyncOperation};
use crate::ui;
use tracing::info;

pub(super) fn run(op: &SyncOperation, request: &OperationRequest, ctx: &mut Context, session: &Session) -> Result<()> {
    if op.refresh {
        refresh(ctx, session, request.flags.simulate)?;
    }

    match &op.action {
        SyncAction::Search(terms) => search(ctx, terms),
        SyncAction::Info(names) => show_info(ctx, names),
        SyncAction::CleanCache { all } => clean_cache(ctx, session, &request.flags, *all),
        SyncAction::Install {
            targets,
            sysupgrade,
            ..
        } => {
            // A bare -Sy is done after the refresh
            if targets.is_empty() && !sysupgrade {
                return Ok(());
            }
            if *sysupgrade {
                println!(":: Starting full system upgrade...");
            }
            transact(request, ctx, session, &[]).map(report)
        }
    }
}

/// Download fresh repository databases
///
/// Takes no lock: each database file is replaced by rename, so readers see
/// either the old or the new snapshot.
fn refresh(ctx: &mut Context, session: &Session, simulate: bool) -> Result<()> {
    println!(":: Synchronizing package databases...");
    if simulate {
        for repo in &ctx.repositories {
            println!(" {} (skipped with --test)", repo.name);
        }
        return Ok(());
    }

    let sync_dir = ctx.sync_dir();
    let refreshed = repository::refresh(&mut ctx.repositories, &sync_dir, session.fetcher)?;
    for repo in &ctx.repositories {
        println!(" {} ({} packages)", repo.name, repo.packages.len());
    }
    info!("{} databases refreshed", refreshed);
    Ok(())
}

fn search(ctx: &Context, terms: &[String]) -> Result<()> {
    let conn = open_database(ctx, false)?;
    let catalog = Catalog::load(ctx, &conn)?;

    for record in query::search_sync(&catalog, terms) {
        let installed = match catalog.local.get(&record.name) {
            Some(local) if local.version == record.version => " [installed]".to_string(),
            Some(local) => format!(" [installed: {}]", local.version),
            None => String::new(),
        };
        println!(
            "{}/{} {}{}",
            record.repository.as_deref().unwrap_or("unknown"),
            record.name,
            record.version,
            installed
        );
        if let Some(description) = &record.description {
            println!("    {}", description);
        }
    }
    Ok(())
}

fn show_info(ctx: &Context, names: &[String]) -> Result<()> {
    let conn = open_database(ctx, false)?;
    let catalog = Catalog::load(ctx, &conn)?;

    let lookup = query::lookup_sync(&catalog, names);
    for record in &lookup.found {
        println!("{}", query::format_info(record, false));
    }
    if !lookup.missing.is_empty() {
        return Err(not_found("package", &lookup.missing));
    }
    Ok(())
}

/// `-Sc` / `-Scc`
///
/// Only the cache changes, so no database lock is taken.
fn clean_cache(ctx: &Context, session: &Session, flags: &GlobalFlags, all: bool) -> Result<()> {
    let conn = open_database(ctx, false)?;
    let catalog = Catalog::load(ctx, &conn)?;

    println!("Cache directory: {}", ctx.cachedir.display());
    let plan = cache::classify(&ctx.cachedir, &catalog, all)?;
    if plan.remove.is_empty() {
        println!(" there is nothing to do");
        return Ok(());
    }

    if flags.simulate {
        println!(
            ":: would remove {} file(s), freeing {} (--test)",
            plan.remove.len(),
            ui::format_size(plan.reclaimed)
        );
        for path in &plan.remove {
            println!("    {}", path.display());
        }
        return Ok(());
    }

    let question = if all {
        "Do you want to remove ALL files from cache?"
    } else {
        "Do you want to remove all other packages from cache?"
    };
    if !session.confirmer(flags).confirm(question)? {
        return Err(Error::Cancelled);
    }

    let report = cache::apply(&plan)?;
    println!(
        "removed {} file(s), {} freed",
        report.removed,
        ui::format_size(report.freed)
    );
    if !report.failed.is_empty() {
        println!("error: {} file(s) could not be removed", report.failed.len());
        for path in &report.failed {
            println!("    {}", path.display());
        }
    }
    Ok(())
}
