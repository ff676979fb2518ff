// src/commands/mod.rs

//! Operation handlers
//!
//! Each handler receives the validated request, the invocation context and
//! a [`Session`] carrying the side-effecting collaborators, so the binary and
//! the tests drive the same code.

mod history;
mod query;
mod sync;

use crate::aur;
use crate::catalog::Catalog;
use crate::config::{self, PacmanConfig};
use crate::context::Context;
use crate::db;
use crate::error::{Error, Result};
use crate::repository::Fetcher;
use crate::request::{GlobalFlags, Operation, OperationRequest};
use crate::resolver;
use crate::scriptlet::ScriptletRunner;
use crate::transaction::{self, ExecuteOptions, Outcome, TransactionEngine};
use crate::ui::{AssumeYes, Confirm};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{debug, info};

/// Collaborators shared by every handler
pub struct Session<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub confirm: &'a dyn Confirm,
    pub scriptlets: &'a dyn ScriptletRunner,
    /// Set by the Ctrl-C handler
    pub interrupted: Arc<AtomicBool>,
    /// Refuse live-system changes without an effective uid of 0
    pub require_root: bool,
}

impl<'a> Session<'a> {
    /// The prompt to use, honoring `--noconfirm`
    fn confirmer(&self, flags: &GlobalFlags) -> Box<dyn Confirm + 'a> {
        if flags.noconfirm {
            Box::new(AssumeYes)
        } else {
            Box::new(self.confirm)
        }
    }
}

/// Build the context from the configuration file and command line overrides
pub fn load_context(flags: &GlobalFlags) -> Result<Context> {
    let config_path = flags
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_PATH));
    let config = PacmanConfig::load_or_default(&config_path)?;

    let mut ctx = Context::from_config(&config, flags);
    ctx.load_repositories()?;
    Ok(ctx)
}

/// Run one validated request
pub fn run(request: &OperationRequest, ctx: &mut Context, session: &Session) -> Result<()> {
    let flags = &request.flags;
    if session.require_root
        && request.operation.is_mutating()
        && !flags.simulate
        && ctx.is_live_system()
        && !aur::is_root()
    {
        return Err(Error::InvalidRequest(
            "you cannot perform this operation unless you are root".to_string(),
        ));
    }

    match &request.operation {
        Operation::Sync(op) => sync::run(op, request, ctx, session),
        Operation::Query(op) => query::run(op, ctx),
        Operation::Remove(_) => transact(request, ctx, session, &[]).map(report),
        Operation::FileInstall(op) => transact(request, ctx, session, &op.paths).map(report),
        Operation::History => history::run(ctx),
    }
}

/// Open the local database
///
/// Read-only callers never create it: a missing database reads as an empty
/// one held in memory.
pub(crate) fn open_database(ctx: &Context, writable: bool) -> Result<Connection> {
    let path = ctx.local_db_path();
    if writable {
        return ctx.open_local_db();
    }
    if path.exists() {
        db::open(&path.to_string_lossy())
    } else {
        debug!("{} does not exist, using an empty database", path.display());
        db::open_in_memory()
    }
}

fn execute_options(request: &OperationRequest) -> ExecuteOptions {
    let operation = &request.operation;
    ExecuteOptions {
        simulate: request.flags.simulate,
        noscriptlet: operation.noscriptlet(),
        nosave: matches!(operation, Operation::Remove(op) if op.nosave),
        overwrite: operation
            .install_options()
            .map(|o| o.overwrite.clone())
            .unwrap_or_default(),
    }
}

/// Resolve, plan and execute a mutating request
///
/// `archives` are package files given on the command line (`-U`).
pub(crate) fn transact(
    request: &OperationRequest,
    ctx: &Context,
    session: &Session,
    archives: &[PathBuf],
) -> Result<Outcome> {
    let simulate = request.flags.simulate;
    let mut conn = open_database(ctx, !simulate)?;

    let mut engine = TransactionEngine::new(ctx, Box::new(session.fetcher), session.confirmer(&request.flags))
        .with_scriptlets(Box::new(session.scriptlets))
        .with_interrupt_flag(session.interrupted.clone());
    engine.begin(&mut conn, request.flags.recover, simulate)?;

    let catalog = Catalog::load(ctx, &conn)?.with_archives(archives)?;
    let closure = resolver::resolve(&request.operation, &catalog)?;
    let plan = transaction::plan(&closure, &request.operation, &catalog, ctx)?;

    engine.execute(&plan, &catalog, &mut conn, &execute_options(request))
}

fn report(outcome: Outcome) {
    match outcome {
        Outcome::NothingToDo => {}
        Outcome::Simulated { steps } => {
            println!(":: {} step(s) checked, no changes made (--test)", steps);
        }
        Outcome::Committed { changeset_id, steps } => {
            info!("transaction {} committed ({} steps)", changeset_id, steps);
        }
    }
}

/// Join names for a "not found" message
fn not_found(kind: &str, names: &[String]) -> Error {
    let names: Vec<String> = names.iter().map(|n| format!("'{}'", n)).collect();
    Error::NotFoundError(format!("{} {} was not found", kind, names.join(", ")))
}
