// src/commands/history.rs

use super::open_database;
use crate::context::Context;
use crate::db::models::{Changeset, ChangesetEntry};
use crate::error::Result;

/// Print every recorded transaction, newest first
pub(super) fn run(ctx: &Context) -> Result<()> {
    let conn = open_database(ctx, false)?;
    let changesets = Changeset::list_all(&conn)?;

    if changesets.is_empty() {
        println!("No transactions recorded.");
        return Ok(());
    }

    for changeset in &changesets {
        let Some(id) = changeset.id else {
            continue;
        };
        println!(
            "[{}] #{} {} ({})",
            changeset.created_at.as_deref().unwrap_or("unknown"),
            id,
            changeset.description,
            changeset.status.as_str()
        );
        for entry in ChangesetEntry::find_by_changeset(&conn, id)? {
            let versions = match (&entry.old_version, &entry.new_version) {
                (Some(old), Some(new)) => format!("{} -> {}", old, new),
                (None, Some(new)) => new.clone(),
                (Some(old), None) => old.clone(),
                (None, None) => String::new(),
            };
            println!("    {:<8} {} {}", entry.action, entry.package, versions);
        }
    }
    println!("\nTotal: {} transaction(s)", changesets.len());
    Ok(())
}
