// src/commands/query.rs

//! `-Q` output

use super::{not_found, open_database};
use crate::catalog::Catalog;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::query;
use crate::request::QueryOperation;

pub(super) fn run(op: &QueryOperation, ctx: &Context) -> Result<()> {
    let conn = open_database(ctx, false)?;
    let catalog = Catalog::load(ctx, &conn)?;

    match op {
        QueryOperation::List(names) => {
            let lookup = query::list_installed(&catalog, names);
            for record in &lookup.found {
                println!("{} {}", record.name, record.version);
            }
            missing(&lookup.missing)
        }
        QueryOperation::Info(names) => {
            let lookup = query::lookup_local(&catalog, names);
            for record in &lookup.found {
                println!("{}", query::format_info(record, true));
            }
            missing(&lookup.missing)
        }
        QueryOperation::Search(terms) => {
            for record in query::search_installed(&catalog, terms) {
                println!("local/{} {}", record.name, record.version);
                if let Some(description) = &record.description {
                    println!("    {}", description);
                }
            }
            Ok(())
        }
        QueryOperation::Files(names) => {
            let (files, unknown) = query::owned_files(&catalog, names);
            for (package, path) in files {
                println!("{} {}", package, ctx.rooted(path).display());
            }
            missing(&unknown)
        }
        QueryOperation::Foreign => {
            for record in query::foreign(&catalog) {
                println!("{} {}", record.name, record.version);
            }
            Ok(())
        }
        QueryOperation::Owner(paths) => {
            let mut unowned = Vec::new();
            for ownership in query::owners(&catalog, &ctx.root, paths) {
                if ownership.owners.is_empty() {
                    unowned.push(ownership.path);
                    continue;
                }
                for owner in ownership.owners {
                    let version = catalog.local.get(owner).map(|p| p.version.as_str()).unwrap_or("");
                    println!("{} is owned by {} {}", ownership.path, owner, version);
                }
            }
            if unowned.is_empty() {
                Ok(())
            } else {
                Err(Error::NotFoundError(format!("No package owns {}", unowned.join(", "))))
            }
        }
    }
}

fn missing(names: &[String]) -> Result<()> {
    if names.is_empty() {
        Ok(())
    } else {
        Err(not_found("package", names))
    }
}
