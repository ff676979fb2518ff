// src/cli/mod.rs

//! Command line surface
//!
//! clap parses the pacman-style flags (`-Syu`, `-Scc`, `-Rs`, `-dd`) into a
//! flat [`Cli`]; [`Cli::into_request`] then checks the combination and builds
//! the typed [`OperationRequest`].

use crate::error::{Error, Result};
use crate::packages::InstallReason;
use crate::request::{
    FileInstallOperation, GlobalFlags, InstallOptions, Operation, OperationRequest, QueryOperation,
    RecoverMode, RemoveOperation, SyncAction, SyncOperation,
};
use clap::Parser;
use std::path::PathBuf;

mod args;

pub use args::{Cli, RecoverArg};

impl From<RecoverArg> for RecoverMode {
    fn from(arg: RecoverArg) -> Self {
        match arg {
            RecoverArg::Resume => RecoverMode::Resume,
            RecoverArg::Rollback => RecoverMode::Rollback,
        }
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidRequest(message.to_string())
}

impl Cli {
    fn global_flags(&self) -> GlobalFlags {
        GlobalFlags {
            simulate: self.test,
            noconfirm: self.noconfirm,
            root: self.root.clone(),
            dbpath: self.dbpath.clone(),
            cachedir: self.cachedir.clone(),
            config: self.config.clone(),
            recover: self.recover.map(RecoverMode::from),
            debug: self.debug,
        }
    }

    fn install_options(&self) -> Result<InstallOptions> {
        for pattern in &self.overwrite {
            glob::Pattern::new(pattern)
                .map_err(|e| Error::InvalidRequest(format!("invalid --overwrite pattern '{}': {}", pattern, e)))?;
        }

        let reason = match (self.asdeps, self.asexplicit) {
            (true, true) => return Err(invalid("--asdeps and --asexplicit may not be used together")),
            (true, false) => Some(InstallReason::Dependency),
            (false, true) => Some(InstallReason::Explicit),
            (false, false) => None,
        };

        Ok(InstallOptions {
            nodeps: self.nodeps,
            noscriptlet: self.noscriptlet,
            needed: self.needed,
            overwrite: self.overwrite.clone(),
            reason,
        })
    }

    fn has_install_flags(&self) -> bool {
        self.needed || self.asdeps || self.asexplicit || !self.overwrite.is_empty()
    }

    /// Check the flag combination and build the request
    pub fn into_request(self) -> Result<OperationRequest> {
        let selected = [self.sync, self.query, self.remove, self.upgrade, self.history]
            .iter()
            .filter(|s| **s)
            .count();
        if selected == 0 {
            return Err(invalid("no operation specified (use -h for help)"));
        }
        if selected > 1 {
            return Err(invalid("only one operation may be used at a time"));
        }

        let operation = if self.sync {
            self.sync_operation()?
        } else if self.query {
            self.query_operation()?
        } else if self.remove {
            self.remove_operation()?
        } else if self.upgrade {
            self.file_install_operation()?
        } else {
            self.history_operation()?
        };

        Ok(OperationRequest::new(operation, self.global_flags()))
    }

    fn sync_operation(&self) -> Result<Operation> {
        if self.list || self.foreign || self.owns || self.nosave {
            return Err(invalid("invalid option: -l, -m, -o and -n do not apply to -S"));
        }

        if self.clean > 0 {
            if self.refresh || self.sysupgrade || self.search || self.info || !self.targets.is_empty() {
                return Err(invalid("-Sc/-Scc cannot be combined with other -S options or targets"));
            }
            if self.has_install_flags() || self.nodeps > 0 {
                return Err(invalid("install options do not apply to -Sc"));
            }
            return Ok(Operation::Sync(SyncOperation {
                refresh: false,
                action: SyncAction::CleanCache { all: self.clean >= 2 },
            }));
        }

        if self.search || self.info {
            if self.search && self.info {
                return Err(invalid("-s and -i may not be used together"));
            }
            if self.sysupgrade {
                return Err(invalid("-s/-i cannot be combined with -u"));
            }
            if self.targets.is_empty() {
                return Err(invalid("no targets specified"));
            }
            if self.has_install_flags() || self.nodeps > 0 || self.noscriptlet {
                return Err(invalid("install options do not apply to -Ss/-Si"));
            }
            let action = if self.search {
                SyncAction::Search(self.targets.clone())
            } else {
                SyncAction::Info(self.targets.clone())
            };
            return Ok(Operation::Sync(SyncOperation {
                refresh: self.refresh,
                action,
            }));
        }

        if self.targets.is_empty() && !self.refresh && !self.sysupgrade {
            return Err(invalid("no targets specified"));
        }

        Ok(Operation::Sync(SyncOperation {
            refresh: self.refresh,
            action: SyncAction::Install {
                targets: self.targets.clone(),
                sysupgrade: self.sysupgrade,
                options: self.install_options()?,
            },
        }))
    }

    fn query_operation(&self) -> Result<Operation> {
        if self.refresh || self.sysupgrade || self.clean > 0 || self.nosave {
            return Err(invalid("invalid option: -y, -u, -c and -n do not apply to -Q"));
        }
        if self.nodeps > 0 {
            return Err(invalid("--nodeps does not apply to -Q"));
        }
        if self.has_install_flags() || self.noscriptlet {
            return Err(invalid("--needed/--asdeps/--asexplicit/--noscriptlet/--overwrite do not apply to -Q"));
        }

        let modes = [self.info, self.search, self.list, self.foreign, self.owns]
            .iter()
            .filter(|m| **m)
            .count();
        if modes > 1 {
            return Err(invalid("only one of -i, -s, -l, -m and -o may be used"));
        }

        let targets = self.targets.clone();
        let needs_targets = self.info || self.search || self.list || self.owns;
        if needs_targets && targets.is_empty() {
            return Err(invalid("no targets specified"));
        }

        let query = if self.info {
            QueryOperation::Info(targets)
        } else if self.search {
            QueryOperation::Search(targets)
        } else if self.list {
            QueryOperation::Files(targets)
        } else if self.owns {
            QueryOperation::Owner(targets)
        } else if self.foreign {
            if !targets.is_empty() {
                return Err(invalid("-Qm does not take targets"));
            }
            QueryOperation::Foreign
        } else {
            QueryOperation::List(targets)
        };
        Ok(Operation::Query(query))
    }

    fn remove_operation(&self) -> Result<Operation> {
        if self.refresh || self.sysupgrade || self.info || self.clean > 0 || self.list || self.foreign || self.owns {
            return Err(invalid("invalid option for -R"));
        }
        if self.has_install_flags() {
            return Err(invalid("--needed/--asdeps/--asexplicit/--overwrite only apply to -S and -U"));
        }
        if self.targets.is_empty() {
            return Err(invalid("no targets specified"));
        }

        Ok(Operation::Remove(RemoveOperation {
            targets: self.targets.clone(),
            recursive: self.search,
            nosave: self.nosave,
            nodeps: self.nodeps,
            noscriptlet: self.noscriptlet,
        }))
    }

    fn file_install_operation(&self) -> Result<Operation> {
        if self.refresh
            || self.sysupgrade
            || self.search
            || self.info
            || self.clean > 0
            || self.list
            || self.foreign
            || self.owns
            || self.nosave
        {
            return Err(invalid("invalid option for -U"));
        }
        if self.targets.is_empty() {
            return Err(invalid("no targets specified"));
        }

        Ok(Operation::FileInstall(FileInstallOperation {
            paths: self.targets.iter().map(PathBuf::from).collect(),
            options: self.install_options()?,
        }))
    }

    fn history_operation(&self) -> Result<Operation> {
        let any_flag = self.refresh
            || self.sysupgrade
            || self.search
            || self.info
            || self.clean > 0
            || self.list
            || self.foreign
            || self.owns
            || self.nosave
            || self.nodeps > 0
            || self.noscriptlet
            || self.has_install_flags();
        if any_flag || !self.targets.is_empty() {
            return Err(invalid("--history takes no options or targets"));
        }
        Ok(Operation::History)
    }
}

/// Parse and validate arguments (program name first)
pub fn parse_request<I, T>(args: I) -> Result<OperationRequest>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = Cli::try_parse_from(args).map_err(|e| Error::InvalidRequest(e.to_string()))?;
    cli.into_request()
}
