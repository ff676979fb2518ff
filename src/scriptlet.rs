// src/scriptlet.rs

//! Package install scriptlets
//!
//! A scriptlet is a shell file defining any of `pre_install`, `post_install`,
//! `pre_upgrade`, `post_upgrade`, `pre_remove` and `post_remove`. Only the
//! function for the current hook is called; a missing function is a no-op.

use crate::error::{Error, Result};
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    PreInstall,
    PostInstall,
    PreUpgrade,
    PostUpgrade,
    PreRemove,
    PostRemove,
}

impl Hook {
    /// Name of the shell function implementing this hook
    pub fn function(&self) -> &'static str {
        match self {
            Hook::PreInstall => "pre_install",
            Hook::PostInstall => "post_install",
            Hook::PreUpgrade => "pre_upgrade",
            Hook::PostUpgrade => "post_upgrade",
            Hook::PreRemove => "pre_remove",
            Hook::PostRemove => "post_remove",
        }
    }

    /// Pre-hooks can veto a step; post-hooks only warn
    pub fn is_pre(&self) -> bool {
        matches!(self, Hook::PreInstall | Hook::PreUpgrade | Hook::PreRemove)
    }
}

/// Executes scriptlet hooks
pub trait ScriptletRunner: Send + Sync {
    /// Run `hook` from `script` with pacman's positional arguments
    /// (new version, then old version for upgrades)
    fn run(&self, script: &str, hook: Hook, args: &[&str], root: &Path) -> Result<()>;
}

impl<T: ScriptletRunner + ?Sized> ScriptletRunner for &T {
    fn run(&self, script: &str, hook: Hook, args: &[&str], root: &Path) -> Result<()> {
        (**self).run(script, hook, args, root)
    }
}

/// Runs hooks with `/bin/sh` from the target root
#[derive(Debug, Default)]
pub struct ShellRunner;

impl ScriptletRunner for ShellRunner {
    fn run(&self, script: &str, hook: Hook, args: &[&str], root: &Path) -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(script.as_bytes())?;
        file.flush()?;

        let function = hook.function();
        let body = format!(
            ". \"$1\"; shift; type {f} >/dev/null 2>&1 || exit 0; {f} \"$@\"",
            f = function
        );
        debug!("running scriptlet {} ({})", function, args.join(" "));

        let status = Command::new("sh")
            .arg("-c")
            .arg(&body)
            .arg("rustpack-scriptlet")
            .arg(file.path())
            .args(args)
            .current_dir(root)
            .status()?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::IoError(format!("scriptlet {} exited with {}", function, status)))
        }
    }
}

/// Run a hook unless skipped, applying the pre/post failure policy
pub fn run_hook(
    runner: &dyn ScriptletRunner,
    script: Option<&str>,
    hook: Hook,
    args: &[&str],
    root: &Path,
) -> Result<()> {
    let Some(script) = script else {
        return Ok(());
    };

    match runner.run(script, hook, args, root) {
        Ok(()) => Ok(()),
        Err(e) if hook.is_pre() => Err(e),
        Err(e) => {
            warn!("{}", e);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_runs_only_the_requested_hook() {
        let root = TempDir::new().unwrap();
        let script = "post_install() { echo \"installed $1\" > post.log; }\n\
                      pre_remove() { echo removed > pre.log; }\n";

        ShellRunner
            .run(script, Hook::PostInstall, &["1.0-1"], root.path())
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(root.path().join("post.log")).unwrap(),
            "installed 1.0-1\n"
        );
        assert!(!root.path().join("pre.log").exists());
    }

    #[test]
    fn test_missing_function_is_noop() {
        let root = TempDir::new().unwrap();
        ShellRunner
            .run("post_install() { :; }\n", Hook::PreUpgrade, &["2", "1"], root.path())
            .unwrap();
    }

    #[test]
    fn test_failure_policy() {
        let root = TempDir::new().unwrap();
        let script = "pre_install() { return 1; }\npost_install() { return 1; }\n";

        assert!(run_hook(&ShellRunner, Some(script), Hook::PreInstall, &["1"], root.path()).is_err());
        assert!(run_hook(&ShellRunner, Some(script), Hook::PostInstall, &["1"], root.path()).is_ok());
        assert!(run_hook(&ShellRunner, None, Hook::PreInstall, &["1"], root.path()).is_ok());
    }
}
