// src/aur.rs

//! `--aur` / `--paru` passthrough to an AUR helper

use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// Helper the passthrough runs
pub const AUR_HELPER: &str = "paru";

/// Flags that select the passthrough
pub const PASSTHROUGH_FLAGS: [&str; 2] = ["--aur", "--paru"];

/// Whether the process runs with an effective uid of 0
pub fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

/// Locate an executable on `PATH`
pub fn find_in_path(command: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(command))
        .find(|candidate| candidate.is_file())
}

/// Whether the raw arguments ask for the passthrough
pub fn requested(args: &[String]) -> bool {
    args.iter().any(|a| PASSTHROUGH_FLAGS.contains(&a.as_str()))
}

/// Arguments forwarded to the helper: everything but the passthrough flags
pub fn forwarded_args(args: &[String]) -> Vec<String> {
    args.iter()
        .filter(|a| !PASSTHROUGH_FLAGS.contains(&a.as_str()))
        .cloned()
        .collect()
}

/// Run the helper and return its exit code
///
/// `args` excludes the program name. AUR helpers build packages as the
/// invoking user and escalate on their own, so running as root is refused.
pub fn run_passthrough(args: &[String]) -> Result<i32> {
    if is_root() {
        return Err(Error::InvalidRequest(
            "--aur/--paru must be run as a regular user (do not use sudo)".to_string(),
        ));
    }
    let helper = find_in_path(AUR_HELPER).ok_or_else(|| {
        Error::NotFoundError(format!(
            "{} not found in PATH (install it or run without --aur)",
            AUR_HELPER
        ))
    })?;

    let forwarded = forwarded_args(args);
    debug!("running {} {}", helper.display(), forwarded.join(" "));
    let status = Command::new(helper).args(&forwarded).status()?;
    Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_passthrough_detection() {
        assert!(requested(&args(&["-S", "--aur", "yay-bin"])));
        assert!(!requested(&args(&["-S", "vim"])));
        assert_eq!(
            forwarded_args(&args(&["-S", "--paru", "yay-bin"])),
            args(&["-S", "yay-bin"])
        );
    }

    #[test]
    fn test_find_in_path() {
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("definitely-not-a-real-command-xyz").is_none());
    }
}
