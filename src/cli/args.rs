// src/cli/args.rs

//! Argument definitions
//!
//! Kept free of crate imports so the build script can render the man page
//! from the same definition.

use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecoverArg {
    Resume,
    Rollback,
}

#[derive(Parser, Debug, Default)]
#[command(name = "rustpack")]
#[command(author, version, about = "pacman-compatible package manager with journaled transactions", long_about = None)]
pub struct Cli {
    /// Synchronize packages
    #[arg(short = 'S', long = "sync", help_heading = "Operations")]
    pub sync: bool,

    /// Query the local package database
    #[arg(short = 'Q', long = "query", help_heading = "Operations")]
    pub query: bool,

    /// Remove packages
    #[arg(short = 'R', long = "remove", help_heading = "Operations")]
    pub remove: bool,

    /// Install package files
    #[arg(short = 'U', long = "upgrade", help_heading = "Operations")]
    pub upgrade: bool,

    /// Show past transactions
    #[arg(long = "history", help_heading = "Operations")]
    pub history: bool,

    /// Download fresh package databases (-S)
    #[arg(short = 'y', long = "refresh")]
    pub refresh: bool,

    /// Upgrade installed packages (-S)
    #[arg(short = 'u', long = "sysupgrade")]
    pub sysupgrade: bool,

    /// Search (-S, -Q), or also remove unneeded dependencies (-R)
    #[arg(short = 's', long = "search", visible_alias = "recursive")]
    pub search: bool,

    /// Show package information (-S, -Q)
    #[arg(short = 'i', long = "info")]
    pub info: bool,

    /// Clean the package cache; twice removes everything (-S)
    #[arg(short = 'c', long = "clean", action = ArgAction::Count)]
    pub clean: u8,

    /// List files owned by packages (-Q)
    #[arg(short = 'l', long = "list")]
    pub list: bool,

    /// List packages not found in any repository (-Q)
    #[arg(short = 'm', long = "foreign")]
    pub foreign: bool,

    /// Find the package owning a file (-Q)
    #[arg(short = 'o', long = "owns")]
    pub owns: bool,

    /// Do not keep .pacsave files (-R)
    #[arg(short = 'n', long = "nosave")]
    pub nosave: bool,

    /// Skip dependency checks; twice also skips version checks
    #[arg(short = 'd', long = "nodeps", action = ArgAction::Count)]
    pub nodeps: u8,

    /// Do not reinstall up to date packages
    #[arg(long)]
    pub needed: bool,

    /// Do not run install scriptlets
    #[arg(long)]
    pub noscriptlet: bool,

    /// Overwrite conflicting files matching a glob (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub overwrite: Vec<String>,

    /// Mark installed packages as dependencies
    #[arg(long)]
    pub asdeps: bool,

    /// Mark installed packages as explicitly installed
    #[arg(long)]
    pub asexplicit: bool,

    /// Only check what would be done
    #[arg(long = "test", visible_alias = "dry-run", help_heading = "Global options")]
    pub test: bool,

    /// Do not ask for confirmation
    #[arg(long, help_heading = "Global options")]
    pub noconfirm: bool,

    /// Alternate installation root
    #[arg(long, value_name = "PATH", help_heading = "Global options")]
    pub root: Option<PathBuf>,

    /// Alternate database location
    #[arg(long, value_name = "PATH", help_heading = "Global options")]
    pub dbpath: Option<PathBuf>,

    /// Alternate package cache location
    #[arg(long, value_name = "PATH", help_heading = "Global options")]
    pub cachedir: Option<PathBuf>,

    /// Alternate configuration file
    #[arg(long, value_name = "PATH", help_heading = "Global options")]
    pub config: Option<PathBuf>,

    /// Resolve an interrupted transaction without prompting
    #[arg(long, value_enum, help_heading = "Global options")]
    pub recover: Option<RecoverArg>,

    /// Verbose logging
    #[arg(long, help_heading = "Global options")]
    pub debug: bool,

    /// Hand the command to paru (never as root)
    #[arg(long = "aur", visible_alias = "paru", help_heading = "Global options")]
    pub aur: bool,

    /// Packages, search terms or files
    #[arg(value_name = "TARGETS")]
    pub targets: Vec<String>,
}
