// src/lib.rs

//! rustpack
//!
//! A pacman-compatible package manager whose transactions are all or
//! nothing: every plan is validated before anything is touched, and a
//! journal makes an interrupted commit resumable or reversible.
//!
//! # Architecture
//!
//! - Catalog: immutable snapshot of the sync repositories and the local
//!   database (SQLite)
//! - Resolver: turns a request into a dependency closure, reporting every
//!   problem at once
//! - Planner: orders the closure and checks file conflicts and disk space
//! - Transaction engine: lock, download, verify, then a journaled commit
//! - Query and cache commands work on snapshots and take no lock

pub mod aur;
pub mod cache;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod db;
mod error;
pub mod packages;
pub mod query;
pub mod repository;
pub mod request;
pub mod resolver;
pub mod scriptlet;
pub mod transaction;
pub mod ui;
pub mod version;

pub use error::{Error, Result};
