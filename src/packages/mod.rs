// src/packages/mod.rs

//! Package archives and the records describing them
//!
//! `PackageRecord` is the shared metadata type used by every catalog.
//! Archive readers implement the `PackageFormat` trait.

pub mod arch;
pub mod record;
pub mod traits;

pub use record::{InstallReason, PackageRecord};
pub use traits::PackageFormat;
