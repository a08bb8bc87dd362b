//! Version change-set data model.
//!
//! A published version is described by a server-hosted manifest listing the
//! files and directories it added and removed relative to its predecessor.
//! Folding the manifests between the locally installed version and the
//! newest one yields a single net change-set to apply.

mod record;

pub use record::VersionRecord;
