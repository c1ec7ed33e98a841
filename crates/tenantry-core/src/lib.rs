//! # tenantry-core
//!
//! Ownership-validated composition of a shared document database's security
//! rules, storage rules and composite indexes, plus reconciliation of the
//! composed indexes against the live service.
//!
//! Several independently owned applications (*units*) share one database.
//! Each unit lives in its own directory under the units root and contributes:
//!
//! - `ownership.yaml`: the rules paths, index collection groups and storage
//!   paths it claims
//! - `firestore.rules.part` and `storage.rules.part`: its rules fragments
//! - `firestore.indexes.part.json`: its index fragment
//!
//! ## Pipeline
//!
//! 1. [`ownership::validate`] proves that no two units claim the same member
//!    and that every declared member is defined in the unit's fragments.
//! 2. [`compose::compose`] merges all fragments into one deterministic artifact
//!    per resource class, or checks that the artifacts on disk are current.
//! 3. [`reconcile::Reconciler`] converges the remote composite indexes
//!    towards the composed index artifact.
//!
//! Validation and composition return every problem as a [`Violation`] value;
//! reconciliation stops at the first [`ReconcileError`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use tenantry_core::compose::{OutputMode, compose};
//! use tenantry_core::layout::InfraLayout;
//! use tenantry_core::ownership::validate;
//!
//! let layout = InfraLayout::new(Path::new("firebase_infra"));
//! let mut problems = validate(&layout);
//! if problems.is_empty() {
//!     let preferred = vec!["swimify".to_string()];
//!     problems = compose(&layout, &preferred, OutputMode::Check);
//! }
//! for problem in &problems {
//!     eprintln!("ERROR: {problem}");
//! }
//! ```

pub mod canonical;
pub mod compose;
pub mod config;
pub mod error;
pub mod fragment;
pub mod index;
pub mod layout;
pub mod manifest;
pub mod ownership;
pub mod reconcile;

pub use config::{ConfigError, InfraConfig};
pub use error::Violation;
pub use index::{IdentityAttributes, IndexIdentity, NormalizeError};
pub use layout::{Artifact, InfraLayout, ResourceClass};
pub use reconcile::{ReconcileError, ReconcileReport, Reconciler};
