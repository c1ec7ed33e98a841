//! On-disk layout of a shared infrastructure root.
//!
//! ```text
//! <root>/
//!   apps/<unit>/ownership.yaml
//!   apps/<unit>/firestore.rules.part
//!   apps/<unit>/firestore.indexes.part.json
//!   apps/<unit>/storage.rules.part
//!   generated/firestore.rules
//!   generated/storage.rules
//!   generated/firestore.indexes.json
//! ```
//!
//! The `apps` and `generated` directory names are configurable through
//! [`LayoutConfig`](crate::config::LayoutConfig).

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::LayoutConfig;

/// File name of the per-unit ownership manifest.
pub const MANIFEST_FILE: &str = "ownership.yaml";

/// File name of the per-unit primary rules fragment.
pub const RULES_PART_FILE: &str = "firestore.rules.part";

/// File name of the per-unit index fragment.
pub const INDEXES_PART_FILE: &str = "firestore.indexes.part.json";

/// File name of the per-unit storage rules fragment.
pub const STORAGE_PART_FILE: &str = "storage.rules.part";

/// A governed resource class.
///
/// Every unit declares, per class, the members it owns. Ordering follows
/// the order in which validation reports each class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceClass {
    /// Document paths matched by the primary rules.
    RulesPaths,
    /// Collection groups carrying composite indexes.
    IndexGroups,
    /// Object paths matched by the storage rules.
    StoragePaths,
}

impl ResourceClass {
    /// All classes, in validation order.
    pub const ALL: [Self; 3] = [Self::RulesPaths, Self::IndexGroups, Self::StoragePaths];

    /// Manifest list key declaring the members of this class.
    #[must_use]
    pub const fn manifest_key(self) -> &'static str {
        match self {
            Self::RulesPaths => "rules_paths",
            Self::IndexGroups => "index_collection_groups",
            Self::StoragePaths => "storage_paths",
        }
    }

    /// Fragment file contributing this class.
    #[must_use]
    pub const fn fragment_file(self) -> &'static str {
        match self {
            Self::RulesPaths => RULES_PART_FILE,
            Self::IndexGroups => INDEXES_PART_FILE,
            Self::StoragePaths => STORAGE_PART_FILE,
        }
    }

    /// Human-readable name of a fragment of this class.
    #[must_use]
    pub const fn fragment_noun(self) -> &'static str {
        match self {
            Self::RulesPaths => "rules part",
            Self::IndexGroups => "indexes part",
            Self::StoragePaths => "storage part",
        }
    }

    /// Human-readable name of one member of this class.
    #[must_use]
    pub const fn member_noun(self) -> &'static str {
        match self {
            Self::RulesPaths => "rules path",
            Self::IndexGroups => "index collectionGroup",
            Self::StoragePaths => "storage path",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest_key())
    }
}

/// A generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    /// Composed primary rules.
    FirestoreRules,
    /// Composed storage rules.
    StorageRules,
    /// Composed index definitions.
    Indexes,
}

impl Artifact {
    /// All artifacts, in the order they are written or checked.
    pub const ALL: [Self; 3] = [Self::FirestoreRules, Self::StorageRules, Self::Indexes];

    /// File name under the generated directory.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::FirestoreRules => "firestore.rules",
            Self::StorageRules => "storage.rules",
            Self::Indexes => "firestore.indexes.json",
        }
    }
}

/// Resolved paths of one infrastructure root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraLayout {
    root: PathBuf,
    units_dir: PathBuf,
    generated_dir: PathBuf,
}

impl InfraLayout {
    /// Layout with the default directory names under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, &LayoutConfig::default())
    }

    /// Layout with directory names taken from `config`.
    #[must_use]
    pub fn with_config(root: impl Into<PathBuf>, config: &LayoutConfig) -> Self {
        let root = root.into();
        Self {
            units_dir: root.join(&config.units_dir),
            generated_dir: root.join(&config.generated_dir),
            root,
        }
    }

    /// The infrastructure root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one subdirectory per unit.
    #[must_use]
    pub fn units_dir(&self) -> &Path {
        &self.units_dir
    }

    /// Directory receiving composed artifacts.
    #[must_use]
    pub fn generated_dir(&self) -> &Path {
        &self.generated_dir
    }

    /// Directory of one unit.
    #[must_use]
    pub fn unit_dir(&self, unit: &str) -> PathBuf {
        self.units_dir.join(unit)
    }

    /// Ownership manifest of one unit.
    #[must_use]
    pub fn manifest_path(&self, unit: &str) -> PathBuf {
        self.unit_dir(unit).join(MANIFEST_FILE)
    }

    /// Fragment of one unit for one class.
    #[must_use]
    pub fn fragment_path(&self, unit: &str, class: ResourceClass) -> PathBuf {
        self.unit_dir(unit).join(class.fragment_file())
    }

    /// Path of a generated artifact.
    #[must_use]
    pub fn artifact_path(&self, artifact: Artifact) -> PathBuf {
        self.generated_dir.join(artifact.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_paths() {
        let layout = InfraLayout::new("/srv/infra");
        assert_eq!(layout.units_dir(), Path::new("/srv/infra/apps"));
        assert_eq!(
            layout.fragment_path("aquis", ResourceClass::IndexGroups),
            PathBuf::from("/srv/infra/apps/aquis/firestore.indexes.part.json")
        );
        assert_eq!(
            layout.artifact_path(Artifact::StorageRules),
            PathBuf::from("/srv/infra/generated/storage.rules")
        );
    }

    #[test]
    fn configured_directory_names() {
        let config = LayoutConfig {
            units_dir: "tenants".into(),
            generated_dir: "out".into(),
            ..LayoutConfig::default()
        };
        let layout = InfraLayout::with_config("/x", &config);
        assert_eq!(layout.manifest_path("a"), PathBuf::from("/x/tenants/a/ownership.yaml"));
        assert_eq!(layout.generated_dir(), Path::new("/x/out"));
    }

    #[test]
    fn class_display_is_manifest_key() {
        assert_eq!(ResourceClass::IndexGroups.to_string(), "index_collection_groups");
    }
}
