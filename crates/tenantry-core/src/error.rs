//! Problems found while validating or composing unit fragments.
//!
//! Validation and composition never stop at the first problem: every
//! [`Violation`] is collected and returned so that one run reports all of
//! them. The `Display` form of each variant is the line printed to the user.

use std::path::PathBuf;

use thiserror::Error;

use crate::layout::ResourceClass;

/// A single validation or composition problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Violation {
    /// The units directory does not exist.
    #[error("missing units directory: {}", .path.display())]
    MissingUnitsDir {
        /// Expected units directory.
        path: PathBuf,
    },

    /// An expected manifest or fragment file is absent.
    #[error("missing {what}: {}", .path.display())]
    MissingFile {
        /// What kind of file was expected.
        what: &'static str,
        /// Expected location.
        path: PathBuf,
    },

    /// Manifest syntax outside the supported grammar.
    #[error("{}:{line}: {message}", .path.display())]
    Parse {
        /// Manifest path.
        path: PathBuf,
        /// 1-indexed line number.
        line: usize,
        /// What is wrong with the line.
        message: String,
    },

    /// A class key holds a scalar instead of a list.
    #[error("{}: key '{key}' must be a YAML list", .path.display())]
    NotAList {
        /// Manifest path.
        path: PathBuf,
        /// Offending key.
        key: &'static str,
    },

    /// The manifest names a unit other than its directory.
    #[error(
        "{}: app value '{declared}' does not match directory '{directory}'",
        .path.display()
    )]
    ManifestMismatch {
        /// Manifest path.
        path: PathBuf,
        /// Value of the manifest `app` field.
        declared: String,
        /// Name of the unit directory.
        directory: String,
    },

    /// Two units declare the same member in their manifests.
    #[error("ownership collision for {class}='{member}': {first} and {second}")]
    OwnershipCollision {
        /// Resource class of the member.
        class: ResourceClass,
        /// Contested member.
        member: String,
        /// Unit that declared the member first.
        first: String,
        /// Unit that declared it again.
        second: String,
    },

    /// Two units define the same member in their fragments.
    #[error("{} '{member}' appears in both {first} and {second} fragments", .class.member_noun())]
    FragmentCollision {
        /// Resource class of the member.
        class: ResourceClass,
        /// Contested member.
        member: String,
        /// Unit whose fragment defined the member first.
        first: String,
        /// Unit whose fragment defined it again.
        second: String,
    },

    /// A manifest declares a rules or storage path its fragment lacks.
    #[error(
        "{}: declared {} '{member}' not found in fragment",
        .path.display(),
        .class.member_noun()
    )]
    DeclarationDrift {
        /// Fragment path.
        path: PathBuf,
        /// Resource class of the member.
        class: ResourceClass,
        /// Declared member missing from the fragment.
        member: String,
    },

    /// A manifest declares collection groups its index fragment lacks.
    #[error(
        "{}: declared collection groups missing in fragment: [{}]",
        .path.display(),
        .groups.join(", ")
    )]
    MissingIndexGroups {
        /// Fragment path.
        path: PathBuf,
        /// Sorted missing groups.
        groups: Vec<String>,
    },

    /// A fragment exists but its content is unusable.
    #[error("{}: {message}", .path.display())]
    InvalidFragment {
        /// Fragment path.
        path: PathBuf,
        /// What is wrong with the fragment.
        message: String,
    },

    /// A generated artifact differs from what composition produces.
    #[error("generated file out of date: {}", .path.display())]
    StaleArtifact {
        /// Artifact path.
        path: PathBuf,
    },

    /// Reading or writing a file failed.
    #[error("{}: {message}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        message: String,
    },
}

impl Violation {
    /// Wraps an I/O error with the path that caused it.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_names_both_units() {
        let violation = Violation::OwnershipCollision {
            class: ResourceClass::RulesPaths,
            member: "/users/{id}".to_string(),
            first: "x".to_string(),
            second: "y".to_string(),
        };
        assert_eq!(
            violation.to_string(),
            "ownership collision for rules_paths='/users/{id}': x and y"
        );
    }

    #[test]
    fn parse_error_locates_line() {
        let violation = Violation::Parse {
            path: PathBuf::from("apps/a/ownership.yaml"),
            line: 7,
            message: "list item without list key".to_string(),
        };
        assert_eq!(
            violation.to_string(),
            "apps/a/ownership.yaml:7: list item without list key"
        );
    }

    #[test]
    fn missing_groups_are_listed() {
        let violation = Violation::MissingIndexGroups {
            path: PathBuf::from("p.json"),
            groups: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            violation.to_string(),
            "p.json: declared collection groups missing in fragment: [a, b]"
        );
    }

    #[test]
    fn fragment_collision_uses_member_noun() {
        let violation = Violation::FragmentCollision {
            class: ResourceClass::StoragePaths,
            member: "/logo.png".to_string(),
            first: "a".to_string(),
            second: "b".to_string(),
        };
        assert_eq!(
            violation.to_string(),
            "storage path '/logo.png' appears in both a and b fragments"
        );
    }
}
