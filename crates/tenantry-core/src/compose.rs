//! Fragment composition.
//!
//! Merges every unit's fragments into one artifact per resource class:
//!
//! - Rules and storage fragments are wrapped in a generated
//!   `service … { match … { … } }` envelope, each unit's contribution
//!   bracketed by `// BEGIN <unit>` and `// END <unit>` markers.
//! - Index fragments are unioned, deduplicated by canonical form and sorted
//!   so that the artifact does not depend on which unit contributed an entry.
//!
//! Artifacts are either written ([`OutputMode::Write`]) or compared with what
//! is on disk ([`OutputMode::Check`]); check mode never touches the
//! filesystem beyond reading.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;

use serde_json::{Value, json};

use crate::canonical::{canonical_string, sort_text};
use crate::error::Violation;
use crate::fragment::{IndexFragment, read_fragment};
use crate::layout::{Artifact, InfraLayout, ResourceClass};
use crate::manifest::{discover_units, ordered_units};

/// Indentation every fragment line is guaranteed to carry.
const FRAGMENT_INDENT: &str = "    ";

/// Generated header and root match of one rules artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleEnvelope {
    /// Service declaration, e.g. `cloud.firestore`.
    pub service: &'static str,
    /// Root match path wrapping all unit fragments.
    pub root_match: &'static str,
}

/// Envelope of the primary rules artifact.
pub const FIRESTORE_ENVELOPE: RuleEnvelope = RuleEnvelope {
    service: "cloud.firestore",
    root_match: "/databases/{database}/documents",
};

/// Envelope of the storage rules artifact.
pub const STORAGE_ENVELOPE: RuleEnvelope = RuleEnvelope {
    service: "firebase.storage",
    root_match: "/b/{bucket}/o",
};

/// Re-indents fragment lines for placement inside the envelope.
///
/// Trailing whitespace is dropped, blank lines become empty, and lines not
/// already indented by four spaces gain four.
#[must_use]
pub fn normalize_fragment_lines(fragment: &str) -> Vec<String> {
    fragment
        .trim_end()
        .lines()
        .map(|line| {
            let line = line.trim_end();
            if line.trim().is_empty() {
                String::new()
            } else if line.starts_with(FRAGMENT_INDENT) {
                line.to_string()
            } else {
                format!("{FRAGMENT_INDENT}{line}")
            }
        })
        .collect()
}

/// Composes a rules artifact from `(unit, fragment)` pairs, in the given
/// order.
#[must_use]
pub fn compose_rules(envelope: RuleEnvelope, fragments: &[(String, String)]) -> String {
    let mut lines = vec![
        "rules_version = '2';".to_string(),
        String::new(),
        format!("service {} {{", envelope.service),
        format!("  match {} {{", envelope.root_match),
        String::new(),
    ];

    for (unit, fragment) in fragments {
        lines.push(format!("{FRAGMENT_INDENT}// BEGIN {unit}"));
        lines.extend(normalize_fragment_lines(fragment));
        lines.push(format!("{FRAGMENT_INDENT}// END {unit}"));
        lines.push(String::new());
    }

    lines.push("  }".to_string());
    lines.push("}".to_string());

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// The union of all index fragments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposedIndexes {
    /// Deduplicated, sorted composite indexes.
    pub indexes: Vec<Value>,
    /// Deduplicated, sorted field overrides.
    pub field_overrides: Vec<Value>,
}

impl ComposedIndexes {
    /// The artifact as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "indexes": self.indexes,
            "fieldOverrides": self.field_overrides,
        })
    }

    /// The artifact text: two-space pretty JSON with a trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub fn render(&self) -> Result<String, serde_json::Error> {
        let mut text = serde_json::to_string_pretty(&self.to_value())?;
        text.push('\n');
        Ok(text)
    }
}

// Structural duplicates may differ in authored key order; keep the one whose
// compact text sorts first so the result does not depend on input order.
fn dedup_by_canonical<'a>(entries: impl IntoIterator<Item = &'a Value>) -> Vec<(String, Value)> {
    let mut unique: BTreeMap<String, &Value> = BTreeMap::new();
    for entry in entries {
        let key = canonical_string(entry);
        let replace = unique
            .get(&key)
            .is_none_or(|kept| entry.to_string() < kept.to_string());
        if replace {
            unique.insert(key, entry);
        }
    }
    unique
        .into_iter()
        .map(|(key, value)| (key, value.clone()))
        .collect()
}

/// Unions index fragments.
///
/// Indexes sort by collection group, query scope, canonical field list and
/// finally full canonical form; overrides by collection group, field path and
/// canonical form.
#[must_use]
pub fn compose_indexes<'a>(
    fragments: impl IntoIterator<Item = &'a IndexFragment>,
) -> ComposedIndexes {
    let fragments: Vec<&IndexFragment> = fragments.into_iter().collect();

    let mut indexes: Vec<((String, String, String, String), Value)> =
        dedup_by_canonical(fragments.iter().flat_map(|f| f.indexes.iter()))
            .into_iter()
            .map(|(canonical, index)| {
                let fields = index.get("fields").cloned().unwrap_or_else(|| json!([]));
                let key = (
                    sort_text(index.get("collectionGroup")),
                    sort_text(index.get("queryScope")),
                    canonical_string(&json!({ "fields": fields })),
                    canonical,
                );
                (key, index)
            })
            .collect();
    indexes.sort_by(|a, b| a.0.cmp(&b.0));

    let mut field_overrides: Vec<((String, String, String), Value)> =
        dedup_by_canonical(fragments.iter().flat_map(|f| f.field_overrides.iter()))
            .into_iter()
            .map(|(canonical, entry)| {
                let key = (
                    sort_text(entry.get("collectionGroup")),
                    sort_text(entry.get("fieldPath")),
                    canonical,
                );
                (key, entry)
            })
            .collect();
    field_overrides.sort_by(|a, b| a.0.cmp(&b.0));

    ComposedIndexes {
        indexes: indexes.into_iter().map(|(_, v)| v).collect(),
        field_overrides: field_overrides.into_iter().map(|(_, v)| v).collect(),
    }
}

/// Whether composed artifacts are persisted or verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Write artifacts, creating parent directories as needed.
    Write,
    /// Compare artifacts with on-disk content without writing.
    Check,
}

/// Writes `content` to `path` or checks that `path` already holds it.
///
/// Writes go through a temporary file in the same directory that is renamed
/// into place, so an interrupted run never leaves a truncated artifact.
///
/// # Errors
///
/// Returns [`Violation::StaleArtifact`] in check mode when the content
/// differs or the file is absent, and [`Violation::Io`] when reading or
/// writing fails.
pub fn write_or_check(path: &Path, content: &str, mode: OutputMode) -> Result<(), Violation> {
    match mode {
        OutputMode::Check => {
            let current = match std::fs::read_to_string(path) {
                Ok(current) => Some(current),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
                Err(err) => return Err(Violation::io(path, &err)),
            };
            if current.as_deref() == Some(content) {
                Ok(())
            } else {
                Err(Violation::StaleArtifact {
                    path: path.to_path_buf(),
                })
            }
        },
        OutputMode::Write => {
            let parent = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(parent).map_err(|e| Violation::io(parent, &e))?;
            let mut file =
                tempfile::NamedTempFile::new_in(parent).map_err(|e| Violation::io(parent, &e))?;
            file.write_all(content.as_bytes())
                .map_err(|e| Violation::io(path, &e))?;
            if let Some(permissions) = artifact_permissions(path) {
                file.as_file()
                    .set_permissions(permissions)
                    .map_err(|e| Violation::io(path, &e))?;
            }
            file.persist(path)
                .map_err(|e| Violation::io(path, &e.error))?;
            tracing::debug!(path = %path.display(), bytes = content.len(), "wrote artifact");
            Ok(())
        },
    }
}

/// Permissions for a rewritten artifact: those of the file it replaces, or
/// world-readable for a new one.
fn artifact_permissions(path: &Path) -> Option<std::fs::Permissions> {
    match std::fs::metadata(path) {
        Ok(metadata) => Some(metadata.permissions()),
        Err(_) => default_permissions(),
    }
}

#[cfg(unix)]
fn default_permissions() -> Option<std::fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
const fn default_permissions() -> Option<std::fs::Permissions> {
    None
}

/// Contents of every generated artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedArtifacts {
    /// Primary rules text.
    pub firestore_rules: String,
    /// Storage rules text.
    pub storage_rules: String,
    /// Index artifact text.
    pub indexes: String,
}

impl ComposedArtifacts {
    /// Content of one artifact.
    #[must_use]
    pub fn content(&self, artifact: Artifact) -> &str {
        match artifact {
            Artifact::FirestoreRules => &self.firestore_rules,
            Artifact::StorageRules => &self.storage_rules,
            Artifact::Indexes => &self.indexes,
        }
    }
}

fn collect_text_fragments(
    layout: &InfraLayout,
    units: &[String],
    class: ResourceClass,
    violations: &mut Vec<Violation>,
) -> Vec<(String, String)> {
    let mut fragments = Vec::with_capacity(units.len());
    for unit in units {
        match read_fragment(&layout.fragment_path(unit, class), class) {
            Ok(text) => fragments.push((unit.clone(), text)),
            Err(violation) => violations.push(violation),
        }
    }
    fragments
}

/// Builds all artifacts for `units`, in that order.
///
/// Every unreadable or invalid fragment is reported; the returned artifacts
/// then omit the affected contributions and must not be persisted.
#[must_use]
pub fn build_artifacts(
    layout: &InfraLayout,
    units: &[String],
) -> (ComposedArtifacts, Vec<Violation>) {
    let mut violations = Vec::new();

    let rules = collect_text_fragments(layout, units, ResourceClass::RulesPaths, &mut violations);
    let storage =
        collect_text_fragments(layout, units, ResourceClass::StoragePaths, &mut violations);

    let mut index_fragments = Vec::with_capacity(units.len());
    for unit in units {
        match IndexFragment::load(&layout.fragment_path(unit, ResourceClass::IndexGroups)) {
            Ok(fragment) => index_fragments.push(fragment),
            Err(violation) => violations.push(violation),
        }
    }

    let indexes = match compose_indexes(&index_fragments).render() {
        Ok(text) => text,
        Err(err) => {
            violations.push(Violation::Io {
                path: layout.artifact_path(Artifact::Indexes),
                message: err.to_string(),
            });
            String::new()
        },
    };

    let artifacts = ComposedArtifacts {
        firestore_rules: compose_rules(FIRESTORE_ENVELOPE, &rules),
        storage_rules: compose_rules(STORAGE_ENVELOPE, &storage),
        indexes,
    };
    (artifacts, violations)
}

/// Composes every unit under `layout` and writes or checks the artifacts.
///
/// Units are ordered with `preferred` first. When any fragment is missing or
/// invalid, all such problems are returned and no artifact is written or
/// checked.
#[must_use]
pub fn compose(layout: &InfraLayout, preferred: &[String], mode: OutputMode) -> Vec<Violation> {
    let names = match discover_units(layout) {
        Ok(names) => names,
        Err(violation) => return vec![violation],
    };
    let order = ordered_units(&names, preferred);
    tracing::debug!(units = ?order, ?mode, "composing artifacts");

    let (artifacts, violations) = build_artifacts(layout, &order);
    if !violations.is_empty() {
        tracing::warn!(
            violations = violations.len(),
            "composition incomplete, artifacts left untouched"
        );
        return violations;
    }

    let violations: Vec<Violation> = Artifact::ALL
        .into_iter()
        .filter_map(|artifact| {
            write_or_check(
                &layout.artifact_path(artifact),
                artifacts.content(artifact),
                mode,
            )
            .err()
        })
        .collect();

    tracing::info!(
        units = order.len(),
        ?mode,
        violations = violations.len(),
        "composition finished"
    );
    violations
}
