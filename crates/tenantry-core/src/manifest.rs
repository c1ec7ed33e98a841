//! Ownership manifests and unit discovery.
//!
//! Each unit directory carries an `ownership.yaml` written in a deliberately
//! small subset of YAML:
//!
//! ```yaml
//! # comment
//! app: swimify
//! rules_paths:
//!   - "/users/{userId}"
//! index_collection_groups:
//!   - users
//! storage_paths:
//! ```
//!
//! Only three line shapes are accepted: `key: value` (a scalar), `key:`
//! (opens a list) and `- item` (appends to the open list). Anything else is
//! a [`Violation::Parse`] naming the file and line.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Violation;
use crate::layout::{InfraLayout, ResourceClass};

/// Value bound to one manifest key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestValue {
    /// `key: value`
    Scalar(String),
    /// `key:` followed by `- item` lines.
    List(Vec<String>),
}

/// A manifest as written, before class keys are interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawManifest {
    entries: BTreeMap<String, ManifestValue>,
}

impl RawManifest {
    /// Returns the value bound to `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ManifestValue> {
        self.entries.get(key)
    }

    /// Returns the scalar bound to `key`, if any.
    #[must_use]
    pub fn scalar(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(ManifestValue::Scalar(value)) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum ParseState {
    TopLevel,
    InList(String),
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').trim_matches('\'').to_string()
}

/// Parses manifest text.
///
/// `path` is used only to locate errors.
///
/// # Errors
///
/// Returns [`Violation::Parse`] for a list item outside an open list, a
/// list opened on a key already bound to a scalar, or a line matching none of
/// the accepted shapes.
pub fn parse_manifest(path: &Path, text: &str) -> Result<RawManifest, Violation> {
    let mut manifest = RawManifest::default();
    let mut state = ParseState::TopLevel;

    let parse_error = |line: usize, message: String| Violation::Parse {
        path: path.to_path_buf(),
        line,
        message,
    };

    for (index, raw_line) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(item) = line.strip_prefix('-') {
            let ParseState::InList(key) = &state else {
                return Err(parse_error(
                    line_number,
                    "list item without list key".to_string(),
                ));
            };
            if let Some(ManifestValue::List(items)) = manifest.entries.get_mut(key) {
                items.push(unquote(item));
            }
            continue;
        }

        if let Some(key) = line.strip_suffix(':') {
            let key = key.trim().to_string();
            match manifest.entries.get(&key) {
                Some(ManifestValue::Scalar(_)) => {
                    return Err(parse_error(
                        line_number,
                        format!("key '{key}' already holds a scalar value"),
                    ));
                },
                Some(ManifestValue::List(_)) => {},
                None => {
                    manifest
                        .entries
                        .insert(key.clone(), ManifestValue::List(Vec::new()));
                },
            }
            state = ParseState::InList(key);
            continue;
        }

        if let Some((key, value)) = line.split_once(':') {
            manifest
                .entries
                .insert(key.trim().to_string(), ManifestValue::Scalar(unquote(value)));
            state = ParseState::TopLevel;
            continue;
        }

        return Err(parse_error(
            line_number,
            format!("unsupported syntax '{raw_line}'"),
        ));
    }

    Ok(manifest)
}

/// An interpreted ownership manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    app: String,
    members: BTreeMap<ResourceClass, Vec<String>>,
}

impl Manifest {
    /// Builds a manifest directly from declared members.
    #[must_use]
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            members: ResourceClass::ALL.iter().map(|c| (*c, Vec::new())).collect(),
        }
    }

    /// Adds declared members for one class.
    #[must_use]
    pub fn with_members<I, S>(mut self, class: ResourceClass, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members
            .entry(class)
            .or_default()
            .extend(members.into_iter().map(Into::into));
        self
    }

    /// Interprets a parsed manifest found in directory `directory`.
    ///
    /// Returns the manifest together with every problem found: class keys
    /// bound to a non-empty scalar (treated as empty) and an `app` value
    /// differing from the directory. A missing `app` defaults to
    /// `directory`; an `app` list never matches it.
    #[must_use]
    pub fn from_raw(raw: &RawManifest, directory: &str, path: &Path) -> (Self, Vec<Violation>) {
        let mut violations = Vec::new();
        let app = match raw.get("app") {
            Some(ManifestValue::Scalar(value)) => value.clone(),
            Some(ManifestValue::List(items)) => format!("[{}]", items.join(", ")),
            None => directory.to_string(),
        };

        let mut members = BTreeMap::new();
        for class in ResourceClass::ALL {
            let key = class.manifest_key();
            let declared = match raw.get(key) {
                Some(ManifestValue::List(items)) => items.clone(),
                Some(ManifestValue::Scalar(value)) if !value.is_empty() => {
                    violations.push(Violation::NotAList {
                        path: path.to_path_buf(),
                        key,
                    });
                    Vec::new()
                },
                Some(ManifestValue::Scalar(_)) | None => Vec::new(),
            };
            members.insert(class, declared);
        }

        if app != directory {
            violations.push(Violation::ManifestMismatch {
                path: path.to_path_buf(),
                declared: app.clone(),
                directory: directory.to_string(),
            });
        }

        (Self { app, members }, violations)
    }

    /// Unit name declared by the manifest.
    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Members declared for `class`, in manifest order.
    #[must_use]
    pub fn members(&self, class: ResourceClass) -> &[String] {
        self.members.get(&class).map_or(&[], Vec::as_slice)
    }
}

/// One discovered unit with its manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Directory name of the unit.
    pub name: String,
    /// Interpreted manifest.
    pub manifest: Manifest,
}

/// Lists unit directory names, sorted.
///
/// # Errors
///
/// Returns [`Violation::MissingUnitsDir`] when the units directory does not
/// exist and [`Violation::Io`] when it cannot be read.
pub fn discover_units(layout: &InfraLayout) -> Result<Vec<String>, Violation> {
    let units_dir = layout.units_dir();
    if !units_dir.is_dir() {
        return Err(Violation::MissingUnitsDir {
            path: units_dir.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(units_dir).map_err(|e| Violation::io(units_dir, &e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Violation::io(units_dir, &e))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Orders units for composition: `preferred` units first in their listed
/// order, the rest alphabetically.
#[must_use]
pub fn ordered_units(names: &[String], preferred: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(names.len());
    for name in preferred {
        if names.contains(name) && !ordered.contains(name) {
            ordered.push(name.clone());
        }
    }
    let mut remaining: Vec<String> = names
        .iter()
        .filter(|name| !preferred.contains(name))
        .cloned()
        .collect();
    remaining.sort();
    ordered.extend(remaining);
    ordered
}

/// Loads the manifest of every named unit.
///
/// Units whose manifest is missing or unparsable are reported and left out;
/// units with interpretation problems are reported and kept.
#[must_use]
pub fn load_manifests(layout: &InfraLayout, names: &[String]) -> (Vec<Unit>, Vec<Violation>) {
    let mut units = Vec::with_capacity(names.len());
    let mut violations = Vec::new();

    for name in names {
        let path = layout.manifest_path(name);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                violations.push(Violation::MissingFile {
                    what: "manifest",
                    path,
                });
                continue;
            },
            Err(err) => {
                violations.push(Violation::io(&path, &err));
                continue;
            },
        };

        let raw = match parse_manifest(&path, &text) {
            Ok(raw) => raw,
            Err(violation) => {
                violations.push(violation);
                continue;
            },
        };

        let (manifest, problems) = Manifest::from_raw(&raw, name, &path);
        tracing::debug!(
            unit = %name,
            rules = manifest.members(ResourceClass::RulesPaths).len(),
            index_groups = manifest.members(ResourceClass::IndexGroups).len(),
            storage = manifest.members(ResourceClass::StoragePaths).len(),
            "loaded manifest"
        );
        violations.extend(problems);
        units.push(Unit {
            name: name.clone(),
            manifest,
        });
    }

    (units, violations)
}
