//! Reading per-unit fragments.
//!
//! Rule fragments are opaque text except for the `match <path>` anchor that
//! opens a resource pathway. Index fragments are JSON objects shaped
//! `{"indexes": [...], "fieldOverrides": [...]}` with both arrays optional.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::Violation;
use crate::layout::ResourceClass;

static MATCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*match\s+(\S+)").expect("match anchor pattern is a valid regex")
});

/// Returns every path introduced by a `match` line in a rules fragment.
#[must_use]
pub fn match_paths(fragment: &str) -> BTreeSet<String> {
    fragment
        .lines()
        .filter_map(|line| MATCH_RE.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|path| path.as_str().trim().to_string())
        .collect()
}

/// Reads a fragment file as text.
///
/// # Errors
///
/// Returns [`Violation::MissingFile`] when the file is absent and
/// [`Violation::Io`] for any other read failure.
pub fn read_fragment(path: &Path, class: ResourceClass) -> Result<String, Violation> {
    std::fs::read_to_string(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            Violation::MissingFile {
                what: class.fragment_noun(),
                path: path.to_path_buf(),
            }
        } else {
            Violation::io(path, &err)
        }
    })
}

/// A parsed index fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexFragment {
    /// Composite index entries.
    pub indexes: Vec<Value>,
    /// Single-field override entries.
    pub field_overrides: Vec<Value>,
}

impl IndexFragment {
    /// Parses fragment text. `path` is used only to locate errors.
    ///
    /// # Errors
    ///
    /// Returns [`Violation::InvalidFragment`] when the text is not JSON, is
    /// not an object, or carries a non-array `indexes` or `fieldOverrides`.
    pub fn parse(path: &Path, text: &str) -> Result<Self, Violation> {
        let invalid = |message: String| Violation::InvalidFragment {
            path: path.to_path_buf(),
            message,
        };

        let payload: Value =
            serde_json::from_str(text).map_err(|e| invalid(format!("invalid JSON: {e}")))?;
        let Value::Object(mut object) = payload else {
            return Err(invalid("part file must be a JSON object".to_string()));
        };

        let mut take_array = |key: &str| -> Result<Vec<Value>, Violation> {
            match object.remove(key) {
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(Value::Array(items)) => Ok(items),
                Some(_) => Err(invalid(format!("'{key}' must be an array"))),
            }
        };

        Ok(Self {
            indexes: take_array("indexes")?,
            field_overrides: take_array("fieldOverrides")?,
        })
    }

    /// Reads and parses an index fragment file.
    ///
    /// # Errors
    ///
    /// Returns [`Violation::MissingFile`] when absent, otherwise see
    /// [`IndexFragment::parse`].
    pub fn load(path: &Path) -> Result<Self, Violation> {
        let text = read_fragment(path, ResourceClass::IndexGroups)?;
        Self::parse(path, &text)
    }

    /// Collection groups named by the index entries.
    ///
    /// Entries without a non-empty string `collectionGroup` are returned
    /// separately as violations.
    #[must_use]
    pub fn collection_groups(&self, path: &Path) -> (BTreeSet<String>, Vec<Violation>) {
        let mut groups = BTreeSet::new();
        let mut violations = Vec::new();
        for index in &self.indexes {
            let group = index
                .get("collectionGroup")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            if group.is_empty() {
                violations.push(Violation::InvalidFragment {
                    path: path.to_path_buf(),
                    message: "index missing non-empty collectionGroup".to_string(),
                });
            } else {
                groups.insert(group.to_string());
            }
        }
        (groups, violations)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;

    #[test]
    fn finds_nested_match_paths() {
        let fragment = "match /users/{userId} {\n  allow read: if true;\n  match /posts/{postId} {\n  }\n}\n// matches nothing\n";
        let paths = match_paths(fragment);
        assert_eq!(
            paths.into_iter().collect::<Vec<_>>(),
            vec!["/posts/{postId}", "/users/{userId}"]
        );
    }

    #[test]
    fn ignores_match_inside_line() {
        assert!(match_paths("allow read: if match /x;\n").is_empty());
        assert!(match_paths("matcher /x {\n").is_empty());
    }

    #[test]
    fn absent_arrays_default_to_empty() {
        let fragment = IndexFragment::parse(Path::new("p"), "{}").unwrap();
        assert_eq!(fragment, IndexFragment::default());
    }

    #[test]
    fn non_object_fragment_is_rejected() {
        let err = IndexFragment::parse(Path::new("p"), "[]").unwrap_err();
        assert_eq!(
            err.to_string(),
            "p: part file must be a JSON object"
        );
    }

    #[test]
    fn non_array_indexes_are_rejected() {
        let err = IndexFragment::parse(Path::new("p"), r#"{"indexes": {}}"#).unwrap_err();
        assert_eq!(err.to_string(), "p: 'indexes' must be an array");
    }

    #[test]
    fn collection_groups_report_blank_entries() {
        let fragment = IndexFragment {
            indexes: vec![
                json!({"collectionGroup": "users"}),
                json!({"collectionGroup": "  "}),
                json!({"fields": []}),
            ],
            field_overrides: vec![],
        };
        let (groups, violations) = fragment.collection_groups(Path::new("p"));
        assert_eq!(groups.into_iter().collect::<Vec<_>>(), vec!["users"]);
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn missing_fragment_is_reported() {
        let err = IndexFragment::load(Path::new("/nonexistent/part.json")).unwrap_err();
        assert_eq!(
            err,
            Violation::MissingFile {
                what: "indexes part",
                path: PathBuf::from("/nonexistent/part.json"),
            }
        );
    }
}
