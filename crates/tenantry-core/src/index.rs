//! Index identity normalisation.
//!
//! A composite index can be written many ways: keys in any order, default
//! query scope and density omitted or spelled out, remote records carrying a
//! resource name instead of a collection group. [`IndexIdentity`] reduces all
//! of them to one comparable key, and is the only place that decides whether
//! two index definitions describe the same remote resource.
//!
//! The identity consists of:
//!
//! - collection group
//! - query scope (default [`DEFAULT_QUERY_SCOPE`])
//! - ordered fields, each a field path plus the identity attributes it
//!   carries (see [`IdentityAttributes`])
//! - density (default [`DEFAULT_DENSITY`])
//!
//! Attribute values are compared by canonical serialisation, so nested
//! configuration objects are equal regardless of their key order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::canonical::canonical_string;

/// Query scope applied when a record omits one.
pub const DEFAULT_QUERY_SCOPE: &str = "COLLECTION";

/// Density applied when a record omits one.
pub const DEFAULT_DENSITY: &str = "SPARSE_ALL";

/// Per-field attributes that distinguish one index from another by default.
pub const DEFAULT_IDENTITY_ATTRIBUTES: [&str; 3] = ["order", "arrayConfig", "vectorConfig"];

const NAME_GROUP_MARKER: &str = "/collectionGroups/";
const NAME_INDEX_MARKER: &str = "/indexes/";

/// A raw index record that cannot be normalised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum NormalizeError {
    /// The record is not a JSON object.
    #[error("index record is not a JSON object")]
    NotAnObject,

    /// A desired record has no usable collection group.
    #[error("index record missing non-empty collectionGroup")]
    MissingCollectionGroup,

    /// A scalar attribute has a non-string value.
    #[error("index attribute '{key}' must be a string")]
    NotAString {
        /// Offending attribute.
        key: &'static str,
    },

    /// `fields` is present but not an array.
    #[error("index attribute 'fields' must be an array")]
    FieldsNotArray,

    /// A field entry is not an object.
    #[error("index field {position} is not a JSON object")]
    FieldNotObject {
        /// Zero-based position in `fields`.
        position: usize,
    },

    /// A field entry has no string `fieldPath`.
    #[error("index field {position} missing string fieldPath")]
    MissingFieldPath {
        /// Zero-based position in `fields`.
        position: usize,
    },
}

/// Field attributes that take part in identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityAttributes(BTreeSet<String>);

impl IdentityAttributes {
    /// Whether `key` takes part in identity.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }
}

impl Default for IdentityAttributes {
    fn default() -> Self {
        DEFAULT_IDENTITY_ATTRIBUTES.into_iter().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for IdentityAttributes {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// A JSON value compared by its canonical form.
#[derive(Debug, Clone)]
pub struct CanonicalValue {
    text: String,
    value: Value,
}

impl CanonicalValue {
    /// Wraps `value`.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            text: canonical_string(&value),
            value,
        }
    }

    /// The wrapped value as authored.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Canonical serialisation.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.text
    }
}

impl PartialEq for CanonicalValue {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for CanonicalValue {}

impl PartialOrd for CanonicalValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CanonicalValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text.cmp(&other.text)
    }
}

impl Hash for CanonicalValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

/// One indexed field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldIdentity {
    /// Indexed field path.
    pub field_path: String,
    /// Identity attributes present on the field, keyed by name.
    pub attributes: BTreeMap<String, CanonicalValue>,
}

impl FieldIdentity {
    fn from_raw(
        position: usize,
        raw: &Value,
        attributes: &IdentityAttributes,
    ) -> Result<Self, NormalizeError> {
        let Value::Object(object) = raw else {
            return Err(NormalizeError::FieldNotObject { position });
        };
        let field_path = object
            .get("fieldPath")
            .and_then(Value::as_str)
            .ok_or(NormalizeError::MissingFieldPath { position })?
            .to_string();
        let attributes = object
            .iter()
            .filter(|(key, _)| attributes.contains(key))
            .map(|(key, value)| (key.clone(), CanonicalValue::new(value.clone())))
            .collect();
        Ok(Self {
            field_path,
            attributes,
        })
    }

    fn to_value(&self) -> Value {
        let mut entries: BTreeMap<&str, Value> = self
            .attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.value().clone()))
            .collect();
        entries.insert("fieldPath", Value::String(self.field_path.clone()));

        let object: Map<String, Value> = entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        Value::Object(object)
    }
}

/// Normalised identity of a composite index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexIdentity {
    /// Collection group the index belongs to.
    pub collection_group: String,
    /// Query scope.
    pub query_scope: String,
    /// Indexed fields, in index order.
    pub fields: Vec<FieldIdentity>,
    /// Density; may be empty for remote records that spell it out empty.
    pub density: String,
}

fn string_or_default(
    object: &Map<String, Value>,
    key: &'static str,
    default: &str,
) -> Result<String, NormalizeError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(NormalizeError::NotAString { key }),
    }
}

/// Collection group encoded in a remote resource name
/// (`…/collectionGroups/<group>/indexes/<id>`).
#[must_use]
pub fn group_from_name(name: &str) -> Option<&str> {
    let (_, rest) = name.split_once(NAME_GROUP_MARKER)?;
    let group = rest
        .split_once(NAME_INDEX_MARKER)
        .map_or(rest, |(group, _)| group);
    Some(group)
}

impl IndexIdentity {
    fn from_object(
        object: &Map<String, Value>,
        collection_group: String,
        attributes: &IdentityAttributes,
    ) -> Result<Self, NormalizeError> {
        let fields = match object.get("fields") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(position, raw)| FieldIdentity::from_raw(position, raw, attributes))
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(NormalizeError::FieldsNotArray),
        };

        Ok(Self {
            collection_group,
            query_scope: string_or_default(object, "queryScope", DEFAULT_QUERY_SCOPE)?,
            fields,
            density: string_or_default(object, "density", DEFAULT_DENSITY)?,
        })
    }

    /// Normalises an entry of the desired index artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is not an object, has no non-empty
    /// `collectionGroup`, or has malformed scope, density or fields.
    pub fn from_desired(
        raw: &Value,
        attributes: &IdentityAttributes,
    ) -> Result<Self, NormalizeError> {
        let Value::Object(object) = raw else {
            return Err(NormalizeError::NotAnObject);
        };
        let group = object
            .get("collectionGroup")
            .and_then(Value::as_str)
            .filter(|group| !group.is_empty())
            .ok_or(NormalizeError::MissingCollectionGroup)?;
        Self::from_object(object, group.to_string(), attributes)
    }

    /// Normalises a record returned by the remote listing.
    ///
    /// The collection group comes from a `collectionGroup` field when present
    /// and otherwise from the resource `name`. It is left empty when neither
    /// yields one; callers skip such records.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is not an object or has malformed
    /// scope, density or fields.
    pub fn from_existing(
        raw: &Value,
        attributes: &IdentityAttributes,
    ) -> Result<Self, NormalizeError> {
        let Value::Object(object) = raw else {
            return Err(NormalizeError::NotAnObject);
        };
        let group = object
            .get("collectionGroup")
            .and_then(Value::as_str)
            .filter(|group| !group.is_empty())
            .or_else(|| {
                object
                    .get("name")
                    .and_then(Value::as_str)
                    .and_then(group_from_name)
            })
            .unwrap_or_default();
        Self::from_object(object, group.to_string(), attributes)
    }

    /// Request body that creates this index under its collection group.
    #[must_use]
    pub fn to_create_body(&self) -> Value {
        let mut body = Map::new();
        body.insert(
            "queryScope".to_string(),
            Value::String(self.query_scope.clone()),
        );
        body.insert(
            "fields".to_string(),
            Value::Array(self.fields.iter().map(FieldIdentity::to_value).collect()),
        );
        if !self.density.is_empty() {
            body.insert("density".to_string(), Value::String(self.density.clone()));
        }
        Value::Object(body)
    }
}

impl fmt::Display for IndexIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] (", self.collection_group, self.query_scope)?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&field.field_path)?;
            for value in field.attributes.values() {
                write!(f, " {}", value.canonical())?;
            }
        }
        write!(f, ") {}", self.density)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn desired(raw: &Value) -> IndexIdentity {
        IndexIdentity::from_desired(raw, &IdentityAttributes::default()).unwrap()
    }

    #[test]
    fn defaults_equal_explicit_values() {
        let implicit = desired(&json!({
            "collectionGroup": "sessions",
            "fields": [{"fieldPath": "start", "order": "ASCENDING"}]
        }));
        let explicit = desired(&json!({
            "collectionGroup": "sessions",
            "queryScope": "COLLECTION",
            "density": "SPARSE_ALL",
            "fields": [{"order": "ASCENDING", "fieldPath": "start"}]
        }));
        assert_eq!(implicit, explicit);
    }

    #[test]
    fn field_order_matters() {
        let ab = desired(&json!({
            "collectionGroup": "g",
            "fields": [{"fieldPath": "a"}, {"fieldPath": "b"}]
        }));
        let ba = desired(&json!({
            "collectionGroup": "g",
            "fields": [{"fieldPath": "b"}, {"fieldPath": "a"}]
        }));
        assert_ne!(ab, ba);
    }

    #[test]
    fn non_identity_attributes_are_ignored() {
        let plain = desired(&json!({"collectionGroup": "g", "fields": [{"fieldPath": "a"}]}));
        let noisy = desired(&json!({
            "collectionGroup": "g",
            "state": "READY",
            "fields": [{"fieldPath": "a", "note": "ignored"}]
        }));
        assert_eq!(plain, noisy);
    }

    #[test]
    fn configured_attributes_narrow_identity() {
        let only_path: IdentityAttributes = std::iter::empty::<String>().collect();
        let asc = IndexIdentity::from_desired(
            &json!({"collectionGroup": "g", "fields": [{"fieldPath": "a", "order": "ASCENDING"}]}),
            &only_path,
        )
        .unwrap();
        let desc = IndexIdentity::from_desired(
            &json!({"collectionGroup": "g", "fields": [{"fieldPath": "a", "order": "DESCENDING"}]}),
            &only_path,
        )
        .unwrap();
        assert_eq!(asc, desc);
    }

    #[test]
    fn nested_attribute_key_order_is_irrelevant() {
        let a = desired(&serde_json::from_str::<Value>(
            r#"{"collectionGroup":"g","fields":[{"fieldPath":"v","vectorConfig":{"dimension":3,"flat":{}}}]}"#,
        )
        .unwrap());
        let b = desired(&serde_json::from_str::<Value>(
            r#"{"collectionGroup":"g","fields":[{"vectorConfig":{"flat":{},"dimension":3},"fieldPath":"v"}]}"#,
        )
        .unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn existing_group_comes_from_name() {
        let raw = json!({
            "name": "projects/p/databases/(default)/collectionGroups/users/indexes/CICAgJim14AK",
            "queryScope": "COLLECTION",
            "fields": [{"fieldPath": "age", "order": "ASCENDING"}, {"fieldPath": "__name__", "order": "ASCENDING"}],
            "state": "READY"
        });
        let identity = IndexIdentity::from_existing(&raw, &IdentityAttributes::default()).unwrap();
        assert_eq!(identity.collection_group, "users");
        assert_eq!(identity.density, DEFAULT_DENSITY);
    }

    #[test]
    fn existing_without_group_is_left_empty() {
        let identity =
            IndexIdentity::from_existing(&json!({"fields": []}), &IdentityAttributes::default())
                .unwrap();
        assert!(identity.collection_group.is_empty());
    }

    #[test]
    fn group_from_name_variants() {
        assert_eq!(group_from_name("a/collectionGroups/x/indexes/1"), Some("x"));
        assert_eq!(group_from_name("a/collectionGroups/x"), Some("x"));
        assert_eq!(group_from_name("a/indexes/1"), None);
    }

    #[test]
    fn desired_requires_group() {
        let err = IndexIdentity::from_desired(&json!({"fields": []}), &IdentityAttributes::default())
            .unwrap_err();
        assert_eq!(err, NormalizeError::MissingCollectionGroup);
    }

    #[test]
    fn malformed_fields_are_rejected() {
        let attrs = IdentityAttributes::default();
        assert_eq!(
            IndexIdentity::from_desired(&json!({"collectionGroup": "g", "fields": [1]}), &attrs)
                .unwrap_err(),
            NormalizeError::FieldNotObject { position: 0 }
        );
        assert_eq!(
            IndexIdentity::from_desired(
                &json!({"collectionGroup": "g", "fields": [{"fieldPath": "a"}, {"order": "ASCENDING"}]}),
                &attrs
            )
            .unwrap_err(),
            NormalizeError::MissingFieldPath { position: 1 }
        );
        assert_eq!(
            IndexIdentity::from_desired(&json!({"collectionGroup": "g", "queryScope": 3}), &attrs)
                .unwrap_err(),
            NormalizeError::NotAString { key: "queryScope" }
        );
    }

    #[test]
    fn create_body_shape() {
        let identity = desired(&json!({
            "collectionGroup": "users",
            "fields": [{"order": "DESCENDING", "fieldPath": "age"}]
        }));
        assert_eq!(
            identity.to_create_body().to_string(),
            r#"{"queryScope":"COLLECTION","fields":[{"fieldPath":"age","order":"DESCENDING"}],"density":"SPARSE_ALL"}"#
        );

        let mut no_density = identity;
        no_density.density.clear();
        assert!(no_density.to_create_body().get("density").is_none());
    }

    #[test]
    fn display_is_readable() {
        let identity = desired(&json!({
            "collectionGroup": "users",
            "fields": [{"fieldPath": "age", "order": "ASCENDING"}]
        }));
        assert_eq!(
            identity.to_string(),
            "users [COLLECTION] (age \"ASCENDING\") SPARSE_ALL"
        );
    }

    fn build_record(group: &str, fields: &[(String, String)], reversed: bool) -> Value {
        let field_values: Vec<Value> = fields
            .iter()
            .map(|(path, order)| {
                let mut field = Map::new();
                if reversed {
                    field.insert("order".to_string(), json!(order));
                    field.insert("fieldPath".to_string(), json!(path));
                } else {
                    field.insert("fieldPath".to_string(), json!(path));
                    field.insert("order".to_string(), json!(order));
                }
                Value::Object(field)
            })
            .collect();

        let mut record = Map::new();
        if reversed {
            record.insert("fields".to_string(), Value::Array(field_values));
            record.insert("queryScope".to_string(), json!("COLLECTION"));
            record.insert("collectionGroup".to_string(), json!(group));
        } else {
            record.insert("collectionGroup".to_string(), json!(group));
            record.insert("queryScope".to_string(), json!("COLLECTION"));
            record.insert("fields".to_string(), Value::Array(field_values));
        }
        Value::Object(record)
    }

    proptest! {
        #[test]
        fn identity_ignores_key_order(
            group in "[a-z]{1,8}",
            fields in prop::collection::vec(
                (
                    "[a-zA-Z_.]{1,10}",
                    prop::sample::select(vec!["ASCENDING".to_string(), "DESCENDING".to_string()]),
                ),
                0..5,
            ),
        ) {
            let forward = desired(&build_record(&group, &fields, false));
            let backward = desired(&build_record(&group, &fields, true));
            prop_assert_eq!(&forward, &backward);
            prop_assert_eq!(forward.to_create_body(), backward.to_create_body());
        }
    }
}
