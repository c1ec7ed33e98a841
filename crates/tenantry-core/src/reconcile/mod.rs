//! Remote index reconciliation.
//!
//! Converges the composite indexes of a remote database towards the desired
//! set in the composed index artifact. A run has two halves:
//!
//! 1. **Plan**: list every existing index page by page, normalise both sides
//!    to [`IndexIdentity`] and compute the `missing` and `extra` sets. Any
//!    listing failure aborts before anything is changed.
//! 2. **Apply**: create each missing index, then, only when allowed, delete
//!    each extra one. Calls are issued one at a time.
//!
//! Creation answered with `409` means the index appeared in the meantime; it
//! is counted as `already_exists`. Deletion answered with `404` means it was
//! already gone; it is counted as deleted. Any other non-success status stops
//! the run. Nothing is rolled back, so re-running is the recovery path.

mod api;
mod error;
mod mock;
mod token;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

pub use self::api::{ApiResponse, HttpIndexAdminApi, IndexAdminApi, IndexTarget};
pub use self::error::{Phase, ReconcileError};
pub use self::mock::{MockCall, MockIndexAdminApi};
pub use self::token::{
    CommandTokenSource, ConfiguredTokenSource, EnvTokenSource, StaticTokenSource, TokenSource,
};
use crate::config::DEFAULT_MAX_PAGES;
use crate::index::{IdentityAttributes, IndexIdentity};

const STATUS_CONFLICT: u16 = 409;
const STATUS_NOT_FOUND: u16 = 404;

/// The desired index set, keyed by identity.
#[derive(Debug, Clone, Default)]
pub struct DesiredIndexes {
    entries: BTreeMap<IndexIdentity, Value>,
}

impl DesiredIndexes {
    /// Builds the set from a parsed index artifact.
    ///
    /// Entries sharing an identity keep the first raw entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact is not an object, `indexes` is not an
    /// array, or an entry cannot be normalised.
    pub fn from_artifact(
        artifact: &Value,
        attributes: &IdentityAttributes,
    ) -> Result<Self, ReconcileError> {
        let malformed = |message: &str| ReconcileError::Desired {
            path: Path::new("<artifact>").to_path_buf(),
            message: message.to_string(),
        };
        let object = artifact
            .as_object()
            .ok_or_else(|| malformed("artifact must be a JSON object"))?;
        let raw_indexes: &[Value] = match object.get("indexes") {
            None | Some(Value::Null) => &[],
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => return Err(malformed("'indexes' must be an array")),
        };

        let mut entries = BTreeMap::new();
        for raw in raw_indexes {
            let identity = IndexIdentity::from_desired(raw, attributes).map_err(|source| {
                ReconcileError::Normalize {
                    origin: "desired",
                    source,
                }
            })?;
            entries.entry(identity).or_insert_with(|| raw.clone());
        }
        Ok(Self { entries })
    }

    /// Reads the artifact at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Desired`] when the file cannot be read or is
    /// malformed, and [`ReconcileError::Normalize`] for an invalid entry.
    pub fn load(path: &Path, attributes: &IdentityAttributes) -> Result<Self, ReconcileError> {
        let desired = |message: String| ReconcileError::Desired {
            path: path.to_path_buf(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| desired(e.to_string()))?;
        let artifact: Value = serde_json::from_str(&text).map_err(|e| desired(e.to_string()))?;
        Self::from_artifact(&artifact, attributes).map_err(|err| match err {
            ReconcileError::Desired { message, .. } => desired(message),
            other => other,
        })
    }

    /// Number of distinct identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no index is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `identity` is desired.
    #[must_use]
    pub fn contains(&self, identity: &IndexIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    /// Desired identities in identity order.
    pub fn identities(&self) -> impl Iterator<Item = &IndexIdentity> {
        self.entries.keys()
    }

    /// The first raw entry normalised to `identity`.
    #[must_use]
    pub fn raw(&self, identity: &IndexIdentity) -> Option<&Value> {
        self.entries.get(identity)
    }
}

/// Existing remote indexes: identity to resource name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingIndexes {
    entries: BTreeMap<IndexIdentity, String>,
}

impl ExistingIndexes {
    /// Records `name` for `identity` unless one is already recorded.
    pub fn insert_first(&mut self, identity: IndexIdentity, name: String) {
        self.entries.entry(identity).or_insert(name);
    }

    /// Number of distinct identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no index exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resource name recorded for `identity`.
    #[must_use]
    pub fn name(&self, identity: &IndexIdentity) -> Option<&str> {
        self.entries.get(identity).map(String::as_str)
    }

    /// `(identity, name)` pairs in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (&IndexIdentity, &str)> {
        self.entries.iter().map(|(id, name)| (id, name.as_str()))
    }
}

/// Lists every existing index, following the cursor until it is exhausted.
///
/// Records without a collection group or a name are skipped. When two
/// records share an identity the first one listed is kept.
///
/// # Errors
///
/// Returns [`ReconcileError::Api`] for a non-success page or one without a
/// JSON object body, [`ReconcileError::PageLimit`] when the cursor does not
/// end within `max_pages`, and any transport or normalisation error.
pub fn list_existing(
    api: &dyn IndexAdminApi,
    attributes: &IdentityAttributes,
    max_pages: u32,
) -> Result<ExistingIndexes, ReconcileError> {
    let mut existing = ExistingIndexes::default();
    let mut page_token: Option<String> = None;

    for page in 0..max_pages {
        let response = api.list_indexes(page_token.as_deref())?;
        let body = match &response.body {
            Some(Value::Object(body)) if response.is_success() => body,
            _ => {
                return Err(ReconcileError::Api {
                    phase: Phase::List,
                    status: response.status,
                    message: response.detail(),
                });
            },
        };

        let records = body.get("indexes").and_then(Value::as_array);
        for raw in records.into_iter().flatten() {
            let identity = IndexIdentity::from_existing(raw, attributes).map_err(|source| {
                ReconcileError::Normalize {
                    origin: "existing",
                    source,
                }
            })?;
            let name = raw.get("name").and_then(Value::as_str).unwrap_or_default();
            if identity.collection_group.is_empty() || name.is_empty() {
                tracing::debug!(record = %raw, "skipping listed index without group or name");
                continue;
            }
            existing.insert_first(identity, name.to_string());
        }
        tracing::debug!(page, existing = existing.len(), "listed index page");

        match body.get("nextPageToken").and_then(Value::as_str) {
            Some(token) if !token.is_empty() => page_token = Some(token.to_string()),
            _ => return Ok(existing),
        }
    }

    Err(ReconcileError::PageLimit { max_pages })
}

/// An existing index absent from the desired set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraIndex {
    /// Its identity.
    pub identity: IndexIdentity,
    /// Its resource name.
    pub name: String,
}

/// Differences between desired and existing indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Number of desired identities.
    pub desired: usize,
    /// Number of existing identities.
    pub existing: usize,
    /// Desired but not existing, in identity order.
    pub missing: Vec<IndexIdentity>,
    /// Existing but not desired, in identity order.
    pub extra: Vec<ExtraIndex>,
}

impl ReconcilePlan {
    /// Computes the set differences.
    #[must_use]
    pub fn between(desired: &DesiredIndexes, existing: &ExistingIndexes) -> Self {
        let missing = desired
            .identities()
            .filter(|identity| existing.name(identity).is_none())
            .cloned()
            .collect();
        let extra = existing
            .iter()
            .filter(|(identity, _)| !desired.contains(identity))
            .map(|(identity, name)| ExtraIndex {
                identity: identity.clone(),
                name: name.to_string(),
            })
            .collect();
        Self {
            desired: desired.len(),
            existing: existing.len(),
            missing,
            extra,
        }
    }

    /// Whether nothing needs to change.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// Outcome counts of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Desired identities.
    pub desired: usize,
    /// Existing identities before the run.
    pub existing: usize,
    /// Identities to create.
    pub missing: usize,
    /// Identities not desired.
    pub extra: usize,
    /// Indexes created.
    pub created: usize,
    /// Creations answered with a conflict.
    pub already_exists: usize,
    /// Indexes deleted or already gone.
    pub deleted: usize,
}

impl From<&ReconcilePlan> for ReconcileReport {
    fn from(plan: &ReconcilePlan) -> Self {
        Self {
            desired: plan.desired,
            existing: plan.existing,
            missing: plan.missing.len(),
            extra: plan.extra.len(),
            ..Self::default()
        }
    }
}

/// Reconciliation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Delete existing indexes that are not desired.
    pub allow_delete: bool,
    /// Upper bound on listing pages.
    pub max_pages: u32,
    /// Field attributes that take part in identity.
    pub attributes: IdentityAttributes,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            allow_delete: false,
            max_pages: DEFAULT_MAX_PAGES,
            attributes: IdentityAttributes::default(),
        }
    }
}

/// Drives one reconciliation against an [`IndexAdminApi`].
pub struct Reconciler<'a> {
    api: &'a dyn IndexAdminApi,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(api: &'a dyn IndexAdminApi, options: ReconcileOptions) -> Self {
        Self { api, options }
    }

    /// Settings in use.
    #[must_use]
    pub const fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Lists existing indexes and diffs them against `desired`.
    ///
    /// # Errors
    ///
    /// See [`list_existing`].
    pub fn plan(&self, desired: &DesiredIndexes) -> Result<ReconcilePlan, ReconcileError> {
        let existing = list_existing(self.api, &self.options.attributes, self.options.max_pages)?;
        let plan = ReconcilePlan::between(desired, &existing);
        tracing::info!(
            desired = plan.desired,
            existing = plan.existing,
            missing = plan.missing.len(),
            extra = plan.extra.len(),
            "index plan computed"
        );
        Ok(plan)
    }

    /// Creates missing indexes and, when allowed, deletes extra ones.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Api`] for the first fatal response; calls
    /// already made are not undone.
    pub fn apply(&self, plan: &ReconcilePlan) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::from(plan);

        for identity in &plan.missing {
            let response = self
                .api
                .create_index(&identity.collection_group, &identity.to_create_body())?;
            match response.status {
                200 | 201 => {
                    tracing::debug!(index = %identity, "index created");
                    report.created += 1;
                },
                STATUS_CONFLICT => {
                    tracing::warn!(index = %identity, "index already exists");
                    report.already_exists += 1;
                },
                status => {
                    return Err(ReconcileError::Api {
                        phase: Phase::Create,
                        status,
                        message: format!("{identity}: {}", response.detail()),
                    });
                },
            }
        }

        if self.options.allow_delete {
            for extra in &plan.extra {
                let response = self.api.delete_index(&extra.name)?;
                match response.status {
                    200 | 204 => {
                        tracing::debug!(name = %extra.name, "index deleted");
                        report.deleted += 1;
                    },
                    STATUS_NOT_FOUND => {
                        tracing::warn!(name = %extra.name, "index already gone");
                        report.deleted += 1;
                    },
                    status => {
                        return Err(ReconcileError::Api {
                            phase: Phase::Delete,
                            status,
                            message: format!("{}: {}", extra.name, response.detail()),
                        });
                    },
                }
            }
        } else if !plan.extra.is_empty() {
            tracing::info!(
                extra = plan.extra.len(),
                "leaving undesired indexes in place, deletion not allowed"
            );
        }

        tracing::info!(
            created = report.created,
            already_exists = report.already_exists,
            deleted = report.deleted,
            "index sync applied"
        );
        Ok(report)
    }

    /// Plans and applies in one go.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::plan`] and [`Reconciler::apply`].
    pub fn run(&self, desired: &DesiredIndexes) -> Result<ReconcileReport, ReconcileError> {
        let plan = self.plan(desired)?;
        self.apply(&plan)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn index(group: &str, field: &str) -> Value {
        json!({
            "collectionGroup": group,
            "queryScope": "COLLECTION",
            "fields": [{"fieldPath": field, "order": "ASCENDING"}]
        })
    }

    fn create_body(field: &str) -> Value {
        json!({"queryScope": "COLLECTION", "fields": [{"fieldPath": field, "order": "ASCENDING"}]})
    }

    fn desired_of(entries: &[Value]) -> DesiredIndexes {
        DesiredIndexes::from_artifact(
            &json!({ "indexes": entries, "fieldOverrides": [] }),
            &IdentityAttributes::default(),
        )
        .unwrap()
    }

    fn options(allow_delete: bool) -> ReconcileOptions {
        ReconcileOptions {
            allow_delete,
            ..ReconcileOptions::default()
        }
    }

    #[test]
    fn converges_missing_and_extra() {
        let api = MockIndexAdminApi::new("p");
        api.seed("users", &create_body("b"));
        let c_name = api.seed("users", &create_body("c"));

        let desired = desired_of(&[index("users", "a"), index("users", "b")]);
        let reconciler = Reconciler::new(&api, options(true));

        let plan = reconciler.plan(&desired).unwrap();
        assert_eq!(plan.missing.len(), 1);
        assert_eq!(plan.missing[0].fields[0].field_path, "a");
        assert_eq!(plan.extra.len(), 1);
        assert_eq!(plan.extra[0].name, c_name);

        let report = reconciler.apply(&plan).unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                desired: 2,
                existing: 2,
                missing: 1,
                extra: 1,
                created: 1,
                already_exists: 0,
                deleted: 1,
            }
        );

        let after = reconciler.plan(&desired).unwrap();
        assert!(after.is_converged());
        assert_eq!(after.existing, 2);
    }

    #[test]
    fn extra_indexes_survive_without_permission() {
        let api = MockIndexAdminApi::new("p");
        api.seed("users", &create_body("c"));

        let report = Reconciler::new(&api, options(false))
            .run(&desired_of(&[]))
            .unwrap();
        assert_eq!(report.extra, 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(api.records().len(), 1);
        assert!(
            !api.calls()
                .iter()
                .any(|call| matches!(call, MockCall::Delete { .. }))
        );
    }

    #[test]
    fn conflict_counts_and_continues() {
        let api = MockIndexAdminApi::new("p");
        api.script_create(409);

        let desired = desired_of(&[index("users", "a"), index("users", "b")]);
        let report = Reconciler::new(&api, options(false)).run(&desired).unwrap();
        assert_eq!(report.already_exists, 1);
        assert_eq!(report.created, 1);
    }

    #[test]
    fn fatal_creation_stops_remaining_calls() {
        let api = MockIndexAdminApi::new("p");
        api.script_create(400);

        let desired = desired_of(&[index("users", "a"), index("users", "b")]);
        let err = Reconciler::new(&api, options(true)).run(&desired).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Api {
                phase: Phase::Create,
                status: 400,
                ..
            }
        ));
        let creates = api
            .calls()
            .into_iter()
            .filter(|call| matches!(call, MockCall::Create { .. }))
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn listing_failure_aborts_before_mutation() {
        let api = MockIndexAdminApi::new("p").with_page_size(1);
        api.seed("users", &create_body("x"));
        api.seed("users", &create_body("y"));
        api.fail_list_page(1, 503);

        let err = Reconciler::new(&api, options(true))
            .run(&desired_of(&[index("users", "a")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Api {
                phase: Phase::List,
                status: 503,
                ..
            }
        ));
        assert!(
            api.calls()
                .iter()
                .all(|call| matches!(call, MockCall::List { .. }))
        );
    }

    #[test]
    fn already_gone_counts_as_deleted() {
        let api = MockIndexAdminApi::new("p");
        api.seed("users", &create_body("c"));
        api.script_delete(404);

        let report = Reconciler::new(&api, options(true))
            .run(&desired_of(&[]))
            .unwrap();
        assert_eq!(report.deleted, 1);
    }

    #[test]
    fn fatal_deletion_is_reported() {
        let api = MockIndexAdminApi::new("p");
        api.seed("users", &create_body("c"));
        api.script_delete(403);

        let err = Reconciler::new(&api, options(true))
            .run(&desired_of(&[]))
            .unwrap_err();
        assert!(err.to_string().starts_with("delete index failed (HTTP 403): projects/p/"));
    }

    #[test]
    fn duplicate_listing_keeps_first_name() {
        let api = MockIndexAdminApi::new("p").with_page_size(1);
        let first = api.seed("users", &create_body("a"));
        api.seed("users", &create_body("a"));

        let existing =
            list_existing(&api, &IdentityAttributes::default(), DEFAULT_MAX_PAGES).unwrap();
        assert_eq!(existing.len(), 1);
        assert_eq!(existing.iter().next().unwrap().1, first);
    }

    #[test]
    fn unusable_records_are_skipped() {
        let api = MockIndexAdminApi::new("p");
        api.seed_raw(json!({"collectionGroup": "users", "fields": []}));
        api.seed_raw(json!({"name": "projects/p/databases/(default)/indexes/x", "fields": []}));

        let existing =
            list_existing(&api, &IdentityAttributes::default(), DEFAULT_MAX_PAGES).unwrap();
        assert!(existing.is_empty());
    }

    #[test]
    fn endless_cursor_hits_page_limit() {
        let api = MockIndexAdminApi::new("p").with_endless_cursor();
        let err = list_existing(&api, &IdentityAttributes::default(), 3).unwrap_err();
        assert!(matches!(err, ReconcileError::PageLimit { max_pages: 3 }));
        assert_eq!(api.calls().len(), 3);
    }

    #[test]
    fn desired_duplicates_keep_first_raw_entry() {
        let first = json!({"collectionGroup": "users", "fields": [{"fieldPath": "a"}], "note": 1});
        let second = json!({"collectionGroup": "users", "fields": [{"fieldPath": "a"}], "note": 2});
        let desired = desired_of(&[first.clone(), second]);
        assert_eq!(desired.len(), 1);
        let identity = desired.identities().next().unwrap().clone();
        assert_eq!(desired.raw(&identity), Some(&first));
    }

    #[test]
    fn desired_artifact_shape_is_checked() {
        let attrs = IdentityAttributes::default();
        assert!(matches!(
            DesiredIndexes::from_artifact(&json!([]), &attrs),
            Err(ReconcileError::Desired { .. })
        ));
        assert!(matches!(
            DesiredIndexes::from_artifact(&json!({"indexes": [{"fields": []}]}), &attrs),
            Err(ReconcileError::Normalize { origin: "desired", .. })
        ));
        assert!(
            DesiredIndexes::from_artifact(&json!({}), &attrs)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firestore.indexes.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = DesiredIndexes::load(&path, &IdentityAttributes::default()).unwrap_err();
        match err {
            ReconcileError::Desired { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected {other:?}"),
        }
    }
}
