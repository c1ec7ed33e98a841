//! CLI command for composite index synchronisation.
//!
//! `tenantry sync-indexes --project-id <id> [--indexes-file <path>]
//! [--allow-delete] [--json]`
//!
//! Lists the project's composite indexes, creates the ones the index artifact
//! wants and, with `--allow-delete`, deletes the ones it does not. Useful when
//! a bulk deploy of the artifact aborts on an index that already exists.
//!
//! # Exit Codes
//!
//! - 0: Indexes converged
//! - 1: Sync failed; the error is printed to stderr

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;
use tenantry_core::index::IdentityAttributes;
use tenantry_core::layout::Artifact;
use tenantry_core::reconcile::{
    ConfiguredTokenSource, DesiredIndexes, HttpIndexAdminApi, IndexAdminApi, IndexTarget,
    ReconcileOptions, ReconcileReport, Reconciler, TokenSource,
};

use super::Context;

/// Exit codes for `sync-indexes`.
pub mod exit_codes {
    /// Indexes converged.
    pub const SUCCESS: u8 = 0;
    /// Sync failed.
    pub const ERROR: u8 = 1;
}

/// Arguments of `sync-indexes`.
#[derive(Debug, Clone, Args)]
pub struct SyncIndexesArgs {
    /// Project whose indexes are synced; also billed for quota
    #[arg(long)]
    pub project_id: String,

    /// Desired index artifact (default: generated index artifact under the
    /// root)
    #[arg(long)]
    pub indexes_file: Option<PathBuf>,

    /// Delete existing indexes that are not in the artifact
    #[arg(long)]
    pub allow_delete: bool,

    /// Print the final report as JSON instead of summary lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct SyncOutput<'a> {
    project_id: &'a str,
    #[serde(flatten)]
    report: ReconcileReport,
}

/// Plans, prints the plan summary, applies, and prints the outcome.
pub fn reconcile_and_report(
    api: &dyn IndexAdminApi,
    desired: &DesiredIndexes,
    options: ReconcileOptions,
    project_id: &str,
    json: bool,
    out: &mut dyn Write,
) -> Result<ReconcileReport> {
    let reconciler = Reconciler::new(api, options);

    let plan = reconciler.plan(desired)?;
    if !json {
        writeln!(
            out,
            "Index sync for {project_id}: desired={} existing={} missing={} extra={}",
            plan.desired,
            plan.existing,
            plan.missing.len(),
            plan.extra.len()
        )?;
    }

    let report = reconciler.apply(&plan)?;
    if json {
        let output = SyncOutput { project_id, report };
        serde_json::to_writer_pretty(&mut *out, &output)?;
        writeln!(out)?;
    } else {
        writeln!(
            out,
            "Index sync complete: created={} already_exists={} deleted={}",
            report.created, report.already_exists, report.deleted
        )?;
    }
    Ok(report)
}

fn sync_indexes(context: &Context, args: &SyncIndexesArgs) -> Result<ReconcileReport> {
    let sync = &context.config.sync;
    let attributes: IdentityAttributes = sync.identity_attributes.iter().cloned().collect();

    let path = args
        .indexes_file
        .clone()
        .unwrap_or_else(|| context.layout.artifact_path(Artifact::Indexes));
    let desired = DesiredIndexes::load(&path, &attributes)?;
    tracing::debug!(path = %path.display(), desired = desired.len(), "loaded desired indexes");

    let source = ConfiguredTokenSource::from_config(sync)?;
    tracing::debug!(source = source.name(), "acquiring access token");
    let token = source.token().context("cannot authenticate index sync")?;

    let target = IndexTarget {
        api_base_url: sync.api_base_url.clone(),
        project_id: args.project_id.clone(),
        database: sync.database.clone(),
    };
    let api = HttpIndexAdminApi::new(target, token, Duration::from_secs(sync.timeout_secs))?;

    let options = ReconcileOptions {
        allow_delete: args.allow_delete,
        max_pages: sync.max_pages,
        attributes,
    };
    reconcile_and_report(
        &api,
        &desired,
        options,
        &args.project_id,
        args.json,
        &mut std::io::stdout().lock(),
    )
}

/// Runs `sync-indexes`.
pub fn run_sync_indexes(context: &Context, args: &SyncIndexesArgs) -> u8 {
    match sync_indexes(context, args) {
        Ok(_) => exit_codes::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            exit_codes::ERROR
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tenantry_core::reconcile::MockIndexAdminApi;

    use super::*;

    fn desired() -> DesiredIndexes {
        DesiredIndexes::from_artifact(
            &json!({"indexes": [
                {
                    "collectionGroup": "users",
                    "queryScope": "COLLECTION",
                    "fields": [{"fieldPath": "a", "order": "ASCENDING"}]
                },
                {
                    "collectionGroup": "users",
                    "queryScope": "COLLECTION",
                    "fields": [{"fieldPath": "b", "order": "ASCENDING"}]
                }
            ]}),
            &IdentityAttributes::default(),
        )
        .unwrap()
    }

    fn seeded() -> MockIndexAdminApi {
        let api = MockIndexAdminApi::new("demo");
        for field in ["b", "c"] {
            api.seed(
                "users",
                &json!({
                    "queryScope": "COLLECTION",
                    "fields": [{"fieldPath": field, "order": "ASCENDING"}]
                }),
            );
        }
        api
    }

    #[test]
    fn prints_plan_and_outcome_lines() {
        let api = seeded();
        let mut out = Vec::new();
        let options = ReconcileOptions {
            allow_delete: true,
            ..ReconcileOptions::default()
        };
        reconcile_and_report(&api, &desired(), options, "demo", false, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Index sync for demo: desired=2 existing=2 missing=1 extra=1\n\
             Index sync complete: created=1 already_exists=0 deleted=1\n"
        );
    }

    #[test]
    fn json_report_is_a_single_object() {
        let api = seeded();
        let mut out = Vec::new();
        reconcile_and_report(
            &api,
            &desired(),
            ReconcileOptions::default(),
            "demo",
            true,
            &mut out,
        )
        .unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["project_id"], "demo");
        assert_eq!(value["created"], 1);
        assert_eq!(value["deleted"], 0);
        assert_eq!(value["extra"], 1);
    }

    #[test]
    fn listing_failure_prints_nothing() {
        let api = MockIndexAdminApi::new("demo");
        api.fail_list_page(0, 403);
        let mut out = Vec::new();
        let err = reconcile_and_report(
            &api,
            &desired(),
            ReconcileOptions::default(),
            "demo",
            false,
            &mut out,
        )
        .unwrap_err();
        assert!(err.to_string().contains("HTTP 403"));
        assert!(out.is_empty());
    }

    #[test]
    fn missing_artifact_fails_before_authentication() {
        let dir = tempfile::tempdir().unwrap();
        let context = Context::load(dir.path(), None).unwrap();
        let args = SyncIndexesArgs {
            project_id: "demo".to_string(),
            indexes_file: None,
            allow_delete: false,
            json: false,
        };
        let err = sync_indexes(&context, &args).unwrap_err();
        assert!(err.to_string().contains("failed to load desired indexes"));
    }
}
