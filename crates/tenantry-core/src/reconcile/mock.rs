//! In-memory index admin API.
//!
//! [`MockIndexAdminApi`] behaves like the remote service closely enough to
//! exercise reconciliation end to end: paginated listing, `409` for an index
//! that already exists, `404` for a deletion of something already gone. On top
//! of that, statuses can be scripted per call to simulate races and outages.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};

use super::api::{ApiResponse, IndexAdminApi};
use super::error::ReconcileError;
use crate::index::{IdentityAttributes, IndexIdentity};

/// A call received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    /// Listing page request.
    List {
        /// Cursor sent with the request.
        page_token: Option<String>,
    },
    /// Creation request.
    Create {
        /// Collection group in the request path.
        collection_group: String,
        /// Request body.
        body: Value,
    },
    /// Deletion request.
    Delete {
        /// Resource name.
        name: String,
    },
}

#[derive(Debug, Default)]
struct MockState {
    records: Vec<Value>,
    next_id: u64,
    list_failures: Vec<(usize, u16)>,
    create_statuses: VecDeque<u16>,
    delete_statuses: VecDeque<u16>,
    calls: Vec<MockCall>,
}

/// Scriptable in-memory [`IndexAdminApi`].
#[derive(Debug)]
pub struct MockIndexAdminApi {
    prefix: String,
    page_size: usize,
    endless_cursor: bool,
    attributes: IdentityAttributes,
    state: Mutex<MockState>,
}

impl Default for MockIndexAdminApi {
    fn default() -> Self {
        Self::new("mock-project")
    }
}

fn error_body(status: u16, message: &str) -> Option<Value> {
    Some(json!({ "error": { "code": status, "message": message } }))
}

impl MockIndexAdminApi {
    /// Creates an empty mock for `project_id` with a page size of 2.
    #[must_use]
    pub fn new(project_id: &str) -> Self {
        Self {
            prefix: format!("projects/{project_id}/databases/(default)/collectionGroups"),
            page_size: 2,
            endless_cursor: false,
            attributes: IdentityAttributes::default(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Sets the number of records per listing page.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Makes every listing page return a next-page cursor.
    #[must_use]
    pub const fn with_endless_cursor(mut self) -> Self {
        self.endless_cursor = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert_named(&self, state: &mut MockState, collection_group: &str, body: &Value) -> String {
        state.next_id += 1;
        let name = format!("{}/{collection_group}/indexes/mock-{}", self.prefix, state.next_id);
        let mut record = body.as_object().cloned().unwrap_or_default();
        record.insert("name".to_string(), Value::String(name.clone()));
        record.insert("state".to_string(), json!("READY"));
        state.records.push(Value::Object(record));
        name
    }

    /// Seeds an existing index and returns its resource name.
    pub fn seed(&self, collection_group: &str, body: &Value) -> String {
        let mut state = self.lock();
        self.insert_named(&mut state, collection_group, body)
    }

    /// Seeds a raw listing record as-is, e.g. one without a name.
    pub fn seed_raw(&self, record: Value) {
        self.lock().records.push(record);
    }

    /// Makes the listing page at `page` (zero-based) answer with `status`.
    pub fn fail_list_page(&self, page: usize, status: u16) {
        self.lock().list_failures.push((page, status));
    }

    /// Queues a status for the next creation call, bypassing the store.
    pub fn script_create(&self, status: u16) {
        self.lock().create_statuses.push_back(status);
    }

    /// Queues a status for the next deletion call, bypassing the store.
    pub fn script_delete(&self, status: u16) {
        self.lock().delete_statuses.push_back(status);
    }

    /// Current records.
    #[must_use]
    pub fn records(&self) -> Vec<Value> {
        self.lock().records.clone()
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    fn identity_of(&self, record: &Value) -> Option<IndexIdentity> {
        IndexIdentity::from_existing(record, &self.attributes).ok()
    }
}

impl IndexAdminApi for MockIndexAdminApi {
    fn list_indexes(&self, page_token: Option<&str>) -> Result<ApiResponse, ReconcileError> {
        let mut state = self.lock();
        state.calls.push(MockCall::List {
            page_token: page_token.map(ToString::to_string),
        });

        let offset = match page_token {
            None => 0,
            Some(token) => match token.parse::<usize>() {
                Ok(offset) => offset,
                Err(_) => return Ok(ApiResponse::new(400, error_body(400, "invalid page token"))),
            },
        };
        let page = offset / self.page_size;
        if let Some(&(_, status)) = state.list_failures.iter().find(|(p, _)| *p == page) {
            return Ok(ApiResponse::new(status, error_body(status, "listing failed")));
        }

        let end = (offset + self.page_size).min(state.records.len());
        let items: Vec<Value> = state.records.get(offset..end).unwrap_or_default().to_vec();
        let mut body = json!({ "indexes": items });
        if end < state.records.len() || self.endless_cursor {
            body["nextPageToken"] = Value::String(end.to_string());
        }
        Ok(ApiResponse::new(200, Some(body)))
    }

    fn create_index(
        &self,
        collection_group: &str,
        body: &Value,
    ) -> Result<ApiResponse, ReconcileError> {
        let mut state = self.lock();
        state.calls.push(MockCall::Create {
            collection_group: collection_group.to_string(),
            body: body.clone(),
        });

        if let Some(status) = state.create_statuses.pop_front() {
            return Ok(ApiResponse::new(status, error_body(status, "scripted")));
        }

        let Some(mut probe) = body.as_object().cloned() else {
            return Ok(ApiResponse::new(400, error_body(400, "body must be an object")));
        };
        probe.insert(
            "collectionGroup".to_string(),
            Value::String(collection_group.to_string()),
        );
        let wanted = self.identity_of(&Value::Object(probe));
        let exists = state
            .records
            .iter()
            .any(|record| wanted.is_some() && self.identity_of(record) == wanted);
        if exists {
            return Ok(ApiResponse::new(409, error_body(409, "index already exists")));
        }

        let name = self.insert_named(&mut state, collection_group, body);
        Ok(ApiResponse::new(200, Some(json!({ "name": format!("operations/{name}") }))))
    }

    fn delete_index(&self, name: &str) -> Result<ApiResponse, ReconcileError> {
        let mut state = self.lock();
        state.calls.push(MockCall::Delete {
            name: name.to_string(),
        });

        if let Some(status) = state.delete_statuses.pop_front() {
            return Ok(ApiResponse::new(status, error_body(status, "scripted")));
        }

        let before = state.records.len();
        state
            .records
            .retain(|record| record.get("name").and_then(Value::as_str) != Some(name));
        if state.records.len() < before {
            Ok(ApiResponse::new(200, Some(json!({}))))
        } else {
            Ok(ApiResponse::new(404, error_body(404, "index not found")))
        }
    }
}
