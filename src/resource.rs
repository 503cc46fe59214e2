//! Reactive state managers over the remote access layer.
//!
//! Two resources mirror the two view shapes: [`ListResource`] holds a
//! paginated record list, [`DocumentResource`] holds one document with dirty
//! tracking and fetch-from propagation. Each instance is exclusively owned by
//! its creating view; failures land in the resource's `error` string rather
//! than propagating, so a view can render state and error together.

use serde_json::{Map, Value};

use crate::client::Client;
use crate::error::ClientError;
use crate::types::{DocTypeMeta, Document, FieldType, FieldValue};
use crate::validate::validate_document;

/// Fixed page size for list fetches.
pub const PAGE_LENGTH: usize = 20;

/// Paginated list of records for one schema.
///
/// Construct with [`ListResource::new`], then call [`reload`](Self::reload)
/// (the mount effect of the owning view). `set_filters` resets and refetches;
/// `next` appends the following page.
#[derive(Debug)]
pub struct ListResource<'a> {
    client: &'a Client,
    schema: String,
    fields: Vec<String>,
    filters: Map<String, Value>,
    items: Option<Vec<Document>>,
    page: usize,
    has_next_page: bool,
    loading: bool,
    error: Option<String>,
    /// Generation counter: results fetched under an older epoch are
    /// discarded instead of appended.
    epoch: u64,
}

impl<'a> ListResource<'a> {
    pub fn new(
        client: &'a Client,
        schema: impl Into<String>,
        fields: Vec<String>,
        filters: Map<String, Value>,
    ) -> Self {
        ListResource {
            client,
            schema: schema.into(),
            fields,
            filters,
            items: None,
            page: 0,
            has_next_page: true,
            loading: false,
            error: None,
            epoch: 0,
        }
    }

    /// Fetched records, `None` until the first successful load. Retains its
    /// prior value when a fetch fails.
    pub fn items(&self) -> Option<&[Document]> {
        self.items.as_deref()
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_next_page(&self) -> bool {
        self.has_next_page
    }

    pub fn filters(&self) -> &Map<String, Value> {
        &self.filters
    }

    /// Fetch page 0 under the current filters, replacing all held items.
    pub fn reload(&mut self) {
        self.fetch(true);
    }

    /// Fetch and append the next page. No-op while loading or when the last
    /// page was short.
    pub fn next(&mut self) {
        if self.loading || !self.has_next_page {
            return;
        }
        self.fetch(false);
    }

    /// Replace the filters and refetch from offset 0.
    pub fn set_filters(&mut self, filters: Map<String, Value>) {
        self.filters = filters;
        self.reload();
    }

    fn fetch(&mut self, reset: bool) {
        if reset {
            // Invalidate any fetch started before this reset.
            self.epoch = self.epoch.wrapping_add(1);
        }
        let epoch = self.epoch;
        let start = if reset { 0 } else { self.page * PAGE_LENGTH };

        self.loading = true;
        self.error = None;

        let result = self.client.list_records(
            &self.schema,
            &self.fields,
            &self.filters,
            start,
            PAGE_LENGTH,
        );
        self.apply(epoch, reset, result);
    }

    fn apply(&mut self, epoch: u64, reset: bool, result: Result<Vec<Document>, ClientError>) {
        if epoch != self.epoch {
            // A reset happened while this fetch was in flight; its results
            // belong to the previous filter generation.
            tracing::debug!(schema = %self.schema, "discarding stale list page");
            return;
        }

        self.loading = false;
        match result {
            Ok(records) => {
                self.has_next_page = records.len() == PAGE_LENGTH;
                if reset {
                    self.items = Some(records);
                    self.page = 1;
                } else {
                    self.items.get_or_insert_with(Vec::new).extend(records);
                    self.page += 1;
                }
            }
            Err(e) => {
                // Auth failures are recorded like any other error; global
                // logout wiring is intentionally not triggered from here.
                self.error = Some(e.to_string());
            }
        }
    }
}

/// One document with dirty tracking and fetch-from propagation.
#[derive(Debug)]
pub struct DocumentResource<'a> {
    client: &'a Client,
    schema: String,
    meta: Option<DocTypeMeta>,
    current: Option<Document>,
    original: Option<Document>,
    dirty: bool,
    loading: bool,
    error: Option<String>,
    deleted: bool,
    /// Latch against overlapping save/submit/delete calls.
    in_flight: bool,
}

impl<'a> DocumentResource<'a> {
    /// Start a new, unsaved document, seeded from the metadata's field
    /// defaults when metadata is given.
    pub fn new_record(
        client: &'a Client,
        schema: impl Into<String>,
        meta: Option<DocTypeMeta>,
    ) -> Self {
        let doc = meta.as_ref().map(defaults_from_meta).unwrap_or_default();
        DocumentResource {
            client,
            schema: schema.into(),
            meta,
            current: Some(doc.clone()),
            original: Some(doc),
            dirty: false,
            loading: false,
            error: None,
            deleted: false,
            in_flight: false,
        }
    }

    /// Open an existing record by identity, fetching it immediately. A fetch
    /// failure leaves the resource empty with its `error` set.
    pub fn open(
        client: &'a Client,
        schema: impl Into<String>,
        identity: &str,
        meta: Option<DocTypeMeta>,
    ) -> Self {
        let schema = schema.into();
        let mut resource = DocumentResource {
            client,
            schema,
            meta,
            current: None,
            original: None,
            dirty: false,
            loading: false,
            error: None,
            deleted: false,
            in_flight: false,
        };

        match resource.client.get_record(&resource.schema, identity) {
            Ok(doc) => {
                if let Some(meta) = &resource.meta {
                    for violation in validate_document(meta, &doc) {
                        tracing::warn!(schema = %resource.schema, %violation, "document shape violation");
                    }
                }
                resource.current = Some(doc.clone());
                resource.original = Some(doc);
            }
            Err(e) => {
                resource.error = Some(e.to_string());
            }
        }
        resource
    }

    pub fn doc(&self) -> Option<&Document> {
        self.current.as_ref()
    }

    /// Last-synced snapshot of the document.
    pub fn original(&self) -> Option<&Document> {
        self.original.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn meta(&self) -> Option<&DocTypeMeta> {
        self.meta.as_ref()
    }

    /// Merge one edit into the document, then run fetch-from propagation on
    /// the merged state. Propagated values belong to the same edit: a single
    /// `set_value` is a single dirty transition.
    pub fn set_value(&mut self, field: &str, value: FieldValue) {
        let Some(mut doc) = self.current.take() else {
            return;
        };
        doc.set(field, value.clone());
        self.propagate_fetch_from(field, &value, &mut doc);
        self.current = Some(doc);
        self.dirty = true;
    }

    /// Persist the document; create or update is decided by its identity.
    /// On success both `current` and `original` become the server's
    /// canonical document and the resource is clean; on failure `current`
    /// is untouched and `error` records the message.
    pub fn save(&mut self) {
        self.persist(|resource, doc| resource.client.save_record(&resource.schema, doc));
    }

    /// Workflow-submit the document, moving it to its locked disposition.
    pub fn submit(&mut self) {
        self.persist(|resource, doc| resource.client.submit_record(doc));
    }

    fn persist(
        &mut self,
        op: impl FnOnce(&Self, &Document) -> Result<Document, ClientError>,
    ) {
        if self.in_flight {
            return;
        }
        let Some(doc) = self.current.clone() else {
            return;
        };

        self.in_flight = true;
        self.loading = true;
        let result = op(self, &doc);
        self.loading = false;
        self.in_flight = false;

        match result {
            Ok(saved) => {
                self.current = Some(saved.clone());
                self.original = Some(saved);
                self.dirty = false;
                self.error = None;
            }
            Err(e) => {
                self.error = Some(e.to_string());
            }
        }
    }

    /// Delete the record from the remote store. A document that was never
    /// saved has nothing to delete and records an error instead.
    pub fn delete(&mut self) {
        if self.in_flight {
            return;
        }
        let Some(identity) = self.current.as_ref().and_then(|d| d.identity().map(String::from))
        else {
            self.error = Some("document has no identity to delete".to_string());
            return;
        };

        self.in_flight = true;
        self.loading = true;
        let result = self.client.delete_record(&self.schema, &identity);
        self.loading = false;
        self.in_flight = false;

        match result {
            Ok(()) => {
                self.current = None;
                self.original = None;
                self.dirty = false;
                self.error = None;
                self.deleted = true;
            }
            Err(e) => {
                self.error = Some(e.to_string());
            }
        }
    }

    /// Copy attributes from the record referenced by a Link field into its
    /// dependent fields. Best-effort UX sugar: lookup failures are logged
    /// and swallowed, leaving dependents unchanged.
    fn propagate_fetch_from(&self, field: &str, value: &FieldValue, doc: &mut Document) {
        let Some(meta) = &self.meta else {
            return;
        };
        let targets = meta.fetch_targets(field);
        if targets.is_empty() || value.is_empty() {
            return;
        }

        let source_is_link = meta
            .field(field)
            .is_some_and(|f| f.fieldtype == FieldType::Link);
        let Some(target_schema) = meta.link_target(field) else {
            tracing::debug!(field, "fetch-from source has no target schema");
            return;
        };
        if !source_is_link {
            tracing::debug!(field, "fetch-from source is not a Link field");
        }

        let attrs: Vec<&str> = targets.iter().map(|(_, attr)| *attr).collect();
        match self.client.get_value(target_schema, value, &attrs) {
            Ok(Some(values)) => {
                for (dependent, attr) in targets {
                    if let Some(fetched) = values.get(attr) {
                        doc.set(dependent.fieldname.clone(), fetched.clone());
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(field, error = %e, "auto-fetch failed");
            }
        }
    }
}

/// Seed a new document from its metadata's `default` values.
fn defaults_from_meta(meta: &DocTypeMeta) -> Document {
    meta.fields
        .iter()
        .filter(|f| !f.fieldtype.is_layout() && !f.default.is_null())
        .map(|f| (f.fieldname.clone(), f.default.clone()))
        .collect()
}
