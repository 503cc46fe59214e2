//! DocType Client
//!
//! Metadata-driven client for DocType document backends.
//!
//! A DocType backend describes each record collection with server-supplied
//! metadata: an ordered list of field descriptors carrying types, choice
//! options, visibility and read-only conditions, and fetch-from dependency
//! links. This library turns that metadata into working admin tooling: it
//! authenticates a session, synchronizes list and document state with the
//! remote store, and computes form render plans instead of relying on
//! hand-written per-record UI.
//!
//! # Example
//!
//! ```
//! use doctype_client::{render_plan, DocTypeMeta, Document, FieldValue};
//! use serde_json::json;
//!
//! let meta: DocTypeMeta = serde_json::from_value(json!({
//!     "name": "Project Info",
//!     "fields": [
//!         { "fieldname": "project_name", "label": "Project Name",
//!           "fieldtype": "Data", "reqd": 1 },
//!         { "fieldname": "status", "label": "Status", "fieldtype": "Select",
//!           "options": "Proposed\nActive\nCompleted" },
//!         { "fieldname": "reason", "label": "Reason", "fieldtype": "Data",
//!           "depends_on": "eval:doc.status=='Proposed'" }
//!     ]
//! })).unwrap();
//!
//! let mut doc = Document::new();
//! doc.set("status", FieldValue::Str("Active".into()));
//!
//! let plan = render_plan(&meta, &doc);
//! // "reason" depends on a status the document doesn't have.
//! assert_eq!(plan.visible_inputs().count(), 2);
//! ```
//!
//! # Condition strings
//!
//! Field visibility, read-only state and requiredness are governed by
//! backend-authored `eval:` condition strings. They are interpreted by a
//! small sandboxed evaluator over a fixed grammar (field references,
//! literals, `==`/`!=`/`in`, `and`/`or`/`not`), never by executing remote
//! strings as code. Failures resolve to the governed property's default:
//! visible, editable, not mandatory.
//!
//! # Remote access
//!
//! The `remote` feature (enabled by default) provides the blocking HTTP
//! [`Client`] plus the [`ListResource`] and [`DocumentResource`] state
//! managers. Sessions are cookie-backed and handled by the HTTP layer; the
//! separately cached [`CachedIdentity`] is advisory UI state only.

mod condition;
mod error;
mod form;
mod identity;
mod types;
mod validate;

#[cfg(feature = "remote")]
mod client;
#[cfg(feature = "remote")]
mod resource;

pub use condition::{eval_condition, mentions_roles, Condition};
pub use error::{ClientError, ConditionError, IdentityError, ShapeViolation};
pub use form::{check_value, render_plan, FieldPlan, RenderPlan, WidgetKind};
pub use identity::{CachedIdentity, IdentityStore};
pub use types::{DocField, DocTypeMeta, Document, FieldType, FieldValue};
pub use validate::{meta_schema, validate_document};

#[cfg(feature = "remote")]
pub use client::{Client, ClientConfig, LoginResponse, Verb};
#[cfg(feature = "remote")]
pub use identity::sign_out;
#[cfg(feature = "remote")]
pub use resource::{DocumentResource, ListResource, PAGE_LENGTH};
