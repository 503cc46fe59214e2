//! Remote access layer.
//!
//! Issues authenticated requests against a DocType backend and normalizes
//! transport and application failures into the [`ClientError`] taxonomy. The
//! session lives in a cookie store managed by the underlying HTTP client;
//! nothing here caches or retries.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::Response;
use reqwest::{StatusCode, Url};
use serde_json::{json, Map, Value};

use crate::error::ClientError;
use crate::types::{DocField, DocTypeMeta, Document, FieldValue};

/// Default timeout for HTTP requests (10 seconds).
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Cross-entity value lookup, used by fetch-from propagation.
const GET_VALUE_METHOD: &str = "frappe.client.get_value";
/// Workflow submit: moves a record to its locked, submitted disposition.
const SUBMIT_METHOD: &str = "frappe.client.submit";
/// Self-service account creation.
const SIGNUP_METHOD: &str = "frappe.core.doctype.user.user.sign_up";
/// Metadata fetch. Deployment-specific, hence configurable.
const DEFAULT_META_METHOD: &str = "hrms.api.get_doctype_fields";

/// HTTP verb for [`Client::invoke_method`]. GET is used for read-only RPCs
/// to avoid CSRF token requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
}

/// Configuration for a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    base_url: String,
    timeout: Duration,
    meta_method: String,
}

impl ClientConfig {
    /// Create a config with the default timeout and metadata method.
    pub fn new(base_url: impl Into<String>) -> Self {
        ClientConfig {
            base_url: base_url.into(),
            timeout: HTTP_TIMEOUT,
            meta_method: DEFAULT_META_METHOD.to_string(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the RPC method used to fetch document metadata.
    pub fn meta_method(mut self, method: impl Into<String>) -> Self {
        self.meta_method = method.into();
        self
    }
}

/// Server response to a successful login. The session itself is established
/// via a set cookie, not a returned token.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub full_name: Option<String>,
}

/// Blocking client for a DocType backend.
///
/// Process-wide and stateless aside from the cookie-backed session handled
/// by the HTTP layer. All calls carry credentials implicitly.
#[derive(Debug)]
pub struct Client {
    http: reqwest::blocking::Client,
    base_url: Url,
    meta_method: String,
}

impl Client {
    /// Build a client from its configuration.
    ///
    /// # Errors
    ///
    /// Returns `RequestFailed` when the base URL is invalid or the HTTP
    /// client cannot be constructed.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| ClientError::RequestFailed {
            message: format!("invalid base URL '{}': {}", config.base_url, e),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::RequestFailed {
                message: format!("invalid base URL '{}'", config.base_url),
            });
        }

        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| ClientError::RequestFailed {
                message: format!("cannot build HTTP client: {}", e),
            })?;

        Ok(Client {
            http,
            base_url,
            meta_method: config.meta_method,
        })
    }

    /// Fetch one page of records for a schema.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` on 403, `Unauthorized` on 401, `RequestFailed`
    /// otherwise.
    pub fn list_records(
        &self,
        schema: &str,
        fields: &[String],
        filters: &Map<String, Value>,
        limit_start: usize,
        limit_page_length: usize,
    ) -> Result<Vec<Document>, ClientError> {
        let url = self.resource_url(schema, None)?;
        let response = self
            .http
            .get(url)
            .query(&[
                ("fields", encode_json_param(&json!(fields))?),
                ("filters", encode_json_param(&Value::Object(filters.clone()))?),
                ("limit_start", limit_start.to_string()),
                ("limit_page_length", limit_page_length.to_string()),
            ])
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(ClientError::PermissionDenied);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ClientError::request_failed(
                error_body(response).as_ref(),
                "Failed to fetch list",
            ));
        }

        let body: Value = response.json().map_err(transport_error)?;
        let rows = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed("list response missing data array"))?;
        rows.iter()
            .map(|row| Document::from_json(row).ok_or_else(|| malformed("list row is not an object")))
            .collect()
    }

    /// Fetch a single record by identity.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` on 403, `NotFound` on 404, `RequestFailed`
    /// otherwise.
    pub fn get_record(&self, schema: &str, identity: &str) -> Result<Document, ClientError> {
        let url = self.resource_url(schema, Some(identity))?;
        let response = self.http.get(url).send().map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(ClientError::PermissionDenied);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound);
        }
        if !status.is_success() {
            return Err(ClientError::request_failed(
                error_body(response).as_ref(),
                "Failed to fetch document",
            ));
        }

        data_document(response)
    }

    /// Persist a document: create when it has no identity, update otherwise.
    /// Returns the server's canonical representation.
    ///
    /// # Errors
    ///
    /// `RequestFailed` carrying the extracted server message.
    pub fn save_record(&self, schema: &str, doc: &Document) -> Result<Document, ClientError> {
        let request = match doc.identity() {
            None => self.http.post(self.resource_url(schema, None)?),
            Some(identity) => self.http.put(self.resource_url(schema, Some(identity))?),
        };
        let response = request.json(&doc.to_json()).send().map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(ClientError::request_failed(
                error_body(response).as_ref(),
                "Failed to save",
            ));
        }

        data_document(response)
    }

    /// Delete a record by identity.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` on 403, `NotFound` on 404, `RequestFailed`
    /// otherwise.
    pub fn delete_record(&self, schema: &str, identity: &str) -> Result<(), ClientError> {
        let url = self.resource_url(schema, Some(identity))?;
        let response = self.http.delete(url).send().map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(ClientError::PermissionDenied);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound);
        }
        if !status.is_success() {
            return Err(ClientError::request_failed(
                error_body(response).as_ref(),
                "Failed to delete",
            ));
        }

        Ok(())
    }

    /// Workflow-submit a document, distinct from a plain update.
    pub fn submit_record(&self, doc: &Document) -> Result<Document, ClientError> {
        let mut args = Map::new();
        args.insert("doc".to_string(), doc.to_json());
        let message = self.invoke_method(SUBMIT_METHOD, &args, Verb::Post)?;
        Document::from_json(&message).ok_or_else(|| malformed("submit response is not a document"))
    }

    /// Generic RPC call to `/api/method/<name>`.
    ///
    /// GET encodes args as query parameters (objects and arrays
    /// JSON-serialized, nulls skipped); POST sends them as a JSON body. The
    /// `{message}` envelope is unwrapped.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` on 403, `Unauthorized` on 401, `RequestFailed`
    /// with the extracted server message otherwise.
    pub fn invoke_method(
        &self,
        method: &str,
        args: &Map<String, Value>,
        verb: Verb,
    ) -> Result<Value, ClientError> {
        let url = self.method_url(method)?;
        let request = match verb {
            Verb::Get => {
                let params: Vec<(String, String)> = args
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| Ok((k.clone(), encode_query_value(v)?)))
                    .collect::<Result<_, ClientError>>()?;
                self.http.get(url).query(&params)
            }
            Verb::Post => self.http.post(url).json(args),
        };

        let response = request.send().map_err(transport_error)?;
        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(ClientError::PermissionDenied);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ClientError::request_failed(
                error_body(response).as_ref(),
                "Request failed",
            ));
        }

        let body: Value = response.json().map_err(transport_error)?;
        Ok(body.get("message").cloned().unwrap_or(Value::Null))
    }

    /// Establish a session. On success the server sets the session cookie,
    /// which the cookie store carries on every subsequent call.
    ///
    /// # Errors
    ///
    /// `RequestFailed` with the server's `message` field when present.
    pub fn login(&self, usr: &str, pwd: &str) -> Result<LoginResponse, ClientError> {
        let url = self.method_url("login")?;
        let response = self
            .http
            .post(url)
            .json(&json!({ "usr": usr, "pwd": pwd }))
            .send()
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(ClientError::request_failed(
                error_body(response).as_ref(),
                "Login failed",
            ));
        }

        response.json().map_err(transport_error)
    }

    /// Terminate the session. Best-effort: failures are logged and
    /// swallowed so callers can always de-authenticate locally.
    pub fn logout(&self) {
        let result = self
            .method_url("logout")
            .and_then(|url| self.http.post(url).send().map_err(transport_error));
        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(status = %response.status(), "logout failed");
            }
            Err(e) => {
                tracing::warn!(error = %e, "logout failed");
            }
        }
    }

    /// Request account creation for a new user.
    pub fn sign_up(
        &self,
        email: &str,
        full_name: &str,
        redirect_to: Option<&str>,
    ) -> Result<Value, ClientError> {
        let mut args = Map::new();
        args.insert("email".to_string(), json!(email));
        args.insert("full_name".to_string(), json!(full_name));
        if let Some(target) = redirect_to {
            args.insert("redirect_to".to_string(), json!(target));
        }
        self.invoke_method(SIGNUP_METHOD, &args, Verb::Post)
    }

    /// Fetch the metadata describing a schema. Best-effort: failures are
    /// logged and yield `None`, letting callers fall back to local metadata.
    ///
    /// A bare field array is normalized into a meta named after the schema.
    pub fn fetch_meta(&self, schema: &str) -> Option<DocTypeMeta> {
        let mut args = Map::new();
        args.insert("doctype".to_string(), json!(schema));

        let message = match self.invoke_method(&self.meta_method, &args, Verb::Get) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(schema, error = %e, "remote metadata fetch failed");
                return None;
            }
        };

        let parsed = match message {
            Value::Array(_) => {
                serde_json::from_value::<Vec<DocField>>(message).map(|fields| DocTypeMeta {
                    name: schema.to_string(),
                    fields,
                    is_submittable: false,
                })
            }
            other => serde_json::from_value::<DocTypeMeta>(other),
        };

        match parsed {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(schema, error = %e, "cannot decode metadata");
                None
            }
        }
    }

    /// Batched cross-entity lookup: read `fieldnames` from the record of
    /// `schema` identified by `key`. Returns `None` when the record does
    /// not exist.
    pub fn get_value(
        &self,
        schema: &str,
        key: &FieldValue,
        fieldnames: &[&str],
    ) -> Result<Option<BTreeMap<String, FieldValue>>, ClientError> {
        let mut args = Map::new();
        args.insert("doctype".to_string(), json!(schema));
        args.insert("filters".to_string(), key.to_json());
        args.insert("fieldname".to_string(), json!(fieldnames));

        let message = self.invoke_method(GET_VALUE_METHOD, &args, Verb::Get)?;
        let Some(map) = message.as_object() else {
            return Ok(None);
        };

        Ok(Some(
            map.iter()
                .filter_map(|(k, v)| FieldValue::from_json(v).map(|value| (k.clone(), value)))
                .collect(),
        ))
    }

    fn resource_url(&self, schema: &str, identity: Option<&str>) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| malformed("base URL cannot carry paths"))?;
            segments.pop_if_empty().extend(["api", "resource", schema]);
            if let Some(identity) = identity {
                segments.push(identity);
            }
        }
        Ok(url)
    }

    fn method_url(&self, method: &str) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| malformed("base URL cannot carry paths"))?
            .pop_if_empty()
            .extend(["api", "method", method]);
        Ok(url)
    }
}

/// Query encoding for GET RPC args: objects and arrays are JSON-serialized,
/// scalars stringify bare (no quoting).
fn encode_query_value(value: &Value) -> Result<String, ClientError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Object(_) | Value::Array(_) => encode_json_param(value),
        other => Ok(other.to_string()),
    }
}

fn encode_json_param(value: &Value) -> Result<String, ClientError> {
    serde_json::to_string(value)
        .map_err(|e| malformed(&format!("cannot encode request parameter: {}", e)))
}

fn transport_error(source: reqwest::Error) -> ClientError {
    ClientError::RequestFailed {
        message: source.to_string(),
    }
}

fn malformed(message: &str) -> ClientError {
    ClientError::RequestFailed {
        message: message.to_string(),
    }
}

/// Best-effort decode of an error response body.
fn error_body(response: Response) -> Option<Value> {
    response.json().ok()
}

/// Unwrap the `{data}` envelope around a document.
fn data_document(response: Response) -> Result<Document, ClientError> {
    let body: Value = response.json().map_err(transport_error)?;
    body.get("data")
        .and_then(Document::from_json)
        .ok_or_else(|| malformed("response missing data document"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> Client {
        Client::new(ClientConfig::new(server.url())).unwrap()
    }

    #[test]
    fn invalid_base_url_rejected() {
        assert!(Client::new(ClientConfig::new("not a url")).is_err());
        assert!(Client::new(ClientConfig::new("mailto:root@local")).is_err());
    }

    #[test]
    fn schema_identifiers_are_percent_encoded() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/api/resource/Project%20Info/PROJ-001")
            .with_body(r#"{"data": {"name": "PROJ-001"}}"#)
            .create();

        let doc = client(&server).get_record("Project Info", "PROJ-001").unwrap();
        mock.assert();
        assert_eq!(doc.identity(), Some("PROJ-001"));
    }

    #[test]
    fn list_sends_projection_and_paging_params() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/api/resource/Task")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("fields".into(), r#"["name","status"]"#.into()),
                Matcher::UrlEncoded("filters".into(), r#"{"status":"Open"}"#.into()),
                Matcher::UrlEncoded("limit_start".into(), "20".into()),
                Matcher::UrlEncoded("limit_page_length".into(), "20".into()),
            ]))
            .with_body(r#"{"data": []}"#)
            .create();

        let mut filters = Map::new();
        filters.insert("status".to_string(), json!("Open"));
        let rows = client(&server)
            .list_records("Task", &["name".into(), "status".into()], &filters, 20, 20)
            .unwrap();
        mock.assert();
        assert!(rows.is_empty());
    }

    #[test]
    fn list_maps_authorization_failures() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/api/resource/Task")
            .match_query(Matcher::Any)
            .with_status(403)
            .create();

        let err = client(&server)
            .list_records("Task", &[], &Map::new(), 0, 20)
            .unwrap_err();
        assert!(matches!(err, ClientError::PermissionDenied));

        let mut server = mockito::Server::new();
        server
            .mock("GET", "/api/resource/Task")
            .match_query(Matcher::Any)
            .with_status(401)
            .create();

        let err = client(&server)
            .list_records("Task", &[], &Map::new(), 0, 20)
            .unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized));
    }

    #[test]
    fn get_maps_missing_record() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/api/resource/Task/T-404")
            .with_status(404)
            .create();

        let err = client(&server).get_record("Task", "T-404").unwrap_err();
        assert!(matches!(err, ClientError::NotFound));
    }

    #[test]
    fn save_posts_new_documents() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/api/resource/Task")
            .match_body(Matcher::Json(json!({"subject": "write tests"})))
            .with_body(r#"{"data": {"name": "T-001", "subject": "write tests"}}"#)
            .create();

        let mut doc = Document::new();
        doc.set("subject", "write tests".into());
        let saved = client(&server).save_record("Task", &doc).unwrap();
        mock.assert();
        assert_eq!(saved.identity(), Some("T-001"));
    }

    #[test]
    fn save_puts_existing_documents() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("PUT", "/api/resource/Task/T-001")
            .with_body(r#"{"data": {"name": "T-001", "subject": "updated"}}"#)
            .create();

        let mut doc = Document::new();
        doc.set("name", "T-001".into());
        doc.set("subject", "updated".into());
        let saved = client(&server).save_record("Task", &doc).unwrap();
        mock.assert();
        assert_eq!(saved.get("subject"), Some(&FieldValue::Str("updated".into())));
    }

    #[test]
    fn save_error_surfaces_server_messages() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/api/resource/Task")
            .with_status(417)
            .with_body(
                r#"{"_server_messages": "[\"{\\\"message\\\": \\\"Subject is required\\\"}\"]"}"#,
            )
            .create();

        let err = client(&server)
            .save_record("Task", &Document::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "Subject is required");
    }

    #[test]
    fn invoke_method_get_serializes_object_args() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/api/method/frappe.client.get_value")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("doctype".into(), "Developer".into()),
                Matcher::UrlEncoded("filters".into(), "DEV-001".into()),
                Matcher::UrlEncoded("fieldname".into(), r#"["email"]"#.into()),
            ]))
            .with_body(r#"{"message": {"email": "a@b.com"}}"#)
            .create();

        let values = client(&server)
            .get_value("Developer", &FieldValue::Str("DEV-001".into()), &["email"])
            .unwrap()
            .unwrap();
        mock.assert();
        assert_eq!(values.get("email"), Some(&FieldValue::Str("a@b.com".into())));
    }

    #[test]
    fn invoke_method_unwraps_message_envelope() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/api/method/ping")
            .with_body(r#"{"message": "pong"}"#)
            .create();

        let message = client(&server)
            .invoke_method("ping", &Map::new(), Verb::Post)
            .unwrap();
        assert_eq!(message, json!("pong"));
    }

    #[test]
    fn login_error_uses_server_message() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/api/method/login")
            .with_status(401)
            .with_body(r#"{"message": "Invalid login credentials"}"#)
            .create();

        let err = client(&server).login("usr@example.com", "bad").unwrap_err();
        assert_eq!(err.to_string(), "Invalid login credentials");
    }

    #[test]
    fn login_parses_display_name() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/api/method/login")
            .match_body(Matcher::Json(json!({"usr": "usr@example.com", "pwd": "pw"})))
            .with_body(r#"{"message": "Logged In", "full_name": "Jane Admin"}"#)
            .create();

        let response = client(&server).login("usr@example.com", "pw").unwrap();
        assert_eq!(response.full_name.as_deref(), Some("Jane Admin"));
    }

    #[test]
    fn logout_swallows_failures() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/api/method/logout")
            .with_status(500)
            .create();

        // Must not panic or error.
        client(&server).logout();
    }

    #[test]
    fn fetch_meta_normalizes_bare_field_arrays() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/api/method/hrms.api.get_doctype_fields")
            .match_query(Matcher::UrlEncoded("doctype".into(), "Task".into()))
            .with_body(
                r#"{"message": [{"fieldname": "subject", "fieldtype": "Data", "label": "Subject"}]}"#,
            )
            .create();

        let meta = client(&server).fetch_meta("Task").unwrap();
        assert_eq!(meta.name, "Task");
        assert_eq!(meta.fields.len(), 1);
        assert!(!meta.is_submittable);
    }

    #[test]
    fn fetch_meta_failure_is_none() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/api/method/hrms.api.get_doctype_fields")
            .match_query(Matcher::Any)
            .with_status(500)
            .create();

        assert!(client(&server).fetch_meta("Task").is_none());
    }

    #[test]
    fn get_value_null_message_is_none() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/api/method/frappe.client.get_value")
            .match_query(Matcher::Any)
            .with_body(r#"{"message": null}"#)
            .create();

        let values = client(&server)
            .get_value("Developer", &FieldValue::Str("DEV-404".into()), &["email"])
            .unwrap();
        assert!(values.is_none());
    }
}
