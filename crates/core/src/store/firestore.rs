use super::{Direction, Document, DocumentStore, Fields, FilterOp, Query, check_document_id};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};

/// A [`DocumentStore`] backed by the Cloud Firestore REST API.
pub struct FirestoreStore {
    client: Client,
    documents_url: String,
    access_token: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
struct RestDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RunQueryEntry {
    document: Option<RestDocument>,
}

impl FirestoreStore {
    /// Connects to the production service for `project_id`, authenticating
    /// with an OAuth access token.
    pub fn new(project_id: &str, access_token: Option<SecretString>) -> Self {
        Self::with_base_url("https://firestore.googleapis.com", project_id, access_token)
    }

    /// Connects to a local emulator, e.g. `localhost:8080`.
    pub fn emulator(host: &str, project_id: &str) -> Self {
        // The emulator treats the "owner" token as an admin credential that bypasses rules.
        Self::with_base_url(
            &format!("http://{host}"),
            project_id,
            Some(SecretString::from("owner".to_string())),
        )
    }

    pub fn with_base_url(
        base_url: &str,
        project_id: &str,
        access_token: Option<SecretString>,
    ) -> Self {
        Self {
            client: Client::new(),
            documents_url: format!(
                "{}/v1/projects/{project_id}/databases/(default)/documents",
                base_url.trim_end_matches('/')
            ),
            access_token,
        }
    }

    /// The REST URL of one document. The id is checked and percent-encoded,
    /// so it can only address a document of `collection`.
    fn document_url(&self, collection: &str, id: &str) -> Result<Url> {
        check_document_id(id)?;
        let mut url = Url::parse(&self.documents_url)
            .with_context(|| format!("Invalid Firestore URL: {}", self.documents_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Firestore URL cannot take path segments"))?
            .push(collection)
            .push(id);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let url = self.document_url(collection, id)?;
        let resp = self
            .authorized(self.client.get(url))
            .send()
            .await
            .with_context(|| format!("Firestore get {collection}/{id} failed"))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let doc = resp
            .error_for_status()
            .with_context(|| format!("Firestore get {collection}/{id} rejected"))?
            .json::<RestDocument>()
            .await
            .context("Failed to decode Firestore document")?;
        Ok(Some(decode_document(doc)))
    }

    async fn set(&self, collection: &str, id: &str, data: Fields) -> Result<()> {
        let url = self.document_url(collection, id)?;
        // PATCH without an update mask replaces the whole document.
        self.authorized(self.client.patch(url))
            .json(&json!({ "fields": encode_fields(&data) }))
            .send()
            .await
            .with_context(|| format!("Firestore set {collection}/{id} failed"))?
            .error_for_status()
            .with_context(|| format!("Firestore set {collection}/{id} rejected"))?;
        Ok(())
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let url = format!("{}:runQuery", self.documents_url);
        let entries = self
            .authorized(self.client.post(&url))
            .json(&json!({ "structuredQuery": structured_query(collection, query) }))
            .send()
            .await
            .with_context(|| format!("Firestore query on {collection} failed"))?
            .error_for_status()
            .with_context(|| format!("Firestore query on {collection} rejected"))?
            .json::<Vec<RunQueryEntry>>()
            .await
            .context("Failed to decode Firestore query response")?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| entry.document)
            .map(decode_document)
            .collect())
    }
}

fn decode_document(doc: RestDocument) -> Document {
    let id = doc
        .name
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    Document {
        id,
        data: decode_fields(&doc.fields),
    }
}

fn structured_query(collection: &str, query: &Query) -> Value {
    let mut structured = json!({ "from": [{ "collectionId": collection }] });

    let filters: Vec<Value> = query
        .filters
        .iter()
        .map(|f| {
            let op = match f.op {
                FilterOp::Equal => "EQUAL",
                FilterOp::NotEqual => "NOT_EQUAL",
            };
            json!({
                "fieldFilter": {
                    "field": { "fieldPath": f.field },
                    "op": op,
                    "value": encode_value(&f.value),
                }
            })
        })
        .collect();
    match filters.len() {
        0 => {}
        1 => structured["where"] = filters[0].clone(),
        _ => {
            structured["where"] = json!({
                "compositeFilter": { "op": "AND", "filters": filters }
            })
        }
    }

    if !query.order_by.is_empty() {
        structured["orderBy"] = query
            .order_by
            .iter()
            .map(|o| {
                let direction = match o.direction {
                    Direction::Ascending => "ASCENDING",
                    Direction::Descending => "DESCENDING",
                };
                json!({ "field": { "fieldPath": o.field }, "direction": direction })
            })
            .collect();
    }
    if let Some(limit) = query.limit {
        structured["limit"] = json!(limit);
    }
    structured
}

fn encode_fields(fields: &Fields) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect()
}

/// Converts plain JSON into Firestore's typed value representation.
pub(crate) fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // Firestore transports 64-bit integers as strings.
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

fn decode_fields(fields: &Map<String, Value>) -> Fields {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), decode_value(v)))
        .collect()
}

/// Converts a Firestore typed value back into plain JSON. Timestamps and
/// references become strings; unknown value kinds become null.
pub(crate) fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|m| m.iter().next()) else {
        return Value::Null;
    };
    match kind.as_str() {
        "booleanValue" => inner.clone(),
        "integerValue" => match inner {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            other => other.clone(),
        },
        "doubleValue" => inner.clone(),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}
