use super::constants::{self, annotations, headers};
use super::error::ApiError;
use super::resilience::{ApiLogger, MonitoringConfig};
use crate::reconcile::{Entity, LifecycleState, Page, RemoteResource};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Dynamics 365 Web API client with connection pooling
#[derive(Debug, Clone)]
pub struct DynamicsClient {
    base_url: String,
    http_client: reqwest::Client,
    access_token: String,
    api_logger: ApiLogger,
}

impl DynamicsClient {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("dynamics-reconciler/1.0")
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self::with_custom_client(base_url, access_token, http_client))
    }

    /// Create a new client with custom HTTP client configuration
    pub fn with_custom_client(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            http_client,
            access_token: access_token.into(),
            api_logger: ApiLogger::new(MonitoringConfig::default()),
        }
    }

    pub fn with_monitoring(mut self, monitoring: MonitoringConfig) -> Self {
        self.api_logger = ApiLogger::new(monitoring);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `RemoteResource` over one entity set, keyed by `id_field`
    pub fn entity_set(&self, entity: impl Into<String>, id_field: impl Into<String>) -> EntitySet {
        EntitySet::new(self.clone(), entity, id_field)
    }

    /// Issue one request; `Ok(None)` for an empty success body
    async fn send(
        &self,
        method: Method,
        url: &str,
        extra_headers: &[(&str, &str)],
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>, ApiError> {
        let correlation_id = self.api_logger.correlation_id();

        let mut request_headers = HashMap::new();
        request_headers.insert("Authorization".to_string(), format!("Bearer {}", self.access_token));
        request_headers.insert("OData-Version".to_string(), headers::ODATA_VERSION.to_string());
        for (name, value) in extra_headers {
            request_headers.insert(name.to_string(), value.to_string());
        }
        self.api_logger
            .log_request(&correlation_id, method.as_str(), url, &request_headers);

        let mut request = self
            .http_client
            .request(method, url)
            .bearer_auth(&self.access_token)
            .header("Accept", headers::CONTENT_TYPE_JSON)
            .header("OData-Version", headers::ODATA_VERSION)
            .header("OData-MaxVersion", headers::ODATA_VERSION)
            .header(headers::X_CORRELATION_ID, &correlation_id);
        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let request_start = Instant::now();
        let response = request.send().await.map_err(ApiError::from_reqwest)?;
        self.api_logger
            .log_response(&correlation_id, response.status().as_u16(), request_start.elapsed());

        Self::parse_response(response).await
    }

    async fn parse_response(response: reqwest::Response) -> Result<Option<Value>, ApiError> {
        let status = response.status();

        if status.is_success() {
            if status == reqwest::StatusCode::NO_CONTENT {
                return Ok(None);
            }
            let text = response.text().await.map_err(ApiError::from_reqwest)?;
            if text.trim().is_empty() {
                return Ok(None);
            }
            let json = serde_json::from_str(&text).context("Invalid JSON response")?;
            Ok(Some(json))
        } else {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(ApiError::from_status(status.as_u16(), error_message(&text)))
        }
    }
}

/// Message from a Dynamics error body, or the raw body
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

/// One Dynamics record: its id, `@odata.etag` version and raw JSON body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub version: Option<String>,
    pub state: LifecycleState,
    pub body: Value,
}

impl Record {
    /// Read id, etag and lifecycle out of a JSON record
    pub fn from_json(body: Value, id_field: &str, state_field: Option<&str>) -> Result<Self, ApiError> {
        let id = match body.get(id_field) {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(ApiError::Other(anyhow::anyhow!(
                    "record has no '{}' identifier",
                    id_field
                )));
            }
        };

        let version = body
            .get(annotations::ETAG)
            .and_then(Value::as_str)
            .map(str::to_string);

        let state = match state_field.and_then(|field| body.get(field)) {
            Some(Value::String(state)) => LifecycleState::parse(state),
            Some(Value::Null) | None => LifecycleState::Active,
            Some(_) => LifecycleState::Unknown,
        };

        Ok(Self {
            id,
            version,
            state,
            body,
        })
    }

    /// Get a field value from the record body
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }
}

impl Entity for Record {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn lifecycle(&self) -> LifecycleState {
        self.state
    }
}

/// Record-level access to one entity set (e.g. `contacts`)
#[derive(Debug, Clone)]
pub struct EntitySet {
    client: DynamicsClient,
    entity: String,
    id_field: String,
    state_field: Option<String>,
    /// `@odata.nextLink` of the previous listing page, keyed by the page it leads to
    next_links: Arc<Mutex<HashMap<u32, String>>>,
}

impl EntitySet {
    pub fn new(client: DynamicsClient, entity: impl Into<String>, id_field: impl Into<String>) -> Self {
        Self {
            client,
            entity: entity.into(),
            id_field: id_field.into(),
            state_field: None,
            next_links: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Field holding a textual lifecycle value such as `"deleting"`
    pub fn with_state_field(mut self, field: impl Into<String>) -> Self {
        self.state_field = Some(field.into());
        self
    }

    fn record(&self, body: Value) -> Result<Record, ApiError> {
        Record::from_json(body, &self.id_field, self.state_field.as_deref())
    }

    /// Parse an OData collection response into one listing page.
    ///
    /// The server signals further pages only through `@odata.nextLink`.
    pub fn page_from_json(&self, json: Value) -> Result<Page<Record>, ApiError> {
        let next_link = json
            .get(annotations::NEXT_LINK)
            .and_then(Value::as_str)
            .map(str::to_string);

        let value = match json {
            Value::Object(mut map) => map.remove("value"),
            _ => None,
        };
        let Some(Value::Array(rows)) = value else {
            return Err(ApiError::Other(anyhow::anyhow!(
                "Missing or invalid 'value' array in response"
            )));
        };

        let items = rows
            .into_iter()
            .map(|row| self.record(row))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(match next_link {
            Some(link) => Page::continued(items, link),
            None => Page::last(items),
        })
    }

    /// URL serving listing page `page`: the collection itself for page 1,
    /// otherwise the continuation handed out with the page before it
    fn page_url(&self, page: u32) -> Result<String, ApiError> {
        if page <= 1 {
            return Ok(constants::entity_endpoint(&self.client.base_url, &self.entity));
        }

        let links = self.next_links.lock().unwrap_or_else(PoisonError::into_inner);
        links.get(&page).cloned().ok_or_else(|| {
            ApiError::Other(anyhow::anyhow!(
                "No continuation link for page {} of '{}'; list from page 1",
                page,
                self.entity
            ))
        })
    }

    fn remember_next_link(&self, page: u32, next_link: Option<&str>) {
        let mut links = self.next_links.lock().unwrap_or_else(PoisonError::into_inner);
        if page <= 1 {
            links.clear();
        }
        let Some(following) = page.checked_add(1) else {
            return;
        };
        match next_link {
            Some(link) => {
                links.insert(following, link.to_string());
            }
            None => {
                links.remove(&following);
            }
        }
    }

    fn empty_response(&self, operation: &str) -> ApiError {
        ApiError::Other(anyhow::anyhow!(
            "{} on '{}' returned no record",
            operation,
            self.entity
        ))
    }
}

/// Fields of `desired` that differ from the record body
fn changed_fields(current: &Value, desired: &Map<String, Value>) -> Map<String, Value> {
    desired
        .iter()
        .filter(|(field, value)| current.get(field.as_str()) != Some(*value))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

#[async_trait]
impl RemoteResource for EntitySet {
    type Entity = Record;
    type Request = Value;

    fn kind(&self) -> &str {
        &self.entity
    }

    async fn lookup(&self, id: &str) -> Result<Record, ApiError> {
        let url = constants::entity_record_endpoint(&self.client.base_url, &self.entity, id);
        let body = self
            .client
            .send(Method::GET, &url, &[("Prefer", headers::PREFER_INCLUDE_ANNOTATIONS)], &[], None)
            .await?
            .ok_or_else(|| self.empty_response("GET"))?;
        self.record(body)
    }

    async fn list_page(&self, page: u32, page_size: u32) -> Result<Page<Record>, ApiError> {
        let url = self.page_url(page)?;
        let prefer = format!(
            "{},{}",
            headers::PREFER_INCLUDE_ANNOTATIONS,
            headers::max_page_size(page_size)
        );

        let json = self
            .client
            .send(Method::GET, &url, &[("Prefer", prefer.as_str())], &[], None)
            .await?
            .ok_or_else(|| self.empty_response("listing"))?;

        let listed = self.page_from_json(json)?;
        self.remember_next_link(page, listed.next_link.as_deref());
        Ok(listed)
    }

    async fn create(&self, request: &Value) -> Result<Record, ApiError> {
        let url = constants::entity_endpoint(&self.client.base_url, &self.entity);
        let body = self
            .client
            .send(
                Method::POST,
                &url,
                &[("Prefer", headers::PREFER_RETURN_REPRESENTATION)],
                &[],
                Some(request),
            )
            .await?
            .ok_or_else(|| self.empty_response("POST"))?;
        self.record(body)
    }

    async fn update(&self, current: &Record, request: &Value) -> Result<Record, ApiError> {
        let url = constants::entity_record_endpoint(&self.client.base_url, &self.entity, &current.id);
        let if_match = current.version.as_deref().unwrap_or(headers::IF_MATCH_ANY);

        let body = self
            .client
            .send(
                Method::PATCH,
                &url,
                &[
                    ("If-Match", if_match),
                    ("Prefer", headers::PREFER_RETURN_REPRESENTATION),
                ],
                &[],
                Some(request),
            )
            .await?;

        match body {
            Some(body) => self.record(body),
            // Server ignored the Prefer header: report the merged state, unversioned
            None => {
                let mut merged = current.body.clone();
                if let (Some(target), Some(changes)) = (merged.as_object_mut(), request.as_object()) {
                    for (field, value) in changes {
                        target.insert(field.clone(), value.clone());
                    }
                }
                Ok(Record {
                    id: current.id.clone(),
                    version: None,
                    state: current.state,
                    body: merged,
                })
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let url = constants::entity_record_endpoint(&self.client.base_url, &self.entity, id);
        self.client.send(Method::DELETE, &url, &[], &[], None).await?;
        Ok(())
    }

    fn build_update(&self, current: &Record, desired: &Value) -> Value {
        match desired.as_object() {
            Some(fields) => Value::Object(changed_fields(&current.body, fields)),
            None => desired.clone(),
        }
    }

    fn matches(&self, desired: &Value, observed: &Record) -> bool {
        match desired.as_object() {
            Some(fields) => changed_fields(&observed.body, fields).is_empty(),
            None => true,
        }
    }
}
