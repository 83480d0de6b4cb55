//! HTTP client for the telemedicine gateway and the consultation records API.

use std::time::Duration;

use medlink_types::GatewayError;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::gateway::{CreateRoomRequest, CreatedRoom, RoomMapping};
use crate::retry::{RetryConfig, calculate_delay, is_retryable};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body quoted back in an error message.
const MAX_ERROR_BODY: usize = 200;

/// Client for the gateway (`/token`, `/room/...`) and the system of record
/// (`/createConsultationRoom`).
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    gateway_url: String,
    records_url: String,
    retry_config: RetryConfig,
}

/// `{ data: T }` wrapper used by every gateway response.
#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
struct TokenData {
    token: Option<String>,
}

#[derive(Deserialize)]
struct RoomLookup {
    status: Option<serde_json::Value>,
    data: Option<RoomLookupData>,
}

#[derive(Deserialize)]
struct RoomLookupData {
    #[serde(rename = "roomId")]
    room_id: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct CreateRoomData {
    #[serde(rename = "createRoom")]
    create_room: Option<CreatedRoomData>,
}

#[derive(Deserialize)]
struct CreatedRoomData {
    #[serde(rename = "roomId")]
    room_id: Option<serde_json::Value>,
    token: Option<String>,
}

#[derive(Deserialize)]
struct PersistAck {
    success: Option<bool>,
    #[serde(rename = "rowsAffected")]
    rows_affected: Option<u64>,
}

impl GatewayClient {
    /// Create a new client. Trailing slashes on the base URLs are ignored.
    pub fn new(
        gateway_url: impl Into<String>,
        records_url: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(Self {
            http,
            gateway_url: gateway_url.into().trim_end_matches('/').to_string(),
            records_url: records_url.into().trim_end_matches('/').to_string(),
            retry_config: RetryConfig::default(),
        })
    }

    /// Set the retry configuration for the idempotent reads (token, room lookup).
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// `GET /token`: a short-lived service token.
    pub async fn service_token(&self) -> Result<String, GatewayError> {
        let url = format!("{}/token", self.gateway_url);
        let response = self.send_with_retry(|| self.http.get(&url)).await?;
        let body: DataEnvelope<TokenData> = decode(response).await?;

        body.data
            .and_then(|d| d.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::Decode("token response carries no token".into()))
    }

    /// `GET /room/getRoomByAtendimento/{id}`: the room bound to an encounter.
    ///
    /// A 404, `status: false` or a missing room id all mean "no room".
    pub async fn find_room(
        &self,
        encounter_id: u64,
        service_token: &str,
    ) -> Result<Option<String>, GatewayError> {
        let url = format!("{}/room/getRoomByAtendimento/{encounter_id}", self.gateway_url);
        let bearer = format!("Bearer {service_token}");
        let result = self
            .send_with_retry(|| self.http.get(&url).header(AUTHORIZATION, &bearer))
            .await;

        let response = match result {
            Ok(response) => response,
            Err(GatewayError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        let body: RoomLookup = decode(response).await?;

        if body.status.as_ref().is_some_and(is_falsy) {
            return Ok(None);
        }
        Ok(body
            .data
            .and_then(|d| d.room_id)
            .and_then(|id| id_string(&id)))
    }

    /// `POST /room/createRoom`. Not retried: a lost response must not mint a second room.
    pub async fn create_room(
        &self,
        request: &CreateRoomRequest,
    ) -> Result<CreatedRoom, GatewayError> {
        let url = format!("{}/room/createRoom", self.gateway_url);
        let response = self
            .send_once(
                self.http
                    .post(&url)
                    .header(AUTHORIZATION, format!("Bearer {}", request.service_token))
                    .json(request),
            )
            .await?;
        let body: DataEnvelope<CreateRoomData> = decode(response).await?;

        let created = body
            .data
            .and_then(|d| d.create_room)
            .ok_or_else(|| GatewayError::Decode("createRoom response carries no room".into()))?;
        let room_id = created
            .room_id
            .as_ref()
            .and_then(id_string)
            .ok_or_else(|| GatewayError::Decode("created room has no roomId".into()))?;
        let token = created
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::Decode("created room has no token".into()))?;

        Ok(CreatedRoom { room_id, token })
    }

    /// `POST /createConsultationRoom`: acknowledged when `success` is true
    /// or at least one row was affected.
    pub async fn persist_room(&self, mapping: &RoomMapping) -> Result<bool, GatewayError> {
        let url = format!("{}/createConsultationRoom", self.records_url);
        let response = self.send_once(self.http.post(&url).json(mapping)).await?;
        let ack: PersistAck = decode(response).await?;
        Ok(ack.success == Some(true) || ack.rows_affected.is_some_and(|n| n >= 1))
    }

    /// Send a request, retrying transient failures per `retry_config`.
    async fn send_with_retry<F>(&self, build: F) -> Result<Response, GatewayError>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_retries = self.retry_config.max_retries;
        let mut attempt = 0;
        loop {
            tracing::debug!("Gateway request (attempt {}/{})", attempt + 1, max_retries + 1);
            let err = match self.send_once(build()).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !is_retryable(&err) || attempt == max_retries {
                return Err(err);
            }

            let retry_after = match &err {
                GatewayError::RateLimited { retry_after_ms } => *retry_after_ms,
                _ => None,
            };
            let delay = calculate_delay(&self.retry_config, attempt, retry_after);
            tracing::warn!(
                "Retryable gateway error (attempt {}/{}): {err}. Retrying in {delay}ms...",
                attempt + 1,
                max_retries,
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;
            attempt += 1;
        }
    }

    /// Send a request once and classify non-2xx responses.
    async fn send_once(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout
            } else {
                GatewayError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = parse_retry_after(response.headers());
        let body_text = response.text().await.unwrap_or_default();
        Err(classify_error(status.as_u16(), &body_text, retry_after))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let text = response
        .text()
        .await
        .map_err(|e| GatewayError::Network(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))
}

/// `false`, `0`, `"false"` and `null` all read as a negative status.
fn is_falsy(status: &serde_json::Value) -> bool {
    match status {
        serde_json::Value::Bool(b) => !b,
        serde_json::Value::Number(n) => n.as_f64() == Some(0.0),
        serde_json::Value::String(s) => s.eq_ignore_ascii_case("false"),
        serde_json::Value::Null => true,
        _ => false,
    }
}

/// Room ids arrive as strings or numbers.
fn id_string(id: &serde_json::Value) -> Option<String> {
    match id {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse the `retry-after` header value as seconds and convert to milliseconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as u64)
}

/// Classify an HTTP error response into a typed GatewayError.
fn classify_error(status: u16, body: &str, retry_after: Option<u64>) -> GatewayError {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        error: Option<String>,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY).collect());

    match status {
        400 => GatewayError::BadRequest { message },
        401 | 403 => GatewayError::Auth { message },
        404 => GatewayError::NotFound,
        409 => GatewayError::Conflict { message },
        429 => GatewayError::RateLimited {
            retry_after_ms: retry_after,
        },
        _ => GatewayError::Server { status, message },
    }
}
