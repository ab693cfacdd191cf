use reqwest::header::{ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::rate_limiter::{self, RateLimiter};
use crate::settings::Settings;

const REVISION_HEADER: &str = "revision";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub default_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            default_delay: Duration::from_millis(settings.default_retry_delay_ms),
            max_delay: Duration::from_millis(settings.max_retry_delay_ms),
        }
    }
}

/// Per-request retry bookkeeping, dropped once the request settles.
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    next_delay: Option<Duration>,
}

fn build_http_client(settings: &Settings) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .timeout(Duration::from_secs(settings.request_timeout_secs))
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(16)
        .tcp_nodelay(true)
        .build()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClientTimeouts {
    connect_secs: u64,
    request_secs: u64,
}

impl ClientTimeouts {
    fn from_settings(settings: &Settings) -> Self {
        Self {
            connect_secs: settings.connect_timeout_secs,
            request_secs: settings.request_timeout_secs,
        }
    }
}

struct SharedHttp {
    client: reqwest::Client,
    timeouts: ClientTimeouts,
}

/// Process-wide connection pool. The first caller fixes its timeouts.
fn shared_http_client(settings: &Settings) -> Result<&'static reqwest::Client, reqwest::Error> {
    static SHARED: OnceLock<SharedHttp> = OnceLock::new();

    let requested = ClientTimeouts::from_settings(settings);
    let shared = match SHARED.get() {
        Some(shared) => shared,
        None => {
            let client = build_http_client(settings)?;
            SHARED.get_or_init(|| SharedHttp {
                client,
                timeouts: requested,
            })
        }
    };
    if shared.timeouts != requested {
        log::warn!(
            "[ApiClient] Requested timeouts {:?} ignored, shared client already uses {:?}",
            requested,
            shared.timeouts
        );
    }
    Ok(&shared.client)
}

/// Authenticated, metered access to the upstream API. Retries only on throttling.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    revision: String,
    auth_scheme: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl ApiClient {
    /// Builds a client with its own connection pool, metered by `limiter`.
    pub fn new(settings: &Settings, limiter: Arc<RateLimiter>) -> Result<Self, ApiError> {
        let http = build_http_client(settings)?;
        Self::with_http(settings, http, limiter)
    }

    /// Builds a client on the process-wide connection pool and rate limiter.
    pub fn shared(settings: &Settings) -> Result<Self, ApiError> {
        let limiter = rate_limiter::shared(settings.min_interval());
        let http = shared_http_client(settings)?.clone();
        Self::with_http(settings, http, limiter)
    }

    fn with_http(
        settings: &Settings,
        http: reqwest::Client,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            http,
            base_url: normalize_base_url(&settings.base_url)?,
            revision: settings.api_revision.clone(),
            auth_scheme: settings.auth_scheme.clone(),
            limiter,
            retry: RetryPolicy::from_settings(settings),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidEndpoint(format!("{}: {}", endpoint, e)))
    }

    pub async fn get(
        &self,
        credential: &str,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Value, ApiError> {
        self.execute(credential, endpoint, Method::GET, None, params)
            .await
    }

    pub async fn post(
        &self,
        credential: &str,
        endpoint: &str,
        body: &Value,
    ) -> Result<Value, ApiError> {
        self.execute(credential, endpoint, Method::POST, Some(body), &[])
            .await
    }

    /// Issues one logical request, waiting on the rate limiter before every attempt.
    pub async fn execute(
        &self,
        credential: &str,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
        params: &[(String, String)],
    ) -> Result<Value, ApiError> {
        let url = self.endpoint_url(endpoint)?;
        let request_id = Uuid::new_v4().to_string();
        let mut state = RetryState::default();

        loop {
            if let Some(delay) = state.next_delay.take() {
                tokio::time::sleep(delay).await;
            }
            state.attempt += 1;

            self.limiter.acquire().await;
            log::debug!(
                "[ApiClient] {} {} {} (attempt {})",
                request_id,
                method,
                endpoint,
                state.attempt
            );

            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .header(AUTHORIZATION, format!("{} {}", self.auth_scheme, credential))
                .header(REVISION_HEADER, &self.revision)
                .header(ACCEPT, "application/json");
            if !params.is_empty() {
                request = request.query(params);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(|e| {
                log::error!("[ApiClient] {} {} {} failed: {}", request_id, method, endpoint, e);
                ApiError::from(e)
            })?;
            let status = response.status();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await?;

            if status.is_success() {
                return decode_body(&text);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if state.attempt >= self.retry.max_attempts {
                    log::error!(
                        "[ApiClient] {} {} {} still throttled after {} attempts",
                        request_id,
                        method,
                        endpoint,
                        state.attempt
                    );
                    return Err(ApiError::Throttled {
                        attempts: state.attempt,
                    });
                }
                let delay = parse_retry_hint(&text)
                    .or(retry_after)
                    .unwrap_or(self.retry.default_delay)
                    .min(self.retry.max_delay);
                log::warn!(
                    "[ApiClient] {} {} throttled on attempt {}, retrying in {:?}",
                    request_id,
                    endpoint,
                    state.attempt,
                    delay
                );
                state.next_delay = Some(delay);
                continue;
            }

            let message = extract_error_message(&text, status);
            log::warn!(
                "[ApiClient] {} {} {} returned {}: {}",
                request_id,
                method,
                endpoint,
                status.as_u16(),
                message
            );
            return Err(ApiError::Api {
                status: status.as_u16(),
                message,
            });
        }
    }
}

fn normalize_base_url(raw: &str) -> Result<Url, ApiError> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&with_slash).map_err(|e| ApiError::InvalidEndpoint(format!("{}: {}", raw, e)))
}

fn decode_body(text: &str) -> Result<Value, ApiError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| ApiError::Decode {
        message: e.to_string(),
    })
}

fn first_error(envelope: &Value) -> Option<&Value> {
    envelope.get("errors")?.as_array()?.first()
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Human-readable message from an `{errors: [{title, detail}]}` envelope.
pub fn extract_error_message(text: &str, status: StatusCode) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .as_ref()
        .and_then(first_error)
        .and_then(|err| non_empty_str(err, "detail").or_else(|| non_empty_str(err, "title")))
        .map(str::to_string)
        .unwrap_or_else(|| format!("upstream request failed with HTTP {}", status.as_u16()))
}

/// Finds "N second(s)" in the error detail, title, or raw body.
pub fn parse_retry_hint(text: &str) -> Option<Duration> {
    let envelope = serde_json::from_str::<Value>(text).ok();
    let first = envelope.as_ref().and_then(first_error);
    let candidates = [
        first.and_then(|e| non_empty_str(e, "detail")),
        first.and_then(|e| non_empty_str(e, "title")),
        Some(text),
    ];
    let seconds = candidates.into_iter().flatten().find_map(seconds_in_text);
    seconds.map(Duration::from_secs)
}

fn seconds_in_text(text: &str) -> Option<u64> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words.windows(2).find_map(|pair| {
        let number = pair[0].trim_matches(|c: char| !c.is_ascii_digit());
        let unit = pair[1].to_ascii_lowercase();
        if !number.is_empty() && unit.starts_with("second") {
            number.parse::<u64>().ok()
        } else {
            None
        }
    })
}
