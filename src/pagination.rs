use reqwest::Url;
use serde_json::Value;

use crate::api_client::ApiClient;
use crate::errors::ApiError;

/// Walks `links.next` cursors until a list endpoint is exhausted.
#[derive(Debug, Clone, Copy)]
pub struct Paginator<'a> {
    client: &'a ApiClient,
    max_pages: usize,
}

impl<'a> Paginator<'a> {
    pub fn new(client: &'a ApiClient, max_pages: usize) -> Self {
        Self {
            client,
            max_pages: max_pages.max(1),
        }
    }

    /// Collects every item across all pages, in page-arrival order. No deduplication.
    pub async fn fetch_all(
        &self,
        credential: &str,
        endpoint: &str,
        initial_params: &[(String, String)],
    ) -> Result<Vec<Value>, ApiError> {
        let mut items = Vec::new();
        let mut endpoint = endpoint.to_string();
        let mut params = initial_params.to_vec();
        let mut pages = 0usize;

        loop {
            let page = self.client.get(credential, &endpoint, &params).await?;
            pages += 1;
            append_items(&page, &mut items);

            let Some(cursor) = next_cursor(&page) else {
                break;
            };
            if pages >= self.max_pages {
                log::warn!(
                    "[Pagination] Stopping {} after {} pages with a cursor still pending",
                    endpoint,
                    pages
                );
                break;
            }
            (endpoint, params) = cursor_request(self.client.base_url(), cursor)?;
        }

        log::debug!(
            "[Pagination] Fetched {} items over {} pages",
            items.len(),
            pages
        );
        Ok(items)
    }
}

fn append_items(page: &Value, items: &mut Vec<Value>) {
    match page.get("data") {
        Some(Value::Array(data)) => items.extend(data.iter().cloned()),
        Some(Value::Null) | None => {}
        Some(single) => items.push(single.clone()),
    }
}

fn next_cursor(page: &Value) -> Option<&str> {
    page.get("links")?
        .get("next")?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Splits a cursor URL into an endpoint relative to `base_url` and its query pairs,
/// taken verbatim.
pub fn cursor_request(
    base_url: &Url,
    cursor: &str,
) -> Result<(String, Vec<(String, String)>), ApiError> {
    let url = Url::parse(cursor)
        .or_else(|_| base_url.join(cursor))
        .map_err(|e| ApiError::InvalidEndpoint(format!("{}: {}", cursor, e)))?;

    let params = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let path = url.path();
    let endpoint = strip_base_path(path, base_url.path())
        .trim_start_matches('/')
        .to_string();

    Ok((endpoint, params))
}

/// Removes `base_path` from `path` only on a segment boundary.
fn strip_base_path<'p>(path: &'p str, base_path: &str) -> &'p str {
    let root = base_path.trim_end_matches('/');
    match path.strip_prefix(root) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_upstream::{MockResponse, MockUpstream};
    use crate::rate_limiter::RateLimiter;
    use crate::settings::Settings;
    use serde_json::json;
    use std::sync::Arc;

    fn client_for(base_url: String) -> ApiClient {
        let settings = Settings {
            base_url,
            min_interval_ms: 1,
            ..Settings::default()
        };
        ApiClient::new(&settings, Arc::new(RateLimiter::new(settings.min_interval()))).unwrap()
    }

    fn page(ids: std::ops::Range<usize>, next: Option<String>) -> Value {
        let data: Vec<Value> = ids
            .map(|i| json!({"type": "profile", "id": i.to_string()}))
            .collect();
        json!({"data": data, "links": {"self": "ignored", "next": next}})
    }

    #[test]
    fn cursor_strips_api_root() {
        let base = Url::parse("https://a.klaviyo.com/api/").unwrap();
        let cursor = concat!(
            "https://a.klaviyo.com/api/campaigns/",
            "?filter=equals%28messages.channel%2C%27email%27%29",
            "&page%5Bcursor%5D=bmV4dA"
        );
        let (endpoint, params) = cursor_request(&base, cursor).unwrap();
        assert_eq!(endpoint, "campaigns/");
        assert_eq!(
            params,
            vec![
                ("filter".to_string(), "equals(messages.channel,'email')".to_string()),
                ("page[cursor]".to_string(), "bmV4dA".to_string()),
            ]
        );
    }

    #[test]
    fn cursor_on_other_host_keeps_relative_path() {
        let base = Url::parse("http://127.0.0.1:8080/api/").unwrap();
        let (endpoint, params) =
            cursor_request(&base, "https://a.klaviyo.com/api/metrics?page%5Bcursor%5D=abc")
                .unwrap();
        assert_eq!(endpoint, "metrics");
        assert_eq!(params, vec![("page[cursor]".to_string(), "abc".to_string())]);
    }

    #[test]
    fn base_path_is_only_stripped_on_segment_boundary() {
        let base = Url::parse("https://a.klaviyo.com/api/").unwrap();
        let (endpoint, _) =
            cursor_request(&base, "https://a.klaviyo.com/apix/foo?page%5Bcursor%5D=abc").unwrap();
        assert_eq!(endpoint, "apix/foo");
        let (endpoint, _) = cursor_request(&base, "https://a.klaviyo.com/api").unwrap();
        assert_eq!(endpoint, "");
        assert_eq!(strip_base_path("/api/lists", "/api/"), "/lists");
    }

    #[test]
    fn missing_or_empty_next_ends_sequence() {
        assert_eq!(next_cursor(&json!({"links": {"next": null}})), None);
        assert_eq!(next_cursor(&json!({"links": {"next": ""}})), None);
        assert_eq!(next_cursor(&json!({"data": []})), None);
        assert_eq!(next_cursor(&json!({"links": {"next": "x"}})), Some("x"));
    }

    #[tokio::test]
    async fn three_pages_yield_all_items_in_order() {
        let upstream = MockUpstream::start(|req| {
            let next = |cursor: &str| {
                Some(format!(
                    "http://upstream.invalid/api/profiles?page%5Bcursor%5D={}",
                    cursor
                ))
            };
            match req.query_value("page[cursor]") {
                None => MockResponse::ok(page(0..100, next("p2"))),
                Some("p2") => MockResponse::ok(page(100..200, next("p3"))),
                Some("p3") => MockResponse::ok(page(200..250, None)),
                Some(other) => MockResponse::raw(400, &format!("unexpected cursor {}", other)),
            }
        })
        .await;
        let client = client_for(upstream.base_url());
        let paginator = Paginator::new(&client, 10);

        let items = paginator.fetch_all("key", "profiles", &[]).await.unwrap();
        assert_eq!(items.len(), 250);
        let ids: Vec<String> = items
            .iter()
            .map(|i| i["id"].as_str().unwrap().to_string())
            .collect();
        let expected: Vec<String> = (0..250).map(|i| i.to_string()).collect();
        assert_eq!(ids, expected);

        let requests = upstream.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.endpoint() == "profiles"));
    }

    #[tokio::test]
    async fn initial_params_are_sent_and_cursor_params_replace_them() {
        let upstream = MockUpstream::start(|req| {
            if req.query_value("page[cursor]").is_none() {
                MockResponse::ok(page(
                    0..1,
                    Some("http://x/api/campaigns?page%5Bcursor%5D=c2&filter=kept".to_string()),
                ))
            } else {
                MockResponse::ok(page(1..2, None))
            }
        })
        .await;
        let client = client_for(upstream.base_url());
        let paginator = Paginator::new(&client, 10);

        let params = vec![("filter".to_string(), "equals(messages.channel,'sms')".to_string())];
        let items = paginator.fetch_all("key", "campaigns", &params).await.unwrap();
        assert_eq!(items.len(), 2);

        let requests = upstream.requests();
        assert_eq!(requests[0].query_value("filter"), Some("equals(messages.channel,'sms')"));
        assert_eq!(requests[1].query_value("filter"), Some("kept"));
        assert_eq!(requests[1].query_value("page[cursor]"), Some("c2"));
    }

    #[tokio::test]
    async fn max_pages_stops_runaway_cursors() {
        let upstream = MockUpstream::start(|req| {
            MockResponse::ok(page(
                req.sequence..req.sequence + 1,
                Some("http://x/api/lists?page%5Bcursor%5D=again".to_string()),
            ))
        })
        .await;
        let client = client_for(upstream.base_url());
        let paginator = Paginator::new(&client, 3);

        let items = paginator.fetch_all("key", "lists", &[]).await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(upstream.requests().len(), 3);
    }

    #[tokio::test]
    async fn page_failure_surfaces_error() {
        let upstream = MockUpstream::start(|req| {
            if req.sequence == 0 {
                let next = "http://x/api/flows?page%5Bcursor%5D=2".to_string();
                MockResponse::ok(page(0..5, Some(next)))
            } else {
                MockResponse::json(500, json!({"errors": [{"title": "Server error"}]}))
            }
        })
        .await;
        let client = client_for(upstream.base_url());
        let paginator = Paginator::new(&client, 10);

        let err = paginator.fetch_all("key", "flows", &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Api { status: 500, .. }));
    }
}
