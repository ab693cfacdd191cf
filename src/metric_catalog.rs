use serde_json::Value;

use crate::errors::{ApiError, MetricNotFound};
use crate::pagination::Paginator;
use crate::settings::MatchPolicy;
use crate::types::MetricDescriptor;

const METRICS_ENDPOINT: &str = "metrics";

/// A tenant's metric catalog, loaded once per snapshot.
#[derive(Debug, Clone)]
pub struct MetricCatalog {
    metrics: Vec<MetricDescriptor>,
    policy: MatchPolicy,
}

impl MetricCatalog {
    pub fn new(metrics: Vec<MetricDescriptor>, policy: MatchPolicy) -> Self {
        Self { metrics, policy }
    }

    pub async fn load(
        paginator: &Paginator<'_>,
        credential: &str,
        policy: MatchPolicy,
    ) -> Result<Self, ApiError> {
        let items = paginator.fetch_all(credential, METRICS_ENDPOINT, &[]).await?;
        let metrics: Vec<MetricDescriptor> =
            items.iter().filter_map(descriptor_from_item).collect();
        log::info!("[MetricCatalog] Loaded {} metrics", metrics.len());
        Ok(Self::new(metrics, policy))
    }

    pub fn into_descriptors(self) -> Vec<MetricDescriptor> {
        self.metrics
    }

    pub fn resolve(&self, name: &str) -> Result<&str, MetricNotFound> {
        resolve_id(&self.metrics, name, self.policy)
    }
}

fn descriptor_from_item(item: &Value) -> Option<MetricDescriptor> {
    let id = item.get("id").and_then(|v| v.as_str())?;
    let attributes = item.get("attributes");
    let name = attributes
        .and_then(|a| a.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let integration = attributes
        .and_then(|a| a.get("integration"))
        .and_then(|i| i.get("name"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    Some(MetricDescriptor {
        id: id.to_string(),
        name: name.to_string(),
        integration,
    })
}

/// Case-insensitive lookup. Exact matches win; otherwise, under
/// `ExactThenSubstring`, the first catalog entry containing `name` is used.
pub fn resolve_id<'c>(
    catalog: &'c [MetricDescriptor],
    name: &str,
    policy: MatchPolicy,
) -> Result<&'c str, MetricNotFound> {
    let wanted = name.trim().to_lowercase();
    let not_found = || MetricNotFound {
        name: name.to_string(),
    };
    if wanted.is_empty() {
        return Err(not_found());
    }

    let mut exact = catalog.iter().filter(|m| m.name.to_lowercase() == wanted);
    if let Some(hit) = exact.next() {
        if exact.next().is_some() {
            log::debug!(
                "[MetricCatalog] '{}' matches several metrics exactly, using {}",
                name,
                hit.id
            );
        }
        return Ok(hit.id.as_str());
    }

    if policy == MatchPolicy::ExactOnly {
        return Err(not_found());
    }

    let mut partial = catalog
        .iter()
        .filter(|m| m.name.to_lowercase().contains(&wanted));
    match partial.next() {
        Some(hit) => {
            if partial.next().is_some() {
                log::debug!(
                    "[MetricCatalog] '{}' is ambiguous, first match '{}' ({}) wins",
                    name,
                    hit.name,
                    hit.id
                );
            }
            Ok(hit.id.as_str())
        }
        None => Err(not_found()),
    }
}
