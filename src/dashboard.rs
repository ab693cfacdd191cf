use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::time::{Duration, Instant as StdInstant};
use tokio::time::Instant;

use crate::aggregates::AggregateQueryExecutor;
use crate::api_client::ApiClient;
use crate::errors::{PartError, SnapshotError};
use crate::metric_catalog::MetricCatalog;
use crate::pagination::Paginator;
use crate::resources::{self, Account, Campaign, Flow, ListSummary};
use crate::settings::{EventCounter, Settings};
use crate::types::{
    AggregateQuerySpec, DashboardSnapshot, DateWindow, Interval, Measurement, RevenueSummary,
    SubFetch,
};

const ACCOUNTS_ENDPOINT: &str = "accounts";
const CAMPAIGNS_ENDPOINT: &str = "campaigns";
const FLOWS_ENDPOINT: &str = "flows";
const LISTS_ENDPOINT: &str = "lists";
/// Used when the configured deadline does not fit in an `Instant`.
const FAR_DEADLINE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Everything a single build shares between its sub-fetches.
struct BuildContext<'a> {
    credential: &'a str,
    deadline: Instant,
    now: DateTime<Utc>,
    window: DateWindow,
    paginator: Paginator<'a>,
    catalog: &'a MetricCatalog,
}

async fn within<T, F>(deadline: Instant, fut: F) -> Result<T, PartError>
where
    F: Future<Output = Result<T, PartError>>,
{
    tokio::time::timeout_at(deadline, fut)
        .await
        .unwrap_or(Err(PartError::DeadlineExceeded))
}

/// Builds dashboard snapshots. Only a catalog failure aborts a build.
#[derive(Debug, Clone)]
pub struct DashboardAggregator {
    client: ApiClient,
    settings: Settings,
}

impl DashboardAggregator {
    pub fn new(client: ApiClient, settings: Settings) -> Self {
        Self { client, settings }
    }

    pub async fn build(&self, credential: &str) -> Result<DashboardSnapshot, SnapshotError> {
        let now = Instant::now();
        let deadline = now
            .checked_add(self.settings.snapshot_deadline())
            .unwrap_or_else(|| {
                log::warn!(
                    "[Dashboard] snapshot_deadline_secs={} overflows, using {:?}",
                    self.settings.snapshot_deadline_secs,
                    FAR_DEADLINE
                );
                now + FAR_DEADLINE
            });
        self.build_until(credential, deadline).await
    }

    /// As `build`, abandoning any sub-fetch still pending at `deadline`.
    pub async fn build_until(
        &self,
        credential: &str,
        deadline: Instant,
    ) -> Result<DashboardSnapshot, SnapshotError> {
        let started = StdInstant::now();
        let now = Utc::now();
        let paginator = Paginator::new(&self.client, self.settings.max_pages);

        let catalog = match tokio::time::timeout_at(
            deadline,
            MetricCatalog::load(&paginator, credential, self.settings.metric_match),
        )
        .await
        {
            Ok(Ok(catalog)) => catalog,
            Ok(Err(e)) => {
                log::error!("[Dashboard] Metric catalog failed to load: {}", e);
                return Err(SnapshotError::CatalogUnavailable(e));
            }
            Err(_) => {
                log::error!("[Dashboard] Deadline passed while loading the metric catalog");
                return Err(SnapshotError::DeadlineExceeded);
            }
        };

        let ctx = BuildContext {
            credential,
            deadline,
            now,
            window: DateWindow::trailing(self.settings.window_days, now),
            paginator,
            catalog: &catalog,
        };

        let (account, campaigns, flows, lists, event_counts, revenue) = tokio::join!(
            self.account_part(&ctx),
            self.campaigns_part(&ctx),
            self.flows_part(&ctx),
            self.lists_part(&ctx),
            self.event_counts_part(&ctx),
            self.revenue_part(&ctx),
        );
        let window = ctx.window;
        drop(ctx);

        let snapshot = DashboardSnapshot {
            account,
            metric_catalog: catalog.into_descriptors(),
            campaigns,
            lists,
            flows,
            event_counts,
            revenue,
            window,
            generated_at: Utc::now(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        let degraded = snapshot.degraded_parts();
        for part in &degraded {
            log::warn!("[Dashboard] Part {} degraded", part);
        }
        log::info!(
            "[Dashboard] Snapshot built in {} ms with {} degraded parts",
            snapshot.elapsed_ms,
            degraded.len()
        );
        Ok(snapshot)
    }

    async fn account_part(&self, ctx: &BuildContext<'_>) -> SubFetch<Option<Account>> {
        let result = within(ctx.deadline, async {
            let body = self
                .client
                .get(ctx.credential, ACCOUNTS_ENDPOINT, &[])
                .await?;
            let first = body
                .get("data")
                .and_then(|d| d.as_array())
                .and_then(|items| items.first());
            Ok::<_, PartError>(first.and_then(resources::decode_account))
        })
        .await;
        SubFetch::from_result(result)
    }

    async fn campaigns_part(&self, ctx: &BuildContext<'_>) -> SubFetch<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut failures: Vec<String> = Vec::new();

        for channel in &self.settings.campaign_channels {
            let params = vec![(
                "filter".to_string(),
                format!("equals(messages.channel,'{}')", channel),
            )];
            let fetched = within(ctx.deadline, async {
                let items = ctx
                    .paginator
                    .fetch_all(ctx.credential, CAMPAIGNS_ENDPOINT, &params)
                    .await?;
                Ok::<_, PartError>(items)
            })
            .await;

            match fetched {
                Ok(items) => {
                    for campaign in items
                        .iter()
                        .filter_map(|item| resources::decode_campaign(item, channel))
                    {
                        if seen.insert(campaign.id.clone()) {
                            campaigns.push(campaign);
                        }
                    }
                }
                Err(e) => {
                    log::warn!("[Dashboard] Campaigns for channel {} failed: {}", channel, e);
                    failures.push(format!("{}: {}", channel, e));
                }
            }
        }

        if failures.is_empty() {
            SubFetch::fetched(campaigns)
        } else {
            SubFetch::degraded(campaigns, failures.join("; "))
        }
    }

    async fn flows_part(&self, ctx: &BuildContext<'_>) -> SubFetch<Vec<Flow>> {
        let result = within(ctx.deadline, async {
            let items = ctx
                .paginator
                .fetch_all(ctx.credential, FLOWS_ENDPOINT, &[])
                .await?;
            Ok::<_, PartError>(items.iter().filter_map(resources::decode_flow).collect::<Vec<_>>())
        })
        .await;
        SubFetch::from_result(result)
    }

    async fn lists_part(&self, ctx: &BuildContext<'_>) -> SubFetch<Vec<ListSummary>> {
        let result = within(ctx.deadline, async {
            let items = ctx
                .paginator
                .fetch_all(ctx.credential, LISTS_ENDPOINT, &[])
                .await?;
            Ok::<_, PartError>(items.iter().filter_map(resources::decode_list).collect::<Vec<_>>())
        })
        .await;
        SubFetch::from_result(result)
    }

    async fn event_count(
        &self,
        ctx: &BuildContext<'_>,
        counter: &EventCounter,
    ) -> Result<f64, PartError> {
        let metric_id = ctx.catalog.resolve(&counter.metric)?;
        let spec = AggregateQuerySpec::new(metric_id, counter.measurement)
            .with_filters(ctx.window.filters())
            .with_timezone(self.settings.timezone.clone());
        let result = AggregateQueryExecutor::new(&self.client)
            .run_at(ctx.credential, &spec, ctx.now)
            .await?;
        Ok(result.total)
    }

    /// Counters run on a bounded pool; every request still waits on the shared limiter.
    async fn event_counts_part(&self, ctx: &BuildContext<'_>) -> BTreeMap<String, SubFetch<f64>> {
        let workers = self.settings.aggregate_workers.max(1);
        stream::iter(self.settings.event_counters.iter())
            .map(|counter| async move {
                let result = within(ctx.deadline, self.event_count(ctx, counter)).await;
                (counter.key.clone(), SubFetch::from_result(result))
            })
            .buffer_unordered(workers)
            .collect()
            .await
    }

    async fn revenue_part(&self, ctx: &BuildContext<'_>) -> SubFetch<RevenueSummary> {
        let result = within(ctx.deadline, async {
            let metric_id = ctx.catalog.resolve(&self.settings.revenue_metric)?;
            let spec = AggregateQuerySpec::new(metric_id, Measurement::SumValue)
                .with_filters(ctx.window.filters())
                .grouped_by(self.settings.revenue_group_by.clone())
                .with_interval(Interval::Day)
                .with_timezone(self.settings.timezone.clone());
            let result = AggregateQueryExecutor::new(&self.client)
                .run_at(ctx.credential, &spec, ctx.now)
                .await?;
            Ok::<_, PartError>(RevenueSummary {
                total: result.total,
                by_channel: result.grouped,
            })
        })
        .await;
        SubFetch::from_result(result)
    }
}
