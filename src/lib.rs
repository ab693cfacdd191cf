pub mod aggregates;
pub mod api_client;
pub mod dashboard;
pub mod errors;
pub mod metric_catalog;
#[cfg(test)]
mod mock_upstream;
pub mod pagination;
pub mod rate_limiter;
pub mod resources;
pub mod settings;
pub mod types;

use std::process::ExitCode;

pub use api_client::ApiClient;
pub use dashboard::DashboardAggregator;
pub use errors::{ApiError, MetricNotFound, SnapshotError};
pub use settings::Settings;
pub use types::{DashboardSnapshot, FetchStatus, SubFetch};

const CREDENTIAL_ENV: &str = "METRICDECK_API_KEY";

/// Builds one snapshot for the tenant owning `credential`, on the process-wide
/// connection pool and rate limiter.
pub async fn build_snapshot(
    settings: &Settings,
    credential: &str,
) -> Result<DashboardSnapshot, SnapshotError> {
    let client = ApiClient::shared(settings).map_err(SnapshotError::Configuration)?;
    DashboardAggregator::new(client, settings.clone())
        .build(credential)
        .await
}

pub fn run() -> ExitCode {
    env_logger::init();

    let Some(credential) = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CREDENTIAL_ENV).ok())
        .filter(|c| !c.trim().is_empty())
    else {
        eprintln!("usage: metricdeck <api-key>  (or set {})", CREDENTIAL_ENV);
        return ExitCode::from(2);
    };

    let settings = settings::load_settings();
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("[Setup] Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(build_snapshot(&settings, credential.trim())) {
        Ok(snapshot) => match serde_json::to_string_pretty(&snapshot) {
            Ok(rendered) => {
                println!("{}", rendered);
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("[Setup] Failed to serialize snapshot: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            log::error!("[Setup] Snapshot failed: {}", e);
            eprintln!("metricdeck: {}", e);
            ExitCode::FAILURE
        }
    }
}
