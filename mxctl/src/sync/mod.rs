//! Synchronization with the public API.
//!
//! [`communicate_with_public_api`] registers the instance (once), optionally reports usage
//! counters and records the latest published versions in the local configuration. It runs
//! from the `communicate-with-public-api` command and, when `public_api.sync_interval` is
//! set, periodically from the server ([`run_periodic_sync`]).

pub mod public_api;

use std::{cmp::Ordering, sync::Arc, time::Duration};

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::{
    api::models::information::COMPONENT_NAME,
    db::{
        errors::DbError,
        handlers::{Domains, LocalConfigs, Mailboxes, Users},
    },
    parameters::{GlobalParameters, SharedParameters},
};
pub use public_api::{InstanceStatistics, PublicApi, PublicApiReqwest, SyncError};

/// Version of the running binary.
pub const INSTALLED_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Outcome of one synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub api_pk: i64,
    pub statistics_sent: bool,
    /// Latest published version of this application, if listed
    pub latest_version: Option<String>,
}

/// Compare dotted version strings numerically. Non-numeric parts compare as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.trim_start_matches('v')
            .split(['.', '-', '+'])
            .map(|part| part.parse().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| a.get(i).unwrap_or(&0).cmp(b.get(i).unwrap_or(&0)))
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

async fn statistics(pool: &SqlitePool, hostname: &str) -> Result<InstanceStatistics, DbError> {
    let mut conn = pool.acquire().await?;
    Ok(InstanceStatistics {
        hostname: hostname.to_string(),
        known_version: INSTALLED_VERSION.to_string(),
        domain_counter: Domains::new(&mut conn).count().await?,
        mailbox_counter: Mailboxes::new(&mut conn).count().await?,
        user_counter: Users::new(&mut conn).count().await?,
    })
}

/// Run one synchronization. Returns `None` when API communication is disabled.
#[instrument(skip(pool, params, api), err)]
pub async fn communicate_with_public_api(
    pool: &SqlitePool,
    params: &GlobalParameters,
    api: &dyn PublicApi,
    hostname: &str,
) -> Result<Option<SyncReport>, SyncError> {
    if !params.enable_api_communication {
        debug!("Public API communication disabled");
        return Ok(None);
    }

    let stored = {
        let mut conn = pool.acquire().await.map_err(DbError::from)?;
        LocalConfigs::new(&mut conn).get().await?.api_pk
    };

    let api_pk = match stored {
        Some(pk) => pk,
        None => {
            let pk = match api.search_instance(hostname).await? {
                Some(pk) => pk,
                None => api.create_instance(hostname, INSTALLED_VERSION).await?,
            };
            let mut conn = pool.acquire().await.map_err(DbError::from)?;
            LocalConfigs::new(&mut conn).set_api_pk(pk).await?;
            info!(api_pk = pk, "Instance registered with the public API");
            pk
        }
    };

    let statistics_sent = params.send_statistics;
    if statistics_sent {
        let stats = statistics(pool, hostname).await?;
        api.update_instance(api_pk, &stats).await?;
    }

    let versions = api.versions().await?;
    let latest_version = versions.get(COMPONENT_NAME).map(|v| v.version.clone());
    {
        let mut conn = pool.acquire().await.map_err(DbError::from)?;
        LocalConfigs::new(&mut conn).set_versions(&versions).await?;
    }

    Ok(Some(SyncReport {
        api_pk,
        statistics_sent,
        latest_version,
    }))
}

/// Synchronize every `interval` until `shutdown` is cancelled. Failures are logged and retried
/// on the next tick.
pub async fn run_periodic_sync(
    pool: SqlitePool,
    parameters: SharedParameters,
    api: Arc<dyn PublicApi>,
    hostname: String,
    interval: Duration,
    shutdown: CancellationToken,
) {
    info!(?interval, "Starting public API synchronization");
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Public API synchronization shutting down");
                return;
            }
            _ = timer.tick() => {}
        }

        let params = parameters.get();
        match communicate_with_public_api(&pool, &params, api.as_ref(), &hostname).await {
            Ok(Some(report)) => debug!(?report, "Public API synchronization done"),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Public API synchronization failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::PublicApiConfig, test_utils::mock_public_api};
    use url::Url;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn client(server: &MockServer) -> PublicApiReqwest {
        PublicApiReqwest::new(&PublicApiConfig {
            url: Url::parse(&server.uri()).unwrap(),
            timeout: Duration::from_secs(5),
            sync_interval: None,
        })
        .unwrap()
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("9.0.0", "0.1.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.10.0", "1.9.3"), Ordering::Greater);
        assert_eq!(compare_versions("1.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("v2.0.0", "2.0.1"), Ordering::Less);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_registers_and_stores_versions(pool: SqlitePool) {
        let server = mock_public_api().await;
        let api = client(&server);

        let report = communicate_with_public_api(&pool, &GlobalParameters::default(), &api, "mail.example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.api_pk, 100);
        assert!(report.statistics_sent);
        assert_eq!(report.latest_version.as_deref(), Some("9.0.0"));

        let mut conn = pool.acquire().await.unwrap();
        let local = LocalConfigs::new(&mut conn).get().await.unwrap();
        assert_eq!(local.api_pk, Some(100));
        assert_eq!(local.api_versions["mxctl"].version, "9.0.0");
        assert!(local.last_sync_at.is_some());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_creates_unknown_instance(pool: SqlitePool) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/instances/search/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/instances/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"pk": 7})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/versions/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let mut params = GlobalParameters::default();
        params.send_statistics = false;
        let report = communicate_with_public_api(&pool, &params, &client(&server), "new.example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.api_pk, 7);
        assert!(!report.statistics_sent);
        assert!(report.latest_version.is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_stored_registration_is_reused(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        LocalConfigs::new(&mut conn).set_api_pk(42).await.unwrap();
        drop(conn);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/instances/search/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"pk": 100})))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/instances/42/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/versions/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let report = communicate_with_public_api(&pool, &GlobalParameters::default(), &client(&server), "mail.example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.api_pk, 42);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_disabled_communication_does_nothing(pool: SqlitePool) {
        let server = MockServer::start().await;
        let mut params = GlobalParameters::default();
        params.enable_api_communication = false;

        let report = communicate_with_public_api(&pool, &params, &client(&server), "mail.example.com")
            .await
            .unwrap();
        assert!(report.is_none());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_periodic_sync_stops_on_shutdown(pool: SqlitePool) {
        let server = mock_public_api().await;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_periodic_sync(
            pool.clone(),
            SharedParameters::default(),
            Arc::new(client(&server)),
            "mail.example.com".to_string(),
            Duration::from_millis(50),
            shutdown.clone(),
        ));

        // The first tick fires immediately
        let mut registered = false;
        for _ in 0..50 {
            let mut conn = pool.acquire().await.unwrap();
            if LocalConfigs::new(&mut conn).get().await.unwrap().api_pk == Some(100) {
                registered = true;
                break;
            }
            drop(conn);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(registered);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
