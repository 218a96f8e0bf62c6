//! Client for the public API that tracks installed instances and published versions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::{config::PublicApiConfig, db::errors::DbError, db::models::local_config::PublishedVersion};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid public API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("public API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("public API answered {status} to {endpoint}")]
    UnexpectedStatus { endpoint: String, status: StatusCode },
    #[error(transparent)]
    Database(#[from] DbError),
}

/// Counters reported to the public API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatistics {
    pub hostname: String,
    pub known_version: String,
    pub domain_counter: i64,
    pub mailbox_counter: i64,
    pub user_counter: i64,
}

#[derive(Debug, Clone, Serialize)]
struct InstanceRequest<'a> {
    hostname: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    known_version: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct InstanceResponse {
    pk: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct VersionEntry {
    name: String,
    version: String,
    #[serde(default)]
    url: String,
}

#[async_trait]
pub trait PublicApi: Send + Sync {
    /// Registration id of `hostname`, if it is known.
    async fn search_instance(&self, hostname: &str) -> Result<Option<i64>, SyncError>;

    async fn create_instance(&self, hostname: &str, known_version: &str) -> Result<i64, SyncError>;

    async fn update_instance(&self, pk: i64, statistics: &InstanceStatistics) -> Result<(), SyncError>;

    /// Latest published version of every component.
    async fn versions(&self) -> Result<BTreeMap<String, PublishedVersion>, SyncError>;
}

/// The concrete implementation of `PublicApi`.
pub struct PublicApiReqwest {
    client: Client,
    base_url: Url,
}

/// Makes sure a url has a trailing slash, so that `join` appends instead of replacing the
/// last path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}

impl PublicApiReqwest {
    pub fn new(config: &PublicApiConfig) -> Result<Self, SyncError> {
        // reqwest is built without a bundled crypto provider; a no-op when one is installed
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: ensure_slash(&config.url),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        Ok(self.base_url.join(path)?)
    }
}

fn unexpected(endpoint: &Url, status: StatusCode) -> SyncError {
    SyncError::UnexpectedStatus {
        endpoint: endpoint.to_string(),
        status,
    }
}

#[async_trait]
impl PublicApi for PublicApiReqwest {
    #[instrument(skip(self), err)]
    async fn search_instance(&self, hostname: &str) -> Result<Option<i64>, SyncError> {
        let url = self.endpoint("instances/search/")?;
        let response = self
            .client
            .post(url.clone())
            .json(&InstanceRequest {
                hostname,
                known_version: None,
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json::<InstanceResponse>().await?.pk)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(unexpected(&url, status)),
        }
    }

    #[instrument(skip(self), err)]
    async fn create_instance(&self, hostname: &str, known_version: &str) -> Result<i64, SyncError> {
        let url = self.endpoint("instances/")?;
        let response = self
            .client
            .post(url.clone())
            .json(&InstanceRequest {
                hostname,
                known_version: Some(known_version),
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(response.json::<InstanceResponse>().await?.pk),
            status => Err(unexpected(&url, status)),
        }
    }

    #[instrument(skip(self, statistics), err)]
    async fn update_instance(&self, pk: i64, statistics: &InstanceStatistics) -> Result<(), SyncError> {
        let url = self.endpoint(&format!("instances/{pk}/"))?;
        let response = self.client.put(url.clone()).json(statistics).send().await?;

        if !response.status().is_success() {
            return Err(unexpected(&url, response.status()));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn versions(&self) -> Result<BTreeMap<String, PublishedVersion>, SyncError> {
        let url = self.endpoint("versions/")?;
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(unexpected(&url, response.status()));
        }

        let entries: Vec<VersionEntry> = response.json().await?;
        debug!(count = entries.len(), "Fetched published versions");
        Ok(entries
            .into_iter()
            .map(|entry| {
                (
                    entry.name,
                    PublishedVersion {
                        version: entry.version,
                        url: entry.url,
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, method, path},
    };

    fn client(server: &MockServer, suffix: &str) -> PublicApiReqwest {
        PublicApiReqwest::new(&PublicApiConfig {
            url: Url::parse(&format!("{}{suffix}", server.uri())).unwrap(),
            timeout: Duration::from_secs(5),
            sync_interval: None,
        })
        .unwrap()
    }

    #[test]
    fn test_ensure_slash() {
        let url = Url::parse("https://api.example.com/1").unwrap();
        assert_eq!(ensure_slash(&url).join("versions/").unwrap().as_str(), "https://api.example.com/1/versions/");

        let url = Url::parse("https://api.example.com/1/").unwrap();
        assert_eq!(ensure_slash(&url).join("versions/").unwrap().as_str(), "https://api.example.com/1/versions/");
    }

    #[tokio::test]
    async fn test_search_instance() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/instances/search/"))
            .and(body_json(serde_json::json!({"hostname": "mail.example.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"pk": 100})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1/instances/search/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let api = client(&server, "/1");
        assert_eq!(api.search_instance("mail.example.com").await.unwrap(), Some(100));
        assert_eq!(api.search_instance("unknown.example.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unexpected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/versions/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server, "/").versions().await.unwrap_err();
        assert!(matches!(err, SyncError::UnexpectedStatus { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn test_versions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/versions/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "mxctl", "version": "9.0.0", "url": "https://example.com/mxctl"},
                {"name": "webmail", "version": "1.2.0"}
            ])))
            .mount(&server)
            .await;

        let versions = client(&server, "/").versions().await.unwrap();
        assert_eq!(versions["mxctl"].version, "9.0.0");
        assert_eq!(versions["webmail"].url, "");
    }
}
