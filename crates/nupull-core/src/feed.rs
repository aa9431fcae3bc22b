//! Remote package feed client.
//!
//! The feed is addressed through its v3 service index: a JSON document
//! listing resources, of which only the flat-container base address is
//! needed here. Version lists and package archives are then plain GETs
//! against `{base}/{id}/index.json` and `{base}/{id}/{ver}/{id}.{ver}.nupkg`.
//!
//! No retries: transient failures surface as fatal errors to the caller.

use async_trait::async_trait;
use nupull_schema::{PackageName, PackageVersion};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

/// Failures while talking to the feed.
#[derive(Error, Debug)]
pub enum FeedError {
    /// The requested package/version pair is absent from the feed.
    #[error("Could not find package {name}, v{version}")]
    NotFound {
        /// Requested package id.
        name: PackageName,
        /// Requested concrete version.
        version: PackageVersion,
    },

    /// The feed has no versions at all for this package id.
    #[error("Package '{0}' is not known to the feed")]
    UnknownPackage(PackageName),

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service index or a version list did not have the expected shape.
    #[error("Malformed feed response: {0}")]
    Malformed(String),
}

/// Capability to resolve versions and pull package archives.
#[async_trait]
pub trait PackageFeed: Send + Sync {
    /// List every available version of `name`, unordered.
    async fn list_versions(&self, name: &PackageName) -> Result<Vec<PackageVersion>, FeedError>;

    /// Fetch the raw archive bytes of one concrete package.
    async fn fetch(
        &self,
        name: &PackageName,
        version: &PackageVersion,
    ) -> Result<Vec<u8>, FeedError>;
}

#[derive(Debug, Deserialize)]
struct ServiceIndex {
    resources: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct VersionIndex {
    versions: Vec<String>,
}

const FLAT_CONTAINER_TYPE: &str = "PackageBaseAddress/3.0.0";

/// HTTP implementation of [`PackageFeed`] over a v3 feed.
#[derive(Debug)]
pub struct HttpFeed {
    client: Client,
    index_url: String,
    base: OnceCell<String>,
}

impl HttpFeed {
    /// Create a feed client for the given service index URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(index_url: &str) -> Result<Self, FeedError> {
        let client = Client::builder().user_agent(crate::USER_AGENT).build()?;
        Ok(Self {
            client,
            index_url: index_url.to_string(),
            base: OnceCell::new(),
        })
    }

    /// Resolve (once) the flat-container base address from the service index.
    async fn base_address(&self) -> Result<&str, FeedError> {
        self.base
            .get_or_try_init(|| async {
                let index: ServiceIndex = self
                    .client
                    .get(&self.index_url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;

                index
                    .resources
                    .into_iter()
                    .find(|r| r.kind.starts_with(FLAT_CONTAINER_TYPE))
                    .map(|r| r.id.trim_end_matches('/').to_string())
                    .ok_or_else(|| {
                        FeedError::Malformed(format!(
                            "service index has no {FLAT_CONTAINER_TYPE} resource"
                        ))
                    })
            })
            .await
            .map(String::as_str)
    }
}

#[async_trait]
impl PackageFeed for HttpFeed {
    async fn list_versions(&self, name: &PackageName) -> Result<Vec<PackageVersion>, FeedError> {
        let base = self.base_address().await?;
        let url = format!("{base}/{name}/index.json");

        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FeedError::UnknownPackage(name.clone()));
        }
        let index: VersionIndex = response.error_for_status()?.json().await?;

        let mut versions = Vec::with_capacity(index.versions.len());
        for raw in index.versions {
            match raw.parse() {
                Ok(v) => versions.push(v),
                // A feed may list version formats newer than this tool knows.
                Err(_) => debug!(package = %name, version = %raw, "skipping unparseable version"),
            }
        }
        Ok(versions)
    }

    async fn fetch(
        &self,
        name: &PackageName,
        version: &PackageVersion,
    ) -> Result<Vec<u8>, FeedError> {
        let base = self.base_address().await?;
        let url = format!("{base}/{name}/{version}/{name}.{version}.nupkg");
        debug!(package = %name, %version, url = %url, "fetching archive");

        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FeedError::NotFound {
                name: name.clone(),
                version: version.clone(),
            });
        }
        let bytes = response.error_for_status()?.bytes().await?;
        Ok(bytes.to_vec())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn service_index_body(base: &str) -> String {
        format!(
            r#"{{"version":"3.0.0","resources":[
                {{"@id":"{base}/search","@type":"SearchQueryService"}},
                {{"@id":"{base}/flat/","@type":"PackageBaseAddress/3.0.0"}}
            ]}}"#
        )
    }

    #[tokio::test]
    async fn lists_versions_via_service_index() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let _index = server
            .mock("GET", "/v3/index.json")
            .with_body(service_index_body(&url))
            .create_async()
            .await;
        let _versions = server
            .mock("GET", "/flat/newtonsoft.json/index.json")
            .with_body(r#"{"versions":["11.0.2","12.0.3","13.0.0-beta1"]}"#)
            .create_async()
            .await;

        let feed = HttpFeed::new(&format!("{url}/v3/index.json")).unwrap();
        let versions = feed
            .list_versions(&PackageName::new("Newtonsoft.Json"))
            .await
            .unwrap();

        assert_eq!(versions.len(), 3);
        assert!(versions.contains(&"12.0.3".parse().unwrap()));
    }

    #[tokio::test]
    async fn unknown_package_is_distinct_from_transport_errors() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let _index = server
            .mock("GET", "/v3/index.json")
            .with_body(service_index_body(&url))
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/flat/nope/index.json")
            .with_status(404)
            .create_async()
            .await;

        let feed = HttpFeed::new(&format!("{url}/v3/index.json")).unwrap();
        let err = feed
            .list_versions(&PackageName::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::UnknownPackage(_)));
    }

    #[tokio::test]
    async fn fetch_missing_version_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let _index = server
            .mock("GET", "/v3/index.json")
            .with_body(service_index_body(&url))
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/flat/pkg/9.9.9/pkg.9.9.9.nupkg")
            .with_status(404)
            .create_async()
            .await;

        let feed = HttpFeed::new(&format!("{url}/v3/index.json")).unwrap();
        let err = feed
            .fetch(&PackageName::new("pkg"), &"9.9.9".parse().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Could not find package pkg, v9.9.9");
    }

    #[tokio::test]
    async fn missing_flat_container_resource_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let _index = server
            .mock("GET", "/v3/index.json")
            .with_body(r#"{"version":"3.0.0","resources":[]}"#)
            .create_async()
            .await;

        let feed = HttpFeed::new(&format!("{url}/v3/index.json")).unwrap();
        let err = feed
            .list_versions(&PackageName::new("pkg"))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Malformed(_)));
    }
}
