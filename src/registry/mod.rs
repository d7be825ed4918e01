//! Blocking HTTP access to upstream package registries.
//!
//! Registries are only used to enrich packages. [`RegistryClient`] wraps a
//! `reqwest` blocking client with the configured timeout; every non-200
//! response becomes [`Error::Registry`]. Modules without network calls expose
//! the canonical URL forms parsers need.

pub mod crates_io;
pub mod maven;
pub mod npm;
pub mod pypi;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: Client,
    offline: bool,
}

impl RegistryClient {
    pub fn new(timeout_secs: u64, offline: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("sbom-parsers/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, offline })
    }

    /// Online client that ignores proxy settings, for loopback servers.
    #[cfg(test)]
    pub(crate) fn local() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .no_proxy()
            .build()
            .unwrap();
        Self {
            client,
            offline: false,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.registry_timeout_secs, config.offline)
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        if self.offline {
            return Err(Error::Registry(format!("offline mode, skipped {}", url)));
        }
        let response = self.client.get(url).send()?;
        if response.status() != StatusCode::OK {
            return Err(Error::Registry(format!("{} returned {}", url, response.status())));
        }
        Ok(response)
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get(url)?;
        response
            .json()
            .map_err(|e| Error::Registry(format!("decode {}: {}", url, e)))
    }

    pub fn get_text(&self, url: &str) -> Result<String> {
        Ok(self.get(url)?.text()?)
    }

    /// True when a HEAD request for `url` answers 200.
    pub fn head_ok(&self, url: &str) -> bool {
        if self.offline {
            return false;
        }
        self.client
            .head(url)
            .send()
            .map(|r| r.status() == StatusCode::OK)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_client_never_calls_out() {
        let client = RegistryClient::new(5, true).unwrap();
        assert!(client.is_offline());
        assert!(!client.head_ok("https://repo1.maven.org/maven2/"));
        let err = client.get_text("https://pypi.org/pypi/requests/json").unwrap_err();
        assert!(matches!(err, Error::Registry(_)));
    }
}
