use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

use crate::error::Result;
use crate::registry::RegistryClient;

/// Subset of the PyPI JSON API response used for enrichment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PypiPackage {
    #[serde(default)]
    pub info: PypiInfo,
    #[serde(default)]
    pub urls: Vec<PypiUrl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PypiInfo {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub version: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub author: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub author_email: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub maintainer: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub maintainer_email: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub home_page: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub license: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub summary: String,
}

/// One distribution file of a release.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PypiUrl {
    #[serde(default)]
    pub digests: HashMap<String, String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub filename: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub packagetype: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub python_version: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub url: String,
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

/// Protocol-less project URL, as stored in `Package::package_url`.
pub fn project_url(name: &str) -> String {
    format!("pypi.org/pypi/{}", name)
}

pub fn release_url(name: &str, version: &str) -> String {
    format!("pypi.org/pypi/{}/{}", name, version)
}

pub fn json_url(name: &str, version: &str) -> String {
    format!("https://pypi.org/pypi/{}/{}/json", name, version)
}

/// Fetch release metadata for `name==version`.
pub fn fetch(client: &RegistryClient, name: &str, version: &str) -> Result<PypiPackage> {
    client.get_json(&json_url(name, version))
}
