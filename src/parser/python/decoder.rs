//! Turns `pip show` output into enriched packages.
//!
//! Lockfiles of the Python front-ends carry no licenses, suppliers or
//! digests. The decoder asks the interpreter for installed metadata, reads
//! the `.dist-info` directory of every package, and matches the installed
//! wheel against the distributions PyPI lists for the release.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::license::{self, spdx};
use crate::models::{is_organization, Checksum, HashAlgorithm, Package, Supplier, SupplierType};
use crate::parser::download_location;
use crate::registry::pypi::{self, PypiPackage, PypiUrl};
use crate::registry::RegistryClient;

const SITE_PACKAGES: &str = "site-packages";
const DIST_INFO: &str = ".dist-info";
const NONE: &str = "None";

/// One block of `pip show` output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipShow {
    pub name: String,
    pub version: String,
    pub summary: String,
    pub home_page: String,
    pub author: String,
    pub author_email: String,
    pub license: String,
    pub location: String,
    pub requires: Vec<String>,
}

/// Split `pip show a b c` output on its `---` separators.
pub fn parse_show_output(output: &str) -> Vec<PipShow> {
    let mut blocks = Vec::new();
    let mut current = PipShow::default();
    for line in output.lines() {
        if line.trim() == "---" {
            if !current.name.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim().to_lowercase().as_str() {
            "name" => current.name = value,
            "version" => current.version = value,
            "summary" => current.summary = value,
            "home-page" => current.home_page = value,
            "author" => current.author = value,
            "author-email" => current.author_email = value,
            "license" => current.license = value,
            "location" => current.location = value,
            "requires" => {
                current.requires = value
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            _ => {}
        }
    }
    if !current.name.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// `Python 3.11.4` → `cp311`; anything unrecognized is a source build.
pub fn short_python_version(version_output: &str) -> String {
    let numbers = version_output
        .split_whitespace()
        .find(|token| token.starts_with(|c: char| c.is_ascii_digit()));
    let mut parts = numbers.unwrap_or_default().split('.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor))
            if !major.is_empty()
                && major.chars().all(|c| c.is_ascii_digit())
                && minor.chars().all(|c| c.is_ascii_digit()) =>
        {
            format!("cp{}{}", major, minor)
        }
        _ => "source".to_string(),
    }
}

/// `.dist-info` directory of an installed package. Outside `site-packages`
/// (editable installs) the location itself is used.
pub fn dist_info_path(location: &str, name: &str, version: &str) -> PathBuf {
    let location = Path::new(location);
    if !location.to_string_lossy().contains(SITE_PACKAGES) {
        return location.to_path_buf();
    }
    let exact = location.join(format!("{}-{}{}", name, version, DIST_INFO));
    if exact.exists() {
        return exact;
    }
    location.join(format!("{}-{}{}", name.replace('-', "_"), version, DIST_INFO))
}

/// `Generator` and `Tag` of a WHEEL file: `bdist_wheel (0.41.2)` → `bdist_wheel`.
pub fn parse_wheel(content: &str) -> (String, String) {
    let mut generator = String::new();
    let mut tag = String::new();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim().to_lowercase().as_str() {
            "generator" => {
                generator = value.split_whitespace().next().unwrap_or_default().to_string()
            }
            "tag" => tag = value.trim().to_string(),
            _ => {}
        }
    }
    (generator, tag)
}

/// Installed metadata plus the paths and wheel signature derived from it.
#[derive(Debug, Clone, Default)]
pub struct PackageMetadata {
    pub show: PipShow,
    pub root: bool,
    pub cp_version: String,
    pub dist_info: PathBuf,
    pub generator: String,
    pub tag: String,
}

impl PackageMetadata {
    pub fn new(show: PipShow, root: bool, cp_version: &str) -> Self {
        let dist_info = dist_info_path(&show.location, &show.name, &show.version);
        let wheel = std::fs::read_to_string(dist_info.join("WHEEL")).ok();
        if wheel.is_none() {
            warn!(package = %show.name, "wheel distribution info not found");
        }
        let (generator, tag) = wheel.as_deref().map(parse_wheel).unwrap_or_default();
        Self {
            show,
            root,
            cp_version: cp_version.to_string(),
            dist_info,
            generator,
            tag,
        }
    }

    fn home_page(&self) -> Option<&str> {
        let home = self.show.home_page.as_str();
        (!home.is_empty() && home != NONE).then_some(home)
    }
}

fn wheel_matches(dist: &PypiUrl, meta: &PackageMetadata) -> bool {
    let generator = dist.packagetype.eq_ignore_ascii_case(&meta.generator);
    let tag = dist.filename.to_lowercase().contains(&meta.tag.to_lowercase());
    let python = dist.python_version.eq_ignore_ascii_case(&meta.cp_version)
        || (!dist.python_version.is_empty()
            && "py2.py3".contains(&dist.python_version.to_lowercase()));
    generator && tag && python
}

fn is_sdist(dist: &PypiUrl) -> bool {
    dist.packagetype.eq_ignore_ascii_case("sdist") && dist.python_version.eq_ignore_ascii_case("source")
}

/// The distribution matching the installed wheel, else the source distribution.
pub fn select_distribution<'a>(urls: &'a [PypiUrl], meta: &PackageMetadata) -> Option<&'a PypiUrl> {
    urls.iter()
        .find(|d| wheel_matches(d, meta))
        .or_else(|| urls.iter().find(|d| is_sdist(d)))
}

const DIGEST_ORDER: [(&str, HashAlgorithm); 9] = [
    ("sha512", HashAlgorithm::Sha512),
    ("sha384", HashAlgorithm::Sha384),
    ("sha256", HashAlgorithm::Sha256),
    ("sha224", HashAlgorithm::Sha224),
    ("sha1", HashAlgorithm::Sha1),
    ("md6", HashAlgorithm::Md6),
    ("md5", HashAlgorithm::Md5),
    ("md4", HashAlgorithm::Md4),
    ("md2", HashAlgorithm::Md2),
];

/// The strongest digest PyPI publishes for a distribution.
pub fn strongest_digest(digests: &HashMap<String, String>) -> Option<Checksum> {
    DIGEST_ORDER.iter().find_map(|(key, algorithm)| {
        digests
            .get(*key)
            .filter(|v| !v.is_empty())
            .map(|v| Checksum::from_value(*algorithm, v.clone()))
    })
}

fn supplier(author: &str, email: &str) -> Supplier {
    let both_none = author.eq_ignore_ascii_case("none") && email.eq_ignore_ascii_case("none");
    let kind = if both_none || is_organization(author) {
        SupplierType::Organization
    } else {
        SupplierType::Person
    };
    Supplier {
        kind,
        name: author.to_string(),
        email: email.to_string(),
    }
}

/// Builds packages from installed metadata, enriched from PyPI when reachable.
pub struct MetadataDecoder {
    client: RegistryClient,
}

impl MetadataDecoder {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    fn fetch(&self, meta: &PackageMetadata) -> Option<PypiPackage> {
        match pypi::fetch(&self.client, &meta.show.name, &meta.show.version) {
            Ok(data) => Some(data),
            Err(err) => {
                warn!(package = %meta.show.name, error = %err, "unable to get package details from pypi.org");
                None
            }
        }
    }

    pub fn build_package(&self, meta: &PackageMetadata) -> Package {
        let pypi = self.fetch(meta);
        build_package(meta, pypi.as_ref())
    }
}

/// Assemble a package from installed metadata and optional PyPI release data.
pub fn build_package(meta: &PackageMetadata, pypi: Option<&PypiPackage>) -> Package {
    let show = &meta.show;
    let mut pkg = Package::new(show.name.clone(), show.version.clone());
    pkg.root = meta.root;
    pkg.local_path = Path::new(&show.location).join(&show.name).display().to_string();
    pkg.package_url = pypi::release_url(&show.name, &show.version);
    pkg.package_home_page = show.home_page.clone();

    if let Some(home) = meta.home_page() {
        if meta.root || pypi.is_none() {
            pkg.package_url = home.to_string();
        }
    }

    let (mut author, mut email) = (show.author.clone(), show.author_email.clone());
    if author == NONE {
        if let Some(data) = pypi {
            author = data.info.maintainer.trim().to_string();
            email = data.info.maintainer_email.trim().to_string();
        }
    }
    pkg.supplier = supplier(&author, &email);

    let dist = pypi.and_then(|data| select_distribution(&data.urls, meta));
    pkg.checksum = dist
        .and_then(|d| strongest_digest(&d.digests))
        .unwrap_or_else(|| Checksum::from_content(HashAlgorithm::Sha1, show.name.clone()));

    let url = match dist {
        Some(d) => d.url.as_str(),
        None if meta.root => meta.home_page().unwrap_or_default(),
        None => "",
    };
    pkg.package_download_location = download_location(url);

    if !license::resolve_into(&mut pkg, &meta.dist_info) {
        let declared = spdx::normalize(&show.license);
        if spdx::is_spdx_id(&declared) {
            pkg.set_license(&declared);
        }
    }
    pkg
}
