use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::command;
use crate::error::{Error, Result};
use crate::graph::{self, Catalog};
use crate::license;
use crate::models::{Checksum, HashAlgorithm, Package, Supplier};
use crate::parser::{
    download_location, non_empty_dir, read_file, strip_protocol, Metadata, Parser,
};

const COMPOSER_LOCK: &str = "composer.lock";
const COMPOSER_JSON: &str = "composer.json";
const VENDOR: &str = "vendor";

static METADATA: Metadata = Metadata {
    name: "Composer Package Manager",
    slug: "composer",
    manifest: &[COMPOSER_LOCK],
    module_path: &[VENDOR],
};

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Author {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl Author {
    fn render(&self) -> String {
        if self.email.is_empty() {
            self.name.clone()
        } else {
            format!("{} <{}>", self.name, self.email)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Location {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub shasum: String,
}

/// `license` is a string in `composer.json` and a list in `composer.lock`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Licenses {
    One(String),
    Many(Vec<String>),
}

impl Licenses {
    fn first(&self) -> &str {
        match self {
            Licenses::One(id) => id,
            Licenses::Many(ids) => ids.first().map(String::as_str).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct LockPackage {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub dist: Option<Location>,
    pub source: Option<Location>,
    pub license: Option<Licenses>,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub homepage: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LockFile {
    #[serde(default)]
    pub packages: Vec<LockPackage>,
    #[serde(default, rename = "packages-dev")]
    pub packages_dev: Vec<LockPackage>,
}

impl LockFile {
    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::parse("read composer.lock", e))
    }

    fn by_name(&self) -> HashMap<&str, &LockPackage> {
        self.packages
            .iter()
            .chain(&self.packages_dev)
            .map(|p| (p.name.as_str(), p))
            .collect()
    }
}

/// Output of `composer show -s -f json`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ProjectInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub versions: Vec<String>,
}

impl ProjectInfo {
    /// `["* dev-main"]` → `dev-main`.
    fn version(&self) -> String {
        self.versions
            .first()
            .map(|v| v.trim_start_matches('*').trim().to_string())
            .unwrap_or_default()
    }
}

/// The subset of `composer.json` used for the root package.
#[derive(Debug, Default, Deserialize)]
struct ComposerJson {
    license: Option<Licenses>,
    #[serde(default)]
    authors: Vec<Author>,
    #[serde(default)]
    homepage: String,
}

/// A node of `composer show -t -f json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TreeComponent {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub requires: Vec<TreeComponent>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TreeList {
    #[serde(default)]
    pub installed: Vec<TreeComponent>,
}

/// Platform requirements are not packages.
pub(crate) fn is_platform(name: &str) -> bool {
    name == "php"
        || name.starts_with("ext-")
        || name.starts_with("lib-")
        || name.starts_with("composer-")
        || name == "composer"
}

fn vendor_of(name: &str) -> &str {
    name.split('/').next().unwrap_or(name)
}

/// Package for a lock entry: dist before source, SHA1 shasum when present.
pub(crate) fn lock_package(project: &Path, entry: &LockPackage) -> Package {
    let mut pkg = Package::new(entry.name.clone(), entry.version.clone());
    let dist_url = entry.dist.as_ref().map(|d| d.url.as_str()).unwrap_or_default();
    let source_url = entry.source.as_ref().map(|s| s.url.as_str()).unwrap_or_default();
    let shasum = entry.dist.as_ref().map(|d| d.shasum.as_str()).unwrap_or_default();

    pkg.package_download_location =
        download_location(if dist_url.is_empty() { source_url } else { dist_url });
    pkg.package_home_page = entry.homepage.clone();
    pkg.package_url = strip_protocol(if entry.homepage.is_empty() {
        source_url
    } else {
        &entry.homepage
    });
    pkg.checksum = if shasum.is_empty() {
        Checksum::from_content(HashAlgorithm::Sha256, format!("{}-{}", entry.name, entry.version))
    } else {
        Checksum::from_value(HashAlgorithm::Sha1, shasum)
    };
    pkg.supplier = match entry.authors.first() {
        Some(author) => Supplier::from_author(&author.render(), vendor_of(&entry.name)),
        None => Supplier::organization(vendor_of(&entry.name)),
    };

    let dir = project.join(VENDOR).join(&entry.name);
    if dir.is_dir() {
        pkg.local_path = dir.display().to_string();
        if license::resolve_into(&mut pkg, &dir) {
            return pkg;
        }
    }
    pkg.set_license(entry.license.as_ref().map(Licenses::first).unwrap_or_default());
    pkg
}

/// Fill `catalog` with the tree below `parent`, skipping platform requirements.
fn add_components(
    project: &Path,
    lock: &HashMap<&str, &LockPackage>,
    catalog: &mut Catalog,
    parent: &str,
    components: &[TreeComponent],
) {
    for component in components.iter().filter(|c| !is_platform(&c.name)) {
        let pkg = match lock.get(component.name.as_str()) {
            Some(entry) => lock_package(project, entry),
            None => {
                tracing::debug!(package = %component.name, "no composer.lock entry");
                Package::new(component.name.clone(), component.version.clone())
            }
        };
        let already_known = catalog.contains(&pkg.key());
        let key = catalog.insert(pkg);
        catalog.add_edge(parent, &key);
        if !already_known {
            add_components(project, lock, catalog, &key, &component.requires);
        }
    }
}

pub(crate) fn build_catalog(
    project: &Path,
    root: &Package,
    lock: &LockFile,
    tree: &TreeList,
) -> Catalog {
    let by_name = lock.by_name();
    let mut catalog = Catalog::new();
    let root_key = catalog.insert(root.clone());
    add_components(project, &by_name, &mut catalog, &root_key, &tree.installed);
    catalog
}

/// Parser for PHP projects managed by Composer.
#[derive(Default)]
pub struct ComposerParser {
    root: Option<Package>,
}

impl ComposerParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_root(&mut self, path: &Path, deep: bool) -> Result<Package> {
        let mut root = self.get_root_module(path)?;
        let lock = LockFile::parse(&read_file(&path.join(COMPOSER_LOCK))?)?;
        let output = command::run("composer", ["show", "-t", "-f", "json"], path)?;
        let tree: TreeList =
            serde_json::from_str(&output).map_err(|e| Error::parse("read composer tree", e))?;

        let catalog = build_catalog(path, &root, &lock, &tree);
        if deep {
            graph::populate(&mut root, &catalog)?;
        } else {
            graph::populate_direct(&mut root, &catalog)?;
        }
        Ok(root)
    }
}

/// The root from `composer show -s` output, enriched from `composer.json`.
pub(crate) fn root_package(project: &Path, info: &ProjectInfo) -> Package {
    let manifest: ComposerJson = std::fs::read_to_string(project.join(COMPOSER_JSON))
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default();

    let version = info.version();
    let mut root = Package::new(info.name.clone(), version.clone());
    root.root = true;
    root.local_path = project.display().to_string();
    root.checksum =
        Checksum::from_content(HashAlgorithm::Sha256, format!("{}-{}", info.name, version));
    root.package_home_page = manifest.homepage.clone();
    root.package_url = strip_protocol(&manifest.homepage);
    root.package_download_location = download_location(&manifest.homepage);
    root.supplier = match manifest.authors.first() {
        Some(author) => Supplier::from_author(&author.render(), vendor_of(&info.name)),
        None => Supplier::organization(vendor_of(&info.name)),
    };
    if !license::resolve_into(&mut root, project) {
        root.set_license(manifest.license.as_ref().map(Licenses::first).unwrap_or_default());
    }
    root
}

impl Parser for ComposerParser {
    fn metadata(&self) -> &Metadata {
        &METADATA
    }

    fn has_modules_installed(&self, path: &Path) -> Result<()> {
        if non_empty_dir(&path.join(VENDOR)) {
            Ok(())
        } else {
            Err(Error::not_installed("`composer install`"))
        }
    }

    fn get_version(&self) -> Result<String> {
        let output = command::run("composer", ["--version"], Path::new("."))?;
        Ok(output.trim().to_string())
    }

    fn set_root_module(&mut self, path: &Path) -> Result<()> {
        let output = command::run("composer", ["show", "-s", "-f", "json"], path)?;
        let info: ProjectInfo =
            serde_json::from_str(&output).map_err(|e| Error::parse("read composer project info", e))?;
        self.root = Some(root_package(path, &info));
        Ok(())
    }

    fn get_root_module(&mut self, path: &Path) -> Result<Package> {
        if self.root.is_none() {
            self.set_root_module(path)?;
        }
        self.root.clone().ok_or(Error::FailedToConvertModules)
    }

    fn list_used_modules(&mut self, path: &Path) -> Result<Vec<Package>> {
        let root = self.build_root(path, false)?;
        Ok(root.packages.values().cloned().collect())
    }

    fn list_modules_with_deps(
        &mut self,
        path: &Path,
        _global_settings: Option<&Path>,
    ) -> Result<Vec<Package>> {
        let root = self.build_root(path, true)?;
        let mut modules = vec![root.clone()];
        modules.extend(root.packages.values().cloned());
        Ok(modules)
    }
}
