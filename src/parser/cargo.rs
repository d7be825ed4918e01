use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::command;
use crate::config::DEFAULT_TARGET_TRIPLE;
use crate::error::{Error, Result};
use crate::graph::{self, Catalog};
use crate::license;
use crate::models::{Checksum, HashAlgorithm, Package, Supplier};
use crate::parser::{dir_name, read_file, strip_protocol, Metadata, Parser};
use crate::registry::crates_io::{self, CRATES_IO_SOURCE};

const MANIFEST: &str = "Cargo.toml";
const LOCKFILE: &str = "Cargo.lock";

static METADATA: Metadata = Metadata {
    name: "Cargo Package Manager",
    slug: "cargo",
    manifest: &[MANIFEST],
    module_path: &[],
};

#[derive(Debug, Deserialize)]
struct CargoLock {
    #[serde(default)]
    package: Vec<CargoLockPackage>,
}

#[derive(Debug, Deserialize)]
struct CargoLockPackage {
    name: String,
    version: String,
    checksum: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    package: Option<ManifestPackage>,
    #[serde(default)]
    dependencies: HashMap<String, RawDependency>,
    #[serde(default)]
    bin: Vec<ManifestBin>,
    #[serde(default)]
    target: HashMap<String, TargetSection>,
}

/// `[target.'cfg(...)'.dependencies]`.
#[derive(Debug, Default, Deserialize)]
struct TargetSection {
    #[serde(default)]
    dependencies: HashMap<String, RawDependency>,
}

#[derive(Debug, Deserialize)]
struct ManifestPackage {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ManifestBin {
    name: Option<String>,
}

/// `dep = "1.0"` or `dep = { version = "1.0", package = "real-name", ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Version(String),
    Detailed {
        version: Option<String>,
        package: Option<String>,
    },
}

/// Output of `cargo metadata --format-version=1`.
#[derive(Debug, Deserialize)]
struct CargoMetadata {
    packages: Vec<MetaPackage>,
    resolve: Option<Resolve>,
}

#[derive(Debug, Deserialize)]
struct MetaPackage {
    id: String,
    name: String,
    version: String,
    license: Option<String>,
    source: Option<String>,
    #[serde(default)]
    dependencies: Vec<MetaDependency>,
    manifest_path: String,
    #[serde(default)]
    authors: Vec<String>,
    repository: Option<String>,
    homepage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetaDependency {
    name: String,
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Resolve {
    #[serde(default)]
    nodes: Vec<ResolveNode>,
}

#[derive(Debug, Deserialize)]
struct ResolveNode {
    id: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Parser for Rust projects built with Cargo.
pub struct CargoParser {
    target_triple: String,
    root_name: Option<String>,
    declared: HashSet<String>,
}

impl CargoParser {
    pub fn new(target_triple: impl Into<String>) -> Self {
        Self {
            target_triple: target_triple.into(),
            root_name: None,
            declared: HashSet::new(),
        }
    }

    fn root_name(&mut self, path: &Path) -> Result<String> {
        if self.root_name.is_none() {
            self.set_root_module(path)?;
        }
        Ok(self.root_name.clone().unwrap_or_else(|| dir_name(path)))
    }

    fn metadata_output(&self, path: &Path) -> Result<CargoMetadata> {
        let platform = format!("--filter-platform={}", self.target_triple);
        let stdout = command::run(
            "cargo",
            ["metadata", "--format-version=1", platform.as_str()],
            path,
        )?;
        serde_json::from_str(&stdout).map_err(|e| Error::parse("decode cargo metadata", e))
    }

    /// Root package with direct dependencies attached; `deep` fills the whole tree.
    fn build_root(&mut self, path: &Path, deep: bool) -> Result<Package> {
        let root_name = self.root_name(path)?;
        let metadata = self.metadata_output(path)?;
        let checksums = read_lock_checksums(&path.join(LOCKFILE))?;
        let (catalog, root_key) =
            build_catalog(&metadata, &checksums, &root_name, &self.declared)?;

        let mut root = catalog
            .get(&root_key)
            .cloned()
            .ok_or(Error::FailedToConvertModules)?;
        if deep {
            graph::populate(&mut root, &catalog)?;
        } else {
            graph::populate_direct(&mut root, &catalog)?;
        }
        debug!(root = %root.name, deps = root.packages.len(), "cargo graph assembled");
        Ok(root)
    }
}

impl Default for CargoParser {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_TRIPLE)
    }
}

impl Parser for CargoParser {
    fn metadata(&self) -> &Metadata {
        &METADATA
    }

    fn has_modules_installed(&self, path: &Path) -> Result<()> {
        if path.join(LOCKFILE).exists() {
            return Ok(());
        }
        Err(Error::not_installed("`cargo generate-lockfile`"))
    }

    fn get_version(&self) -> Result<String> {
        let stdout = command::run("cargo", ["--version"], Path::new("."))?;
        let version = stdout.trim().trim_start_matches("cargo ").trim().to_string();
        if version.is_empty() {
            return Err(Error::VersionNotFound("cargo".into()));
        }
        Ok(version)
    }

    fn set_root_module(&mut self, path: &Path) -> Result<()> {
        let manifest = read_manifest(&path.join(MANIFEST))?;
        self.root_name = Some(manifest_root_name(&manifest).unwrap_or_else(|| dir_name(path)));
        self.declared = manifest_dependencies(&manifest).into_keys().collect();
        Ok(())
    }

    fn get_root_module(&mut self, path: &Path) -> Result<Package> {
        let mut root = self.build_root(path, false)?;
        root.set_packages(Default::default());
        Ok(root)
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

fn read_manifest(path: &Path) -> Result<Manifest> {
    let content = read_file(path)?;
    toml::from_str(&content).map_err(|e| Error::parse("decode Cargo.toml", e))
}

fn manifest_root_name(manifest: &Manifest) -> Option<String> {
    manifest
        .package
        .as_ref()
        .map(|p| p.name.clone())
        .or_else(|| manifest.bin.iter().find_map(|b| b.name.clone()))
}

/// Declared direct dependencies of a manifest as `package name → version
/// requirement`, target-specific tables included. Renamed dependencies are
/// keyed by the package they point at.
fn manifest_dependencies(manifest: &Manifest) -> HashMap<String, String> {
    manifest
        .dependencies
        .iter()
        .chain(manifest.target.values().flat_map(|t| t.dependencies.iter()))
        .map(|(name, dep)| match dep {
            RawDependency::Version(v) => (name.clone(), v.clone()),
            RawDependency::Detailed { version, package } => (
                package.clone().unwrap_or_else(|| name.clone()),
                version.clone().unwrap_or_default(),
            ),
        })
        .collect()
}

/// `name:version → checksum` from `Cargo.lock`. A missing lockfile yields an empty map.
fn read_lock_checksums(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = read_file(path)?;
    parse_lock_checksums(&content)
}

fn parse_lock_checksums(content: &str) -> Result<HashMap<String, String>> {
    let lock: CargoLock =
        toml::from_str(content).map_err(|e| Error::parse("decode Cargo.lock", e))?;
    Ok(lock
        .package
        .into_iter()
        .filter_map(|p| {
            p.checksum
                .map(|sum| (format!("{}:{}", p.name, p.version), sum))
        })
        .collect())
}

/// Convert `cargo metadata` output into a catalog and return the root key.
///
/// When `declared` is non-empty the root keeps only edges to those names, which
/// drops dev and build dependencies the resolver reports for the root.
fn build_catalog(
    metadata: &CargoMetadata,
    checksums: &HashMap<String, String>,
    root_name: &str,
    declared: &HashSet<String>,
) -> Result<(Catalog, String)> {
    let mut catalog = Catalog::new();
    let mut by_id: HashMap<&str, String> = HashMap::new();
    let mut root_key = None;

    for meta in &metadata.packages {
        let is_root = meta.name == root_name && meta.source.is_none();
        let pkg = to_package(meta, checksums, is_root);
        let key = catalog.insert(pkg);
        if is_root {
            root_key = Some(key.clone());
        }
        by_id.insert(meta.id.as_str(), key);
    }

    let root_key = root_key.ok_or_else(|| {
        Error::Resolution(format!("root package `{}` not in cargo metadata", root_name))
    })?;

    let mut edges: Vec<(String, String)> = Vec::new();
    match metadata.resolve.as_ref().filter(|r| !r.nodes.is_empty()) {
        Some(resolve) => {
            for node in &resolve.nodes {
                let Some(parent) = by_id.get(node.id.as_str()) else {
                    continue;
                };
                for dep_id in &node.dependencies {
                    if let Some(child) = by_id.get(dep_id.as_str()) {
                        edges.push((parent.clone(), child.clone()));
                    }
                }
            }
        }
        None => {
            for meta in &metadata.packages {
                let Some(parent) = by_id.get(meta.id.as_str()) else {
                    continue;
                };
                for dep in meta.dependencies.iter().filter(|d| d.kind.as_deref() != Some("dev")) {
                    let child = metadata
                        .packages
                        .iter()
                        .find(|p| p.name == dep.name)
                        .and_then(|p| by_id.get(p.id.as_str()));
                    if let Some(child) = child {
                        edges.push((parent.clone(), child.clone()));
                    }
                }
            }
        }
    }

    for (parent, child) in edges {
        if parent == root_key && !declared.is_empty() {
            let name = catalog.get(&child).map(|p| p.name.as_str()).unwrap_or_default();
            if !declared.contains(name) {
                continue;
            }
        }
        catalog.add_edge(&parent, &child);
    }

    Ok((catalog, root_key))
}

fn to_package(meta: &MetaPackage, checksums: &HashMap<String, String>, root: bool) -> Package {
    let mut pkg = Package::new(&meta.name, &meta.version);
    pkg.root = root;

    let manifest_path = PathBuf::from(&meta.manifest_path);
    let local_dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    pkg.local_path = local_dir.display().to_string();

    pkg.package_url = [&meta.homepage, &meta.source, &meta.repository]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .map(|s| strip_protocol(s.trim_start_matches("registry+")))
        .unwrap_or_default();
    pkg.package_home_page = meta.homepage.clone().unwrap_or_default();

    pkg.package_download_location = if root {
        meta.repository.clone().unwrap_or_default()
    } else if meta.source.as_deref() == Some(CRATES_IO_SOURCE) {
        crates_io::download_url(&meta.name, &meta.version)
    } else {
        String::new()
    };

    pkg.supplier = match meta.authors.first() {
        Some(author) => Supplier::from_author(author, &meta.name),
        None => Supplier::organization(&meta.name),
    };

    pkg.checksum = match checksums.get(&pkg.key()) {
        Some(sum) => Checksum::from_value(HashAlgorithm::Sha256, sum),
        None => {
            let content = std::fs::read(&manifest_path).unwrap_or_else(|_| pkg.key().into_bytes());
            Checksum::from_content(HashAlgorithm::Sha256, content)
        }
    };

    if !license::resolve_into(&mut pkg, &local_dir) {
        pkg.set_license(meta.license.as_deref().unwrap_or_default());
    }
    pkg
}
