use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::command;
use crate::error::{Error, Result};
use crate::graph::{self, Catalog};
use crate::license;
use crate::models::{Checksum, HashAlgorithm, Package, Supplier};
use crate::parser::{
    dir_name, download_location, non_empty_dir, read_file, strip_protocol, Metadata, Parser,
};
use crate::registry::npm as registry;

const PACKAGE_JSON: &str = "package.json";
const PACKAGE_LOCK: &str = "package-lock.json";
const SHRINKWRAP: &str = "npm-shrinkwrap.json";
const NODE_MODULES: &str = "node_modules";

static METADATA: Metadata = Metadata {
    name: "Node Package Manager",
    slug: "npm",
    manifest: &[PACKAGE_JSON, PACKAGE_LOCK],
    module_path: &[NODE_MODULES],
};

/// The subset of `package.json` used for the root and installed packages.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct PackageJson {
    pub name: Option<String>,
    pub version: Option<String>,
    pub author: Option<Author>,
    pub repository: Option<Repository>,
    pub homepage: Option<String>,
    pub license: Option<LicenseField>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    pub dev_dependencies: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Author {
    Text(String),
    Detailed {
        name: Option<String>,
        email: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Repository {
    Url(String),
    Detailed { url: Option<String> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum LicenseField {
    Id(String),
    Detailed {
        #[serde(rename = "type")]
        kind: Option<String>,
    },
}

impl PackageJson {
    pub fn read(path: &Path) -> Result<Self> {
        let content = read_file(path)?;
        serde_json::from_str(&content).map_err(|e| Error::parse("decode package.json", e))
    }

    /// Read `dir/package.json` if present and well formed.
    pub fn read_installed(dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(dir.join(PACKAGE_JSON)).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn supplier(&self, fallback: &str) -> Supplier {
        match &self.author {
            Some(Author::Text(text)) => Supplier::from_author(text, fallback),
            Some(Author::Detailed { name, email }) => {
                let name = name.clone().unwrap_or_default();
                let email = email.clone().unwrap_or_default();
                if name.is_empty() {
                    Supplier::organization(fallback)
                } else if email.is_empty() {
                    Supplier::organization(name)
                } else {
                    Supplier::from_author(&format!("{} <{}>", name, email), fallback)
                }
            }
            None => Supplier::organization(fallback),
        }
    }

    pub fn repository_url(&self) -> String {
        match &self.repository {
            Some(Repository::Url(url)) => url.clone(),
            Some(Repository::Detailed { url }) => url.clone().unwrap_or_default(),
            None => String::new(),
        }
    }

    pub fn license_id(&self) -> String {
        match &self.license {
            Some(LicenseField::Id(id)) => id.clone(),
            Some(LicenseField::Detailed { kind }) => kind.clone().unwrap_or_default(),
            None => String::new(),
        }
    }

    /// Names of `dependencies` followed by `devDependencies`.
    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies
            .keys()
            .chain(self.dev_dependencies.keys())
            .cloned()
            .collect()
    }
}

/// Build the root package of a Node project from its `package.json`.
pub(crate) fn root_package(project: &Path, manifest: &PackageJson) -> Package {
    let name = manifest.name.clone().unwrap_or_else(|| dir_name(project));
    let version = manifest.version.clone().unwrap_or_default();

    let mut root = Package::new(name.trim_start_matches('@'), version.clone());
    root.root = true;
    root.local_path = project.display().to_string();
    root.supplier = manifest.supplier(&name);
    root.checksum = Checksum::from_content(HashAlgorithm::Sha512, format!("{}-{}", name, version));
    root.package_download_location = download_location(&manifest.repository_url());
    let homepage = manifest.homepage.clone().unwrap_or_default();
    root.package_url = strip_protocol(&homepage);
    root.package_home_page = homepage;
    if !license::resolve_into(&mut root, project) {
        root.set_license(&manifest.license_id());
    }
    root
}

/// Decode an SRI string such as `sha512-<base64>` into a hex checksum.
pub(crate) fn decode_integrity(integrity: &str) -> Option<Checksum> {
    let first = integrity.split_whitespace().next()?;
    let (algorithm, encoded) = first.split_once('-')?;
    let bytes = STANDARD.decode(encoded).ok()?;
    Some(Checksum::from_value(
        HashAlgorithm::from_name(algorithm),
        hex::encode(bytes),
    ))
}

/// Run `tool args` and require a semantic version on stdout.
pub(crate) fn node_version_check(tool: &str, args: &[&str]) -> Result<String> {
    let stdout = command::run(tool, args, Path::new("."))?;
    let version = stdout.trim().to_string();
    if semver::Version::parse(&version).is_err() {
        return Err(Error::tooling_absent(tool));
    }
    Ok(version)
}

/// `package-lock.json` / `npm-shrinkwrap.json`.
#[derive(Debug, Default, Deserialize)]
struct PackageLock {
    #[serde(default, rename = "lockfileVersion")]
    lockfile_version: u32,
    #[serde(default)]
    packages: BTreeMap<String, LockPackage>,
    #[serde(default)]
    dependencies: BTreeMap<String, LockDependency>,
}

/// Entry of the v2+ `packages` map, keyed by install path.
#[derive(Debug, Clone, Default, Deserialize)]
struct LockPackage {
    name: Option<String>,
    version: Option<String>,
    resolved: Option<String>,
    integrity: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "optionalDependencies")]
    optional_dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: BTreeMap<String, String>,
}

/// Entry of the v1 nested `dependencies` map.
#[derive(Debug, Clone, Default, Deserialize)]
struct LockDependency {
    #[serde(default)]
    version: String,
    resolved: Option<String>,
    integrity: Option<String>,
    #[serde(default)]
    requires: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: BTreeMap<String, LockDependency>,
}

impl PackageLock {
    /// Install-path keyed entries regardless of lockfile version.
    fn install_tree(&self, manifest: &PackageJson) -> BTreeMap<String, LockPackage> {
        if !self.packages.is_empty() {
            return self.packages.clone();
        }

        let mut tree = BTreeMap::new();
        let root_deps = manifest
            .dependency_names()
            .into_iter()
            .map(|n| (n, String::new()))
            .collect();
        tree.insert(
            String::new(),
            LockPackage {
                dependencies: root_deps,
                ..LockPackage::default()
            },
        );
        flatten_v1(&self.dependencies, "", &mut tree);
        tree
    }
}

fn flatten_v1(
    deps: &BTreeMap<String, LockDependency>,
    prefix: &str,
    tree: &mut BTreeMap<String, LockPackage>,
) {
    for (name, dep) in deps {
        let path = if prefix.is_empty() {
            format!("{}/{}", NODE_MODULES, name)
        } else {
            format!("{}/{}/{}", prefix, NODE_MODULES, name)
        };
        tree.insert(
            path.clone(),
            LockPackage {
                name: Some(name.clone()),
                version: Some(dep.version.clone()),
                resolved: dep.resolved.clone(),
                integrity: dep.integrity.clone(),
                dependencies: dep.requires.clone(),
                ..LockPackage::default()
            },
        );
        flatten_v1(&dep.dependencies, &path, tree);
    }
}

/// Package name from an install path: `node_modules/a/node_modules/@s/b` → `@s/b`.
fn name_from_install_path(path: &str) -> &str {
    path.rsplit("node_modules/").next().unwrap_or(path)
}

/// Node resolution: look in `from/node_modules/dep`, then in each ancestor's
/// `node_modules`, ending at the top level.
fn resolve_install_path(
    tree: &BTreeMap<String, LockPackage>,
    from: &str,
    dep: &str,
) -> Option<String> {
    let mut base = from.to_string();
    loop {
        let candidate = if base.is_empty() {
            format!("{}/{}", NODE_MODULES, dep)
        } else {
            format!("{}/{}/{}", base, NODE_MODULES, dep)
        };
        if tree.contains_key(&candidate) {
            return Some(candidate);
        }
        if base.is_empty() {
            return None;
        }
        base = match base.rfind("/node_modules/") {
            Some(idx) => base[..idx].to_string(),
            None => String::new(),
        };
    }
}

fn lock_entry_package(project: &Path, install_path: &str, entry: &LockPackage) -> Package {
    let raw_name = entry
        .name
        .clone()
        .unwrap_or_else(|| name_from_install_path(install_path).to_string());
    let version = entry.version.clone().unwrap_or_default();

    let mut pkg = Package::new(raw_name.trim_start_matches('@'), version.clone());
    let local_dir = project.join(install_path);
    if local_dir.is_dir() {
        pkg.local_path = local_dir.display().to_string();
    }

    let resolved = entry
        .resolved
        .clone()
        .unwrap_or_else(|| registry::package_page_url(&raw_name, &version));
    pkg.package_download_location = download_location(&resolved);
    pkg.package_url = strip_protocol(&registry::package_page_url(&raw_name, &version));

    pkg.checksum = entry
        .integrity
        .as_deref()
        .and_then(decode_integrity)
        .unwrap_or_else(|| {
            Checksum::from_content(HashAlgorithm::Sha512, format!("{}-{}", raw_name, version))
        });

    let installed = PackageJson::read_installed(&local_dir).unwrap_or_default();
    pkg.supplier = installed.supplier(&raw_name);
    if let Some(homepage) = installed.homepage.as_ref() {
        pkg.package_home_page = homepage.clone();
    }
    if !license::resolve_into(&mut pkg, &local_dir) {
        pkg.set_license(&installed.license_id());
    }
    pkg
}

/// Convert an install tree into a catalog rooted at `root`.
fn build_catalog(
    project: &Path,
    root: &Package,
    tree: &BTreeMap<String, LockPackage>,
) -> Catalog {
    let mut catalog = Catalog::new();
    let mut keys: HashMap<&str, String> = HashMap::new();
    keys.insert("", catalog.insert(root.clone()));

    for (path, entry) in tree {
        // workspace links and the root itself have no node_modules prefix
        if path.is_empty() || !path.contains(NODE_MODULES) {
            continue;
        }
        keys.insert(path.as_str(), catalog.insert(lock_entry_package(project, path, entry)));
    }

    for (path, entry) in tree {
        let Some(parent) = keys.get(path.as_str()).cloned() else {
            continue;
        };
        let deps = entry
            .dependencies
            .keys()
            .chain(entry.optional_dependencies.keys())
            .chain(entry.dev_dependencies.keys());
        for dep in deps {
            let child = resolve_install_path(tree, path, dep).and_then(|p| keys.get(p.as_str()));
            if let Some(child) = child {
                catalog.add_edge(&parent, child);
            }
        }
    }
    catalog
}

/// Parser for npm projects with a `package-lock.json`.
#[derive(Default)]
pub struct NpmParser {
    root: Option<Package>,
}

impl NpmParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// `package-lock.json`, else `npm-shrinkwrap.json`.
    fn lockfile(path: &Path) -> std::path::PathBuf {
        let lock = path.join(PACKAGE_LOCK);
        if lock.exists() {
            lock
        } else {
            path.join(SHRINKWRAP)
        }
    }

    fn build_root(&mut self, path: &Path, deep: bool) -> Result<Package> {
        let manifest = PackageJson::read(&path.join(PACKAGE_JSON))?;
        let mut root = match &self.root {
            Some(root) => root.clone(),
            None => root_package(path, &manifest),
        };

        let content = read_file(&Self::lockfile(path))?;
        let lock: PackageLock =
            serde_json::from_str(&content).map_err(|e| Error::parse("decode package-lock.json", e))?;
        tracing::debug!(version = lock.lockfile_version, "read npm lockfile");

        let tree = lock.install_tree(&manifest);
        let catalog = build_catalog(path, &root, &tree);
        if deep {
            graph::populate(&mut root, &catalog)?;
        } else {
            graph::populate_direct(&mut root, &catalog)?;
        }
        Ok(root)
    }
}

impl Parser for NpmParser {
    fn metadata(&self) -> &Metadata {
        &METADATA
    }

    fn is_valid(&self, path: &Path) -> bool {
        path.join(PACKAGE_JSON).exists()
            && (path.join(PACKAGE_LOCK).exists() || path.join(SHRINKWRAP).exists())
    }

    fn has_modules_installed(&self, path: &Path) -> Result<()> {
        if self.is_valid(path) && non_empty_dir(&path.join(NODE_MODULES)) {
            return Ok(());
        }
        Err(Error::not_installed("`npm install`"))
    }

    fn get_version(&self) -> Result<String> {
        node_version_check("npm", &["--v"])
    }

    fn set_root_module(&mut self, path: &Path) -> Result<()> {
        let manifest = PackageJson::read(&path.join(PACKAGE_JSON))?;
        self.root = Some(root_package(path, &manifest));
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
