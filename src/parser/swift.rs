use std::path::Path;

use serde::Deserialize;

use crate::command;
use crate::error::{Error, Result};
use crate::graph::{self, Catalog};
use crate::license;
use crate::models::{Checksum, HashAlgorithm, Package, Supplier};
use crate::parser::{download_location, strip_protocol, Metadata, Parser};

const MANIFEST: &str = "Package.swift";
const BUILD_DIR: &str = ".build";

static METADATA: Metadata = Metadata {
    name: "Swift Package Manager",
    slug: "swift",
    manifest: &[MANIFEST],
    module_path: &[BUILD_DIR],
};

/// Output of `swift package describe --type json`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct PackageDescription {
    pub name: String,
    #[serde(default)]
    pub path: String,
}

/// A node of `swift package show-dependencies --format json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct PackageDependency {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub dependencies: Vec<PackageDependency>,
}

/// First tag of `git describe --tags --exact-match` that is a semantic
/// version, without its `v` prefix.
pub(crate) fn tag_version(output: &str) -> Option<String> {
    output
        .lines()
        .map(|line| line.trim().trim_start_matches('v'))
        .find(|tag| semver::Version::parse(tag).is_ok())
        .map(str::to_string)
}

/// `git+<url>` for git remotes; anything else must pass the download
/// location grammar.
pub(crate) fn dependency_download_location(url: &str) -> String {
    let remote = url.ends_with(".git")
        && (url.starts_with("http") || url.starts_with("ssh") || url.starts_with("git@"));
    if remote {
        format!("git+{}", url)
    } else {
        download_location(url)
    }
}

/// Owner segment of a hosted repository URL: `https://github.com/apple/swift-nio.git` → `apple`.
fn repository_owner(url: &str) -> Option<String> {
    if !url.contains("://") && !url.starts_with("git@") {
        return None;
    }
    let stripped = strip_protocol(url);
    let path = stripped.split_once(['/', ':']).map(|(_, rest)| rest)?;
    path.split('/')
        .next()
        .filter(|owner| !owner.is_empty())
        .map(str::to_string)
}

/// SHA1 of the checked out commit, or `None` outside a git work tree.
fn head_checksum(dir: &Path) -> Option<Checksum> {
    if !dir.is_dir() {
        return None;
    }
    let output = command::run("git", ["rev-parse", "HEAD"], dir).ok()?;
    let commit: String = output.trim().chars().take(40).collect();
    (commit.len() == 40).then(|| Checksum::from_value(HashAlgorithm::Sha1, commit))
}

/// Like [`head_checksum`], but only when `dir` is the top of its own work
/// tree. A checkout without `.git` would otherwise report the enclosing
/// repository's commit.
fn checkout_checksum(dir: &Path) -> Option<Checksum> {
    if !dir.is_dir() {
        return None;
    }
    let toplevel = command::run("git", ["rev-parse", "--show-toplevel"], dir).ok()?;
    if !is_work_tree_root(&toplevel, dir) {
        return None;
    }
    head_checksum(dir)
}

/// Whether `git rev-parse --show-toplevel` output names `dir` itself.
fn is_work_tree_root(toplevel: &str, dir: &Path) -> bool {
    match (Path::new(toplevel.trim()).canonicalize(), dir.canonicalize()) {
        (Ok(top), Ok(dir)) => top == dir,
        _ => false,
    }
}

pub(crate) fn dependency_package(dep: &PackageDependency) -> Package {
    let mut pkg = Package::new(dep.name.clone(), dep.version.clone());
    let url = dep.url.strip_suffix(".git").unwrap_or(&dep.url);
    pkg.package_url = url.to_string();
    pkg.package_download_location = dependency_download_location(&dep.url);
    pkg.supplier = Supplier::organization(repository_owner(&dep.url).unwrap_or_else(|| dep.name.clone()));
    pkg.local_path = dep.path.clone();

    let dir = Path::new(&dep.path);
    pkg.checksum = checkout_checksum(dir).unwrap_or_else(|| {
        Checksum::from_content(HashAlgorithm::Sha1, format!("{}-{}", dep.name, dep.version))
    });
    if dir.is_dir() {
        license::resolve_into(&mut pkg, dir);
    }
    pkg
}

fn add_dependencies(catalog: &mut Catalog, parent: &str, deps: &[PackageDependency]) {
    for dep in deps {
        let pkg = dependency_package(dep);
        let known = catalog.contains(&pkg.key());
        let key = catalog.insert(pkg);
        catalog.add_edge(parent, &key);
        if !known {
            add_dependencies(catalog, &key, &dep.dependencies);
        }
    }
}

/// The root's edges come from the top of the dependency tree.
pub(crate) fn build_catalog(root: &Package, tree: &PackageDependency) -> Catalog {
    let mut catalog = Catalog::new();
    let root_key = catalog.insert(root.clone());
    add_dependencies(&mut catalog, &root_key, &tree.dependencies);
    catalog
}

/// Parser for Swift Package Manager projects.
#[derive(Default)]
pub struct SwiftParser {
    root: Option<Package>,
}

impl SwiftParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn dependency_tree(path: &Path) -> Result<PackageDependency> {
        let output = command::run(
            "swift",
            [
                "package",
                "show-dependencies",
                "--disable-automatic-resolution",
                "--format",
                "json",
            ],
            path,
        )?;
        serde_json::from_str(&output).map_err(|e| Error::parse("read swift dependencies", e))
    }

    fn build_root(&mut self, path: &Path, deep: bool) -> Result<Package> {
        let mut root = self.get_root_module(path)?;
        let tree = Self::dependency_tree(path)?;
        let catalog = build_catalog(&root, &tree);
        if deep {
            graph::populate(&mut root, &catalog)?;
        } else {
            graph::populate_direct(&mut root, &catalog)?;
        }
        Ok(root)
    }
}

impl Parser for SwiftParser {
    fn metadata(&self) -> &Metadata {
        &METADATA
    }

    fn has_modules_installed(&self, path: &Path) -> Result<()> {
        if path.join(BUILD_DIR).exists() {
            Ok(())
        } else {
            Err(Error::not_installed("`swift build`"))
        }
    }

    fn get_version(&self) -> Result<String> {
        let output = command::run("swift", ["--version"], Path::new("."))?;
        output
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::VersionNotFound("swift".into()))
    }

    fn set_root_module(&mut self, path: &Path) -> Result<()> {
        let output = command::run("swift", ["package", "describe", "--type", "json"], path)?;
        let description: PackageDescription =
            serde_json::from_str(&output).map_err(|e| Error::parse("read swift package description", e))?;

        let dir = if description.path.is_empty() {
            path.to_path_buf()
        } else {
            description.path.clone().into()
        };
        let mut root = Package::new(description.name.clone(), String::new());
        root.root = true;
        root.local_path = dir.display().to_string();
        root.supplier = Supplier::organization(description.name.clone());
        root.package_download_location = "NONE".to_string();
        if let Ok(tags) = command::run("git", ["describe", "--tags", "--exact-match"], &dir) {
            root.version = tag_version(&tags).unwrap_or_default();
        }
        root.checksum = head_checksum(&dir).unwrap_or_else(|| {
            Checksum::from_content(HashAlgorithm::Sha1, description.name.clone())
        });
        license::resolve_into(&mut root, &dir);
        self.root = Some(root);
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
