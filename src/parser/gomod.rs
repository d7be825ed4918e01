use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::command;
use crate::error::{Error, Result};
use crate::graph::{self, Catalog};
use crate::license;
use crate::models::{Checksum, HashAlgorithm, Package, Supplier};
use crate::parser::{git_origin_url, git_remote_to_download_location, Metadata, Parser};

const VENDOR: &str = "vendor";

static METADATA: Metadata = Metadata {
    name: "Go Modules",
    slug: "go-mod",
    manifest: &["go.mod"],
    module_path: &[],
};

/// A record of `go list -m -json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct GoModule {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub main: bool,
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub go_mod: String,
    pub replace: Option<Box<GoModule>>,
}

impl GoModule {
    /// The module name, following a `replace` that points at another module path.
    fn name(&self) -> &str {
        match self.replace.as_deref() {
            Some(replace)
                if !replace.path.is_empty()
                    && !replace.path.starts_with('.')
                    && !replace.path.starts_with('/') =>
            {
                &replace.path
            }
            _ => &self.path,
        }
    }
}

/// Decode the concatenated JSON objects printed by `go list -m -json all`.
/// Records without a path are skipped, repeated paths are kept once.
pub(crate) fn decode_module_stream(output: &str) -> Result<Vec<GoModule>> {
    let mut seen = HashSet::new();
    let mut modules = Vec::new();
    for record in serde_json::Deserializer::from_str(output).into_iter::<GoModule>() {
        let module = record.map_err(|e| Error::parse("decode go list output", e))?;
        if module.path.is_empty() || !seen.insert(module.path.clone()) {
            continue;
        }
        modules.push(module);
    }
    Ok(modules)
}

/// Split `go mod graph` output into `(parent, dependency)` module paths.
pub(crate) fn parse_graph(output: &str) -> Result<Vec<(String, String)>> {
    let mut edges = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [parent, dep] = fields.as_slice() else {
            return Err(Error::parse(
                "read go mod graph",
                format!("malformed line {:?}", line),
            ));
        };
        let strip = |s: &str| s.split('@').next().unwrap_or(s).to_string();
        edges.push((strip(*parent), strip(*dep)));
    }
    Ok(edges)
}

pub(crate) fn download_url(path: &str, version: &str) -> String {
    if path.starts_with("github.com") {
        if version.is_empty() {
            format!("git+https://{}.git", path)
        } else {
            format!("https://{}/releases/tag/{}", path, version)
        }
    } else {
        format!("https://{}", path)
    }
}

fn local_path(project: &Path, module: &GoModule) -> String {
    let vendored = project.join(VENDOR).join(&module.path);
    if vendored.exists() {
        vendored.display().to_string()
    } else {
        module.dir.clone()
    }
}

/// SHA256 over the module's `go.mod`, or over its path when the file is unavailable.
fn module_checksum(module: &GoModule) -> Checksum {
    let content = std::fs::read(&module.go_mod).unwrap_or_else(|_| module.path.clone().into_bytes());
    Checksum::from_content(HashAlgorithm::Sha256, content)
}

fn to_package(project: &Path, module: &GoModule, main_path: &str) -> Package {
    let name = module.name().to_string();
    let mut pkg = Package::new(name.clone(), module.version.clone());
    pkg.local_path = local_path(project, module);
    pkg.package_url = module.path.clone();
    pkg.package_download_location = download_url(&module.path, &module.version);
    pkg.checksum = module_checksum(module);
    pkg.supplier = Supplier::organization(name);

    let dir = PathBuf::from(&pkg.local_path);
    if module.path == main_path {
        pkg.root = true;
        pkg.package_download_location = dir
            .is_dir()
            .then(|| git_origin_url(&dir))
            .flatten()
            .map(|url| git_remote_to_download_location(&url))
            .unwrap_or_default();
    }
    if dir.is_dir() {
        license::resolve_into(&mut pkg, &dir);
    }
    pkg
}

/// Build a catalog from listed modules and graph edges between known modules.
fn build_catalog(modules: &[Package], paths: &[String], edges: &[(String, String)]) -> Catalog {
    let mut catalog = Catalog::new();
    let mut keys: HashMap<&str, String> = HashMap::new();
    for (pkg, path) in modules.iter().zip(paths) {
        keys.insert(path.as_str(), catalog.insert(pkg.clone()));
    }
    for (parent, dep) in edges {
        match (keys.get(parent.as_str()), keys.get(dep.as_str())) {
            (Some(parent), Some(dep)) => catalog.add_edge(parent, dep),
            _ => tracing::debug!(%parent, %dep, "skipping go mod graph edge to unlisted module"),
        }
    }
    catalog
}

/// Parser for Go module projects.
#[derive(Default)]
pub struct GoModParser {
    root: Option<Package>,
    main_path: String,
}

impl GoModParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_root(&mut self, path: &Path, deep: bool) -> Result<Package> {
        if self.main_path.is_empty() {
            self.set_root_module(path)?;
        }

        let listing = command::run("go", ["list", "-m", "-json", "all"], path)?;
        let modules = decode_module_stream(&listing)?;
        let paths: Vec<String> = modules.iter().map(|m| m.path.clone()).collect();
        let packages: Vec<Package> = modules
            .iter()
            .map(|m| to_package(path, m, &self.main_path))
            .collect();

        let graph_output = command::run("go", ["mod", "graph"], path)?;
        let edges = parse_graph(&graph_output)?;
        let catalog = build_catalog(&packages, &paths, &edges);

        let mut root = packages
            .into_iter()
            .find(|p| p.root)
            .ok_or(Error::FailedToConvertModules)?;
        if deep {
            graph::populate(&mut root, &catalog)?;
        } else {
            graph::populate_direct(&mut root, &catalog)?;
        }
        Ok(root)
    }
}

impl Parser for GoModParser {
    fn metadata(&self) -> &Metadata {
        &METADATA
    }

    fn has_modules_installed(&self, _path: &Path) -> Result<()> {
        // `go list` downloads what it needs
        Ok(())
    }

    fn get_version(&self) -> Result<String> {
        let output = command::run("go", ["version"], Path::new("."))?;
        Ok(output.trim().to_string())
    }

    fn set_root_module(&mut self, path: &Path) -> Result<()> {
        let output = command::run("go", ["list", "-mod", "readonly", "-m", "-json"], path)?;
        let module = decode_module_stream(&output)?
            .into_iter()
            .next()
            .ok_or(Error::FailedToConvertModules)?;
        self.main_path = module.path.clone();
        self.root = Some(to_package(path, &module, &module.path));
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
