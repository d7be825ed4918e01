//! Python projects: pipenv, poetry and plain pip front-ends.
//!
//! The three front-ends differ only in how they reach the project's
//! interpreter and how they spot the root project among installed
//! distributions; everything else is shared by [`PythonParser`].

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::command;
use crate::error::{Error, Result};
use crate::graph::{self, Catalog};
use crate::license;
use crate::models::{Checksum, HashAlgorithm, Package, Supplier};
use crate::parser::{dir_name, Metadata, Parser};
use crate::registry::RegistryClient;

pub mod decoder;
pub mod pipenv;
pub mod poetry;
pub mod pyenv;

use decoder::{parse_show_output, short_python_version, MetadataDecoder, PackageMetadata};

pub use pipenv::Pipenv;
pub use poetry::Poetry;
pub use pyenv::Pyenv;

pub const PIPFILE_LOCK: &str = "Pipfile.lock";
pub const PYPROJECT: &str = "pyproject.toml";
pub const POETRY_LOCK: &str = "poetry.lock";
pub const REQUIREMENTS: &str = "requirements.txt";

const PYVENV_CFG: &str = "pyvenv.cfg";
const MIN_INSTALLED: usize = 3;

/// Which front-end owns a project. Exactly one is chosen, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Pipenv,
    Poetry,
    Pyenv,
}

pub fn flavor(path: &Path) -> Option<Flavor> {
    if path.join(PIPFILE_LOCK).exists() {
        Some(Flavor::Pipenv)
    } else if path.join(PYPROJECT).exists() && path.join(POETRY_LOCK).exists() {
        Some(Flavor::Poetry)
    } else if path.join(REQUIREMENTS).exists() {
        Some(Flavor::Pyenv)
    } else {
        None
    }
}

/// An entry of `pip list -v --format json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipPackage {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub installer: String,
    #[serde(default)]
    pub editable_project_location: Option<String>,
}

pub fn parse_pip_list(output: &str) -> Result<Vec<PipPackage>> {
    serde_json::from_str(output).map_err(|e| Error::parse("read pip list", e))
}

/// A usable environment lists more than a bare interpreter's few packages.
pub fn is_requirement_met(packages: &[PipPackage]) -> bool {
    packages.len() > MIN_INSTALLED
}

/// True when an editable install points at the project itself.
pub fn is_editable_project(pkg: &PipPackage, project: &Path) -> bool {
    let Some(location) = pkg.editable_project_location.as_deref() else {
        return false;
    };
    let canonical = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
    canonical(Path::new(location)) == canonical(project)
}

/// A distribution installed from the working tree rather than an index.
pub fn is_outside_site_packages(pkg: &PipPackage) -> bool {
    let location = pkg.location.replace('\\', "/");
    !location.is_empty() && !location.contains("/src/") && !location.contains("/site-packages")
}

/// `VIRTUAL_ENV`, then `.venv` or `venv` in the project, then the first
/// directory below the project holding a `pyvenv.cfg`.
pub fn find_venv(project: &Path, virtual_env: Option<OsString>) -> Option<PathBuf> {
    if let Some(active) = virtual_env.filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(active));
    }
    for name in [".venv", "venv"] {
        let candidate = project.join(name);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    WalkDir::new(project)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !matches!(e.file_name().to_str(), Some(".git" | "node_modules")))
        .flatten()
        .find(|e| e.file_type().is_file() && e.file_name() == PYVENV_CFG)
        .and_then(|e| e.path().parent().map(Path::to_path_buf))
}

/// Interpreter inside a virtualenv.
pub fn venv_python(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

/// PEP 503 name normalization, used to match `Requires` entries.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace(['_', '.'], "-")
}

/// How a front-end reaches the interpreter and recognizes the root project.
pub trait Frontend: Send {
    fn metadata(&self) -> &'static Metadata;

    fn flavor(&self) -> Flavor;

    /// Program plus leading arguments that run the project's interpreter.
    fn interpreter(&self, project: &Path) -> Result<(String, Vec<String>)>;

    fn install_hint(&self) -> &'static str;

    fn is_root(&self, pkg: &PipPackage, project: &Path) -> bool;
}

/// Root from `pyproject.toml` (`[project]` or `[tool.poetry]`), else the directory name.
pub fn fallback_root(project: &Path) -> Package {
    let manifest: Option<toml::Value> = std::fs::read_to_string(project.join(PYPROJECT))
        .ok()
        .and_then(|content| toml::from_str(&content).ok());
    let table = manifest.as_ref().and_then(|m| {
        m.get("project")
            .or_else(|| m.get("tool").and_then(|t| t.get("poetry")))
    });
    let field = |key: &str| {
        table
            .and_then(|t| t.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    let name = field("name").unwrap_or_else(|| dir_name(project));
    let version = field("version").unwrap_or_default();

    let mut root = Package::new(name.clone(), version.clone());
    root.root = true;
    root.local_path = project.display().to_string();
    root.supplier = Supplier::organization(name.clone());
    root.checksum = Checksum::from_content(HashAlgorithm::Sha256, format!("{}-{}", name, version));
    root.package_download_location = "NONE".to_string();
    license::resolve_into(&mut root, project);
    root
}

/// Link packages by their `Requires` entries. Without an installed root the
/// project root is synthesized and adopts every package nothing else requires.
pub fn build_catalog(entries: Vec<(Package, Vec<String>)>, project: &Path) -> (Package, Catalog) {
    let mut catalog = Catalog::new();
    let mut keys: HashMap<String, String> = HashMap::new();
    for (pkg, _) in &entries {
        keys.insert(normalize_name(&pkg.name), catalog.insert(pkg.clone()));
    }

    let mut required: HashSet<String> = HashSet::new();
    for (pkg, requires) in &entries {
        let parent = pkg.key();
        for name in requires {
            match keys.get(&normalize_name(name)) {
                Some(child) => {
                    catalog.add_edge(&parent, child);
                    required.insert(child.clone());
                }
                None => warn!(requirement = %name, package = %pkg.name, "unable to find required package"),
            }
        }
    }

    let root = match entries.iter().find(|(pkg, _)| pkg.root) {
        Some((pkg, _)) => pkg.clone(),
        None => {
            let root = fallback_root(project);
            let root_key = catalog.insert(root.clone());
            for (pkg, _) in &entries {
                let key = pkg.key();
                if !required.contains(&key) {
                    catalog.add_edge(&root_key, &key);
                }
            }
            root
        }
    };
    (root, catalog)
}

/// A [`Parser`] over any Python front-end.
pub struct PythonParser<F: Frontend> {
    frontend: F,
    decoder: MetadataDecoder,
    path: PathBuf,
    root: Option<Package>,
}

impl<F: Frontend> PythonParser<F> {
    pub fn new(frontend: F, client: RegistryClient) -> Self {
        Self {
            frontend,
            decoder: MetadataDecoder::new(client),
            path: PathBuf::from("."),
            root: None,
        }
    }

    fn run_python<I, S>(&self, project: &Path, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (program, mut full) = self.frontend.interpreter(project)?;
        full.extend(args.into_iter().map(Into::into));
        command::run(&program, &full, project)
    }

    fn installed(&self, project: &Path) -> Result<Vec<PipPackage>> {
        let output = self.run_python(project, ["-m", "pip", "list", "-v", "--format", "json"])?;
        parse_pip_list(&output)
    }

    fn build_root(&mut self, path: &Path, deep: bool) -> Result<Package> {
        let cp_version = self
            .run_python(path, ["-V"])
            .map(|v| short_python_version(&v))
            .unwrap_or_else(|_| "source".to_string());

        let installed = self.installed(path)?;
        if !is_requirement_met(&installed) {
            return Err(Error::not_installed(self.frontend.install_hint()));
        }
        let root_name = installed
            .iter()
            .find(|p| self.frontend.is_root(p, path))
            .map(|p| normalize_name(&p.name));
        debug!(root = ?root_name, packages = installed.len(), "python environment listed");

        let mut args = vec!["-m".to_string(), "pip".to_string(), "show".to_string()];
        args.extend(installed.iter().map(|p| p.name.clone()));
        let shown = parse_show_output(&self.run_python(path, args)?);

        let entries: Vec<(Package, Vec<String>)> = shown
            .into_iter()
            .map(|show| {
                let root = root_name.as_deref() == Some(normalize_name(&show.name).as_str());
                let requires = show.requires.clone();
                let meta = PackageMetadata::new(show, root, &cp_version);
                (self.decoder.build_package(&meta), requires)
            })
            .collect();

        let (mut root, catalog) = build_catalog(entries, path);
        if deep {
            graph::populate(&mut root, &catalog)?;
        } else {
            graph::populate_direct(&mut root, &catalog)?;
        }
        self.root = Some(root.clone());
        Ok(root)
    }
}

impl<F: Frontend> Parser for PythonParser<F> {
    fn metadata(&self) -> &Metadata {
        self.frontend.metadata()
    }

    fn is_valid(&self, path: &Path) -> bool {
        flavor(path) == Some(self.frontend.flavor())
    }

    fn has_modules_installed(&self, path: &Path) -> Result<()> {
        match self.installed(path) {
            Ok(packages) if is_requirement_met(&packages) => Ok(()),
            Ok(_) => Err(Error::not_installed(self.frontend.install_hint())),
            Err(err) => {
                debug!(error = %err, "listing installed python packages failed");
                Err(Error::not_installed(self.frontend.install_hint()))
            }
        }
    }

    fn get_version(&self) -> Result<String> {
        let version = self
            .run_python(&self.path, ["-V"])
            .map_err(|_| Error::VersionNotFound("python".into()))?;
        let version = version.trim();
        if version.is_empty() {
            return Err(Error::VersionNotFound("python".into()));
        }
        Ok(version.to_string())
    }

    fn set_root_module(&mut self, path: &Path) -> Result<()> {
        // the root is only known once the environment has been listed
        self.path = path.to_path_buf();
        Ok(())
    }

    fn get_root_module(&mut self, path: &Path) -> Result<Package> {
        if self.root.is_none() {
            self.build_root(path, false)?;
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
