use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::graph::{self, Catalog};
use crate::license;
use crate::models::{Checksum, HashAlgorithm, Package, Supplier};
use crate::parser::npm::{decode_integrity, node_version_check, root_package, PackageJson};
use crate::parser::{
    all_exist, download_location, non_empty_dir, read_file, strip_protocol, Metadata, Parser,
};
use crate::registry::npm as registry;

const PACKAGE_JSON: &str = "package.json";
const LOCK_FILE: &str = "pnpm-lock.yaml";
const NODE_MODULES: &str = "node_modules";

static METADATA: Metadata = Metadata {
    name: "Performant Node Package Manager",
    slug: "pnpm",
    manifest: &[PACKAGE_JSON, LOCK_FILE],
    module_path: &[NODE_MODULES],
};

/// `lockfileVersion` is a number in old lockfiles and a string from 6.0 on.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LockfileVersion {
    Number(f64),
    Text(String),
}

impl LockfileVersion {
    fn number(&self) -> Result<f64> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(s) => s
                .trim()
                .parse()
                .map_err(|e| Error::parse("decode pnpm lockfileVersion", e)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum KeyFormat {
    /// `/{name}/{version}[_{peers}]`
    Legacy,
    /// `/{name}@{version}[({peers})]`, leading slash dropped from 9.0
    V6,
}

impl KeyFormat {
    fn for_version(version: f64) -> Self {
        if version >= 6.0 {
            Self::V6
        } else {
            Self::Legacy
        }
    }
}

/// Importer dependency: a bare version before 6.0, `{specifier, version}` after.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ImporterDependency {
    Version(String),
    Detailed { version: String },
}

impl ImporterDependency {
    fn version(&self) -> &str {
        match self {
            Self::Version(v) => v,
            Self::Detailed { version } => version,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Importer {
    #[serde(default)]
    dependencies: BTreeMap<String, ImporterDependency>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: BTreeMap<String, ImporterDependency>,
    #[serde(default, rename = "optionalDependencies")]
    optional_dependencies: BTreeMap<String, ImporterDependency>,
}

impl Importer {
    fn all(&self) -> impl Iterator<Item = (&String, &ImporterDependency)> {
        self.dependencies
            .iter()
            .chain(self.dev_dependencies.iter())
            .chain(self.optional_dependencies.iter())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Resolution {
    integrity: Option<String>,
    tarball: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LockPackage {
    resolution: Option<Resolution>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "optionalDependencies")]
    optional_dependencies: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PnpmLock {
    #[serde(rename = "lockfileVersion")]
    lockfile_version: LockfileVersion,
    #[serde(flatten)]
    root: Importer,
    #[serde(default)]
    importers: BTreeMap<String, Importer>,
    #[serde(default)]
    packages: BTreeMap<String, LockPackage>,
    #[serde(default)]
    snapshots: BTreeMap<String, LockPackage>,
}

/// A decoded `packages:` key.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PackageKey {
    pub name: String,
    pub version: String,
    pub belonging: String,
}

/// Split a lockfile 6.0+ key: `/@babel/plugin@7.22.9(@babel/core@7.22.10)`.
pub(crate) fn split_key_v6(key: &str) -> Option<PackageKey> {
    let (pure, extra) = match key.split_once('(') {
        Some((pure, extra)) => (pure, extra),
        None => (key, ""),
    };
    let at = pure.rfind('@')?;
    let name = pure[..at].trim_start_matches('/');
    if name.is_empty() {
        return None;
    }
    Some(PackageKey {
        name: name.to_string(),
        version: pure[at + 1..].to_string(),
        belonging: extra.split(')').next().unwrap_or_default().to_string(),
    })
}

/// Split a pre-6.0 key: `/@babel/plugin/7.8.3_@babel+core@7.15.0`.
pub(crate) fn split_key_legacy(key: &str) -> Option<PackageKey> {
    let (name, segment) = key.rsplit_once('/')?;
    // peers hang off the version segment; names may contain `_`
    let (version, belonging) = segment.split_once('_').unwrap_or((segment, ""));
    let name = name.trim_start_matches('/');
    if name.is_empty() {
        return None;
    }
    Some(PackageKey {
        name: name.to_string(),
        version: version.to_string(),
        belonging: belonging.to_string(),
    })
}

fn split_key(format: KeyFormat, key: &str) -> Option<PackageKey> {
    match format {
        KeyFormat::V6 => split_key_v6(key),
        KeyFormat::Legacy => split_key_legacy(key),
    }
}

/// Version of a dependency reference without its peer suffix or range prefix.
fn bare_version(format: KeyFormat, reference: &str) -> String {
    let cut = match format {
        KeyFormat::V6 => reference.split('(').next(),
        KeyFormat::Legacy => reference.split('_').next(),
    };
    cut.unwrap_or(reference)
        .trim()
        .trim_start_matches(['^', '~', '>', '=', ' '])
        .to_string()
}

/// Catalog key for a dependency reference; references such as `/name/1.0.0`
/// or `name@1.0.0` carry their own name.
fn reference_key(format: KeyFormat, name: &str, reference: &str) -> String {
    if reference.starts_with('/') {
        if let Some(key) = split_key(format, reference) {
            return format!("{}:{}", key.name.trim_start_matches('@'), key.version);
        }
    }
    format!("{}:{}", name.trim_start_matches('@'), bare_version(format, reference))
}

/// Directory holding an installed package, either hoisted or in the virtual store.
fn installed_dir(project: &Path, key: &PackageKey) -> Option<PathBuf> {
    let hoisted = project.join(NODE_MODULES).join(&key.name);
    if hoisted.is_dir() {
        return Some(hoisted);
    }
    let mut store_dir = format!("{}@{}", key.name.replace('/', "+"), key.version);
    if !key.belonging.is_empty() {
        store_dir = format!("{}_{}", store_dir, key.belonging);
    }
    let virtual_store = project
        .join(NODE_MODULES)
        .join(".pnpm")
        .join(store_dir)
        .join(NODE_MODULES)
        .join(&key.name);
    virtual_store.is_dir().then_some(virtual_store)
}

fn lock_entry_package(project: &Path, key: &PackageKey, entry: &LockPackage) -> Package {
    let mut pkg = Package::new(key.name.trim_start_matches('@'), key.version.clone());
    let resolution = entry.resolution.clone().unwrap_or_default();

    let tarball = resolution
        .tarball
        .unwrap_or_else(|| registry::tarball_url(&key.name, &key.version));
    pkg.package_download_location = download_location(&tarball);
    pkg.checksum = resolution
        .integrity
        .as_deref()
        .and_then(decode_integrity)
        .unwrap_or_else(|| {
            Checksum::from_content(HashAlgorithm::Sha256, format!("{}-{}", key.name, key.version))
        });

    let Some(dir) = installed_dir(project, key) else {
        pkg.supplier = Supplier::organization(key.name.clone());
        return pkg;
    };
    pkg.local_path = dir.display().to_string();
    let installed = PackageJson::read_installed(&dir).unwrap_or_default();
    pkg.supplier = installed.supplier(&key.name);
    if let Some(homepage) = installed.homepage.as_ref() {
        pkg.package_url = strip_protocol(homepage);
        pkg.package_home_page = homepage.clone();
    }
    if !license::resolve_into(&mut pkg, &dir) {
        pkg.set_license(&installed.license_id());
    }
    pkg
}

fn build_catalog(project: &Path, root: &Package, lock: &PnpmLock) -> Result<Catalog> {
    let format = KeyFormat::for_version(lock.lockfile_version.number()?);
    tracing::debug!(?format, "decoding pnpm lockfile");

    let mut catalog = Catalog::new();
    let root_key = catalog.insert(root.clone());

    let mut entries: BTreeMap<String, LockPackage> = lock.packages.clone();
    for (key, snapshot) in &lock.snapshots {
        let entry = entries.entry(key.clone()).or_default();
        entry.dependencies.extend(snapshot.dependencies.clone());
        entry
            .optional_dependencies
            .extend(snapshot.optional_dependencies.clone());
    }

    let mut decoded = Vec::new();
    for (raw, entry) in &entries {
        let Some(key) = split_key(format, raw) else {
            tracing::warn!(key = %raw, "skipping undecodable pnpm package key");
            continue;
        };
        let pkg_key = catalog.insert(lock_entry_package(project, &key, entry));
        decoded.push((pkg_key, entry));
    }

    for (parent, entry) in decoded {
        for (name, reference) in entry
            .dependencies
            .iter()
            .chain(entry.optional_dependencies.iter())
        {
            let child = reference_key(format, name, reference);
            if catalog.contains(&child) {
                catalog.add_edge(&parent, &child);
            }
        }
    }

    let importer = lock.importers.get(".").unwrap_or(&lock.root);
    for (name, dep) in importer.all() {
        let child = reference_key(format, name, dep.version());
        if catalog.contains(&child) {
            catalog.add_edge(&root_key, &child);
        }
    }
    Ok(catalog)
}

/// Parser for pnpm projects.
#[derive(Default)]
pub struct PnpmParser {
    root: Option<Package>,
}

impl PnpmParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_lock(path: &Path) -> Result<PnpmLock> {
        let content = read_file(&path.join(LOCK_FILE))?;
        serde_yaml::from_str(&content).map_err(|e| Error::parse("decode pnpm-lock.yaml", e))
    }

    fn build_root(&mut self, path: &Path, deep: bool) -> Result<Package> {
        let mut root = self.get_root_module(path)?;
        let lock = Self::read_lock(path)?;
        let catalog = build_catalog(path, &root, &lock)?;
        if deep {
            graph::populate(&mut root, &catalog)?;
        } else {
            graph::populate_direct(&mut root, &catalog)?;
        }
        Ok(root)
    }
}

impl Parser for PnpmParser {
    fn metadata(&self) -> &Metadata {
        &METADATA
    }

    fn is_valid(&self, path: &Path) -> bool {
        all_exist(path, METADATA.manifest)
    }

    fn has_modules_installed(&self, path: &Path) -> Result<()> {
        if self.is_valid(path) && non_empty_dir(&path.join(NODE_MODULES)) {
            return Ok(());
        }
        Err(Error::not_installed("`pnpm install`"))
    }

    fn get_version(&self) -> Result<String> {
        node_version_check("pnpm", &["-v"])
    }

    fn set_root_module(&mut self, path: &Path) -> Result<()> {
        let manifest = PackageJson::read(&path.join(PACKAGE_JSON))?;
        let mut root = root_package(path, &manifest);
        root.checksum = Checksum::from_content(
            HashAlgorithm::Sha256,
            format!("{}-{}", root.name, root.version),
        );
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

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK_V6: &str = r#"lockfileVersion: '6.0'

dependencies:
  '@babel/plugin':
    specifier: ^7.22.9
    version: 7.22.9(@babel/core@7.22.10)
  ms:
    specifier: ^2.1.2
    version: 2.1.2

packages:

  /@babel/core@7.22.10:
    resolution: {integrity: sha512-TIGnTpdo+E3+pCyAluZvtED5p5wCqLdezCyhPZzKPcxvFplEt4i+W7OONCKgeZFT3+y5NZZfOOS/Bdcanm1MYA==}
    dependencies:
      ms: 2.1.2
    dev: false

  /@babel/plugin@7.22.9(@babel/core@7.22.10):
    resolution: {integrity: sha512-TIGnTpdo+E3+pCyAluZvtED5p5wCqLdezCyhPZzKPcxvFplEt4i+W7OONCKgeZFT3+y5NZZfOOS/Bdcanm1MYA==}
    dependencies:
      '@babel/core': 7.22.10
    dev: false

  /ms@2.1.2:
    resolution:
      integrity: sha512-TIGnTpdo+E3+pCyAluZvtED5p5wCqLdezCyhPZzKPcxvFplEt4i+W7OONCKgeZFT3+y5NZZfOOS/Bdcanm1MYA==
      tarball: https://mirror.example.com/ms-2.1.2.tgz
    dev: false
"#;

    const LOCK_V5: &str = r#"lockfileVersion: 5.4

specifiers:
  esprima: ^1.2.5

dependencies:
  esprima: 1.2.5
  '@babel/plugin-syntax-json-strings': 7.8.3_@babel+core@7.15.0

packages:

  /esprima/1.2.5:
    resolution: {integrity: sha512-TIGnTpdo+E3+pCyAluZvtED5p5wCqLdezCyhPZzKPcxvFplEt4i+W7OONCKgeZFT3+y5NZZfOOS/Bdcanm1MYA==}
    dev: false

  /@babel/plugin-syntax-json-strings/7.8.3_@babel+core@7.15.0:
    resolution: {integrity: sha512-TIGnTpdo+E3+pCyAluZvtED5p5wCqLdezCyhPZzKPcxvFplEt4i+W7OONCKgeZFT3+y5NZZfOOS/Bdcanm1MYA==}
    dependencies:
      esprima: 1.2.5
    dev: false
"#;

    fn project(lock: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PACKAGE_JSON),
            r#"{"name": "web", "version": "0.3.0", "author": "Acme Software <dev@acme.io>"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), lock).unwrap();
        dir
    }

    #[test]
    fn test_split_key_v6() {
        assert_eq!(
            split_key_v6("/@babel/code-frame@7.22.10").unwrap(),
            PackageKey {
                name: "@babel/code-frame".into(),
                version: "7.22.10".into(),
                belonging: String::new(),
            }
        );
        assert_eq!(
            split_key_v6("/@babel/plugin@7.22.9(@babel/core@7.22.10)").unwrap(),
            PackageKey {
                name: "@babel/plugin".into(),
                version: "7.22.9".into(),
                belonging: "@babel/core@7.22.10".into(),
            }
        );
        assert_eq!(split_key_v6("safe-buffer@5.1.2").unwrap().name, "safe-buffer");
    }

    #[test]
    fn test_split_key_legacy() {
        let key = split_key_legacy("/@babel/plugin-syntax-json-strings/7.8.3_@babel+core@7.15.0").unwrap();
        assert_eq!(key.name, "@babel/plugin-syntax-json-strings");
        assert_eq!(key.version, "7.8.3");
        assert_eq!(key.belonging, "@babel+core@7.15.0");
        assert_eq!(split_key_legacy("/esprima/1.2.5").unwrap().name, "esprima");

        let underscored = split_key_legacy("/string_decoder/1.3.0").unwrap();
        assert_eq!(underscored.name, "string_decoder");
        assert_eq!(underscored.version, "1.3.0");
        assert!(underscored.belonging.is_empty());

        let with_peer = split_key_legacy("/lodash_x/4.17.21_react@17.0.2").unwrap();
        assert_eq!(with_peer.name, "lodash_x");
        assert_eq!(with_peer.version, "4.17.21");
        assert_eq!(with_peer.belonging, "react@17.0.2");
    }

    #[test]
    fn test_bare_version_drops_range_prefix() {
        assert_eq!(bare_version(KeyFormat::V6, "^1.2.3"), "1.2.3");
        assert_eq!(bare_version(KeyFormat::V6, "~2.0.1(react@18.2.0)"), "2.0.1");
        assert_eq!(bare_version(KeyFormat::V6, ">=3.1.0"), "3.1.0");
        assert_eq!(bare_version(KeyFormat::Legacy, "^4.17.21_react@17.0.2"), "4.17.21");
        assert_eq!(
            reference_key(KeyFormat::V6, "lodash", "^4.17.21"),
            "lodash:4.17.21"
        );
    }

    #[test]
    fn test_lockfile_version_number_or_string() {
        let n: LockfileVersion = serde_yaml::from_str("5.4").unwrap();
        let s: LockfileVersion = serde_yaml::from_str("'6.0'").unwrap();
        assert_eq!(KeyFormat::for_version(n.number().unwrap()), KeyFormat::Legacy);
        assert_eq!(KeyFormat::for_version(s.number().unwrap()), KeyFormat::V6);
    }

    #[test]
    fn test_v6_tree() {
        let dir = project(LOCK_V6);
        let mut parser = PnpmParser::new();
        let modules = parser.list_modules_with_deps(dir.path(), None).unwrap();
        let root = modules.iter().find(|m| m.root).unwrap();

        assert_eq!(root.name, "web");
        assert_eq!(root.supplier.get(), "Organization: Acme Software (dev@acme.io)");
        assert_eq!(root.packages.len(), 2);
        let plugin = &root.packages["babel/plugin"];
        assert_eq!(plugin.version, "7.22.9");
        assert_eq!(plugin.packages["babel/core"].packages["ms"].version, "2.1.2");
        assert_eq!(
            plugin.package_download_location,
            "https://registry.npmjs.org/@babel/plugin/-/plugin-7.22.9.tgz"
        );
        assert_eq!(
            root.packages["ms"].package_download_location,
            "https://mirror.example.com/ms-2.1.2.tgz"
        );
    }

    #[test]
    fn test_legacy_tree() {
        let dir = project(LOCK_V5);
        let mut parser = PnpmParser::new();
        let direct = parser.list_used_modules(dir.path()).unwrap();
        assert_eq!(direct.len(), 2);

        let modules = parser.list_modules_with_deps(dir.path(), None).unwrap();
        let root = modules.iter().find(|m| m.root).unwrap();
        let json = &root.packages["babel/plugin-syntax-json-strings"];
        assert_eq!(json.packages["esprima"].version, "1.2.5");
        assert_eq!(json.checksum.algorithm, HashAlgorithm::Sha512);
    }
}
