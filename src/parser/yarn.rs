use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

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
const LOCK_FILE: &str = "yarn.lock";
const NODE_MODULES: &str = "node_modules";

static METADATA: Metadata = Metadata {
    name: "Yarn Package Manager",
    slug: "yarn",
    manifest: &[PACKAGE_JSON, LOCK_FILE],
    module_path: &[NODE_MODULES],
};

/// One block of a classic `yarn.lock`.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct LockEntry {
    pub name: String,
    pub specs: Vec<String>,
    pub version: String,
    pub resolved: String,
    pub integrity: String,
    pub dependencies: Vec<(String, String)>,
}

fn field_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^\s+"?([^"\s:]+)"?:?\s+"?([^"]*)"?$"#).ok())
        .as_ref()
}

/// `@babel/core@^7.0.0` → `@babel/core`
fn spec_name(spec: &str) -> &str {
    match spec[1.min(spec.len())..].find('@') {
        Some(idx) => &spec[..idx + 1],
        None => spec,
    }
}

fn parse_field(line: &str) -> Option<(String, String)> {
    let caps = field_regex()?.captures(line)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Parse a classic yarn lockfile into its blocks.
pub(crate) fn parse_lock(content: &str) -> Vec<LockEntry> {
    let mut entries = Vec::new();
    let mut current: Option<LockEntry> = None;
    let mut in_dependencies = false;

    for line in content.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let indent = line.len() - line.trim_start().len();
        if indent == 0 {
            entries.extend(current.take());
            let specs: Vec<String> = line
                .trim_end_matches(':')
                .split(", ")
                .map(|s| s.trim().trim_matches('"').to_string())
                .filter(|s| !s.is_empty())
                .collect();
            let name = specs.first().map(|s| spec_name(s).to_string()).unwrap_or_default();
            current = Some(LockEntry {
                name,
                specs,
                ..LockEntry::default()
            });
            in_dependencies = false;
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };
        let trimmed = line.trim();
        if indent <= 2 && trimmed.ends_with(':') {
            in_dependencies = matches!(
                trimmed.trim_end_matches(':'),
                "dependencies" | "optionalDependencies"
            );
            continue;
        }

        let Some((key, value)) = parse_field(line) else {
            continue;
        };
        if indent > 2 && in_dependencies {
            entry.dependencies.push((key, value));
            continue;
        }
        in_dependencies = false;
        match key.as_str() {
            "version" => entry.version = value,
            "resolved" => entry.resolved = value,
            "integrity" => entry.integrity = value,
            _ => {}
        }
    }
    entries.extend(current);
    entries
}

/// Checksum from `integrity`, else from the sha1 fragment of `resolved`.
fn entry_checksum(entry: &LockEntry) -> Checksum {
    if let Some(sum) = decode_integrity(&entry.integrity) {
        return sum;
    }
    match entry.resolved.split_once('#') {
        Some((_, fragment)) if fragment.len() == 40 => {
            Checksum::from_value(HashAlgorithm::Sha1, fragment)
        }
        _ => Checksum::from_content(
            HashAlgorithm::Sha512,
            format!("{}-{}", entry.name, entry.version),
        ),
    }
}

fn entry_package(project: &Path, entry: &LockEntry) -> Package {
    let mut pkg = Package::new(entry.name.trim_start_matches('@'), entry.version.clone());
    let resolved = match entry.resolved.split('#').next() {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => registry::tarball_url(&entry.name, &entry.version),
    };
    pkg.package_download_location = download_location(&resolved);
    pkg.package_url = strip_protocol(&registry::package_page_url(&entry.name, &entry.version));
    pkg.checksum = entry_checksum(entry);

    let dir = project.join(NODE_MODULES).join(&entry.name);
    let installed = PackageJson::read_installed(&dir);
    // a hoisted copy may be a different version of the same name
    let installed = installed.filter(|m| m.version.as_deref() == Some(entry.version.as_str()));
    match installed {
        Some(manifest) => {
            pkg.local_path = dir.display().to_string();
            pkg.supplier = manifest.supplier(&entry.name);
            pkg.package_home_page = manifest.homepage.clone().unwrap_or_default();
            if !license::resolve_into(&mut pkg, &dir) {
                pkg.set_license(&manifest.license_id());
            }
        }
        None => pkg.supplier = Supplier::organization(entry.name.clone()),
    }
    pkg
}

fn build_catalog(
    project: &Path,
    root: &Package,
    manifest: &PackageJson,
    entries: &[LockEntry],
) -> Catalog {
    let mut catalog = Catalog::new();
    let root_key = catalog.insert(root.clone());

    let mut aliases: HashMap<&str, String> = HashMap::new();
    let mut keys = Vec::with_capacity(entries.len());
    for entry in entries {
        let key = catalog.insert(entry_package(project, entry));
        for spec in &entry.specs {
            aliases.insert(spec.as_str(), key.clone());
        }
        keys.push(key);
    }

    for (entry, parent) in entries.iter().zip(&keys) {
        for (name, range) in &entry.dependencies {
            match aliases.get(format!("{}@{}", name, range).as_str()) {
                Some(child) => catalog.add_edge(parent, child),
                None => tracing::debug!(%name, %range, "yarn dependency not in lockfile"),
            }
        }
    }

    for (name, range) in manifest.dependencies.iter().chain(&manifest.dev_dependencies) {
        if let Some(child) = aliases.get(format!("{}@{}", name, range).as_str()) {
            catalog.add_edge(&root_key, child);
        }
    }
    catalog
}

/// Parser for projects managed by classic Yarn.
#[derive(Default)]
pub struct YarnParser {
    root: Option<Package>,
}

impl YarnParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_root(&mut self, path: &Path, deep: bool) -> Result<Package> {
        let manifest = PackageJson::read(&path.join(PACKAGE_JSON))?;
        let mut root = self.get_root_module(path)?;
        let entries = parse_lock(&read_file(&path.join(LOCK_FILE))?);
        if entries.is_empty() {
            return Err(Error::FailedToConvertModules);
        }

        let catalog = build_catalog(path, &root, &manifest, &entries);
        if deep {
            graph::populate(&mut root, &catalog)?;
        } else {
            graph::populate_direct(&mut root, &catalog)?;
        }
        Ok(root)
    }
}

impl Parser for YarnParser {
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
        Err(Error::not_installed("`yarn install`"))
    }

    fn get_version(&self) -> Result<String> {
        node_version_check("yarn", &["-v"])
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

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK: &str = r#"# THIS IS AN AUTOGENERATED FILE. DO NOT EDIT THIS FILE DIRECTLY.
# yarn lockfile v1


"@babel/code-frame@^7.0.0", "@babel/code-frame@^7.10.4":
  version "7.12.13"
  resolved "https://registry.yarnpkg.com/@babel/code-frame/-/code-frame-7.12.13.tgz#dcfc826beef65e75c50e21d3837d7d95798dd658"
  dependencies:
    "@babel/highlight" "^7.12.13"

"@babel/highlight@^7.12.13":
  version "7.13.10"
  resolved "https://registry.yarnpkg.com/@babel/highlight/-/highlight-7.13.10.tgz"
  integrity sha512-TIGnTpdo+E3+pCyAluZvtED5p5wCqLdezCyhPZzKPcxvFplEt4i+W7OONCKgeZFT3+y5NZZfOOS/Bdcanm1MYA==
  dependencies:
    js-tokens "^4.0.0"
    "@babel/code-frame" "^7.10.4"

js-tokens@^4.0.0:
  version "4.0.0"
  resolved "https://registry.yarnpkg.com/js-tokens/-/js-tokens-4.0.0.tgz"
"#;

    #[test]
    fn test_parse_lock_blocks() {
        let entries = parse_lock(LOCK);
        assert_eq!(entries.len(), 3);

        let frame = &entries[0];
        assert_eq!(frame.name, "@babel/code-frame");
        assert_eq!(frame.specs, vec!["@babel/code-frame@^7.0.0", "@babel/code-frame@^7.10.4"]);
        assert_eq!(frame.version, "7.12.13");
        assert_eq!(frame.dependencies, vec![("@babel/highlight".to_string(), "^7.12.13".to_string())]);

        assert_eq!(entries[1].dependencies.len(), 2);
        assert_eq!(entries[2].name, "js-tokens");
        assert!(entries[2].dependencies.is_empty());
    }

    #[test]
    fn test_checksum_sources() {
        let entries = parse_lock(LOCK);
        let frame = entry_checksum(&entries[0]);
        assert_eq!(frame.algorithm, HashAlgorithm::Sha1);
        assert_eq!(frame.to_string(), "dcfc826beef65e75c50e21d3837d7d95798dd658");
        assert_eq!(entry_checksum(&entries[1]).algorithm, HashAlgorithm::Sha512);
    }

    #[test]
    fn test_tree_follows_aliases() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PACKAGE_JSON),
            r#"{"name": "site", "version": "2.0.0", "dependencies": {"@babel/code-frame": "^7.0.0"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), LOCK).unwrap();

        let mut parser = YarnParser::new();
        assert!(parser.is_valid(dir.path()));
        let modules = parser.list_modules_with_deps(dir.path(), None).unwrap();
        let root = modules.iter().find(|m| m.root).unwrap();

        let frame = &root.packages["babel/code-frame"];
        assert_eq!(
            frame.package_download_location,
            "https://registry.yarnpkg.com/@babel/code-frame/-/code-frame-7.12.13.tgz"
        );
        let highlight = &frame.packages["babel/highlight"];
        assert_eq!(highlight.packages["js-tokens"].version, "4.0.0");
        // cycle back to code-frame is cut
        assert!(highlight.packages["babel/code-frame"].packages.is_empty());
    }
}
