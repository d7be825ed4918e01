use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::thread::{self, JoinHandle};

use regex::Regex;

use crate::command;
use crate::error::{Error, Result};
use crate::graph::{self, DependencySource};
use crate::license;
use crate::models::{Checksum, HashAlgorithm, Package, Supplier};
use crate::parser::{download_location, read_file, strip_protocol, Metadata, Parser};

const VENDOR_BUNDLE: &str = "vendor/bundle";
const SPEC_EXTENSION: &str = "gemspec";
const INSTALL_HINT: &str =
    "`bundle config set --local path 'vendor/bundle' && bundle install && bundle exec rake install`";

static METADATA: Metadata = Metadata {
    name: "Bundler",
    slug: "bundler",
    manifest: &["Gemfile", "Gemfile.lock", "gems.rb", "gems.locked"],
    module_path: &[VENDOR_BUNDLE],
};

/// A dependency declaration: name plus its joined version constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Requirement {
    pub name: String,
    pub constraint: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct GemSpec {
    pub name: String,
    pub version: String,
    pub authors: Vec<String>,
    pub emails: Vec<String>,
    pub licenses: Vec<String>,
    pub homepage: String,
    pub summary: String,
    pub required_ruby_version: String,
    pub rubygems_version: String,
    pub runtime: Vec<Requirement>,
    pub development: Vec<Requirement>,
}

fn attribute_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:s|spec|gem)\.(\w+)\s*(?:=|\(|\s)\s*(.*)$").ok())
        .as_ref()
}

fn literal_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"%q<([^>]*)>|%q\{([^}]*)\}|"([^"]*)"|'([^']*)'"#).ok())
        .as_ref()
}

/// String literals of a Ruby expression, in order; `.freeze` is irrelevant here.
fn literals(expr: &str) -> Vec<String> {
    let Some(re) = literal_regex() else {
        return Vec::new();
    };
    re.captures_iter(expr)
        .filter_map(|caps| (1..=4).find_map(|i| caps.get(i)).map(|m| m.as_str().to_string()))
        // interpolated strings cannot be resolved statically
        .filter(|s| !s.contains("#{"))
        .collect()
}

fn requirement(expr: &str) -> Option<Requirement> {
    let mut values = literals(expr).into_iter();
    let name = values.next()?;
    let constraint = values.collect::<Vec<_>>().join(", ");
    Some(Requirement { name, constraint })
}

/// Parse the attributes of a `.gemspec`, either hand written or as installed
/// under `specifications/`.
pub(crate) fn parse_gemspec(content: &str) -> GemSpec {
    let mut spec = GemSpec::default();
    let Some(re) = attribute_regex() else {
        return spec;
    };

    for line in content.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let expr = &caps[2];
        let first = || literals(expr).into_iter().next().unwrap_or_default();
        match &caps[1] {
            "name" => spec.name = first(),
            "version" => spec.version = first(),
            "homepage" => spec.homepage = first(),
            "summary" => spec.summary = first(),
            "license" => spec.licenses = vec![first()],
            "licenses" => spec.licenses = literals(expr),
            "authors" | "author" => spec.authors = literals(expr),
            "email" => spec.emails = literals(expr),
            "required_ruby_version" => spec.required_ruby_version = literals(expr).join(", "),
            "rubygems_version" => spec.rubygems_version = first(),
            "add_runtime_dependency" | "add_dependency" => {
                if let Some(req) = requirement(expr) {
                    if !spec.runtime.contains(&req) {
                        spec.runtime.push(req);
                    }
                }
            }
            "add_development_dependency" => {
                if let Some(req) = requirement(expr) {
                    if !spec.development.contains(&req) {
                        spec.development.push(req);
                    }
                }
            }
            _ => {}
        }
    }
    spec.licenses.retain(|l| !l.is_empty());
    spec
}

/// `GEM PATHS` entries of `gem env` output.
pub(crate) fn parse_gem_paths(output: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let mut header_indent = None;
    for line in output.lines() {
        let indent = line.len() - line.trim_start().len();
        let trimmed = line.trim();
        if trimmed == "- GEM PATHS:" {
            header_indent = Some(indent);
            continue;
        }
        let Some(header) = header_indent else {
            continue;
        };
        match trimmed.strip_prefix("- ") {
            Some(path) if indent > header => paths.push(PathBuf::from(path.trim())),
            _ => break,
        }
    }
    paths
}

/// First version listed by `gem query -e <name>`: `rack (2.2.8, 2.0.1)`.
pub(crate) fn parse_gem_query(output: &str) -> Option<String> {
    let start = output.find('(')?;
    let end = output[start..].find(')')? + start;
    output[start + 1..end]
        .split(',')
        .map(|v| v.trim().trim_start_matches("default: "))
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Split an installed file stem `rack-test-2.1.0` into name and version.
pub(crate) fn split_versioned_name(stem: &str) -> (String, String) {
    match stem.rsplit_once('-') {
        Some((name, version)) if version.starts_with(|c: char| c.is_ascii_digit()) => {
            (name.to_string(), version.to_string())
        }
        _ => (stem.to_string(), String::new()),
    }
}

/// The base version a constraint asks for: `~> 2.1, >= 2.1.3` → `2.1`.
fn requested_version(constraint: &str) -> String {
    constraint
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|t| t.trim_start_matches(|c: char| "~<>=!".contains(c)))
        .find(|t| t.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or_default()
        .to_string()
}

fn major(version: &str) -> i64 {
    version
        .split('.')
        .next()
        .and_then(|m| m.parse().ok())
        .unwrap_or(-1)
}

/// An installed gem found on a gem path.
#[derive(Debug, Clone, Default)]
pub(crate) struct InstalledGem {
    pub spec: GemSpec,
    pub dir: PathBuf,
    pub archive: PathBuf,
}

/// `{name → {version → gem}}` over every gem path.
pub(crate) type SpecCache = HashMap<String, BTreeMap<String, InstalledGem>>;

/// Pick an installed version: the requested one, else the only one, else the
/// one with the highest major version.
pub(crate) fn resolve_version<'a>(
    versions: &'a BTreeMap<String, InstalledGem>,
    constraint: &str,
) -> Option<&'a InstalledGem> {
    let requested = requested_version(constraint);
    if let Some(gem) = versions.get(&requested) {
        return Some(gem);
    }
    if versions.len() == 1 {
        return versions.values().next();
    }
    versions.values().max_by_key(|gem| major(&gem.spec.version))
}

fn scan_gem_path(gem_path: &Path, cache: &mut SpecCache) {
    let specifications = gem_path.join("specifications");
    let Ok(entries) = std::fs::read_dir(&specifications) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SPEC_EXTENSION) {
            continue;
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let mut spec = parse_gemspec(&content);
        let (file_name, file_version) = split_versioned_name(&stem);
        if spec.name.is_empty() {
            spec.name = file_name;
        }
        if spec.version.is_empty() {
            spec.version = if file_version.is_empty() {
                command::run("gem", ["query", "-e", spec.name.as_str()], gem_path)
                    .ok()
                    .and_then(|out| parse_gem_query(&out))
                    .unwrap_or_default()
            } else {
                file_version
            };
        }

        let gem = InstalledGem {
            dir: gem_path.join("gems").join(&stem),
            archive: gem_path.join("cache").join(format!("{}.gem", stem)),
            spec,
        };
        cache
            .entry(gem.spec.name.clone())
            .or_default()
            .entry(gem.spec.version.clone())
            .or_insert(gem);
    }
}

/// Scan every gem path; vendored paths first so they win over system gems.
pub(crate) fn build_spec_cache(paths: &[PathBuf]) -> SpecCache {
    let mut cache = SpecCache::new();
    for path in paths {
        scan_gem_path(path, &mut cache);
    }
    cache
}

/// Spec cache built on a background thread and joined on first lookup.
struct PendingCache {
    worker: Mutex<Option<JoinHandle<SpecCache>>>,
    cache: OnceLock<SpecCache>,
}

impl PendingCache {
    fn spawn(paths: Vec<PathBuf>) -> Self {
        Self {
            worker: Mutex::new(Some(thread::spawn(move || build_spec_cache(&paths)))),
            cache: OnceLock::new(),
        }
    }

    fn get(&self) -> Result<&SpecCache> {
        if let Some(cache) = self.cache.get() {
            return Ok(cache);
        }
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| Error::Resolution("gem spec cache lock poisoned".into()))?;
        if let Some(handle) = worker.take() {
            let built = handle
                .join()
                .map_err(|_| Error::Resolution("gem spec cache worker panicked".into()))?;
            let _ = self.cache.set(built);
        }
        self.cache
            .get()
            .ok_or_else(|| Error::Resolution("gem spec cache unavailable".into()))
    }
}

/// SHA256 over the first `.gem` archive found, else over `name-version`.
fn gem_checksum(candidates: &[PathBuf], name: &str, version: &str) -> Checksum {
    candidates
        .iter()
        .find_map(|p| std::fs::read(p).ok())
        .map(|bytes| Checksum::from_content(HashAlgorithm::Sha256, bytes))
        .unwrap_or_else(|| Checksum::from_content(HashAlgorithm::Sha256, format!("{}-{}", name, version)))
}

fn spec_package(spec: &GemSpec) -> Package {
    let mut pkg = Package::new(spec.name.clone(), spec.version.clone());
    pkg.supplier = match spec.authors.first() {
        Some(author) => Supplier::person(author.trim(), spec.emails.first().cloned().unwrap_or_default()),
        None => Supplier::organization(spec.name.clone()),
    };
    pkg.package_home_page = spec.homepage.clone();
    pkg.package_url = strip_protocol(&spec.homepage);
    pkg.package_download_location = download_location(&spec.homepage);
    pkg
}

fn installed_package(gem: &InstalledGem, fallback_cache: Option<&Path>) -> Package {
    let mut pkg = spec_package(&gem.spec);
    let mut archives = vec![gem.archive.clone()];
    if let Some(dir) = fallback_cache {
        archives.push(dir.join(format!("{}-{}.gem", gem.spec.name, gem.spec.version)));
    }
    pkg.checksum = gem_checksum(&archives, &gem.spec.name, &gem.spec.version);
    if gem.dir.is_dir() {
        pkg.local_path = gem.dir.display().to_string();
        if license::resolve_into(&mut pkg, &gem.dir) {
            return pkg;
        }
    }
    pkg.set_license(gem.spec.licenses.first().map(String::as_str).unwrap_or_default());
    pkg
}

/// Resolves gem requirements against the installed spec cache.
struct GemSource {
    root_requirements: Vec<Requirement>,
    cache: PendingCache,
    gemdir_cache: Option<PathBuf>,
}

impl DependencySource for GemSource {
    fn dependencies(&self, pkg: &Package) -> Result<Vec<Package>> {
        let cache = self.cache.get()?;
        let requirements = if pkg.root {
            self.root_requirements.as_slice()
        } else {
            match cache.get(&pkg.name).and_then(|v| v.get(&pkg.version)) {
                Some(gem) => gem.spec.runtime.as_slice(),
                None => &[],
            }
        };

        let mut children = Vec::new();
        for req in requirements {
            let installed = cache
                .get(&req.name)
                .and_then(|versions| resolve_version(versions, &req.constraint));
            match installed {
                Some(gem) => children.push(installed_package(gem, self.gemdir_cache.as_deref())),
                None => tracing::warn!(
                    gem = %req.name,
                    parent = %pkg.name,
                    "manifest for runtime dependency not found in gem paths"
                ),
            }
        }
        Ok(children)
    }
}

/// The single `.gemspec` in the project root.
fn find_gemspec(path: &Path) -> Result<PathBuf> {
    let specs: Vec<PathBuf> = std::fs::read_dir(path)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(SPEC_EXTENSION))
        .collect();
    match specs.as_slice() {
        [single] => Ok(single.clone()),
        _ => Err(Error::InvalidProjectType(
            "ruby projects need exactly one .gemspec in the project root".into(),
        )),
    }
}

fn lockfile_has_platforms(path: &Path) -> bool {
    ["Gemfile.lock", "gems.locked"]
        .iter()
        .filter_map(|name| std::fs::read_to_string(path.join(name)).ok())
        .any(|content| content.lines().any(|l| l.trim() == "PLATFORMS"))
}

/// Parser for Ruby gems managed by Bundler.
pub struct GemParser {
    max_depth: usize,
    root: Option<Package>,
    spec: Option<GemSpec>,
}

impl GemParser {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            root: None,
            spec: None,
        }
    }

    /// Vendored gem paths followed by those reported by `gem env`.
    fn gem_paths(path: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        if let Ok(entries) = std::fs::read_dir(path.join(VENDOR_BUNDLE).join("ruby")) {
            let mut vendored: Vec<PathBuf> = entries.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect();
            vendored.sort();
            paths.extend(vendored);
        }
        let env = command::run("gem", ["env"], path)?;
        paths.extend(parse_gem_paths(&env));
        Ok(paths)
    }

    fn gemdir_cache(path: &Path) -> Option<PathBuf> {
        command::run("gem", ["environment", "gemdir"], path)
            .ok()
            .and_then(|out| out.split_whitespace().next().map(|d| PathBuf::from(d).join("cache")))
    }

    fn source(&self, path: &Path) -> Result<GemSource> {
        let cache = PendingCache::spawn(Self::gem_paths(path)?);
        let spec = self.spec.clone().unwrap_or_default();
        let mut root_requirements = spec.runtime.clone();
        root_requirements.extend(spec.development.iter().cloned());
        Ok(GemSource {
            root_requirements,
            cache,
            gemdir_cache: Self::gemdir_cache(path),
        })
    }

    fn build_root(&mut self, path: &Path, max_depth: usize) -> Result<Package> {
        let mut root = self.get_root_module(path)?;
        let source = self.source(path)?;

        if let Some(versions) = source.cache.get()?.get(&root.name) {
            if root.version.is_empty() {
                if let Some(gem) = versions.values().next_back() {
                    root.version = gem.spec.version.clone();
                }
            }
            if let Some(gem) = versions.get(&root.version) {
                root.checksum = gem_checksum(&[gem.archive.clone()], &root.name, &root.version);
            }
        }
        graph::populate_to_depth(&mut root, &source, max_depth)?;
        Ok(root)
    }
}

impl Parser for GemParser {
    fn metadata(&self) -> &Metadata {
        &METADATA
    }

    fn has_modules_installed(&self, path: &Path) -> Result<()> {
        find_gemspec(path)?;
        let vendored = path.join(VENDOR_BUNDLE).is_dir();
        let rakefile = path.join("Rakefile").exists();
        if vendored && rakefile && lockfile_has_platforms(path) {
            Ok(())
        } else {
            Err(Error::not_installed(INSTALL_HINT))
        }
    }

    fn get_version(&self) -> Result<String> {
        let output = command::run("bundler", ["version"], Path::new("."))?;
        let fields: Vec<&str> = output.split_whitespace().collect();
        match fields.as_slice() {
            ["Bundler", "version", version, ..] => Ok(version.to_string()),
            _ => Err(Error::VersionNotFound("bundler".into())),
        }
    }

    fn set_root_module(&mut self, path: &Path) -> Result<()> {
        let spec = parse_gemspec(&read_file(&find_gemspec(path)?)?);
        let mut root = spec_package(&spec);
        root.root = true;
        root.local_path = path.display().to_string();
        root.checksum = Checksum::from_content(
            HashAlgorithm::Sha256,
            format!("{}-{}", spec.name, spec.version),
        );
        if !license::resolve_into(&mut root, path) {
            root.set_license(spec.licenses.first().map(String::as_str).unwrap_or_default());
        }
        self.root = Some(root);
        self.spec = Some(spec);
        Ok(())
    }

    fn get_root_module(&mut self, path: &Path) -> Result<Package> {
        if self.root.is_none() {
            self.set_root_module(path)?;
        }
        self.root.clone().ok_or(Error::FailedToConvertModules)
    }

    fn list_used_modules(&mut self, path: &Path) -> Result<Vec<Package>> {
        let root = self.build_root(path, 1)?;
        Ok(root.packages.values().cloned().collect())
    }

    fn list_modules_with_deps(
        &mut self,
        path: &Path,
        _global_settings: Option<&Path>,
    ) -> Result<Vec<Package>> {
        let root = self.build_root(path, self.max_depth)?;
        let mut modules = vec![root.clone()];
        modules.extend(root.packages.values().cloned());
        Ok(modules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEMSPEC: &str = r#"
require_relative "lib/widget/version"

Gem::Specification.new do |spec|
  spec.name          = "widget"
  spec.version       = "0.4.1"
  spec.authors       = ["Ada Lovelace", "Charles Babbage"]
  spec.email         = ["ada@example.com"]
  spec.summary       = %q{Widgets for everyone}
  spec.homepage      = "https://github.com/example/widget"
  spec.license       = "MIT"
  spec.required_ruby_version = Gem::Requirement.new(">= 2.7.0")

  spec.add_dependency "rack", "~> 2.2"
  spec.add_runtime_dependency "rack", "~> 2.2"
  spec.add_development_dependency "rake", "~> 13.0"
end
"#;

    const INSTALLED_SPEC: &str = r#"# -*- encoding: utf-8 -*-
# stub: rack 2.2.8 ruby lib

Gem::Specification.new do |s|
  s.name = "rack".freeze
  s.version = "2.2.8"
  s.authors = ["Leah Neukirchen".freeze]
  s.homepage = "https://github.com/rack/rack".freeze
  s.licenses = ["MIT".freeze]
  s.rubygems_version = "3.4.10".freeze
  s.add_runtime_dependency(%q<rack-session>.freeze, [">= 1.0".freeze, "< 3".freeze])
  s.add_development_dependency(%q<minitest>.freeze, ["~> 5.0".freeze])
end
"#;

    #[test]
    fn test_parse_project_gemspec() {
        let spec = parse_gemspec(GEMSPEC);
        assert_eq!(spec.name, "widget");
        assert_eq!(spec.version, "0.4.1");
        assert_eq!(spec.authors, vec!["Ada Lovelace", "Charles Babbage"]);
        assert_eq!(spec.summary, "Widgets for everyone");
        assert_eq!(spec.licenses, vec!["MIT"]);
        assert_eq!(spec.required_ruby_version, ">= 2.7.0");
        assert_eq!(
            spec.runtime,
            vec![Requirement {
                name: "rack".into(),
                constraint: "~> 2.2".into()
            }]
        );
        assert_eq!(spec.development.len(), 1);
    }

    #[test]
    fn test_parse_installed_gemspec() {
        let spec = parse_gemspec(INSTALLED_SPEC);
        assert_eq!(spec.name, "rack");
        assert_eq!(spec.rubygems_version, "3.4.10");
        assert_eq!(spec.runtime[0].name, "rack-session");
        assert_eq!(spec.runtime[0].constraint, ">= 1.0, < 3");
        assert_eq!(spec.development[0].name, "minitest");
    }

    #[test]
    fn test_parse_gem_paths() {
        let env = "RubyGems Environment:\n  - RUBYGEMS VERSION: 3.4.10\n  - GEM PATHS:\n     - /usr/lib/ruby/gems/3.2.0\n     - /home/u/.local/share/gem/ruby/3.2.0\n  - GEM CONFIGURATION:\n     - :update_sources => true\n";
        assert_eq!(
            parse_gem_paths(env),
            vec![
                PathBuf::from("/usr/lib/ruby/gems/3.2.0"),
                PathBuf::from("/home/u/.local/share/gem/ruby/3.2.0"),
            ]
        );
    }

    #[test]
    fn test_parse_gem_query_and_names() {
        assert_eq!(parse_gem_query("rack (2.2.8, 2.0.1)\n").as_deref(), Some("2.2.8"));
        assert_eq!(parse_gem_query("json (default: 2.6.3)\n").as_deref(), Some("2.6.3"));
        assert_eq!(
            split_versioned_name("rack-test-2.1.0"),
            ("rack-test".to_string(), "2.1.0".to_string())
        );
        assert_eq!(split_versioned_name("rack"), ("rack".to_string(), String::new()));
    }

    fn gem(version: &str) -> InstalledGem {
        InstalledGem {
            spec: GemSpec {
                name: "rack".into(),
                version: version.into(),
                ..GemSpec::default()
            },
            ..InstalledGem::default()
        }
    }

    #[test]
    fn test_resolve_version() {
        let mut versions = BTreeMap::new();
        versions.insert("1.6.13".to_string(), gem("1.6.13"));
        versions.insert("3.0.8".to_string(), gem("3.0.8"));
        versions.insert("2.2.8".to_string(), gem("2.2.8"));

        assert_eq!(resolve_version(&versions, "= 2.2.8").unwrap().spec.version, "2.2.8");
        assert_eq!(resolve_version(&versions, "~> 2.0").unwrap().spec.version, "3.0.8");

        let single: BTreeMap<_, _> = [("1.0.0".to_string(), gem("1.0.0"))].into_iter().collect();
        assert_eq!(resolve_version(&single, ">= 5").unwrap().spec.version, "1.0.0");
    }

    #[test]
    fn test_tree_from_vendored_specs() {
        let dir = tempfile::tempdir().unwrap();
        let gem_path = dir.path().join("vendor/bundle/ruby/3.2.0");
        std::fs::create_dir_all(gem_path.join("specifications")).unwrap();
        std::fs::create_dir_all(gem_path.join("cache")).unwrap();
        std::fs::write(gem_path.join("specifications/rack-2.2.8.gemspec"), INSTALLED_SPEC).unwrap();
        std::fs::write(
            gem_path.join("specifications/rack-session-1.0.1.gemspec"),
            "Gem::Specification.new do |s|\n  s.name = \"rack-session\".freeze\n  s.version = \"1.0.1\"\nend\n",
        )
        .unwrap();
        std::fs::write(gem_path.join("cache/rack-2.2.8.gem"), b"gem-bytes").unwrap();
        std::fs::write(dir.path().join("widget.gemspec"), GEMSPEC).unwrap();

        let mut parser = GemParser::new(3);
        parser.set_root_module(dir.path()).unwrap();
        let spec = parser.spec.clone().unwrap();
        let source = GemSource {
            root_requirements: spec.runtime.clone(),
            cache: PendingCache::spawn(vec![gem_path]),
            gemdir_cache: None,
        };

        let mut root = parser.get_root_module(dir.path()).unwrap();
        assert_eq!(root.supplier.get(), "Person: Ada Lovelace (ada@example.com)");
        graph::populate_to_depth(&mut root, &source, 3).unwrap();

        let rack = &root.packages["rack"];
        assert_eq!(rack.version, "2.2.8");
        assert_eq!(rack.license_declared, "MIT");
        assert_eq!(
            rack.checksum.to_string(),
            Checksum::from_content(HashAlgorithm::Sha256, b"gem-bytes".to_vec()).to_string()
        );
        assert_eq!(rack.packages["rack-session"].version, "1.0.1");
    }

    #[test]
    fn test_pending_cache_joins_once() {
        let dir = tempfile::tempdir().unwrap();
        let specs = dir.path().join("specifications");
        std::fs::create_dir_all(&specs).unwrap();
        std::fs::write(specs.join("rack-2.2.8.gemspec"), INSTALLED_SPEC).unwrap();

        let pending = PendingCache::spawn(vec![dir.path().to_path_buf()]);
        let first = pending.get().unwrap();
        assert!(first["rack"].contains_key("2.2.8"));
        assert!(std::ptr::eq(first, pending.get().unwrap()));
        assert!(pending.worker.lock().unwrap().is_none());
    }

    #[test]
    fn test_install_checks_are_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let parser = GemParser::new(3);
        assert!(matches!(
            parser.has_modules_installed(dir.path()),
            Err(Error::InvalidProjectType(_))
        ));

        std::fs::write(dir.path().join("widget.gemspec"), GEMSPEC).unwrap();
        assert!(matches!(
            parser.has_modules_installed(dir.path()),
            Err(Error::NotInstalled { .. })
        ));
        assert!(!dir.path().join("Rakefile").exists());
    }
}
