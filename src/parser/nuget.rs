//! .NET projects restored with NuGet.
//!
//! Direct references come from SDK-style `*.csproj` / `*.fsproj` files
//! (`<PackageReference>`) or a legacy `packages.config`. The resolved
//! transitive graph is read from `obj/project.assets.json`, which
//! `dotnet restore` writes. Per-package metadata comes from the global
//! packages folder.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;

use crate::command;
use crate::error::{Error, Result};
use crate::graph::{self, Catalog};
use crate::license;
use crate::models::{Checksum, HashAlgorithm, Package, Supplier};
use crate::parser::{
    dir_name, download_location, git_origin_url, git_remote_to_download_location, read_file,
    strip_protocol, Metadata, Parser,
};

const PACKAGES_CONFIG: &str = "packages.config";
const ASSETS_FILE: &str = "obj/project.assets.json";
const NUGET_GALLERY: &str = "https://www.nuget.org";

static METADATA: Metadata = Metadata {
    name: "Nuget Package Manager",
    slug: "nuget",
    manifest: &[PACKAGES_CONFIG],
    module_path: &["obj", "packages"],
};

/// A package reference as declared by the project.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reference {
    pub id: String,
    pub version: String,
}

fn attribute(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name.as_bytes())
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// `<PackageReference Include="..." Version="..."/>`, with the version given
/// either as an attribute or as a child element.
pub(crate) fn parse_project_file(content: &str) -> Result<Vec<Reference>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut refs = Vec::new();
    let mut open: Option<Reference> = None;
    let mut in_version = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"PackageReference" => {
                if let Some(id) = attribute(e, "Include") {
                    let version = attribute(e, "Version").unwrap_or_default();
                    refs.push(Reference { id, version });
                }
            }
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"PackageReference" => {
                    open = attribute(e, "Include").map(|id| Reference {
                        id,
                        version: attribute(e, "Version").unwrap_or_default(),
                    });
                }
                b"Version" => in_version = open.is_some(),
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_version => {
                if let (Some(reference), Ok(text)) = (open.as_mut(), e.unescape()) {
                    reference.version = text.trim().to_string();
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"PackageReference" => refs.extend(open.take()),
                b"Version" => in_version = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::parse("read project file", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(refs)
}

/// `<package id="..." version="..."/>` entries of `packages.config`.
pub(crate) fn parse_packages_config(content: &str) -> Result<Vec<Reference>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut refs = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.local_name().as_ref() == b"package" =>
            {
                if let Some(id) = attribute(e, "id") {
                    let version = attribute(e, "version").unwrap_or_default();
                    refs.push(Reference { id, version });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::parse("read packages.config", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(refs)
}

/// Metadata read from a cached `.nuspec`.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Nuspec {
    pub authors: String,
    pub license: String,
    pub project_url: String,
    pub repository_url: String,
}

pub(crate) fn parse_nuspec(content: &str) -> Result<Nuspec> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut spec = Nuspec::default();
    let mut current = Vec::new();
    let mut license_is_expression = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"license" {
                    license_is_expression = attribute(e, "type").as_deref() == Some("expression");
                }
                current = name;
            }
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"repository" => {
                spec.repository_url = attribute(e, "url").unwrap_or_default();
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| Error::parse("read nuspec", err))?
                    .trim()
                    .to_string();
                match current.as_slice() {
                    b"authors" => spec.authors = text,
                    b"projectUrl" => spec.project_url = text,
                    b"license" if license_is_expression => spec.license = text,
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current.clear(),
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::parse("read nuspec", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(spec)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TargetEntry {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Library {
    #[serde(default)]
    pub sha512: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Restore {
    #[serde(default)]
    pub project_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AssetsProject {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub restore: Restore,
}

/// The parts of `obj/project.assets.json` used to build the graph.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Assets {
    #[serde(default)]
    pub targets: BTreeMap<String, BTreeMap<String, TargetEntry>>,
    #[serde(default)]
    pub libraries: BTreeMap<String, Library>,
    #[serde(default)]
    pub project: AssetsProject,
}

impl Assets {
    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::parse("read project.assets.json", e))
    }
}

/// `NUGET_PACKAGES`, else `~/.nuget/packages`.
pub(crate) fn dependency_cache(env: Option<OsString>, home: Option<PathBuf>) -> Result<PathBuf> {
    let candidate = env
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| home.map(|h| h.join(".nuget").join("packages")));
    match candidate {
        Some(dir) if dir.is_dir() => Ok(dir),
        _ => Err(Error::NoDependencyCache),
    }
}

fn split_library_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
}

/// Raw SHA512 of a cached package as hex, decoded from its base64 form.
pub(crate) fn decode_sha512(encoded: &str) -> Option<Checksum> {
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return None;
    }
    let bytes = STANDARD.decode(encoded).ok()?;
    Some(Checksum::from_value(HashAlgorithm::Sha512, hex::encode(bytes)))
}

fn cached_package(cache: Option<&Path>, id: &str, version: &str, library: Option<&Library>) -> Package {
    let mut pkg = Package::new(id, version);
    pkg.package_url = format!("www.nuget.org/packages/{}/{}", id, version);
    pkg.package_download_location = format!("{}/api/v2/package/{}/{}", NUGET_GALLERY, id, version);
    pkg.supplier = Supplier::organization(id);

    let lower_id = id.to_lowercase();
    let lower_version = version.to_lowercase();
    let dir = cache.map(|c| match library.filter(|l| !l.path.is_empty()) {
        Some(lib) => c.join(&lib.path),
        None => c.join(&lower_id).join(&lower_version),
    });

    let sidecar = dir
        .as_ref()
        .map(|d| d.join(format!("{}.{}.nupkg.sha512", lower_id, lower_version)))
        .and_then(|p| std::fs::read_to_string(p).ok());
    pkg.checksum = sidecar
        .as_deref()
        .or(library.map(|l| l.sha512.as_str()))
        .and_then(decode_sha512)
        .unwrap_or_else(|| Checksum::from_content(HashAlgorithm::Sha512, format!("{}-{}", id, version)));

    let Some(dir) = dir.filter(|d| d.is_dir()) else {
        return pkg;
    };
    pkg.local_path = dir.display().to_string();

    let nuspec = std::fs::read_to_string(dir.join(format!("{}.nuspec", lower_id)))
        .ok()
        .and_then(|content| parse_nuspec(&content).ok());
    if let Some(spec) = nuspec {
        if let Some(author) = spec.authors.split(',').map(str::trim).find(|a| !a.is_empty()) {
            pkg.supplier = Supplier::from_author(author, id);
        }
        if !spec.project_url.is_empty() {
            pkg.package_home_page = spec.project_url.clone();
        }
        if !spec.repository_url.is_empty() {
            pkg.package_download_location = download_location(&spec.repository_url);
        }
        if !license::resolve_into(&mut pkg, &dir) {
            pkg.set_license(&spec.license);
        }
    } else {
        license::resolve_into(&mut pkg, &dir);
    }
    pkg
}

/// Build the graph from the restore targets; the root's edges are the
/// project's direct references.
pub(crate) fn build_catalog(
    root: &Package,
    direct: &[Reference],
    assets: &Assets,
    cache: Option<&Path>,
) -> Catalog {
    let mut catalog = Catalog::new();
    let root_key = catalog.insert(root.clone());

    // every framework target contributes; ids are case-insensitive
    let mut keys: HashMap<String, String> = HashMap::new();
    for entries in assets.targets.values() {
        for (library_key, entry) in entries {
            if !entry.kind.is_empty() && entry.kind != "package" {
                continue;
            }
            let Some((id, version)) = split_library_key(library_key) else {
                continue;
            };
            let pkg = cached_package(cache, id, version, assets.libraries.get(library_key));
            keys.insert(id.to_lowercase(), catalog.insert(pkg));
        }
    }
    for entries in assets.targets.values() {
        for (library_key, entry) in entries {
            let Some((id, _)) = split_library_key(library_key) else {
                continue;
            };
            let Some(parent) = keys.get(&id.to_lowercase()) else {
                continue;
            };
            for dep in entry.dependencies.keys() {
                if let Some(child) = keys.get(&dep.to_lowercase()) {
                    catalog.add_edge(parent, child);
                }
            }
        }
    }

    for reference in direct {
        let key = match keys.get(&reference.id.to_lowercase()) {
            Some(key) => key.clone(),
            None => catalog.insert(cached_package(cache, &reference.id, &reference.version, None)),
        };
        catalog.add_edge(&root_key, &key);
    }
    catalog
}

fn project_files(path: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(path)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| matches!(p.extension().and_then(|s| s.to_str()), Some("csproj" | "fsproj")))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// Direct references of every project file plus `packages.config`, deduplicated.
pub(crate) fn direct_references(path: &Path) -> Result<Vec<Reference>> {
    let mut refs: Vec<Reference> = Vec::new();
    for file in project_files(path) {
        refs.extend(parse_project_file(&read_file(&file)?)?);
    }
    let config = path.join(PACKAGES_CONFIG);
    if config.exists() {
        refs.extend(parse_packages_config(&read_file(&config)?)?);
    }
    let mut seen = HashSet::new();
    refs.retain(|r| seen.insert(r.id.to_lowercase()));
    Ok(refs)
}

/// Parser for .NET projects restored with NuGet.
#[derive(Default)]
pub struct NugetParser {
    root: Option<Package>,
}

impl NugetParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn load_assets(path: &Path) -> Result<Assets> {
        let file = path.join(ASSETS_FILE);
        if file.exists() {
            Assets::parse(&read_file(&file)?)
        } else {
            Ok(Assets::default())
        }
    }

    fn build_root(&mut self, path: &Path, deep: bool) -> Result<Package> {
        let mut root = self.get_root_module(path)?;
        let cache = dependency_cache(std::env::var_os("NUGET_PACKAGES"), dirs::home_dir())?;
        let assets = Self::load_assets(path)?;
        let direct = direct_references(path)?;

        let catalog = build_catalog(&root, &direct, &assets, Some(&cache));
        if deep {
            graph::populate(&mut root, &catalog)?;
        } else {
            graph::populate_direct(&mut root, &catalog)?;
        }
        Ok(root)
    }
}

impl Parser for NugetParser {
    fn metadata(&self) -> &Metadata {
        &METADATA
    }

    fn is_valid(&self, path: &Path) -> bool {
        path.join(PACKAGES_CONFIG).exists() || !project_files(path).is_empty()
    }

    fn has_modules_installed(&self, path: &Path) -> Result<()> {
        let restored = path.join(ASSETS_FILE).exists()
            || (path.join(PACKAGES_CONFIG).exists() && path.join("packages").is_dir());
        if !restored {
            return Err(Error::not_installed("`dotnet restore`"));
        }
        dependency_cache(std::env::var_os("NUGET_PACKAGES"), dirs::home_dir()).map(|_| ())
    }

    fn get_version(&self) -> Result<String> {
        let output = command::run("dotnet", ["--version"], Path::new("."))?;
        Ok(output.trim().to_string())
    }

    fn set_root_module(&mut self, path: &Path) -> Result<()> {
        let assets = Self::load_assets(path)?;
        let name = if !assets.project.restore.project_name.is_empty() {
            assets.project.restore.project_name.clone()
        } else {
            project_files(path)
                .first()
                .and_then(|p| p.file_stem())
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| dir_name(path))
        };
        let version = assets.project.version.clone();

        let mut root = Package::new(name.clone(), version.clone());
        root.root = true;
        root.local_path = path.display().to_string();
        root.supplier = Supplier::organization(name.clone());
        root.checksum = Checksum::from_content(HashAlgorithm::Sha256, format!("{}-{}", name, version));
        root.package_download_location = git_origin_url(path)
            .map(|url| git_remote_to_download_location(&url))
            .unwrap_or_else(|| "NONE".to_string());
        root.package_url = strip_protocol(&root.package_download_location);
        license::resolve_into(&mut root, path);
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

    const ASSETS: &str = r#"{
        "version": 3,
        "targets": {
            "net8.0": {
                "Serilog.Sinks.Console/5.0.0": {
                    "type": "package",
                    "dependencies": {"Serilog": "3.1.1"}
                },
                "Serilog/3.1.1": {"type": "package"},
                "Shared/1.0.0": {"type": "project"}
            }
        },
        "libraries": {
            "Serilog/3.1.1": {"sha512": "AAEC", "type": "package", "path": "serilog/3.1.1"},
            "Serilog.Sinks.Console/5.0.0": {"sha512": "", "type": "package", "path": "serilog.sinks.console/5.0.0"}
        },
        "project": {"version": "2.0.0", "restore": {"projectName": "Acme.Api"}}
    }"#;

    #[test]
    fn test_parse_csproj_attribute_and_element_versions() {
        let xml = r#"<Project Sdk="Microsoft.NET.Sdk">
  <ItemGroup>
    <PackageReference Include="Newtonsoft.Json" Version="13.0.1" />
    <PackageReference Include="Serilog">
      <Version>2.12.0</Version>
    </PackageReference>
  </ItemGroup>
</Project>"#;
        let refs = parse_project_file(xml).unwrap();
        assert_eq!(
            refs,
            vec![
                Reference { id: "Newtonsoft.Json".into(), version: "13.0.1".into() },
                Reference { id: "Serilog".into(), version: "2.12.0".into() },
            ]
        );
    }

    #[test]
    fn test_parse_packages_config() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<packages>
  <package id="Newtonsoft.Json" version="13.0.1" targetFramework="net452" />
  <package id="NUnit" version="3.13.3" targetFramework="net452" />
</packages>"#;
        let refs = parse_packages_config(xml).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].id, "NUnit");
        assert_eq!(refs[1].version, "3.13.3");
    }

    #[test]
    fn test_parse_nuspec() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd">
  <metadata>
    <id>Serilog</id>
    <authors>Serilog Contributors</authors>
    <license type="expression">Apache-2.0</license>
    <projectUrl>https://serilog.net/</projectUrl>
    <repository type="git" url="https://github.com/serilog/serilog.git" />
  </metadata>
</package>"#;
        let spec = parse_nuspec(xml).unwrap();
        assert_eq!(spec.authors, "Serilog Contributors");
        assert_eq!(spec.license, "Apache-2.0");
        assert_eq!(spec.project_url, "https://serilog.net/");
        assert_eq!(spec.repository_url, "https://github.com/serilog/serilog.git");
    }

    #[test]
    fn test_dependency_cache_lookup() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            dependency_cache(Some(dir.path().as_os_str().to_owned()), None).unwrap(),
            dir.path()
        );
        assert!(matches!(
            dependency_cache(None, Some(dir.path().to_path_buf())),
            Err(Error::NoDependencyCache)
        ));
        std::fs::create_dir_all(dir.path().join(".nuget/packages")).unwrap();
        assert!(dependency_cache(None, Some(dir.path().to_path_buf())).is_ok());
    }

    #[test]
    fn test_graph_from_assets() {
        let cache = tempfile::tempdir().unwrap();
        let serilog = cache.path().join("serilog/3.1.1");
        std::fs::create_dir_all(&serilog).unwrap();
        std::fs::write(serilog.join("serilog.3.1.1.nupkg.sha512"), "3q2+7w==").unwrap();

        let assets = Assets::parse(ASSETS).unwrap();
        let mut root = Package::new("Acme.Api", "2.0.0");
        root.root = true;
        let direct = vec![Reference {
            id: "serilog.sinks.console".into(),
            version: "5.0.0".into(),
        }];
        let catalog = build_catalog(&root, &direct, &assets, Some(cache.path()));
        graph::populate(&mut root, &catalog).unwrap();

        assert_eq!(root.packages.len(), 1);
        let console = &root.packages["Serilog.Sinks.Console"];
        assert_eq!(console.checksum.algorithm, HashAlgorithm::Sha512);
        assert_eq!(
            console.package_download_location,
            "https://www.nuget.org/api/v2/package/Serilog.Sinks.Console/5.0.0"
        );
        let core = &console.packages["Serilog"];
        assert_eq!(core.checksum.to_string(), "deadbeef");
        assert_eq!(core.local_path, serilog.display().to_string());
        assert!(!catalog.contains("Shared:1.0.0"));
    }

    #[test]
    fn test_decode_sha512_from_assets_library() {
        assert_eq!(decode_sha512("AAEC").unwrap().to_string(), "000102");
        assert!(decode_sha512("not base64!").is_none());
        assert!(decode_sha512("").is_none());
    }
}
