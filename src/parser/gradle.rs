use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::command;
use crate::error::{Error, Result};
use crate::graph::{self, Catalog};
use crate::models::{Checksum, HashAlgorithm, Package, Supplier};
use crate::parser::maven::artifact_package;
use crate::parser::{git_origin_url, git_remote_to_download_location, Metadata, Parser};
use crate::registry::maven::{self as registry, MAVEN_CENTRAL};
use crate::registry::RegistryClient;

static METADATA: Metadata = Metadata {
    name: "Java Gradle",
    slug: "Java-Gradle",
    manifest: &["build.gradle", "settings.gradle"],
    module_path: &["."],
};

const REPO_PREFIX: &str = "spdx-repo:";

/// Registers a task printing every repository URL in declaration order.
const INIT_SCRIPT: &str = r#"
gradle.allprojects {
  tasks.register('spdxPrintRepos') {
    doLast {
      repositories.each { println "spdx-repo:" + it.url }
    }
  }
}
"#;

/// Dependencies printed by `gradle :dependencies`.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct DependencyInfo {
    /// Top-level dependencies of every configuration, first seen first.
    pub root: Vec<String>,
    /// Every dependency, first seen first.
    pub all: Vec<String>,
    pub graph: HashMap<String, Vec<String>>,
}

/// Project identity from `gradle properties`.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ProjectInfo {
    pub name: String,
    pub group: String,
    pub version: String,
}

fn row_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(([|]|[ ])[ ]{4})*([+]|[\\])---").ok())
        .as_ref()
}

/// Normalize a tree row to `group:artifact:version`.
///
/// Conflict resolution (`a:b:1 -> 2`) keeps the selected version; `(*)`, `(c)`
/// and `(n)` markers are dropped; project rows yield `None`.
fn normalize_row(row: &str) -> Option<String> {
    let row = row.trim();
    if row.starts_with("project ") {
        return None;
    }
    let (requested, selected) = match row.split_once(" -> ") {
        Some((requested, rest)) => (requested, rest.split_whitespace().next()),
        None => (row, None),
    };
    let coordinate = requested.split_whitespace().next()?;
    let parts: Vec<&str> = coordinate.splitn(3, ':').collect();
    match (parts.as_slice(), selected) {
        ([group, artifact, ..], Some(version)) => Some(format!("{}:{}:{}", group, artifact, version)),
        ([group, artifact, version], None) => Some(format!("{}:{}:{}", group, artifact, version)),
        _ => None,
    }
}

pub(crate) fn parse_dependency_output(output: &str) -> Result<DependencyInfo> {
    let Some(re) = row_regex() else {
        return Err(Error::Resolution("gradle row pattern unavailable".into()));
    };
    let mut info = DependencyInfo::default();
    // ancestors by depth; None marks a skipped project row
    let mut parents: Vec<Option<String>> = Vec::new();

    for line in output.lines() {
        if !re.is_match(line) {
            continue;
        }
        let Some((_, row)) = line.split_once("--- ") else {
            return Err(Error::parse("read gradle dependencies", format!("malformed row {:?}", line)));
        };
        let depth = line.find("---").unwrap_or(1).saturating_sub(1) / 4;
        parents.truncate(depth);
        while parents.len() < depth {
            parents.push(None);
        }

        let current = normalize_row(row);
        if let Some(current) = current.as_ref() {
            match parents.iter().rev().flatten().next() {
                Some(parent) => {
                    let children = info.graph.entry(parent.clone()).or_default();
                    if !children.contains(current) {
                        children.push(current.clone());
                    }
                }
                None => {
                    if !info.root.contains(current) {
                        info.root.push(current.clone());
                    }
                }
            }
            if !info.all.contains(current) {
                info.all.push(current.clone());
            }
        }
        parents.push(current);
    }
    Ok(info)
}

/// Repository URLs printed by the init script, in order.
pub(crate) fn parse_repo_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix(REPO_PREFIX))
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect()
}

pub(crate) fn parse_project_info(output: &str) -> Result<ProjectInfo> {
    let mut info = ProjectInfo::default();
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key {
            "version" => info.version = value,
            "name" => info.name = value,
            "group" => info.group = value,
            _ => {}
        }
    }
    let missing = [
        ("version", &info.version),
        ("name", &info.name),
        ("group", &info.group),
    ]
    .into_iter()
    .find(|(_, v)| v.is_empty() || v.as_str() == "unspecified")
    .map(|(key, _)| key);
    match missing {
        Some(key) => Err(Error::Resolution(format!("could not find gradle project {}", key))),
        None => Ok(info),
    }
}

/// Repository-relative artifact path; Gradle plugin markers resolve to a POM.
pub(crate) fn url_suffix(dependency: &str) -> Result<(String, String, String, String)> {
    let parts: Vec<&str> = dependency.splitn(3, ':').collect();
    let [group, artifact, version] = parts.as_slice() else {
        return Err(Error::parse(
            "split gradle dependency",
            format!("unexpected coordinate {:?}", dependency),
        ));
    };
    let extension = if artifact.ends_with("gradle.plugin") { "pom" } else { "jar" };
    Ok((
        group.to_string(),
        artifact.to_string(),
        version.to_string(),
        registry::artifact_path(group, artifact, version, extension),
    ))
}

/// Parser for Gradle builds.
pub struct GradleParser {
    client: RegistryClient,
    project: Option<PathBuf>,
}

impl GradleParser {
    pub fn new(client: RegistryClient) -> Self {
        Self { client, project: None }
    }

    fn executable(path: &Path) -> String {
        let wrapper = path.join("gradlew");
        if wrapper.exists() {
            wrapper.display().to_string()
        } else {
            "gradle".to_string()
        }
    }

    fn gradle(path: &Path, args: &[&str]) -> Result<String> {
        let mut args = args.to_vec();
        args.push("--console=plain");
        command::run(&Self::executable(path), &args, path)
    }

    fn repositories(path: &Path) -> Result<Vec<String>> {
        let mut script = tempfile::Builder::new()
            .suffix("-spdx-init.gradle")
            .tempfile()?;
        script.write_all(INIT_SCRIPT.as_bytes())?;
        let script_path = script.path().display().to_string();
        let output = Self::gradle(path, &[":spdxPrintRepos", "--init-script", script_path.as_str(), "-q"])?;
        Ok(parse_repo_output(&output))
    }

    fn root_package(path: &Path, info: &ProjectInfo) -> Package {
        let mut root = Package::new(info.name.clone(), info.version.clone());
        root.root = true;
        root.local_path = path.display().to_string();
        root.supplier = Supplier::organization(info.group.clone());

        let describe = command::run(
            "git",
            ["describe", "--match=\"\"", "--always", "--abbrev=40", "--dirty"],
            path,
        );
        match describe {
            Ok(sha) => {
                let sha: String = sha.trim().chars().take(40).collect();
                root.checksum = Checksum::from_value(HashAlgorithm::Sha1, sha);
                root.package_download_location = git_origin_url(path)
                    .map(|url| git_remote_to_download_location(&url))
                    .unwrap_or_default();
            }
            Err(e) => {
                tracing::debug!(error = %e, "no git revision for gradle root");
                root.checksum = Checksum::from_content(
                    HashAlgorithm::Sha1,
                    format!("{}:{}:{}", info.group, info.name, info.version),
                );
            }
        }
        root
    }

    /// Locate each dependency in the first repository that serves it.
    fn download_locations(&self, repos: &[String], deps: &[String]) -> Result<HashMap<String, String>> {
        let mut locations = HashMap::new();
        for dep in deps {
            let (_, _, _, suffix) = url_suffix(dep)?;
            let url = if self.client.is_offline() {
                let repo = repos.first().map(String::as_str).unwrap_or(MAVEN_CENTRAL);
                Some(registry::join_url(repo, &suffix))
            } else {
                registry::first_serving(&self.client, repos, &suffix)
            };
            let url = url.ok_or_else(|| {
                Error::Resolution(format!("could not find download location for {:?}", dep))
            })?;
            locations.insert(dep.clone(), url);
        }
        Ok(locations)
    }

    fn build_catalog(
        &self,
        root: &Package,
        info: &DependencyInfo,
        locations: &HashMap<String, String>,
    ) -> Result<Catalog> {
        let mut catalog = Catalog::new();
        let root_key = catalog.insert(root.clone());
        let mut keys = HashMap::new();
        for dep in &info.all {
            let (group, artifact, version, _) = url_suffix(dep)?;
            let url = locations
                .get(dep)
                .ok_or_else(|| Error::Resolution(format!("could not find module for {:?}", dep)))?;
            let key = catalog.insert(artifact_package(&self.client, &group, &artifact, &version, url)?);
            keys.insert(dep.as_str(), key);
        }

        let lookup = |dep: &str| {
            keys.get(dep)
                .cloned()
                .ok_or_else(|| Error::Resolution(format!("could not find module for {:?}", dep)))
        };
        for dep in &info.root {
            catalog.add_edge(&root_key, &lookup(dep)?);
        }
        for (parent, children) in &info.graph {
            let parent = lookup(parent)?;
            for child in children {
                catalog.add_edge(&parent, &lookup(child)?);
            }
        }
        Ok(catalog)
    }

    fn build_root(&mut self, path: &Path, deep: bool) -> Result<Package> {
        let info = parse_project_info(&Self::gradle(path, &["properties", "-q"])?)?;
        let mut root = Self::root_package(path, &info);

        let deps = parse_dependency_output(&Self::gradle(path, &[":dependencies", "-q"])?)?;
        let repos = Self::repositories(path)?;
        tracing::debug!(repositories = ?repos, "gradle repositories");
        let locations = self.download_locations(&repos, &deps.all)?;
        let catalog = self.build_catalog(&root, &deps, &locations)?;

        if deep {
            graph::populate(&mut root, &catalog)?;
        } else {
            graph::populate_direct(&mut root, &catalog)?;
        }
        Ok(root)
    }
}

impl Parser for GradleParser {
    fn metadata(&self) -> &Metadata {
        &METADATA
    }

    fn has_modules_installed(&self, path: &Path) -> Result<()> {
        if path.join("gradlew").exists() || command::exists("gradle") {
            Ok(())
        } else {
            Err(Error::tooling_absent("gradle"))
        }
    }

    fn get_version(&self) -> Result<String> {
        let dir = self.project.clone().unwrap_or_else(|| PathBuf::from("."));
        let output = Self::gradle(&dir, &["--version"])?;
        output
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with("Gradle "))
            .map(str::to_string)
            .ok_or_else(|| Error::VersionNotFound("gradle".into()))
    }

    fn set_root_module(&mut self, path: &Path) -> Result<()> {
        self.project = Some(path.to_path_buf());
        Ok(())
    }

    fn get_root_module(&mut self, path: &Path) -> Result<Package> {
        let info = parse_project_info(&Self::gradle(path, &["properties", "-q"])?)?;
        Ok(Self::root_package(path, &info))
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

    const DEPENDENCIES: &str = r#"
------------------------------------------------------------
Root project 'demo'
------------------------------------------------------------

compileClasspath - Compile classpath for source set 'main'.
+--- org.springframework:spring-core:5.3.0
|    \--- org.springframework:spring-jcl:5.3.0
+--- project :shared
|    \--- com.google.guava:guava:30.0-jre -> 31.1-jre
|         \--- com.google.guava:failureaccess:1.0.1
\--- org.slf4j:slf4j-api:1.7.30 (*)

runtimeClasspath - Runtime classpath of source set 'main'.
+--- org.springframework:spring-core:5.3.0 (*)
\--- org.slf4j:slf4j-api:1.7.30

(*) - dependencies omitted (listed previously)
"#;

    #[test]
    fn test_parse_dependency_output() {
        let info = parse_dependency_output(DEPENDENCIES).unwrap();
        assert_eq!(
            info.root,
            vec![
                "org.springframework:spring-core:5.3.0",
                "com.google.guava:guava:31.1-jre",
                "org.slf4j:slf4j-api:1.7.30",
            ]
        );
        assert_eq!(info.all.len(), 5);
        assert_eq!(
            info.graph["org.springframework:spring-core:5.3.0"],
            vec!["org.springframework:spring-jcl:5.3.0"]
        );
        assert_eq!(
            info.graph["com.google.guava:guava:31.1-jre"],
            vec!["com.google.guava:failureaccess:1.0.1"]
        );
    }

    #[test]
    fn test_normalize_row() {
        assert_eq!(normalize_row("a:b:1 -> 2 (*)").as_deref(), Some("a:b:2"));
        assert_eq!(normalize_row("a:b -> 3 (c)").as_deref(), Some("a:b:3"));
        assert_eq!(normalize_row("a:b:1 (n)").as_deref(), Some("a:b:1"));
        assert_eq!(normalize_row("project :core"), None);
    }

    #[test]
    fn test_parse_repo_output() {
        let output = "> Task :spdxPrintRepos\nspdx-repo:https://repo.maven.apache.org/maven2/\nnoise\nspdx-repo:https://plugins.gradle.org/m2\n";
        assert_eq!(
            parse_repo_output(output),
            vec!["https://repo.maven.apache.org/maven2/", "https://plugins.gradle.org/m2"]
        );
    }

    #[test]
    fn test_parse_project_info() {
        let info = parse_project_info("name: demo\ngroup: com.acme\nversion: 1.2.0\nbuildDir: /tmp\n").unwrap();
        assert_eq!(info.name, "demo");
        assert_eq!(info.group, "com.acme");
        assert!(parse_project_info("name: demo\ngroup: com.acme\n").is_err());
    }

    #[test]
    fn test_url_suffix() {
        let (_, _, _, suffix) = url_suffix("com.google.guava:guava:31.1-jre").unwrap();
        assert_eq!(suffix, "com/google/guava/guava/31.1-jre/guava-31.1-jre.jar");
        let (_, _, _, plugin) = url_suffix("org.x:x.gradle.plugin:1.0").unwrap();
        assert!(plugin.ends_with("x.gradle.plugin-1.0.pom"));
        assert!(url_suffix("broken").is_err());
    }

    #[test]
    fn test_catalog_offline() {
        let client = RegistryClient::new(1, true).unwrap();
        let parser = GradleParser::new(client);
        let info = parse_dependency_output(DEPENDENCIES).unwrap();
        let repos = vec!["https://repo.maven.apache.org/maven2/".to_string()];
        let locations = parser.download_locations(&repos, &info.all).unwrap();
        assert_eq!(
            locations["org.slf4j:slf4j-api:1.7.30"],
            "https://repo.maven.apache.org/maven2/org/slf4j/slf4j-api/1.7.30/slf4j-api-1.7.30.jar"
        );

        let mut root = Package::new("demo", "1.2.0");
        let catalog = parser.build_catalog(&root, &info, &locations).unwrap();
        graph::populate(&mut root, &catalog).unwrap();
        assert_eq!(root.packages.len(), 3);
        let guava = &root.packages["com.google.guava:guava"];
        assert_eq!(guava.supplier.get(), "Organization: com.google.guava");
        assert_eq!(guava.packages.len(), 1);
    }

    #[test]
    fn test_download_location_skips_missing_repository() {
        let base = crate::registry::testing::serve(|_, path| {
            if path.starts_with("/repo1/") {
                (404, String::new())
            } else {
                (200, String::new())
            }
        });
        let repos: Vec<String> = ["repo1", "repo2", "repo3"]
            .iter()
            .map(|r| format!("{}/{}/", base, r))
            .collect();
        let parser = GradleParser::new(RegistryClient::local());
        let dep = "com.google.guava:guava:31.0.1-jre".to_string();
        let locations = parser.download_locations(&repos, &[dep.clone()]).unwrap();
        assert_eq!(
            locations[&dep],
            format!("{}/repo2/com/google/guava/guava/31.0.1-jre/guava-31.0.1-jre.jar", base)
        );
    }

    #[test]
    fn test_download_location_missing_everywhere() {
        let base = crate::registry::testing::serve(|_, _| (404, String::new()));
        let repos = vec![format!("{}/repo1/", base), format!("{}/repo2/", base)];
        let parser = GradleParser::new(RegistryClient::local());
        let deps = vec!["com.google.guava:guava:31.0.1-jre".to_string()];
        assert!(matches!(
            parser.download_locations(&repos, &deps),
            Err(Error::Resolution(_))
        ));
    }
}
