use std::collections::HashMap;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::command;
use crate::error::{Error, Result};
use crate::graph::{self, Catalog};
use crate::license;
use crate::models::{Checksum, HashAlgorithm, Package, Supplier};
use crate::parser::{download_location, read_file, strip_protocol, Metadata, Parser};
use crate::registry::maven::{self as registry, MAVEN_CENTRAL};
use crate::registry::RegistryClient;

const POM: &str = "pom.xml";

static METADATA: Metadata = Metadata {
    name: "Java Maven",
    slug: "Java-Maven",
    manifest: &[POM],
    module_path: &["."],
};

/// A `<dependency>` of a POM.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct PomDependency {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub scope: String,
}

/// The parts of a `pom.xml` used to describe the project.
#[derive(Debug, Clone, Default)]
pub(crate) struct Pom {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub name: String,
    pub url: String,
    pub scm_url: String,
    pub licenses: Vec<String>,
    pub properties: HashMap<String, String>,
    pub dependencies: Vec<PomDependency>,
}

impl Pom {
    /// Expand `${...}` references from `<properties>` and the project identity.
    fn interpolate(&self, value: &str) -> String {
        let mut out = value.to_string();
        for _ in 0..4 {
            let Some(start) = out.find("${") else { break };
            let Some(len) = out[start..].find('}') else { break };
            let key = &out[start + 2..start + len];
            let replacement = match key {
                "project.version" | "pom.version" | "version" => self.version.clone(),
                "project.groupId" | "pom.groupId" => self.group_id.clone(),
                "project.artifactId" => self.artifact_id.clone(),
                other => match self.properties.get(other) {
                    Some(v) => v.clone(),
                    None => break,
                },
            };
            out.replace_range(start..start + len + 1, &replacement);
        }
        out
    }

    fn resolve(mut self) -> Self {
        let deps = std::mem::take(&mut self.dependencies);
        self.dependencies = deps
            .into_iter()
            .map(|d| PomDependency {
                group_id: self.interpolate(&d.group_id),
                artifact_id: self.interpolate(&d.artifact_id),
                version: self.interpolate(&d.version),
                scope: d.scope,
            })
            .collect();
        self
    }
}

/// Parse `pom.xml` with the quick-xml event API, tracking the element path.
pub(crate) fn parse_pom(content: &str) -> Result<Pom> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut pom = Pom::default();
    let mut parent_group = String::new();
    let mut parent_version = String::new();
    let mut stack: Vec<String> = Vec::new();
    let mut dependency = PomDependency::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                stack.push(name);
                if is_dependency(&stack) {
                    dependency = PomDependency::default();
                }
            }
            Ok(Event::End(_)) => {
                if is_dependency(&stack) && !dependency.artifact_id.is_empty() {
                    pom.dependencies.push(std::mem::take(&mut dependency));
                }
                stack.pop();
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| Error::parse("decode pom.xml", err))?
                    .into_owned();
                let path: Vec<&str> = stack.iter().map(String::as_str).collect();
                match path.as_slice() {
                    ["project", "groupId"] => pom.group_id = text,
                    ["project", "artifactId"] => pom.artifact_id = text,
                    ["project", "version"] => pom.version = text,
                    ["project", "name"] => pom.name = text,
                    ["project", "url"] => pom.url = text,
                    ["project", "scm", "url"] => pom.scm_url = text,
                    ["project", "parent", "groupId"] => parent_group = text,
                    ["project", "parent", "version"] => parent_version = text,
                    ["project", "licenses", "license", "name"] => pom.licenses.push(text),
                    ["project", "properties", key] => {
                        pom.properties.insert(key.to_string(), text);
                    }
                    ["project", "dependencies", "dependency", field] => match *field {
                        "groupId" => dependency.group_id = text,
                        "artifactId" => dependency.artifact_id = text,
                        "version" => dependency.version = text,
                        "scope" => dependency.scope = text,
                        _ => {}
                    },
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::parse("read pom.xml", e)),
            _ => {}
        }
        buf.clear();
    }

    if pom.group_id.is_empty() {
        pom.group_id = parent_group;
    }
    if pom.version.is_empty() {
        pom.version = parent_version;
    }
    if pom.artifact_id.is_empty() {
        return Err(Error::FailedToConvertModules);
    }
    Ok(pom.resolve())
}

fn is_dependency(stack: &[String]) -> bool {
    stack.len() == 3 && stack[0] == "project" && stack[1] == "dependencies" && stack[2] == "dependency"
}

/// A coordinate of the dependency tree: `g:a:type[:classifier]:v[:scope]`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Coordinate {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub scope: String,
}

impl Coordinate {
    fn parse(token: &str) -> Option<Self> {
        let parts: Vec<&str> = token.split(':').collect();
        let (version, scope) = match parts.len() {
            4 => (parts[3], ""),
            5 => (parts[3], parts[4]),
            6 => (parts[4], parts[5]),
            _ => return None,
        };
        Some(Self {
            group_id: parts[0].to_string(),
            artifact_id: parts[1].to_string(),
            version: version.to_string(),
            scope: scope.to_string(),
        })
    }
}

/// Parse the text output of `mvn dependency:tree` into `(depth, coordinate)`
/// rows; depth 0 is a module root.
pub(crate) fn parse_dependency_tree(output: &str) -> Vec<(usize, Coordinate)> {
    let mut rows = Vec::new();
    for line in output.lines() {
        let Some(body) = line.strip_prefix("[INFO] ") else {
            continue;
        };
        let marker = body.find("+- ").or_else(|| body.find("\\- "));
        let (depth, token) = match marker {
            Some(idx) => (idx / 3 + 1, &body[idx + 3..]),
            None if !body.starts_with(' ') => (0, body),
            None => continue,
        };
        let token = token.split_whitespace().next().unwrap_or_default();
        if let Some(coordinate) = Coordinate::parse(token) {
            rows.push((depth, coordinate));
        }
    }
    rows
}

/// Build a package for a Maven artifact fetched from `artifact_url`.
///
/// The `.sha1` sidecar is required; only in offline mode is the checksum
/// computed over `g:a:v` instead.
pub(crate) fn artifact_package(
    client: &RegistryClient,
    group_id: &str,
    artifact_id: &str,
    version: &str,
    artifact_url: &str,
) -> Result<Package> {
    let mut pkg = Package::new(format!("{}:{}", group_id, artifact_id), version);
    pkg.supplier = Supplier::organization(group_id);
    pkg.package_download_location = download_location(artifact_url);
    pkg.package_url = strip_protocol(artifact_url);
    pkg.checksum = if client.is_offline() {
        Checksum::from_content(
            HashAlgorithm::Sha1,
            format!("{}:{}:{}", group_id, artifact_id, version),
        )
    } else {
        Checksum::from_value(HashAlgorithm::Sha1, registry::fetch_sha1(client, artifact_url)?)
    };

    if let Some(dir) = local_repository_dir(group_id, artifact_id, version) {
        pkg.local_path = dir.display().to_string();
        license::resolve_into(&mut pkg, &dir);
    }
    Ok(pkg)
}

/// `~/.m2/repository/{group path}/{artifact}/{version}` when present.
fn local_repository_dir(group_id: &str, artifact_id: &str, version: &str) -> Option<PathBuf> {
    let dir = dirs::home_dir()?
        .join(".m2")
        .join("repository")
        .join(group_id.replace('.', "/"))
        .join(artifact_id)
        .join(version);
    dir.is_dir().then_some(dir)
}

fn central_url(group_id: &str, artifact_id: &str, version: &str) -> String {
    registry::join_url(
        MAVEN_CENTRAL,
        &registry::artifact_path(group_id, artifact_id, version, "jar"),
    )
}

fn root_package(project: &Path, pom: &Pom) -> Package {
    let mut root = Package::new(format!("{}:{}", pom.group_id, pom.artifact_id), pom.version.clone());
    root.root = true;
    root.local_path = project.display().to_string();
    root.supplier = Supplier::organization(pom.group_id.clone());
    root.package_home_page = pom.url.clone();
    root.package_url = strip_protocol(&pom.url);
    root.package_download_location = download_location(&pom.scm_url);
    root.checksum = Checksum::from_content(
        HashAlgorithm::Sha1,
        format!("{}:{}:{}", pom.group_id, pom.artifact_id, pom.version),
    );
    if !license::resolve_into(&mut root, project) {
        root.set_license(pom.licenses.first().map(String::as_str).unwrap_or_default());
    }
    root
}

/// Parser for Maven projects.
pub struct MavenParser {
    client: RegistryClient,
    root: Option<Package>,
}

impl MavenParser {
    pub fn new(client: RegistryClient) -> Self {
        Self { client, root: None }
    }

    fn read_pom(path: &Path) -> Result<Pom> {
        parse_pom(&read_file(&path.join(POM))?)
    }

    fn dependency_tree(path: &Path, global_settings: Option<&Path>) -> Result<String> {
        let mut args: Vec<String> = vec!["dependency:tree".into(), "-DoutputType=text".into()];
        if let Some(settings) = global_settings {
            args.push("-gs".into());
            args.push(settings.display().to_string());
        }
        command::run("mvn", &args, path)
    }

    fn build_catalog(&self, root: &Package, rows: &[(usize, Coordinate)]) -> Result<Catalog> {
        let mut catalog = Catalog::new();
        let root_key = catalog.insert(root.clone());
        let mut cache: HashMap<String, String> = HashMap::new();
        let mut stack: Vec<(usize, String)> = Vec::new();

        for (depth, coordinate) in rows {
            let key = if *depth == 0 {
                root_key.clone()
            } else {
                let gav = format!(
                    "{}:{}:{}",
                    coordinate.group_id, coordinate.artifact_id, coordinate.version
                );
                match cache.get(&gav) {
                    Some(key) => key.clone(),
                    None => {
                        let url = central_url(
                            &coordinate.group_id,
                            &coordinate.artifact_id,
                            &coordinate.version,
                        );
                        let key = catalog.insert(artifact_package(
                            &self.client,
                            &coordinate.group_id,
                            &coordinate.artifact_id,
                            &coordinate.version,
                            &url,
                        )?);
                        cache.insert(gav, key.clone());
                        key
                    }
                }
            };

            while stack.last().is_some_and(|(d, _)| d >= depth) {
                stack.pop();
            }
            if let Some((_, parent)) = stack.last() {
                catalog.add_edge(parent, &key);
            }
            stack.push((*depth, key));
        }
        Ok(catalog)
    }
}

impl Parser for MavenParser {
    fn metadata(&self) -> &Metadata {
        &METADATA
    }

    fn has_modules_installed(&self, _path: &Path) -> Result<()> {
        if command::exists("mvn") {
            Ok(())
        } else {
            Err(Error::tooling_absent("mvn"))
        }
    }

    fn get_version(&self) -> Result<String> {
        let output = command::run("mvn", ["--version"], Path::new("."))?;
        Ok(output.lines().next().unwrap_or_default().trim().to_string())
    }

    fn set_root_module(&mut self, path: &Path) -> Result<()> {
        let pom = Self::read_pom(path)?;
        self.root = Some(root_package(path, &pom));
        Ok(())
    }

    fn get_root_module(&mut self, path: &Path) -> Result<Package> {
        if self.root.is_none() {
            self.set_root_module(path)?;
        }
        self.root.clone().ok_or(Error::FailedToConvertModules)
    }

    /// Direct dependencies as declared in `pom.xml`; no build tool is invoked.
    fn list_used_modules(&mut self, path: &Path) -> Result<Vec<Package>> {
        let pom = Self::read_pom(path)?;
        pom.dependencies
            .iter()
            .map(|d| {
                let url = central_url(&d.group_id, &d.artifact_id, &d.version);
                artifact_package(&self.client, &d.group_id, &d.artifact_id, &d.version, &url)
            })
            .collect()
    }

    fn list_modules_with_deps(
        &mut self,
        path: &Path,
        global_settings: Option<&Path>,
    ) -> Result<Vec<Package>> {
        let mut root = self.get_root_module(path)?;
        let output = Self::dependency_tree(path, global_settings)?;
        let rows = parse_dependency_tree(&output);
        if rows.is_empty() {
            return Err(Error::Resolution("empty mvn dependency:tree output".into()));
        }

        let catalog = self.build_catalog(&root, &rows)?;
        graph::populate(&mut root, &catalog)?;
        let mut modules = vec![root.clone()];
        modules.extend(root.packages.values().cloned());
        Ok(modules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POM_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <modelVersion>4.0.0</modelVersion>
  <parent>
    <groupId>com.acme</groupId>
    <artifactId>parent</artifactId>
    <version>2.1.0</version>
  </parent>
  <artifactId>billing</artifactId>
  <name>Billing Service</name>
  <url>https://acme.example.com/billing</url>
  <licenses>
    <license><name>Apache-2.0</name></license>
  </licenses>
  <scm><url>https://github.com/acme/billing</url></scm>
  <properties>
    <slf4j.version>1.7.36</slf4j.version>
  </properties>
  <dependencyManagement>
    <dependencies>
      <dependency>
        <groupId>managed</groupId>
        <artifactId>ignored</artifactId>
        <version>1</version>
      </dependency>
    </dependencies>
  </dependencyManagement>
  <dependencies>
    <dependency>
      <groupId>org.slf4j</groupId>
      <artifactId>slf4j-api</artifactId>
      <version>${slf4j.version}</version>
    </dependency>
    <dependency>
      <groupId>junit</groupId>
      <artifactId>junit</artifactId>
      <version>4.13.2</version>
      <scope>test</scope>
    </dependency>
  </dependencies>
</project>
"#;

    const TREE: &str = r#"[INFO] Scanning for projects...
[INFO]
[INFO] --- maven-dependency-plugin:3.6.0:tree (default-cli) @ billing ---
[INFO] com.acme:billing:jar:2.1.0
[INFO] +- org.slf4j:slf4j-api:jar:1.7.36:compile
[INFO] \- junit:junit:jar:4.13.2:test
[INFO]    \- org.hamcrest:hamcrest-core:jar:1.3:test
[INFO] ------------------------------------------------------------------------
[INFO] BUILD SUCCESS
"#;

    #[test]
    fn test_parse_pom_inherits_parent_and_interpolates() {
        let pom = parse_pom(POM_XML).unwrap();
        assert_eq!(pom.group_id, "com.acme");
        assert_eq!(pom.artifact_id, "billing");
        assert_eq!(pom.version, "2.1.0");
        assert_eq!(pom.licenses, vec!["Apache-2.0"]);
        assert_eq!(pom.dependencies.len(), 2);
        assert_eq!(pom.dependencies[0].version, "1.7.36");
        assert_eq!(pom.dependencies[1].scope, "test");
    }

    #[test]
    fn test_parse_pom_without_artifact_fails() {
        assert!(parse_pom("<project><groupId>x</groupId></project>").is_err());
    }

    #[test]
    fn test_parse_dependency_tree() {
        let rows = parse_dependency_tree(TREE);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].0, 0);
        assert_eq!(rows[0].1.artifact_id, "billing");
        assert_eq!(rows[1].0, 1);
        assert_eq!(rows[2].1.scope, "test");
        assert_eq!(rows[3].0, 2);
        assert_eq!(rows[3].1.artifact_id, "hamcrest-core");
    }

    #[test]
    fn test_classifier_coordinate() {
        let c = Coordinate::parse("io.netty:netty-transport-native-epoll:jar:linux-x86_64:4.1.100.Final:runtime").unwrap();
        assert_eq!(c.version, "4.1.100.Final");
        assert_eq!(c.scope, "runtime");
    }

    #[test]
    fn test_catalog_from_tree_offline() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(POM), POM_XML).unwrap();
        let client = RegistryClient::new(1, true).unwrap();
        let mut parser = MavenParser::new(client);
        let mut root = parser.get_root_module(dir.path()).unwrap();
        assert_eq!(root.name, "com.acme:billing");
        assert_eq!(root.license_declared, "Apache-2.0");

        let catalog = parser.build_catalog(&root, &parse_dependency_tree(TREE)).unwrap();
        graph::populate(&mut root, &catalog).unwrap();
        assert_eq!(root.packages.len(), 2);
        let junit = &root.packages["junit:junit"];
        assert_eq!(junit.supplier.get(), "Organization: junit");
        assert_eq!(
            junit.package_download_location,
            "https://repo1.maven.org/maven2/junit/junit/4.13.2/junit-4.13.2.jar"
        );
        assert_eq!(junit.checksum.to_string().len(), 40);
        assert_eq!(junit.packages["org.hamcrest:hamcrest-core"].version, "1.3");
    }

    #[test]
    fn test_missing_sha1_sidecar_fails_when_online() {
        let base = crate::registry::testing::serve(|_, _| (404, String::new()));
        let url = format!("{}/junit/junit/4.13.2/junit-4.13.2.jar", base);
        let client = RegistryClient::local();
        let err = artifact_package(&client, "junit", "junit", "4.13.2", &url).unwrap_err();
        assert!(matches!(err, Error::Registry(_)));

        let offline = RegistryClient::new(1, true).unwrap();
        let pkg = artifact_package(&offline, "junit", "junit", "4.13.2", &url).unwrap();
        assert_eq!(pkg.checksum.to_string().len(), 40);
    }

    #[test]
    fn test_sha1_sidecar_becomes_checksum() {
        let digest = "3f8b2c6e9a1d4f7b0c5e8a2d6f9b1c4e7a0d3f6b";
        let base = crate::registry::testing::serve(move |_, _| (200, digest.to_string()));
        let url = format!("{}/junit/junit/4.13.2/junit-4.13.2.jar", base);
        let pkg = artifact_package(&RegistryClient::local(), "junit", "junit", "4.13.2", &url).unwrap();
        assert_eq!(pkg.checksum.to_string(), digest);
    }
}
