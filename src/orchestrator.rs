//! Parser registry and run driver.
//!
//! [`Orchestrator::new`] selects every parser that recognizes the project and
//! resolves their roots up front. [`Orchestrator::run`] drives each selected
//! parser through version detection, the install check and the dependency
//! listing. A binary that wants to run parsers concurrently can take the
//! individual [`Job`]s with [`Orchestrator::into_jobs`].

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::Package;
use crate::parser::cargo::CargoParser;
use crate::parser::composer::ComposerParser;
use crate::parser::gem::GemParser;
use crate::parser::gomod::GoModParser;
use crate::parser::gradle::GradleParser;
use crate::parser::maven::MavenParser;
use crate::parser::npm::NpmParser;
use crate::parser::nuget::NugetParser;
use crate::parser::pnpm::PnpmParser;
use crate::parser::python::{Pipenv, Poetry, Pyenv, PythonParser};
use crate::parser::swift::SwiftParser;
use crate::parser::yarn::YarnParser;
use crate::parser::Parser;
use crate::registry::RegistryClient;

/// Every known parser, in selection order.
pub fn all_parsers(config: &Config, client: &RegistryClient) -> Vec<Box<dyn Parser>> {
    vec![
        Box::new(CargoParser::new(config.cargo_target_triple.clone())),
        Box::new(ComposerParser::new()),
        Box::new(GoModParser::new()),
        Box::new(GemParser::new(config.ruby_max_depth)),
        Box::new(NpmParser::new()),
        Box::new(PnpmParser::new()),
        Box::new(GradleParser::new(client.clone())),
        Box::new(MavenParser::new(client.clone())),
        Box::new(NugetParser::new()),
        Box::new(YarnParser::new()),
        Box::new(PythonParser::new(Pipenv, client.clone())),
        Box::new(PythonParser::new(Poetry, client.clone())),
        Box::new(PythonParser::new(Pyenv, client.clone())),
        Box::new(SwiftParser::new()),
    ]
}

/// Modules produced by one parser.
#[derive(Debug, Clone, Serialize)]
pub struct ParserResult {
    pub parser: &'static str,
    pub slug: &'static str,
    pub tool_version: String,
    pub modules: Vec<Package>,
}

impl ParserResult {
    pub fn root(&self) -> Option<&Package> {
        crate::parser::root_of(&self.modules)
    }
}

/// A selected parser bound to the project it runs against.
pub struct Job {
    parser: Box<dyn Parser>,
    path: PathBuf,
    global_settings: Option<PathBuf>,
}

impl Job {
    pub fn name(&self) -> &'static str {
        self.parser.metadata().name
    }

    pub fn slug(&self) -> &'static str {
        self.parser.metadata().slug
    }

    /// Version, install check, then the full dependency listing.
    pub fn run(&mut self) -> Result<ParserResult> {
        let metadata = self.parser.metadata();
        let (name, slug) = (metadata.name, metadata.slug);

        let tool_version = self.parser.get_version()?;
        info!(parser = slug, version = %tool_version, "detected tool version");

        self.parser.has_modules_installed(&self.path)?;

        let modules = self
            .parser
            .list_modules_with_deps(&self.path, self.global_settings.as_deref())
            .map_err(|e| Error::FailedToReadModules(Box::new(e)))?;
        debug!(parser = slug, modules = modules.len(), "modules listed");

        Ok(ParserResult {
            parser: name,
            slug,
            tool_version,
            modules,
        })
    }
}

pub struct Orchestrator {
    jobs: Vec<Job>,
    results: Vec<ParserResult>,
}

impl Orchestrator {
    /// Select the parsers that recognize `path` and resolve their roots.
    pub fn new(path: &Path, config: &Config, client: &RegistryClient) -> Result<Self> {
        Self::with_parsers(path, config.global_settings.clone(), all_parsers(config, client))
    }

    pub fn with_parsers(
        path: &Path,
        global_settings: Option<PathBuf>,
        parsers: Vec<Box<dyn Parser>>,
    ) -> Result<Self> {
        let mut jobs: Vec<Job> = parsers
            .into_iter()
            .filter(|p| p.is_valid(path))
            .map(|parser| Job {
                parser,
                path: path.to_path_buf(),
                global_settings: global_settings.clone(),
            })
            .collect();

        if jobs.is_empty() {
            return Err(Error::NoPluginAvailable);
        }
        for job in &mut jobs {
            debug!(parser = job.slug(), "parser selected");
            job.parser.set_root_module(path)?;
        }
        Ok(Self {
            jobs,
            results: Vec::new(),
        })
    }

    /// Slugs of the selected parsers, in run order.
    pub fn selected(&self) -> Vec<&'static str> {
        self.jobs.iter().map(Job::slug).collect()
    }

    /// Run every selected parser in order, stopping at the first failure.
    pub fn run(&mut self) -> Result<&[ParserResult]> {
        self.results.clear();
        let mut results = Vec::with_capacity(self.jobs.len());
        for job in &mut self.jobs {
            results.push(job.run()?);
        }
        self.results = results;
        Ok(&self.results)
    }

    pub fn results(&self) -> &[ParserResult] {
        &self.results
    }

    /// All modules from the last successful run, flattened across parsers.
    pub fn get_source(&self) -> Vec<Package> {
        self.results
            .iter()
            .flat_map(|r| r.modules.iter().cloned())
            .collect()
    }

    pub fn into_jobs(self) -> Vec<Job> {
        self.jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Metadata;

    static FAKE_A: Metadata = Metadata {
        name: "Fake A",
        slug: "fake-a",
        manifest: &["a.lock"],
        module_path: &[],
    };

    static FAKE_B: Metadata = Metadata {
        name: "Fake B",
        slug: "fake-b",
        manifest: &["b.lock"],
        module_path: &[],
    };

    struct FakeParser {
        metadata: &'static Metadata,
        installed: bool,
        list_fails: bool,
        root_fails: bool,
    }

    impl FakeParser {
        fn boxed(metadata: &'static Metadata) -> Box<dyn Parser> {
            Box::new(Self {
                metadata,
                installed: true,
                list_fails: false,
                root_fails: false,
            })
        }
    }

    impl Parser for FakeParser {
        fn metadata(&self) -> &Metadata {
            self.metadata
        }

        fn has_modules_installed(&self, _path: &Path) -> Result<()> {
            if self.installed {
                Ok(())
            } else {
                Err(Error::not_installed("`fake install`"))
            }
        }

        fn get_version(&self) -> Result<String> {
            Ok("1.0.0".into())
        }

        fn set_root_module(&mut self, _path: &Path) -> Result<()> {
            if self.root_fails {
                Err(Error::InvalidProjectType("fake".into()))
            } else {
                Ok(())
            }
        }

        fn get_root_module(&mut self, _path: &Path) -> Result<Package> {
            let mut root = Package::new(self.metadata.slug, "0.1.0");
            root.root = true;
            Ok(root)
        }

        fn list_used_modules(&mut self, _path: &Path) -> Result<Vec<Package>> {
            Ok(vec![Package::new("dep", "1.0.0")])
        }

        fn list_modules_with_deps(
            &mut self,
            path: &Path,
            _global_settings: Option<&Path>,
        ) -> Result<Vec<Package>> {
            if self.list_fails {
                return Err(Error::Resolution("dep".into()));
            }
            let mut root = self.get_root_module(path)?;
            let dep = Package::new("dep", "1.0.0");
            root.insert_package(dep.clone());
            Ok(vec![root, dep])
        }
    }

    fn project(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            std::fs::write(dir.path().join(file), "").unwrap();
        }
        dir
    }

    #[test]
    fn test_no_plugin_available() {
        let dir = project(&[]);
        let parsers = vec![FakeParser::boxed(&FAKE_A), FakeParser::boxed(&FAKE_B)];
        let result = Orchestrator::with_parsers(dir.path(), None, parsers);
        assert!(matches!(result, Err(Error::NoPluginAvailable)));
    }

    #[test]
    fn test_selects_every_matching_parser_in_order() {
        let dir = project(&["b.lock", "a.lock"]);
        let parsers = vec![FakeParser::boxed(&FAKE_A), FakeParser::boxed(&FAKE_B)];
        let mut orchestrator = Orchestrator::with_parsers(dir.path(), None, parsers).unwrap();
        assert_eq!(orchestrator.selected(), vec!["fake-a", "fake-b"]);

        let results = orchestrator.run().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_version, "1.0.0");
        assert_eq!(results[1].root().map(|r| r.name.as_str()), Some("fake-b"));
        assert_eq!(orchestrator.get_source().len(), 4);
    }

    #[test]
    fn test_list_failure_is_wrapped() {
        let dir = project(&["a.lock"]);
        let parsers: Vec<Box<dyn Parser>> = vec![Box::new(FakeParser {
            metadata: &FAKE_A,
            installed: true,
            list_fails: true,
            root_fails: false,
        })];
        let mut orchestrator = Orchestrator::with_parsers(dir.path(), None, parsers).unwrap();
        let err = orchestrator.run().unwrap_err();
        assert!(matches!(err, Error::FailedToReadModules(inner) if matches!(*inner, Error::Resolution(_))));
        assert!(orchestrator.get_source().is_empty());
    }

    #[test]
    fn test_not_installed_surfaces_unchanged() {
        let dir = project(&["a.lock"]);
        let parsers: Vec<Box<dyn Parser>> = vec![Box::new(FakeParser {
            metadata: &FAKE_A,
            installed: false,
            list_fails: false,
            root_fails: false,
        })];
        let mut orchestrator = Orchestrator::with_parsers(dir.path(), None, parsers).unwrap();
        assert!(matches!(orchestrator.run(), Err(Error::NotInstalled { .. })));
    }

    #[test]
    fn test_root_failure_aborts_selection() {
        let dir = project(&["a.lock"]);
        let parsers: Vec<Box<dyn Parser>> = vec![Box::new(FakeParser {
            metadata: &FAKE_A,
            installed: true,
            list_fails: false,
            root_fails: true,
        })];
        assert!(matches!(
            Orchestrator::with_parsers(dir.path(), None, parsers),
            Err(Error::InvalidProjectType(_))
        ));
    }

    #[test]
    fn test_registry_order() {
        let client = RegistryClient::new(1, true).unwrap();
        let slugs: Vec<&str> = all_parsers(&Config::default(), &client)
            .iter()
            .map(|p| p.metadata().slug)
            .collect();
        assert_eq!(
            slugs,
            vec![
                "cargo", "composer", "go-mod", "bundler", "npm", "pnpm", "Java-Gradle", "Java-Maven",
                "nuget", "yarn", "pipenv", "poetry", "pyenv", "swift"
            ]
        );
    }
}
