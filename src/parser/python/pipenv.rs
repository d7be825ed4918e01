use std::path::Path;

use crate::error::Result;
use crate::parser::Metadata;

use super::{is_editable_project, is_outside_site_packages, Flavor, Frontend, PipPackage, PIPFILE_LOCK};

static METADATA: Metadata = Metadata {
    name: "The Python Package Index (PyPI)",
    slug: "pipenv",
    manifest: &["Pipfile", PIPFILE_LOCK],
    module_path: &[],
};

/// Projects managed by `pipenv`; the interpreter runs through `pipenv run`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pipenv;

impl Frontend for Pipenv {
    fn metadata(&self) -> &'static Metadata {
        &METADATA
    }

    fn flavor(&self) -> Flavor {
        Flavor::Pipenv
    }

    fn interpreter(&self, _project: &Path) -> Result<(String, Vec<String>)> {
        Ok(("pipenv".to_string(), vec!["run".to_string(), "python".to_string()]))
    }

    fn install_hint(&self) -> &'static str {
        "`pipenv install` or `pipenv update`"
    }

    fn is_root(&self, pkg: &PipPackage, project: &Path) -> bool {
        is_editable_project(pkg, project) || is_outside_site_packages(pkg)
    }
}
