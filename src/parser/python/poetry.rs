use std::path::Path;

use crate::error::Result;
use crate::parser::Metadata;

use super::{is_editable_project, Flavor, Frontend, PipPackage, POETRY_LOCK, PYPROJECT};

static METADATA: Metadata = Metadata {
    name: "The Python Package Index (PyPI)",
    slug: "poetry",
    manifest: &[PYPROJECT, POETRY_LOCK],
    module_path: &[],
};

/// Projects managed by Poetry. Poetry installs the project itself, so the
/// root is the entry whose installer is `poetry`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Poetry;

impl Frontend for Poetry {
    fn metadata(&self) -> &'static Metadata {
        &METADATA
    }

    fn flavor(&self) -> Flavor {
        Flavor::Poetry
    }

    fn interpreter(&self, _project: &Path) -> Result<(String, Vec<String>)> {
        Ok(("poetry".to_string(), vec!["run".to_string(), "python".to_string()]))
    }

    fn install_hint(&self) -> &'static str {
        "`poetry install` or `poetry update`"
    }

    fn is_root(&self, pkg: &PipPackage, project: &Path) -> bool {
        is_editable_project(pkg, project) || pkg.installer == "poetry"
    }
}
