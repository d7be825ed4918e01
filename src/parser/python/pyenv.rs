use std::path::Path;

use crate::error::{Error, Result};
use crate::parser::Metadata;

use super::{
    find_venv, is_editable_project, is_outside_site_packages, venv_python, Flavor, Frontend,
    PipPackage, REQUIREMENTS,
};

static METADATA: Metadata = Metadata {
    name: "The Python Package Index (PyPI)",
    slug: "pyenv",
    manifest: &[REQUIREMENTS],
    module_path: &[],
};

/// Plain `pip` projects described by `requirements.txt`. The interpreter is
/// taken from the project's virtualenv.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pyenv;

impl Frontend for Pyenv {
    fn metadata(&self) -> &'static Metadata {
        &METADATA
    }

    fn flavor(&self) -> Flavor {
        Flavor::Pyenv
    }

    fn interpreter(&self, project: &Path) -> Result<(String, Vec<String>)> {
        let venv = find_venv(project, std::env::var_os("VIRTUAL_ENV"))
            .ok_or_else(|| Error::tooling_absent("python virtualenv"))?;
        Ok((venv_python(&venv).display().to_string(), Vec::new()))
    }

    fn install_hint(&self) -> &'static str {
        "`pip install -r requirements.txt`"
    }

    fn is_root(&self, pkg: &PipPackage, project: &Path) -> bool {
        is_editable_project(pkg, project) || is_outside_site_packages(pkg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpreter_from_project_venv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".venv")).unwrap();
        if std::env::var_os("VIRTUAL_ENV").is_none() {
            let (program, args) = Pyenv.interpreter(dir.path()).unwrap();
            assert_eq!(program, venv_python(&dir.path().join(".venv")).display().to_string());
            assert!(args.is_empty());
        }
    }
}
