//! Ecosystem parsers.
//!
//! Each parser implements [`Parser`]: it recognizes a project by its manifest
//! files, checks that dependencies are installed, and produces the root
//! [`Package`] with its dependency tree. Pure parsing of lockfiles and tool
//! output is kept in free functions so it can be tested without the tools.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::command;
use crate::error::{Error, Result};
use crate::models::Package;

pub mod cargo;
pub mod composer;
pub mod gem;
pub mod gomod;
pub mod gradle;
pub mod maven;
pub mod npm;
pub mod nuget;
pub mod pnpm;
pub mod python;
pub mod swift;
pub mod yarn;

/// Static description of a parser.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub name: &'static str,
    pub slug: &'static str,
    pub manifest: &'static [&'static str],
    pub module_path: &'static [&'static str],
}

/// The contract every ecosystem parser satisfies.
///
/// `set_root_module` is called before the list operations and may be called
/// more than once. `list_modules_with_deps` returns a list whose single
/// `root == true` entry carries the dependency tree.
pub trait Parser: Send {
    fn metadata(&self) -> &Metadata;

    /// True when any manifest exists under `path`.
    fn is_valid(&self, path: &Path) -> bool {
        any_exists(path, self.metadata().manifest)
    }

    fn has_modules_installed(&self, path: &Path) -> Result<()>;

    fn get_version(&self) -> Result<String>;

    fn set_root_module(&mut self, path: &Path) -> Result<()>;

    fn get_root_module(&mut self, path: &Path) -> Result<Package>;

    fn list_used_modules(&mut self, path: &Path) -> Result<Vec<Package>>;

    fn list_modules_with_deps(
        &mut self,
        path: &Path,
        global_settings: Option<&Path>,
    ) -> Result<Vec<Package>>;
}

pub fn any_exists(path: &Path, names: &[&str]) -> bool {
    names.iter().any(|n| path.join(n).exists())
}

pub fn all_exist(path: &Path, names: &[&str]) -> bool {
    names.iter().all(|n| path.join(n).exists())
}

/// True when `dir` exists and has at least one entry.
pub fn non_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Read a file, mapping failures to a parse error naming the file.
pub fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::parse(format!("read {}", path.display()), e))
}

/// Strip the scheme and VCS prefixes from a URL: `git+https://x/y.git` → `x/y.git`.
pub fn strip_protocol(url: &str) -> String {
    let mut url = url.trim();
    for prefix in ["git+", "hg+", "svn+", "bzr+"] {
        url = url.strip_prefix(prefix).unwrap_or(url);
    }
    match url.find("://") {
        Some(idx) => url[idx + 3..].to_string(),
        None => url.to_string(),
    }
}

fn download_location_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(((git|hg|svn|bzr)\+)?(http://www\.|https://www\.|http://|https://|ssh://|git://|svn://|sftp://|ftp://)?[a-z0-9]+([\-\.]{1}[a-z0-9]+){0,100}\.[a-z]{2,5}(:[0-9]{1,5})?(/.*))|(git\+git@[a-zA-Z0-9\.]+:[a-zA-Z0-9/\\.@]+)|(bzr\+lp:[a-zA-Z0-9\.]+)$",
        )
        .ok()
    })
    .as_ref()
}

/// `url` when it is a valid SPDX download location, otherwise `"NONE"`.
pub fn download_location(url: &str) -> String {
    if !url.is_empty() && download_location_regex().is_some_and(|re| re.is_match(url)) {
        url.to_string()
    } else {
        "NONE".to_string()
    }
}

/// Rewrite a git remote into a download location:
/// `git@github.com:org/repo.git` → `git+https://github.com/org/repo.git`.
pub fn git_remote_to_download_location(remote: &str) -> String {
    let remote = remote.trim();
    let url = match remote.strip_prefix("git@") {
        Some(rest) => format!("https://{}", rest.replacen(':', "/", 1)),
        None => remote.to_string(),
    };
    if url.starts_with("git+") {
        url
    } else {
        format!("git+{}", url)
    }
}

/// `remote.origin.url` of the repository containing `dir`.
pub fn git_origin_url(dir: &Path) -> Option<String> {
    command::run("git", ["config", "--get", "remote.origin.url"], dir)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Last path segment of `path`, used when a manifest carries no name.
pub fn dir_name(path: &Path) -> String {
    path.canonicalize()
        .ok()
        .as_deref()
        .unwrap_or(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Return the root entry of a parser result.
pub fn root_of(modules: &[Package]) -> Option<&Package> {
    modules.iter().find(|m| m.root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_protocol() {
        assert_eq!(strip_protocol("https://github.com/serde-rs/serde"), "github.com/serde-rs/serde");
        assert_eq!(strip_protocol("git+https://github.com/a/b.git"), "github.com/a/b.git");
        assert_eq!(strip_protocol("github.com/a/b"), "github.com/a/b");
    }

    #[test]
    fn test_download_location() {
        assert_eq!(
            download_location("https://registry.npmjs.org/lodash/-/lodash-4.17.21.tgz"),
            "https://registry.npmjs.org/lodash/-/lodash-4.17.21.tgz"
        );
        assert_eq!(
            download_location("git+https://github.com/a/b.git"),
            "git+https://github.com/a/b.git"
        );
        assert_eq!(download_location("file:../local-pkg"), "NONE");
        assert_eq!(download_location(""), "NONE");
    }

    #[test]
    fn test_git_remote_rewrite() {
        assert_eq!(
            git_remote_to_download_location("git@github.com:org/repo.git"),
            "git+https://github.com/org/repo.git"
        );
        assert_eq!(
            git_remote_to_download_location("https://gitlab.com/org/repo.git"),
            "git+https://gitlab.com/org/repo.git"
        );
    }

    #[test]
    fn test_manifest_checks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert!(any_exists(dir.path(), &["package.json", "yarn.lock"]));
        assert!(!all_exist(dir.path(), &["package.json", "yarn.lock"]));
    }
}
