use std::path::{Path, PathBuf};

use crate::license::classifier::classify;
use crate::models::{OtherLicense, Package};

/// A license file found on disk and its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct License {
    /// SPDX identifier, prefixed with `LicenseRef-` when not on the SPDX list.
    pub id: String,
    pub known: bool,
    pub extracted_text: String,
    pub comments: String,
    pub file: PathBuf,
}

fn is_license_file_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    upper.starts_with("LICENSE") || upper.starts_with("LICENCE") || upper.starts_with("COPYING")
}

/// Locate a license file directly under `dir`. An exact `LICENSE` wins,
/// otherwise the first matching name in lexical order.
pub fn find_license_file(dir: &Path) -> Option<PathBuf> {
    let exact = dir.join("LICENSE");
    if exact.is_file() {
        return Some(exact);
    }

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_license_file_name)
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Read and classify the license file under `dir`, if any.
pub fn get_license(dir: &Path) -> Option<License> {
    let file = find_license_file(dir)?;
    let text = std::fs::read_to_string(&file).ok()?;
    let classification = classify(&text);

    let (id, comments) = if classification.known {
        (classification.id, String::new())
    } else {
        (
            format!("LicenseRef-{}", classification.id),
            format!("license text extracted from {}", file.display()),
        )
    };

    Some(License {
        id,
        known: classification.known,
        extracted_text: text,
        comments,
        file,
    })
}

/// First line of `text` containing `Copyright (c)`, trimmed.
pub fn copyright(text: &str) -> String {
    text.lines()
        .find(|l| l.to_lowercase().contains("copyright (c)"))
        .map(|l| l.trim().to_string())
        .unwrap_or_default()
}

/// Attach the license found under `dir` to `pkg`.
///
/// Returns false when no license file exists, leaving `pkg` untouched so the
/// caller can fall back to a manifest-declared license.
pub fn resolve_into(pkg: &mut Package, dir: &Path) -> bool {
    let Some(license) = get_license(dir) else {
        return false;
    };

    pkg.set_license(&license.id);
    pkg.copyright = copyright(&license.extracted_text);
    pkg.comments_license = license.comments.clone();
    if !license.known {
        pkg.other_licenses.push(OtherLicense {
            name: license.id.trim_start_matches("LicenseRef-").to_string(),
            id: license.id,
            extracted_text: license.extracted_text,
            comments: license.comments,
            file: license.file.display().to_string(),
        });
    }
    true
}
