/// SPDX identifiers the resolver can emit or recognize in manifests.
const KNOWN_IDS: &[&str] = &[
    "0BSD",
    "AFL-3.0",
    "AGPL-3.0",
    "AGPL-3.0-only",
    "AGPL-3.0-or-later",
    "APSL-2.0",
    "Apache-1.1",
    "Apache-2.0",
    "Artistic-2.0",
    "BSD-2-Clause",
    "BSD-3-Clause",
    "BSD-4-Clause",
    "BSL-1.0",
    "BlueOak-1.0.0",
    "CC-BY-3.0",
    "CC-BY-4.0",
    "CC0-1.0",
    "CDDL-1.0",
    "EPL-1.0",
    "EPL-2.0",
    "EUPL-1.1",
    "EUPL-1.2",
    "GPL-2.0",
    "GPL-2.0-only",
    "GPL-2.0-or-later",
    "GPL-3.0",
    "GPL-3.0-only",
    "GPL-3.0-or-later",
    "ISC",
    "LGPL-2.0",
    "LGPL-2.0-only",
    "LGPL-2.0-or-later",
    "LGPL-2.1",
    "LGPL-2.1-only",
    "LGPL-2.1-or-later",
    "LGPL-3.0",
    "LGPL-3.0-only",
    "LGPL-3.0-or-later",
    "MIT",
    "MIT-0",
    "MPL-1.1",
    "MPL-2.0",
    "MS-PL",
    "OSL-3.0",
    "PSF-2.0",
    "Python-2.0",
    "Ruby",
    "Unlicense",
    "WTFPL",
    "Zlib",
];

/// True when `id` is a canonical SPDX identifier (case-insensitive).
pub fn is_spdx_id(id: &str) -> bool {
    let id = id.trim();
    KNOWN_IDS.iter().any(|known| known.eq_ignore_ascii_case(id))
}

/// Normalize common non-SPDX strings to their SPDX equivalents.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed {
        "Apache 2.0" | "Apache License 2.0" | "Apache License, Version 2.0" | "Apache 2" => {
            "Apache-2.0".to_string()
        }
        "MIT License" | "The MIT License" | "The MIT License (MIT)" => "MIT".to_string(),
        "BSD" | "BSD License" => "BSD-3-Clause".to_string(),
        "BSD 2-Clause" | "Simplified BSD" => "BSD-2-Clause".to_string(),
        "BSD 3-Clause" | "New BSD" | "Modified BSD" => "BSD-3-Clause".to_string(),
        "GNU GPL v2" | "GNU General Public License v2" | "GPL v2" | "GPLv2" => {
            "GPL-2.0".to_string()
        }
        "GNU GPL v3" | "GNU General Public License v3" | "GPL v3" | "GPLv3" => {
            "GPL-3.0".to_string()
        }
        "GNU LGPL v2.1" | "LGPL v2.1" | "LGPLv2.1" => "LGPL-2.1".to_string(),
        "GNU LGPL v3" | "LGPL v3" | "LGPLv3" => "LGPL-3.0".to_string(),
        "Mozilla Public License 2.0" | "MPL 2.0" | "MPLv2" => "MPL-2.0".to_string(),
        "ISC License" => "ISC".to_string(),
        "CC0" | "Public Domain" => "CC0-1.0".to_string(),
        "AGPL v3" | "AGPLv3" | "GNU AGPL v3" => "AGPL-3.0".to_string(),
        other => other.to_string(),
    }
}

/// Turn an arbitrary license name into a string usable after `LicenseRef-`.
pub fn license_ref_id(raw: &str) -> String {
    let mut id = String::new();
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            id.push(c);
        } else if !id.ends_with('-') {
            id.push('-');
        }
    }
    let id = id.trim_matches('-');
    if id.is_empty() {
        "Unknown".to_string()
    } else {
        id.to_string()
    }
}
