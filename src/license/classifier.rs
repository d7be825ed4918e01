use crate::license::spdx::{is_spdx_id, license_ref_id, normalize};

/// Phrase rules checked in order. Every phrase of a rule must appear in the
/// whitespace-collapsed, lowercased license text. The GPL family is keyed on
/// title lines since each text mentions its siblings.
const RULES: &[(&str, &[&str])] = &[
    ("AGPL-3.0", &["gnu affero general public license version 3"]),
    ("LGPL-3.0", &["gnu lesser general public license version 3"]),
    ("LGPL-2.1", &["gnu lesser general public license version 2.1"]),
    ("LGPL-2.0", &["gnu library general public license version 2"]),
    ("GPL-3.0", &["gnu general public license version 3"]),
    ("GPL-2.0", &["gnu general public license version 2"]),
    ("Apache-2.0", &["apache license", "version 2.0"]),
    ("MPL-2.0", &["mozilla public license", "2.0"]),
    ("EPL-2.0", &["eclipse public license - v 2.0"]),
    ("EPL-1.0", &["eclipse public license - v 1.0"]),
    ("BSL-1.0", &["boost software license"]),
    ("Unlicense", &["this is free and unencumbered software released into the public domain"]),
    ("CC0-1.0", &["cc0 1.0 universal"]),
    ("WTFPL", &["do what the fuck you want to public license"]),
    ("PSF-2.0", &["python software foundation license version 2"]),
    ("Artistic-2.0", &["the artistic license 2.0"]),
    ("Zlib", &["altered source versions must be plainly marked", "this notice may not be removed"]),
    (
        "ISC",
        &["permission to use, copy, modify, and/or distribute this software for any purpose"],
    ),
    (
        "BSD-4-Clause",
        &["redistribution and use in source and binary forms", "all advertising materials"],
    ),
    (
        "BSD-3-Clause",
        &["redistribution and use in source and binary forms", "neither the name"],
    ),
    ("BSD-2-Clause", &["redistribution and use in source and binary forms"]),
    ("MIT", &["permission is hereby granted, free of charge"]),
];

/// Result of classifying a license text.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// SPDX identifier, or a bare reference id when not on the SPDX list.
    pub id: String,
    pub known: bool,
}

/// Classify license text into an SPDX identifier.
///
/// When no phrase rule matches, the first non-empty line is taken as the
/// license name and normalized.
pub fn classify(text: &str) -> Classification {
    let flat = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    for (id, phrases) in RULES {
        if phrases.iter().all(|p| flat.contains(p)) {
            return Classification {
                id: id.to_string(),
                known: true,
            };
        }
    }

    let first_line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let normalized = normalize(first_line);
    if is_spdx_id(&normalized) {
        return Classification {
            id: normalized,
            known: true,
        };
    }

    Classification {
        id: license_ref_id(first_line),
        known: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIT_TEXT: &str = "MIT License\n\nCopyright (c) 2020 Jane Doe\n\n\
Permission is hereby granted, free of charge, to any person obtaining a copy\n\
of this software and associated documentation files (the \"Software\"), to deal\n\
in the Software without restriction, including without limitation the rights\n\
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell\n\
copies of the Software, subject to the following conditions:\n\n\
The above copyright notice and this permission notice shall be included in all\n\
copies or substantial portions of the Software.\n\n\
THE SOFTWARE IS PROVIDED \"AS IS\", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR\n\
IMPLIED.\n";

    #[test]
    fn test_classify_mit() {
        let c = classify(MIT_TEXT);
        assert_eq!(c.id, "MIT");
        assert!(c.known);
    }

    #[test]
    fn test_classify_apache() {
        let text = "                                 Apache License\n\
                           Version 2.0, January 2004\n\
                        http://www.apache.org/licenses/\n";
        assert_eq!(classify(text).id, "Apache-2.0");
    }

    #[test]
    fn test_classify_bsd_variants() {
        let two = "Redistribution and use in source and binary forms, with or without\n\
modification, are permitted provided that the following conditions are met:";
        assert_eq!(classify(two).id, "BSD-2-Clause");
        let three = format!(
            "{}\n3. Neither the name of the copyright holder nor the names of its",
            two
        );
        assert_eq!(classify(&three).id, "BSD-3-Clause");
    }

    #[test]
    fn test_classify_gpl_versions() {
        assert_eq!(
            classify("GNU GENERAL PUBLIC LICENSE\nVersion 3, 29 June 2007").id,
            "GPL-3.0"
        );
        assert_eq!(
            classify("GNU LESSER GENERAL PUBLIC LICENSE\nVersion 2.1, February 1999").id,
            "LGPL-2.1"
        );
    }

    #[test]
    fn test_classify_unknown_text() {
        let c = classify("Acme Proprietary License\nAll rights reserved.");
        assert_eq!(c.id, "Acme-Proprietary-License");
        assert!(!c.known);
    }

    #[test]
    fn test_classify_bare_identifier() {
        let c = classify("ISC License\n");
        assert_eq!(c.id, "ISC");
        assert!(c.known);
    }
}
