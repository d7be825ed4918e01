use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use anyhow::Result;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use sbom_parsers::{Package, ParserResult};

/// Render a summary table and, unless `quiet`, every parser's dependency tree.
pub fn render(results: &[ParserResult], path: &Path, quiet: bool) -> Result<()> {
    println!(
        "\n {} v{}",
        "sbom-parsers".bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!(" Scanning: {}\n", path.display());

    render_table(results);
    println!();

    if quiet {
        return Ok(());
    }

    for result in results {
        let Some(root) = result.root() else {
            continue;
        };
        println!(" {} {}\n", "[TREE]".cyan().bold(), result.parser);
        for line in tree_lines(root) {
            println!(" {}", line);
        }
        println!();
    }

    Ok(())
}

fn render_table(results: &[ParserResult]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Parser").add_attribute(Attribute::Bold),
            Cell::new("Tool").add_attribute(Attribute::Bold),
            Cell::new("Root").add_attribute(Attribute::Bold),
            Cell::new("Direct").add_attribute(Attribute::Bold),
            Cell::new("Total").add_attribute(Attribute::Bold),
            Cell::new("Licenses").add_attribute(Attribute::Bold),
        ]);

    for result in results {
        let Some(root) = result.root() else {
            continue;
        };
        let unique = unique_packages(root);
        let unlicensed = unique
            .values()
            .filter(|p| p.license_concluded.is_empty())
            .count();
        let color = if unlicensed == 0 { Color::Green } else { Color::Yellow };

        table.add_row(vec![
            Cell::new(result.slug),
            Cell::new(&result.tool_version),
            Cell::new(format!("{} {}", root.name, root.version)),
            Cell::new(root.packages.len()).set_alignment(CellAlignment::Right),
            Cell::new(unique.len()).set_alignment(CellAlignment::Right),
            Cell::new(summarize_licenses(&unique)).fg(color),
        ]);
    }

    println!("{}", table);
}

/// Every package below `root`, once per `name:version`.
fn unique_packages(root: &Package) -> BTreeMap<String, &Package> {
    let mut unique = BTreeMap::new();
    let mut stack: Vec<&Package> = root.packages.values().collect();
    while let Some(pkg) = stack.pop() {
        if unique.insert(pkg.key(), pkg).is_none() {
            stack.extend(pkg.packages.values());
        }
    }
    unique
}

fn summarize_licenses(packages: &BTreeMap<String, &Package>) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for pkg in packages.values() {
        let license = if pkg.license_concluded.is_empty() {
            "unknown"
        } else {
            pkg.license_concluded.as_str()
        };
        *counts.entry(license).or_insert(0) += 1;
    }

    let mut pairs: Vec<(&str, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    pairs
        .iter()
        .take(3)
        .map(|(license, count)| format!("{} ({})", license, count))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Indented tree; a subtree already printed is marked `(*)` instead of repeated.
fn tree_lines(root: &Package) -> Vec<String> {
    let mut lines = vec![label(root)];
    let mut printed = HashSet::new();
    printed.insert(root.key());
    walk(root, "", &mut printed, &mut lines);
    lines
}

fn walk(pkg: &Package, prefix: &str, printed: &mut HashSet<String>, lines: &mut Vec<String>) {
    let count = pkg.packages.len();
    for (i, child) in pkg.packages.values().enumerate() {
        let last = i + 1 == count;
        let branch = if last { "└── " } else { "├── " };
        let expand = !child.packages.is_empty() && printed.insert(child.key());
        let marker = if !child.packages.is_empty() && !expand { " (*)" } else { "" };
        lines.push(format!("{}{}{}{}", prefix, branch, label(child), marker));
        if expand {
            let next = format!("{}{}", prefix, if last { "    " } else { "│   " });
            walk(child, &next, printed, lines);
        }
    }
}

fn label(pkg: &Package) -> String {
    let mut label = pkg.name.clone();
    if !pkg.version.is_empty() {
        label.push_str(&format!(" v{}", pkg.version));
    }
    if !pkg.license_concluded.is_empty() {
        label.push_str(&format!(" [{}]", pkg.license_concluded));
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Package {
        let mut shared = Package::new("shared", "1.0.0");
        shared.set_license("MIT");
        shared.insert_package(Package::new("leaf", "0.1.0"));

        let mut a = Package::new("a", "2.0.0");
        a.insert_package(shared.clone());
        let mut b = Package::new("b", "3.0.0");
        b.set_license("Apache-2.0");
        b.insert_package(shared);

        let mut root = Package::new("app", "0.1.0");
        root.root = true;
        root.insert_package(a);
        root.insert_package(b);
        root
    }

    #[test]
    fn test_tree_marks_repeated_subtrees() {
        let lines = tree_lines(&sample());
        assert_eq!(
            lines,
            vec![
                "app v0.1.0",
                "├── a v2.0.0",
                "│   └── shared v1.0.0 [MIT]",
                "│       └── leaf v0.1.0",
                "└── b v3.0.0 [Apache-2.0]",
                "    └── shared v1.0.0 [MIT] (*)",
            ]
        );
    }

    #[test]
    fn test_unique_packages_and_license_summary() {
        let root = sample();
        let unique = unique_packages(&root);
        assert_eq!(unique.len(), 4);
        assert_eq!(summarize_licenses(&unique), "unknown (2), Apache-2.0 (1), MIT (1)");
    }
}
