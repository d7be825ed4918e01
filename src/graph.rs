//! Cycle-safe population of [`Package::packages`].
//!
//! Every parser reduces its ecosystem data to a [`DependencySource`] and lets
//! [`populate`] build the tree. Nodes are tracked by `name:version`; a node seen
//! before is not expanded again and instead takes the child map of its first
//! occurrence. Under a depth limit a node is expanded again when it shows up
//! shallower than before. Child maps are reference counted, so a shared subtree
//! is stored once.

use std::collections::HashMap;

use crate::error::Result;
use crate::models::{Package, PackageMap};

/// Yields the direct dependencies of a package, already enriched.
pub trait DependencySource {
    fn dependencies(&self, pkg: &Package) -> Result<Vec<Package>>;
}

/// Fill `pkg.packages` recursively.
pub fn populate<S: DependencySource + ?Sized>(pkg: &mut Package, source: &S) -> Result<()> {
    let mut seen = Seen::new();
    visit(pkg, source, &mut seen, 0, None)
}

/// Like [`populate`] but stops expanding below `max_depth` levels of children.
pub fn populate_to_depth<S: DependencySource + ?Sized>(
    pkg: &mut Package,
    source: &S,
    max_depth: usize,
) -> Result<()> {
    let mut seen = Seen::new();
    visit(pkg, source, &mut seen, 0, Some(max_depth))
}

/// Attach direct dependencies only; children are left unexpanded.
pub fn populate_direct<S: DependencySource + ?Sized>(pkg: &mut Package, source: &S) -> Result<()> {
    pkg.set_packages(child_map(source.dependencies(pkg)?));
    Ok(())
}

fn child_map(children: Vec<Package>) -> PackageMap {
    let mut map = PackageMap::new();
    for child in children {
        map.entry(child.name.clone()).or_insert(child);
    }
    map
}

/// Depth at which each node was expanded, with the node as built there.
type Seen = HashMap<String, (usize, Package)>;

fn visit<S: DependencySource + ?Sized>(
    pkg: &mut Package,
    source: &S,
    seen: &mut Seen,
    depth: usize,
    max_depth: Option<usize>,
) -> Result<()> {
    if max_depth.is_some_and(|max| depth >= max) {
        return Ok(());
    }

    let mut children = child_map(source.dependencies(pkg)?);
    seen.insert(pkg.key(), (depth, pkg.clone()));

    let child_depth = depth + 1;
    for child in children.values_mut() {
        let key = child.key();
        // under a depth limit a node first met deeper holds a truncated subtree
        let reusable = seen
            .get(&key)
            .filter(|(at, _)| max_depth.is_none() || *at <= child_depth);
        if let Some((_, previous)) = reusable {
            child.packages = previous.packages.clone();
            continue;
        }
        visit(child, source, seen, child_depth, max_depth)?;
        seen.insert(key, (child_depth, child.clone()));
    }

    pkg.set_packages(children);
    Ok(())
}

/// A flat set of packages and the edges between them, keyed by `name:version`.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    packages: HashMap<String, Package>,
    edges: HashMap<String, Vec<String>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a package; an existing entry with the same key is kept.
    pub fn insert(&mut self, pkg: Package) -> String {
        let key = pkg.key();
        self.packages.entry(key.clone()).or_insert(pkg);
        key
    }

    pub fn add_edge(&mut self, parent: &str, child: &str) {
        let children = self.edges.entry(parent.to_string()).or_default();
        if !children.iter().any(|c| c == child) {
            children.push(child.to_string());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Package> {
        self.packages.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.packages.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn children_of(&self, key: &str) -> &[String] {
        self.edges.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl DependencySource for Catalog {
    fn dependencies(&self, pkg: &Package) -> Result<Vec<Package>> {
        Ok(self
            .children_of(&pkg.key())
            .iter()
            .filter_map(|k| self.packages.get(k).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cyclic() -> (Catalog, Package) {
        let mut catalog = Catalog::new();
        let a = catalog.insert(Package::new("a", "1.0.0"));
        let b = catalog.insert(Package::new("b", "1.0.0"));
        catalog.add_edge(&a, &b);
        catalog.add_edge(&b, &a);
        (catalog, Package::new("a", "1.0.0"))
    }

    #[test]
    fn test_cycle_terminates() {
        let (catalog, mut a) = cyclic();
        populate(&mut a, &catalog).unwrap();

        let b = &a.packages["b"];
        let inner_a = &b.packages["a"];
        assert_eq!(inner_a.name, "a");
        assert!(inner_a.packages.is_empty());
    }

    #[test]
    fn test_diamond_shares_subtree() {
        let mut catalog = Catalog::new();
        let root = catalog.insert(Package::new("root", "0.1.0"));
        let left = catalog.insert(Package::new("left", "1.0.0"));
        let right = catalog.insert(Package::new("right", "1.0.0"));
        let shared = catalog.insert(Package::new("shared", "2.0.0"));
        let leaf = catalog.insert(Package::new("leaf", "3.0.0"));
        catalog.add_edge(&root, &left);
        catalog.add_edge(&root, &right);
        catalog.add_edge(&left, &shared);
        catalog.add_edge(&right, &shared);
        catalog.add_edge(&shared, &leaf);

        let mut pkg = Package::new("root", "0.1.0");
        populate(&mut pkg, &catalog).unwrap();

        let via_left = &pkg.packages["left"].packages["shared"];
        let via_right = &pkg.packages["right"].packages["shared"];
        assert_eq!(via_left.packages.len(), 1);
        assert_eq!(via_right.packages.len(), 1);
        assert!(std::sync::Arc::ptr_eq(&via_left.packages, &via_right.packages));
    }

    #[test]
    fn test_direct_only() {
        let mut catalog = Catalog::new();
        let root = catalog.insert(Package::new("root", "0.1.0"));
        let dep = catalog.insert(Package::new("dep", "1.0.0"));
        let sub = catalog.insert(Package::new("sub", "1.0.0"));
        catalog.add_edge(&root, &dep);
        catalog.add_edge(&dep, &sub);

        let mut pkg = Package::new("root", "0.1.0");
        populate_direct(&mut pkg, &catalog).unwrap();
        assert_eq!(pkg.packages.len(), 1);
        assert!(pkg.packages["dep"].packages.is_empty());
    }

    #[test]
    fn test_depth_limit() {
        let mut catalog = Catalog::new();
        let names = ["root", "l1", "l2", "l3", "l4"];
        let keys: Vec<String> = names
            .iter()
            .map(|n| catalog.insert(Package::new(*n, "1")))
            .collect();
        for pair in keys.windows(2) {
            catalog.add_edge(&pair[0], &pair[1]);
        }

        let mut pkg = Package::new("root", "1");
        populate_to_depth(&mut pkg, &catalog, 3).unwrap();
        let l3 = &pkg.packages["l1"].packages["l2"].packages["l3"];
        assert!(l3.packages.is_empty());
    }

    #[test]
    fn test_depth_limit_reexpands_shallower_occurrence() {
        let mut catalog = Catalog::new();
        let root = catalog.insert(Package::new("root", "1"));
        let a = catalog.insert(Package::new("a", "1"));
        let b = catalog.insert(Package::new("b", "1"));
        let x = catalog.insert(Package::new("x", "1"));
        let y = catalog.insert(Package::new("y", "1"));
        catalog.add_edge(&root, &a);
        catalog.add_edge(&root, &x);
        catalog.add_edge(&a, &b);
        catalog.add_edge(&b, &x);
        catalog.add_edge(&x, &y);

        let mut pkg = Package::new("root", "1");
        populate_to_depth(&mut pkg, &catalog, 3).unwrap();

        // x is first reached at the limit below a/b, then directly under root
        assert!(pkg.packages["a"].packages["b"].packages["x"].packages.is_empty());
        assert!(pkg.packages["x"].packages.contains_key("y"));
    }

    #[test]
    fn test_duplicate_children_are_coalesced() {
        let mut catalog = Catalog::new();
        let root = catalog.insert(Package::new("root", "1"));
        let dep = catalog.insert(Package::new("dep", "1"));
        catalog.add_edge(&root, &dep);
        catalog.add_edge(&root, &dep);

        let mut pkg = Package::new("root", "1");
        populate(&mut pkg, &catalog).unwrap();
        assert_eq!(pkg.packages.len(), 1);
    }
}
