use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

/// Child packages keyed by name.
pub type PackageMap = BTreeMap<String, Package>;

/// A software component discovered by a parser.
///
/// `packages` holds the direct dependencies of this node. Sub-maps are shared
/// between nodes that refer to the same `name:version`, so cloning a package
/// never deep-copies its subtree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub root: bool,
    pub local_path: String,
    pub package_url: String,
    pub package_download_location: String,
    pub package_home_page: String,
    pub supplier: Supplier,
    pub checksum: Checksum,
    pub license_declared: String,
    pub license_concluded: String,
    pub comments_license: String,
    pub copyright: String,
    pub other_licenses: Vec<OtherLicense>,
    pub packages: Arc<PackageMap>,
}

impl Package {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Identity used by graph assembly to detect revisits.
    pub fn key(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    /// Replace the child map.
    pub fn set_packages(&mut self, packages: PackageMap) {
        self.packages = Arc::new(packages);
    }

    /// Add or replace a single child, cloning the map only when it is shared.
    pub fn insert_package(&mut self, child: Package) {
        Arc::make_mut(&mut self.packages).insert(child.name.clone(), child);
    }

    /// Set both declared and concluded license, leaving empty values alone.
    pub fn set_license(&mut self, license: &str) {
        if license.is_empty() {
            return;
        }
        self.license_declared = license.to_string();
        self.license_concluded = license.to_string();
    }
}

/// Extracted text for a license that has no SPDX identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OtherLicense {
    pub id: String,
    pub name: String,
    pub extracted_text: String,
    pub comments: String,
    pub file: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SupplierType {
    Person,
    #[default]
    Organization,
}

impl fmt::Display for SupplierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupplierType::Person => write!(f, "Person"),
            SupplierType::Organization => write!(f, "Organization"),
        }
    }
}

const ORGANIZATION_KEYWORDS: [&str; 6] = [
    "authority",
    "team",
    "developers",
    "services",
    "foundation",
    "software",
];

/// The party responsible for a package.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Supplier {
    #[serde(rename = "type")]
    pub kind: SupplierType,
    pub name: String,
    pub email: String,
}

impl Supplier {
    pub fn organization(name: impl Into<String>) -> Self {
        Self {
            kind: SupplierType::Organization,
            name: name.into(),
            email: String::new(),
        }
    }

    pub fn person(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            kind: SupplierType::Person,
            name: name.into(),
            email: email.into(),
        }
    }

    /// Build a supplier from an author string such as `"Jane Doe <jane@example.com>"`.
    ///
    /// An address makes the supplier a person unless the name carries an
    /// organization keyword. Without an address the supplier is an
    /// organization. An empty name falls back to the raw author string and
    /// then to `fallback`.
    pub fn from_author(author: &str, fallback: &str) -> Self {
        let (name, email) = parse_author(author);
        let name = if !name.is_empty() {
            name
        } else if !author.trim().is_empty() {
            author.trim().to_string()
        } else {
            fallback.to_string()
        };

        if email.is_empty() || is_organization(&name) {
            Self {
                kind: SupplierType::Organization,
                name,
                email,
            }
        } else {
            Self::person(name, email)
        }
    }

    /// Render as `"<Type>: <Name>"` with an optional `" (<Email>)"` suffix.
    pub fn get(&self) -> String {
        if self.name.is_empty() {
            return String::new();
        }
        let mut rendered = format!("{}: {}", self.kind, self.name);
        let email = self.email.trim();
        if !email.is_empty()
            && !email.eq_ignore_ascii_case("none")
            && !email.eq_ignore_ascii_case("unknown")
        {
            rendered.push_str(&format!(" ({})", email));
        }
        rendered
    }
}

/// True when `name` contains one of the organization keywords.
pub fn is_organization(name: &str) -> bool {
    let lower = name.to_lowercase();
    ORGANIZATION_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Split a mail-style author string into name and address.
pub fn parse_author(author: &str) -> (String, String) {
    let author = author.trim();
    match (author.find('<'), author.rfind('>')) {
        (Some(start), Some(end)) if start < end => {
            let name = author[..start].trim().trim_matches('"').to_string();
            let email = author[start + 1..end].trim().to_string();
            (name, email)
        }
        _ if author.contains('@') && !author.contains(' ') => (String::new(), author.to_string()),
        _ => (author.to_string(), String::new()),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum HashAlgorithm {
    #[default]
    #[serde(rename = "SHA1")]
    Sha1,
    #[serde(rename = "SHA224")]
    Sha224,
    #[serde(rename = "SHA256")]
    Sha256,
    #[serde(rename = "SHA384")]
    Sha384,
    #[serde(rename = "SHA512")]
    Sha512,
    #[serde(rename = "MD2")]
    Md2,
    #[serde(rename = "MD4")]
    Md4,
    #[serde(rename = "MD5")]
    Md5,
    #[serde(rename = "MD6")]
    Md6,
    Unsupported,
}

impl HashAlgorithm {
    /// Case-insensitive lookup; `"sha-256"` and `"SHA256"` are the same algorithm.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_uppercase().replace('-', "").as_str() {
            "SHA1" => HashAlgorithm::Sha1,
            "SHA224" => HashAlgorithm::Sha224,
            "SHA256" => HashAlgorithm::Sha256,
            "SHA384" => HashAlgorithm::Sha384,
            "SHA512" => HashAlgorithm::Sha512,
            "MD2" => HashAlgorithm::Md2,
            "MD4" => HashAlgorithm::Md4,
            "MD5" => HashAlgorithm::Md5,
            "MD6" => HashAlgorithm::Md6,
            _ => HashAlgorithm::Unsupported,
        }
    }

    /// Length of a hex digest for algorithms with a fixed output size.
    pub fn hex_len(&self) -> Option<usize> {
        match self {
            HashAlgorithm::Sha1 => Some(40),
            HashAlgorithm::Sha224 => Some(56),
            HashAlgorithm::Sha256 => Some(64),
            HashAlgorithm::Sha384 => Some(96),
            HashAlgorithm::Sha512 => Some(128),
            HashAlgorithm::Md2 | HashAlgorithm::Md4 | HashAlgorithm::Md5 => Some(32),
            HashAlgorithm::Md6 | HashAlgorithm::Unsupported => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha224 => "SHA224",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha384 => "SHA384",
            HashAlgorithm::Sha512 => "SHA512",
            HashAlgorithm::Md2 => "MD2",
            HashAlgorithm::Md4 => "MD4",
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Md6 => "MD6",
            HashAlgorithm::Unsupported => "UNSUPPORTED",
        };
        write!(f, "{}", name)
    }
}

/// A digest given either as a literal hex `value` or as raw `content` hashed on demand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    pub content: Vec<u8>,
    pub value: String,
}

impl Checksum {
    pub fn from_value(algorithm: HashAlgorithm, value: impl Into<String>) -> Self {
        Self {
            algorithm,
            content: Vec::new(),
            value: value.into(),
        }
    }

    pub fn from_content(algorithm: HashAlgorithm, content: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm,
            content: content.into(),
            value: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty() && self.content.is_empty()
    }
}

impl fmt::Display for Checksum {
    /// Hex digest. Content is hashed with the declared algorithm; algorithms
    /// without a local implementation fall back to SHA1.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.value.is_empty() {
            return write!(f, "{}", self.value);
        }
        if self.content.is_empty() {
            return Ok(());
        }
        let digest = match self.algorithm {
            HashAlgorithm::Sha224 => hex::encode(Sha224::digest(&self.content)),
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(&self.content)),
            HashAlgorithm::Sha384 => hex::encode(Sha384::digest(&self.content)),
            HashAlgorithm::Sha512 => hex::encode(Sha512::digest(&self.content)),
            _ => hex::encode(Sha1::digest(&self.content)),
        };
        write!(f, "{}", digest)
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let algorithm = match self.algorithm {
            HashAlgorithm::Sha224
            | HashAlgorithm::Sha256
            | HashAlgorithm::Sha384
            | HashAlgorithm::Sha512 => self.algorithm,
            _ if self.value.is_empty() => HashAlgorithm::Sha1,
            other => other,
        };
        let mut state = serializer.serialize_struct("Checksum", 2)?;
        state.serialize_field("algorithm", &algorithm)?;
        state.serialize_field("value", &self.to_string())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supplier_get_empty_name() {
        let supplier = Supplier::person("", "x@y.z");
        assert_eq!(supplier.get(), "");
    }

    #[test]
    fn test_supplier_get_sentinel_emails() {
        assert_eq!(
            Supplier::person("Jane", "none").get(),
            "Person: Jane"
        );
        assert_eq!(
            Supplier::person("Jane", "UNKNOWN").get(),
            "Person: Jane"
        );
        assert_eq!(
            Supplier::person("Jane", "jane@example.com").get(),
            "Person: Jane (jane@example.com)"
        );
        assert_eq!(Supplier::organization("Acme").get(), "Organization: Acme");
    }

    #[test]
    fn test_supplier_from_author_person() {
        let supplier = Supplier::from_author("John Doe <johndow@example.com>", "pkg");
        assert_eq!(supplier.kind, SupplierType::Person);
        assert_eq!(supplier.name, "John Doe");
        assert_eq!(supplier.email, "johndow@example.com");
    }

    #[test]
    fn test_supplier_from_author_organization_keyword() {
        let supplier = Supplier::from_author("The Tokio Team <team@tokio.rs>", "tokio");
        assert_eq!(supplier.kind, SupplierType::Organization);

        // "Authors" is not an organization keyword
        let supplier = Supplier::from_author("Kubernetes Authors <dev@k8s.io>", "k8s");
        assert_eq!(supplier.kind, SupplierType::Person);
    }

    #[test]
    fn test_supplier_from_author_fallbacks() {
        let supplier = Supplier::from_author("<only@mail.com>", "serde");
        assert_eq!(supplier.name, "<only@mail.com>");

        let supplier = Supplier::from_author("", "serde");
        assert_eq!(supplier.name, "serde");
        assert_eq!(supplier.kind, SupplierType::Organization);
    }

    #[test]
    fn test_hash_algorithm_from_name() {
        assert_eq!(HashAlgorithm::from_name("sha512"), HashAlgorithm::Sha512);
        assert_eq!(HashAlgorithm::from_name("SHA-256"), HashAlgorithm::Sha256);
        assert_eq!(HashAlgorithm::from_name("Md5"), HashAlgorithm::Md5);
        assert_eq!(HashAlgorithm::from_name("base64"), HashAlgorithm::Unsupported);
    }

    #[test]
    fn test_checksum_from_content() {
        let sum = Checksum::from_content(HashAlgorithm::Sha256, "abc");
        assert_eq!(
            sum.to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let sum = Checksum::from_content(HashAlgorithm::Sha1, "abc");
        assert_eq!(sum.to_string(), "a9993e364706816aba3e25717850c26c9cd0d89d");

        let sum = Checksum::from_content(HashAlgorithm::Sha512, "left-pad-1.3.0");
        assert_eq!(sum.to_string().len(), 128);
    }

    #[test]
    fn test_checksum_value_wins_over_content() {
        let mut sum = Checksum::from_value(HashAlgorithm::Sha1, "deadbeef");
        sum.content = b"ignored".to_vec();
        assert_eq!(sum.to_string(), "deadbeef");
    }

    #[test]
    fn test_insert_package_keeps_shared_map_intact() {
        let mut a = Package::new("a", "1.0.0");
        a.insert_package(Package::new("b", "2.0.0"));
        let mut copy = a.clone();
        copy.insert_package(Package::new("c", "3.0.0"));
        assert_eq!(a.packages.len(), 1);
        assert_eq!(copy.packages.len(), 2);
    }
}
