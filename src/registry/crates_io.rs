/// Source string of packages resolved from the crates.io index.
pub const CRATES_IO_SOURCE: &str = "registry+https://github.com/rust-lang/crates.io-index";

/// Download URL for a crate published on crates.io. No request is made.
pub fn download_url(name: &str, version: &str) -> String {
    format!("https://crates.io/api/v1/crates/{}/{}/download", name, version)
}
