/// Package page used when a lockfile entry has no `resolved` URL.
pub fn package_page_url(name: &str, version: &str) -> String {
    format!("https://www.npmjs.com/package/{}/v/{}", name, version)
}

/// Registry tarball URL. Scoped names keep the scope in the path and drop it
/// from the file name: `@babel/core` → `.../@babel/core/-/core-7.0.0.tgz`.
pub fn tarball_url(name: &str, version: &str) -> String {
    let file_stem = name.rsplit('/').next().unwrap_or(name).trim_start_matches('@');
    format!(
        "https://registry.npmjs.org/{}/-/{}-{}.tgz",
        name, file_stem, version
    )
}
