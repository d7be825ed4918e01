use tracing::debug;

use crate::error::{Error, Result};
use crate::registry::RegistryClient;

pub const MAVEN_CENTRAL: &str = "https://repo1.maven.org/maven2/";

/// Repository-relative path of an artifact:
/// `com/google/guava/guava/31.0.1-jre/guava-31.0.1-jre.jar`.
pub fn artifact_path(group_id: &str, artifact_id: &str, version: &str, extension: &str) -> String {
    format!(
        "{}/{}/{}/{}-{}.{}",
        group_id.replace('.', "/"),
        artifact_id,
        version,
        artifact_id,
        version,
        extension
    )
}

/// Join a repository base URL and a relative artifact path, keeping any path
/// prefix of the repository.
pub fn join_url(repo: &str, suffix: &str) -> String {
    format!("{}/{}", repo.trim_end_matches('/'), suffix.trim_start_matches('/'))
}

/// First repository whose artifact URL answers HEAD 200, in declaration order.
pub fn first_serving(client: &RegistryClient, repos: &[String], suffix: &str) -> Option<String> {
    repos.iter().map(|repo| join_url(repo, suffix)).find(|url| {
        let ok = client.head_ok(url);
        debug!(url = %url, ok, "checked repository");
        ok
    })
}

/// Fetch the `.sha1` sidecar of an artifact URL. Only the leading 40
/// characters are kept; some repositories append the file name.
pub fn fetch_sha1(client: &RegistryClient, artifact_url: &str) -> Result<String> {
    let body = client.get_text(&format!("{}.sha1", artifact_url))?;
    let digest: String = body.trim().chars().take(40).collect();
    if digest.len() != 40 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Registry(format!(
            "malformed sha1 sidecar for {}",
            artifact_url
        )));
    }
    Ok(digest.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::testing;

    #[test]
    fn test_artifact_path() {
        assert_eq!(
            artifact_path("com.google.guava", "guava", "31.0.1-jre", "jar"),
            "com/google/guava/guava/31.0.1-jre/guava-31.0.1-jre.jar"
        );
    }

    #[test]
    fn test_join_url_keeps_repo_path() {
        let suffix = "com/google/guava/guava/31.0.1-jre/guava-31.0.1-jre.jar";
        assert_eq!(
            join_url("https://repo1.maven.org/maven2/", suffix),
            "https://repo1.maven.org/maven2/com/google/guava/guava/31.0.1-jre/guava-31.0.1-jre.jar"
        );
        assert_eq!(
            join_url("https://jcenter.bintray.com", suffix),
            "https://jcenter.bintray.com/com/google/guava/guava/31.0.1-jre/guava-31.0.1-jre.jar"
        );
    }

    #[test]
    fn test_offline_finds_no_repository() {
        let client = RegistryClient::new(5, true).unwrap();
        let repos = vec![MAVEN_CENTRAL.to_string()];
        assert!(first_serving(&client, &repos, "a/b/1/b-1.jar").is_none());
    }

    #[test]
    fn test_first_repository_answering_200_wins() {
        let base = testing::serve(|_, path| {
            if path.starts_with("/repo1/") {
                (404, String::new())
            } else {
                (200, String::new())
            }
        });
        let repos: Vec<String> = ["repo1", "repo2", "repo3"]
            .iter()
            .map(|r| format!("{}/{}/", base, r))
            .collect();
        let found = first_serving(&RegistryClient::local(), &repos, "a/b/1/b-1.jar");
        assert_eq!(found, Some(format!("{}/repo2/a/b/1/b-1.jar", base)));
    }

    #[test]
    fn test_fetch_sha1_reads_sidecar() {
        let digest = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
        let base = testing::serve(move |_, path| {
            if path.ends_with(".jar.sha1") {
                (200, format!("{}  b-1.jar\n", digest))
            } else {
                (404, String::new())
            }
        });
        let client = RegistryClient::local();
        let url = format!("{}/a/b/1/b-1.jar", base);
        assert_eq!(fetch_sha1(&client, &url).unwrap(), digest);

        let missing = format!("{}/a/b/1/b-1.pom", base);
        assert!(matches!(fetch_sha1(&client, &missing), Err(Error::Registry(_))));
    }
}
