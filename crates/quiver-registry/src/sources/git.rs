//! Git source: a shared clone per repository URL, pinned checkouts.
//!
//! ```text
//! <cache_dir>/git-repos/
//!   {url-key}/            # clone, reused across fetches
//!   locks/{url-key}.lock  # RepoLock for that clone
//! ```
//!
//! Every mutation of a clone, and every read of its working tree, happens
//! while holding its [`RepoLock`].

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use quiver_core::archive::{archive_directory, is_valid_archive, METADATA_FILE};
use quiver_core::model::{is_commit_id, Artifact, Source};
use quiver_core::{CoreError, QuiverConfig};

use super::{RepoLock, SourceHandler};
use crate::config::GitConfig;
use crate::context::FetchContext;
use crate::digest::url_key;
use crate::error::{FetchError, FetchResult};

#[derive(Debug, Clone)]
pub struct GitSource {
    repos_dir: PathBuf,
    locks_dir: PathBuf,
    config: GitConfig,
}

impl GitSource {
    /// `repos_dir` holds the clones; locks go to `repos_dir/locks`.
    pub fn new(repos_dir: impl Into<PathBuf>, config: GitConfig) -> Self {
        let repos_dir = repos_dir.into();
        Self {
            locks_dir: repos_dir.join("locks"),
            repos_dir,
            config,
        }
    }

    pub fn from_config(quiver: &QuiverConfig, config: GitConfig) -> Self {
        Self {
            repos_dir: quiver.git_repos_dir(),
            locks_dir: quiver.git_locks_dir(),
            config,
        }
    }

    pub fn clone_dir(&self, url: &str) -> PathBuf {
        self.repos_dir.join(url_key(url))
    }

    fn lock_path(&self, url: &str) -> PathBuf {
        self.locks_dir.join(format!("{}.lock", url_key(url)))
    }

    /// Commit id for `reference` on `url`. Full commit ids pass through;
    /// anything else is looked up with `git ls-remote`.
    pub async fn resolve_ref(&self, url: &str, reference: &str) -> FetchResult<String> {
        if is_commit_id(reference) {
            return Ok(reference.to_string());
        }
        let reference = if reference.is_empty() { "HEAD" } else { reference };

        check_url(url)?;
        let output = self.git(None, &["ls-remote", url]).await?;
        let commit = pick_ref(&output, reference).ok_or_else(|| FetchError::NotFound {
            resource: format!("{}@{}", url, reference),
        })?;

        debug!(url, reference, commit = %commit, "resolved git ref");
        Ok(commit)
    }

    /// Archive for `commit` of `url`, taken from `subdirectory`.
    ///
    /// A `.zip` in the directory wins, preferring one whose file name starts
    /// with `name`; otherwise the directory itself is archived when it has a
    /// `metadata.toml`.
    pub async fn fetch_at(
        &self,
        name: &str,
        url: &str,
        commit: &str,
        subdirectory: Option<&str>,
    ) -> FetchResult<Vec<u8>> {
        check_url(url)?;
        if !is_commit_id(commit) {
            return Err(FetchError::Git {
                message: format!("not a full commit id: '{}'", commit),
            });
        }
        let subdir = checked_subdirectory(name, subdirectory)?;

        let _lock = RepoLock::acquire(self.lock_path(url), self.config.lock_timeout).await?;
        let clone_dir = self.clone_dir(url);
        self.sync_clone(url, &clone_dir, commit).await?;

        let dir = clone_dir.join(subdir);
        if !dir.is_dir() {
            return Err(FetchError::source(
                name,
                format!("'{}' not found at {}", subdirectory.unwrap_or("."), commit),
            ));
        }

        if let Some(zip) = find_archive(&dir, name).await? {
            let bytes = tokio::fs::read(&zip)
                .await
                .map_err(|e| FetchError::source(name, format!("{}: {}", zip.display(), e)))?;
            if !is_valid_archive(&bytes) {
                return Err(FetchError::integrity(
                    name,
                    format!("{} is not a zip archive", zip.display()),
                ));
            }
            return Ok(bytes);
        }

        if dir.join(METADATA_FILE).is_file() {
            let bytes = tokio::task::spawn_blocking(move || archive_directory(&dir))
                .await
                .map_err(|e| FetchError::source(name, format!("archive task failed: {}", e)))?
                .map_err(CoreError::from)?;
            return Ok(bytes);
        }

        Err(FetchError::source(
            name,
            format!("no archive or {} in {}@{}", METADATA_FILE, url, commit),
        ))
    }

    /// Clone if absent, fetch if the commit is missing, then check it out.
    async fn sync_clone(&self, url: &str, clone_dir: &Path, commit: &str) -> FetchResult<()> {
        if !clone_dir.join(".git").is_dir() {
            if clone_dir.exists() {
                tokio::fs::remove_dir_all(clone_dir)
                    .await
                    .map_err(|e| FetchError::Git {
                        message: format!("failed to remove broken clone: {}", e),
                    })?;
            }
            tokio::fs::create_dir_all(&self.repos_dir)
                .await
                .map_err(|e| FetchError::Git {
                    message: format!("failed to create {}: {}", self.repos_dir.display(), e),
                })?;

            info!(url, dir = %clone_dir.display(), "cloning repository");
            let target = clone_dir.to_string_lossy();
            self.git(None, &["clone", "--no-checkout", "--quiet", url, target.as_ref()])
                .await?;
        }

        if !self.has_commit(clone_dir, commit).await {
            debug!(url, commit, "fetching repository");
            self.git(Some(clone_dir), &["fetch", "--quiet", "--tags", "origin"])
                .await?;
            if !self.has_commit(clone_dir, commit).await {
                // Servers that allow it can serve a commit outside every ref.
                self.git(Some(clone_dir), &["fetch", "--quiet", "origin", commit])
                    .await?;
            }
        }

        self.git(
            Some(clone_dir),
            &["checkout", "--quiet", "--force", "--detach", commit],
        )
        .await?;
        self.git(Some(clone_dir), &["clean", "-fdxq"]).await?;
        Ok(())
    }

    async fn has_commit(&self, clone_dir: &Path, commit: &str) -> bool {
        let spec = format!("{}^{{commit}}", commit);
        self.git(Some(clone_dir), &["cat-file", "-e", &spec])
            .await
            .is_ok()
    }

    /// Run git and return stdout.
    async fn git(&self, cwd: Option<&Path>, args: &[&str]) -> FetchResult<String> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        if let Some(ssh) = self.config.ssh_command() {
            cmd.env("GIT_SSH_COMMAND", ssh);
        }

        let output = cmd.output().await.map_err(|e| FetchError::Git {
            message: format!("failed to run git: {}", e),
        })?;

        if !output.status.success() {
            return Err(FetchError::Git {
                message: format!(
                    "git {} failed: {}",
                    args.first().copied().unwrap_or_default(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl SourceHandler for GitSource {
    async fn fetch(&self, artifact: &Artifact, _ctx: &FetchContext) -> FetchResult<Vec<u8>> {
        let Source::Git(spec) = &artifact.source else {
            return Err(FetchError::source(&artifact.name, "not a git source"));
        };
        let commit = self.resolve_ref(&spec.url, &spec.reference).await?;
        self.fetch_at(
            &artifact.name,
            &spec.url,
            &commit,
            spec.subdirectory.as_deref(),
        )
        .await
    }
}

/// Pick the commit for `reference` out of `ls-remote` output. Peeled tags
/// (`^{}`) win over the tag object itself.
fn pick_ref(ls_remote: &str, reference: &str) -> Option<String> {
    let candidates = [
        format!("refs/tags/{}^{{}}", reference),
        format!("refs/tags/{}", reference),
        format!("refs/heads/{}", reference),
        reference.to_string(),
    ];

    let refs: Vec<(&str, &str)> = ls_remote
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(sha, name)| (sha.trim(), name.trim()))
        .collect();

    candidates.iter().find_map(|wanted| {
        refs.iter()
            .find(|(_, name)| name == wanted)
            .map(|(sha, _)| sha.to_string())
    })
}

/// Keeps a URL from being read as a git option.
fn check_url(url: &str) -> FetchResult<()> {
    if url.is_empty() || url.starts_with('-') {
        return Err(FetchError::Git {
            message: format!("invalid repository url: '{}'", url),
        });
    }
    Ok(())
}

/// Relative subdirectory without `..`, or the clone root.
fn checked_subdirectory<'a>(name: &str, subdirectory: Option<&'a str>) -> FetchResult<&'a Path> {
    let Some(sub) = subdirectory.filter(|s| !s.is_empty()) else {
        return Ok(Path::new(""));
    };
    let path = Path::new(sub);
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(FetchError::source(
            name,
            format!("subdirectory must be relative and inside the repository: {}", sub),
        ));
    }
    Ok(path)
}

async fn find_archive(dir: &Path, name: &str) -> FetchResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| FetchError::Git {
        message: format!("failed to read {}: {}", dir.display(), e),
    })?;

    let mut zips = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| FetchError::Git {
        message: format!("failed to read {}: {}", dir.display(), e),
    })? {
        let path = entry.path();
        let is_zip = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
        if is_zip && path.is_file() {
            zips.push(path);
        }
    }
    zips.sort();

    let preferred = zips.iter().position(|p| {
        p.file_name()
            .and_then(|f| f.to_str())
            .is_some_and(|f| f.starts_with(name))
    });
    Ok(match preferred {
        Some(i) => Some(zips.swap_remove(i)),
        None => zips.into_iter().next(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LS_REMOTE: &str = "\
1111111111111111111111111111111111111111\tHEAD
2222222222222222222222222222222222222222\trefs/heads/main
3333333333333333333333333333333333333333\trefs/tags/v1.0.0
4444444444444444444444444444444444444444\trefs/tags/v1.0.0^{}
5555555555555555555555555555555555555555\trefs/tags/v0.9.0
";

    #[test]
    fn test_pick_ref() {
        assert_eq!(pick_ref(LS_REMOTE, "main").unwrap(), "2".repeat(40));
        assert_eq!(pick_ref(LS_REMOTE, "v1.0.0").unwrap(), "4".repeat(40));
        assert_eq!(pick_ref(LS_REMOTE, "v0.9.0").unwrap(), "5".repeat(40));
        assert_eq!(pick_ref(LS_REMOTE, "HEAD").unwrap(), "1".repeat(40));
        assert!(pick_ref(LS_REMOTE, "missing").is_none());
    }

    #[tokio::test]
    async fn test_commit_ids_pass_through() {
        let dir = TempDir::new().unwrap();
        let source = GitSource::new(dir.path(), GitConfig::default());
        let commit = "a".repeat(40);
        assert_eq!(
            source.resolve_ref("https://unreachable.invalid/x.git", &commit).await.unwrap(),
            commit
        );
    }

    #[test]
    fn test_subdirectory_must_stay_inside() {
        assert!(checked_subdirectory("a", Some("skills/a")).is_ok());
        assert_eq!(checked_subdirectory("a", None).unwrap(), Path::new(""));
        assert!(checked_subdirectory("a", Some("../outside")).is_err());
        assert!(checked_subdirectory("a", Some("/etc")).is_err());
    }

    #[tokio::test]
    async fn test_option_like_url_rejected() {
        let dir = TempDir::new().unwrap();
        let source = GitSource::new(dir.path(), GitConfig::default());
        let err = source.resolve_ref("--upload-pack=touch", "main").await.unwrap_err();
        assert!(matches!(err, FetchError::Git { .. }));
    }

    #[tokio::test]
    async fn test_find_archive_prefers_name_prefix() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("aaa-other.zip"), b"x").unwrap();
        std::fs::write(dir.path().join("helper-1.0.0.zip"), b"x").unwrap();
        std::fs::write(dir.path().join("README.md"), b"x").unwrap();

        let found = find_archive(dir.path(), "helper").await.unwrap().unwrap();
        assert!(found.ends_with("helper-1.0.0.zip"));

        let fallback = find_archive(dir.path(), "nomatch").await.unwrap().unwrap();
        assert!(fallback.ends_with("aaa-other.zip"));
    }

    #[test]
    fn test_layout() {
        let quiver = QuiverConfig::new("/cache");
        let source = GitSource::from_config(&quiver, GitConfig::default());
        let url = "https://github.com/acme/skills.git";
        assert_eq!(source.clone_dir(url), Path::new("/cache/git-repos").join(url_key(url)));
        assert!(source.lock_path(url).starts_with("/cache/git-repos/locks"));
    }
}
