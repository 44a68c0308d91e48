//! GitSource against a local repository. Skipped when `git` is not on PATH.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use quiver_core::archive::read_metadata;
use quiver_core::model::{Artifact, ArtifactType, GitSpec, Source};
use quiver_core::Version;
use quiver_registry::{FetchContext, FetchError, GitConfig, GitSource, RepoLock, SourceHandler};
use tempfile::TempDir;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=quiver", "-c", "user.email=quiver@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {:?}: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Repository with `skills/helper/metadata.toml`, tagged `v1.0.0`, then a
/// second commit bumping the version on `main`.
fn make_repo(root: &Path) -> (String, String) {
    std::fs::create_dir_all(root.join("skills/helper")).unwrap();
    git(root, &["init", "--quiet"]);
    git(root, &["checkout", "--quiet", "-b", "main"]);

    std::fs::write(
        root.join("skills/helper/metadata.toml"),
        "name = \"helper\"\nversion = \"1.0.0\"\ntype = \"skill\"\n",
    )
    .unwrap();
    git(root, &["add", "."]);
    git(root, &["commit", "--quiet", "-m", "v1"]);
    git(root, &["tag", "v1.0.0"]);
    let first = git(root, &["rev-parse", "HEAD"]);

    std::fs::write(
        root.join("skills/helper/metadata.toml"),
        "name = \"helper\"\nversion = \"1.1.0\"\ntype = \"skill\"\n",
    )
    .unwrap();
    git(root, &["commit", "--quiet", "-am", "v1.1"]);
    let second = git(root, &["rev-parse", "HEAD"]);

    (first, second)
}

fn artifact(url: &str, reference: &str) -> Artifact {
    Artifact::new(
        "helper",
        Version::new(1, 0, 0),
        ArtifactType::Skill,
        Source::Git(GitSpec {
            url: url.to_string(),
            reference: reference.to_string(),
            subdirectory: Some("skills/helper".to_string()),
        }),
    )
}

#[tokio::test]
async fn test_pinned_checkouts_share_one_clone() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }

    let repo = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let (first, second) = make_repo(repo.path());
    let url = repo.path().to_string_lossy().into_owned();

    let source = GitSource::new(cache.path().join("git-repos"), GitConfig::default());

    assert_eq!(source.resolve_ref(&url, "v1.0.0").await.unwrap(), first);
    assert_eq!(source.resolve_ref(&url, "main").await.unwrap(), second);

    let ctx = FetchContext::new();
    let old = source.fetch(&artifact(&url, &first), &ctx).await.unwrap();
    let new = source.fetch(&artifact(&url, &second), &ctx).await.unwrap();

    assert_eq!(read_metadata(&old).unwrap().version, "1.0.0");
    assert_eq!(read_metadata(&new).unwrap().version, "1.1.0");
    assert!(source.clone_dir(&url).join(".git").is_dir());
}

#[tokio::test]
async fn test_unknown_ref_is_not_found() {
    if !git_available() {
        return;
    }

    let repo = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    make_repo(repo.path());
    let url = repo.path().to_string_lossy().into_owned();

    let source = GitSource::new(cache.path(), GitConfig::default());
    let err = source.resolve_ref(&url, "no-such-branch").await.unwrap_err();
    assert!(matches!(err, FetchError::NotFound { .. }));
}

#[tokio::test]
async fn test_held_lock_times_out_fetch() {
    if !git_available() {
        return;
    }

    let repo = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let (first, _) = make_repo(repo.path());
    let url = repo.path().to_string_lossy().into_owned();

    let config = GitConfig {
        lock_timeout: Duration::from_millis(200),
        ..GitConfig::default()
    };
    let repos = cache.path().join("git-repos");
    let source = GitSource::new(&repos, config);

    // Another process holding the same lock file.
    let key = source
        .clone_dir(&url)
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    let lock_path = repos.join("locks").join(format!("{}.lock", key));
    let _held = RepoLock::acquire(lock_path, Duration::from_secs(1))
        .await
        .unwrap();

    let err = source
        .fetch(&artifact(&url, &first), &FetchContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::LockTimeout { .. }));
}
