//! Scope matching: does an artifact apply to the caller's working context?
//!
//! Repository URLs are compared after normalization so that
//! `git@github.com:acme/app.git` and `https://github.com/acme/app` name the
//! same remote. SSH shorthand is folded only for well-known public hosts;
//! a `git@work:acme/app` alias from an ssh config stays distinct.

use crate::model::{Artifact, Scope};

/// Hosts whose `git@host:owner/repo` form is folded to `host/owner/repo`.
pub const KNOWN_GIT_HOSTS: [&str; 6] = [
    "github.com",
    "gitlab.com",
    "bitbucket.org",
    "codeberg.org",
    "dev.azure.com",
    "ssh.dev.azure.com",
];

/// The caller's working context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentScope {
    /// Installing into the user-wide target.
    Global,
    /// Installing for a whole repository.
    Repo { url: String },
    /// Installing for a sub-path of a repository.
    Path { url: String, path: String },
}

impl CurrentScope {
    pub fn repo(url: impl Into<String>) -> Self {
        Self::Repo { url: url.into() }
    }

    pub fn path(url: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Path {
            url: url.into(),
            path: path.into(),
        }
    }

    /// Repository URL, if any.
    pub fn repository(&self) -> Option<&str> {
        match self {
            Self::Global => None,
            Self::Repo { url } | Self::Path { url, .. } => Some(url),
        }
    }

    /// `(repository, path)` as recorded in the install tracker; empty strings
    /// stand for "none".
    pub fn tracker_key_parts(&self) -> (String, String) {
        match self {
            Self::Global => (String::new(), String::new()),
            Self::Repo { url } => (url.clone(), String::new()),
            Self::Path { url, path } => (url.clone(), normalize_scope_path(path)),
        }
    }
}

/// Normalize a repository URL to `host/owner/repo` form, lowercased.
pub fn normalize_repo_url(url: &str) -> String {
    let mut s = url.trim().to_lowercase();

    while s.ends_with('/') {
        s.pop();
    }
    if let Some(stripped) = s.strip_suffix(".git") {
        s = stripped.to_string();
    }

    for scheme in ["https://", "http://", "ssh://", "git://"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            let (authority, path) = match rest.split_once('/') {
                Some((authority, path)) => (authority, Some(path)),
                None => (rest, None),
            };
            let host = authority.rsplit('@').next().unwrap_or(authority);
            let host = strip_port(host);
            return match path {
                Some(path) => format!("{}/{}", host, path.trim_matches('/')),
                None => host.to_string(),
            };
        }
    }

    if let Some(rest) = s.strip_prefix("git@") {
        if let Some((host, path)) = rest.split_once(':') {
            if KNOWN_GIT_HOSTS.contains(&host) {
                return format!("{}/{}", host, path.trim_matches('/'));
            }
        }
    }

    s
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

/// Whether two repository URLs name the same remote.
pub fn repos_equivalent(a: &str, b: &str) -> bool {
    normalize_repo_url(a) == normalize_repo_url(b)
}

/// Forward slashes, no leading `./` or `/`, no trailing `/`.
pub fn normalize_scope_path(path: &str) -> String {
    let mut p = path.trim().replace('\\', "/");
    loop {
        if let Some(rest) = p.strip_prefix("./") {
            p = rest.to_string();
        } else if let Some(rest) = p.strip_prefix('/') {
            p = rest.to_string();
        } else {
            break;
        }
    }
    while p.ends_with('/') {
        p.pop();
    }
    if p == "." {
        p.clear();
    }
    p
}

/// Whether `child` equals `parent` or lies beneath it (both normalized).
fn is_same_or_descendant(child: &str, parent: &str) -> bool {
    parent.is_empty()
        || child == parent
        || (child.starts_with(parent) && child[parent.len()..].starts_with('/'))
}

fn scope_matches(scope: &Scope, current: &CurrentScope) -> bool {
    let Some(current_url) = current.repository() else {
        return false;
    };
    if !repos_equivalent(&scope.repository_url, current_url) {
        return false;
    }
    if scope.paths.is_empty() {
        return true;
    }

    match current {
        CurrentScope::Path { path, .. } => {
            let current_path = normalize_scope_path(path);
            scope
                .paths
                .iter()
                .map(|p| normalize_scope_path(p))
                .any(|declared| is_same_or_descendant(&current_path, &declared))
        }
        _ => false,
    }
}

/// Whether `artifact` applies in `current`. Artifacts without scopes are global
/// and match everywhere; otherwise any declared scope may match.
pub fn matches_artifact(artifact: &Artifact, current: &CurrentScope) -> bool {
    artifact.scopes.is_empty() || artifact.scopes.iter().any(|s| scope_matches(s, current))
}
