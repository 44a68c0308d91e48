//! Requirements file grammar.
//!
//! One requirement per line:
//!
//! | Form | Source |
//! |------|--------|
//! | `git+URL@REF#name=NAME[&path=SUBDIR]` | git |
//! | `http://...` / `https://...` | http |
//! | `./...`, `../...`, `~/...`, `/...` | path |
//! | `NAME[OPERATOR VERSION[,OPERATOR VERSION...]]` | registry |
//!
//! Blank lines and `#` comments are ignored; a `#` preceded by whitespace
//! starts a trailing comment.

use std::fmt;

use crate::error::RequirementError;
use crate::model::is_valid_name;
use crate::version::VersionConstraint;

/// A single parsed requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Registry {
        name: String,
        constraint: VersionConstraint,
    },
    Git {
        url: String,
        reference: String,
        name: String,
        subdirectory: Option<String>,
    },
    Http {
        url: String,
    },
    Path {
        path: String,
    },
}

impl Requirement {
    /// Parse one (already comment-stripped) line.
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();
        if input.is_empty() {
            return Err("empty requirement".to_string());
        }

        if let Some(rest) = input.strip_prefix("git+") {
            return parse_git(rest);
        }
        if input.starts_with("http://") || input.starts_with("https://") {
            return Ok(Self::Http {
                url: input.to_string(),
            });
        }
        if ["./", "../", "~/", "/"].iter().any(|p| input.starts_with(p)) {
            return Ok(Self::Path {
                path: input.to_string(),
            });
        }
        parse_registry(input)
    }

    /// Artifact name, where the requirement determines one. For http and
    /// path requirements this is a guess from the last path segment; the
    /// archive metadata is authoritative.
    pub fn name(&self) -> Option<String> {
        match self {
            Self::Registry { name, .. } | Self::Git { name, .. } => Some(name.clone()),
            Self::Http { url } => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                file_stem(path)
            }
            Self::Path { path } => file_stem(path),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry { name, constraint } => write!(f, "{}{}", name, constraint),
            Self::Git {
                url,
                reference,
                name,
                subdirectory,
            } => {
                write!(f, "git+{}@{}#name={}", url, reference, name)?;
                if let Some(sub) = subdirectory {
                    write!(f, "&path={}", sub)?;
                }
                Ok(())
            }
            Self::Http { url } => f.write_str(url),
            Self::Path { path } => f.write_str(path),
        }
    }
}

fn file_stem(path: &str) -> Option<String> {
    let last = path.trim_end_matches('/').rsplit('/').next()?;
    let stem = last.strip_suffix(".zip").unwrap_or(last);
    (!stem.is_empty()).then(|| stem.to_string())
}

fn parse_git(rest: &str) -> Result<Requirement, String> {
    let (location, fragment) = rest
        .split_once('#')
        .ok_or("git requirement needs '#name=NAME'")?;

    let at = ref_separator(location).ok_or("git requirement needs '@REF' after the url")?;
    let (url, reference) = (&location[..at], &location[at + 1..]);
    if url.is_empty() {
        return Err("git requirement has an empty url".to_string());
    }
    if reference.is_empty() || reference.contains(':') {
        return Err("git requirement needs '@REF' after the url".to_string());
    }

    let mut name = None;
    let mut subdirectory = None;
    for pair in fragment.split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some(("name", value)) => name = Some(value.to_string()),
            Some(("path", value)) if !value.is_empty() => subdirectory = Some(value.to_string()),
            Some(("path", _)) => {}
            _ => return Err(format!("unknown git fragment parameter '{}'", pair)),
        }
    }

    let name = name.ok_or("git requirement needs '#name=NAME'")?;
    if !is_valid_name(&name) {
        return Err(format!("invalid artifact name '{}'", name));
    }

    Ok(Requirement::Git {
        url: url.to_string(),
        reference: reference.to_string(),
        name,
        subdirectory,
    })
}

/// Byte offset of the `@` that starts the ref. A `user@` in the authority of
/// `scheme://` urls and in scp-style `user@host:path` urls is skipped.
fn ref_separator(location: &str) -> Option<usize> {
    let path_start = match location.find("://") {
        Some(scheme_end) => {
            let authority = scheme_end + 3;
            authority + location[authority..].find('/')?
        }
        None => location.find(':').map_or(0, |colon| colon + 1),
    };
    location[path_start..].find('@').map(|at| path_start + at)
}

fn parse_registry(input: &str) -> Result<Requirement, String> {
    let split = input
        .find(|c: char| matches!(c, '~' | '=' | '<' | '>' | '!'))
        .unwrap_or(input.len());
    let name = input[..split].trim();
    if !is_valid_name(name) {
        return Err(format!("invalid artifact name '{}'", name));
    }

    let constraint = VersionConstraint::parse(&input[split..]).map_err(|e| e.to_string())?;
    Ok(Requirement::Registry {
        name: name.to_string(),
        constraint,
    })
}

fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim();
    if trimmed.starts_with('#') {
        return "";
    }
    match trimmed.find(" #").or_else(|| trimmed.find("\t#")) {
        Some(pos) => trimmed[..pos].trim_end(),
        None => trimmed,
    }
}

/// Parse a whole requirements file.
pub fn parse_requirements(text: &str) -> Result<Vec<Requirement>, RequirementError> {
    let mut requirements = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = strip_comment(raw);
        if line.is_empty() {
            continue;
        }
        let requirement = Requirement::parse(line).map_err(|reason| RequirementError {
            line: i + 1,
            input: line.to_string(),
            reason,
        })?;
        requirements.push(requirement);
    }
    Ok(requirements)
}
