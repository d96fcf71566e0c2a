//! Resource identity, content hashing and fetching.
//!
//! A [`ResourceId`] is the canonical, location-independent name of a
//! resource. Two references that name the same resource always produce equal
//! identifiers, no matter how they are written:
//!
//! - local paths are resolved against the referring document's directory and
//!   normalized lexically (`.` and `..` segments collapse)
//! - URLs have lowercase scheme and host, no default port, no fragment and
//!   query parameters sorted by key
//! - `file://` URLs collapse to the same local identifier as the plain path
//!
//! Derived resources (AI tasks over other resources) are identified by their
//! task and their source identifiers, so every document that asks for the
//! same summary shares one node and one cache entry.

mod fetch;
mod hash;

pub use fetch::{ContentSnapshot, DefaultFetcher, FetchError, Fetched, ResourceFetcher};
pub use hash::ContentHash;

use crate::core::{AiTask, ComposeError};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Canonical identifier of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceId {
    /// An absolute, lexically normalized local path.
    Local(PathBuf),
    /// A normalized http(s) URL.
    Remote(String),
    /// The output of an AI task over one or more sources.
    Derived { task: AiTask, sources: Vec<ResourceId> },
}

impl ResourceId {
    /// Identifier of a derived resource over `sources`.
    #[must_use]
    pub fn derived(task: AiTask, sources: Vec<Self>) -> Self {
        Self::Derived {
            task,
            sources,
        }
    }

    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    #[must_use]
    pub const fn is_derived(&self) -> bool {
        matches!(self, Self::Derived { .. })
    }

    /// The local path, for local identifiers.
    #[must_use]
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            _ => None,
        }
    }

    /// Context used to resolve references written inside this resource.
    #[must_use]
    pub fn base_context(&self) -> BaseContext {
        match self {
            Self::Local(path) => BaseContext::Directory(
                path.parent().map_or_else(|| PathBuf::from("/"), Path::to_path_buf),
            ),
            Self::Remote(url) => match Url::parse(url) {
                Ok(url) => BaseContext::Url(url),
                Err(_) => BaseContext::Directory(PathBuf::from("/")),
            },
            Self::Derived { sources, .. } => sources
                .first()
                .map_or_else(|| BaseContext::Directory(PathBuf::from("/")), Self::base_context),
        }
    }

    /// Short name for progress output: the file name or last URL segment.
    #[must_use]
    pub fn short_name(&self) -> String {
        match self {
            Self::Local(path) => path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned()),
            Self::Remote(url) => url
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or(url)
                .to_string(),
            Self::Derived { task, sources } => {
                let names: Vec<String> = sources.iter().map(Self::short_name).collect();
                format!("{task}({})", names.join(", "))
            }
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => f.write_str(url),
            Self::Derived { task, sources } => {
                write!(f, "{task}(")?;
                for (i, source) in sources.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{source}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Where relative references are resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseContext {
    /// A local directory.
    Directory(PathBuf),
    /// A remote document's URL.
    Url(Url),
}

impl BaseContext {
    /// Context rooted at the process working directory.
    pub fn current_dir() -> Result<Self, ComposeError> {
        std::env::current_dir().map(Self::Directory).map_err(|e| ComposeError::Io {
            path: ".".to_string(),
            message: e.to_string(),
        })
    }
}

/// Resolves `reference` against `base` into a canonical [`ResourceId`].
///
/// Identification is purely lexical; it never touches the filesystem or the
/// network, so it is deterministic and cheap.
pub fn identify(reference: &str, base: &BaseContext) -> Result<ResourceId, ComposeError> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(invalid(reference, "reference is empty"));
    }

    // Single-letter schemes are Windows drive letters, not URLs.
    if let Ok(url) = Url::parse(reference)
        && url.scheme().len() > 1
    {
        return identify_url(reference, url);
    }

    match base {
        BaseContext::Url(base_url) => {
            let joined = base_url.join(reference).map_err(|e| {
                invalid(reference, &format!("cannot resolve against {base_url}: {e}"))
            })?;
            identify_url(reference, joined)
        }
        BaseContext::Directory(dir) => {
            let path = Path::new(reference);
            let absolute = if path.is_absolute() {
                path.to_path_buf()
            } else {
                dir.join(path)
            };
            Ok(ResourceId::Local(normalize_path(&absolute)))
        }
    }
}

fn identify_url(reference: &str, url: Url) -> Result<ResourceId, ComposeError> {
    match url.scheme() {
        "http" | "https" => Ok(ResourceId::Remote(normalize_url(url).to_string())),
        "file" => url
            .to_file_path()
            .map(|p| ResourceId::Local(normalize_path(&p)))
            .map_err(|()| invalid(reference, "file URL does not name a local path")),
        other => Err(invalid(reference, &format!("unsupported scheme '{other}'"))),
    }
}

fn invalid(reference: &str, reason: &str) -> ComposeError {
    ComposeError::InvalidReference {
        reference: reference.to_string(),
        reason: reason.to_string(),
    }
}

/// Lexically normalizes a path: drops `.` segments and folds `..` into the
/// preceding segment. `..` above the root is discarded.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Normalizes a parsed http(s) URL.
///
/// The URL parser already lowercases scheme and host, removes default ports,
/// resolves dot segments and turns an empty path into `/`. On top of that the
/// fragment is dropped and query parameters are sorted.
fn normalize_url(mut url: Url) -> Url {
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url
}
