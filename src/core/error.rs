//! Error handling for the composition engine.
//!
//! Engine operations return [`ComposeError`], a cloneable enum so a single
//! failure can be reported against every root document it affects. Glue code
//! in the CLI uses [`anyhow::Result`] and converts failures for display with
//! [`user_friendly_error`], which attaches a suggestion and details the same
//! way for every command.
//!
//! # Error Categories
//!
//! - **Availability**: [`ComposeError::ResourceUnavailable`] for unreadable or
//!   unreachable content, classified by [`UnavailableKind`]
//! - **Structure**: [`ComposeError::CyclicDependency`] and
//!   [`ComposeError::InvalidReference`]
//! - **Rendering**: [`ComposeError::RequiredResourceFailed`],
//!   [`ComposeError::RendererError`], [`ComposeError::RenderTimeout`]
//! - **Infrastructure**: [`ComposeError::Store`], [`ComposeError::Config`],
//!   [`ComposeError::Io`]

use crate::core::SourcePosition;
use crate::core::resource::ResourceKind;
use crate::identity::ResourceId;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a remote fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RemoteFailure {
    /// The host could not be reached.
    Connection { message: String },
    /// The request did not finish in time.
    Timeout,
    /// The server answered 404.
    NotFound,
    /// The server answered with another non-success status.
    Status { code: u16 },
}

impl RemoteFailure {
    /// A definitive "this resource is gone", as opposed to a transient problem.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection { message } => write!(f, "connection error: {message}"),
            Self::Timeout => f.write_str("request timed out"),
            Self::NotFound => f.write_str("not found (404)"),
            Self::Status { code } => write!(f, "HTTP status {code}"),
        }
    }
}

/// Classification of an unavailable resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "kebab-case")]
pub enum UnavailableKind {
    /// A local file could not be read.
    Local { reason: String },
    /// A remote fetch failed.
    Remote { failure: RemoteFailure },
}

impl UnavailableKind {
    #[must_use]
    pub fn local(reason: impl Into<String>) -> Self {
        Self::Local {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn remote(failure: RemoteFailure) -> Self {
        Self::Remote { failure }
    }

    /// The remote failure, if this is a remote classification.
    #[must_use]
    pub const fn remote_failure(&self) -> Option<&RemoteFailure> {
        match self {
            Self::Remote { failure } => Some(failure),
            Self::Local { .. } => None,
        }
    }
}

impl fmt::Display for UnavailableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { reason } => write!(f, "local: {reason}"),
            Self::Remote { failure } => write!(f, "remote: {failure}"),
        }
    }
}

/// Where a directive sits: the document containing it and its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveOrigin {
    pub document: ResourceId,
    pub position: SourcePosition,
}

impl fmt::Display for DirectiveOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.document, self.position)
    }
}

/// Errors produced by the composition engine.
#[derive(Error, Debug, Clone)]
pub enum ComposeError {
    /// A resource's content could not be obtained.
    #[error("Resource '{id}' is unavailable ({kind})")]
    ResourceUnavailable { id: ResourceId, kind: UnavailableKind },

    /// Following directives from `root` leads back to a document on the path.
    #[error("Circular dependency detected from '{root}': {}", format_cycle(.cycle))]
    CyclicDependency { root: ResourceId, cycle: Vec<ResourceId> },

    /// A resource referenced with `!` failed, so `root` cannot be produced.
    #[error("Required resource '{id}' failed while composing '{root}'{}: {reason}", format_origin(.origin))]
    RequiredResourceFailed {
        id: ResourceId,
        root: ResourceId,
        origin: Option<DirectiveOrigin>,
        reason: String,
    },

    /// A renderer reported a failure.
    #[error("Renderer for {kind} resource '{id}' failed: {message}")]
    RendererError { id: ResourceId, kind: ResourceKind, message: String },

    /// A renderer did not finish within the configured timeout.
    #[error("Rendering '{id}' timed out after {timeout_ms}ms")]
    RenderTimeout { id: ResourceId, timeout_ms: u64 },

    /// A directive target could not be turned into a resource identifier.
    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// The rendering was abandoned because its root was already failed.
    #[error("Rendering '{id}' was cancelled")]
    Cancelled { id: ResourceId },

    /// The graph store could not be read or written.
    #[error("Graph store {operation} failed: {reason}")]
    Store { operation: String, reason: String },

    /// Configuration could not be loaded.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A filesystem operation outside resource fetching failed.
    #[error("I/O error on '{path}': {message}")]
    Io { path: String, message: String },
}

impl ComposeError {
    /// Builds a store error from any displayable cause.
    pub fn store(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// The resource this error is about, if any.
    #[must_use]
    pub const fn resource(&self) -> Option<&ResourceId> {
        match self {
            Self::ResourceUnavailable { id, .. }
            | Self::RequiredResourceFailed { id, .. }
            | Self::RendererError { id, .. }
            | Self::RenderTimeout { id, .. }
            | Self::Cancelled { id } => Some(id),
            Self::CyclicDependency { root, .. } => Some(root),
            _ => None,
        }
    }
}

fn format_cycle(cycle: &[ResourceId]) -> String {
    cycle.iter().map(ToString::to_string).collect::<Vec<_>>().join(" → ")
}

fn format_origin(origin: &Option<DirectiveOrigin>) -> String {
    origin.as_ref().map(|o| format!(" (referenced at {o})")).unwrap_or_default()
}

/// A [`ComposeError`] with optional user-facing suggestion and details.
#[derive(Debug)]
pub struct ErrorContext {
    pub error: anyhow::Error,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl ErrorContext {
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            suggestion: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Prints the error to stderr with colored labels.
    pub fn display(&self) {
        eprintln!("{}: {:#}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

/// Converts an error into an [`ErrorContext`] with a suggestion when the
/// cause is recognized.
///
/// The error chain is walked so a [`ComposeError`] wrapped in `anyhow`
/// context is still recognized.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let compose = error.chain().find_map(|e| e.downcast_ref::<ComposeError>()).cloned();

    let Some(compose) = compose else {
        if let Some(io_error) = error.chain().find_map(|e| e.downcast_ref::<std::io::Error>())
            && io_error.kind() == std::io::ErrorKind::PermissionDenied
        {
            return ErrorContext::new(error)
                .with_suggestion("Check file ownership and permissions");
        }
        return ErrorContext::new(error);
    };

    let ctx = ErrorContext::new(error);
    match compose {
        ComposeError::ResourceUnavailable { kind: UnavailableKind::Local { .. }, .. } => ctx
            .with_suggestion("Check that the referenced file exists and the path is correct")
            .with_details(
                "Relative references resolve against the directory of the referring document",
            ),
        ComposeError::ResourceUnavailable { kind: UnavailableKind::Remote { .. }, .. } => ctx
            .with_suggestion("Check your network connection and that the URL is reachable"),
        ComposeError::CyclicDependency { .. } => ctx
            .with_suggestion("Remove one of the directives on the cycle")
            .with_details(
                "A document cannot transclude itself, directly or through other documents",
            ),
        ComposeError::RequiredResourceFailed { .. } => ctx.with_suggestion(
            "Fix the referenced resource, or mark the directive optional with a trailing '?'",
        ),
        ComposeError::RendererError { .. } => {
            ctx.with_suggestion("Run with --verbose to see renderer diagnostics")
        }
        ComposeError::RenderTimeout { .. } => ctx.with_suggestion(
            "Increase render_timeout_secs in mdweave.toml or pass --timeout",
        ),
        ComposeError::InvalidReference { .. } => {
            ctx.with_suggestion("Use a relative path, an absolute path, or an http(s) URL")
        }
        ComposeError::Store { .. } => ctx
            .with_suggestion("Run 'mdweave cache clean' to discard the persisted graph")
            .with_details("The graph store is rebuilt from scratch on the next render"),
        ComposeError::Config { .. } => {
            ctx.with_suggestion("Check the syntax of mdweave.toml and MDWEAVE_* variables")
        }
        ComposeError::Cancelled { .. } | ComposeError::Io { .. } => ctx,
    }
}
