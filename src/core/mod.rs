//! Core types shared by every engine component.
//!
//! - [`error`] defines [`ComposeError`] and the user-facing [`ErrorContext`]
//! - [`resource`] defines resource kinds, consistency classes and markers

pub mod error;
mod resource;

pub use error::{
    ComposeError, DirectiveOrigin, ErrorContext, RemoteFailure, UnavailableKind,
    user_friendly_error,
};
pub use resource::{
    AiTask, ConsistencyClass, DirectiveKind, RequiredMarker, ResourceKind, SourcePosition,
};
