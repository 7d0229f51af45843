//! Handler registry.
//!
//! The [`Registry`] maps tag names to [`Handler`]s. It is populated once,
//! before any text is processed, and only read afterwards.
//!
//! # Tag Name Syntax
//!
//! Any non-blank string is a valid tag name as long as it contains none of
//! `<`, `>`, `&`, `/`, `[`, `]`, `=` and no ASCII control or space character
//! (`0x00`-`0x20`). Names are case-sensitive. Registering an invalid name is
//! a silent no-op; [`Registry::register`] reports it through its return value.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::attributes::Attributes;
use crate::error::HandlerError;

/// Renders one tag occurrence.
///
/// `content` is `None` for self-closing tags and tags without a matching
/// closing counterpart, and `Some` (possibly empty) for enclosing tags. The
/// content is passed verbatim; nested tags inside it are not expanded unless
/// the handler does so itself.
///
/// Any closure of the shape `Fn(&Attributes, Option<&str>, &str) -> String`
/// is a handler. Fallible closures are registered with
/// [`Registry::register_fallible`].
pub trait Handler: Send + Sync {
    fn render(
        &self,
        attrs: &Attributes,
        content: Option<&str>,
        tag: &str,
    ) -> Result<String, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Attributes, Option<&str>, &str) -> String + Send + Sync,
{
    fn render(
        &self,
        attrs: &Attributes,
        content: Option<&str>,
        tag: &str,
    ) -> Result<String, HandlerError> {
        Ok(self(attrs, content, tag))
    }
}

/// Adapter for closures that can fail.
struct Fallible<F>(F);

impl<F> Handler for Fallible<F>
where
    F: Fn(&Attributes, Option<&str>, &str) -> Result<String, HandlerError> + Send + Sync,
{
    fn render(
        &self,
        attrs: &Attributes,
        content: Option<&str>,
        tag: &str,
    ) -> Result<String, HandlerError> {
        (self.0)(attrs, content, tag)
    }
}

/// Checks whether `name` may be registered as a tag name.
pub fn is_valid_tag_name(name: &str) -> bool {
    if name.trim().is_empty() {
        return false;
    }
    !name
        .chars()
        .any(|c| matches!(c, '<' | '>' | '&' | '/' | '[' | ']' | '=' | '\x00'..='\x20'))
}

/// Mapping from tag name to handler.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `name`, replacing any previous handler.
    ///
    /// Returns `false` (and stores nothing) if the name is invalid.
    pub fn register<H>(&mut self, name: &str, handler: H) -> bool
    where
        H: Handler + 'static,
    {
        self.insert(name, Arc::new(handler))
    }

    /// Registers a handler that may fail.
    pub fn register_fallible<F>(&mut self, name: &str, handler: F) -> bool
    where
        F: Fn(&Attributes, Option<&str>, &str) -> Result<String, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(name, Arc::new(Fallible(handler)))
    }

    /// Registers an already shared handler.
    pub fn register_shared(&mut self, name: &str, handler: Arc<dyn Handler>) -> bool {
        self.insert(name, handler)
    }

    fn insert(&mut self, name: &str, handler: Arc<dyn Handler>) -> bool {
        if !is_valid_tag_name(name) {
            debug!(tag = name, "rejected invalid tag name");
            return false;
        }
        if self.handlers.insert(name.to_string(), handler).is_some() {
            debug!(tag = name, "replaced handler");
        } else {
            debug!(tag = name, "registered handler");
        }
        true
    }

    /// Removes the handler for `name`, if any.
    pub fn unregister(&mut self, name: &str) {
        if self.handlers.remove(name).is_some() {
            debug!(tag = name, "unregistered handler");
        }
    }

    /// Removes every handler.
    pub fn clear(&mut self) {
        self.handlers = HashMap::new();
    }

    /// Returns true if a handler is registered for `name`.
    pub fn exists(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Returns the handler for `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(name)
    }

    /// Iterates over the registered tag names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Registry").field("tags", &names).finish()
    }
}
