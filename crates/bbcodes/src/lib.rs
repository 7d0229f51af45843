//! Bracket-tag shortcodes for content rendering.
//!
//! Content authors write `[tag attr="value"]content[/tag]` or `[tag /]` in
//! their text; host code registers a handler per tag name and the engine
//! replaces every occurrence with the handler's output.
//!
//! # Example
//!
//! ```rust
//! use bbcodes::{merge_defaults, Attributes, Engine};
//!
//! let mut engine = Engine::new();
//! engine.register("video", |attrs: &Attributes, _: Option<&str>, _: &str| {
//!     let attrs = merge_defaults([("src", ""), ("width", "640")], attrs);
//!     format!(r#"<video src="{}" width="{}"></video>"#, attrs["src"], attrs["width"])
//! });
//!
//! let html = engine.process(r#"Watch: [video src="a.mp4"]"#).unwrap();
//! assert_eq!(html, r#"Watch: <video src="a.mp4" width="640"></video>"#);
//!
//! // Double brackets keep the tag literal.
//! assert_eq!(engine.process("[[video]]").unwrap(), "[video]");
//! ```
//!
//! # Tag Syntax
//!
//! - Enclosing: `[name attrs]content[/name]`
//! - Self-closing: `[name attrs /]`
//! - Unclosed: `[name attrs]` with no `[/name]` later in the text
//! - Escaped: `[[name]]` or `[[name]content[/name]]`, rendered without the
//!   outer brackets and without calling the handler
//!
//! Only registered names are recognized; anything else is left as written.
//! See [`parse_attributes`] for the attribute syntax and [`Registry`] for
//! valid tag names.
//!
//! # Modules
//!
//! - [`Registry`] and [`Handler`]: tag names mapped to handlers
//! - [`TagPattern`] and [`TagScanner`]: finding tag occurrences
//! - [`Engine`]: expansion, detection, stripping and paragraph unwrapping
//! - [`EngineConfig`]: failure policy, timeouts and caching, loadable from YAML

mod attributes;
mod config;
mod engine;
mod error;
mod invoke;
mod pattern;
mod registry;
mod tag;

pub use attributes::{
    merge_defaults, parse_attributes, unescape_c_slashes, AttributeKey, AttributeMap, Attributes,
};
pub use config::{EngineConfig, FailurePolicy};
pub use engine::Engine;
pub use error::{ConfigError, EngineError, HandlerError, Result};
pub use pattern::{candidate_names, opening_pattern_source, PatternCache, TagPattern};
pub use registry::{is_valid_tag_name, Handler, Registry};
pub use tag::{TagMatch, TagMatches, TagScanner};
