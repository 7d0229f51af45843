//! The tag expansion engine.
//!
//! An [`Engine`] owns a [`Registry`] and expands the registered tags found
//! in a text. It is built once, before any text is processed; after that it
//! is only read, so it can be shared between threads behind an `Arc`.
//!
//! # Example
//!
//! ```rust
//! use bbcodes::{Attributes, Engine};
//!
//! let mut engine = Engine::new();
//! engine.register("b", |_: &Attributes, content: Option<&str>, _: &str| {
//!     format!("<strong>{}</strong>", content.unwrap_or_default())
//! });
//!
//! assert_eq!(engine.process("[b]hi[/b]").unwrap(), "<strong>hi</strong>");
//! assert_eq!(engine.process("[[b]]").unwrap(), "[b]");
//! assert_eq!(engine.strip_tags("a [b]hi[/b] c").unwrap(), "a  c");
//! assert!(engine.contains_tag("x [b]y[/b]", "b").unwrap());
//! ```

use std::borrow::Cow;
use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace, warn};

use crate::attributes::{parse_attributes, Attributes};
use crate::config::{EngineConfig, FailurePolicy};
use crate::error::{EngineError, HandlerError, Result};
use crate::invoke::invoke;
use crate::pattern::{candidate_names, PatternCache, TagPattern};
use crate::registry::{Handler, Registry};
use crate::tag::{TagMatch, TagScanner};

static PARAGRAPH_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<p>\s*").expect("paragraph pattern is valid"));

static PARAGRAPH_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*</p>").expect("paragraph pattern is valid"));

/// Expands bracket tags using the handlers of its registry.
#[derive(Debug)]
pub struct Engine {
    registry: Registry,
    config: EngineConfig,
    patterns: PatternCache,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine with an empty registry and default configuration.
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    /// Creates an engine around an existing registry.
    pub fn with_registry(registry: Registry) -> Self {
        let config = EngineConfig::default();
        Self {
            patterns: PatternCache::new(config.cache_patterns),
            registry,
            config,
        }
    }

    /// Replaces the configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.patterns = PatternCache::new(config.cache_patterns);
        self.config = config;
        self
    }

    pub fn settings(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Registers a handler; see [`Registry::register`].
    pub fn register<H>(&mut self, name: &str, handler: H) -> bool
    where
        H: Handler + 'static,
    {
        self.registry.register(name, handler)
    }

    /// Registers a fallible handler; see [`Registry::register_fallible`].
    pub fn register_fallible<F>(&mut self, name: &str, handler: F) -> bool
    where
        F: Fn(&Attributes, Option<&str>, &str) -> std::result::Result<String, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.registry.register_fallible(name, handler)
    }

    pub fn unregister(&mut self, name: &str) {
        self.registry.unregister(name);
    }

    pub fn clear(&mut self) {
        self.registry.clear();
    }

    pub fn exists(&self, name: &str) -> bool {
        self.registry.exists(name)
    }

    /// Expands every registered tag in `text`.
    ///
    /// Each occurrence is replaced by its handler's output, wrapped in any
    /// unbalanced escape bracket. `[[tag]]` becomes the literal `[tag]`
    /// without calling the handler. Handler output is not scanned again.
    ///
    /// Text without a registered tag is returned unchanged.
    ///
    /// # Errors
    ///
    /// Fails if the tag pattern can't be compiled, or if a handler fails
    /// while the failure policy is [`FailurePolicy::Propagate`].
    pub fn process(&self, text: &str) -> Result<String> {
        let Some(pattern) = self.pattern_for(text)? else {
            return Ok(text.to_string());
        };
        debug!(tags = ?pattern.names().collect::<Vec<_>>(), "expanding tags");

        replace_tags(text, &pattern, |tag| {
            if tag.is_escaped() {
                return Ok(Cow::Borrowed(tag.unescaped()));
            }
            let Some(handler) = self.registry.get(tag.name) else {
                return Ok(Cow::Borrowed(tag.text));
            };
            let attrs = parse_attributes(tag.attrs);
            match invoke(handler, attrs, tag.content, tag.name, self.config.timeout()) {
                Ok(output) => {
                    trace!(tag = tag.name, "expanded tag");
                    Ok(Cow::Owned(format!("{}{}{}", tag.prefix(), output, tag.suffix())))
                }
                Err(err) => self.on_failure(tag, err),
            }
        })
    }

    fn on_failure<'t>(&self, tag: &TagMatch<'t>, err: EngineError) -> Result<Cow<'t, str>> {
        match self.config.on_handler_error {
            FailurePolicy::Propagate => Err(err),
            FailurePolicy::Original => {
                warn!(tag = tag.name, error = %err, "handler failed, keeping tag text");
                Ok(Cow::Borrowed(tag.text))
            }
            FailurePolicy::Placeholder => {
                warn!(tag = tag.name, error = %err, "handler failed, using placeholder");
                Ok(Cow::Owned(format!(
                    "{}{}{}",
                    tag.prefix(),
                    self.config.placeholder,
                    tag.suffix()
                )))
            }
        }
    }

    /// Returns true if `tag` occurs in `text`, including inside the content
    /// of other tags at any depth.
    ///
    /// Always false for a tag that is not registered.
    pub fn contains_tag(&self, text: &str, tag: &str) -> Result<bool> {
        if !text.contains('[') || !self.registry.exists(tag) {
            return Ok(false);
        }
        let names: BTreeSet<&str> = self.registry.names().collect();
        let pattern = self.patterns.get(&names)?;
        Ok(TagScanner::new(&pattern).has_opening(text, tag))
    }

    /// Removes every registered tag, with its content, from `text`.
    ///
    /// Handlers are never called. `[[tag]]` still becomes `[tag]`.
    pub fn strip_tags(&self, text: &str) -> Result<String> {
        let Some(pattern) = self.pattern_for(text)? else {
            return Ok(text.to_string());
        };
        replace_tags(text, &pattern, |tag| {
            if tag.is_escaped() {
                Ok(Cow::Borrowed(tag.unescaped()))
            } else {
                Ok(Cow::Owned(format!("{}{}", tag.prefix(), tag.suffix())))
            }
        })
    }

    /// Removes the `<p>...</p>` an auto-formatter wrapped around a tag that
    /// stands alone in its paragraph.
    ///
    /// Only whitespace may sit between the paragraph delimiters and the tag.
    pub fn unwrap_paragraphs(&self, text: &str) -> Result<String> {
        let Some(pattern) = self.pattern_for(text)? else {
            return Ok(text.to_string());
        };
        let scanner = TagScanner::new(&pattern);

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut pos = 0;
        while let Some(open) = PARAGRAPH_OPEN.find_at(text, pos) {
            pos = open.end();
            let Some(tag) = scanner.match_at(text, open.end()) else {
                continue;
            };
            // A tag that only fits when its content is left out still counts.
            let opening_end = tag.range.start + tag.opening.len();
            let kept = paragraph_close(text, tag.range.end)
                .map(|end| (tag.range.end, end))
                .or_else(|| {
                    (opening_end < tag.range.end)
                        .then(|| paragraph_close(text, opening_end))
                        .flatten()
                        .map(|end| (opening_end, end))
                });
            if let Some((tag_end, end)) = kept {
                out.push_str(&text[last..open.start()]);
                out.push_str(&text[tag.range.start..tag_end]);
                last = end;
                pos = end;
            }
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Unwraps paragraph-wrapped tags (if enabled) and expands all tags.
    ///
    /// This is the call made once per rendered page.
    pub fn render_page(&self, text: &str) -> Result<String> {
        if self.config.unwrap_paragraphs {
            let unwrapped = self.unwrap_paragraphs(text)?;
            self.process(&unwrapped)
        } else {
            self.process(text)
        }
    }

    /// Returns the pattern for the registered names found in `text`, or
    /// `None` if there are none.
    fn pattern_for(&self, text: &str) -> Result<Option<std::sync::Arc<TagPattern>>> {
        if !text.contains('[') || self.registry.is_empty() {
            return Ok(None);
        }
        let names: BTreeSet<&str> = candidate_names(text)
            .into_iter()
            .filter(|name| self.registry.exists(name))
            .collect();
        if names.is_empty() {
            return Ok(None);
        }
        self.patterns.get(&names).map(Some)
    }
}

/// Replaces each tag occurrence by the output of `replace`, left to right.
fn replace_tags<'t, F>(text: &'t str, pattern: &TagPattern, mut replace: F) -> Result<String>
where
    F: FnMut(&TagMatch<'t>) -> Result<Cow<'t, str>>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for tag in TagScanner::new(pattern).find_iter(text) {
        out.push_str(&text[last..tag.range.start]);
        out.push_str(&replace(&tag)?);
        last = tag.range.end;
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Returns the end of `\s*</p>` starting at `at`.
fn paragraph_close(text: &str, at: usize) -> Option<usize> {
    PARAGRAPH_CLOSE.find(&text[at..]).map(|m| at + m.end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn strong(_: &Attributes, content: Option<&str>, _: &str) -> String {
        format!("<strong>{}</strong>", content.unwrap_or_default())
    }

    fn engine() -> Engine {
        let mut engine = Engine::new();
        engine.register("b", strong);
        engine.register("img", |attrs: &Attributes, content: Option<&str>, _: &str| {
            format!(
                "<img src=\"{}\" closed={}>",
                attrs.get("src").unwrap_or_default(),
                content.is_none()
            )
        });
        engine.register("box", |_: &Attributes, content: Option<&str>, _: &str| {
            format!("<div>{}</div>", content.unwrap_or_default())
        });
        engine
    }

    fn failing(policy: FailurePolicy) -> Engine {
        let mut engine = Engine::new().config(EngineConfig::new().on_handler_error(policy));
        engine.register_fallible("bad", |_: &Attributes, _: Option<&str>, _: &str| {
            Err(HandlerError::new("boom"))
        });
        engine.register("b", strong);
        engine
    }

    mod process {
        use super::*;

        #[test]
        fn text_without_brackets_is_unchanged() {
            assert_eq!(engine().process("plain text").unwrap(), "plain text");
        }

        #[test]
        fn empty_registry_returns_input() {
            assert_eq!(Engine::new().process("[b]x[/b]").unwrap(), "[b]x[/b]");
        }

        #[test]
        fn enclosing_tag() {
            assert_eq!(
                engine().process("a [b]bold[/b] c").unwrap(),
                "a <strong>bold</strong> c"
            );
        }

        #[test]
        fn self_closing_tag_has_no_content() {
            assert_eq!(
                engine().process(r#"[img src="a.png" /]"#).unwrap(),
                r#"<img src="a.png" closed=true>"#
            );
        }

        #[test]
        fn unclosed_tag_has_no_content() {
            assert_eq!(
                engine().process("[img src=x.png] after").unwrap(),
                r#"<img src="x.png" closed=true> after"#
            );
        }

        #[test]
        fn empty_content_is_some() {
            let mut engine = Engine::new();
            engine.register("e", |_: &Attributes, content: Option<&str>, _: &str| {
                format!("{:?}", content)
            });
            assert_eq!(engine.process("[e][/e]").unwrap(), r#"Some("")"#);
        }

        #[test]
        fn nested_same_name_is_balanced() {
            assert_eq!(
                engine().process("[box][box]inner[/box]outer[/box]").unwrap(),
                "<div>[box]inner[/box]outer</div>"
            );
        }

        #[test]
        fn output_is_not_rescanned() {
            let mut engine = engine();
            engine.register("echo", |_: &Attributes, _: Option<&str>, _: &str| {
                "[b]x[/b]".to_string()
            });
            assert_eq!(engine.process("[echo]").unwrap(), "[b]x[/b]");
        }

        #[test]
        fn unregistered_tags_pass_through() {
            assert_eq!(
                engine().process("[u]x[/u] [b]y[/b]").unwrap(),
                "[u]x[/u] <strong>y</strong>"
            );
        }

        #[test]
        fn double_brackets_escape() {
            assert_eq!(engine().process("[[b]]").unwrap(), "[b]");
            assert_eq!(engine().process("[[b]x[/b]]").unwrap(), "[b]x[/b]");
        }

        #[test]
        fn unbalanced_brackets_wrap_output() {
            assert_eq!(engine().process("[[b]x[/b]").unwrap(), "[<strong>x</strong>");
            assert_eq!(engine().process("[b]x[/b]]").unwrap(), "<strong>x</strong>]");
        }

        #[test]
        fn tag_name_passed_to_handler() {
            let mut engine = Engine::new();
            engine.register("h1", |_: &Attributes, _: Option<&str>, tag: &str| tag.to_string());
            engine.register("h2", |_: &Attributes, _: Option<&str>, tag: &str| tag.to_string());
            assert_eq!(engine.process("[h1] [h2]").unwrap(), "h1 h2");
        }

        #[test]
        fn attributes_are_parsed() {
            let mut engine = Engine::new();
            engine.register("link", |attrs: &Attributes, content: Option<&str>, _: &str| {
                format!(
                    "<a href=\"{}\" title=\"{}\">{}</a>",
                    attrs.get("href").unwrap_or_default(),
                    attrs.get("title").unwrap_or_default(),
                    content.unwrap_or_default()
                )
            });
            assert_eq!(
                engine
                    .process(r#"[link href="http://a/b" title='Hi']go[/link]"#)
                    .unwrap(),
                r#"<a href="http://a/b" title="Hi">go</a>"#
            );
        }

        #[test]
        fn deeply_nested_same_name() {
            let depth = 50_000;
            let inner = format!("{}x{}", "[box]".repeat(depth - 1), "[/box]".repeat(depth - 1));
            let text = format!("[box]{}[/box]", inner);
            assert_eq!(engine().process(&text).unwrap(), format!("<div>{}</div>", inner));
        }

        #[test]
        fn stray_opening_in_large_page() {
            let page = format!(
                "<p>[b]ok[/b]</p><p>[b see http://x/y {}</p>",
                "word / ".repeat(150_000)
            );
            assert!(page.len() > 1_000_000);
            let out = engine().process(&page).unwrap();
            assert_eq!(out, page.replacen("[b]ok[/b]", "<strong>ok</strong>", 1));
            assert_eq!(engine().strip_tags(&page).unwrap(), page.replacen("[b]ok[/b]", "", 1));
        }

        #[test]
        fn long_unterminated_opening() {
            let text = format!("[b {}", "x".repeat(2_000_000));
            assert_eq!(engine().process(&text).unwrap(), text);
        }

        #[test]
        fn works_without_pattern_cache() {
            let engine = engine().config(EngineConfig::new().cache_patterns(false));
            assert_eq!(engine.process("[b]x[/b]").unwrap(), "<strong>x</strong>");
        }
    }

    mod failures {
        use super::*;

        #[test]
        fn original_keeps_tag_text() {
            let engine = failing(FailurePolicy::Original);
            assert_eq!(
                engine.process("[bad]x[/bad] [b]y[/b]").unwrap(),
                "[bad]x[/bad] <strong>y</strong>"
            );
        }

        #[test]
        fn placeholder_replaces_tag() {
            let engine = failing(FailurePolicy::Original)
                .config(EngineConfig::new().placeholder("<!-- error -->"));
            assert_eq!(engine.process("a [bad] b").unwrap(), "a <!-- error --> b");
        }

        #[test]
        fn propagate_returns_error() {
            let engine = failing(FailurePolicy::Propagate);
            let err = engine.process("[b]y[/b] [bad]").unwrap_err();
            assert!(matches!(err, EngineError::Handler { ref tag, .. } if tag == "bad"));
        }

        #[test]
        fn panic_is_isolated() {
            let mut engine = Engine::new();
            engine.register("p", |_: &Attributes, _: Option<&str>, _: &str| -> String {
                panic!("bad input")
            });
            engine.register("b", strong);
            assert_eq!(
                engine.process("[p] [b]x[/b]").unwrap(),
                "[p] <strong>x</strong>"
            );
        }

        #[test]
        fn slow_handler_times_out() {
            let mut engine = Engine::new().config(
                EngineConfig::new()
                    .placeholder("…")
                    .handler_timeout(Duration::from_millis(20)),
            );
            engine.register("slow", |_: &Attributes, _: Option<&str>, _: &str| {
                std::thread::sleep(Duration::from_millis(300));
                "late".to_string()
            });
            assert_eq!(engine.process("[slow]").unwrap(), "…");
        }
    }

    mod contains_tag {
        use super::*;

        #[test]
        fn top_level() {
            assert!(engine().contains_tag("x [b]y[/b]", "b").unwrap());
        }

        #[test]
        fn nested_in_content() {
            let mut engine = engine();
            engine.register("quote", |_: &Attributes, _: Option<&str>, _: &str| String::new());
            assert!(engine
                .contains_tag("[quote]said [b]this[/b][/quote]", "b")
                .unwrap());
            assert!(!engine.contains_tag("[quote]said[/quote]", "b").unwrap());
        }

        #[test]
        fn unregistered_tag_is_never_found() {
            assert!(!engine().contains_tag("[u]x[/u]", "u").unwrap());
        }

        #[test]
        fn no_brackets() {
            assert!(!engine().contains_tag("b", "b").unwrap());
        }

        #[test]
        fn deeply_nested() {
            let mut engine = engine();
            engine.register("quote", |_: &Attributes, _: Option<&str>, _: &str| String::new());
            let depth = 50_000;
            let text = format!("{}[quote]{}", "[box]".repeat(depth), "[/box]".repeat(depth));
            assert!(engine.contains_tag(&text, "quote").unwrap());
            assert!(!engine.contains_tag(&text, "b").unwrap());
        }
    }

    mod strip {
        use super::*;

        #[test]
        fn removes_tags_and_content() {
            assert_eq!(
                engine().strip_tags("a [b]x[/b] [img /] c").unwrap(),
                "a   c"
            );
        }

        #[test]
        fn keeps_escaped_and_unknown_tags() {
            assert_eq!(engine().strip_tags("[[b]] [u]x[/u]").unwrap(), "[b] [u]x[/u]");
        }

        #[test]
        fn never_calls_handlers() {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let mut engine = Engine::new();
            engine.register("c", move |_: &Attributes, _: Option<&str>, _: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
                String::new()
            });
            assert_eq!(engine.strip_tags("1[c]2[/c]3[c/]").unwrap(), "13");
            assert_eq!(calls.load(Ordering::SeqCst), 0);

            assert_eq!(engine.process("1[c]2[/c]3[c/]").unwrap(), "13");
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        }
    }

    mod paragraphs {
        use super::*;

        #[test]
        fn unwraps_lone_tag() {
            assert_eq!(
                engine().unwrap_paragraphs("<p>[box]x[/box]</p>\n<p>text</p>").unwrap(),
                "[box]x[/box]\n<p>text</p>"
            );
        }

        #[test]
        fn allows_surrounding_whitespace() {
            assert_eq!(
                engine().unwrap_paragraphs("<p>\n  [img src=a /]\n</p>").unwrap(),
                "[img src=a /]"
            );
        }

        #[test]
        fn leaves_tag_inside_text() {
            let text = "<p>see [b]this[/b]</p><p>[b]x[/b] here</p>";
            assert_eq!(engine().unwrap_paragraphs(text).unwrap(), text);
        }

        #[test]
        fn leaves_unknown_tags() {
            let text = "<p>[u]x[/u]</p>";
            assert_eq!(engine().unwrap_paragraphs(text).unwrap(), text);
        }

        #[test]
        fn opening_alone_in_paragraph() {
            assert_eq!(
                engine()
                    .unwrap_paragraphs("<p>[box]</p><p>more[/box] text</p>")
                    .unwrap(),
                "[box]<p>more[/box] text</p>"
            );
        }

        #[test]
        fn render_page_unwraps_then_expands() {
            assert_eq!(
                engine().render_page("<p>[b]x[/b]</p>").unwrap(),
                "<strong>x</strong>"
            );
            let engine = engine().config(EngineConfig::new().unwrap_paragraphs(false));
            assert_eq!(
                engine.render_page("<p>[b]x[/b]</p>").unwrap(),
                "<p><strong>x</strong></p>"
            );
        }
    }

    #[test]
    fn registration_delegates_to_registry() {
        let mut engine = engine();
        assert!(engine.exists("b"));
        engine.unregister("b");
        assert!(!engine.exists("b"));
        assert_eq!(engine.process("[b]x[/b]").unwrap(), "[b]x[/b]");
        engine.clear();
        assert!(engine.registry().is_empty());
        assert!(!engine.register("bad name", strong));
    }

    #[test]
    fn settings_and_registry_access() {
        let mut engine = Engine::new().config(EngineConfig::new().placeholder("?"));
        assert_eq!(engine.settings().on_handler_error, FailurePolicy::Placeholder);
        assert_eq!(engine.settings().placeholder, "?");

        engine.registry_mut().register("b", strong);
        assert_eq!(engine.registry().len(), 1);
        assert_eq!(engine.process("[b]x[/b]").unwrap(), "<strong>x</strong>");
    }

    #[test]
    fn engine_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }
}
