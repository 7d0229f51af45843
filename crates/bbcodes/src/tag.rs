//! Tag occurrences and the scanner that finds them.
//!
//! [`TagScanner`] walks a text left to right and yields one [`TagMatch`] per
//! non-overlapping tag occurrence. An occurrence is an opening tag (see
//! [`crate::pattern`]), then, unless the tag is self-closing, the content up
//! to its closing `[/name]`, then an optional `]` used for escaping.
//!
//! The closing tag is searched with nesting in mind: each inner opening of
//! the same name must be closed first, so `[box][box]a[/box]b[/box]` is one
//! occurrence with content `[box]a[/box]b`. When the closing tags don't
//! balance, the first `[/name]` closes the tag. With no `[/name]` at all the
//! tag has no content.

use std::ops::Range;

use regex::Captures;

use crate::pattern::TagPattern;

/// One tag occurrence found in a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMatch<'t> {
    /// Byte range of the whole occurrence, escape brackets included.
    pub range: Range<usize>,
    /// Text of the whole occurrence.
    pub text: &'t str,
    /// Text of the opening tag, leading escape bracket included.
    pub opening: &'t str,
    /// The occurrence starts with `[[`.
    pub escape_open: bool,
    pub name: &'t str,
    /// Raw attribute text, between the name and the closing `]` or `/]`.
    pub attrs: &'t str,
    pub self_closing: bool,
    /// Enclosed content; `None` when there is no closing tag.
    pub content: Option<&'t str>,
    /// The occurrence ends with an extra `]`.
    pub escape_close: bool,
}

impl<'t> TagMatch<'t> {
    /// Returns true for `[[tag]]`, which stands for the literal `[tag]`.
    pub fn is_escaped(&self) -> bool {
        self.escape_open && self.escape_close
    }

    /// The leading escape bracket, if any.
    pub fn prefix(&self) -> &'static str {
        if self.escape_open {
            "["
        } else {
            ""
        }
    }

    /// The trailing escape bracket, if any.
    pub fn suffix(&self) -> &'static str {
        if self.escape_close {
            "]"
        } else {
            ""
        }
    }

    /// The occurrence with one bracket removed on each side.
    pub fn unescaped(&self) -> &'t str {
        &self.text[1..self.text.len() - 1]
    }
}

/// Finds tag occurrences for the names of one [`TagPattern`].
#[derive(Debug, Clone, Copy)]
pub struct TagScanner<'p> {
    pattern: &'p TagPattern,
}

impl<'p> TagScanner<'p> {
    pub fn new(pattern: &'p TagPattern) -> Self {
        Self { pattern }
    }

    /// Iterates over the non-overlapping occurrences in `text`.
    pub fn find_iter<'t>(&self, text: &'t str) -> TagMatches<'p, 't> {
        TagMatches {
            scanner: *self,
            text,
            pos: 0,
        }
    }

    /// Returns the first occurrence starting at or after `from`.
    pub fn find_from<'t>(&self, text: &'t str, from: usize) -> Option<TagMatch<'t>> {
        let caps = self.pattern.opening().captures_at(text, from)?;
        Some(self.complete(text, &caps, 0, true))
    }

    /// Returns the occurrence starting exactly at `at`, without the escape
    /// brackets: a leading `[[` never matches and a trailing `]` is left out.
    pub fn match_at<'t>(&self, text: &'t str, at: usize) -> Option<TagMatch<'t>> {
        self.pattern
            .anchored()
            .captures(&text[at..])
            .filter(|caps| caps.get(1).is_some_and(|m| m.as_str().is_empty()))
            .map(|caps| self.complete(text, &caps, at, false))
    }

    /// Returns true if an opening tag named `name` occurs anywhere in
    /// `text`, escaped or not, including inside the content of other tags.
    ///
    /// Only opening tags are looked at, so nesting depth costs nothing.
    pub fn has_opening(&self, text: &str, name: &str) -> bool {
        self.pattern
            .opening()
            .captures_iter(text)
            .any(|caps| caps.get(2).is_some_and(|m| m.as_str() == name))
    }

    /// Extends an opening tag with its content and escape suffix.
    fn complete<'t>(
        &self,
        text: &'t str,
        caps: &Captures<'_>,
        offset: usize,
        allow_suffix: bool,
    ) -> TagMatch<'t> {
        let group = |i: usize| caps.get(i).map(|m| offset + m.start()..offset + m.end());
        let whole = group(0).unwrap_or(offset..offset);
        let name = group(2).map(|r| &text[r]).unwrap_or_default();
        let attrs = group(3).map(|r| &text[r]).unwrap_or_default();
        let escape_open = group(1).is_some_and(|r| !r.is_empty());
        let self_closing = group(4).is_some();

        let mut end = whole.end;
        let mut content = None;
        if !self_closing {
            if let Some((inner, close_end)) = find_closing(text, end, name) {
                content = Some(&text[inner]);
                end = close_end;
            }
        }
        let escape_close = allow_suffix && text[end..].starts_with(']');
        if escape_close {
            end += 1;
        }

        TagMatch {
            range: whole.start..end,
            text: &text[whole.start..end],
            opening: &text[whole.clone()],
            escape_open,
            name,
            attrs,
            self_closing,
            content,
            escape_close,
        }
    }
}

/// Iterator over tag occurrences, see [`TagScanner::find_iter`].
#[derive(Debug)]
pub struct TagMatches<'p, 't> {
    scanner: TagScanner<'p>,
    text: &'t str,
    pos: usize,
}

impl<'t> Iterator for TagMatches<'_, 't> {
    type Item = TagMatch<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.text.len() {
            return None;
        }
        let found = self.scanner.find_from(self.text, self.pos);
        self.pos = found
            .as_ref()
            .map_or(self.text.len(), |tag| tag.range.end);
        found
    }
}

/// Finds the `[/name]` closing a tag whose opening ends at `from`.
///
/// Returns the content range and the end of the closing tag.
fn find_closing(text: &str, from: usize, name: &str) -> Option<(Range<usize>, usize)> {
    let close = format!("[/{}]", name);
    let mut depth = 1usize;
    let mut first_close = None;
    let mut pos = from;

    while let Some(offset) = text[pos..].find('[') {
        let at = pos + offset;
        if text[at..].starts_with(&close) {
            first_close.get_or_insert(at);
            depth -= 1;
            if depth == 0 {
                return Some((from..at, at + close.len()));
            }
            pos = at + close.len();
        } else if let Some(open_end) = nested_opening(text, at, name) {
            depth += 1;
            pos = open_end;
        } else {
            pos = at + 1;
        }
    }

    first_close.map(|at| (from..at, at + close.len()))
}

/// Returns the end of an enclosing (not self-closing, not escaped) opening
/// tag named `name` starting at `at`.
fn nested_opening(text: &str, at: usize, name: &str) -> Option<usize> {
    let rest = text[at + 1..].strip_prefix(name)?;
    if rest.chars().next().is_some_and(is_name_char) {
        return None;
    }
    let close = rest.find(']')?;
    if rest[..close].ends_with('/') {
        return None;
    }
    let end = at + 1 + name.len() + close + 1;
    let escaped = text[..at].ends_with('[') && text[end..].starts_with(']');
    (!escaped).then_some(end)
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}
