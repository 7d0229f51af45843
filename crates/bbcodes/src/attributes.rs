//! Tag attribute parsing.
//!
//! The raw text between a tag name and its closing `]` is turned into an
//! [`Attributes`] value by [`parse_attributes`]. Tokens are recognized left to
//! right, first match wins at each position:
//!
//! | Form | Example | Result |
//! |------|---------|--------|
//! | double-quoted pair | `title="Hello world"` | named |
//! | single-quoted pair | `title='Hello'` | named |
//! | unquoted pair | `width=300` | named |
//! | double-quoted bare value | `"first value"` | positional |
//! | single-quoted bare value | `'first'` | positional |
//! | bare token | `autoplay` | positional |
//!
//! Names are lower-cased. Values have C-style backslash escapes resolved.
//! A value containing `<` that is not a sequence of complete `<...>` tags is
//! replaced by an empty string.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

static ATTRIBUTE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"([\w-]+)\s*=\s*"([^"]*)"(?:\s|$)"#,
        r#"|([\w-]+)\s*=\s*'([^']*)'(?:\s|$)"#,
        r#"|([\w-]+)\s*=\s*([^\s'"]+)(?:\s|$)"#,
        r#"|"([^"]*)"(?:\s|$)"#,
        r#"|'([^']*)'(?:\s|$)"#,
        r#"|(\S+)(?:\s|$)"#,
    ))
    .expect("attribute pattern is valid")
});

static INVISIBLE_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new("[\u{00a0}\u{200b}]+").expect("space pattern is valid"));

static CLOSED_MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^<]*(?:<[^>]*>[^<]*)*$").expect("markup pattern is valid"));

/// Key of an entry in an [`AttributeMap`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeKey {
    /// A lower-cased `name=` key.
    Name(String),
    /// The position of a bare value among the bare values of the tag.
    Index(usize),
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeKey::Name(name) => f.write_str(name),
            AttributeKey::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Ordered attributes of a tag that has at least one `name=value` pair.
///
/// Bare values found alongside named pairs are kept under integer keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap {
    entries: Vec<(AttributeKey, String)>,
    next_index: usize,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a named value. An existing key keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let key = AttributeKey::Name(name.into());
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Appends a bare value under the next integer key.
    pub fn push(&mut self, value: impl Into<String>) {
        self.entries
            .push((AttributeKey::Index(self.next_index), value.into()));
        self.next_index += 1;
    }

    /// Returns the value of a named attribute.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find_map(|(k, v)| match k {
            AttributeKey::Name(n) if n == name => Some(v.as_str()),
            _ => None,
        })
    }

    /// Returns the bare values in order.
    pub fn positional(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|(k, v)| match k {
            AttributeKey::Index(_) => Some(v.as_str()),
            AttributeKey::Name(_) => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AttributeKey, &str)> {
        self.entries.iter().map(|(k, v)| (k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn values_mut(&mut self) -> impl Iterator<Item = &mut String> {
        self.entries.iter_mut().map(|(_, v)| v)
    }
}

impl Serialize for AttributeMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(&key.to_string(), value)?;
        }
        map.end()
    }
}

/// The parsed attributes of one tag occurrence.
///
/// Exactly one shape is produced per tag, never a mix of variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attributes {
    /// Nothing recognizable: the attribute text with leading whitespace
    /// removed. Empty for tags without attributes.
    Text(String),
    /// Only bare values, e.g. `[video "a.mp4" autoplay]`.
    Positional(Vec<String>),
    /// At least one `name=value` pair.
    Named(AttributeMap),
}

impl Default for Attributes {
    fn default() -> Self {
        Attributes::Text(String::new())
    }
}

impl Attributes {
    /// Returns the value of a named attribute.
    pub fn get(&self, name: &str) -> Option<&str> {
        match self {
            Attributes::Named(map) => map.get(name),
            _ => None,
        }
    }

    /// Returns true if a named attribute is present, even if empty.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns the bare (positional) values in order.
    pub fn positional(&self) -> Vec<&str> {
        match self {
            Attributes::Text(_) => Vec::new(),
            Attributes::Positional(values) => values.iter().map(String::as_str).collect(),
            Attributes::Named(map) => map.positional().collect(),
        }
    }

    /// Returns true if no attribute was given.
    pub fn is_empty(&self) -> bool {
        match self {
            Attributes::Text(text) => text.is_empty(),
            Attributes::Positional(values) => values.is_empty(),
            Attributes::Named(map) => map.is_empty(),
        }
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Attributes::Text(text) => serializer.serialize_str(text),
            Attributes::Positional(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
            Attributes::Named(map) => map.serialize(serializer),
        }
    }
}

/// Parses the raw attribute text of a tag.
///
/// # Example
///
/// ```rust
/// use bbcodes::{parse_attributes, Attributes};
///
/// let attrs = parse_attributes(r#" src="a.png" Width=300 "#);
/// assert_eq!(attrs.get("src"), Some("a.png"));
/// assert_eq!(attrs.get("width"), Some("300"));
///
/// let attrs = parse_attributes(r#" "a.mp4" autoplay"#);
/// assert_eq!(attrs, Attributes::Positional(vec!["a.mp4".into(), "autoplay".into()]));
/// ```
pub fn parse_attributes(text: &str) -> Attributes {
    let text = INVISIBLE_SPACE.replace_all(text, " ");

    let mut named = AttributeMap::new();
    let mut has_names = false;
    let mut matched = false;

    for caps in ATTRIBUTE_PATTERN.captures_iter(&text) {
        matched = true;
        let pair = [(1, 2), (3, 4), (5, 6)]
            .into_iter()
            .find_map(|(n, v)| Some((caps.get(n)?.as_str(), caps.get(v)?.as_str())));
        if let Some((name, value)) = pair {
            has_names = true;
            named.insert(name.to_lowercase(), unescape_c_slashes(value));
            continue;
        }
        if let Some(value) = caps.get(7).or_else(|| caps.get(8)) {
            if !value.as_str().is_empty() {
                named.push(unescape_c_slashes(value.as_str()));
            }
        } else if let Some(value) = caps.get(9) {
            named.push(unescape_c_slashes(value.as_str()));
        }
    }

    if !matched {
        return Attributes::Text(text.trim_start().to_string());
    }

    for value in named.values_mut() {
        reject_unclosed_markup(value);
    }

    if has_names {
        Attributes::Named(named)
    } else {
        Attributes::Positional(named.positional().map(str::to_string).collect())
    }
}

fn reject_unclosed_markup(value: &mut String) {
    if value.contains('<') && !CLOSED_MARKUP.is_match(value) {
        value.clear();
    }
}

/// Resolves C-style backslash escapes.
///
/// `\n`, `\t`, `\r`, `\a`, `\v`, `\b` and `\f` become control characters,
/// `\xHH` and `\NNN` (octal) become bytes, and any other escaped character
/// stands for itself. A trailing lone backslash is kept.
pub fn unescape_c_slashes(value: &str) -> String {
    if !value.contains('\\') {
        return value.to_string();
    }

    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b != b'\\' || i + 1 >= bytes.len() {
            out.push(b);
            i += 1;
            continue;
        }
        i += 1;
        match bytes[i] {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'a' => out.push(0x07),
            b'v' => out.push(0x0b),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'x' if bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit) => {
                let digits = take_digits(&bytes[i + 1..], 2, |c| c.is_ascii_hexdigit());
                out.push(parse_radix(&bytes[i + 1..i + 1 + digits], 16));
                i += digits;
            }
            b'0'..=b'7' => {
                let digits = take_digits(&bytes[i..], 3, |c| (b'0'..=b'7').contains(&c));
                out.push(parse_radix(&bytes[i..i + digits], 8));
                i += digits - 1;
            }
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn take_digits(bytes: &[u8], max: usize, accept: impl Fn(u8) -> bool) -> usize {
    bytes.iter().take(max).take_while(|&&c| accept(c)).count()
}

fn parse_radix(digits: &[u8], radix: u32) -> u8 {
    digits.iter().fold(0u32, |acc, &d| {
        acc * radix + char::from(d).to_digit(radix).unwrap_or(0)
    }) as u8
}

/// Fills in defaults for the attributes a handler supports.
///
/// The result holds exactly the keys of `defaults`. A key the tag sets,
/// even to an empty string, takes the tag's value; all other keys take the
/// default. Attributes not listed in `defaults` are dropped, and positional
/// or unparsed attributes never match a key.
///
/// # Example
///
/// ```rust
/// use bbcodes::{merge_defaults, parse_attributes};
///
/// let attrs = parse_attributes(r#" url="" extra=1"#);
/// let merged = merge_defaults([("url", "https://example.com"), ("css", "badge")], &attrs);
/// assert_eq!(merged["url"], "");
/// assert_eq!(merged["css"], "badge");
/// assert!(!merged.contains_key("extra"));
/// ```
pub fn merge_defaults<'a, I>(defaults: I, attrs: &Attributes) -> HashMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    defaults
        .into_iter()
        .map(|(name, default)| {
            let value = attrs.get(name).unwrap_or(default);
            (name.to_string(), value.to_string())
        })
        .collect()
}
