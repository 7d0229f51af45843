//! Tag pattern construction.
//!
//! The opening of a tag is recognized by a pattern built for a fixed set of
//! tag names. It has four capture groups:
//!
//! 1. an extra `[` for escaping tags with double brackets: `[[tag]]`
//! 2. the tag name
//! 3. the attribute text, up to the first `]`; it never starts with a word
//!    character or hyphen, so `[tag2]` is not a `tag`
//! 4. the self-closing `/` right before `]`
//!
//! The enclosed content and the escaping `]` that may follow are found by the
//! scanner in [`crate::tag`]. Patterns are compiled with `regex`, so a scan
//! takes time linear in the text no matter how the brackets are nested.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;

/// Candidate tag names: anything after a `[` up to a character that can't
/// appear in a name.
static TAG_NAME_CANDIDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^<>&/\[\]\x00-\x20=]+)").expect("candidate pattern is valid")
});

const OPENING_TAG: &str = concat!(
    r"\[",
    r"(\[?)",
    r"({names})",
    r"((?:[^\]\w-][^\]]*?)??)",
    r"(?:(/)\]|\])",
);

/// Alternation of escaped names, longest first so that a name is never
/// shadowed by one of its prefixes.
fn alternation<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut names: Vec<&str> = names.into_iter().collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    names
        .into_iter()
        .map(|name| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|")
}

/// Returns the source of the opening-tag pattern for `names`.
pub fn opening_pattern_source<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    OPENING_TAG.replace("{names}", &alternation(names))
}

/// Compiled opening-tag patterns for one set of tag names.
#[derive(Debug)]
pub struct TagPattern {
    names: BTreeSet<String>,
    opening: Regex,
    anchored: Regex,
}

impl TagPattern {
    /// Compiles the patterns for `names`.
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let names: BTreeSet<String> = names.into_iter().map(str::to_string).collect();
        let source = opening_pattern_source(names.iter().map(String::as_str));
        let opening = Regex::new(&source)?;
        let anchored = Regex::new(&format!("^{}", source))?;
        Ok(Self {
            names,
            opening,
            anchored,
        })
    }

    /// The tag names this pattern recognizes.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Pattern finding the leftmost opening tag.
    pub(crate) fn opening(&self) -> &Regex {
        &self.opening
    }

    /// Pattern matching an opening tag only at the start of the haystack.
    pub(crate) fn anchored(&self) -> &Regex {
        &self.anchored
    }
}

/// Returns the names that appear right after a `[` in `text`.
///
/// This is a cheap superset check used to skip building a pattern when no
/// registered tag can possibly match.
pub fn candidate_names(text: &str) -> BTreeSet<&str> {
    TAG_NAME_CANDIDATE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect()
}

type PatternMap = HashMap<Vec<String>, Arc<TagPattern>>;

/// Compiled patterns keyed by their sorted tag-name set.
#[derive(Debug, Default)]
pub struct PatternCache {
    enabled: bool,
    patterns: Mutex<PatternMap>,
}

impl PatternCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            patterns: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the pattern for `names`, compiling it if needed.
    pub fn get(&self, names: &BTreeSet<&str>) -> Result<Arc<TagPattern>> {
        if !self.enabled {
            return TagPattern::new(names.iter().copied()).map(Arc::new);
        }

        let key: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        if let Some(pattern) = self.lock().get(&key) {
            return Ok(Arc::clone(pattern));
        }
        let pattern = Arc::new(TagPattern::new(names.iter().copied())?);
        self.lock().insert(key, Arc::clone(&pattern));
        Ok(pattern)
    }

    /// Drops every compiled pattern.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, PatternMap> {
        // A poisoned cache only ever holds fully built patterns.
        self.patterns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
