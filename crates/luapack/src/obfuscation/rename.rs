//! Random replacement names for formatter tags
//!
//! The formatter marks every renamed identifier with a `L_<n>_<name>` or
//! `G_<n>_<name>` tag. Each distinct tag is replaced, everywhere it occurs as
//! a name token, by a fresh random identifier. String and comment contents
//! that happen to look like tags are left alone.

use std::borrow::Cow;

use log::debug;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    error::{BundleError, BundleResult},
    lua_format::lexer,
};

/// Attempts per identifier before giving up
pub const MAX_ATTEMPTS: usize = 10_000;

const FIRST_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_";
const REST_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_";

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[LG]_\d+_\w*").expect("tag pattern should be a valid regex")
});

/// Whether `text` contains anything shaped like a formatter tag
pub fn has_tags(text: &str) -> bool {
    TAG_PATTERN.is_match(text)
}

/// A whole identifier in tag shape
fn is_tag(name: &str) -> bool {
    TAG_PATTERN
        .find(name)
        .is_some_and(|found| found.start() == 0 && found.end() == name.len())
}

/// Draws unique random identifiers with a length in `[min, max]`
#[derive(Debug)]
pub struct IdentifierGenerator<R> {
    rng: R,
    min: usize,
    max: usize,
    used: FxHashSet<String>,
}

impl<R: Rng> IdentifierGenerator<R> {
    pub fn new(rng: R, min: usize, max: usize) -> Self {
        let min = min.max(1);
        Self {
            rng,
            min,
            max: max.max(min),
            used: FxHashSet::default(),
        }
    }

    /// Names the generator must never produce, e.g. identifiers already in
    /// the text being rewritten
    pub fn reserve<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        self.used.extend(names.into_iter().map(str::to_owned));
    }

    pub fn generate(&mut self) -> BundleResult<String> {
        for _ in 0..MAX_ATTEMPTS {
            let candidate = self.candidate();
            if lexer::is_keyword(&candidate)
                || TAG_PATTERN.is_match(&candidate)
                || self.used.contains(&candidate)
            {
                continue;
            }
            self.used.insert(candidate.clone());
            return Ok(candidate);
        }
        Err(BundleError::GenerationExhausted {
            attempts: MAX_ATTEMPTS,
        })
    }

    fn candidate(&mut self) -> String {
        let length = self.rng.random_range(self.min..=self.max);
        let mut name = String::with_capacity(length);
        name.push(char::from(FIRST_CHARS[self.rng.random_range(0..FIRST_CHARS.len())]));
        for _ in 1..length {
            name.push(char::from(REST_CHARS[self.rng.random_range(0..REST_CHARS.len())]));
        }
        name
    }
}

/// Replace every tagged identifier in `text`
///
/// Returns the text unchanged (borrowed) when no name token is a tag, so
/// running this over already renamed output is a no-op.
pub fn replace_tags<'t, R: Rng>(
    text: &'t str,
    generator: &mut IdentifierGenerator<R>,
) -> BundleResult<Cow<'t, str>> {
    if !has_tags(text) {
        return Ok(Cow::Borrowed(text));
    }

    let tokens = lexer::tokenize(text)?;
    let (tags, names): (Vec<&lexer::Token<'_>>, Vec<&lexer::Token<'_>>) = tokens
        .iter()
        .filter(|token| token.is_name())
        .partition(|token| is_tag(token.text));
    if tags.is_empty() {
        return Ok(Cow::Borrowed(text));
    }
    generator.reserve(names.iter().map(|token| token.text));

    let mut assigned: FxHashMap<&str, String> = FxHashMap::default();
    for tag in &tags {
        if !assigned.contains_key(tag.text) {
            assigned.insert(tag.text, generator.generate()?);
        }
    }
    debug!("Renamed {} tagged identifier(s)", assigned.len());

    let mut output = String::with_capacity(text.len());
    let mut copied = 0;
    for tag in &tags {
        output.push_str(&text[copied..tag.offset]);
        output.push_str(&assigned[tag.text]);
        copied = tag.offset + tag.text.len();
    }
    output.push_str(&text[copied..]);
    Ok(Cow::Owned(output))
}
