//! Post-processing of the assembled bundle
//!
//! Stages run in a fixed order: minify, rename, ascii. Each stage is skipped
//! unless its toggle is on and the `internal` tool is selected.

pub mod ascii;
pub mod rename;

use log::info;
use once_cell::sync::Lazy;
use rand::{Rng, rngs::ThreadRng};
use regex::Regex;

use self::rename::IdentifierGenerator;
use crate::{
    config::ObfuscationConfig,
    error::BundleResult,
    lua_format::{BuiltinFormatter, FormatOptions, LuaFormatter},
};

static BANNER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^--\[\[[\s\S]*?\]\]\s*").expect("banner pattern should be a valid regex")
});

/// Remove the leading block comment a formatter put on top of its output
pub fn strip_banner(text: &str) -> &str {
    BANNER_PATTERN
        .find(text)
        .map_or(text, |banner| &text[banner.end()..])
}

#[derive(Debug)]
pub struct ObfuscationPipeline<F = BuiltinFormatter, R = ThreadRng> {
    settings: ObfuscationConfig,
    formatter: F,
    rng: R,
}

impl ObfuscationPipeline {
    pub fn new(settings: ObfuscationConfig) -> Self {
        Self::with_parts(settings, BuiltinFormatter::new(), rand::rng())
    }
}

impl<F: LuaFormatter, R: Rng> ObfuscationPipeline<F, R> {
    pub fn with_parts(settings: ObfuscationConfig, formatter: F, rng: R) -> Self {
        Self {
            settings,
            formatter,
            rng,
        }
    }

    /// Whether `run` would change its input at all
    pub fn is_active(&self) -> bool {
        self.settings.minify_enabled()
            || self.settings.rename_enabled()
            || self.settings.ascii_enabled()
    }

    /// Apply the enabled stages to `text`
    ///
    /// `chunk_name` labels the chunk for the ascii loader, normally the output
    /// file's stem.
    pub fn run(self, mut text: String, chunk_name: &str) -> BundleResult<String> {
        let Self {
            settings,
            formatter,
            rng,
        } = self;
        let rename = settings.rename_enabled();
        let options = FormatOptions {
            rename_variables: rename,
            rename_globals: rename,
        };

        if settings.minify_enabled() {
            info!("Minifying bundle");
            text = formatter.minify(&text, options)?;
        } else if rename {
            let beautified = formatter.beautify(&text, options)?;
            text = strip_banner(&beautified).to_owned();
        }

        if rename {
            info!(
                "Renaming identifiers (length {}..={})",
                settings.rename.min, settings.rename.max
            );
            let mut generator =
                IdentifierGenerator::new(rng, settings.rename.min, settings.rename.max);
            text = rename::replace_tags(&text, &mut generator)?.into_owned();
        }

        if settings.ascii_enabled() {
            info!("Encoding bundle as byte codes");
            text = ascii::encode(&text, chunk_name);
        }

        Ok(text)
    }
}
