//! Built-in Lua formatter
//!
//! Two printers over one token stream: `minify` packs tokens as tightly as the
//! Lua lexer allows, `beautify` prints one statement per line with a banner
//! comment on top. Both drop comments. With renaming on, identifiers are
//! replaced by the scope-unique tags produced in [`rename`].

pub mod layout;
pub mod lexer;
mod rename;

use layout::Layout;
use lexer::{Token, TokenKind};
pub use rename::STANDARD_GLOBALS;

use crate::error::BundleResult;

/// Banner `beautify` puts on top of its output
pub const BEAUTIFY_BANNER: &str = "--[[ formatted by luapack ]]\n";

const INDENT: &str = "    ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatOptions {
    /// Replace locals with `L_<n>_<name>` tags
    pub rename_variables: bool,
    /// Replace globals the chunk assigns with `G_<n>_<name>` tags
    pub rename_globals: bool,
}

/// A source-to-source Lua formatter
///
/// Implementations must preserve program semantics; the obfuscation pipeline
/// only relies on the tag shapes described on [`FormatOptions`].
pub trait LuaFormatter {
    fn minify(&self, source: &str, options: FormatOptions) -> BundleResult<String>;

    fn beautify(&self, source: &str, options: FormatOptions) -> BundleResult<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinFormatter;

impl BuiltinFormatter {
    pub fn new() -> Self {
        Self
    }
}

struct Prepared<'a> {
    tokens: Vec<Token<'a>>,
    layout: Layout,
    replacements: Vec<Option<String>>,
}

impl<'a> Prepared<'a> {
    fn new(source: &'a str, options: FormatOptions) -> BundleResult<Self> {
        let tokens: Vec<_> = lexer::tokenize(source)?
            .into_iter()
            .filter(|token| token.kind != TokenKind::Comment)
            .collect();
        let layout = layout::analyze(&tokens);
        let replacements = rename::plan(&tokens, &layout, options)?;
        Ok(Self {
            tokens,
            layout,
            replacements,
        })
    }

    fn text(&self, index: usize) -> &str {
        self.replacements[index]
            .as_deref()
            .unwrap_or(self.tokens[index].text)
    }
}

impl LuaFormatter for BuiltinFormatter {
    fn minify(&self, source: &str, options: FormatOptions) -> BundleResult<String> {
        let prepared = Prepared::new(source, options)?;
        let mut output = String::with_capacity(source.len());
        for index in 0..prepared.tokens.len() {
            let text = prepared.text(index);
            if index > 0 && needs_space(prepared.text(index - 1), text) {
                output.push(' ');
            }
            output.push_str(text);
        }
        Ok(output)
    }

    fn beautify(&self, source: &str, options: FormatOptions) -> BundleResult<String> {
        let prepared = Prepared::new(source, options)?;
        let mut output = String::with_capacity(source.len() + BEAUTIFY_BANNER.len());
        output.push_str(BEAUTIFY_BANNER);
        for index in 0..prepared.tokens.len() {
            if prepared.layout.starts[index] {
                if index > 0 {
                    output.push('\n');
                }
                output.push_str(&INDENT.repeat(prepared.layout.depth[index]));
            } else if readable_space(&prepared, index) {
                output.push(' ');
            }
            output.push_str(prepared.text(index));
        }
        output.push('\n');
        Ok(output)
    }
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

fn is_number(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_digit() => true,
        Some('.') => chars.next().is_some_and(|second| second.is_ascii_digit()),
        _ => false,
    }
}

/// Whether printing `prev` directly before `next` would lex differently
pub fn needs_space(prev: &str, next: &str) -> bool {
    let (Some(last), Some(first)) = (prev.chars().last(), next.chars().next()) else {
        return false;
    };
    if is_word_char(last) && is_word_char(first) {
        return true;
    }
    if first == '.' && is_number(prev) {
        return true;
    }
    matches!(
        (last, first),
        ('=' | '~' | '<' | '>', '=')
            | ('<', '<')
            | ('>', '>')
            | ('/', '/')
            | (':', ':')
            | ('.', '.')
            | ('-', '-')
            | ('[', '[' | '=')
    )
}

fn readable_space(prepared: &Prepared<'_>, index: usize) -> bool {
    if index == 0 {
        return false;
    }
    let prev = &prepared.tokens[index - 1];
    let token = &prepared.tokens[index];
    if needs_space(prepared.text(index - 1), prepared.text(index)) {
        return true;
    }
    if token.kind == TokenKind::Symbol && matches!(token.text, "," | ";" | ")" | "]" | "." | ":") {
        return false;
    }
    if prev.kind == TokenKind::Symbol && matches!(prev.text, "(" | "[" | "." | ":" | "#") {
        return false;
    }
    // call and index directly after the callee
    if (token.is_symbol("(") || token.is_symbol("[")) && prev.kind != TokenKind::Keyword {
        return !layout::ends_expression(prev);
    }
    // unary minus
    if prev.is_symbol("-")
        && index
            .checked_sub(2)
            .is_none_or(|before| !layout::ends_expression(&prepared.tokens[before]))
    {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;

    use super::*;

    fn minify(source: &str, options: FormatOptions) -> String {
        BuiltinFormatter::new()
            .minify(source, options)
            .expect("formatter should accept source")
    }

    #[test]
    fn test_minify_drops_comments_and_whitespace() {
        let source = "-- header\nlocal x = 1 -- one\n\nprint( x .. 'y' )\n";
        assert_eq!(
            minify(source, FormatOptions::default()),
            "local x=1 print(x..'y')"
        );
    }

    #[test]
    fn test_minify_keeps_tokens_apart() {
        assert_eq!(
            minify("a = 1 .. 2 b = x - -y c = t[ [[s]] ]", FormatOptions::default()),
            "a=1 ..2 b=x- -y c=t[ [[s]]]"
        );
    }

    #[test]
    fn test_minify_with_renaming() {
        let options = FormatOptions {
            rename_variables: true,
            rename_globals: true,
        };
        assert_eq!(
            minify("total = 0 local function add(n) total = total + n end add(2)", options),
            "G_1_total=0 local function L_1_add(L_2_n)G_1_total=G_1_total+L_2_n end L_1_add(2)"
        );
    }

    #[test]
    fn test_beautify_layout() {
        let output = BuiltinFormatter::new()
            .beautify(
                "local t={a=1} -- note\nif t.a then print(t.a, -1) else error('x') end",
                FormatOptions::default(),
            )
            .expect("formatter should accept source");
        assert_snapshot!(output, @r"
        --[[ formatted by luapack ]]
        local t = { a = 1 }
        if t.a then
            print(t.a, -1)
        else
            error('x')
        end
        ");
    }

    #[test]
    fn test_needs_space() {
        assert!(needs_space("local", "x"));
        assert!(needs_space("1", ".."));
        assert!(needs_space("-", "-1"));
        assert!(!needs_space(")", "x"));
        assert!(!needs_space("x", "("));
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = BuiltinFormatter::new()
            .minify("local = 1", FormatOptions {
                rename_variables: true,
                rename_globals: false,
            })
            .expect_err("local needs a name");
        assert_eq!(err.code(), "FORMAT_ERROR");
    }
}
