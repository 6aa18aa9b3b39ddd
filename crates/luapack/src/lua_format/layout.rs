//! Statement boundaries and block depth over a token stream
//!
//! This is not a parser. It tracks just enough structure (blocks, brackets,
//! function parameter lists, loop headers) to tell where a statement starts
//! and how deeply it is nested, which is what the pretty printer and the
//! scope tracker need.

use super::lexer::{Token, TokenKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    /// `starts[i]` is true when token `i` begins a statement or a block closer
    pub starts: Vec<bool>,
    /// Block depth token `i` is printed at; closers share their opener's depth
    pub depth: Vec<usize>,
}

impl Layout {
    /// Index of the first statement start after `index` at the same or an
    /// outer depth, which is where the statement containing `index` ends
    pub fn statement_end_after(&self, index: usize) -> Option<usize> {
        let depth = self.depth.get(index).copied()?;
        (index + 1..self.starts.len()).find(|&next| self.starts[next] && self.depth[next] <= depth)
    }
}

/// Tokens that close a block and are printed one level out
pub fn is_block_closer(token: &Token<'_>) -> bool {
    token.kind == TokenKind::Keyword && matches!(token.text, "end" | "else" | "elseif" | "until")
}

/// Whether an expression (or a simple statement) may end with `token`
pub fn ends_expression(token: &Token<'_>) -> bool {
    match token.kind {
        TokenKind::Name | TokenKind::Number | TokenKind::String => true,
        TokenKind::Keyword => matches!(token.text, "end" | "true" | "false" | "nil" | "break"),
        TokenKind::Symbol => matches!(token.text, ")" | "]" | "}" | "..."),
        TokenKind::Comment => false,
    }
}

/// Whether `token` extends the expression before it
pub fn continues_expression(token: &Token<'_>) -> bool {
    match token.kind {
        TokenKind::String => true,
        TokenKind::Keyword => matches!(token.text, "and" | "or"),
        TokenKind::Symbol => !matches!(token.text, ")" | "]" | "}" | ";" | "::" | "#" | "..."),
        _ => false,
    }
}

/// Compute the layout of a comment-free token stream
pub fn analyze(tokens: &[Token<'_>]) -> Layout {
    let mut starts = vec![false; tokens.len()];
    let mut depth = vec![0; tokens.len()];

    // bracket depth at which each open block's statements live
    let mut blocks: Vec<usize> = Vec::new();
    // `true` for a parenthesis opening a function parameter list
    let mut brackets: Vec<bool> = Vec::new();
    let mut expect_params = false;
    let mut loop_headers = 0usize;
    let mut opened_block = false;

    for (index, token) in tokens.iter().enumerate() {
        let base = blocks.last().copied().unwrap_or(0);
        let at_statement_level = brackets.len() == base;
        let closer = is_block_closer(token);

        if index == 0 {
            starts[index] = true;
        } else if at_statement_level {
            let prev = &tokens[index - 1];
            let never_starts = token.is_keyword("then")
                || token.is_keyword("in")
                || (token.is_keyword("do") && loop_headers > 0);
            starts[index] = closer
                || opened_block
                || prev.is_symbol(";")
                || (ends_expression(prev) && !continues_expression(token) && !never_starts);
        }

        depth[index] = if closer {
            blocks.len().saturating_sub(1)
        } else {
            blocks.len()
        };

        opened_block = false;
        match (token.kind, token.text) {
            (TokenKind::Symbol, "(") => {
                brackets.push(expect_params);
                expect_params = false;
            }
            (TokenKind::Symbol, "[" | "{") => brackets.push(false),
            (TokenKind::Symbol, ")" | "]" | "}") => {
                if brackets.pop() == Some(true) {
                    blocks.push(brackets.len());
                    opened_block = true;
                }
            }
            (TokenKind::Keyword, "function") => expect_params = true,
            (TokenKind::Keyword, "while" | "for") => loop_headers += 1,
            (TokenKind::Keyword, "do") => {
                loop_headers = loop_headers.saturating_sub(usize::from(!starts[index]));
                blocks.push(brackets.len());
                opened_block = true;
            }
            (TokenKind::Keyword, "then" | "repeat") => {
                blocks.push(brackets.len());
                opened_block = true;
            }
            (TokenKind::Keyword, "else") => {
                blocks.pop();
                blocks.push(brackets.len());
                opened_block = true;
            }
            (TokenKind::Keyword, "end" | "elseif" | "until") => {
                blocks.pop();
            }
            _ => {}
        }
    }

    Layout { starts, depth }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::lua_format::lexer::tokenize;

    fn statements(source: &str) -> Vec<String> {
        let tokens = tokenize(source).expect("valid source");
        let layout = analyze(&tokens);
        let mut lines: Vec<String> = Vec::new();
        for (index, token) in tokens.iter().enumerate() {
            if layout.starts[index] {
                lines.push(format!("{}{}", "  ".repeat(layout.depth[index]), token.text));
            } else if let Some(line) = lines.last_mut() {
                line.push(' ');
                line.push_str(token.text);
            }
        }
        lines
    }

    #[test]
    fn test_splits_statements_without_separators() {
        assert_eq!(
            statements("local a = 1 local b = a print(a, b)"),
            vec!["local a = 1", "local b = a", "print ( a , b )"]
        );
    }

    #[test]
    fn test_blocks_indent() {
        assert_eq!(
            statements("for i = 1, 3 do if i > 1 then print(i) else x = i end end"),
            vec![
                "for i = 1 , 3 do",
                "  if i > 1 then",
                "    print ( i )",
                "  else",
                "    x = i",
                "  end",
                "end",
            ]
        );
    }

    #[test]
    fn test_function_bodies_inside_arguments() {
        assert_eq!(
            statements("call(function(x) local y = x return y end) z = 1"),
            vec![
                "call ( function ( x )",
                "  local y = x",
                "  return y",
                "end )",
                "z = 1",
            ]
        );
    }

    #[test]
    fn test_while_do_is_not_a_statement() {
        assert_eq!(
            statements("while x do x = f() end do local y end"),
            vec!["while x do", "  x = f ( )", "end", "do", "  local y", "end"]
        );
    }

    #[test]
    fn test_table_separators_do_not_split() {
        assert_eq!(
            statements("t = { a = 1; b = 2, 3 } n = #t"),
            vec!["t = { a = 1 ; b = 2 , 3 }", "n = # t"]
        );
    }

    #[test]
    fn test_statement_end_after() {
        let tokens = tokenize("repeat local v = f() until v print(v)").expect("valid source");
        let layout = analyze(&tokens);
        let until = tokens
            .iter()
            .position(|token| token.is_keyword("until"))
            .expect("until token");
        let print = tokens
            .iter()
            .position(|token| token.text == "print")
            .expect("print token");
        assert_eq!(layout.statement_end_after(until), Some(print));
        assert_eq!(layout.statement_end_after(1), Some(until));
    }
}
