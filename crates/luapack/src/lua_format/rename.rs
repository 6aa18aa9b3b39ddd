//! Scope-aware identifier renaming
//!
//! Every local declaration (`local`, `local function`, parameters, loop
//! variables, implicit `self`) gets a tag `L_<n>_<name>` that is unique in the
//! chunk. Globals that the chunk assigns, other than the standard library,
//! can be tagged `G_<n>_<name>`. Fields, methods, table keys and labels keep
//! their names.

use std::collections::BTreeMap;

use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHashSet};

use super::{
    FormatOptions,
    layout::Layout,
    lexer::{Token, TokenKind},
};
use crate::error::{BundleError, BundleResult};

/// Globals provided by the Lua runtime; never renamed
pub const STANDARD_GLOBALS: &[&str] = &[
    "_G",
    "_ENV",
    "_VERSION",
    "arg",
    "assert",
    "bit32",
    "collectgarbage",
    "coroutine",
    "debug",
    "dofile",
    "error",
    "getfenv",
    "getmetatable",
    "io",
    "ipairs",
    "jit",
    "load",
    "loadfile",
    "loadstring",
    "math",
    "module",
    "next",
    "os",
    "package",
    "pairs",
    "pcall",
    "print",
    "rawequal",
    "rawget",
    "rawlen",
    "rawset",
    "require",
    "select",
    "setfenv",
    "setmetatable",
    "string",
    "table",
    "tonumber",
    "tostring",
    "type",
    "unpack",
    "utf8",
    "xpcall",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Untouched,
    Local(usize),
    Global,
}

#[derive(Debug)]
enum Deferred {
    Activate { scope: usize, decls: Vec<usize> },
    PopScope,
}

/// Replacement text per token, `None` where the token is kept as is
pub(crate) fn plan(
    tokens: &[Token<'_>],
    layout: &Layout,
    options: FormatOptions,
) -> BundleResult<Vec<Option<String>>> {
    if !options.rename_variables && !options.rename_globals {
        return Ok(vec![None; tokens.len()]);
    }

    let mut walker = ScopeWalker::new(tokens, layout);
    walker.walk()?;
    Ok(walker.into_replacements(options))
}

struct ScopeWalker<'t, 'a> {
    tokens: &'t [Token<'a>],
    layout: &'t Layout,
    scopes: Vec<FxHashMap<&'a str, usize>>,
    decls: Vec<&'a str>,
    /// Declarations that are scoped but keep their source name (`self`)
    kept_names: FxHashSet<usize>,
    bindings: Vec<Binding>,
    brackets: Vec<&'a str>,
    loop_vars: Vec<Vec<usize>>,
    deferred: BTreeMap<usize, Vec<Deferred>>,
    assignment_targets: FxHashSet<usize>,
    assigned_globals: IndexSet<&'a str>,
}

impl<'t, 'a> ScopeWalker<'t, 'a> {
    fn new(tokens: &'t [Token<'a>], layout: &'t Layout) -> Self {
        Self {
            tokens,
            layout,
            scopes: vec![FxHashMap::default()],
            decls: Vec::new(),
            kept_names: FxHashSet::default(),
            bindings: vec![Binding::Untouched; tokens.len()],
            brackets: Vec::new(),
            loop_vars: Vec::new(),
            deferred: BTreeMap::new(),
            assignment_targets: FxHashSet::default(),
            assigned_globals: IndexSet::new(),
        }
    }

    fn walk(&mut self) -> BundleResult<()> {
        let mut index = 0;
        while index < self.tokens.len() {
            self.run_deferred(index);
            let token = self.tokens[index];
            index = match (token.kind, token.text) {
                (TokenKind::Keyword, "local") => self.local_statement(index)?,
                (TokenKind::Keyword, "function") => self.function_header(index, false)?,
                (TokenKind::Keyword, "for") => self.for_header(index),
                (TokenKind::Keyword, "while") => {
                    self.loop_vars.push(Vec::new());
                    index + 1
                }
                (TokenKind::Keyword, "do") => {
                    self.push_scope();
                    if !self.layout.starts[index]
                        && let Some(vars) = self.loop_vars.pop()
                    {
                        for decl in vars {
                            self.activate_in_top(decl);
                        }
                    }
                    index + 1
                }
                (TokenKind::Keyword, "then" | "repeat") => {
                    self.push_scope();
                    index + 1
                }
                (TokenKind::Keyword, "else") => {
                    self.pop_scope();
                    self.push_scope();
                    index + 1
                }
                (TokenKind::Keyword, "elseif" | "end") => {
                    self.pop_scope();
                    index + 1
                }
                (TokenKind::Keyword, "until") => {
                    // the condition still sees the loop body's locals
                    if let Some(end) = self.layout.statement_end_after(index) {
                        self.defer(end, Deferred::PopScope);
                    }
                    index + 1
                }
                (TokenKind::Keyword, "goto") => index + 2,
                (TokenKind::Symbol, "::")
                    if self.token_at(index + 1).is_some_and(Token::is_name)
                        && self.token_at(index + 2).is_some_and(|t| t.is_symbol("::")) =>
                {
                    index + 3
                }
                (TokenKind::Symbol, "(" | "[" | "{") => {
                    self.brackets.push(token.text);
                    index + 1
                }
                (TokenKind::Symbol, ")" | "]" | "}") => {
                    self.brackets.pop();
                    index + 1
                }
                (TokenKind::Name, _) => {
                    self.name(index);
                    index + 1
                }
                _ => index + 1,
            };
        }
        Ok(())
    }

    fn token_at(&self, index: usize) -> Option<&Token<'a>> {
        self.tokens.get(index)
    }

    fn symbol_at(&self, index: usize, symbol: &str) -> bool {
        self.token_at(index).is_some_and(|token| token.is_symbol(symbol))
    }

    fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    fn declare(&mut self, token_index: usize) -> usize {
        let id = self.declare_implicit(self.tokens[token_index].text);
        self.bindings[token_index] = Binding::Local(id);
        id
    }

    fn declare_implicit(&mut self, name: &'a str) -> usize {
        self.decls.push(name);
        self.decls.len() - 1
    }

    fn activate_in_top(&mut self, decl: usize) {
        let name = self.decls[decl];
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, decl);
        }
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn defer(&mut self, at: usize, action: Deferred) {
        self.deferred.entry(at).or_default().push(action);
    }

    fn run_deferred(&mut self, index: usize) {
        let Some(mut actions) = self.deferred.remove(&index) else {
            return;
        };
        // activations belong to statements inside the scope a pop would close
        actions.sort_by_key(|action| matches!(action, Deferred::PopScope));
        for action in actions {
            match action {
                Deferred::Activate { scope, decls } => {
                    for decl in decls {
                        let name = self.decls[decl];
                        if let Some(scope) = self.scopes.get_mut(scope) {
                            scope.insert(name, decl);
                        }
                    }
                }
                Deferred::PopScope => self.pop_scope(),
            }
        }
    }

    fn local_statement(&mut self, index: usize) -> BundleResult<usize> {
        if self
            .token_at(index + 1)
            .is_some_and(|token| token.is_keyword("function"))
        {
            let name_index = index + 2;
            if !self.token_at(name_index).is_some_and(Token::is_name) {
                return Err(format_error("expected a name after 'local function'"));
            }
            // visible inside its own body, so recursion works
            let decl = self.declare(name_index);
            self.activate_in_top(decl);
            return self.function_header(index + 1, true);
        }

        let mut cursor = index + 1;
        let mut decls = Vec::new();
        while self.token_at(cursor).is_some_and(Token::is_name) {
            decls.push(self.declare(cursor));
            cursor += 1;
            // `<const>` / `<close>` attribute
            if self.symbol_at(cursor, "<") {
                cursor += 3;
            }
            if !self.symbol_at(cursor, ",") {
                break;
            }
            cursor += 1;
        }
        if decls.is_empty() {
            return Err(format_error("expected a name after 'local'"));
        }

        if self.symbol_at(cursor, "=") {
            // the initializers still see the outer bindings
            if let Some(end) = self.layout.statement_end_after(index) {
                let scope = self.scopes.len() - 1;
                self.defer(end, Deferred::Activate { scope, decls });
            }
        } else {
            for decl in decls {
                self.activate_in_top(decl);
            }
        }
        Ok(cursor)
    }

    fn function_header(&mut self, index: usize, name_declared: bool) -> BundleResult<usize> {
        let mut cursor = index + 1;
        let mut is_method = false;

        if self.token_at(cursor).is_some_and(Token::is_name) {
            if !name_declared {
                let qualified = self.symbol_at(cursor + 1, ".") || self.symbol_at(cursor + 1, ":");
                self.reference(cursor, !qualified);
            }
            cursor += 1;
            while self.symbol_at(cursor, ".") || self.symbol_at(cursor, ":") {
                is_method = self.symbol_at(cursor, ":");
                cursor += 2;
            }
        }

        if !self.symbol_at(cursor, "(") {
            return Err(format_error("expected '(' after 'function'"));
        }
        self.push_scope();
        if is_method {
            let decl = self.declare_implicit("self");
            self.kept_names.insert(decl);
            self.activate_in_top(decl);
        }

        cursor += 1;
        while let Some(token) = self.token_at(cursor) {
            if token.is_symbol(")") {
                return Ok(cursor + 1);
            }
            if token.is_name() {
                let decl = self.declare(cursor);
                self.activate_in_top(decl);
            }
            cursor += 1;
        }
        Err(format_error("unfinished parameter list"))
    }

    fn for_header(&mut self, index: usize) -> usize {
        let mut cursor = index + 1;
        let mut vars = Vec::new();
        while self.token_at(cursor).is_some_and(Token::is_name) {
            vars.push(self.declare(cursor));
            cursor += 1;
            if !self.symbol_at(cursor, ",") {
                break;
            }
            cursor += 1;
        }
        self.loop_vars.push(vars);
        cursor
    }

    fn name(&mut self, index: usize) {
        let prev = index.checked_sub(1).and_then(|prev| self.token_at(prev));
        if prev.is_some_and(|prev| prev.is_symbol(".") || prev.is_symbol(":")) {
            return;
        }

        let is_key = self.brackets.last() == Some(&"{")
            && !self.layout.starts[index]
            && prev.is_some_and(|prev| {
                prev.is_symbol("{") || prev.is_symbol(",") || prev.is_symbol(";")
            })
            && self.symbol_at(index + 1, "=");
        if is_key {
            return;
        }

        if self.layout.starts[index] {
            self.mark_assignment_targets(index);
        }
        let is_target = self.assignment_targets.contains(&index);
        self.reference(index, is_target);
    }

    fn reference(&mut self, index: usize, is_assignment: bool) {
        let name = self.tokens[index].text;
        if let Some(decl) = self.lookup(name) {
            self.bindings[index] = Binding::Local(decl);
        } else {
            self.bindings[index] = Binding::Global;
            if is_assignment {
                self.assigned_globals.insert(name);
            }
        }
    }

    /// Record the plain names of an assignment's variable list
    fn mark_assignment_targets(&mut self, start: usize) {
        let mut candidates = Vec::new();
        if self.is_simple_target(start) {
            candidates.push(start);
        }

        let mut depth = 0usize;
        let mut cursor = start + 1;
        while let Some(token) = self.token_at(cursor) {
            if self.layout.starts[cursor] {
                return;
            }
            match (token.kind, token.text) {
                (TokenKind::Symbol, "(" | "[" | "{") => depth += 1,
                (TokenKind::Symbol, ")" | "]" | "}") => depth = depth.saturating_sub(1),
                (TokenKind::Symbol, "=") if depth == 0 => {
                    self.assignment_targets.extend(candidates);
                    return;
                }
                (TokenKind::Symbol, ",") if depth == 0 => {
                    let next = cursor + 1;
                    if self.token_at(next).is_some_and(Token::is_name)
                        && self.is_simple_target(next)
                    {
                        candidates.push(next);
                    }
                }
                (TokenKind::Keyword, _) => return,
                _ => {}
            }
            cursor += 1;
        }
    }

    /// A bare name directly followed by `,` or `=`
    fn is_simple_target(&self, index: usize) -> bool {
        self.symbol_at(index + 1, ",") || self.symbol_at(index + 1, "=")
    }

    fn into_replacements(self, options: FormatOptions) -> Vec<Option<String>> {
        let locals: Vec<Option<String>> = self
            .decls
            .iter()
            .enumerate()
            .map(|(id, name)| {
                (!self.kept_names.contains(&id)).then(|| format!("L_{}_{}", id + 1, name))
            })
            .collect();
        let globals: FxHashMap<&str, String> = self
            .assigned_globals
            .iter()
            .filter(|name| !STANDARD_GLOBALS.contains(*name))
            .enumerate()
            .map(|(id, name)| (*name, format!("G_{}_{}", id + 1, name)))
            .collect();

        self.bindings
            .iter()
            .zip(self.tokens)
            .map(|(binding, token)| match binding {
                Binding::Local(decl) if options.rename_variables => locals[*decl].clone(),
                Binding::Global if options.rename_globals => globals.get(token.text).cloned(),
                _ => None,
            })
            .collect()
    }
}

fn format_error(message: &str) -> BundleError {
    BundleError::Format(message.to_owned())
}
