//! Statement parser and incremental diff for the live session.
//!
//! The parser only understands as much Pig Latin as the diff needs: comments,
//! quoted strings, statement terminators and the `alias = ...` binding form.

use std::{collections::HashSet, fmt};

/// One terminated statement, whitespace-normalised, with its bound alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Statement {
    pub alias: Option<String>,
    /// Text including the trailing `;`, or the whole line for a
    /// preprocessor statement.
    pub text: String,
}

/// What has already been sent to the running session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptState {
    pub ordered_statements: Vec<Statement>,
}

impl ScriptState {
    pub fn reset(&mut self) {
        self.ordered_statements.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_statements.is_empty()
    }

    fn aliases(&self) -> impl Iterator<Item = &str> {
        self.ordered_statements.iter().filter_map(|s| s.alias.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Drops a binding the script no longer defines.
    Clear(String),
    Statement(Statement),
    Preview(String),
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clear(alias) => write!(f, "{alias} = null;"),
            Self::Statement(s) => f.write_str(&s.text),
            Self::Preview(alias) => write!(f, "illustrate {alias};"),
        }
    }
}

/// The commands for one pipeline run, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub directives: Vec<Directive>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn commands(&self) -> Vec<String> {
        self.directives.iter().map(ToString::to_string).collect()
    }

    pub fn preview_alias(&self) -> Option<&str> {
        self.directives.iter().rev().find_map(|d| match d {
            Directive::Preview(alias) => Some(alias.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptDiffEngine;

impl ScriptDiffEngine {
    pub fn new() -> Self {
        Self
    }

    /// Parses `source` into statements, dropping comments, blank lines and
    /// any trailing `STORE`/`RMF` statements.
    pub fn parse(&self, source: &str) -> Vec<Statement> {
        let stripped = strip_comments(source);
        let mut statements: Vec<Statement> = split_statements(&stripped)
            .into_iter()
            .map(|text| Statement { alias: alias_of(&text), text })
            .collect();
        while statements.last().is_some_and(|s| is_output_statement(&s.text)) {
            statements.pop();
        }
        statements
    }

    /// Computes the next batch for `source` and replaces `state` with the
    /// parsed statement list.
    ///
    /// The batch is: a clear for every alias `state` binds that `source` no
    /// longer does, then each statement not already sent (order kept), then a
    /// preview of the last alias `source` defines. An unchanged script gives
    /// an empty batch.
    pub fn diff(&self, source: &str, state: &mut ScriptState) -> Batch {
        let statements = self.parse(source);
        let current: HashSet<&str> = statements.iter().filter_map(|s| s.alias.as_deref()).collect();

        let mut directives = Vec::new();
        let mut cleared = HashSet::new();
        for alias in state.aliases() {
            if !current.contains(alias) && cleared.insert(alias) {
                directives.push(Directive::Clear(alias.to_string()));
            }
        }

        let sent: HashSet<&Statement> = state.ordered_statements.iter().collect();
        directives.extend(
            statements
                .iter()
                .filter(|s| !sent.contains(s))
                .cloned()
                .map(Directive::Statement),
        );

        if !directives.is_empty() {
            if let Some(last) = statements.iter().rev().find_map(|s| s.alias.clone()) {
                directives.push(Directive::Preview(last));
            }
        }

        state.ordered_statements = statements;
        Batch { directives }
    }
}

/// The identifier bound by `name = ...`; `name == ...` binds nothing.
fn alias_of(text: &str) -> Option<String> {
    let end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    let name = &text[..end];
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let rest = text[end..].trim_start().strip_prefix('=')?;
    if rest.starts_with('=') {
        return None;
    }
    Some(name.to_string())
}

fn is_output_statement(text: &str) -> bool {
    let head = text.split_whitespace().next().unwrap_or("").trim_end_matches(';');
    head.eq_ignore_ascii_case("store") || head.eq_ignore_ascii_case("rmf")
}

/// Removes `--` line comments and `/* */` block comments outside quotes.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }
        let next = chars.peek().copied();
        match (c, next) {
            ('-', Some('-')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                out.push(' ');
            }
            ('\'', _) | ('"', _) | ('`', _) => {
                quote = Some(c);
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Splits on `;` outside quotes and joins each statement onto one line.
/// Preprocessor lines (`%default`, `%declare`, ...) end at the newline and
/// keep their text as written.
fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                current.push(c);
            }
            None if c == ';' => {
                push_statement(&mut statements, &current);
                current.clear();
            }
            None if c == '%' && current.trim().is_empty() => {
                let line: String = chars.by_ref().take_while(|&ch| ch != '\n').collect();
                let joined = line.split_whitespace().collect::<Vec<_>>().join(" ");
                statements.push(format!("%{joined}"));
                current.clear();
            }
            None => {
                if matches!(c, '\'' | '"' | '`') {
                    quote = Some(c);
                }
                current.push(c);
            }
        }
    }
    // An unterminated tail is still being typed; leave it out.
    statements
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let joined = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if !joined.is_empty() {
        statements.push(format!("{joined};"));
    }
}
