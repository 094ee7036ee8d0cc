//! Line editor helper for the Steel REPL
//!
//! Completes known rch341 names, colors them, and keeps reading lines while
//! parentheses are unbalanced.

use std::borrow::Cow;
use std::collections::BTreeSet;

use colored::Colorize;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Context, Helper};

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '\'' | '"')
}

/// Byte range of the identifier ending at `pos`
fn word_start(line: &str, pos: usize) -> usize {
    line[..pos]
        .char_indices()
        .rev()
        .find(|&(_, c)| is_delimiter(c))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0)
}

/// Paren depth of `input`, ignoring strings and `;` comments
///
/// Returns `None` when a string is left open.
fn paren_balance(input: &str) -> Option<i32> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut in_comment = false;

    for c in input.chars() {
        if in_comment {
            in_comment = c != '\n';
            continue;
        }
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            '"' => in_string = true,
            ';' => in_comment = true,
            _ => {}
        }
    }

    if in_string {
        None
    } else {
        Some(depth)
    }
}

/// Helper for rustyline providing completion, highlighting and validation
#[derive(Helper)]
pub struct ReplHelper {
    known: BTreeSet<&'static str>,
}

impl ReplHelper {
    /// Create a helper that knows `names`
    pub fn new(names: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            known: names.into_iter().collect(),
        }
    }
}

impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Self::Candidate>)> {
        let start = word_start(line, pos);
        let prefix = &line[start..pos];
        if prefix.is_empty() {
            return Ok((pos, Vec::new()));
        }

        let completions = self
            .known
            .iter()
            .filter(|name| name.starts_with(prefix))
            .map(|name| Pair {
                display: name.to_string(),
                replacement: name.to_string(),
            })
            .collect();
        Ok((start, completions))
    }
}

impl Validator for ReplHelper {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        match paren_balance(ctx.input()) {
            None => Ok(ValidationResult::Incomplete),
            Some(depth) if depth > 0 => Ok(ValidationResult::Incomplete),
            Some(_) => Ok(ValidationResult::Valid(None)),
        }
    }
}

impl Hinter for ReplHelper {
    type Hint = String;

    fn hint(&self, _line: &str, _pos: usize, _context: &Context) -> Option<String> {
        None
    }
}

impl Highlighter for ReplHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        let mut out = String::with_capacity(line.len());
        let mut word = String::new();

        let flush = |word: &mut String, out: &mut String| {
            if self.known.contains(word.as_str()) {
                out.push_str(&word.bright_blue().to_string());
            } else if word.starts_with(|c: char| c.is_ascii_digit()) || word.starts_with("#x") {
                out.push_str(&word.bright_yellow().to_string());
            } else {
                out.push_str(word);
            }
            word.clear();
        };

        for c in line.chars() {
            if is_delimiter(c) {
                flush(&mut word, &mut out);
                out.push(c);
            } else {
                word.push(c);
            }
        }
        flush(&mut word, &mut out);

        Cow::Owned(out)
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paren_balance() {
        assert_eq!(paren_balance("(i2c-scan h)"), Some(0));
        assert_eq!(paren_balance("(define h (ch341-open 0)"), Some(1));
        assert_eq!(paren_balance("(display \")\")"), Some(0));
        assert_eq!(paren_balance("(display \"abc"), None);
        assert_eq!(paren_balance("(foo) ; (unclosed"), Some(0));
    }

    #[test]
    fn test_word_start() {
        assert_eq!(word_start("(i2c-sc", 7), 1);
        assert_eq!(word_start("i2c", 3), 0);
        assert_eq!(word_start("(gpio-get h ", 12), 12);
    }
}
