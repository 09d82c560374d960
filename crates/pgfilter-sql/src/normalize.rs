//! Token and AST normalization applied before hashing.

use regex::Regex;
use sqlparser::ast::{Expr, UnaryOperator, Value, VisitorMut};
use sqlparser::tokenizer::Token;
use std::ops::ControlFlow;
use std::sync::LazyLock;

/// What every literal is rendered as in the canonical form.
pub const PLACEHOLDER: &str = "?";

static UNIX_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]{9,15}").expect("timestamp pattern is valid"));

/// Replace every run of 9 to 15 digits in number and word tokens with `0`.
///
/// String literals, dollar-quote tags, placeholders and comments are left
/// alone, so token boundaries are exactly the ones the server will see.
/// Runs longer than 15 digits are split left to right, matching the pattern
/// greedily.
pub fn replace_unix_timestamps(tokens: &mut [Token]) {
    for token in tokens {
        match token {
            Token::Number(number, _) => replace_digit_runs(number),
            Token::Word(word) => replace_digit_runs(&mut word.value),
            _ => {}
        }
    }
}

fn replace_digit_runs(text: &mut String) {
    if UNIX_TIMESTAMP.is_match(text) {
        *text = UNIX_TIMESTAMP.replace_all(text, "0").into_owned();
    }
}

/// Rewrites every literal in a statement to [`PLACEHOLDER`].
///
/// Signed literals fold into a single placeholder and IN-lists made only of
/// literals collapse to one element, so `x IN (1, 2, 3)` and `x IN (4)`
/// render the same.
pub(crate) struct LiteralMasker;

impl VisitorMut for LiteralMasker {
    type Break = ();

    fn post_visit_value(&mut self, value: &mut Value) -> ControlFlow<Self::Break> {
        *value = Value::Placeholder(PLACEHOLDER.to_string());
        ControlFlow::Continue(())
    }

    fn post_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<Self::Break> {
        if let Expr::UnaryOp {
            op: UnaryOperator::Minus | UnaryOperator::Plus,
            expr: inner,
        } = expr
            && is_placeholder(inner)
        {
            let folded = (**inner).clone();
            *expr = folded;
        } else if let Expr::InList { list, .. } = expr
            && list.iter().all(is_placeholder)
        {
            list.truncate(1);
        }
        ControlFlow::Continue(())
    }
}

fn is_placeholder(expr: &Expr) -> bool {
    matches!(expr, Expr::Value(v) if matches!(&v.value, Value::Placeholder(p) if p == PLACEHOLDER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::tokenizer::Tokenizer;

    fn tokenize(sql: &str) -> Vec<Token> {
        Tokenizer::new(&PostgreSqlDialect {}, sql).tokenize().unwrap()
    }

    fn normalized(sql: &str) -> String {
        let mut tokens = tokenize(sql);
        replace_unix_timestamps(&mut tokens);
        tokens.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_replaces_ten_digit_runs() {
        assert_eq!(
            normalized("SELECT * FROM events_1700000000 WHERE ts > 1650000000"),
            "SELECT * FROM events_0 WHERE ts > 0"
        );
    }

    #[test]
    fn test_leaves_short_numbers_alone() {
        let sql = "SELECT 12345678 FROM t LIMIT 10";
        assert_eq!(normalized(sql), sql);
    }

    #[test]
    fn test_millisecond_timestamps() {
        assert_eq!(normalized("x = 1700000000123"), "x = 0");
    }

    #[test]
    fn test_dollar_quote_tags_are_untouched() {
        let sql = "SELECT $q111111111$ a $q222222222$ b $q111111111$";
        let mut tokens = tokenize(sql);
        let original = tokens.clone();
        replace_unix_timestamps(&mut tokens);
        assert_eq!(tokens, original);
    }

    #[test]
    fn test_string_contents_are_untouched() {
        let mut tokens = tokenize("SELECT 'at 1700000000'");
        let original = tokens.clone();
        replace_unix_timestamps(&mut tokens);
        assert_eq!(tokens, original);
    }
}
