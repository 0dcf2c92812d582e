//! Evaluation of the constant expressions behind `#if` and `#elif`.
//!
//! The grammar is the C99 `constant-expression` subset over integers; booleans coerce to 0/1.
//! Identifiers are resolved against the macro table: a defined macro's replacement is re-lexed
//! and evaluated recursively, an undefined identifier evaluates to 0.

use cpre_foundation::source::SourceFileId;
use cpre_lexer::{
    lexer::Lexer,
    token::{Token, TokenKind},
};

use crate::{
    macros::{BuiltinContext, MacroTable},
    PreprocessError,
};

pub(crate) struct Evaluator<'a> {
    macros: &'a MacroTable,
    context: BuiltinContext<'a>,
    /// The buffer the condition tokens came from; replacement re-lexes reuse its id.
    file: SourceFileId,
}

impl<'a> Evaluator<'a> {
    pub fn new(macros: &'a MacroTable, context: BuiltinContext<'a>, file: SourceFileId) -> Self {
        Self {
            macros,
            context,
            file,
        }
    }

    /// Evaluates a full condition; every token of the slice must be consumed.
    pub fn evaluate(&self, buffer: &str, tokens: &[Token]) -> Result<i64, PreprocessError> {
        let mut cursor = Cursor {
            buffer,
            tokens,
            position: 0,
            line: self.context.line,
        };
        let value = self.conditional(&mut cursor)?;
        match cursor.peek() {
            None => Ok(value),
            Some(token) => Err(cursor.syntax_error(format!(
                "unexpected {} after the end of the expression",
                token.kind.name()
            ))),
        }
    }

    /// Re-lexes a macro replacement and evaluates it as a nested expression.
    fn evaluate_text(&self, text: &str) -> Result<i64, PreprocessError> {
        let tokens = Lexer::new(self.file, text, self.context.line).tokenize(&mut ())?;
        self.evaluate(text, &tokens)
    }

    fn conditional(&self, cursor: &mut Cursor) -> Result<i64, PreprocessError> {
        let condition = self.logical_or(cursor)?;
        if cursor.eat(TokenKind::Question) {
            let when_true = self.conditional(cursor)?;
            cursor.expect(TokenKind::Colon)?;
            let when_false = self.conditional(cursor)?;
            Ok(if condition != 0 { when_true } else { when_false })
        } else {
            Ok(condition)
        }
    }

    fn logical_or(&self, cursor: &mut Cursor) -> Result<i64, PreprocessError> {
        let mut lhs = self.logical_and(cursor)?;
        while cursor.eat(TokenKind::Or) {
            // Both operands are evaluated; the reduction order of the grammar does not
            // short-circuit.
            let rhs = self.logical_and(cursor)?;
            lhs = (lhs != 0 || rhs != 0) as i64;
        }
        Ok(lhs)
    }

    fn logical_and(&self, cursor: &mut Cursor) -> Result<i64, PreprocessError> {
        let mut lhs = self.inclusive_or(cursor)?;
        while cursor.eat(TokenKind::And) {
            let rhs = self.inclusive_or(cursor)?;
            lhs = (lhs != 0 && rhs != 0) as i64;
        }
        Ok(lhs)
    }

    fn inclusive_or(&self, cursor: &mut Cursor) -> Result<i64, PreprocessError> {
        let mut lhs = self.exclusive_or(cursor)?;
        while cursor.eat(TokenKind::BitOr) {
            lhs |= self.exclusive_or(cursor)?;
        }
        Ok(lhs)
    }

    fn exclusive_or(&self, cursor: &mut Cursor) -> Result<i64, PreprocessError> {
        let mut lhs = self.bitwise_and(cursor)?;
        while cursor.eat(TokenKind::BitXor) {
            lhs ^= self.bitwise_and(cursor)?;
        }
        Ok(lhs)
    }

    fn bitwise_and(&self, cursor: &mut Cursor) -> Result<i64, PreprocessError> {
        let mut lhs = self.equality(cursor)?;
        while cursor.eat(TokenKind::BitAnd) {
            lhs &= self.equality(cursor)?;
        }
        Ok(lhs)
    }

    fn equality(&self, cursor: &mut Cursor) -> Result<i64, PreprocessError> {
        let mut lhs = self.relational(cursor)?;
        loop {
            if cursor.eat(TokenKind::Equal) {
                lhs = (lhs == self.relational(cursor)?) as i64;
            } else if cursor.eat(TokenKind::NotEqual) {
                lhs = (lhs != self.relational(cursor)?) as i64;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn relational(&self, cursor: &mut Cursor) -> Result<i64, PreprocessError> {
        let mut lhs = self.shift(cursor)?;
        loop {
            if cursor.eat(TokenKind::Less) {
                lhs = (lhs < self.shift(cursor)?) as i64;
            } else if cursor.eat(TokenKind::Greater) {
                lhs = (lhs > self.shift(cursor)?) as i64;
            } else if cursor.eat(TokenKind::LessEqual) {
                lhs = (lhs <= self.shift(cursor)?) as i64;
            } else if cursor.eat(TokenKind::GreaterEqual) {
                lhs = (lhs >= self.shift(cursor)?) as i64;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn shift(&self, cursor: &mut Cursor) -> Result<i64, PreprocessError> {
        let mut lhs = self.additive(cursor)?;
        loop {
            let left = if cursor.eat(TokenKind::ShiftLeft) {
                true
            } else if cursor.eat(TokenKind::ShiftRight) {
                false
            } else {
                return Ok(lhs);
            };
            let rhs = self.additive(cursor)?;
            if !(0..64).contains(&rhs) {
                return Err(PreprocessError::BadShift {
                    line: cursor.line,
                    amount: rhs,
                });
            }
            lhs = if left { lhs << rhs } else { lhs >> rhs };
        }
    }

    fn additive(&self, cursor: &mut Cursor) -> Result<i64, PreprocessError> {
        let mut lhs = self.multiplicative(cursor)?;
        loop {
            if cursor.eat(TokenKind::Add) {
                lhs = lhs.wrapping_add(self.multiplicative(cursor)?);
            } else if cursor.eat(TokenKind::Sub) {
                lhs = lhs.wrapping_sub(self.multiplicative(cursor)?);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn multiplicative(&self, cursor: &mut Cursor) -> Result<i64, PreprocessError> {
        let mut lhs = self.unary(cursor)?;
        loop {
            if cursor.eat(TokenKind::Mul) {
                lhs = lhs.wrapping_mul(self.unary(cursor)?);
            } else if cursor.eat(TokenKind::Div) {
                let rhs = self.unary(cursor)?;
                if rhs == 0 {
                    return Err(PreprocessError::DivisionByZero { line: cursor.line });
                }
                lhs = lhs.wrapping_div(rhs);
            } else if cursor.eat(TokenKind::Rem) {
                let rhs = self.unary(cursor)?;
                if rhs == 0 {
                    return Err(PreprocessError::DivisionByZero { line: cursor.line });
                }
                lhs = lhs.wrapping_rem(rhs);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn unary(&self, cursor: &mut Cursor) -> Result<i64, PreprocessError> {
        if cursor.eat(TokenKind::Add) {
            self.unary(cursor)
        } else if cursor.eat(TokenKind::Sub) {
            Ok(self.unary(cursor)?.wrapping_neg())
        } else if cursor.eat(TokenKind::BitNot) {
            Ok(!self.unary(cursor)?)
        } else if cursor.eat(TokenKind::Not) {
            Ok((self.unary(cursor)? == 0) as i64)
        } else if cursor.eat(TokenKind::BitAnd) || cursor.eat(TokenKind::Mul) {
            Err(cursor.syntax_error("address and indirection operators cannot appear in a constant expression"))
        } else {
            self.primary(cursor)
        }
    }

    fn primary(&self, cursor: &mut Cursor) -> Result<i64, PreprocessError> {
        let Some(token) = cursor.next() else {
            return Err(cursor.syntax_error("expression expected"));
        };
        match token.kind {
            TokenKind::Constant => Ok(token
                .value
                .map(|value| value.as_int())
                .unwrap_or_default()),
            kind if kind.is_left_paren() => {
                let value = self.conditional(cursor)?;
                cursor.expect(TokenKind::RightParen)?;
                Ok(value)
            }
            TokenKind::Defined => self.defined(cursor),
            TokenKind::Ident => {
                let name = token.text(cursor.buffer);
                match self.macros.get(name) {
                    Some(found) if !found.is_expanding() => {
                        let replacement = found.expand(None, &self.context)?;
                        let _guard = found.expansion_guard();
                        self.evaluate_text(&replacement)
                    }
                    // Expanding macros and unknown names both follow the C99 rule: 0.
                    _ => Ok(0),
                }
            }
            kind => Err(cursor.syntax_error(format!(
                "{} cannot appear in a constant expression",
                kind.name()
            ))),
        }
    }

    /// `defined(X)` and `defined X`. The name is looked up without expanding it.
    fn defined(&self, cursor: &mut Cursor) -> Result<i64, PreprocessError> {
        let parenthesized = match cursor.peek() {
            Some(token) if token.kind.is_left_paren() => {
                cursor.next();
                true
            }
            _ => false,
        };
        let name_token = cursor.expect(TokenKind::Ident)?;
        let name = name_token.text(cursor.buffer);
        let is_defined = self.macros.contains(name) as i64;
        if parenthesized {
            cursor.expect(TokenKind::RightParen)?;
        }
        Ok(is_defined)
    }
}

struct Cursor<'a> {
    buffer: &'a str,
    tokens: &'a [Token],
    position: usize,
    line: u32,
}

impl<'a> Cursor<'a> {
    /// The next meaningful token; newlines and the end-of-file sentinel terminate the expression.
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.position).filter(|token| {
            !matches!(token.kind, TokenKind::Newline | TokenKind::EndOfFile)
        })
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.peek()?;
        self.position += 1;
        self.line = token.line;
        Some(token)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek().is_some_and(|token| token.kind == kind) {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&'a Token, PreprocessError> {
        match self.peek() {
            Some(token) if token.kind == kind => Ok(self.next().expect("peek returned a token")),
            Some(token) => Err(self.syntax_error(format!(
                "{} expected, but got {}",
                kind.name(),
                token.kind.name()
            ))),
            None => Err(self.syntax_error(format!("{} expected", kind.name()))),
        }
    }

    fn syntax_error(&self, message: impl Into<String>) -> PreprocessError {
        PreprocessError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use cpre_foundation::source::{SourceFile, SourceFileSet};
    use cpre_lexer::lexer::Lexer;

    use crate::macros::{Builtin, Macro, MacroTable};

    use super::*;

    fn eval_with(table: &MacroTable, input: &str) -> Result<i64, PreprocessError> {
        let mut files = SourceFileSet::new();
        let file = files.add(SourceFile::new(
            "expr.c".into(),
            "expr.c".into(),
            input.into(),
        ));
        let tokens = Lexer::new(file, input, 1)
            .tokenize(&mut ())
            .expect("condition is expected to tokenize");
        let context = BuiltinContext {
            file: Path::new("expr.c"),
            line: 1,
        };
        Evaluator::new(table, context, file).evaluate(input, &tokens)
    }

    fn eval(input: &str) -> i64 {
        eval_with(&MacroTable::new(), input).expect("expression is expected to evaluate")
    }

    #[test]
    fn precedence_follows_c() {
        assert_eq!(eval("1 + 2 * 3"), 7);
        assert_eq!(eval("(1 + 2) * 3"), 9);
        assert_eq!(eval("1 << 2 + 1"), 8);
        assert_eq!(eval("7 & 3 == 3"), 1);
        assert_eq!(eval("1 | 2 ^ 3 & 2"), 1);
        assert_eq!(eval("4 | 2 ^ 3 & 1"), 7);
    }

    #[test]
    fn unary_operators() {
        assert_eq!(eval("-3 + 5"), 2);
        assert_eq!(eval("!0"), 1);
        assert_eq!(eval("!5"), 0);
        assert_eq!(eval("~0"), -1);
        assert_eq!(eval("+4"), 4);
        assert!(eval_with(&MacroTable::new(), "&x").is_err());
        assert!(eval_with(&MacroTable::new(), "*x").is_err());
    }

    #[test]
    fn conditional_operator_selects_by_condition() {
        assert_eq!(eval("1 ? 2 : 3"), 2);
        assert_eq!(eval("0 ? 2 : 3"), 3);
        assert_eq!(eval("0 ? 1 : 0 ? 2 : 3"), 3);
    }

    #[test]
    fn logical_operators_coerce_to_zero_or_one() {
        assert_eq!(eval("2 && 3"), 1);
        assert_eq!(eval("2 || 0"), 1);
        assert_eq!(eval("0 && 1"), 0);
        assert_eq!(eval("4 > 3 && 2 != 2 || 1"), 1);
    }

    #[test]
    fn undefined_identifiers_evaluate_to_zero() {
        assert_eq!(eval("NOT_DEFINED"), 0);
        assert_eq!(eval("NOT_DEFINED + 1"), 1);
    }

    #[test]
    fn macros_expand_recursively() {
        let mut table = MacroTable::new();
        table.define(Macro::object("A", "B + 1"));
        table.define(Macro::object("B", "2"));
        assert_eq!(eval_with(&table, "A * 2").unwrap(), 6);
    }

    #[test]
    fn mutually_recursive_macros_terminate() {
        let mut table = MacroTable::new();
        table.define(Macro::object("X", "Y"));
        table.define(Macro::object("Y", "X"));
        // The inner occurrence is suppressed by the expansion guard and evaluates to 0.
        assert_eq!(eval_with(&table, "X + 1").unwrap(), 1);
    }

    #[test]
    fn defined_checks_membership_without_expanding() {
        let mut table = MacroTable::new();
        table.define(Macro::object("ZERO", "0"));
        assert_eq!(eval_with(&table, "defined(ZERO)").unwrap(), 1);
        assert_eq!(eval_with(&table, "defined ZERO").unwrap(), 1);
        assert_eq!(eval_with(&table, "defined(MISSING)").unwrap(), 0);
        assert_eq!(eval_with(&table, "defined ZERO && ZERO").unwrap(), 0);
    }

    #[test]
    fn division_and_modulus_by_zero_are_errors() {
        assert!(matches!(
            eval_with(&MacroTable::new(), "1 / 0"),
            Err(PreprocessError::DivisionByZero { .. })
        ));
        assert!(matches!(
            eval_with(&MacroTable::new(), "1 % 0"),
            Err(PreprocessError::DivisionByZero { .. })
        ));
        assert_eq!(eval("6 / 2 % 2"), 1);
    }

    #[test]
    fn out_of_range_shifts_are_errors() {
        assert!(matches!(
            eval_with(&MacroTable::new(), "1 << 64"),
            Err(PreprocessError::BadShift { .. })
        ));
        assert!(eval_with(&MacroTable::new(), "1 << -1").is_err());
        assert_eq!(eval("1 << 10"), 1024);
        assert_eq!(eval("1024 >> 3"), 128);
    }

    #[test]
    fn float_constants_truncate() {
        assert_eq!(eval("2.9"), 2);
        assert_eq!(eval("1e2 + 1"), 101);
    }

    #[test]
    fn builtins_participate_in_conditions() {
        let mut table = MacroTable::new();
        table.define(Macro::builtin("__LINE__", Builtin::Line));
        assert_eq!(eval_with(&table, "__LINE__ == 1").unwrap(), 1);
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(eval_with(&MacroTable::new(), "1 2").is_err());
        assert!(eval_with(&MacroTable::new(), "").is_err());
    }
}
