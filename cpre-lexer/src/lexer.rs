use cpre_foundation::{
    errors::{Diagnostic, DiagnosticSink, Label},
    source::{SourceFileId, Span},
};
use thiserror::Error;

use crate::token::{directive_kind, ConstValue, Token, TokenKind};

/// Fatal lexing errors. Anything recoverable is reported through the diagnostic sink instead.
#[derive(Debug, Error)]
pub enum LexError {
    #[error("number of #endif doesn't match with number of #if")]
    UnbalancedEndif { line: u32 },
}

pub struct Lexer<'a> {
    pub file: SourceFileId,
    input: &'a str,
    position: usize,
    line: u32,
    nested_if: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(file: SourceFileId, input: &'a str, start_line: u32) -> Self {
        Self {
            file,
            input,
            position: 0,
            line: start_line,
            nested_if: 0,
        }
    }

    /// Scans the whole buffer. The returned vector is never empty; its last token is always
    /// `EndOfFile`.
    pub fn tokenize(mut self, diagnostics: &mut dyn DiagnosticSink) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token(diagnostics)?;
            let done = token.kind == TokenKind::EndOfFile;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn current_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn advance_char(&mut self) {
        if let Some(char) = self.current_char() {
            self.position += char.len_utf8();
        }
    }

    fn byte_at(&self, position: usize) -> Option<u8> {
        self.input.as_bytes().get(position).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(' ' | '\t') = self.current_char() {
            self.advance_char();
        }
    }

    fn make_token(&self, kind: TokenKind, start: usize, line: u32, value: Option<ConstValue>) -> Token {
        Token {
            kind,
            span: Span::from(start..self.position),
            line,
            value,
        }
    }

    fn single_char_token(&mut self, kind: TokenKind) -> TokenKind {
        self.advance_char();
        kind
    }

    fn single_or_double_char_token(
        &mut self,
        kind: TokenKind,
        second: char,
        second_kind: TokenKind,
    ) -> TokenKind {
        self.advance_char();
        if self.current_char() == Some(second) {
            self.advance_char();
            second_kind
        } else {
            kind
        }
    }

    pub fn next_token(&mut self, diagnostics: &mut dyn DiagnosticSink) -> Result<Token, LexError> {
        loop {
            self.skip_whitespace();

            let start = self.position;
            let line = self.line;

            let Some(char) = self.current_char() else {
                return Ok(self.make_token(TokenKind::EndOfFile, start, line, None));
            };

            let mut value = None;
            let kind = match char {
                '\n' => {
                    while self.current_char() == Some('\n') {
                        self.advance_char();
                        self.line += 1;
                    }
                    TokenKind::Newline
                }
                '#' => self.hash(start)?,
                'L' if self.byte_at(start + 1) == Some(b'"') => {
                    match self.scan_string_literal(start + 1) {
                        Some(end) => {
                            self.position = end;
                            TokenKind::StringLit
                        }
                        None => self.identifier(start),
                    }
                }
                'L' if self.byte_at(start + 1) == Some(b'\'') => {
                    match self.scan_char_literal(start + 1) {
                        Some((end, code)) => {
                            self.position = end;
                            value = Some(ConstValue::Int(code));
                            TokenKind::Constant
                        }
                        None => self.identifier(start),
                    }
                }
                'a'..='z' | 'A'..='Z' | '_' => self.identifier(start),
                '0'..='9' => {
                    value = Some(self.number());
                    TokenKind::Constant
                }
                '.' => {
                    if self.byte_at(start + 1).is_some_and(|b| b.is_ascii_digit()) {
                        value = Some(self.number());
                        TokenKind::Constant
                    } else if self.byte_at(start + 1) == Some(b'.')
                        && self.byte_at(start + 2) == Some(b'.')
                    {
                        self.position = start + 3;
                        TokenKind::Ellipsis
                    } else {
                        self.single_char_token(TokenKind::Dot)
                    }
                }
                '"' => {
                    // A `"` starts either a quoted header name or a string literal; an
                    // unterminated quote falls back to a lone `"` token and lexing continues.
                    if let Some(end) = self.scan_quoted_header(start) {
                        self.position = end;
                        TokenKind::HeaderName
                    } else if let Some(end) = self.scan_string_literal(start) {
                        self.position = end;
                        TokenKind::StringLit
                    } else {
                        self.position = start + 1;
                        TokenKind::DoubleQuote
                    }
                }
                '\'' => match self.scan_char_literal(start) {
                    Some((end, code)) => {
                        self.position = end;
                        value = Some(ConstValue::Int(code));
                        TokenKind::Constant
                    }
                    None => {
                        self.illegal_character(start, '\'', diagnostics);
                        continue;
                    }
                },
                '(' => {
                    // `(` counts as a call paren when the byte before it is not whitespace;
                    // `#define F(x)` and `#define F (x)` parse differently because of this.
                    let call = start == 0
                        || !self
                            .byte_at(start - 1)
                            .is_some_and(|b| b.is_ascii_whitespace());
                    self.advance_char();
                    if call {
                        TokenKind::CallParen
                    } else {
                        TokenKind::LeftParen
                    }
                }
                '<' => self.less_than(start),
                '>' => {
                    self.advance_char();
                    match self.current_char() {
                        Some('>') => {
                            self.advance_char();
                            if self.current_char() == Some('=') {
                                self.advance_char();
                                TokenKind::RightAssign
                            } else {
                                TokenKind::ShiftRight
                            }
                        }
                        Some('=') => {
                            self.advance_char();
                            TokenKind::GreaterEqual
                        }
                        _ => TokenKind::Greater,
                    }
                }
                '+' => {
                    self.advance_char();
                    match self.current_char() {
                        Some('=') => self.single_char_token(TokenKind::AddAssign),
                        Some('+') => self.single_char_token(TokenKind::Inc),
                        _ => TokenKind::Add,
                    }
                }
                '-' => {
                    self.advance_char();
                    match self.current_char() {
                        Some('=') => self.single_char_token(TokenKind::SubAssign),
                        Some('-') => self.single_char_token(TokenKind::Dec),
                        Some('>') => self.single_char_token(TokenKind::Arrow),
                        _ => TokenKind::Sub,
                    }
                }
                '*' => self.single_or_double_char_token(TokenKind::Mul, '=', TokenKind::MulAssign),
                '/' => self.single_or_double_char_token(TokenKind::Div, '=', TokenKind::DivAssign),
                '%' => self.single_or_double_char_token(TokenKind::Rem, '=', TokenKind::ModAssign),
                '&' => {
                    self.advance_char();
                    match self.current_char() {
                        Some('=') => self.single_char_token(TokenKind::AndAssign),
                        Some('&') => self.single_char_token(TokenKind::And),
                        _ => TokenKind::BitAnd,
                    }
                }
                '|' => {
                    self.advance_char();
                    match self.current_char() {
                        Some('=') => self.single_char_token(TokenKind::OrAssign),
                        Some('|') => self.single_char_token(TokenKind::Or),
                        _ => TokenKind::BitOr,
                    }
                }
                '^' => self.single_or_double_char_token(TokenKind::BitXor, '=', TokenKind::XorAssign),
                '=' => self.single_or_double_char_token(TokenKind::Assign, '=', TokenKind::Equal),
                '!' => self.single_or_double_char_token(TokenKind::Not, '=', TokenKind::NotEqual),
                '~' => self.single_char_token(TokenKind::BitNot),
                '?' => self.single_char_token(TokenKind::Question),
                ')' => self.single_char_token(TokenKind::RightParen),
                '[' => self.single_char_token(TokenKind::LeftBracket),
                ']' => self.single_char_token(TokenKind::RightBracket),
                '{' => self.single_char_token(TokenKind::LeftBrace),
                '}' => self.single_char_token(TokenKind::RightBrace),
                ';' => self.single_char_token(TokenKind::Semi),
                ',' => self.single_char_token(TokenKind::Comma),
                ':' => self.single_char_token(TokenKind::Colon),
                '@' => self.single_char_token(TokenKind::At),
                unknown => {
                    self.illegal_character(start, unknown, diagnostics);
                    continue;
                }
            };

            return Ok(self.make_token(kind, start, line, value));
        }
    }

    fn illegal_character(&mut self, start: usize, char: char, diagnostics: &mut dyn DiagnosticSink) {
        self.advance_char();
        diagnostics.emit(
            Diagnostic::error(self.file, format!("illegal character: {char:?}")).with_label(
                Label::primary(
                    Span::from(start..self.position),
                    "this character is not valid here",
                ),
            ),
        );
    }

    /// `#identifier` directives, `##`, or a lone `#`.
    fn hash(&mut self, start: usize) -> Result<TokenKind, LexError> {
        self.advance_char();
        match self.current_char() {
            Some('a'..='z' | 'A'..='Z' | '_') => {
                while let Some('a'..='z' | 'A'..='Z' | '0'..='9' | '_') = self.current_char() {
                    self.advance_char();
                }
                let spelling = &self.input[start..self.position];
                match directive_kind(spelling) {
                    Some(kind) => {
                        if kind.opens_conditional() {
                            self.nested_if += 1;
                        } else if kind == TokenKind::Endif {
                            self.nested_if = self
                                .nested_if
                                .checked_sub(1)
                                .ok_or(LexError::UnbalancedEndif { line: self.line })?;
                        }
                        Ok(kind)
                    }
                    None => Ok(TokenKind::Directive),
                }
            }
            Some('#') => {
                self.advance_char();
                Ok(TokenKind::HashHash)
            }
            _ => Ok(TokenKind::Hash),
        }
    }

    fn identifier(&mut self, start: usize) -> TokenKind {
        while let Some('a'..='z' | 'A'..='Z' | '0'..='9' | '_') = self.current_char() {
            self.advance_char();
        }
        match &self.input[start..self.position] {
            "defined" => TokenKind::Defined,
            "_Pragma" => TokenKind::PragmaOp,
            _ => TokenKind::Ident,
        }
    }

    /// `"..."` with no quote, backslash or newline inside.
    fn scan_quoted_header(&self, quote_at: usize) -> Option<usize> {
        let bytes = self.input.as_bytes();
        let mut i = quote_at + 1;
        let mut content = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'"' => return (content > 0).then_some(i + 1),
                b'\\' | b'\n' => return None,
                _ => {
                    content += 1;
                    i += 1;
                }
            }
        }
        None
    }

    /// `"(\.|[^\"])*"`; a backslash-newline pair never survives line splicing, so an escaped
    /// newline means the literal is unterminated.
    fn scan_string_literal(&self, quote_at: usize) -> Option<usize> {
        let bytes = self.input.as_bytes();
        let mut i = quote_at + 1;
        while i < bytes.len() {
            match bytes[i] {
                b'"' => return Some(i + 1),
                b'\\' => {
                    if i + 1 >= bytes.len() || bytes[i + 1] == b'\n' {
                        return None;
                    }
                    i += 2;
                }
                _ => i += 1,
            }
        }
        None
    }

    /// `'(\.|[^'])+'`, returning the end position and the character code of the first character.
    fn scan_char_literal(&self, quote_at: usize) -> Option<(usize, i64)> {
        let bytes = self.input.as_bytes();
        let mut i = quote_at + 1;
        let mut content = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'\'' => {
                    if content == 0 {
                        return None;
                    }
                    let code = char_literal_value(&self.input[quote_at + 1..i]);
                    return Some((i + 1, code));
                }
                b'\\' => {
                    if i + 1 >= bytes.len() || bytes[i + 1] == b'\n' {
                        return None;
                    }
                    i += 2;
                    content += 1;
                }
                _ => {
                    i += 1;
                    content += 1;
                }
            }
        }
        None
    }

    /// `<` may start a header name; header names are tried before the comparison and shift
    /// operators, matching the original lexer's rule order.
    fn less_than(&mut self, start: usize) -> TokenKind {
        if let Some(end) = self.scan_angle_header(start) {
            self.position = end;
            return TokenKind::HeaderName;
        }
        self.advance_char();
        match self.current_char() {
            Some('<') => {
                self.advance_char();
                if self.current_char() == Some('=') {
                    self.advance_char();
                    TokenKind::LeftAssign
                } else {
                    TokenKind::ShiftLeft
                }
            }
            Some('=') => {
                self.advance_char();
                TokenKind::LessEqual
            }
            _ => TokenKind::Less,
        }
    }

    /// `<...>` with no `<` or `>` inside.
    fn scan_angle_header(&self, start: usize) -> Option<usize> {
        let bytes = self.input.as_bytes();
        let mut i = start + 1;
        let mut content = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'<' => return None,
                b'>' => return (content > 0).then_some(i + 1),
                _ => {
                    content += 1;
                    i += 1;
                }
            }
        }
        None
    }

    /// Integer and floating constants. Suffix characters are consumed into the lexeme but do not
    /// contribute to the value.
    fn number(&mut self) -> ConstValue {
        let start = self.position;

        // Hexadecimal.
        if self.byte_at(start) == Some(b'0')
            && matches!(self.byte_at(start + 1), Some(b'x' | b'X'))
            && self.byte_at(start + 2).is_some_and(|b| b.is_ascii_hexdigit())
        {
            self.position = start + 2;
            while self
                .byte_at(self.position)
                .is_some_and(|b| b.is_ascii_hexdigit())
            {
                self.position += 1;
            }
            let digits_end = self.position;
            self.eat_suffix(b"uUlL");
            return ConstValue::Int(parse_int(&self.input[start + 2..digits_end], 16));
        }

        while self.byte_at(self.position).is_some_and(|b| b.is_ascii_digit()) {
            self.position += 1;
        }
        let mut is_float = false;
        if self.byte_at(self.position) == Some(b'.') {
            is_float = true;
            self.position += 1;
            while self.byte_at(self.position).is_some_and(|b| b.is_ascii_digit()) {
                self.position += 1;
            }
        }
        if matches!(self.byte_at(self.position), Some(b'e' | b'E')) {
            let mut lookahead = self.position + 1;
            if matches!(self.byte_at(lookahead), Some(b'+' | b'-')) {
                lookahead += 1;
            }
            if self.byte_at(lookahead).is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                self.position = lookahead;
                while self.byte_at(self.position).is_some_and(|b| b.is_ascii_digit()) {
                    self.position += 1;
                }
            }
        }

        let digits_end = self.position;
        if is_float {
            self.eat_suffix(b"fFlL");
            ConstValue::Float(self.input[start..digits_end].parse().unwrap_or(0.0))
        } else {
            self.eat_suffix(b"uUlL");
            let digits = &self.input[start..digits_end];
            let radix = if digits.len() > 1
                && digits.starts_with('0')
                && digits.bytes().all(|b| (b'0'..=b'7').contains(&b))
            {
                8
            } else {
                10
            };
            ConstValue::Int(parse_int(digits, radix))
        }
    }

    fn eat_suffix(&mut self, allowed: &[u8]) {
        while self
            .byte_at(self.position)
            .is_some_and(|b| allowed.contains(&b))
        {
            self.position += 1;
        }
    }
}

fn parse_int(digits: &str, radix: u32) -> i64 {
    u64::from_str_radix(digits, radix)
        .map(|value| value as i64)
        .unwrap_or(i64::MAX)
}

fn char_literal_value(content: &str) -> i64 {
    let mut chars = content.chars();
    match chars.next() {
        Some('\\') => match chars.next() {
            Some('n') => b'\n' as i64,
            Some('t') => b'\t' as i64,
            Some('r') => b'\r' as i64,
            Some('0') => 0,
            Some('a') => 0x07,
            Some('b') => 0x08,
            Some('f') => 0x0c,
            Some('v') => 0x0b,
            Some(other) => other as i64,
            None => 0,
        },
        Some(char) => char as i64,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use cpre_foundation::source::{SourceFile, SourceFileSet};

    use super::*;

    fn lex(input: &str) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut files = SourceFileSet::new();
        let file = files.add(SourceFile::new(
            "test.c".into(),
            "test.c".into(),
            input.into(),
        ));
        let mut diagnostics = vec![];
        let tokens = Lexer::new(file, input, 1)
            .tokenize(&mut diagnostics)
            .expect("input is expected to tokenize");
        (tokens, diagnostics)
    }

    fn kinds(input: &str) -> Vec<TokenKind> {
        lex(input).0.into_iter().map(|token| token.kind).collect()
    }

    #[test]
    fn directives_are_recognized_by_spelling() {
        assert_eq!(
            kinds("#define X 1\n"),
            vec![
                TokenKind::Define,
                TokenKind::Ident,
                TokenKind::Constant,
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ]
        );
        assert_eq!(
            kinds("#warning something\n")[0],
            TokenKind::Directive,
            "unknown #directives lex to the generic kind"
        );
        // `#` and the name must be adjacent.
        assert_eq!(
            kinds("# define\n")[..2],
            [TokenKind::Hash, TokenKind::Ident]
        );
    }

    #[test]
    fn defined_and_pragma_operator_are_keywords() {
        assert_eq!(
            kinds("defined _Pragma other\n")[..3],
            [TokenKind::Defined, TokenKind::PragmaOp, TokenKind::Ident]
        );
    }

    #[test]
    fn call_paren_requires_no_preceding_whitespace() {
        assert_eq!(
            kinds("F(x)\n")[..2],
            [TokenKind::Ident, TokenKind::CallParen]
        );
        assert_eq!(
            kinds("F (x)\n")[..2],
            [TokenKind::Ident, TokenKind::LeftParen]
        );
    }

    #[test]
    fn endif_underflow_is_fatal() {
        let mut files = SourceFileSet::new();
        let input = "#endif\n";
        let file = files.add(SourceFile::new("t.c".into(), "t.c".into(), input.into()));
        let result = Lexer::new(file, input, 1).tokenize(&mut ());
        assert!(matches!(result, Err(LexError::UnbalancedEndif { .. })));
    }

    #[test]
    fn balanced_conditionals_tokenize() {
        let (tokens, _) = lex("#if 1\n#endif\n");
        assert_eq!(tokens[0].kind, TokenKind::If);
    }

    #[test]
    fn angle_header_names_beat_comparison_operators() {
        assert_eq!(kinds("<stdio.h>\n")[0], TokenKind::HeaderName);
        // No closing `>` before another `<`: plain operators.
        assert_eq!(kinds("a << b\n")[1], TokenKind::ShiftLeft);
    }

    #[test]
    fn quoted_text_lexes_as_header_name_and_falls_back_to_string() {
        assert_eq!(kinds("\"file.h\"\n")[0], TokenKind::HeaderName);
        // Escapes disqualify the header form.
        assert_eq!(kinds("\"a\\\"b\"\n")[0], TokenKind::StringLit);
        assert_eq!(kinds("L\"wide\"\n")[0], TokenKind::StringLit);
        // Unterminated: a lone quote token, and lexing continues.
        assert_eq!(
            kinds("\"abc\n")[..3],
            [TokenKind::DoubleQuote, TokenKind::Ident, TokenKind::Newline]
        );
    }

    #[test]
    fn integer_constants_carry_values() {
        let (tokens, _) = lex("42 0x2A 052 1UL\n");
        let values: Vec<_> = tokens
            .iter()
            .filter_map(|token| token.value)
            .collect();
        assert_eq!(
            values,
            vec![
                ConstValue::Int(42),
                ConstValue::Int(42),
                ConstValue::Int(42),
                ConstValue::Int(1),
            ]
        );
    }

    #[test]
    fn float_constants_carry_values() {
        let (tokens, _) = lex("123. .5 1e10 2.5e-1f\n");
        let values: Vec<_> = tokens
            .iter()
            .filter_map(|token| token.value)
            .collect();
        assert_eq!(
            values,
            vec![
                ConstValue::Float(123.0),
                ConstValue::Float(0.5),
                ConstValue::Float(1e10),
                ConstValue::Float(0.25),
            ]
        );
    }

    #[test]
    fn char_literals_are_constants() {
        let (tokens, _) = lex("'A' '\\n'\n");
        assert_eq!(tokens[0].value, Some(ConstValue::Int(65)));
        assert_eq!(tokens[1].value, Some(ConstValue::Int(10)));
    }

    #[test]
    fn newline_runs_collapse_into_one_token_and_track_lines() {
        let (tokens, _) = lex("a\n\n\nb\n");
        assert_eq!(tokens[1].kind, TokenKind::Newline);
        assert_eq!(tokens[2].line, 4, "b is on line 4");
    }

    #[test]
    fn illegal_characters_are_reported_and_skipped() {
        let (tokens, diagnostics) = lex("a $ b\n");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn operator_zoo() {
        assert_eq!(
            kinds("... <<= >>= += -> ## && || == !=\n")[..10],
            [
                TokenKind::Ellipsis,
                TokenKind::LeftAssign,
                TokenKind::RightAssign,
                TokenKind::AddAssign,
                TokenKind::Arrow,
                TokenKind::HashHash,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Equal,
                TokenKind::NotEqual,
            ]
        );
    }
}
