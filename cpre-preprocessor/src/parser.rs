//! The directive grammar and its semantic actions.
//!
//! The driver walks the token stream of one buffer and produces preprocessed text. Directives
//! execute only while the parser is in [`Mode::Execute`]; inside a conditional branch the parser
//! switches to [`Mode::Passthrough`] and re-emits directives verbatim, so that they take effect
//! during the re-scan of the selected branch rather than on first sight.

use cpre_foundation::{
    errors::{Diagnostic, Label},
    source::SourceFileId,
};
use cpre_lexer::token::{Token, TokenKind};
use tracing::trace;

use crate::{
    expr::Evaluator,
    macros::{BuiltinContext, Macro},
    PreprocessError, Preprocessor,
};

/// Whether directives are executed where they stand, or re-emitted for a later re-scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Execute,
    Passthrough,
}

pub(crate) struct Parser<'a> {
    file: SourceFileId,
    buffer: &'a str,
    tokens: Vec<Token>,
    position: usize,
    debug: bool,
}

impl<'a> Parser<'a> {
    pub fn new(file: SourceFileId, buffer: &'a str, tokens: Vec<Token>, debug: bool) -> Self {
        Self {
            file,
            buffer,
            tokens,
            position: 0,
            debug,
        }
    }

    fn peek(&self) -> Token {
        self.tokens
            .get(self.position)
            .copied()
            .unwrap_or_else(|| *self.tokens.last().expect("token stream ends with EndOfFile"))
    }

    fn advance(&mut self) -> Token {
        let token = self.peek();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn text(&self, token: &Token) -> &'a str {
        token.text(self.buffer)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, PreprocessError> {
        let token = self.peek();
        if token.kind == kind {
            Ok(self.advance())
        } else {
            Err(self.syntax_error(
                &token,
                format!("{} expected, but got {}", kind.name(), token.kind.name()),
            ))
        }
    }

    fn expect_newline(&mut self) -> Result<(), PreprocessError> {
        self.expect(TokenKind::Newline).map(|_| ())
    }

    fn syntax_error(&self, token: &Token, message: impl Into<String>) -> PreprocessError {
        PreprocessError::Syntax {
            line: token.line,
            message: message.into(),
        }
    }

    /// `preprocessing_file := group?`
    pub fn parse_file(&mut self, engine: &mut Preprocessor) -> Result<String, PreprocessError> {
        let output = self.parse_group(engine, Mode::Execute)?;
        let trailing = self.peek();
        if trailing.kind != TokenKind::EndOfFile {
            return Err(self.syntax_error(
                &trailing,
                format!(
                    "{} without a matching conditional section",
                    trailing.kind.name()
                ),
            ));
        }
        Ok(output)
    }

    /// `group := group_part+`, ending at the close of the surrounding conditional section.
    fn parse_group(
        &mut self,
        engine: &mut Preprocessor,
        mode: Mode,
    ) -> Result<String, PreprocessError> {
        let mut output = String::new();
        loop {
            let token = self.peek();
            engine.current_line = token.line;
            match token.kind {
                TokenKind::EndOfFile
                | TokenKind::Elif
                | TokenKind::Else
                | TokenKind::Endif => break,
                kind if kind.opens_conditional() => {
                    output.push_str(&self.parse_if_section(engine, mode)?);
                }
                kind if kind.is_control_directive() => {
                    output.push_str(&self.parse_control_line(engine, mode)?);
                }
                TokenKind::Directive => {
                    // A conditionally supported directive: recognized, skipped, replaced by its
                    // newline.
                    if self.debug {
                        trace!(line = token.line, directive = self.text(&token), "skipping");
                    }
                    self.skip_line();
                    output.push('\n');
                }
                _ => output.push_str(&self.parse_text_line(engine)?),
            }
        }
        Ok(output)
    }

    fn skip_line(&mut self) {
        loop {
            match self.peek().kind {
                TokenKind::EndOfFile => break,
                TokenKind::Newline => {
                    self.advance();
                    break;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// A line of ordinary tokens. Defined macro names are replaced by their expansions; the
    /// tokens are joined by single spaces and the newline run is kept as-is.
    fn parse_text_line(&mut self, engine: &mut Preprocessor) -> Result<String, PreprocessError> {
        let pieces = self.parse_token_pieces(engine)?;
        let mut line = pieces.join(" ");
        match self.peek().kind {
            TokenKind::Newline => {
                let newline = self.advance();
                line.push_str(self.text(&newline));
            }
            _ => {}
        }
        if self.debug {
            trace!(text = line.trim_end(), "text_line");
        }
        Ok(line)
    }

    /// The shared `token_list` rule: everything up to (not including) the newline, with defined
    /// macro names expanded.
    fn parse_token_pieces(
        &mut self,
        engine: &mut Preprocessor,
    ) -> Result<Vec<String>, PreprocessError> {
        let mut pieces = Vec::new();
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::Newline | TokenKind::EndOfFile => return Ok(pieces),
                TokenKind::Ident => {
                    self.advance();
                    let name = self.text(&token);
                    if engine.macros.contains(name) {
                        pieces.push(engine.expand_at(name, None, token.line)?);
                    } else {
                        pieces.push(name.to_owned());
                    }
                }
                _ => {
                    self.advance();
                    pieces.push(self.text(&token).to_owned());
                }
            }
        }
    }

    /// `control_line := directive NEWLINE`; contributes a single newline to the output in
    /// execute mode, and the verbatim directive text in passthrough mode.
    fn parse_control_line(
        &mut self,
        engine: &mut Preprocessor,
        mode: Mode,
    ) -> Result<String, PreprocessError> {
        let directive = self.advance();
        if self.debug {
            trace!(line = directive.line, kind = directive.kind.name(), "control_line");
        }
        let mut output = match directive.kind {
            TokenKind::Define => self.parse_define(engine, mode)?,
            TokenKind::Undef => self.parse_undef(engine, mode)?,
            TokenKind::Error => self.parse_error_directive(engine, mode, &directive)?,
            TokenKind::Include => self.parse_include(engine, mode)?,
            TokenKind::Line => self.parse_line_directive(engine, mode)?,
            TokenKind::Pragma => self.parse_pragma(engine, mode)?,
            TokenKind::PragmaOp => self.parse_pragma_operator(engine, mode)?,
            kind => {
                return Err(self.syntax_error(
                    &directive,
                    format!("{} is not a control directive", kind.name()),
                ))
            }
        };
        self.expect_newline()?;
        output.push('\n');
        Ok(output)
    }

    fn parse_define(
        &mut self,
        engine: &mut Preprocessor,
        mode: Mode,
    ) -> Result<String, PreprocessError> {
        let name_token = self.expect(TokenKind::Ident)?;
        let name = self.text(&name_token).to_owned();

        // Only a paren with no whitespace before it introduces a parameter list;
        // `#define F (x)` defines an object-like macro whose replacement starts with `(`.
        let mut params = None;
        let mut variadic = false;
        if self.peek().kind == TokenKind::CallParen {
            self.advance();
            let (parsed_params, parsed_variadic) = self.parse_macro_params()?;
            params = Some(parsed_params);
            variadic = parsed_variadic;
        }

        let replacement = self.parse_token_pieces(engine)?.join(" ");

        match mode {
            Mode::Execute => {
                let definition = match params {
                    Some(params) => Macro::function(&name, replacement, params, variadic),
                    None => Macro::object(&name, replacement),
                };
                if engine.macros.define(definition).is_some() {
                    engine.diagnostics.push(
                        Diagnostic::warning(self.file, format!("macro `{name}` is redefined"))
                            .with_label(Label::primary(
                                name_token.span,
                                "this definition replaces the previous one",
                            )),
                    );
                }
                Ok(String::new())
            }
            Mode::Passthrough => {
                let mut text = format!("#define {name}");
                if let Some(params) = &params {
                    text.push('(');
                    text.push_str(&params.join(","));
                    if variadic {
                        if !params.is_empty() {
                            text.push(',');
                        }
                        text.push_str("...");
                    }
                    text.push(')');
                }
                if !replacement.is_empty() {
                    text.push(' ');
                    text.push_str(&replacement);
                }
                Ok(text)
            }
        }
    }

    /// The parameter list variants: `()`, `(a, b)`, `(...)`, `(a, b, ...)`.
    fn parse_macro_params(&mut self) -> Result<(Vec<String>, bool), PreprocessError> {
        let mut params = Vec::new();
        match self.peek().kind {
            TokenKind::RightParen => {
                self.advance();
                return Ok((params, false));
            }
            TokenKind::Ellipsis => {
                self.advance();
                self.expect(TokenKind::RightParen)?;
                return Ok((params, true));
            }
            _ => {}
        }
        loop {
            let param = self.expect(TokenKind::Ident)?;
            params.push(self.text(&param).to_owned());
            match self.peek().kind {
                TokenKind::Comma => {
                    self.advance();
                    if self.peek().kind == TokenKind::Ellipsis {
                        self.advance();
                        self.expect(TokenKind::RightParen)?;
                        return Ok((params, true));
                    }
                }
                TokenKind::RightParen => {
                    self.advance();
                    return Ok((params, false));
                }
                _ => {
                    let token = self.peek();
                    return Err(self.syntax_error(
                        &token,
                        format!("`,` or `)` expected, but got {}", token.kind.name()),
                    ));
                }
            }
        }
    }

    fn parse_undef(
        &mut self,
        engine: &mut Preprocessor,
        mode: Mode,
    ) -> Result<String, PreprocessError> {
        let name_token = self.expect(TokenKind::Ident)?;
        let name = self.text(&name_token);
        match mode {
            Mode::Execute => {
                engine.macros.undef(name);
                Ok(String::new())
            }
            Mode::Passthrough => Ok(format!("#undef {name}")),
        }
    }

    fn parse_error_directive(
        &mut self,
        engine: &mut Preprocessor,
        mode: Mode,
        directive: &Token,
    ) -> Result<String, PreprocessError> {
        let message = self.parse_token_pieces(engine)?.join(" ");
        match mode {
            Mode::Execute => Err(PreprocessError::ErrorDirective {
                line: directive.line,
                message,
            }),
            Mode::Passthrough => {
                if message.is_empty() {
                    Ok("#error".to_owned())
                } else {
                    Ok(format!("#error {message}"))
                }
            }
        }
    }

    fn parse_include(
        &mut self,
        engine: &mut Preprocessor,
        mode: Mode,
    ) -> Result<String, PreprocessError> {
        // The argument goes through the ordinary token list, so `#include WHERE` works when
        // WHERE expands to a header name.
        let argument = self.parse_token_pieces(engine)?.join(" ");
        match mode {
            Mode::Execute => engine.include(&argument),
            Mode::Passthrough => Ok(format!("#include {argument}")),
        }
    }

    fn parse_line_directive(
        &mut self,
        engine: &mut Preprocessor,
        mode: Mode,
    ) -> Result<String, PreprocessError> {
        let arguments = self.parse_token_pieces(engine)?.join(" ");
        match mode {
            Mode::Execute => {
                engine.update_line_info(&arguments);
                Ok(String::new())
            }
            Mode::Passthrough => Ok(format!("#line {arguments}")),
        }
    }

    fn parse_pragma(
        &mut self,
        engine: &mut Preprocessor,
        mode: Mode,
    ) -> Result<String, PreprocessError> {
        let arguments = self.parse_token_pieces(engine)?.join(" ");
        match mode {
            Mode::Execute => {
                engine.pragma(&arguments);
                Ok(String::new())
            }
            Mode::Passthrough => {
                if arguments.is_empty() {
                    Ok("#pragma".to_owned())
                } else {
                    Ok(format!("#pragma {arguments}"))
                }
            }
        }
    }

    fn parse_pragma_operator(
        &mut self,
        engine: &mut Preprocessor,
        mode: Mode,
    ) -> Result<String, PreprocessError> {
        let open = self.peek();
        if !open.kind.is_left_paren() {
            return Err(self.syntax_error(
                &open,
                format!("`(` expected, but got {}", open.kind.name()),
            ));
        }
        self.advance();
        let literal = self.peek();
        let text = match literal.kind {
            // A plain quoted argument lexes as a header name, an escaped one as a string.
            TokenKind::StringLit | TokenKind::HeaderName => {
                self.advance();
                self.text(&literal).to_owned()
            }
            kind => {
                return Err(self.syntax_error(
                    &literal,
                    format!("string literal expected, but got {}", kind.name()),
                ))
            }
        };
        self.expect(TokenKind::RightParen)?;
        match mode {
            Mode::Execute => {
                engine.pragma(&text);
                Ok(String::new())
            }
            Mode::Passthrough => Ok(format!("_Pragma({text})")),
        }
    }

    /// `if_section := if_group elif_group* else_group? endif_line`
    ///
    /// Branch bodies always parse in passthrough mode. The selected branch's text (or a lone
    /// newline when nothing is selected) is re-scanned here when this section itself executes;
    /// inside an outer branch it flows upward as text for the outer section's re-scan.
    fn parse_if_section(
        &mut self,
        engine: &mut Preprocessor,
        mode: Mode,
    ) -> Result<String, PreprocessError> {
        let intro = self.advance();
        if self.debug {
            trace!(line = intro.line, kind = intro.kind.name(), "if_section");
        }

        let condition = self.parse_condition(engine, &intro)?;
        let body = self.parse_group(engine, Mode::Passthrough)?;
        let mut selected = condition.then_some(body);

        let mut seen_else = false;
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::Elif => {
                    self.advance();
                    if seen_else {
                        return Err(self.syntax_error(&token, "#elif cannot follow #else"));
                    }
                    // The condition is evaluated even when an earlier branch was already
                    // selected.
                    let condition = self.parse_if_condition(engine, &token)?;
                    let body = self.parse_group(engine, Mode::Passthrough)?;
                    if condition && selected.is_none() {
                        selected = Some(body);
                    }
                }
                TokenKind::Else => {
                    self.advance();
                    if seen_else {
                        return Err(self.syntax_error(&token, "#else cannot follow #else"));
                    }
                    seen_else = true;
                    self.expect_newline()?;
                    let body = self.parse_group(engine, Mode::Passthrough)?;
                    if selected.is_none() {
                        selected = Some(body);
                    }
                }
                TokenKind::Endif => {
                    self.advance();
                    self.expect_newline()?;
                    break;
                }
                _ => {
                    return Err(self.syntax_error(
                        &intro,
                        "this conditional section is missing its #endif",
                    ));
                }
            }
        }

        let section = selected.unwrap_or_else(|| "\n".to_owned());
        match mode {
            Mode::Execute => engine.rescan(&section, intro.line),
            Mode::Passthrough => Ok(section),
        }
    }

    fn parse_condition(
        &mut self,
        engine: &mut Preprocessor,
        intro: &Token,
    ) -> Result<bool, PreprocessError> {
        match intro.kind {
            TokenKind::If => self.parse_if_condition(engine, intro),
            TokenKind::Ifdef | TokenKind::Ifndef => {
                let name_token = self.expect(TokenKind::Ident)?;
                let defined = engine.macros.contains(self.text(&name_token));
                self.expect_newline()?;
                Ok(if intro.kind == TokenKind::Ifndef {
                    !defined
                } else {
                    defined
                })
            }
            kind => Err(self.syntax_error(
                intro,
                format!("{} does not open a conditional section", kind.name()),
            )),
        }
    }

    /// Collects the constant expression up to the end of the line and evaluates it against the
    /// current macro environment.
    fn parse_if_condition(
        &mut self,
        engine: &mut Preprocessor,
        directive: &Token,
    ) -> Result<bool, PreprocessError> {
        let start = self.position;
        while !matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::EndOfFile
        ) {
            self.advance();
        }
        let condition = &self.tokens[start..self.position];
        let context = BuiltinContext {
            file: &engine.current_file,
            line: directive.line,
        };
        let value = Evaluator::new(&engine.macros, context, self.file)
            .evaluate(self.buffer, condition)?;
        self.expect_newline()?;
        if self.debug {
            trace!(line = directive.line, value, "condition");
        }
        Ok(value != 0)
    }
}
