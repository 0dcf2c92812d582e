use std::fmt;

use cpre_foundation::source::{Span, Spanned};

/// Passes all the token kinds as a sequence of `Kind = "name",` into the provided macro.
#[macro_export]
macro_rules! expand_token_kinds {
    ($x:path) => {
        $x! {
            // Directive introducers, recognized by exact spelling.
            Define  = "`#define`",
            Elif    = "`#elif`",
            Else    = "`#else`",
            Endif   = "`#endif`",
            Error   = "`#error`",
            If      = "`#if`",
            Ifdef   = "`#ifdef`",
            Ifndef  = "`#ifndef`",
            Include = "`#include`",
            Line    = "`#line`",
            Pragma  = "`#pragma`",
            Undef   = "`#undef`",
            // Keyword identifiers.
            Defined  = "`defined`",
            PragmaOp = "`_Pragma`",
            // Any other `#identifier`.
            Directive = "directive",

            Ident      = "identifier",
            Constant   = "constant",
            StringLit  = "string literal",
            HeaderName = "header name",
            Newline    = "newline",

            Ellipsis     = "`...`",
            LeftAssign   = "`<<=`",
            RightAssign  = "`>>=`",
            AddAssign    = "`+=`",
            SubAssign    = "`-=`",
            MulAssign    = "`*=`",
            DivAssign    = "`/=`",
            ModAssign    = "`%=`",
            AndAssign    = "`&=`",
            XorAssign    = "`^=`",
            OrAssign     = "`|=`",
            ShiftLeft    = "`<<`",
            ShiftRight   = "`>>`",
            Inc          = "`++`",
            Dec          = "`--`",
            Arrow        = "`->`",
            And          = "`&&`",
            Or           = "`||`",
            LessEqual    = "`<=`",
            GreaterEqual = "`>=`",
            Equal        = "`==`",
            NotEqual     = "`!=`",
            HashHash     = "`##`",

            // A `(` not preceded by whitespace; distinguishes `F(x)` from `F (x)` after `#define`.
            CallParen    = "`(`",
            LeftParen    = "`(`",
            RightParen   = "`)`",
            LeftBracket  = "`[`",
            RightBracket = "`]`",
            LeftBrace    = "`{`",
            RightBrace   = "`}`",
            Semi         = "`;`",
            Comma        = "`,`",
            Colon        = "`:`",
            Dot          = "`.`",
            Assign       = "`=`",
            BitAnd       = "`&`",
            BitOr        = "`|`",
            BitXor       = "`^`",
            BitNot       = "`~`",
            Not          = "`!`",
            Add          = "`+`",
            Sub          = "`-`",
            Mul          = "`*`",
            Div          = "`/`",
            Rem          = "`%`",
            Less         = "`<`",
            Greater      = "`>`",
            Question     = "`?`",
            DoubleQuote  = "`\"`",
            At           = "`@`",
            Hash         = "`#`",

            EndOfFile = "end of file",
        }
    };
}

macro_rules! token_kind_enum {
    ($($name:tt = $pretty_name:tt),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
        pub enum TokenKind {
            $($name),*
        }

        impl TokenKind {
            /// The user-facing name of the token kind, for diagnostics.
            pub fn name(&self) -> &'static str {
                match self {
                    $(TokenKind::$name => $pretty_name),*
                }
            }
        }
    }
}

expand_token_kinds!(token_kind_enum);

impl TokenKind {
    /// `#if`, `#ifdef` and `#ifndef` - the directives that open a conditional section.
    pub fn opens_conditional(&self) -> bool {
        matches!(self, TokenKind::If | TokenKind::Ifdef | TokenKind::Ifndef)
    }

    /// The directives that make up a `control_line` in the grammar.
    pub fn is_control_directive(&self) -> bool {
        matches!(
            self,
            TokenKind::Define
                | TokenKind::Error
                | TokenKind::Include
                | TokenKind::Line
                | TokenKind::Pragma
                | TokenKind::PragmaOp
                | TokenKind::Undef
        )
    }

    /// Either spelling of `(`.
    pub fn is_left_paren(&self) -> bool {
        matches!(self, TokenKind::CallParen | TokenKind::LeftParen)
    }
}

/// Maps the exact spelling of a `#identifier` to its directive kind.
pub fn directive_kind(spelling: &str) -> Option<TokenKind> {
    Some(match spelling {
        "#define" => TokenKind::Define,
        "#elif" => TokenKind::Elif,
        "#else" => TokenKind::Else,
        "#endif" => TokenKind::Endif,
        "#error" => TokenKind::Error,
        "#if" => TokenKind::If,
        "#ifdef" => TokenKind::Ifdef,
        "#ifndef" => TokenKind::Ifndef,
        "#include" => TokenKind::Include,
        "#line" => TokenKind::Line,
        "#pragma" => TokenKind::Pragma,
        "#undef" => TokenKind::Undef,
        _ => return None,
    })
}

/// The numeric value carried by a `Constant` token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
}

impl ConstValue {
    /// The value as used by `#if` arithmetic; floats truncate.
    pub fn as_int(&self) -> i64 {
        match *self {
            ConstValue::Int(value) => value,
            ConstValue::Float(value) => value as i64,
        }
    }
}

/// A single preprocessing token. The lexeme is not stored; it is a span into the buffer the
/// token was scanned from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// 1-based line the token starts on.
    pub line: u32,
    /// Evaluated value, for `Constant` tokens.
    pub value: Option<ConstValue>,
}

impl Token {
    /// Returns the slice of `buffer` this token was scanned from.
    pub fn text<'a>(&self, buffer: &'a str) -> &'a str {
        self.span.get_input(buffer)
    }
}

impl Spanned for Token {
    fn span(&self) -> Span {
        self.span
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
