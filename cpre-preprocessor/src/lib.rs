//! The C99 preprocessor engine.
//!
//! [`Preprocessor`] drives the translation phases that precede compilation proper: trigraph and
//! digraph replacement, line splicing, comment stripping, and tokenization with directive
//! execution. The output is preprocessed text a C front-end can parse.
//!
//! Note that this preprocessor does not strive for 100% conformance. Macro parameters are
//! substituted textually rather than token by token, function-like macros cannot be invoked from
//! ordinary text lines, and `#`/`##` are recognized but not honored during expansion. Enough is
//! supported to push realistic headers through the pipeline.

pub mod macros;

mod expr;
mod include;
mod parser;

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    rc::Rc,
};

use cpre_foundation::{
    errors::Diagnostic,
    source::{SourceFile, SourceFileSet},
};
use cpre_lexer::{
    lexer::{LexError, Lexer},
    phases,
};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::parser::Parser;

pub use crate::macros::{Builtin, BuiltinContext, Macro, MacroError, MacroTable};

/// A fatal preprocessing failure. The whole translation unit is abandoned; no partial output is
/// produced.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("cannot read source file at {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Macro(#[from] MacroError),
    #[error("line {line}: {message}")]
    Syntax { line: u32, message: String },
    #[error("#error: {message}")]
    ErrorDirective { line: u32, message: String },
    #[error("malformed #include argument: {argument}")]
    MalformedInclude { argument: String },
    #[error("{name} doesn't resolve to an existing file")]
    HeaderNotFound { name: String },
    #[error("{path:?} includes itself")]
    IncludeCycle { path: PathBuf },
    #[error("line {line}: division by zero in a constant expression")]
    DivisionByZero { line: u32 },
    #[error("line {line}: shift by {amount} is out of range")]
    BadShift { line: u32, amount: i64 },
}

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directories searched for `<...>` includes, and the fallback for `"..."` includes that are
    /// not next to the including file.
    pub stdlib_path: Vec<PathBuf>,
    /// Leave comments in the buffer instead of replacing each with a space.
    pub keep_comments: bool,
    /// Trace grammar-rule reductions as they happen.
    pub debug: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            stdlib_path: vec![PathBuf::from("stdlib/")],
            keep_comments: true,
            debug: false,
        }
    }
}

/// The engine facade: owns the macro table, the header cache, and the diagnostics collected
/// while preprocessing one translation unit.
pub struct Preprocessor {
    options: Options,
    macros: MacroTable,
    headers: HashMap<String, String>,
    include_stack: Vec<PathBuf>,
    current_file: PathBuf,
    current_line: u32,
    source_files: SourceFileSet,
    diagnostics: Vec<Diagnostic>,
}

impl Preprocessor {
    pub fn new(options: Options) -> Self {
        let mut macros = MacroTable::new();
        macros.define(Macro::builtin("__DATE__", Builtin::Date));
        macros.define(Macro::builtin("__FILE__", Builtin::File));
        macros.define(Macro::builtin("__LINE__", Builtin::Line));
        macros.define(Macro::builtin("__TIME__", Builtin::Time));
        Self {
            options,
            macros,
            headers: HashMap::new(),
            include_stack: Vec::new(),
            current_file: PathBuf::new(),
            current_line: 1,
            source_files: SourceFileSet::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    /// The recoverable problems found so far; fatal ones surface as [`PreprocessError`]s instead.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// All buffers registered while preprocessing, for rendering [`Self::diagnostics`].
    pub fn source_files(&self) -> &SourceFileSet {
        &self.source_files
    }

    /// Preprocesses the translation unit rooted at `path` and returns its text.
    pub fn process(&mut self, path: impl AsRef<Path>) -> Result<String, PreprocessError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "preprocessing");
        let source = fs::read_to_string(path).map_err(|source| PreprocessError::Io {
            path: path.to_owned(),
            source,
        })?;
        self.current_file = path.to_owned();
        let filtered = phases::apply(&source, self.options.keep_comments);
        let output = self.preprocess_buffer(&filtered, path.display().to_string(), 1)?;
        Ok(terminated(output))
    }

    /// Preprocesses in-memory text, as if `name` were a file with that content.
    pub fn process_text(&mut self, name: &str, text: &str) -> Result<String, PreprocessError> {
        self.current_file = PathBuf::from(name);
        let filtered = phases::apply(text, self.options.keep_comments);
        let output = self.preprocess_buffer(&filtered, name.to_owned(), 1)?;
        Ok(terminated(output))
    }

    /// Registers a macro directly, the way `#define` would.
    pub fn define_macro(&mut self, definition: Macro) {
        let name = definition.name.clone();
        if self.macros.define(definition).is_some() {
            warn!(name, "macro redefined");
        }
    }

    /// Removes a macro, the way `#undef` would. Unknown names are a no-op.
    pub fn undef_macro(&mut self, name: &str) -> Option<Macro> {
        self.macros.undef(name)
    }

    /// Expands a macro by name. Expanding an undefined name is an error; a macro that is already
    /// in the middle of an expansion comes back unexpanded.
    pub fn expand_macro(
        &self,
        name: &str,
        args: Option<&[String]>,
    ) -> Result<String, PreprocessError> {
        self.expand_at(name, args, self.current_line)
    }

    pub(crate) fn expand_at(
        &self,
        name: &str,
        args: Option<&[String]>,
        line: u32,
    ) -> Result<String, PreprocessError> {
        let found = self.macros.get(name).ok_or_else(|| MacroError::Undefined {
            name: name.to_owned(),
        })?;
        if found.is_expanding() {
            return Ok(name.to_owned());
        }
        let context = BuiltinContext {
            file: &self.current_file,
            line,
        };
        let _guard = found.expansion_guard();
        Ok(found.expand(args, &context)?)
    }

    fn preprocess_buffer(
        &mut self,
        buffer: &str,
        name: String,
        start_line: u32,
    ) -> Result<String, PreprocessError> {
        let file = self.source_files.add(SourceFile::new(
            name,
            self.current_file.clone(),
            Rc::from(buffer),
        ));
        let tokens = Lexer::new(file, buffer, start_line).tokenize(&mut self.diagnostics)?;
        Parser::new(file, buffer, tokens, self.options.debug).parse_file(self)
    }

    /// Re-parses the text of a selected conditional branch through a fresh lexer, so that the
    /// directives re-emitted into it finally execute.
    pub(crate) fn rescan(&mut self, text: &str, line: u32) -> Result<String, PreprocessError> {
        if text.is_empty() {
            return Ok(String::new());
        }
        let name = format!("{}:{} (re-scan)", self.current_file.display(), line);
        self.preprocess_buffer(text, name, line)
    }

    /// `#pragma` and `_Pragma` hook; recognized but deliberately inert.
    pub(crate) fn pragma(&mut self, directive: &str) {
        trace!(directive, "ignoring #pragma");
    }

    /// `#line` hook; recognized but deliberately inert.
    pub(crate) fn update_line_info(&mut self, arguments: &str) {
        trace!(arguments, "ignoring #line");
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

/// The translation unit's text always ends with a newline, even when everything in it was
/// preprocessed away.
fn terminated(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use cpre_foundation::errors::Severity;
    use indoc::indoc;

    use super::*;

    fn engine() -> Preprocessor {
        Preprocessor::new(Options {
            keep_comments: false,
            ..Options::default()
        })
    }

    fn preprocess(text: &str) -> String {
        engine()
            .process_text("test.c", text)
            .expect("input is expected to preprocess")
    }

    #[test]
    fn object_macro_substitutes_in_text() {
        assert_eq!(preprocess("#define FOO 1\nFOO\n"), "\n1\n");
    }

    #[test]
    fn if_selects_by_constant_expression() {
        let output = preprocess(indoc! {"
            #define A 2
            #if A == 2
            YES
            #else
            NO
            #endif
        "});
        assert!(output.contains("YES"));
        assert!(!output.contains("NO"));
    }

    #[test]
    fn ifndef_guard_defines_once() {
        let output = preprocess(indoc! {"
            #ifndef X
            #define X
            BODY
            #endif
            #ifndef X
            AGAIN
            #endif
        "});
        assert!(output.contains("BODY"));
        assert!(!output.contains("AGAIN"));
    }

    #[test]
    fn missing_include_is_fatal() {
        let result = engine().process_text("test.c", "#include \"missing.h\"\n");
        assert!(matches!(result, Err(PreprocessError::HeaderNotFound { name }) if name == "missing.h"));
    }

    #[test]
    fn trigraphs_apply_before_directives() {
        assert_eq!(preprocess("??=define X 1\nX\n"), "\n1\n");
    }

    #[test]
    fn error_directive_in_dead_branch_does_not_fire() {
        let output = preprocess(indoc! {"
            #if 1
            #if 0
            #error should_not_fire
            #endif
            OK
            #endif
        "});
        assert!(output.contains("OK"));
    }

    #[test]
    fn unbalanced_endif_is_a_lexical_error() {
        let result = engine().process_text("test.c", "int x;\n#endif\n");
        assert!(matches!(result, Err(PreprocessError::Lex(_))));
    }

    #[test]
    fn missing_endif_is_a_syntax_error() {
        let result = engine().process_text("test.c", "#if 1\nX\n");
        assert!(matches!(result, Err(PreprocessError::Syntax { .. })));
    }

    #[test]
    fn error_directive_carries_its_message() {
        let result = engine().process_text("test.c", "#error bad things happened\n");
        match result {
            Err(PreprocessError::ErrorDirective { message, line }) => {
                assert_eq!(message, "bad things happened");
                assert_eq!(line, 1);
            }
            other => panic!("expected an #error failure, got {other:?}"),
        }
    }

    #[test]
    fn disabled_block_collapses_to_one_newline() {
        assert_eq!(
            preprocess("#if 0\nsome\ncontent\nhere\n#endif\nafter\n"),
            "\nafter\n"
        );
    }

    #[test]
    fn output_is_always_newline_terminated() {
        // An empty selected branch can swallow the whole unit; the terminator stays.
        assert_eq!(preprocess("#if 1\n#endif\n"), "\n");
        assert_eq!(preprocess(""), "\n");
    }

    #[test]
    fn enabled_block_passes_content_through() {
        assert_eq!(preprocess("#if 1\ncontent\n#endif\nafter\n"), "content\nafter\n");
    }

    #[test]
    fn elif_chain_selects_the_first_true_branch() {
        let output = preprocess(indoc! {"
            #define A 3
            #if A == 1
            ONE
            #elif A == 2
            TWO
            #elif A == 3
            THREE
            #else
            OTHER
            #endif
        "});
        assert!(output.contains("THREE"));
        assert!(!output.contains("ONE"));
        assert!(!output.contains("TWO"));
        assert!(!output.contains("OTHER"));
    }

    #[test]
    fn else_branch_is_taken_when_nothing_matched() {
        let output = preprocess("#ifdef MISSING\nA\n#else\nB\n#endif\n");
        assert!(output.contains('B'));
        assert!(!output.contains('A'));
    }

    #[test]
    fn nested_conditionals_define_on_rescan() {
        let output = preprocess(indoc! {"
            #if 1
            #if 1
            #define X 5
            #endif
            X
            #endif
        "});
        assert!(output.contains('5'));
    }

    #[test]
    fn undef_removes_a_macro() {
        assert_eq!(preprocess("#define X 1\n#undef X\nX\n"), "\n\nX\n");
    }

    #[test]
    fn undef_of_unknown_name_is_a_no_op() {
        assert_eq!(preprocess("#undef NEVER_DEFINED\nok\n"), "\nok\n");
    }

    #[test]
    fn redefinition_warns_and_overwrites() {
        let mut engine = engine();
        let output = engine
            .process_text("test.c", "#define X 1\n#define X 2\nX\n")
            .unwrap();
        assert!(output.contains('2'));
        let warnings: Vec<_> = engine
            .diagnostics()
            .iter()
            .filter(|diagnostic| diagnostic.severity == Severity::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains('X'));
    }

    #[test]
    fn function_like_macro_in_text_is_an_error() {
        let result = engine().process_text("test.c", "#define F(x) x\nF(1)\n");
        assert!(matches!(
            result,
            Err(PreprocessError::Macro(MacroError::MissingArguments { .. }))
        ));
    }

    #[test]
    fn empty_parameter_list_macro_expands() {
        assert_eq!(preprocess("#define G() body\nG\n"), "\nbody\n");
    }

    #[test]
    fn define_without_call_paren_is_object_like() {
        // The space before `(` makes the parens part of the replacement.
        assert_eq!(preprocess("#define F (x)\nF\n"), "\n( x )\n");
    }

    #[test]
    fn unknown_directives_are_skipped() {
        assert_eq!(preprocess("#warning something\nX\n"), "\nX\n");
    }

    #[test]
    fn pragma_directives_are_inert() {
        assert_eq!(preprocess("#pragma once\nX\n"), "\nX\n");
        assert_eq!(preprocess("_Pragma(\"lock\")\nX\n"), "\nX\n");
        assert_eq!(preprocess("#line 42 \"other.c\"\nX\n"), "\nX\n");
    }

    #[test]
    fn line_builtin_tracks_source_lines() {
        assert_eq!(preprocess("\n\na __LINE__ b\n"), "\n\na 3 b\n");
    }

    #[test]
    fn file_builtin_names_the_current_file() {
        assert_eq!(preprocess("__FILE__\n"), "\"test.c\"\n");
    }

    #[test]
    fn date_and_time_builtins_produce_string_literals() {
        let output = preprocess("__DATE__ __TIME__\n");
        let quotes = output.matches('"').count();
        assert_eq!(quotes, 4);
    }

    #[test]
    fn defined_is_independent_of_the_macro_value() {
        let output = preprocess(indoc! {"
            #define ZERO 0
            #if defined(ZERO)
            HAVE_ZERO
            #endif
            #undef ZERO
            #if defined ZERO
            STILL_HAVE_ZERO
            #endif
        "});
        assert!(output.contains("HAVE_ZERO"));
        assert!(!output.contains("STILL_HAVE_ZERO"));
    }

    #[test]
    fn macro_definitions_survive_across_conditional_sections() {
        let output = preprocess(indoc! {"
            #if 1
            #define VALUE 10
            #endif
            VALUE
        "});
        assert!(output.contains("10"));
    }

    #[test]
    fn comments_are_stripped_by_default_phases() {
        assert_eq!(preprocess("a /* gone */ b\n"), "a b\n");
        let kept = Preprocessor::default()
            .process_text("test.c", "a /* kept */ b\n")
            .unwrap();
        assert!(kept.contains("kept"));
    }

    #[test]
    fn spliced_directives_execute() {
        assert_eq!(preprocess("#define X \\\n1\nX\n"), "\n1\n");
    }

    #[test]
    fn division_by_zero_in_a_condition_is_fatal() {
        let result = engine().process_text("test.c", "#if 1 / 0\nX\n#endif\n");
        assert!(matches!(result, Err(PreprocessError::DivisionByZero { .. })));
    }

    #[test]
    fn expand_macro_rejects_undefined_names() {
        let engine = engine();
        assert!(matches!(
            engine.expand_macro("NOWHERE", None),
            Err(PreprocessError::Macro(MacroError::Undefined { .. }))
        ));
    }

    #[test]
    fn expand_macro_substitutes_arguments() {
        let mut engine = engine();
        engine.define_macro(Macro::function(
            "SQUARE",
            "x * x",
            vec!["x".into()],
            false,
        ));
        let expanded = engine
            .expand_macro("SQUARE", Some(&["7".into()]))
            .unwrap();
        assert_eq!(expanded, "7 * 7");
    }

    #[test]
    fn definition_time_expansion_of_known_macros() {
        // Replacement lists go through the ordinary token rule, so macros known at definition
        // time are expanded right away.
        assert_eq!(preprocess("#define A 1\n#define B A\n#undef A\nB\n"), "\n\n\n1\n");
    }

    #[test]
    fn variadic_macro_defined_through_directive() {
        let mut engine = engine();
        engine
            .process_text("test.c", "#define LOG(fmt, ...) log(fmt)\n")
            .unwrap();
        let expanded = engine
            .expand_macro("LOG", Some(&["\"%d\"".into(), "x".into()]))
            .unwrap();
        assert_eq!(expanded, "log ( \"%d\" )");
    }

    #[test]
    fn variadic_define_survives_a_conditional_reemit() {
        let mut engine = engine();
        engine
            .process_text("test.c", "#if 1\n#define V(a, ...) a\n#endif\n")
            .unwrap();
        let definition = engine.macros().get("V").expect("V is defined on re-scan");
        assert!(definition.variadic);
        assert_eq!(definition.params.as_deref(), Some(&["a".to_owned()][..]));
    }

    #[test]
    fn stray_else_is_a_syntax_error() {
        let result = engine().process_text("test.c", "#if 1\n#else\n#else\n#endif\n");
        assert!(matches!(result, Err(PreprocessError::Syntax { .. })));
    }
}
