//! The macro table and the `Macro` record it stores.

use std::{cell::Cell, collections::HashMap, path::Path};

use chrono::Local;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MacroError {
    #[error("macro `{name}` is not defined")]
    Undefined { name: String },
    #[error("macro `{name}` expects {expected} arguments but {got} were provided")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("builtin macro `{name}` cannot be called with an argument list")]
    BuiltinWithArgs { name: String },
    #[error("function-like macro `{name}` requires an argument list")]
    MissingArguments { name: String },
}

/// The builtin macros the engine registers at construction. Unlike user macros these have no
/// stored replacement; they are rendered from the engine state current at the expansion site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Date,
    Time,
    File,
    Line,
}

impl Builtin {
    /// String results come out quoted, numeric results stringified.
    fn expand(self, context: &BuiltinContext) -> String {
        match self {
            Builtin::Date => format!("\"{}\"", Local::now().format("%b %d %Y")),
            Builtin::Time => format!("\"{}\"", Local::now().format("%H:%M:%S")),
            Builtin::File => format!("\"{}\"", context.file.display()),
            Builtin::Line => context.line.to_string(),
        }
    }
}

/// The live engine state a builtin macro renders itself against.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinContext<'a> {
    pub file: &'a Path,
    pub line: u32,
}

/// A preprocessor macro definition.
///
/// `params` of `None` is an object-like macro; `Some(vec![])` is a function-like macro defined as
/// `NAME()`. A macro with a builtin has no user-supplied replacement or parameters.
#[derive(Debug, Clone)]
pub struct Macro {
    pub name: String,
    pub replacement: String,
    pub params: Option<Vec<String>>,
    pub variadic: bool,
    pub builtin: Option<Builtin>,
    expanding: Cell<bool>,
}

impl Macro {
    pub fn object(name: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replacement: replacement.into(),
            params: None,
            variadic: false,
            builtin: None,
            expanding: Cell::new(false),
        }
    }

    pub fn function(
        name: impl Into<String>,
        replacement: impl Into<String>,
        params: Vec<String>,
        variadic: bool,
    ) -> Self {
        Self {
            params: Some(params),
            variadic,
            ..Self::object(name, replacement)
        }
    }

    pub fn builtin(name: impl Into<String>, builtin: Builtin) -> Self {
        Self {
            builtin: Some(builtin),
            ..Self::object(name, "")
        }
    }

    /// Whether this macro is being expanded right now. An expanding macro is not expanded again,
    /// which breaks mutually recursive definitions during `#if` evaluation.
    pub fn is_expanding(&self) -> bool {
        self.expanding.get()
    }

    /// Marks the macro as expanding until the guard is dropped. The flag is reset on every exit
    /// path, early returns and error propagation included.
    pub fn expansion_guard(&self) -> ExpansionGuard<'_> {
        ExpansionGuard::new(&self.expanding)
    }

    /// Produces the replacement text for one expansion of this macro.
    ///
    /// Parameter substitution is plain textual replacement; it does not respect token boundaries
    /// or the `#`/`##` operators.
    pub fn expand(
        &self,
        args: Option<&[String]>,
        context: &BuiltinContext,
    ) -> Result<String, MacroError> {
        if let Some(args) = args {
            if self.builtin.is_some() {
                return Err(MacroError::BuiltinWithArgs {
                    name: self.name.clone(),
                });
            }
            let params = self.params.as_deref().unwrap_or(&[]);
            if !self.variadic && args.len() != params.len() {
                return Err(MacroError::ArityMismatch {
                    name: self.name.clone(),
                    expected: params.len(),
                    got: args.len(),
                });
            }
            let mut replacement = self.replacement.clone();
            for (param, arg) in params.iter().zip(args) {
                replacement = replacement.replace(param.as_str(), arg);
            }
            Ok(replacement)
        } else if let Some(builtin) = self.builtin {
            Ok(builtin.expand(context))
        } else if self.params.as_ref().is_some_and(|params| !params.is_empty()) {
            Err(MacroError::MissingArguments {
                name: self.name.clone(),
            })
        } else {
            Ok(self.replacement.clone())
        }
    }
}

pub struct ExpansionGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> ExpansionGuard<'a> {
    fn new(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self { flag }
    }
}

impl<'a> Drop for ExpansionGuard<'a> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// All macros known to one translation unit, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MacroTable {
    map: HashMap<String, Macro>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces. Returns the previous definition so the caller can warn about the
    /// redefinition.
    pub fn define(&mut self, definition: Macro) -> Option<Macro> {
        self.map.insert(definition.name.clone(), definition)
    }

    /// Removes a definition; a name that was never defined is a no-op.
    pub fn undef(&mut self, name: &str) -> Option<Macro> {
        self.map.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> BuiltinContext<'static> {
        BuiltinContext {
            file: Path::new("test.c"),
            line: 7,
        }
    }

    #[test]
    fn object_macro_expands_to_its_replacement() {
        let foo = Macro::object("FOO", "1");
        assert_eq!(foo.expand(None, &context()).unwrap(), "1");
    }

    #[test]
    fn parameters_substitute_textually() {
        let square = Macro::function("SQUARE", "x * x", vec!["x".into()], false);
        assert_eq!(
            square.expand(Some(&["(a + b)".into()]), &context()).unwrap(),
            "(a + b) * (a + b)"
        );
    }

    #[test]
    fn arity_is_checked_unless_variadic() {
        let pair = Macro::function("PAIR", "a b", vec!["a".into(), "b".into()], false);
        assert!(matches!(
            pair.expand(Some(&["1".into()]), &context()),
            Err(MacroError::ArityMismatch {
                expected: 2,
                got: 1,
                ..
            })
        ));

        let variadic = Macro::function("LOG", "fmt", vec!["fmt".into()], true);
        assert!(variadic
            .expand(Some(&["a".into(), "b".into(), "c".into()]), &context())
            .is_ok());
    }

    #[test]
    fn function_like_macro_without_arguments_is_an_error() {
        let f = Macro::function("F", "x", vec!["x".into()], false);
        assert!(matches!(
            f.expand(None, &context()),
            Err(MacroError::MissingArguments { .. })
        ));
        // `NAME()` takes no arguments and expands fine without any.
        let empty = Macro::function("G", "body", vec![], false);
        assert_eq!(empty.expand(None, &context()).unwrap(), "body");
    }

    #[test]
    fn builtins_render_from_the_context() {
        assert_eq!(
            Macro::builtin("__FILE__", Builtin::File)
                .expand(None, &context())
                .unwrap(),
            "\"test.c\""
        );
        assert_eq!(
            Macro::builtin("__LINE__", Builtin::Line)
                .expand(None, &context())
                .unwrap(),
            "7"
        );
        let date = Macro::builtin("__DATE__", Builtin::Date)
            .expand(None, &context())
            .unwrap();
        assert!(date.starts_with('"') && date.ends_with('"'));
    }

    #[test]
    fn builtin_with_arguments_is_an_error() {
        assert!(matches!(
            Macro::builtin("__LINE__", Builtin::Line).expand(Some(&["1".into()]), &context()),
            Err(MacroError::BuiltinWithArgs { .. })
        ));
    }

    #[test]
    fn expansion_guard_resets_on_drop() {
        let a = Macro::object("A", "A");
        assert!(!a.is_expanding());
        {
            let _guard = a.expansion_guard();
            assert!(a.is_expanding());
        }
        assert!(!a.is_expanding());
    }

    #[test]
    fn define_then_undef_restores_the_table() {
        let mut table = MacroTable::new();
        assert!(!table.contains("TEMP"));
        table.define(Macro::object("TEMP", "1"));
        table.define(Macro::object("TEMP", "2"));
        table.undef("TEMP");
        assert!(!table.contains("TEMP"));
        assert!(table.undef("TEMP").is_none());
    }

    #[test]
    fn redefinition_returns_the_previous_macro() {
        let mut table = MacroTable::new();
        assert!(table.define(Macro::object("X", "1")).is_none());
        let old = table.define(Macro::object("X", "2")).unwrap();
        assert_eq!(old.replacement, "1");
        assert_eq!(table.get("X").unwrap().replacement, "2");
    }
}
