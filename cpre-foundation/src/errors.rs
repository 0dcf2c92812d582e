//! Types for error reporting.
//!
//! Only conditions the preprocessor can recover from become [`Diagnostic`]s; anything fatal to
//! the translation unit is an ordinary [`Err`] propagated out of the engine.

mod sink;

use codespan_reporting::{
    term,
    term::termcolor::{ColorChoice, StandardStream},
};

use crate::source::{SourceFileId, SourceFileSet, Span};

pub use sink::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LabelStyle {
    /// Labels that describe the primary cause of a diagnostic.
    Primary,
    /// Labels that provide additional context for a diagnostic.
    Secondary,
}

/// Labels allow you to attach information about where in the code a problem occurred.
#[derive(Debug, Clone)]
pub struct Label {
    /// The style of the label; `Primary` should be used for the crux of the problem, and
    /// `Secondary` may be used for extra annotations shown alongside primary labels.
    pub style: LabelStyle,
    /// The span this label labels.
    pub span: Span,
    /// The message attached to the label.
    pub message: String,
}

impl Label {
    pub fn new(style: LabelStyle, span: Span, message: impl Into<String>) -> Self {
        Self {
            style,
            span,
            message: message.into(),
        }
    }

    /// Creates a primary label placed at the given span, with the given message.
    pub fn primary(span: Span, message: impl Into<String>) -> Self {
        Self::new(LabelStyle::Primary, span, message)
    }

    /// Creates a secondary label placed at the given span, with the given message.
    pub fn secondary(span: Span, message: impl Into<String>) -> Self {
        Self::new(LabelStyle::Secondary, span, message)
    }
}

/// Diagnostic severity.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum Severity {
    /// A help message.
    Help,
    /// A note.
    Note,
    /// A warning.
    Warning,
    /// An error.
    Error,
    /// An unexpected bug.
    Bug,
}

/// Diagnostic describing a problem encountered within the code.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// The diagnostic's severity.
    pub severity: Severity,
    /// The diagnostic's error code.
    pub code: Option<String>,
    /// The buffer within which the diagnostic occurred.
    pub file: SourceFileId,
    /// The message describing the issue.
    pub message: String,
    /// Labels attached to the diagnostic.
    pub labels: Vec<Label>,
    /// Additional notes providing context.
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// Creates a new diagnostic with the severity passed in as an argument. You should generally
    /// prefer the convenience functions over this:
    /// - [`Diagnostic::bug`]
    /// - [`Diagnostic::error`]
    /// - [`Diagnostic::warning`]
    /// - [`Diagnostic::note`]
    /// - [`Diagnostic::help`]
    pub fn new(severity: Severity, file: SourceFileId, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: None,
            file,
            message: message.into(),
            labels: vec![],
            notes: vec![],
        }
    }

    /// Creates a new bug-level diagnostic.
    pub fn bug(file: SourceFileId, message: impl Into<String>) -> Self {
        Self::new(Severity::Bug, file, message)
    }

    /// Creates a new error-level diagnostic with the given message.
    pub fn error(file: SourceFileId, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, file, message)
    }

    /// Creates a new warning-level diagnostic with the given message.
    pub fn warning(file: SourceFileId, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, file, message)
    }

    /// Creates a new note-level diagnostic with the given message.
    pub fn note(file: SourceFileId, message: impl Into<String>) -> Self {
        Self::new(Severity::Note, file, message)
    }

    /// Creates a new help-level diagnostic with the given message.
    pub fn help(file: SourceFileId, message: impl Into<String>) -> Self {
        Self::new(Severity::Help, file, message)
    }

    /// Sets the diagnostic's error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Adds a label to the diagnostic.
    pub fn with_label(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }

    /// Adds a note to the diagnostic.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Emits the diagnostic to standard error.
    pub fn emit_to_stderr(
        &self,
        files: &SourceFileSet,
    ) -> Result<(), codespan_reporting::files::Error> {
        term::emit(
            &mut StandardStream::stderr(ColorChoice::Auto),
            &term::Config::default(),
            files,
            &self.to_codespan(),
        )
    }

    pub fn to_codespan(&self) -> codespan_reporting::diagnostic::Diagnostic<SourceFileId> {
        codespan_reporting::diagnostic::Diagnostic {
            severity: match self.severity {
                Severity::Help => codespan_reporting::diagnostic::Severity::Help,
                Severity::Note => codespan_reporting::diagnostic::Severity::Note,
                Severity::Warning => codespan_reporting::diagnostic::Severity::Warning,
                Severity::Error => codespan_reporting::diagnostic::Severity::Error,
                Severity::Bug => codespan_reporting::diagnostic::Severity::Bug,
            },
            code: self.code.clone(),
            message: self.message.clone(),
            labels: self
                .labels
                .iter()
                .map(|label| codespan_reporting::diagnostic::Label {
                    style: match label.style {
                        LabelStyle::Primary => codespan_reporting::diagnostic::LabelStyle::Primary,
                        LabelStyle::Secondary => {
                            codespan_reporting::diagnostic::LabelStyle::Secondary
                        }
                    },
                    file_id: self.file,
                    range: label.span.to_usize_range(),
                    message: label.message.clone(),
                })
                .collect(),
            notes: self.notes.clone(),
        }
    }
}
