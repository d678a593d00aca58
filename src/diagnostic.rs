use crate::error::{CodegenError, FunctionError};
use crate::span::Span;

/// A code generation diagnostic (error or warning) ready for rendering.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: String, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn warning(message: String, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Render the diagnostic to stderr using ariadne.
    ///
    /// Diagnostics without a source location (most post-lowering faults)
    /// print as a plain one-line report.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        if self.span.is_dummy() || source.is_empty() {
            let prefix = match self.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
            };
            eprintln!("{}: {}", prefix, self.message);
            for note in &self.notes {
                eprintln!("  = note: {}", note);
            }
            if let Some(help) = &self.help {
                eprintln!("  = help: {}", help);
            }
            return;
        }

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let mut report = Report::build(kind, filename, self.span.start as usize)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, self.span.range()))
                    .with_message(&self.message)
                    .with_color(color),
            );

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        let _ = report
            .finish()
            .eprint((filename, Source::from(source)));
    }
}

impl From<&CodegenError> for Diagnostic {
    fn from(err: &CodegenError) -> Self {
        let diag = Diagnostic::error(err.to_string(), err.span().unwrap_or_else(Span::dummy));
        match err {
            CodegenError::RegisterExhausted { .. } => diag.with_help(
                "split the method or narrow local scopes so fewer values are live at once"
                    .to_string(),
            ),
            CodegenError::RegionCrossingBranch { .. } => diag.with_note(
                "only unconditional jumps may leave a try, catch or finally block".to_string(),
            ),
            _ => diag,
        }
    }
}

impl From<&FunctionError> for Diagnostic {
    fn from(err: &FunctionError) -> Self {
        Diagnostic::from(&err.source).with_note(format!("while compiling '{}'", err.function))
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let span = Span::new(0, 10, 15);
        let d = Diagnostic::error("unsupported construct: goto".to_string(), span);
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.span.start, 10);
        assert_eq!(d.span.end, 15);
        assert!(d.notes.is_empty());
        assert!(d.help.is_none());
    }

    #[test]
    fn test_from_codegen_error_keeps_span() {
        let span = Span::new(0, 3, 7);
        let d = Diagnostic::from(&CodegenError::unsupported("lock", span));
        assert_eq!(d.span, span);
        assert_eq!(d.message, "unsupported construct: lock");
    }

    #[test]
    fn test_register_exhaustion_has_help() {
        let d = Diagnostic::from(&CodegenError::RegisterExhausted {
            function: "Big".into(),
            limit: 256,
        });
        assert!(d.help.is_some());
        assert!(d.span.is_dummy());
    }

    #[test]
    fn test_function_error_adds_note() {
        let err = FunctionError {
            function: "Main".into(),
            source: CodegenError::unresolved("if0_end"),
        };
        let d = Diagnostic::from(&err);
        assert_eq!(d.notes, vec!["while compiling 'Main'".to_string()]);
    }

    #[test]
    fn test_render_does_not_panic() {
        let source = "class C { void M() { goto x; } }\n";
        let d = Diagnostic::error("unsupported construct: goto".to_string(), Span::new(0, 21, 28))
            .with_note("rewrite with a loop".to_string());
        d.render("test.cs", source);
        Diagnostic::warning("empty switch".to_string(), Span::dummy()).render("test.cs", "");
    }

    #[test]
    fn test_render_diagnostics_multiple() {
        let source = "int x = 1;\nint y = 2;\n";
        let diagnostics = vec![
            Diagnostic::warning("unused x".to_string(), Span::new(0, 4, 5)),
            Diagnostic::warning("unused y".to_string(), Span::new(0, 15, 16)),
        ];
        render_diagnostics(&diagnostics, "test.cs", source);
    }
}
