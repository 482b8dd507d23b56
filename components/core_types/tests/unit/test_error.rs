//! Unit tests for TemplateError and ErrorKind

use core_types::{ErrorKind, SourcePosition, StackFrame, TemplateError};

#[cfg(test)]
mod error_kind_tests {
    use super::*;

    #[test]
    fn test_error_kind_names() {
        assert_eq!(ErrorKind::SyntaxError.name(), "TemplateSyntaxError");
        assert_eq!(ErrorKind::CompileError.name(), "TemplateAssertionError");
        assert_eq!(ErrorKind::UndefinedError.to_string(), "UndefinedError");
        assert_eq!(ErrorKind::TemplateNotFound.name(), "TemplateNotFound");
    }

    #[test]
    fn test_not_found_kinds() {
        assert!(ErrorKind::TemplateNotFound.is_not_found());
        assert!(ErrorKind::TemplatesNotFound.is_not_found());
        assert!(!ErrorKind::UndefinedError.is_not_found());
    }
}

#[cfg(test)]
mod template_error_tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = TemplateError::new(ErrorKind::TypeError, "bad operand");
        assert_eq!(error.kind, ErrorKind::TypeError);
        assert_eq!(error.message, "bad operand");
        assert!(error.stack.is_empty());
        assert!(error.source_position.is_none());
    }

    #[test]
    fn test_syntax_error_carries_position() {
        let error = TemplateError::syntax("unexpected end of template", 5, Some("t.html"), None);
        assert_eq!(error.kind, ErrorKind::SyntaxError);
        assert_eq!(error.line(), Some(5));
        assert_eq!(
            error.to_string(),
            "TemplateSyntaxError: unexpected end of template (t.html, line 5)"
        );
    }

    #[test]
    fn test_with_position_replaces() {
        let error = TemplateError::runtime("boom")
            .with_position(SourcePosition::new(None, None, 1))
            .with_position(SourcePosition::new(None, None, 8));
        assert_eq!(error.line(), Some(8));
    }

    #[test]
    fn test_none_found_lists_names() {
        let error = TemplateError::none_found(&["a.html".to_string(), "b.html".to_string()]);
        assert_eq!(error.kind, ErrorKind::TemplatesNotFound);
        assert_eq!(
            error.message,
            "none of the templates given were found: a.html, b.html"
        );
    }

    #[test]
    fn test_traceback_lists_outermost_first() {
        let mut error = TemplateError::runtime("boom");
        error.stack.push(StackFrame {
            function_name: Some("macro 'inner'".to_string()),
            template: Some("macros.html".to_string()),
            filename: None,
            line: 2,
        });
        error.stack.push(StackFrame {
            function_name: Some("template".to_string()),
            template: Some("page.html".to_string()),
            filename: None,
            line: 7,
        });
        let tb = error.traceback();
        let page = tb.find("page.html").unwrap();
        let macros = tb.find("macros.html").unwrap();
        assert!(page < macros);
        assert!(tb.ends_with("TemplateRuntimeError: boom"));
    }

    #[test]
    fn test_error_is_std_error() {
        fn assert_error<E: std::error::Error>(_: &E) {}
        assert_error(&TemplateError::type_error("x"));
    }
}
