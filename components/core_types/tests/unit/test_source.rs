//! Unit tests for SourcePosition and StackFrame

use core_types::{SourcePosition, StackFrame};

#[cfg(test)]
mod source_position_tests {
    use super::*;

    #[test]
    fn test_source_position_creation() {
        let pos = SourcePosition::new(Some("index.html"), Some("/srv/index.html"), 10);
        assert_eq!(pos.line, 10);
        assert_eq!(pos.name.as_deref(), Some("index.html"));
        assert_eq!(pos.filename.as_deref(), Some("/srv/index.html"));
    }

    #[test]
    fn test_display_prefers_filename() {
        let pos = SourcePosition::new(Some("index.html"), Some("/srv/index.html"), 3);
        assert_eq!(pos.to_string(), "/srv/index.html, line 3");
    }

    #[test]
    fn test_display_falls_back_to_name() {
        let pos = SourcePosition::new(Some("index.html"), None, 3);
        assert_eq!(pos.to_string(), "index.html, line 3");
    }

    #[test]
    fn test_display_for_string_templates() {
        let pos = SourcePosition::new(None, None, 1);
        assert_eq!(pos.to_string(), "<template>, line 1");
    }

    #[test]
    fn test_default_is_unnamed_line_zero() {
        let pos = SourcePosition::default();
        assert_eq!(pos.line, 0);
        assert!(pos.name.is_none());
    }
}

#[cfg(test)]
mod stack_frame_tests {
    use super::*;

    fn frame(function: Option<&str>, line: u32) -> StackFrame {
        StackFrame {
            function_name: function.map(str::to_string),
            template: Some("page.html".to_string()),
            filename: None,
            line,
        }
    }

    #[test]
    fn test_frame_display_with_function() {
        assert_eq!(
            frame(Some("block 'body'"), 4).to_string(),
            "  File \"page.html\", line 4, in block 'body'"
        );
    }

    #[test]
    fn test_frame_display_without_function() {
        assert_eq!(frame(None, 9).to_string(), "  File \"page.html\", line 9");
    }

    #[test]
    fn test_frame_equality() {
        assert_eq!(frame(Some("template"), 1), frame(Some("template"), 1));
        assert_ne!(frame(Some("template"), 1), frame(Some("template"), 2));
    }
}
