//! Syntax highlighting using syntect
//!
//! Highlighted code is emitted as escaped HTML with inline `color` styles from
//! the `base16-eighties.dark` theme, so any front end can read the colors back
//! without a stylesheet.
//!
//! NOTE: syntect's default syntax set doesn't include TypeScript, so
//! TypeScript fences are highlighted with the JavaScript grammar.

use syntect::easy::HighlightLines;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::html::{styled_line_to_highlighted_html, IncludeBackground};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

use crate::error::RenderError;

const THEME_NAME: &str = "base16-eighties.dark";

pub trait Highlighter: Send + Sync {
    /// Highlight `code` written in `language`, returning escaped HTML.
    fn highlight(&self, code: &str, language: &str) -> Result<String, RenderError>;
}

pub struct SyntectHighlighter {
    syntaxes: SyntaxSet,
    theme: Theme,
}

impl SyntectHighlighter {
    /// Builds the syntax and theme sets bundled into the binary. This parses
    /// a few hundred grammars, so call it off the async runtime.
    pub fn load_defaults() -> Self {
        let syntaxes = SyntaxSet::load_defaults_newlines();
        let mut themes = ThemeSet::load_defaults();
        let theme = themes.themes.remove(THEME_NAME).unwrap_or_default();
        Self { syntaxes, theme }
    }

    fn find_syntax(&self, language: &str) -> Option<&SyntaxReference> {
        let token = match language.to_lowercase().as_str() {
            "typescript" | "ts" | "tsx" | "jsx" => "js".to_string(),
            "shell" | "sh" | "zsh" | "console" => "bash".to_string(),
            "yml" => "yaml".to_string(),
            other => other.to_string(),
        };
        self.syntaxes.find_syntax_by_token(&token)
    }
}

impl Highlighter for SyntectHighlighter {
    fn highlight(&self, code: &str, language: &str) -> Result<String, RenderError> {
        let syntax = self
            .find_syntax(language)
            .ok_or_else(|| RenderError::UnknownLanguage(language.to_string()))?;

        let mut highlighter = HighlightLines::new(syntax, &self.theme);
        let mut html = String::with_capacity(code.len() * 2);

        for line in LinesWithEndings::from(code) {
            let regions = highlighter
                .highlight_line(line, &self.syntaxes)
                .map_err(|e| RenderError::Highlight(e.to_string()))?;
            let line_html = styled_line_to_highlighted_html(&regions, IncludeBackground::No)
                .map_err(|e| RenderError::Highlight(e.to_string()))?;
            html.push_str(&line_html);
        }

        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highlight_known_language() {
        let highlighter = SyntectHighlighter::load_defaults();
        let html = highlighter.highlight("fn main() {}\n", "rust").unwrap();
        assert!(html.contains("<span style=\"color:"));
        assert!(html.contains("main"));
    }

    #[test]
    fn test_highlight_escapes_code() {
        let highlighter = SyntectHighlighter::load_defaults();
        let html = highlighter.highlight("if (a < b) {}\n", "js").unwrap();
        assert!(html.contains("&lt;"));
        assert!(!html.contains("a < b"));
    }

    #[test]
    fn test_typescript_alias() {
        let highlighter = SyntectHighlighter::load_defaults();
        assert!(highlighter.highlight("const x = 1;\n", "ts").is_ok());
    }

    #[test]
    fn test_unknown_language_is_error() {
        let highlighter = SyntectHighlighter::load_defaults();
        assert!(matches!(
            highlighter.highlight("???", "no-such-language"),
            Err(RenderError::UnknownLanguage(_))
        ));
    }
}
