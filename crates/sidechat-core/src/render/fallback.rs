//! Hand-rolled formatter used until (or instead of) the markdown tier.

use std::sync::{Arc, OnceLock};

use regex::Regex;

use super::highlight::Highlighter;
use super::{code_block_html, escape_html, Renderer, RendererTier};
use crate::error::RenderError;

fn fence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"```(\w*)([\s\S]*?)```").expect("valid fence pattern"))
}

fn inline_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"`([^`]+)`").expect("valid inline code pattern"))
}

fn paragraph_break_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\n{2,}").expect("valid paragraph pattern"))
}

pub struct FallbackRenderer {
    highlighter: Option<Arc<dyn Highlighter>>,
}

impl FallbackRenderer {
    pub fn new(highlighter: Option<Arc<dyn Highlighter>>) -> Self {
        Self { highlighter }
    }

    fn push_prose(html: &mut String, prose: &str) {
        let escaped = escape_html(prose);
        let with_code = inline_code_pattern().replace_all(&escaped, "<code>$1</code>");

        for paragraph in paragraph_break_pattern().split(&with_code) {
            let paragraph = paragraph.trim_matches('\n');
            if paragraph.trim().is_empty() {
                continue;
            }
            html.push_str("<p>");
            html.push_str(&paragraph.replace('\n', "<br>"));
            html.push_str("</p>");
        }
    }
}

impl Renderer for FallbackRenderer {
    fn tier(&self) -> RendererTier {
        RendererTier::Fallback
    }

    fn render(&self, text: &str) -> Result<String, RenderError> {
        let mut html = String::with_capacity(text.len() * 3 / 2);
        let mut last = 0;

        for caps in fence_pattern().captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            Self::push_prose(&mut html, &text[last..whole.start()]);

            let language = caps.get(1).map_or("", |m| m.as_str());
            let code = caps.get(2).map_or("", |m| m.as_str());
            let code = code.strip_prefix('\n').unwrap_or(code).trim_end_matches('\n');
            html.push_str(&code_block_html(language, code, self.highlighter.as_deref()));

            last = whole.end();
        }

        Self::push_prose(&mut html, &text[last..]);
        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingHighlighter;

    impl Highlighter for FailingHighlighter {
        fn highlight(&self, _code: &str, language: &str) -> Result<String, RenderError> {
            Err(RenderError::UnknownLanguage(language.to_string()))
        }
    }

    fn render(text: &str) -> String {
        FallbackRenderer::new(None).render(text).unwrap()
    }

    #[test]
    fn test_code_block_gets_language_class() {
        let html = render("```js\nconsole.log(1)\n```");
        assert_eq!(
            html,
            r#"<pre><code class="language-js">console.log(1)</code></pre>"#
        );
    }

    #[test]
    fn test_code_block_without_language_is_plaintext() {
        let html = render("```\nplain\n```");
        assert!(html.contains(r#"<code class="language-plaintext">plain</code>"#));
    }

    #[test]
    fn test_code_is_escaped() {
        let html = render("```html\n<div class=\"a\">'x' & y</div>\n```");
        assert!(html.contains("&lt;div class=&quot;a&quot;&gt;&#039;x&#039; &amp; y&lt;/div&gt;"));
    }

    #[test]
    fn test_inline_code_and_paragraphs() {
        let html = render("Use `cargo build`\nto compile.\n\nThen run it.");
        assert_eq!(
            html,
            "<p>Use <code>cargo build</code><br>to compile.</p><p>Then run it.</p>"
        );
    }

    #[test]
    fn test_prose_around_code_block() {
        let html = render("Before:\n```rust\nfn main() {}\n```\nAfter.");
        assert_eq!(
            html,
            concat!(
                "<p>Before:</p>",
                r#"<pre><code class="language-rust">fn main() {}</code></pre>"#,
                "<p>After.</p>"
            )
        );
    }

    #[test]
    fn test_failed_highlight_keeps_plain_code() {
        let renderer = FallbackRenderer::new(Some(Arc::new(FailingHighlighter)));
        let html = renderer.render("```cobol\nDISPLAY 'HI'.\n```").unwrap();
        assert!(html.contains(r#"<code class="language-cobol">DISPLAY &#039;HI&#039;.</code>"#));
    }

    #[test]
    fn test_unterminated_fence_is_left_as_text() {
        let html = render("```js\nconsole.log(");
        assert_eq!(html, "<p>```js<br>console.log(</p>");
    }
}
