//! Post-render pass over code blocks: in-place highlighting, language labels
//! and copy controls.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;

use super::escape_html;
use super::highlight::Highlighter;

pub const COPY_LABEL: &str = "Copy";
pub const COPIED_LABEL: &str = "Copied!";
pub const COPY_FEEDBACK: Duration = Duration::from_secs(2);

const HIGHLIGHTED_CLASS: &str = "hljs";

fn code_block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)<pre><code(?: class="([^"]*)")?>(.*?)</code></pre>"#)
            .expect("valid code block pattern")
    })
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"))
}

/// Plain text of one code block, as copied to the clipboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub index: usize,
    pub language: Option<String>,
    pub text: String,
}

pub fn enhance(html: &str, highlighter: Option<&dyn Highlighter>) -> (String, Vec<CodeBlock>) {
    let mut output = String::with_capacity(html.len() + 128);
    let mut blocks = Vec::new();
    let mut last = 0;

    for caps in code_block_pattern().captures_iter(html) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        output.push_str(&html[last..whole.start()]);

        let mut classes: Vec<String> = caps
            .get(1)
            .map(|m| m.as_str().split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let language = classes
            .iter()
            .find_map(|class| class.strip_prefix("language-"))
            .filter(|lang| !lang.is_empty())
            .map(str::to_string);

        let mut inner = caps.get(2).map_or("", |m| m.as_str()).to_string();
        let text = unescape_html(&tag_pattern().replace_all(&inner, ""));

        let already_highlighted = classes.iter().any(|class| class == HIGHLIGHTED_CLASS);
        if !already_highlighted {
            if let (Some(highlighter), Some(lang)) = (highlighter, language.as_deref()) {
                if lang != "plaintext" {
                    match highlighter.highlight(&text, lang) {
                        Ok(highlighted) => {
                            inner = highlighted;
                            classes.push(HIGHLIGHTED_CLASS.to_string());
                        }
                        Err(e) => tracing::debug!(language = lang, "highlighting skipped: {}", e),
                    }
                }
            }
        }

        let index = blocks.len();
        output.push_str(r#"<pre class="code-block">"#);
        if classes.is_empty() {
            output.push_str("<code>");
        } else {
            output.push_str(&format!(r#"<code class="{}">"#, classes.join(" ")));
        }
        output.push_str(&inner);
        output.push_str("</code>");

        if let Some(lang) = language.as_deref().filter(|lang| *lang != "plaintext") {
            output.push_str(&format!(
                r#"<div class="language-label">{}</div>"#,
                escape_html(lang)
            ));
        }
        output.push_str(&format!(
            r#"<button class="copy-button" data-code-index="{}">{}</button></pre>"#,
            index, COPY_LABEL
        ));

        blocks.push(CodeBlock {
            index,
            language,
            text,
        });
        last = whole.end();
    }

    output.push_str(&html[last..]);
    (output, blocks)
}

pub fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Label of a copy control, which reads "Copied!" for a moment after use.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyButton {
    activated_at: Option<Instant>,
}

impl CopyButton {
    pub fn activate(&mut self, now: Instant) {
        self.activated_at = Some(now);
    }

    pub fn label(&self, now: Instant) -> &'static str {
        match self.activated_at {
            Some(at) if now.duration_since(at) < COPY_FEEDBACK => COPIED_LABEL,
            _ => COPY_LABEL,
        }
    }
}
