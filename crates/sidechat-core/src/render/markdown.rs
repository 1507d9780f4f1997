use std::sync::Arc;

use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};

use super::highlight::Highlighter;
use super::{code_block_html, Renderer, RendererTier};
use crate::error::RenderError;

/// Preferred tier: GitHub-flavored markdown with line breaks preserved.
pub struct MarkdownRenderer {
    highlighter: Option<Arc<dyn Highlighter>>,
}

impl MarkdownRenderer {
    pub fn new(highlighter: Option<Arc<dyn Highlighter>>) -> Self {
        Self { highlighter }
    }

    fn options() -> Options {
        let mut opts = Options::empty();
        opts.insert(Options::ENABLE_TABLES);
        opts.insert(Options::ENABLE_STRIKETHROUGH);
        opts.insert(Options::ENABLE_TASKLISTS);
        opts.insert(Options::ENABLE_FOOTNOTES);
        opts
    }
}

impl Renderer for MarkdownRenderer {
    fn tier(&self) -> RendererTier {
        RendererTier::Markdown
    }

    fn render(&self, text: &str) -> Result<String, RenderError> {
        let mut events: Vec<Event> = Vec::new();
        // (language, accumulated source) of the fenced block being read
        let mut code: Option<(String, String)> = None;

        for event in Parser::new_ext(text, Self::options()) {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let language = match kind {
                        CodeBlockKind::Fenced(info) => {
                            info.split_whitespace().next().unwrap_or_default().to_string()
                        }
                        CodeBlockKind::Indented => String::new(),
                    };
                    code = Some((language, String::new()));
                }
                Event::Text(text) if code.is_some() => {
                    if let Some((_, source)) = code.as_mut() {
                        source.push_str(&text);
                    }
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some((language, source)) = code.take() {
                        let block = code_block_html(&language, &source, self.highlighter.as_deref());
                        events.push(Event::Html(CowStr::from(block)));
                    }
                }
                Event::SoftBreak => events.push(Event::HardBreak),
                // Raw HTML from the model is shown, never interpreted
                Event::Html(raw) | Event::InlineHtml(raw) => events.push(Event::Text(raw)),
                other => events.push(other),
            }
        }

        let mut output = String::with_capacity(text.len() * 3 / 2);
        html::push_html(&mut output, events.into_iter());
        Ok(output)
    }
}
