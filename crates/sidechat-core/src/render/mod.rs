//! Conversion of message text into transcript markup.
//!
//! Rendering degrades through three tiers: markdown (once the capability
//! loader has resolved), the hand-rolled fallback formatter, and finally
//! escaped plain text. Whatever tier produced the markup, code blocks then get
//! the post-render enhancement pass.

pub mod enhance;
pub mod fallback;
pub mod highlight;
pub mod markdown;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::error::RenderError;

pub use enhance::{enhance, CodeBlock, CopyButton, COPIED_LABEL, COPY_LABEL};
pub use fallback::FallbackRenderer;
pub use highlight::{Highlighter, SyntectHighlighter};
pub use markdown::MarkdownRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererTier {
    Markdown,
    Fallback,
    Plain,
}

pub trait Renderer: Send + Sync {
    fn tier(&self) -> RendererTier;
    fn render(&self, text: &str) -> Result<String, RenderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMarkup {
    pub html: String,
    pub code_blocks: Vec<CodeBlock>,
    pub tier: RendererTier,
}

/// What the loader managed to make available.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub preferred: Option<Arc<dyn Renderer>>,
    pub highlighter: Option<Arc<dyn Highlighter>>,
}

#[async_trait]
pub trait CapabilityLoader: Send + Sync {
    async fn load(&self) -> Capabilities;
}

/// Loads the markdown renderer and the syntect grammars compiled into the
/// binary.
pub struct BundledLoader;

#[async_trait]
impl CapabilityLoader for BundledLoader {
    async fn load(&self) -> Capabilities {
        let highlighter: Option<Arc<dyn Highlighter>> =
            match tokio::task::spawn_blocking(SyntectHighlighter::load_defaults).await {
                Ok(highlighter) => Some(Arc::new(highlighter)),
                Err(e) => {
                    tracing::warn!("syntax highlighter unavailable: {}", e);
                    None
                }
            };

        Capabilities {
            preferred: Some(Arc::new(MarkdownRenderer::new(highlighter.clone()))),
            highlighter,
        }
    }
}

/// Shared entry point for rendering. Clones share the resolved capabilities.
#[derive(Clone, Default)]
pub struct RenderingAdapter {
    resolved: Arc<OnceLock<Capabilities>>,
}

impl RenderingAdapter {
    /// Unresolved adapter; renders with the fallback tier until resolved.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        let adapter = Self::new();
        let _ = adapter.resolved.set(capabilities);
        adapter
    }

    /// Runs the loader and installs its result. Only the first resolution
    /// takes effect.
    pub async fn resolve(&self, loader: &dyn CapabilityLoader) {
        if self.is_resolved() {
            return;
        }
        let capabilities = loader.load().await;
        tracing::debug!(
            markdown = capabilities.preferred.is_some(),
            highlighter = capabilities.highlighter.is_some(),
            "renderer capabilities resolved"
        );
        let _ = self.resolved.set(capabilities);
    }

    pub fn spawn_resolve(&self, loader: Arc<dyn CapabilityLoader>) -> tokio::task::JoinHandle<()> {
        let adapter = self.clone();
        tokio::spawn(async move { adapter.resolve(loader.as_ref()).await })
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    pub fn active_tier(&self) -> RendererTier {
        match self.resolved.get().and_then(|caps| caps.preferred.as_ref()) {
            Some(preferred) => preferred.tier(),
            None => RendererTier::Fallback,
        }
    }

    pub fn render(&self, text: &str) -> RenderedMarkup {
        let capabilities = self.resolved.get();
        let highlighter = capabilities.and_then(|caps| caps.highlighter.clone());

        let (html, tier) = Self::render_tiers(text, capabilities, highlighter.clone());
        let (html, code_blocks) = enhance(&html, highlighter.as_deref());

        RenderedMarkup {
            html,
            code_blocks,
            tier,
        }
    }

    fn render_tiers(
        text: &str,
        capabilities: Option<&Capabilities>,
        highlighter: Option<Arc<dyn Highlighter>>,
    ) -> (String, RendererTier) {
        if let Some(preferred) = capabilities.and_then(|caps| caps.preferred.as_ref()) {
            match preferred.render(text) {
                Ok(html) => return (html, preferred.tier()),
                Err(e) => tracing::warn!("preferred renderer failed, using fallback: {}", e),
            }
        }

        match FallbackRenderer::new(highlighter).render(text) {
            Ok(html) => (html, RendererTier::Fallback),
            Err(e) => {
                tracing::warn!("fallback renderer failed, using plain text: {}", e);
                (plain_render(text), RendererTier::Plain)
            }
        }
    }
}

/// Last resort: angle brackets escaped and line breaks kept.
pub fn plain_render(text: &str) -> String {
    text.replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\n', "<br>")
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#039;")
}

/// `<pre><code>` for a fenced block, highlighted when the language is known.
pub(crate) fn code_block_html(
    language: &str,
    code: &str,
    highlighter: Option<&dyn Highlighter>,
) -> String {
    if let (Some(highlighter), false) = (highlighter, language.is_empty()) {
        match highlighter.highlight(code, language) {
            Ok(highlighted) => {
                return format!(
                    r#"<pre><code class="language-{} hljs">{}</code></pre>"#,
                    escape_html(language),
                    highlighted
                );
            }
            Err(e) => tracing::debug!(language, "failed to highlight code block: {}", e),
        }
    }

    let class_language = if language.is_empty() { "plaintext" } else { language };
    format!(
        r#"<pre><code class="language-{}">{}</code></pre>"#,
        escape_html(class_language),
        escape_html(code)
    )
}
