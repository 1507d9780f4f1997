//! Turns transcript markup (the HTML produced by the rendering adapter) into
//! styled terminal lines.

use std::sync::OnceLock;

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Paragraph, Wrap};
use regex::Regex;
use sidechat_core::render::enhance::unescape_html;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<[^>]*>|[^<]+").expect("valid token pattern"))
}

fn color_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"color:\s*#([0-9a-fA-F]{6})").expect("valid color pattern")
    })
}

fn attr_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"([a-zA-Z-]+)="([^"]*)""#).expect("valid attribute pattern"))
}

/// How the copy control of one code block should be drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyControl {
    pub label: &'static str,
    pub selected: bool,
}

struct Tag<'a> {
    name: String,
    closing: bool,
    attrs: &'a str,
}

impl<'a> Tag<'a> {
    fn parse(raw: &'a str) -> Self {
        let inner = raw.trim_start_matches('<').trim_end_matches('>').trim_end_matches('/');
        let closing = inner.starts_with('/');
        let inner = inner.trim_start_matches('/').trim();
        let (name, attrs) = match inner.find(char::is_whitespace) {
            Some(split) => (&inner[..split], &inner[split..]),
            None => (inner, ""),
        };
        Self {
            name: name.to_ascii_lowercase(),
            closing,
            attrs,
        }
    }

    fn attr(&self, key: &str) -> Option<&'a str> {
        attr_pattern()
            .captures_iter(self.attrs)
            .find(|caps| caps.get(1).is_some_and(|m| m.as_str() == key))
            .and_then(|caps| caps.get(2))
            .map(|m| m.as_str())
    }

    fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }
}

enum ListKind {
    Bullet,
    Ordered(usize),
}

/// Code block being collected; its header is emitted once the block closes.
#[derive(Default)]
struct CodeBlockState {
    lines: Vec<Line<'static>>,
    current: Vec<Span<'static>>,
    language: Option<String>,
    index: Option<usize>,
    in_label: bool,
    in_button: bool,
}

struct LineBuilder<'a> {
    lines: Vec<Line<'static>>,
    current: Vec<Span<'static>>,
    styles: Vec<Style>,
    quote_depth: usize,
    lists: Vec<ListKind>,
    code: Option<CodeBlockState>,
    in_cell: bool,
    controls: &'a dyn Fn(usize) -> CopyControl,
}

impl<'a> LineBuilder<'a> {
    fn new(base: Style, controls: &'a dyn Fn(usize) -> CopyControl) -> Self {
        Self {
            lines: Vec::new(),
            current: Vec::new(),
            styles: vec![base],
            quote_depth: 0,
            lists: Vec::new(),
            code: None,
            in_cell: false,
            controls,
        }
    }

    fn style(&self) -> Style {
        self.styles.last().copied().unwrap_or_default()
    }

    fn push_style(&mut self, patch: Style) {
        let style = self.style().patch(patch);
        self.styles.push(style);
    }

    fn pop_style(&mut self) {
        if self.styles.len() > 1 {
            self.styles.pop();
        }
    }

    fn prefix(&self) -> Option<Span<'static>> {
        if self.quote_depth == 0 {
            return None;
        }
        Some(Span::styled(
            "│ ".repeat(self.quote_depth),
            Style::default().fg(Color::DarkGray),
        ))
    }

    fn text(&mut self, text: &str) {
        let style = self.style();
        if let Some(code) = self.code.as_mut() {
            if code.in_label {
                code.language = Some(text.trim().to_string());
                return;
            }
            if code.in_button {
                return;
            }
            let mut parts = text.split('\n').peekable();
            while let Some(part) = parts.next() {
                if !part.is_empty() {
                    code.current.push(Span::styled(part.to_string(), style));
                }
                if parts.peek().is_some() {
                    let spans = std::mem::take(&mut code.current);
                    code.lines.push(Line::from(spans));
                }
            }
            return;
        }

        let text = text.replace('\n', "");
        if text.is_empty() {
            return;
        }
        if self.current.is_empty() {
            if text.trim().is_empty() {
                return;
            }
            if let Some(prefix) = self.prefix() {
                self.current.push(prefix);
            }
        }
        self.current.push(Span::styled(text, style));
    }

    fn break_line(&mut self) {
        let spans = std::mem::take(&mut self.current);
        self.lines.push(Line::from(spans));
    }

    /// Ends the current line if it has content.
    fn end_line(&mut self) {
        if !self.current.is_empty() {
            self.break_line();
        }
    }

    /// Ends the current block, leaving exactly one blank line behind it.
    fn end_block(&mut self) {
        self.end_line();
        if self.lines.last().is_some_and(|line| line.width() > 0) {
            self.lines.push(Line::default());
        }
    }

    fn open_code_block(&mut self) {
        self.end_block();
        self.code = Some(CodeBlockState::default());
    }

    fn close_code_block(&mut self) {
        let Some(mut code) = self.code.take() else {
            return;
        };
        if !code.current.is_empty() {
            let spans = std::mem::take(&mut code.current);
            code.lines.push(Line::from(spans));
        }
        // Drop the trailing empty line a closing newline leaves behind.
        if code.lines.last().is_some_and(|line| line.width() == 0) {
            code.lines.pop();
        }

        let border = Style::default().fg(Color::DarkGray);
        let mut header = vec![Span::styled("┌─ ", border)];
        if let Some(language) = code.language.as_deref() {
            header.push(Span::styled(
                language.to_string(),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ));
            header.push(Span::styled(" ", border));
        }
        if let Some(index) = code.index {
            let control = (self.controls)(index);
            let style = if control.selected {
                Style::default().bg(Color::Blue).fg(Color::White).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            header.push(Span::styled(format!("[{}]", control.label), style));
        }
        self.lines.push(Line::from(header));

        for line in code.lines {
            let mut spans = vec![Span::styled("│ ", border)];
            spans.extend(line.spans);
            self.lines.push(Line::from(spans));
        }
        self.lines.push(Line::from(Span::styled("└─", border)));
        self.lines.push(Line::default());
    }

    fn open(&mut self, tag: &Tag) {
        if let Some(code) = self.code.as_mut() {
            match tag.name.as_str() {
                "span" => {
                    let patch = span_style(tag);
                    self.push_style(patch);
                }
                "div" if tag.has_class("language-label") => code.in_label = true,
                "button" => {
                    code.in_button = true;
                    code.index = tag.attr("data-code-index").and_then(|i| i.parse().ok());
                }
                "br" => {
                    let spans = std::mem::take(&mut code.current);
                    code.lines.push(Line::from(spans));
                }
                _ => {}
            }
            return;
        }

        match tag.name.as_str() {
            "p" | "div" => self.end_line(),
            "br" => self.break_line(),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.end_block();
                self.push_style(Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD));
            }
            "strong" | "b" => self.push_style(Style::default().add_modifier(Modifier::BOLD)),
            "em" | "i" => self.push_style(Style::default().add_modifier(Modifier::ITALIC)),
            "del" | "s" => self.push_style(Style::default().add_modifier(Modifier::CROSSED_OUT)),
            "a" => self.push_style(Style::default().fg(Color::Blue).add_modifier(Modifier::UNDERLINED)),
            "code" => self.push_style(Style::default().fg(Color::Yellow)),
            "span" => {
                let patch = span_style(tag);
                self.push_style(patch);
            }
            "pre" => self.open_code_block(),
            "blockquote" => {
                self.end_block();
                self.quote_depth += 1;
                self.push_style(Style::default().fg(Color::Gray).add_modifier(Modifier::ITALIC));
            }
            "ul" => {
                self.end_line();
                self.lists.push(ListKind::Bullet);
            }
            "ol" => {
                self.end_line();
                let start = tag.attr("start").and_then(|s| s.parse().ok()).unwrap_or(1);
                self.lists.push(ListKind::Ordered(start));
            }
            "li" => {
                self.end_line();
                let depth = self.lists.len().saturating_sub(1);
                let marker = match self.lists.last_mut() {
                    Some(ListKind::Ordered(n)) => {
                        let marker = format!("{}. ", n);
                        *n += 1;
                        marker
                    }
                    _ => "• ".to_string(),
                };
                if let Some(prefix) = self.prefix() {
                    self.current.push(prefix);
                }
                self.current.push(Span::styled(
                    format!("{}{}", "  ".repeat(depth), marker),
                    Style::default().fg(Color::Cyan),
                ));
            }
            "input" if tag.attr("type") == Some("checkbox") => {
                let mark = if tag.attrs.contains("checked") { "[x] " } else { "[ ] " };
                self.current.push(Span::raw(mark));
            }
            "hr" => {
                self.end_block();
                self.lines.push(Line::from(Span::styled(
                    "─".repeat(24),
                    Style::default().fg(Color::DarkGray),
                )));
                self.lines.push(Line::default());
            }
            "table" => self.end_block(),
            "th" => {
                self.open_cell();
                self.push_style(Style::default().add_modifier(Modifier::BOLD));
            }
            "td" => self.open_cell(),
            _ => {}
        }
    }

    fn open_cell(&mut self) {
        if self.in_cell || !self.current.is_empty() {
            self.current.push(Span::styled(" │ ", Style::default().fg(Color::DarkGray)));
        }
        self.in_cell = true;
    }

    fn close(&mut self, tag: &Tag) {
        if let Some(code) = self.code.as_mut() {
            match tag.name.as_str() {
                "span" => self.pop_style(),
                "div" => code.in_label = false,
                "button" => code.in_button = false,
                "pre" => self.close_code_block(),
                _ => {}
            }
            return;
        }

        match tag.name.as_str() {
            "p" => self.end_block(),
            "div" => self.end_line(),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.pop_style();
                self.end_block();
            }
            "strong" | "b" | "em" | "i" | "del" | "s" | "a" | "code" | "span" | "th" => {
                self.pop_style()
            }
            "blockquote" => {
                self.pop_style();
                self.end_line();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.end_block();
            }
            "li" => self.end_line(),
            "ul" | "ol" => {
                self.lists.pop();
                if self.lists.is_empty() {
                    self.end_block();
                }
            }
            "tr" => {
                self.in_cell = false;
                self.end_line();
            }
            "table" => self.end_block(),
            _ => {}
        }
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        if self.code.is_some() {
            self.close_code_block();
        }
        self.end_line();
        while self.lines.last().is_some_and(|line| line.width() == 0) {
            self.lines.pop();
        }
        self.lines
    }
}

/// Foreground color and weight from an inline `style` attribute.
fn span_style(tag: &Tag) -> Style {
    let mut style = Style::default();
    let Some(css) = tag.attr("style") else {
        return style;
    };
    if let Some(hex) = color_pattern().captures(css).and_then(|caps| caps.get(1)) {
        if let Ok(rgb) = u32::from_str_radix(hex.as_str(), 16) {
            style = style.fg(Color::Rgb((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8));
        }
    }
    if css.contains("font-weight:bold") {
        style = style.add_modifier(Modifier::BOLD);
    }
    if css.contains("font-style:italic") {
        style = style.add_modifier(Modifier::ITALIC);
    }
    style
}

/// Converts rendered markup into lines, drawing copy controls through
/// `controls`.
pub fn markup_lines(
    html: &str,
    base: Style,
    controls: &dyn Fn(usize) -> CopyControl,
) -> Vec<Line<'static>> {
    let mut builder = LineBuilder::new(base, controls);

    for token in token_pattern().find_iter(html) {
        let token = token.as_str();
        if token.starts_with('<') {
            let tag = Tag::parse(token);
            if tag.closing {
                builder.close(&tag);
            } else {
                builder.open(&tag);
            }
        } else {
            builder.text(&unescape_html(token).replace("&nbsp;", " "));
        }
    }

    builder.finish()
}

/// Rows the lines take up once word-wrapped to `width` columns, counted the
/// same way the transcript paragraph is drawn.
pub fn wrapped_height(lines: &[Line], width: u16) -> u16 {
    let paragraph = Paragraph::new(Text::from(lines.to_vec())).wrap(Wrap { trim: false });
    u16::try_from(paragraph.line_count(width.max(1))).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_controls(_: usize) -> CopyControl {
        CopyControl {
            label: "Copy",
            selected: false,
        }
    }

    fn plain(lines: &[Line]) -> Vec<String> {
        lines
            .iter()
            .map(|line| line.spans.iter().map(|span| span.content.as_ref()).collect())
            .collect()
    }

    #[test]
    fn test_paragraphs_and_breaks() {
        let lines = markup_lines(
            "<p>first<br />\nsecond</p>\n<p>third</p>\n",
            Style::default(),
            &no_controls,
        );
        assert_eq!(plain(&lines), vec!["first", "second", "", "third"]);
    }

    #[test]
    fn test_entities_are_decoded() {
        let lines = markup_lines("<p>a &lt;b&gt; &amp; &quot;c&quot;</p>", Style::default(), &no_controls);
        assert_eq!(plain(&lines), vec![r#"a <b> & "c""#]);
    }

    #[test]
    fn test_inline_styles() {
        let lines = markup_lines(
            "<p><strong>bold</strong> and <code>code</code></p>",
            Style::default(),
            &no_controls,
        );
        let spans = &lines[0].spans;
        assert!(spans[0].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(spans[2].content, "code");
        assert_eq!(spans[2].style.fg, Some(Color::Yellow));
    }

    #[test]
    fn test_enhanced_code_block() {
        let html = concat!(
            r#"<pre class="code-block"><code class="language-rust hljs">"#,
            r#"<span style="color:#cc99cc;">fn</span> main() {}"#,
            "\n",
            r#"</code><div class="language-label">rust</div>"#,
            r#"<button class="copy-button" data-code-index="0">Copy</button></pre>"#,
        );
        let controls = |index: usize| CopyControl {
            label: if index == 0 { "Copied!" } else { "Copy" },
            selected: true,
        };
        let lines = markup_lines(html, Style::default(), &controls);

        assert_eq!(plain(&lines), vec!["┌─ rust [Copied!]", "│ fn main() {}", "└─"]);
        let keyword = &lines[1].spans[1];
        assert_eq!(keyword.style.fg, Some(Color::Rgb(0xcc, 0x99, 0xcc)));
    }

    #[test]
    fn test_code_block_keeps_indentation() {
        let html = "<pre><code>if x {\n    y\n}</code></pre>";
        let lines = markup_lines(html, Style::default(), &no_controls);
        assert_eq!(plain(&lines), vec!["┌─ ", "│ if x {", "│     y", "│ }", "└─"]);
    }

    #[test]
    fn test_lists() {
        let html = "<ul>\n<li>one</li>\n<li>two</li>\n</ul>\n<ol start=\"3\">\n<li>three</li>\n</ol>";
        let lines = markup_lines(html, Style::default(), &no_controls);
        assert_eq!(plain(&lines), vec!["• one", "• two", "", "3. three"]);
    }

    #[test]
    fn test_blockquote_prefix() {
        let lines = markup_lines("<blockquote>\n<p>quoted</p>\n</blockquote>", Style::default(), &no_controls);
        assert_eq!(plain(&lines)[0], "│ quoted");
    }

    #[test]
    fn test_wrapped_height() {
        let lines = vec![Line::from("x".repeat(25)), Line::default(), Line::from("short")];
        assert_eq!(wrapped_height(&lines, 10), 5);
    }

    #[test]
    fn test_wrapped_height_breaks_at_words() {
        // 20 characters, but no word fits next to another within 10 columns
        let lines = vec![Line::from("aaaaaa bbbbbb cccccc")];
        assert_eq!(wrapped_height(&lines, 10), 3);
        assert_eq!(wrapped_height(&lines, 20), 1);
    }
}
