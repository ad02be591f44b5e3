//! Markdown to structured document conversion.
//!
//! The structure mirrors the rich-text editor's schema: block nodes holding
//! runs of text with formatting marks.

use once_cell::sync::Lazy;
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use regex::Regex;

/// Elements whose contents are never document text
static HIDDEN_HTML: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<!--.*?-->|<script\b.*?</script\s*>|<style\b.*?</style\s*>")
        .expect("valid hidden html pattern")
});

/// Tags that start a new paragraph in the editor
static BLOCK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)</?(address|article|aside|blockquote|br|details|div|dd|dl|dt|figcaption|figure|footer|h[1-6]|header|hr|li|main|nav|ol|p|pre|section|summary|table|tbody|td|th|thead|tr|ul)\b[^>]*>",
    )
    .expect("valid block tag pattern")
});

/// Any other tag, including JSX components
static ANY_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("valid tag pattern"));

static BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t]*\n").expect("valid blank line pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mark {
    Bold,
    Italic,
    Strike,
    Code,
    Link { href: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text { text: String, marks: Vec<Mark> },
    HardBreak,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListItem {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, content: Vec<Inline> },
    Paragraph(Vec<Inline>),
    BulletList(Vec<ListItem>),
    OrderedList { start: u64, items: Vec<ListItem> },
    CodeBlock { language: Option<String>, text: String },
    Blockquote(Vec<Block>),
    HorizontalRule,
}

/// Converted document, top-level blocks in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredDoc {
    pub blocks: Vec<Block>,
}

impl StructuredDoc {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Trait abstracting markdown conversion for testability
pub trait MarkdownConverter: Send + Sync {
    fn to_structured(&self, markdown: &str) -> StructuredDoc;
}

/// CommonMark (plus strikethrough) converter
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonMarkConverter;

impl MarkdownConverter for CommonMarkConverter {
    fn to_structured(&self, markdown: &str) -> StructuredDoc {
        let mut builder = Builder::default();
        for event in Parser::new_ext(markdown, Options::ENABLE_STRIKETHROUGH) {
            builder.event(event);
        }
        builder.finish()
    }
}

/// Open container while walking the event stream
enum Frame {
    Paragraph { content: Vec<Inline>, implicit: bool },
    Heading { level: u8, content: Vec<Inline> },
    CodeBlock { language: Option<String>, text: String },
    Blockquote(Vec<Block>),
    List { start: Option<u64>, items: Vec<ListItem> },
    Item(Vec<Block>),
    Html(String),
}

#[derive(Default)]
struct Builder {
    blocks: Vec<Block>,
    stack: Vec<Frame>,
    marks: Vec<Mark>,
}

impl Builder {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => match self.stack.last_mut() {
                Some(Frame::CodeBlock { text: code, .. } | Frame::Html(code)) => code.push_str(&text),
                _ => self.push_text(&text, None),
            },
            Event::Code(code) => self.push_text(&code, Some(Mark::Code)),
            Event::Html(html) => match self.stack.last_mut() {
                Some(Frame::Html(raw)) => raw.push_str(&html),
                _ => self.html_block(&html),
            },
            Event::InlineHtml(html) => self.inline_html(&html),
            Event::SoftBreak => self.push_text(" ", None),
            Event::HardBreak => self.inline_target().push(Inline::HardBreak),
            Event::Rule => {
                self.close_implicit();
                self.emit(Block::HorizontalRule);
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {
                self.close_implicit();
                self.stack.push(Frame::Paragraph {
                    content: Vec::new(),
                    implicit: false,
                });
            }
            Tag::Heading { level, .. } => {
                self.close_implicit();
                self.stack.push(Frame::Heading {
                    level: level as u8,
                    content: Vec::new(),
                });
            }
            Tag::BlockQuote { .. } => {
                self.close_implicit();
                self.stack.push(Frame::Blockquote(Vec::new()));
            }
            Tag::CodeBlock(kind) => {
                self.close_implicit();
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(str::to_string),
                    CodeBlockKind::Indented => None,
                };
                self.stack.push(Frame::CodeBlock {
                    language,
                    text: String::new(),
                });
            }
            Tag::List(start) => {
                self.close_implicit();
                self.stack.push(Frame::List {
                    start,
                    items: Vec::new(),
                });
            }
            Tag::Item => self.stack.push(Frame::Item(Vec::new())),
            Tag::HtmlBlock => {
                self.close_implicit();
                self.stack.push(Frame::Html(String::new()));
            }
            Tag::Emphasis => self.marks.push(Mark::Italic),
            Tag::Strong => self.marks.push(Mark::Bold),
            Tag::Strikethrough => self.marks.push(Mark::Strike),
            Tag::Link { dest_url, .. } => self.marks.push(Mark::Link {
                href: dest_url.to_string(),
            }),
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph
            | TagEnd::Heading { .. }
            | TagEnd::CodeBlock
            | TagEnd::BlockQuote { .. }
            | TagEnd::List { .. } => {
                self.close_implicit();
                if let Some(block) = self.stack.pop().and_then(Frame::into_block) {
                    self.emit(block);
                }
            }
            TagEnd::Item => {
                self.close_implicit();
                if let Some(Frame::Item(blocks)) = self.stack.pop() {
                    if let Some(Frame::List { items, .. }) = self.stack.last_mut() {
                        items.push(ListItem { blocks });
                    }
                }
            }
            TagEnd::HtmlBlock => {
                if let Some(Frame::Html(raw)) = self.stack.pop() {
                    self.html_block(&raw);
                }
            }
            TagEnd::Emphasis => self.pop_mark(|m| *m == Mark::Italic),
            TagEnd::Strong => self.pop_mark(|m| *m == Mark::Bold),
            TagEnd::Strikethrough => self.pop_mark(|m| *m == Mark::Strike),
            TagEnd::Link => self.pop_mark(|m| matches!(m, Mark::Link { .. })),
            _ => {}
        }
    }

    fn pop_mark(&mut self, is_match: impl Fn(&Mark) -> bool) {
        if let Some(pos) = self.marks.iter().rposition(is_match) {
            self.marks.remove(pos);
        }
    }

    /// Inline content of the innermost text block, opening an implicit
    /// paragraph when text sits directly in a tight list item or a quote
    fn inline_target(&mut self) -> &mut Vec<Inline> {
        let needs_paragraph = !matches!(
            self.stack.last(),
            Some(Frame::Paragraph { .. } | Frame::Heading { .. })
        );
        if needs_paragraph {
            self.stack.push(Frame::Paragraph {
                content: Vec::new(),
                implicit: true,
            });
        }
        match self.stack.last_mut() {
            Some(Frame::Paragraph { content, .. } | Frame::Heading { content, .. }) => content,
            _ => unreachable!("a text block was pushed above"),
        }
    }

    fn push_text(&mut self, text: &str, extra: Option<Mark>) {
        let mut marks = self.marks.clone();
        if let Some(mark) = extra {
            marks.push(mark);
        }
        let content = self.inline_target();
        // Merge with the previous run when formatting is identical
        if let Some(Inline::Text {
            text: prev,
            marks: prev_marks,
        }) = content.last_mut()
        {
            if *prev_marks == marks {
                prev.push_str(text);
                return;
            }
        }
        content.push(Inline::Text {
            text: text.to_string(),
            marks,
        });
    }

    /// Keep the text of a raw HTML block as plain paragraphs
    fn html_block(&mut self, raw: &str) {
        for text in html_paragraphs(raw) {
            self.emit(Block::Paragraph(vec![Inline::Text {
                text,
                marks: Vec::new(),
            }]));
        }
    }

    /// Inline tags carry no text of their own; a `<br>` becomes a line break
    fn inline_html(&mut self, tag: &str) {
        let tag = tag.trim();
        let is_break = match (tag.get(..3), tag.get(3..)) {
            (Some(open), Some(rest)) => {
                open.eq_ignore_ascii_case("<br")
                    && rest.trim_start_matches(|c: char| c.is_whitespace() || c == '/') == ">"
            }
            _ => false,
        };
        if is_break {
            self.inline_target().push(Inline::HardBreak);
        }
    }

    fn close_implicit(&mut self) {
        if matches!(self.stack.last(), Some(Frame::Paragraph { implicit: true, .. })) {
            if let Some(block) = self.stack.pop().and_then(Frame::into_block) {
                self.emit(block);
            }
        }
    }

    /// Append a finished block to the innermost block container
    fn emit(&mut self, block: Block) {
        match self.stack.last_mut() {
            Some(Frame::Blockquote(blocks) | Frame::Item(blocks)) => blocks.push(block),
            _ => self.blocks.push(block),
        }
    }

    fn finish(mut self) -> StructuredDoc {
        while !self.stack.is_empty() {
            self.close_implicit();
            if let Some(block) = self.stack.pop().and_then(Frame::into_block) {
                self.emit(block);
            }
        }
        StructuredDoc {
            blocks: self.blocks,
        }
    }
}

impl Frame {
    fn into_block(self) -> Option<Block> {
        Some(match self {
            Self::Paragraph { content, .. } => Block::Paragraph(content),
            Self::Heading { level, content } => Block::Heading { level, content },
            Self::CodeBlock { language, text } => Block::CodeBlock {
                language,
                text: text.strip_suffix('\n').map(str::to_string).unwrap_or(text),
            },
            Self::Blockquote(blocks) => Block::Blockquote(blocks),
            Self::List {
                start: Some(start),
                items,
            } => Block::OrderedList { start, items },
            Self::List { start: None, items } => Block::BulletList(items),
            Self::Item(_) | Self::Html(_) => return None,
        })
    }
}

/// Visible text of an HTML fragment, one entry per paragraph
fn html_paragraphs(raw: &str) -> Vec<String> {
    let visible = HIDDEN_HTML.replace_all(raw, "");
    let separated = BLOCK_TAG.replace_all(&visible, "\n\n");
    let text = ANY_TAG.replace_all(&separated, "");
    BLANK_LINES
        .split(&text)
        .map(|chunk| {
            decode_entities(chunk)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
