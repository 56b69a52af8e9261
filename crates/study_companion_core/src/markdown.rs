//! crates/study_companion_core/src/markdown.rs
//!
//! A line-oriented parser for the constrained markdown dialect the model is asked
//! to write: headings, blockquotes, fenced code, nested lists and paragraphs,
//! with bold/italic/code inline spans.
//!
//! Parsing never fails. Anything the dialect does not recognise is kept as literal text.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static CODE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("code span pattern is valid"));
static BOLD_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("bold pattern is valid"));
static ITALIC_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*]+)\*").expect("italic pattern is valid"));
static ORDERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\. (.*)$").expect("ordered item pattern is valid"));

const TAB_WIDTH: usize = 4;

//=========================================================================================
// Display Tree
//=========================================================================================

/// An inline span inside a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum Inline {
    Text(String),
    Bold(String),
    Italic(String),
    Code(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListItem {
    pub content: Vec<Inline>,
    /// Sublists in source order. Consecutive sublists of one type are merged.
    pub children: Vec<List>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct List {
    pub ordered: bool,
    /// The number of the first item of an ordered list.
    pub start: Option<u64>,
    pub items: Vec<ListItem>,
}

/// A block-level node. Multi-line blocks keep one `Vec<Inline>` per source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Heading { level: u8, content: Vec<Inline> },
    Paragraph { lines: Vec<Vec<Inline>> },
    BlockQuote { lines: Vec<Vec<Inline>> },
    CodeBlock { language: Option<String>, content: String },
    List(List),
}

//=========================================================================================
// Inline Spans
//=========================================================================================

/// Splits a line into inline spans.
///
/// Code spans are resolved first, then bold, then italic. Each pass only looks at
/// text the previous passes left unmatched, so spans never nest or overlap.
pub fn parse_inline(line: &str) -> Vec<Inline> {
    let mut spans = vec![Inline::Text(line.to_string())];
    spans = split_spans(spans, &CODE_SPAN, Inline::Code);
    spans = split_spans(spans, &BOLD_SPAN, Inline::Bold);
    spans = split_spans(spans, &ITALIC_SPAN, Inline::Italic);
    spans
}

fn split_spans(spans: Vec<Inline>, pattern: &Regex, styled: fn(String) -> Inline) -> Vec<Inline> {
    let mut out = Vec::with_capacity(spans.len());
    for span in spans {
        let Inline::Text(text) = span else {
            out.push(span);
            continue;
        };
        let mut last = 0;
        for caps in pattern.captures_iter(&text) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                out.push(Inline::Text(text[last..whole.start()].to_string()));
            }
            out.push(styled(inner.as_str().to_string()));
            last = whole.end();
        }
        if last < text.len() {
            out.push(Inline::Text(text[last..].to_string()));
        }
    }
    out
}

//=========================================================================================
// Block Parser
//=========================================================================================

enum LineKind<'a> {
    Blank,
    Fence(&'a str),
    Heading(u8, &'a str),
    Quote(&'a str),
    Item {
        indent: usize,
        ordered: Option<u64>,
        text: &'a str,
    },
    Plain(&'a str),
}

fn classify(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        return LineKind::Fence(rest.trim());
    }
    for (level, marker) in [(3u8, "### "), (2, "## "), (1, "# ")] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return LineKind::Heading(level, rest.trim());
        }
    }
    if trimmed == ">" {
        return LineKind::Quote("");
    }
    if let Some(rest) = trimmed.strip_prefix("> ") {
        return LineKind::Quote(rest);
    }

    let body = line.trim_start();
    let indent = line[..line.len() - body.len()]
        .chars()
        .map(|c| if c == '\t' { TAB_WIDTH } else { 1 })
        .sum();
    if let Some(text) = body.strip_prefix("* ").or_else(|| body.strip_prefix("- ")) {
        return LineKind::Item {
            indent,
            ordered: None,
            text: text.trim(),
        };
    }
    if let Some(caps) = ORDERED_ITEM.captures(body) {
        if let (Some(number), Some(text)) = (caps.get(1), caps.get(2)) {
            if let Ok(number) = number.as_str().parse::<u64>() {
                return LineKind::Item {
                    indent,
                    ordered: Some(number),
                    text: text.as_str().trim(),
                };
            }
        }
    }
    LineKind::Plain(trimmed)
}

#[derive(Default)]
struct Renderer {
    blocks: Vec<Block>,
    paragraph: Vec<Vec<Inline>>,
    quote: Vec<Vec<Inline>>,
    /// Open lists, innermost last, each with the indentation of its items.
    lists: Vec<(usize, List)>,
    code: Option<(Option<String>, Vec<String>)>,
}

impl Renderer {
    fn flush_paragraph(&mut self) {
        if !self.paragraph.is_empty() {
            let lines = std::mem::take(&mut self.paragraph);
            self.blocks.push(Block::Paragraph { lines });
        }
    }

    fn flush_quote(&mut self) {
        if !self.quote.is_empty() {
            let lines = std::mem::take(&mut self.quote);
            self.blocks.push(Block::BlockQuote { lines });
        }
    }

    /// Closes the innermost open list, attaching it to its parent's last item.
    fn close_innermost_list(&mut self) {
        let Some((_, list)) = self.lists.pop() else {
            return;
        };
        match self.lists.last_mut().and_then(|(_, parent)| parent.items.last_mut()) {
            Some(item) => match item.children.last_mut() {
                Some(previous) if previous.ordered == list.ordered => {
                    previous.items.extend(list.items)
                }
                _ => item.children.push(list),
            },
            None => self.blocks.push(Block::List(list)),
        }
    }

    fn flush_lists(&mut self) {
        while !self.lists.is_empty() {
            self.close_innermost_list();
        }
    }

    fn flush_all(&mut self) {
        self.flush_paragraph();
        self.flush_quote();
        self.flush_lists();
    }

    fn push_item(&mut self, indent: usize, ordered: Option<u64>, text: &str) {
        loop {
            match self.lists.last() {
                Some((top, list)) if indent == *top && list.ordered == ordered.is_some() => break,
                // Same depth but a different list type starts a fresh list.
                Some((top, _)) if indent == *top => {
                    self.close_innermost_list();
                    continue;
                }
                Some((top, _)) if indent < *top => {
                    self.close_innermost_list();
                    continue;
                }
                _ => {
                    self.lists.push((
                        indent,
                        List {
                            ordered: ordered.is_some(),
                            start: ordered,
                            items: Vec::new(),
                        },
                    ));
                    break;
                }
            }
        }
        if let Some((_, list)) = self.lists.last_mut() {
            list.items.push(ListItem {
                content: parse_inline(text),
                children: Vec::new(),
            });
        }
    }

    fn feed(&mut self, line: &str) {
        if let Some((_, body)) = self.code.as_mut() {
            if line.trim() == "```" {
                if let Some((language, body)) = self.code.take() {
                    self.blocks.push(Block::CodeBlock {
                        language,
                        content: body.join("\n"),
                    });
                }
            } else {
                body.push(line.to_string());
            }
            return;
        }

        match classify(line) {
            LineKind::Blank => self.flush_all(),
            LineKind::Fence(language) => {
                self.flush_all();
                let language = (!language.is_empty()).then(|| language.to_string());
                self.code = Some((language, Vec::new()));
            }
            LineKind::Heading(level, text) => {
                self.flush_all();
                self.blocks.push(Block::Heading {
                    level,
                    content: parse_inline(text),
                });
            }
            LineKind::Quote(text) => {
                self.flush_paragraph();
                self.flush_lists();
                self.quote.push(parse_inline(text));
            }
            LineKind::Item {
                indent,
                ordered,
                text,
            } => {
                self.flush_paragraph();
                self.flush_quote();
                self.push_item(indent, ordered, text);
            }
            LineKind::Plain(text) => {
                self.flush_quote();
                self.flush_lists();
                self.paragraph.push(parse_inline(text));
            }
        }
    }

    fn finish(mut self) -> Vec<Block> {
        // An unterminated fence keeps everything after it as code.
        if let Some((language, body)) = self.code.take() {
            self.blocks.push(Block::CodeBlock {
                language,
                content: body.join("\n"),
            });
        }
        self.flush_all();
        self.blocks
    }
}

/// Parses markdown text into a sequence of display blocks.
pub fn render(text: &str) -> Vec<Block> {
    let mut renderer = Renderer::default();
    for line in text.lines() {
        renderer.feed(line);
    }
    renderer.finish()
}

//=========================================================================================
// Output Formats
//=========================================================================================

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn inline_html(spans: &[Inline], out: &mut String) {
    for span in spans {
        match span {
            Inline::Text(t) => out.push_str(&escape_html(t)),
            Inline::Bold(t) => out.push_str(&format!("<strong>{}</strong>", escape_html(t))),
            Inline::Italic(t) => out.push_str(&format!("<em>{}</em>", escape_html(t))),
            Inline::Code(t) => out.push_str(&format!("<code>{}</code>", escape_html(t))),
        }
    }
}

fn lines_html(lines: &[Vec<Inline>], out: &mut String) {
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push_str("<br>");
        }
        inline_html(line, out);
    }
}

fn list_html(list: &List, out: &mut String) {
    match (list.ordered, list.start) {
        (true, Some(start)) if start != 1 => out.push_str(&format!("<ol start=\"{start}\">")),
        (true, _) => out.push_str("<ol>"),
        (false, _) => out.push_str("<ul>"),
    }
    for item in &list.items {
        out.push_str("<li>");
        inline_html(&item.content, out);
        for child in &item.children {
            list_html(child, out);
        }
        out.push_str("</li>");
    }
    out.push_str(if list.ordered { "</ol>" } else { "</ul>" });
}

/// Renders blocks as an HTML fragment with all text escaped.
pub fn to_html(blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks {
        match block {
            Block::Heading { level, content } => {
                out.push_str(&format!("<h{level}>"));
                inline_html(content, &mut out);
                out.push_str(&format!("</h{level}>"));
            }
            Block::Paragraph { lines } => {
                out.push_str("<p>");
                lines_html(lines, &mut out);
                out.push_str("</p>");
            }
            Block::BlockQuote { lines } => {
                out.push_str("<blockquote>");
                lines_html(lines, &mut out);
                out.push_str("</blockquote>");
            }
            Block::CodeBlock { language, content } => {
                match language {
                    Some(lang) => out.push_str(&format!(
                        "<pre><code class=\"language-{}\">",
                        escape_html(lang)
                    )),
                    None => out.push_str("<pre><code>"),
                }
                out.push_str(&escape_html(content));
                out.push_str("</code></pre>");
            }
            Block::List(list) => list_html(list, &mut out),
        }
    }
    out
}

fn inline_plain(spans: &[Inline]) -> String {
    spans
        .iter()
        .map(|span| match span {
            Inline::Text(t) | Inline::Bold(t) | Inline::Italic(t) | Inline::Code(t) => t.as_str(),
        })
        .collect()
}

fn list_plain(list: &List, depth: usize, out: &mut Vec<String>) {
    let mut number = list.start.unwrap_or(1);
    for item in &list.items {
        let marker = if list.ordered {
            let marker = format!("{number}.");
            number += 1;
            marker
        } else {
            "•".to_string()
        };
        out.push(format!("{}{} {}", "  ".repeat(depth), marker, inline_plain(&item.content)));
        for child in &item.children {
            list_plain(child, depth + 1, out);
        }
    }
}

/// Flattens blocks to plain text (markers removed), one blank line between blocks.
pub fn to_plain_text(blocks: &[Block]) -> String {
    let mut sections = Vec::with_capacity(blocks.len());
    for block in blocks {
        let section = match block {
            Block::Heading { content, .. } => inline_plain(content),
            Block::Paragraph { lines } | Block::BlockQuote { lines } => lines
                .iter()
                .map(|line| inline_plain(line))
                .collect::<Vec<_>>()
                .join("\n"),
            Block::CodeBlock { content, .. } => content.clone(),
            Block::List(list) => {
                let mut lines = Vec::new();
                list_plain(list, 0, &mut lines);
                lines.join("\n")
            }
        };
        sections.push(section);
    }
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Inline {
        Inline::Text(s.to_string())
    }

    #[test]
    fn inline_spans_are_split_left_to_right() {
        assert_eq!(
            parse_inline("a **b** c *d* `e`"),
            vec![
                text("a "),
                Inline::Bold("b".into()),
                text(" c "),
                Inline::Italic("d".into()),
                text(" "),
                Inline::Code("e".into()),
            ]
        );
    }

    #[test]
    fn markers_inside_code_stay_literal() {
        assert_eq!(
            parse_inline("`**not bold**`"),
            vec![Inline::Code("**not bold**".into())]
        );
    }

    #[test]
    fn stray_markers_are_literal_text() {
        assert_eq!(parse_inline("a ** b"), vec![text("a ** b")]);
        assert_eq!(parse_inline("open `tick"), vec![text("open `tick")]);
    }

    #[test]
    fn headings_quotes_and_paragraphs() {
        let blocks = render("# Title\n## Sub\n### Small\n> quoted\n> more\nplain one\nplain two\n\nnext");
        assert_eq!(blocks.len(), 6);
        assert_eq!(
            blocks[0],
            Block::Heading {
                level: 1,
                content: vec![text("Title")]
            }
        );
        assert!(matches!(&blocks[2], Block::Heading { level: 3, .. }));
        assert_eq!(
            blocks[3],
            Block::BlockQuote {
                lines: vec![vec![text("quoted")], vec![text("more")]]
            }
        );
        assert_eq!(
            blocks[4],
            Block::Paragraph {
                lines: vec![vec![text("plain one")], vec![text("plain two")]]
            }
        );
        assert_eq!(
            blocks[5],
            Block::Paragraph {
                lines: vec![vec![text("next")]]
            }
        );
    }

    #[test]
    fn fenced_code_is_verbatim() {
        let blocks = render("```rust\nlet x = **y**;\n\n# not a heading\n```\nafter");
        assert_eq!(
            blocks[0],
            Block::CodeBlock {
                language: Some("rust".into()),
                content: "let x = **y**;\n\n# not a heading".into()
            }
        );
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn unterminated_fence_runs_to_end() {
        let blocks = render("```\nline");
        assert_eq!(
            blocks,
            vec![Block::CodeBlock {
                language: None,
                content: "line".into()
            }]
        );
    }

    #[test]
    fn nested_lists_attach_to_previous_sibling() {
        let blocks = render("* one\n  * one-a\n  * one-b\n* two\n1. first");
        assert_eq!(blocks.len(), 2);
        let Block::List(list) = &blocks[0] else {
            panic!("expected a list");
        };
        assert!(!list.ordered);
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].children.len(), 1);
        let nested = &list.items[0].children[0];
        assert_eq!(nested.items.len(), 2);
        assert_eq!(nested.items[1].content, vec![text("one-b")]);
        assert!(list.items[1].children.is_empty());
        assert!(matches!(&blocks[1], Block::List(List { ordered: true, .. })));
    }

    #[test]
    fn ordered_lists_keep_their_start_number() {
        let blocks = render("3. c\n4. d");
        let Block::List(list) = &blocks[0] else {
            panic!("expected a list");
        };
        assert!(list.ordered);
        assert_eq!(list.start, Some(3));
        assert_eq!(list.items.len(), 2);
    }

    #[test]
    fn blank_line_ends_a_list() {
        let blocks = render("- a\n\n- b");
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn dedent_returns_to_outer_list() {
        let blocks = render("- a\n    - deep\n  - mid\n- b");
        let Block::List(list) = &blocks[0] else {
            panic!("expected a list");
        };
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].children.len(), 1);
        assert_eq!(list.items[0].children[0].items.len(), 2);
    }

    #[test]
    fn sublists_of_different_types_stay_separate() {
        let blocks = render("* a\n  * x\n  1. y");
        let Block::List(list) = &blocks[0] else {
            panic!("expected a list");
        };
        let children = &list.items[0].children;
        assert_eq!(children.len(), 2);
        assert!(!children[0].ordered);
        assert!(children[1].ordered);
        assert_eq!(children[1].items[0].content, vec![text("y")]);
        assert_eq!(
            to_html(&blocks),
            "<ul><li>a<ul><li>x</li></ul><ol><li>y</li></ol></li></ul>"
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let input = "# T\n* a **b**\n  1. c\n> q\n```\ncode\n```\n*unterminated";
        assert_eq!(render(input), render(input));
    }

    #[test]
    fn html_is_escaped() {
        let html = to_html(&render("# <b>\nuse **&** `<x>`"));
        assert_eq!(
            html,
            "<h1>&lt;b&gt;</h1><p>use <strong>&amp;</strong> <code>&lt;x&gt;</code></p>"
        );
    }

    #[test]
    fn plain_text_drops_markers() {
        let plain = to_plain_text(&render("## Key **ideas**\n* one\n  * two\n2. next"));
        assert_eq!(plain, "Key ideas\n\n• one\n  • two\n\n2. next");
    }
}
