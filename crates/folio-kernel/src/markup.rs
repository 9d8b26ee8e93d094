//! Minimal lexer for generated page markup.
//!
//! Generated artifacts are HTML-like documents. The lexer is deliberately
//! forgiving: it never fails, it reports what it sees with 1-based positions,
//! and leaves judgement to the structural validator.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::Range;
use std::sync::OnceLock;

/// Elements that never take a closing tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose bodies are raw text and never visible content.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind<'a> {
    Start {
        name: String,
        attrs: &'a str,
        self_closing: bool,
    },
    End {
        name: String,
    },
    Text(&'a str),
    /// Comments, doctype and processing instructions.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupToken<'a> {
    pub kind: TokenKind<'a>,
    pub position: Position,
    /// Byte range of the token in the source.
    pub span: Range<usize>,
}

impl MarkupToken<'_> {
    pub fn is_start_of(&self, tag: &str) -> bool {
        matches!(&self.kind, TokenKind::Start { name, .. } if name == tag)
    }
}

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(input: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(input.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn position(&self, input: &str, offset: usize) -> Position {
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.starts[line];
        Position {
            line: line + 1,
            column: input[start..offset].chars().count() + 1,
        }
    }
}

/// 1-based position of a byte offset.
pub fn position_at(input: &str, offset: usize) -> Position {
    LineIndex::new(input).position(input, offset.min(input.len()))
}

/// Tokenize markup into tags, text and ignored constructs.
pub fn lex(input: &str) -> Vec<MarkupToken<'_>> {
    let index = LineIndex::new(input);
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        let rest = &input[i..];

        if rest.starts_with("<!--") {
            push_text(&mut tokens, &index, input, text_start, i);
            let end = rest[4..].find("-->").map(|p| i + 4 + p + 3).unwrap_or(bytes.len());
            tokens.push(MarkupToken {
                kind: TokenKind::Ignored,
                position: index.position(input, i),
                span: i..end,
            });
            i = end;
            text_start = i;
            continue;
        }

        if rest.starts_with("<!") || rest.starts_with("<?") {
            push_text(&mut tokens, &index, input, text_start, i);
            let end = rest.find('>').map(|p| i + p + 1).unwrap_or(bytes.len());
            tokens.push(MarkupToken {
                kind: TokenKind::Ignored,
                position: index.position(input, i),
                span: i..end,
            });
            i = end;
            text_start = i;
            continue;
        }

        let closing = bytes.get(i + 1) == Some(&b'/');
        let name_start = if closing { i + 2 } else { i + 1 };
        if !bytes.get(name_start).is_some_and(u8::is_ascii_alphabetic) {
            // A literal '<' in text.
            i += 1;
            continue;
        }

        let name_end = input[name_start..]
            .find(|c: char| c.is_ascii_whitespace() || c == '/' || c == '>')
            .map(|p| name_start + p)
            .unwrap_or(bytes.len());
        let Some(tag_end) = find_tag_end(input, name_end) else {
            // Unterminated tag: everything left is text.
            break;
        };

        push_text(&mut tokens, &index, input, text_start, i);
        let name = input[name_start..name_end].to_ascii_lowercase();
        let position = index.position(input, i);

        if closing {
            tokens.push(MarkupToken {
                kind: TokenKind::End { name },
                position,
                span: i..tag_end + 1,
            });
            i = tag_end + 1;
            text_start = i;
            continue;
        }

        let inner = &input[name_end..tag_end];
        let self_closing = inner.trim_end().ends_with('/');
        let attrs = inner.trim().trim_end_matches('/').trim_end();
        let raw = RAW_TEXT_ELEMENTS.contains(&name.as_str()) && !self_closing;
        tokens.push(MarkupToken {
            kind: TokenKind::Start {
                name: name.clone(),
                attrs,
                self_closing,
            },
            position,
            span: i..tag_end + 1,
        });
        i = tag_end + 1;
        text_start = i;

        if raw {
            let close = format!("</{name}");
            let body_end = find_ascii_case_insensitive(&input[i..], &close)
                .map(|p| i + p)
                .unwrap_or(bytes.len());
            push_text(&mut tokens, &index, input, i, body_end);
            i = body_end;
            text_start = i;
        }
    }

    push_text(&mut tokens, &index, input, text_start, bytes.len());
    tokens
}

fn push_text<'a>(
    tokens: &mut Vec<MarkupToken<'a>>,
    index: &LineIndex,
    input: &'a str,
    from: usize,
    to: usize,
) {
    if from < to {
        tokens.push(MarkupToken {
            kind: TokenKind::Text(&input[from..to]),
            position: index.position(input, from),
            span: from..to,
        });
    }
}

/// Find the `>` closing a tag, skipping quoted attribute values.
fn find_tag_end(input: &str, from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (offset, &b) in input.as_bytes()[from..].iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(from + offset),
            None => {}
        }
    }
    None
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || hay.len() < needle.len() {
        return None;
    }
    (0..=hay.len() - needle.len()).find(|&start| hay[start..start + needle.len()].eq_ignore_ascii_case(needle))
}

fn class_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:^|\s)class\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .expect("class attribute regex must compile")
    })
}

/// Class names listed in a tag's attribute text.
pub fn class_list(attrs: &str) -> Vec<&str> {
    let Some(captures) = class_attr_re().captures(attrs) else {
        return Vec::new();
    };
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .or_else(|| captures.get(3))
        .map(|m| m.as_str().split_whitespace().collect())
        .unwrap_or_default()
}

/// Visible text of an artifact: tags removed, script/style bodies skipped,
/// common entities decoded, chunks joined by single spaces.
pub fn extract_text(input: &str) -> String {
    let mut chunks: Vec<String> = Vec::new();
    let mut raw_depth = 0usize;
    for token in lex(input) {
        match token.kind {
            TokenKind::Start {
                ref name,
                self_closing,
                ..
            } if !self_closing && RAW_TEXT_ELEMENTS.contains(&name.as_str()) => raw_depth += 1,
            TokenKind::End { ref name } if RAW_TEXT_ELEMENTS.contains(&name.as_str()) => {
                raw_depth = raw_depth.saturating_sub(1);
            }
            TokenKind::Text(text) if raw_depth == 0 => {
                let decoded = decode_entities(text);
                let trimmed = decoded.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            }
            _ => {}
        }
    }
    chunks.join(" ")
}

/// Inner markup of the first element carrying `class`, or `None`.
pub fn inner_of_class<'a>(input: &'a str, class: &str) -> Option<&'a str> {
    let tokens = lex(input);
    let (open_index, open) = tokens.iter().enumerate().find(|(_, t)| match &t.kind {
        TokenKind::Start {
            attrs,
            self_closing: false,
            name,
        } => !is_void(name) && class_list(attrs).contains(&class),
        _ => false,
    })?;
    let TokenKind::Start { name, .. } = &open.kind else {
        return None;
    };
    let mut depth = 0usize;
    for token in &tokens[open_index + 1..] {
        match &token.kind {
            TokenKind::Start {
                name: n,
                self_closing: false,
                ..
            } if n == name => depth += 1,
            TokenKind::End { name: n } if n == name => {
                if depth == 0 {
                    return Some(&input[open.span.end..token.span.start]);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp..];
        let decoded = after
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&after[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "hellip" => '\u{2026}',
        "bull" => '\u{2022}',
        "sect" => '\u{00A7}',
        "copy" => '\u{00A9}',
        _ => return None,
    })
}
