//! Lexing reply text into lines and blocks, and paragraphs into sentences.

use regex::Regex;
use std::sync::LazyLock;

/// A line opening a numbered list item: `1.` followed by anything but a digit
/// (so `3.5 kg` is not a list item).
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+\.(?:\D|$)").expect("hardcoded list marker regex"));

/// `1.Text` at the start of a line, missing the space after the numeral.
static CRAMPED_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*\d+)\.([^\s\d])").expect("hardcoded cramped marker regex"));

/// A bare numeral word such as `1.` or `12.`.
static NUMERAL_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.$").expect("hardcoded numeral regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LineKind {
    Blank,
    ListItem,
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Line {
    pub kind: LineKind,
    pub text: String,
}

pub(super) fn lex_lines(text: &str) -> Vec<Line> {
    text.lines()
        .map(|raw| {
            let line = raw.trim_end();
            if line.trim().is_empty() {
                Line {
                    kind: LineKind::Blank,
                    text: String::new(),
                }
            } else if LIST_MARKER.is_match(line) {
                Line {
                    kind: LineKind::ListItem,
                    text: CRAMPED_MARKER.replace(line, "$1. $2").into_owned(),
                }
            } else {
                Line {
                    kind: LineKind::Plain,
                    text: line.to_string(),
                }
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BlockKind {
    Paragraph,
    /// A numbered item plus its continuation lines. Never split.
    ListItem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Block {
    pub kind: BlockKind,
    pub text: String,
    /// Whether a blank line separated this block from the previous one.
    pub after_blank: bool,
}

impl Block {
    pub fn separator(&self) -> &'static str {
        if self.after_blank { "\n\n" } else { "\n" }
    }
}

/// Group lines into blocks along blank lines and list markers.
pub(super) fn blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;
    let mut pending_blank = false;

    for line in lex_lines(text) {
        match line.kind {
            LineKind::Blank => {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                pending_blank = true;
            }
            LineKind::ListItem => {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                current = Some(Block {
                    kind: BlockKind::ListItem,
                    text: line.text,
                    after_blank: pending_blank,
                });
                pending_blank = false;
            }
            LineKind::Plain => match current.as_mut() {
                Some(block) => {
                    block.text.push('\n');
                    block.text.push_str(&line.text);
                }
                None => {
                    current = Some(Block {
                        kind: BlockKind::Paragraph,
                        text: line.text,
                        after_blank: pending_blank,
                    });
                    pending_blank = false;
                }
            },
        }
    }

    if let Some(block) = current {
        blocks.push(block);
    }

    // The first block has nothing before it.
    if let Some(first) = blocks.first_mut() {
        first.after_blank = false;
    }

    blocks
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WordKind {
    Url,
    Numeral,
    Text,
}

fn word_kind(word: &str) -> WordKind {
    if word.starts_with("http://") || word.starts_with("https://") {
        WordKind::Url
    } else if NUMERAL_WORD.is_match(word) {
        WordKind::Numeral
    } else {
        WordKind::Text
    }
}

/// A sentence together with the separator that joins it to the previous one
/// (`" "` or `"\n"`). The first sentence's separator is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Sentence {
    pub separator: &'static str,
    pub text: String,
}

/// Split a paragraph into sentences.
///
/// A boundary is any whitespace run containing a newline, or a whitespace
/// run following a word that ends in `.`, `!` or `?`. Words are never split,
/// so URLs survive intact; a URL or a bare list numeral (`1.`) never ends a
/// sentence on its own.
pub(super) fn sentences(paragraph: &str) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut separator = "";
    let mut rest = paragraph.trim();

    while !rest.is_empty() {
        let word_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (word, after) = rest.split_at(word_end);
        current.push_str(word);

        let gap_end = after
            .find(|c: char| !c.is_whitespace())
            .unwrap_or(after.len());
        let (gap, remaining) = after.split_at(gap_end);
        rest = remaining;

        if gap.is_empty() || rest.is_empty() {
            continue;
        }

        let ends_sentence = word.ends_with(['.', '!', '?'])
            && matches!(word_kind(word), WordKind::Text);
        if gap.contains('\n') || ends_sentence {
            sentences.push(Sentence {
                separator,
                text: std::mem::take(&mut current),
            });
            separator = if gap.contains('\n') { "\n" } else { " " };
        } else {
            current.push_str(gap);
        }
    }

    if !current.is_empty() {
        sentences.push(Sentence {
            separator,
            text: current,
        });
    }

    sentences
}
