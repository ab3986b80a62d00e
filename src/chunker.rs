//! Reply chunking: split assistant text into WhatsApp-sized messages.
//!
//! The pipeline runs in stages, each testable on its own:
//!
//! 1. Collapse doubled emphasis (`**word**` → `*word*`); WhatsApp uses single
//!    asterisks for bold.
//! 2. Short replies are returned whole.
//! 3. [`segment`] lexes lines (blank, numbered item, plain) and groups them
//!    into blocks. A numbered item keeps its continuation lines.
//! 4. [`pack`] greedily merges blocks while the chunk stays under the
//!    packing ceiling. Text without block structure is split into sentences
//!    and packed the same way.
//! 5. Every chunk is trimmed, blank-line runs collapsed, and empties dropped.

mod pack;
mod segment;

use crate::MessageChunk;
use crate::config::ChunkerConfig;
use regex::Regex;
use std::sync::LazyLock;

static DOUBLE_EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("hardcoded emphasis regex"));

static BLANK_LINE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*(?:\n[ \t]*)+\n").expect("hardcoded blank run regex"));

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Collapse `**word**` into `*word*`. Idempotent.
pub fn normalize_emphasis(text: &str) -> String {
    DOUBLE_EMPHASIS.replace_all(text, "*$1*").into_owned()
}

/// Split a reply into send-ready message texts, in order.
///
/// Deterministic and pure: the same input always yields the same chunks.
/// Returns an empty vector when there is nothing to send.
pub fn split(text: &str, config: &ChunkerConfig) -> Vec<String> {
    let normalized = normalize_emphasis(text);
    let trimmed = normalized.trim();

    if trimmed.is_empty() {
        return Vec::new();
    }
    if char_len(trimmed) < config.short_message_chars {
        return vec![trimmed.to_string()];
    }

    let blocks = segment::blocks(trimmed);
    let parts = match blocks.as_slice() {
        [only] if only.kind == segment::BlockKind::Paragraph => {
            pack::pack_sentences(&only.text, config)
        }
        _ => pack::pack_blocks(&blocks, config),
    };

    parts.iter().filter_map(|part| finish(part)).collect()
}

/// [`split`], numbered for dispatch.
pub fn split_into_chunks(text: &str, config: &ChunkerConfig) -> Vec<MessageChunk> {
    MessageChunk::sequence(split(text, config))
}

fn finish(part: &str) -> Option<String> {
    let trimmed = part.trim();
    if trimmed.is_empty() {
        return None;
    }
    let collapsed = BLANK_LINE_RUN.replace_all(trimmed, "\n\n");
    Some(normalize_emphasis(&collapsed))
}
