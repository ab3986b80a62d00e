//! Greedy packing of blocks and sentences into chunks.

use super::char_len;
use super::segment::{self, Block, BlockKind};
use crate::config::ChunkerConfig;

/// Accumulates pieces into a chunk while it stays under the ceiling.
struct Packer {
    ceiling: usize,
    parts: Vec<String>,
    current: Option<String>,
}

impl Packer {
    fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            parts: Vec::new(),
            current: None,
        }
    }

    fn push(&mut self, separator: &str, piece: &str) {
        match self.current.as_mut() {
            Some(current)
                if char_len(current) + char_len(separator) + char_len(piece) < self.ceiling =>
            {
                current.push_str(separator);
                current.push_str(piece);
            }
            _ => {
                self.flush();
                self.current = Some(piece.to_string());
            }
        }
    }

    /// Emit a piece as its own chunk, closing whatever was open.
    fn push_alone(&mut self, piece: String) {
        self.flush();
        self.parts.push(piece);
    }

    fn flush(&mut self) {
        if let Some(current) = self.current.take() {
            self.parts.push(current);
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.parts
    }
}

/// Pack sentences of a single paragraph.
pub(super) fn pack_sentences(paragraph: &str, config: &ChunkerConfig) -> Vec<String> {
    let mut packer = Packer::new(config.pack_ceiling);
    for sentence in segment::sentences(paragraph) {
        packer.push(sentence.separator, &sentence.text);
    }
    packer.finish()
}

/// Pack consecutive blocks. Oversized paragraphs are broken into sentences
/// that pack with their neighbors like any other piece; oversized list items
/// are emitted whole.
///
/// Every chunk boundary is either an oversized list item or a piece that did
/// not fit, so packing the joined output again reproduces the same chunks.
pub(super) fn pack_blocks(blocks: &[Block], config: &ChunkerConfig) -> Vec<String> {
    let mut packer = Packer::new(config.pack_ceiling);

    for block in blocks {
        if char_len(&block.text) <= config.oversized_block {
            packer.push(block.separator(), &block.text);
            continue;
        }
        match block.kind {
            BlockKind::Paragraph => {
                for (index, sentence) in segment::sentences(&block.text).iter().enumerate() {
                    let separator = if index == 0 {
                        block.separator()
                    } else {
                        sentence.separator
                    };
                    packer.push(separator, &sentence.text);
                }
            }
            BlockKind::ListItem => packer.push_alone(block.text.clone()),
        }
    }

    packer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkerConfig {
        ChunkerConfig::default()
    }

    #[test]
    fn small_blocks_are_merged_until_the_ceiling() {
        let blocks = segment::blocks(&format!(
            "{}\n\n{}\n\n{}",
            "a".repeat(60),
            "b".repeat(60),
            "c".repeat(60)
        ));
        let parts = pack_blocks(&blocks, &config());

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], format!("{}\n\n{}", "a".repeat(60), "b".repeat(60)));
        assert_eq!(parts[1], "c".repeat(60));
    }

    #[test]
    fn oversized_list_item_is_emitted_alone() {
        let long_item = format!("2. {}", "x".repeat(300));
        let text = format!("1. curto\n{long_item}\n3. curto");
        let parts = pack_blocks(&segment::blocks(&text), &config());

        assert_eq!(parts, vec!["1. curto".to_string(), long_item, "3. curto".to_string()]);
    }

    #[test]
    fn oversized_paragraph_is_split_by_sentence() {
        let sentence = format!("{}.", "palavra ".repeat(12).trim_end());
        let paragraph = vec![sentence.clone(); 4].join(" ");
        let text = format!("Oi!\n\n{paragraph}");
        let parts = pack_blocks(&segment::blocks(&text), &config());

        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], format!("Oi!\n\n{sentence}"));
        assert!(parts[1..].iter().all(|part| part == &sentence));
    }

    #[test]
    fn sentences_of_an_oversized_paragraph_pack_with_the_previous_block() {
        let sentences: Vec<String> = ['a', 'b', 'c']
            .iter()
            .map(|letter| format!("{}.", letter.to_string().repeat(94)))
            .collect();
        let text = format!("Oi!\n\n{}", sentences.join(" "));

        let parts = pack_blocks(&segment::blocks(&text), &config());
        assert_eq!(
            parts,
            vec![
                format!("Oi!\n\n{}", sentences[0]),
                sentences[1].clone(),
                sentences[2].clone(),
            ]
        );

        let repacked = pack_blocks(&segment::blocks(&parts.join("\n\n")), &config());
        assert_eq!(repacked, parts);
    }

    #[test]
    fn sentences_pack_with_their_separators() {
        let parts = pack_sentences("Um. Dois.\nTrês.", &config());
        assert_eq!(parts, vec!["Um. Dois.\nTrês.".to_string()]);
    }
}
