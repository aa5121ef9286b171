use std::collections::VecDeque;

use super::types::{Document, TextChunk};

/// Sizes are measured in characters, not bytes.
#[derive(Debug, Clone)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub sentence_aware: bool,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            sentence_aware: true,
        }
    }
}

pub struct TextSplitter {
    config: SplitterConfig,
}

impl TextSplitter {
    #[must_use]
    pub fn new(mut config: SplitterConfig) -> Self {
        config.chunk_size = config.chunk_size.max(1);
        Self { config }
    }

    #[must_use]
    pub fn split(&self, document: &Document) -> Vec<TextChunk> {
        let SplitterConfig {
            chunk_size,
            chunk_overlap,
            sentence_aware,
        } = self.config;
        let text = document.content.as_str();

        let raw = if sentence_aware {
            let mut pieces = Vec::new();
            for sentence in sentence_pieces(text) {
                if char_len(sentence) > chunk_size {
                    pieces.extend(char_windows(sentence, chunk_size, 0));
                } else {
                    pieces.push(sentence.to_owned());
                }
            }
            merge_pieces(&pieces, chunk_size, chunk_overlap)
        } else {
            char_windows(text, chunk_size, chunk_overlap)
        };

        raw.iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .enumerate()
            .map(|(chunk_index, content)| TextChunk {
                source: document.source.clone(),
                chunk_index,
                content: content.to_owned(),
            })
            .collect()
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Cut `text` into contiguous pieces ending at sentence punctuation followed by
/// whitespace, or at blank lines. Concatenating the pieces yields `text` again.
fn sentence_pieces(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let Some(&(next_idx, next)) = chars.peek() else {
            break;
        };
        let end = match (c, next) {
            ('\n', '\n') => {
                chars.next();
                next_idx + next.len_utf8()
            }
            ('.' | '?' | '!', n) if n.is_whitespace() => idx + c.len_utf8(),
            _ => continue,
        };
        pieces.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Greedily pack pieces into chunks of at most `chunk_size` characters, carrying the
/// trailing pieces that fit in `chunk_overlap` into the next chunk.
fn merge_pieces(pieces: &[String], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut window_len = 0;

    for piece in pieces {
        let len = char_len(piece);
        if !window.is_empty() && window_len + len > chunk_size {
            chunks.push(window.iter().copied().collect::<String>());

            // never carry the whole window, so every chunk adds new text
            let mut keep_from = window.len();
            let mut kept = 0;
            for (i, p) in window.iter().enumerate().skip(1).rev() {
                let l = char_len(p);
                if kept + l > chunk_overlap {
                    break;
                }
                kept += l;
                keep_from = i;
            }
            window.drain(..keep_from);
            window_len = kept;
        }
        while window_len + len > chunk_size {
            let Some(dropped) = window.pop_front() else {
                break;
            };
            window_len -= char_len(dropped);
        }
        window.push_back(piece);
        window_len += len;
    }

    if !window.is_empty() {
        chunks.push(window.iter().copied().collect());
    }
    chunks
}

fn char_windows(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}
