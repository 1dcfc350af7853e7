use crate::error::IngestError;
use crate::models::Chunk;
use regex::Regex;

const SENTENCE_BOUNDARY: &str = r"[.!?;]+\s+";

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Upper bound on chunk length, in characters.
    pub chunk_size: usize,
    pub overlap: usize,
    pub min_chunk_chars: usize,
    /// Documents longer than one chunk are re-windowed when sentence packing
    /// yields fewer chunks than this.
    pub min_chunks: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            overlap: 200,
            min_chunk_chars: 30,
            min_chunks: 3,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk_size {}",
                self.overlap, self.chunk_size
            )));
        }
        if self.min_chunk_chars > self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "min_chunk_chars {} exceeds chunk_size {}",
                self.min_chunk_chars, self.chunk_size
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Collapses whitespace inside paragraphs and keeps blank-line paragraph breaks.
pub fn clean_text(text: &str) -> String {
    let mut paragraphs = Vec::new();
    let mut current = Vec::new();

    for line in text.lines() {
        let line = normalize_whitespace(line);
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }

    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    paragraphs.join("\n\n")
}

pub fn chunk_text(
    text: &str,
    source_document: &str,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;

    let cleaned = clean_text(text);
    if cleaned.is_empty() {
        return Ok(Vec::new());
    }

    let mut pieces = split_by_sentences(&cleaned, config)?;
    pieces.retain(|piece| char_len(piece) >= config.min_chunk_chars);

    if pieces.len() < config.min_chunks && char_len(&cleaned) > config.chunk_size {
        pieces = fallback_windows(&cleaned, config);
        pieces.retain(|piece| char_len(piece) >= config.min_chunk_chars);
    }

    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            text,
            index,
            source_document: source_document.to_string(),
        })
        .collect())
}

fn split_by_sentences(cleaned: &str, config: &ChunkingConfig) -> Result<Vec<String>, IngestError> {
    let boundary = Regex::new(SENTENCE_BOUNDARY)?;
    let units = cleaned
        .split("\n\n")
        .flat_map(|paragraph| sentence_units(paragraph, &boundary))
        .collect::<Vec<_>>();

    let mut chunks = Vec::new();
    let mut current = String::new();
    // `current` may hold only the overlap carried from the previous chunk.
    let mut has_fresh_text = false;

    for sentence in units {
        let joined = join_units(&current, sentence);
        if char_len(&joined) <= config.chunk_size {
            current = joined;
            has_fresh_text = true;
            continue;
        }

        // Every chunk after the first opens with the tail of the one before it.
        let prefix = if has_fresh_text && char_len(&current) >= config.min_chunk_chars {
            chunks.push(current.clone());
            overlap_tail(&current, config.overlap)
        } else {
            current.clone()
        };

        let carried = join_units(&prefix, sentence);
        if char_len(&carried) <= config.chunk_size {
            current = carried;
            has_fresh_text = true;
            continue;
        }

        let mut windows = fixed_windows(&carried, config.chunk_size, config.overlap);
        // A short last window would be dropped later; keep building on it instead.
        match windows.pop() {
            Some(last) if char_len(&last) < config.min_chunk_chars => {
                current = last;
                has_fresh_text = true;
            }
            Some(last) => {
                current = overlap_tail(&last, config.overlap);
                windows.push(last);
                has_fresh_text = false;
            }
            None => {
                current.clear();
                has_fresh_text = false;
            }
        }
        chunks.extend(windows);
    }

    if has_fresh_text {
        chunks.push(current);
    }

    Ok(chunks)
}

fn join_units(head: &str, tail: &str) -> String {
    if head.is_empty() {
        tail.to_string()
    } else {
        format!("{head} {tail}")
    }
}

fn sentence_units<'a>(paragraph: &'a str, boundary: &Regex) -> Vec<&'a str> {
    let mut units = Vec::new();
    let mut start = 0;

    for found in boundary.find_iter(paragraph) {
        let piece = paragraph[start..found.end()].trim();
        if !piece.is_empty() {
            units.push(piece);
        }
        start = found.end();
    }

    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        units.push(tail);
    }

    units
}

/// Last `overlap` characters of `text`, advanced to a word boundary when possible.
fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= overlap {
        return text.trim().to_string();
    }

    let tail: String = chars[chars.len() - overlap..].iter().collect();
    match tail.find(char::is_whitespace) {
        Some(position) if !tail[position..].trim().is_empty() => {
            tail[position..].trim_start().to_string()
        }
        _ => tail,
    }
}

fn fixed_windows(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            windows.push(piece.to_string());
        }
        if end == chars.len() {
            break;
        }
        start = start.saturating_add(step);
    }

    windows
}

fn fallback_windows(cleaned: &str, config: &ChunkingConfig) -> Vec<String> {
    let total = char_len(cleaned);
    let window = total
        .div_ceil(config.min_chunks.max(1))
        .clamp(config.min_chunk_chars.max(1), config.chunk_size);
    let overlap = config.overlap.min(window / 4);
    fixed_windows(cleaned, window, overlap)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_text(sentences: usize) -> String {
        (0..sentences)
            .map(|index| {
                format!(
                    "Clause {index} states that the insured person must notify the insurer within {index} days."
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn clean_text_keeps_paragraph_breaks() {
        let cleaned = clean_text("First   line\ncontinues here\n\n\n  Second\tparagraph ");
        assert_eq!(cleaned, "First line continues here\n\nSecond paragraph");
    }

    #[test]
    fn chunks_respect_size_bound_and_overlap() {
        let config = ChunkingConfig {
            chunk_size: 200,
            overlap: 50,
            min_chunk_chars: 30,
            min_chunks: 3,
        };
        let chunks = chunk_text(&policy_text(30), "doc-1", &config).expect("chunking succeeds");

        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= config.chunk_size);
            assert_eq!(chunk.source_document, "doc-1");
        }
        for pair in chunks.windows(2) {
            let head: String = pair[1].text.chars().take(10).collect();
            assert!(
                pair[0].text.contains(&head),
                "expected {:?} to carry overlap from {:?}",
                pair[1].text,
                pair[0].text
            );
        }
        assert!(chunks.iter().enumerate().all(|(i, chunk)| chunk.index == i));
    }

    #[test]
    fn short_fragments_are_dropped() {
        let chunks = chunk_text("Ok.", "doc", &ChunkingConfig::default()).expect("chunking succeeds");
        assert!(chunks.is_empty());
    }

    #[test]
    fn small_document_stays_a_single_chunk() {
        let text = "A grace period of thirty days is provided for premium payment after the due date.";
        let chunks = chunk_text(text, "doc", &ChunkingConfig::default()).expect("chunking succeeds");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn falls_back_to_fixed_windows_when_sentences_are_too_coarse() {
        let long_sentence = |word: &str| {
            let mut sentence = std::iter::repeat(word).take(120).collect::<Vec<_>>().join(" ");
            sentence.push('.');
            sentence
        };
        let text = format!("{} {}", long_sentence("cover"), long_sentence("claim"));
        assert!(text.chars().count() > 1_000);

        let config = ChunkingConfig::default();
        let chunks = chunk_text(&text, "doc", &config).expect("chunking succeeds");

        assert!(chunks.len() >= config.min_chunks);
        assert!(chunks
            .iter()
            .all(|chunk| chunk.text.chars().count() <= config.chunk_size));
    }

    #[test]
    fn oversized_sentences_are_windowed() {
        let config = ChunkingConfig {
            chunk_size: 100,
            overlap: 20,
            min_chunk_chars: 10,
            min_chunks: 1,
        };
        let text = "x".repeat(350);
        let chunks = chunk_text(&text, "doc", &config).expect("chunking succeeds");
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|chunk| chunk.text.len() <= 100));
    }

    /// Longest prefix of `next` that `previous` ends with, in characters.
    fn shared_overlap(previous: &str, next: &str) -> usize {
        (1..=next.chars().count())
            .rev()
            .find(|&length| {
                let head: String = next.chars().take(length).collect();
                previous.ends_with(&head)
            })
            .unwrap_or(0)
    }

    fn assert_adjacent_overlap(chunks: &[Chunk]) {
        for pair in chunks.windows(2) {
            assert!(
                shared_overlap(&pair[0].text, &pair[1].text) >= 3,
                "{:?} does not open with the tail of {:?}",
                pair[1].text,
                pair[0].text
            );
        }
    }

    #[test]
    fn oversized_sentence_after_short_one_keeps_overlap() {
        let config = ChunkingConfig {
            chunk_size: 100,
            overlap: 20,
            min_chunk_chars: 10,
            min_chunks: 1,
        };
        let text = format!(
            "The grace period is thirty days for the premium payment due. {}",
            vec!["cover"; 60].join(" ")
        );

        let chunks = chunk_text(&text, "doc", &config).expect("chunking succeeds");

        assert!(chunks.len() >= 4);
        assert_eq!(chunks[0].text, "The grace period is thirty days for the premium payment due.");
        assert!(chunks.iter().all(|chunk| chunk.text.chars().count() <= config.chunk_size));
        assert_adjacent_overlap(&chunks);
    }

    #[test]
    fn sentence_filling_a_chunk_still_carries_overlap() {
        let config = ChunkingConfig {
            chunk_size: 100,
            overlap: 20,
            min_chunk_chars: 10,
            min_chunks: 1,
        };
        let first = "The insured must notify the insurer of each claim promptly.";
        let second = "Room rent is capped at one percent of the sum insured per day and ICU charges at two percent, daily.";
        assert_eq!(first.chars().count(), 59);
        assert_eq!(second.chars().count(), 100);

        let chunks = chunk_text(&format!("{first} {second}"), "doc", &config).expect("chunking succeeds");

        assert!(chunks.len() >= 3);
        assert_eq!(chunks[0].text, first);
        assert!(chunks.iter().all(|chunk| chunk.text.chars().count() <= config.chunk_size));
        assert_adjacent_overlap(&chunks);
    }

    #[test]
    fn short_trailing_window_is_merged_forward() {
        let config = ChunkingConfig {
            chunk_size: 100,
            overlap: 20,
            min_chunk_chars: 30,
            min_chunks: 1,
        };
        // 186 chars: windows at 0, 80 and 160 leave a 26-char last window.
        let long = format!("{}.", vec!["cover"; 31].join(" "));
        assert_eq!(long.chars().count(), 186);
        let text = format!(
            "{long} Maternity expenses are covered after two years. The hospital must have ten beds."
        );

        let chunks = chunk_text(&text, "doc", &config).expect("chunking succeeds");

        assert_eq!(chunks.len(), 4);
        assert_eq!(
            chunks[2].text,
            "r cover cover cover cover. Maternity expenses are covered after two years."
        );
        assert!(chunks.iter().all(|chunk| chunk.text.chars().count() >= config.min_chunk_chars));
        assert_adjacent_overlap(&chunks);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ChunkingConfig {
            chunk_size: 100,
            overlap: 100,
            min_chunk_chars: 10,
            min_chunks: 3,
        };
        assert!(matches!(
            chunk_text("some text", "doc", &config),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }
}
