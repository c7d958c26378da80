use crate::error::IngestError;
use crate::models::{IngestionOptions, PageChunk};

#[derive(Debug, Clone)]
pub struct SplitConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    pub separators: Vec<String>,
}

impl From<&IngestionOptions> for SplitConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            overlap: value.chunk_overlap,
            separators: value.separators.clone(),
        }
    }
}

pub fn default_separators() -> Vec<String> {
    vec!["\n\n".to_string(), "\n".to_string(), " ".to_string()]
}

pub fn split_text(text: &str, config: &SplitConfig) -> Result<Vec<String>, IngestError> {
    if config.chunk_size == 0 {
        return Err(IngestError::InvalidChunkConfig(
            "chunk size must be positive".to_string(),
        ));
    }
    if config.chunk_size <= config.overlap {
        return Err(IngestError::InvalidChunkConfig(format!(
            "chunk size {} must exceed overlap {}",
            config.chunk_size, config.overlap
        )));
    }

    Ok(split_with_separators(text, &config.separators, config))
}

fn split_with_separators(text: &str, separators: &[String], config: &SplitConfig) -> Vec<String> {
    if text.len() <= config.chunk_size {
        return vec![text.to_string()];
    }

    let Some((separator, rest)) = separators.split_first() else {
        return character_window(text, config);
    };
    if separator.is_empty() {
        return character_window(text, config);
    }

    let pieces = text
        .split(separator.as_str())
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>();
    if pieces.len() < 2 {
        return split_with_separators(text, rest, config);
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for piece in pieces {
        if piece.len() > config.chunk_size {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(split_with_separators(piece, rest, config));
            continue;
        }

        if current.is_empty() {
            current.push_str(piece);
        } else if current.len() + separator.len() + piece.len() <= config.chunk_size {
            current.push_str(separator);
            current.push_str(piece);
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(piece);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

fn character_window(text: &str, config: &SplitConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = config.chunk_size.saturating_sub(config.overlap);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += step;
    }

    chunks
}

pub fn build_page_chunks(
    page: u32,
    page_text: &str,
    config: &SplitConfig,
) -> Result<Vec<PageChunk>, IngestError> {
    let mut chunks = Vec::new();

    for (index, content) in split_text(page_text, config)?.into_iter().enumerate() {
        let chunk_size = content.len();
        chunks.push(PageChunk {
            content,
            page,
            chunk_index: index as u32,
            chunk_size,
        });
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, overlap: usize) -> SplitConfig {
        SplitConfig {
            chunk_size,
            overlap,
            separators: default_separators(),
        }
    }

    #[test]
    fn short_text_is_returned_as_a_single_chunk() {
        let chunks = split_text("short text", &config(100, 10)).unwrap();
        assert_eq!(chunks, vec!["short text".to_string()]);
    }

    #[test]
    fn overlap_must_stay_below_the_chunk_size() {
        let err = split_text("anything at all", &config(10, 10)).unwrap_err();
        assert!(matches!(err, IngestError::InvalidChunkConfig(_)));
    }

    #[test]
    fn paragraphs_are_grouped_up_to_the_chunk_size() {
        let text = "alpha alpha\n\nbeta beta\n\ngamma gamma";
        let chunks = split_text(text, &config(25, 5)).unwrap();
        assert_eq!(
            chunks,
            vec![
                "alpha alpha\n\nbeta beta".to_string(),
                "gamma gamma".to_string(),
            ]
        );
    }

    #[test]
    fn separator_chunks_stay_within_the_chunk_size() {
        let text = "the quick brown fox jumps over the lazy dog again and again";
        let chunks = split_text(text, &config(20, 4)).unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| chunk.len() <= 20));
        assert!(chunks.iter().all(|chunk| !chunk.is_empty()));
    }

    #[test]
    fn character_window_steps_by_chunk_size_minus_overlap() {
        let text = "A".repeat(2100);
        let chunks = split_text(&text, &config(1000, 200)).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[1].len(), 1000);
        assert_eq!(chunks[2].len(), 500);
    }

    #[test]
    fn character_window_reuses_trailing_characters() {
        let text: String = (0..2100u32)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();
        let chunks = split_text(&text, &config(1000, 200)).unwrap();
        assert_eq!(chunks[0], text[0..1000]);
        assert_eq!(chunks[1], text[800..1800]);
        assert_eq!(chunks[2], text[1600..2100]);
    }

    #[test]
    fn character_window_covers_a_fully_overlapped_tail() {
        let text = "A".repeat(2500);
        let chunks = split_text(&text, &config(1000, 200)).unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[2].len(), 900);
        assert_eq!(chunks[3].len(), 100);
    }

    #[test]
    fn oversized_piece_falls_through_to_lower_separators() {
        let big = "B".repeat(120);
        let text = format!("intro paragraph\n\n{big}");
        let chunks = split_text(&text, &config(50, 10)).unwrap();
        assert_eq!(chunks[0], "intro paragraph");
        assert!(chunks.len() > 2);
        assert!(chunks[1..].iter().all(|chunk| chunk.len() <= 50));
    }

    #[test]
    fn empty_pieces_do_not_produce_chunks() {
        let text = "alpha\n\n\n\nbeta";
        let chunks = split_text(text, &config(8, 2)).unwrap();
        assert_eq!(chunks, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn page_chunks_carry_the_page_and_restarting_indexes() {
        let config = config(12, 2);
        let chunks = build_page_chunks(7, "first words\n\nsecond words", &config).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|chunk| chunk.page == 7));
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[0].chunk_size, chunks[0].content.len());
    }
}
