//! Lexical chunking of post and comment text.
//!
//! Splits text into chunks bounded by a character budget, preferring
//! paragraph boundaries and never cutting mid-sentence when an earlier
//! sentence boundary fits inside the budget. Each chunk carries a sha-256
//! fingerprint of its text, which the store uses as the idempotency key.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::{ChunkRecord, Post};

#[derive(Clone, Copy, Debug)]
pub struct ChunkerConfig {
    /// Upper bound per chunk, in characters.
    pub max_chars: usize,
    /// Fragments shorter than this are dropped as noise.
    pub min_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            min_chars: 12,
        }
    }
}

/// Hex sha-256 of the chunk text.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Splits one post into chunk records: its title+body, then every comment in
/// the tree (walked iteratively, so malformed deep nesting cannot overflow
/// the stack).
pub fn chunk_post(post: &Post, config: ChunkerConfig) -> Vec<ChunkRecord> {
    let mut records = Vec::new();

    let body_text = if post.title.is_empty() {
        post.body.clone()
    } else {
        format!("{}\n\n{}", post.title, post.body)
    };
    for piece in split_text(&body_text, config) {
        records.push(make_record(post, "body", piece));
    }

    let mut stack: Vec<&crate::types::Comment> = post.comments.iter().rev().collect();
    while let Some(comment) = stack.pop() {
        for piece in split_text(&comment.text, config) {
            records.push(make_record(post, &format!("comment/{}", comment.id), piece));
        }
        for reply in comment.replies.iter().rev() {
            stack.push(reply);
        }
    }

    records
}

fn make_record(post: &Post, field_path: &str, content: String) -> ChunkRecord {
    ChunkRecord {
        id: Uuid::new_v4().to_string(),
        fingerprint: fingerprint(&content),
        gallery_id: post.gallery_id.clone(),
        post_id: post.id.clone(),
        field_path: field_path.to_string(),
        content,
        embedding: None,
    }
}

/// Splits free text into budget-bounded pieces.
///
/// Paragraphs (blank-line separated) are packed greedily; a paragraph that
/// overflows the budget is split at sentence boundaries; only a single
/// sentence longer than the whole budget is ever hard-wrapped.
pub fn split_text(text: &str, config: ChunkerConfig) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    let mut flush = |current: &mut String, current_len: &mut usize, chunks: &mut Vec<String>| {
        let trimmed = current.trim();
        if trimmed.chars().count() >= config.min_chars {
            chunks.push(trimmed.to_string());
        }
        current.clear();
        *current_len = 0;
    };

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let para_len = paragraph.chars().count();

        if current_len + para_len + 1 <= config.max_chars {
            if !current.is_empty() {
                current.push('\n');
                current_len += 1;
            }
            current.push_str(paragraph);
            current_len += para_len;
            continue;
        }

        // Paragraph does not fit: close the running chunk at the paragraph
        // boundary, then lay out the paragraph sentence by sentence.
        flush(&mut current, &mut current_len, &mut chunks);

        if para_len <= config.max_chars {
            current.push_str(paragraph);
            current_len = para_len;
            continue;
        }

        for sentence in split_sentences(paragraph) {
            let sent_len = sentence.chars().count();
            if current_len + sent_len + 1 <= config.max_chars {
                if !current.is_empty() {
                    current.push(' ');
                    current_len += 1;
                }
                current.push_str(sentence);
                current_len += sent_len;
            } else {
                flush(&mut current, &mut current_len, &mut chunks);
                if sent_len <= config.max_chars {
                    current.push_str(sentence);
                    current_len = sent_len;
                } else {
                    // One sentence beyond the whole budget: hard wrap on
                    // char boundaries, the only case where we cut mid-sentence.
                    for piece in hard_wrap(sentence, config.max_chars) {
                        chunks.push(piece);
                    }
                }
            }
        }
    }

    flush(&mut current, &mut current_len, &mut chunks);
    chunks
}

/// Sentence boundaries: terminal punctuation followed by whitespace, or a
/// bare newline inside a paragraph.
fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut prev_terminal = false;

    for (idx, ch) in paragraph.char_indices() {
        if prev_terminal && ch.is_whitespace() {
            let sentence = paragraph[start..idx].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = idx;
            prev_terminal = false;
            continue;
        }
        prev_terminal = matches!(ch, '.' | '!' | '?' | '…') || ch == '\n';
    }

    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn hard_wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut buf = String::new();
    let mut len = 0usize;
    for ch in text.chars() {
        buf.push(ch);
        len += 1;
        if len == max_chars {
            pieces.push(std::mem::take(&mut buf));
            len = 0;
        }
    }
    if !buf.trim().is_empty() {
        pieces.push(buf);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Comment;

    fn cfg(max: usize) -> ChunkerConfig {
        ChunkerConfig {
            max_chars: max,
            min_chars: 1,
        }
    }

    #[test]
    fn fingerprint_is_stable_for_identical_text() {
        assert_eq!(fingerprint("같은 내용"), fingerprint("같은 내용"));
        assert_ne!(fingerprint("같은 내용"), fingerprint("다른 내용"));
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_text("짧은 본문입니다.", cfg(100));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn paragraph_boundaries_are_preferred() {
        let text = format!("{}\n\n{}", "가".repeat(60), "나".repeat(60));
        let chunks = split_text(&text, cfg(100));
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].chars().all(|c| c == '가'));
        assert!(chunks[1].chars().all(|c| c == '나'));
    }

    #[test]
    fn never_splits_mid_sentence_when_boundary_fits() {
        let text = "First sentence here. Second sentence follows. Third one ends it.";
        let chunks = split_text(text, cfg(45));
        for chunk in &chunks {
            assert!(
                chunk.ends_with('.'),
                "chunk should end at a sentence boundary: {chunk:?}"
            );
        }
    }

    #[test]
    fn only_oversized_sentences_are_hard_wrapped() {
        let text = "가".repeat(250);
        let chunks = split_text(&text, cfg(100));
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
    }

    #[test]
    fn budget_is_respected() {
        let text = (0..40)
            .map(|i| format!("Sentence number {i} with a bit of padding text."))
            .collect::<Vec<_>>()
            .join(" ");
        for chunk in split_text(&text, cfg(120)) {
            assert!(chunk.chars().count() <= 120);
        }
    }

    #[test]
    fn chunks_cover_body_and_comment_tree() {
        let post = Post {
            id: "77".into(),
            gallery_id: "programming".into(),
            title: "비동기 질문".into(),
            body: "tokio에서 태스크를 어떻게 나누는 게 좋을까?".into(),
            author: "ㅇㅇ".into(),
            published_at: "2025-06-01 10:00:00".into(),
            view_count: 5,
            upvote_count: 1,
            source_url: "https://example.com/77".into(),
            comments: vec![Comment {
                id: "c1".into(),
                author: "고닉".into(),
                text: "spawn_blocking 쓰면 됨".into(),
                published_at: "2025-06-01 10:05:00".into(),
                replies: vec![Comment {
                    id: "c2".into(),
                    author: "답글러".into(),
                    text: "채널로 나누는 것도 방법임".into(),
                    published_at: "2025-06-01 10:06:00".into(),
                    replies: vec![],
                }],
            }],
        };

        let records = chunk_post(&post, ChunkerConfig::default());
        let paths: Vec<&str> = records.iter().map(|r| r.field_path.as_str()).collect();
        assert!(paths.contains(&"body"));
        assert!(paths.contains(&"comment/c1"));
        assert!(paths.contains(&"comment/c2"));
        // Same text always maps to the same fingerprint.
        let again = chunk_post(&post, ChunkerConfig::default());
        let fp: Vec<_> = records.iter().map(|r| &r.fingerprint).collect();
        let fp_again: Vec<_> = again.iter().map(|r| &r.fingerprint).collect();
        assert_eq!(fp, fp_again);
    }
}
