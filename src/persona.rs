//! Persona selection and grounded prompt assembly.
//!
//! Personas are a closed set: adding one is a table edit in
//! [`Persona::directive`], never a new code path. Directives shape tone only;
//! the grounding instructions that forbid inventing content are shared by
//! every persona.

use serde::{Deserialize, Serialize};

use crate::types::RetrievedHit;

/// Fixed tone profile applied to synthesized answers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    AggressiveHelper,
    FactChecker,
    MemeLord,
    #[default]
    HelpfulSunbae,
}

impl Persona {
    pub const ALL: [Persona; 4] = [
        Persona::AggressiveHelper,
        Persona::FactChecker,
        Persona::MemeLord,
        Persona::HelpfulSunbae,
    ];

    /// Wire identifier, stable across transports.
    pub fn as_str(self) -> &'static str {
        match self {
            Persona::AggressiveHelper => "aggressive_helper",
            Persona::FactChecker => "fact_checker",
            Persona::MemeLord => "meme_lord",
            Persona::HelpfulSunbae => "helpful_sunbae",
        }
    }

    /// Parses a wire identifier, falling back to the default persona for
    /// anything unknown. Callers never see an error for a bad persona tag.
    pub fn parse_or_default(raw: &str) -> Self {
        match raw.trim() {
            "aggressive_helper" => Persona::AggressiveHelper,
            "fact_checker" => Persona::FactChecker,
            "meme_lord" => Persona::MemeLord,
            "helpful_sunbae" => Persona::HelpfulSunbae,
            _ => Persona::default(),
        }
    }

    /// Style directive prepended to every prompt. Tone only, no facts.
    pub fn directive(self) -> &'static str {
        match self {
            Persona::AggressiveHelper => {
                "너는 지금 커뮤니티 갤러리의 고닉이야. \
                 반말을 쓰고, 약간 짜증이 섞인 말투지만 정보는 정확하고 유용하게 줘. \
                 불필요한 공손함은 빼고, 핵심만 빠르게 말해. \
                 ㅋㅋ나 ㅇㅇ같은 커뮤니티 표현은 자연스럽게 섞어도 됨."
            }
            Persona::FactChecker => {
                "너는 팩트만 말하는 팩트체커야. \
                 감정 표현 최소화, 근거 없는 말 금지. \
                 정보가 있으면 출처나 기준을 같이 언급해. \
                 간결하고 건조하게 서술해. 뇌절 금지."
            }
            Persona::MemeLord => {
                "너는 커뮤니티 밈의 달인이야. \
                 ㅋㅋㅋ 남발 허용, 인터넷 밈 자연스럽게 섞기. \
                 그래도 질문에 대한 핵심 정보는 반드시 포함해야 해. \
                 재밌게, 근데 틀리면 안 됨."
            }
            Persona::HelpfulSunbae => {
                "너는 친절한 선배 커뮤니티 유저야. \
                 존댓말 쓰고, 모르는 사람도 이해할 수 있게 차근차근 설명해줘. \
                 예시 들어주는 것도 좋고, 추가로 알면 좋을 것도 같이 알려줘."
            }
        }
    }
}

/// Maximum excerpts embedded in a grounded prompt.
const MAX_EXCERPTS: usize = 5;
/// Per-excerpt body budget, in characters.
const BODY_BUDGET: usize = 800;
/// Top-level comments quoted per excerpt.
const COMMENTS_PER_EXCERPT: usize = 3;

/// Builds the grounded RAG prompt: persona directive, attributed excerpts,
/// then the question with an answer-only-from-excerpts instruction.
pub fn build_rag_prompt(query: &str, hits: &[RetrievedHit], persona: Persona) -> String {
    let mut excerpts = Vec::with_capacity(hits.len().min(MAX_EXCERPTS));
    for (i, hit) in hits.iter().take(MAX_EXCERPTS).enumerate() {
        let body = truncate_chars(&hit.post.body, BODY_BUDGET);
        let top_comments: Vec<&str> = hit
            .post
            .comments
            .iter()
            .filter(|c| !c.text.is_empty())
            .take(COMMENTS_PER_EXCERPT)
            .map(|c| c.text.as_str())
            .collect();

        let mut part = format!(
            "[게시물 {} | {} 갤러리] 제목: {}\n내용: {}",
            i + 1,
            hit.post.gallery_id,
            hit.post.title,
            body,
        );
        if !top_comments.is_empty() {
            part.push_str("\n주요댓글: ");
            part.push_str(&top_comments.join(" | "));
        }
        excerpts.push(part);
    }

    format!(
        "{}\n\n아래는 관련 게시물들이야:\n\n{}\n\n---\n질문: {}\n\n\
         위 게시물들을 참고해서 질문에 답해줘. 게시물에 없는 내용은 지어내지 마.",
        persona.directive(),
        excerpts.join("\n\n"),
        query,
    )
}

/// Multi-source variant used when hits span several galleries: asks the model
/// to merge overlapping information into one answer.
pub fn build_synthesis_prompt(query: &str, hits: &[RetrievedHit], persona: Persona) -> String {
    let summaries: Vec<String> = hits
        .iter()
        .take(8)
        .map(|hit| {
            format!(
                "[{}] {}: {}",
                hit.post.gallery_id,
                hit.post.title,
                truncate_chars(&hit.post.body, 400),
            )
        })
        .collect();

    format!(
        "{}\n\n여러 커뮤니티에서 찾은 관련 정보야:\n\n{}\n\n---\n질문: {}\n\n\
         이 정보들을 종합해서 하나의 완결된 답변으로 정리해줘. 중복 내용은 합치고, 핵심만 남겨.",
        persona.directive(),
        summaries.join("\n"),
        query,
    )
}

/// Char-boundary-safe truncation (post bodies are mostly CJK text).
fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    text.chars().take(budget).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkRecord, Post};

    fn hit(gallery: &str, title: &str, body: &str) -> RetrievedHit {
        RetrievedHit {
            chunk: ChunkRecord {
                id: "c1".into(),
                fingerprint: "f1".into(),
                gallery_id: gallery.into(),
                post_id: "1".into(),
                field_path: "body".into(),
                content: body.into(),
                embedding: None,
            },
            score: 0.9,
            post: Post {
                id: "1".into(),
                gallery_id: gallery.into(),
                title: title.into(),
                body: body.into(),
                author: "ㅇㅇ".into(),
                published_at: "2025-06-01 10:00:00".into(),
                view_count: 10,
                upvote_count: 2,
                source_url: format!("https://example.com/{gallery}/1"),
                comments: vec![],
            },
        }
    }

    #[test]
    fn unknown_identifier_falls_back_to_default() {
        assert_eq!(Persona::parse_or_default("chaotic_neutral"), Persona::HelpfulSunbae);
        assert_eq!(Persona::parse_or_default("meme_lord"), Persona::MemeLord);
    }

    #[test]
    fn round_trips_all_wire_identifiers() {
        for persona in Persona::ALL {
            assert_eq!(Persona::parse_or_default(persona.as_str()), persona);
        }
    }

    #[test]
    fn prompt_embeds_attribution_and_grounding_instruction() {
        let hits = vec![hit("eldenring", "메타 정리", "현재 메타는 출혈 빌드.")];
        let prompt = build_rag_prompt("엘든링 현재 메타", &hits, Persona::FactChecker);
        assert!(prompt.contains("eldenring 갤러리"));
        assert!(prompt.contains("메타 정리"));
        assert!(prompt.contains("지어내지 마"));
        assert!(prompt.contains(Persona::FactChecker.directive()));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let korean = "가".repeat(900);
        let hits = vec![hit("g", "t", &korean)];
        // Must not panic on a non-ASCII boundary.
        let prompt = build_rag_prompt("q", &hits, Persona::default());
        assert!(prompt.contains(&"가".repeat(100)));
    }
}
