use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use common::{
    error::AppError,
    llm::{ChatMessage, LlmClient, TokenUsage},
};

use crate::{prompts, CitedSource, RankedChunk};

static DOC_MARKER: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\[Doc\s*(\d+)\]").unwrap()
});

/// The fixed answer used when retrieval is empty or generation keeps
/// failing. Contains no facts, so it cannot conflict with the corpus.
pub fn fallback_answer() -> String {
    prompts::FALLBACK_ANSWER.to_string()
}

/// Referral answer for location searches.
pub fn location_answer() -> String {
    prompts::LOCATION_ANSWER.to_string()
}

/// Builds cited answers from reranked chunks.
pub struct Generator {
    llm: LlmClient,
}

impl Generator {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Generate an answer over `chunks`. The caller is responsible for the
    /// empty-retrieval fallback; this method requires at least one chunk.
    pub async fn generate(
        &self,
        query: &str,
        chunks: &[RankedChunk],
        conversation_context: Option<&str>,
    ) -> Result<(String, Vec<CitedSource>, TokenUsage), AppError> {
        let mut system = prompts::GENERATION_SYSTEM_PROMPT.to_string();
        system.push('\n');
        system.push_str(prompts::GLOSSARY_BLOCK);
        if conversation_context.is_some() {
            system.push_str("\n\n");
            system.push_str(prompts::GENERATION_CONVERSATIONAL_ADDENDUM);
        }

        let mut user = String::new();
        if let Some(context) = conversation_context {
            user.push_str("Conversation context:\n");
            user.push_str(context);
            user.push_str("\n\n");
        }
        user.push_str("Documents:\n\n");
        user.push_str(&format_documents(chunks));
        user.push_str("\nQuestion: ");
        user.push_str(query);

        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let (answer, usage) = self.llm.complete(&messages).await?;

        let sources = extract_cited_sources(&answer, chunks);
        debug!(
            cited = sources.len(),
            provided = chunks.len(),
            "Generation completed"
        );
        Ok((answer, sources, usage))
    }
}

/// Render chunks for the prompt. Each chunk is exactly its stored `text`
/// under a citation header; context-enrichment fields are never included.
pub fn format_documents(chunks: &[RankedChunk]) -> String {
    let mut out = String::new();
    for (i, candidate) in chunks.iter().enumerate() {
        let chunk = &candidate.chunk;
        out.push_str(&format!(
            "[Doc {}: {}, Page {}]\n{}\n\n",
            i + 1,
            chunk.filename,
            chunk.page,
            chunk.text
        ));
    }
    out
}

/// Collect every `[Doc k]` marker in the answer and map it back to the
/// chunk it referenced. Markers outside the provided range are dropped, as
/// are chunks the answer never cited.
pub fn extract_cited_sources(answer: &str, chunks: &[RankedChunk]) -> Vec<CitedSource> {
    let mut seen = std::collections::BTreeSet::new();
    for capture in DOC_MARKER.captures_iter(answer) {
        if let Some(number) = capture.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
            if number >= 1 && number <= chunks.len() {
                seen.insert(number);
            }
        }
    }

    seen.into_iter()
        .filter_map(|doc_number| {
            chunks.get(doc_number - 1).map(|candidate| CitedSource {
                doc_number,
                filename: candidate.chunk.filename.clone(),
                page: candidate.chunk.page.clone(),
                source_url: candidate.chunk.source_url.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrievers::test_support::chunk;

    fn ranked(id: &str, filename: &str, page: &str, text: &str) -> RankedChunk {
        RankedChunk::new(chunk(id, filename, page, text), 0.5)
    }

    #[test]
    fn test_format_documents_uses_stored_text_only() {
        let mut enriched = ranked(
            "c1",
            "bcy-26-income-eligibility.pdf",
            "4",
            "Family of 4: $92,041 annually.",
        );
        enriched.chunk.chunk_context = Some("table context that must not leak".into());

        let formatted = format_documents(&[enriched]);
        assert_eq!(
            formatted,
            "[Doc 1: bcy-26-income-eligibility.pdf, Page 4]\nFamily of 4: $92,041 annually.\n\n"
        );
        assert!(!formatted.contains("must not leak"));
    }

    #[test]
    fn test_extract_cited_sources_dedupes_and_orders() {
        let chunks = vec![
            ranked("a", "a.pdf", "1", "first"),
            ranked("b", "b.pdf", "2", "second"),
            ranked("c", "c.pdf", "3", "third"),
        ];
        let answer = "The limit is $92,041 [Doc 2]. Apply online [Doc 2], then submit documents [Doc 1].";

        let sources = extract_cited_sources(answer, &chunks);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].doc_number, 1);
        assert_eq!(sources[0].filename, "a.pdf");
        assert_eq!(sources[1].doc_number, 2);
    }

    #[test]
    fn test_extract_cited_sources_drops_out_of_range_markers() {
        let chunks = vec![ranked("a", "a.pdf", "1", "only one")];
        let answer = "See [Doc 1] and also [Doc 7] which does not exist, nor [Doc 0].";

        let sources = extract_cited_sources(answer, &chunks);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].doc_number, 1);
    }

    #[test]
    fn test_uncited_chunks_are_not_returned() {
        let chunks = vec![
            ranked("a", "a.pdf", "1", "cited"),
            ranked("b", "b.pdf", "2", "never mentioned"),
        ];
        let sources = extract_cited_sources("Only [Doc 1] matters.", &chunks);
        assert_eq!(sources.len(), 1);
        assert!(sources.iter().all(|s| s.filename != "b.pdf"));
    }

    #[test]
    fn test_marker_regex_tolerates_spacing() {
        let chunks = vec![ranked("a", "a.pdf", "1", "text")];
        let sources = extract_cited_sources("Cited as [Doc  1].", &chunks);
        assert_eq!(sources.len(), 1);
    }

    #[test]
    fn test_fallback_answer_has_no_citations() {
        assert!(extract_cited_sources(&fallback_answer(), &[]).is_empty());
    }
}
