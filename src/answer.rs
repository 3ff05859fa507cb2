use crate::retrieval::RetrievalResult;
use crate::text::{content_terms, is_stopword, words, Word};
use serde::Serialize;
use std::collections::HashSet;

pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 2000;
pub const DEFAULT_MIN_ANSWER_SCORE: f32 = 0.1;

const CONTEXT_SEPARATOR: &str = "\n\n";

/// Answer produced for one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    /// Extracted span; empty when nothing in the context matched well enough
    pub text: String,
    /// Raw score of the span, in [0, 1]
    pub confidence: f32,
    /// The context the answer was extracted from
    pub context: String,
}

impl Answer {
    pub fn no_answer(context: String) -> Self {
        Answer {
            text: String::new(),
            confidence: 0.0,
            context,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Produces an answer span from a question and its supporting context.
pub trait Answerer: Send + Sync {
    fn answer(&self, question: &str, context: &str) -> Answer;
}

/// Join retrieved chunks, most relevant first, within `max_chars` characters.
///
/// Lower-ranked chunks are dropped first. When the best chunk alone is over
/// budget it is cut at the last character that fits.
pub fn build_context(result: &RetrievalResult, max_chars: usize) -> String {
    let mut context = String::new();
    let mut used = 0;

    for (rank, chunk) in result.chunks.iter().enumerate() {
        let len = chunk.text.chars().count();
        let sep = if rank == 0 { 0 } else { CONTEXT_SEPARATOR.len() };

        if used + sep + len > max_chars {
            if rank == 0 {
                context.extend(chunk.text.chars().take(max_chars));
            }
            break;
        }

        if rank > 0 {
            context.push_str(CONTEXT_SEPARATOR);
        }
        context.push_str(&chunk.text);
        used += sep + len;
    }

    context
}

/// Lexical extractive answerer.
///
/// Every sentence of the context is scored by the fraction of the question's
/// content terms it contains. The best sentence wins (earlier sentences win
/// ties, so higher-ranked chunks are preferred) and the answer is the run of
/// words in it that the question does not already mention.
#[derive(Debug, Clone)]
pub struct ExtractiveAnswerer {
    min_score: f32,
}

impl Default for ExtractiveAnswerer {
    fn default() -> Self {
        ExtractiveAnswerer {
            min_score: DEFAULT_MIN_ANSWER_SCORE,
        }
    }
}

impl ExtractiveAnswerer {
    pub fn new(min_score: f32) -> Self {
        ExtractiveAnswerer { min_score }
    }
}

impl Answerer for ExtractiveAnswerer {
    fn answer(&self, question: &str, context: &str) -> Answer {
        let question_terms: HashSet<String> = content_terms(question).into_iter().collect();
        if question_terms.is_empty() {
            return Answer::no_answer(context.to_string());
        }

        let mut best: Option<(&str, f32)> = None;
        for sentence in sentences(context) {
            let terms: HashSet<String> = content_terms(sentence).into_iter().collect();
            let hits = question_terms.intersection(&terms).count();
            let score = hits as f32 / question_terms.len() as f32;
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((sentence, score));
            }
        }

        match best {
            Some((sentence, score)) if score >= self.min_score && score > 0.0 => Answer {
                text: extract_span(sentence, &question_terms),
                confidence: score.min(1.0),
                context: context.to_string(),
            },
            _ => Answer::no_answer(context.to_string()),
        }
    }
}

/// Split text into trimmed sentences on `.`, `!`, `?` followed by whitespace,
/// and on line breaks.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let end = match c {
            '\n' => Some(i),
            '.' | '!' | '?' => match chars.peek() {
                Some((_, next)) if next.is_whitespace() => Some(i + c.len_utf8()),
                None => Some(i + c.len_utf8()),
                _ => None,
            },
            _ => None,
        };
        if let Some(end) = end {
            push_sentence(&mut out, &text[start..end]);
            start = end;
        }
    }
    push_sentence(&mut out, &text[start..]);
    out
}

fn push_sentence<'a>(out: &mut Vec<&'a str>, candidate: &'a str) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
}

/// Longest run of words not mentioned in the question, with leading and
/// trailing stopwords dropped. Falls back to the whole sentence.
fn extract_span(sentence: &str, question_terms: &HashSet<String>) -> String {
    let ws = words(sentence);
    let mut best: Option<(&[Word], usize)> = None;

    for run in ws.split(|w| question_terms.contains(&w.normalized())) {
        let first = run.iter().position(|w| !is_stopword(&w.normalized()));
        let last = run.iter().rposition(|w| !is_stopword(&w.normalized()));
        if let (Some(first), Some(last)) = (first, last) {
            let trimmed = &run[first..=last];
            let novel = trimmed
                .iter()
                .filter(|w| !is_stopword(&w.normalized()))
                .count();
            if best.map_or(true, |(_, n)| novel > n) {
                best = Some((trimmed, novel));
            }
        }
    }

    match best {
        Some((run, _)) => sentence[run[0].start..run[run.len() - 1].end].to_string(),
        None => sentence.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::RetrievedChunk;

    fn result(texts: &[&str]) -> RetrievalResult {
        RetrievalResult {
            chunks: texts
                .iter()
                .enumerate()
                .map(|(i, t)| RetrievedChunk {
                    chunk_id: format!("g1/d0/c{}", i),
                    text: t.to_string(),
                    score: 1.0 / (i as f32 + 1.0),
                })
                .collect(),
        }
    }

    #[test]
    fn test_golden_capital_question() {
        let answer = ExtractiveAnswerer::default().answer(
            "What is the capital of France?",
            "The capital of France is Paris.",
        );
        assert_eq!(answer.text, "Paris");
        assert!(answer.confidence > 0.0 && answer.confidence <= 1.0);
    }

    #[test]
    fn test_answer_before_question_terms() {
        let answer = ExtractiveAnswerer::default().answer(
            "What is the capital of France?",
            "Berlin hosts many museums. Paris is the capital of France.",
        );
        assert_eq!(answer.text, "Paris");
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let answer = ExtractiveAnswerer::default().answer(
            "Who won the football match?",
            "Quarterly revenue grew by twelve percent.",
        );
        assert!(answer.is_empty());
        assert_eq!(answer.confidence, 0.0);
        assert_eq!(answer.context, "Quarterly revenue grew by twelve percent.");
    }

    #[test]
    fn test_threshold_applies() {
        let context = "Healthcare budgets rose sharply.";
        let question = "How is artificial intelligence transforming healthcare diagnostics?";
        let lenient = ExtractiveAnswerer::new(0.1).answer(question, context);
        let strict = ExtractiveAnswerer::new(0.9).answer(question, context);
        assert!(!lenient.is_empty());
        assert!(strict.is_empty());
    }

    #[test]
    fn test_sentence_split() {
        let s = sentences("First one. Second one!\nThird line\n\nv1.2 stays whole?");
        assert_eq!(
            s,
            vec!["First one.", "Second one!", "Third line", "v1.2 stays whole?"]
        );
    }

    #[test]
    fn test_context_drops_lowest_ranked_first() {
        let r = result(&["aaaa", "bbbb", "cccc"]);
        assert_eq!(build_context(&r, 100), "aaaa\n\nbbbb\n\ncccc");
        assert_eq!(build_context(&r, 10), "aaaa\n\nbbbb");
        assert_eq!(build_context(&r, 9), "aaaa");
    }

    #[test]
    fn test_context_truncates_oversized_top_chunk() {
        let r = result(&["ééééééé", "b"]);
        assert_eq!(build_context(&r, 3), "ééé");
    }
}
