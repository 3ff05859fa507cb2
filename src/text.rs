//! Word-level helpers shared by the hashing embedder and the extractive answerer.

/// Words that carry no retrieval signal on their own.
const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "did", "do",
    "does", "for", "from", "had", "has", "have", "how", "i", "in", "into", "is", "it", "its",
    "me", "my", "of", "on", "or", "our", "so", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "those", "to", "was", "we", "were", "what", "when",
    "where", "which", "who", "whom", "why", "will", "with", "you", "your",
];

/// A word together with its byte range in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Word<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

impl Word<'_> {
    /// Lower-cased form used for matching.
    pub fn normalized(&self) -> String {
        self.text.to_lowercase()
    }
}

/// Split text into alphanumeric words, keeping their byte offsets.
///
/// Apostrophes and hyphens inside a word are kept (`don't`, `x-ray`).
pub fn words(text: &str) -> Vec<Word<'_>> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let joins_word = (c == '\'' || c == '-')
            && start.is_some()
            && chars.peek().is_some_and(|(_, next)| next.is_alphanumeric());
        if c.is_alphanumeric() || joins_word {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            out.push(Word {
                text: &text[s..i],
                start: s,
                end: i,
            });
        }
    }
    if let Some(s) = start {
        out.push(Word {
            text: &text[s..],
            start: s,
            end: text.len(),
        });
    }
    out
}

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word).is_ok()
}

/// Lower-cased words of `text` with stopwords removed, in order of appearance.
pub fn content_terms(text: &str) -> Vec<String> {
    words(text)
        .into_iter()
        .map(|w| w.normalized())
        .filter(|w| !is_stopword(w))
        .collect()
}
