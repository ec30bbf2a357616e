//! Rule-based noun-phrase extraction used to tokenize sentences.
//!
//! Each sentence is reduced to a deduplicated, order-preserving list of
//! candidate phrases. Korean text goes through a lightweight particle
//! stripper, English text through a stop-word chunker, and anything else
//! falls back to the trimmed sentence as a single token.

use std::collections::HashSet;
use std::sync::OnceLock;

use crate::language::{self, Language};

/// A segmented sentence together with its tokenization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    /// Position in the document-wide sentence sequence.
    pub index: usize,
    /// Raw sentence text.
    pub text: String,
    /// Detected language driving the tokenizer choice.
    pub lang: Language,
    /// Candidate phrases, deduplicated, in order of first appearance.
    pub tokens: Vec<String>,
}

/// Tokenizes segmented sentences into [`Sentence`] records.
///
/// Sentences whose extractor yields nothing fall back to the trimmed
/// sentence text so every record carries at least one token.
pub fn tokenize_sentences(texts: &[String]) -> Vec<Sentence> {
    texts
        .iter()
        .enumerate()
        .map(|(index, text)| {
            let lang = language::detect(text);
            let mut tokens = extract(text, lang);
            if tokens.is_empty() {
                tokens = vec![text.trim().to_string()];
            }
            Sentence {
                index,
                text: text.clone(),
                lang,
                tokens,
            }
        })
        .collect()
}

/// Extracts candidate phrases from one sentence in the given language.
pub fn extract(sentence: &str, lang: Language) -> Vec<String> {
    let phrases = match lang {
        Language::Korean => extract_korean(sentence),
        Language::English => extract_english(sentence),
        Language::Other => {
            let trimmed = sentence.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            }
        }
    };
    dedup_preserving_order(phrases)
}

fn extract_korean(sentence: &str) -> Vec<String> {
    let mut phrases = Vec::new();
    let mut run: Vec<String> = Vec::new();

    for word in sentence.split_whitespace() {
        let word = word.trim_matches(|ch: char| !ch.is_alphanumeric() && !language::is_hangul(ch));
        if word.is_empty() {
            close_run(&mut run, &mut phrases);
            continue;
        }

        if word.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            // Foreign-alpha words join the current noun run.
            if !is_stopword_en(&word.to_lowercase()) && word.chars().count() > 1 {
                run.push(word.to_string());
            }
            continue;
        }

        let stem = strip_josa(word);
        if looks_verbal(&stem) {
            close_run(&mut run, &mut phrases);
            continue;
        }
        if is_stopword_ko(&stem) || stem.chars().count() <= 1 {
            // Stop-word nouns are skipped without closing the run.
            continue;
        }
        run.push(stem);
    }

    close_run(&mut run, &mut phrases);
    filter_phrases(phrases, is_stopword_ko)
}

fn extract_english(sentence: &str) -> Vec<String> {
    let mut phrases = Vec::new();
    let mut run: Vec<String> = Vec::new();

    for word in sentence.split_whitespace() {
        let word: String = word
            .trim_matches(|ch: char| !ch.is_alphanumeric())
            .to_lowercase();
        if word.is_empty() || is_stopword_en(&word) {
            close_run(&mut run, &mut phrases);
            continue;
        }
        run.push(word);
    }

    close_run(&mut run, &mut phrases);
    filter_phrases(phrases, |phrase| is_stopword_en(phrase))
}

fn close_run(run: &mut Vec<String>, phrases: &mut Vec<String>) {
    if !run.is_empty() {
        phrases.push(run.join(" "));
        run.clear();
    }
}

fn filter_phrases<F>(phrases: Vec<String>, is_stopword: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    phrases
        .into_iter()
        .filter(|phrase| phrase.chars().count() >= 2 && !is_stopword(phrase))
        .collect()
}

fn dedup_preserving_order(phrases: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    phrases
        .into_iter()
        .filter(|phrase| seen.insert(phrase.clone()))
        .collect()
}

/// Strips one trailing particle from a Hangul word when enough stem remains.
fn strip_josa(word: &str) -> String {
    let chars: Vec<char> = word.chars().collect();
    for suffix in JOSA_SUFFIXES {
        let suffix_chars: Vec<char> = suffix.chars().collect();
        if chars.len() > suffix_chars.len() && chars.ends_with(&suffix_chars) {
            return chars[..chars.len() - suffix_chars.len()].iter().collect();
        }
    }
    word.to_string()
}

/// Declarative, polite, and connective endings that mark verbal words.
fn looks_verbal(stem: &str) -> bool {
    if stem.ends_with("지만") {
        return true;
    }
    matches!(stem.chars().last(), Some('다') | Some('요') | Some('죠') | Some('며'))
}

// Longer particles first so the longest match wins.
const JOSA_SUFFIXES: &[&str] = &[
    "에서", "으로", "부터", "까지", "처럼", "보다", "은", "는", "이", "가", "을", "를", "과",
    "와", "도", "의", "에", "로", "만",
];

fn is_stopword_ko(word: &str) -> bool {
    static STOPWORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    STOPWORDS
        .get_or_init(|| {
            [
                "사실", "경우", "시절", "내용", "점", "것", "수", "때", "정도", "이유", "상황",
                "뿐", "매우", "아주", "또한", "그리고", "그러나", "대한", "관한",
            ]
            .into_iter()
            .collect()
        })
        .contains(word)
}

pub(crate) fn is_stopword_en(word: &str) -> bool {
    static STOPWORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    STOPWORDS
        .get_or_init(|| {
            [
                "a", "an", "the", "and", "or", "but", "if", "then", "than", "that", "this",
                "these", "those", "is", "are", "was", "were", "be", "been", "being", "am", "to",
                "of", "in", "on", "at", "by", "for", "with", "from", "as", "it", "its", "he",
                "she", "they", "them", "we", "you", "i", "me", "him", "her", "us", "my", "your",
                "his", "their", "our", "also", "not", "no", "nor", "do", "does", "did", "have",
                "has", "had", "will", "would", "can", "could", "may", "might", "shall", "should",
                "must", "there", "here", "what", "when", "where", "who", "whom", "whose", "why",
                "how", "which", "while", "about", "into", "over", "under", "between", "through",
                "during", "before", "after", "above", "below", "again", "further", "once", "each",
                "few", "more", "most", "other", "some", "such", "only", "own", "same", "so",
                "too", "very", "just", "because", "until", "against", "both", "any", "all",
            ]
            .into_iter()
            .collect()
        })
        .contains(word)
}
