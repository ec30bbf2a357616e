//! Rule-based sentence segmentation for heterogeneous plain text.
//!
//! Raw extracted text arrives with soft-wrapped lines, headings, and list
//! markers. Segmentation runs in four passes: newline merging, terminal
//! punctuation splitting, list-marker splitting, and fragment filtering.

/// Lines at or under this many characters are treated as standalone
/// headings rather than soft-wrapped sentence fragments.
pub const MAX_HEADING_CHARS: usize = 25;

/// Splits raw text into an ordered list of clean sentences.
///
/// The output preserves document order, never merges fragments separated by
/// terminal punctuation, and is stable when re-applied to its own
/// newline-joined output.
pub fn split_sentences(text: &str) -> Vec<String> {
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return Vec::new();
    }

    let mut sentences = Vec::new();
    for block in merge_lines(cleaned) {
        for candidate in split_at_terminals(&block) {
            for fragment in split_list_markers(&candidate) {
                let fragment = fragment.trim();
                if keep_fragment(fragment) {
                    sentences.push(fragment.to_string());
                }
            }
        }
    }
    sentences
}

/// Merges soft-wrapped lines into blocks.
///
/// At each newline the accumulated line decides: short lines are emitted as
/// their own block (heading heuristic), long lines continue onto the next
/// line with the newline replaced by a space.
fn merge_lines(text: &str) -> Vec<String> {
    let mut merged = Vec::new();
    let mut current = String::new();
    let mut lines = text.split('\n').peekable();

    while let Some(line) = lines.next() {
        current.push_str(line);
        if lines.peek().is_none() {
            break;
        }
        let stripped = current.trim();
        if stripped.is_empty() {
            current.clear();
            continue;
        }
        if stripped.chars().count() <= MAX_HEADING_CHARS {
            merged.push(stripped.to_string());
            current.clear();
        } else {
            current.push(' ');
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        merged.push(tail.to_string());
    }
    merged
}

/// Splits a block at sentence-terminating punctuation.
///
/// Latin terminals (`.` `!` `?`) split when followed by whitespace or end of
/// block; the Korean endings `다.` and `요.` split unconditionally.
fn split_at_terminals(block: &str) -> Vec<String> {
    let chars: Vec<char> = block.chars().collect();
    let mut fragments = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        if matches!(chars[i], '.' | '!' | '?') {
            let korean_ending = chars[i] == '.' && i > 0 && matches!(chars[i - 1], '다' | '요');
            let before_whitespace = chars
                .get(i + 1)
                .map_or(true, |next| next.is_whitespace());
            if korean_ending || before_whitespace {
                let fragment: String = chars[start..=i].iter().collect();
                fragments.push(fragment);
                let mut next = i + 1;
                while next < chars.len() && chars[next].is_whitespace() {
                    next += 1;
                }
                start = next;
                i = next;
                continue;
            }
        }
        i += 1;
    }

    if start < chars.len() {
        fragments.push(chars[start..].iter().collect());
    }
    fragments
}

/// Splits before `X.␣` list markers, then strips the markers themselves.
///
/// Terminal splitting runs first, so a marker usually survives at the tail
/// of the preceding fragment (`"... item one 1."`); removal therefore
/// accepts markers at the end of a fragment as well.
fn split_list_markers(candidate: &str) -> Vec<String> {
    let chars: Vec<char> = candidate.chars().collect();
    let mut boundaries = vec![0usize];
    for i in 1..chars.len() {
        if is_marker_at(&chars, i) && chars[i - 1].is_whitespace() {
            boundaries.push(i);
        }
    }
    boundaries.push(chars.len());

    let mut fragments = Vec::new();
    for window in boundaries.windows(2) {
        let (from, to) = (window[0], window[1]);
        if from >= to {
            continue;
        }
        let fragment: String = chars[from..to].iter().collect();
        fragments.push(remove_markers(&fragment));
    }
    fragments
}

/// True when position `i` starts a list marker: a single `digit|letter|CJK`
/// character followed by `.` and whitespace (or end of fragment).
fn is_marker_at(chars: &[char], i: usize) -> bool {
    let head = match chars.get(i) {
        Some(&ch) => ch,
        None => return false,
    };
    if !(head.is_ascii_alphanumeric() || crate::language::is_hangul(head)) {
        return false;
    }
    chars.get(i + 1) == Some(&'.') && chars.get(i + 2).map_or(true, |ch| ch.is_whitespace())
}

/// Removes every list marker occurring at a whitespace boundary.
fn remove_markers(fragment: &str) -> String {
    let chars: Vec<char> = fragment.chars().collect();
    let mut kept = String::with_capacity(fragment.len());
    let mut i = 0usize;
    while i < chars.len() {
        let at_boundary = i == 0 || chars[i - 1].is_whitespace();
        if at_boundary && is_marker_at(&chars, i) {
            i += 2;
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            continue;
        }
        kept.push(chars[i]);
        i += 1;
    }
    kept.trim().to_string()
}

/// Keeps fragments that carry more than one meaningful character.
fn keep_fragment(fragment: &str) -> bool {
    if fragment.chars().count() <= 1 {
        return false;
    }
    let real_chars = fragment
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || crate::language::is_hangul(*ch))
        .count();
    real_chars > 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_latin_sentences() {
        let text = "Alpha beta gamma. Alpha is a letter. Beta is also a letter.";
        let sentences = split_sentences(text);
        assert_eq!(
            sentences,
            vec![
                "Alpha beta gamma.",
                "Alpha is a letter.",
                "Beta is also a letter.",
            ]
        );
    }

    #[test]
    fn short_line_becomes_standalone_heading() {
        let text = "짧은 제목입니다\n본문은 여기에서 시작하고 계속 이어지는 긴 문장이 됩니다. 다음 문장도 있습니다.";
        let sentences = split_sentences(text);
        assert_eq!(sentences[0], "짧은 제목입니다");
        assert!(sentences.len() >= 2);
    }

    #[test]
    fn long_lines_are_soft_wrapped() {
        let text = "This opening line is much longer than the heading cutoff\nand continues here before ending. Second sentence.";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].contains("continues here"));
    }

    #[test]
    fn korean_endings_split_without_whitespace() {
        let sentences = split_sentences("그래프를 만든다.노드를 연결한다.");
        assert_eq!(sentences.len(), 2);
    }

    #[test]
    fn list_markers_are_stripped() {
        let sentences = split_sentences("Steps are simple 1. segment the text 2. build the graph");
        assert!(sentences.iter().any(|s| s == "segment the text"));
        assert!(sentences.iter().any(|s| s == "build the graph"));
        assert!(sentences.iter().all(|s| !s.starts_with("1.")));
    }

    #[test]
    fn tiny_fragments_are_dropped() {
        let sentences = split_sentences("A. !! ? x\nReal sentence stays here.");
        assert_eq!(sentences, vec!["Real sentence stays here."]);
    }

    #[test]
    fn resegmenting_joined_output_is_stable() {
        let text = "Alpha beta gamma. Alpha is a letter.\nShort title\nBeta is also a letter here today.";
        let first = split_sentences(text);
        let second = split_sentences(&first.join("\n"));
        assert_eq!(first, second);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("\n\n  \n").is_empty());
    }
}
