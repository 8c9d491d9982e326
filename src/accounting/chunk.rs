//! Sentence-aware chunking.

/// Words that end with a period without ending a sentence. Compared
/// case-insensitively, without the trailing period.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "e.g", "i.e", "inc", "ltd",
    "co", "corp", "fig", "vol", "approx", "dept", "est", "u.s", "a.m", "p.m",
];

/// Characters that may follow a terminator and still belong to the sentence.
fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '”' | '’')
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_abbreviation(before_period: &str) -> bool {
    let word = before_period
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or("")
        .trim_start_matches(|c: char| !c.is_alphanumeric());
    if word.is_empty() {
        return false;
    }
    let word = word.to_lowercase();
    ABBREVIATIONS.contains(&word.as_str())
}

/// Split `text` into trimmed sentences.
pub(crate) fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if !is_terminator(c) {
            continue;
        }
        let mut end = idx + c.len_utf8();
        while let Some(&(next_idx, next)) = chars.peek() {
            if is_terminator(next) || is_closing(next) {
                end = next_idx + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let at_boundary = chars.peek().is_none_or(|&(_, next)| next.is_whitespace());
        if !at_boundary {
            continue;
        }
        if c == '.' && end == idx + 1 && is_abbreviation(&text[start..idx]) {
            continue;
        }
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = end;
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Greedily pack whitespace-separated words into pieces of at most
/// `limit` tokens. A single word over the limit becomes its own piece.
fn split_words(sentence: &str, limit: usize, count: &impl Fn(&str) -> usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let candidate = join(&current, word);
        if !current.is_empty() && count(&candidate) > limit {
            pieces.push(std::mem::take(&mut current));
            current = word.to_owned();
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// The longest run of trailing words of `chunk` that fits in `overlap` tokens.
fn overlap_tail(chunk: &str, overlap: usize, count: &impl Fn(&str) -> usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let words: Vec<&str> = chunk.split_whitespace().collect();
    let mut tail_start = words.len();
    while tail_start > 0 {
        let candidate = words[tail_start - 1..].join(" ");
        if count(&candidate) > overlap {
            break;
        }
        tail_start -= 1;
    }
    words[tail_start..].join(" ")
}

fn join(head: &str, tail: &str) -> String {
    if head.is_empty() {
        tail.to_owned()
    } else {
        format!("{head} {tail}")
    }
}

/// Split `text` into chunks of at most `chunk_size` tokens along sentence
/// boundaries.
///
/// Every chunk after the first starts with the trailing words of the
/// previous chunk, up to `overlap` tokens, when that still leaves room for
/// new content. Overlap is capped at half the chunk size.
pub(crate) fn split_into_chunks(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    count: impl Fn(&str) -> usize,
) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size / 2);

    let mut units = Vec::new();
    for sentence in split_sentences(text) {
        if count(sentence) > chunk_size {
            units.extend(split_words(sentence, chunk_size, &count));
        } else {
            units.push(sentence.to_owned());
        }
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for unit in units {
        if current.is_empty() {
            current = unit;
            continue;
        }
        let candidate = join(&current, &unit);
        if count(&candidate) <= chunk_size {
            current = candidate;
            continue;
        }

        let tail = overlap_tail(&current, overlap, &count);
        chunks.push(std::mem::take(&mut current));
        let seeded = join(&tail, &unit);
        current = if !tail.is_empty() && count(&seeded) <= chunk_size {
            seeded
        } else {
            unit
        };
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
