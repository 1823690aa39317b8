//! Utterance normalization and approximate phrase scoring

/// Penalty applied when a phrase only matches part of a longer utterance
const CONTAINMENT_PENALTY: f32 = 0.05;

/// Lowercase, drop punctuation (apostrophes survive) and collapse whitespace
#[must_use]
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .to_lowercase();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Character-level Levenshtein distance
fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Edit-distance similarity normalized by length, in `[0, 1]`
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn similarity(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / max_len as f32
}

/// Score a normalized utterance against a normalized phrase
///
/// Longer utterances are also scanned window by window so "jetson what time
/// is it please" still finds "what time is it".
#[must_use]
pub fn score_phrase(utterance: &str, phrase: &str) -> f32 {
    let whole = similarity(utterance, phrase);

    let tokens: Vec<&str> = utterance.split(' ').collect();
    let width = phrase.split(' ').count();
    if tokens.len() <= width {
        return whole;
    }

    let best_window = tokens
        .windows(width)
        .map(|w| similarity(&w.join(" "), phrase))
        .fold(0.0_f32, f32::max);

    whole.max(best_window - CONTAINMENT_PENALTY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("  What's the TIME?! "), "what's the time");
        assert_eq!(normalize("hello,world"), "hello world");
        assert_eq!(normalize("...."), "");
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn similarity_bounds() {
        assert!((similarity("what time is it", "what time is it") - 1.0).abs() < f32::EPSILON);
        assert!((similarity("", "") - 1.0).abs() < f32::EPSILON);
        assert!(similarity("abc", "xyz").abs() < f32::EPSILON);
        assert!(similarity("what time is it", "what tme is it") > 0.9);
    }

    #[test]
    fn windows_find_contained_phrases() {
        let score = score_phrase("jetson what time is it please", "what time is it");
        assert!((score - 0.95).abs() < 1e-6);
    }

    #[test]
    fn unrelated_text_scores_low() {
        assert!(score_phrase("banana", "what time is it") < 0.3);
    }
}
