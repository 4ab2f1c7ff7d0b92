use std::collections::BTreeSet;

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_space = true;
    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

pub fn tokens(raw: &str) -> Vec<String> {
    normalize(raw)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Fraction of `needle` tokens present in `haystack`, in [0,1].
pub fn token_overlap(needle: &str, haystack: &str) -> f64 {
    let needle_tokens = tokens(needle);
    if needle_tokens.is_empty() {
        return 0.0;
    }
    let haystack_tokens: BTreeSet<String> = tokens(haystack).into_iter().collect();
    let hits = needle_tokens
        .iter()
        .filter(|t| haystack_tokens.contains(*t))
        .count();
    hits as f64 / needle_tokens.len() as f64
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_punctuation() {
        assert_eq!(normalize("Senior C++/Rust Dev!"), "senior c rust dev");
    }

    #[test]
    fn overlap_counts_matched_needle_tokens() {
        assert_eq!(token_overlap("python developer", "Senior Python Developer"), 1.0);
        assert_eq!(token_overlap("python developer", "Python Analyst"), 0.5);
        assert_eq!(token_overlap("python", "Go Engineer"), 0.0);
    }

    #[test]
    fn jaccard_bounds() {
        let a: BTreeSet<String> = ["python", "sql"].iter().map(|s| s.to_string()).collect();
        let b: BTreeSet<String> = ["python"].iter().map(|s| s.to_string()).collect();
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }
}
