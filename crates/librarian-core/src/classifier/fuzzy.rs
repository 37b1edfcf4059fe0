use strsim::normalized_levenshtein;

/// Best similarity of the shorter string against any equally long window of
/// the longer one, in `0.0..=1.0`.
///
/// Inputs are expected to be normalized (ASCII only).
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return 0.0;
    }
    if long.contains(short) {
        return 1.0;
    }

    let width = short.len();
    let mut best = 0.0f64;
    for start in 0..=(long.len() - width) {
        let Some(window) = long.get(start..start + width) else {
            continue;
        };
        let score = normalized_levenshtein(short, window);
        if score > best {
            best = score;
        }
    }
    best
}

/// Highest-scoring candidate at or above `threshold`. Earlier candidates win
/// ties.
pub fn best_match<'a, T>(
    query: &str,
    candidates: impl IntoIterator<Item = (&'a str, T)>,
    threshold: f64,
) -> Option<(T, f64)> {
    let mut best: Option<(T, f64)> = None;
    for (key, value) in candidates {
        let score = partial_ratio(query, key);
        if score >= threshold && best.as_ref().map_or(true, |(_, s)| score > *s) {
            best = Some((value, score));
        }
    }
    best
}
