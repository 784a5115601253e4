use super::candidates::Candidate;

/// Longest non-empty candidate, earliest on ties; the first candidate when
/// every one is empty.
pub fn longest(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates
        .iter()
        .filter(|c| !c.text.is_empty())
        .reduce(|best, c| if c.text.len() > best.text.len() { c } else { best })
        .or_else(|| candidates.first())
}

/// Exact match with `reference` if present, otherwise the candidate sharing
/// the most of its prefix, with length as tiebreak.
pub fn closest_to_reference<'c>(
    candidates: &'c [Candidate],
    reference: &str,
) -> Option<&'c Candidate> {
    if let Some(exact) = candidates.iter().find(|c| c.text == reference) {
        return Some(exact);
    }

    candidates
        .iter()
        .map(|c| (score(&c.text, reference), c))
        .reduce(|best, next| if next.0 > best.0 { next } else { best })
        .map(|(_, c)| c)
}

fn score(text: &str, reference: &str) -> usize {
    // A reference shorter than the prefix counts as the whole prefix.
    let prefix = |n: usize| reference.get(..n).unwrap_or(reference);
    let mut score = text.len();
    if text.starts_with(prefix(3)) {
        score += 3;
    }
    if text.starts_with(prefix(2)) {
        score += 2;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::candidates::Provenance;

    fn candidates(texts: &[&str]) -> Vec<Candidate> {
        let provenance = [Provenance::Primary, Provenance::Fallback, Provenance::Segmented];
        texts
            .iter()
            .zip(provenance)
            .map(|(text, provenance)| Candidate::new(text.to_string(), provenance))
            .collect()
    }

    #[test]
    fn test_exact_match_wins() {
        let set = candidates(&["SK1234A", "SK12345"]);
        let best = closest_to_reference(&set, "SK12345").unwrap();
        assert_eq!(best.text, "SK12345");
        assert_eq!(best.provenance, Provenance::Fallback);
    }

    #[test]
    fn test_prefix_score_beats_length() {
        let set = candidates(&["XX123456", "KR123"]);
        assert_eq!(closest_to_reference(&set, "KR12345").unwrap().text, "KR123");
    }

    #[test]
    fn test_short_reference_still_earns_prefix_bonus() {
        let set = candidates(&["XX12345", "KR1"]);
        assert_eq!(closest_to_reference(&set, "KR").unwrap().text, "KR1");
    }

    #[test]
    fn test_score_ties_keep_first() {
        let set = candidates(&["KR1234", "KR9876"]);
        assert_eq!(closest_to_reference(&set, "KR5555").unwrap().text, "KR1234");
    }

    #[test]
    fn test_longest_without_reference() {
        let set = candidates(&["KR1", "", "KR12345"]);
        assert_eq!(longest(&set).unwrap().text, "KR12345");

        let set = candidates(&["KR12", "WA34"]);
        assert_eq!(longest(&set).unwrap().provenance, Provenance::Primary);
    }

    #[test]
    fn test_all_empty_falls_back_to_primary() {
        let set = candidates(&["", ""]);
        assert_eq!(longest(&set).unwrap().provenance, Provenance::Primary);
        assert!(longest(&[]).is_none());
        assert!(closest_to_reference(&[], "KR").is_none());
    }
}
