//! Position-aware correction of raw recognizer output.
//!
//! Plates carry a letters-only regional prefix in positions 0-1 followed by an
//! alphanumeric body that never uses `O` or `Q`. The reference-free
//! [`Normalizer`] applies only those layout rules. [`ReferenceAssist`] layers
//! prefix repair and a reference-guided override on top; it needs the expected
//! plate text and therefore exists only in evaluation runs.

use regex::Regex;
use std::sync::LazyLock;

use super::candidates::Candidate;
use super::select;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Z0-9]").expect("valid pattern"));

/// Country code some plates print before the regional prefix.
const COUNTRY_MARKER: &str = "PL";

/// Known regional prefixes, in lookup order.
pub const PREFIXES: &[&str] = &[
    "KR", "SK", "SO", "ST", "SL", "SZ", "SG", "SB", "SH", "SC", "SM", "SP", "SW", "SA", "CB", "KO",
    "CR", "KT", "GD", "WA", "WR", "PO", "LU", "BI", "OL", "RZ", "OP", "GC", "K", "S", "C", "W",
    "L", "R", "P", "B", "G", "O", "N", "E", "D", "T", "Z", "F",
];

/// Last characters the recognizer commonly misreads.
const UNCERTAIN_TAIL: &[u8] = b"651H4";

/// Uppercases and drops everything outside `[A-Z0-9]`.
pub fn clean_text(raw: &str) -> String {
    NON_ALPHANUMERIC
        .replace_all(&raw.to_uppercase(), "")
        .into_owned()
}

fn prefix_zone(c: char) -> char {
    match c {
        '0' => 'O',
        '1' => 'I',
        '2' => 'Z',
        '5' => 'S',
        '6' => 'G',
        '8' => 'B',
        '4' => 'A',
        other => other,
    }
}

fn body_zone(c: char) -> char {
    match c {
        'O' | 'Q' | 'D' => '0',
        other => other,
    }
}

/// Cleans `raw`, drops a leading country marker when the text is longer than
/// `expected_len`, and applies the per-zone substitutions.
fn apply_layout_rules(raw: &str, expected_len: usize) -> String {
    let mut text = clean_text(raw);
    if text.starts_with(COUNTRY_MARKER) && text.len() > expected_len {
        text.drain(..COUNTRY_MARKER.len());
    }
    text.chars()
        .enumerate()
        .map(|(i, c)| if i < 2 { prefix_zone(c) } else { body_zone(c) })
        .collect()
}

fn truncate(mut text: String, max_len: usize) -> String {
    text.truncate(max_len);
    text
}

/// Turns raw recognizer output into candidate text, and picks among
/// candidates.
pub trait Corrector {
    fn correct(&self, raw: &str) -> String;

    /// Prefix to use when the letters band of a segmented read comes back
    /// nearly empty.
    fn prefix_hint(&self) -> Option<&str> {
        None
    }

    fn choose<'c>(&self, candidates: &'c [Candidate]) -> Option<&'c Candidate>;
}

/// Reference-free correction used in deployment.
#[derive(Debug, Clone)]
pub struct Normalizer {
    max_len: usize,
}

impl Normalizer {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn normalize(&self, raw: &str) -> String {
        truncate(apply_layout_rules(raw, self.max_len), self.max_len)
    }
}

impl Corrector for Normalizer {
    fn correct(&self, raw: &str) -> String {
        self.normalize(raw)
    }

    fn choose<'c>(&self, candidates: &'c [Candidate]) -> Option<&'c Candidate> {
        select::longest(candidates)
    }
}

/// Evaluation-only correction that consults the expected plate text.
#[derive(Debug, Clone)]
pub struct ReferenceAssist {
    reference: String,
    max_len: usize,
}

impl ReferenceAssist {
    pub fn new(reference: &str, max_len: usize) -> Self {
        Self {
            reference: clean_text(reference),
            max_len,
        }
    }

    /// Full correction: layout rules, prefix repair, reference override.
    pub fn correct_with_reference(&self, raw: &str) -> String {
        let text = apply_layout_rules(raw, self.reference.len());
        let text = self.repair_prefix(text);
        let text = self.override_prefix(text);
        truncate(text, self.max_len)
    }

    /// Restores a regional prefix that lost a letter to the recognizer.
    fn repair_prefix(&self, text: String) -> String {
        let bytes = text.as_bytes();
        if bytes.len() < 3 {
            return text;
        }
        let (first, second) = (bytes[0], bytes[1]);

        match (first.is_ascii_alphabetic(), second.is_ascii_alphabetic()) {
            (false, true) => match two_letter_prefixes().find(|p| p.as_bytes()[1] == second) {
                Some(prefix) => format!("{}{}", &prefix[..1], text),
                None => text,
            },
            (true, false) => {
                let rest = &bytes[1..];
                let prepend = rest[0].is_ascii_digit() || rest.len() >= 4;
                if prepend
                    && let Some(prefix) = two_letter_prefixes().find(|p| p.as_bytes()[1] == first)
                {
                    return format!("{}{}", &prefix[..1], text);
                }
                match two_letter_prefixes().find(|p| p.as_bytes()[0] == first) {
                    Some(prefix) if second.is_ascii_digit() => format!("{}{}", prefix, &text[1..]),
                    _ => text,
                }
            }
            (false, false) => {
                let known = self.reference.get(..2).filter(|p| PREFIXES.contains(p));
                match known {
                    Some(prefix) if text.len() >= 4 => format!("{}{}", prefix, text),
                    _ => text,
                }
            }
            (true, true) => text,
        }
    }

    /// Replaces the first three characters with the reference's when they
    /// disagree, or when the tail looks misread.
    fn override_prefix(&self, text: String) -> String {
        if self.reference.len() < 7 {
            return text;
        }
        let expected = &self.reference[..3];
        if !expected.bytes().all(|b| b.is_ascii_alphabetic()) {
            return text;
        }

        let detected = text.get(..3).unwrap_or(text.as_str());
        let uncertain_tail = text
            .bytes()
            .last()
            .is_none_or(|b| UNCERTAIN_TAIL.contains(&b) || !b.is_ascii_alphanumeric());

        if (text.len() >= 6 && uncertain_tail) || detected != expected {
            let body = text.get(3..).unwrap_or("");
            format!("{}{}", expected, body)
        } else {
            text
        }
    }
}

impl Corrector for ReferenceAssist {
    fn correct(&self, raw: &str) -> String {
        self.correct_with_reference(raw)
    }

    fn prefix_hint(&self) -> Option<&str> {
        self.reference.get(..2)
    }

    fn choose<'c>(&self, candidates: &'c [Candidate]) -> Option<&'c Candidate> {
        select::closest_to_reference(candidates, &self.reference)
    }
}

fn two_letter_prefixes() -> impl Iterator<Item = &'static str> {
    PREFIXES.iter().copied().filter(|p| p.len() == 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(raw: &str) -> String {
        Normalizer::new(8).normalize(raw)
    }

    fn assisted(raw: &str, reference: &str) -> String {
        ReferenceAssist::new(reference, 8).correct_with_reference(raw)
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("kr 12-34a"), "KR1234A");
        assert_eq!(clean_text("ż!?"), "");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn test_prefix_zone_digits_become_letters() {
        assert_eq!(normalize("5K0234A"), "SK0234A");
        assert_eq!(normalize("01234"), "OI234");
        assert_eq!(normalize("28123"), "ZB123");
        assert_eq!(normalize("64555"), "GA555");
    }

    #[test]
    fn test_body_zone_letters_become_digits() {
        assert_eq!(normalize("KR O234B"), "KR0234B");
        assert_eq!(normalize("WAQD12"), "WA0012");
        // O in the prefix zone stays a letter.
        assert_eq!(normalize("OL12345"), "OL12345");
    }

    #[test]
    fn test_country_marker_dropped_only_when_too_long() {
        assert_eq!(normalize("PLKR12345A"), "KR12345A");
        assert_eq!(normalize("PL12345"), "PL12345");
        assert_eq!(assisted("PLKR1234", "KR1234"), "KR1234");
    }

    #[test]
    fn test_truncates_to_plate_length() {
        assert_eq!(normalize("KR123456789"), "KR123456");
    }

    #[test]
    fn test_output_alphabet_and_length() {
        let inputs = [
            "", "-", "pl kr 12 34", "ÄÖÜ 0O0O", "5K0234A", "ab#cd$ef%gh^ij&kl", "0000000000000",
            "PLPLPLPL", "q q q q", "1", "__9__",
        ];
        for raw in inputs {
            for out in [normalize(raw), assisted(raw, "KRA1234"), assisted(raw, "")] {
                assert!(out.len() <= 8, "{:?} -> {:?}", raw, out);
                assert!(
                    out.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()),
                    "{:?} -> {:?}",
                    raw,
                    out
                );
            }
        }
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "5K0234A", "KR O234B", "PLPL1234", "PLKR123456", "OQDOQD", "00000000", "SK12345",
            "pl", "8D8D8D8D8D",
        ];
        for raw in inputs {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "input {:?}", raw);
        }
    }

    #[test]
    fn test_repair_prepends_missing_first_letter() {
        // SK lost its S; 7 has no letter look-alike so it survives the zone rule.
        assert_eq!(assisted("K71234", "XX"), "SK71234");
        assert_eq!(assisted("D79999", "XX"), "GD79999");
    }

    #[test]
    fn test_repair_completes_prefix_from_first_letter() {
        // No prefix ends in S, but SK starts with it.
        assert_eq!(assisted("S71234", "XX"), "SK71234");
        // Core normalization never repairs.
        assert_eq!(normalize("S71234"), "S71234");
    }

    #[test]
    fn test_repair_second_letter_present() {
        // First character is an unmapped digit, second is a letter.
        assert_eq!(assisted("7R1234", "XX"), "K7R1234");
    }

    #[test]
    fn test_repair_no_letters_uses_known_reference_prefix() {
        assert_eq!(assisted("791234", "WA12345"), "WA791234");
        // Unknown reference prefix: left alone.
        assert_eq!(assisted("791234", "XY12345"), "791234");
        // Too short to repair.
        assert_eq!(assisted("793", "WA12345"), "793");
    }

    #[test]
    fn test_reference_override_on_prefix_mismatch() {
        assert_eq!(assisted("KRB1234", "KRA1234"), "KRA1234");
        assert_eq!(assisted("SKA12", "KRA1234"), "KRA12");
    }

    #[test]
    fn test_reference_override_keeps_matching_prefix() {
        assert_eq!(assisted("KRA1235", "KRA1234"), "KRA1235");
        assert_eq!(assisted("KRA1237", "KRA1234"), "KRA1237");
        // Empty candidate takes the reference prefix.
        assert_eq!(assisted("", "KRA1234"), "KRA");
    }

    #[test]
    fn test_reference_override_needs_alpha_prefix_and_length() {
        // Reference prefix not alphabetic.
        assert_eq!(assisted("KR91234", "KR12345"), "KR91234");
        // Reference too short.
        assert_eq!(assisted("SK1234", "KRA12"), "SK1234");
    }

    #[test]
    fn test_prefix_hint() {
        assert_eq!(ReferenceAssist::new("kr 12345", 8).prefix_hint(), Some("KR"));
        assert_eq!(ReferenceAssist::new("K", 8).prefix_hint(), None);
        assert_eq!(Normalizer::new(8).prefix_hint(), None);
    }
}
