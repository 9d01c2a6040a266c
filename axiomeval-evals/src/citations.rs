// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Axiom citation scanning and validation
//!
//! Answers cite axioms inline as `[AXIOM-001]`. [`CitationScanner`] splits a
//! streamed answer into text and citation segments, holding back an open
//! bracket until it can tell whether a citation token is forming.
//! [`AxiomValidator`] resolves the cited ids against the axiom registry.

use axiomeval_core::{AxiomCitation, AxiomId, AxiomStore};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

/// Longest bracketed run held back while waiting for `]`
pub const MAX_PENDING_CHARS: usize = 64;

fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[(AXIOM-[0-9]+)\]$").expect("citation regex is valid"))
}

/// Piece of a scanned answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Citation(AxiomId),
}

/// Incremental citation tokenizer
///
/// Feed chunks with [`push`](Self::push) and call [`finish`](Self::finish)
/// once the stream ends. Text outside brackets is emitted as soon as it
/// arrives; a bracketed run is emitted once it closes, as a citation when it
/// reads `[AXIOM-<digits>]` and as text otherwise.
#[derive(Debug, Default)]
pub struct CitationScanner {
    pending: Option<String>,
}

impl CitationScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut text = String::new();

        for ch in chunk.chars() {
            match (&mut self.pending, ch) {
                (None, '[') => {
                    flush(&mut text, &mut segments);
                    self.pending = Some(String::from('['));
                }
                (None, c) => text.push(c),
                (Some(pending), '[') => {
                    // A new bracket opens; what came before cannot be a token
                    text.push_str(pending);
                    flush(&mut text, &mut segments);
                    *pending = String::from('[');
                }
                (Some(pending), ']') => {
                    pending.push(']');
                    let token = std::mem::take(pending);
                    self.pending = None;
                    match citation_regex().captures(&token).and_then(|caps| caps.get(1)) {
                        Some(id) => {
                            flush(&mut text, &mut segments);
                            segments.push(Segment::Citation(AxiomId::new(id.as_str())));
                        }
                        None => text.push_str(&token),
                    }
                }
                (Some(pending), c) => {
                    pending.push(c);
                    if pending.chars().count() > MAX_PENDING_CHARS {
                        text.push_str(pending);
                        self.pending = None;
                    }
                }
            }
        }

        flush(&mut text, &mut segments);
        segments
    }

    /// Flush an unclosed bracket as text
    pub fn finish(&mut self) -> Option<Segment> {
        self.pending
            .take()
            .filter(|pending| !pending.is_empty())
            .map(Segment::Text)
    }

    /// Scan a whole sequence of chunks
    pub fn scan<I, S>(chunks: I) -> Vec<Segment>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut scanner = Self::new();
        let mut segments: Vec<Segment> = chunks
            .into_iter()
            .flat_map(|chunk| scanner.push(chunk.as_ref()))
            .collect();
        segments.extend(scanner.finish());
        segments
    }
}

fn flush(text: &mut String, segments: &mut Vec<Segment>) {
    if !text.is_empty() {
        segments.push(Segment::Text(std::mem::take(text)));
    }
}

/// Checks cited axiom ids against the registry
#[derive(Debug, Clone)]
pub struct AxiomValidator {
    store: Arc<AxiomStore>,
}

impl AxiomValidator {
    pub fn new(store: Arc<AxiomStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &AxiomStore {
        &self.store
    }

    /// Citations in `text`, deduplicated, in order of first appearance
    pub fn validate(&self, text: &str) -> Vec<AxiomCitation> {
        self.validate_chunks([text])
    }

    /// Citations across a streamed answer
    pub fn validate_chunks<I, S>(&self, chunks: I) -> Vec<AxiomCitation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        CitationScanner::scan(chunks)
            .into_iter()
            .filter_map(|segment| match segment {
                Segment::Citation(id) => Some(id),
                Segment::Text(_) => None,
            })
            .filter(|id| seen.insert(id.clone()))
            .map(|id| AxiomCitation::resolve(id, &self.store))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axiomeval_core::{Axiom, CitationStatus};

    fn text(s: &str) -> Segment {
        Segment::Text(s.to_string())
    }

    fn citation(id: &str) -> Segment {
        Segment::Citation(AxiomId::new(id))
    }

    fn validator() -> AxiomValidator {
        let axiom = |id: &str| Axiom {
            id: AxiomId::new(id),
            subject: "Insurer".to_string(),
            entity: "premium".to_string(),
            trigger: "smoking".to_string(),
            conditions: String::new(),
            description: "Smokers pay higher premiums".to_string(),
            category: "pricing".to_string(),
        };
        AxiomValidator::new(Arc::new(AxiomStore::new([
            axiom("AXIOM-001"),
            axiom("AXIOM-002"),
        ])))
    }

    #[test]
    fn test_dedupes_in_first_appearance_order() {
        let citations = validator().validate("[AXIOM-001] [AXIOM-999] [AXIOM-001]");

        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].id.as_str(), "AXIOM-001");
        assert!(citations[0].valid);
        assert_eq!(citations[1].id.as_str(), "AXIOM-999");
        assert!(!citations[1].valid);
        assert_eq!(citations[1].status, CitationStatus::Unknown);
    }

    #[test]
    fn test_malformed_ids_are_kept() {
        let citations = validator().validate("See [AXIOM-01] and [AXIOM-0001], not [axiom-001].");
        let statuses: Vec<_> = citations.iter().map(|c| (c.id.as_str(), c.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("AXIOM-01", CitationStatus::Malformed),
                ("AXIOM-0001", CitationStatus::Malformed),
            ]
        );
    }

    #[test]
    fn test_validate_is_idempotent() {
        let validator = validator();
        let text = "Premiums rise for smokers [AXIOM-002], see also [AXIOM-003].";
        assert_eq!(validator.validate(text), validator.validate(text));
    }

    #[test]
    fn test_no_citations() {
        assert!(validator().validate("Premiums rise for smokers.").is_empty());
    }

    #[test]
    fn test_token_split_across_chunks() {
        assert_eq!(
            CitationScanner::scan(["foo [AXIOM", "-001]"]),
            vec![text("foo "), citation("AXIOM-001")]
        );
        assert_eq!(
            CitationScanner::scan(["[AXIOM-0", "0", "2] bar"]),
            vec![citation("AXIOM-002"), text(" bar")]
        );
    }

    #[test]
    fn test_plain_brackets_stay_text() {
        assert_eq!(CitationScanner::scan(["[f", "oo]"]), vec![text("[foo]")]);
        assert_eq!(CitationScanner::scan(["[", "]"]), vec![text("[]")]);
        assert_eq!(CitationScanner::scan(["[AXIOM-]"]), vec![text("[AXIOM-]")]);
    }

    #[test]
    fn test_unclosed_bracket_flushed_at_finish() {
        assert_eq!(
            CitationScanner::scan(["foo", "[AX"]),
            vec![text("foo"), text("[AX")]
        );
    }

    #[test]
    fn test_empty_chunks_produce_nothing() {
        let mut scanner = CitationScanner::new();
        assert!(scanner.push("").is_empty());
        assert_eq!(scanner.finish(), None);
        assert_eq!(CitationScanner::scan(["", "a", ""]), vec![text("a")]);
    }

    #[test]
    fn test_nested_bracket_flushes_earlier_part() {
        assert_eq!(
            CitationScanner::scan(["[see [AXIOM-001]]"]),
            vec![text("[see "), citation("AXIOM-001"), text("]")]
        );
    }

    #[test]
    fn test_long_bracket_is_released() {
        let long = format!("[{}", "x".repeat(MAX_PENDING_CHARS));
        let mut scanner = CitationScanner::new();
        assert_eq!(scanner.push(&long), vec![text(&long)]);
        assert_eq!(scanner.push("] [AXIOM-001]"), vec![text("] "), citation("AXIOM-001")]);
        assert_eq!(scanner.finish(), None);
    }

    #[test]
    fn test_chunked_validation_matches_whole_text() {
        let validator = validator();
        let whole = "Smoking raises premiums [AXIOM-001]. Exercise lowers them [AXIOM-007].";
        let chunks: Vec<String> = whole
            .chars()
            .collect::<Vec<_>>()
            .chunks(3)
            .map(|c| c.iter().collect())
            .collect();
        assert_eq!(validator.validate_chunks(&chunks), validator.validate(whole));
    }
}
