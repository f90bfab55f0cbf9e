/// Trigram similarity with PostgreSQL pg_trgm semantics
///
/// A string is lower-cased and split into words on every non-alphanumeric
/// character. Each word is padded with two blanks in front and one behind,
/// and every distinct 3-character window of the padded word is a trigram.
/// Similarity is |A ∩ B| / |A ∪ B| over the two trigram sets.
///
/// All functions are pure. Trigram sets are rebuilt per call; nothing is cached
/// across queries.

use std::collections::HashSet;

pub type Trigram = [char; 3];

/// Distinct trigram set of a string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrigramSet {
    grams: HashSet<Trigram>,
}

impl TrigramSet {
    pub fn new(text: &str) -> Self {
        let mut grams = HashSet::new();
        let lowered: String = text.chars().flat_map(char::to_lowercase).collect();

        for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let padded: Vec<char> = std::iter::repeat(' ')
                .take(2)
                .chain(word.chars())
                .chain(std::iter::once(' '))
                .collect();
            for window in padded.windows(3) {
                grams.insert([window[0], window[1], window[2]]);
            }
        }

        TrigramSet { grams }
    }

    pub fn len(&self) -> usize {
        self.grams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grams.is_empty()
    }

    pub fn contains(&self, gram: &Trigram) -> bool {
        self.grams.contains(gram)
    }

    /// Number of trigrams present in both sets.
    pub fn shared(&self, other: &TrigramSet) -> usize {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.grams.iter().filter(|g| large.grams.contains(*g)).count()
    }

    /// Jaccard similarity in [0, 1]. Either side empty gives 0.0.
    pub fn similarity(&self, other: &TrigramSet) -> f64 {
        if self.is_empty() || other.is_empty() {
            return 0.0;
        }
        let shared = self.shared(other);
        let union = self.len() + other.len() - shared;
        shared as f64 / union as f64
    }
}

/// Trigram similarity between two strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    TrigramSet::new(a).similarity(&TrigramSet::new(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gram(s: &str) -> Trigram {
        let c: Vec<char> = s.chars().collect();
        [c[0], c[1], c[2]]
    }

    #[test]
    fn test_word_padding() {
        let set = TrigramSet::new("cat");
        assert_eq!(set.len(), 4);
        for g in ["  c", " ca", "cat", "at "] {
            assert!(set.contains(&gram(g)), "missing {:?}", g);
        }
    }

    #[test]
    fn test_single_char_word() {
        let set = TrigramSet::new("a");
        assert_eq!(set.len(), 2);
        assert!(set.contains(&gram("  a")));
        assert!(set.contains(&gram(" a ")));
    }

    #[test]
    fn test_case_and_punctuation_are_ignored() {
        assert_eq!(TrigramSet::new("Hello, World!"), TrigramSet::new("hello world"));
    }

    #[test]
    fn test_duplicates_collapse() {
        assert_eq!(TrigramSet::new("aaa aaa"), TrigramSet::new("aaa"));
    }

    #[test]
    fn test_identical_is_one() {
        assert!((similarity("furniture", "furniture") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_disjoint_is_zero() {
        assert_eq!(similarity("electric", "furniture"), 0.0);
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(similarity("", "anything"), 0.0);
        assert_eq!(similarity("...", "anything"), 0.0);
        assert_eq!(similarity("", ""), 0.0);
    }

    #[test]
    fn test_known_values() {
        // electric: 9 trigrams, electronics: 12, shared 6 -> 6 / 15
        assert!((similarity("electric", "electronics") - 0.4).abs() < 1e-12);
        // "electric vehicles": 18 trigrams, all 9 of "electric" shared -> 9 / 18
        assert!((similarity("electric", "electric vehicles") - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_symmetric() {
        let a = "mountain bike";
        let b = "bike mount";
        assert_eq!(similarity(a, b), similarity(b, a));
    }

    #[test]
    fn test_more_shared_scores_higher() {
        let q = "vintage guitar";
        assert!(similarity(q, "vintage guitars") > similarity(q, "vintage lamp"));
        assert!(similarity(q, "vintage lamp") > similarity(q, "garden hose"));
    }
}
