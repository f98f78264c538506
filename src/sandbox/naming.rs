//! Sandbox pod names.

use std::collections::VecDeque;
use std::sync::Mutex;

use rand::Rng;

/// Prefix of every sandbox pod name.
pub const NAME_PREFIX: &str = "node-files-";

/// Characters used for random suffixes. No vowels, so no accidental words,
/// and no characters that are easily confused.
const SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const SUFFIX_LEN: usize = 5;

/// Produces a fresh pod name per call.
pub trait NameGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// `node-files-` followed by a random five character suffix.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomNames;

impl NameGenerator for RandomNames {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| char::from(SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())]))
            .collect();
        format!("{NAME_PREFIX}{suffix}")
    }
}

/// Hands out a fixed list of names in order, then falls back to random ones.
#[derive(Debug, Default)]
pub struct FixedNames {
    names: Mutex<VecDeque<String>>,
}

impl FixedNames {
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: Mutex::new(names.into_iter().map(Into::into).collect()),
        }
    }
}

impl NameGenerator for FixedNames {
    fn generate(&self) -> String {
        let next = self
            .names
            .lock()
            .ok()
            .and_then(|mut names| names.pop_front());
        next.unwrap_or_else(|| RandomNames.generate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_name_shape() {
        let name = RandomNames.generate();
        let suffix = name.strip_prefix(NAME_PREFIX).unwrap();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_random_names_do_not_repeat() {
        let names: HashSet<String> = (0..200).map(|_| RandomNames.generate()).collect();
        assert!(names.len() > 195, "too many collisions: {}", names.len());
    }

    #[test]
    fn test_fixed_names_in_order() {
        let names = FixedNames::new(["node-files-aaaaa", "node-files-bbbbb"]);
        assert_eq!(names.generate(), "node-files-aaaaa");
        assert_eq!(names.generate(), "node-files-bbbbb");
        assert!(names.generate().starts_with(NAME_PREFIX));
    }
}
