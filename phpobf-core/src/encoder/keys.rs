//! Run-scoped identifiers and per-file lookup keys

use rand::seq::SliceRandom;
use rand::Rng;

/// Characters every lookup key is a permutation of.
///
/// Covers every character of the names disguised by the alias prelude.
pub const KEY_ALPHABET: &str = "0123456789abcdefghijklmnopqrstuvwxyz_";

const IDENT_LEAD: char = 'O';
const IDENT_BODY: [char; 2] = ['0', 'O'];
const IDENT_BODY_LEN: usize = 12;

/// Variable names shared by every file encoded in one run.
///
/// Each is `O` followed by twelve characters from `{0, O}`, so none can
/// collide with the helper name, its parameters, or any other literal the
/// encoder emits. All six are pairwise distinct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunKeys {
    /// Alias for the decompress built-in
    pub decompress: String,
    /// Alias for the text-decode built-in
    pub decode: String,
    /// Alias for the rotate helper
    pub rotate: String,
    /// Holds the first lookup key
    pub primary_key: String,
    /// Holds the second lookup key
    pub secondary_key: String,
    /// Receives the value the outermost round evaluates to
    pub result: String,
}

impl RunKeys {
    /// Generate a fresh set of identifiers from the thread RNG
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut taken: Vec<String> = Vec::with_capacity(6);

        Self {
            decompress: unique_identifier(rng, &mut taken),
            decode: unique_identifier(rng, &mut taken),
            rotate: unique_identifier(rng, &mut taken),
            primary_key: unique_identifier(rng, &mut taken),
            secondary_key: unique_identifier(rng, &mut taken),
            result: unique_identifier(rng, &mut taken),
        }
    }

    pub fn identifiers(&self) -> [&str; 6] {
        [
            &self.decompress,
            &self.decode,
            &self.rotate,
            &self.primary_key,
            &self.secondary_key,
            &self.result,
        ]
    }
}

fn unique_identifier<R: Rng + ?Sized>(rng: &mut R, taken: &mut Vec<String>) -> String {
    loop {
        let candidate = random_identifier(rng);
        if !taken.contains(&candidate) {
            taken.push(candidate.clone());
            return candidate;
        }
    }
}

fn random_identifier<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut ident = String::with_capacity(1 + IDENT_BODY_LEN);
    ident.push(IDENT_LEAD);
    for _ in 0..IDENT_BODY_LEN {
        ident.push(IDENT_BODY[rng.gen_range(0..IDENT_BODY.len())]);
    }
    ident
}

/// A shuffled permutation of [`KEY_ALPHABET`]
pub fn shuffled_key<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut chars: Vec<char> = KEY_ALPHABET.chars().collect();
    chars.shuffle(rng);
    chars.into_iter().collect()
}
