//! Anonymous identity issuance.
//!
//! Produces readable `Adjective Noun` display names with a matching
//! username, plus alternative username suggestions. Purely computational:
//! uniqueness against the live registry is the caller's concern.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::types::Identity;

// ─── Constants ────────────────────────────────────────────────────

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 30;

/// Random draws per requested suggestion before falling back to a
/// sequential disambiguator.
const ATTEMPTS_PER_SUGGESTION: usize = 8;

/// Room kept at the end of a base name for a `_NNNN` suffix.
const SUFFIX_RESERVE: usize = 5;

const FALLBACK_STEM: &str = "user";

const ADJECTIVES: &[&str] = &[
    "Amber", "Brave", "Calm", "Clever", "Cosmic", "Curious", "Daring", "Eager", "Fuzzy",
    "Gentle", "Happy", "Jolly", "Lucky", "Mellow", "Misty", "Nimble", "Quiet", "Rapid",
    "Silent", "Sunny", "Swift", "Tiny", "Witty", "Zesty",
];

const NOUNS: &[&str] = &[
    "Badger", "Comet", "Falcon", "Fox", "Gecko", "Heron", "Koala", "Lynx", "Maple", "Meteor",
    "Narwhal", "Otter", "Panda", "Pebble", "Quokka", "Raven", "Robin", "Sparrow", "Tiger",
    "Walrus", "Willow", "Wombat", "Yak", "Zebra",
];

// ─── Format rules ─────────────────────────────────────────────────

/// True iff `candidate` matches `^[A-Za-z0-9_]{3,30}$`.
pub fn validate_format(candidate: &str) -> bool {
    (USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&candidate.len())
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Turn free text into a username candidate.
///
/// Lower-cases, maps whitespace, `-` and `.` to `_`, drops every other
/// disallowed character, collapses repeated `_`, trims `_` at both ends and
/// truncates to the maximum length. The output may still be too short to
/// pass [`validate_format`].
pub fn normalize(candidate: &str) -> String {
    let mut out = String::with_capacity(candidate.len());
    for ch in candidate.chars().flat_map(char::to_lowercase) {
        let mapped = match ch {
            c if c.is_ascii_alphanumeric() => c,
            c if c.is_whitespace() || c == '-' || c == '.' || c == '_' => '_',
            _ => continue,
        };
        if mapped == '_' && (out.is_empty() || out.ends_with('_')) {
            continue;
        }
        out.push(mapped);
    }
    out.truncate(USERNAME_MAX_LEN);
    while out.ends_with('_') {
        out.pop();
    }
    out
}

// ─── Generator ────────────────────────────────────────────────────

/// Source of anonymous identities. Owns its RNG so tests can seed it.
#[derive(Debug)]
pub struct IdentityGenerator {
    rng: StdRng,
}

impl IdentityGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A fresh anonymous identity: `"Swift Otter"` / `swift_otter_4821`.
    pub fn generate(&mut self) -> Identity {
        let (adjective, noun) = self.pick_words();
        let display_name = format!("{adjective} {noun}");
        let username = self.suffixed(&normalize(&display_name));
        Identity {
            username,
            display_name,
            session_id: Uuid::new_v4().to_string(),
            is_anonymous: true,
        }
    }

    /// `count` distinct, format-valid usernames.
    pub fn suggest_usernames(&mut self, count: usize) -> Vec<String> {
        let mut seen = HashSet::with_capacity(count);
        let mut out = Vec::with_capacity(count);

        for _ in 0..count.saturating_mul(ATTEMPTS_PER_SUGGESTION) {
            if out.len() == count {
                return out;
            }
            let (adjective, noun) = self.pick_words();
            let candidate = self.suffixed(&normalize(&format!("{adjective} {noun}")));
            if seen.insert(candidate.clone()) {
                out.push(candidate);
            }
        }

        fill_sequential(FALLBACK_STEM, count, &mut seen, &mut out);
        out
    }

    /// `count` distinct usernames derived from user-supplied text.
    ///
    /// The normalized base itself comes first when it is valid. Falls back
    /// to [`suggest_usernames`](Self::suggest_usernames) when the base
    /// normalizes to something too short to build on.
    pub fn suggest_usernames_for(&mut self, base: &str, count: usize) -> Vec<String> {
        let mut stem = normalize(base);
        stem.truncate(USERNAME_MAX_LEN - SUFFIX_RESERVE);
        while stem.ends_with('_') {
            stem.pop();
        }
        if stem.len() < USERNAME_MIN_LEN {
            return self.suggest_usernames(count);
        }

        let mut seen = HashSet::with_capacity(count);
        let mut out = Vec::with_capacity(count);
        if count > 0 && validate_format(&stem) {
            seen.insert(stem.clone());
            out.push(stem.clone());
        }

        for _ in 0..count.saturating_mul(ATTEMPTS_PER_SUGGESTION) {
            if out.len() == count {
                return out;
            }
            let candidate = self.suffixed(&stem);
            if seen.insert(candidate.clone()) {
                out.push(candidate);
            }
        }

        fill_sequential(&stem, count, &mut seen, &mut out);
        out
    }

    fn pick_words(&mut self) -> (&'static str, &'static str) {
        let adjective = ADJECTIVES.choose(&mut self.rng).copied().unwrap_or("Quiet");
        let noun = NOUNS.choose(&mut self.rng).copied().unwrap_or("Otter");
        (adjective, noun)
    }

    fn suffixed(&mut self, stem: &str) -> String {
        let n: u16 = self.rng.gen_range(10..10_000);
        format!("{stem}_{n}")
    }
}

impl Default for IdentityGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Top up `out` to `count` entries with `stem_1`, `stem_2`, ... skipping
/// anything already taken. The stem is shortened as the counter grows so
/// every candidate stays within [`USERNAME_MAX_LEN`]. Always terminates.
fn fill_sequential(stem: &str, count: usize, seen: &mut HashSet<String>, out: &mut Vec<String>) {
    let mut n: u64 = 1;
    while out.len() < count {
        let suffix = format!("_{n}");
        let room = USERNAME_MAX_LEN.saturating_sub(suffix.len()).min(stem.len());
        let candidate = format!("{}{suffix}", &stem[..room]);
        if seen.insert(candidate.clone()) {
            out.push(candidate);
        }
        n += 1;
    }
}

// ─── Tests ────────────────────────────────────────────────────────
