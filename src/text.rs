//! Tokenization shared by indexing and search
//!
//! Matching is exact after lower-casing: no stemming, no accent folding, so
//! "família" and "familia" are different tokens.

use std::collections::BTreeSet;

/// Tokens shorter than this many characters are dropped.
pub const MIN_TOKEN_CHARS: usize = 3;

fn keep(token: &str) -> bool {
    token.chars().count() >= MIN_TOKEN_CHARS
}

/// Split free text into lower-cased whitespace-separated tokens, in input order, keeping
/// duplicates. Used for queries, where the first token drives the index scan.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(str::to_lowercase)
        .filter(|t| keep(t))
        .collect()
}

/// The token set indexed for a place.
///
/// Name words and whole tags are lower-cased and kept when at least three characters
/// long. The category, if any, contributes one token with underscores read as spaces.
pub fn place_tokens<'a>(
    name: &str,
    category: Option<&str>,
    tags: impl IntoIterator<Item = &'a str>,
) -> BTreeSet<String> {
    let mut tokens: BTreeSet<String> = tokenize(name).into_iter().collect();

    tokens.extend(
        tags.into_iter()
            .map(|tag| tag.trim().to_lowercase())
            .filter(|t| keep(t)),
    );

    if let Some(category) = category {
        let category = category.trim().to_lowercase().replace('_', " ");
        if !category.is_empty() {
            tokens.insert(category);
        }
    }

    tokens
}
