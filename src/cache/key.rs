//! Cache key derivation.
//!
//! Keys are the MD5 hex digest of the normalized dish name followed by the
//! first [`RECIPE_KEY_CHARS`] characters of the recipe. The digest format
//! is part of the on-disk layout (`<digest>.jpg`), so it must stay stable
//! across versions and match directories written by earlier bot releases.
//!
//! Matching is lexical: the same dish with different recipe wording gets a
//! different key, while recipes that only differ after the prefix share one.

use std::fmt;

use md5::{Digest, Md5};

use crate::DishRequest;

/// Number of recipe characters (not bytes) that participate in the key.
pub const RECIPE_KEY_CHARS: usize = 1000;

/// Length of the hex digest used as a key.
const KEY_HEX_LEN: usize = 32;

/// Length of the diagnostic recipe digest stored in the index.
const RECIPE_DIGEST_LEN: usize = 8;

/// Content-derived identifier of a cached image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a dish name and optional recipe text.
    pub fn derive(dish_name: &str, recipe_text: Option<&str>) -> Self {
        let mut material = dish_name.to_lowercase().trim().to_string();
        if let Some(recipe) = recipe_text {
            material.extend(recipe.chars().take(RECIPE_KEY_CHARS));
        }
        Self(hex::encode(Md5::digest(material.as_bytes())))
    }

    pub fn for_request(request: &DishRequest) -> Self {
        Self::derive(&request.dish_name, request.recipe_text())
    }

    /// Accept a key read back from disk.
    ///
    /// Only 32-character lowercase hex strings are valid, which also keeps
    /// index entries from naming paths outside the cache directory.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == KEY_HEX_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blob file name inside the cache directory.
    pub fn file_name(&self) -> String {
        format!("{}.jpg", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short digest of the full recipe text, kept in the index for diagnostics.
pub fn recipe_digest(recipe_text: Option<&str>) -> String {
    let digest = hex::encode(Md5::digest(recipe_text.unwrap_or_default().as_bytes()));
    digest[..RECIPE_DIGEST_LEN].to_string()
}
