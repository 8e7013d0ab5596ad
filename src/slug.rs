//! Slug derivation for file URLs.

use rand::{Rng, distributions::Alphanumeric};

/// Length of the random token appended when a slug is already taken.
pub const COLLISION_TOKEN_LEN: usize = 7;

/// Lowercases `value` and collapses every run of characters outside
/// `[a-z0-9]` into a single `-`, trimming dashes at both ends.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Longest slug a file is addressable by, collision token included.
pub const MAX_SLUG_LEN: usize = 288;

/// Longest extension kept in a slug.
pub const MAX_SLUG_EXTENSION_LEN: usize = 32;

/// Slug for a file: the slugified name, followed by `.<extension>` when the
/// extension is not empty.
///
/// The name part is shortened so that the slug stays within [`MAX_SLUG_LEN`]
/// even after [`with_token`] adds a collision token.
pub fn file_slug(name: &str, extension: &str) -> String {
    let mut extension = slugify(extension);
    extension.truncate(MAX_SLUG_EXTENSION_LEN);
    while extension.ends_with('-') {
        extension.pop();
    }
    let extension_len = if extension.is_empty() {
        0
    } else {
        extension.len() + 1
    };
    let name_budget = MAX_SLUG_LEN - (COLLISION_TOKEN_LEN + 1) - extension_len;

    let mut slug = slugify(name);
    if slug.len() > name_budget {
        slug.truncate(name_budget);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    if slug.is_empty() {
        slug.push_str("file");
    }
    if !extension.is_empty() {
        slug.push('.');
        slug.push_str(&extension);
    }
    slug
}

/// Inserts `-<token>` in front of the extension part of `slug`.
///
/// `dolphin-22.jpg` with token `abcdefg` becomes `dolphin-22-abcdefg.jpg`.
pub fn with_token(slug: &str, token: &str) -> String {
    match slug.rfind('.') {
        Some(dot) => format!("{}-{}{}", &slug[..dot], token, &slug[dot..]),
        None => format!("{slug}-{token}"),
    }
}

/// Random lowercase alphanumeric token.
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}
