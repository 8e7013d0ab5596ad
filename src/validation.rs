//! Parameter checks shared by the services.
//!
//! Every helper returns `INVALID_PARAM` with a message naming the field, so
//! callers can chain them with `?`.

use crate::errors::{AppError, AppResult};
use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

pub const MAX_META_ENTRIES: usize = 24;
pub const MAX_META_KEY_LEN: usize = 64;
pub const MAX_META_VALUE_LEN: usize = 128;

pub fn is_printable_ascii(value: &str) -> bool {
    value.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

/// Character count must fall within `[min, max]`.
pub fn length(field: &str, value: &str, min: usize, max: usize) -> AppResult<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(AppError::invalid_param(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(())
}

pub fn printable_ascii(field: &str, value: &str) -> AppResult<()> {
    if !is_printable_ascii(value) {
        return Err(AppError::invalid_param(format!(
            "{field} must only contain printable ascii characters"
        )));
    }
    Ok(())
}

pub fn range<T>(field: &str, value: T, min: T, max: T) -> AppResult<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(AppError::invalid_param(format!(
            "{field} must be between {min} and {max}"
        )));
    }
    Ok(())
}

pub fn at_least<T>(field: &str, value: T, min: T) -> AppResult<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min {
        return Err(AppError::invalid_param(format!(
            "{field} must be at least {min}"
        )));
    }
    Ok(())
}

pub fn item_count<T>(field: &str, items: &[T], min: usize, max: usize) -> AppResult<()> {
    if items.len() < min || items.len() > max {
        return Err(AppError::invalid_param(format!(
            "{field} must contain between {min} and {max} items"
        )));
    }
    Ok(())
}

pub fn unique<T: Eq + Hash>(field: &str, items: &[T]) -> AppResult<()> {
    let mut seen = HashSet::with_capacity(items.len());
    if items.iter().all(|item| seen.insert(item)) {
        Ok(())
    } else {
        Err(AppError::invalid_param(format!(
            "{field} must contain unique items"
        )))
    }
}

/// Lowercase letters and digits only.
pub fn lower_alphanumeric(field: &str, value: &str) -> AppResult<()> {
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(AppError::invalid_param(format!(
            "{field} must only contain lowercase alphanumeric characters"
        )));
    }
    Ok(())
}

pub fn meta(meta: &BTreeMap<String, String>) -> AppResult<()> {
    if meta.len() > MAX_META_ENTRIES {
        return Err(AppError::invalid_param(format!(
            "meta must contain at most {MAX_META_ENTRIES} items"
        )));
    }
    for (key, value) in meta {
        length("meta key", key, 1, MAX_META_KEY_LEN)?;
        printable_ascii("meta key", key)?;
        length("meta value", value, 1, MAX_META_VALUE_LEN)?;
        printable_ascii("meta value", value)?;
    }
    Ok(())
}
