//! Maps barrel codes to storage drivers.

use super::StorageDriver;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("barrel `{0}` is not supported")]
    Unsupported(String),
}

/// Fail-closed lookup from barrel code to driver. Codes are matched
/// case-insensitively.
#[derive(Clone, Default)]
pub struct StorageRouter {
    storages: HashMap<String, Arc<dyn StorageDriver>>,
}

impl StorageRouter {
    pub fn new<I, S>(storages: I) -> Self
    where
        I: IntoIterator<Item = (S, Arc<dyn StorageDriver>)>,
        S: AsRef<str>,
    {
        Self {
            storages: storages
                .into_iter()
                .map(|(code, driver)| (code.as_ref().to_lowercase(), driver))
                .collect(),
        }
    }

    pub fn create_storage(&self, barrel_code: &str) -> Result<Arc<dyn StorageDriver>, RouterError> {
        self.storages
            .get(&barrel_code.to_lowercase())
            .cloned()
            .ok_or_else(|| RouterError::Unsupported(barrel_code.to_string()))
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.storages.keys().map(String::as_str)
    }
}
