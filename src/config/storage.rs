//! Storage configuration types.

use serde::Deserialize;

use super::ConfigError;

/// Storage type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Mongodb,
    Memory,
}

/// Storage configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// MongoDB-specific configuration.
    pub mongodb: MongoStoreConfig,
}

impl StorageConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_type != StorageType::Mongodb {
            return Ok(());
        }
        if self.mongodb.uri.trim().is_empty() {
            return Err(ConfigError::Missing("storage.mongodb.uri"));
        }
        if self.mongodb.database.trim().is_empty() {
            return Err(ConfigError::Missing("storage.mongodb.database"));
        }
        if self.mongodb.collection.trim().is_empty() {
            return Err(ConfigError::Missing("storage.mongodb.collection"));
        }
        Ok(())
    }
}

/// MongoDB-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongoStoreConfig {
    /// MongoDB connection URI.
    pub uri: String,
    /// Database name.
    pub database: String,
    /// Collection holding player documents.
    pub collection: String,
}

impl Default for MongoStoreConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "gamelib".to_string(),
            collection: "users".to_string(),
        }
    }
}
