use jsonschema::Validator;
use serde_json::Value;
use shared::AppError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::types::Ctd;

/// Loads Challenge Type Definitions from `<base_dir>/<type_id>.ctd.json`,
/// validating each against the CTD JSON schema on first load and caching
/// the parsed result. Uploads and deletes invalidate the cache entry for
/// their type_id so the next resolution re-reads from disk.
pub struct CtdLoader {
    base_dir: PathBuf,
    schema: Option<Validator>,
    cache: RwLock<HashMap<String, Arc<Ctd>>>,
}

impl CtdLoader {
    pub fn new(base_dir: PathBuf, schema_json: Option<Value>) -> Result<Self, AppError> {
        let schema = schema_json
            .map(|schema| jsonschema::validator_for(&schema).map_err(|e| AppError::InternalError(format!("invalid CTD schema: {e}"))))
            .transpose()?;

        Ok(Self { base_dir, schema, cache: RwLock::new(HashMap::new()) })
    }

    pub fn invalidate(&self, type_id: &str) {
        self.cache.write().expect("ctd cache lock poisoned").remove(type_id);
        info!(type_id, "cleared CTD cache entry");
    }

    pub async fn get(&self, type_id: &str) -> Result<Arc<Ctd>, AppError> {
        if let Some(cached) = self.cache.read().expect("ctd cache lock poisoned").get(type_id) {
            return Ok(cached.clone());
        }

        let ctd = Arc::new(self.load_from_disk(type_id).await?);
        self.cache.write().expect("ctd cache lock poisoned").insert(type_id.to_string(), ctd.clone());
        Ok(ctd)
    }

    async fn load_from_disk(&self, type_id: &str) -> Result<Ctd, AppError> {
        let path = self.base_dir.join(format!("{type_id}.ctd.json"));
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| AppError::NotFoundError(format!("no CTD installed for challenge type '{type_id}'")))?;

        let value: Value = serde_json::from_str(&raw)?;

        if let Some(schema) = &self.schema {
            if let Err(errors) = schema.validate(&value) {
                let message = errors.to_string();
                return Err(AppError::ValidationError(format!("CTD validation failed for '{type_id}': {message}")));
            }
        } else {
            warn!(type_id, "CTD schema not configured, skipping validation");
        }

        let ctd: Ctd = serde_json::from_value(value)?;
        Ok(ctd)
    }

    pub async fn install(&self, type_id: &str, contents: &str) -> Result<(), AppError> {
        let value: Value = serde_json::from_str(contents)?;

        if let Some(schema) = &self.schema {
            if let Err(errors) = schema.validate(&value) {
                return Err(AppError::ValidationError(format!("CTD validation failed for '{type_id}': {errors}")));
            }
        }

        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.base_dir.join(format!("{type_id}.ctd.json"));
        tokio::fs::write(&path, contents).await?;

        self.invalidate(type_id);
        Ok(())
    }

    pub async fn delete(&self, type_id: &str) -> Result<(), AppError> {
        let path = self.base_dir.join(format!("{type_id}.ctd.json"));
        tokio::fs::remove_file(&path).await.map_err(|_| AppError::NotFoundError(format!("CTD for type '{type_id}' not found")))?;
        self.invalidate(type_id);
        Ok(())
    }

    pub fn is_valid_type(&self, type_id: &str) -> bool {
        self.base_dir.join(format!("{type_id}.ctd.json")).exists()
    }

    pub fn list_types(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.base_dir) else {
            return Vec::new();
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| name.strip_suffix(".ctd.json").map(str::to_string))
            .collect()
    }
}
