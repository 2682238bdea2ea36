//! # Metadata Reader
//!
//! Reads the published metadata document (§3, §4.3 step 1): many readers,
//! one writer (the reconciler). The agent never mutates this `ConfigMap`.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use thiserror::Error;

use crate::crd::MetadataDocument;

const METADATA_KEY: &str = "metadata.json";

#[derive(Debug, Error)]
pub enum MetadataReadError {
    #[error("metadata document {0} not found")]
    Missing(String),
    #[error("metadata document {0} is malformed: {1}")]
    Malformed(String, serde_json::Error),
    #[error("could not read metadata document: {0}")]
    Api(#[from] kube::Error),
}

pub struct MetadataReader {
    api: Api<ConfigMap>,
    configmap_name: String,
}

impl MetadataReader {
    #[must_use]
    pub fn new(client: Client, namespace: &str, configmap_name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            configmap_name: configmap_name.to_string(),
        }
    }

    pub async fn read(&self) -> Result<MetadataDocument, MetadataReadError> {
        let cm = match self.api.get(&self.configmap_name).await {
            Ok(cm) => cm,
            Err(kube::Error::Api(err)) if err.code == 404 => {
                return Err(MetadataReadError::Missing(self.configmap_name.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let raw = cm
            .data
            .as_ref()
            .and_then(|d| d.get(METADATA_KEY))
            .ok_or_else(|| MetadataReadError::Missing(self.configmap_name.clone()))?;

        serde_json::from_str(raw)
            .map_err(|e| MetadataReadError::Malformed(self.configmap_name.clone(), e))
    }
}
