//! Loading an api's description document regardless of where the template says it lives.
//!
//! Every path ends in a parsed JSON document: bytes are tried as JSON first, then as YAML, and a
//! YAML-born `swagger` version tag is forced back to a string.

use std::{path::Path, sync::Arc};

use anyhow::Context;

use crate::{
    error::DefinitionError,
    location::ObjectFetcher,
    template::{Api, DefinitionSource},
};

const DEFINITION_URI: &str = "DefinitionUri";
const DEFINITION_BODY: &str = "DefinitionBody";

/// Resolves [`DefinitionSource`]s into JSON documents.
#[derive(Clone, Default)]
pub struct DefinitionLoader {
    fetcher: Option<Arc<dyn ObjectFetcher>>,
}

impl DefinitionLoader {
    /// A loader that can read local files and inline bodies but not object storage.
    pub fn local() -> Self {
        Self::default()
    }

    pub fn with_fetcher(fetcher: Arc<dyn ObjectFetcher>) -> Self {
        Self {
            fetcher: Some(fetcher),
        }
    }

    /// Obtain the api's description document as JSON.
    pub async fn resolve(&self, api: &Api) -> Result<serde_json::Value, DefinitionError> {
        let Some(source) = &api.definition else {
            return Err(DefinitionError::NotFound {
                api: api.name.clone(),
            });
        };

        match source {
            DefinitionSource::LocalFile(path) => {
                let bytes = read_file(path).await.map_err(|source| DefinitionError::Unreadable {
                    api: api.name.clone(),
                    property: DEFINITION_URI,
                    source,
                })?;
                parse_document(&api.name, DEFINITION_URI, &bytes)
            }
            DefinitionSource::ObjectStorage(location) => {
                let unreadable = |source| DefinitionError::Unreadable {
                    api: api.name.clone(),
                    property: DEFINITION_URI,
                    source,
                };
                let fetcher = self
                    .fetcher
                    .as_ref()
                    .context("object storage client not configured")
                    .map_err(unreadable)?;
                let bytes = fetcher.fetch(location).await.map_err(unreadable)?;
                parse_document(&api.name, DEFINITION_URI, &bytes)
            }
            DefinitionSource::InlineJson(json) => {
                parse_document(&api.name, DEFINITION_BODY, json.as_bytes())
            }
            DefinitionSource::InlineBody(body) => {
                let mut doc =
                    serde_json::to_value(body).map_err(|err| DefinitionError::Malformed {
                        api: api.name.clone(),
                        property: DEFINITION_BODY,
                        reason: err.to_string(),
                    })?;
                stringify_swagger_version(&mut doc);
                Ok(doc)
            }
        }
    }
}

async fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))
}

/// Parse document bytes as JSON, falling back to YAML.
fn parse_document(
    api: &str,
    property: &'static str,
    bytes: &[u8],
) -> Result<serde_json::Value, DefinitionError> {
    let malformed = |reason: String| DefinitionError::Malformed {
        api: api.to_string(),
        property,
        reason,
    };

    let json_err = match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(doc) if doc.is_object() => return Ok(doc),
        Ok(_) => return Err(malformed("json: not an object".to_string())),
        Err(err) => err,
    };

    let yaml: serde_yaml::Value = serde_yaml::from_slice(bytes)
        .map_err(|yaml_err| malformed(format!("json: {json_err}; yaml: {yaml_err}")))?;
    if !yaml.is_mapping() {
        return Err(malformed(format!("json: {json_err}; yaml: not a mapping")));
    }

    let mut doc = serde_json::to_value(&yaml).map_err(|err| malformed(err.to_string()))?;
    stringify_swagger_version(&mut doc);
    Ok(doc)
}

/// YAML infers `swagger: 2.0` as a float; description parsers require the version as a string.
fn stringify_swagger_version(doc: &mut serde_json::Value) {
    let Some(version) = doc.get_mut("swagger") else {
        return;
    };
    let as_string = match &*version {
        serde_json::Value::String(_) => return,
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => format!("{f:.1}"),
            _ => n.to_string(),
        },
        other => other.to_string(),
    };
    *version = serde_json::Value::String(as_string);
}
