//! The subset of the compose file format a one-shot job needs.
//!
//! Only `services.<name>.{image, environment, working_dir, labels}` are
//! read; every other key is ignored. `entrypoint` and `command` would be
//! replaced by the job command anyway.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

use super::{ContainerTemplate, DescriptorError, DescriptorResolver, ServiceTemplate, composed_name};

/// Label carrying the stack a service was resolved under.
pub const STACK_NAMESPACE_LABEL: &str = "com.docker.stack.namespace";

#[derive(Deserialize, Debug, Clone)]
pub struct ComposeFile {
    #[serde(default)]
    services: BTreeMap<String, ComposeService>,
}

#[derive(Deserialize, Debug, Clone)]
struct ComposeService {
    image: Option<String>,
    #[serde(default)]
    environment: KeyValues,
    working_dir: Option<String>,
    #[serde(default)]
    labels: KeyValues,
}

/// `environment` and `labels` accept both a mapping and a `KEY=VALUE` list.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum KeyValues {
    Map(BTreeMap<String, Option<serde_yaml::Value>>),
    List(Vec<String>),
}

impl Default for KeyValues {
    fn default() -> Self {
        KeyValues::List(Vec::new())
    }
}

impl KeyValues {
    /// Entries without a value are taken from `lookup`, and dropped if it has
    /// none.
    fn resolve(
        self,
        service: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<BTreeMap<String, String>, DescriptorError> {
        let mut resolved = BTreeMap::new();
        match self {
            KeyValues::Map(map) => {
                for (key, value) in map {
                    let value = match value {
                        Some(value) => Some(scalar_to_string(service, &key, value)?),
                        None => lookup(&key),
                    };
                    if let Some(value) = value {
                        resolved.insert(key, value);
                    }
                }
            }
            KeyValues::List(list) => {
                for entry in list {
                    match entry.split_once('=') {
                        Some((key, value)) => {
                            resolved.insert(key.to_string(), value.to_string());
                        }
                        None => {
                            if let Some(value) = lookup(&entry) {
                                resolved.insert(entry, value);
                            }
                        }
                    }
                }
            }
        }
        Ok(resolved)
    }
}

fn scalar_to_string(
    service: &str,
    key: &str,
    value: serde_yaml::Value,
) -> Result<String, DescriptorError> {
    match value {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        _ => Err(DescriptorError::InvalidService {
            service: service.to_string(),
            reason: format!("value of '{key}' must be a scalar"),
        }),
    }
}

impl ComposeFile {
    /// Reads the descriptor from `path`, or from stdin when `path` is `-`.
    #[instrument("load_descriptor")]
    pub async fn load(path: &Path) -> Result<ComposeFile, DescriptorError> {
        let contents = if path == Path::new("-") {
            let mut contents = String::new();
            tokio::io::stdin()
                .read_to_string(&mut contents)
                .await
                .map_err(|e| DescriptorError::Unreadable(path.to_path_buf(), e))?;
            contents
        } else {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Err(DescriptorError::NotFound(path.to_path_buf()));
            }
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| DescriptorError::Unreadable(path.to_path_buf(), e))?
        };
        Self::parse(&contents, path)
    }

    pub fn parse(contents: &str, origin: &Path) -> Result<ComposeFile, DescriptorError> {
        let compose: ComposeFile = serde_yaml::from_str(contents)
            .map_err(|e| DescriptorError::Invalid(PathBuf::from(origin), e))?;
        debug!("Descriptor lists {} services.", compose.services.len());
        Ok(compose)
    }

    fn convert(
        stack: &str,
        name: &str,
        service: ComposeService,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<ServiceTemplate, DescriptorError> {
        let image = service
            .image
            .filter(|image| !image.is_empty())
            .ok_or_else(|| DescriptorError::InvalidService {
                service: name.to_string(),
                reason: "no image is set".to_string(),
            })?;

        let mut labels = service.labels.resolve(name, lookup)?;
        labels.insert(STACK_NAMESPACE_LABEL.to_string(), stack.to_string());

        Ok(ServiceTemplate {
            name: composed_name(stack, name),
            container: ContainerTemplate {
                image,
                environment: service.environment.resolve(name, lookup)?,
                working_dir: service.working_dir,
            },
            labels,
        })
    }

    fn services_with_env(
        &self,
        stack: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Vec<ServiceTemplate>, DescriptorError> {
        self.services
            .iter()
            .map(|(name, service)| Self::convert(stack, name, service.clone(), &lookup))
            .collect()
    }
}

impl DescriptorResolver for ComposeFile {
    fn services(&self, stack: &str) -> Result<Vec<ServiceTemplate>, DescriptorError> {
        self.services_with_env(stack, |key| std::env::var(key).ok())
    }
}
