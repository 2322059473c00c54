//! Resolved service definitions the job runner starts from.

pub mod compose;

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

pub use self::compose::ComposeFile;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerTemplate {
    pub image: String,
    pub environment: BTreeMap<String, String>,
    pub working_dir: Option<String>,
}

/// A fully resolved service definition, named `<stack>_<service>`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceTemplate {
    pub name: String,
    pub container: ContainerTemplate,
    pub labels: BTreeMap<String, String>,
}

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("Descriptor file '{0}' does not exist")]
    NotFound(PathBuf),

    #[error("Cannot read descriptor file '{0}': {1}")]
    Unreadable(PathBuf, #[source] std::io::Error),

    #[error("Cannot parse descriptor file '{0}': {1}")]
    Invalid(PathBuf, #[source] serde_yaml::Error),

    #[error("Service '{service}' is invalid: {reason}")]
    InvalidService { service: String, reason: String },

    #[error("Service '{0}' was not found in the descriptor file")]
    ServiceNotFound(String),
}

pub trait DescriptorResolver: Send + Sync {
    /// Every service of the descriptor, namespaced under `stack`.
    fn services(&self, stack: &str) -> Result<Vec<ServiceTemplate>, DescriptorError>;

    /// The first service whose composed name is `<stack>_<service>`.
    fn resolve(&self, stack: &str, service: &str) -> Result<ServiceTemplate, DescriptorError> {
        let wanted = composed_name(stack, service);
        self.services(stack)?
            .into_iter()
            .find(|template| template.name == wanted)
            .ok_or_else(|| DescriptorError::ServiceNotFound(service.to_string()))
    }
}

pub fn composed_name(stack: &str, service: &str) -> String {
    format!("{stack}_{service}")
}
