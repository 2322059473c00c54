use std::collections::BTreeMap;

use rand::Rng;

use crate::descriptor::{ContainerTemplate, ServiceTemplate};

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const NAME_MAX_LENGTH: usize = 63;
const NAME_INFIX: &str = "-job-";
const FALLBACK_PREFIX: &str = "job-";

/// Longest suffix that still fits a name without any service prefix.
pub const MAX_NAME_SUFFIX_LENGTH: usize = NAME_MAX_LENGTH - FALLBACK_PREFIX.len();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingMode {
    Replicated { replicas: u32 },
    /// One task per eligible node.
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Never,
}

/// A service definition ready to be submitted as a run-to-completion job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub name: String,
    /// Replaces the image entrypoint; the image arguments are cleared.
    pub command: Vec<String>,
    pub container: ContainerTemplate,
    pub labels: BTreeMap<String, String>,
    pub mode: SchedulingMode,
    pub restart_policy: RestartPolicy,
}

impl JobSpec {
    /// Turns `template` into a job running `command` exactly once per task.
    ///
    /// The name gets a random `[a-z]{suffix_length}` suffix. Run labels are
    /// added when the spec is rendered for the cluster.
    pub fn build(
        template: &ServiceTemplate,
        command: Vec<String>,
        global: bool,
        suffix_length: usize,
    ) -> JobSpec {
        let mode = if global {
            SchedulingMode::Global
        } else {
            SchedulingMode::Replicated { replicas: 1 }
        };

        JobSpec {
            name: job_name(&template.name, &random_suffix(suffix_length)),
            command,
            container: template.container.clone(),
            labels: template.labels.clone(),
            mode,
            restart_policy: RestartPolicy::Never,
        }
    }
}

pub(crate) fn random_suffix(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

/// `<base>-job-<suffix>` as a DNS-1123 label.
fn job_name(base: &str, suffix: &str) -> String {
    let mut base: String = base
        .chars()
        .map(|c| match c {
            '_' | '.' | ' ' => '-',
            c => c.to_ascii_lowercase(),
        })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();

    let budget = NAME_MAX_LENGTH.saturating_sub(NAME_INFIX.len() + suffix.len());
    base.truncate(budget);
    let base = base.trim_matches('-');

    if base.is_empty() {
        let mut name = format!("{FALLBACK_PREFIX}{suffix}");
        name.truncate(NAME_MAX_LENGTH);
        name
    } else {
        format!("{base}{NAME_INFIX}{suffix}")
    }
}
