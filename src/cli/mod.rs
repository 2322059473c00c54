use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::parse_duration;

/// Runs a one-off command in a fresh copy of a stack service and exits with
/// its status.
#[derive(Debug, Parser)]
#[clap(name = "oneshot-job", version)]
pub(crate) struct Cli {
    /// Optional YAML config file.
    #[clap(short, long)]
    pub(crate) config: Option<PathBuf>,

    /// Compose file describing the stack, or `-` for stdin.
    #[clap(short = 'f', long = "file", default_value = "docker-compose.yml")]
    pub(crate) file: PathBuf,

    #[clap(short = 'S', long)]
    pub(crate) stack: Option<String>,

    #[clap(short = 's', long)]
    pub(crate) service: Option<String>,

    /// Run one task on every eligible node.
    #[clap(short, long)]
    pub(crate) global: bool,

    /// Overrides the namespace from the config and the kubeconfig context.
    #[clap(short, long)]
    pub(crate) namespace: Option<String>,

    /// Give up and tear the job down after this long, e.g. `10m`.
    #[clap(long, value_parser = parse_duration)]
    pub(crate) timeout: Option<Duration>,

    /// The command to run in place of the service's entrypoint.
    #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
    pub(crate) command: Vec<String>,
}
