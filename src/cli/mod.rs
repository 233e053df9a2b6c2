//! CLI argument parsing and command handling

mod interactive;
mod progress;
mod run;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use swarm_bench_core::{PacingConfig, RunConfig, TagFilter, TreeSpec, UserProfile};
use swarm_bench_gateway::{GatewayClient, GatewayConfig, GatewaySession};

pub use run::RunArgs;

/// swarm-bench - virtual-user load generator
#[derive(Parser, Debug)]
#[command(name = "swarm-bench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a load test against the gateway
    Run(RunArgs),
    /// Check a run configuration and task tree without running anything
    Validate {
        /// Path to a JSON run configuration
        #[arg(short, long)]
        config: PathBuf,

        #[command(flatten)]
        tree: TreeArgs,
    },
    /// Print every profile's task tree with its selection shares
    Tasks {
        #[command(flatten)]
        tree: TreeArgs,

        /// Only keep actions carrying one of these tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Drop actions carrying any of these tags
        #[arg(long, value_delimiter = ',')]
        exclude_tags: Vec<String>,
    },
}

/// Where the task tree comes from
#[derive(Args, Debug, Clone, Default)]
pub struct TreeArgs {
    /// JSON task tree replacing the built-in gateway tree
    #[arg(long)]
    pub tree: Option<PathBuf>,
}

impl TreeArgs {
    fn load(&self) -> Result<TreeSpec> {
        match &self.tree {
            Some(path) => TreeSpec::from_json_file(path)
                .with_context(|| format!("Failed to load task tree from: {}", path.display())),
            None => Ok(swarm_bench_gateway::default_tree_spec()),
        }
    }

    fn profiles(&self, client: Arc<GatewayClient>) -> Result<Vec<UserProfile<GatewaySession>>> {
        let spec = self.load()?;
        swarm_bench_gateway::profiles(client, &spec).context("Failed to build user profiles")
    }
}

impl Cli {
    /// Dispatch the selected command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Run(args) => args.execute().await,
            Commands::Validate { config, tree } => validate(&config, &tree),
            Commands::Tasks {
                tree,
                tags,
                exclude_tags,
            } => print_tasks(&tree, tag_filter(tags, exclude_tags)),
        }
    }
}

fn validate(path: &Path, tree: &TreeArgs) -> Result<()> {
    let config = RunConfig::from_json_file(path)
        .with_context(|| format!("Failed to load config from: {}", path.display()))?;
    config.validate().context("Invalid run configuration")?;

    let client = Arc::new(GatewayClient::new(GatewayConfig::default())?);
    let profiles = tree.profiles(client)?;
    let mut kept = 0;
    for profile in &profiles {
        profile.validate()?;
        if profile.restricted(&config.tags).is_some() {
            kept += 1;
        } else {
            println!("! profile '{}' has no action matching the tag filter", profile.name());
        }
    }
    if kept == 0 {
        bail!("No profile has an action matching the tag filter");
    }

    println!("✓ {} is valid ({} of {} profiles usable)", path.display(), kept, profiles.len());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn print_tasks(tree: &TreeArgs, filter: TagFilter) -> Result<()> {
    let client = Arc::new(GatewayClient::new(GatewayConfig::default())?);
    for profile in tree.profiles(client)? {
        let Some(profile) = profile.restricted(&filter) else {
            println!("{} (no matching actions)\n", profile.name());
            continue;
        };

        println!("{}", profile.name());
        for line in profile.tree().describe(profile.root()) {
            let indent = "  ".repeat(line.depth + 1);
            match line.mode {
                Some(mode) => println!(
                    "{}{} [{}] {:>6.2}%",
                    indent,
                    line.name,
                    mode,
                    line.share * 100.0
                ),
                None => println!(
                    "{}{} (w={}) {:>6.2}%{}",
                    indent,
                    line.name,
                    line.weight,
                    line.share * 100.0,
                    if line.tags.is_empty() {
                        String::new()
                    } else {
                        format!("  #{}", line.tags.join(" #"))
                    }
                ),
            }
        }
        println!();
    }
    Ok(())
}

pub(crate) fn tag_filter(tags: Vec<String>, exclude: Vec<String>) -> TagFilter {
    TagFilter::any_of(tags).excluding(exclude)
}

/// Parse durations like `30s`, `5m`, `1h`, `250ms` or plain seconds (`2.5`)
pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (value, unit) = s.split_at(split);
    let value: f64 = value
        .parse()
        .map_err(|_| format!("invalid duration '{}'", s))?;
    let secs = match unit.trim() {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("unknown duration unit '{}' in '{}'", other, s)),
    };
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration '{}': {}", s, e))
}

/// Parse a pacing override
///
/// Accepted forms: `between:MIN,MAX`, `constant:D`, `pacing:D`,
/// `exponential:MEAN` and `none`, with durations as in [`parse_duration`].
pub(crate) fn parse_pacing(s: &str) -> Result<PacingConfig, String> {
    let (kind, args) = s.split_once(':').unwrap_or((s, ""));
    let pacing = match kind.trim() {
        "none" | "no-wait" => PacingConfig::NoWait,
        "between" => {
            let (min, max) = args
                .split_once(',')
                .ok_or_else(|| format!("expected between:MIN,MAX, got '{}'", s))?;
            PacingConfig::Between {
                min: parse_duration(min)?,
                max: parse_duration(max)?,
            }
        }
        "constant" => PacingConfig::Constant {
            delay: parse_duration(args)?,
        },
        "pacing" | "constant-pacing" => PacingConfig::ConstantPacing {
            interval: parse_duration(args)?,
        },
        "exponential" => PacingConfig::Exponential {
            mean: parse_duration(args)?,
        },
        other => return Err(format!("unknown pacing '{}'", other)),
    };
    pacing.validate().map_err(|e| e.to_string())?;
    Ok(pacing)
}
