//! The `run` command

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use swarm_bench_core::{
    spawn_collector, ChannelConfig, PacingConfig, RunConfig, SchedulerBuilder, StopCondition,
    StopMode, UserProfile,
};
use swarm_bench_gateway::{GatewayClient, GatewayConfig, GatewaySession};
use swarm_bench_report::{print_summary, CsvExporter, JsonExporter, RunReport};

use super::interactive;
use super::progress::RunProgress;
use super::{parse_duration, parse_pacing, tag_filter, TreeArgs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StopModeArg {
    /// Finish the in-flight action and run stop hooks
    Graceful,
    /// Abandon in-flight actions
    Immediate,
}

impl From<StopModeArg> for StopMode {
    fn from(mode: StopModeArg) -> Self {
        match mode {
            StopModeArg::Graceful => StopMode::Graceful,
            StopModeArg::Immediate => StopMode::Immediate,
        }
    }
}

/// Options of the `run` command
///
/// Flags override values loaded from `--config`.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Base URL of the gateway under test
    #[arg(long, env = "SWARM_HOST", default_value = "http://localhost:8000")]
    pub host: String,

    /// Login user name
    #[arg(long, env = "SWARM_USERNAME")]
    pub username: Option<String>,

    /// Login password
    #[arg(long, env = "SWARM_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Per-request timeout
    #[arg(long, value_parser = parse_duration)]
    pub request_timeout: Option<Duration>,

    /// Number of concurrent users
    #[arg(short, long, env = "SWARM_USERS")]
    pub users: Option<usize>,

    /// Time over which the users are spawned (e.g. 30s, 2m)
    #[arg(short, long, value_parser = parse_duration)]
    pub ramp: Option<Duration>,

    /// Stop after this long (e.g. 10m)
    #[arg(short = 't', long, value_parser = parse_duration, conflicts_with = "request_count")]
    pub run_time: Option<Duration>,

    /// Stop after this many actions
    #[arg(short = 'n', long)]
    pub request_count: Option<u64>,

    /// Only spawn these profiles (repeatable)
    #[arg(short, long = "profile")]
    pub profiles: Vec<String>,

    /// Only run actions carrying one of these tags
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Never run actions carrying any of these tags
    #[arg(long, value_delimiter = ',')]
    pub exclude_tags: Vec<String>,

    /// Think time for every profile:
    /// between:MIN,MAX | constant:D | pacing:D | exponential:MEAN | none
    #[arg(long, value_parser = parse_pacing)]
    pub pacing: Option<PacingConfig>,

    /// How users are stopped when the run ends
    #[arg(long, value_enum)]
    pub stop_mode: Option<StopModeArg>,

    /// Abandon a graceful stop after this long
    #[arg(long, value_parser = parse_duration)]
    pub stop_timeout: Option<Duration>,

    /// Most users spawned or stopped per scheduler tick
    #[arg(long)]
    pub max_burst: Option<usize>,

    /// Run-wide cap on actions per second
    #[arg(long)]
    pub rate_limit: Option<f64>,

    /// Seed for reproducible task selection
    #[arg(long)]
    pub seed: Option<u64>,

    /// JSON run configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub tree: TreeArgs,

    /// Write the full report as JSON
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Write the per-action summary as CSV
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Write every action event as CSV
    #[arg(long)]
    pub csv_events: Option<PathBuf>,

    /// Read `users <n> [ramp]`, `status`, `stop` and `kill` from stdin
    #[arg(short, long)]
    pub interactive: bool,

    /// Hide the live progress line
    #[arg(long)]
    pub no_progress: bool,
}

impl RunArgs {
    /// Merge the config file with the command-line overrides
    pub fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config from: {}", path.display()))?,
            None => RunConfig::default(),
        };

        if let Some(users) = self.users {
            config.users = users;
        }
        if let Some(ramp) = self.ramp {
            config.ramp = ramp;
        }
        if let Some(run_time) = self.run_time {
            config.stop_condition = StopCondition::Duration(run_time);
        }
        if let Some(count) = self.request_count {
            config.stop_condition = StopCondition::RequestCount(count);
        }
        if let Some(pacing) = &self.pacing {
            config.pacing = pacing.clone();
        }
        if let Some(mode) = self.stop_mode {
            config.stop_mode = mode.into();
        }
        if self.stop_timeout.is_some() {
            config.stop_timeout = self.stop_timeout;
        }
        if let Some(max_burst) = self.max_burst {
            config.max_burst = max_burst;
        }
        if self.rate_limit.is_some() {
            config.rate_limit = self.rate_limit;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if !self.tags.is_empty() || !self.exclude_tags.is_empty() {
            config.tags = tag_filter(self.tags.clone(), self.exclude_tags.clone());
        }

        config.validate().context("Invalid run configuration")?;
        Ok(config)
    }

    fn gateway_config(&self) -> GatewayConfig {
        let mut gateway = GatewayConfig::new(self.host.clone());
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            gateway = gateway.with_credentials(username.clone(), password.clone());
        }
        if let Some(timeout) = self.request_timeout {
            gateway = gateway.with_request_timeout(timeout);
        }
        gateway
    }

    /// Profiles selected by `--profile`, with the `--pacing` override applied
    fn select_profiles(
        &self,
        client: Arc<GatewayClient>,
    ) -> Result<Vec<UserProfile<GatewaySession>>> {
        let mut profiles = self.tree.profiles(client)?;

        if !self.profiles.is_empty() {
            let available: Vec<String> = profiles.iter().map(|p| p.name().to_string()).collect();
            for wanted in &self.profiles {
                if !available.contains(wanted) {
                    bail!(
                        "Unknown profile: {}. Available: {}",
                        wanted,
                        available.join(", ")
                    );
                }
            }
            profiles.retain(|p| self.profiles.iter().any(|name| name == p.name()));
        }

        if let Some(pacing) = &self.pacing {
            let policy = pacing.build()?;
            profiles = profiles
                .into_iter()
                .map(|p| p.pacing(Arc::clone(&policy)))
                .collect();
        }
        Ok(profiles)
    }

    /// Run the load test and write the requested reports
    pub async fn execute(&self) -> Result<()> {
        let config = self.run_config()?;
        let client = Arc::new(
            GatewayClient::new(self.gateway_config()).context("Invalid gateway configuration")?,
        );
        let profiles = self.select_profiles(client)?;

        tracing::info!(
            host = %self.host,
            users = config.users,
            ramp = ?config.ramp,
            stop = ?config.stop_condition,
            profiles = profiles.len(),
            "Starting swarm-bench"
        );

        let (scheduler, events_rx) = SchedulerBuilder::new()
            .config(config)
            .profiles(profiles)
            .channel_config(ChannelConfig::default())
            .build()?;

        let keep_events = self.json.is_some() || self.csv_events.is_some();
        let collector = spawn_collector(events_rx, keep_events);

        let handle = scheduler.handle();
        let controller = if self.interactive {
            let lines = interactive::stdin_lines()?;
            Some(tokio::spawn(interactive::control(handle.clone(), lines)))
        } else {
            None
        };
        let progress = (!self.no_progress).then(RunProgress::new).transpose()?;

        let mut task = tokio::spawn(scheduler.run_with_signal_handling());
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        let summary = loop {
            tokio::select! {
                joined = &mut task => break joined.context("Scheduler task panicked")??,
                _ = ticker.tick() => {
                    if let Some(progress) = &progress {
                        progress.update(&handle.snapshot());
                    }
                }
            }
        };
        if let Some(progress) = progress {
            progress.finish(&summary);
        }
        if let Some(controller) = controller {
            controller.abort();
        }

        let metrics = collector.await.context("Metrics collector panicked")?;
        let report = RunReport::new(&summary, metrics);

        print_summary(&report, &mut std::io::stdout().lock())?;
        self.export(&report)
    }

    fn export(&self, report: &RunReport) -> Result<()> {
        if let Some(path) = &self.json {
            JsonExporter::export(report, path)
                .with_context(|| format!("Failed to export JSON to: {}", path.display()))?;
            println!("✓ JSON exported to: {}", path.display());
        }
        if let Some(path) = &self.csv {
            CsvExporter::export_summary(report, path)
                .with_context(|| format!("Failed to export CSV to: {}", path.display()))?;
            println!("✓ CSV summary exported to: {}", path.display());
        }
        if let Some(path) = &self.csv_events {
            CsvExporter::export_events(report, path)
                .with_context(|| format!("Failed to export CSV events to: {}", path.display()))?;
            println!("✓ CSV events exported to: {}", path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Cli, Commands};
    use super::*;
    use clap::Parser;
    use swarm_bench_gateway::{GATEWAY_USER, MIXED_WORKLOAD_USER};

    fn run_args(args: &[&str]) -> RunArgs {
        let argv = ["swarm-bench", "run"].iter().chain(args).copied();
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Run(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    fn client() -> Arc<GatewayClient> {
        Arc::new(GatewayClient::new(GatewayConfig::default()).unwrap())
    }

    #[test]
    fn test_flags_build_config() {
        let args = run_args(&[
            "-u", "50", "-r", "10s", "-t", "5m", "--stop-mode", "immediate", "--tags", "auth",
            "--max-burst", "5",
        ]);
        let config = args.run_config().unwrap();

        assert_eq!(config.users, 50);
        assert_eq!(config.ramp, Duration::from_secs(10));
        assert_eq!(config.stop_condition, StopCondition::Duration(Duration::from_secs(300)));
        assert_eq!(config.stop_mode, StopMode::Immediate);
        assert_eq!(config.max_burst, 5);
        assert!(config.tags.include.contains("auth"));
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{"users": 10, "ramp": 2.0, "stop_condition": {"request_count": 500}}"#,
        )
        .unwrap();

        let args = run_args(&["-c", path.to_str().unwrap(), "-u", "20"]);
        let config = args.run_config().unwrap();

        assert_eq!(config.users, 20);
        assert_eq!(config.ramp, Duration::from_secs(2));
        assert_eq!(config.stop_condition, StopCondition::RequestCount(500));
    }

    #[test]
    fn test_run_time_conflicts_with_request_count() {
        let argv = ["swarm-bench", "run", "-t", "1m", "-n", "100"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_profile_selection() {
        let args = run_args(&["--profile", MIXED_WORKLOAD_USER]);
        let profiles = args.select_profiles(client()).unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name(), MIXED_WORKLOAD_USER);

        let all = run_args(&[]).select_profiles(client()).unwrap();
        let names: Vec<&str> = all.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec![GATEWAY_USER, MIXED_WORKLOAD_USER]);
    }

    #[test]
    fn test_unknown_profile_is_rejected() {
        let args = run_args(&["--profile", "admin_user"]);
        let err = args.select_profiles(client()).unwrap_err();
        assert!(err.to_string().contains("admin_user"));
    }

    #[test]
    fn test_pacing_override_applies_to_every_profile() {
        let args = run_args(&["--pacing", "constant:2s"]);
        for profile in args.select_profiles(client()).unwrap() {
            let policy = profile.pacing_policy().unwrap();
            assert_eq!(policy.name(), "constant");
            let mut rng = rand::thread_rng();
            assert_eq!(policy.next_delay(&mut rng), Duration::from_secs(2));
        }
    }
}
