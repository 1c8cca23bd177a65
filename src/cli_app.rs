//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use crossbeam_channel::{Receiver, unbounded};
use serde_json::{Value, json};
use thiserror::Error;

use drive_lobby::cli::dashboard::{self, DashboardConfig, render_bar};
use drive_lobby::core::config::Config;
use drive_lobby::core::errors::LobbyError;
use drive_lobby::core::units::format_gib;
use drive_lobby::engine::coordinator::{EngineSettings, EngineSnapshot, FetchCoordinator};
use drive_lobby::engine::layout::LayoutEngine;
use drive_lobby::engine::registry::DriveStatus;
use drive_lobby::engine::sink::{ChannelSink, FanoutSink, SinkEvent};
use drive_lobby::logger::jsonl::{JsonlSink, JsonlWriter};
use drive_lobby::remote::rclone::RcloneSource;

/// Terminal cells used for usage bars in one-shot output.
const SUMMARY_BAR_CELLS: usize = 40;
const TILE_BAR_CELLS: usize = 20;

/// Drive Lobby — capacity overview for every configured rclone remote.
#[derive(Debug, Parser)]
#[command(
    name = "dlobby",
    author,
    version,
    about = "Drive Lobby - rclone remote capacity overview",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Live tile grid of every remote with a capacity summary.
    Dashboard(DashboardArgs),
    /// Probe every remote once and print the result.
    Snapshot(SnapshotArgs),
    /// List the remotes rclone knows about.
    Remotes,
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct DashboardArgs {
    /// Re-probe every N seconds (0 = manual refresh only).
    #[arg(long, value_name = "SECONDS")]
    refresh_secs: Option<u64>,
    /// Record engine events as JSONL (to PATH, or `paths.event_log`).
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    event_log: Option<Option<PathBuf>>,
}

#[derive(Debug, Clone, Args)]
struct SnapshotArgs {
    /// Give up waiting for slow remotes after this many seconds.
    #[arg(long, default_value_t = 60, value_name = "SECONDS")]
    timeout_secs: u64,
    /// Container width in pixels used for the reported layout.
    #[arg(long, default_value_t = 1_100, value_name = "PIXELS")]
    width: u32,
    /// Record engine events as JSONL (to PATH, or `paths.event_log`).
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    event_log: Option<Option<PathBuf>>,
}

impl Default for SnapshotArgs {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            width: 1_100,
            event_log: None,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path in use.
    Path,
    /// Print the effective configuration.
    Show,
    /// Load and validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<LobbyError> for CliError {
    fn from(err: LobbyError) -> Self {
        match err {
            LobbyError::InvalidConfig { .. }
            | LobbyError::MissingConfig { .. }
            | LobbyError::ConfigParse { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Install the `log` backend. `RUST_LOG` wins over the flags.
pub fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else if matches!(cli.command, Command::Dashboard(_)) {
        // stderr output would tear the alternate screen.
        "off"
    } else {
        "warn"
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .try_init();
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Dashboard(args) => run_dashboard(cli, args),
        Command::Snapshot(args) => run_snapshot(cli, args),
        Command::Remotes => run_remotes(cli),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// dashboard
// ---------------------------------------------------------------------------

fn run_dashboard(cli: &Cli, args: &DashboardArgs) -> Result<(), CliError> {
    if !io::stdout().is_terminal() {
        return Err(CliError::User(
            "dashboard needs an interactive terminal; use `dlobby snapshot` instead".to_string(),
        ));
    }
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(secs) = args.refresh_secs {
        config.remotes.auto_refresh_secs = secs;
    }
    let event_log = resolve_event_log(args.event_log.as_ref(), &config);
    let dashboard_config = DashboardConfig { config, event_log };
    dashboard::run(&dashboard_config)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// snapshot
// ---------------------------------------------------------------------------

fn run_snapshot(cli: &Cli, args: &SnapshotArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let layout = LayoutEngine::new(config.layout.clone());

    let (tx, rx) = unbounded();
    let mut sink = FanoutSink::new().with(Box::new(ChannelSink::new(tx)));
    if let Some(path) = resolve_event_log(args.event_log.as_ref(), &config) {
        let writer = JsonlWriter::open_strict(path)?;
        sink = sink.with(Box::new(JsonlSink::new(writer)));
    }

    let mut settings = EngineSettings::from_config(&config, args.width);
    settings.auto_refresh = None;
    let coordinator = FetchCoordinator::spawn(
        Arc::new(RcloneSource::from_config(&config.remotes)),
        Box::new(sink),
        settings,
    )?;
    coordinator.refresh();

    let settled = wait_for_settle(&rx, Duration::from_secs(args.timeout_secs));
    let snapshot = coordinator.snapshot()?;
    coordinator.shutdown();

    match output_mode(cli) {
        OutputMode::Human => print_snapshot_human(&snapshot, &layout),
        OutputMode::Json => {
            let payload = json!({
                "command": "snapshot",
                "settled": settled,
                "snapshot": serde_json::to_value(&snapshot)?,
            });
            write_json_line(&payload)?;
        }
    }

    if settled {
        Ok(())
    } else {
        Err(CliError::Partial(partial_message(&snapshot, args.timeout_secs)))
    }
}

fn partial_message(snapshot: &EngineSnapshot, timeout_secs: u64) -> String {
    if snapshot.discovery_done {
        format!(
            "timed out after {timeout_secs}s: {} of {} remotes reported",
            snapshot.entries.len(),
            snapshot.discovered.len()
        )
    } else {
        format!("timed out after {timeout_secs}s waiting for remote discovery")
    }
}

/// `--event-log` alone means the configured path.
fn resolve_event_log(flag: Option<&Option<PathBuf>>, config: &Config) -> Option<PathBuf> {
    flag.map(|explicit| {
        explicit
            .clone()
            .unwrap_or_else(|| config.paths.event_log.clone())
    })
}

/// Block until the engine reports a settled cycle or `timeout` elapses.
fn wait_for_settle(rx: &Receiver<SinkEvent>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while let Ok(event) = rx.recv_deadline(deadline) {
        if matches!(event, SinkEvent::CycleSettled { .. }) {
            return true;
        }
    }
    false
}

fn print_snapshot_human(snapshot: &EngineSnapshot, layout: &LayoutEngine) {
    let summary = &snapshot.summary;
    println!("{}", "Summary".bold());
    println!("  Total drives:  {}", summary.drive_count);
    println!("  Total storage: {}", format_gib(summary.nominal_total_gib));
    println!("  Total used:    {}", format_gib(summary.total_used_gib));
    println!("  Total free:    {}", format_gib(summary.total_free_gib));
    println!(
        "  {}",
        render_bar(&snapshot.layout.summary_bar, SUMMARY_BAR_CELLS).blue()
    );
    if summary.pending_count() > 0 {
        println!(
            "  {}",
            format!("{} remote(s) did not answer", summary.pending_count()).yellow()
        );
    }

    if snapshot.entries.is_empty() {
        println!();
        println!("No remotes found.");
        return;
    }

    println!();
    for (i, entry) in snapshot.entries.iter().enumerate() {
        let title = format!("{:>2}) {}", i + 1, entry.display_name());
        match &entry.status {
            DriveStatus::Unreachable { reason } => {
                println!("{}  {} ({reason})", title.bold(), "Cannot access".red());
            }
            DriveStatus::Reachable(stats) => {
                let bar = layout
                    .tile_bar(entry)
                    .map(|split| render_bar(&split, TILE_BAR_CELLS))
                    .unwrap_or_default();
                println!(
                    "{}  Total {}  Used {}  Free {}  {}",
                    title.bold(),
                    format_gib(stats.total_gib()),
                    format_gib(stats.used_gib()),
                    format_gib(stats.free_gib()),
                    bar.blue()
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// remotes
// ---------------------------------------------------------------------------

fn run_remotes(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let source = RcloneSource::from_config(&config.remotes);
    let remotes = source.discover()?;

    match output_mode(cli) {
        OutputMode::Human => {
            if remotes.is_empty() {
                println!("No remotes found (is `{}` configured?).", source.bin().display());
            }
            for name in &remotes {
                println!("{name}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "remotes",
                "remotes": remotes,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("{}", "Configuration is valid.".green());
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("{} {e}", "Configuration is INVALID:".red());
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ---------------------------------------------------------------------------
// output helpers
// ---------------------------------------------------------------------------

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DLB_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "dlobby",
            "--config",
            "/tmp/dlobby.toml",
            "--json",
            "--no-color",
            "-v",
            "snapshot",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["dlobby", "remotes", "--json", "--no-color", "-q"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_every_subcommand() {
        let cases = [
            vec!["dlobby", "dashboard"],
            vec!["dlobby", "dashboard", "--refresh-secs", "30"],
            vec!["dlobby", "dashboard", "--event-log", "/tmp/events.jsonl"],
            vec!["dlobby", "dashboard", "--event-log"],
            vec!["dlobby", "snapshot", "--timeout-secs", "5", "--width", "800"],
            vec!["dlobby", "remotes"],
            vec!["dlobby", "config"],
            vec!["dlobby", "config", "path"],
            vec!["dlobby", "config", "show"],
            vec!["dlobby", "config", "validate"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["dlobby", "-v", "-q", "remotes"]).is_err());
    }

    #[test]
    fn snapshot_defaults() {
        let cli = Cli::try_parse_from(["dlobby", "snapshot"]).expect("parse");
        let Command::Snapshot(args) = cli.command else {
            panic!("expected snapshot");
        };
        assert_eq!(args.timeout_secs, SnapshotArgs::default().timeout_secs);
        assert_eq!(args.width, 1_100);
        assert!(args.event_log.is_none());
    }

    #[test]
    fn bare_event_log_flag_uses_configured_path() {
        let config = Config::default();
        assert_eq!(resolve_event_log(None, &config), None);
        assert_eq!(
            resolve_event_log(Some(&None), &config),
            Some(config.paths.event_log.clone())
        );
        let explicit = Some(PathBuf::from("/tmp/x.jsonl"));
        assert_eq!(
            resolve_event_log(Some(&explicit), &config),
            Some(PathBuf::from("/tmp/x.jsonl"))
        );
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["dlobby", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some("auto"), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn lobby_errors_map_to_exit_codes() {
        let user: CliError = LobbyError::InvalidConfig {
            details: "x".to_string(),
        }
        .into();
        assert_eq!(user.exit_code(), 1);

        let runtime: CliError = LobbyError::ChannelClosed { component: "owner" }.into();
        assert_eq!(runtime.exit_code(), 2);
        assert_eq!(CliError::Partial("slow".to_string()).exit_code(), 4);
    }

    #[test]
    fn settle_wait_stops_on_settled_event() {
        let (tx, rx) = unbounded();
        tx.send(SinkEvent::CycleStarted { cycle: 1 }).expect("send");
        tx.send(SinkEvent::CycleSettled { cycle: 1 }).expect("send");
        assert!(wait_for_settle(&rx, Duration::from_secs(1)));

        let (_tx, rx) = unbounded::<SinkEvent>();
        assert!(!wait_for_settle(&rx, Duration::from_millis(20)));
    }
}
