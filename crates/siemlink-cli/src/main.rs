#![allow(unexpected_cfgs)]

use std::fmt::Write as _;
use std::io;
use std::net::Ipv4Addr;
use std::num::NonZeroU16;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::anyhow;
use clap::{Args, Parser, Subcommand, ValueEnum};
use nix::unistd::Uid;
use siemlink_conf::{
    ConfError, ConfService, DEFAULT_CONFIG_PATH, DEFAULT_SELECTORS, Endpoint, InstalledBlock,
    Outcome, Transport,
};
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod reload;

use reload::{RsyslogControl, ServiceControl};

const DEFAULT_LOG_LEVEL: &str = "info";

fn main() {
    let cli = Cli::parse();
    let result = init_logging(&cli.log_level)
        .map_err(CliError::failure)
        .and_then(|()| run(cli, &RsyslogControl));
    if let Err(err) = result {
        eprintln!("error: {}", err.display_message());
        process::exit(err.exit_code());
    }
}

fn run(cli: Cli, control: &dyn ServiceControl) -> CliResult<()> {
    match cli.command {
        Command::Install(args) => handle_install(&cli.config, args, control),
        Command::Uninstall(args) => handle_uninstall(&cli.config, args, control),
        Command::List(args) => handle_list(&cli.config, args),
    }
}

#[derive(Parser)]
#[command(
    name = "siemlink",
    about = "Manage rsyslog forwarding blocks for SIEM endpoints"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "SIEMLINK_CONFIG",
        default_value = DEFAULT_CONFIG_PATH,
        help = "Path of the managed rsyslog drop-in"
    )]
    config: PathBuf,
    #[arg(
        long,
        global = true,
        env = "SIEMLINK_LOG",
        default_value = DEFAULT_LOG_LEVEL,
        help = "Log level when RUST_LOG is not set"
    )]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Install(InstallArgs),
    Uninstall(UninstallArgs),
    List(ListArgs),
}

#[derive(Args)]
struct InstallArgs {
    #[arg(help = "IPv4 address of the SIEM endpoint")]
    address: Ipv4Addr,
    #[arg(help = "Syslog port of the SIEM endpoint (1-65535)")]
    port: u16,
    #[arg(long, value_enum, default_value_t = TransportArg::Udp)]
    transport: TransportArg,
    #[arg(
        long = "selector",
        help = "Selector expression to forward (repeatable; defaults to the standard set)"
    )]
    selectors: Vec<String>,
    #[arg(long, help = "Do not restart rsyslog after the change")]
    skip_reload: bool,
}

#[derive(Args)]
struct UninstallArgs {
    #[arg(help = "IPv4 address of the SIEM endpoint")]
    address: Ipv4Addr,
    #[arg(help = "Syslog port of the SIEM endpoint (1-65535)")]
    port: u16,
    #[arg(long, help = "Do not restart rsyslog after the change")]
    skip_reload: bool,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum TransportArg {
    #[default]
    Udp,
    Tcp,
}

impl From<TransportArg> for Transport {
    fn from(value: TransportArg) -> Self {
        match value {
            TransportArg::Udp => Self::Udp,
            TransportArg::Tcp => Self::Tcp,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

fn handle_install(
    config: &Path,
    args: InstallArgs,
    control: &dyn ServiceControl,
) -> CliResult<()> {
    require_privileges(config)?;
    let endpoint = parse_endpoint(args.address, args.port)?;
    let transport = Transport::from(args.transport);
    let selectors = resolve_selectors(args.selectors)?;

    let service = ConfService::new(config);
    let outcome = service
        .install(endpoint, transport, &selectors)
        .map_err(conf_failure)?;

    if outcome.replaced() {
        println!("replaced forwarding block for {endpoint} ({transport})");
    } else {
        println!("installed forwarding block for {endpoint} ({transport})");
    }
    if let Some(backup) = outcome.backup() {
        println!("backup: {}", backup.display());
    }
    finish_reload(control, &outcome, args.skip_reload);
    Ok(())
}

fn handle_uninstall(
    config: &Path,
    args: UninstallArgs,
    control: &dyn ServiceControl,
) -> CliResult<()> {
    require_privileges(config)?;
    let endpoint = parse_endpoint(args.address, args.port)?;

    let service = ConfService::new(config);
    let outcome = service.uninstall(endpoint).map_err(conf_failure)?;

    if outcome.mutated() {
        println!("removed forwarding block for {endpoint}");
        if let Some(backup) = outcome.backup() {
            println!("backup: {}", backup.display());
        }
    } else {
        println!("no forwarding block for {endpoint}; nothing to do");
    }
    finish_reload(control, &outcome, args.skip_reload);
    Ok(())
}

fn handle_list(config: &Path, args: ListArgs) -> CliResult<()> {
    let service = ConfService::new(config);
    let blocks = service.installed().map_err(conf_failure)?;
    print!("{}", render_blocks(&blocks, args.format)?);
    Ok(())
}

fn render_blocks(blocks: &[InstalledBlock], format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(blocks)
            .map(|text| format!("{text}\n"))
            .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}"))),
        OutputFormat::Table => {
            if blocks.is_empty() {
                return Ok("no forwarding blocks installed\n".to_string());
            }
            let mut out = format!("{:<21} {:<9} SELECTORS\n", "ENDPOINT", "TRANSPORT");
            for block in blocks {
                let transport = block.transport.map_or("-", Transport::as_str);
                let _ = writeln!(
                    out,
                    "{:<21} {:<9} {}",
                    block.endpoint.to_string(),
                    transport,
                    block.selectors.join(", ")
                );
            }
            Ok(out)
        }
    }
}

fn parse_endpoint(address: Ipv4Addr, port: u16) -> CliResult<Endpoint> {
    let port = NonZeroU16::new(port)
        .ok_or_else(|| CliError::validation("port must be between 1 and 65535"))?;
    Ok(Endpoint::new(address, port))
}

fn resolve_selectors(overrides: Vec<String>) -> CliResult<Vec<String>> {
    if overrides.is_empty() {
        return Ok(DEFAULT_SELECTORS
            .iter()
            .map(|selector| (*selector).to_string())
            .collect());
    }
    if overrides.iter().any(|selector| selector.trim().is_empty()) {
        return Err(CliError::validation(
            "selector expressions must be non-empty",
        ));
    }
    Ok(overrides)
}

/// The default drop-in lives under `/etc`, so mutations there are refused
/// up front for unprivileged callers instead of failing halfway through.
fn require_privileges(config: &Path) -> CliResult<()> {
    if config == Path::new(DEFAULT_CONFIG_PATH) && !Uid::effective().is_root() {
        return Err(CliError::validation(format!(
            "writing {DEFAULT_CONFIG_PATH} requires root; re-run with sudo or pass --config"
        )));
    }
    Ok(())
}

fn finish_reload(control: &dyn ServiceControl, outcome: &Outcome, skip_reload: bool) {
    if skip_reload || !outcome.mutated() {
        return;
    }
    if let Err(err) = control.reload() {
        warn!(
            error = %err,
            "rsyslog restart failed; the updated configuration loads on the next restart"
        );
    }
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_writer(io::stderr),
        )
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

#[derive(Debug)]
enum CliError {
    /// Input was rejected before any file was touched.
    Validation(String),
    /// The requested change failed; the target file was left intact.
    Failure(anyhow::Error),
    /// The change failed and the pre-run content could not be restored.
    Critical(anyhow::Error),
}

type CliResult<T> = Result<T, CliError>;

impl CliError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    fn failure(error: anyhow::Error) -> Self {
        Self::Failure(error)
    }

    const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
            Self::Critical(_) => 4,
        }
    }

    fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) | Self::Critical(error) => format!("{error:#}"),
        }
    }
}

fn conf_failure(err: ConfError) -> CliError {
    if err.is_critical() {
        CliError::Critical(err.into())
    } else {
        CliError::Failure(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingControl {
        restarts: AtomicUsize,
    }

    impl ServiceControl for RecordingControl {
        fn reload(&self) -> io::Result<()> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl RecordingControl {
        fn restarts(&self) -> usize {
            self.restarts.load(Ordering::SeqCst)
        }
    }

    struct BrokenControl;

    impl ServiceControl for BrokenControl {
        fn reload(&self) -> io::Result<()> {
            Err(io::Error::other("injected restart failure"))
        }
    }

    fn install_args(transport: TransportArg) -> InstallArgs {
        InstallArgs {
            address: Ipv4Addr::new(10, 0, 0, 5),
            port: 514,
            transport,
            selectors: Vec::new(),
            skip_reload: false,
        }
    }

    #[test]
    fn install_writes_the_block_and_restarts_rsyslog() {
        let dir = TempDir::new().expect("temp dir");
        let config = dir.path().join("30-siemlink.conf");
        let control = RecordingControl::default();

        handle_install(&config, install_args(TransportArg::Udp), &control)
            .expect("install should succeed");

        let content = fs::read_to_string(&config).expect("config file");
        assert!(content.contains("# BEGIN SIEM CONFIG FOR 10.0.0.5:514"));
        assert!(content.contains("kern.* @10.0.0.5:514"));
        assert_eq!(control.restarts(), 1);
    }

    #[test]
    fn skip_reload_leaves_the_daemon_alone() {
        let dir = TempDir::new().expect("temp dir");
        let config = dir.path().join("30-siemlink.conf");
        let control = RecordingControl::default();

        let mut args = install_args(TransportArg::Udp);
        args.skip_reload = true;
        handle_install(&config, args, &control).expect("install should succeed");

        assert_eq!(control.restarts(), 0);
    }

    #[test]
    fn failed_restarts_do_not_fail_the_command() {
        let dir = TempDir::new().expect("temp dir");
        let config = dir.path().join("30-siemlink.conf");

        handle_install(&config, install_args(TransportArg::Udp), &BrokenControl)
            .expect("a restart failure is a warning, not a command failure");

        let content = fs::read_to_string(&config).expect("config file");
        assert!(content.contains("# BEGIN SIEM CONFIG FOR 10.0.0.5:514"));
    }

    #[test]
    fn install_succeeds_when_an_unrelated_block_is_corrupt() {
        let dir = TempDir::new().expect("temp dir");
        let config = dir.path().join("30-siemlink.conf");
        let control = RecordingControl::default();

        // Dangling begin marker for a different endpoint; only operations
        // addressing that identity should refuse to run.
        let damaged = "# BEGIN SIEM CONFIG FOR 10.0.0.7:601\nkern.* @10.0.0.7:601\n";
        fs::write(&config, damaged).expect("seed config");

        handle_install(&config, install_args(TransportArg::Udp), &control)
            .expect("install should succeed");

        let content = fs::read_to_string(&config).expect("config file");
        assert!(content.starts_with(damaged));
        assert!(content.contains("# END SIEM CONFIG FOR 10.0.0.5:514"));
        assert_eq!(control.restarts(), 1);
    }

    #[test]
    fn reinstall_replaces_the_block_in_place() {
        let dir = TempDir::new().expect("temp dir");
        let config = dir.path().join("30-siemlink.conf");
        let control = RecordingControl::default();

        handle_install(&config, install_args(TransportArg::Udp), &control)
            .expect("first install");
        handle_install(&config, install_args(TransportArg::Tcp), &control)
            .expect("second install");

        let content = fs::read_to_string(&config).expect("config file");
        assert_eq!(content.matches("# BEGIN SIEM CONFIG FOR").count(), 1);
        assert!(content.contains("@@10.0.0.5:514"));
        assert_eq!(control.restarts(), 2);
    }

    #[test]
    fn custom_selectors_override_the_default_set() {
        let dir = TempDir::new().expect("temp dir");
        let config = dir.path().join("30-siemlink.conf");
        let control = RecordingControl::default();

        let mut args = install_args(TransportArg::Udp);
        args.selectors = vec!["auth.*".to_string()];
        handle_install(&config, args, &control).expect("install should succeed");

        let content = fs::read_to_string(&config).expect("config file");
        assert!(content.contains("auth.* @10.0.0.5:514"));
        assert!(!content.contains("kern.*"));
    }

    #[test]
    fn uninstall_without_a_block_does_not_restart() {
        let dir = TempDir::new().expect("temp dir");
        let config = dir.path().join("30-siemlink.conf");
        let control = RecordingControl::default();

        let args = UninstallArgs {
            address: Ipv4Addr::new(10, 0, 0, 5),
            port: 514,
            skip_reload: false,
        };
        handle_uninstall(&config, args, &control).expect("uninstall should succeed");

        assert!(!config.exists());
        assert_eq!(control.restarts(), 0);
    }

    #[test]
    fn empty_selector_values_are_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let config = dir.path().join("30-siemlink.conf");
        let control = RecordingControl::default();

        let mut args = install_args(TransportArg::Udp);
        args.selectors = vec!["auth.*".to_string(), "   ".to_string()];
        let err = handle_install(&config, args, &control).expect_err("blank selector");

        assert_eq!(err.exit_code(), 2);
        assert!(!config.exists());
        assert_eq!(control.restarts(), 0);
    }

    #[test]
    fn zero_ports_are_rejected_before_any_file_access() {
        let dir = TempDir::new().expect("temp dir");
        let config = dir.path().join("30-siemlink.conf");
        let control = RecordingControl::default();

        let mut args = install_args(TransportArg::Udp);
        args.port = 0;
        let err = handle_install(&config, args, &control).expect_err("port 0 must be rejected");

        assert_eq!(err.exit_code(), 2);
        assert!(!config.exists());
        assert_eq!(control.restarts(), 0);
    }

    #[test]
    fn listing_a_missing_file_reports_nothing_installed() {
        let dir = TempDir::new().expect("temp dir");
        let config = dir.path().join("30-siemlink.conf");

        let rendered = render_blocks(&[], OutputFormat::Table).expect("render");
        assert_eq!(rendered, "no forwarding blocks installed\n");

        let args = ListArgs {
            format: OutputFormat::Table,
        };
        handle_list(&config, args).expect("list should succeed");
    }

    #[test]
    fn json_rendering_exposes_endpoint_and_selectors() {
        let dir = TempDir::new().expect("temp dir");
        let config = dir.path().join("30-siemlink.conf");
        let control = RecordingControl::default();

        handle_install(&config, install_args(TransportArg::Udp), &control).expect("install");
        let blocks = ConfService::new(&config).installed().expect("scan");

        let rendered = render_blocks(&blocks, OutputFormat::Json).expect("render");
        let value: serde_json::Value = serde_json::from_str(&rendered).expect("valid JSON");
        assert_eq!(value[0]["endpoint"]["address"], "10.0.0.5");
        assert_eq!(value[0]["endpoint"]["port"], 514);
        assert_eq!(value[0]["transport"], "udp");
        assert_eq!(
            value[0]["selectors"].as_array().map(Vec::len),
            Some(DEFAULT_SELECTORS.len())
        );
    }

    #[test]
    fn table_rendering_lists_one_row_per_block() {
        let blocks = vec![
            InstalledBlock {
                endpoint: "10.0.0.5:514".parse().expect("endpoint"),
                transport: Some(Transport::Udp),
                selectors: vec!["auth.*".to_string()],
            },
            InstalledBlock {
                endpoint: "192.0.2.7:6514".parse().expect("endpoint"),
                transport: None,
                selectors: Vec::new(),
            },
        ];

        let rendered = render_blocks(&blocks, OutputFormat::Table).expect("render");
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ENDPOINT"));
        assert!(lines[1].contains("10.0.0.5:514"));
        assert!(lines[1].contains("udp"));
        assert!(lines[2].contains("192.0.2.7:6514"));
        assert!(lines[2].contains('-'));
    }

    #[test]
    fn non_default_paths_never_require_privileges() {
        let dir = TempDir::new().expect("temp dir");
        let config = dir.path().join("30-siemlink.conf");
        assert!(require_privileges(&config).is_ok());

        let gate = require_privileges(Path::new(DEFAULT_CONFIG_PATH));
        assert_eq!(gate.is_ok(), Uid::effective().is_root());
    }

    #[test]
    fn exit_codes_discriminate_failure_tiers() {
        assert_eq!(CliError::validation("bad input").exit_code(), 2);
        assert_eq!(CliError::failure(anyhow!("boom")).exit_code(), 3);

        let write = ConfError::Write {
            path: PathBuf::from("/tmp/siemlink.conf"),
            source: io::Error::other("disk full"),
        };
        assert_eq!(conf_failure(write).exit_code(), 3);

        let restore = ConfError::RestoreFailed {
            path: PathBuf::from("/tmp/siemlink.conf"),
            backup: None,
            source: io::Error::other("disk full"),
        };
        assert_eq!(conf_failure(restore).exit_code(), 4);
    }

    #[test]
    fn cli_parses_install_invocations() {
        let cli = Cli::try_parse_from([
            "siemlink",
            "--config",
            "/tmp/siemlink.conf",
            "install",
            "10.0.0.5",
            "514",
            "--transport",
            "tcp",
            "--selector",
            "auth.*",
            "--skip-reload",
        ])
        .expect("arguments should parse");

        assert_eq!(cli.config, PathBuf::from("/tmp/siemlink.conf"));
        let Command::Install(args) = cli.command else {
            panic!("expected an install command");
        };
        assert_eq!(args.address, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(args.port, 514);
        assert!(matches!(args.transport, TransportArg::Tcp));
        assert_eq!(args.selectors, vec!["auth.*".to_string()]);
        assert!(args.skip_reload);
    }
}
