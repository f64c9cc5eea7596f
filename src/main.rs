//! cmcp: keeps a local registry of MCP server launch configurations and starts or stops
//! them through the `claude mcp` CLI.
//!
//! This is the entry point of the application. It parses command-line arguments, resolves
//! settings, and dispatches to the individual subcommands. Server lifecycle is always
//! delegated to the external tool; cmcp itself holds no runtime state.

mod builder;
mod config;
mod diagnostics;
mod error;
mod invoker;
mod masking;
mod output;
mod runner;
mod status;

use std::collections::BTreeSet;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::builder::CommandBuilder;
use crate::config::{LaunchSpec, Registry, CONFIG_PATH_ENV};
use crate::error::{CmcpError, ConfigError};
use crate::invoker::{DisplayMode, Invoker, ToolSettings};
use crate::output::Palette;
use crate::runner::{CommandRunner, Invocation, SystemRunner};

/// Environment variable holding the tracing filter.
const LOG_ENV: &str = "CMCP_LOG";

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "cmcp",
    version,
    about = "Manage Claude MCP servers from a local registry",
    styles = help_styles(),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to the registry file (default: ~/.cmcp/config.json).
    #[arg(long, global = true, env = "CMCP_CONFIG_PATH")]
    config: Option<PathBuf>,
    /// Path to the claude binary.
    #[arg(long, global = true, env = "CMCP_CLAUDE_BIN")]
    claude_bin: Option<PathBuf>,
    /// Do not pass --debug to claude when adding or removing servers.
    #[arg(long, global = true)]
    no_tool_debug: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start registry servers in Claude.
    Start(StartArgs),
    /// Stop servers running in Claude.
    Stop(StopArgs),
    /// Show the servers Claude currently knows about.
    #[command(alias = "list")]
    Online(DryRunArgs),
    /// Stop every registry server running in Claude.
    #[command(alias = "stop-all")]
    Reset(ResetArgs),
    /// Manage the registry file.
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Debug, Args)]
struct StartArgs {
    /// Servers to start.
    names: Vec<String>,
    /// Start every registry server that is not running.
    #[arg(long, conflicts_with = "names")]
    all: bool,
    /// Stream claude's output and show the command being run.
    #[arg(short, long)]
    verbose: bool,
    /// Print the commands without running them.
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// Show the full diagnostics report for failures (implies --verbose).
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Args)]
struct StopArgs {
    /// Servers to stop.
    names: Vec<String>,
    /// Stop every registry server that is running.
    #[arg(long, conflicts_with = "names")]
    all: bool,
    /// Stream claude's output and show the command being run.
    #[arg(short, long)]
    verbose: bool,
    /// Print the commands without running them.
    #[arg(short = 'n', long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DryRunArgs {
    /// Print the command without running it.
    #[arg(short = 'n', long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ResetArgs {
    /// Print the commands without running them.
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// Do not ask for confirmation.
    #[arg(short, long)]
    yes: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// List registry servers.
    #[command(alias = "ls")]
    List,
    /// Open the registry file in an editor.
    Open,
    /// Add a server: cmcp config add NAME [--env K=V]... [--cwd DIR] -- COMMAND [ARGS...]
    Add(ConfigAddArgs),
    /// Remove servers from the registry, stopping them first if running.
    #[command(alias = "rm")]
    Remove(ConfigRemoveArgs),
}

#[derive(Debug, Args)]
struct ConfigAddArgs {
    /// Server name.
    name: String,
    /// Environment entries (KEY=VALUE).
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,
    /// Working directory for the server.
    #[arg(long)]
    cwd: Option<String>,
    /// Server command and arguments, after `--`.
    #[arg(required = true, last = true)]
    command: Vec<String>,
}

#[derive(Debug, Args)]
struct ConfigRemoveArgs {
    /// Servers to remove.
    #[arg(required = true)]
    names: Vec<String>,
    /// Do not ask for confirmation.
    #[arg(short, long)]
    yes: bool,
    /// Print what would happen without changing anything.
    #[arg(short = 'n', long)]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let session = Session::new(&cli)?;
    match cli.command {
        Commands::Start(args) => start(&session, args).await,
        Commands::Stop(args) => stop(&session, args).await,
        Commands::Online(args) => online(&session, args).await,
        Commands::Reset(args) => reset(&session, args).await,
        Commands::Config(ConfigCommands::List) => config_list(&session).await,
        Commands::Config(ConfigCommands::Open) => config_open(&session).await,
        Commands::Config(ConfigCommands::Add(args)) => config_add(&session, args),
        Commands::Config(ConfigCommands::Remove(args)) => config_remove(&session, args).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
}

/// Settings resolved once per run.
struct Session {
    config_path: PathBuf,
    palette: Palette,
    invoker: Invoker<SystemRunner>,
}

impl Session {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = match &cli.config {
            Some(path) => path.clone(),
            None => config::default_config_path().ok_or_else(|| {
                anyhow!(
                    "could not determine home directory; set {} or pass --config",
                    CONFIG_PATH_ENV
                )
            })?,
        };
        let tool = ToolSettings::resolve(cli.claude_bin.clone(), !cli.no_tool_debug);
        debug!(config = %config_path.display(), tool = %tool.program, "resolved settings");
        Ok(Self {
            config_path,
            palette: Palette::detect(cli.no_color),
            invoker: Invoker::new(SystemRunner, CommandBuilder::new(), tool),
        })
    }

    fn load(&self) -> Result<Registry> {
        config::load(&self.config_path).context("failed to load config")
    }

    fn save(&self, registry: &Registry) -> Result<()> {
        config::save(registry, &self.config_path).context("failed to save config")
    }

    fn builder(&self) -> &CommandBuilder {
        self.invoker.builder()
    }

    async fn registered_names(&self, registry: &Registry) -> Vec<String> {
        let mut registered = Vec::new();
        for name in registry.names() {
            if self.invoker.is_registered(&name).await {
                registered.push(name);
            }
        }
        registered
    }
}

fn require_known(registry: &Registry, names: &[String]) -> Result<()> {
    for name in names {
        if !registry.contains(name) {
            return Err(ConfigError::NotFound(name.clone()).into());
        }
    }
    Ok(())
}

fn split_env(value: &str) -> Result<(String, String)> {
    let (key, val) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("invalid env {}, expected KEY=VALUE", value))?;
    if key.is_empty() {
        bail!("invalid env {}, key is empty", value);
    }
    Ok((key.to_string(), val.to_string()))
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn start(session: &Session, args: StartArgs) -> Result<()> {
    let palette = session.palette;
    let registry = session.load()?;
    if registry.is_empty() {
        println!(
            "{}",
            palette.yellow("No servers configured. Use 'cmcp config add' or 'cmcp config open' to add servers.")
        );
        return Ok(());
    }

    let mut selected = Vec::new();
    if args.all {
        for name in registry.names() {
            if !session.invoker.is_registered(&name).await {
                selected.push(name);
            }
        }
        if selected.is_empty() {
            println!("{}", palette.yellow("All registered servers are already running."));
            return Ok(());
        }
    } else {
        if args.names.is_empty() {
            bail!("no servers selected; pass server names or --all");
        }
        require_known(&registry, &args.names)?;
        for name in &args.names {
            if session.invoker.is_registered(name).await {
                println!("{}", palette.yellow(&format!("Server '{}' is already running.", name)));
            } else {
                selected.push(name.clone());
            }
        }
        if selected.is_empty() {
            return Ok(());
        }
    }

    let builder = session.builder();
    if args.dry_run {
        println!("{}", palette.yellow("Would execute the following commands:"));
        println!();
        for name in &selected {
            let spec = lookup(&registry, name)?;
            if builder.uses_json(spec) {
                let rendered = builder.display_command_json(name, spec, true)?;
                println!("$ {}", palette.json(&rendered));
                println!();
            } else {
                println!("$ {}", builder.display_command(name, spec)?);
            }
        }
        return Ok(());
    }

    let mode = DisplayMode::from_verbose(args.verbose || args.debug);
    let mut started = Vec::new();
    let mut failed = Vec::new();
    for name in selected {
        let spec = lookup(&registry, &name)?;
        println!("{}", palette.cyan(&format!("Starting server '{}'...", name)));
        match session.invoker.launch(&name, spec, mode).await {
            Ok(()) => {
                println!(
                    "{}",
                    palette.green(&format!("✓ Successfully started server '{}'", name))
                );
                started.push(name);
            }
            Err(err) => {
                if args.debug {
                    println!("{}", palette.red(&format!("✗ Server '{}' diagnostics:", name)));
                    println!("{}", err);
                } else {
                    println!(
                        "{} {}",
                        palette.red(&format!("✗ Failed to start server '{}':", name)),
                        err
                    );
                }
                failed.push(name);
            }
        }
    }

    if !started.is_empty() {
        println!("\nStarted {} server(s): {}", started.len(), started.join(", "));
    }
    report_failures(palette, "start", &failed)
}

fn lookup<'a>(registry: &'a Registry, name: &str) -> Result<&'a LaunchSpec> {
    registry
        .find(name)
        .ok_or_else(|| ConfigError::NotFound(name.to_string()).into())
}

fn report_failures(palette: Palette, verb: &str, failed: &[String]) -> Result<()> {
    if failed.is_empty() {
        return Ok(());
    }
    println!(
        "{}",
        palette.red(&format!("\nFailed to {} {} server(s):", verb, failed.len()))
    );
    for name in failed {
        println!("{}", palette.red(&format!("  • {}", name)));
    }
    bail!("failed to {} {} server(s)", verb, failed.len())
}

async fn stop(session: &Session, args: StopArgs) -> Result<()> {
    let palette = session.palette;
    let registry = session.load()?;
    let candidates = if args.all {
        session.registered_names(&registry).await
    } else {
        if args.names.is_empty() {
            bail!("no servers selected; pass server names or --all");
        }
        require_known(&registry, &args.names)?;
        args.names.clone()
    };
    if candidates.is_empty() {
        println!(
            "{}",
            palette.yellow("No servers from your config are currently in Claude.")
        );
        return Ok(());
    }

    let builder = session.builder();
    if args.dry_run {
        println!("{}", palette.yellow("Would execute the following commands:"));
        println!();
        for name in &candidates {
            println!("$ {}", builder.display_args(&builder.stop_args(name)));
        }
        return Ok(());
    }

    let mode = DisplayMode::from_verbose(args.verbose);
    let mut stopped = Vec::new();
    let mut failed = Vec::new();
    for name in candidates {
        println!(
            "{}",
            palette.cyan(&format!("Stopping server '{}' in Claude for this project...", name))
        );
        match session.invoker.stop(&name, mode).await {
            Ok(()) => {
                println!(
                    "{}",
                    palette.green(&format!("✓ Successfully stopped server '{}'", name))
                );
                stopped.push(name);
            }
            Err(CmcpError::NotRegistered(_)) => {
                println!("{}", palette.yellow(&format!("Server '{}' is not running.", name)));
            }
            Err(err) => {
                println!(
                    "{} {}",
                    palette.red(&format!("✗ Failed to stop server '{}':", name)),
                    err
                );
                failed.push(name);
            }
        }
    }

    if !stopped.is_empty() {
        println!("\nStopped {} server(s): {}", stopped.len(), stopped.join(", "));
    }
    report_failures(palette, "stop", &failed)
}

async fn online(session: &Session, args: DryRunArgs) -> Result<()> {
    let palette = session.palette;
    let builder = session.builder();
    if args.dry_run {
        println!("{}", palette.yellow("Would execute the following command:"));
        println!();
        println!("$ {}", builder.display_args(&builder.list_args()));
        return Ok(());
    }

    let listing = session.invoker.list().await?;
    if status::is_empty_listing(&listing.stdout, &listing.stderr) {
        println!("{}", palette.yellow(status::EMPTY_LISTING_HINT));
        return Ok(());
    }
    print!("{}", listing.stdout);
    eprint!("{}", listing.stderr);
    if !listing.success() {
        bail!(
            "failed to list Claude MCP servers: {}",
            listing.describe_exit()
        );
    }
    Ok(())
}

async fn reset(session: &Session, args: ResetArgs) -> Result<()> {
    let palette = session.palette;
    let registry = session.load()?;
    let running = session.registered_names(&registry).await;
    if running.is_empty() {
        println!(
            "{}",
            palette.yellow(
                "No servers from your config are currently running in Claude for this project."
            )
        );
        return Ok(());
    }

    println!(
        "{}",
        palette.cyan(&format!(
            "Found {} running server(s) from your config in Claude for this project:",
            running.len()
        ))
    );
    for name in &running {
        println!("  - {}", name);
    }

    let builder = session.builder();
    if args.dry_run {
        println!("{}", palette.yellow("\nWould execute the following commands:"));
        println!();
        for stop_args in builder.bulk_stop_args(&running) {
            println!("$ {}", builder.display_args(&stop_args));
        }
        return Ok(());
    }

    if !args.yes && !confirm("Are you sure you want to stop all servers in Claude for this project?")? {
        println!("Aborted.");
        return Ok(());
    }

    println!("{}", palette.cyan("Stopping all servers..."));
    let stopped = session
        .invoker
        .stop_all(&registry)
        .await
        .context("failed to stop servers")?;
    println!(
        "{}",
        palette.green(&format!("Successfully stopped {} server(s).", stopped.len()))
    );
    Ok(())
}

async fn config_list(session: &Session) -> Result<()> {
    let palette = session.palette;
    let registry = session.load()?;
    if registry.is_empty() {
        println!("{}", palette.yellow("No servers configured"));
        println!(
            "{}",
            palette.gray("→ Use 'cmcp config add' or 'cmcp config open' to add servers")
        );
        return Ok(());
    }

    let running: BTreeSet<String> = session
        .registered_names(&registry)
        .await
        .into_iter()
        .collect();
    print!(
        "{} {}",
        palette.bold(&registry.len().to_string()),
        palette.gray("server(s) configured")
    );
    if !running.is_empty() {
        print!(
            " • {} {}",
            palette.green(&running.len().to_string()),
            palette.gray("running")
        );
    }
    println!();
    println!();

    for (name, spec) in &registry.servers {
        let marker = if running.contains(name) {
            palette.green("●")
        } else {
            palette.gray("○")
        };
        println!("{} {}", marker, palette.bold(name));
        print!("  {}", palette.blue(&spec.command));
        if !spec.args.is_empty() {
            print!(" {}", shell_words::join(masking::mask_args(&spec.args)));
        }
        println!();
        if !spec.env.is_empty() {
            let keys: Vec<String> = spec.env.keys().map(|key| palette.yellow(key)).collect();
            println!("  {} {}", palette.gray("env:"), keys.join(", "));
        }
        if let Some(cwd) = &spec.cwd {
            println!("  {} {}", palette.gray("cwd:"), cwd);
        }
        println!();
    }
    Ok(())
}

/// Picks the editor: `$EDITOR` (which may carry its own flags), then nano, vim and vi.
fn editor_command(
    env_editor: Option<String>,
    on_path: impl Fn(&str) -> bool,
) -> Option<Vec<String>> {
    if let Some(words) = env_editor
        .as_deref()
        .and_then(|editor| shell_words::split(editor).ok())
        .filter(|words| !words.is_empty())
    {
        return Some(words);
    }
    ["nano", "vim", "vi"]
        .into_iter()
        .find(|candidate| on_path(candidate))
        .map(|candidate| vec![candidate.to_string()])
}

async fn open_in_editor(session: &Session, path: &Path) -> Result<()> {
    let runner = session.invoker.runner();
    let mut words = editor_command(std::env::var("EDITOR").ok(), |program| {
        runner.locate(program).is_some()
    })
    .ok_or_else(|| {
        anyhow!("no suitable editor found. Please install nano or set $EDITOR environment variable")
    })?;
    let program = words.remove(0);
    words.push(path.display().to_string());
    let status = runner
        .stream(&Invocation::new(program.clone(), words))
        .await
        .with_context(|| format!("failed to launch editor {}", program))?;
    if !status.success() {
        bail!("editor {} exited with {}", program, status.describe_exit());
    }
    Ok(())
}

async fn config_open(session: &Session) -> Result<()> {
    let palette = session.palette;
    let path = &session.config_path;
    let registry = session.load()?;
    if !path.exists() {
        session
            .save(&registry)
            .context("failed to create config")?;
    }

    println!("{}", palette.cyan("Opening config file..."));
    open_in_editor(session, path).await?;

    let registry = config::load(path).context("failed to reload config after editing")?;
    config::save(&registry, path).context("failed to reformat config")?;
    println!("{}", palette.green("Config file reformatted successfully."));
    Ok(())
}

fn spec_from_args(args: &ConfigAddArgs) -> Result<LaunchSpec> {
    let (command, rest) = args
        .command
        .split_first()
        .ok_or_else(|| anyhow!("missing server command after --"))?;
    let mut spec = LaunchSpec::new(command.clone());
    spec.args = rest.to_vec();
    spec.cwd = args.cwd.clone();
    for entry in &args.env {
        let (key, value) = split_env(entry)?;
        spec.env.insert(key, value);
    }
    Ok(spec)
}

fn config_add(session: &Session, args: ConfigAddArgs) -> Result<()> {
    let mut registry = session.load()?;
    let spec = spec_from_args(&args)?;
    registry.add(&args.name, spec)?;
    session.save(&registry)?;
    println!(
        "{}",
        session.palette.green(&format!(
            "✓ Added server '{}' to {}",
            args.name,
            session.config_path.display()
        ))
    );
    Ok(())
}

async fn config_remove(session: &Session, args: ConfigRemoveArgs) -> Result<()> {
    let palette = session.palette;
    let mut registry = session.load()?;
    require_known(&registry, &args.names)?;

    let mut running = BTreeSet::new();
    for name in &args.names {
        if session.invoker.is_registered(name).await {
            running.insert(name.clone());
        }
    }

    println!("{}", palette.cyan("The following servers will be removed:"));
    for name in &args.names {
        if running.contains(name) {
            println!("  • {} {}", name, palette.gray("(will be stopped)"));
        } else {
            println!("  • {}", name);
        }
    }
    println!();

    let builder = session.builder();
    if args.dry_run {
        println!("{}", palette.yellow("Would execute the following commands:"));
        println!();
        for name in &running {
            println!("$ {}", builder.display_args(&builder.stop_args(name)));
        }
        println!(
            "{}",
            palette.gray(&format!(
                "and remove {} server(s) from {}",
                args.names.len(),
                session.config_path.display()
            ))
        );
        return Ok(());
    }

    if !args.yes
        && !confirm(&format!(
            "Are you sure you want to remove {} server(s)?",
            args.names.len()
        ))?
    {
        println!("Aborted.");
        return Ok(());
    }

    let mut removed = Vec::new();
    for name in &args.names {
        if running.contains(name) {
            println!("{}", palette.cyan(&format!("Stopping server '{}'...", name)));
            if let Err(err) = session.invoker.stop(name, DisplayMode::Captured).await {
                println!(
                    "{}",
                    palette.red(&format!("Warning: Failed to stop server '{}': {}", name, err))
                );
            }
        }
        registry.remove(name)?;
        removed.push(name.clone());
    }
    session.save(&registry)?;

    println!();
    println!(
        "{}",
        palette.green(&format!(
            "✓ Successfully removed {} server(s): {}",
            removed.len(),
            removed.join(", ")
        ))
    );
    Ok(())
}
