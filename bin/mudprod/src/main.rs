//! mudprod - command-line front end for the MUD session daemon
//!
//! Every invocation except `daemon` and `start --foreground` is a short-lived
//! client: it sends one request over the daemon's Unix socket, prints the
//! reply and exits (status 1 when the daemon answered with an error).

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use mudprod::config::Config;
use mudprod::daemon::{shutdown_on_signals, DaemonClient, DaemonServer, Reply, Request};
use mudprod::{handle_startup_error, LoginConfig, LoginStep, PromptConfig};

/// How long `start` waits for a background daemon to answer
const STARTUP_WAIT: Duration = Duration::from_secs(5);
const STARTUP_POLL: Duration = Duration::from_millis(100);

/// Drive persistent MUD sessions from the shell
#[derive(Parser, Debug)]
#[command(name = "mudprod", version, about)]
struct Cli {
    /// Session to operate on
    #[arg(short, long, global = true, env = "MUDPROD_SESSION", default_value = "default")]
    session: String,

    /// Daemon control socket
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print replies as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon in the background
    Start {
        /// Stay in the foreground instead
        #[arg(long)]
        foreground: bool,
    },
    /// Disconnect every session and stop the daemon
    Stop,
    /// Run the daemon in this process
    #[command(hide = true)]
    Daemon,
    /// Connect the session, logging in if a script is given
    Connect {
        host: String,
        port: u16,
        /// Login script as JSON: a LoginConfig object or a list of {expect, send} steps
        #[arg(long)]
        login: Option<String>,
        /// Characters that end a prompt (replaces the default patterns)
        #[arg(long)]
        end_chars: Option<String>,
        /// Do not reconnect automatically when the connection drops
        #[arg(long)]
        no_reconnect: bool,
    },
    /// Send a command and print everything up to the next prompt
    Send {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        /// Use the short timeout preset
        #[arg(long)]
        fast: bool,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Send several commands in order
    Batch {
        #[arg(required = true, num_args = 1..)]
        commands: Vec<String>,
        #[arg(long)]
        fast: bool,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Write text verbatim, without a newline or waiting
    Raw {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Print pending output
    Read,
    /// Wait briefly for output, then print it
    Peek {
        #[arg(long)]
        wait_ms: Option<u64>,
    },
    /// Wait for a pattern to appear in the output
    Wait {
        pattern: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Show one session, or all of them
    Status { name: Option<String> },
    /// Manage triggers
    Trigger {
        #[command(subcommand)]
        action: TriggerAction,
    },
    /// Repeat a command on every balance cue; `off` disables it
    Repeat {
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,
        /// Cue pattern instead of the configured one
        #[arg(long)]
        pattern: Option<String>,
    },
    /// List triggers
    Triggers,
    /// Close a session and forget it
    Disconnect { name: Option<String> },
    /// Check that the daemon answers
    Ping,
}

#[derive(Subcommand, Debug)]
enum TriggerAction {
    /// Send COMMAND whenever PATTERN appears
    Add {
        pattern: String,
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,
        /// Defaults to the pattern
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        cooldown_ms: Option<u64>,
    },
    Remove { name: String },
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<mudprod::Error>() {
                Some(err) => eprintln!("{}", handle_startup_error(err)),
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let debug = debug
        || std::env::var("MUDPROD_DEBUG")
            .map_or(false, |v| v == "1" || v.eq_ignore_ascii_case("true"));
    let level = if debug { "debug" } else { "info" };

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn load_configuration(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => mudprod::load_config_from(path)?,
        None => mudprod::load_config(),
    };
    if let Some(socket) = &cli.socket {
        config.daemon.socket_path = socket.clone();
    }
    debug!("Using socket {}", config.daemon.socket_path.display());
    Ok(config)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_configuration(&cli)?;
    let client = DaemonClient::from_config(&config);

    let request = match &cli.command {
        Command::Daemon => return run_daemon(&config).await,
        Command::Start { foreground } => {
            if client.is_running().await {
                println!("daemon already running on {}", client.socket_path().display());
                return Ok(ExitCode::SUCCESS);
            }
            if *foreground {
                return run_daemon(&config).await;
            }
            return start_background(&cli, &config, &client).await;
        }
        Command::Stop => {
            if !client.is_running().await {
                println!("daemon not running");
                return Ok(ExitCode::SUCCESS);
            }
            Request::Stop
        }
        command => build_request(&cli.session, command)?,
    };

    let reply = client.request(&request).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
    } else {
        print_reply(&reply);
    }

    Ok(if reply.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn build_request(session: &str, command: &Command) -> Result<Request> {
    let session = session.to_string();
    let request = match command {
        Command::Connect {
            host,
            port,
            login,
            end_chars,
            no_reconnect,
        } => Request::Connect {
            session,
            host: host.clone(),
            port: *port,
            login: login.as_deref().map(parse_login).transpose()?,
            prompt: end_chars.as_deref().map(|chars| PromptConfig::end_chars_only(chars)),
            auto_reconnect: no_reconnect.then_some(false),
        },
        Command::Send {
            text,
            fast,
            timeout_ms,
        } => Request::Send {
            session,
            text: text.join(" "),
            fast: *fast,
            timeout_ms: *timeout_ms,
        },
        Command::Batch {
            commands,
            fast,
            timeout_ms,
        } => Request::Batch {
            session,
            commands: commands.clone(),
            fast: *fast,
            timeout_ms: *timeout_ms,
        },
        Command::Raw { text } => Request::Raw {
            session,
            data: text.join(" "),
        },
        Command::Read => Request::Read { session },
        Command::Peek { wait_ms } => Request::Peek {
            session,
            wait_ms: *wait_ms,
        },
        Command::Wait {
            pattern,
            timeout_ms,
        } => Request::Wait {
            session,
            pattern: pattern.clone(),
            timeout_ms: *timeout_ms,
        },
        Command::Status { name } => Request::Status {
            session: name.clone(),
        },
        Command::Trigger { action } => match action {
            TriggerAction::Add {
                pattern,
                command,
                name,
                cooldown_ms,
            } => Request::TriggerAdd {
                session,
                name: name.clone(),
                pattern: pattern.clone(),
                command: command.join(" "),
                cooldown_ms: *cooldown_ms,
            },
            TriggerAction::Remove { name } => Request::TriggerRemove {
                session,
                name: name.clone(),
            },
            TriggerAction::Clear => Request::TriggerClear { session },
        },
        Command::Repeat { command, pattern } => Request::Repeat {
            session,
            command: command.join(" "),
            pattern: pattern.clone(),
        },
        Command::Triggers => Request::Triggers { session },
        Command::Disconnect { name } => Request::Disconnect {
            session: name.clone().unwrap_or(session),
        },
        Command::Ping => Request::Ping,
        Command::Start { .. } | Command::Stop | Command::Daemon => {
            anyhow::bail!("{:?} is not a client request", command)
        }
    };
    Ok(request)
}

/// Accept either a full LoginConfig or just its list of steps
fn parse_login(json: &str) -> Result<LoginConfig> {
    if let Ok(config) = serde_json::from_str::<LoginConfig>(json) {
        return Ok(config);
    }
    let steps: Vec<LoginStep> =
        serde_json::from_str(json).context("--login must be a login object or a list of steps")?;
    Ok(LoginConfig::with_steps(steps))
}

async fn run_daemon(config: &Config) -> Result<ExitCode> {
    info!("Starting mudprod daemon v{}", mudprod::VERSION);
    let server = DaemonServer::bind(config).await?;
    tokio::spawn(shutdown_on_signals(server.shutdown_handle()));
    server.run().await?;
    Ok(ExitCode::SUCCESS)
}

/// Re-run this binary as `daemon` in its own process group
async fn start_background(cli: &Cli, config: &Config, client: &DaemonClient) -> Result<ExitCode> {
    use std::os::unix::process::CommandExt;

    let log_path = &config.daemon.log_path;
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open daemon log {}", log_path.display()))?;
    let log_err = log.try_clone()?;

    let exe = std::env::current_exe().context("Failed to locate the mudprod executable")?;
    let mut command = std::process::Command::new(exe);
    command.arg("daemon");
    command.arg("--socket").arg(&config.daemon.socket_path);
    if let Some(path) = &cli.config {
        command.arg("--config").arg(path);
    }
    if cli.debug {
        command.arg("--debug");
    }
    command
        .stdin(std::process::Stdio::null())
        .stdout(log)
        .stderr(log_err)
        .process_group(0);

    let child = command.spawn().context("Failed to spawn the daemon")?;
    debug!("Spawned daemon pid {}", child.id());

    let deadline = tokio::time::Instant::now() + STARTUP_WAIT;
    while tokio::time::Instant::now() < deadline {
        if client.is_running().await {
            println!(
                "daemon started (pid {}), log: {}",
                child.id(),
                log_path.display()
            );
            return Ok(ExitCode::SUCCESS);
        }
        tokio::time::sleep(STARTUP_POLL).await;
    }

    eprintln!(
        "daemon did not come up within {:?}; see {}",
        STARTUP_WAIT,
        log_path.display()
    );
    Ok(ExitCode::FAILURE)
}

fn print_text(text: &str) {
    if text.is_empty() {
        return;
    }
    if text.ends_with('\n') {
        print!("{}", text);
    } else {
        println!("{}", text);
    }
}

fn print_reply(reply: &Reply) {
    match reply {
        Reply::Ok { message } => {
            if let Some(message) = message {
                println!("{}", message);
            }
        }
        Reply::Connected {
            session,
            reused,
            greeting,
            ..
        } => {
            if *reused {
                println!("session '{}' already connected", session);
            } else {
                print_text(&greeting.clean);
            }
        }
        Reply::Response { response, .. } => print_text(&response.clean),
        Reply::Batch { results, error, .. } => {
            for item in results {
                print_text(&item.response.clean);
            }
            if let Some(failure) = error {
                eprintln!("error ({}) at '{}': {}", failure.kind, failure.command, failure.message);
            }
        }
        Reply::Status { sessions } => {
            if sessions.is_empty() {
                println!("no sessions");
            }
            for status in sessions {
                println!(
                    "{:<16} {:<13} {}:{}  buffered={} triggers={}{}",
                    status.name,
                    status.state.to_string(),
                    status.host,
                    status.port,
                    status.buffered_bytes,
                    status.triggers,
                    if status.logged_in { " logged-in" } else { "" }
                );
            }
        }
        Reply::Triggers {
            triggers, repeat, ..
        } => {
            if triggers.is_empty() && repeat.is_none() {
                println!("no triggers");
            }
            for trigger in repeat.iter().chain(triggers.iter()) {
                println!(
                    "{}: /{}/ -> {}  (cooldown {}ms, fired {})",
                    trigger.name,
                    trigger.pattern,
                    trigger.command,
                    trigger.cooldown_ms.unwrap_or(0),
                    trigger.fire_count
                );
            }
        }
        Reply::Pong { version, sessions } => {
            println!("mudprod daemon v{} ({} session(s))", version, sessions);
        }
        Reply::Error { kind, message } => eprintln!("error ({}): {}", kind, message),
    }
}
