//! Linecast — newline-delimited TCP message server
//!
//! Accepts any number of TCP clients, prints every line they send, and
//! lets the operator broadcast or unicast lines back from stdin.
//!
//! Usage:
//!   linecast                              # Default port 7070, all interfaces
//!   linecast --port 9000                  # Custom port
//!   linecast --hostname 127.0.0.1         # Localhost only
//!   linecast --json                       # Events as JSON lines on stdout

mod console;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use linecast_transport::{LineServer, ServerConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use console::Command;

#[derive(Parser, Debug)]
#[command(name = "linecast", about = "Linecast — newline-delimited TCP message server")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "7070")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "0.0.0.0")]
    hostname: String,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_connections: Option<usize>,

    /// Drop sessions that buffer a longer unterminated line (bytes)
    #[arg(long)]
    max_line_length: Option<usize>,

    /// Per-write timeout in milliseconds
    #[arg(long, default_value = "5000")]
    write_timeout_ms: u64,

    /// Bytes per socket read
    #[arg(long, default_value = "1024")]
    read_buffer_size: usize,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file (defaults to ~/.linecast/logs/linecast.log if no path given)
    #[arg(long, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            hostname: self.hostname.clone(),
            read_buffer_size: self.read_buffer_size,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            max_connections: self.max_connections,
            max_line_length: self.max_line_length,
        }
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(ref log_file_arg) = cli.log_file {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        let log_path = if log_file_arg == "DEFAULT" {
            PathBuf::from(&home).join(".linecast/logs/linecast.log")
        } else {
            PathBuf::from(log_file_arg)
        };

        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        // stdout carries events; keep logs on stderr
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

/// Run one operator command. Returns `false` when the operator asked to quit.
async fn run_command(server: &LineServer, line: &str) -> bool {
    let command = match console::parse_command(line) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}");
            return true;
        }
    };

    match command {
        Command::Broadcast(text) => match server.broadcast(&text).await {
            Ok(delivered) => println!("  → sent to {delivered} session(s)"),
            Err(e) => eprintln!("Broadcast failed: {e}"),
        },
        Command::SendTo { session_id, text } => {
            if let Err(e) = server.send_to(session_id, &text).await {
                eprintln!("Send failed: {e}");
            }
        }
        Command::List => {
            let sessions = server.sessions();
            println!("  {} open session(s)", sessions.len());
            for info in &sessions {
                println!("{}", console::format_session(info));
            }
        }
        Command::Help => println!("{}", console::HELP),
        Command::Quit => return false,
        Command::Empty => {}
    }
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let (server, mut events) = LineServer::new(cli.server_config());
    let port = server
        .open(cli.port)
        .await
        .with_context(|| format!("Failed to open {}:{}", cli.hostname, cli.port))?;

    println!();
    println!("  Linecast server");
    println!("  Port:       {port}");
    println!("  Binding:    {}", cli.hostname);
    match cli.max_connections {
        Some(max) => println!("  Sessions:   up to {max}"),
        None => println!("  Sessions:   unlimited"),
    }
    println!("  Type /help for commands");
    println!();

    // Single consumer of server events
    let json = cli.json;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", console::format_event(&event, json));
        }
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupt received");
                break;
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if !run_command(&server, &line).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("stdin closed, serving until interrupted");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read stdin: {e}");
                        stdin_open = false;
                    }
                }
            }
        }
    }

    server.close().await;
    // Dropping the server ends the event stream once the printer has drained it.
    drop(server);
    if let Err(e) = printer.await {
        warn!("Event printer ended abnormally: {e}");
    }
    Ok(())
}
