mod chat;
mod history;
mod serve;

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::core::config::AppConfig;
use crate::core::session::{FileStorage, Language, SessionStore};
use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Server")
        .command("serve", "Start the API server")
        .command("  --host <addr>", "Bind address (default 127.0.0.1)")
        .command("  --port <port>", "Bind port (default 3000, or $PORT)")
        .print();

    GuideSection::new("Client")
        .command("chat", "Start an interactive conversation")
        .command("  --api-url <url>", "Server to talk to (default http://127.0.0.1:<port>)")
        .command("history list", "List saved conversations")
        .command("history show <id>", "Print a saved conversation")
        .command("history delete <id>", "Delete a saved conversation")
        .command("history clear", "Delete all saved conversations")
        .command("lang [zh|en|ru]", "Show or set the interface language")
        .print();

    GuideSection::new("Global options")
        .command("--config <path>", "Config file (default <data dir>/config.toml)")
        .command("--verbose, -v", "Debug-level logging")
        .blank()
        .info("Data dir: $MULTICHAT_DATA_DIR or ~/.multichat")
        .info("API key: $DASHSCOPE_API_KEY")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("multichat").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct GlobalFlags {
    pub verbose: bool,
    pub config: Option<PathBuf>,
}

pub(crate) fn parse_global_flags(args: &[String], start: usize) -> GlobalFlags {
    let mut flags = GlobalFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--verbose" | "-v" => {
                flags.verbose = true;
                i += 1;
            }
            "--config" => {
                if i + 1 < args.len() {
                    flags.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    flags
}

pub(crate) fn parse_serve_flags(
    args: &[String],
    start: usize,
    mut host: String,
    mut port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                if i + 1 < args.len() {
                    port = args[i + 1].parse().unwrap_or(port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--host" => {
                if i + 1 < args.len() {
                    host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (host, port)
}

pub(crate) fn parse_chat_flags(args: &[String], start: usize, default_api_url: String) -> String {
    let mut api_url = default_api_url;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-url" => {
                if i + 1 < args.len() {
                    api_url = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    api_url
}

/// The local server address a client should dial for this config.
pub(crate) fn default_api_url(config: &AppConfig) -> String {
    let host = match config.server.host.as_str() {
        "0.0.0.0" | "::" | "" => "127.0.0.1",
        host => host,
    };
    format!("http://{}:{}", host, config.server.port)
}

/// Positional arguments after the command, with flags and their values removed.
pub(crate) fn positional_args(args: &[String], start: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "--api-url" | "--host" | "--port" => i += 2,
            "--verbose" | "-v" => i += 1,
            other => {
                out.push(other.to_string());
                i += 1;
            }
        }
    }
    out
}

fn run_lang(config: &AppConfig, args: &[String]) -> Result<()> {
    let storage = FileStorage::new(config.storage_dir())?;
    let mut store = SessionStore::new(storage, config.history.max_sessions);
    match args.first() {
        None => {
            terminal::print_status("Language", store.language().code());
        }
        Some(code) => match code.parse::<Language>() {
            Ok(language) => {
                store.set_language(language)?;
                terminal::print_success(&format!("Language set to {}", language.code()));
            }
            Err(e) => print_error(&e),
        },
    }
    Ok(())
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let cmd = args[1].as_str();
    if matches!(cmd, "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }
    if !matches!(cmd, "serve" | "chat" | "history" | "lang") {
        print_error(&format!("Unknown command: {}", cmd));
        print_help();
        return Ok(());
    }

    let flags = parse_global_flags(&args, 2);
    let data_dir = AppConfig::default_data_dir()?;
    let log_file = AppConfig::log_file(&data_dir);
    match cmd {
        "serve" => crate::logging::init(flags.verbose, Some(&log_file), false)?,
        "chat" => crate::logging::init(flags.verbose, Some(&log_file), true)?,
        _ => crate::logging::init(flags.verbose, None, !flags.verbose)?,
    }

    let mut config = AppConfig::load(&data_dir, flags.config.as_deref()).await?;

    match cmd {
        "serve" => {
            let (host, port) =
                parse_serve_flags(&args, 2, config.server.host.clone(), config.server.port);
            config.server.host = host;
            config.server.port = port;
            serve::run_server(config).await
        }
        "chat" => {
            let api_url = parse_chat_flags(&args, 2, default_api_url(&config));
            chat::run_chat(&config, api_url).await
        }
        "history" => history::run_history(&config, &positional_args(&args, 2)),
        _ => run_lang(&config, &positional_args(&args, 2)),
    }
}
