//! resp-dispatch demo server
//!
//! Registers a handful of Redis-style commands over an in-memory map and
//! serves them until Ctrl+C. Transactions (MULTI/EXEC) and QUIT come from
//! the library.

use bytes::Bytes;
use resp_dispatch::{
    CommandError, HandlerResult, Request, RespValue, Server, ServerConfig, TracingLogger,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Host configuration
struct Config {
    host: String,
    port: u16,
    /// `None` disables TCP keep-alive
    keepalive: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: resp_dispatch::DEFAULT_HOST.to_string(),
            port: resp_dispatch::DEFAULT_PORT,
            keepalive: ServerConfig::default().keepalive,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = value_of(&args, i, "--host").to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = value_of(&args, i, "--port").parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    });
                    i += 2;
                }
                "--keepalive" => {
                    let secs: u64 = value_of(&args, i, "--keepalive")
                        .parse()
                        .unwrap_or_else(|_| {
                            eprintln!("Error: invalid keep-alive period");
                            std::process::exit(1);
                        });
                    config.keepalive = (secs > 0).then(|| Duration::from_secs(secs));
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("resp-dispatch version {}", resp_dispatch::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn value_of<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
resp-dispatch - RESP command server

USAGE:
    resp-dispatch [OPTIONS]

OPTIONS:
    -h, --host <HOST>         Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>         Port to listen on (default: 6379)
        --keepalive <SECS>    TCP keep-alive period, 0 disables (default: 180)
    -v, --version             Print version information
        --help                Print this help message

COMMANDS:
    PING [message]    ECHO message    SET key value    GET key
    DEL key [key ...] INCR key        MULTI / EXEC     QUIT

CONNECTING:
    $ redis-cli -p 6379
    127.0.0.1:6379> MULTI
    OK
    127.0.0.1:6379(TX)> INCR hits
    QUEUED
    127.0.0.1:6379(TX)> EXEC
    1) (integer) 1
"#
    );
}

type Store = Arc<RwLock<HashMap<String, Bytes>>>;

fn poisoned<T>(_: T) -> CommandError {
    CommandError::Other(anyhow::anyhow!("store lock poisoned"))
}

fn key_of(req: &Request, index: usize) -> Result<String, CommandError> {
    req.arg(index)
        .map(|key| String::from_utf8_lossy(key).into_owned())
        .ok_or(CommandError::WrongArgs)
}

fn register_commands(server: &mut Server, store: Store) {
    server.handle("ping", |req: &Request| match req.args() {
        [] => Ok(RespValue::simple_string("PONG")),
        [msg] => Ok(RespValue::bulk_string(msg.clone())),
        _ => Err(CommandError::WrongArgs),
    });

    server.handle("echo", |req: &Request| match req.args() {
        [msg] => Ok(RespValue::bulk_string(msg.clone())),
        _ => Err(CommandError::WrongArgs),
    });

    let db = Arc::clone(&store);
    server.handle("set", move |req: &Request| -> HandlerResult {
        let [key, value] = req.args() else {
            return Err(CommandError::WrongArgs);
        };
        let key = String::from_utf8_lossy(key).into_owned();
        db.write().map_err(poisoned)?.insert(key, value.clone());
        Ok(RespValue::ok())
    });

    let db = Arc::clone(&store);
    server.handle("get", move |req: &Request| -> HandlerResult {
        if req.args().len() != 1 {
            return Err(CommandError::WrongArgs);
        }
        let key = key_of(req, 0)?;
        Ok(db.read().map_err(poisoned)?.get(&key).cloned().into())
    });

    let db = Arc::clone(&store);
    server.handle("del", move |req: &Request| -> HandlerResult {
        if req.args().is_empty() {
            return Err(CommandError::WrongArgs);
        }
        let mut map = db.write().map_err(poisoned)?;
        let removed = req
            .args()
            .iter()
            .filter(|key| map.remove(String::from_utf8_lossy(key).as_ref()).is_some())
            .count();
        Ok(RespValue::integer(removed as i64))
    });

    let db = store;
    server.handle("incr", move |req: &Request| -> HandlerResult {
        if req.args().len() != 1 {
            return Err(CommandError::WrongArgs);
        }
        let key = key_of(req, 0)?;
        let mut map = db.write().map_err(poisoned)?;
        let current = match map.get(&key) {
            Some(raw) => std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| CommandError::msg("value is not an integer or out of range"))?,
            None => 0,
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| CommandError::msg("increment or decrement would overflow"))?;
        map.insert(key, Bytes::from(next.to_string()));
        Ok(RespValue::integer(next))
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut server = Server::new()
        .with_logger(TracingLogger)
        .with_config(ServerConfig {
            keepalive: config.keepalive,
            ..ServerConfig::default()
        });
    register_commands(&mut server, Store::default());

    let server = Arc::new(server);
    println!(
        "resp-dispatch v{} listening on {} (Ctrl+C to stop)",
        resp_dispatch::VERSION,
        config.bind_address()
    );

    tokio::select! {
        result = Arc::clone(&server).listen_and_serve(config.bind_address()) => result?,
        result = signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received, stopping server...");
        }
    }

    for entry in server.stats() {
        info!(command = %entry.name, calls = entry.count, "Command stats");
    }
    info!("Server shutdown complete");
    Ok(())
}
