//! bridge: relay TCP connections over QUIC and back.
//!
//! - `bridge --quic-addr HOST:PORT --tcp-port PORT` listens on TCP and relays to a QUIC peer
//! - `bridge --tcp-addr HOST:PORT --quic-port PORT` listens on QUIC and relays to a TCP server

use std::process::ExitCode;

use bridge_relay::cli::{self, RelayArgs};
use clap::{CommandFactory, Parser};

#[tokio::main]
async fn main() -> ExitCode {
    if std::env::args_os().len() <= 1 {
        let _ = RelayArgs::command().print_help();
        return ExitCode::SUCCESS;
    }

    let args = RelayArgs::parse();

    match cli::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_usage() => {
            eprintln!("{e}");
            let _ = RelayArgs::command().print_help();
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
