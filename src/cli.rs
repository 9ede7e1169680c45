//! Argument handling shared by the sample programs.

use std::process;

use clap::error::ErrorKind;
use clap::{ArgAction, Parser};
use tracing::Level;

use crate::Endpoint;

/// `<host:port> <username>@<vpn> <password>`
#[derive(Parser, Debug, Clone)]
pub struct SampleArgs {
    /// Broker address as host:port, optionally prefixed with tcp://
    pub host: String,

    /// Client username and message vpn as <username>@<vpn>
    pub credentials: String,

    /// Client password, may be empty
    pub password: String,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl SampleArgs {
    /// Parses the command line. On malformed arguments the usage line is
    /// printed to stdout and the process exits with status 1.
    pub fn parse_or_exit(program: &str) -> (Self, Endpoint) {
        let args = parse_or_usage::<Self>(&usage(program));
        let endpoint = Endpoint::from_args(
            args.host.as_str(),
            &args.credentials,
            args.password.as_str(),
        );
        match endpoint {
            Ok(endpoint) => (args, endpoint),
            Err(e) => {
                println!("{}", e);
                exit_with_usage(&usage(program));
            }
        }
    }
}

pub fn usage(program: &str) -> String {
    format!("Usage: {} <host:port> <username>@<vpn> <password>", program)
}

/// Like [`Parser::parse`] but reports errors with a plain usage line on
/// stdout and exit status 1. `--help` and `--version` behave as usual.
pub fn parse_or_usage<P: Parser>(usage: &str) -> P {
    match P::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(_) => exit_with_usage(usage),
    }
}

pub fn exit_with_usage(usage: &str) -> ! {
    println!("{}", usage);
    process::exit(1);
}

pub fn verbosity_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Installs the fmt subscriber. Logs go to stderr so they never mix with
/// the program output.
pub fn init_tracing(verbose: u8) {
    tracing_subscriber::fmt()
        .with_max_level(verbosity_level(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
