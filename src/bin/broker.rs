//! Serves an in-process broker over TCP for the sample programs.

use clap::Parser;
use pubsub_client::{
    cli::{exit_with_usage, init_tracing, parse_or_usage},
    transport::{loopback::LoopbackBroker, tcp::TcpBroker},
};

const USAGE: &str =
    "Usage: pubsub-broker [--listen <addr>] [--user <username>@<vpn>:<password>]... [-v]";

#[derive(Parser, Debug)]
#[command(name = "pubsub-broker")]
#[command(about = "Serve a loopback publish/subscribe broker over TCP")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:55555")]
    listen: String,

    /// Accepted client as <username>@<vpn>:<password>. Without any, every
    /// client is accepted.
    #[arg(short, long = "user")]
    users: Vec<String>,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Splits `<username>@<vpn>:<password>`. The password may be empty or
/// contain colons.
fn parse_user(raw: &str) -> Option<(&str, &str, &str)> {
    let (account, password) = raw.split_once(':')?;
    let (username, vpn_name) = account.split_once('@')?;
    if username.is_empty() || vpn_name.is_empty() || vpn_name.contains('@') {
        return None;
    }
    Some((username, vpn_name, password))
}

fn main() {
    let args = parse_or_usage::<Args>(USAGE);
    init_tracing(args.verbose.max(1));

    let broker = LoopbackBroker::new();
    for raw in &args.users {
        let Some((username, vpn_name, password)) = parse_user(raw) else {
            println!("malformed user {:?}", raw);
            exit_with_usage(USAGE);
        };
        broker.add_user(username, vpn_name, password);
    }

    let server = TcpBroker::bind(args.listen.as_str(), broker).unwrap_or_else(|e| {
        eprintln!("could not listen on {}: {}", args.listen, e);
        std::process::exit(1);
    });
    println!("Broker listening on {}", args.listen);
    if let Err(e) = server.serve() {
        eprintln!("broker stopped: {}", e);
        std::process::exit(1);
    }
}
