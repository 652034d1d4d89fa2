//! Resolves one SRV name and prints the address picked for it.

use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::EnvFilter;

use srvclient::SrvClient;

const ARG_RESOLVERS: &str = "resolvers";
const ARG_IGNORE: &str = "ignore";
const ARG_HOSTNAME: &str = "hostname";

fn build_cli_args() -> Command {
    Command::new("srvclient")
        .about("Look up a SRV name and print one host:port to connect to")
        .arg(
            Arg::new(ARG_RESOLVERS)
                .help("Comma-separated nameservers to ask instead of /etc/resolv.conf")
                .long("resolvers")
                .num_args(1)
                .value_name("ADDRS"),
        )
        .arg(
            Arg::new(ARG_IGNORE)
                .help("Do not retry truncated responses over TCP")
                .long("ignore")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_HOSTNAME)
                .help("SRV name, optionally with a :port override")
                .required(true)
                .num_args(1)
                .value_name("HOSTNAME"),
        )
}

/// Parses `ip` or `ip:port` entries; a bare IP gets port 53.
fn parse_resolvers(list: &str) -> Result<Vec<SocketAddr>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<IpAddr>()
                .map(|ip| SocketAddr::new(ip, 53))
                .or_else(|_| entry.parse::<SocketAddr>())
                .map_err(|_| format!("invalid resolver address {entry:?}"))
        })
        .collect()
}

fn build_client(args: &ArgMatches) -> Result<SrvClient, String> {
    let mut client = SrvClient::new().ignore_truncated(args.get_flag(ARG_IGNORE));
    if let Some(list) = args.get_one::<String>(ARG_RESOLVERS) {
        client = client.resolver_addrs(parse_resolvers(list)?);
    }
    Ok(client)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match build_cli_args().try_get_matches() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };
    let client = match build_client(&args) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    // `required(true)` guarantees presence.
    let Some(hostname) = args.get_one::<String>(ARG_HOSTNAME) else {
        return ExitCode::from(1);
    };
    match client.srv(hostname).await {
        Ok(address) => {
            println!("{address}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error resolving {hostname:?}: {e}");
            ExitCode::from(2)
        }
    }
}
