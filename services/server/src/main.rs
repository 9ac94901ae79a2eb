use clap::{Arg, Command};
use server::ServerConfig;
use tracing::{error, info};

fn validate_port_value(value: &str) -> Result<u16, String> {
    value
        .parse::<u16>()
        .map_err(|_| "Invalid port number".to_owned())
}

/// `--replicaof` takes host and port separated by a single space.
fn validate_replica_spec(value: &str) -> Result<(String, u16), String> {
    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(host), Some(port), None) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| "Invalid master port".to_owned())?;
            Ok((host.to_owned(), port))
        }
        _ => Err("Expected \"<host> <port>\"".to_owned()),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "server starting");

    let matches = Command::new("Rusty KV")
        .version(env!("CARGO_PKG_VERSION"))
        .about("An in-memory key-value server speaking RESP over TCP")
        .arg(
            Arg::new("port")
                .help("The port to bind to")
                .short('p')
                .long("port")
                .value_parser(validate_port_value)
                .default_value("6379"),
        )
        .arg(
            Arg::new("replicaof")
                .help("Run as a replica of the given master. Eg. \"localhost 6379\"")
                .long("replicaof")
                .value_parser(validate_replica_spec),
        )
        .arg(
            Arg::new("dir")
                .help("Directory containing the startup snapshot file")
                .long("dir"),
        )
        .arg(
            Arg::new("dbfilename")
                .help("Snapshot file name inside --dir")
                .long("dbfilename"),
        )
        .get_matches();

    let config = ServerConfig {
        port: *matches.get_one::<u16>("port").expect("port has a default"),
        replica_of: matches.get_one::<(String, u16)>("replicaof").cloned(),
        dir: matches.get_one::<String>("dir").cloned(),
        dbfilename: matches.get_one::<String>("dbfilename").cloned(),
    };

    if let Err(error) = server::run(config).await {
        error!(%error, "startup failed");
        std::process::exit(1);
    }
}
