use clap::Parser;
use std::net::SocketAddr;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;

/// Arguments to configure this runtime of the application before it is started.
///
/// Anything not covered here (online-mode, spigot-mode, command prefix, hidden ops, …) is read
/// from the layered [`wrapper_passage::config::Config`] instead; these flags only override the
/// bind address and logging, the two things an operator typically wants on the command line.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, env, default_value = "INFO")]
    log_level: LevelFilter,
    #[arg(long, env, default_value_t = SocketAddr::from(wrapper_passage::config::DEFAULT_ADDRESS))]
    address: SocketAddr,
}

/// Initializes the application and invokes the proxy.
///
/// This initializes logging, reads the layered configuration and starts the multithreaded tokio
/// runtime. This is only a thin wrapper around the library crate that supplies the bind address
/// override from the command line.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_filter(args.log_level),
        )
        .init();

    let mut config = wrapper_passage::config::Config::read()?;
    config.address = args.address;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async { wrapper_passage::start(config).await })
}
