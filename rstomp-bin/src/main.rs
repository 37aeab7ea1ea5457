#![deny(unsafe_code)]

use std::net::{IpAddr, SocketAddr};

use structopt::StructOpt;

use rstomp::context::ServerContext;
use rstomp::logger::logger_init;
use rstomp::net::Builder;
use rstomp::server::{ListenMode, StompServer};
use rstomp::Result;

#[derive(Debug, StructOpt)]
#[structopt(name = "rstompd", about = "STOMP-like text-protocol message broker")]
struct Options {
    /// Port to listen on.
    port: u16,
    /// Connection scheduling mode: thread-per-connection or reactor.
    mode: ListenMode,
    /// Listener name used in logs.
    #[structopt(long, default_value = "external/tcp")]
    name: String,
    /// Address to bind.
    #[structopt(long, default_value = "0.0.0.0")]
    host: IpAddr,
    /// Log level: trace, debug, info, warn or error.
    #[structopt(long, default_value = "info")]
    log_level: log::Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Options::from_args();

    //init log
    let _guard = logger_init(opts.log_level)?;

    log::info!("rstompd starting, mode: {}", opts.mode);

    let scx = ServerContext::new();
    let laddr = SocketAddr::new(opts.host, opts.port);

    StompServer::new(scx)
        .listener(Builder::new().name(&opts.name).laddr(laddr).reuseaddr().bind()?)
        .mode(opts.mode)
        .build()
        .run()
        .await
}
