use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use natt::client::TunnelClient;
use natt::config::{BindSpec, ClientConfig, DEFAULT_CLIENT_LISTEN};
use natt_core::dns::DnsLookup;

#[derive(Parser, Debug)]
#[command(version, about = "Reach a natts server by name", long_about = None)]
struct Args {
    /// Local TCP address to accept connections on
    #[arg(short, long, default_value = DEFAULT_CLIENT_LISTEN)]
    listen: BindSpec,
    /// Name the server publishes its endpoint under
    #[arg(short, long, env = "TARGET_FQDN")]
    target: String,
    /// Relay stdin/stdout instead of listening, for ssh ProxyCommand
    #[arg(long)]
    proxy: bool,
    /// Name servers to query, in order
    /// example: --dns 1.1.1.1:53 --dns 8.8.8.8:53
    #[arg(long)]
    dns: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Args {
        listen,
        target,
        proxy,
        dns,
    } = Args::parse();
    // logs go to stderr, stdout may carry the tunnel
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let lookup = match dns {
        Some(name_servers) => DnsLookup::new(name_servers),
        None => DnsLookup::default(),
    };
    let client = TunnelClient::new(
        ClientConfig::new(target).set_listen(listen),
        Arc::new(lookup),
    );

    if proxy {
        let rs = client.proxy_stdio().await;
        if let Err(e) = &rs {
            log::error!("proxy failed: {e}");
        }
        // a blocked stdin read would keep the runtime alive
        std::process::exit(if rs.is_ok() { 0 } else { 1 });
    }

    let serving = tokio::spawn({
        let client = client.clone();
        async move { client.listen().await }
    });
    tokio::select! {
        rs = serving => {
            rs.context("listener task")?.context("listener")?;
        }
        rs = natt::signal::shutdown_signal() => {
            rs.context("signal handler")?;
            log::info!("received shutdown signal");
            client.close();
        }
    }
    log::info!("client stopped");
    Ok(())
}
