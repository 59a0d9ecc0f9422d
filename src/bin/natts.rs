use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use natt::config::{BindSpec, ServerConfig};
use natt::server::TunnelServer;
use natt_core::directory::CloudflareDirectory;
use natt_core::stun::{ProbeTransport, StunConfig, StunDiscoverer, DEFAULT_STUN_SERVER};

#[derive(Parser, Debug)]
#[command(version, about = "Publish a local service through a KCP tunnel", long_about = None)]
struct Args {
    /// Local UDP address of the tunnel; port 0 lets discovery choose.
    /// example: --listen :0 --listen :41000 --listen 0.0.0.0:41000
    #[arg(short, long, default_value = ":0")]
    listen: BindSpec,
    /// Local service every session is relayed to
    #[arg(long, default_value = natt::config::DEFAULT_TARGET)]
    ssh_target: String,
    /// Name to publish the endpoint under
    #[arg(long, env = "TARGET_FQDN")]
    target_fqdn: String,
    /// Cloudflare API token
    #[arg(long, env = "CF_API_TOKEN", hide_env_values = true)]
    cf_token: String,
    /// STUN server used for discovery
    #[arg(long, default_value = DEFAULT_STUN_SERVER)]
    stun_server: String,
    /// Probe over TCP when no port is pinned
    #[arg(long)]
    stun_tcp: bool,
    /// Seconds without sessions before the mapping is verified again
    #[arg(long, default_value_t = 300)]
    idle_threshold: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Args {
        listen,
        ssh_target,
        target_fqdn,
        cf_token,
        stun_server,
        stun_tcp,
        idle_threshold,
    } = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let transport = if stun_tcp {
        ProbeTransport::Tcp
    } else {
        ProbeTransport::Udp
    };
    let stun = StunConfig::default()
        .set_server(stun_server)
        .set_transport(transport);
    let config = ServerConfig::new(target_fqdn.clone())
        .set_bind(listen)
        .set_target(ssh_target.clone())
        .set_idle_threshold(Duration::from_secs(idle_threshold));
    let directory = CloudflareDirectory::new(&cf_token).context("cloudflare client")?;
    let server = TunnelServer::new(
        config,
        Arc::new(StunDiscoverer::new(stun)),
        Arc::new(directory),
    );

    log::info!("starting natts: target {ssh_target}, name {target_fqdn}, listen {listen}");
    server.start().await.context("failed to start server")?;

    natt::signal::shutdown_signal()
        .await
        .context("signal handler")?;
    log::info!("received shutdown signal");
    server.close().await;
    log::info!("server stopped");
    Ok(())
}
