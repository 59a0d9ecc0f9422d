use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use natt::config::{DdnsConfig, DEFAULT_ECHO_URL};
use natt_core::directory::CloudflareDirectory;

#[derive(Parser, Debug)]
#[command(version, about = "Point an A record at this host's public address", long_about = None)]
struct Args {
    /// Name whose A record is updated
    #[arg(long, env = "TARGET_FQDN")]
    target_fqdn: String,
    /// Cloudflare API token
    #[arg(long, env = "CF_API_TOKEN", hide_env_values = true)]
    cf_token: String,
    /// IP echo service answering {"ip": "..."}
    #[arg(long, default_value = DEFAULT_ECHO_URL)]
    echo_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Args {
        target_fqdn,
        cf_token,
        echo_url,
    } = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let directory = CloudflareDirectory::new(&cf_token).context("cloudflare client")?;
    let config = DdnsConfig::new(target_fqdn.clone()).set_echo_url(echo_url);
    let ip = natt::ddns::update(&config, &directory)
        .await
        .with_context(|| format!("failed to update {target_fqdn}"))?;
    log::info!("{target_fqdn} -> {ip}");
    Ok(())
}
