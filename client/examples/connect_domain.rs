use clap::Parser;
use tracing::{info, Level};

use client::client::DomainClient;
use client::config::ClientConfig;

/// Connect to a domain server and print the entities it streams.
#[derive(Parser)]
struct Args {
    /// Domain server host name or address
    #[clap(default_value = "127.0.0.1")]
    domain_host: String,

    #[clap(long)]
    udp_port: Option<u16>,

    /// Seed demo entities instead of waiting for real traffic
    #[clap(long, default_value_t = false)]
    simulate: bool,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = ClientConfig::from_env(args.domain_host);
    if let Some(port) = args.udp_port {
        config.domain_udp_port = port;
    }
    config.simulation_mode |= args.simulate;
    config.verbose_protocol_logging |= args.verbose;

    let mut client = DomainClient::new(config).await?;

    let mut ticks = tokio::time::interval(std::time::Duration::from_millis(100));
    let mut last_state = client.state();
    loop {
        client.poll();

        if client.state() != last_state {
            info!("connection state: {:?}", client.state());
            last_state = client.state();
        }

        for entity in client.consume_updated_entities() {
            info!(
                "entity {} ({:?}) \"{}\" at {:?} dims {:?}",
                entity.id, entity.kind, entity.name, entity.position, entity.dimensions
            );
        }
        for id in client.consume_deleted_entity_ids() {
            info!("entity {} erased", id);
        }

        ticks.tick().await;
    }
}
