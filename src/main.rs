use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use electrum_watch::{
    Address, AddressStatus, ChainClient, CoinAddress, CoinType, ConnectionEventListener,
    SerialExecutor, ServerAddress, TransactionEventListener, TxEventSink,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "bitcoin", env = "WATCH_COIN")]
    coin: String,

    /// Backend servers as host:port; one is picked at random.
    #[arg(long = "server", required = true, env = "WATCH_SERVERS", value_delimiter = ',')]
    servers: Vec<String>,

    /// Addresses to watch for status changes.
    #[arg(long = "address", env = "WATCH_ADDRESSES", value_delimiter = ',')]
    addresses: Vec<String>,
}

/// Re-subscribes on every (re)connection, since subscriptions do not survive
/// a run.
struct Watcher {
    client: Arc<ChainClient>,
    addresses: Vec<Address>,
    sink: TxEventSink,
}

impl ConnectionEventListener for Watcher {
    fn on_connection(&self) {
        log::info!("[MAIN] connected; subscribing {} addresses", self.addresses.len());
        let client = self.client.clone();
        let addresses = self.addresses.clone();
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Err(e) = client.subscribe_to_addresses(&addresses, &sink).await {
                log::warn!("[MAIN] subscribe failed: {}", e);
            }
        });
    }

    fn on_disconnect(&self) {
        log::warn!("[MAIN] disconnected");
    }
}

struct PrintStatus;

impl TransactionEventListener for PrintStatus {
    fn on_address_status_update(&self, status: AddressStatus) {
        println!(
            "{} status: {}",
            status.address(),
            status.status().unwrap_or("<no history>")
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let args = Args::parse();

    let coin = CoinType::new(&args.coin);
    let servers = args
        .servers
        .iter()
        .map(|s| s.parse::<ServerAddress>())
        .collect::<Result<Vec<_>, _>>()?;
    let addresses: Vec<Address> = args
        .addresses
        .iter()
        .map(|a| Address::new(coin.clone(), a))
        .collect();

    let client = Arc::new(ChainClient::new(CoinAddress::new(coin, servers)));
    let watcher = Watcher {
        client: client.clone(),
        addresses,
        sink: TxEventSink::new(Arc::new(PrintStatus), SerialExecutor::new()),
    };
    client.add_event_listener(Arc::new(watcher), SerialExecutor::new());

    client.start()?;
    log::info!("[MAIN] watching; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    client.stop();
    Ok(())
}
