use clap::Parser;
use log::info;
use server::network::Server;
use shared::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Relay port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum number of participants in the session
    #[arg(short, long, default_value = "16")]
    max_peers: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    info!("Starting relay on {} (max {} peers)", address, args.max_peers);

    let mut server = Server::new(&address, args.max_peers).await?;
    server.run().await?;

    Ok(())
}
