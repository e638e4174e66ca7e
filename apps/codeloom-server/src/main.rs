use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use codeloom_llm::ProviderSettings;

#[derive(Debug, Parser)]
#[command(name = "codeloom-server")]
struct Args {
    /// Directory holding the configuration documents
    #[arg(long, default_value = "configs")]
    config_dir: PathBuf,
    /// Listen address; when unset, binds 127.0.0.1 on $PORT (default 3001)
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    codeloom_runtime::bootstrap::init_tracing("info");

    let args = Args::parse();
    let settings = ProviderSettings::from_env();
    let listen = args
        .listen
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], settings.port.unwrap_or(3001))));

    codeloom_server::run_server(args.config_dir, listen, settings).await
}
