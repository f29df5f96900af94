use std::path::PathBuf;

use clap::Parser;
use mjpeg_relay::config::ObservabilityConfig;
use mjpeg_relay::observability::logging::init_logging;
use mjpeg_relay::recorder::{record, recording_file_name};

#[derive(Parser)]
#[command(name = "mjpeg-record")]
#[command(about = "Record one relayed MJPEG stream to a file", long_about = None)]
struct Cli {
    /// Relay stream URL, e.g. http://localhost:8080/garage
    #[arg(short, long)]
    url: String,

    /// File name prefix
    #[arg(short, long)]
    prefix: String,

    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&ObservabilityConfig::default());

    let path = cli
        .output_dir
        .join(recording_file_name(&cli.prefix, &chrono::Local::now()));
    tracing::info!(url = %cli.url, file = %path.display(), "Recording");

    let client = reqwest::Client::new();
    let stop = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let written = record(&client, &cli.url, &path, stop).await?;

    println!("Wrote {} bytes to {}", written, path.display());
    Ok(())
}
