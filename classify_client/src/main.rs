use clap::Parser;
use classify_client::{classify, format_output};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(about = "Send an image to a remote inference server and print the classification")]
struct Args {
    /// Name of model
    #[arg(short, long)]
    model_name: String,

    /// Number of class results to report
    #[arg(short, long, default_value_t = 1)]
    classes: i64,

    /// Inference server URL
    #[arg(short, long, default_value = "localhost:8000")]
    url: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Input image
    image_filename: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let log_level = if args.verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_level(true))
        .init();

    let image_bytes = std::fs::read(&args.image_filename)?;
    tracing::debug!(
        file = %args.image_filename.display(),
        bytes = image_bytes.len(),
        "read image file"
    );

    let output = classify(&args.url, &args.model_name, image_bytes, args.classes).await?;
    println!("{}", format_output(&output)?);

    Ok(())
}
