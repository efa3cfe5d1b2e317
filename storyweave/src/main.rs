//! Storyweave - play an AI-generated branching visual novel in the terminal.
//!
//! The narrative goes to stdout and logs go to stderr, so a session can be
//! piped or scripted:
//!
//! ```bash
//! cargo run -p storyweave -- --genre "gothic horror" --artstyle "oil painting"
//! cargo run -p storyweave -- --resume
//! ```

mod headless;

use storyweave_core::EngineConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storyweave=info,storyweave_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let options = headless::parse_options_from_args(&args);
    let mut config = EngineConfig::from_env();
    if let Some(dir) = &options.data_dir {
        config = config.with_data_dir(dir);
    }
    if config.anthropic_api_key.is_none() {
        eprintln!("Warning: ANTHROPIC_API_KEY is not set; the story will use built-in fallbacks.");
    }

    headless::run(config, options).await?;
    Ok(())
}

fn print_help() {
    println!("Storyweave - AI-driven branching visual novel");
    println!();
    println!("USAGE:");
    println!("  storyweave [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help             Show this help message");
    println!("  --resume               Continue the saved game");
    println!("  --genre <GENRE>        Genre for a new game (default: fantasy)");
    println!("  --artstyle <STYLE>     Art style for images (default: painterly)");
    println!("  --default-premise      Use the built-in story instead of generating one");
    println!("  --data-dir <DIR>       Where saves and images are written (default: .)");
    println!();
    println!("ENVIRONMENT:");
    println!("  ANTHROPIC_API_KEY      Text generation");
    println!("  OPENAI_API_KEY         Image generation");
    println!("  STORYWEAVE_TEXT_MODEL, STORYWEAVE_IMAGE_MODEL, STORYWEAVE_RETRY_ATTEMPTS,");
    println!("  STORYWEAVE_RETRY_BASE_MS, STORYWEAVE_DATA_DIR");
    println!("  RUST_LOG               Log filter (logs go to stderr)");
    println!();
    println!("EXAMPLES:");
    println!("  storyweave --genre noir --artstyle charcoal");
    println!("  storyweave --default-premise");
    println!("  storyweave --resume");
}
