use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use avatar_voice_gateway::api::ApiServer;
use avatar_voice_gateway::llm::ChatCompletionsClient;
use avatar_voice_gateway::voice::TextToSpeech;
use avatar_voice_gateway::{AudioCache, BroadcastRouter, Config, SynthesisManager, VoicePipeline};

/// Avatar Voice - real-time speech pipeline for a talking avatar
#[derive(Parser)]
#[command(name = "avatar-voice", version, about)]
struct Cli {
    /// Port to listen on (overrides `AVATAR_VOICE_PORT`)
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default)
    Serve,
    /// Synthesize text into the audio cache and print its URL
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the voice pipeline.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,avatar_voice_gateway=info",
        1 => "info,avatar_voice_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_with_port(cli.port)?;
    tracing::debug!(
        port = config.port,
        public_url = %config.public_url,
        llm = %config.llm.base_url,
        cache_dir = %config.cache_dir.display(),
        timings = ?config.timings,
        "loaded configuration"
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Say { text } => say(&config, &text).await,
    }
}

fn synthesis_manager(config: &Config) -> SynthesisManager {
    if config.tts.api_key.is_none() {
        tracing::warn!("ELEVENLABS_API_KEY not set, every reply will fall back to the apology");
    }
    let cache = AudioCache::new(
        config.cache_dir.clone(),
        config.timings.max_cache_files,
        &config.public_url,
    );
    SynthesisManager::new(
        Arc::new(TextToSpeech::new(&config.tts)),
        cache,
        config.timings.chunk_safety_timeout(),
    )
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(port = config.port, "starting avatar voice gateway");

    let pipeline = VoicePipeline::new(
        Arc::new(ChatCompletionsClient::new(&config.llm)),
        synthesis_manager(&config),
        BroadcastRouter::new(),
        config.timings,
    );

    let server = ApiServer::new(pipeline, config.port).spawn();

    tokio::select! {
        result = server => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    Ok(())
}

async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    let manager = synthesis_manager(config);
    let audio = manager.synthesize_to_cache(text).await?;

    tracing::info!(name = %audio.name, path = %audio.path.display(), "synthesized");
    println!("{}", audio.url);
    Ok(())
}
