use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use switchboard::api::{ApiServer, ApiState};
use switchboard::audio::{
    DEFAULT_TONE_AMPLITUDE, SAMPLE_RATE, frames_from_samples, generate_tone, write_wav_file,
};
use switchboard::call::{CallServices, CallSettings, SessionRegistry};
use switchboard::stt::{SpeechToText, UtteranceRecognizer};
use switchboard::telephony::TwilioClient;
use switchboard::tts::TextToSpeech;
use switchboard::{Config, dialogue};

/// Switchboard - Real-time voice bridge for telephony media streams
#[derive(Parser)]
#[command(name = "switchboard", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long, env = "SWITCHBOARD_PORT")]
    port: Option<u16>,

    /// Path to a config file
    #[arg(short, long, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the voice bridge server (default)
    Serve,
    /// Place an outbound call that connects back to this server
    Call {
        /// Destination number in E.164 format
        to: String,
    },
    /// Write a diagnostic tone to a WAV file
    Tone {
        /// Frequency in Hz
        #[arg(short, long, default_value = "440")]
        frequency: f32,
        /// Duration in seconds
        #[arg(short, long, default_value = "1.0")]
        duration: f32,
        /// Output WAV path
        #[arg(short, long, default_value = "tone.wav")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,switchboard=info",
        1 => "info,switchboard=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
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
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Call { to } => place_call(&config, &to).await,
        Command::Tone {
            frequency,
            duration,
            output,
        } => write_tone(frequency, duration, &output),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        port = config.server.port,
        public_url = ?config.server.public_url.as_ref().map(url::Url::as_str),
        stt = ?config.speech.stt_provider,
        tts = ?config.speech.tts_provider,
        "starting switchboard"
    );

    let stt = SpeechToText::from_config(&config.speech, &config.api_keys)?;
    let tts = TextToSpeech::from_config(&config.speech, &config.api_keys)?;

    let services = CallServices {
        recognizer: Arc::new(UtteranceRecognizer::new(stt)),
        synthesizer: Arc::new(tts),
        policy: dialogue::from_config(&config.dialogue)?,
        settings: CallSettings::from_config(&config),
    };

    let telephony = match TwilioClient::from_config(&config.telephony) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::info!(reason = %e, "outbound calling disabled");
            None
        }
    };

    let state = ApiState {
        services,
        registry: SessionRegistry::new(),
        telephony,
        public_url: config.server.public_url.clone(),
    };

    ApiServer::new(state, config.server.port)
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown signal received");
        })
        .await?;

    tracing::info!("switchboard stopped");
    Ok(())
}

async fn place_call(config: &Config, to: &str) -> anyhow::Result<()> {
    let client = TwilioClient::from_config(&config.telephony)?;
    let callback_url = config.server.voice_webhook_url()?;

    let call = client.place_call(to, &callback_url).await?;
    println!("Call {} is {}", call.sid, call.status);
    Ok(())
}

fn write_tone(frequency: f32, duration: f32, output: &std::path::Path) -> anyhow::Result<()> {
    let samples = generate_tone(frequency, duration, DEFAULT_TONE_AMPLITUDE);
    if samples.is_empty() {
        anyhow::bail!("duration must be positive");
    }

    write_wav_file(output, &samples, SAMPLE_RATE)?;
    println!(
        "Wrote {:.2}s {frequency} Hz tone ({} frames) to {}",
        duration,
        frames_from_samples(&samples).len(),
        output.display()
    );
    Ok(())
}
