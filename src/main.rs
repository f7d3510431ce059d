use anyhow::{Context, Result};
use bidi_tts::config::{load_config, AudioFormat, SendFailurePolicy};
use bidi_tts::StreamingClient;
use clap::Parser;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream text-to-speech audio into a file", long_about = None)]
pub struct Args {
    /// Text to synthesize
    #[arg(long)]
    text: String,

    /// Where to write the audio
    #[arg(long, default_value = "out.mp3")]
    output: PathBuf,

    /// Voice to use (overrides VOLC_TTS_SPEAKER)
    #[arg(long)]
    speaker: Option<String>,

    /// Audio encoding: mp3, pcm or ogg_opus
    #[arg(long, default_value = "mp3")]
    format: AudioFormat,

    #[arg(long, default_value_t = 24000)]
    sample_rate: u32,

    /// Correlation id sent as X-Api-Connect-Id
    #[arg(long)]
    connect_id: Option<String>,

    /// Fail the call if a request frame cannot be sent
    #[arg(long)]
    fail_on_send_error: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = load_config().context("Failed to load configuration")?;
    if let Some(speaker) = args.speaker {
        config.speaker = speaker;
    }
    config.audio.format = args.format;
    config.audio.sample_rate = args.sample_rate;
    if args.fail_on_send_error {
        config.send_failure_policy = SendFailurePolicy::FailCall;
    }

    let client = StreamingClient::new(config).context("Invalid configuration")?;
    log::info!("🚀 Synthesizing {} chars", args.text.chars().count());

    let mut file = tokio::fs::File::create(&args.output)
        .await
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let sink = move |chunk: Vec<u8>, is_final: bool| {
        if !is_final {
            let _ = tx.send(chunk);
        }
    };
    let handle = match args.connect_id {
        Some(connect_id) => client.stream_with_connect_id(args.text, connect_id, sink),
        None => client.stream_text_to_speech(args.text, sink),
    };
    log::info!("🔗 Connect id: {}", handle.connect_id());

    // The sink's sender is dropped with the call, which ends this loop.
    let mut written = 0usize;
    let mut interrupted = false;
    loop {
        tokio::select! {
            chunk = rx.recv() => match chunk {
                Some(chunk) => {
                    file.write_all(&chunk).await.context("Failed to write audio")?;
                    written += chunk.len();
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                log::info!("🛑 Interrupted, cancelling");
                interrupted = true;
                handle.cancel();
            }
        }
    }
    file.flush().await.context("Failed to flush audio")?;

    handle.await.context("Synthesis failed")?;
    log::info!("✅ Wrote {} bytes to {}", written, args.output.display());
    Ok(())
}
