mod ai;
mod audio;
mod cancel;
mod capture;
mod config;
mod error;
mod report;
mod source;
mod synth;
mod wav;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::capture::FrameSettings;
use crate::config::SynthesisConfig;
use crate::cancel::CancelToken;
use crate::synth::Synthesizer;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "minutai")]
#[command(about = "Distill a meeting recording into a Record of Decision", long_about = None)]
struct Cli {
    input_file: PathBuf,
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// OpenAI-compatible endpoint the request is sent to.
    #[arg(long, env = "MINUTAI_API_BASE", default_value = ai::DEFAULT_API_BASE)]
    api_base: String,
    #[arg(short, long, default_value = ai::DEFAULT_MODEL)]
    model: String,
    #[arg(long, default_value_t = audio::DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,
    #[arg(short = 'n', long, default_value_t = 8)]
    frame_count: usize,
    #[arg(long, default_value_t = 640)]
    frame_width: u32,
    #[arg(long, default_value_t = 360)]
    frame_height: u32,
    #[arg(long, default_value_t = 60)]
    jpeg_quality: u8,
    #[arg(long, default_value_t = 5)]
    seek_timeout_secs: u64,
    #[arg(long, default_value_t = 300)]
    request_timeout_secs: u64,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Cli {
    fn synthesis_config(&self) -> SynthesisConfig {
        SynthesisConfig {
            api_key: self.api_key.clone(),
            api_base: self.api_base.clone(),
            model: self.model.clone(),
            sample_rate: self.sample_rate,
            frames: FrameSettings {
                frame_count: self.frame_count,
                width: self.frame_width,
                height: self.frame_height,
                jpeg_quality: self.jpeg_quality,
                seek_timeout: Duration::from_secs(self.seek_timeout_secs),
            },
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.synthesis_config();
    config.validate()?;

    let synthesizer = match Synthesizer::new(config) {
        Ok(synthesizer) => synthesizer,
        Err(err) => {
            eprintln!("{err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<synth::Stage>();
    let printer = tokio::spawn(async move {
        while let Some(stage) = progress_rx.recv().await {
            eprintln!("{}", stage.label());
        }
    });

    let cancel = CancelToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::warn!("Interrupt received, cancelling (press Ctrl-C again to exit now)");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        })
    };

    let result = synthesizer
        .process_meeting_video(&cli.input_file, Some(&progress_tx), &cancel)
        .await;
    drop(progress_tx);
    printer.await?;
    ctrl_c.abort();

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            eprintln!("{err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let rendered = match cli.format {
        OutputFormat::Text => report.to_string(),
        OutputFormat::Json => serde_json::to_string_pretty(&report)?,
    };
    match &cli.output {
        Some(path) => {
            tokio::fs::write(path, format!("{rendered}\n")).await?;
            tracing::info!("Report written to {}", path.display());
        }
        None => println!("{rendered}"),
    }

    Ok(ExitCode::SUCCESS)
}
