mod analysis;
mod audio;
mod cli;
mod config;
mod playback;
mod rotate;
mod sequence;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cli::{Cli, Command};
use config::{Config, OutputKind};
use playback::{ChannelOutput, ConsoleOutput, GpioOutput, Scheduler, SyncStart};
use sequence::FrameSequence;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let cfg = match config::find_config(cli.config.as_deref()) {
        Some(path) => {
            let cfg = config::load_config(&path)?;
            log::info!("Loaded config from {}", path.display());
            cfg
        }
        None => Config::default(),
    };

    match cli.command {
        Command::Analyze {
            input,
            output,
            fps,
            channels,
        } => run_analyze(&cfg, &input, output, fps, channels),
        Command::Preview {
            sequence,
            channels,
            rotate_frames,
        } => run_preview(&cfg, &sequence, channels, rotate_frames),
        Command::Inspect { sequence, channels } => run_inspect(&cfg, &sequence, channels),
        Command::Serve {
            bind,
            audio_dir,
            output,
        } => run_serve(cfg, bind, audio_dir, output),
    }
}

/// `song.mp3` -> `song.mp3.bin`, the name the daemon looks sequences up by.
fn sequence_path_for(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".bin");
    PathBuf::from(name)
}

fn read_sequence(path: &Path, channels: usize) -> Result<FrameSequence> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read sequence: {}", path.display()))?;
    FrameSequence::decode(&bytes, channels)
        .with_context(|| format!("Invalid {}-channel sequence: {}", channels, path.display()))
}

fn run_analyze(
    cfg: &Config,
    input: &Path,
    output: Option<PathBuf>,
    fps: Option<u8>,
    channels: Option<usize>,
) -> Result<()> {
    let mut analysis_cfg = cfg.analysis.clone();
    if let Some(fps) = fps {
        analysis_cfg.fps = fps;
    }
    if let Some(channels) = channels {
        analysis_cfg.channels = channels;
    }
    analysis_cfg.validate()?;

    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }
    let output = output.unwrap_or_else(|| sequence_path_for(input));

    log::info!("Input: {}", input.display());
    log::info!("Output: {}", output.display());
    log::info!(
        "{} channels @ {} fps, FFT {} over {}-{} Hz",
        analysis_cfg.channels,
        analysis_cfg.fps,
        analysis_cfg.fft_size,
        analysis_cfg.min_freq,
        analysis_cfg.max_freq
    );

    let audio = audio::decode::decode_audio(input)?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames ({eta} remaining)",
            )?
            .progress_chars("=>-"),
    );
    let sequence = analysis::analyze(&audio, &analysis_cfg, Some(&pb))?;
    pb.finish_and_clear();

    std::fs::write(&output, sequence.encode())
        .with_context(|| format!("Failed to write sequence: {}", output.display()))?;
    log::info!(
        "Wrote {} frames ({:.1}s) to {}",
        sequence.len(),
        sequence.duration().as_secs_f32(),
        output.display()
    );
    Ok(())
}

fn run_preview(
    cfg: &Config,
    path: &Path,
    channels: Option<usize>,
    rotate_frames: Option<usize>,
) -> Result<()> {
    let channels = channels.unwrap_or(cfg.analysis.channels);
    let sequence = read_sequence(path, channels)?;
    let rotate_frames = rotate_frames.unwrap_or_else(|| cfg.analysis.preview_rotate_frames());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(async {
        let scheduler = Scheduler::new(ConsoleOutput::stdout(channels), channels, rotate_frames);
        scheduler.play(sequence)?;
        tokio::select! {
            result = scheduler.finished() => result?,
            _ = tokio::signal::ctrl_c() => scheduler.stop().await,
        }
        println!();
        Ok::<_, anyhow::Error>(())
    })
}

fn run_inspect(cfg: &Config, path: &Path, channels: Option<usize>) -> Result<()> {
    let channels = channels.unwrap_or(cfg.analysis.channels);
    let sequence = read_sequence(path, channels)?;

    println!("{}", path.display());
    println!(
        "  frame rate  {} fps ({} ms per frame)",
        sequence.fps(),
        sequence.frame_interval().as_millis()
    );
    println!("  frames      {}", sequence.len());
    println!("  duration    {:.1}s", sequence.duration().as_secs_f32());
    println!("  duty cycle");
    for (channel, duty) in sequence.duty_cycles().into_iter().enumerate() {
        let bar = "#".repeat((duty * 40.0).round() as usize);
        println!("    {:>3}  {:>5.1}%  {}", channel, duty * 100.0, bar);
    }
    Ok(())
}

fn run_serve(
    mut cfg: Config,
    bind: Option<SocketAddr>,
    audio_dir: Option<PathBuf>,
    output: Option<OutputKind>,
) -> Result<()> {
    if let Some(bind) = bind {
        cfg.server.bind = bind;
    }
    if let Some(dir) = audio_dir {
        cfg.server.audio_dir = dir;
    }
    if let Some(output) = output {
        cfg.playback.output = output;
    }
    cfg.playback.validate()?;

    let playback = &cfg.playback;
    let lamps: Box<dyn ChannelOutput> = match playback.output {
        OutputKind::Console => Box::new(ConsoleOutput::stdout(playback.channels)),
        OutputKind::Gpio => Box::new(
            GpioOutput::open(&playback.gpio_root, &playback.pins).with_context(|| {
                format!("Failed to set up GPIO under {}", playback.gpio_root.display())
            })?,
        ),
    };
    log::info!(
        "{} channels on {:?} output, rotating every {} frames, start delay {} ms",
        playback.channels,
        playback.output,
        playback.rotate_frames,
        playback.start_delay_ms
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(async {
        let scheduler = Scheduler::new(lamps, playback.channels, playback.rotate_frames);
        let lights = SyncStart::new(scheduler, Duration::from_millis(playback.start_delay_ms));
        server::serve(lights, &cfg.server).await
    })
}
