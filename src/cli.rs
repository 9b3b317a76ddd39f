//! Command-line harmonizer for WAV files.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use harmonizer::harmony::scale::parse_root_key;
use harmonizer::io::{read_wav_file, write_wav_file, WavEncoding};
use harmonizer::{FallbackPolicy, HarmonizerConfig, HarmonizerError, ScaleKind, MAX_VOICES};

#[derive(Parser, Debug)]
#[command(name = "harmonizer")]
#[command(about = "Add pitch-shifted harmony voices to a WAV file", long_about = None)]
struct Cli {
    /// Input WAV file
    #[arg(required_unless_present = "dump_config")]
    input: Option<PathBuf>,

    /// Output WAV file
    #[arg(required_unless_present = "dump_config")]
    output: Option<PathBuf>,

    /// Semitone shift per voice; repeat for each voice
    #[arg(short, long, allow_hyphen_values = true)]
    semitones: Vec<i32>,

    /// Linear volume per voice; repeat for each voice
    #[arg(long)]
    volume: Vec<f32>,

    /// Scale used to quantize intervals (e.g. major, natural-minor, blues)
    #[arg(long)]
    scale: Option<String>,

    /// Root key: C, C#, Db, ... or 0-11
    #[arg(long)]
    root: Option<String>,

    /// Number of active voices (1-4); defaults to the number of --semitones
    #[arg(long)]
    voices: Option<usize>,

    /// Processing block size in frames
    #[arg(long)]
    block: Option<usize>,

    /// What an unpitched voice outputs: silence or dry
    #[arg(long)]
    fallback: Option<FallbackPolicy>,

    /// JSON configuration file; command-line options override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    dump_config: bool,

    /// Write 16-bit PCM instead of 32-bit float
    #[arg(long)]
    pcm16: bool,

    /// Log progress at info level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: &Cli) -> Result<HarmonizerConfig, HarmonizerError> {
    let mut config = match &cli.config {
        Some(path) => HarmonizerConfig::from_json_file(path)?,
        None => HarmonizerConfig::default(),
    };

    if cli.semitones.len() > MAX_VOICES || cli.volume.len() > MAX_VOICES {
        return Err(HarmonizerError::InvalidVoice {
            index: cli.semitones.len().max(cli.volume.len()),
            count: MAX_VOICES,
        });
    }
    for (i, &s) in cli.semitones.iter().enumerate() {
        config.voices[i].semitones = s;
    }
    for (i, &v) in cli.volume.iter().enumerate() {
        config.voices[i].volume = v;
    }
    if let Some(n) = cli.voices {
        config.voice_count = n;
    } else if !cli.semitones.is_empty() {
        config.voice_count = cli.semitones.len();
    }
    if let Some(name) = &cli.scale {
        config.scale = name.parse::<ScaleKind>()?;
    }
    if let Some(root) = &cli.root {
        config.root_key = parse_root_key(root)?;
    }
    if let Some(block) = cli.block {
        config.max_block_size = block;
    }
    if let Some(fallback) = cli.fallback {
        config.fallback = fallback;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<(), HarmonizerError> {
    let config = build_config(&cli)?;

    if cli.dump_config {
        config.validate()?;
        println!("{}", config.to_json_string()?);
        return Ok(());
    }

    let (Some(input), Some(output)) = (&cli.input, &cli.output) else {
        return Err(HarmonizerError::InvalidInput(
            "input and output paths are required".to_string(),
        ));
    };

    let buffer = read_wav_file(input)?;
    info!(
        "read {}: {} frames, {} Hz, {} channel(s), {:.2} s",
        input.display(),
        buffer.num_frames(),
        buffer.sample_rate,
        buffer.channels,
        buffer.duration_secs()
    );
    info!(
        "scale {} root {}, {} voice(s): {:?}",
        config.scale,
        config.root_key,
        config.voice_count,
        &config.voices[..config.voice_count.min(MAX_VOICES)]
    );

    let result = harmonizer::harmonize_buffer(&buffer, &config)?;

    let encoding = if cli.pcm16 {
        WavEncoding::Pcm16
    } else {
        WavEncoding::Float32
    };
    write_wav_file(output, &result, encoding)?;
    info!("wrote {}: {} frames", output.display(), result.num_frames());
    Ok(())
}
