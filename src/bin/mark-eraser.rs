use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::Level;

use mark_eraser::export::load_rgba;
use mark_eraser::model::DEFAULT_MODEL_URL;
use mark_eraser::raster::red_channel;
use mark_eraser::watermark::DETECTION_THRESHOLD;
use mark_eraser::{
    default_output_path, save_image, CancelToken, ModelConfig, ModelManager, ProcessOptions,
    ProcessResult, WatermarkEngine, WatermarkSize, WorkerHandle,
};

#[derive(Parser)]
#[command(
    name = "mark-eraser",
    about = "Remove watermarks and unwanted objects from images",
    version,
    after_help = "Simple usage: mark-eraser <image>  (detect and remove the corner watermark)\n\
                  Object removal: mark-eraser <image> --mask <mask.png>  (inpaint where the mask is white)"
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Input image file or directory
    input: PathBuf,

    /// Output file or directory (default: {name}_cleaned.png)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Inpaint the input where this mask's red channel is above 128
    #[arg(short, long)]
    mask: Option<PathBuf>,

    /// Model download URL (also the cache key)
    #[arg(long, default_value = DEFAULT_MODEL_URL)]
    model_url: String,

    /// Directory for the downloaded model (default: platform cache dir)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Inference threads (0 = runtime default)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Directory holding wm-alpha-48.png and wm-alpha-96.png reference tiles
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Skip watermark detection, process unconditionally
    #[arg(short, long)]
    force: bool,

    /// Detection confidence threshold (0.0-1.0)
    #[arg(short, long, default_value_t = DETECTION_THRESHOLD)]
    threshold: f32,

    /// Force 48x48 watermark size
    #[arg(long)]
    force_small: bool,

    /// Force 96x96 watermark size
    #[arg(long)]
    force_large: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::WARN
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    if !cli.input.exists() {
        bail!("input path does not exist: {}", cli.input.display());
    }

    if let Some(mask) = &cli.mask {
        inpaint_file(cli, mask)?;
        return Ok(ExitCode::SUCCESS);
    }

    if cli.force_small && cli.force_large {
        bail!("cannot specify both --force-small and --force-large");
    }
    if !(0.0..=1.0).contains(&cli.threshold) {
        bail!("threshold must be between 0.0 and 1.0");
    }

    let force_size = if cli.force_small {
        Some(WatermarkSize::Small)
    } else if cli.force_large {
        Some(WatermarkSize::Large)
    } else {
        None
    };
    let opts = ProcessOptions {
        force: cli.force,
        threshold: cli.threshold,
        force_size,
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    let engine = WatermarkEngine::new(cli.assets.clone());
    if opts.force {
        tracing::warn!("force mode: processing all images without detection");
    } else {
        tracing::info!("auto-detection enabled (threshold: {:.0}%)", opts.threshold * 100.0);
    }

    let results = if cli.input.is_dir() {
        let Some(output_dir) = &cli.output else {
            bail!("output directory is required for batch processing (-o <dir>)");
        };
        engine.process_directory(&cli.input, output_dir, &opts)
    } else {
        let output_path = cli
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(&cli.input));
        vec![engine.process_file(&cli.input, &output_path, &opts)]
    };

    let mut success_count = 0u32;
    let mut skip_count = 0u32;
    let mut fail_count = 0u32;
    for r in &results {
        print_result(r, &opts);
        if r.skipped {
            skip_count += 1;
        } else if r.success {
            success_count += 1;
        } else {
            fail_count += 1;
        }
    }

    if results.len() > 1 && !opts.quiet {
        eprintln!();
        eprint!("[Summary] Processed: {success_count}");
        if skip_count > 0 {
            eprint!(", Skipped: {skip_count}");
        }
        if fail_count > 0 {
            eprint!(", Failed: {fail_count}");
        }
        eprintln!(" (Total: {})", results.len());
    }

    Ok(if fail_count > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn inpaint_file(cli: &Cli, mask_path: &Path) -> anyhow::Result<()> {
    let image = load_rgba(&cli.input).with_context(|| format!("loading {}", cli.input.display()))?;
    let mask = red_channel(&load_rgba(mask_path).with_context(|| format!("loading {}", mask_path.display()))?);

    let config = ModelConfig {
        url: cli.model_url.clone(),
        cache_dir: cli.cache_dir.clone(),
        intra_threads: cli.threads,
    };
    let worker = WorkerHandle::spawn(ModelManager::new(&config)).context("starting inference worker")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    let quiet = cli.quiet;
    let output = runtime.block_on(async {
        worker
            .load_model(move |p| {
                if !quiet {
                    eprint!("\rLoading model: {:>3.0}%", p * 100.0);
                }
            })
            .await
            .context("loading model")?;
        if !quiet {
            eprintln!();
        }
        worker
            .process(image, mask, CancelToken::new())
            .await
            .context("inpainting")
    })?;

    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.input));
    save_image(&output, &output_path).with_context(|| format!("saving {}", output_path.display()))?;
    if !cli.quiet {
        eprintln!("[OK] {}", output_path.display());
    }
    Ok(())
}

fn print_result(result: &ProcessResult, opts: &ProcessOptions) {
    if opts.quiet && result.success {
        return;
    }

    let filename = result.path.file_name().map_or_else(
        || result.path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    if result.skipped {
        if !opts.quiet {
            eprintln!("[SKIP] {filename}: {}", result.message);
        }
    } else if result.success {
        if !opts.quiet {
            eprintln!("[OK] {filename} ({:.0}% confidence)", result.confidence * 100.0);
        }
    } else {
        eprintln!("[FAIL] {filename}: {}", result.message);
    }

    if opts.verbose && !result.message.is_empty() {
        tracing::debug!("{filename}: {}", result.message);
    }
}
