//! sprd-pp CLI
//!
//! Command-line interface for inspecting and exercising the post-processor.

use clap::{Parser, Subcommand, ValueEnum};
use sprd_pp::{
    device::sim::{SimAllocator, SimDevice},
    format, Backend, BackendConfig, BufferConfig, ConversionSpec, PixelFormat, PpBackend,
    PpConfig, Roadmap, Size, SurfaceAllocator,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Output transform for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Transform {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl From<Transform> for sprd_pp::Transform {
    fn from(t: Transform) -> Self {
        match t {
            Transform::Normal => sprd_pp::Transform::Normal,
            Transform::Rotate90 => sprd_pp::Transform::Rotate90,
            Transform::Rotate180 => sprd_pp::Transform::Rotate180,
            Transform::Rotate270 => sprd_pp::Transform::Rotate270,
            Transform::Flipped => sprd_pp::Transform::Flipped,
            Transform::Flipped90 => sprd_pp::Transform::Flipped90,
            Transform::Flipped180 => sprd_pp::Transform::Flipped180,
            Transform::Flipped270 => sprd_pp::Transform::Flipped270,
        }
    }
}

#[derive(Parser)]
#[command(name = "sprd-pp")]
#[command(about = "SPRD IPP post-processing - convert, scale, rotate")]
#[command(version)]
struct Cli {
    /// Backend configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Conversion shared by several commands
#[derive(clap::Args, Debug, Clone)]
struct ConversionArgs {
    /// Source size (e.g., 1920x1080)
    #[arg(long, default_value = "1920x1080")]
    src: Size,

    /// Destination size
    #[arg(long, default_value = "320x180")]
    dst: Size,

    /// Source format (fourcc)
    #[arg(long, default_value = "NV12")]
    src_format: PixelFormat,

    /// Destination format (fourcc)
    #[arg(long, default_value = "XRGB8888")]
    dst_format: PixelFormat,

    /// Rotation/flip applied to the output
    #[arg(short, long, value_enum, default_value = "normal")]
    transform: Transform,
}

impl ConversionArgs {
    fn spec(&self) -> ConversionSpec {
        ConversionSpec::new(
            BufferConfig::full(self.src_format, self.src),
            BufferConfig::full(self.dst_format, self.dst),
        )
        .with_transform(self.transform.into())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show capabilities and format tables
    Info {
        /// Also print the effective configuration
        #[arg(long)]
        dump_config: bool,
    },

    /// Print the step roadmap for a conversion
    Plan {
        #[command(flatten)]
        conversion: ConversionArgs,
    },

    /// Run conversions against the simulated IPP device
    Simulate {
        #[command(flatten)]
        conversion: ConversionArgs,

        /// Number of buffer pairs to convert
        #[arg(short, long, default_value = "8")]
        frames: usize,
    },

    /// Run conversions on the DRM device
    Run {
        #[command(flatten)]
        conversion: ConversionArgs,

        /// Number of buffer pairs to convert
        #[arg(short, long, default_value = "1")]
        frames: usize,

        /// Give up after this many seconds
        #[arg(long, default_value = "5")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sprd_pp=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BackendConfig::load(path)?,
        None => BackendConfig::default(),
    };

    match cli.command {
        Commands::Info { dump_config } => cmd_info(&config, dump_config),
        Commands::Plan { conversion } => cmd_plan(&config.pp, &conversion),
        Commands::Simulate { conversion, frames } => cmd_simulate(config, &conversion, frames),
        Commands::Run {
            conversion,
            frames,
            timeout,
        } => cmd_run(config, &conversion, frames, timeout).await,
    }
}

fn cmd_info(config: &BackendConfig, dump_config: bool) -> anyhow::Result<()> {
    println!("sprd-pp {}", sprd_pp::VERSION);
    println!("================\n");

    let caps = sprd_pp::PpCapabilities::new(&config.pp);

    println!("=== Post-processor ===");
    println!("Device: {}", config.device.display());
    println!("Min size: {}x{}", caps.min_width, caps.min_height);
    println!(
        "Max size: {}x{}",
        caps.max_width.map_or("-".to_string(), |w| w.to_string()),
        caps.max_height.map_or("-".to_string(), |h| h.to_string())
    );
    println!("Preferred alignment: {}", caps.preferred_align);
    println!(
        "Completion: {}",
        if caps.supports_async { "async" } else { "sync" }
    );
    println!(
        "Scaling: up to {}x up / {}x down per pass, {} passes",
        config.pp.max_upscale, config.pp.max_downscale, caps.max_steps
    );
    println!("Formats:");
    for fmt in &caps.formats {
        println!("  - {}", fmt);
    }

    println!("\n=== DRM format table ===");
    for (fmt, code) in format::drm_table() {
        println!("  {:<6} -> {:>3}", fmt, code);
    }

    println!("\n=== Framebuffer format table ===");
    for (fmt, code) in format::fb_table() {
        println!("  {:<6} -> {:>3}", fmt, code);
    }

    if dump_config {
        println!("\n=== Configuration ===");
        print!("{}", config.to_toml()?);
    }

    Ok(())
}

fn cmd_plan(config: &PpConfig, conversion: &ConversionArgs) -> anyhow::Result<()> {
    let spec = conversion.spec();
    let roadmap = Roadmap::build(&spec, config)?;

    println!("Conversion: {} -> {} ({:?})", spec.src, spec.dst, spec.transform);
    println!("Steps: {}\n", roadmap.len());
    for (i, step) in roadmap.steps().iter().enumerate() {
        println!(
            "  [{}] {} -> {} ({:?})",
            i, step.src, step.dst, step.transform
        );
    }

    Ok(())
}

fn cmd_simulate(
    config: BackendConfig,
    conversion: &ConversionArgs,
    frames: usize,
) -> anyhow::Result<()> {
    println!("Simulated conversion");
    println!("====================\n");

    let spec = conversion.spec();
    let device = Arc::new(SimDevice::new());
    let allocator = Arc::new(SimAllocator::new());
    let mut backend = Backend::new(config, device.clone(), allocator.clone())?;
    let id = backend.create_pp()?;

    let done = Arc::new(AtomicUsize::new(0));
    let counter = done.clone();

    let pp = backend.pp(id)?;
    pp.set_info(spec)?;
    pp.set_done_handler(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let steps = pp.roadmap().map_or(0, |r| r.len());

    println!("Conversion: {} -> {}", spec.src, spec.dst);
    println!("Steps: {}", steps);
    println!("Frames: {}\n", frames);

    let start = Instant::now();
    for _ in 0..frames {
        let src = backend.allocator().allocate(spec.src.size, spec.src.format)?;
        let dst = backend.allocator().allocate(spec.dst.size, spec.dst.format)?;
        backend.pp(id)?.attach(src, dst)?;
    }
    backend.pp(id)?.commit()?;

    while !backend.is_idle() {
        if backend.handle_events()? == 0 {
            anyhow::bail!("simulation stalled with work outstanding");
        }
    }
    let elapsed = start.elapsed();

    let stats = backend.stats();
    println!("Results:");
    println!("  Completed: {}/{}", done.load(Ordering::SeqCst), frames);
    println!("  IPP events: {}", stats.ipp_events);
    println!("  Failed: {}", stats.failed);
    println!("  Device calls: {}", device.calls().len());
    println!("  Total time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);

    backend.destroy_pp(id)?;
    Ok(())
}

async fn cmd_run(
    config: BackendConfig,
    conversion: &ConversionArgs,
    frames: usize,
    timeout: u64,
) -> anyhow::Result<()> {
    println!("Opening {}...\n", config.device.display());

    let spec = conversion.spec();
    let mut backend = Backend::open(config)?;
    let id = backend.create_pp()?;

    let done = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(Notify::new());
    let counter = done.clone();
    let notify = finished.clone();

    let mut surfaces = Vec::with_capacity(frames);
    for _ in 0..frames {
        let src = backend.allocator().allocate(spec.src.size, spec.src.format)?;
        let dst = backend.allocator().allocate(spec.dst.size, spec.dst.format)?;
        surfaces.push((src, dst));
    }

    let pp = backend.pp(id)?;
    pp.set_info(spec)?;
    pp.set_done_handler(move |_, dst| {
        tracing::debug!("converted into {} {}", dst.format(), dst.size());
        if counter.fetch_add(1, Ordering::SeqCst) + 1 == frames {
            notify.notify_one();
        }
    });
    for (src, dst) in surfaces {
        pp.attach(src, dst)?;
    }
    pp.commit()?;

    println!("Converting {} frame(s). Press Ctrl+C to stop.\n", frames);

    let start = Instant::now();
    let shutdown = async {
        tokio::select! {
            _ = finished.notified() => {}
            _ = tokio::signal::ctrl_c() => println!("\nInterrupted"),
            _ = tokio::time::sleep(Duration::from_secs(timeout)) => println!("\nTimed out"),
        }
    };
    sprd_pp::event_loop::run(&mut backend, shutdown).await?;
    let elapsed = start.elapsed();

    let stats = backend.stats();
    println!("Results:");
    println!("  Completed: {}/{}", done.load(Ordering::SeqCst), frames);
    println!("  IPP events: {}", stats.ipp_events);
    println!("  Unrouted: {}", stats.unrouted);
    println!("  Total time: {:.2}s", elapsed.as_secs_f64());

    backend.destroy_pp(id)?;
    Ok(())
}
