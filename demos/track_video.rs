use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use playtrack::{Pipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect and track players in a video", long_about = None)]
struct Args {
    /// Input video
    video: PathBuf,

    /// Detector name from the config
    #[arg(short, long, default_value = "march-best")]
    detector: String,

    /// Motion compensation method from the config
    #[arg(short, long, default_value = "raft")]
    gmc: String,

    /// JSON pipeline config; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dump the tracked box stream as JSON
    #[arg(long)]
    dump: Option<PathBuf>,
}

fn main() -> playtrack::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("playtrack=info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };

    let pipeline = Pipeline::new(config);
    let out = pipeline.infer(&args.video, &args.detector, &args.gmc)?;

    println!("session: {}", out.session);
    println!("annotated: {}", out.annotated.display());
    for (id, start, end) in out.times.iter() {
        println!("player {:>4}: {}s - {}s", id, start, end);
    }

    if let Some(dump) = args.dump {
        let artifact = pipeline.sessions().get(out.session)?;
        std::fs::write(&dump, serde_json::to_string(&artifact.boxes)?)?;
        println!("boxes: {}", dump.display());
    }

    Ok(())
}
