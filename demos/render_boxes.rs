use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use playtrack::{render, BoxStream, RenderStyle, TrackId, VideoReader, VideoWriter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Render a dumped box stream over its video", long_about = None)]
struct Args {
    /// Video the boxes were tracked on
    video: PathBuf,

    /// Box stream JSON written by `track_video --dump`
    boxes: PathBuf,

    /// Output video
    #[arg(short, long, default_value = "rendered.mp4")]
    out: PathBuf,

    /// Follow a single player instead of annotating everyone
    #[arg(short, long)]
    focus: Option<TrackId>,
}

fn main() -> playtrack::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("playtrack=info")))
        .init();

    let args = Args::parse();
    let stream: BoxStream = serde_json::from_str(&std::fs::read_to_string(&args.boxes)?)?;

    let mut reader = VideoReader::open(&args.video)?;
    let mut writer = VideoWriter::new(&args.out, stream.fps);

    let frames = match args.focus {
        Some(id) => render::crop_to_track(&mut reader, &mut writer, &stream, id)?,
        None => {
            let params = render::default_params(&stream.track_ids());
            render::annotate(&mut reader, &mut writer, &stream, &params, &RenderStyle::default())?
        }
    };
    writer.finish()?;

    println!("{} frames written to {}", frames, args.out.display());

    Ok(())
}
