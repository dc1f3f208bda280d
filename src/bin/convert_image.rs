//! Converts an image between formats, e.g. a WebP app icon to PNG.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use image::ImageFormat;

#[derive(Parser, Debug)]
#[command(name = "convert_image")]
#[command(about = "Convert an image file to another format")]
struct Cli {
    /// Image to read
    input: PathBuf,

    /// Destination file
    output: PathBuf,

    /// Output format (png, jpeg, webp, ...); inferred from the output extension when omitted
    #[arg(short, long)]
    format: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if !cli.input.is_file() {
        bail!("File not found: {}", cli.input.display());
    }

    let format = match cli.format.as_deref() {
        Some(name) => ImageFormat::from_extension(name)
            .with_context(|| format!("unknown image format '{name}'"))?,
        None => ImageFormat::from_path(&cli.output)
            .with_context(|| format!("cannot infer format of {}", cli.output.display()))?,
    };

    let img = image::open(&cli.input)
        .with_context(|| format!("Error converting: cannot decode {}", cli.input.display()))?;
    img.save_with_format(&cli.output, format)
        .with_context(|| format!("Error converting: cannot write {}", cli.output.display()))?;

    println!(
        "Successfully converted {} to {}",
        cli.input.display(),
        cli.output.display()
    );
    Ok(())
}
