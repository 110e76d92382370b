use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use ap_flash::image::{ImageKind, ImageRegistry, RouterImage};
use ap_flash::{flash_start, logging};
use clap::Parser;

/// Flash firmware onto embedded access points in their recovery window.
///
/// Listens on a raw Ethernet interface, detects booting devices by their
/// recovery fingerprints and serves each one the matching image. Runs
/// until interrupted; every image option is optional, but a detected
/// device without a loaded image is reported and skipped.
#[derive(Parser)]
#[command(version)]
struct Cli {
	/// Network interface connected to the devices.
	interface: String,

	/// CE multi-device container (OM/MR/A/P/D/G classes).
	#[arg(long, value_name = "FILE")]
	ce: Option<PathBuf>,

	/// U-Boot image (MR500).
	#[arg(long, value_name = "FILE")]
	uboot: Option<PathBuf>,

	/// Zyxel ras image.
	#[arg(long, value_name = "FILE")]
	zyxel: Option<PathBuf>,

	/// Increase verbosity (-v: debug, -vv: trace).
	#[arg(short, long, action = clap::ArgAction::Count)]
	verbose: u8,
}

fn run(cli: Cli) -> Result<()> {
	let mut images = ImageRegistry::new();
	for (kind, path) in [
		(ImageKind::Ce, cli.ce),
		(ImageKind::Uboot, cli.uboot),
		(ImageKind::Zyxel, cli.zyxel),
	] {
		let Some(path) = path else { continue };
		let image = RouterImage::from_file(kind, &path)
			.with_context(|| format!("loading {}", path.display()))?;
		images.set(image);
	}

	flash_start(&cli.interface, images)?;
	Ok(())
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	if logging::init(cli.verbose).is_err() {
		eprintln!("logger already installed");
		return ExitCode::FAILURE;
	}

	match run(cli) {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			log::error!("{err:#}");
			ExitCode::FAILURE
		}
	}
}
