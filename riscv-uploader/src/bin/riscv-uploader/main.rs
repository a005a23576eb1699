//! Command line front end for the uploader library.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use riscv_uploader::flashing::{
    self, AgentImage, DownloadOptions, FlashLoader, FlashProgress, Format, ProgressEvent,
};
use riscv_uploader::{BootMode, Session, Target, TclProbe};

/// Write a firmware image into the EEPROM, RAM or external SPIFI flash of
/// an attached target, through a running debug probe server.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the firmware image (.hex or .bin).
    file: PathBuf,

    /// Host the probe server listens on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Tcl port of the probe server.
    #[arg(long, default_value_t = TclProbe::DEFAULT_PORT)]
    port: u16,

    /// Which memory the boot window of the image belongs to.
    #[arg(short, long, default_value = "undefined")]
    boot_mode: BootMode,

    /// Target description YAML; the built-in description is used when
    /// omitted.
    #[arg(long)]
    target: Option<PathBuf>,

    /// Base address for raw binary images.
    #[arg(long, default_value_t = 0)]
    base_address: u32,

    /// Program the external flash with parallel data lanes.
    #[arg(long)]
    use_quad_spi: bool,

    /// Erase the whole external flash instead of only the touched sectors.
    #[arg(long)]
    use_chip_erase: bool,

    /// Move external-flash payloads register-by-register instead of
    /// through DMA.
    #[arg(long)]
    no_dma: bool,

    /// Verify the EEPROM through the APB register path.
    #[arg(long)]
    verify_apb: bool,

    /// Only verify the image against the target, program nothing.
    #[arg(long)]
    check: bool,

    /// Resident driver blob for sector-wise external-flash writes.
    #[arg(long)]
    spifi_driver: Option<PathBuf>,

    /// Resident driver blob for EEPROM writes.
    #[arg(long)]
    eeprom_driver: Option<PathBuf>,

    /// Probe server command to run after a successful upload.
    #[arg(long)]
    post_action: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    let target = match &cli.target {
        Some(path) => {
            let yaml = std::fs::read_to_string(path)
                .with_context(|| format!("reading target description {}", path.display()))?;
            Target::from_yaml(&yaml)?
        }
        None => Target::generic(),
    };
    tracing::info!("using target {}", target.name);

    let mut loader = FlashLoader::new(target.clone(), cli.boot_mode);
    let format = match flashing::format_from_path(&cli.file)? {
        Format::Bin { .. } => Format::Bin {
            base_address: cli.base_address,
        },
        format => format,
    };
    flashing::load_file(&mut loader, &cli.file, format)
        .with_context(|| format!("loading {}", cli.file.display()))?;

    let probe = TclProbe::connect(&cli.host, cli.port)?;
    let mut session = Session::attach(Box::new(probe), target);

    let options = DownloadOptions {
        quad_spi: cli.use_quad_spi,
        chip_erase: cli.use_chip_erase,
        use_dma: !cli.no_dma,
        verify_through_apb: cli.verify_apb,
        verify_only: cli.check,
        spifi_agent: cli.spifi_driver.map(AgentImage::spifi),
        eeprom_agent: cli.eeprom_driver.map(AgentImage::eeprom),
        post_action: cli.post_action.clone(),
        progress: Some(progress_printer()),
    };

    loader.commit(&mut session, options)?;
    tracing::info!("upload finished");
    Ok(())
}

fn progress_printer() -> FlashProgress {
    FlashProgress::new(|event| match event {
        ProgressEvent::RegionStarted {
            memory,
            pages,
            bytes,
        } => {
            tracing::info!("{memory:?}: {pages} pages, {bytes} bytes");
        }
        ProgressEvent::PageProgrammed { address, size } => {
            tracing::debug!("programmed {size} bytes at {address:#010x}");
        }
        ProgressEvent::RegionFailed { memory } => {
            tracing::error!("{memory:?}: failed");
        }
        _ => {}
    })
}
