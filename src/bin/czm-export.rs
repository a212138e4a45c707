use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use czm_export::{
    CodecLogLevel, DicomContainer, ErrorPolicy, ExportOptions, ExportReport, Exporter,
    FfmpegCodec, OutputFormat, PixelDataKind, ProgressCallback, ProgressInfo, SourceProfile,
    StudyIdentifiers, validate_source,
};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  czm-export export scan.dcm --out images --progress\n  czm-export export *.dcm --out images --format tiff --continue-on-error\n  czm-export inspect scan.dcm --json\n  czm-export descramble scan.dcm --out codestreams\n  czm-export completions zsh > _czm-export";

#[derive(Debug, Parser)]
#[command(
    name = "czm-export",
    version,
    about = "Recover images from scrambled Carl Zeiss Meditec DICOM files",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar across all input files.
    #[arg(long, global = true)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long, global = true)]
    overwrite: bool,

    /// FFmpeg log level (quiet, error, warning, info, debug).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Descramble, decode and write the frames of one or more files.
    #[command(
        about = "Export frames as images",
        after_help = "Examples:\n  czm-export export scan.dcm --out images\n  czm-export export a.dcm b.dcm --out images --patient-id P000001 --continue-on-error"
    )]
    Export {
        /// Input DICOM files.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output root directory.
        #[arg(long)]
        out: PathBuf,
        /// Output image format (png, tiff, bmp).
        #[arg(long, default_value = "png")]
        format: String,
        /// Skip failing frames and files instead of stopping.
        #[arg(long)]
        continue_on_error: bool,
        /// Export frames on several threads (requires the `rayon` feature).
        #[arg(long)]
        parallel: bool,
        /// Patient ID used when a file has none.
        #[arg(long)]
        patient_id: Option<String>,
        /// Acquisition date (YYYYMMDD) used when a file has none.
        #[arg(long)]
        date: Option<String>,
        /// Laterality (OD, OS) used when a file has none.
        #[arg(long)]
        laterality: Option<String>,
    },

    /// Print metadata and a validation report (alias: info).
    #[command(
        about = "Inspect a DICOM file",
        visible_alias = "info",
        after_help = "Examples:\n  czm-export inspect scan.dcm\n  czm-export inspect scan.dcm --json"
    )]
    Inspect {
        /// Input DICOM file.
        input: PathBuf,
        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Write the recovered JPEG 2000 files without decoding them.
    #[command(about = "Write recovered .jp2 codestreams")]
    Descramble {
        /// Input DICOM file.
        input: PathBuf,
        /// Output root directory.
        #[arg(long)]
        out: PathBuf,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

fn parse_output_format(value: &str) -> Option<OutputFormat> {
    OutputFormat::from_extension(value)
}

fn parse_log_level(value: &str) -> Option<CodecLogLevel> {
    CodecLogLevel::from_name(value)
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    let default_filter = if global.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    if let Some(level) = &global.log_level {
        let parsed = parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?;
        czm_export::set_codec_log_level(parsed);
    }

    Ok(())
}

fn base_export_options(global: &GlobalOptions, policy: ErrorPolicy) -> ExportOptions {
    ExportOptions::new(policy).with_overwrite(global.overwrite)
}

fn warn(message: impl AsRef<str>) {
    eprintln!("{} {}", "warning:".yellow().bold(), message.as_ref().yellow());
}

/// Forwards per-frame progress to the file-level bar.
struct BarProgress {
    bar: ProgressBar,
}

impl ProgressCallback for BarProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        match info.total {
            Some(total) => self.bar.set_message(format!("frame {}/{total}", info.current)),
            None => self.bar.set_message(format!("frame {}", info.current)),
        }
    }
}

fn print_report(input: &Path, report: &ExportReport) {
    let status = if report.is_complete() {
        "ok".green().bold()
    } else {
        "partial".yellow().bold()
    };
    println!(
        "{status} {} -> {} file(s)",
        input.display(),
        report.written.len()
    );
    for failure in &report.failures {
        warn(failure.to_string());
    }
    if report.offset_disagreements > 0 {
        warn(format!(
            "{} frame(s) had their header away from the expected offset",
            report.offset_disagreements
        ));
    }
}

fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    let mut clean = true;
    match cli.command {
        Commands::Export {
            inputs,
            out,
            format,
            continue_on_error,
            parallel,
            patient_id,
            date,
            laterality,
        } => {
            let format =
                parse_output_format(&format).ok_or(format!("unsupported --format: {format}"))?;
            let policy = if continue_on_error {
                ErrorPolicy::Continue
            } else {
                ErrorPolicy::Abort
            };

            if parallel && cfg!(not(feature = "rayon")) {
                warn("--parallel requires building with the `rayon` feature");
            }

            let progress_bar = if cli.global.progress {
                let bar = ProgressBar::new(inputs.len() as u64);
                let style = ProgressStyle::with_template(
                    "{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}",
                )?;
                bar.set_style(style.progress_chars("##-"));
                Some(bar)
            } else {
                None
            };

            let mut options = base_export_options(&cli.global, policy)
                .with_output_format(format)
                .with_parallel(parallel)
                .with_fallbacks(StudyIdentifiers::from_raw(
                    patient_id.as_deref(),
                    date.as_deref(),
                    laterality.as_deref(),
                ));
            if let Some(bar) = &progress_bar {
                options = options.with_progress(Arc::new(BarProgress { bar: bar.clone() }));
            }
            let exporter = Exporter::new(FfmpegCodec::new(), options);

            for input in &inputs {
                let outcome = DicomContainer::open(input)
                    .and_then(|container| exporter.export(&container, &out));
                match outcome {
                    Ok(report) => {
                        clean &= report.is_complete();
                        print_report(input, &report);
                    }
                    Err(error) if continue_on_error => {
                        clean = false;
                        eprintln!("{} {}: {error}", "error:".red().bold(), input.display());
                    }
                    Err(error) => return Err(error.into()),
                }
                if let Some(bar) = &progress_bar {
                    bar.inc(1);
                }
            }

            if let Some(bar) = progress_bar {
                bar.finish_with_message("done");
            }
        }
        Commands::Inspect { input, json } => {
            let container = DicomContainer::open(&input)?;
            let metadata = container.metadata();
            let report = validate_source(&container, &SourceProfile::default());
            if json {
                let payload = json!({
                    "path": input.display().to_string(),
                    "manufacturer": metadata.manufacturer,
                    "transfer_syntax": metadata.transfer_syntax,
                    "frame_count": metadata.frame_count.as_ref().map(|field| field.to_string()),
                    "pixel_data": metadata.pixel_data.as_ref().map(|pixel_data| json!({
                        "kind": match pixel_data.kind {
                            PixelDataKind::Native => "native",
                            PixelDataKind::Encapsulated => "encapsulated",
                        },
                        "bytes": pixel_data.bytes,
                        "fragments": pixel_data.fragments,
                        "offset_table_entries": pixel_data.offset_table_entries,
                    })),
                    "patient_id": metadata.identifiers.patient_id,
                    "date": metadata.identifiers.date,
                    "laterality": metadata.identifiers.laterality,
                    "study_stem": metadata.study_stem,
                    "valid": report.is_valid(),
                    "info": report.info,
                    "warnings": report.warnings,
                    "errors": report.errors,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "Manufacturer: {}",
                    metadata.manufacturer.as_deref().unwrap_or("<missing>")
                );
                println!("Transfer syntax: {}", metadata.transfer_syntax);
                match &metadata.frame_count {
                    Some(field) => println!("Number of frames: {field}"),
                    None => println!("Number of frames: <absent>"),
                }
                println!("Study: {}", metadata.study_stem);
                print!("{report}");
            }
            clean = report.is_valid();
        }
        Commands::Descramble { input, out } => {
            let container = DicomContainer::open(&input)?;
            let exporter = Exporter::new(
                FfmpegCodec::new(),
                base_export_options(&cli.global, ErrorPolicy::Continue),
            );
            let report = exporter.export_codestreams(&container, &out)?;
            clean = report.is_complete();
            print_report(&input, &report);
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "czm-export", &mut std::io::stdout());
        }
    }

    Ok(clean)
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(error) => {
            eprintln!("{} {error}", "error:".red().bold());
            std::process::exit(1);
        }
    }
}
