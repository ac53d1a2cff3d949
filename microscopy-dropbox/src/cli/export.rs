use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use microscopy_dropbox::export::{ExportMode, ExportReport, ExportRequest, JobRegistry, Mover};
use microscopy_dropbox::local_store::LocalStore;
use microscopy_dropbox::settings::Settings;

#[derive(Args, Clone)]
pub struct ExportArgs {
    /// Store directory written by `register`
    #[arg(long)]
    pub store: PathBuf,

    /// Collection identifier, e.g. /LAB/PROJECT/COLLECTION
    #[arg(long)]
    pub collection: String,

    /// Perm id of the experiment sample
    #[arg(long)]
    pub experiment: String,

    /// Perm id of a single file sample (default: the whole experiment)
    #[arg(long)]
    pub sample: Option<String>,

    /// normal, zip or hrm
    #[arg(long, default_value = "normal")]
    pub mode: String,

    /// User the export is for
    #[arg(long)]
    pub user: String,

    /// TOML settings file with an [export] table
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run(
    args: ExportArgs,
    progress: impl Fn(f64, &str),
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(args.config.as_deref())?;
    let mode: ExportMode = args.mode.parse()?;
    let store = LocalStore::open(&args.store, settings.project_samples_enabled)?;
    let mover = Mover::new(
        ExportRequest {
            collection: args.collection,
            experiment: args.experiment,
            sample: args.sample,
            mode,
            user: args.user,
        },
        settings.export.clone(),
    );

    let registry = JobRegistry::new();
    let handle = registry.submit(mode, move |uid| mover.run(&store, uid));
    let uid = handle.uid;
    progress(0.0, &format!("Submitted export job {}", uid));

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
    spinner.set_message(format!("Exporting ({})", mode));
    spinner.enable_steady_tick(Duration::from_millis(100));
    let report = loop {
        if let Some(report) = registry.take(&uid) {
            break report;
        }
        if handle.is_finished() {
            // The worker stores its report before exiting.
            break registry.take(&uid).unwrap_or_else(|| {
                ExportReport::failed(uid, mode, "export job ended without a report")
            });
        }
        thread::sleep(Duration::from_millis(50));
    };
    spinner.finish_and_clear();
    handle.wait();

    println!("{}", serde_json::to_string_pretty(&report)?);
    progress(1.0, report.subject());
    if !report.success {
        return Err(report.message.into());
    }
    Ok(())
}
