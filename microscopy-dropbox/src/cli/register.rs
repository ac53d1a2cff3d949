use clap::Args;
use std::path::PathBuf;

use microscopy_dropbox::local_store::LocalStore;
use microscopy_dropbox::manifest::Manifest;
use microscopy_dropbox::processor::{RegistrationProcessor, RegistrationSummary};
use microscopy_dropbox::reader::FormatReaders;
use microscopy_dropbox::settings::Settings;

#[derive(Args, Clone)]
pub struct RegisterArgs {
    /// Incoming folder holding one user subfolder with data_structure.ois
    pub incoming: PathBuf,

    /// Store directory (created if missing)
    #[arg(long)]
    pub store: PathBuf,

    /// TOML settings file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run(
    args: RegisterArgs,
    progress: impl Fn(f64, &str),
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(args.config.as_deref())?;
    let mut store = LocalStore::open(&args.store, settings.project_samples_enabled)?;
    let readers = FormatReaders;

    let summary = {
        let mut processor =
            RegistrationProcessor::new(&mut store, &readers, &settings, &args.incoming);
        let manifests = processor.manifests()?;
        let total = manifests.len().max(1) as f64;
        let mut summary = RegistrationSummary::default();
        for (i, path) in manifests.iter().enumerate() {
            progress(i as f64 / total, &format!("Registering {}", path.display()));
            let manifest = Manifest::load(path)?;
            summary
                .experiments
                .extend(processor.register(&manifest)?.experiments);
        }
        summary
    };

    store.commit()?;
    progress(1.0, "Registration completed");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
