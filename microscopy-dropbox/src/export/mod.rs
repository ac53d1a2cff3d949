//! Copy registered datasets of an experiment to a user-visible folder.

pub mod jobs;

pub use jobs::{JobHandle, JobRegistry, JobStatus};

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::dataset_config::IMAGE_DATASET_TYPE;
use crate::error::{Error, Result};
use crate::files;
use crate::host::{last_component, DatasetQuery, SampleInfo};
use crate::processor::{ACCESSORY_TYPE, FILE_SAMPLE_TYPE, NAME};
use crate::settings::ExportSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Copy into the user's export folder.
    Normal,
    /// Package into an archive in the session workspace.
    Zip,
    /// Copy into the user's deconvolution source folder.
    Hrm,
}

impl ExportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportMode::Normal => "normal",
            ExportMode::Zip => "zip",
            ExportMode::Hrm => "hrm",
        }
    }
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(ExportMode::Normal),
            "zip" => Ok(ExportMode::Zip),
            "hrm" => Ok(ExportMode::Hrm),
            other => Err(Error::UnknownExportMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Identifier of the collection, e.g. `/LAB/PROJ/COLLECTION`.
    pub collection: String,
    /// Perm id of the experiment sample.
    pub experiment: String,
    /// Perm id of a single file sample; all of them when absent.
    pub sample: Option<String>,
    pub mode: ExportMode,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportReport {
    pub uid: Uuid,
    pub success: bool,
    pub message: String,
    pub copied_files: usize,
    pub relative_experiment_folder: String,
    pub zip_archive_file_name: String,
    pub mode: ExportMode,
}

impl ExportReport {
    pub fn failed(uid: Uuid, mode: ExportMode, message: impl Into<String>) -> Self {
        Self {
            uid,
            success: false,
            message: message.into(),
            copied_files: 0,
            relative_experiment_folder: String::new(),
            zip_archive_file_name: String::new(),
            mode,
        }
    }

    pub fn subject(&self) -> &'static str {
        if self.success {
            "Microscopy: successfully processed requested data"
        } else {
            "Microscopy: error processing request!"
        }
    }

    pub fn body(&self) -> String {
        if !self.success {
            return format!(
                "Sorry, there was an error processing your request. \
                 Please send your administrator the following report:\n\n\"{}\"\n",
                self.message
            );
        }
        let files = match self.copied_files {
            1 => "One file was ".to_string(),
            n => format!("{} files were ", n),
        };
        match self.mode {
            ExportMode::Normal => format!(
                "{}successfully exported to {{...}}/{}.",
                files, self.relative_experiment_folder
            ),
            ExportMode::Hrm => format!("{}successfully exported to your HRM source folder.", files),
            ExportMode::Zip => format!(
                "{}successfully packaged for download: {}",
                files, self.zip_archive_file_name
            ),
        }
    }
}

#[derive(Debug, Default)]
struct Outcome {
    copied_files: usize,
    relative_experiment_folder: String,
    zip_archive_file_name: String,
}

pub struct Mover {
    request: ExportRequest,
    settings: ExportSettings,
}

impl Mover {
    pub fn new(request: ExportRequest, settings: ExportSettings) -> Self {
        Self { request, settings }
    }

    pub fn request(&self) -> &ExportRequest {
        &self.request
    }

    fn required<'s, T: ?Sized>(&self, value: Option<&'s T>, key: &str) -> Result<&'s T> {
        value.ok_or_else(|| {
            Error::ExportConfig(format!(
                "'{}' is required for mode {}",
                key, self.request.mode
            ))
        })
    }

    /// Base folder the user folder lives in, and the user folder itself.
    fn folders(&self) -> Result<(PathBuf, PathBuf)> {
        let user = &self.request.user;
        let s = &self.settings;
        Ok(match self.request.mode {
            ExportMode::Normal => {
                let base = self.required(s.base_dir.as_deref(), "base_dir")?;
                let export_dir = self.required(s.export_dir.as_deref(), "export_dir")?;
                (base.to_path_buf(), base.join(user).join(export_dir))
            }
            ExportMode::Zip => {
                let base = self.required(s.session_dir.as_deref(), "session_dir")?;
                (base.to_path_buf(), base.join(user))
            }
            ExportMode::Hrm => {
                let base = self.required(s.hrm_base_dir.as_deref(), "hrm_base_dir")?;
                let subdir = self.required(s.hrm_src_subdir.as_deref(), "hrm_src_subdir")?;
                (base.to_path_buf(), base.join(user).join(subdir))
            }
        })
    }

    /// Run the export, turning any failure into an unsuccessful report.
    pub fn run(&self, query: &dyn DatasetQuery, uid: Uuid) -> ExportReport {
        tracing::info!(
            "Export of {} (sample {:?}) for {} in mode {}",
            self.request.experiment,
            self.request.sample,
            self.request.user,
            self.request.mode
        );
        let report = match self.export(query) {
            Ok(outcome) => ExportReport {
                uid,
                success: true,
                message: String::new(),
                copied_files: outcome.copied_files,
                relative_experiment_folder: outcome.relative_experiment_folder,
                zip_archive_file_name: outcome.zip_archive_file_name,
                mode: self.request.mode,
            },
            Err(e) => {
                tracing::error!("Export {} failed: {}", uid, e);
                ExportReport::failed(uid, self.request.mode, e.to_string())
            }
        };
        tracing::info!("{}: {}", report.subject(), report.body());
        report
    }

    fn samples(&self, query: &dyn DatasetQuery) -> Result<Vec<SampleInfo>> {
        match &self.request.sample {
            Some(perm_id) => Ok(vec![query.sample(perm_id)?.ok_or_else(|| {
                Error::EntityNotFound {
                    kind: "sample",
                    id: perm_id.clone(),
                }
            })?]),
            None => Ok(query
                .child_samples(&self.request.experiment)?
                .into_iter()
                .filter(|s| s.sample_type == FILE_SAMPLE_TYPE)
                .collect()),
        }
    }

    /// Stored files of the given type, deduplicated in discovery order.
    fn dataset_files(
        &self,
        query: &dyn DatasetQuery,
        samples: &[SampleInfo],
        dataset_type: &str,
    ) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for sample in samples {
            for dataset in query.sample_datasets(&sample.sample.perm_id)? {
                if dataset.dataset_type != dataset_type {
                    continue;
                }
                for file in dataset.files {
                    if seen.insert(file.clone()) {
                        out.push(file);
                    }
                }
            }
        }
        Ok(out)
    }

    fn export(&self, query: &dyn DatasetQuery) -> Result<Outcome> {
        let experiment = query
            .sample(&self.request.experiment)?
            .ok_or_else(|| Error::EntityNotFound {
                kind: "experiment sample",
                id: self.request.experiment.clone(),
            })?;
        let samples = self.samples(query)?;

        let images = self.dataset_files(query, &samples, IMAGE_DATASET_TYPE)?;
        if images.is_empty() {
            return Err(Error::ExportConfig(format!(
                "experiment {} has no {} datasets with files",
                self.request.experiment, IMAGE_DATASET_TYPE
            )));
        }
        let accessory = self.dataset_files(query, &samples, ACCESSORY_TYPE)?;

        let (base, user_folder) = self.folders()?;
        fs::create_dir_all(&user_folder)?;

        let collection_code = last_component(&self.request.collection);
        let root = unique_folder(
            &user_folder
                .join(collection_code)
                .join(experiment.sample.code()),
        );
        let experiment_name = experiment
            .properties
            .get(NAME)
            .filter(|n| !n.is_empty())
            .map(String::as_str)
            .unwrap_or_else(|| experiment.sample.code());
        let experiment_folder = root.join(experiment_name);
        tracing::info!("Creating directory {}", experiment_folder.display());
        fs::create_dir_all(&experiment_folder)?;

        let mut copied = 0;
        for source in images.iter().chain(&accessory) {
            let name = source
                .file_name()
                .ok_or_else(|| Error::invalid("file", source.display().to_string()))?;
            tracing::info!(
                "Copying {} to {}",
                source.display(),
                experiment_folder.display()
            );
            copied += files::copy_tree(source, &experiment_folder.join(name))?;
        }

        let mut outcome = Outcome {
            copied_files: copied,
            relative_experiment_folder: slash_path(root.strip_prefix(&base).unwrap_or(&root)),
            zip_archive_file_name: String::new(),
        };
        if self.request.mode == ExportMode::Zip {
            let archive = zip_folder(&root)?;
            let relative = archive
                .strip_prefix(&user_folder)
                .unwrap_or(&archive);
            outcome.zip_archive_file_name = slash_path(relative);
        }
        Ok(outcome)
    }
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// `path`, or the first free `path_<n>`.
pub fn unique_folder(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let mut counter = 1;
    loop {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(format!("_{}", counter));
        let candidate = PathBuf::from(candidate);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Write `<folder>.zip` (stored, zip64) holding the folder and its content.
pub fn zip_folder(folder: &Path) -> Result<PathBuf> {
    let mut archive_path = folder.as_os_str().to_owned();
    archive_path.push(".zip");
    let archive_path = PathBuf::from(archive_path);
    let parent = folder.parent().unwrap_or(Path::new(""));

    let mut zip = ZipWriter::new(File::create(&archive_path)?);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .large_file(true);
    for entry in WalkDir::new(folder).sort_by_file_name() {
        let entry = entry?;
        let name = slash_path(entry.path().strip_prefix(parent).unwrap_or(entry.path()));
        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            io::copy(&mut File::open(entry.path())?, &mut zip)?;
        }
    }
    zip.finish()?;
    tracing::info!("Wrote archive {}", archive_path.display());
    Ok(archive_path)
}
