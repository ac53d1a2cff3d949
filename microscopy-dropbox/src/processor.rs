//! Registration of one incoming folder into the host.
//!
//! An incoming folder holds exactly one user subfolder with a
//! `data_structure.ois` index that lists the manifests to process. For
//! every experiment node a collection and an experiment sample are
//! obtained; every file node then becomes one sample carrying a container
//! image dataset (the first series, bound to the moved file or folder)
//! plus one contained dataset per further series.

use chrono::Local;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::dataset_config::{DatasetConfigResolver, ImageDatasetConfig, ImageSpec, IMAGE_DATASET_TYPE};
use crate::error::{Error, Result};
use crate::extractor::MetadataExtractor;
use crate::files;
use crate::host::{DatasetCode, Entity, ExperimentRef, SampleRef, Transaction};
use crate::manifest::{
    read_index, CompositeFile, ExperimentNode, FileEntry, Manifest, SingleFile, INDEX_FILE,
};
use crate::pattern::{ColorScale, CompositeFileType, FileResolver, ImageFileDescriptor, ImagesCsv};
use crate::reader::{extension_of, ReaderFactory, RECOGNIZED_EXTENSIONS};
use crate::series::SeriesAttributes;
use crate::settings::{ExperimentCreation, Settings};

pub const PROCESSOR_VERSION: u32 = 2;
pub const COLLECTION_TYPE: &str = "COLLECTION";
pub const COLLECTION_NAME: &str = "Microscopy experiments collection";
pub const EXPERIMENT_SAMPLE_TYPE: &str = "MICROSCOPY_EXPERIMENT";
pub const FILE_SAMPLE_TYPE: &str = "MICROSCOPY_SAMPLE_TYPE";
pub const ATTACHMENT_TYPE: &str = "ATTACHMENT";
pub const ACCESSORY_TYPE: &str = "MICROSCOPY_ACCESSORY_FILE";
pub const IMAGES_CSV: &str = "images.csv";

pub const NAME: &str = "$NAME";
pub const CONTAINER_METADATA: &str = "MICROSCOPY_IMG_CONTAINER_METADATA";
pub const CONTAINER_NAME: &str = "MICROSCOPY_IMG_CONTAINER_NAME";

const MAX_IDENTIFIER_LEN: usize = 41;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrationSummary {
    pub experiments: Vec<RegisteredExperiment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisteredExperiment {
    pub collection: ExperimentRef,
    pub sample: SampleRef,
    pub attachments: Vec<DatasetCode>,
    pub files: Vec<RegisteredFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisteredFile {
    pub sample: SampleRef,
    pub container: DatasetCode,
    pub contained: Vec<DatasetCode>,
    pub accessory: Vec<DatasetCode>,
}

/// `/SPACE/PROJECT/CODE` split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier<'a> {
    pub space: &'a str,
    pub project: &'a str,
    pub code: &'a str,
}

impl<'a> Identifier<'a> {
    pub fn parse(identifier: &'a str) -> Result<Self> {
        let bad = || {
            tracing::error!("Bad identifier {}", identifier);
            Error::InvalidIdentifier(identifier.to_string())
        };
        let rest = identifier.strip_prefix('/').ok_or_else(bad)?;
        let parts: Vec<&str> = rest.split('/').collect();
        match parts[..] {
            [space, project, code]
                if !space.is_empty() && !project.is_empty() && !code.is_empty() =>
            {
                Ok(Self {
                    space,
                    project,
                    code,
                })
            }
            _ => Err(bad()),
        }
    }

    /// Sample identifier as the host expects it.
    pub fn sample_identifier(&self, project_samples: bool) -> String {
        if project_samples {
            format!("/{}/{}/{}", self.space, self.project, self.code)
        } else {
            format!("/{}/{}", self.space, self.code)
        }
    }

    /// Owner of samples with generated codes.
    pub fn sample_owner(&self, project_samples: bool) -> String {
        if project_samples {
            format!("/{}/{}", self.space, self.project)
        } else {
            format!("/{}", self.space)
        }
    }
}

/// `<identifier truncated to 41 chars>_<yyddmmHHMMSS><micros>`.
pub fn timestamped(identifier: &str) -> String {
    let base: String = identifier.chars().take(MAX_IDENTIFIER_LEN).collect();
    format!("{}_{}", base, Local::now().format("%y%d%m%H%M%S%6f"))
}

fn file_name_of(relative: &str) -> &str {
    relative
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(relative)
}

pub struct RegistrationProcessor<'a> {
    tx: &'a mut dyn Transaction,
    extractor: MetadataExtractor<'a>,
    settings: &'a Settings,
    incoming: PathBuf,
    user_name: String,
    machine_name: String,
}

impl<'a> RegistrationProcessor<'a> {
    pub fn new(
        tx: &'a mut dyn Transaction,
        readers: &'a dyn ReaderFactory,
        settings: &'a Settings,
        incoming: &Path,
    ) -> Self {
        Self {
            tx,
            extractor: MetadataExtractor::new(readers),
            settings,
            incoming: incoming.to_path_buf(),
            user_name: String::new(),
            machine_name: String::new(),
        }
    }

    fn invalid_incoming(&self, reason: &str) -> Error {
        tracing::error!("Incoming {}: {}", self.incoming.display(), reason);
        Error::InvalidIncoming {
            path: self.incoming.clone(),
            reason: reason.to_string(),
        }
    }

    /// Manifests listed in the index of the single user subfolder.
    pub fn manifests(&self) -> Result<Vec<PathBuf>> {
        if !self.incoming.is_dir() {
            return Err(self.invalid_incoming("incoming must be a folder"));
        }
        tracing::info!("Incoming folder: {}", self.incoming.display());
        let mut user_folders = Vec::new();
        for entry in fs::read_dir(&self.incoming)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                user_folders.push(entry.path());
            }
        }
        let user_folder = match user_folders.as_slice() {
            [only] => only,
            _ => {
                return Err(self.invalid_incoming(&format!(
                    "expected exactly one user subfolder, found {}",
                    user_folders.len()
                )))
            }
        };
        let index = user_folder.join(INDEX_FILE);
        if !index.is_file() {
            return Err(self.invalid_incoming(&format!("{} not found", INDEX_FILE)));
        }
        read_index(&index, &self.incoming)
    }

    /// Process every listed manifest; the first error aborts the run.
    pub fn run(&mut self) -> Result<RegistrationSummary> {
        let mut summary = RegistrationSummary::default();
        for path in self.manifests()? {
            tracing::info!("Processing {}", path.display());
            let manifest = Manifest::load(&path)?;
            summary.experiments.extend(self.register(&manifest)?.experiments);
        }
        tracing::info!("Registration completed");
        Ok(summary)
    }

    pub fn register(&mut self, manifest: &Manifest) -> Result<RegistrationSummary> {
        self.user_name = manifest.user_name.clone();
        self.machine_name = manifest.machine_name.clone();
        let mut summary = RegistrationSummary::default();
        for node in &manifest.experiments {
            let (collection, sample, attachments) = self.process_experiment(node)?;
            let mut files = Vec::with_capacity(node.entries.len());
            for entry in &node.entries {
                let file = match entry {
                    FileEntry::Single(file) => self.process_file(file, &collection, &sample)?,
                    FileEntry::Composite(composite) => {
                        let file = self.process_composite(composite, &collection, &sample)?;
                        tracing::info!("Processed composite file");
                        file
                    }
                };
                files.push(file);
            }
            summary.experiments.push(RegisteredExperiment {
                collection,
                sample,
                attachments,
                files,
            });
        }
        Ok(summary)
    }

    fn collection(&mut self, identifier: &str) -> Result<ExperimentRef> {
        Identifier::parse(identifier)?;
        let target = match self.settings.experiment_creation {
            ExperimentCreation::GetOrCreate => {
                if let Some(existing) = self.tx.get_experiment(identifier)? {
                    tracing::debug!("Reusing collection {}", identifier);
                    return Ok(existing);
                }
                identifier.to_string()
            }
            ExperimentCreation::CreateUnique => {
                let mut candidate = timestamped(identifier);
                while self.tx.get_experiment(&candidate)?.is_some() {
                    candidate = timestamped(identifier);
                }
                candidate
            }
        };
        let collection = self.tx.create_experiment(&target, COLLECTION_TYPE)?;
        self.tx
            .set_property(Entity::Experiment(&collection), NAME, COLLECTION_NAME)?;
        tracing::info!("Created collection with ID {}", target);
        Ok(collection)
    }

    fn process_experiment(
        &mut self,
        node: &ExperimentNode,
    ) -> Result<(ExperimentRef, SampleRef, Vec<DatasetCode>)> {
        let collection = self.collection(node.collection())?;

        let project_samples = self.tx.project_samples_enabled();
        let mut stamped = timestamped(&node.openbis_identifier);
        let mut identifier = Identifier::parse(&stamped)?.sample_identifier(project_samples);
        while self.tx.get_sample(&identifier)?.is_some() {
            stamped = timestamped(&node.openbis_identifier);
            identifier = Identifier::parse(&stamped)?.sample_identifier(project_samples);
        }
        let sample = self.tx.create_sample(&identifier, EXPERIMENT_SAMPLE_TYPE)?;
        self.tx.set_sample_experiment(&sample, &collection)?;
        tracing::info!(
            "Created experiment sample {} in collection {}",
            sample.identifier,
            collection.identifier
        );

        for tag in &node.tags {
            let tag = self.tx.get_or_create_tag(tag, &self.user_name)?;
            self.tx.assign_tag(&sample, &tag)?;
        }

        let entity = Entity::Sample(&sample);
        self.tx.set_property(entity, NAME, &node.name)?;
        self.tx
            .set_property(entity, "MICROSCOPY_EXPERIMENT_NAME", &node.name)?;
        self.tx.set_property(
            entity,
            "MICROSCOPY_EXPERIMENT_VERSION",
            &PROCESSOR_VERSION.to_string(),
        )?;
        // Never overwrite a description with an empty one.
        if !node.description.is_empty() {
            self.tx
                .set_property(entity, "MICROSCOPY_EXPERIMENT_DESCRIPTION", &node.description)?;
        } else if self
            .tx
            .property(entity, "MICROSCOPY_EXPERIMENT_DESCRIPTION")?
            .is_none()
        {
            self.tx
                .set_property(entity, "MICROSCOPY_EXPERIMENT_DESCRIPTION", "")?;
        }
        self.tx.set_property(
            entity,
            "MICROSCOPY_EXPERIMENT_ACQ_HARDWARE_FRIENDLY_NAME",
            &self.machine_name,
        )?;

        let mut attachments = Vec::with_capacity(node.attachments.len());
        for relative in &node.attachments {
            tracing::info!("Adding file attachment {}", relative);
            let dataset = self.tx.create_dataset(ATTACHMENT_TYPE)?;
            self.tx
                .move_file(&self.incoming.join(relative), &dataset, None)?;
            self.tx
                .set_property(Entity::Dataset(&dataset), NAME, file_name_of(relative))?;
            self.tx.set_dataset_sample(&dataset, &sample)?;
            attachments.push(dataset);
        }

        Ok((collection, sample, attachments))
    }

    fn create_file_sample(
        &mut self,
        collection: &ExperimentRef,
        parent: &SampleRef,
        name: &str,
        description: &str,
        dataset_size: Option<&str>,
    ) -> Result<SampleRef> {
        let owner = Identifier::parse(&collection.identifier)?
            .sample_owner(self.tx.project_samples_enabled());
        let sample = self
            .tx
            .create_sample_with_generated_code(&owner, FILE_SAMPLE_TYPE)?;
        self.tx.set_sample_experiment(&sample, collection)?;
        tracing::info!(
            "Created sample {} of type {} in {}",
            sample.identifier,
            FILE_SAMPLE_TYPE,
            collection.identifier
        );

        let entity = Entity::Sample(&sample);
        self.tx.set_property(entity, "MICROSCOPY_SAMPLE_NAME", name)?;
        self.tx.set_property(entity, NAME, name)?;
        self.tx
            .set_property(entity, "MICROSCOPY_SAMPLE_DESCRIPTION", description)?;
        if let Some(size) = dataset_size {
            self.tx
                .set_property(entity, "MICROSCOPY_SAMPLE_SIZE_IN_BYTES", size)?;
        }
        self.tx
            .set_sample_parents(&sample, std::slice::from_ref(parent))?;
        Ok(sample)
    }

    /// Store the per-series properties of a freshly created image dataset.
    fn store_series_properties(
        &mut self,
        dataset: &DatasetCode,
        attributes: &SeriesAttributes,
        name: &str,
    ) -> Result<()> {
        let xml = attributes.to_xml()?;
        tracing::debug!("Series metadata (XML): {}", xml);
        let entity = Entity::Dataset(dataset);
        self.tx.set_property(entity, CONTAINER_METADATA, &xml)?;
        self.tx.set_property(entity, CONTAINER_NAME, name)?;
        self.tx.set_property(entity, NAME, name)?;
        Ok(())
    }

    fn process_file(
        &mut self,
        entry: &SingleFile,
        collection: &ExperimentRef,
        experiment: &SampleRef,
    ) -> Result<RegisteredFile> {
        let SingleFile {
            relative_file_name,
            description,
            dataset_size,
            series,
        } = entry;
        let path = self.incoming.join(relative_file_name);

        let all_series: Vec<SeriesAttributes> = if series.is_empty() {
            self.extractor
                .extract(&path)?
                .iter()
                .map(|s| s.to_attributes())
                .collect()
        } else {
            tracing::debug!("Reusing pre-parsed metadata of {}", relative_file_name);
            series.clone()
        };
        tracing::info!(
            "File {} contains {} series",
            relative_file_name,
            all_series.len()
        );
        if all_series.is_empty() {
            return Err(Error::SeriesCountMismatch {
                context: relative_file_name.clone(),
                declared: 1,
                found: 0,
            });
        }

        let sample = self.create_file_sample(
            collection,
            experiment,
            file_name_of(relative_file_name),
            description,
            dataset_size.as_deref(),
        )?;

        let indices: Vec<u32> = (0..all_series.len() as u32).collect();
        let resolver = DatasetConfigResolver::new(
            &indices,
            &all_series,
            ColorScale::Byte,
            self.settings.image_resolutions.clone(),
        );

        let mut container: Option<DatasetCode> = None;
        let mut contained = Vec::new();
        for (&series, attributes) in indices.iter().zip(&all_series) {
            let channel_count = attributes
                .get("sizeC")
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(attributes.channel_count() as u32);
            let channels = (0..channel_count)
                .map(|c| resolver.channel_for(series, c))
                .collect::<Result<Vec<_>>>()?;
            let config = ImageDatasetConfig {
                dataset_type: IMAGE_DATASET_TYPE.to_string(),
                series,
                channels,
                images: Vec::new(),
                thumbnails: resolver.thumbnail_policy_for(series)?,
                recognized_extensions: RECOGNIZED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            };

            let dataset = match &container {
                None => {
                    tracing::info!(
                        "Creating new image dataset for file {} and series {}",
                        path.display(),
                        series
                    );
                    let dataset = self.tx.create_image_dataset(&config, &path)?;
                    self.store_series_properties(&dataset, attributes, attributes.name())?;
                    self.tx.move_file(&path, &dataset, None)?;
                    container = Some(dataset.clone());
                    dataset
                }
                Some(parent) => {
                    tracing::info!("Appending series {} to dataset {}", series, parent);
                    let dataset = self.tx.create_contained_dataset(&config, parent)?;
                    self.store_series_properties(&dataset, attributes, attributes.name())?;
                    contained.push(dataset.clone());
                    dataset
                }
            };
            self.tx.set_dataset_sample(&dataset, &sample)?;
        }

        Ok(RegisteredFile {
            sample,
            container: container.ok_or_else(|| Error::SeriesCountMismatch {
                context: relative_file_name.clone(),
                declared: 1,
                found: 0,
            })?,
            contained,
            accessory: Vec::new(),
        })
    }

    fn process_composite(
        &mut self,
        entry: &CompositeFile,
        collection: &ExperimentRef,
        experiment: &SampleRef,
    ) -> Result<RegisteredFile> {
        let CompositeFile {
            file_type,
            relative_folder,
            series_indices,
            name,
            description,
            dataset_size,
            series,
        } = entry;
        let file_type = *file_type;
        tracing::info!("Processing {}", file_type);
        if series.len() != series_indices.len() {
            return Err(Error::SeriesCountMismatch {
                context: relative_folder.clone(),
                declared: series_indices.len(),
                found: series.len(),
            });
        }

        let sample = self.create_file_sample(
            collection,
            experiment,
            name,
            description,
            dataset_size.as_deref(),
        )?;

        let folder = self.incoming.join(relative_folder);
        tracing::info!(
            "Folder {} contains {} series",
            relative_folder,
            series.len()
        );

        let csv = match file_type {
            CompositeFileType::YouScopeExperiment => {
                Some(ImagesCsv::load(&folder.join(IMAGES_CSV))?)
            }
            _ => None,
        };
        let resolutions = match file_type.fixed_resolutions() {
            Some(fixed) => fixed.iter().map(|r| r.to_string()).collect(),
            None => self.settings.image_resolutions.clone(),
        };
        let mut resolver = DatasetConfigResolver::new(
            series_indices,
            series,
            file_type.color_scale(),
            resolutions,
        );
        if let Some(csv) = &csv {
            resolver = resolver.with_dataset_channels(csv.channel_names().len());
        }

        let extensions = file_type.recognized_extensions();
        let image_files: Vec<String> = files::relative_files(&folder)?
            .into_iter()
            .filter(|f| {
                extension_of(Path::new(f))
                    .map(|e| extensions.iter().any(|x| *x == e))
                    .unwrap_or(false)
            })
            .collect();

        let mut container: Option<DatasetCode> = None;
        let mut contained = Vec::new();
        let mut accessory = Vec::new();
        for (&series_number, attributes) in series_indices.iter().zip(series) {
            tracing::info!(
                "Processing series {} of {}",
                series_number,
                series_indices.len()
            );
            let file_resolver = FileResolver::new(
                file_type,
                series_indices,
                series_number,
                series,
                csv.as_ref(),
            )?;
            let mut images: Vec<ImageFileDescriptor> = Vec::new();
            for file in &image_files {
                if let Some(descriptor) = file_resolver.resolve(file)? {
                    images.push(descriptor);
                }
            }
            if images.is_empty() {
                tracing::warn!(
                    "No files of {} belong to series {}",
                    relative_folder,
                    series_number
                );
            }
            let codes: BTreeSet<(u32, u32)> =
                images.iter().map(|d| (d.series, d.channel)).collect();
            let channels = codes
                .into_iter()
                .map(|(s, c)| resolver.channel_for(s, c))
                .collect::<Result<Vec<_>>>()?;
            let config = ImageDatasetConfig {
                dataset_type: IMAGE_DATASET_TYPE.to_string(),
                series: series_number,
                channels,
                images: images.iter().map(ImageSpec::from).collect(),
                thumbnails: resolver.thumbnail_policy_for(series_number)?,
                recognized_extensions: extensions.iter().map(|e| e.to_string()).collect(),
            };

            let series_name = if attributes.name().is_empty() {
                tracing::info!("Falling back to series name series_{}", series_number);
                format!("series_{}", series_number)
            } else {
                attributes.name().to_string()
            };

            let dataset = match &container {
                None => {
                    tracing::info!(
                        "Creating new image dataset for folder {} and series {}",
                        folder.display(),
                        series_number
                    );
                    let dataset = self.tx.create_image_dataset(&config, &folder)?;
                    self.store_series_properties(&dataset, attributes, &series_name)?;
                    if file_type == CompositeFileType::YouScopeExperiment {
                        accessory =
                            self.register_accessory_files(&folder, relative_folder, &sample, &dataset)?;
                    }
                    self.tx.move_file(&folder, &dataset, None)?;
                    container = Some(dataset.clone());
                    dataset
                }
                Some(parent) => {
                    tracing::info!("Appending series {} to dataset {}", series_number, parent);
                    let dataset = self.tx.create_contained_dataset(&config, parent)?;
                    self.store_series_properties(&dataset, attributes, &series_name)?;
                    contained.push(dataset.clone());
                    dataset
                }
            };
            self.tx.set_dataset_sample(&dataset, &sample)?;
        }

        Ok(RegisteredFile {
            sample,
            container: container.ok_or_else(|| Error::SeriesCountMismatch {
                context: relative_folder.clone(),
                declared: 1,
                found: 0,
            })?,
            contained,
            accessory,
        })
    }

    /// Non-TIFF files at the root of a YouScope folder become accessory
    /// datasets under `original/<folder>/`.
    fn register_accessory_files(
        &mut self,
        folder: &Path,
        relative_folder: &str,
        sample: &SampleRef,
        container: &DatasetCode,
    ) -> Result<Vec<DatasetCode>> {
        let folder_name = file_name_of(relative_folder);
        let mut names = Vec::new();
        for entry in fs::read_dir(folder)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let is_tiff = matches!(extension_of(&path).as_deref(), Some("tif" | "tiff"));
            if !is_tiff {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        tracing::info!("Accessory files to process: {:?}", names);

        let mut datasets = Vec::with_capacity(names.len());
        for name in names {
            tracing::info!("Registering accessory file: {}", name);
            let dataset = self.tx.create_dataset(ACCESSORY_TYPE)?;
            self.tx.set_property(
                Entity::Dataset(&dataset),
                "MICROSCOPY_ACCESSORY_FILE_NAME",
                &name,
            )?;
            self.tx.set_dataset_sample(&dataset, sample)?;
            self.tx
                .set_dataset_parents(&dataset, std::slice::from_ref(container))?;
            let destination = format!("original/{}/{}", folder_name, name);
            self.tx
                .move_file(&folder.join(&name), &dataset, Some(&destination))?;
            datasets.push(dataset);
        }
        Ok(datasets)
    }
}
