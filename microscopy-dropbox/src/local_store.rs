//! Directory-backed host: entities in `registry.json`, files under
//! `datasets/<code>/`.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::dataset_config::ImageDatasetConfig;
use crate::error::{Error, Result};
use crate::files;
use crate::host::{
    DatasetCode, DatasetInfo, DatasetQuery, Entity, ExperimentRef, SampleInfo,
    SampleRef, TagRef, Transaction,
};

pub const REGISTRY_FILE: &str = "registry.json";
pub const DATASETS_DIR: &str = "datasets";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub experiment: ExperimentRef,
    pub experiment_type: String,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleRecord {
    pub sample: SampleRef,
    pub sample_type: String,
    pub experiment: Option<String>,
    pub parents: Vec<String>,
    pub tags: Vec<TagRef>,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub code: DatasetCode,
    pub dataset_type: String,
    pub sample: Option<String>,
    pub container: Option<DatasetCode>,
    pub parents: Vec<DatasetCode>,
    /// Source the dataset was created for, before its move.
    pub source: Option<PathBuf>,
    /// Store-relative paths.
    pub files: Vec<String>,
    pub properties: BTreeMap<String, String>,
    pub image_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    pub next_id: u64,
    pub experiments: BTreeMap<String, ExperimentRecord>,
    pub samples: BTreeMap<String, SampleRecord>,
    pub datasets: BTreeMap<DatasetCode, DatasetRecord>,
    pub tags: Vec<TagRef>,
}

/// A file move recorded by `move_file`, applied on commit.
#[derive(Debug, Clone, PartialEq)]
struct PendingMove {
    source: PathBuf,
    destination: PathBuf,
}

#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    project_samples: bool,
    registry: Registry,
    pending: Vec<PendingMove>,
}

impl LocalStore {
    /// Open (or create) a store, loading an existing registry.
    pub fn open(root: &Path, project_samples: bool) -> Result<Self> {
        fs::create_dir_all(root)?;
        let path = root.join(REGISTRY_FILE);
        let registry = if path.is_file() {
            let text = fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        } else {
            Registry::default()
        };
        tracing::debug!(
            "Opened store {} ({} samples, {} datasets)",
            root.display(),
            registry.samples.len(),
            registry.datasets.len()
        );
        Ok(Self {
            root: root.to_path_buf(),
            project_samples,
            registry,
            pending: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of file moves waiting for `commit`.
    pub fn pending_moves(&self) -> usize {
        self.pending.len()
    }

    /// Apply the recorded file moves in order, then write the registry
    /// through a temporary file. On failure the moves already applied are
    /// undone and the registry on disk is left unchanged.
    pub fn commit(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut applied: Vec<&PendingMove> = Vec::with_capacity(pending.len());
        for step in &pending {
            if let Err(e) = files::move_path(&step.source, &step.destination) {
                tracing::error!(
                    "Moving {} to {} failed: {}",
                    step.source.display(),
                    step.destination.display(),
                    e
                );
                revert(&applied);
                return Err(e);
            }
            tracing::info!(
                "Moved {} to {}",
                step.source.display(),
                step.destination.display()
            );
            applied.push(step);
        }
        if let Err(e) = self.write_registry() {
            revert(&applied);
            return Err(e);
        }
        Ok(())
    }

    fn write_registry(&self) -> Result<()> {
        let path = self.root.join(REGISTRY_FILE);
        let tmp = self.root.join(format!("{}.tmp", REGISTRY_FILE));
        fs::write(&tmp, serde_json::to_string_pretty(&self.registry)?)?;
        fs::rename(&tmp, &path)?;
        tracing::info!("Committed {}", path.display());
        Ok(())
    }

    fn next_perm_id(&mut self) -> String {
        self.registry.next_id += 1;
        format!(
            "{}-{}",
            Local::now().format("%Y%m%d%H%M%S%3f"),
            self.registry.next_id
        )
    }

    fn properties_mut(&mut self, entity: Entity<'_>) -> Result<&mut BTreeMap<String, String>> {
        match entity {
            Entity::Experiment(e) => self
                .registry
                .experiments
                .get_mut(&e.perm_id)
                .map(|r| &mut r.properties)
                .ok_or_else(|| not_found("experiment", &e.identifier)),
            Entity::Sample(s) => self
                .registry
                .samples
                .get_mut(&s.perm_id)
                .map(|r| &mut r.properties)
                .ok_or_else(|| not_found("sample", &s.identifier)),
            Entity::Dataset(d) => self
                .registry
                .datasets
                .get_mut(d)
                .map(|r| &mut r.properties)
                .ok_or_else(|| not_found("dataset", &d.0)),
        }
    }

    fn sample_mut(&mut self, sample: &SampleRef) -> Result<&mut SampleRecord> {
        self.registry
            .samples
            .get_mut(&sample.perm_id)
            .ok_or_else(|| not_found("sample", &sample.identifier))
    }

    fn dataset_mut(&mut self, code: &DatasetCode) -> Result<&mut DatasetRecord> {
        self.registry
            .datasets
            .get_mut(code)
            .ok_or_else(|| not_found("dataset", &code.0))
    }

    fn insert_dataset(&mut self, record: DatasetRecord) -> DatasetCode {
        let code = record.code.clone();
        tracing::debug!("Created dataset {} of type {}", code, record.dataset_type);
        self.registry.datasets.insert(code.clone(), record);
        code
    }

    fn new_dataset(&mut self, dataset_type: &str) -> DatasetRecord {
        DatasetRecord {
            code: DatasetCode(self.next_perm_id()),
            dataset_type: dataset_type.to_string(),
            ..Default::default()
        }
    }

    fn sample_info(record: &SampleRecord) -> SampleInfo {
        SampleInfo {
            sample: record.sample.clone(),
            sample_type: record.sample_type.clone(),
            properties: record.properties.clone(),
        }
    }

    pub fn samples_of_type<'a>(&'a self, sample_type: &'a str) -> impl Iterator<Item = &'a SampleRecord> {
        self.registry
            .samples
            .values()
            .filter(move |s| s.sample_type == sample_type)
    }

    pub fn datasets_of_type<'a>(
        &'a self,
        dataset_type: &'a str,
    ) -> impl Iterator<Item = &'a DatasetRecord> {
        self.registry
            .datasets
            .values()
            .filter(move |d| d.dataset_type == dataset_type)
    }
}

fn not_found(kind: &'static str, id: &str) -> Error {
    Error::EntityNotFound {
        kind,
        id: id.to_string(),
    }
}

impl Transaction for LocalStore {
    fn project_samples_enabled(&self) -> bool {
        self.project_samples
    }

    fn get_experiment(&self, identifier: &str) -> Result<Option<ExperimentRef>> {
        Ok(self
            .registry
            .experiments
            .values()
            .find(|e| e.experiment.identifier == identifier)
            .map(|e| e.experiment.clone()))
    }

    fn create_experiment(&mut self, identifier: &str, experiment_type: &str) -> Result<ExperimentRef> {
        if self.get_experiment(identifier)?.is_some() {
            return Err(Error::EntityExists {
                kind: "experiment",
                id: identifier.to_string(),
            });
        }
        let experiment = ExperimentRef {
            perm_id: self.next_perm_id(),
            identifier: identifier.to_string(),
        };
        self.registry.experiments.insert(
            experiment.perm_id.clone(),
            ExperimentRecord {
                experiment: experiment.clone(),
                experiment_type: experiment_type.to_string(),
                properties: BTreeMap::new(),
            },
        );
        Ok(experiment)
    }

    fn get_sample(&self, identifier: &str) -> Result<Option<SampleRef>> {
        Ok(self
            .registry
            .samples
            .values()
            .find(|s| s.sample.identifier == identifier)
            .map(|s| s.sample.clone()))
    }

    fn create_sample(&mut self, identifier: &str, sample_type: &str) -> Result<SampleRef> {
        if self.get_sample(identifier)?.is_some() {
            return Err(Error::EntityExists {
                kind: "sample",
                id: identifier.to_string(),
            });
        }
        let sample = SampleRef {
            perm_id: self.next_perm_id(),
            identifier: identifier.to_string(),
        };
        self.registry.samples.insert(
            sample.perm_id.clone(),
            SampleRecord {
                sample: sample.clone(),
                sample_type: sample_type.to_string(),
                ..Default::default()
            },
        );
        Ok(sample)
    }

    fn create_sample_with_generated_code(
        &mut self,
        owner: &str,
        sample_type: &str,
    ) -> Result<SampleRef> {
        let owner = owner.trim_end_matches('/');
        let code = format!("S{}", self.registry.next_id + 1);
        self.create_sample(&format!("{}/{}", owner, code), sample_type)
    }

    fn set_sample_experiment(&mut self, sample: &SampleRef, experiment: &ExperimentRef) -> Result<()> {
        if !self.registry.experiments.contains_key(&experiment.perm_id) {
            return Err(not_found("experiment", &experiment.identifier));
        }
        self.sample_mut(sample)?.experiment = Some(experiment.perm_id.clone());
        Ok(())
    }

    fn set_sample_parents(&mut self, sample: &SampleRef, parents: &[SampleRef]) -> Result<()> {
        self.sample_mut(sample)?.parents = parents.iter().map(|p| p.perm_id.clone()).collect();
        Ok(())
    }

    fn property(&self, entity: Entity<'_>, key: &str) -> Result<Option<String>> {
        let properties = match entity {
            Entity::Experiment(e) => self.registry.experiments.get(&e.perm_id).map(|r| &r.properties),
            Entity::Sample(s) => self.registry.samples.get(&s.perm_id).map(|r| &r.properties),
            Entity::Dataset(d) => self.registry.datasets.get(d).map(|r| &r.properties),
        };
        Ok(properties.and_then(|p| p.get(key).cloned()))
    }

    fn set_property(&mut self, entity: Entity<'_>, key: &str, value: &str) -> Result<()> {
        self.properties_mut(entity)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn create_image_dataset(
        &mut self,
        config: &ImageDatasetConfig,
        source: &Path,
    ) -> Result<DatasetCode> {
        let mut record = self.new_dataset(&config.dataset_type);
        record.source = Some(source.to_path_buf());
        record.image_config = Some(serde_json::to_value(config)?);
        Ok(self.insert_dataset(record))
    }

    fn create_contained_dataset(
        &mut self,
        config: &ImageDatasetConfig,
        container: &DatasetCode,
    ) -> Result<DatasetCode> {
        if !self.registry.datasets.contains_key(container) {
            return Err(not_found("dataset", &container.0));
        }
        let mut record = self.new_dataset(&config.dataset_type);
        record.container = Some(container.clone());
        record.image_config = Some(serde_json::to_value(config)?);
        Ok(self.insert_dataset(record))
    }

    fn create_dataset(&mut self, dataset_type: &str) -> Result<DatasetCode> {
        let record = self.new_dataset(dataset_type);
        Ok(self.insert_dataset(record))
    }

    fn set_dataset_sample(&mut self, dataset: &DatasetCode, sample: &SampleRef) -> Result<()> {
        if !self.registry.samples.contains_key(&sample.perm_id) {
            return Err(not_found("sample", &sample.identifier));
        }
        self.dataset_mut(dataset)?.sample = Some(sample.perm_id.clone());
        Ok(())
    }

    fn set_dataset_parents(&mut self, dataset: &DatasetCode, parents: &[DatasetCode]) -> Result<()> {
        self.dataset_mut(dataset)?.parents = parents.to_vec();
        Ok(())
    }

    fn move_file(
        &mut self,
        source: &Path,
        dataset: &DatasetCode,
        destination: Option<&str>,
    ) -> Result<()> {
        let name = match destination {
            Some(d) => d.to_string(),
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| Error::invalid("source", source.display().to_string()))?,
        };
        let relative = format!("{}/{}/{}", DATASETS_DIR, dataset.0, name);
        if !source.exists() {
            return Err(Error::invalid("source", source.display().to_string()));
        }
        let destination = self.root.join(&relative);
        self.dataset_mut(dataset)?.files.push(relative);
        tracing::debug!("Staged move of {} to {}", source.display(), destination.display());
        self.pending.push(PendingMove {
            source: source.to_path_buf(),
            destination,
        });
        Ok(())
    }

    fn get_or_create_tag(&mut self, name: &str, owner: &str) -> Result<TagRef> {
        let tag = TagRef {
            name: name.to_string(),
            owner: owner.to_string(),
        };
        if !self.registry.tags.contains(&tag) {
            tracing::info!("Created tag {} for {}", name, owner);
            self.registry.tags.push(tag.clone());
        }
        Ok(tag)
    }

    fn assign_tag(&mut self, sample: &SampleRef, tag: &TagRef) -> Result<()> {
        let record = self.sample_mut(sample)?;
        if !record.tags.contains(tag) {
            record.tags.push(tag.clone());
        }
        Ok(())
    }
}

impl DatasetQuery for LocalStore {
    fn sample(&self, perm_id: &str) -> Result<Option<SampleInfo>> {
        Ok(self.registry.samples.get(perm_id).map(Self::sample_info))
    }

    fn child_samples(&self, perm_id: &str) -> Result<Vec<SampleInfo>> {
        Ok(self
            .registry
            .samples
            .values()
            .filter(|s| s.parents.iter().any(|p| p == perm_id))
            .map(Self::sample_info)
            .collect())
    }

    fn sample_datasets(&self, perm_id: &str) -> Result<Vec<DatasetInfo>> {
        Ok(self
            .registry
            .datasets
            .values()
            .filter(|d| d.sample.as_deref() == Some(perm_id))
            .map(|d| DatasetInfo {
                code: d.code.clone(),
                dataset_type: d.dataset_type.clone(),
                container: d.container.clone(),
                files: d.files.iter().map(|f| self.root.join(f)).collect(),
            })
            .collect())
    }
}

/// Undo applied moves, last first.
fn revert(applied: &[&PendingMove]) {
    for step in applied.iter().rev() {
        if let Err(e) = files::move_path(&step.destination, &step.source) {
            tracing::warn!(
                "Could not move {} back to {}: {}",
                step.destination.display(),
                step.source.display(),
                e
            );
        }
    }
}

impl Drop for LocalStore {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                "Discarding {} uncommitted file moves in {}",
                self.pending.len(),
                self.root.display()
            );
        }
    }
}
