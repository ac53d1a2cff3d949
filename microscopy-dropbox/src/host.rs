//! Contract with the host that owns experiments, samples and datasets.
//!
//! Registration only ever talks to a [`Transaction`]; export only reads
//! through a [`DatasetQuery`]. Both are implemented by
//! [`LocalStore`](crate::local_store::LocalStore).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::dataset_config::ImageDatasetConfig;
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExperimentRef {
    pub perm_id: String,
    pub identifier: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleRef {
    pub perm_id: String,
    pub identifier: String,
}

impl SampleRef {
    /// Last identifier component.
    pub fn code(&self) -> &str {
        last_component(&self.identifier)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetCode(pub String);

impl fmt::Display for DatasetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagRef {
    pub name: String,
    pub owner: String,
}

/// Anything that carries properties.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Experiment(&'a ExperimentRef),
    Sample(&'a SampleRef),
    Dataset(&'a DatasetCode),
}

pub fn last_component(identifier: &str) -> &str {
    identifier.rsplit('/').next().unwrap_or(identifier)
}

/// Create/assign/move operations consumed by registration.
///
/// Nothing is visible to others until the host commits.
pub trait Transaction {
    fn project_samples_enabled(&self) -> bool;

    fn get_experiment(&self, identifier: &str) -> Result<Option<ExperimentRef>>;
    fn create_experiment(&mut self, identifier: &str, experiment_type: &str) -> Result<ExperimentRef>;

    fn get_sample(&self, identifier: &str) -> Result<Option<SampleRef>>;
    fn create_sample(&mut self, identifier: &str, sample_type: &str) -> Result<SampleRef>;
    /// `owner` is `/SPACE` or `/SPACE/PROJECT`.
    fn create_sample_with_generated_code(
        &mut self,
        owner: &str,
        sample_type: &str,
    ) -> Result<SampleRef>;
    fn set_sample_experiment(&mut self, sample: &SampleRef, experiment: &ExperimentRef) -> Result<()>;
    fn set_sample_parents(&mut self, sample: &SampleRef, parents: &[SampleRef]) -> Result<()>;

    fn property(&self, entity: Entity<'_>, key: &str) -> Result<Option<String>>;
    fn set_property(&mut self, entity: Entity<'_>, key: &str, value: &str) -> Result<()>;

    /// Image dataset bound to the file or folder at `source`.
    fn create_image_dataset(
        &mut self,
        config: &ImageDatasetConfig,
        source: &Path,
    ) -> Result<DatasetCode>;
    /// Image dataset sharing the storage of `container`.
    fn create_contained_dataset(
        &mut self,
        config: &ImageDatasetConfig,
        container: &DatasetCode,
    ) -> Result<DatasetCode>;
    fn create_dataset(&mut self, dataset_type: &str) -> Result<DatasetCode>;
    fn set_dataset_sample(&mut self, dataset: &DatasetCode, sample: &SampleRef) -> Result<()>;
    fn set_dataset_parents(&mut self, dataset: &DatasetCode, parents: &[DatasetCode]) -> Result<()>;

    /// Move `source` into the storage of `dataset`, at `destination` when
    /// given, otherwise under its own file name.
    fn move_file(
        &mut self,
        source: &Path,
        dataset: &DatasetCode,
        destination: Option<&str>,
    ) -> Result<()>;

    fn get_or_create_tag(&mut self, name: &str, owner: &str) -> Result<TagRef>;
    fn assign_tag(&mut self, sample: &SampleRef, tag: &TagRef) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleInfo {
    pub sample: SampleRef,
    pub sample_type: String,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub code: DatasetCode,
    pub dataset_type: String,
    pub container: Option<DatasetCode>,
    /// Absolute paths of the stored files and folders.
    pub files: Vec<PathBuf>,
}

/// Read-only lookups used by export.
pub trait DatasetQuery {
    fn sample(&self, perm_id: &str) -> Result<Option<SampleInfo>>;
    fn child_samples(&self, perm_id: &str) -> Result<Vec<SampleInfo>>;
    fn sample_datasets(&self, perm_id: &str) -> Result<Vec<DatasetInfo>>;
}
