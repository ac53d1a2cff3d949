#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use microscopy_dropbox::error::{Error, Result};
use microscopy_dropbox::local_store::LocalStore;
use microscopy_dropbox::manifest::INDEX_FILE;
use microscopy_dropbox::processor::{RegistrationProcessor, RegistrationSummary};
use microscopy_dropbox::reader::{Dimensions, PixelFormatReader, ReaderFactory};
use microscopy_dropbox::settings::Settings;
use tempfile::TempDir;

pub const USER: &str = "alice";

/// In-memory reader: every file it opens has the same series.
#[derive(Clone, Default)]
pub struct FakeReaders {
    /// Channel names per series.
    pub series: Vec<Vec<&'static str>>,
    pub fail: bool,
}

impl FakeReaders {
    pub fn with_series(series: Vec<Vec<&'static str>>) -> Self {
        Self {
            series,
            fail: false,
        }
    }

    /// Any attempt to read pixel metadata fails.
    pub fn failing() -> Self {
        Self {
            series: Vec::new(),
            fail: true,
        }
    }
}

struct FakeReader {
    series: Vec<Vec<&'static str>>,
    current: usize,
}

impl PixelFormatReader for FakeReader {
    fn series_count(&self) -> usize {
        self.series.len()
    }

    fn set_series(&mut self, series: usize) -> Result<()> {
        self.current = series;
        Ok(())
    }

    fn dimensions(&self) -> Result<Dimensions> {
        Ok(Dimensions {
            x: 16,
            y: 16,
            z: 1,
            c: self.series[self.current].len(),
            t: 1,
        })
    }

    fn series_name(&self) -> Result<Option<String>> {
        Ok(Some(format!("Series {}", self.current)))
    }

    fn channel_name(&self, channel: usize) -> Result<Option<String>> {
        Ok(self.series[self.current]
            .get(channel)
            .map(|n| n.to_string()))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl ReaderFactory for FakeReaders {
    fn open(&self, path: &Path) -> Result<Box<dyn PixelFormatReader>> {
        if self.fail {
            return Err(Error::reader(path, "fake reader refuses to open files"));
        }
        Ok(Box::new(FakeReader {
            series: self.series.clone(),
            current: 0,
        }))
    }
}

/// A scratch area with an incoming folder (one user subfolder) and a store.
pub struct Workspace {
    dir: TempDir,
    manifests: Vec<String>,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("incoming").join(USER)).unwrap();
        Self {
            dir,
            manifests: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn incoming(&self) -> PathBuf {
        self.dir.path().join("incoming")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    /// Write `contents` at `relative` below the incoming folder.
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.incoming().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    /// Add a manifest to the user folder and list it in the index.
    pub fn manifest(&mut self, name: &str, xml: &str) {
        let relative = format!("{}/{}", USER, name);
        self.write(&relative, xml);
        self.manifests.push(relative);
        self.write(
            &format!("{}/{}", USER, INDEX_FILE),
            &self.manifests.join("\n"),
        );
    }

    pub fn open_store(&self) -> LocalStore {
        LocalStore::open(&self.store_dir(), true).unwrap()
    }

    /// Register the incoming folder into the store and commit.
    pub fn register(
        &self,
        readers: &dyn ReaderFactory,
        settings: &Settings,
    ) -> Result<(LocalStore, RegistrationSummary)> {
        let mut store = LocalStore::open(&self.store_dir(), settings.project_samples_enabled)?;
        let summary = {
            let mut processor =
                RegistrationProcessor::new(&mut store, readers, settings, &self.incoming());
            processor.run()?
        };
        store.commit()?;
        Ok((store, summary))
    }
}

/// A version 2 manifest with one experiment node around `body`.
pub fn manifest_xml(experiment: &str, attributes: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<obitXML version="2" userName="{user}" machineName="SP8">
  <Experiment openBISIdentifier="{experiment}" {attributes}>
    {body}
  </Experiment>
</obitXML>"#,
        user = USER,
        experiment = experiment,
        attributes = attributes,
        body = body
    )
}
