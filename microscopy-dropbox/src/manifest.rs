//! Experiment manifests (`obitXML`) and the `data_structure.ois` index.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::pattern::CompositeFileType;
use crate::series::{attributes_of, tag_name, SeriesAttributes, SERIES_TAG};

pub const ROOT_TAG: &str = "obitXML";
pub const EXPERIMENT_TAG: &str = "Experiment";
pub const FILE_TAG: &str = "MicroscopyFile";
pub const COMPOSITE_TAG: &str = "MicroscopyCompositeFile";
pub const COMPOSITE_SERIES_TAG: &str = "MicroscopyCompositeFileSeries";
pub const INDEX_FILE: &str = "data_structure.ois";
pub const MIN_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub version: u32,
    pub user_name: String,
    pub machine_name: String,
    pub experiments: Vec<ExperimentNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentNode {
    pub openbis_identifier: String,
    /// Collection the experiment is filed under; the experiment identifier
    /// when absent.
    pub collection_identifier: Option<String>,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Paths relative to the incoming folder.
    pub attachments: Vec<String>,
    pub entries: Vec<FileEntry>,
}

impl ExperimentNode {
    pub fn collection(&self) -> &str {
        self.collection_identifier
            .as_deref()
            .unwrap_or(&self.openbis_identifier)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleFile {
    pub relative_file_name: String,
    pub description: String,
    pub dataset_size: Option<String>,
    /// Pre-parsed series; empty when the file still needs extraction.
    pub series: Vec<SeriesAttributes>,
}

/// A folder of files that together form one acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeFile {
    pub file_type: CompositeFileType,
    pub relative_folder: String,
    pub series_indices: Vec<u32>,
    pub name: String,
    pub description: String,
    pub dataset_size: Option<String>,
    /// `series[i]` describes series `series_indices[i]`.
    pub series: Vec<SeriesAttributes>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileEntry {
    Single(SingleFile),
    Composite(CompositeFile),
}

/// Minimal element tree; text content is not part of the format.
#[derive(Debug, Default)]
struct Element {
    tag: String,
    attributes: BTreeMap<String, String>,
    children: Vec<Element>,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn required(&self, name: &str) -> Result<&str> {
        self.attr(name).ok_or_else(|| Error::missing(&self.tag, name))
    }

    fn optional(&self, name: &str) -> String {
        self.attr(name).unwrap_or_default().to_string()
    }
}

fn parse_tree(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut stack: Vec<Element> = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(Element {
                tag: tag_name(&e),
                attributes: attributes_of(&e)?,
                children: Vec::new(),
            }),
            Event::Empty(e) => {
                let element = Element {
                    tag: tag_name(&e),
                    attributes: attributes_of(&e)?,
                    children: Vec::new(),
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| Error::UnexpectedTag {
                    expected: ROOT_TAG.to_string(),
                    found: "closing tag".to_string(),
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Event::Eof => {
                return Err(Error::UnexpectedTag {
                    expected: ROOT_TAG.to_string(),
                    found: "end of file".to_string(),
                })
            }
            _ => {}
        }
    }
}

fn unexpected(expected: &str, found: &str) -> Error {
    tracing::error!("Expected {} node, found {}", expected, found);
    Error::UnexpectedTag {
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

fn split_list(raw: Option<&str>, separator: char) -> Vec<String> {
    raw.unwrap_or_default()
        .split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn series_children(element: &Element, tags: &[&str]) -> Result<Vec<SeriesAttributes>> {
    element
        .children
        .iter()
        .map(|child| {
            if tags.contains(&child.tag.as_str()) {
                Ok(SeriesAttributes::from(child.attributes.clone()))
            } else {
                Err(unexpected(&tags.join(" or "), &child.tag))
            }
        })
        .collect()
}

fn parse_series_indices(raw: &str) -> Result<Vec<u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| Error::invalid("seriesIndices", raw)))
        .collect()
}

fn file_entry(element: &Element) -> Result<FileEntry> {
    match element.tag.as_str() {
        FILE_TAG => Ok(FileEntry::Single(SingleFile {
            relative_file_name: element.required("relativeFileName")?.to_string(),
            description: element.optional("description"),
            dataset_size: element.attr("datasetSize").map(str::to_string),
            series: series_children(element, &[SERIES_TAG])?,
        })),
        COMPOSITE_TAG => {
            let file_type: CompositeFileType = element.required("compositeFileType")?.parse()?;
            let series_indices = parse_series_indices(element.required("seriesIndices")?)?;
            let series = series_children(element, &[SERIES_TAG, COMPOSITE_SERIES_TAG])?;
            if series.len() != series_indices.len() {
                let relative_folder = element.optional("relativeFolder");
                tracing::error!(
                    "Composite {} declares {} series indices but carries {} series",
                    relative_folder,
                    series_indices.len(),
                    series.len()
                );
                return Err(Error::SeriesCountMismatch {
                    context: relative_folder,
                    declared: series_indices.len(),
                    found: series.len(),
                });
            }
            Ok(FileEntry::Composite(CompositeFile {
                file_type,
                relative_folder: element.required("relativeFolder")?.to_string(),
                series_indices,
                name: element.optional("name"),
                description: element.optional("description"),
                dataset_size: element.attr("datasetSize").map(str::to_string),
                series,
            }))
        }
        other => Err(unexpected(&format!("{} or {}", FILE_TAG, COMPOSITE_TAG), other)),
    }
}

fn experiment_node(element: &Element) -> Result<ExperimentNode> {
    if element.tag != EXPERIMENT_TAG {
        return Err(unexpected(EXPERIMENT_TAG, &element.tag));
    }
    Ok(ExperimentNode {
        openbis_identifier: element.required("openBISIdentifier")?.to_string(),
        collection_identifier: element
            .attr("openBISCollectionIdentifier")
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        name: element.optional("name"),
        description: element.optional("description"),
        tags: split_list(element.attr("tags"), ','),
        attachments: split_list(element.attr("attachments"), ';'),
        entries: element
            .children
            .iter()
            .map(file_entry)
            .collect::<Result<_>>()?,
    })
}

impl Manifest {
    pub fn parse(xml: &str) -> Result<Self> {
        let root = parse_tree(xml)?;
        if root.tag != ROOT_TAG {
            return Err(unexpected(ROOT_TAG, &root.tag));
        }
        let version = match root.attr("version") {
            None => 0,
            Some(v) => v.trim().parse().map_err(|_| Error::invalid("version", v))?,
        };
        if version < MIN_VERSION {
            tracing::error!("Manifest version {} is obsolete", version);
            return Err(Error::ObsoleteManifest {
                found: version,
                required: MIN_VERSION,
            });
        }
        Ok(Self {
            version,
            user_name: root.optional("userName"),
            machine_name: root.optional("machineName"),
            experiments: root
                .children
                .iter()
                .map(experiment_node)
                .collect::<Result<_>>()?,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let xml = fs::read_to_string(path)?;
        Self::parse(&xml)
    }
}

/// Manifest paths listed in an index file, resolved against `incoming`.
pub fn read_index(index: &Path, incoming: &Path) -> Result<Vec<PathBuf>> {
    let text = fs::read_to_string(index)?;
    Ok(text
        .lines()
        .map(|line| line.trim_end_matches(['\r', '\n']))
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let path = incoming.join(line);
            tracing::info!("Found manifest {}", path.display());
            path
        })
        .collect())
}
