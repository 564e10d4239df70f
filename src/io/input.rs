use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::extractor::{Extractor, ExtractorConfig, MultiSourceExtractor, SingleSourceExtractor};
use crate::models::{unix_from_dt, AnnotationRun, TimeRange, WaveformRecord};

/// Value the waveform provider writes for missing samples
pub const MISSING_SENTINEL: f64 = -99999.0;

/// How waveform and annotation files are recognized on disk
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// File name suffix of waveform sources
    pub waveform_suffix: String,
    /// File name suffix of annotation runs
    pub annotation_suffix: String,
    /// Sample value replaced by NaN while loading
    pub missing_sentinel: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            waveform_suffix: ".wave.json".to_string(),
            annotation_suffix: ".artf.json".to_string(),
            missing_sentinel: MISSING_SENTINEL,
        }
    }
}

/// A timestamp given either as Unix microseconds or as `dd/mm/yyyy HH:MM:SS.fff`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Micros(i64),
    Text(String),
}

impl TimeValue {
    pub fn to_micros(&self) -> Result<i64> {
        match self {
            TimeValue::Micros(us) => Ok(*us),
            TimeValue::Text(text) => {
                unix_from_dt(text).ok_or_else(|| anyhow!("Invalid timestamp: {:?}", text))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WaveFile {
    waves: Vec<WaveEntry>,
}

/// One stored wave and the index table describing the signals inside it
#[derive(Debug, Deserialize)]
struct WaveEntry {
    name: String,
    samples: Vec<Option<f64>>,
    index: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    start_index: usize,
    start_time: TimeValue,
    length: usize,
    frequency: f64,
}

#[derive(Debug, Deserialize)]
struct ArtfFile {
    annotator: Option<String>,
    waveform_file: String,
    #[serde(default)]
    global: Vec<RangeEntry>,
    #[serde(default)]
    signals: HashMap<String, Vec<RangeEntry>>,
}

#[derive(Debug, Deserialize)]
struct RangeEntry {
    start: TimeValue,
    end: TimeValue,
}

impl RangeEntry {
    fn to_range(&self) -> Result<TimeRange> {
        Ok(TimeRange::new(self.start.to_micros()?, self.end.to_micros()?))
    }
}

/// Parse a waveform source JSON document into records
///
/// Every index entry of a wave becomes one record over the wave's shared
/// samples: the first keeps the wave name, later ones are `name_0`, `name_1`,
/// and so on. Null samples and the sentinel become NaN.
pub fn parse_waveform_json(
    json: &str,
    source_id: &str,
    config: &DiscoveryConfig,
) -> Result<Vec<WaveformRecord>> {
    let file: WaveFile = serde_json::from_str(json).context("Failed to parse waveform JSON")?;

    let mut records = Vec::new();
    for wave in file.waves {
        let storage: Arc<[f64]> = wave
            .samples
            .iter()
            .map(|v| match v {
                Some(value) if *value != config.missing_sentinel => *value,
                _ => f64::NAN,
            })
            .collect::<Vec<f64>>()
            .into();

        for (i, entry) in wave.index.iter().enumerate() {
            let name = if i == 0 {
                wave.name.clone()
            } else {
                format!("{}_{}", wave.name, i - 1)
            };
            let start_us = entry
                .start_time
                .to_micros()
                .with_context(|| format!("Bad start time for wave {}", name))?;
            let record = WaveformRecord::from_shared(
                source_id,
                &name,
                start_us,
                entry.frequency,
                storage.clone(),
                entry.start_index,
                entry.length,
            );
            if record.sample_count() < entry.length {
                warn!(
                    "{} ({}): index asks for {} samples from {} but only {} are stored, truncated to {}",
                    name,
                    source_id,
                    entry.length,
                    entry.start_index,
                    storage.len(),
                    record.sample_count()
                );
            }
            records.push(record);
        }
    }

    Ok(records)
}

/// Parse a waveform source file; the path becomes the source identifier
pub fn parse_waveform_file(path: &Path, config: &DiscoveryConfig) -> Result<Vec<WaveformRecord>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    parse_waveform_json(&content, &path.to_string_lossy(), config)
}

/// Parse an annotation run JSON document
pub fn parse_annotation_json(json: &str) -> Result<AnnotationRun> {
    let file: ArtfFile = serde_json::from_str(json).context("Failed to parse annotation JSON")?;

    let mut run = AnnotationRun::new(file.annotator, file.waveform_file);
    run.global = file
        .global
        .iter()
        .map(RangeEntry::to_range)
        .collect::<Result<_>>()?;
    for (signal, entries) in &file.signals {
        for entry in entries {
            run.add_signal_range(signal, entry.to_range()?);
        }
    }
    Ok(run)
}

pub fn parse_annotation_file(path: &Path) -> Result<AnnotationRun> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    parse_annotation_json(&content).with_context(|| format!("Invalid annotation file: {:?}", path))
}

/// Recursively find files ending in `suffix`, skipping `__`-prefixed paths
pub fn discover_files(root: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.strip_prefix(root)
                .unwrap_or(path)
                .components()
                .all(|c| !c.as_os_str().to_string_lossy().starts_with("__"))
        })
        .filter(|path| path.to_string_lossy().ends_with(suffix))
        .collect();
    files.sort();
    files
}

/// Load every annotation run under `root`; unreadable files are skipped
pub fn load_annotation_runs(root: &Path, config: &DiscoveryConfig) -> Vec<AnnotationRun> {
    discover_files(root, &config.annotation_suffix)
        .iter()
        .filter_map(|path| match parse_annotation_file(path) {
            Ok(run) => {
                debug!("Loaded annotation run from {:?}", path);
                Some(run)
            }
            Err(e) => {
                warn!("Skipping annotation file {:?}: {:#}", path, e);
                None
            }
        })
        .collect()
}

/// Open a single waveform source file
pub fn load_source(
    path: &Path,
    extractor_config: &ExtractorConfig,
    discovery: &DiscoveryConfig,
) -> Result<SingleSourceExtractor> {
    let records = parse_waveform_file(path, discovery)?;
    Ok(SingleSourceExtractor::new(
        path.to_string_lossy(),
        records,
        extractor_config.clone(),
    ))
}

/// Open every waveform source under a folder
pub fn load_folder(
    root: &Path,
    extractor_config: &ExtractorConfig,
    discovery: &DiscoveryConfig,
) -> Result<MultiSourceExtractor> {
    let mut multi = MultiSourceExtractor::default();
    for path in discover_files(root, &discovery.waveform_suffix) {
        match load_source(&path, extractor_config, discovery) {
            Ok(source) => multi.push(source),
            Err(e) => warn!("Skipping waveform file {:?}: {:#}", path, e),
        }
    }
    info!("Loaded {} waveform sources from {:?}", multi.len(), root);
    Ok(multi)
}

/// Open a file or folder, apply discovered annotations, and return it as an extractor
///
/// Annotations are searched under `annotations` when given, otherwise next to
/// the input (the folder itself, or the file's parent directory).
pub fn open_extractor(
    input: &Path,
    annotations: Option<&Path>,
    extractor_config: &ExtractorConfig,
    discovery: &DiscoveryConfig,
) -> Result<Box<dyn Extractor>> {
    if input.is_dir() {
        let mut multi = load_folder(input, extractor_config, discovery)?;
        let runs = load_annotation_runs(annotations.unwrap_or(input), discovery);
        multi.auto_annotate(&runs);
        Ok(Box::new(multi))
    } else {
        let mut single = load_source(input, extractor_config, discovery)?;
        let search_root = annotations
            .map(Path::to_path_buf)
            .or_else(|| input.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let runs = load_annotation_runs(&search_root, discovery);
        single.auto_annotate(&runs);
        Ok(Box::new(single))
    }
}
