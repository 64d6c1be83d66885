//! Plugin archive rewrite
//!
//! Entries are read and written on the calling thread; only the class
//! transforms run on the pool. The output keeps the input entry order,
//! minus signature files, plus the bridge classes.

use crate::bundle::{self, BridgeNames};
use crate::chain::{self, ClassStatus, PatchContext};
use crate::config::PatcherConfig;
use crate::context::ArchiveIndex;
use crate::error::{ConfigError, PatchError};
use crate::manifest::{self, PLUGIN_YML};
use crate::pool::TransformPool;
use crate::progress::{NoopProgress, ProgressListener};
use crate::stats::Statistics;
use phantom_classfile::ClassFile;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

const SIGNATURE_SUFFIXES: [&str; 3] = [".SF", ".DSA", ".RSA"];

/// One archive entry held in memory
#[derive(Debug)]
struct ArchiveEntry {
    name: String,
    data: Vec<u8>,
    is_dir: bool,
    stored: bool,
}

impl ArchiveEntry {
    fn is_class(&self) -> bool {
        !self.is_dir && self.name.ends_with(".class")
    }
}

/// Whether `name` is a jar signature file
fn is_signature(name: &str) -> bool {
    name.strip_prefix("META-INF/").is_some_and(|rest| {
        !rest.contains('/') && SIGNATURE_SUFFIXES.iter().any(|suffix| rest.ends_with(suffix))
    })
}

/// Rewrites plugin archives
pub struct Patcher {
    config: PatcherConfig,
    progress: Box<dyn ProgressListener + Send + Sync>,
}

impl std::fmt::Debug for Patcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Patcher").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Patcher {
    /// Create a patcher with a validated configuration
    pub fn new(config: PatcherConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            progress: Box::new(NoopProgress),
        })
    }

    /// Report progress to `listener`
    pub fn with_progress(mut self, listener: impl ProgressListener + Send + Sync + 'static) -> Self {
        self.progress = Box::new(listener);
        self
    }

    /// The active configuration
    pub fn config(&self) -> &PatcherConfig {
        &self.config
    }

    /// Rewrite the plugin at `source` into `destination`. Nothing is
    /// written at `destination` unless the whole rewrite succeeds.
    pub fn patch_plugin(&self, source: &Path, destination: &Path) -> Result<Statistics, PatchError> {
        self.progress.on_patch_start(source, destination);
        let start = Instant::now();
        let mut stats = Statistics::default();
        let result = self.rewrite(source, destination, &mut stats);
        stats.duration_millis = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(()) => {
                self.progress.on_complete(stats.duration_millis, &stats, None);
                Ok(stats)
            }
            Err(e) => {
                stats.error = Some(e.to_string());
                self.progress.on_complete(stats.duration_millis, &stats, Some(&e));
                Err(e)
            }
        }
    }

    fn rewrite(&self, source: &Path, destination: &Path, stats: &mut Statistics) -> Result<(), PatchError> {
        let mut entries = read_entries(source)?;

        let yml = entries
            .iter()
            .find(|e| e.name == PLUGIN_YML)
            .and_then(|e| match std::str::from_utf8(&e.data) {
                Ok(yml) => Some(yml.to_string()),
                Err(err) => {
                    warn!(error = %err, "plugin.yml is not UTF-8, copying it unchanged");
                    None
                }
            });
        let package = match &self.config.bridge_package {
            Some(package) => package.clone(),
            None => {
                let name = yml.as_deref().and_then(manifest::plugin_name);
                if name.is_none() {
                    warn!(source = %source.display(), "No plugin name in plugin.yml, using the fallback bridge package");
                }
                manifest::bridge_package(name.as_deref())
            }
        };
        info!(package = %package, "Relocating bridge classes");
        let names = BridgeNames::new(&package);

        let positions: Vec<usize> = (0..entries.len()).filter(|&i| entries[i].is_class()).collect();
        let total = positions.len();
        stats.classes_scanned = total;
        self.progress
            .on_progress_update(0, &format!("Transforming {} classes...", total));

        let pool = TransformPool::new(self.config.workers);
        let index = self.build_index(&pool, &entries, &positions)?;
        let ctx = PatchContext::new(&self.config, names, index);

        let jobs: Vec<(String, Vec<u8>)> = positions
            .iter()
            .map(|&i| (entries[i].name.clone(), std::mem::take(&mut entries[i].data)))
            .collect();
        let mut done = 0;
        let outcomes = pool.run(
            jobs,
            |(name, bytes)| chain::transform(&name, bytes, &ctx),
            |job, _| {
                done += 1;
                self.progress
                    .on_class_transform(&entries[positions[job]].name, done, total);
                let percent = u8::try_from(done * 50 / total).unwrap_or(50);
                self.progress.on_progress_update(percent, "Transforming classes...");
            },
        )?;

        let mut diagnostics = 0;
        for (&i, outcome) in positions.iter().zip(outcomes) {
            match outcome.status {
                ClassStatus::Transformed => stats.classes_transformed += 1,
                ClassStatus::Unchanged | ClassStatus::Failed => stats.classes_skipped += 1,
            }
            diagnostics += outcome.diagnostics.len();
            entries[i].data = outcome.bytes;
        }
        info!(
            transformed = stats.classes_transformed,
            skipped = stats.classes_skipped,
            diagnostics,
            "Transformed classes"
        );

        self.progress.on_progress_update(50, "Updating archive metadata...");
        if let Some(yml) = yml {
            if let Some(entry) = entries.iter_mut().find(|e| e.name == PLUGIN_YML) {
                entry.data = manifest::mark_supported(&yml).into_bytes();
            }
        }

        self.progress.on_progress_update(90, "Bundling runtime classes...");
        for (name, data) in bundle::generate(&ctx.names, &self.config)? {
            match entries.iter_mut().find(|e| e.name == name) {
                Some(existing) => {
                    debug!(entry = %name, "Replacing existing bridge class");
                    existing.data = data;
                    existing.is_dir = false;
                }
                None => entries.push(ArchiveEntry {
                    name,
                    data,
                    is_dir: false,
                    stored: false,
                }),
            }
        }

        self.progress.on_progress_update(100, "Finalizing archive...");
        write_entries(destination, &entries)
    }

    /// Index every class of the archive. Unparseable classes are left out;
    /// their transform fails later and keeps them as they are.
    fn build_index(
        &self,
        pool: &TransformPool,
        entries: &[ArchiveEntry],
        positions: &[usize],
    ) -> Result<ArchiveIndex, PatchError> {
        let jobs: Vec<&[u8]> = positions.iter().map(|&i| entries[i].data.as_slice()).collect();
        let parsed = pool.run(jobs, |bytes| ClassFile::parse(bytes).ok(), |_, _| {})?;
        let mut index = ArchiveIndex::new();
        for class in parsed.iter().flatten() {
            if let Err(e) = index.insert(class) {
                debug!(error = %e, "Class left out of the archive index");
            }
        }
        debug!(classes = index.len(), "Indexed archive");
        Ok(index)
    }
}

fn read_entries(source: &Path) -> Result<Vec<ArchiveEntry>, PatchError> {
    let mut archive = ZipArchive::new(File::open(source)?)?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().to_string();
        if is_signature(&name) {
            debug!(entry = %name, "Dropping signature file");
            continue;
        }
        let mut data = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
        file.read_to_end(&mut data)?;
        entries.push(ArchiveEntry {
            is_dir: file.is_dir(),
            stored: file.compression() == CompressionMethod::Stored,
            name,
            data,
        });
    }
    Ok(entries)
}

/// Write through a temporary file next to `destination`, renamed into
/// place once complete
fn write_entries(destination: &Path, entries: &[ArchiveEntry]) -> Result<(), PatchError> {
    let dir = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut zip = ZipWriter::new(NamedTempFile::new_in(dir)?);
    for entry in entries {
        let method = if entry.stored {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        let options = SimpleFileOptions::default()
            .compression_method(method)
            .last_modified_time(DateTime::default());
        if entry.is_dir {
            zip.add_directory(entry.name.as_str(), options)?;
        } else {
            zip.start_file(entry.name.as_str(), options)?;
            zip.write_all(&entry.data)?;
        }
    }
    let temp = zip.finish()?;
    temp.persist(destination).map_err(|e| PatchError::Io(e.error))?;
    Ok(())
}

/// Read `plugin.yml` from an archive
fn read_manifest(source: &Path) -> Result<Option<String>, PatchError> {
    let mut archive = ZipArchive::new(File::open(source)?)?;
    let mut file = match archive.by_name(PLUGIN_YML) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut yml = String::new();
    file.read_to_string(&mut yml)?;
    Ok(Some(yml))
}

/// The plugin name declared by the archive at `source`
pub fn plugin_name(source: &Path) -> Result<Option<String>, PatchError> {
    Ok(read_manifest(source)?.as_deref().and_then(manifest::plugin_name))
}

/// Whether the archive at `source` already declares Folia support
pub fn is_folia_supported(source: &Path) -> Result<bool, PatchError> {
    Ok(read_manifest(source)?.is_some_and(|yml| manifest::is_folia_supported(&yml)))
}
