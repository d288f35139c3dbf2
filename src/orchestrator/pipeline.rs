//! Whole-run orchestration
//!
//! Validates the configuration once, runs every dataset strictly one after
//! another, then merges all output shards and exports the result. Nothing is
//! spawned before validation passes.

use super::DatasetOrchestrator;
use crate::config::PipelineConfig;
use crate::encoder::EncoderBackend;
use crate::error::{PipelineError, Result, ResultExt};
use crate::merge::{DatasetInfo, DatasetPublisher, LocalExporter, MergedDataset};
use crate::source::SourceLoader;
use crate::types::DatasetStats;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of a complete run
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    /// Per-dataset statistics, in processing order
    pub datasets: Vec<DatasetStats>,
    pub merged_rows: u64,
    pub merged_files: usize,
    pub columns: Vec<String>,
    /// Metadata of the local export, when one was written
    pub local_export: Option<DatasetInfo>,
    pub published_to: Option<String>,
    pub elapsed: Duration,
}

/// The top-level pipeline
pub struct Pipeline {
    config: PipelineConfig,
    loader: Box<dyn SourceLoader>,
    backend: Arc<dyn EncoderBackend>,
    publisher: Option<Box<dyn DatasetPublisher>>,
    interrupt: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        loader: Box<dyn SourceLoader>,
        backend: Box<dyn EncoderBackend>,
    ) -> Self {
        Self {
            config,
            loader,
            backend: Arc::from(backend),
            publisher: None,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builder method to register the remote registry client
    pub fn with_publisher(mut self, publisher: Box<dyn DatasetPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Builder method to share an externally owned interrupt flag
    pub fn with_interrupt_flag(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Flag that stops the run when raised
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Check everything that can be checked before any thread starts
    pub fn validate(&self) -> Result<()> {
        self.config.base_settings.validate()?;
        self.config.validate_datasets()?;

        let devices = self.backend.device_count();
        if devices == 0 {
            return Err(PipelineError::NoDevices);
        }

        let save = &self.config.save_settings;
        if let Some(local) = &save.local {
            if same_location(local, &self.config.base_settings.out_dir) {
                return Err(PipelineError::Config(
                    "save_settings.local must differ from out_dir".to_string(),
                ));
            }
        }
        if let Some(remote) = &save.remote {
            if self.publisher.is_none() {
                return Err(PipelineError::Config(format!(
                    "remote target '{}' is configured but no publisher is available",
                    remote
                )));
            }
        }

        tracing::info!(
            "Configuration valid: {} datasets, {} {} devices",
            self.config.datasets.len(),
            devices,
            self.backend.name()
        );
        Ok(())
    }

    /// Run every dataset, then merge and export
    pub fn run(&self) -> Result<PipelineSummary> {
        let started = Instant::now();
        self.validate()?;

        let settings = &self.config.base_settings;
        std::fs::create_dir_all(&settings.out_dir)
            .with_context(|| format!("creating {}", settings.out_dir.display()))?;

        let orchestrator = DatasetOrchestrator::new(
            settings.clone(),
            self.backend.clone(),
            self.interrupt.clone(),
        );

        let total = self.config.datasets.len();
        let mut datasets = Vec::with_capacity(total);
        for (idx, dataset) in self.config.datasets.iter().enumerate() {
            if self.interrupt.load(Ordering::SeqCst) {
                return Err(PipelineError::Interrupted);
            }
            tracing::info!("Dataset {}/{}: {}", idx + 1, total, dataset.describe());

            let source = self
                .loader
                .load(dataset, settings)
                .with_context(|| format!("loading {}", dataset.name))?;
            let stats = orchestrator.run(dataset, source.as_ref())?;
            datasets.push(stats);
        }

        let merged = MergedDataset::from_dir(&settings.out_dir)?;
        let local_export = self.export_local(&merged)?;
        let published_to = self.publish(&merged)?;

        let summary = PipelineSummary {
            datasets,
            merged_rows: merged.num_rows(),
            merged_files: merged.files().len(),
            columns: merged.columns().iter().cloned().collect(),
            local_export,
            published_to,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Pipeline completed in {:.1?}: {} rows from {} files",
            summary.elapsed,
            summary.merged_rows,
            summary.merged_files
        );
        Ok(summary)
    }

    fn export_local(&self, merged: &MergedDataset) -> Result<Option<DatasetInfo>> {
        let Some(dir) = &self.config.save_settings.local else {
            return Ok(None);
        };
        let settings = &self.config.base_settings;
        let info = LocalExporter::new(dir)
            .with_compression(settings.gzip_level, settings.buffer_size)
            .export(merged)
            .map_err(|e| PipelineError::Export(e.to_string()))?;
        Ok(Some(info))
    }

    fn publish(&self, merged: &MergedDataset) -> Result<Option<String>> {
        let save = &self.config.save_settings;
        let (Some(remote), Some(publisher)) = (&save.remote, &self.publisher) else {
            if !save.has_targets() {
                tracing::info!("No save targets configured; shards stay in the output directory");
            }
            return Ok(None);
        };

        tracing::info!("Publishing {} rows to {}", merged.num_rows(), remote);
        publisher
            .publish(merged, remote, save.private)
            .map_err(|e| PipelineError::Export(format!("publishing to {}: {}", remote, e)))?;
        Ok(Some(remote.clone()))
    }
}

/// Whether two paths name the same directory, spelled differently or not
fn same_location(a: &Path, b: &Path) -> bool {
    if let (Ok(a), Ok(b)) = (a.canonicalize(), b.canonicalize()) {
        return a == b;
    }
    normalize(a) == normalize(b)
}

/// Absolute form of `path` with `.` and `..` resolved lexically
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    let mut normal = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other),
        }
    }
    normal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BaseSettings, DatasetConfig};
    use crate::encoder::SimulatedBackend;
    use crate::merge::export::MockDatasetPublisher;
    use crate::source::{DataSource, MemorySource, SourceRecord};
    use serde_json::json;

    struct FixedLoader(usize);

    impl SourceLoader for FixedLoader {
        fn load(
            &self,
            dataset: &DatasetConfig,
            _settings: &crate::config::BaseSettings,
        ) -> Result<Arc<dyn DataSource>> {
            let source: MemorySource = (0..self.0)
                .map(|i| {
                    SourceRecord::new()
                        .with_field("text", format!("{} {}", dataset.name, i))
                        .with_field("audio", json!([0.1, 0.2, 0.3]))
                })
                .collect();
            Ok(Arc::new(source))
        }
    }

    fn config(dir: &std::path::Path) -> PipelineConfig {
        let mut settings = BaseSettings::new(dir.join("out"));
        settings.num_readers = 2;
        settings.lines_per_file = 4;
        settings.error_backoff_ms = 0;
        let mut config = PipelineConfig::new(settings);
        config.add_dataset(DatasetConfig::new("org/a", "text", "audio").with_constant("lang", "en"));
        config.add_dataset(DatasetConfig::new("org/b", "text", "audio").with_constant("lang", "de"));
        config
    }

    fn pipeline(config: PipelineConfig, devices: usize) -> Pipeline {
        Pipeline::new(
            config,
            Box::new(FixedLoader(6)),
            Box::new(SimulatedBackend::new(devices, 2)),
        )
    }

    #[test]
    fn test_run_merges_all_datasets() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.save_settings.local = Some(dir.path().join("final"));

        let summary = pipeline(config, 1).run().unwrap();
        assert_eq!(summary.datasets.len(), 2);
        assert_eq!(summary.merged_rows, 12);
        assert_eq!(summary.merged_files, 4);
        assert!(summary.columns.contains(&"lang".to_string()));
        assert_eq!(summary.local_export.unwrap().num_rows, 12);
    }

    #[test]
    fn test_no_devices_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let err = pipeline(config(dir.path()), 0).run().unwrap_err();
        assert!(matches!(err, PipelineError::NoDevices));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_remote_without_publisher_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.save_settings.remote = Some("org/encoded".to_string());
        assert!(pipeline(config, 1).validate().is_err());
    }

    #[test]
    fn test_publisher_receives_merged_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.save_settings.remote = Some("org/encoded".to_string());

        let mut publisher = MockDatasetPublisher::new();
        publisher
            .expect_publish()
            .withf(|d, repo, private| d.num_rows() == 12 && repo == "org/encoded" && *private)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let summary = pipeline(config, 2)
            .with_publisher(Box::new(publisher))
            .run()
            .unwrap();
        assert_eq!(summary.published_to.as_deref(), Some("org/encoded"));
    }

    #[test]
    fn test_publish_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.save_settings.remote = Some("org/encoded".to_string());

        let mut publisher = MockDatasetPublisher::new();
        publisher
            .expect_publish()
            .returning(|_, _, _| Err(PipelineError::Export("quota".to_string())));

        let err = pipeline(config, 1)
            .with_publisher(Box::new(publisher))
            .run()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Export(_)));
    }

    #[test]
    fn test_same_location_ignores_spelling() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        assert!(same_location(&out, &dir.path().join("x").join("..").join("out")));
        assert!(same_location(Path::new("./out"), Path::new("out")));
        assert!(!same_location(&out, &dir.path().join("final")));

        std::fs::create_dir_all(&out).unwrap();
        assert!(same_location(&out, &out.join(".")));
    }

    #[test]
    fn test_local_export_spelled_as_out_dir_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.save_settings.local = Some(dir.path().join("final").join("..").join("out"));
        let err = pipeline(config, 1).validate().unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_interrupted_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(config(dir.path()), 1);
        pipeline.interrupt_flag().store(true, Ordering::SeqCst);
        assert!(pipeline.run().unwrap_err().is_interrupted());
    }
}
