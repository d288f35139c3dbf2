//! Mock construction helpers

use codecpack_rs::config::{BaseSettings, DatasetConfig};
use codecpack_rs::encoder::{AudioEncoder, EncoderBackend, SimulatedBackend};
use codecpack_rs::error::{PipelineError, Result};
use codecpack_rs::source::{DataSource, MemorySource, SourceLoader};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Loader serving prepared in-memory sources by dataset name
#[derive(Default)]
pub struct FixedSourceLoader {
    sources: HashMap<String, Arc<MemorySource>>,
    loads: Arc<Mutex<Vec<String>>>,
}

impl FixedSourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, name: &str, source: MemorySource) -> Self {
        self.sources.insert(name.to_string(), Arc::new(source));
        self
    }

    /// Shared log of dataset names in the order they were loaded
    pub fn load_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.loads.clone()
    }
}

impl SourceLoader for FixedSourceLoader {
    fn load(&self, dataset: &DatasetConfig, _settings: &BaseSettings) -> Result<Arc<dyn DataSource>> {
        self.loads.lock().unwrap().push(dataset.name.clone());
        match self.sources.get(&dataset.name) {
            Some(source) => Ok(source.clone() as Arc<dyn DataSource>),
            None => Err(PipelineError::Source(format!("unknown dataset {}", dataset.name))),
        }
    }
}

/// Simulated devices where some ranks fail to load the model
pub struct FlakyBackend {
    inner: SimulatedBackend,
    broken: Vec<usize>,
    loads: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(devices: usize, broken: Vec<usize>) -> Self {
        Self {
            inner: SimulatedBackend::new(devices, 4),
            broken,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl EncoderBackend for FlakyBackend {
    fn device_count(&self) -> usize {
        self.inner.device_count()
    }

    fn load(&self, device: usize, model_id: &str) -> Result<Box<dyn AudioEncoder>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.broken.contains(&device) {
            return Err(PipelineError::Encode(format!("device {} is out of memory", device)));
        }
        self.inner.load(device, model_id)
    }

    fn name(&self) -> &str {
        "flaky"
    }
}
