use super::processor::Processor;
use std::collections::HashMap;
use std::sync::Arc;

/// Returned when two processors claim the same name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("A processor named `{name}` is already registered")]
pub struct DuplicateProcessor {
    pub name: String,
}

/// Maps processor names to implementations.
///
/// Populated at startup and shared read-only afterwards, usually behind an
/// `Arc`.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `processor` under its own name.
    pub fn register(&mut self, processor: Arc<dyn Processor>) -> Result<(), DuplicateProcessor> {
        let name = processor.name().to_string();
        if self.processors.contains_key(&name) {
            return Err(DuplicateProcessor { name });
        }
        tracing::debug!(processor = %name, "Registered processor");
        self.processors.insert(name, processor);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, processor: Arc<dyn Processor>) -> Result<Self, DuplicateProcessor> {
        self.register(processor)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
