//! Scripted form fillers.

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use weft_pipeline::Schema;
use weft_router::FormFiller;

/// Records which schemas it was asked to fill; the invariant under test
/// is usually that it was *not* asked for a masked handler.
pub struct RecordingFiller {
    calls: StdMutex<Vec<(String, String)>>,
    respond_with: Box<dyn Fn(&Schema, &str) -> Result<Vec<u8>, String> + Send + Sync>,
}

impl RecordingFiller {
    pub fn with<F>(respond_with: F) -> Self
    where
        F: Fn(&Schema, &str) -> Result<Vec<u8>, String> + Send + Sync + 'static,
    {
        Self {
            calls: StdMutex::new(Vec::new()),
            respond_with: Box::new(respond_with),
        }
    }

    pub fn failing(reason: &str) -> Self {
        let reason = reason.to_string();
        Self::with(move |_, _| Err(reason.clone()))
    }

    /// Schema names this filler was invoked for, in order.
    pub fn filled_schemas(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("filler lock")
            .iter()
            .map(|(schema, _)| schema.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("filler lock").len()
    }
}

#[async_trait]
impl FormFiller for RecordingFiller {
    async fn fill(&self, schema: &Schema, natural_language: &str) -> Result<Vec<u8>, String> {
        self.calls
            .lock()
            .expect("filler lock")
            .push((schema.name().to_string(), natural_language.to_string()));
        (self.respond_with)(schema, natural_language)
    }
}
