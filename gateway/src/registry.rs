//! Output registry for the sidekick gateway
//!
//! Holds every enabled output. Populated once at startup, then shared
//! read-only by the ingest server.

use crate::event::KubearmorEvent;
use crate::output::Output;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry of outputs (fan-out to all)
pub struct OutputRegistry {
    outputs: Vec<Arc<dyn Output>>,
}

impl OutputRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            outputs: Vec::new(),
        }
    }

    /// Register an output
    ///
    /// Every event will be posted to every registered output.
    pub fn register_output(&mut self, output: Arc<dyn Output>) {
        info!(output = output.name(), "Registered output");
        self.outputs.push(output);
    }

    /// Get the number of registered outputs
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Names of the registered outputs, in registration order
    pub fn output_names(&self) -> Vec<&'static str> {
        self.outputs.iter().map(|o| o.name()).collect()
    }

    /// Post an event to all outputs
    ///
    /// Outputs record their own failures, so one broken destination never
    /// keeps the event from the others. Returns the number of outputs the
    /// event was handed to.
    pub async fn post_to_all(&self, event: &KubearmorEvent) -> usize {
        if self.outputs.is_empty() {
            warn!("No outputs registered, event will be dropped");
            return 0;
        }

        for output in &self.outputs {
            output.post(event).await;
            debug!(output = output.name(), event_type = %event.event_type, "Event posted");
        }

        self.outputs.len()
    }
}

impl Default for OutputRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockOutput {
        name: &'static str,
        posted: AtomicUsize,
    }

    impl MockOutput {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                posted: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Output for MockOutput {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn post(&self, _event: &KubearmorEvent) {
            self.posted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_register_output() {
        let mut registry = OutputRegistry::new();
        registry.register_output(Arc::new(MockOutput::new("spyderbat")));
        registry.register_output(Arc::new(MockOutput::new("stdout")));

        assert_eq!(registry.output_count(), 2);
        assert_eq!(registry.output_names(), vec!["spyderbat", "stdout"]);
    }

    #[tokio::test]
    async fn test_post_to_all() {
        let first = Arc::new(MockOutput::new("first"));
        let second = Arc::new(MockOutput::new("second"));

        let mut registry = OutputRegistry::new();
        registry.register_output(first.clone());
        registry.register_output(second.clone());

        let delivered = registry.post_to_all(&KubearmorEvent::new("Alert", 0)).await;

        assert_eq!(delivered, 2);
        assert_eq!(first.posted.load(Ordering::SeqCst), 1);
        assert_eq!(second.posted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_post_without_outputs() {
        let registry = OutputRegistry::new();
        assert_eq!(registry.post_to_all(&KubearmorEvent::default()).await, 0);
    }
}
