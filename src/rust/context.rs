use crate::runtime::RuntimeConfig;

/// Shared settings handed by reference to every component that builds,
/// trains or reloads a pipeline.
///
/// # Example
/// ```
/// use occipital::PipelineContext;
///
/// let ctx = PipelineContext::new().with_seed(42);
/// assert_eq!(ctx.seed(), Some(42));
/// ```
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    seed: Option<u64>,
    runtime_config: RuntimeConfig,
}

impl PipelineContext {
    /// Creates a context without a fixed seed and with default runtime settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes the seed used for data splitting. Without a seed, splits draw
    /// from OS entropy and differ run-to-run.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the ONNX Runtime configuration used when opening backbone models
    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.runtime_config
    }
}
