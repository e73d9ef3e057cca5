/// Tuning knobs shared by both aggregation strategies
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationConfig {
    /// Run inside a dedicated pool of this many threads (default: global rayon pool)
    pub num_threads: Option<usize>,

    /// Below this many items a fan-out runs sequentially
    pub parallel_threshold: usize,

    /// Drop observations that cannot reach any target before partitioning
    pub check_use: bool,

    /// Dimensions the simplification pass must never collapse
    pub dimensions_to_preserve: Vec<String>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            parallel_threshold: 1024,
            check_use: true,
            dimensions_to_preserve: Vec::new(),
        }
    }
}

impl AggregationConfig {
    /// Use a dedicated pool with `n` worker threads
    pub fn with_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n.max(1));
        self
    }

    pub fn with_threshold(mut self, items: usize) -> Self {
        self.parallel_threshold = items;
        self
    }

    pub fn with_check_use(mut self, enabled: bool) -> Self {
        self.check_use = enabled;
        self
    }

    pub fn preserve<S: Into<String>>(mut self, dimensions: impl IntoIterator<Item = S>) -> Self {
        self.dimensions_to_preserve
            .extend(dimensions.into_iter().map(Into::into));
        self
    }

    pub(crate) fn is_preserved(&self, dimension_name: &str) -> bool {
        self.dimensions_to_preserve
            .iter()
            .any(|d| d == dimension_name)
    }

    pub(crate) fn runs_parallel(&self, items: usize) -> bool {
        items >= self.parallel_threshold
    }
}
