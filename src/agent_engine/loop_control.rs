use crate::config::AgentConfig;

/// Run-level budgets: plan/replan cycles and unmet-outcome reflections.
#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub max_reflection_retries: u32,
}

impl From<&AgentConfig> for LoopConfig {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            max_reflection_retries: cfg.max_reflection_retries,
        }
    }
}

pub struct LoopController {
    config: LoopConfig,
    iteration: u32,
    reflection_failures: u32,
}

impl LoopController {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            iteration: 0,
            reflection_failures: 0,
        }
    }

    /// Starts a plan or replan cycle. Returns `false` when the ceiling is
    /// already reached; the counter is left unchanged in that case.
    pub fn begin_iteration(&mut self) -> bool {
        if self.iterations_exhausted() {
            return false;
        }
        self.iteration += 1;
        true
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn iterations_exhausted(&self) -> bool {
        self.iteration >= self.config.max_iterations
    }

    /// Counts one unmet outcome. Returns `false` once the reflection budget
    /// is spent.
    pub fn record_reflection_failure(&mut self) -> bool {
        self.reflection_failures += 1;
        self.reflection_failures <= self.config.max_reflection_retries
    }
}
