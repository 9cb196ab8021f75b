use crate::geometry::Fp;

/// Cost model and limits for building the acceleration structures.
#[derive(Clone, Debug)]
pub struct BvhConfig {
    pub traversal_cost: Fp,
    pub intersection_cost: Fp,
    /// Nodes with at most this many items are split by an exhaustive sweep, larger ones are binned
    pub bin_threshold: usize,
    pub bin_count: usize,
    /// Keeps the binning of the farthest center strictly below `bin_count`
    pub binning_epsilon: Fp,
    pub spatial_bin_count: usize,
    pub max_depth: usize,
    /// Children of nodes larger than this are built on the rayon pool
    pub parallel_threshold: usize,
}

impl Default for BvhConfig {
    fn default() -> Self {
        BvhConfig {
            traversal_cost: 1.0,
            intersection_cost: 1.0,
            bin_threshold: 16,
            bin_count: 16,
            binning_epsilon: 0.99999,
            spatial_bin_count: 256,
            max_depth: 64,
            parallel_threshold: 1024,
        }
    }
}

#[derive(Clone, Debug)]
pub struct IntegratorConfig {
    pub russian_roulette: bool,
    pub guaranteed_recursion_depth: usize,
    pub survival_probability: Fp,
    /// Hard cap on the bounce count. Without roulette a path is otherwise only cut by black throughput.
    pub max_recursion_depth: Option<usize>,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        IntegratorConfig {
            russian_roulette: true,
            guaranteed_recursion_depth: 16,
            survival_probability: 0.9,
            max_recursion_depth: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// 0 means one worker per available core
    pub thread_count: usize,
    pub tasks_per_thread: usize,
    pub pin_threads: bool,
    pub seed: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            thread_count: 0,
            tasks_per_thread: 16,
            pin_threads: true,
            seed: 0,
        }
    }
}
