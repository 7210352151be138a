//! Processing strategies: the pluggable execution step behind the worker.
//!
//! A strategy is picked once per job from its tier. The pipeline only needs
//! to know how long processing took and what status it produced.

use crate::model::{Job, Status, Tier};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a strategy reports for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub duration: Duration,
    pub status: Status,
}

#[async_trait]
pub trait ProcessingStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn process(&self, job: &Job) -> Processed;
}

/// Placeholder workload: sleeps for `base` plus a random share of `jitter`
/// and accepts the job.
#[derive(Debug, Clone)]
pub struct SimulatedExecution {
    name: String,
    base: Duration,
    jitter: Duration,
}

impl SimulatedExecution {
    pub fn new(name: impl Into<String>, base: Duration, jitter: Duration) -> Self {
        Self {
            name: name.into(),
            base,
            jitter,
        }
    }

    /// 5 s plus up to 3 s.
    pub fn free() -> Self {
        Self::new("free", Duration::from_secs(5), Duration::from_secs(3))
    }

    /// 3 s plus up to 2 s.
    pub fn premium() -> Self {
        Self::new("premium", Duration::from_secs(3), Duration::from_secs(2))
    }

    fn pick_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.base;
        }
        self.base + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
    }
}

#[async_trait]
impl ProcessingStrategy for SimulatedExecution {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _job: &Job) -> Processed {
        let started = Instant::now();
        tokio::time::sleep(self.pick_delay()).await;
        Processed {
            duration: started.elapsed(),
            status: Status::accepted(),
        }
    }
}

/// Strategy per tier. Adding a tier or swapping an execution path means
/// registering a different strategy, not editing the worker.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<Tier, Arc<dyn ProcessingStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bundled simulated workloads for both tiers.
    pub fn simulated() -> Self {
        Self::new()
            .with(Tier::Free, Arc::new(SimulatedExecution::free()))
            .with(Tier::Premium, Arc::new(SimulatedExecution::premium()))
    }

    pub fn with(mut self, tier: Tier, strategy: Arc<dyn ProcessingStrategy>) -> Self {
        self.strategies.insert(tier, strategy);
        self
    }

    pub fn for_tier(&self, tier: Tier) -> Option<&Arc<dyn ProcessingStrategy>> {
        self.strategies.get(&tier)
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self
            .strategies
            .iter()
            .map(|(tier, s)| format!("{tier}={}", s.name()))
            .collect();
        names.sort();
        f.debug_struct("StrategyRegistry")
            .field("strategies", &names)
            .finish()
    }
}
