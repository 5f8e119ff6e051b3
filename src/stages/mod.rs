// src/stages/mod.rs
use std::sync::Arc;
use async_trait::async_trait;

use crate::config::DiscoveryConfig;
use crate::core::Stage;
use crate::crawler::PageLoader;
use crate::error::DiscoveryResult;
use crate::tools::CommandRunner;

pub mod active;
pub mod authenticated;
pub mod deep;
pub mod enrichment;
pub mod passive;
pub mod ports;

pub use active::{ActiveOutput, ActiveStage};
pub use authenticated::{AuthenticatedInput, AuthenticatedOutput, AuthenticatedStage};
pub use deep::{DeepOutput, DeepStage};
pub use enrichment::{EnrichmentInput, EnrichmentOutput, EnrichmentStage};
pub use passive::{PassiveOutput, PassiveStage};
pub use ports::{PortOutput, PortStage};

/// Shared handles every stage module works with
#[derive(Clone)]
pub struct StageContext {
    pub config: Arc<DiscoveryConfig>,
    pub runner: Arc<dyn CommandRunner>,
    pub loader: Option<Arc<dyn PageLoader>>,
}

impl StageContext {
    pub fn new(config: Arc<DiscoveryConfig>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner, loader: None }
    }

    pub fn with_loader(mut self, loader: Arc<dyn PageLoader>) -> Self {
        self.loader = Some(loader);
        self
    }
}

/// One pipeline phase.
///
/// Stage modules read a snapshot of earlier results and return new data;
/// merging into the run result is the coordinator's job.
#[async_trait]
pub trait StageModule: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    /// Which pipeline stage this module implements
    fn stage(&self) -> Stage;

    async fn run(&self, input: &Self::Input) -> DiscoveryResult<Self::Output>;
}
