//! Host pipeline wiring
//!
//! Owns everything built once at startup: the parameter registry, feature
//! bookkeeping, the extension and the ordered model steps. Requests borrow it
//! immutably, so one pipeline can serve concurrent requests.

use crate::config::ExtensionConfig;
use crate::error::Result;
use crate::extension::SkimmedCfgExtension;
use crate::feature::{FeatureRegistry, FeatureSet};
use crate::param::{ParamRegistry, ParamValueSet};
use crate::request::GenerationRequest;
use crate::workflow::{CoreParams, GeneratedWorkflow, ModelGenSteps, WorkflowGenerator};
use tracing::info;

/// Startup state shared by all requests
pub struct Pipeline {
    /// Registered parameters
    pub registry: ParamRegistry,
    /// Host parameter handles
    pub core: CoreParams,
    /// Feature bookkeeping
    pub features: FeatureRegistry,
    /// The SkimmedCFG extension
    pub extension: SkimmedCfgExtension,
    /// Model steps in execution order
    pub steps: ModelGenSteps,
}

impl Pipeline {
    /// Register core parameters and initialize the extension
    pub fn new(config: &ExtensionConfig) -> Result<Self> {
        let mut registry = ParamRegistry::new();
        let mut features = FeatureRegistry::new();
        let core = CoreParams::register(&mut registry)?;
        let extension = SkimmedCfgExtension::init(&mut registry, &mut features, &core, config)?;

        let mut steps = ModelGenSteps::new();
        steps.add(extension.clone());

        info!(
            "Pipeline ready: {} parameters, {} model steps",
            registry.len(),
            steps.len()
        );

        Ok(Self {
            registry,
            core,
            features,
            extension,
            steps,
        })
    }

    /// Build the workflow for one request
    pub fn generate(
        &self,
        values: ParamValueSet,
        features: FeatureSet,
    ) -> Result<GeneratedWorkflow> {
        WorkflowGenerator::new(&self.registry, &self.core, values, features)?
            .generate(&self.steps)
    }

    /// Validate and build a request read from disk
    pub fn generate_request(&self, request: &GenerationRequest) -> Result<GeneratedWorkflow> {
        let values = request.values(&self.registry)?;
        let features = request.resolve_features(&self.features);
        self.generate(values, features)
    }
}
