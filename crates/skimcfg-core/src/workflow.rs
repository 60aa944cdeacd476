//! Workflow Graph - ComfyUI-style node graph construction
//!
//! The host builds one [`WorkflowGraph`] per generation request. Extensions
//! hook into the model section of that graph through [`ModelGenStep`]s, which
//! run in ascending priority order and may replace the current model
//! reference with the output of a node they insert.

use crate::error::Result;
use crate::feature::FeatureSet;
use crate::param::{Param, ParamGroup, ParamRegistry, ParamSpec, ParamValue, ParamValueSet};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Unique identifier for a workflow node
pub type NodeId = u64;

/// Inputs passed to a node on creation, in insertion order
pub type ArgumentBag = serde_json::Map<String, serde_json::Value>;

/// Reference to an output of a node: `(node-id, output-slot)`.
///
/// Serializes as `["<id>", <slot>]`, the form ComfyUI expects for linked inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef(pub String, pub u32);

impl NodeRef {
    /// Reference output `slot` of `node`
    pub fn new(node: impl Into<String>, slot: u32) -> Self {
        Self(node.into(), slot)
    }

    /// Id of the referenced node
    pub fn node(&self) -> &str {
        &self.0
    }
}

impl From<&NodeRef> for serde_json::Value {
    fn from(node_ref: &NodeRef) -> Self {
        serde_json::json!([node_ref.0, node_ref.1])
    }
}

/// A single node in the workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Node class name as known to the backend
    pub class_type: String,
    /// Literal values and links to other node outputs
    pub inputs: ArgumentBag,
}

/// Workflow graph - collection of nodes keyed by id
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowGraph {
    nodes: BTreeMap<NodeId, WorkflowNode>,
    next_node_id: NodeId,
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            next_node_id: 1,
        }
    }

    /// Add a node and return its id as used in node references
    pub fn create_node(&mut self, class_type: impl Into<String>, inputs: ArgumentBag) -> String {
        let id = self.next_node_id;
        self.next_node_id += 1;

        let class_type = class_type.into();
        debug!("Creating node {} of type '{}'", id, class_type);
        self.nodes.insert(id, WorkflowNode { class_type, inputs });

        id.to_string()
    }

    /// Look up a node by its string id
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        id.parse::<NodeId>().ok().and_then(|id| self.nodes.get(&id))
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Convert to the JSON object the backend accepts
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl Serialize for WorkflowGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.nodes.len()))?;
        for (id, node) in &self.nodes {
            map.serialize_entry(&id.to_string(), node)?;
        }
        map.end()
    }
}

/// Largest seed that survives the round trip through a JSON number
pub const MAX_SEED: f64 = 9_007_199_254_740_991.0;

/// Parameters owned by the host itself
#[derive(Debug, Clone)]
pub struct CoreParams {
    /// Checkpoint to load
    pub model: Param<String>,
    /// Classifier-free guidance scale
    pub cfg_scale: Param<f64>,
    /// Number of sampling steps
    pub steps: Param<f64>,
    /// Sampling seed
    pub seed: Param<f64>,
}

impl CoreParams {
    /// Register the core parameters
    pub fn register(registry: &mut ParamRegistry) -> Result<Self> {
        let group = ParamGroup::new("Core Parameters", -10.0);
        registry.register_group(group.clone());

        let model = registry.register::<String>(
            ParamSpec::new(
                "Model",
                "Checkpoint used for generation.",
                ParamValue::Text("sd_xl_base_1.0.safetensors".to_string()),
            )
            .group(&group)
            .order_priority(0.0),
        )?;
        let cfg_scale = registry.register::<f64>(
            ParamSpec::new(
                "CFG Scale",
                "How strongly the image should follow the prompt.",
                ParamValue::Decimal(7.0),
            )
            .range(0.0, 20.0, 0.5)
            .slider()
            .group(&group)
            .order_priority(1.0),
        )?;
        let steps = registry.register::<f64>(
            ParamSpec::new("Steps", "Number of sampling steps.", ParamValue::Decimal(20.0))
                .range(1.0, 150.0, 1.0)
                .slider()
                .group(&group)
                .order_priority(2.0),
        )?;
        let seed = registry.register::<f64>(
            ParamSpec::new("Seed", "Sampling seed.", ParamValue::Decimal(0.0))
                .range(0.0, MAX_SEED, 1.0)
                .group(&group)
                .order_priority(3.0),
        )?;

        Ok(Self {
            model,
            cfg_scale,
            steps,
            seed,
        })
    }
}

/// A hook that transforms the model section of a workflow
pub trait ModelGenStep: Send + Sync {
    /// Lower priorities run first
    fn priority(&self) -> f64;

    /// Apply the step to a request's generator
    fn apply(&self, g: &mut WorkflowGenerator<'_>) -> Result<()>;
}

/// Model generation steps sorted by ascending priority
#[derive(Default)]
pub struct ModelGenSteps {
    steps: Vec<Box<dyn ModelGenStep>>,
}

impl ModelGenSteps {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step after every step with the same or lower priority
    pub fn add(&mut self, step: impl ModelGenStep + 'static) {
        let priority = step.priority();
        let index = self
            .steps
            .iter()
            .position(|s| s.priority() > priority)
            .unwrap_or(self.steps.len());
        self.steps.insert(index, Box::new(step));
    }

    /// Steps in execution order
    pub fn iter(&self) -> impl Iterator<Item = &dyn ModelGenStep> {
        self.steps.iter().map(|s| s.as_ref())
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no step is registered
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Result of a finished generation
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedWorkflow {
    /// The finished graph
    pub workflow: WorkflowGraph,
    /// Request parameters after all steps ran
    pub params: ParamValueSet,
}

/// Per-request workflow builder
pub struct WorkflowGenerator<'a> {
    /// Registered parameters
    pub registry: &'a ParamRegistry,
    /// Host parameter handles
    pub core: &'a CoreParams,
    /// Request parameter values
    pub user_input: ParamValueSet,
    /// Features available on the backend
    pub features: FeatureSet,
    /// Graph under construction
    pub graph: WorkflowGraph,
    /// Model output that the next model step should consume
    pub loading_model: NodeRef,
    /// Model output the sampler will consume
    pub final_model: NodeRef,
}

impl<'a> WorkflowGenerator<'a> {
    /// Create a generator and insert the checkpoint loader node
    pub fn new(
        registry: &'a ParamRegistry,
        core: &'a CoreParams,
        user_input: ParamValueSet,
        features: FeatureSet,
    ) -> Result<Self> {
        let mut graph = WorkflowGraph::new();
        let model_name = user_input.get(registry, &core.model)?;

        let mut inputs = ArgumentBag::new();
        inputs.insert("ckpt_name".to_string(), model_name.into());
        let loader = graph.create_node("CheckpointLoaderSimple", inputs);
        let model = NodeRef::new(loader, 0);

        Ok(Self {
            registry,
            core,
            user_input,
            features,
            graph,
            loading_model: model.clone(),
            final_model: model,
        })
    }

    /// Create a node in the graph
    pub fn create_node(&mut self, class_type: impl Into<String>, inputs: ArgumentBag) -> String {
        self.graph.create_node(class_type, inputs)
    }

    /// Run all model steps, then add the sampler consuming the final model
    pub fn generate(mut self, steps: &ModelGenSteps) -> Result<GeneratedWorkflow> {
        for step in steps.iter() {
            step.apply(&mut self)?;
        }

        let cfg = self.user_input.get(self.registry, &self.core.cfg_scale)?;
        let sampling_steps = self.user_input.get(self.registry, &self.core.steps)?;
        let seed = self.user_input.get(self.registry, &self.core.seed)?;

        let mut inputs = ArgumentBag::new();
        inputs.insert("model".to_string(), (&self.final_model).into());
        inputs.insert("seed".to_string(), (seed as i64).into());
        inputs.insert("steps".to_string(), (sampling_steps as i64).into());
        inputs.insert("cfg".to_string(), cfg.into());
        inputs.insert("sampler_name".to_string(), "euler".into());
        inputs.insert("scheduler".to_string(), "normal".into());
        inputs.insert("denoise".to_string(), serde_json::json!(1.0));
        let sampler = self.graph.create_node("KSampler", inputs);
        info!(
            "Workflow built with {} nodes, sampler {} reads model from node {}",
            self.graph.len(),
            sampler,
            self.final_model.node()
        );

        Ok(GeneratedWorkflow {
            workflow: self.graph,
            params: self.user_input,
        })
    }
}
