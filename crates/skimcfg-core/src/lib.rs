//! SkimmedCFG Core - Workflow extension for CFG skimming
//!
//! This crate contains:
//! - Typed parameter registry and per-request value sets
//! - Feature availability and install detection
//! - ComfyUI-style workflow graph construction with ordered model steps
//! - The SkimmedCFG extension mapping a selected mode to node arguments
//! - UI descriptors, configuration and request loading

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod extension;
pub mod feature;
pub mod logging;
pub mod mode;
pub mod param;
pub mod pipeline;
pub mod request;
pub mod ui;
pub mod workflow;

// Errors
pub use error::{Result, SkimError};

// Configuration
pub use config::ExtensionConfig;
pub use logging::LogConfig;

// Parameters & Features
pub use feature::{FeatureRegistry, FeatureSet, InstallableFeature, NodeFeatureMap};
pub use param::{
    Param, ParamChoice, ParamGroup, ParamId, ParamKind, ParamRegistry, ParamSpec, ParamValue,
    ParamValueSet, ViewType,
};

// Modes & Extension
pub use extension::{SkimNodePlan, SkimParams, SkimmedCfgExtension, FEATURE_ID};
pub use mode::{DifferenceMethod, Mode, ModeTable, SkimArgs};

// Workflow
pub use pipeline::Pipeline;
pub use request::GenerationRequest;
pub use workflow::{
    ArgumentBag, CoreParams, GeneratedWorkflow, ModelGenStep, ModelGenSteps, NodeRef,
    WorkflowGenerator, WorkflowGraph, WorkflowNode,
};

// UI
pub use ui::{install_prompt, GroupLayout, InstallPrompt, ParamLayout};
