//! SkimmedCFG extension
//!
//! Registers the SkimmedCFG parameters and feature, and inserts the selected
//! Skimmed CFG node into the model section of every request that sets a mode.

use crate::config::ExtensionConfig;
use crate::error::{Result, SkimError};
use crate::feature::{FeatureRegistry, InstallableFeature};
use crate::mode::{
    BaseArgs, DifferenceCfgArgs, DifferenceMethod, DualScalesArgs, LinearInterpolationArgs, Mode,
    ModeTable, SkimArgs, TimedFlipArgs,
};
use crate::param::{Param, ParamGroup, ParamId, ParamRegistry, ParamSpec, ParamValue, ParamValueSet};
use crate::workflow::{ArgumentBag, CoreParams, ModelGenStep, NodeRef, WorkflowGenerator};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Display-name prefix of every parameter this extension registers
pub const PREFIX: &str = "[SkimmedCFG] ";

/// Feature id gating the extension
pub const FEATURE_ID: &str = "skimmedcfg";

/// Common prefix of the node classes provided by the custom node pack
pub const NODE_PREFIX: &str = "Skimmed CFG";

/// Folder name of the custom node pack once downloaded
pub const NODE_FOLDER: &str = "Skimmed_CFG";

/// Display group of all SkimmedCFG parameters
pub const GROUP_NAME: &str = "SkimmedCFG";

/// Priority of the model step; runs before most other model transforms
pub const STEP_PRIORITY: f64 = -13.0;

const README_URL: &str = "https://github.com/Extraltodeus/Skimmed_CFG/blob/main/README.md";

/// The installable custom node backing this extension
pub fn installable_feature() -> InstallableFeature {
    InstallableFeature {
        display_name: "Skimmed CFG".to_string(),
        feature_id: FEATURE_ID.to_string(),
        url: "https://github.com/Extraltodeus/Skimmed_CFG".to_string(),
        author: "Extraltodeus".to_string(),
        notice: concat!(
            "This will install the Skimmed_CFG ComfyUI node developed by Extraltodeus.",
            "\nDo you wish to install?"
        )
        .to_string(),
    }
}

fn name(suffix: &str) -> String {
    format!("{}{}", PREFIX, suffix)
}

fn only_works_with(mode: Mode) -> String {
    format!("<i><b>Only works with \"{}\" Mode.</b></i>", mode.label())
}

/// Handles to every SkimmedCFG parameter
#[derive(Debug, Clone)]
pub struct SkimParams {
    /// Selected mode, stored as the node class name
    pub mode: Param<String>,
    /// Skimming scale, also the positive and reference scale
    pub skimming_cfg: Param<f64>,
    /// Replaces the core CFG scale when set
    pub override_core_cfg: Param<f64>,
    /// Base: fully skim the negative
    pub base_full_skim_negative: Param<bool>,
    /// Base: disable the flipping filter
    pub base_disable_flipping_filter: Param<bool>,
    /// Dual scales: negative scale
    pub skimming_cfg_negative: Param<f64>,
    /// Timed flip: flip point
    pub timed_flip_at: Param<f64>,
    /// Timed flip: reverse
    pub timed_reverse: Param<bool>,
    /// Difference CFG: distance method
    pub difference_method: Param<String>,
    /// Difference CFG: end point
    pub difference_end_at_percentage: Param<f64>,
}

impl SkimParams {
    /// Register the parameters under the SkimmedCFG group
    pub fn register(registry: &mut ParamRegistry) -> Result<Self> {
        let mut group = ParamGroup::new(GROUP_NAME, 9.0);
        group.toggles = true;
        registry.register_group(group.clone());

        let mut order = 0.0;
        let mut next_order = || {
            let current = order;
            order += 1.0;
            current
        };

        let mode_tooltip = format!(
            concat!(
                "Many tooltips are adapted from the ",
                "<a href=\"{}\">Skimmed_CFG repository readme</a>",
                "\n<i><b>Base:</b></i> Original version",
                "\n<i><b>Linear Interpolation:</b></i> Instead of replacing, does a linear ",
                "interpolation in between the values.",
                "\n<i><b>Linear Interpolation Dual Scales:</b></i> Uses two scales. ",
                "Positive scale is \"Skimming CFG\", negative scale is \"Skimming CFG Negative\". ",
                "The name is more related to a visually intuitive relation rather than fully ",
                "from the predictions. A higher positive will tend to go towards high ",
                "saturation and vice versa with the other slider.",
                "\n<i><b>Replace:</b></i> Replace the values within the negative by those in ",
                "the positive prediction, nullifying (actually giving an equivalent scale of 1) ",
                "the effect of values targeted by the filter.",
                "\n<i><b>Timed Flip:</b></i> To be used with normal scales. Enhances the ",
                "randomness and overall quality of the image. A bit less of an antiburn and a ",
                "lot more of an enhancer. SDE Samplers react extremely well to it.",
                "\n<i><b>Difference CFG:</b></i> Other algorithms based on changes depending ",
                "on the scale. Brings back what goes too far in comparison.",
            ),
            README_URL
        );

        let mode = registry.register::<String>(
            ParamSpec::new(
                name("Mode"),
                mode_tooltip,
                ParamValue::Text(Mode::Base.node_type().to_string()),
            )
            .choices(Mode::ALL.iter().map(Mode::choice).collect())
            .group(&group)
            .feature_flag(FEATURE_ID)
            .change_weight(1)
            .order_priority(next_order()),
        )?;
        let skimming_cfg = registry.register::<f64>(
            ParamSpec::new(
                name("Skimming CFG"),
                concat!(
                    "Basically how much do you like them burned. Recommended: 2-3 for maximum ",
                    "antiburn, 5-7 for colorful/strong style. 4 is cruise scale."
                ),
                ParamValue::Decimal(4.0),
            )
            .range(0.0, 10.0, 0.5)
            .slider()
            .group(&group)
            .feature_flag(FEATURE_ID)
            .order_priority(next_order()),
        )?;
        let override_core_cfg = registry.register::<f64>(
            ParamSpec::new(
                name("Override Core CFG"),
                concat!(
                    "Overrides the core CFG parameter if enabled, useful for going beyond the ",
                    "default maximum of 20"
                ),
                ParamValue::Decimal(10.0),
            )
            .range(0.0, 128.0, 0.5)
            .slider()
            .toggleable()
            .group(&group)
            .feature_flag(FEATURE_ID)
            .order_priority(next_order()),
        )?;
        let base_full_skim_negative = registry.register::<bool>(
            ParamSpec::new(
                name("(Base) Full Skim Negative"),
                format!(
                    "{} Fully skim some part of the conflicting influence.",
                    only_works_with(Mode::Base)
                ),
                ParamValue::Boolean(false),
            )
            .advanced()
            .group(&group)
            .feature_flag(FEATURE_ID)
            .order_priority(next_order()),
        )?;
        let base_disable_flipping_filter = registry.register::<bool>(
            ParamSpec::new(
                name("(Base) Disable Flipping Filter"),
                format!(
                    concat!(
                        "{} The skimming CFG will have much more control. It is meant to be ",
                        "used with the 'Full Skim Negative' toggle on."
                    ),
                    only_works_with(Mode::Base)
                ),
                ParamValue::Boolean(false),
            )
            .advanced()
            .group(&group)
            .feature_flag(FEATURE_ID)
            .order_priority(next_order()),
        )?;
        let skimming_cfg_negative = registry.register::<f64>(
            ParamSpec::new(
                name("(Dual) Skimming CFG Negative"),
                only_works_with(Mode::LinearInterpolationDualScales),
                ParamValue::Decimal(4.0),
            )
            .range(0.0, 10.0, 0.5)
            .slider()
            .advanced()
            .group(&group)
            .feature_flag(FEATURE_ID)
            .order_priority(next_order()),
        )?;
        let timed_flip_at = registry.register::<f64>(
            ParamSpec::new(
                name("(Timed) Flip At"),
                format!(
                    concat!(
                        "{}. Relative to the step progression.",
                        "\nCompletely at 0 will give smoother results",
                        "\nCompletely at one will give noisier results.",
                        "\nThe influence is more important from 0% to 30%"
                    ),
                    only_works_with(Mode::TimedFlip)
                ),
                ParamValue::Decimal(0.3),
            )
            .range(0.0, 1.0, 0.01)
            .slider()
            .advanced()
            .group(&group)
            .feature_flag(FEATURE_ID)
            .order_priority(next_order()),
        )?;
        let timed_reverse = registry.register::<bool>(
            ParamSpec::new(
                name("(Timed) Reverse"),
                format!(
                    concat!(
                        "{}. If turned on you will obtain a composition closer to what you ",
                        "would normally get with no modification."
                    ),
                    only_works_with(Mode::TimedFlip)
                ),
                ParamValue::Boolean(false),
            )
            .advanced()
            .group(&group)
            .feature_flag(FEATURE_ID)
            .order_priority(next_order()),
        )?;
        let difference_method = registry.register::<String>(
            ParamSpec::new(
                name("(Difference) Method"),
                format!("{}.", only_works_with(Mode::DifferenceCfg)),
                ParamValue::Text(DifferenceMethod::LinearDistance.as_str().to_string()),
            )
            .choices(DifferenceMethod::ALL.iter().map(DifferenceMethod::choice).collect())
            .advanced()
            .group(&group)
            .feature_flag(FEATURE_ID)
            .change_weight(1)
            .order_priority(next_order()),
        )?;
        let difference_end_at_percentage = registry.register::<f64>(
            ParamSpec::new(
                name("(Difference) End At Percentage"),
                format!(
                    concat!(
                        "{}. Relative to the step progression. 0 means disabled, 1 means ",
                        "active until the end."
                    ),
                    only_works_with(Mode::DifferenceCfg)
                ),
                ParamValue::Decimal(0.8),
            )
            .range(0.0, 1.0, 0.01)
            .slider()
            .advanced()
            .group(&group)
            .feature_flag(FEATURE_ID)
            .order_priority(next_order()),
        )?;

        Ok(Self {
            mode,
            skimming_cfg,
            override_core_cfg,
            base_full_skim_negative,
            base_disable_flipping_filter,
            skimming_cfg_negative,
            timed_flip_at,
            timed_reverse,
            difference_method,
            difference_end_at_percentage,
        })
    }

    /// Parameters each mode reads. Replace has no entry.
    pub fn mode_table(&self) -> ModeTable {
        fn ids(params: &[&ParamId]) -> Vec<ParamId> {
            params.iter().map(|id| (*id).clone()).collect()
        }

        ModeTable::new()
            .with(
                Mode::Base,
                ids(&[
                    self.skimming_cfg.id(),
                    self.base_full_skim_negative.id(),
                    self.base_disable_flipping_filter.id(),
                ]),
            )
            .with(Mode::LinearInterpolation, ids(&[self.skimming_cfg.id()]))
            .with(
                Mode::LinearInterpolationDualScales,
                ids(&[self.skimming_cfg.id(), self.skimming_cfg_negative.id()]),
            )
            .with(
                Mode::TimedFlip,
                ids(&[self.timed_flip_at.id(), self.timed_reverse.id()]),
            )
            .with(
                Mode::DifferenceCfg,
                ids(&[
                    self.skimming_cfg.id(),
                    self.difference_method.id(),
                    self.difference_end_at_percentage.id(),
                ]),
            )
    }

    /// Read the arguments of `mode` from the request values, falling back to
    /// registered defaults for unset parameters
    pub fn read_args(
        &self,
        mode: Mode,
        registry: &ParamRegistry,
        values: &ParamValueSet,
    ) -> Result<SkimArgs> {
        let args = match mode {
            Mode::Base => SkimArgs::Base(BaseArgs {
                skimming_cfg: values.get(registry, &self.skimming_cfg)?,
                full_skim_negative: values.get(registry, &self.base_full_skim_negative)?,
                disable_flipping_filter: values.get(registry, &self.base_disable_flipping_filter)?,
            }),
            Mode::LinearInterpolation => SkimArgs::LinearInterpolation(LinearInterpolationArgs {
                skimming_cfg: values.get(registry, &self.skimming_cfg)?,
            }),
            Mode::LinearInterpolationDualScales => {
                SkimArgs::LinearInterpolationDualScales(DualScalesArgs {
                    positive: values.get(registry, &self.skimming_cfg)?,
                    negative: values.get(registry, &self.skimming_cfg_negative)?,
                })
            }
            // TODO: wire Replace arguments once the node's inputs are documented upstream
            Mode::Replace => SkimArgs::Replace,
            Mode::TimedFlip => SkimArgs::TimedFlip(TimedFlipArgs {
                flip_at: values.get(registry, &self.timed_flip_at)?,
                reverse: values.get(registry, &self.timed_reverse)?,
            }),
            Mode::DifferenceCfg => {
                let method = values.get(registry, &self.difference_method)?;
                let method = DifferenceMethod::parse(&method).ok_or_else(|| {
                    SkimError::InvalidChoice {
                        id: self.difference_method.id().to_string(),
                        value: method.clone(),
                    }
                })?;
                SkimArgs::DifferenceCfg(DifferenceCfgArgs {
                    reference_cfg: values.get(registry, &self.skimming_cfg)?,
                    method,
                    end_at_percentage: values.get(registry, &self.difference_end_at_percentage)?,
                })
            }
        };
        Ok(args)
    }
}

/// Node to insert for a request, with the parameters to prune
#[derive(Debug, Clone, PartialEq)]
pub struct SkimNodePlan {
    /// Node class to create
    pub node_type: String,
    /// Recognized mode, `None` for an unknown node class
    pub mode: Option<Mode>,
    /// Arguments including the model reference
    pub arguments: ArgumentBag,
    /// Parameters to drop from the request
    pub excluded: BTreeSet<ParamId>,
}

/// The SkimmedCFG extension
#[derive(Debug, Clone)]
pub struct SkimmedCfgExtension {
    params: SkimParams,
    table: ModeTable,
    cfg_scale: Param<f64>,
}

impl SkimmedCfgExtension {
    /// Register parameters, feature metadata and install detection
    pub fn init(
        registry: &mut ParamRegistry,
        features: &mut FeatureRegistry,
        core: &CoreParams,
        config: &ExtensionConfig,
    ) -> Result<Self> {
        features.node_map.insert(NODE_PREFIX, FEATURE_ID);
        features.register_installable(installable_feature());

        // Assume installed if the node folder exists; the backend's node
        // report discards the feature again if the nodes are missing.
        if config.detect_installed {
            features.detect_installed(&config.comfy_backend_folder, NODE_FOLDER, FEATURE_ID);
        }

        let params = SkimParams::register(registry)?;
        let table = params.mode_table();
        table.validate(registry)?;
        debug!("SkimmedCFG registered {} modes", Mode::ALL.len());

        Ok(Self {
            params,
            table,
            cfg_scale: core.cfg_scale.clone(),
        })
    }

    /// Parameter handles
    pub fn params(&self) -> &SkimParams {
        &self.params
    }

    /// Mode to used-parameters table
    pub fn mode_table(&self) -> &ModeTable {
        &self.table
    }

    /// Build the node arguments for `node_type` and the set of parameters
    /// the mode does not use. Unknown node classes get only the model.
    pub fn plan(
        &self,
        node_type: &str,
        registry: &ParamRegistry,
        values: &ParamValueSet,
        model: &NodeRef,
    ) -> Result<SkimNodePlan> {
        let mut arguments = ArgumentBag::new();
        arguments.insert("model".to_string(), model.into());

        let mode = Mode::from_node_type(node_type);
        let excluded = match mode {
            Some(mode) => {
                let args = self.params.read_args(mode, registry, values)?;
                args.write_into(&mut arguments)?;
                if self.table.used_params(mode).is_none() {
                    debug!("Mode '{}' declares no parameters, nothing to prune", mode);
                }
                self.table.excluded_for(mode)
            }
            None => {
                warn!("Unknown SkimmedCFG mode '{}', node gets only the model", node_type);
                BTreeSet::new()
            }
        };

        Ok(SkimNodePlan {
            node_type: node_type.to_string(),
            mode,
            arguments,
            excluded,
        })
    }
}

impl ModelGenStep for SkimmedCfgExtension {
    fn priority(&self) -> f64 {
        STEP_PRIORITY
    }

    fn apply(&self, g: &mut WorkflowGenerator<'_>) -> Result<()> {
        let Some(node_type) = g.user_input.try_get_typed(&self.params.mode) else {
            return Ok(());
        };

        if !g.features.contains(FEATURE_ID) {
            return Err(SkimError::FeatureNotInstalled(
                "SkimmedCFG parameters specified, but feature isn't installed".to_string(),
            ));
        }

        if let Some(cfg) = g.user_input.try_get_typed(&self.params.override_core_cfg) {
            debug!("Overriding core CFG scale with {}", cfg);
            g.user_input.set_typed(&self.cfg_scale, cfg);
        }

        let plan = self.plan(&node_type, g.registry, &g.user_input, &g.loading_model)?;
        let removed = g.user_input.retain_except(&plan.excluded);
        if !removed.is_empty() {
            debug!("Pruned parameters unused by '{}': {:?}", plan.node_type, removed);
        }

        let node = g.create_node(plan.node_type.as_str(), plan.arguments);
        info!("Inserted '{}' as node {}", plan.node_type, node);

        g.final_model = NodeRef::new(node.clone(), 0);
        g.loading_model = NodeRef::new(node, 0);
        Ok(())
    }
}
