//! Skimmed CFG modes and their typed node arguments
//!
//! Each [`Mode`] corresponds to exactly one node class of the external
//! Skimmed_CFG custom node pack. The arguments a mode sends are modelled as
//! one struct per mode, collected in [`SkimArgs`].

use crate::error::{Result, SkimError};
use crate::param::{ParamChoice, ParamId, ParamRegistry};
use crate::workflow::ArgumentBag;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Variant of the CFG skimming algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Reference skimming algorithm
    Base,
    /// Interpolates instead of replacing
    LinearInterpolation,
    /// Interpolation with separate positive and negative scales
    LinearInterpolationDualScales,
    /// Replaces targeted negative values with the positive prediction
    Replace,
    /// Flips the skimming direction part way through sampling
    TimedFlip,
    /// Difference-based correction against a reference scale
    DifferenceCfg,
}

impl Mode {
    /// All modes in the order they are offered to the user
    pub const ALL: [Mode; 6] = [
        Mode::Base,
        Mode::LinearInterpolation,
        Mode::LinearInterpolationDualScales,
        Mode::Replace,
        Mode::TimedFlip,
        Mode::DifferenceCfg,
    ];

    /// Node class name, also the value stored in the mode parameter
    pub fn node_type(&self) -> &'static str {
        match self {
            Mode::Base => "Skimmed CFG",
            Mode::LinearInterpolation => "Skimmed CFG - linear interpolation",
            Mode::LinearInterpolationDualScales => "Skimmed CFG - linear interpolation dual scales",
            Mode::Replace => "Skimmed CFG - replace",
            Mode::TimedFlip => "Skimmed CFG - Timed flip",
            Mode::DifferenceCfg => "Skimmed CFG - Difference CFG",
        }
    }

    /// Label shown in the mode dropdown
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Base => "Base",
            Mode::LinearInterpolation => "Linear Interpolation",
            Mode::LinearInterpolationDualScales => "Linear Interpolation Dual Scales",
            Mode::Replace => "Replace",
            Mode::TimedFlip => "Timed Flip",
            Mode::DifferenceCfg => "Difference CFG",
        }
    }

    /// Exact match on the node class name
    pub fn from_node_type(node_type: &str) -> Option<Mode> {
        Mode::ALL.into_iter().find(|m| m.node_type() == node_type)
    }

    /// Dropdown entry for this mode
    pub fn choice(&self) -> ParamChoice {
        ParamChoice::new(self.node_type(), self.label())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Distance measure used by [`Mode::DifferenceCfg`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceMethod {
    /// Linear distance
    LinearDistance,
    /// Squared distance
    SquaredDistance,
    /// Root distance
    RootDistance,
    /// Absolute sum
    AbsoluteSum,
}

impl DifferenceMethod {
    /// All methods in dropdown order
    pub const ALL: [DifferenceMethod; 4] = [
        DifferenceMethod::LinearDistance,
        DifferenceMethod::SquaredDistance,
        DifferenceMethod::RootDistance,
        DifferenceMethod::AbsoluteSum,
    ];

    /// Value sent to the node
    pub fn as_str(&self) -> &'static str {
        match self {
            DifferenceMethod::LinearDistance => "linear_distance",
            DifferenceMethod::SquaredDistance => "squared_distance",
            DifferenceMethod::RootDistance => "root_distance",
            DifferenceMethod::AbsoluteSum => "absolute_sum",
        }
    }

    /// Label shown in the dropdown
    pub fn label(&self) -> &'static str {
        match self {
            DifferenceMethod::LinearDistance => "Linear Distance",
            DifferenceMethod::SquaredDistance => "Squared Distance",
            DifferenceMethod::RootDistance => "Root Distance",
            DifferenceMethod::AbsoluteSum => "Absolute Sum",
        }
    }

    /// Parse the node value
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == value)
    }

    /// Dropdown entry for this method
    pub fn choice(&self) -> ParamChoice {
        ParamChoice::new(self.as_str(), self.label())
    }
}

/// Arguments of the `Skimmed CFG` node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseArgs {
    /// Skimming scale
    #[serde(rename = "Skimming_CFG")]
    pub skimming_cfg: f64,
    /// Fully skim conflicting influence
    pub full_skim_negative: bool,
    /// Disable the flipping filter
    pub disable_flipping_filter: bool,
}

/// Arguments of the linear interpolation node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinearInterpolationArgs {
    /// Skimming scale
    #[serde(rename = "Skimming_CFG")]
    pub skimming_cfg: f64,
}

/// Arguments of the dual scales node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DualScalesArgs {
    /// Positive skimming scale
    #[serde(rename = "Skimming_CFG_positive")]
    pub positive: f64,
    /// Negative skimming scale
    #[serde(rename = "Skimming_CFG_negative")]
    pub negative: f64,
}

/// Arguments of the timed flip node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedFlipArgs {
    /// Fraction of the step progression at which to flip
    pub flip_at: f64,
    /// Reverse the flip
    pub reverse: bool,
}

/// Arguments of the difference CFG node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifferenceCfgArgs {
    /// Reference scale
    #[serde(rename = "reference_CFG")]
    pub reference_cfg: f64,
    /// Distance measure
    pub method: DifferenceMethod,
    /// Fraction of the step progression after which the node stops acting
    pub end_at_percentage: f64,
}

/// Per-mode node arguments
#[derive(Debug, Clone, PartialEq)]
pub enum SkimArgs {
    /// [`Mode::Base`]
    Base(BaseArgs),
    /// [`Mode::LinearInterpolation`]
    LinearInterpolation(LinearInterpolationArgs),
    /// [`Mode::LinearInterpolationDualScales`]
    LinearInterpolationDualScales(DualScalesArgs),
    /// [`Mode::Replace`]; the node takes no arguments besides the model
    Replace,
    /// [`Mode::TimedFlip`]
    TimedFlip(TimedFlipArgs),
    /// [`Mode::DifferenceCfg`]
    DifferenceCfg(DifferenceCfgArgs),
}

impl SkimArgs {
    /// Mode these arguments belong to
    pub fn mode(&self) -> Mode {
        match self {
            SkimArgs::Base(_) => Mode::Base,
            SkimArgs::LinearInterpolation(_) => Mode::LinearInterpolation,
            SkimArgs::LinearInterpolationDualScales(_) => Mode::LinearInterpolationDualScales,
            SkimArgs::Replace => Mode::Replace,
            SkimArgs::TimedFlip(_) => Mode::TimedFlip,
            SkimArgs::DifferenceCfg(_) => Mode::DifferenceCfg,
        }
    }

    /// Append the arguments to a node's argument bag
    pub fn write_into(&self, bag: &mut ArgumentBag) -> Result<()> {
        let value = match self {
            SkimArgs::Base(args) => serde_json::to_value(args)?,
            SkimArgs::LinearInterpolation(args) => serde_json::to_value(args)?,
            SkimArgs::LinearInterpolationDualScales(args) => serde_json::to_value(args)?,
            SkimArgs::Replace => return Ok(()),
            SkimArgs::TimedFlip(args) => serde_json::to_value(args)?,
            SkimArgs::DifferenceCfg(args) => serde_json::to_value(args)?,
        };
        if let serde_json::Value::Object(map) = value {
            bag.extend(map);
        }
        Ok(())
    }
}

/// Parameters consumed by each mode.
///
/// Built once when the extension initializes and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModeTable {
    used: BTreeMap<Mode, BTreeSet<ParamId>>,
}

impl ModeTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the parameters a mode consumes
    pub fn with(mut self, mode: Mode, params: impl IntoIterator<Item = ParamId>) -> Self {
        self.used.entry(mode).or_default().extend(params);
        self
    }

    /// Parameters consumed by a mode, if the mode has an entry
    pub fn used_params(&self, mode: Mode) -> Option<&BTreeSet<ParamId>> {
        self.used.get(&mode)
    }

    /// Union of all modes' parameters
    pub fn all_params(&self) -> BTreeSet<ParamId> {
        self.used.values().flatten().cloned().collect()
    }

    /// Parameters used by some mode but not by `mode`. Empty when `mode`
    /// has no entry, so nothing gets pruned for it.
    pub fn excluded_for(&self, mode: Mode) -> BTreeSet<ParamId> {
        match self.used_params(mode) {
            Some(active) => self
                .all_params()
                .into_iter()
                .filter(|id| !active.contains(id))
                .collect(),
            None => BTreeSet::new(),
        }
    }

    /// Check that every referenced parameter is registered
    pub fn validate(&self, registry: &ParamRegistry) -> Result<()> {
        match self.all_params().into_iter().find(|id| !registry.contains(id.as_str())) {
            Some(missing) => Err(SkimError::UnknownParameter(missing.to_string())),
            None => Ok(()),
        }
    }
}
