//! Data exposed to the UI layer
//!
//! Nothing here affects request processing. It describes how the parameter
//! group should be laid out and whether to show the install button.

use crate::extension::{installable_feature, FEATURE_ID};
use crate::feature::FeatureSet;
use crate::mode::{DifferenceMethod, Mode};
use crate::param::{ParamChoice, ParamKind, ParamRegistry, ParamValue, ViewType};
use serde::Serialize;

/// Selectable modes as `(id, label)`
pub fn mode_choices() -> Vec<ParamChoice> {
    Mode::ALL.iter().map(Mode::choice).collect()
}

/// Selectable difference methods as `(id, label)`
pub fn difference_method_choices() -> Vec<ParamChoice> {
    DifferenceMethod::ALL.iter().map(DifferenceMethod::choice).collect()
}

/// Encode choices in the `id///label` form front-ends expect
pub fn encode_choices(choices: &[ParamChoice]) -> Vec<String> {
    choices.iter().map(ParamChoice::encoded).collect()
}

/// One parameter as rendered in its group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamLayout {
    /// Parameter id
    pub id: String,
    /// Display name
    pub name: String,
    /// Tooltip
    pub description: String,
    /// Value kind
    pub kind: ParamKind,
    /// Default value
    pub default: ParamValue,
    /// Lower bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Slider step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    /// Rendering hint
    pub view_type: ViewType,
    /// Encoded choices
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    /// Hidden behind the advanced switch
    pub advanced: bool,
    /// Has its own toggle
    pub toggleable: bool,
    /// Ordering within the group
    pub order_priority: f64,
}

/// A parameter group and its parameters in display order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupLayout {
    /// Group name
    pub name: String,
    /// Group-level toggle
    pub toggles: bool,
    /// Starts expanded
    pub open: bool,
    /// Advanced-only group
    pub advanced: bool,
    /// Ordering among groups
    pub order_priority: f64,
    /// Parameters in display order
    pub params: Vec<ParamLayout>,
}

/// Layout of a registered group, `None` if the group is unknown
pub fn group_layout(registry: &ParamRegistry, group: &str) -> Option<GroupLayout> {
    let info = registry.group(group)?;
    let params = registry
        .in_group(group)
        .into_iter()
        .map(|spec| ParamLayout {
            id: spec.id.to_string(),
            name: spec.name.clone(),
            description: spec.description.clone(),
            kind: spec.kind,
            default: spec.default.clone(),
            min: spec.min,
            max: spec.max,
            step: spec.step,
            view_type: spec.view_type,
            choices: encode_choices(&spec.choices),
            advanced: spec.advanced,
            toggleable: spec.toggleable,
            order_priority: spec.order_priority,
        })
        .collect();

    Some(GroupLayout {
        name: info.name.clone(),
        toggles: info.toggles,
        open: info.open,
        advanced: info.advanced,
        order_priority: info.order_priority,
        params,
    })
}

/// Install button appended to the parameter group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallPrompt {
    /// Element id of the button
    pub element_id: String,
    /// Group content element the button goes into
    pub group_element_id: String,
    /// CSS class of the wrapper; keeps the group shown while collapsed
    pub class: String,
    /// Button label
    pub label: String,
    /// Feature to install on click
    pub feature_id: String,
    /// Confirmation text
    pub notice: String,
}

/// Install prompt to show when the feature is not available
pub fn install_prompt(features: &FeatureSet) -> Option<InstallPrompt> {
    if features.contains(FEATURE_ID) {
        return None;
    }
    let feature = installable_feature();
    Some(InstallPrompt {
        element_id: format!("reactor_{}_install_button", FEATURE_ID),
        group_element_id: format!("input_group_content_{}", FEATURE_ID),
        class: "keep_group_visible".to_string(),
        label: "Install SkimmedCFG".to_string(),
        feature_id: feature.feature_id,
        notice: feature.notice,
    })
}
