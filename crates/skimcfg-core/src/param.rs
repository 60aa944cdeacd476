//! Parameter System - Typed Request Parameters
//!
//! Parameters are registered once at startup as immutable [`ParamSpec`]s.
//! Every generation request then carries its own [`ParamValueSet`], which is
//! validated against the registry on the way in and may be pruned before the
//! request is finalized.

use crate::error::{Result, SkimError};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::marker::PhantomData;

/// Separator between a choice id and its display label
pub const CHOICE_SEPARATOR: &str = "///";

/// Cleaned parameter identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamId(String);

impl ParamId {
    /// Derive an id from a display name: lowercase ASCII letters and digits only
    pub fn from_name(name: &str) -> Self {
        Self(
            name.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .map(|c| c.to_ascii_lowercase())
                .collect(),
        )
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ParamId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Semantic type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
    /// Free text or enumerated string
    Text,
    /// Floating point number
    Decimal,
    /// On/off flag
    Boolean,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::Text => "text",
            ParamKind::Decimal => "decimal",
            ParamKind::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Concrete value of a parameter for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean value
    Boolean(bool),
    /// Decimal value
    Decimal(f64),
    /// Text value
    Text(String),
}

impl ParamValue {
    /// Kind of this value
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Boolean(_) => ParamKind::Boolean,
            ParamValue::Decimal(_) => ParamKind::Decimal,
            ParamValue::Text(_) => ParamKind::Text,
        }
    }

    /// Convert a JSON value, rejecting arrays, objects and null
    pub fn from_json(id: &ParamId, value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Bool(b) => Ok(ParamValue::Boolean(*b)),
            serde_json::Value::String(s) => Ok(ParamValue::Text(s.clone())),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(ParamValue::Decimal)
                .ok_or_else(|| mismatch(id, ParamKind::Decimal, "number")),
            other => Err(mismatch(id, ParamKind::Text, json_type_name(other))),
        }
    }

    /// Coerce into the given kind. Text is parsed for decimal and boolean
    /// parameters since hosts commonly transport values as strings.
    fn coerce(self, id: &ParamId, kind: ParamKind) -> Result<Self> {
        match (kind, self) {
            (ParamKind::Decimal, ParamValue::Decimal(v)) => Ok(ParamValue::Decimal(v)),
            (ParamKind::Boolean, ParamValue::Boolean(b)) => Ok(ParamValue::Boolean(b)),
            (ParamKind::Text, ParamValue::Text(s)) => Ok(ParamValue::Text(s)),
            (ParamKind::Decimal, ParamValue::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map(ParamValue::Decimal)
                .map_err(|_| mismatch(id, kind, "text")),
            (ParamKind::Boolean, ParamValue::Text(s)) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(ParamValue::Boolean(true)),
                    "false" => Ok(ParamValue::Boolean(false)),
                    _ => Err(mismatch(id, kind, "text")),
                }
            }
            (kind, other) => Err(mismatch(id, kind, &other.kind().to_string())),
        }
    }
}

impl From<&ParamValue> for serde_json::Value {
    fn from(value: &ParamValue) -> Self {
        match value {
            ParamValue::Boolean(b) => serde_json::Value::Bool(*b),
            ParamValue::Decimal(v) => serde_json::Value::from(*v),
            ParamValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

fn mismatch(id: &ParamId, expected: ParamKind, found: &str) -> SkimError {
    SkimError::TypeMismatch {
        id: id.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "text",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Rust types that can be read out of a [`ParamValue`]
pub trait ParamType: Sized {
    /// Kind a parameter of this type is registered with
    const KIND: ParamKind;

    /// Extract from a value of the matching kind
    fn from_value(value: &ParamValue) -> Option<Self>;

    /// Wrap into a value
    fn into_value(self) -> ParamValue;
}

impl ParamType for f64 {
    const KIND: ParamKind = ParamKind::Decimal;

    fn from_value(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    fn into_value(self) -> ParamValue {
        ParamValue::Decimal(self)
    }
}

impl ParamType for bool {
    const KIND: ParamKind = ParamKind::Boolean;

    fn from_value(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    fn into_value(self) -> ParamValue {
        ParamValue::Boolean(self)
    }
}

impl ParamType for String {
    const KIND: ParamKind = ParamKind::Text;

    fn from_value(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> ParamValue {
        ParamValue::Text(self)
    }
}

/// Typed handle to a registered parameter
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Param<T> {
    id: ParamId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Param<T> {
    /// Id of the referenced parameter
    pub fn id(&self) -> &ParamId {
        &self.id
    }
}

impl<T> Clone for Param<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

/// How the UI should render a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ViewType {
    /// Default input box, checkbox or dropdown
    #[default]
    Normal,
    /// Slider with numeric entry
    Slider,
}

/// One selectable option of an enumerated parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamChoice {
    /// Internal value stored in the request
    pub id: String,
    /// Label shown to the user
    pub label: String,
}

impl ParamChoice {
    /// Create a choice
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }

    /// Parse `id///label`. Without a separator the label equals the id.
    pub fn parse(encoded: &str) -> Self {
        match encoded.split_once(CHOICE_SEPARATOR) {
            Some((id, label)) => Self::new(id, label),
            None => Self::new(encoded, encoded),
        }
    }

    /// Encode as `id///label`
    pub fn encoded(&self) -> String {
        format!("{}{}{}", self.id, CHOICE_SEPARATOR, self.label)
    }
}

/// Display group for a set of parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGroup {
    /// Group name
    pub name: String,
    /// Whether the whole group can be toggled on and off
    pub toggles: bool,
    /// Whether the group starts expanded
    pub open: bool,
    /// Whether the group is hidden behind the advanced switch
    pub advanced: bool,
    /// Ordering among groups
    pub order_priority: f64,
}

impl ParamGroup {
    /// Create a closed, basic group
    pub fn new(name: impl Into<String>, order_priority: f64) -> Self {
        Self {
            name: name.into(),
            toggles: false,
            open: false,
            advanced: false,
            order_priority,
        }
    }
}

/// Immutable description of a parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Cleaned id
    pub id: ParamId,
    /// Display name
    pub name: String,
    /// Tooltip text
    pub description: String,
    /// Semantic type
    pub kind: ParamKind,
    /// Value used when the request does not set one
    pub default: ParamValue,
    /// Lower bound for decimals
    pub min: Option<f64>,
    /// Upper bound for decimals
    pub max: Option<f64>,
    /// UI step for decimals
    pub step: Option<f64>,
    /// UI rendering hint
    pub view_type: ViewType,
    /// Allowed values for enumerated text parameters
    pub choices: Vec<ParamChoice>,
    /// Display group name
    pub group: Option<String>,
    /// Hidden behind the advanced switch
    pub advanced: bool,
    /// Has its own enable toggle
    pub toggleable: bool,
    /// Feature that must be available for this parameter to apply
    pub feature_flag: Option<String>,
    /// Ordering within the group
    pub order_priority: f64,
    /// How strongly a change invalidates cached previews
    pub change_weight: i32,
}

impl ParamSpec {
    /// Create a spec; the kind follows the default value
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        default: ParamValue,
    ) -> Self {
        let name = name.into();
        Self {
            id: ParamId::from_name(&name),
            name,
            description: description.into(),
            kind: default.kind(),
            default,
            min: None,
            max: None,
            step: None,
            view_type: ViewType::Normal,
            choices: Vec::new(),
            group: None,
            advanced: false,
            toggleable: false,
            feature_flag: None,
            order_priority: 0.0,
            change_weight: 0,
        }
    }

    /// Set numeric bounds and step
    pub fn range(mut self, min: f64, max: f64, step: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self.step = Some(step);
        self
    }

    /// Render as a slider
    pub fn slider(mut self) -> Self {
        self.view_type = ViewType::Slider;
        self
    }

    /// Restrict to the given choices
    pub fn choices(mut self, choices: Vec<ParamChoice>) -> Self {
        self.choices = choices;
        self
    }

    /// Place in a display group
    pub fn group(mut self, group: &ParamGroup) -> Self {
        self.group = Some(group.name.clone());
        self
    }

    /// Mark as advanced
    pub fn advanced(mut self) -> Self {
        self.advanced = true;
        self
    }

    /// Give the parameter its own enable toggle
    pub fn toggleable(mut self) -> Self {
        self.toggleable = true;
        self
    }

    /// Gate the parameter behind a feature
    pub fn feature_flag(mut self, feature: impl Into<String>) -> Self {
        self.feature_flag = Some(feature.into());
        self
    }

    /// Set ordering within the group
    pub fn order_priority(mut self, priority: f64) -> Self {
        self.order_priority = priority;
        self
    }

    /// Set change weight
    pub fn change_weight(mut self, weight: i32) -> Self {
        self.change_weight = weight;
        self
    }

    /// Validate a value against kind, bounds and choices, returning the
    /// normalized value.
    pub fn validate(&self, value: ParamValue) -> Result<ParamValue> {
        let value = value.coerce(&self.id, self.kind)?;
        match &value {
            ParamValue::Decimal(v) => {
                let min = self.min.unwrap_or(f64::MIN);
                let max = self.max.unwrap_or(f64::MAX);
                if !v.is_finite() || !(min..=max).contains(v) {
                    return Err(SkimError::OutOfRange {
                        id: self.id.to_string(),
                        value: *v,
                        min,
                        max,
                    });
                }
            }
            ParamValue::Text(s) => {
                if !self.choices.is_empty() && !self.choices.iter().any(|c| &c.id == s) {
                    return Err(SkimError::InvalidChoice {
                        id: self.id.to_string(),
                        value: s.clone(),
                    });
                }
            }
            ParamValue::Boolean(_) => {}
        }
        Ok(value)
    }
}

/// Registry of all known parameters, in registration order
#[derive(Debug, Clone, Default)]
pub struct ParamRegistry {
    specs: Vec<ParamSpec>,
    index: HashMap<ParamId, usize>,
    groups: Vec<ParamGroup>,
}

impl ParamRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a display group. Re-registering a name replaces it.
    pub fn register_group(&mut self, group: ParamGroup) {
        match self.groups.iter_mut().find(|g| g.name == group.name) {
            Some(existing) => *existing = group,
            None => self.groups.push(group),
        }
    }

    /// Register a parameter and return a typed handle to it
    pub fn register<T: ParamType>(&mut self, spec: ParamSpec) -> Result<Param<T>> {
        if self.index.contains_key(&spec.id) {
            return Err(SkimError::DuplicateParameter(spec.id.to_string()));
        }
        if spec.kind != T::KIND {
            return Err(mismatch(&spec.id, T::KIND, &spec.kind.to_string()));
        }
        spec.validate(spec.default.clone())?;

        let id = spec.id.clone();
        self.index.insert(id.clone(), self.specs.len());
        self.specs.push(spec);

        Ok(Param {
            id,
            _marker: PhantomData,
        })
    }

    /// Look up a parameter
    pub fn get(&self, id: &str) -> Option<&ParamSpec> {
        self.index.get(id).map(|&i| &self.specs[i])
    }

    /// Look up a parameter, failing if it is not registered
    pub fn require(&self, id: &str) -> Result<&ParamSpec> {
        self.get(id)
            .ok_or_else(|| SkimError::UnknownParameter(id.to_string()))
    }

    /// Whether a parameter is registered
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Number of registered parameters
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Look up a display group
    pub fn group(&self, name: &str) -> Option<&ParamGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Parameters of a group sorted by order priority
    pub fn in_group(&self, name: &str) -> Vec<&ParamSpec> {
        let mut specs: Vec<&ParamSpec> = self
            .specs
            .iter()
            .filter(|s| s.group.as_deref() == Some(name))
            .collect();
        specs.sort_by(|a, b| a.order_priority.total_cmp(&b.order_priority));
        specs
    }
}

/// Parameter values of a single request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamValueSet {
    values: BTreeMap<ParamId, ParamValue>,
}

impl ParamValueSet {
    /// Create an empty value set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object, validating every entry. Keys may be ids or
    /// display names.
    pub fn from_json(
        registry: &ParamRegistry,
        map: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self> {
        let mut set = Self::new();
        for (key, raw) in map {
            let id = ParamId::from_name(key);
            let value = ParamValue::from_json(&id, raw)?;
            set.set(registry, id.as_str(), value)?;
        }
        Ok(set)
    }

    /// Validate and store a value
    pub fn set(&mut self, registry: &ParamRegistry, id: &str, value: ParamValue) -> Result<()> {
        let spec = registry.require(id)?;
        let value = spec.validate(value)?;
        self.values.insert(spec.id.clone(), value);
        Ok(())
    }

    /// Store a value without validation
    pub fn insert(&mut self, id: ParamId, value: ParamValue) -> Option<ParamValue> {
        self.values.insert(id, value)
    }

    /// Store a typed value without validation
    pub fn set_typed<T: ParamType>(&mut self, param: &Param<T>, value: T) {
        self.values.insert(param.id.clone(), value.into_value());
    }

    /// Explicitly set value, if any
    pub fn try_get(&self, id: &str) -> Option<&ParamValue> {
        self.values.get(id)
    }

    /// Explicitly set typed value, if any and of the right kind
    pub fn try_get_typed<T: ParamType>(&self, param: &Param<T>) -> Option<T> {
        self.values.get(param.id.as_str()).and_then(T::from_value)
    }

    /// Explicit value, falling back to the registered default
    pub fn get<T: ParamType>(&self, registry: &ParamRegistry, param: &Param<T>) -> Result<T> {
        let spec = registry.require(param.id.as_str())?;
        let value = self.values.get(param.id.as_str()).unwrap_or(&spec.default);
        T::from_value(value).ok_or_else(|| mismatch(&spec.id, T::KIND, &value.kind().to_string()))
    }

    /// Drop every entry whose id is in `excluded`, returning the removed ids
    pub fn retain_except(&mut self, excluded: &BTreeSet<ParamId>) -> Vec<ParamId> {
        let removed: Vec<ParamId> = self
            .values
            .keys()
            .filter(|id| excluded.contains(*id))
            .cloned()
            .collect();
        self.values.retain(|id, _| !excluded.contains(id));
        removed
    }

    /// Whether a value is set
    pub fn contains(&self, id: &str) -> bool {
        self.values.contains_key(id)
    }

    /// Number of explicit values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no value is set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_scale() -> (ParamRegistry, Param<f64>) {
        let mut registry = ParamRegistry::new();
        let scale = registry
            .register::<f64>(
                ParamSpec::new("[Test] Scale", "", ParamValue::Decimal(4.0)).range(0.0, 10.0, 0.5),
            )
            .unwrap();
        (registry, scale)
    }

    #[test]
    fn test_param_id_cleaning() {
        assert_eq!(ParamId::from_name("[SkimmedCFG] Mode").as_str(), "skimmedcfgmode");
        assert_eq!(
            ParamId::from_name("[SkimmedCFG] (Timed) Flip At").as_str(),
            "skimmedcfgtimedflipat"
        );
        assert_eq!(ParamId::from_name("CFG Scale").as_str(), "cfgscale");
    }

    #[test]
    fn test_choice_parsing() {
        let choice = ParamChoice::parse("linear_distance///Linear Distance");
        assert_eq!(choice.id, "linear_distance");
        assert_eq!(choice.label, "Linear Distance");
        assert_eq!(choice.encoded(), "linear_distance///Linear Distance");

        let bare = ParamChoice::parse("plain");
        assert_eq!(bare.label, "plain");
    }

    #[test]
    fn test_duplicate_registration() {
        let (mut registry, _) = registry_with_scale();
        let result =
            registry.register::<f64>(ParamSpec::new("[Test] Scale", "", ParamValue::Decimal(1.0)));
        assert!(matches!(result, Err(SkimError::DuplicateParameter(_))));
    }

    #[test]
    fn test_register_rejects_bad_default() {
        let mut registry = ParamRegistry::new();
        let out_of_range = registry.register::<f64>(
            ParamSpec::new("A", "", ParamValue::Decimal(11.0)).range(0.0, 10.0, 1.0),
        );
        assert!(matches!(out_of_range, Err(SkimError::OutOfRange { .. })));

        let wrong_handle =
            registry.register::<bool>(ParamSpec::new("B", "", ParamValue::Decimal(1.0)));
        assert!(matches!(wrong_handle, Err(SkimError::TypeMismatch { .. })));

        let bad_choice = registry.register::<String>(
            ParamSpec::new("C", "", ParamValue::Text("x".into()))
                .choices(vec![ParamChoice::new("y", "Y")]),
        );
        assert!(matches!(bad_choice, Err(SkimError::InvalidChoice { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_get_falls_back_to_default() {
        let (registry, scale) = registry_with_scale();
        let mut values = ParamValueSet::new();
        assert_eq!(values.get(&registry, &scale).unwrap(), 4.0);
        assert!(values.try_get_typed(&scale).is_none());

        values.set(&registry, "testscale", ParamValue::Decimal(2.5)).unwrap();
        assert_eq!(values.get(&registry, &scale).unwrap(), 2.5);
        assert_eq!(values.try_get_typed(&scale), Some(2.5));
    }

    #[test]
    fn test_set_validation() {
        let (registry, _) = registry_with_scale();
        let mut values = ParamValueSet::new();

        let err = values
            .set(&registry, "testscale", ParamValue::Decimal(10.5))
            .unwrap_err();
        assert!(matches!(err, SkimError::OutOfRange { max, .. } if max == 10.0));

        let err = values
            .set(&registry, "testscale", ParamValue::Boolean(true))
            .unwrap_err();
        assert!(matches!(err, SkimError::TypeMismatch { .. }));

        let err = values
            .set(&registry, "missing", ParamValue::Decimal(1.0))
            .unwrap_err();
        assert!(matches!(err, SkimError::UnknownParameter(_)));

        for text in ["NaN", "inf", "-inf"] {
            let err = values
                .set(&registry, "testscale", ParamValue::Text(text.into()))
                .unwrap_err();
            assert!(matches!(err, SkimError::OutOfRange { .. }), "{}", text);
        }

        // Text is parsed for decimals
        values
            .set(&registry, "testscale", ParamValue::Text(" 3.5 ".into()))
            .unwrap();
        assert_eq!(values.try_get("testscale"), Some(&ParamValue::Decimal(3.5)));
    }

    #[test]
    fn test_from_json_accepts_display_names() {
        let (registry, scale) = registry_with_scale();
        let json = serde_json::json!({ "[Test] Scale": 6 });
        let values = ParamValueSet::from_json(&registry, json.as_object().unwrap()).unwrap();
        assert_eq!(values.try_get_typed(&scale), Some(6.0));

        let json = serde_json::json!({ "testscale": [1, 2] });
        let err = ParamValueSet::from_json(&registry, json.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, SkimError::TypeMismatch { .. }));
    }

    #[test]
    fn test_retain_except() {
        let mut values = ParamValueSet::new();
        assert!(values.is_empty());
        values.insert(ParamId::from_name("a"), ParamValue::Boolean(true));
        values.insert(ParamId::from_name("b"), ParamValue::Boolean(false));

        let excluded: BTreeSet<ParamId> = [ParamId::from_name("b"), ParamId::from_name("c")]
            .into_iter()
            .collect();
        let removed = values.retain_except(&excluded);

        assert_eq!(removed, vec![ParamId::from_name("b")]);
        assert_eq!(values.len(), 1);
        assert!(values.contains("a"));
        assert!(!values.contains("b"));
    }

    #[test]
    fn test_group_ordering() {
        let mut registry = ParamRegistry::new();
        let group = ParamGroup::new("G", 1.0);
        registry.register_group(group.clone());
        registry
            .register::<bool>(
                ParamSpec::new("Second", "", ParamValue::Boolean(false))
                    .group(&group)
                    .order_priority(2.0),
            )
            .unwrap();
        registry
            .register::<bool>(
                ParamSpec::new("First", "", ParamValue::Boolean(false))
                    .group(&group)
                    .order_priority(1.0),
            )
            .unwrap();

        let names: Vec<&str> = registry
            .in_group("G")
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["First", "Second"]);
    }
}
