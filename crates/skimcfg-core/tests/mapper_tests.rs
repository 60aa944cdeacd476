use serde_json::json;
use skimcfg_core::{
    ExtensionConfig, FeatureSet, Mode, ModelGenStep, NodeRef, ParamValue, ParamValueSet, Pipeline,
    SkimError, WorkflowGenerator, FEATURE_ID,
};
use skimcfg_core::{feature::DOWNLOADED_NODES_DIR, GenerationRequest};
use tempfile::TempDir;

fn pipeline() -> Pipeline {
    let config = ExtensionConfig {
        detect_installed: false,
        ..Default::default()
    };
    Pipeline::new(&config).unwrap()
}

fn installed() -> FeatureSet {
    [FEATURE_ID].into_iter().collect()
}

fn set(pipeline: &Pipeline, values: &mut ParamValueSet, id: &str, value: ParamValue) {
    values.set(&pipeline.registry, id, value).unwrap();
}

fn with_mode(pipeline: &Pipeline, mode: Mode) -> ParamValueSet {
    let mut values = ParamValueSet::new();
    let id = pipeline.extension.params().mode.id().to_string();
    set(pipeline, &mut values, &id, ParamValue::Text(mode.node_type().to_string()));
    values
}

/// Sets every SkimmedCFG parameter to a non-default value
fn fill_all(pipeline: &Pipeline, values: &mut ParamValueSet) {
    let p = pipeline.extension.params().clone();
    set(pipeline, values, p.skimming_cfg.id().as_str(), ParamValue::Decimal(5.5));
    set(pipeline, values, p.base_full_skim_negative.id().as_str(), ParamValue::Boolean(true));
    set(pipeline, values, p.base_disable_flipping_filter.id().as_str(), ParamValue::Boolean(true));
    set(pipeline, values, p.skimming_cfg_negative.id().as_str(), ParamValue::Decimal(2.0));
    set(pipeline, values, p.timed_flip_at.id().as_str(), ParamValue::Decimal(0.25));
    set(pipeline, values, p.timed_reverse.id().as_str(), ParamValue::Boolean(true));
    set(
        pipeline,
        values,
        p.difference_method.id().as_str(),
        ParamValue::Text("absolute_sum".into()),
    );
    set(pipeline, values, p.difference_end_at_percentage.id().as_str(), ParamValue::Decimal(0.5));
}

fn skim_node_inputs(pipeline: &Pipeline, values: ParamValueSet) -> serde_json::Value {
    let result = pipeline.generate(values, installed()).unwrap();
    let node = result.workflow.node("2").unwrap();
    serde_json::Value::Object(node.inputs.clone())
}

#[test]
fn test_base_arguments() {
    let pipeline = pipeline();
    let mut values = with_mode(&pipeline, Mode::Base);
    fill_all(&pipeline, &mut values);

    assert_eq!(
        skim_node_inputs(&pipeline, values),
        json!({
            "model": ["1", 0],
            "Skimming_CFG": 5.5,
            "full_skim_negative": true,
            "disable_flipping_filter": true,
        })
    );
}

#[test]
fn test_linear_interpolation_arguments() {
    let pipeline = pipeline();
    let mut values = with_mode(&pipeline, Mode::LinearInterpolation);
    fill_all(&pipeline, &mut values);

    assert_eq!(
        skim_node_inputs(&pipeline, values),
        json!({ "model": ["1", 0], "Skimming_CFG": 5.5 })
    );
}

#[test]
fn test_dual_scales_arguments() {
    let pipeline = pipeline();
    let mut values = with_mode(&pipeline, Mode::LinearInterpolationDualScales);
    fill_all(&pipeline, &mut values);

    assert_eq!(
        skim_node_inputs(&pipeline, values),
        json!({
            "model": ["1", 0],
            "Skimming_CFG_positive": 5.5,
            "Skimming_CFG_negative": 2.0,
        })
    );
}

#[test]
fn test_timed_flip_example() {
    let pipeline = pipeline();
    let p = pipeline.extension.params().clone();
    let mut values = with_mode(&pipeline, Mode::TimedFlip);
    set(&pipeline, &mut values, p.timed_flip_at.id().as_str(), ParamValue::Decimal(0.3));
    set(&pipeline, &mut values, p.timed_reverse.id().as_str(), ParamValue::Boolean(false));
    set(&pipeline, &mut values, p.skimming_cfg.id().as_str(), ParamValue::Decimal(4.0));
    set(&pipeline, &mut values, p.base_full_skim_negative.id().as_str(), ParamValue::Boolean(true));
    set(
        &pipeline,
        &mut values,
        p.difference_method.id().as_str(),
        ParamValue::Text("linear_distance".into()),
    );

    let result = pipeline.generate(values, installed()).unwrap();
    let node = result.workflow.node("2").unwrap();
    assert_eq!(node.class_type, "Skimmed CFG - Timed flip");
    assert_eq!(
        serde_json::Value::Object(node.inputs.clone()),
        json!({ "model": ["1", 0], "flip_at": 0.3, "reverse": false })
    );

    assert!(!result.params.contains(p.skimming_cfg.id().as_str()));
    assert!(!result.params.contains(p.base_full_skim_negative.id().as_str()));
    assert!(!result.params.contains(p.difference_method.id().as_str()));
    assert!(result.params.contains(p.timed_flip_at.id().as_str()));
    assert!(result.params.contains(p.timed_reverse.id().as_str()));
    assert!(result.params.contains(p.mode.id().as_str()));
}

#[test]
fn test_difference_cfg_example() {
    let pipeline = pipeline();
    let p = pipeline.extension.params().clone();
    let mut values = with_mode(&pipeline, Mode::DifferenceCfg);
    set(&pipeline, &mut values, p.skimming_cfg.id().as_str(), ParamValue::Decimal(4.0));
    set(
        &pipeline,
        &mut values,
        p.difference_method.id().as_str(),
        ParamValue::Text("linear_distance".into()),
    );
    set(
        &pipeline,
        &mut values,
        p.difference_end_at_percentage.id().as_str(),
        ParamValue::Decimal(0.8),
    );

    assert_eq!(
        skim_node_inputs(&pipeline, values),
        json!({
            "model": ["1", 0],
            "reference_CFG": 4.0,
            "method": "linear_distance",
            "end_at_percentage": 0.8,
        })
    );
}

#[test]
fn test_replace_passes_only_model_and_prunes_nothing() {
    let pipeline = pipeline();
    let mut values = with_mode(&pipeline, Mode::Replace);
    fill_all(&pipeline, &mut values);
    let before = values.len();

    let result = pipeline.generate(values, installed()).unwrap();
    let node = result.workflow.node("2").unwrap();
    assert_eq!(node.class_type, "Skimmed CFG - replace");
    assert_eq!(serde_json::Value::Object(node.inputs.clone()), json!({ "model": ["1", 0] }));
    assert_eq!(result.params.len(), before);
}

#[test]
fn test_unknown_mode_is_pass_through() {
    let pipeline = pipeline();
    let p = pipeline.extension.params().clone();
    let mut values = ParamValueSet::new();
    fill_all(&pipeline, &mut values);
    values.insert(p.mode.id().clone(), ParamValue::Text("Skimmed CFG - experimental".into()));
    let before = values.clone();

    let result = pipeline.generate(values, installed()).unwrap();
    let node = result.workflow.node("2").unwrap();
    assert_eq!(node.class_type, "Skimmed CFG - experimental");
    assert_eq!(serde_json::Value::Object(node.inputs.clone()), json!({ "model": ["1", 0] }));
    assert_eq!(result.params, before);
}

#[test]
fn test_pruning_per_mode() {
    let pipeline = pipeline();
    let table = pipeline.extension.mode_table();
    let all = table.all_params();

    for mode in Mode::ALL {
        let mut values = with_mode(&pipeline, mode);
        fill_all(&pipeline, &mut values);
        let result = pipeline.generate(values, installed()).unwrap();

        match table.used_params(mode) {
            Some(used) => {
                for id in &all {
                    assert_eq!(
                        result.params.contains(id.as_str()),
                        used.contains(id),
                        "{} in mode {}",
                        id,
                        mode
                    );
                }
            }
            None => {
                for id in &all {
                    assert!(result.params.contains(id.as_str()), "{} in mode {}", id, mode);
                }
            }
        }
    }
}

#[test]
fn test_arguments_only_from_used_params() {
    let pipeline = pipeline();
    let p = pipeline.extension.params().clone();
    let table = pipeline.extension.mode_table();

    // Argument name -> parameter it is read from
    let sources = [
        ("Skimming_CFG", p.skimming_cfg.id()),
        ("full_skim_negative", p.base_full_skim_negative.id()),
        ("disable_flipping_filter", p.base_disable_flipping_filter.id()),
        ("Skimming_CFG_positive", p.skimming_cfg.id()),
        ("Skimming_CFG_negative", p.skimming_cfg_negative.id()),
        ("flip_at", p.timed_flip_at.id()),
        ("reverse", p.timed_reverse.id()),
        ("reference_CFG", p.skimming_cfg.id()),
        ("method", p.difference_method.id()),
        ("end_at_percentage", p.difference_end_at_percentage.id()),
    ];

    for mode in Mode::ALL {
        let plan = pipeline
            .extension
            .plan(
                mode.node_type(),
                &pipeline.registry,
                &ParamValueSet::new(),
                &NodeRef::new("1", 0),
            )
            .unwrap();
        for key in plan.arguments.keys().filter(|k| k.as_str() != "model") {
            let (_, source) = sources.iter().find(|(name, _)| *name == key.as_str()).unwrap();
            assert!(table.used_params(mode).unwrap().contains(*source), "{} in {}", key, mode);
        }
    }
}

#[test]
fn test_mode_unset_is_noop() {
    let pipeline = pipeline();
    let mut values = ParamValueSet::new();
    fill_all(&pipeline, &mut values);
    let override_id = pipeline.extension.params().override_core_cfg.id().clone();
    values.insert(override_id, ParamValue::Decimal(30.0));
    let before = values.clone();

    // Missing feature does not matter without a mode
    let result = pipeline.generate(values, FeatureSet::new()).unwrap();
    assert_eq!(result.workflow.len(), 2);
    assert_eq!(result.params, before);
    assert_eq!(result.workflow.node("2").unwrap().inputs["cfg"], json!(7.0));
}

#[test]
fn test_feature_not_installed() {
    let pipeline = pipeline();
    let values = with_mode(&pipeline, Mode::TimedFlip);
    let mut g = WorkflowGenerator::new(
        &pipeline.registry,
        &pipeline.core,
        values.clone(),
        FeatureSet::new(),
    )
    .unwrap();

    let err = pipeline.extension.apply(&mut g).unwrap_err();
    assert!(matches!(err, SkimError::FeatureNotInstalled(_)));
    assert_eq!(
        err.to_string(),
        "SkimmedCFG parameters specified, but feature isn't installed"
    );
    assert_eq!(g.graph.len(), 1);
    assert_eq!(g.user_input, values);
    assert_eq!(g.final_model, NodeRef::new("1", 0));

    let result = pipeline.generate(values, FeatureSet::new());
    assert!(matches!(result, Err(SkimError::FeatureNotInstalled(_))));
}

#[test]
fn test_override_core_cfg_for_every_mode() {
    let pipeline = pipeline();
    let p = pipeline.extension.params().clone();
    let cfg_id = pipeline.core.cfg_scale.id().clone();

    let mut node_types: Vec<String> = Mode::ALL
        .iter()
        .map(|m| m.node_type().to_string())
        .collect();
    node_types.push("Skimmed CFG - unknown".to_string());

    for node_type in node_types {
        let mut values = ParamValueSet::new();
        values.insert(p.mode.id().clone(), ParamValue::Text(node_type.clone()));
        set(&pipeline, &mut values, p.override_core_cfg.id().as_str(), ParamValue::Decimal(42.5));

        let result = pipeline.generate(values, installed()).unwrap();
        assert_eq!(
            result.params.try_get(cfg_id.as_str()),
            Some(&ParamValue::Decimal(42.5)),
            "{}",
            node_type
        );
        let sampler = result.workflow.node("3").unwrap();
        assert_eq!(sampler.class_type, "KSampler");
        assert_eq!(sampler.inputs["cfg"], json!(42.5));
    }
}

#[test]
fn test_sampler_consumes_skimmed_model() {
    let pipeline = pipeline();
    let values = with_mode(&pipeline, Mode::LinearInterpolation);
    let mut g =
        WorkflowGenerator::new(&pipeline.registry, &pipeline.core, values, installed()).unwrap();

    pipeline.extension.apply(&mut g).unwrap();
    assert_eq!(g.loading_model, NodeRef::new("2", 0));
    assert_eq!(g.final_model, NodeRef::new("2", 0));

    let result = g.generate(&pipeline.steps).unwrap();
    // The step ran again inside generate and chained onto the first node
    let second = result.workflow.node("3").unwrap();
    assert_eq!(second.inputs["model"], json!(["2", 0]));
    let sampler = result.workflow.node("4").unwrap();
    assert_eq!(sampler.inputs["model"], json!(["3", 0]));
}

#[test]
fn test_request_file_flow() {
    let pipeline = pipeline();
    let request = GenerationRequest::from_json_str(
        r#"{
            "params": {
                "[SkimmedCFG] Mode": "Skimmed CFG - Timed flip",
                "[SkimmedCFG] (Timed) Flip At": 0.3,
                "skimmedcfgtimedreverse": false,
                "skimmedcfgskimmingcfg": 4
            },
            "node_types": ["KSampler", "Skimmed CFG - Timed flip"]
        }"#,
    )
    .unwrap();

    let result = pipeline.generate_request(&request).unwrap();
    let json = result.workflow.to_json().unwrap();
    assert_eq!(json["2"]["class_type"], "Skimmed CFG - Timed flip");
    assert_eq!(json["2"]["inputs"]["flip_at"], json!(0.3));
    assert_eq!(json["3"]["inputs"]["model"], json!(["2", 0]));
    assert!(!result.params.contains("skimmedcfgskimmingcfg"));
}

#[test]
fn test_request_rejects_invalid_values() {
    let pipeline = pipeline();
    let request = GenerationRequest::from_json_str(
        r#"{ "params": { "skimmedcfgmode": "Skimmed CFG - nope" }, "features": ["skimmedcfg"] }"#,
    )
    .unwrap();
    assert!(matches!(
        pipeline.generate_request(&request),
        Err(SkimError::InvalidChoice { .. })
    ));

    let request = GenerationRequest::from_json_str(
        r#"{ "params": { "skimmedcfgtimedflipat": 1.5 } }"#,
    )
    .unwrap();
    assert!(matches!(
        pipeline.generate_request(&request),
        Err(SkimError::OutOfRange { .. })
    ));
}

#[test]
fn test_requests_do_not_share_feature_state() {
    let dir = TempDir::new().unwrap();
    let node_dir = dir.path().join(DOWNLOADED_NODES_DIR).join("Skimmed_CFG");
    std::fs::create_dir_all(node_dir).unwrap();
    let config = ExtensionConfig {
        comfy_backend_folder: dir.path().to_path_buf(),
        ..Default::default()
    };
    let pipeline = Pipeline::new(&config).unwrap();

    let uses_detected =
        GenerationRequest::from_json_str(r#"{ "params": { "skimmedcfgmode": "Skimmed CFG" } }"#)
            .unwrap();
    let reports_nodes =
        GenerationRequest::from_json_str(r#"{ "node_types": ["KSampler"] }"#).unwrap();

    let first = pipeline.generate_request(&uses_detected).unwrap();
    assert_eq!(first.workflow.len(), 3);

    // A backend report without the node only affects its own request
    let reported = pipeline.generate_request(&reports_nodes).unwrap();
    assert_eq!(reported.workflow.len(), 2);
    assert!(pipeline.features.supported.contains(FEATURE_ID));

    let second = pipeline.generate_request(&uses_detected).unwrap();
    assert_eq!(second.workflow.len(), 3);
    assert_eq!(second.workflow.to_json().unwrap(), first.workflow.to_json().unwrap());
}
