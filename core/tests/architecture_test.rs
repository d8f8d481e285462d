//! End-to-end tests for the stage composer, feature-map encoder,
//! configuration and classifier.

use dcnn_core::*;
use ndarray::{s, Array1, Array2, Array3, ArrayD};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

fn rng(seed: u64) -> Xoshiro256PlusPlus {
    Xoshiro256PlusPlus::seed_from_u64(seed)
}

/// Deterministic non-constant input of shape `(batch, len, channels)`.
fn wavy_input(batch: usize, len: usize, channels: usize) -> SequenceTensor {
    SequenceTensor::from_array(Array3::from_shape_fn((batch, len, channels), |(b, p, c)| {
        (((b + 1) * (p * 13 + c * 7 + 3)) % 29) as f32 / 29.0 - 0.5
    }))
}

fn snapshot(model: &SequentialModel) -> Vec<ArrayD<f32>> {
    model.parameters().into_iter().map(|p| p.to_owned()).collect()
}

/// Small configuration that trains quickly.
fn tiny_config() -> DcnnConfig {
    DcnnConfig {
        vocab_size: 20,
        embedding_dim: 4,
        max_len: 12,
        num_feature_maps: 2,
        stage_kernel_widths: vec![3, 2],
        stage_output_channels: vec![4, 3],
        stage_pooling_k: vec![4, 2],
        learning_rate: 0.05,
        ..DcnnConfig::basic()
    }
}

// =============================================================================
// Reference Scenarios
// =============================================================================

#[test]
fn test_basic_scenario_single_stage() {
    let stages = [StageSpec::new(30, 50, 5)];
    let branch = build_branch(
        &stages,
        Shape::d2(300, 50),
        Activation::Relu,
        TieBreak::LowestIndex,
        &mut rng(1),
    )
    .unwrap();

    let shapes = branch.shapes();
    assert_eq!(shapes[0], Shape::d2(329, 50)); // conv
    assert_eq!(shapes[2], Shape::d2(5, 50)); // pool
    assert_eq!(branch.output_shape(), Shape::d1(250));

    let out = branch.forward(&wavy_input(2, 300, 50)).unwrap();
    assert_eq!(out.dim(), (2, 1, 250));
}

#[test]
fn test_two_stage_scenario_length_schedule() {
    let config = DcnnConfig::two_stage();
    let encoder = FeatureMapEncoder::from_config(&config, &mut rng(2)).unwrap();

    let lengths = encoder.stage_lengths();
    assert_eq!(lengths.len(), 2);
    assert_eq!(lengths[0], StageLengths { input: 300, convolved: 319, pooled: 20 });
    assert_eq!(lengths[1], StageLengths { input: 20, convolved: 49, pooled: 10 });
    assert_eq!(encoder.output_dim(), 500);

    let fused = encoder.forward(&wavy_input(2, 300, 50)).unwrap();
    assert_eq!(fused.dim(), (2, 500));
}

#[test]
fn test_two_feature_map_scenario_concatenates_in_branch_order() {
    let config = DcnnConfig::two_feature_map();
    let encoder = FeatureMapEncoder::from_config(&config, &mut rng(3)).unwrap();
    assert_eq!(encoder.num_branches(), 2);
    assert_eq!(encoder.branch_output_dims(), &[500, 500]);
    assert_eq!(encoder.output_dim(), 1000);
    assert_eq!(config.fused_dim(), 1000);

    let input = wavy_input(2, 300, 50);
    let fused = encoder.forward(&input).unwrap();
    assert_eq!(fused.dim(), (2, 1000));

    let first = encoder.branch(0).unwrap().forward(&input).unwrap().to_matrix().unwrap();
    let second = encoder.branch(1).unwrap().forward(&input).unwrap().to_matrix().unwrap();
    assert_eq!(fused.slice(s![.., ..500]), first);
    assert_eq!(fused.slice(s![.., 500..]), second);
    // independently initialized branches
    assert_ne!(first, second);
}

#[test]
fn test_fused_output_dim_without_building() {
    let stages = [StageSpec::new(20, 50, 20), StageSpec::new(30, 50, 10)];
    assert_eq!(encoder::fused_output_dim(1, 50, &stages), 500);
    assert_eq!(encoder::fused_output_dim(3, 50, &stages), 1500);
    assert_eq!(branch::branch_output_dim(50, &[StageSpec::new(30, 50, 5)]), 250);
}

// =============================================================================
// Construction-Time Validation
// =============================================================================

#[test]
fn test_plan_stages_rejects_k_beyond_convolved_length() {
    // 10 + 3 - 1 = 12 < 20
    let result = plan_stages(10, &[StageSpec::new(3, 4, 20)]);
    assert!(matches!(
        result,
        Err(DcnnError::PoolingExceedsLength { stage: 0, k: 20, available: 12 })
    ));
}

#[test]
fn test_plan_stages_reports_failing_later_stage() {
    // stage 0: 12 → 5; stage 1: 5 + 2 - 1 = 6 < 7
    let result = plan_stages(10, &[StageSpec::new(3, 4, 5), StageSpec::new(2, 4, 7)]);
    assert!(matches!(
        result,
        Err(DcnnError::PoolingExceedsLength { stage: 1, k: 7, available: 6 })
    ));
}

#[test]
fn test_plan_stages_accepts_k_equal_to_convolved_length() {
    let plan = plan_stages(10, &[StageSpec::new(3, 4, 12)]).unwrap();
    assert_eq!(plan[0].convolved, 12);
    assert_eq!(plan[0].pooled, 12);
}

#[test]
fn test_plan_stages_rejects_zero_width_and_zero_k() {
    assert!(matches!(
        plan_stages(10, &[StageSpec::new(0, 4, 2)]),
        Err(DcnnError::InvalidConfig(_))
    ));
    assert!(matches!(
        plan_stages(10, &[StageSpec::new(3, 4, 0)]),
        Err(DcnnError::InvalidConfig(_))
    ));
}

#[test]
fn test_build_branch_fails_before_any_forward() {
    let result = build_branch(
        &[StageSpec::new(3, 4, 20)],
        Shape::d2(10, 4),
        Activation::Relu,
        TieBreak::LowestIndex,
        &mut rng(4),
    );
    assert!(matches!(result, Err(DcnnError::PoolingExceedsLength { .. })));
}

#[test]
fn test_sequential_model_rejects_channel_mismatch() {
    let conv = WideConv1D::new(3, 8, 4, &mut rng(5)).unwrap();
    let result = SequentialModel::new(vec![Box::new(conv)], Shape::d2(10, 4));
    assert!(matches!(
        result,
        Err(DcnnError::ShapeMismatch { expected: 8, actual: 4 })
    ));
}

#[test]
fn test_branch_rejects_wrong_input_length_at_forward() {
    let branch = build_branch(
        &[StageSpec::new(3, 4, 5)],
        Shape::d2(10, 4),
        Activation::Relu,
        TieBreak::LowestIndex,
        &mut rng(6),
    )
    .unwrap();
    assert!(matches!(
        branch.forward(&SequenceTensor::zeros(1, 9, 4)),
        Err(DcnnError::InvalidInputLength { expected: 10, actual: 9 })
    ));
    assert!(matches!(
        branch.forward(&SequenceTensor::zeros(0, 10, 4)),
        Err(DcnnError::EmptyBatch)
    ));
}

fn small_branch(stages: &[StageSpec], input: Shape, seed: u64) -> SequentialModel {
    build_branch(stages, input, Activation::Relu, TieBreak::LowestIndex, &mut rng(seed)).unwrap()
}

#[test]
fn test_encoder_reads_stage_schedule_from_branches() {
    let branch = small_branch(&[StageSpec::new(3, 4, 5)], Shape::d2(10, 4), 12);
    let encoder = FeatureMapEncoder::new(vec![branch]).unwrap();
    assert_eq!(
        encoder.stage_lengths(),
        &[StageLengths { input: 10, convolved: 12, pooled: 5 }]
    );
    assert_eq!(encoder.output_dim(), 20);

    let two = small_branch(
        &[StageSpec::new(3, 4, 6), StageSpec::new(2, 3, 2)],
        Shape::d2(10, 4),
        13,
    );
    assert_eq!(
        branch_stage_lengths(&two),
        vec![
            StageLengths { input: 10, convolved: 12, pooled: 6 },
            StageLengths { input: 6, convolved: 7, pooled: 2 },
        ]
    );
}

#[test]
fn test_encoder_rejects_branches_built_from_different_stages() {
    let a = small_branch(&[StageSpec::new(3, 4, 5)], Shape::d2(10, 4), 14);
    let b = small_branch(&[StageSpec::new(2, 4, 3), StageSpec::new(2, 4, 2)], Shape::d2(10, 4), 15);
    assert!(matches!(
        FeatureMapEncoder::new(vec![a, b]),
        Err(DcnnError::InvalidConfig(_))
    ));
}

#[test]
fn test_encoder_rejects_branches_with_different_inputs() {
    let stages = [StageSpec::new(3, 4, 5)];
    let short = small_branch(&stages, Shape::d2(10, 4), 16);
    let long = small_branch(&stages, Shape::d2(12, 4), 17);
    assert!(matches!(
        FeatureMapEncoder::new(vec![short, long]),
        Err(DcnnError::InvalidInputLength { expected: 10, actual: 12 })
    ));

    let narrow = small_branch(&stages, Shape::d2(10, 4), 18);
    let wide = small_branch(&stages, Shape::d2(10, 6), 19);
    assert!(matches!(
        FeatureMapEncoder::new(vec![narrow, wide]),
        Err(DcnnError::ShapeMismatch { expected: 4, actual: 6 })
    ));
}

#[test]
fn test_encoder_rejects_branch_without_stages() {
    let flat_only = SequentialModel::new(vec![Box::new(FlattenLayer)], Shape::d2(10, 4)).unwrap();
    assert!(matches!(
        FeatureMapEncoder::new(vec![flat_only]),
        Err(DcnnError::InvalidConfig(_))
    ));
    assert!(matches!(FeatureMapEncoder::new(Vec::new()), Err(DcnnError::InvalidConfig(_))));
}

#[test]
fn test_construction_is_repeatable() {
    let config = tiny_config();
    let a = FeatureMapEncoder::from_config(&config, &mut rng(7)).unwrap();
    let b = FeatureMapEncoder::from_config(&config, &mut rng(7)).unwrap();
    assert_eq!(a.stage_lengths(), b.stage_lengths());
    assert_eq!(a.branch_output_dims(), b.branch_output_dims());
    assert_eq!(a.parameter_count(), b.parameter_count());
    for idx in 0..a.num_branches() {
        assert_eq!(a.branch(idx).unwrap().shapes(), b.branch(idx).unwrap().shapes());
    }

    let input = wavy_input(3, 12, 4);
    assert_eq!(a.forward(&input).unwrap(), b.forward(&input).unwrap());
}

#[test]
fn test_branch_parameter_count() {
    let branch = build_branch(
        &[StageSpec::new(3, 6, 4)],
        Shape::d2(10, 5),
        Activation::Tanh,
        TieBreak::LowestIndex,
        &mut rng(8),
    )
    .unwrap();
    // kernel 3·5·6 + bias 6
    assert_eq!(branch.parameter_count(), 96);
    assert_eq!(branch.num_layers(), 4);
    assert_eq!(branch.layer(1).unwrap().name(), "Tanh");
}

// =============================================================================
// Branch Independence
// =============================================================================

#[test]
fn test_updating_one_branch_leaves_the_other_untouched() {
    let mut encoder = FeatureMapEncoder::from_config(&tiny_config(), &mut rng(9)).unwrap();
    let input = wavy_input(2, 12, 4);
    let before_a = snapshot(encoder.branch(0).unwrap());
    let before_b = snapshot(encoder.branch(1).unwrap());

    let branch_a = encoder.branch_mut(0).unwrap();
    let trace = branch_a.forward_traced(&input).unwrap();
    let width = branch_a.output_shape().total();
    let grad = SequenceTensor::from_matrix(Array2::from_elem((2, width), 1.0));
    branch_a.backward(&input, &trace, &grad, 0.1).unwrap();

    assert_ne!(snapshot(encoder.branch(0).unwrap()), before_a);
    assert_eq!(snapshot(encoder.branch(1).unwrap()), before_b);
}

#[test]
fn test_fused_gradient_is_routed_to_its_own_branch() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut encoder = FeatureMapEncoder::from_config(&tiny_config(), &mut rng(10)).unwrap();
    let input = wavy_input(2, 12, 4);
    let before_a = snapshot(encoder.branch(0).unwrap());
    let before_b = snapshot(encoder.branch(1).unwrap());

    let trace = encoder.forward_traced(&input).unwrap();
    let width_a = encoder.branch_output_dims()[0];
    let mut fused_grad = Array2::zeros((2, encoder.output_dim()));
    fused_grad.slice_mut(s![.., ..width_a]).fill(1.0);
    let input_grad = encoder.backward(&input, &trace, &fused_grad, 0.1).unwrap();

    assert_eq!(input_grad.dim(), (2, 12, 4));
    assert_ne!(snapshot(encoder.branch(0).unwrap()), before_a);
    assert_eq!(snapshot(encoder.branch(1).unwrap()), before_b);
}

#[test]
fn test_encoder_backward_rejects_wrong_gradient_width() {
    let mut encoder = FeatureMapEncoder::from_config(&tiny_config(), &mut rng(11)).unwrap();
    let input = wavy_input(1, 12, 4);
    let trace = encoder.forward_traced(&input).unwrap();
    let bad = Array2::zeros((1, encoder.output_dim() + 1));
    assert!(matches!(
        encoder.backward(&input, &trace, &bad, 0.1),
        Err(DcnnError::DimensionMismatch { .. })
    ));
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_presets_validate() {
    for config in [DcnnConfig::basic(), DcnnConfig::two_stage(), DcnnConfig::two_feature_map()] {
        config.validate().unwrap();
    }
    assert_eq!(DcnnConfig::default(), DcnnConfig::basic());
    assert_eq!(DcnnConfig::basic().fused_dim(), 250);
    assert_eq!(DcnnConfig::two_stage().fused_dim(), 500);
}

#[test]
fn test_config_from_toml_with_defaults() {
    let config = DcnnConfig::from_toml_str(
        r#"
        vocab_size = 5000
        embedding_dim = 50
        max_len = 300
        num_feature_maps = 2
        stage_kernel_widths = [20, 30]
        stage_output_channels = [50, 50]
        stage_pooling_k = [20, 10]
        "#,
    )
    .unwrap();
    assert_eq!(config, DcnnConfig::two_feature_map());
}

#[test]
fn test_config_from_toml_with_dynamic_schedule() {
    let config = DcnnConfig::from_toml_str(
        r#"
        vocab_size = 100
        embedding_dim = 8
        max_len = 30
        stage_kernel_widths = [5, 3]
        stage_output_channels = [6, 6]
        stage_pooling_k = [0, 0]
        activation = "tanh"
        tie_break = "highest_index"
        pooling_schedule = { dynamic = { k_top = 4 } }
        "#,
    )
    .unwrap();
    assert_eq!(config.activation, Activation::Tanh);
    assert_eq!(config.tie_break, TieBreak::HighestIndex);
    assert_eq!(config.pooling_schedule, PoolingSchedule::Dynamic { k_top: 4 });

    let ks: Vec<usize> = config.stage_specs().iter().map(|s| s.pooling_k).collect();
    assert_eq!(ks, vec![15, 4]);
    assert_eq!(config.fused_dim(), 24);
}

#[test]
fn test_config_rejects_mismatched_stage_lists() {
    let config = DcnnConfig {
        stage_output_channels: vec![50],
        ..DcnnConfig::two_stage()
    };
    assert!(matches!(config.validate(), Err(DcnnError::InvalidConfig(_))));
}

#[test]
fn test_config_rejects_oversized_k() {
    let config = DcnnConfig {
        max_len: 10,
        stage_kernel_widths: vec![3],
        stage_output_channels: vec![4],
        stage_pooling_k: vec![20],
        ..DcnnConfig::basic()
    };
    assert!(matches!(
        config.validate(),
        Err(DcnnError::PoolingExceedsLength { stage: 0, k: 20, available: 12 })
    ));
    assert!(SentimentClassifier::new(config).is_err());
}

#[test]
fn test_config_rejects_zero_feature_maps_and_bad_learning_rate() {
    let no_maps = DcnnConfig { num_feature_maps: 0, ..DcnnConfig::basic() };
    assert!(matches!(no_maps.validate(), Err(DcnnError::InvalidConfig(_))));

    let bad_lr = DcnnConfig { learning_rate: -1.0, ..DcnnConfig::basic() };
    assert!(matches!(bad_lr.validate(), Err(DcnnError::InvalidConfig(_))));
}

#[test]
fn test_config_parse_error_is_reported() {
    assert!(matches!(
        DcnnConfig::from_toml_str("vocab_size = \"many\""),
        Err(DcnnError::ConfigParse(_))
    ));
}

#[test]
fn test_config_from_file() {
    let path = std::env::temp_dir().join(format!("dcnn-config-{}.toml", std::process::id()));
    let text = toml::to_string(&tiny_config()).unwrap();
    std::fs::write(&path, text).unwrap();
    let loaded = DcnnConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded, tiny_config());

    assert!(matches!(
        DcnnConfig::from_file("/nonexistent/dcnn.toml"),
        Err(DcnnError::Io(_))
    ));
}

// =============================================================================
// Classifier
// =============================================================================

fn toy_batch() -> (Array2<usize>, Array1<f32>) {
    let sequences = vec![
        vec![1, 2, 3, 1, 2],
        vec![11, 12, 13, 11, 12, 13, 14],
        vec![2, 3, 1, 3],
        vec![14, 15, 11, 12],
    ];
    let tokens = pad_sequences(&sequences, 12, 0, PaddingSide::Pre, PaddingSide::Pre).unwrap();
    (tokens, Array1::from(vec![1.0, 0.0, 1.0, 0.0]))
}

#[test]
fn test_classifier_inference_shapes() {
    let model = SentimentClassifier::new(tiny_config()).unwrap();
    let (tokens, labels) = toy_batch();

    let fused = model.encode(&tokens).unwrap();
    assert_eq!(fused.dim(), (4, model.encoder().output_dim()));
    assert_eq!(fused.ncols(), tiny_config().fused_dim());

    let probs = model.predict_proba(&tokens).unwrap();
    assert_eq!(probs.len(), 4);
    assert!(probs.iter().all(|&p| p > 0.0 && p < 1.0));

    assert_eq!(model.predict(&tokens).unwrap().len(), 4);
    let accuracy = model.accuracy(&tokens, labels.view()).unwrap();
    assert!((0.0..=1.0).contains(&accuracy));
}

#[test]
fn test_classifier_rejects_bad_tokens() {
    let model = SentimentClassifier::new(tiny_config()).unwrap();
    assert!(matches!(
        model.predict_proba(&Array2::zeros((1, 11))),
        Err(DcnnError::InvalidInputLength { expected: 12, actual: 11 })
    ));
    let mut tokens = Array2::zeros((1, 12));
    tokens[[0, 3]] = 20;
    assert!(matches!(
        model.predict_proba(&tokens),
        Err(DcnnError::TokenOutOfRange { token: 20, vocab_size: 20 })
    ));
}

#[test]
fn test_classifier_is_seeded() {
    let (tokens, _) = toy_batch();
    let a = SentimentClassifier::new(tiny_config()).unwrap();
    let b = SentimentClassifier::new(tiny_config()).unwrap();
    assert_eq!(a.predict_proba(&tokens).unwrap(), b.predict_proba(&tokens).unwrap());

    let c = SentimentClassifier::new(DcnnConfig { seed: 7, ..tiny_config() }).unwrap();
    assert_ne!(a.predict_proba(&tokens).unwrap(), c.predict_proba(&tokens).unwrap());
}

#[test]
fn test_train_step_reduces_loss() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut model = SentimentClassifier::new(tiny_config()).unwrap();
    let (tokens, labels) = toy_batch();

    let embedding_before = model.embedding().weights().clone();
    let head_before = model.head().weights().clone();

    let first = model.train_step(&tokens, labels.view()).unwrap();
    assert!(first.is_finite() && first > 0.0);
    let mut last = first;
    for _ in 0..40 {
        last = model.train_step(&tokens, labels.view()).unwrap();
    }
    assert!(last < first, "loss did not decrease: {first} -> {last}");
    assert_ne!(model.embedding().weights(), &embedding_before);
    assert_ne!(model.head().weights(), &head_before);
}

#[test]
fn test_train_step_can_freeze_embedding() {
    let config = DcnnConfig { train_embedding: false, ..tiny_config() };
    let mut model = SentimentClassifier::new(config).unwrap();
    let (tokens, labels) = toy_batch();
    let before = model.embedding().weights().clone();
    model.train_step(&tokens, labels.view()).unwrap();
    assert_eq!(model.embedding().weights(), &before);
}

#[test]
fn test_train_step_rejects_label_count_mismatch() {
    let mut model = SentimentClassifier::new(tiny_config()).unwrap();
    let (tokens, _) = toy_batch();
    let labels = Array1::from(vec![1.0, 0.0]);
    assert!(matches!(
        model.train_step(&tokens, labels.view()),
        Err(DcnnError::DimensionMismatch { expected: 4, actual: 2 })
    ));
}
