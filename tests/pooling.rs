use briny_pool::approx::approx_eq;
use briny_pool::backend::Backend;
use briny_pool::ops::cpu::global_pool;
use briny_pool::{tensor, GlobalPooling1D, PoolingConfig, PoolingError, PoolingMode, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn cpu_layer(mode: PoolingMode) -> GlobalPooling1D {
    GlobalPooling1D::with_backend(mode, PoolingConfig::default(), Backend::Cpu).unwrap()
}

fn random_input(rng: &mut StdRng) -> (usize, usize, Vec<f32>) {
    let steps = rng.random_range(1..=24usize);
    let features = rng.random_range(1..=12usize);
    let data = (0..steps * features)
        .map(|_| rng.random_range(-100.0f32..100.0))
        .collect();
    (steps, features, data)
}

fn reference(steps: usize, features: usize, data: &[f32], mode: PoolingMode) -> Vec<f32> {
    (0..features)
        .map(|i| {
            let column = (0..steps).map(|s| data[s * features + i]);
            match mode {
                PoolingMode::Max => column.fold(f32::NEG_INFINITY, f32::max),
                PoolingMode::Average => {
                    (column.map(f64::from).sum::<f64>() / steps as f64) as f32
                }
            }
        })
        .collect()
}

#[test]
fn test_end_to_end_example() {
    let mut max = cpu_layer(PoolingMode::Max);
    let mut avg = cpu_layer(PoolingMode::Average);
    let mut x = tensor!([[1, 2], [3, 0], [2, 4]]);

    assert_eq!(max.call(&mut x).unwrap().data().unwrap(), &[3.0, 4.0]);
    assert_eq!(avg.call(&mut x).unwrap().data().unwrap(), &[2.0, 2.0]);
}

#[test]
fn test_single_row_passes_through() {
    for mode in [PoolingMode::Max, PoolingMode::Average] {
        let mut layer = cpu_layer(mode);
        let mut x = tensor!([[5, -1]]);
        let out = layer.call(&mut x).unwrap();
        assert_eq!(out.shape(), &[2]);
        assert_eq!(out.data().unwrap(), &[5.0, -1.0]);
    }
}

#[test]
fn test_single_feature_yields_length_one() {
    let mut layer = cpu_layer(PoolingMode::Average);
    let mut x = Tensor::new(vec![4, 1], vec![1.0, 2.0, 3.0, 4.0]);
    let out = layer.call(&mut x).unwrap();
    assert_eq!(out.shape(), &[1]);
    assert!(approx_eq(out.data().unwrap(), &[2.5][..]));
}

#[test]
fn test_random_inputs_match_reference() {
    let mut rng = StdRng::seed_from_u64(0x9001);
    for _ in 0..64 {
        let (steps, features, data) = random_input(&mut rng);
        let x = Tensor::new(vec![steps, features], data.clone());
        for mode in [PoolingMode::Max, PoolingMode::Average] {
            let out = global_pool(&x, mode).unwrap();
            let expected = reference(steps, features, &data, mode);
            assert_eq!(out.shape(), &[features]);
            assert!(
                approx_eq(out.data().unwrap(), expected.as_slice()),
                "{mode:?} mismatch for [{steps}, {features}]"
            );
        }
    }
}

#[test]
fn test_max_never_below_average() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..32 {
        let (steps, features, data) = random_input(&mut rng);
        let x = Tensor::new(vec![steps, features], data);
        let max = global_pool(&x, PoolingMode::Max).unwrap();
        let avg = global_pool(&x, PoolingMode::Average).unwrap();
        for (m, a) in max.data().unwrap().iter().zip(avg.data().unwrap()) {
            assert!(m + 1e-4 >= *a);
        }
    }
}

#[test]
fn test_long_sequence_average_matches_true_mean() {
    let steps = 100_000;
    let mut data = Vec::with_capacity(steps * 2);
    for s in 0..steps {
        data.push(0.1);
        data.push(if s % 2 == 0 { 0.3 } else { -0.7 });
    }
    let mut layer = cpu_layer(PoolingMode::Average);
    let mut x = Tensor::new(vec![steps, 2], data);
    let out = layer.call(&mut x).unwrap();
    assert!(approx_eq(out.data().unwrap(), &[0.1, -0.2]));
}

#[test]
fn test_repeated_calls_are_idempotent() {
    let mut layer = cpu_layer(PoolingMode::Average);
    let mut x = tensor!([[0.5, 1.5, -2.0], [1.0, 0.25, 8.0]]);
    let first = layer.call(&mut x).unwrap().data().unwrap().to_vec();
    let second = layer.call(&mut x).unwrap().data().unwrap().to_vec();
    assert_eq!(first, second);
    assert_eq!(x.data().unwrap(), &[0.5, 1.5, -2.0, 1.0, 0.25, 8.0]);
}

#[test]
fn test_cpu_accepts_changing_feature_counts() {
    let mut layer = cpu_layer(PoolingMode::Max);
    let mut a = tensor!([[1, 2, 3]]);
    let mut b = tensor!([[1], [9]]);
    assert_eq!(layer.call(&mut a).unwrap().shape(), &[3]);
    assert_eq!(layer.call(&mut b).unwrap().data().unwrap(), &[9.0]);
}

#[test]
fn test_malformed_shapes_are_errors() {
    let mut layer = cpu_layer(PoolingMode::Max);

    let mut rank3 = tensor!([[[1, 2]], [[3, 4]]]);
    assert!(matches!(
        layer.call(&mut rank3),
        Err(PoolingError::ShapeMismatch { .. })
    ));

    let mut empty = Tensor::zeros(vec![0, 2]);
    assert!(matches!(layer.call(&mut empty), Err(PoolingError::EmptySequence)));

    let mut no_features = Tensor::zeros(vec![3, 0]);
    assert!(matches!(
        layer.call(&mut no_features),
        Err(PoolingError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_config_from_exported_layer() {
    let json = r#"{
        "name": "global_average_pooling1d_1",
        "trainable": true,
        "dtype": "float32",
        "data_format": "channels_last"
    }"#;
    let config = PoolingConfig::from_json(json).unwrap();
    let layer = GlobalPooling1D::with_backend(PoolingMode::Average, config, Backend::Cpu).unwrap();
    assert_eq!(layer.name(), "global_average_pooling1d_1");
    assert_eq!(layer.layer_class(), "GlobalAveragePooling1D");
    assert_eq!(layer.mode(), PoolingMode::Average);
}

#[test]
fn test_bad_config_is_reported() {
    let err = PoolingConfig::from_json("{\"data_format\": 3}").unwrap_err();
    assert!(matches!(err, PoolingError::Config(_)));
}
