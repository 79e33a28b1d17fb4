//! Integration tests that run each layer through a built model and check
//! the values it produces.

use std::collections::BTreeMap;

use approx::assert_abs_diff_eq;
use burn::backend::{Autodiff, NdArray};
use layergraph::prelude::*;

type TestBackend = Autodiff<NdArray>;

fn build_single_output(model: &mut Model<TestBackend>, inputs: &[(&str, &Node)], output: &Node) {
    let mut config = BuildConfig::new().output("y", output);
    for (name, node) in inputs {
        config = config.input(*name, node);
    }
    model.must_build(config.loss(loss::mse("yt", output)));
}

fn feed(pairs: &[(&str, HostTensor)]) -> NamedTensors {
    pairs
        .iter()
        .map(|(name, tensor)| (name.to_string(), tensor.clone()))
        .collect()
}

fn predict(model: &mut Model<TestBackend>, x: (&str, HostTensor), output: &str) -> HostTensor {
    let mut outputs = model.predict(&feed(&[x])).unwrap();
    outputs.remove(output).unwrap()
}

fn assert_values(actual: &HostTensor, expected: &[f64]) {
    let values = actual.to_f64_vec();
    assert_eq!(values.len(), expected.len(), "{:?}", values);
    for (a, e) in values.iter().zip(expected) {
        assert_abs_diff_eq!(*a, *e, epsilon = 1e-5);
    }
}

fn run_activation(layer: ActivationLayer) -> HostTensor {
    let mut model = Model::<TestBackend>::default();
    let x = model.must_input("x", &[2, 3], DType::Float);
    let y = model.must_attach(layer, &[&x]);
    build_single_output(&mut model, &[("x", &x)], &y);

    let xs = HostTensor::from_rows(&[vec![-0.1, 0.3, 0.5], vec![-2.0, 1.0, 2.0]]).unwrap();
    predict(&mut model, ("x", xs), "y")
}

#[test]
fn test_activations_match_closed_forms() {
    let inputs = [-0.1, 0.3, 0.5, -2.0, 1.0, 2.0];

    let sigmoid: Vec<f64> = inputs.iter().map(|x: &f64| 1.0 / (1.0 + (-x).exp())).collect();
    assert_values(&run_activation(ActivationLayer::sigmoid("act")), &sigmoid);

    let tanh: Vec<f64> = inputs.iter().map(|x: &f64| x.tanh()).collect();
    assert_values(&run_activation(ActivationLayer::tanh("act")), &tanh);

    assert_values(
        &run_activation(ActivationLayer::relu("act")),
        &[0.0, 0.3, 0.5, 0.0, 1.0, 2.0],
    );
    assert_values(
        &run_activation(ActivationLayer::binary("act")),
        &[0.0, 1.0, 1.0, 0.0, 1.0, 1.0],
    );
    assert_values(
        &run_activation(ActivationLayer::leaky_relu("act", Some(0.01))),
        &[-0.001, 0.3, 0.5, -0.02, 1.0, 2.0],
    );
}

#[test]
fn test_softmax_rows_sum_to_one() {
    let out = run_activation(ActivationLayer::softmax("act"));
    assert_eq!(out.shape(), &[2, 3]);
    let values = out.to_f64_vec();
    for row in values.chunks(3) {
        assert_abs_diff_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-5);
        assert!(row[2] > row[1] && row[1] > row[0]);
    }
}

#[test]
fn test_one_hot_encodes_class_indices() {
    let mut model = Model::<TestBackend>::default();
    let labels = model.must_input("labels", &[8], DType::Int);
    let encoded = model.must_attach(OneHot::new("onehot", 5, DType::Float), &[&labels]);
    assert_eq!(encoded.shape(), &[8, 5]);
    build_single_output(&mut model, &[("labels", &labels)], &encoded);

    let classes = [1, 3, 2, 0, 4, 1, 3, 2];
    let xs = HostTensor::from_ints(&[8], classes.to_vec()).unwrap();
    let out = predict(&mut model, ("labels", xs), "y");
    assert_eq!(out.shape(), &[8, 5]);

    let mut expected = vec![0.0; 40];
    for (row, class) in classes.iter().enumerate() {
        expected[row * 5 + *class as usize] = 1.0;
    }
    assert_values(&out, &expected);
}

fn run_arithmetic(layer: BinaryArithmetic, a: &[Vec<f64>], b: &[Vec<f64>]) -> HostTensor {
    let mut model = Model::<TestBackend>::default();
    let x = model.must_input("a", &[2, 3], DType::Float);
    let z = model.must_input("b", &[2, 3], DType::Float);
    let y = model.must_attach(layer, &[&x, &z]);
    build_single_output(&mut model, &[("a", &x), ("b", &z)], &y);

    let feeds = feed(&[
        ("a", HostTensor::from_rows(a).unwrap()),
        ("b", HostTensor::from_rows(b).unwrap()),
    ]);
    model.predict(&feeds).unwrap().remove("y").unwrap()
}

#[test]
fn test_binary_arithmetic() {
    let a = vec![vec![0.0, 0.0, 1.0], vec![1.0, 0.0, 0.0]];
    let b = vec![vec![1.0, 1.0, 0.0], vec![1.0, 1.0, 0.0]];

    let sum = run_arithmetic(BinaryArithmetic::add("op"), &a, &b);
    assert_values(&sum, &[1.0, 1.0, 1.0, 2.0, 1.0, 0.0]);

    let diff = run_arithmetic(BinaryArithmetic::sub("op"), &a, &b);
    assert_values(&diff, &[-1.0, -1.0, 1.0, 0.0, -1.0, 0.0]);

    let prod = run_arithmetic(BinaryArithmetic::hadamard_prod("op"), &a, &b);
    assert_values(&prod, &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    let dot = run_arithmetic(BinaryArithmetic::dot("op"), &a, &b);
    assert_eq!(dot.shape(), &[2, 1]);
    assert_values(&dot, &[0.0, 1.0]);

    let divisor = vec![vec![2.0, 4.0, 0.5], vec![1.0, -2.0, 8.0]];
    let quot = run_arithmetic(BinaryArithmetic::hadamard_div("op"), &a, &divisor);
    assert_values(&quot, &[0.0, 0.0, 2.0, 1.0, 0.0, 0.0]);
}

#[test]
fn test_conv_with_unit_kernel_sums_neighbourhoods() {
    let mut model = Model::<TestBackend>::default();
    let x = model.must_input("x", &[1, 1, 3, 3], DType::Float);
    let y = model.must_attach(Conv2D::simple("conv", 3, 1), &[&x]);
    assert_eq!(y.shape(), &[1, 1, 3, 3]);
    build_single_output(&mut model, &[("x", &x)], &y);

    let kernels = BTreeMap::from([(
        "conv:kernels".to_string(),
        HostTensor::from_floats(&[1, 1, 3, 3], vec![1.0; 9]).unwrap(),
    )]);
    model.set_params(&kernels).unwrap();

    let xs = HostTensor::from_floats(&[1, 1, 3, 3], vec![1.0; 9]).unwrap();
    let out = predict(&mut model, ("x", xs), "y");
    // Zero padding leaves corners with four neighbours and edges with six.
    assert_values(&out, &[4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
}

#[test]
fn test_same_pooling_ignores_padding() {
    let mut model = Model::<TestBackend>::default();
    let x = model.must_input("x", &[1, 1, 3, 3], DType::Float);
    let y = model.must_attach(MaxPooling2D::simple("pool", [2, 2]), &[&x]);
    assert_eq!(y.shape(), &[1, 1, 2, 2]);
    build_single_output(&mut model, &[("x", &x)], &y);

    let values: Vec<f64> = (1..=9).map(|v| -(v as f64)).collect();
    let xs = HostTensor::from_floats(&[1, 1, 3, 3], values).unwrap();
    let out = predict(&mut model, ("x", xs), "y");
    assert_values(&out, &[-1.0, -3.0, -7.0, -9.0]);
}

#[test]
fn test_image_stack_shapes() {
    let mut model = Model::<TestBackend>::default();
    let mut namer = Namer::new("img");
    let x = model.must_input(&namer.next_name(), &[2, 1, 5, 5], DType::Float);
    let h = model.must_attach(Conv2D::simple(namer.next_name(), 3, 4), &[&x]);
    assert_eq!(h.shape(), &[2, 4, 5, 5]);
    let h = model.must_attach(ActivationLayer::relu(namer.next_name()), &[&h]);
    let h = model.must_attach(MaxPooling2D::simple(namer.next_name(), [2, 2]), &[&h]);
    assert_eq!(h.shape(), &[2, 4, 3, 3]);
    let h = model.must_attach(Reshape::new(namer.next_name(), &[2, 36]), &[&h]);
    let h = model.must_attach(Dropout::new(namer.next_name(), 0.25), &[&h]);
    let y = model.must_attach(Dense::new(namer.next_name(), 3), &[&h]);
    let y = model.must_attach(ActivationLayer::softmax(namer.next_name()), &[&y]);
    model.must_build(
        BuildConfig::new()
            .input("x", &x)
            .output("probs", &y)
            .loss(loss::cce("labels", &y)),
    );

    let xs = HostTensor::from_floats(&[5, 1, 5, 5], vec![0.5; 125]).unwrap();
    let out = predict(&mut model, ("x", xs), "probs");
    assert_eq!(out.shape(), &[5, 3]);
    for row in out.to_f64_vec().chunks(3) {
        assert_abs_diff_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-5);
    }

    let summary = model.summary();
    assert!(summary.contains("img_2::conv2d"), "{}", summary);
    assert!(summary.contains("img_4::maxpool2d"), "{}", summary);
}

#[test]
fn test_dropout_is_identity_when_predicting() {
    let mut model = Model::<TestBackend>::default();
    let x = model.must_input("x", &[2, 3], DType::Float);
    let y = model.must_attach(Dropout::new("drop", 0.9), &[&x]);
    build_single_output(&mut model, &[("x", &x)], &y);

    let rows = [vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
    let xs = HostTensor::from_rows(&rows).unwrap();
    let out = predict(&mut model, ("x", xs), "y");
    assert_values(&out, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn test_colliding_node_names_fail_the_build() {
    let mut model = Model::<TestBackend>::default();
    let x = model.must_input("x", &[2, 3], DType::Float);
    let y = model.must_attach(ActivationLayer::relu("act"), &[&x]);
    let err = model
        .build(
            BuildConfig::new()
                .input("x", &x)
                .output("y", &y)
                .loss(loss::mse("x.input", &y)),
        )
        .unwrap_err();
    assert!(matches!(err, ModelError::DuplicateNodeName { name } if name == "x.input"));
    assert!(!model.is_built());
}
