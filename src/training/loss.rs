//! Loss functions for training.
//!
//! A loss is a deferred graph construction: the model invokes it once at
//! build with a [`LossContext`], and it returns the scalar loss node plus
//! the placeholders (usually targets) that must be fed while fitting.

use std::collections::BTreeMap;

use crate::errors::ModelError;
use crate::graph::{Graph, Node, ops};
use crate::layers::Layer;
use crate::tensor::DType;

/// Clamp applied before taking logs of probabilities.
pub const LOG_EPSILON: f64 = 1e-7;

/// Graph access handed to a loss while the model is built.
pub struct LossContext<'a> {
    graph: &'a mut Graph,
    layers: &'a [Box<dyn Layer>],
}

impl<'a> LossContext<'a> {
    pub(crate) fn new(graph: &'a mut Graph, layers: &'a [Box<dyn Layer>]) -> Self {
        Self { graph, layers }
    }

    pub fn graph(&mut self) -> &mut Graph {
        self.graph
    }

    /// Parameters of the attached layer called `name`.
    pub fn layer_parameters(&self, name: &str) -> Result<BTreeMap<String, Node>, ModelError> {
        self.layers
            .iter()
            .find(|l| l.name() == name)
            .map(|l| l.parameters())
            .ok_or_else(|| ModelError::config(format!("no layer named {}", name)))
    }

    /// Like [`layer_parameters`](Self::layer_parameters), but empty for a
    /// frozen layer.
    pub fn trainable_parameters(&self, name: &str) -> Result<BTreeMap<String, Node>, ModelError> {
        self.layers
            .iter()
            .find(|l| l.name() == name)
            .map(|l| {
                if l.trainable() {
                    l.parameters()
                } else {
                    BTreeMap::new()
                }
            })
            .ok_or_else(|| ModelError::config(format!("no layer named {}", name)))
    }
}

/// What a loss adds to the graph.
#[derive(Debug, Clone)]
pub struct LossOutput {
    /// Scalar node, shape `[1]`.
    pub loss: Node,
    /// Placeholders the loss needs fed, by name.
    pub required: BTreeMap<String, Node>,
}

/// Deferred loss construction, invoked once at build.
pub type LossFn = Box<dyn FnOnce(&mut LossContext<'_>) -> Result<LossOutput, ModelError>>;

fn target_for(ctx: &mut LossContext<'_>, name: &str, output: &Node) -> Result<Node, ModelError> {
    ctx.graph().check_owned(output)?;
    ctx.graph().placeholder(name, output.shape(), DType::Float)
}

/// Mean squared error: `mean((output - target)^2)`.
pub fn mse(target_name: &str, output: &Node) -> LossFn {
    let target_name = target_name.to_string();
    let output = output.clone();
    Box::new(move |ctx: &mut LossContext<'_>| {
        let target = target_for(ctx, &target_name, &output)?;
        let g = ctx.graph();
        let diff = ops::sub(g, &output, &target)?;
        let squared = ops::square(g, &diff)?;
        let loss = ops::mean(g, &squared)?;
        Ok(LossOutput {
            loss,
            required: BTreeMap::from([(target_name, target)]),
        })
    })
}

/// Binary cross entropy:
/// `-mean(target * log(output) + (1 - target) * log(1 - output))`.
///
/// Probabilities are clamped into `[1e-7, 1 - 1e-7]` before the logs.
pub fn bce(target_name: &str, output: &Node) -> LossFn {
    let target_name = target_name.to_string();
    let output = output.clone();
    Box::new(move |ctx: &mut LossContext<'_>| {
        let target = target_for(ctx, &target_name, &output)?;
        let g = ctx.graph();
        let log_p = ops::safe_log(g, &output, LOG_EPSILON)?;
        let positive = ops::mul(g, &target, &log_p)?;
        let one_minus_p = ops::scalar_sub(g, 1.0, &output)?;
        let log_one_minus_p = ops::safe_log(g, &one_minus_p, LOG_EPSILON)?;
        let one_minus_t = ops::scalar_sub(g, 1.0, &target)?;
        let negative = ops::mul(g, &one_minus_t, &log_one_minus_p)?;
        let total = ops::add(g, &positive, &negative)?;
        let mean = ops::mean(g, &total)?;
        let loss = ops::neg(g, &mean)?;
        Ok(LossOutput {
            loss,
            required: BTreeMap::from([(target_name, target)]),
        })
    })
}

/// Categorical cross entropy over axis 1:
/// `-mean_batch(sum_classes(target * log(output)))`.
pub fn cce(target_name: &str, output: &Node) -> LossFn {
    let target_name = target_name.to_string();
    let output = output.clone();
    Box::new(move |ctx: &mut LossContext<'_>| {
        let target = target_for(ctx, &target_name, &output)?;
        let g = ctx.graph();
        if output.shape().len() < 2 {
            return Err(ModelError::InvalidShape {
                context: target_name.clone(),
                shape: output.shape().to_vec(),
                message: "categorical cross entropy sums over axis 1".to_string(),
            });
        }
        let log_p = ops::safe_log(g, &output, LOG_EPSILON)?;
        let weighted = ops::mul(g, &target, &log_p)?;
        let per_row = ops::sum_axis(g, &weighted, 1)?;
        let mean = ops::mean(g, &per_row)?;
        let loss = ops::neg(g, &mean)?;
        Ok(LossOutput {
            loss,
            required: BTreeMap::from([(target_name, target)]),
        })
    })
}

/// Sum of squared trainable parameters of the named layers. Frozen layers
/// add nothing. Needs no placeholders.
pub fn l2(layer_names: &[&str]) -> LossFn {
    let layer_names: Vec<String> = layer_names.iter().map(|s| s.to_string()).collect();
    Box::new(move |ctx: &mut LossContext<'_>| {
        if layer_names.is_empty() {
            return Err(ModelError::config("l2 loss needs at least one layer"));
        }
        let mut params = Vec::new();
        for name in &layer_names {
            params.extend(ctx.trainable_parameters(name)?.into_values());
        }
        let g = ctx.graph();
        let mut total: Option<Node> = None;
        for param in &params {
            let squared = ops::square(g, param)?;
            let summed = ops::sum(g, &squared)?;
            total = Some(match total {
                Some(acc) => ops::add(g, &acc, &summed)?,
                None => summed,
            });
        }
        let loss = total.ok_or_else(|| {
            ModelError::config(format!("layers {:?} have no trainable parameters", layer_names))
        })?;
        Ok(LossOutput {
            loss,
            required: BTreeMap::new(),
        })
    })
}

/// `sum_i weights[i] * losses[i]`. Placeholder names must not repeat
/// across the combined losses.
pub fn weighted_additive(losses: Vec<LossFn>, weights: Vec<f64>) -> LossFn {
    Box::new(move |ctx: &mut LossContext<'_>| {
        if losses.len() != weights.len() {
            return Err(ModelError::config(format!(
                "{} losses but {} weights",
                losses.len(),
                weights.len()
            )));
        }
        if losses.is_empty() {
            return Err(ModelError::config("weighted loss needs at least one term"));
        }
        let mut required = BTreeMap::new();
        let mut total: Option<Node> = None;
        for (loss, weight) in losses.into_iter().zip(weights) {
            let term = loss(&mut *ctx)?;
            for (name, node) in term.required {
                if required.contains_key(&name) {
                    return Err(ModelError::DuplicateLossInput { name });
                }
                required.insert(name, node);
            }
            let g = ctx.graph();
            let scaled = ops::mul_scalar(g, &term.loss, weight)?;
            total = Some(match total {
                Some(acc) => ops::add(g, &acc, &scaled)?,
                None => scaled,
            });
        }
        let loss = total
            .ok_or_else(|| ModelError::config("weighted loss produced no terms"))?;
        Ok(LossOutput { loss, required })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Machine, Mode, Value};
    use crate::layers::Dense;
    use crate::model::{BuildConfig, Model};
    use crate::tensor::{HostTensor, NamedTensors};
    use crate::training::sgd;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::backend::Backend;
    use std::collections::HashMap;

    type TestBackend = NdArray;

    const OUTPUT: [[f64; 3]; 2] = [[0.2, 0.5, 0.9], [0.7, 0.1, 0.4]];
    const TARGET: [[f64; 3]; 2] = [[0.0, 1.0, 1.0], [1.0, 0.0, 0.0]];

    fn host(rows: [[f64; 3]; 2]) -> HostTensor {
        HostTensor::from_rows(&rows.map(|r| r.to_vec())).unwrap()
    }

    /// Evaluates `loss` on OUTPUT/TARGET and returns the scalar.
    fn evaluate(loss: impl FnOnce(&Node) -> LossFn) -> f64 {
        let device = <TestBackend as Backend>::Device::default();
        let mut graph = Graph::new();
        let output = graph.placeholder("out", &[2, 3], DType::Float).unwrap();
        let built = {
            let mut ctx = LossContext::new(&mut graph, &[]);
            loss(&output)(&mut ctx).unwrap()
        };
        let mut machine =
            Machine::<TestBackend>::compile(&graph, &[built.loss.id()], &device).unwrap();
        let mut feeds = HashMap::new();
        let predicted = Value::from_host(&host(OUTPUT), &device).unwrap();
        feeds.insert(output.id(), predicted);
        for node in built.required.values() {
            feeds.insert(node.id(), Value::from_host(&host(TARGET), &device).unwrap());
        }
        machine.run(feeds, &HashMap::new(), Mode::Infer).unwrap();
        machine
            .value(built.loss.id())
            .unwrap()
            .to_f64_vec()
            .unwrap()[0]
    }

    fn pairs() -> impl Iterator<Item = (f64, f64)> {
        OUTPUT
            .into_iter()
            .flatten()
            .zip(TARGET.into_iter().flatten())
    }

    #[test]
    fn test_mse_matches_closed_form() {
        let expected = pairs().map(|(o, t)| (o - t).powi(2)).sum::<f64>() / 6.0;
        let actual = evaluate(|out| mse("target", out));
        assert!((actual - expected).abs() < 1e-5, "{actual} vs {expected}");
    }

    #[test]
    fn test_bce_matches_closed_form() {
        let expected = -pairs()
            .map(|(o, t)| t * o.ln() + (1.0 - t) * (1.0 - o).ln())
            .sum::<f64>()
            / 6.0;
        let actual = evaluate(|out| bce("target", out));
        assert!((actual - expected).abs() < 1e-5, "{actual} vs {expected}");
    }

    #[test]
    fn test_cce_matches_closed_form() {
        let expected = -pairs().map(|(o, t)| t * o.ln()).sum::<f64>() / 2.0;
        let actual = evaluate(|out| cce("target", out));
        assert!((actual - expected).abs() < 1e-5, "{actual} vs {expected}");
    }

    #[test]
    fn test_weighted_additive_combines_terms() {
        let mse_value = evaluate(|out| mse("target", out));
        let actual = evaluate(|out| weighted_additive(vec![mse("target", out)], vec![0.5]));
        assert!((actual - 0.5 * mse_value).abs() < 1e-5);
    }

    #[test]
    fn test_weighted_additive_rejects_duplicate_targets() {
        let mut graph = Graph::new();
        let output = graph.placeholder("out", &[2, 3], DType::Float).unwrap();
        let loss = weighted_additive(
            vec![mse("target", &output), bce("target", &output)],
            vec![1.0, 1.0],
        );
        let mut ctx = LossContext::new(&mut graph, &[]);
        let err = loss(&mut ctx).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateLossInput { name } if name == "target"));
    }

    #[test]
    fn test_weighted_additive_needs_matching_weights() {
        let mut graph = Graph::new();
        let output = graph.placeholder("out", &[2, 3], DType::Float).unwrap();
        let loss = weighted_additive(vec![mse("target", &output)], vec![1.0, 2.0]);
        let mut ctx = LossContext::new(&mut graph, &[]);
        assert!(loss(&mut ctx).is_err());
    }

    type TrainBackend = Autodiff<NdArray>;

    fn l2_model(loss: impl FnOnce(&Node) -> LossFn) -> Model<TrainBackend> {
        let mut model = Model::<TrainBackend>::default();
        let x = model.must_input("x", &[2, 2], DType::Float);
        let h = model.must_attach(Dense::new("d1", 3), &[&x]);
        let y = model.must_attach(Dense::new("d2", 1).with_trainable(false), &[&h]);
        model.must_build(
            BuildConfig::new()
                .input("x", &x)
                .output("y", &y)
                .loss(loss(&y)),
        );
        model
    }

    /// Loss of one batch of zeros, read before any update.
    fn loss_value(model: &mut Model<TrainBackend>) -> f64 {
        let x = HostTensor::zeros(&[2, 2], DType::Float);
        let inputs = NamedTensors::from([("x".to_string(), x)]);
        let mut solver = sgd::<TrainBackend>(0.0);
        model
            .fit_batch(&inputs, &Default::default(), &mut solver)
            .unwrap()
    }

    fn sum_of_squares(model: &Model<TrainBackend>, key: &str) -> f64 {
        model.get_params().unwrap()[key]
            .to_f64_vec()
            .iter()
            .map(|v| v * v)
            .sum()
    }

    #[test]
    fn test_l2_sums_squared_parameters() {
        let mut model = l2_model(|_| l2(&["d1"]));
        let expected = sum_of_squares(&model, "d1:weights");
        let actual = loss_value(&mut model);
        assert!(
            (actual - expected).abs() < 1e-4 * expected.max(1.0),
            "{actual} vs {expected}"
        );
    }

    #[test]
    fn test_l2_skips_frozen_layers() {
        let mut model = l2_model(|_| l2(&["d1", "d2"]));
        let expected = sum_of_squares(&model, "d1:weights");
        assert!(sum_of_squares(&model, "d2:weights") > 0.0);
        let actual = loss_value(&mut model);
        assert!(
            (actual - expected).abs() < 1e-4 * expected.max(1.0),
            "{actual} vs {expected}"
        );

        let mut frozen_only = Model::<TrainBackend>::default();
        let x = frozen_only.must_input("x", &[2, 2], DType::Float);
        let y = frozen_only.must_attach(Dense::new("frozen", 1).with_trainable(false), &[&x]);
        let err = frozen_only
            .build(
                BuildConfig::new()
                    .input("x", &x)
                    .output("y", &y)
                    .loss(l2(&["frozen"])),
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidLayerConfig { .. }));
    }

    #[test]
    fn test_l2_requires_known_layers() {
        let mut graph = Graph::new();
        let mut ctx = LossContext::new(&mut graph, &[]);
        assert!(l2(&["missing"])(&mut ctx).is_err());
        assert!(l2(&[])(&mut ctx).is_err());
    }
}
