//! Training loop implementation.

use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;

use super::callbacks::{CallbackAction, Metrics, TrainingCallback};
use super::generator::{TensorDataGenerator, TrainingDataGenerator};
use super::progress::ProgressBar;
use super::{FitConfig, Solver};
use crate::errors::ModelError;
use crate::model::{Model, ParamStore};
use crate::tensor::NamedTensors;

type Callbacks<B> = Vec<Box<dyn TrainingCallback<B>>>;

impl<B: AutodiffBackend> Model<B> {
    /// Fits the model on in-memory data and returns the mean loss of every
    /// epoch. Rows that do not fill a whole batch are left out.
    pub fn fit<O: Optimizer<ParamStore<B>, B>>(
        &mut self,
        inputs: &NamedTensors,
        targets: &NamedTensors,
        solver: &mut Solver<B, O>,
        config: FitConfig<B>,
    ) -> Result<Vec<f64>, ModelError> {
        let mut generator = TensorDataGenerator::new(inputs.clone(), targets.clone());
        self.fit_generator(&mut generator, solver, config)
    }

    /// Fits the model on batches from `generator` and returns the mean loss
    /// of every epoch.
    pub fn fit_generator<G, O>(
        &mut self,
        generator: &mut G,
        solver: &mut Solver<B, O>,
        mut config: FitConfig<B>,
    ) -> Result<Vec<f64>, ModelError>
    where
        G: TrainingDataGenerator + ?Sized,
        O: Optimizer<ParamStore<B>, B>,
    {
        let mut callbacks = std::mem::take(&mut config.callbacks);
        let result = self.run_epochs(generator, solver, &config, &mut callbacks);
        if let Err(e) = &result {
            log::warn!("Training aborted: {}", e);
        }
        for callback in callbacks.iter_mut() {
            callback.on_cleanup(self);
        }
        result
    }

    fn run_epochs<G, O>(
        &mut self,
        generator: &mut G,
        solver: &mut Solver<B, O>,
        config: &FitConfig<B>,
        callbacks: &mut Callbacks<B>,
    ) -> Result<Vec<f64>, ModelError>
    where
        G: TrainingDataGenerator + ?Sized,
        O: Optimizer<ParamStore<B>, B>,
    {
        let batch_size = self.batch_size()?;
        let mut progress = config
            .verbose
            .then(|| ProgressBar::stdout(config.epochs, config.clear_line));
        for callback in callbacks.iter_mut() {
            callback.on_training_start(self)?;
        }

        let mut history = Vec::with_capacity(config.epochs);
        for epoch in 1..=config.epochs {
            generator.reset(batch_size)?;
            let num_batches = generator.num_batches();
            let logging = config.is_logging_epoch(epoch);
            let show_every = (num_batches / 100).max(1);

            let mut metrics = Metrics::new();
            let mut total = 0.0;
            let mut done = 0usize;
            let mut stop = false;
            while let Some((inputs, targets)) = generator.next_batch()? {
                let loss = self.fit_batch(&inputs, &targets, solver)?;
                total += loss;
                done += 1;
                let running = total / done as f64;
                metrics.insert("loss".to_string(), running);
                log::debug!("Epoch {} batch {}: loss = {:.6}", epoch, done, loss);

                if logging && (done - 1) % show_every == 0 {
                    if let Some(bar) = progress.as_mut() {
                        bar.update(epoch, running, done, num_batches)?;
                    }
                }
                for callback in callbacks.iter_mut() {
                    let action = callback
                        .on_batch_end(self, epoch, done, num_batches, &mut metrics)?;
                    stop |= action == CallbackAction::Stop;
                }
                if stop {
                    break;
                }
            }
            if done == 0 {
                return Err(ModelError::TrainingError {
                    message: format!(
                        "epoch {} produced no batches of {} rows",
                        epoch, batch_size
                    ),
                });
            }

            let mean = total / done as f64;
            metrics.insert("loss".to_string(), mean);
            history.push(mean);
            if logging {
                if let Some(bar) = progress.as_mut() {
                    bar.finish_epoch(epoch, mean)?;
                }
                log::info!("Epoch {}/{}: loss = {:.6}", epoch, config.epochs, mean);
            }

            for callback in callbacks.iter_mut() {
                let action = callback.on_epoch_end(self, epoch, &mut metrics)?;
                stop |= action == CallbackAction::Stop;
            }
            if stop {
                log::info!("Training stopped by a callback after epoch {}", epoch);
                break;
            }
        }

        if let Some(bar) = progress.as_mut() {
            bar.finish()?;
        }
        for callback in callbacks.iter_mut() {
            callback.on_training_end(self)?;
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{ActivationLayer, Dense};
    use crate::model::BuildConfig;
    use crate::tensor::{DType, HostTensor};
    use crate::training::callbacks::EpochCallback;
    use crate::training::{adam, loss, sgd};
    use burn::backend::{Autodiff, NdArray};
    use std::cell::RefCell;
    use std::rc::Rc;

    type TestBackend = Autodiff<NdArray>;

    fn regression_model() -> Model<TestBackend> {
        let mut model = Model::<TestBackend>::default();
        let x = model.must_input("x", &[5, 1], DType::Float);
        let y = model.must_attach(Dense::new("linear", 1), &[&x]);
        model.must_build(
            BuildConfig::new()
                .input("x", &x)
                .output("y", &y)
                .loss(loss::mse("y", &y)),
        );
        model
    }

    fn line_data() -> (NamedTensors, NamedTensors) {
        // y = 2x over ten points
        let xs: Vec<f64> = (0..10).map(|i| i as f64 / 5.0).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x).collect();
        let xs = HostTensor::from_floats(&[10, 1], xs).unwrap();
        let ys = HostTensor::from_floats(&[10, 1], ys).unwrap();
        (
            NamedTensors::from([("x".to_string(), xs)]),
            NamedTensors::from([("y".to_string(), ys)]),
        )
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut model = regression_model();
        let (xs, ys) = line_data();
        let history = model
            .fit(
                &xs,
                &ys,
                &mut sgd::<TestBackend>(0.1),
                FitConfig::new().epochs(50).verbose(false),
            )
            .unwrap();

        assert_eq!(history.len(), 50);
        let initial_loss = history[0];
        let final_loss = history[49];
        assert!(
            final_loss < initial_loss,
            "Loss should decrease: initial={}, final={}",
            initial_loss,
            final_loss
        );
    }

    #[test]
    fn test_callback_stop_ends_training_early() {
        let mut model = regression_model();
        let (xs, ys) = line_data();
        let history = model
            .fit(
                &xs,
                &ys,
                &mut adam::<TestBackend>(0.01),
                FitConfig::new()
                    .epochs(10)
                    .verbose(false)
                    .callback(EpochCallback::new(|epoch, _: &Metrics| {
                        Ok(if epoch == 3 {
                            CallbackAction::Stop
                        } else {
                            CallbackAction::Continue
                        })
                    })),
            )
            .unwrap();
        assert_eq!(history.len(), 3);
    }

    struct Recorder {
        events: Rc<RefCell<Vec<String>>>,
        fail_at: Option<usize>,
    }

    impl TrainingCallback<TestBackend> for Recorder {
        fn on_training_start(&mut self, _: &mut Model<TestBackend>) -> Result<(), ModelError> {
            self.events.borrow_mut().push("start".to_string());
            Ok(())
        }

        fn on_batch_end(
            &mut self,
            _: &mut Model<TestBackend>,
            epoch: usize,
            batch: usize,
            num_batches: usize,
            metrics: &mut Metrics,
        ) -> Result<CallbackAction, ModelError> {
            assert!(metrics.contains_key("loss"));
            self.events
                .borrow_mut()
                .push(format!("batch {}:{}/{}", epoch, batch, num_batches));
            Ok(CallbackAction::Continue)
        }

        fn on_epoch_end(
            &mut self,
            _: &mut Model<TestBackend>,
            epoch: usize,
            _: &mut Metrics,
        ) -> Result<CallbackAction, ModelError> {
            self.events.borrow_mut().push(format!("epoch {}", epoch));
            if self.fail_at == Some(epoch) {
                return Err(ModelError::Callback {
                    message: "boom".to_string(),
                });
            }
            Ok(CallbackAction::Continue)
        }

        fn on_training_end(&mut self, _: &mut Model<TestBackend>) -> Result<(), ModelError> {
            self.events.borrow_mut().push("end".to_string());
            Ok(())
        }

        fn on_cleanup(&mut self, _: &mut Model<TestBackend>) {
            self.events.borrow_mut().push("cleanup".to_string());
        }
    }

    #[test]
    fn test_callback_event_order() {
        let mut model = regression_model();
        let (xs, ys) = line_data();
        let events = Rc::new(RefCell::new(Vec::new()));
        let recorder = Recorder {
            events: events.clone(),
            fail_at: None,
        };
        model
            .fit(
                &xs,
                &ys,
                &mut sgd::<TestBackend>(0.01),
                FitConfig::new().epochs(2).verbose(false).callback(recorder),
            )
            .unwrap();
        assert_eq!(
            *events.borrow(),
            vec![
                "start", "batch 1:1/2", "batch 1:2/2", "epoch 1", "batch 2:1/2", "batch 2:2/2",
                "epoch 2", "end", "cleanup"
            ]
        );
    }

    #[test]
    fn test_callback_error_aborts_but_cleans_up() {
        let mut model = regression_model();
        let (xs, ys) = line_data();
        let events = Rc::new(RefCell::new(Vec::new()));
        let recorder = Recorder {
            events: events.clone(),
            fail_at: Some(1),
        };
        let err = model
            .fit(
                &xs,
                &ys,
                &mut sgd::<TestBackend>(0.01),
                FitConfig::new().epochs(3).verbose(false).callback(recorder),
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::Callback { .. }));
        let events = events.borrow();
        assert_eq!(events.last().map(String::as_str), Some("cleanup"));
        assert!(!events.iter().any(|e| e == "end"));
    }

    #[test]
    fn test_too_few_rows_is_an_error() {
        let mut model = regression_model();
        let zeros = HostTensor::from_floats(&[3, 1], vec![0.0; 3]).unwrap();
        let xs = NamedTensors::from([("x".to_string(), zeros.clone())]);
        let ys = NamedTensors::from([("y".to_string(), zeros)]);
        let err = model
            .fit(
                &xs,
                &ys,
                &mut sgd::<TestBackend>(0.01),
                FitConfig::new().verbose(false),
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::TrainingError { .. }));
    }

    #[test]
    fn test_unbuilt_model_cannot_fit() {
        let mut model = Model::<TestBackend>::default();
        let x = model.must_input("x", &[2, 1], DType::Float);
        model.must_attach(ActivationLayer::relu("act"), &[&x]);
        let (xs, ys) = line_data();
        let err = model
            .fit(&xs, &ys, &mut sgd::<TestBackend>(0.01), FitConfig::new())
            .unwrap_err();
        assert!(matches!(err, ModelError::NotBuilt));
    }
}
