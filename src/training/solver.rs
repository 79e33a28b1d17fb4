//! Gradient-descent solvers.
//!
//! A [`Solver`] wraps a Burn optimizer together with its learning rate. The
//! optimizer keeps its per-parameter state between steps, keyed by the
//! parameter ids of the model it is used with.

use std::marker::PhantomData;

use burn::optim::{AdamConfig, GradientsParams, Optimizer, SgdConfig};
use burn::tensor::{Tensor, backend::AutodiffBackend};

use crate::model::{ParamHandle, ParamStore};

/// An optimizer and the learning rate it steps with.
pub struct Solver<B: AutodiffBackend, O: Optimizer<ParamStore<B>, B>> {
    optimizer: O,
    learning_rate: f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend, O: Optimizer<ParamStore<B>, B>> Solver<B, O> {
    pub fn new(optimizer: O, learning_rate: f64) -> Self {
        Self {
            optimizer,
            learning_rate,
            _backend: PhantomData,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    /// Back-propagates `loss` and updates every parameter in `handles`.
    pub(crate) fn step(&mut self, loss: Tensor<B, 1>, handles: &[ParamHandle<B>]) {
        if handles.is_empty() {
            return;
        }
        let store = ParamStore {
            params: handles.iter().map(|h| h.borrow().clone()).collect(),
        };
        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &store);
        let store = self.optimizer.step(self.learning_rate, store, grads);
        for (handle, param) in handles.iter().zip(store.params) {
            *handle.borrow_mut() = param;
        }
    }
}

impl<B: AutodiffBackend, O: Optimizer<ParamStore<B>, B>> std::fmt::Debug for Solver<B, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Solver")
            .field("learning_rate", &self.learning_rate)
            .finish()
    }
}

/// Adam with Burn's default moments and epsilon.
pub fn adam<B: AutodiffBackend>(learning_rate: f64) -> Solver<B, impl Optimizer<ParamStore<B>, B>> {
    Solver::new(AdamConfig::new().init::<B, ParamStore<B>>(), learning_rate)
}

/// Plain stochastic gradient descent.
pub fn sgd<B: AutodiffBackend>(learning_rate: f64) -> Solver<B, impl Optimizer<ParamStore<B>, B>> {
    Solver::new(SgdConfig::new().init::<B, ParamStore<B>>(), learning_rate)
}
