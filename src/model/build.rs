//! Build configuration.

use std::collections::BTreeMap;
use std::fmt;

use crate::graph::Node;
use crate::training::LossFn;

/// What a model is built with: its named inputs and outputs and the loss.
#[derive(Default)]
pub struct BuildConfig {
    pub(crate) inputs: BTreeMap<String, Node>,
    pub(crate) outputs: BTreeMap<String, Node>,
    pub(crate) loss: Option<LossFn>,
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named input. Inputs are fed by this name at run time.
    pub fn input(mut self, name: impl Into<String>, node: &Node) -> Self {
        self.inputs.insert(name.into(), node.clone());
        self
    }

    /// Adds a named output, returned by this name from predictions.
    pub fn output(mut self, name: impl Into<String>, node: &Node) -> Self {
        self.outputs.insert(name.into(), node.clone());
        self
    }

    /// Sets the loss, replacing any earlier one.
    pub fn loss(mut self, loss: LossFn) -> Self {
        self.loss = Some(loss);
        self
    }
}

impl fmt::Debug for BuildConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildConfig")
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .field("loss", &self.loss.is_some())
            .finish()
    }
}
