//! Hooks into the training loop.
//!
//! Every hook has a default that does nothing, so a callback only
//! implements the events it cares about. Returning an error aborts
//! training; returning [`CallbackAction::Stop`] ends it after the current
//! epoch or batch without error.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use burn::tensor::backend::AutodiffBackend;

use crate::errors::ModelError;
use crate::model::Model;

/// Metric values of the running epoch, by name. Always holds `loss`.
pub type Metrics = BTreeMap<String, f64>;

/// Whether training goes on after a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackAction {
    #[default]
    Continue,
    Stop,
}

/// Events of a training run. Epochs and batches count from 1.
pub trait TrainingCallback<B: AutodiffBackend> {
    fn on_training_start(&mut self, _model: &mut Model<B>) -> Result<(), ModelError> {
        Ok(())
    }

    fn on_batch_end(
        &mut self,
        _model: &mut Model<B>,
        _epoch: usize,
        _batch: usize,
        _num_batches: usize,
        _metrics: &mut Metrics,
    ) -> Result<CallbackAction, ModelError> {
        Ok(CallbackAction::Continue)
    }

    fn on_epoch_end(
        &mut self,
        _model: &mut Model<B>,
        _epoch: usize,
        _metrics: &mut Metrics,
    ) -> Result<CallbackAction, ModelError> {
        Ok(CallbackAction::Continue)
    }

    /// Runs when training finishes without error.
    fn on_training_end(&mut self, _model: &mut Model<B>) -> Result<(), ModelError> {
        Ok(())
    }

    /// Runs last, after success, stop or error alike.
    fn on_cleanup(&mut self, _model: &mut Model<B>) {}
}

/// Writes chosen metrics as CSV rows, one per epoch in which at least one
/// of them was recorded. The writer is flushed but never closed.
#[derive(Debug)]
pub struct CsvMetricsLogger<W: Write> {
    writer: W,
    names: Vec<String>,
}

impl<W: Write> CsvMetricsLogger<W> {
    pub fn new(writer: W, names: &[&str]) -> Self {
        Self {
            writer,
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<B: AutodiffBackend, W: Write> TrainingCallback<B> for CsvMetricsLogger<W> {
    fn on_training_start(&mut self, _model: &mut Model<B>) -> Result<(), ModelError> {
        writeln!(self.writer, "epoch,{}", self.names.join(","))?;
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        _model: &mut Model<B>,
        epoch: usize,
        metrics: &mut Metrics,
    ) -> Result<CallbackAction, ModelError> {
        if self.names.iter().any(|n| metrics.contains_key(n)) {
            let cells: Vec<String> = self
                .names
                .iter()
                .map(|n| metrics.get(n).map(f64::to_string).unwrap_or_default())
                .collect();
            writeln!(self.writer, "{},{}", epoch, cells.join(","))?;
            self.writer.flush()?;
        }
        Ok(CallbackAction::Continue)
    }
}

fn save_params<B: AutodiffBackend>(model: &Model<B>, path: &PathBuf) -> Result<(), ModelError> {
    let mut writer = BufWriter::new(File::create(path)?);
    model.write_params(&mut writer)?;
    writer.flush()?;
    log::debug!("Saved parameters to {}", path.display());
    Ok(())
}

/// Saves the parameters to one file after every epoch, keeping only the
/// latest.
#[derive(Debug, Clone)]
pub struct SaveParams {
    path: PathBuf,
}

impl SaveParams {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl<B: AutodiffBackend> TrainingCallback<B> for SaveParams {
    fn on_epoch_end(
        &mut self,
        model: &mut Model<B>,
        _epoch: usize,
        _metrics: &mut Metrics,
    ) -> Result<CallbackAction, ModelError> {
        save_params(model, &self.path)?;
        Ok(CallbackAction::Continue)
    }
}

/// Saves the parameters every `every` epochs to a new file. `{epoch}` in
/// the template is replaced with the epoch number.
#[derive(Debug, Clone)]
pub struct SaveParamsEvery {
    template: String,
    every: usize,
}

impl SaveParamsEvery {
    pub fn new(template: impl Into<String>, every: usize) -> Self {
        Self {
            template: template.into(),
            every: every.max(1),
        }
    }

    fn path_for(&self, epoch: usize) -> PathBuf {
        PathBuf::from(self.template.replace("{epoch}", &epoch.to_string()))
    }
}

impl<B: AutodiffBackend> TrainingCallback<B> for SaveParamsEvery {
    fn on_epoch_end(
        &mut self,
        model: &mut Model<B>,
        epoch: usize,
        _metrics: &mut Metrics,
    ) -> Result<CallbackAction, ModelError> {
        if epoch % self.every == 0 {
            save_params(model, &self.path_for(epoch))?;
        }
        Ok(CallbackAction::Continue)
    }
}

/// Records `metric(model)` under `name` every `every` epochs.
pub struct EpochMetric<F> {
    name: String,
    every: usize,
    metric: F,
}

impl<F> EpochMetric<F> {
    pub fn new(name: impl Into<String>, every: usize, metric: F) -> Self {
        Self {
            name: name.into(),
            every: every.max(1),
            metric,
        }
    }
}

impl<B, F> TrainingCallback<B> for EpochMetric<F>
where
    B: AutodiffBackend,
    F: FnMut(&mut Model<B>) -> Result<f64, ModelError>,
{
    fn on_epoch_end(
        &mut self,
        model: &mut Model<B>,
        epoch: usize,
        metrics: &mut Metrics,
    ) -> Result<CallbackAction, ModelError> {
        if epoch % self.every == 0 {
            let value = (self.metric)(model)?;
            metrics.insert(self.name.clone(), value);
        }
        Ok(CallbackAction::Continue)
    }
}

/// Records `metric(model)` under `name` every `every` batches.
pub struct BatchMetric<F> {
    name: String,
    every: usize,
    metric: F,
}

impl<F> BatchMetric<F> {
    pub fn new(name: impl Into<String>, every: usize, metric: F) -> Self {
        Self {
            name: name.into(),
            every: every.max(1),
            metric,
        }
    }
}

impl<B, F> TrainingCallback<B> for BatchMetric<F>
where
    B: AutodiffBackend,
    F: FnMut(&mut Model<B>) -> Result<f64, ModelError>,
{
    fn on_batch_end(
        &mut self,
        model: &mut Model<B>,
        _epoch: usize,
        batch: usize,
        _num_batches: usize,
        metrics: &mut Metrics,
    ) -> Result<CallbackAction, ModelError> {
        if batch % self.every == 0 {
            let value = (self.metric)(model)?;
            metrics.insert(self.name.clone(), value);
        }
        Ok(CallbackAction::Continue)
    }
}

/// Runs a closure at the end of every epoch.
pub struct EpochCallback<F> {
    callback: F,
}

impl<F> EpochCallback<F>
where
    F: FnMut(usize, &Metrics) -> Result<CallbackAction, ModelError>,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<B, F> TrainingCallback<B> for EpochCallback<F>
where
    B: AutodiffBackend,
    F: FnMut(usize, &Metrics) -> Result<CallbackAction, ModelError>,
{
    fn on_epoch_end(
        &mut self,
        _model: &mut Model<B>,
        epoch: usize,
        metrics: &mut Metrics,
    ) -> Result<CallbackAction, ModelError> {
        (self.callback)(epoch, metrics)
    }
}
