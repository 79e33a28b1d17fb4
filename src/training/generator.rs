//! Sources of training batches.

use rand::SeedableRng;
use rand::rngs::StdRng;

use super::batching::{Remainder, split_batches};
use crate::errors::ModelError;
use crate::tensor::NamedTensors;

/// Named inputs and named loss targets for one training step.
pub type Batch = (NamedTensors, NamedTensors);

/// Supplies the batches of one epoch at a time.
///
/// The training loop calls [`reset`](Self::reset) at the start of every
/// epoch and then [`next_batch`](Self::next_batch) until it returns `None`.
pub trait TrainingDataGenerator {
    /// Prepares a new epoch of batches with `batch_size` rows each.
    fn reset(&mut self, batch_size: usize) -> Result<(), ModelError>;

    /// Next batch of the epoch, or `None` once the epoch is exhausted.
    fn next_batch(&mut self) -> Result<Option<Batch>, ModelError>;

    /// Number of batches in the current epoch.
    fn num_batches(&self) -> usize;
}

/// Batches in-memory tensors. Rows that do not fill a whole batch are
/// dropped, so keep datasets small enough to hold in memory.
#[derive(Debug, Clone)]
pub struct TensorDataGenerator {
    inputs: NamedTensors,
    targets: NamedTensors,
    batches: Option<Vec<Batch>>,
    cursor: usize,
}

impl TensorDataGenerator {
    pub fn new(inputs: NamedTensors, targets: NamedTensors) -> Self {
        Self {
            inputs,
            targets,
            batches: None,
            cursor: 0,
        }
    }
}

impl TrainingDataGenerator for TensorDataGenerator {
    fn reset(&mut self, batch_size: usize) -> Result<(), ModelError> {
        let mut rows = self
            .inputs
            .iter()
            .chain(&self.targets)
            .map(|(name, tensor)| (name, tensor.rows()));
        if let Some((first, expected)) = rows.next() {
            if let Some((name, actual)) = rows.find(|(_, r)| *r != expected) {
                return Err(ModelError::Generator {
                    message: format!(
                        "{} has {} rows but {} has {}",
                        name, actual, first, expected
                    ),
                });
            }
        }
        let (inputs, _) = split_batches(&self.inputs, batch_size, Remainder::Drop)?;
        let (targets, _) = split_batches(&self.targets, batch_size, Remainder::Drop)?;
        self.batches = Some(inputs.into_iter().zip(targets).collect());
        self.cursor = 0;
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<Batch>, ModelError> {
        let batches = self.batches.as_ref().ok_or_else(|| ModelError::Generator {
            message: "next_batch called before reset".to_string(),
        })?;
        let batch = batches.get(self.cursor).cloned();
        if batch.is_some() {
            self.cursor += 1;
        }
        Ok(batch)
    }

    fn num_batches(&self) -> usize {
        self.batches.as_ref().map_or(0, Vec::len)
    }
}

/// Generates every batch on demand from a random source.
///
/// `generate` receives the random source and the batch size and returns a
/// full batch. Each epoch has `batches_per_epoch` batches.
pub struct SyntheticDataGenerator<R, F> {
    rng: R,
    batches_per_epoch: usize,
    generate: F,
    batch_size: Option<usize>,
    produced: usize,
}

impl<R, F> SyntheticDataGenerator<R, F>
where
    R: rand::Rng,
    F: FnMut(&mut R, usize) -> Result<Batch, ModelError>,
{
    pub fn new(rng: R, batches_per_epoch: usize, generate: F) -> Self {
        Self {
            rng,
            batches_per_epoch,
            generate,
            batch_size: None,
            produced: 0,
        }
    }
}

impl<F> SyntheticDataGenerator<StdRng, F>
where
    F: FnMut(&mut StdRng, usize) -> Result<Batch, ModelError>,
{
    /// Uses a [`StdRng`] seeded with `seed`, for reproducible data.
    pub fn seeded(seed: u64, batches_per_epoch: usize, generate: F) -> Self {
        Self::new(StdRng::seed_from_u64(seed), batches_per_epoch, generate)
    }
}

impl<R, F> TrainingDataGenerator for SyntheticDataGenerator<R, F>
where
    R: rand::Rng,
    F: FnMut(&mut R, usize) -> Result<Batch, ModelError>,
{
    fn reset(&mut self, batch_size: usize) -> Result<(), ModelError> {
        if batch_size == 0 {
            return Err(ModelError::Generator {
                message: "batch size must be at least 1".to_string(),
            });
        }
        self.batch_size = Some(batch_size);
        self.produced = 0;
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<Batch>, ModelError> {
        let batch_size = self.batch_size.ok_or_else(|| ModelError::Generator {
            message: "next_batch called before reset".to_string(),
        })?;
        if self.produced >= self.batches_per_epoch {
            return Ok(None);
        }
        self.produced += 1;
        (self.generate)(&mut self.rng, batch_size).map(Some)
    }

    fn num_batches(&self) -> usize {
        self.batches_per_epoch
    }
}

impl<R, F> std::fmt::Debug for SyntheticDataGenerator<R, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticDataGenerator")
            .field("batches_per_epoch", &self.batches_per_epoch)
            .field("batch_size", &self.batch_size)
            .field("produced", &self.produced)
            .finish()
    }
}
