//! Training configuration.

use std::fmt;

use burn::tensor::backend::AutodiffBackend;

use super::callbacks::TrainingCallback;

/// Configuration for fitting a model.
pub struct FitConfig<B: AutodiffBackend> {
    /// Number of passes over the data.
    pub epochs: usize,
    /// Show progress on the first, the last, and every `log_every`-th epoch.
    pub log_every: usize,
    /// Whether to show progress at all.
    pub verbose: bool,
    /// Let each epoch's progress line be overwritten by the next.
    pub clear_line: bool,
    /// Hooks run in the order they were added.
    pub callbacks: Vec<Box<dyn TrainingCallback<B>>>,
}

impl<B: AutodiffBackend> Default for FitConfig<B> {
    fn default() -> Self {
        Self {
            epochs: 1,
            log_every: 1,
            verbose: true,
            clear_line: false,
            callbacks: Vec::new(),
        }
    }
}

impl<B: AutodiffBackend> FitConfig<B> {
    /// Creates a new FitConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of epochs.
    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Sets how often progress is shown.
    pub fn log_every(mut self, epochs: usize) -> Self {
        self.log_every = epochs.max(1);
        self
    }

    /// Sets whether to print progress.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Sets whether finished epoch lines are overwritten.
    pub fn clear_line(mut self, clear_line: bool) -> Self {
        self.clear_line = clear_line;
        self
    }

    /// Adds a callback.
    pub fn callback(mut self, callback: impl TrainingCallback<B> + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub(crate) fn is_logging_epoch(&self, epoch: usize) -> bool {
        epoch == 1 || epoch == self.epochs || epoch % self.log_every.max(1) == 0
    }
}

impl<B: AutodiffBackend> fmt::Debug for FitConfig<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FitConfig")
            .field("epochs", &self.epochs)
            .field("log_every", &self.log_every)
            .field("verbose", &self.verbose)
            .field("clear_line", &self.clear_line)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::callbacks::SaveParams;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_default_config() {
        let config = FitConfig::<TestBackend>::default();
        assert_eq!(config.epochs, 1);
        assert_eq!(config.log_every, 1);
        assert!(config.verbose);
        assert!(!config.clear_line);
        assert!(config.callbacks.is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = FitConfig::<TestBackend>::new()
            .epochs(50)
            .log_every(10)
            .verbose(false)
            .clear_line(true)
            .callback(SaveParams::new("params.json"));

        assert_eq!(config.epochs, 50);
        assert_eq!(config.log_every, 10);
        assert!(!config.verbose);
        assert!(config.clear_line);
        assert_eq!(config.callbacks.len(), 1);
    }

    #[test]
    fn test_logging_epochs() {
        let config = FitConfig::<TestBackend>::new().epochs(25).log_every(10);
        let logged: Vec<usize> = (1..=25).filter(|e| config.is_logging_epoch(*e)).collect();
        assert_eq!(logged, vec![1, 10, 20, 25]);
    }
}
