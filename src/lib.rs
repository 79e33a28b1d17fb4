//! # layergraph
//!
//! A Rust library for assembling neural networks from layers, attaching
//! losses, and training them, on top of the Burn tensor engine.
//!
//! Layers extend a symbolic graph owned by a [`Model`]. Building the model
//! runs the loss construction, allocates the parameters and compiles a
//! machine that evaluates the graph with Burn. Burn also provides the
//! gradients and the Adam/SGD optimizers used while fitting.
//!
//! ## Features
//!
//! - **Burn Backend**: NdArray on the CPU by default, WGPU behind the `wgpu`
//!   feature.
//! - **Layers**: dense, 2-D convolution and max pooling, activations,
//!   dropout, reshape, elementwise arithmetic and one-hot encoding.
//! - **Training**: losses, batching, data generators, callbacks and
//!   parameter checkpoints.
//!
//! ## Example
//!
//! ```
//! use layergraph::prelude::*;
//!
//! let mut model = Model::<DefaultBackend>::default();
//! let x = model.must_input("x", &[4, 2], DType::Float);
//! let hidden = model.must_attach(Dense::new("hidden", 8), &[&x]);
//! let hidden = model.must_attach(ActivationLayer::relu("hidden_act"), &[&hidden]);
//! let out = model.must_attach(Dense::new("out", 1), &[&hidden]);
//! let out = model.must_attach(ActivationLayer::sigmoid("out_act"), &[&out]);
//! model.must_build(
//!     BuildConfig::new()
//!         .input("x", &x)
//!         .output("y", &out)
//!         .loss(loss::bce("y", &out)),
//! );
//!
//! let xs = HostTensor::from_rows(&[
//!     vec![0.0, 0.0],
//!     vec![0.0, 1.0],
//!     vec![1.0, 0.0],
//!     vec![1.0, 1.0],
//! ])
//! .unwrap();
//! let inputs = NamedTensors::from([("x".to_string(), xs)]);
//! let predictions = model.predict(&inputs).unwrap();
//! assert_eq!(predictions["y"].shape(), &[4, 1]);
//! ```

pub mod errors;
pub mod graph;
pub mod layers;
pub mod model;
pub mod shape;
pub mod tensor;
pub mod training;

// Re-exports for convenience
pub use errors::ModelError;
pub use graph::{Graph, Node};
pub use model::{BuildConfig, Model};
pub use tensor::{DType, HostTensor, NamedTensors};
pub use training::{FitConfig, Solver, adam, loss, sgd};

/// CPU backend with autodiff support.
pub type DefaultBackend = burn::backend::Autodiff<burn::backend::NdArray>;

/// Backend type alias for WGPU with autodiff support.
#[cfg(feature = "wgpu")]
pub type GpuBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::DefaultBackend;
    #[cfg(feature = "wgpu")]
    pub use crate::GpuBackend;
    pub use crate::errors::ModelError;
    pub use crate::graph::{Graph, Init, Node};
    pub use crate::layers::{
        Activation, ActivationLayer, ArithmeticOp, BinaryArithmetic, Conv2D, Dense, Dropout,
        Input, Layer, MaxPooling2D, Namer, OneHot, Padding, Reshape,
    };
    pub use crate::model::{BuildConfig, Model};
    pub use crate::tensor::{DType, HostTensor, NamedTensors};
    pub use crate::training::{
        CallbackAction, FitConfig, Metrics, Solver, SyntheticDataGenerator, TensorDataGenerator,
        TrainingCallback, TrainingDataGenerator, adam, loss, sgd,
    };
}
