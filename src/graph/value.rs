//! Runtime values: Burn float tensors of rank 1 to 4.
//!
//! Int-typed nodes hold integral floats on the device and are rounded when
//! copied back to the host.

use burn::tensor::{Tensor, TensorData, backend::Backend};

use crate::errors::ModelError;
use crate::tensor::{DType, HostTensor};

/// A tensor of any supported rank.
#[derive(Debug, Clone)]
pub enum Value<B: Backend> {
    R1(Tensor<B, 1>),
    R2(Tensor<B, 2>),
    R3(Tensor<B, 3>),
    R4(Tensor<B, 4>),
}

/// Applies a rank-preserving expression to the tensor inside a [`Value`].
macro_rules! map_value {
    ($value:expr, |$t:ident| $body:expr) => {
        match $value {
            Value::R1($t) => Value::R1($body),
            Value::R2($t) => Value::R2($body),
            Value::R3($t) => Value::R3($body),
            Value::R4($t) => Value::R4($body),
        }
    };
}

/// Evaluates an expression with the same result type for every rank.
macro_rules! with_value {
    ($value:expr, |$t:ident| $body:expr) => {
        match $value {
            Value::R1($t) => $body,
            Value::R2($t) => $body,
            Value::R3($t) => $body,
            Value::R4($t) => $body,
        }
    };
}

/// Combines two values of equal rank.
macro_rules! zip_value {
    ($a:expr, $b:expr, |$x:ident, $y:ident| $body:expr) => {
        match ($a, $b) {
            (Value::R1($x), Value::R1($y)) => Ok(Value::R1($body)),
            (Value::R2($x), Value::R2($y)) => Ok(Value::R2($body)),
            (Value::R3($x), Value::R3($y)) => Ok(Value::R3($body)),
            (Value::R4($x), Value::R4($y)) => Ok(Value::R4($body)),
            (a, b) => Err($crate::errors::ModelError::engine(format!(
                "rank mismatch: {} and {}",
                a.rank(),
                b.rank()
            ))),
        }
    };
}

pub(crate) use {map_value, with_value, zip_value};

impl<B: Backend> Value<B> {
    /// Uploads a host tensor to `device`.
    pub fn from_host(host: &HostTensor, device: &B::Device) -> Result<Self, ModelError> {
        let values = host.to_f64_vec();
        let n = values.len();
        let data = TensorData::new(values, [n]).convert::<B::FloatElem>();
        Value::R1(Tensor::<B, 1>::from_data(data, device)).reshape(host.shape())
    }

    /// Zeros of the given shape.
    pub fn zeros(shape: &[usize], device: &B::Device) -> Result<Self, ModelError> {
        let n = shape.iter().product();
        Value::R1(Tensor::<B, 1>::zeros([n], device)).reshape(shape)
    }

    pub fn rank(&self) -> usize {
        match self {
            Value::R1(_) => 1,
            Value::R2(_) => 2,
            Value::R3(_) => 3,
            Value::R4(_) => 4,
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        with_value!(self, |t| t.dims().to_vec())
    }

    /// Reshapes to any rank between 1 and 4 with the same volume.
    pub fn reshape(self, shape: &[usize]) -> Result<Self, ModelError> {
        let current = self.shape();
        if current.iter().product::<usize>() != shape.iter().product::<usize>() {
            return Err(ModelError::engine(format!(
                "cannot reshape {:?} to {:?}",
                current, shape
            )));
        }
        if current == shape {
            return Ok(self);
        }
        let n = shape.iter().product::<usize>();
        let flat: Tensor<B, 1> = with_value!(self, |t| t.reshape([n]));
        Ok(match *shape {
            [a] => Value::R1(flat.reshape([a])),
            [a, b] => Value::R2(flat.reshape([a, b])),
            [a, b, c] => Value::R3(flat.reshape([a, b, c])),
            [a, b, c, d] => Value::R4(flat.reshape([a, b, c, d])),
            _ => {
                return Err(ModelError::engine(format!(
                    "unsupported rank {}",
                    shape.len()
                )));
            }
        })
    }

    /// Downloads the values into a host tensor of the given dtype.
    pub fn to_host(&self, dtype: DType) -> Result<HostTensor, ModelError> {
        let shape = self.shape();
        let values = self.to_f64_vec()?;
        match dtype {
            DType::Float => HostTensor::from_floats(&shape, values),
            DType::Int => {
                HostTensor::from_ints(&shape, values.iter().map(|v| v.round() as i64).collect())
            }
        }
    }

    /// Row-major copy of the values.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>, ModelError> {
        let data = with_value!(self, |t| t.to_data());
        data.convert::<f64>()
            .to_vec::<f64>()
            .map_err(|e| {
                ModelError::engine(format!("cannot read tensor data: {:?}", e))
            })
    }

    fn rank_error(&self, expected: usize) -> ModelError {
        ModelError::engine(format!(
            "expected rank {}, got rank {}",
            expected,
            self.rank()
        ))
    }

    pub fn into_rank1(self) -> Result<Tensor<B, 1>, ModelError> {
        match self {
            Value::R1(t) => Ok(t),
            other => Err(other.rank_error(1)),
        }
    }

    pub fn into_rank2(self) -> Result<Tensor<B, 2>, ModelError> {
        match self {
            Value::R2(t) => Ok(t),
            other => Err(other.rank_error(2)),
        }
    }

    pub fn into_rank3(self) -> Result<Tensor<B, 3>, ModelError> {
        match self {
            Value::R3(t) => Ok(t),
            other => Err(other.rank_error(3)),
        }
    }

    pub fn into_rank4(self) -> Result<Tensor<B, 4>, ModelError> {
        match self {
            Value::R4(t) => Ok(t),
            other => Err(other.rank_error(4)),
        }
    }
}
