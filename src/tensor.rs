//! Host-side dense tensors used to feed and read models.
//!
//! A [`HostTensor`] is a row-major buffer with a shape and a dtype. It is the
//! currency of every public API that moves data in or out of a model:
//! predictions, training batches, and parameter snapshots.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ModelError;

/// Named collection of host tensors, keyed by input/output/target name.
pub type NamedTensors = HashMap<String, HostTensor>;

/// Element kind of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    Float,
    Int,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Float => write!(f, "float"),
            DType::Int => write!(f, "int"),
        }
    }
}

/// Backing storage of a [`HostTensor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "lowercase")]
pub enum HostData {
    Float(Vec<f64>),
    Int(Vec<i64>),
}

impl HostData {
    fn len(&self) -> usize {
        match self {
            HostData::Float(v) => v.len(),
            HostData::Int(v) => v.len(),
        }
    }
}

/// Dense, row-major tensor living in host memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHostTensor")]
pub struct HostTensor {
    shape: Vec<usize>,
    data: HostData,
}

/// Unchecked form read from serialized data.
#[derive(Deserialize)]
struct RawHostTensor {
    shape: Vec<usize>,
    data: HostData,
}

impl TryFrom<RawHostTensor> for HostTensor {
    type Error = ModelError;

    fn try_from(raw: RawHostTensor) -> Result<Self, Self::Error> {
        Self::new(&raw.shape, raw.data)
    }
}

fn volume(shape: &[usize]) -> usize {
    shape.iter().product()
}

impl HostTensor {
    /// Creates a float tensor, checking that the data fills the shape.
    pub fn from_floats(shape: &[usize], values: Vec<f64>) -> Result<Self, ModelError> {
        Self::new(shape, HostData::Float(values))
    }

    /// Creates an integer tensor, checking that the data fills the shape.
    pub fn from_ints(shape: &[usize], values: Vec<i64>) -> Result<Self, ModelError> {
        Self::new(shape, HostData::Int(values))
    }

    fn new(shape: &[usize], data: HostData) -> Result<Self, ModelError> {
        if shape.is_empty() {
            return Err(ModelError::InvalidTensor {
                message: "tensors must have at least one dimension".to_string(),
            });
        }
        if volume(shape) != data.len() {
            return Err(ModelError::InvalidTensor {
                message: format!(
                    "shape {:?} needs {} values, got {}",
                    shape,
                    volume(shape),
                    data.len()
                ),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// Tensor of zeros with the given shape and dtype.
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let n = volume(shape);
        let data = match dtype {
            DType::Float => HostData::Float(vec![0.0; n]),
            DType::Int => HostData::Int(vec![0; n]),
        };
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    /// Rank-1 float tensor from a slice.
    pub fn from_vec(values: &[f64]) -> Result<Self, ModelError> {
        Self::from_floats(&[values.len()], values.to_vec())
    }

    /// Rank-1 integer tensor from a slice.
    pub fn from_int_vec(values: &[i64]) -> Result<Self, ModelError> {
        Self::from_ints(&[values.len()], values.to_vec())
    }

    /// Rank-2 float tensor from rows of equal length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, ModelError> {
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.is_empty() || width == 0 {
            return Err(ModelError::InvalidTensor {
                message: "cannot build a tensor from empty rows".to_string(),
            });
        }
        if let Some(bad) = rows.iter().position(|r| r.len() != width) {
            return Err(ModelError::InvalidTensor {
                message: format!(
                    "row {} has {} values, expected {}",
                    bad,
                    rows[bad].len(),
                    width
                ),
            });
        }
        let values = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Self::from_floats(&[rows.len(), width], values)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        match self.data {
            HostData::Float(_) => DType::Float,
            HostData::Int(_) => DType::Int,
        }
    }

    pub fn data(&self) -> &HostData {
        &self.data
    }

    /// Number of rows (size of axis 0).
    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All values widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &self.data {
            HostData::Float(v) => v.clone(),
            HostData::Int(v) => v.iter().map(|&x| x as f64).collect(),
        }
    }

    /// Float values, if this is a float tensor.
    pub fn as_floats(&self) -> Option<&[f64]> {
        match &self.data {
            HostData::Float(v) => Some(v),
            HostData::Int(_) => None,
        }
    }

    /// Integer values, if this is an integer tensor.
    pub fn as_ints(&self) -> Option<&[i64]> {
        match &self.data {
            HostData::Int(v) => Some(v),
            HostData::Float(_) => None,
        }
    }

    /// Reads a single element at a full multi-index.
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.shape.len() || index.iter().zip(&self.shape).any(|(i, d)| i >= d) {
            return None;
        }
        let offset = index
            .iter()
            .zip(&self.shape)
            .fold(0, |acc, (i, d)| acc * d + i);
        Some(match &self.data {
            HostData::Float(v) => v[offset],
            HostData::Int(v) => v[offset] as f64,
        })
    }

    fn row_width(&self) -> usize {
        volume(&self.shape[1..])
    }

    /// Copies rows `start..end` into a new tensor that keeps the rank.
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Self, ModelError> {
        if start > end || end > self.rows() {
            return Err(ModelError::InvalidTensor {
                message: format!(
                    "row range {}..{} out of bounds for {} rows",
                    start,
                    end,
                    self.rows()
                ),
            });
        }
        let w = self.row_width();
        let mut shape = self.shape.clone();
        shape[0] = end - start;
        let data = match &self.data {
            HostData::Float(v) => HostData::Float(v[start * w..end * w].to_vec()),
            HostData::Int(v) => HostData::Int(v[start * w..end * w].to_vec()),
        };
        Ok(Self { shape, data })
    }

    /// Appends `count` zero rows.
    pub fn pad_rows(&self, count: usize) -> Self {
        let extra = count * self.row_width();
        let mut shape = self.shape.clone();
        shape[0] += count;
        let data = match &self.data {
            HostData::Float(v) => {
                let mut v = v.clone();
                v.resize(v.len() + extra, 0.0);
                HostData::Float(v)
            }
            HostData::Int(v) => {
                let mut v = v.clone();
                v.resize(v.len() + extra, 0);
                HostData::Int(v)
            }
        };
        Self { shape, data }
    }

    /// Stacks tensors along axis 0. All parts must agree on dtype and on
    /// every axis but the first.
    pub fn concat_rows(parts: &[HostTensor]) -> Result<Self, ModelError> {
        let first = parts.first().ok_or_else(|| ModelError::InvalidTensor {
            message: "nothing to concatenate".to_string(),
        })?;
        let mut shape = first.shape.clone();
        shape[0] = 0;
        let mut data = match first.dtype() {
            DType::Float => HostData::Float(Vec::new()),
            DType::Int => HostData::Int(Vec::new()),
        };
        for part in parts {
            if part.shape[1..] != first.shape[1..] || part.dtype() != first.dtype() {
                return Err(ModelError::InvalidTensor {
                    message: format!(
                        "cannot concatenate {:?} ({}) with {:?} ({})",
                        part.shape,
                        part.dtype(),
                        first.shape,
                        first.dtype()
                    ),
                });
            }
            shape[0] += part.shape[0];
            match (&mut data, &part.data) {
                (HostData::Float(acc), HostData::Float(v)) => acc.extend_from_slice(v),
                (HostData::Int(acc), HostData::Int(v)) => acc.extend_from_slice(v),
                _ => unreachable!("dtypes checked above"),
            }
        }
        Ok(Self { shape, data })
    }
}
