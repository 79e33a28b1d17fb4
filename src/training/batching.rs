//! Cutting named tensors into fixed-size batches.

use crate::errors::ModelError;
use crate::tensor::NamedTensors;

/// What to do with trailing rows that do not fill a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remainder {
    /// Zero-pad them into one last batch.
    Pad,
    /// Leave them out.
    Drop,
}

/// Splits equal-row named tensors into batches of `batch_size` rows.
///
/// Returns the batches and how many padding rows the last batch carries
/// (always 0 with [`Remainder::Drop`]).
pub fn split_batches(
    tensors: &NamedTensors,
    batch_size: usize,
    remainder: Remainder,
) -> Result<(Vec<NamedTensors>, usize), ModelError> {
    if batch_size == 0 {
        return Err(ModelError::InvalidTensor {
            message: "batch size must be at least 1".to_string(),
        });
    }
    let mut rows = None;
    for (name, tensor) in tensors {
        match rows {
            None => rows = Some(tensor.rows()),
            Some(r) if r != tensor.rows() => {
                return Err(ModelError::InvalidTensor {
                    message: format!(
                        "all tensors must have the same number of rows, {} has {} instead of {}",
                        name,
                        tensor.rows(),
                        r
                    ),
                });
            }
            Some(_) => {}
        }
    }
    let rows = rows.ok_or_else(|| ModelError::InvalidTensor {
        message: "no tensors to batch".to_string(),
    })?;

    let leftover = rows % batch_size;
    let (total, padding) = match remainder {
        _ if leftover == 0 => (rows, 0),
        Remainder::Pad => (rows + batch_size - leftover, batch_size - leftover),
        Remainder::Drop => {
            log::warn!(
                "Dropping {} trailing rows that do not fill a batch of {}",
                leftover,
                batch_size
            );
            (rows - leftover, 0)
        }
    };

    let mut batches = Vec::with_capacity(total / batch_size);
    for start in (0..total).step_by(batch_size) {
        let end = start + batch_size;
        let mut batch = NamedTensors::new();
        for (name, tensor) in tensors {
            let part = if end <= rows {
                tensor.slice_rows(start, end)?
            } else {
                tensor.slice_rows(start, rows)?.pad_rows(end - rows)
            };
            batch.insert(name.clone(), part);
        }
        batches.push(batch);
    }
    Ok((batches, padding))
}
