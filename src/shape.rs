//! Shape predicates composed by conjunction and checked at attach time.

use crate::errors::ModelError;

/// A single predicate over a shape tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeCheck {
    /// The shape has exactly this many axes.
    Rank(usize),
    /// The shape has at least this many axes.
    MinRank(usize),
    /// `shape[axis] == size`.
    AxisEquals { axis: usize, size: usize },
    /// The shape equals the target exactly.
    Equals(Vec<usize>),
    /// The shape holds as many elements as the target.
    SameVolume(Vec<usize>),
}

impl ShapeCheck {
    /// Returns a description of the failure, if any.
    pub fn check(&self, shape: &[usize]) -> Result<(), String> {
        match self {
            ShapeCheck::Rank(n) if shape.len() != *n => Err(format!(
                "expected rank {} but got rank {}",
                n,
                shape.len()
            )),
            ShapeCheck::MinRank(n) if shape.len() < *n => Err(format!(
                "expected at least {} axes but got {}",
                n,
                shape.len()
            )),
            ShapeCheck::AxisEquals { axis, size } => match shape.get(*axis) {
                Some(actual) if actual == size => Ok(()),
                Some(actual) => Err(format!(
                    "expected axis {} to be {} but got {}",
                    axis, size, actual
                )),
                None => Err(format!("axis {} does not exist", axis)),
            },
            ShapeCheck::Equals(target) if shape != target.as_slice() => {
                Err(format!("expected shape {:?}", target))
            }
            ShapeCheck::SameVolume(target)
                if shape.iter().product::<usize>() != target.iter().product::<usize>() =>
            {
                Err(format!("volume must match target shape {:?}", target))
            }
            _ => Ok(()),
        }
    }
}

/// Runs every check in order and reports the first failure.
pub fn validate_shape(
    context: &str,
    shape: &[usize],
    checks: &[ShapeCheck],
) -> Result<(), ModelError> {
    for check in checks {
        check
            .check(shape)
            .map_err(|message| ModelError::InvalidShape {
                context: context.to_string(),
                shape: shape.to_vec(),
                message,
            })?;
    }
    Ok(())
}
