//! Sequential layer names.

/// Hands out `base_1`, `base_2`, ... so repeated layers get unique names.
#[derive(Debug, Clone)]
pub struct Namer {
    base: String,
    counter: usize,
}

impl Namer {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            counter: 0,
        }
    }

    /// Returns the next name in the sequence.
    pub fn next_name(&mut self) -> String {
        self.counter += 1;
        format!("{}_{}", self.base, self.counter)
    }
}
