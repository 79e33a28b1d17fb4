//! Single-line progress display for the training loop.

use std::io::{self, Stdout, Write};

const BAR_WIDTH: usize = 40;

/// Rewrites one terminal line with the epoch, the running loss and a bar.
#[derive(Debug)]
pub struct ProgressBar<W: Write = Stdout> {
    out: W,
    epochs: usize,
    clear_line: bool,
}

impl ProgressBar<Stdout> {
    pub fn stdout(epochs: usize, clear_line: bool) -> Self {
        Self::new(io::stdout(), epochs, clear_line)
    }
}

impl<W: Write> ProgressBar<W> {
    pub fn new(out: W, epochs: usize, clear_line: bool) -> Self {
        Self {
            out,
            epochs,
            clear_line,
        }
    }

    /// Shows progress after `done` of `total` batches.
    pub fn update(&mut self, epoch: usize, loss: f64, done: usize, total: usize) -> io::Result<()> {
        let filled = if total == 0 {
            0
        } else {
            (done * (BAR_WIDTH - 1) / total).min(BAR_WIDTH - 1)
        };
        let bar = format!("{}>", "=".repeat(filled));
        write!(
            self.out,
            "\rEpoch {}/{} - Loss: {:.6} |{:<width$}|",
            epoch,
            self.epochs,
            loss,
            bar,
            width = BAR_WIDTH
        )?;
        self.out.flush()
    }

    /// Replaces the bar with the final loss of the epoch. With `clear_line`
    /// the next epoch overwrites this line.
    pub fn finish_epoch(&mut self, epoch: usize, loss: f64) -> io::Result<()> {
        let end = if self.clear_line { "\r" } else { "\n" };
        write!(
            self.out,
            "\rEpoch {}/{} - Loss: {:.6} |Done| {:width$}{}",
            epoch,
            self.epochs,
            loss,
            "",
            end,
            width = BAR_WIDTH
        )?;
        self.out.flush()
    }

    /// Ends the display after the last epoch.
    pub fn finish(&mut self) -> io::Result<()> {
        writeln!(self.out)?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
