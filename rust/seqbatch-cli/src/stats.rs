// rust/seqbatch-cli/src/stats.rs

use seqbatch_core::{Example, PipelineError, Result};

use crate::corpus::LENGTH_KEY;

/// Padding statistics of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub size: usize,
    pub padded_length: usize,
    pub tokens: usize,
}

impl BatchSummary {
    /// Measures a batch of records, or the features side of a batch of pairs.
    pub fn of(batch: &Example) -> Result<Self> {
        let records = match batch {
            Example::Tuple(_) => batch.as_pair()?.0,
            other => other,
        };
        let lengths = records
            .tensor(LENGTH_KEY)
            .and_then(|t| t.as_i64())
            .ok_or_else(|| PipelineError::structure("batch has no length field"))?;
        let size = lengths.len();
        let padded_length = lengths.iter().copied().max().unwrap_or(0).max(0) as usize;
        let tokens = lengths.iter().map(|&l| l.max(0) as usize).sum();
        Ok(Self {
            size,
            padded_length,
            tokens,
        })
    }

    /// Share of the padded batch occupied by padding.
    pub fn padding_ratio(&self) -> f64 {
        let capacity = self.size * self.padded_length;
        if capacity == 0 {
            return 0.0;
        }
        1.0 - self.tokens as f64 / capacity as f64
    }
}

/// Totals across all observed batches.
#[derive(Debug, Default)]
pub struct RunStats {
    pub batches: usize,
    pub examples: usize,
    pub tokens: usize,
    pub padded_tokens: usize,
}

impl RunStats {
    pub fn record(&mut self, summary: &BatchSummary) {
        self.batches += 1;
        self.examples += summary.size;
        self.tokens += summary.tokens;
        self.padded_tokens += summary.size * summary.padded_length;
    }

    pub fn padding_ratio(&self) -> f64 {
        if self.padded_tokens == 0 {
            return 0.0;
        }
        1.0 - self.tokens as f64 / self.padded_tokens as f64
    }
}
