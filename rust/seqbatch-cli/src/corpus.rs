// rust/seqbatch-cli/src/corpus.rs

//! Plain-text corpus loading.
//!
//! Each line is one sequence of whitespace-separated tokens. Tokens are
//! mapped to ids in order of first appearance; id 0 is the padding value and
//! is never assigned.

use std::collections::HashMap;
use std::path::Path;

use seqbatch_core::{length_fn, Example, Length, LengthFn, PipelineError, Result, Tensor};

/// Field holding the token ids of a record.
pub const IDS_KEY: &str = "ids";
/// Field holding the unpadded length of a record.
pub const LENGTH_KEY: &str = "length";

/// Token to id mapping grown on first sight.
#[derive(Debug, Default)]
pub struct Vocabulary {
    ids: HashMap<String, i64>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&mut self, token: &str) -> i64 {
        let next = self.ids.len() as i64 + 1;
        *self.ids.entry(token.to_string()).or_insert(next)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Encodes one line as an `{ids, length}` record.
    pub fn encode(&mut self, line: &str) -> Example {
        let ids: Vec<i64> = line.split_whitespace().map(|token| self.id(token)).collect();
        let length = ids.len() as i64;
        Example::dict([
            (IDS_KEY, Tensor::from_i64(ids)),
            (LENGTH_KEY, Tensor::scalar_i64(length)),
        ])
    }
}

/// Reads the lines of a text file.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::io_with_source(path, "failed to read corpus", e))?;
    Ok(content.lines().map(str::to_string).collect())
}

/// Loads a monolingual corpus as feature records.
pub fn load_features(path: &Path, vocabulary: &mut Vocabulary) -> Result<Vec<Example>> {
    Ok(read_lines(path)?
        .iter()
        .map(|line| vocabulary.encode(line))
        .collect())
}

/// Loads a parallel corpus as `(features, labels)` examples.
///
/// Without a labels file every example is paired with itself, which keeps
/// the batching statistics meaningful for a single-sided corpus.
pub fn load_parallel(
    features: &Path,
    labels: Option<&Path>,
    vocabulary: &mut Vocabulary,
) -> Result<Vec<Example>> {
    let source = load_features(features, vocabulary)?;
    let target = match labels {
        Some(path) => load_features(path, vocabulary)?,
        None => source.clone(),
    };
    if source.len() != target.len() {
        return Err(PipelineError::structure(format!(
            "features have {} lines but labels have {}",
            source.len(),
            target.len()
        )));
    }
    Ok(source
        .into_iter()
        .zip(target)
        .map(|(features, labels)| Example::pair(features, labels))
        .collect())
}

/// Length of a record, read from its length field.
pub fn record_length() -> LengthFn {
    length_fn(|record: &Example| {
        record
            .tensor(LENGTH_KEY)
            .and_then(Tensor::to_scalar_i64)
            .map(|length| Length::Single(length.max(0) as usize))
            .ok_or_else(|| {
                PipelineError::structure(format!("record has no scalar '{}' field", LENGTH_KEY))
            })
    })
}
