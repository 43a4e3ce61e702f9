//! Fixed-width time binning
//!
//! Buckets annotated samples into epoch-aligned bins. Each bin reports the
//! mean value, how much data backs it (coverage) and the majority context.

use crate::config::BinSize;
use crate::types::{Bin, Context, Sample};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Running totals for one bin
#[derive(Debug, Default, Clone)]
struct BinAccumulator {
    weighted_sum: f64,
    coverage: f64,
    votes: [usize; 4],
}

impl BinAccumulator {
    fn add(&mut self, sample: &Sample, context: Context) {
        // Every per-second sample carries one second of weight
        self.weighted_sum += sample.value;
        self.coverage += 1.0;
        self.votes[vote_slot(context)] += 1;
    }

    /// Majority context, ties resolved by precedence
    fn majority(&self) -> Context {
        let mut best = Context::Rest;
        let mut best_votes = 0;
        for context in Context::BY_PRECEDENCE {
            let votes = self.votes[vote_slot(context)];
            if votes > best_votes {
                best = context;
                best_votes = votes;
            }
        }
        best
    }

    fn into_bin(self, bin_start: DateTime<Utc>) -> Bin {
        Bin {
            bin_start,
            aggregated_value: self.weighted_sum / self.coverage,
            coverage_seconds: self.coverage,
            context: self.majority(),
        }
    }
}

fn vote_slot(context: Context) -> usize {
    match context {
        Context::Rest => 0,
        Context::Active => 1,
        Context::Sport => 2,
        Context::Sleep => 3,
    }
}

/// Groups samples into bins of a fixed width
#[derive(Debug, Clone, Copy)]
pub struct Binner {
    bin_size: BinSize,
}

impl Binner {
    pub fn new(bin_size: BinSize) -> Self {
        Self { bin_size }
    }

    pub fn bin_size(&self) -> BinSize {
        self.bin_size
    }

    /// Aggregate annotated samples into bins ordered by start.
    ///
    /// Windows without samples produce no bin.
    pub fn bin(&self, samples: impl IntoIterator<Item = (Sample, Context)>) -> Vec<Bin> {
        let mut windows: BTreeMap<DateTime<Utc>, BinAccumulator> = BTreeMap::new();

        for (sample, context) in samples {
            windows
                .entry(self.bin_size.floor(sample.timestamp))
                .or_default()
                .add(&sample, context);
        }

        windows
            .into_iter()
            .map(|(bin_start, acc)| acc.into_bin(bin_start))
            .collect()
    }
}
