// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Token-return batches for hop-by-hop flow control.

use shunt_topology::BucketId;

/// Tokens returned per link per tick.
pub const TOKENS_PER_PACKET: usize = 2;

/// A fixed-width batch of returned tokens travelling back toward whoever is
/// feeding the link, padded with `None` when fewer are owed.
#[derive(Copy, Clone, Debug, Default)]
pub struct TokenBatch {
    pub tokens: [Option<BucketId>; TOKENS_PER_PACKET],
}

impl TokenBatch {
    /// A batch carrying no tokens (what failed nodes always emit).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.iter().all(Option::is_none)
    }
}
