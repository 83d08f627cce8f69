// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Shared error types.

use std::error::Error;
use std::fmt;

#[macro_export]
/// Build a [SimError] from a message that supports `to_string`
macro_rules! sim_error {
    ($msg:expr) => {
        Err($crate::types::SimError($msg.to_string()))?
    };
}

/// The `SimError` is what should be returned in the case of an error
#[derive(Debug)]
pub struct SimError(pub String);

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {}", self.0)
    }
}

impl Error for SimError {}

impl From<std::io::Error> for SimError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

/// The SimResult is the return type for most simulation functions
pub type SimResult = Result<(), SimError>;
