//! # Formats Module
//!
//! Binary checkpoint format. File I/O lives in the app layer.

mod checkpoint;

pub use checkpoint::*;
