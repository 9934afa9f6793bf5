//! Binary resolution and staging: everything that happens before a server
//! process exists.

pub mod resolver;
pub mod stager;

pub use resolver::{BinaryResolver, BinarySource, BinarySources, PlatformTag, ServerBinaryLocation};
pub use stager::{BinaryStager, StagedBinary};
