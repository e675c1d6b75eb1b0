//! Splitbox - encrypted data container split across a data file and a
//! matching one-time key file

#![forbid(unsafe_code)]

pub mod algorithms;
pub mod armor;
pub mod config;
pub mod container;
pub mod error;
pub mod file_ops;

pub use algorithms::{CipherAlgorithm, CipherMode, HashAlgorithm};
pub use armor::{ArtifactReader, ArtifactWriter, DataArtifact, KeyArtifact};
pub use config::ContainerConfig;
pub use container::{SealedPayload, SecureContainer};
pub use error::{ErrorCategory, ErrorKind, Result, SplitboxError};
