//! Container configuration

use crate::algorithms::{CipherAlgorithm, CipherMode, HashAlgorithm};
use crate::error::{Result, SplitboxError};

/// Default length in bytes of the binding value shared by both artifacts.
pub const DEFAULT_BINDING_LEN: usize = 16;

/// Upper bound on the binding length; anything longer only bloats both files.
pub const MAX_BINDING_LEN: usize = 1024;

/// Algorithm choices and parameters for a [`crate::container::SecureContainer`].
///
/// The key length is determined by `cipher` and the IV length by the cipher
/// block size; the binding length is chosen independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerConfig {
    pub hash: HashAlgorithm,
    pub cipher: CipherAlgorithm,
    pub mode: CipherMode,
    pub binding_len: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            hash: HashAlgorithm::default(),
            cipher: CipherAlgorithm::default(),
            mode: CipherMode::default(),
            binding_len: DEFAULT_BINDING_LEN,
        }
    }
}

impl ContainerConfig {
    /// Resolve algorithm names into a configuration with the default binding length.
    pub fn from_names(hash: &str, cipher: &str, mode: &str) -> Result<Self> {
        Ok(Self {
            hash: hash.parse()?,
            cipher: cipher.parse()?,
            mode: mode.parse()?,
            binding_len: DEFAULT_BINDING_LEN,
        })
    }

    pub fn with_binding_len(mut self, binding_len: usize) -> Self {
        self.binding_len = binding_len;
        self
    }

    /// Check parameter values that the type system does not constrain.
    pub fn validate(&self) -> Result<()> {
        if self.binding_len == 0 || self.binding_len > MAX_BINDING_LEN {
            return Err(SplitboxError::configuration(format!(
                "binding length must be between 1 and {} bytes, got {}",
                MAX_BINDING_LEN, self.binding_len
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_config() {
        let config = ContainerConfig::default();
        assert_eq!(config.hash, HashAlgorithm::Sha512);
        assert_eq!(config.cipher, CipherAlgorithm::Aes256);
        assert_eq!(config.mode, CipherMode::Cfb8);
        assert_eq!(config.binding_len, 16);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_names() {
        let config = ContainerConfig::from_names("sha256", "AES-128", "CBC").unwrap();
        assert_eq!(config.hash, HashAlgorithm::Sha256);
        assert_eq!(config.cipher, CipherAlgorithm::Aes128);
        assert_eq!(config.mode, CipherMode::Cbc);
    }

    #[test]
    fn test_from_names_rejects_unknown_mode() {
        let err = ContainerConfig::from_names("sha512", "AES-256", "XTS").unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Configuration));
    }

    #[test]
    fn test_binding_len_bounds() {
        let err = ContainerConfig::default()
            .with_binding_len(0)
            .validate()
            .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Configuration));

        let err = ContainerConfig::default()
            .with_binding_len(MAX_BINDING_LEN + 1)
            .validate()
            .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Configuration));

        ContainerConfig::default()
            .with_binding_len(MAX_BINDING_LEN)
            .validate()
            .unwrap();
    }
}
