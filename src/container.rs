//! Sealing and opening of data/key artifact pairs
//!
//! Sealing generates a fresh binding value, key and IV, frames the payload as
//! `decimal length + "\n" + payload`, pads it with `X` to the block size and
//! encrypts it with the configured cipher and mode.
//!
//! Opening runs the following checks in order and stops at the first failure:
//! 1. the binding lines of both artifacts are identical
//! 2. the key file's self hash matches its first four lines
//! 3. the data hash in the key file matches the ciphertext line
//!
//! Only then is the ciphertext decrypted and truncated to the declared length.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::armor::{ArtifactReader, ArtifactWriter, DataArtifact, KeyArtifact};
use crate::config::ContainerConfig;
use crate::error::{ErrorCategory, ErrorKind, Result, SplitboxError};

/// Separates the decimal length prefix from the payload.
const LENGTH_SEPARATOR: u8 = b'\n';

/// Filler appended after the payload up to the next block boundary.
const PAD_BYTE: u8 = b'X';

/// Output of [`SecureContainer::seal`], ready to be written out as two artifacts.
///
/// Binding, key and IV are wiped from memory when this value is dropped.
pub struct SealedPayload {
    binding: Zeroizing<Vec<u8>>,
    key: Zeroizing<Vec<u8>>,
    iv: Zeroizing<Vec<u8>>,
    ciphertext: String,
}

impl SealedPayload {
    pub fn binding(&self) -> &[u8] {
        &self.binding
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Base64 of the encrypted, framed payload.
    pub fn ciphertext(&self) -> &str {
        &self.ciphertext
    }
}

impl fmt::Debug for SealedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedPayload")
            .field("binding_len", &self.binding.len())
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// Stateless engine that seals payloads into artifact pairs and opens them again.
///
/// Holds only its configuration, so it can be shared freely between threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecureContainer {
    config: ContainerConfig,
}

impl SecureContainer {
    /// Create a container, rejecting unusable configuration up front.
    pub fn new(config: ContainerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn writer(&self) -> ArtifactWriter {
        ArtifactWriter::new(self.config.hash)
    }

    pub fn reader(&self) -> ArtifactReader {
        ArtifactReader
    }

    /// Encrypt `payload` under a freshly generated binding, key and IV.
    pub fn seal(&self, payload: &[u8]) -> Result<SealedPayload> {
        let binding = random_bytes(self.config.binding_len)?;
        let key = random_bytes(self.config.cipher.key_len())?;
        let iv = random_bytes(self.config.cipher.block_size())?;
        self.seal_deterministic(payload, &binding, &key, &iv)
    }

    /// Encrypt `payload` with caller-provided binding, key and IV.
    ///
    /// This function is ONLY for testing purposes to generate deterministic output.
    /// NEVER use this in production - always use `seal()` which generates fresh values.
    pub fn seal_deterministic(
        &self,
        payload: &[u8],
        binding: &[u8],
        key: &[u8],
        iv: &[u8],
    ) -> Result<SealedPayload> {
        debug!(
            cipher = %self.config.cipher,
            mode = %self.config.mode,
            payload_len = payload.len(),
            "sealing payload"
        );

        let cipher = self.config.cipher.new_cipher(key, self.config.mode, iv)?;
        let mut framed = frame(payload, self.config.cipher.block_size());
        cipher.encrypt(&mut framed)?;

        Ok(SealedPayload {
            binding: Zeroizing::new(binding.to_vec()),
            key: Zeroizing::new(key.to_vec()),
            iv: Zeroizing::new(iv.to_vec()),
            ciphertext: BASE64_STANDARD.encode(&*framed),
        })
    }

    /// Run the binding and integrity checks without decrypting anything.
    pub fn verify(&self, data: &DataArtifact, key: &KeyArtifact) -> Result<()> {
        if !lines_equal(data.binding_line(), key.binding_line()) {
            warn!("binding mismatch between data file and key file");
            return Err(SplitboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::BindingMismatch,
                "the key file does not belong to this data file; \
                 use the key file written together with it",
            ));
        }

        let self_hash = self.config.hash.sign(key.signed_region().as_bytes());
        if !lines_equal(&self_hash, key.self_hash_line()) {
            warn!(hash = %self.config.hash, "key file self hash mismatch");
            return Err(SplitboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::KeyArtifactTampered,
                format!(
                    "the key file may have been altered (its {} hash does not match)",
                    self.config.hash
                ),
            ));
        }

        let data_hash = self.config.hash.sign(data.ciphertext_line().as_bytes());
        if !lines_equal(&data_hash, key.data_hash_line()) {
            warn!(hash = %self.config.hash, "data file hash mismatch");
            return Err(SplitboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::DataArtifactTampered,
                format!(
                    "the data file may have been altered (its {} hash does not match the key file)",
                    self.config.hash
                ),
            ));
        }

        Ok(())
    }

    /// Verify both artifacts and return the original payload.
    pub fn open(&self, data: &DataArtifact, key: &KeyArtifact) -> Result<Vec<u8>> {
        self.verify(data, key)?;

        let key_bytes = Zeroizing::new(decode_line(key.key_line(), "key")?);
        let iv = Zeroizing::new(decode_line(key.iv_line(), "IV")?);
        let mut framed = Zeroizing::new(decode_line(data.ciphertext_line(), "ciphertext")?);

        let cipher = self
            .config
            .cipher
            .new_cipher(&key_bytes, self.config.mode, &iv)?;
        cipher.decrypt(&mut framed)?;

        let payload = unframe(&framed)?;
        debug!(payload_len = payload.len(), "opened payload");
        Ok(payload)
    }

    /// Seal `payload` and render both artifacts as `(data_text, key_text)`.
    pub fn save(&self, payload: &[u8]) -> Result<(String, Zeroizing<String>)> {
        let sealed = self.seal(payload)?;
        Ok(self.writer().write(&sealed))
    }

    /// Parse both artifact texts, verify them and return the payload.
    pub fn load(&self, data_text: &str, key_text: &str) -> Result<Vec<u8>> {
        let reader = self.reader();
        let data = reader.read_data(data_text)?;
        let key = reader.read_key(key_text)?;
        self.open(&data, &key)
    }

    /// Parse both artifact texts and run the integrity checks only.
    pub fn check(&self, data_text: &str, key_text: &str) -> Result<()> {
        let reader = self.reader();
        let data = reader.read_data(data_text)?;
        let key = reader.read_key(key_text)?;
        self.verify(&data, &key)
    }
}

fn random_bytes(len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut buf = Zeroizing::new(vec![0u8; len]);
    OsRng.try_fill_bytes(&mut buf).map_err(|e| {
        SplitboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::CryptoPrimitive,
            "failed to read from the system random number generator",
            e,
        )
    })?;
    Ok(buf)
}

fn lines_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn decode_line(line: &str, what: &str) -> Result<Vec<u8>> {
    BASE64_STANDARD.decode(line).map_err(|e| {
        SplitboxError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::MalformedArtifact,
            format!("{} line is not valid base64", what),
            e,
        )
    })
}

/// Prefix `payload` with its decimal length and pad to a multiple of `block_size`.
fn frame(payload: &[u8], block_size: usize) -> Zeroizing<Vec<u8>> {
    let prefix = payload.len().to_string();
    let unpadded = prefix.len() + 1 + payload.len();
    let padded = unpadded.div_ceil(block_size) * block_size;

    let mut framed = Zeroizing::new(Vec::with_capacity(padded));
    framed.extend_from_slice(prefix.as_bytes());
    framed.push(LENGTH_SEPARATOR);
    framed.extend_from_slice(payload);
    framed.resize(padded, PAD_BYTE);
    framed
}

/// Recover the payload from decrypted framing using the explicit length prefix.
fn unframe(framed: &[u8]) -> Result<Vec<u8>> {
    let invalid = || {
        SplitboxError::with_kind(
            ErrorCategory::User,
            ErrorKind::CryptoPrimitive,
            "decrypted data has no valid length prefix; \
             the configured cipher or mode probably differs from the one used to seal",
        )
    };

    let separator = framed
        .iter()
        .position(|b| *b == LENGTH_SEPARATOR)
        .ok_or_else(invalid)?;
    let (prefix, rest) = (&framed[..separator], &framed[separator + 1..]);

    if prefix.is_empty() || !prefix.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    let declared: usize = std::str::from_utf8(prefix)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(invalid)?;
    if declared > rest.len() {
        return Err(invalid());
    }

    Ok(rest[..declared].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{CipherAlgorithm, CipherMode, HashAlgorithm};

    fn container() -> SecureContainer {
        SecureContainer::new(ContainerConfig::default()).unwrap()
    }

    fn roundtrip(container: &SecureContainer, payload: &[u8]) -> Vec<u8> {
        let (data_text, key_text) = container.save(payload).unwrap();
        container.load(&data_text, &key_text).unwrap()
    }

    /// Replace the character at `index` of body line `line` (1-based, banner
    /// excluded) with a different base64 character.
    fn flip(text: &str, line: usize, index: usize) -> String {
        let mut lines: Vec<String> = text.lines().map(str::to_owned).collect();
        let mut chars: Vec<char> = lines[line].chars().collect();
        chars[index] = if chars[index] == 'A' { 'B' } else { 'A' };
        lines[line] = chars.into_iter().collect();
        lines.join("\n") + "\n"
    }

    #[test]
    fn test_hello_world() {
        assert_eq!(roundtrip(&container(), b"hello world"), b"hello world");
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(roundtrip(&container(), b""), b"");
    }

    #[test]
    fn test_payload_with_newlines() {
        let payload = b"\nfirst\nsecond\r\n\n12\nX";
        assert_eq!(roundtrip(&container(), payload), payload);
    }

    #[test]
    fn test_padding_boundaries() {
        let container = container();
        for len in [1, 13, 14, 15, 16, 17, 31, 32, 33, 100, 1000] {
            let payload = vec![b'X'; len];
            let opened = roundtrip(&container, &payload);
            assert_eq!(opened.len(), len);
            assert_eq!(opened, payload);
        }
    }

    #[test]
    fn test_ciphertext_is_block_aligned() {
        let container = container();
        for len in [0, 1, 13, 16, 29, 64] {
            let sealed = container.seal(&vec![0u8; len]).unwrap();
            let raw = BASE64_STANDARD.decode(sealed.ciphertext()).unwrap();
            assert_eq!(raw.len() % 16, 0, "payload length {}", len);
            assert!(raw.len() >= len + 2);
        }
    }

    #[test]
    fn test_all_configurations_roundtrip() {
        let payload: Vec<u8> = (0..=255).collect();
        for hash in HashAlgorithm::ALL {
            for cipher in CipherAlgorithm::ALL {
                for mode in CipherMode::ALL {
                    let config = ContainerConfig {
                        hash,
                        cipher,
                        mode,
                        binding_len: 16,
                    };
                    let container = SecureContainer::new(config).unwrap();
                    assert_eq!(
                        roundtrip(&container, &payload),
                        payload,
                        "{} {} {}",
                        hash,
                        cipher,
                        mode
                    );
                }
            }
        }
    }

    #[test]
    fn test_generated_lengths_follow_config() {
        let config = ContainerConfig {
            cipher: CipherAlgorithm::Aes192,
            binding_len: 40,
            ..ContainerConfig::default()
        };
        let sealed = SecureContainer::new(config).unwrap().seal(b"x").unwrap();
        assert_eq!(sealed.binding().len(), 40);
        assert_eq!(sealed.key().len(), 24);
        assert_eq!(sealed.iv().len(), 16);
    }

    #[test]
    fn test_seal_is_fresh_every_time() {
        let container = container();
        let first = container.seal(b"same payload").unwrap();
        let second = container.seal(b"same payload").unwrap();

        assert_ne!(first.binding(), second.binding());
        assert_ne!(first.key(), second.key());
        assert_ne!(first.iv(), second.iv());
        assert_ne!(first.ciphertext(), second.ciphertext());
    }

    #[test]
    fn test_old_key_cannot_open_new_data() {
        let container = container();
        let (_, old_key) = container.save(b"same payload").unwrap();
        let (new_data, _) = container.save(b"same payload").unwrap();

        let err = container.load(&new_data, &old_key).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::BindingMismatch));
    }

    #[test]
    fn test_tampered_ciphertext_detected() {
        let container = container();
        let (data_text, key_text) = container.save(b"hello world").unwrap();
        let ciphertext_len = data_text.lines().nth(2).unwrap().len();

        for index in [0, ciphertext_len / 2, ciphertext_len - 3] {
            let tampered = flip(&data_text, 2, index);
            let err = container.load(&tampered, &key_text).unwrap_err();
            assert_eq!(err.kind, Some(ErrorKind::DataArtifactTampered));
        }
    }

    #[test]
    fn test_tampered_key_lines_detected() {
        let container = container();
        let (data_text, key_text) = container.save(b"hello world").unwrap();

        for line in 2..=5 {
            let tampered = flip(&key_text, line, 0);
            let err = container.load(&data_text, &tampered).unwrap_err();
            assert_eq!(
                err.kind,
                Some(ErrorKind::KeyArtifactTampered),
                "key file line {}",
                line
            );
        }
    }

    #[test]
    fn test_tampered_binding_detected() {
        let container = container();
        let (data_text, key_text) = container.save(b"hello world").unwrap();

        let err = container
            .load(&flip(&data_text, 1, 0), &key_text)
            .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::BindingMismatch));

        let err = container
            .load(&data_text, &flip(&key_text, 1, 0))
            .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::BindingMismatch));
    }

    #[test]
    fn test_binding_checked_before_integrity() {
        let container = container();
        let (data_text, _) = container.save(b"one").unwrap();
        let (_, key_text) = container.save(b"two").unwrap();

        // Corrupt the key file too; the binding check must still win.
        let err = container
            .load(&data_text, &flip(&key_text, 5, 0))
            .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::BindingMismatch));
    }

    #[test]
    fn test_wrong_hash_configuration() {
        let (data_text, key_text) = container().save(b"hello").unwrap();
        let config = ContainerConfig {
            hash: HashAlgorithm::Sha256,
            ..ContainerConfig::default()
        };
        let other = SecureContainer::new(config).unwrap();
        let err = other.load(&data_text, &key_text).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::KeyArtifactTampered));
    }

    #[test]
    fn test_wrong_cipher_configuration() {
        let (data_text, key_text) = container().save(b"hello").unwrap();
        let config = ContainerConfig {
            cipher: CipherAlgorithm::Aes128,
            ..ContainerConfig::default()
        };
        let other = SecureContainer::new(config).unwrap();
        let err = other.load(&data_text, &key_text).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::CryptoPrimitive));
    }

    #[test]
    fn test_malformed_before_integrity() {
        let container = container();
        let (data_text, key_text) = container.save(b"hello").unwrap();
        let truncated: String = key_text
            .lines()
            .take(3)
            .map(|l| format!("{}\n", l))
            .collect();

        let err = container.load(&data_text, &truncated).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::MalformedArtifact));
    }

    #[test]
    fn test_check_passes_for_matching_pair() {
        let container = container();
        let (data_text, key_text) = container.save(b"hello").unwrap();
        container.check(&data_text, &key_text).unwrap();
    }

    #[test]
    fn test_invalid_configuration_rejected_at_construction() {
        let config = ContainerConfig::default().with_binding_len(0);
        let err = SecureContainer::new(config).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Configuration));
    }

    #[test]
    fn test_frame_layout() {
        let framed = frame(b"hello world", 16);
        assert_eq!(&framed[..], b"11\nhello worldXX");

        let framed = frame(b"", 16);
        assert_eq!(&framed[..], b"0\nXXXXXXXXXXXXXX");

        // 13 + "13\n" is exactly one block, so no filler is added.
        let framed = frame(&[0u8; 13], 16);
        assert_eq!(framed.len(), 16);
    }

    #[test]
    fn test_unframe_ignores_filler_in_payload() {
        assert_eq!(unframe(b"3\nXXXXXXXXXXXXX").unwrap(), b"XXX");
    }

    #[test]
    fn test_unframe_rejects_garbage() {
        let cases: [&[u8]; 5] = [
            b"no separator",
            b"\nabc",
            b"+3\nabc",
            b"12\nabc",
            b"1a\nabc",
        ];
        for framed in cases {
            let err = unframe(framed).unwrap_err();
            assert_eq!(err.kind, Some(ErrorKind::CryptoPrimitive));
        }
    }

    #[test]
    fn test_container_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SecureContainer>();

        let container = container();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                std::thread::spawn(move || {
                    let payload = format!("payload {}", i).into_bytes();
                    assert_eq!(roundtrip(&container, &payload), payload);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_sealed_debug_redacts_material() {
        let sealed = container()
            .seal_deterministic(b"x", &[1u8; 16], &[0xAB; 32], &[0xCD; 16])
            .unwrap();
        let debug = format!("{:?}", sealed);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("171"));
    }
}
