//! Closed sets of digest, block cipher and mode choices
//!
//! Every algorithm a container can be configured with is a variant of one of
//! the enums below. Names are resolved once, when the configuration is built,
//! and encryption is dispatched through [`CipherAlgorithm::new_cipher`].

use std::fmt;
use std::str::FromStr;

use aes::{Aes128, Aes192, Aes256};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use cipher::block_padding::NoPadding;
use cipher::consts::U16;
use cipher::{
    AsyncStreamCipher, BlockCipher, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut,
    KeyInit, KeyIvInit, StreamCipher,
};
use sha2::Digest;
use zeroize::Zeroizing;

use crate::error::{ErrorCategory, ErrorKind, Result, SplitboxError};

/// Block size shared by every supported cipher.
pub const BLOCK_SIZE: usize = 16;

/// Keyless digest used for the artifact integrity hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    #[default]
    Sha512,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 6] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha224,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Hash `data` and return the digest base64-encoded, as stored in a key file.
    pub fn sign(self, data: &[u8]) -> String {
        match self {
            HashAlgorithm::Md5 => sign_with::<md5::Md5>(data),
            HashAlgorithm::Sha1 => sign_with::<sha1::Sha1>(data),
            HashAlgorithm::Sha224 => sign_with::<sha2::Sha224>(data),
            HashAlgorithm::Sha256 => sign_with::<sha2::Sha256>(data),
            HashAlgorithm::Sha384 => sign_with::<sha2::Sha384>(data),
            HashAlgorithm::Sha512 => sign_with::<sha2::Sha512>(data),
        }
    }
}

fn sign_with<D: Digest>(data: &[u8]) -> String {
    BASE64_STANDARD.encode(D::digest(data))
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = SplitboxError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        HashAlgorithm::ALL
            .into_iter()
            .find(|h| h.name() == normalized)
            .ok_or_else(|| {
                SplitboxError::configuration(format!(
                    "unknown hash algorithm {:?} (expected md5, sha1 or sha224 to sha512)",
                    s
                ))
            })
    }
}

/// Block cipher; the variant fixes the key length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CipherAlgorithm {
    Aes128,
    Aes192,
    #[default]
    Aes256,
}

impl CipherAlgorithm {
    pub const ALL: [CipherAlgorithm; 3] = [
        CipherAlgorithm::Aes128,
        CipherAlgorithm::Aes192,
        CipherAlgorithm::Aes256,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CipherAlgorithm::Aes128 => "AES-128",
            CipherAlgorithm::Aes192 => "AES-192",
            CipherAlgorithm::Aes256 => "AES-256",
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            CipherAlgorithm::Aes128 => 16,
            CipherAlgorithm::Aes192 => 24,
            CipherAlgorithm::Aes256 => 32,
        }
    }

    pub fn block_size(self) -> usize {
        BLOCK_SIZE
    }

    /// Create a cipher for one encryption or decryption pass.
    ///
    /// Key and IV lengths are checked here so that a key file produced for a
    /// different cipher is reported clearly instead of as a generic failure.
    /// ECB takes no IV, but the IV length is still enforced so that every
    /// key file has the same shape.
    pub fn new_cipher(self, key: &[u8], mode: CipherMode, iv: &[u8]) -> Result<CipherInstance> {
        if key.len() != self.key_len() {
            return Err(SplitboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::CryptoPrimitive,
                format!(
                    "{} requires a {}-byte key, but the key file holds {} bytes; \
                     check the configured cipher",
                    self,
                    self.key_len(),
                    key.len()
                ),
            ));
        }
        if iv.len() != self.block_size() {
            return Err(SplitboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::CryptoPrimitive,
                format!(
                    "{} requires a {}-byte IV, but the key file holds {} bytes",
                    self,
                    self.block_size(),
                    iv.len()
                ),
            ));
        }
        Ok(CipherInstance {
            algorithm: self,
            mode,
            key: Zeroizing::new(key.to_vec()),
            iv: Zeroizing::new(iv.to_vec()),
        })
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherAlgorithm {
    type Err = SplitboxError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "AES128" => Ok(CipherAlgorithm::Aes128),
            "AES192" => Ok(CipherAlgorithm::Aes192),
            "AES256" => Ok(CipherAlgorithm::Aes256),
            _ => Err(SplitboxError::configuration(format!(
                "unknown cipher algorithm {:?} (expected one of AES-128, AES-192, AES-256)",
                s
            ))),
        }
    }
}

/// Block cipher mode of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CipherMode {
    Cbc,
    /// CFB with 8-bit segments, the historical default of the format.
    #[default]
    Cfb8,
    /// CFB with full 128-bit segments.
    Cfb128,
    /// 128-bit big-endian counter starting at the IV.
    Ctr,
    Ecb,
    Ofb,
}

impl CipherMode {
    pub const ALL: [CipherMode; 6] = [
        CipherMode::Cbc,
        CipherMode::Cfb8,
        CipherMode::Cfb128,
        CipherMode::Ctr,
        CipherMode::Ecb,
        CipherMode::Ofb,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CipherMode::Cbc => "CBC",
            CipherMode::Cfb8 => "CFB8",
            CipherMode::Cfb128 => "CFB128",
            CipherMode::Ctr => "CTR",
            CipherMode::Ecb => "ECB",
            CipherMode::Ofb => "OFB",
        }
    }
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherMode {
    type Err = SplitboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CBC" => Ok(CipherMode::Cbc),
            "CFB" | "CFB8" => Ok(CipherMode::Cfb8),
            "CFB128" => Ok(CipherMode::Cfb128),
            "CTR" => Ok(CipherMode::Ctr),
            "ECB" => Ok(CipherMode::Ecb),
            "OFB" => Ok(CipherMode::Ofb),
            _ => Err(SplitboxError::configuration(format!(
                "unknown cipher mode {:?} (expected one of CBC, CFB, CFB8, CFB128, CTR, ECB, OFB)",
                s
            ))),
        }
    }
}

/// A keyed cipher for a single pass over a buffer.
pub struct CipherInstance {
    algorithm: CipherAlgorithm,
    mode: CipherMode,
    key: Zeroizing<Vec<u8>>,
    iv: Zeroizing<Vec<u8>>,
}

impl CipherInstance {
    /// Encrypt `buf` in place. The length must be a multiple of the block size.
    pub fn encrypt(&self, buf: &mut [u8]) -> Result<()> {
        self.check_aligned(buf)?;
        match self.algorithm {
            CipherAlgorithm::Aes128 => {
                encrypt_in_place::<Aes128>(self.mode, &self.key, &self.iv, buf)
            }
            CipherAlgorithm::Aes192 => {
                encrypt_in_place::<Aes192>(self.mode, &self.key, &self.iv, buf)
            }
            CipherAlgorithm::Aes256 => {
                encrypt_in_place::<Aes256>(self.mode, &self.key, &self.iv, buf)
            }
        }
    }

    /// Decrypt `buf` in place. The length must be a multiple of the block size.
    pub fn decrypt(&self, buf: &mut [u8]) -> Result<()> {
        self.check_aligned(buf)?;
        match self.algorithm {
            CipherAlgorithm::Aes128 => {
                decrypt_in_place::<Aes128>(self.mode, &self.key, &self.iv, buf)
            }
            CipherAlgorithm::Aes192 => {
                decrypt_in_place::<Aes192>(self.mode, &self.key, &self.iv, buf)
            }
            CipherAlgorithm::Aes256 => {
                decrypt_in_place::<Aes256>(self.mode, &self.key, &self.iv, buf)
            }
        }
    }

    fn check_aligned(&self, buf: &[u8]) -> Result<()> {
        if buf.len() % self.algorithm.block_size() != 0 {
            return Err(SplitboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::CryptoPrimitive,
                format!(
                    "ciphertext length {} is not a multiple of the {}-byte block size",
                    buf.len(),
                    self.algorithm.block_size()
                ),
            ));
        }
        Ok(())
    }
}

fn encrypt_in_place<C>(mode: CipherMode, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: BlockCipher<BlockSize = U16> + BlockEncrypt + BlockDecrypt + KeyInit,
{
    let len = buf.len();
    match mode {
        CipherMode::Cbc => {
            cbc::Encryptor::<C>::new_from_slices(key, iv)
                .map_err(|_| primitive_error("failed to initialise CBC encryptor"))?
                .encrypt_padded_mut::<NoPadding>(buf, len)
                .map_err(|_| primitive_error("CBC encryption failed"))?;
        }
        CipherMode::Cfb8 => cfb8::Encryptor::<C>::new_from_slices(key, iv)
            .map_err(|_| primitive_error("failed to initialise CFB8 encryptor"))?
            .encrypt(buf),
        CipherMode::Cfb128 => cfb_mode::Encryptor::<C>::new_from_slices(key, iv)
            .map_err(|_| primitive_error("failed to initialise CFB128 encryptor"))?
            .encrypt(buf),
        CipherMode::Ctr => ctr::Ctr128BE::<C>::new_from_slices(key, iv)
            .map_err(|_| primitive_error("failed to initialise CTR keystream"))?
            .apply_keystream(buf),
        CipherMode::Ecb => {
            ecb::Encryptor::<C>::new_from_slice(key)
                .map_err(|_| primitive_error("failed to initialise ECB encryptor"))?
                .encrypt_padded_mut::<NoPadding>(buf, len)
                .map_err(|_| primitive_error("ECB encryption failed"))?;
        }
        CipherMode::Ofb => ofb::Ofb::<C>::new_from_slices(key, iv)
            .map_err(|_| primitive_error("failed to initialise OFB keystream"))?
            .apply_keystream(buf),
    }
    Ok(())
}

fn decrypt_in_place<C>(mode: CipherMode, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: BlockCipher<BlockSize = U16> + BlockEncrypt + BlockDecrypt + KeyInit,
{
    match mode {
        CipherMode::Cbc => {
            cbc::Decryptor::<C>::new_from_slices(key, iv)
                .map_err(|_| primitive_error("failed to initialise CBC decryptor"))?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map_err(|_| primitive_error("CBC decryption failed"))?;
        }
        CipherMode::Cfb8 => cfb8::Decryptor::<C>::new_from_slices(key, iv)
            .map_err(|_| primitive_error("failed to initialise CFB8 decryptor"))?
            .decrypt(buf),
        CipherMode::Cfb128 => cfb_mode::Decryptor::<C>::new_from_slices(key, iv)
            .map_err(|_| primitive_error("failed to initialise CFB128 decryptor"))?
            .decrypt(buf),
        CipherMode::Ctr => ctr::Ctr128BE::<C>::new_from_slices(key, iv)
            .map_err(|_| primitive_error("failed to initialise CTR keystream"))?
            .apply_keystream(buf),
        CipherMode::Ecb => {
            ecb::Decryptor::<C>::new_from_slice(key)
                .map_err(|_| primitive_error("failed to initialise ECB decryptor"))?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map_err(|_| primitive_error("ECB decryption failed"))?;
        }
        CipherMode::Ofb => ofb::Ofb::<C>::new_from_slices(key, iv)
            .map_err(|_| primitive_error("failed to initialise OFB keystream"))?
            .apply_keystream(buf),
    }
    Ok(())
}

fn primitive_error(msg: &str) -> SplitboxError {
    SplitboxError::with_kind(ErrorCategory::Internal, ErrorKind::CryptoPrimitive, msg)
}
