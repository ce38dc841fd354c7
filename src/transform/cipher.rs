//! Encryption-method stages: AES-CBC and AES-GCM.
//!
//! Wire formats follow the XML Encryption recommendation:
//!
//! - CBC ciphertext is `[iv(16) || blocks]`, padded with the block-padding
//!   scheme the recommendation defines: the final byte is the pad length
//!   and the filler bytes are arbitrary. Decryption honors only the final
//!   byte.
//! - GCM ciphertext is `[nonce(12) || body || tag(16)]`, the tag appended
//!   by the AEAD itself.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes128Gcm, Aes256Gcm, AesGcm, KeyInit, Nonce};
use anyhow::{Result, anyhow, ensure};
use rand::RngCore;

use crate::config::{AES_BLOCK_SIZE, GCM_NONCE_SIZE, GCM_TAG_SIZE};
use crate::key::{Key, KeyRequirement, KeyType};
use crate::secret::SecretBytes;
use crate::transform::{EncryptionAlgorithm, Transform};
use crate::types::Operation;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes192Gcm = AesGcm<aes::Aes192, U12>;

/// An encryption-method stage for one of the AES algorithm URIs.
pub struct CipherTransform {
    algorithm: EncryptionAlgorithm,
    operation: Operation,
    key: Option<SecretBytes>,
}

impl CipherTransform {
    /// Creates the stage. The algorithm must be one of the cipher URIs;
    /// [`EncryptionAlgorithm::build`] upholds that.
    #[must_use]
    pub fn new(algorithm: EncryptionAlgorithm, operation: Operation) -> Self {
        debug_assert!(algorithm != EncryptionAlgorithm::Base64);
        Self { algorithm, operation, key: None }
    }

    /// Key size the algorithm fixes, in bits.
    #[must_use]
    pub const fn key_bits(&self) -> usize {
        match self.algorithm {
            EncryptionAlgorithm::Aes128Cbc | EncryptionAlgorithm::Aes128Gcm => 128,
            EncryptionAlgorithm::Aes192Cbc | EncryptionAlgorithm::Aes192Gcm => 192,
            _ => 256,
        }
    }

    fn key_material(&self) -> Result<&[u8]> {
        self.key.as_ref().map(SecretBytes::expose).ok_or_else(|| anyhow!("no key bound to {}", self.name()))
    }

    fn cbc_encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.key_material()?;

        let mut iv = [0u8; AES_BLOCK_SIZE];
        rand::rng().fill_bytes(&mut iv);

        // Block padding per the recommendation: length in the final byte,
        // filler bytes arbitrary (random here).
        let pad_len = AES_BLOCK_SIZE - data.len() % AES_BLOCK_SIZE;
        let msg_len = data.len() + pad_len;
        let mut buf = Vec::with_capacity(msg_len);
        buf.extend_from_slice(data);
        buf.resize(msg_len, 0);
        rand::rng().fill_bytes(&mut buf[data.len()..msg_len - 1]);
        buf[msg_len - 1] = pad_len as u8;

        match self.algorithm {
            EncryptionAlgorithm::Aes128Cbc => encrypt_blocks::<Aes128CbcEnc>(key, &iv, &mut buf)?,
            EncryptionAlgorithm::Aes192Cbc => encrypt_blocks::<Aes192CbcEnc>(key, &iv, &mut buf)?,
            _ => encrypt_blocks::<Aes256CbcEnc>(key, &iv, &mut buf)?,
        }

        let mut out = iv.to_vec();
        out.append(&mut buf);
        Ok(out)
    }

    fn cbc_decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.key_material()?;
        ensure!(data.len() > AES_BLOCK_SIZE, "ciphertext too short: {} bytes", data.len());
        ensure!((data.len() - AES_BLOCK_SIZE) % AES_BLOCK_SIZE == 0, "ciphertext is not block aligned");

        let (iv, body) = data.split_at(AES_BLOCK_SIZE);
        let mut buf = body.to_vec();
        match self.algorithm {
            EncryptionAlgorithm::Aes128Cbc => decrypt_blocks::<Aes128CbcDec>(key, iv, &mut buf)?,
            EncryptionAlgorithm::Aes192Cbc => decrypt_blocks::<Aes192CbcDec>(key, iv, &mut buf)?,
            _ => decrypt_blocks::<Aes256CbcDec>(key, iv, &mut buf)?,
        }

        // Only the final byte carries meaning; the filler is arbitrary.
        let pad_len = buf.last().copied().map(usize::from).unwrap_or_default();
        ensure!(pad_len >= 1 && pad_len <= AES_BLOCK_SIZE && pad_len <= buf.len(), "invalid padding length {pad_len}");
        buf.truncate(buf.len() - pad_len);
        Ok(buf)
    }

    fn gcm_encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.key_material()?;
        match self.algorithm {
            EncryptionAlgorithm::Aes128Gcm => gcm_seal::<Aes128Gcm>(key, data),
            EncryptionAlgorithm::Aes192Gcm => gcm_seal::<Aes192Gcm>(key, data),
            _ => gcm_seal::<Aes256Gcm>(key, data),
        }
    }

    fn gcm_decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.key_material()?;
        match self.algorithm {
            EncryptionAlgorithm::Aes128Gcm => gcm_open::<Aes128Gcm>(key, data),
            EncryptionAlgorithm::Aes192Gcm => gcm_open::<Aes192Gcm>(key, data),
            _ => gcm_open::<Aes256Gcm>(key, data),
        }
    }

    const fn is_cbc(&self) -> bool {
        matches!(self.algorithm, EncryptionAlgorithm::Aes128Cbc | EncryptionAlgorithm::Aes192Cbc | EncryptionAlgorithm::Aes256Cbc)
    }
}

impl Transform for CipherTransform {
    fn name(&self) -> &'static str {
        match self.algorithm {
            EncryptionAlgorithm::Aes128Cbc => "aes128-cbc",
            EncryptionAlgorithm::Aes192Cbc => "aes192-cbc",
            EncryptionAlgorithm::Aes256Cbc => "aes256-cbc",
            EncryptionAlgorithm::Aes128Gcm => "aes128-gcm",
            EncryptionAlgorithm::Aes192Gcm => "aes192-gcm",
            EncryptionAlgorithm::Aes256Gcm => "aes256-gcm",
            EncryptionAlgorithm::Base64 => "base64",
        }
    }

    fn set_operation(&mut self, operation: Operation) {
        self.operation = operation;
    }

    fn key_requirement(&self) -> Option<KeyRequirement> {
        Some(KeyRequirement { key_type: KeyType::SYMMETRIC, bits: Some(self.key_bits()), usage: self.operation })
    }

    fn set_key(&mut self, key: &Key) -> Result<()> {
        let material = key.symmetric_material().ok_or_else(|| anyhow!("{} requires a symmetric key", self.name()))?;
        ensure!(material.len() * 8 == self.key_bits(), "{} requires a {}-bit key, got {} bits", self.name(), self.key_bits(), material.len() * 8);
        self.key = Some(SecretBytes::from_slice(material));
        Ok(())
    }

    fn apply(&mut self, input: Vec<u8>) -> Result<Vec<u8>> {
        match (self.is_cbc(), self.operation) {
            (true, Operation::Encrypt) => self.cbc_encrypt(&input),
            (true, Operation::Decrypt) => self.cbc_decrypt(&input),
            (false, Operation::Encrypt) => self.gcm_encrypt(&input),
            (false, Operation::Decrypt) => self.gcm_decrypt(&input),
        }
    }
}

fn encrypt_blocks<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: BlockEncryptMut + KeyIvInit,
{
    let cipher = C::new_from_slices(key, iv).map_err(|e| anyhow!("cipher setup failed: {e}"))?;
    let msg_len = buf.len();
    cipher.encrypt_padded_mut::<NoPadding>(buf, msg_len).map_err(|_| anyhow!("block encryption failed"))?;
    Ok(())
}

fn decrypt_blocks<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: BlockDecryptMut + KeyIvInit,
{
    let cipher = C::new_from_slices(key, iv).map_err(|e| anyhow!("cipher setup failed: {e}"))?;
    cipher.decrypt_padded_mut::<NoPadding>(buf).map_err(|_| anyhow!("block decryption failed"))?;
    Ok(())
}

fn gcm_seal<C>(key: &[u8], data: &[u8]) -> Result<Vec<u8>>
where
    C: Aead + KeyInit + AeadCore,
{
    let cipher = C::new_from_slice(key).map_err(|e| anyhow!("cipher setup failed: {e}"))?;
    let nonce = C::generate_nonce(&mut OsRng);
    let mut out = cipher.encrypt(&nonce, data).map_err(|_| anyhow!("authenticated encryption failed"))?;
    out.splice(0..0, nonce.iter().copied());
    Ok(out)
}

fn gcm_open<C>(key: &[u8], data: &[u8]) -> Result<Vec<u8>>
where
    C: Aead + KeyInit + AeadCore,
{
    ensure!(data.len() >= GCM_NONCE_SIZE + GCM_TAG_SIZE, "ciphertext too short: {} bytes", data.len());
    let (nonce, body) = data.split_at(GCM_NONCE_SIZE);
    let cipher = C::new_from_slice(key).map_err(|e| anyhow!("cipher setup failed: {e}"))?;
    cipher.decrypt(Nonce::from_slice(nonce), body).map_err(|_| anyhow!("authentication failed"))
}
