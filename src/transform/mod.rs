//! Binary transform pipeline runtime.
//!
//! An encryption or decryption run is a chain of whole-buffer transforms:
//! an optional URI input, optional reference transforms, the encryption
//! method, and an optional Base64 codec stage. The chain is wired by the
//! encryption context from the template it reads; this module provides the
//! stages and the chain that executes them in order.

use anyhow::Result;

use crate::key::{Key, KeyRequirement};
use crate::types::Operation;

pub mod base64;
pub mod chain;
pub mod cipher;

pub use base64::Base64Transform;
pub use chain::{ChainSink, TransformChain};
pub use cipher::CipherTransform;

/// What a transform node is allowed to be used for.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TransformUsage {
    /// The `EncryptionMethod` slot of an `EncryptedData`/`EncryptedKey`.
    EncryptionMethod,

    /// A `Transform` inside a `CipherReference`'s `Transforms` chain.
    DSigTransform,
}

/// Algorithm identifiers this processor recognizes, keyed by their wire
/// URIs.
#[derive(Clone, Copy, PartialEq, Eq, Debug, strum::EnumString, strum::IntoStaticStr)]
pub enum EncryptionAlgorithm {
    #[strum(serialize = "http://www.w3.org/2001/04/xmlenc#aes128-cbc")]
    Aes128Cbc,

    #[strum(serialize = "http://www.w3.org/2001/04/xmlenc#aes192-cbc")]
    Aes192Cbc,

    #[strum(serialize = "http://www.w3.org/2001/04/xmlenc#aes256-cbc")]
    Aes256Cbc,

    #[strum(serialize = "http://www.w3.org/2009/xmlenc11#aes128-gcm")]
    Aes128Gcm,

    #[strum(serialize = "http://www.w3.org/2009/xmlenc11#aes192-gcm")]
    Aes192Gcm,

    #[strum(serialize = "http://www.w3.org/2009/xmlenc11#aes256-gcm")]
    Aes256Gcm,

    #[strum(serialize = "http://www.w3.org/2000/09/xmldsig#base64")]
    Base64,
}

impl EncryptionAlgorithm {
    /// Returns the algorithm's wire URI.
    #[inline]
    #[must_use]
    pub fn uri(self) -> &'static str {
        self.into()
    }

    /// Returns true if the algorithm may fill the given slot.
    #[must_use]
    pub const fn allowed_for(self, usage: TransformUsage) -> bool {
        match usage {
            TransformUsage::EncryptionMethod => !matches!(self, Self::Base64),
            TransformUsage::DSigTransform => matches!(self, Self::Base64),
        }
    }

    /// Builds the transform for this algorithm, direction preset.
    #[must_use]
    pub fn build(self, operation: Operation) -> Box<dyn Transform> {
        match self {
            Self::Base64 => Box::new(Base64Transform::new(operation)),
            _ => Box::new(CipherTransform::new(self, operation)),
        }
    }
}

/// One stage of the pipeline.
///
/// Stages are whole-buffer: each consumes its input and produces the next
/// buffer. Only the encryption method stage cares about keys; the default
/// implementations make every other stage keyless.
pub trait Transform {
    /// Stable stage name for diagnostics.
    fn name(&self) -> &'static str;

    /// Declares the direction the stage runs in.
    fn set_operation(&mut self, operation: Operation);

    /// The key this stage demands, if any.
    fn key_requirement(&self) -> Option<KeyRequirement> {
        None
    }

    /// Binds a key to the stage. Keyless stages ignore the call.
    fn set_key(&mut self, key: &Key) -> Result<()> {
        let _ = key;
        Ok(())
    }

    /// Runs the stage over one buffer.
    fn apply(&mut self, input: Vec<u8>) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_uri_roundtrip() {
        let uri = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";
        let alg: EncryptionAlgorithm = uri.parse().unwrap();
        assert_eq!(alg, EncryptionAlgorithm::Aes128Cbc);
        assert_eq!(alg.uri(), uri);
    }

    #[test]
    fn test_unknown_algorithm_uri_is_rejected() {
        assert!("http://www.w3.org/2001/04/xmlenc#tripledes-cbc".parse::<EncryptionAlgorithm>().is_err());
    }

    #[test]
    fn test_usage_gating() {
        assert!(EncryptionAlgorithm::Aes256Gcm.allowed_for(TransformUsage::EncryptionMethod));
        assert!(!EncryptionAlgorithm::Aes256Gcm.allowed_for(TransformUsage::DSigTransform));
        assert!(EncryptionAlgorithm::Base64.allowed_for(TransformUsage::DSigTransform));
        assert!(!EncryptionAlgorithm::Base64.allowed_for(TransformUsage::EncryptionMethod));
    }
}
