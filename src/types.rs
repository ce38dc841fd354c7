//! Common type definitions for the encryption processor.
//!
//! Provides the two small enums that parameterize an encryption context:
//! the direction of the active operation and the template root kind the
//! context accepts.

use std::fmt::{Display, Formatter, Result};

/// Direction of the active operation.
///
/// Set by the entry point used, never by the caller directly.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Operation {
    /// Plaintext in, ciphertext out.
    Encrypt,

    /// Ciphertext in, plaintext out.
    Decrypt,
}

impl Operation {
    /// Returns a human-readable label for the operation.
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Encrypt => "encryption",
            Self::Decrypt => "decryption",
        }
    }
}

impl Display for Operation {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.label())
    }
}

/// Which template root a context recognizes.
///
/// The two roots differ only in which optional children are legal:
/// `EncryptedKey` additionally admits a `Recipient` attribute plus the
/// `ReferenceList` and `CarriedKeyName` children.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    /// Process `<enc:EncryptedData>` templates and instances.
    EncryptedData,

    /// Process `<enc:EncryptedKey>` templates and instances.
    EncryptedKey,
}

impl Mode {
    /// Returns the wire name of the root element for this mode.
    #[inline]
    #[must_use]
    pub const fn node_name(self) -> &'static str {
        match self {
            Self::EncryptedData => crate::config::NODE_ENCRYPTED_DATA,
            Self::EncryptedKey => crate::config::NODE_ENCRYPTED_KEY,
        }
    }
}

impl Display for Mode {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.node_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_labels() {
        assert_eq!(Operation::Encrypt.to_string(), "encryption");
        assert_eq!(Operation::Decrypt.to_string(), "decryption");
    }

    #[test]
    fn test_mode_node_names() {
        assert_eq!(Mode::EncryptedData.node_name(), "EncryptedData");
        assert_eq!(Mode::EncryptedKey.node_name(), "EncryptedKey");
    }
}
