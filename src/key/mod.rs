//! Key model for the encryption processor.
//!
//! A [`Key`] is what the key-info resolver hands back and what gets bound to
//! the encryption method: a named piece of material plus enough typing to
//! check it against the requirement an algorithm derives.

use crate::secret::SecretBytes;
use crate::types::Operation;

pub mod info;
pub mod store;

pub use info::{KeyInfoContext, KeyInfoMode, resolve_key_info, write_key_info};
pub use store::KeyStore;

/// Bit set of key material categories.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct KeyType(u8);

impl KeyType {
    pub const SYMMETRIC: KeyType = KeyType(0b001);
    pub const PUBLIC: KeyType = KeyType(0b010);
    pub const PRIVATE: KeyType = KeyType(0b100);
    pub const ANY: KeyType = KeyType(0b111);

    /// Returns true if the two sets share any category.
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: KeyType) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for KeyType {
    type Output = KeyType;

    fn bitor(self, rhs: KeyType) -> KeyType {
        KeyType(self.0 | rhs.0)
    }
}

/// Key material payload.
///
/// The algorithm family in scope is symmetric (AES); the other categories
/// exist so requirement checks and the public-only write path stay
/// expressible.
#[derive(Clone, Debug)]
pub enum KeyData {
    /// Raw symmetric material.
    Symmetric(SecretBytes),

    /// Public material, opaque to this processor.
    Public(Vec<u8>),

    /// Private material. Never serialized into an outgoing `KeyInfo`.
    Private(SecretBytes),
}

impl KeyData {
    /// Returns the category of this material.
    #[must_use]
    pub const fn key_type(&self) -> KeyType {
        match self {
            Self::Symmetric(_) => KeyType::SYMMETRIC,
            Self::Public(_) => KeyType::PUBLIC,
            Self::Private(_) => KeyType::PRIVATE,
        }
    }

    /// Returns the material size in bits.
    #[must_use]
    pub fn bits(&self) -> usize {
        match self {
            Self::Symmetric(data) | Self::Private(data) => data.len() * 8,
            Self::Public(data) => data.len() * 8,
        }
    }
}

/// What an encryption method demands of its key.
#[derive(Clone, Debug)]
pub struct KeyRequirement {
    /// Acceptable material categories.
    pub key_type: KeyType,

    /// Exact material size in bits, if the algorithm fixes one.
    pub bits: Option<usize>,

    /// Direction the key will be used in.
    pub usage: Operation,
}

impl KeyRequirement {
    /// A requirement satisfied by any key; the resolver read context starts
    /// out this way until an encryption method narrows it.
    #[must_use]
    pub fn any() -> Self {
        Self { key_type: KeyType::ANY, bits: None, usage: Operation::Encrypt }
    }
}

/// A resolved key handle.
#[derive(Clone, Debug)]
pub struct Key {
    name: Option<String>,
    data: KeyData,
}

impl Key {
    /// Creates a named symmetric key from raw material.
    #[must_use]
    pub fn symmetric(name: impl Into<String>, material: &[u8]) -> Self {
        Self { name: Some(name.into()), data: KeyData::Symmetric(SecretBytes::from_slice(material)) }
    }

    /// Creates a key from explicit parts.
    #[must_use]
    pub fn new(name: Option<String>, data: KeyData) -> Self {
        Self { name, data }
    }

    /// Returns the key name, if any.
    #[inline]
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the material category.
    #[inline]
    #[must_use]
    pub fn key_type(&self) -> KeyType {
        self.data.key_type()
    }

    /// Returns the material size in bits.
    #[inline]
    #[must_use]
    pub fn bits(&self) -> usize {
        self.data.bits()
    }

    /// Grants read access to symmetric material, `None` for other kinds.
    #[must_use]
    pub fn symmetric_material(&self) -> Option<&[u8]> {
        match &self.data {
            KeyData::Symmetric(data) => Some(data.expose()),
            _ => None,
        }
    }

    /// Checks the key against a requirement: category must intersect and
    /// the size must match when the requirement fixes one.
    #[must_use]
    pub fn matches(&self, requirement: &KeyRequirement) -> bool {
        if !self.key_type().intersects(requirement.key_type) {
            return false;
        }
        match requirement.bits {
            Some(bits) => self.bits() == bits,
            None => true,
        }
    }
}
