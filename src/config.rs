//! Wire-level constants of the XML Encryption schema.
//!
//! This module is the single source of truth for the exact element names,
//! attribute names, namespace URIs, and size parameters the processor deals
//! with. Everything here is string-compared against caller documents, so the
//! values must match the W3C recommendation byte for byte.

/// XML Encryption namespace (xmlenc-core).
pub const XMLENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";

/// XML Encryption 1.1 namespace (GCM algorithm identifiers live here).
pub const XMLENC11_NS: &str = "http://www.w3.org/2009/xmlenc11#";

/// XML Digital Signature namespace (`KeyInfo` and friends).
pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

pub const NODE_ENCRYPTED_DATA: &str = "EncryptedData";
pub const NODE_ENCRYPTED_KEY: &str = "EncryptedKey";
pub const NODE_ENCRYPTION_METHOD: &str = "EncryptionMethod";
pub const NODE_KEY_INFO: &str = "KeyInfo";
pub const NODE_KEY_NAME: &str = "KeyName";
pub const NODE_KEY_VALUE: &str = "KeyValue";
pub const NODE_CIPHER_DATA: &str = "CipherData";
pub const NODE_CIPHER_VALUE: &str = "CipherValue";
pub const NODE_CIPHER_REFERENCE: &str = "CipherReference";
pub const NODE_TRANSFORMS: &str = "Transforms";
pub const NODE_TRANSFORM: &str = "Transform";
pub const NODE_ENCRYPTION_PROPERTIES: &str = "EncryptionProperties";
pub const NODE_REFERENCE_LIST: &str = "ReferenceList";
pub const NODE_CARRIED_KEY_NAME: &str = "CarriedKeyName";

pub const ATTR_ID: &str = "Id";
pub const ATTR_TYPE: &str = "Type";
pub const ATTR_MIME_TYPE: &str = "MimeType";
pub const ATTR_ENCODING: &str = "Encoding";
pub const ATTR_RECIPIENT: &str = "Recipient";
pub const ATTR_URI: &str = "URI";
pub const ATTR_ALGORITHM: &str = "Algorithm";

/// The ID-typed attributes of this schema. Registered with the document id
/// index before a template is read so intra-document references resolve.
pub const ENC_IDS: &[&str] = &["Id"];

/// `Type` attribute value selecting whole-element replacement.
pub const TYPE_ELEMENT: &str = "http://www.w3.org/2001/04/xmlenc#Element";

/// `Type` attribute value selecting element-content replacement.
pub const TYPE_CONTENT: &str = "http://www.w3.org/2001/04/xmlenc#Content";

/// AES block size in bytes; also the CBC initialization vector size.
pub const AES_BLOCK_SIZE: usize = 16;

/// GCM nonce size in bytes (96 bits, the size the mode was designed for).
pub const GCM_NONCE_SIZE: usize = 12;

/// GCM authentication tag size in bytes.
pub const GCM_TAG_SIZE: usize = 16;
