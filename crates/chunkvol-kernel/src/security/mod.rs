//! Security descriptor synthesis.
//!
//! Converts the textual access-control expression used in manifests and
//! configuration (`O:BAG:BAD:PAI(A;OICI;FA;;;SY)`) into the self-relative
//! binary descriptor the host's access checker parses directly, and back.
//!
//! - [`SecurityDescriptor::from_expression`] parses, validates, and encodes.
//! - [`SecurityDescriptor::from_bytes`] decodes and validates a binary blob.
//! - [`SecurityDescriptor::to_expression`] renders the canonical text.
//! - [`DescriptorStore`] interns descriptors by content so identical
//!   policies share one instance.
//!
//! ## Binary layout
//!
//! ```text
//! 0x00  u8   revision (1)
//! 0x01  u8   sbz1
//! 0x02  u16  control (SE_SELF_RELATIVE always set)
//! 0x04  u32  owner offset   (0 = absent)
//! 0x08  u32  group offset   (0 = absent)
//! 0x0C  u32  sacl offset    (always 0)
//! 0x10  u32  dacl offset    (0 = absent)
//! 0x14  DACL, owner SID, group SID
//! ```
//!
//! All integers little-endian except the SID identifier authority, which is
//! a 48-bit big-endian field.

mod binary;
mod expression;
mod sid;
mod store;

pub use sid::{MAX_SUB_AUTHORITIES, Sid};
pub use store::{DescriptorStore, FIRST_SECURITY_ID, SecurityId};

use thiserror::Error;

/// Largest encoded descriptor.
pub const MAX_DESCRIPTOR_SIZE: usize = u16::MAX as usize;

pub(crate) const SE_DACL_PRESENT: u16 = 0x0004;
pub(crate) const SE_DACL_AUTO_INHERIT_REQ: u16 = 0x0100;
pub(crate) const SE_DACL_AUTO_INHERITED: u16 = 0x0400;
pub(crate) const SE_DACL_PROTECTED: u16 = 0x1000;
pub(crate) const SE_SELF_RELATIVE: u16 = 0x8000;

/// ACE inheritance flags.
pub mod ace_flags {
    pub const OBJECT_INHERIT: u8 = 0x01;
    pub const CONTAINER_INHERIT: u8 = 0x02;
    pub const NO_PROPAGATE_INHERIT: u8 = 0x04;
    pub const INHERIT_ONLY: u8 = 0x08;
    pub const INHERITED: u8 = 0x10;
}

/// Security synthesis errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    /// Expression does not follow the grammar.
    #[error("parse error at {position}: {reason}")]
    ParseError { position: usize, reason: String },

    /// Two-letter principal alias with no known SID.
    #[error("unknown principal {name:?} at {position}")]
    UnknownPrincipal { position: usize, name: String },

    /// Encoded descriptor would exceed the format's limit.
    #[error("descriptor of {size} bytes exceeds {max}")]
    DescriptorTooLarge { size: usize, max: usize },

    /// Binary blob does not follow the layout.
    #[error("invalid descriptor bytes at {offset}: {reason}")]
    InvalidBinary { offset: usize, reason: String },
}

impl SecurityError {
    pub(crate) fn parse(position: usize, reason: impl Into<String>) -> Self {
        Self::ParseError {
            position,
            reason: reason.into(),
        }
    }

    pub(crate) fn binary(offset: usize, reason: impl Into<String>) -> Self {
        Self::InvalidBinary {
            offset,
            reason: reason.into(),
        }
    }
}

/// Allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AceType {
    Allow,
    Deny,
}

impl AceType {
    pub fn to_byte(self) -> u8 {
        match self {
            AceType::Allow => 0x00,
            AceType::Deny => 0x01,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(AceType::Allow),
            0x01 => Some(AceType::Deny),
            _ => None,
        }
    }
}

/// One access-control entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ace {
    pub kind: AceType,
    /// Inheritance flags, see [`ace_flags`].
    pub flags: u8,
    /// Access rights mask.
    pub mask: u32,
    pub sid: Sid,
}

/// DACL control flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DaclFlags {
    pub protected: bool,
    pub auto_inherited: bool,
    pub auto_inherit_req: bool,
}

/// Discretionary access list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Dacl {
    pub flags: DaclFlags,
    pub aces: Vec<Ace>,
}

/// An immutable, encoded security descriptor and its parsed parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityDescriptor {
    owner: Option<Sid>,
    group: Option<Sid>,
    dacl: Option<Dacl>,
    bytes: Vec<u8>,
}

impl SecurityDescriptor {
    /// Assemble from parts, encoding the binary form.
    pub fn new(
        owner: Option<Sid>,
        group: Option<Sid>,
        dacl: Option<Dacl>,
    ) -> Result<Self, SecurityError> {
        let bytes = binary::encode(owner.as_ref(), group.as_ref(), dacl.as_ref())?;
        Ok(Self {
            owner,
            group,
            dacl,
            bytes,
        })
    }

    /// Parse a textual expression.
    pub fn from_expression(text: &str) -> Result<Self, SecurityError> {
        let parsed = expression::parse(text)?;
        Self::new(parsed.owner, parsed.group, parsed.dacl)
    }

    /// Decode a self-relative binary descriptor. The bytes are kept as given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SecurityError> {
        let (owner, group, dacl) = binary::decode(bytes)?;
        Ok(Self {
            owner,
            group,
            dacl,
            bytes: bytes.to_vec(),
        })
    }

    /// Canonical textual form.
    pub fn to_expression(&self) -> String {
        expression::render(self.owner.as_ref(), self.group.as_ref(), self.dacl.as_ref())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn owner(&self) -> Option<&Sid> {
        self.owner.as_ref()
    }

    pub fn group(&self) -> Option<&Sid> {
        self.group.as_ref()
    }

    pub fn dacl(&self) -> Option<&Dacl> {
        self.dacl.as_ref()
    }
}

/// Parse an expression into a descriptor.
pub fn from_expression(text: &str) -> Result<SecurityDescriptor, SecurityError> {
    SecurityDescriptor::from_expression(text)
}

/// Render a descriptor as canonical text.
pub fn to_expression(descriptor: &SecurityDescriptor) -> String {
    descriptor.to_expression()
}

/// Canonical form of an expression.
pub fn canonicalize(text: &str) -> Result<String, SecurityError> {
    Ok(SecurityDescriptor::from_expression(text)?.to_expression())
}
