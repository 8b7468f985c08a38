//! Content-addressed descriptor interning.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{SecurityDescriptor, SecurityError};

/// First id handed out. Lower values are left to the host.
pub const FIRST_SECURITY_ID: u32 = 0x100;

/// Stable id of an interned descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecurityId(pub u32);

impl fmt::Display for SecurityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

struct StoredDescriptor {
    digest: blake3::Hash,
    descriptor: Arc<SecurityDescriptor>,
}

/// Interns descriptors by the BLAKE3 digest of their binary form.
///
/// Expressions that differ only in spelling (`S-1-5-18` versus `SY`, flag
/// order) encode identically and share one descriptor and id.
#[derive(Default)]
pub struct DescriptorStore {
    descriptors: Vec<StoredDescriptor>,
    by_digest: HashMap<blake3::Hash, SecurityId>,
    by_expression: HashMap<String, SecurityId>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse (or reuse) an expression's descriptor.
    pub fn intern(
        &mut self,
        expression: &str,
    ) -> Result<(SecurityId, Arc<SecurityDescriptor>), SecurityError> {
        if let Some(id) = self.by_expression.get(expression).copied() {
            if let Some(descriptor) = self.get(id) {
                return Ok((id, descriptor));
            }
        }
        let descriptor = SecurityDescriptor::from_expression(expression)?;
        let (id, descriptor) = self.intern_descriptor(descriptor);
        self.by_expression.insert(expression.to_string(), id);
        Ok((id, descriptor))
    }

    /// Intern an already built descriptor.
    pub fn intern_descriptor(
        &mut self,
        descriptor: SecurityDescriptor,
    ) -> (SecurityId, Arc<SecurityDescriptor>) {
        let digest = blake3::hash(descriptor.as_bytes());
        if let Some(id) = self.by_digest.get(&digest).copied() {
            if let Some(existing) = self.get(id) {
                return (id, existing);
            }
        }

        let id = SecurityId(FIRST_SECURITY_ID + self.descriptors.len() as u32);
        let descriptor = Arc::new(descriptor);
        self.descriptors.push(StoredDescriptor {
            digest,
            descriptor: Arc::clone(&descriptor),
        });
        self.by_digest.insert(digest, id);
        (id, descriptor)
    }

    pub fn get(&self, id: SecurityId) -> Option<Arc<SecurityDescriptor>> {
        let index = id.0.checked_sub(FIRST_SECURITY_ID)? as usize;
        self.descriptors
            .get(index)
            .map(|stored| Arc::clone(&stored.descriptor))
    }

    /// Hex BLAKE3 digest of a descriptor's binary form.
    pub fn digest_hex(&self, id: SecurityId) -> Option<String> {
        let index = id.0.checked_sub(FIRST_SECURITY_ID)? as usize;
        self.descriptors
            .get(index)
            .map(|stored| hex::encode(stored.digest.as_bytes()))
    }

    /// Number of distinct descriptors.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// All descriptors in id order.
    pub fn iter(&self) -> impl Iterator<Item = (SecurityId, &Arc<SecurityDescriptor>)> + '_ {
        self.descriptors
            .iter()
            .enumerate()
            .map(|(i, stored)| (SecurityId(FIRST_SECURITY_ID + i as u32), &stored.descriptor))
    }
}

impl fmt::Debug for DescriptorStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorStore")
            .field("descriptors", &self.descriptors.len())
            .finish()
    }
}
