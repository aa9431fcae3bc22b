//! Strong-name identity of a managed binary module.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::PackageVersion;

/// The strong name extracted from a binary module's own metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyIdentity {
    /// Simple assembly name (no extension).
    pub name: String,
    /// Assembly version; always rendered four-part.
    pub version: PackageVersion,
    /// Culture, `None` for culture-neutral assemblies.
    pub culture: Option<String>,
    /// 8-byte public key token, `None` for unsigned assemblies.
    pub public_key_token: Option<[u8; 8]>,
}

impl AssemblyIdentity {
    /// Culture as it appears in identity strings: `neutral` when unset.
    pub fn culture_str(&self) -> &str {
        self.culture.as_deref().unwrap_or("neutral")
    }

    /// Public key token as lowercase hex, `null` for unsigned assemblies.
    pub fn public_key_token_str(&self) -> String {
        match &self.public_key_token {
            Some(token) => hex::encode(token),
            None => "null".to_string(),
        }
    }

    /// The full display name used by reference entries:
    /// `Name, Version=1.2.3.4, Culture=neutral, PublicKeyToken=abcdef0123456789`.
    pub fn full_name(&self) -> String {
        format!(
            "{}, Version={}, Culture={}, PublicKeyToken={}",
            self.name,
            self.version.to_four_part(),
            self.culture_str(),
            self.public_key_token_str()
        )
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}
