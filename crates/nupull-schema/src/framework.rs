//! Target framework tokens.
//!
//! Tokens are parsed from framework folder names as they appear inside
//! package archives (`net45`, `netstandard2.0`, `netcoreapp3.1`, `net6.0`).
//! Parsing normalizes aliases so that equality is canonical structural
//! equivalence: `net45`, `NET45` and `.NETFramework4.5` are the same token.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a framework folder name cannot be parsed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown framework token: {0}")]
pub struct FrameworkParseError(pub String);

/// The logical runtime family of a framework token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameworkFamily {
    /// The classic full framework (`net20` .. `net48`).
    NetFramework,
    /// The portable API contract (`netstandard1.0` .. `netstandard2.1`).
    NetStandard,
    /// The modern runtime (`netcoreapp1.0` .. `netcoreapp3.1`, `net5.0`+).
    NetCoreApp,
}

/// A framework version of up to three components (`4.7.2`, `2.0`, `6.0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameworkVersion(pub u16, pub u16, pub u16);

impl fmt::Display for FrameworkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.2 != 0 {
            write!(f, "{}.{}.{}", self.0, self.1, self.2)
        } else {
            write!(f, "{}.{}", self.0, self.1)
        }
    }
}

/// An opaque, structurally comparable target framework token.
///
/// `Any` is the token attached to framework-neutral asset groups; it is
/// usable under every desired framework.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameworkToken {
    /// Framework-neutral: usable everywhere.
    Any,
    /// A concrete framework: family, version, optional profile (`client`).
    Specific {
        /// Runtime family after alias normalization.
        family: FrameworkFamily,
        /// Framework version.
        version: FrameworkVersion,
        /// Profile suffix (e.g. `client` in `net40-client`), lowercase.
        profile: Option<String>,
    },
}

impl FrameworkToken {
    /// Construct a profile-less token.
    pub fn new(family: FrameworkFamily, version: FrameworkVersion) -> Self {
        Self::Specific {
            family,
            version,
            profile: None,
        }
    }

    /// True for the framework-neutral token.
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// The family of a specific token, `None` for `Any`.
    pub fn family(&self) -> Option<FrameworkFamily> {
        match self {
            Self::Any => None,
            Self::Specific { family, .. } => Some(*family),
        }
    }

    /// The version of a specific token, `None` for `Any`.
    pub fn version(&self) -> Option<FrameworkVersion> {
        match self {
            Self::Any => None,
            Self::Specific { version, .. } => Some(*version),
        }
    }

    /// The profile of a specific token, if declared.
    pub fn profile(&self) -> Option<&str> {
        match self {
            Self::Any => None,
            Self::Specific { profile, .. } => profile.as_deref(),
        }
    }
}

impl FromStr for FrameworkToken {
    type Err = FrameworkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_lowercase();
        if raw.is_empty() || raw == "any" || raw == "dotnet" {
            return Ok(Self::Any);
        }

        let (name, profile) = match raw.split_once('-') {
            Some((n, p)) if !p.is_empty() => (n, Some(p.to_string())),
            _ => (raw.as_str(), None),
        };

        // Long-form aliases (`.NETFramework4.5`, `.NETStandard,Version=v2.0`)
        // normalize to the same token as folder names.
        let name = name.replace(",version=v", "");
        let name = name.strip_prefix('.').unwrap_or(&name);

        let (family, version) = if let Some(v) = name.strip_prefix("netstandard") {
            (FrameworkFamily::NetStandard, parse_dotted(v, &raw)?)
        } else if let Some(v) = name.strip_prefix("netcoreapp") {
            (FrameworkFamily::NetCoreApp, parse_dotted(v, &raw)?)
        } else if let Some(v) = name.strip_prefix("netframework") {
            (FrameworkFamily::NetFramework, parse_dotted(v, &raw)?)
        } else if let Some(v) = name.strip_prefix("net") {
            if v.contains('.') {
                // Dotted `net5.0`-style names are the modern runtime.
                let version = parse_dotted(v, &raw)?;
                let family = if version.0 >= 5 {
                    FrameworkFamily::NetCoreApp
                } else {
                    FrameworkFamily::NetFramework
                };
                (family, version)
            } else {
                // Compact digits: one component per digit (`net472` -> 4.7.2).
                (FrameworkFamily::NetFramework, parse_compact(v, &raw)?)
            }
        } else {
            return Err(FrameworkParseError(s.to_string()));
        };

        Ok(Self::Specific {
            family,
            version,
            profile,
        })
    }
}

fn parse_dotted(v: &str, raw: &str) -> Result<FrameworkVersion, FrameworkParseError> {
    let mut parts = [0u16; 3];
    let mut count = 0;
    for piece in v.split('.') {
        if count == 3 {
            return Err(FrameworkParseError(raw.to_string()));
        }
        parts[count] = piece
            .parse()
            .map_err(|_| FrameworkParseError(raw.to_string()))?;
        count += 1;
    }
    if count == 0 {
        return Err(FrameworkParseError(raw.to_string()));
    }
    Ok(FrameworkVersion(parts[0], parts[1], parts[2]))
}

fn parse_compact(v: &str, raw: &str) -> Result<FrameworkVersion, FrameworkParseError> {
    if v.is_empty() || v.len() > 3 || !v.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameworkParseError(raw.to_string()));
    }
    let digit = |i: usize| u16::from(v.as_bytes().get(i).map_or(0, |b| b - b'0'));
    Ok(FrameworkVersion(digit(0), digit(1), digit(2)))
}

impl fmt::Display for FrameworkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Specific {
                family,
                version,
                profile,
            } => {
                match family {
                    FrameworkFamily::NetFramework => {
                        write!(f, "net{}{}", version.0, version.1)?;
                        if version.2 != 0 {
                            write!(f, "{}", version.2)?;
                        }
                    }
                    FrameworkFamily::NetStandard => write!(f, "netstandard{version}")?,
                    FrameworkFamily::NetCoreApp => {
                        if version.0 >= 5 {
                            write!(f, "net{version}")?;
                        } else {
                            write!(f, "netcoreapp{version}")?;
                        }
                    }
                }
                if let Some(p) = profile {
                    write!(f, "-{p}")?;
                }
                Ok(())
            }
        }
    }
}
