/*============================================================
  Synavera Project: Syn-Mod
  Module: synmod_core::version
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Parse and order module version strings so that local and
    remote versions can be compared without shelling out.

  Security / Safety Notes:
    Pure data container; no I/O performed in this module.

  Dependencies:
    serde for transparent string serialization.

  Operational Scope:
    Used by the resolver, scanner, and report to compare and
    render versions (`2.10.0`, `1.0.0.4`, `3.1.0-preview2`).

  Revision History:
    2025-11-12 COD  Replaced external comparison with native ordering.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Clear data contracts between modules
    - Total ordering, no partial answers
============================================================*/

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::SynmodError;

/// Dotted numeric version with an optional prerelease label.
///
/// Trailing zero segments are insignificant, so `2.0` and `2.0.0`
/// compare (and hash) equal. A release sorts above any prerelease
/// carrying the same numbers.
#[derive(Debug, Clone)]
pub struct ModuleVersion {
    raw: String,
    segments: Vec<u64>,
    prerelease: Option<String>,
}

impl ModuleVersion {
    /// The string this version was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    fn significant_segments(&self) -> &[u64] {
        let end = self
            .segments
            .iter()
            .rposition(|segment| *segment != 0)
            .map(|idx| idx + 1)
            .unwrap_or(0);
        &self.segments[..end]
    }
}

impl FromStr for ModuleVersion {
    type Err = SynmodError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let raw = input.trim();
        let (numbers, prerelease) = match raw.split_once('-') {
            Some((numbers, label)) if !label.is_empty() => (numbers, Some(label.to_string())),
            Some(_) => return Err(SynmodError::Version(raw.to_string())),
            None => (raw, None),
        };
        if numbers.is_empty() {
            return Err(SynmodError::Version(raw.to_string()));
        }

        let mut segments = Vec::new();
        for part in numbers.split('.') {
            let value = part
                .parse::<u64>()
                .map_err(|_| SynmodError::Version(raw.to_string()))?;
            segments.push(value);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
            prerelease,
        })
    }
}

impl Ord for ModuleVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.segments.len().max(other.segments.len());
        for idx in 0..width {
            let left = self.segments.get(idx).copied().unwrap_or(0);
            let right = other.segments.get(idx).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => continue,
                decided => return decided,
            }
        }
        match (&self.prerelease, &other.prerelease) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(left), Some(right)) => left.cmp(right),
        }
    }
}

impl PartialOrd for ModuleVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ModuleVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ModuleVersion {}

impl Hash for ModuleVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant_segments().hash(state);
        self.prerelease.hash(state);
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for ModuleVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

/// Pick the highest version out of an iterator.
pub fn max_version<'a, I>(versions: I) -> Option<&'a ModuleVersion>
where
    I: IntoIterator<Item = &'a ModuleVersion>,
{
    versions.into_iter().max()
}
