// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ordered, immutable list of parsing engine builds to try.
//!
//! Order is retry precedence: the most recent build known to work with the
//! asset producer comes first.

use std::collections::BTreeSet;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A parsing engine build the loader may try
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineCandidate {
    /// Stable name, used in diagnostics
    pub identifier: String,
    /// Where the engine runtime lives, e.g. `builtin:step/IFC4`
    pub address: String,
}

impl EngineCandidate {
    pub fn new(identifier: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            address: address.into(),
        }
    }
}

/// Process-wide engine candidate list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRegistry {
    candidates: Vec<EngineCandidate>,
}

impl EngineRegistry {
    /// Build a registry. Fails on an empty list or duplicate identifiers.
    pub fn new(candidates: Vec<EngineCandidate>) -> Result<Self> {
        if candidates.is_empty() {
            return Err(Error::Registry("no engine candidates".into()));
        }

        let mut seen = FxHashSet::default();
        for candidate in &candidates {
            if candidate.identifier.trim().is_empty() {
                return Err(Error::Registry("empty candidate identifier".into()));
            }
            if !seen.insert(candidate.identifier.as_str()) {
                return Err(Error::Registry(format!(
                    "duplicate candidate '{}'",
                    candidate.identifier
                )));
            }
        }

        Ok(Self { candidates })
    }

    /// Engines compiled into this crate, newest schema line first
    pub fn builtin() -> Self {
        Self {
            candidates: vec![
                EngineCandidate::new("step-ifc4", "builtin:step/IFC4"),
                EngineCandidate::new("step-ifc4x3", "builtin:step/IFC4X3"),
                EngineCandidate::new("step-ifc2x3", "builtin:step/IFC2X3"),
            ],
        }
    }

    /// Parse a JSON array of `{"identifier": .., "address": ..}` objects
    pub fn from_json(json: &str) -> Result<Self> {
        let candidates: Vec<EngineCandidate> = serde_json::from_str(json)?;
        Self::new(candidates)
    }

    pub fn candidates(&self) -> &[EngineCandidate] {
        &self.candidates
    }

    pub fn get(&self, index: usize) -> Option<&EngineCandidate> {
        self.candidates.get(index)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Lowest index not contained in `attempted`
    pub fn first_untried(&self, attempted: &BTreeSet<usize>) -> Option<usize> {
        (0..self.candidates.len()).find(|index| !attempted.contains(index))
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_order() {
        let registry = EngineRegistry::builtin();
        let ids: Vec<&str> = registry
            .candidates()
            .iter()
            .map(|c| c.identifier.as_str())
            .collect();
        assert_eq!(ids, vec!["step-ifc4", "step-ifc4x3", "step-ifc2x3"]);
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(EngineRegistry::new(Vec::new()).is_err());
        let dup = vec![
            EngineCandidate::new("a", "builtin:step/IFC4"),
            EngineCandidate::new("a", "builtin:step/IFC2X3"),
        ];
        assert!(matches!(EngineRegistry::new(dup), Err(Error::Registry(_))));
    }

    #[test]
    fn test_from_json() {
        let registry = EngineRegistry::from_json(
            r#"[{"identifier":"legacy","address":"builtin:step/IFC2X3"},
                {"identifier":"current","address":"builtin:step/IFC4"}]"#,
        )
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1).unwrap().identifier, "current");

        assert!(matches!(
            EngineRegistry::from_json("{not json"),
            Err(Error::RegistryJson(_))
        ));
    }

    #[test]
    fn test_first_untried_skips_attempted() {
        let registry = EngineRegistry::builtin();
        let mut attempted = BTreeSet::new();
        assert_eq!(registry.first_untried(&attempted), Some(0));
        attempted.insert(0);
        assert_eq!(registry.first_untried(&attempted), Some(1));
        attempted.insert(1);
        attempted.insert(2);
        assert_eq!(registry.first_untried(&attempted), None);
    }
}
