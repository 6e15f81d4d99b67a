//! Read-only view of a CA's ancestors, immediate parent first.
//!
//! Chains are never persisted. They are rebuilt from parent back-references
//! whenever a CA is validated, and the walk refuses cycles and dangling
//! parents.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{CaError, CaResult};
use crate::models::CertificateAuthority;
use crate::serial::Serial;

#[derive(Debug, Clone, Default)]
pub struct Chain {
    ancestors: Vec<CertificateAuthority>,
}

impl Chain {
    /// The chain of a root CA.
    pub fn empty() -> Self {
        Chain::default()
    }

    /// Build a chain from an already ordered list (parent first). The list
    /// must end at a root.
    pub fn from_ancestors(ancestors: Vec<CertificateAuthority>) -> CaResult<Self> {
        let chain = Chain { ancestors };
        chain.check_links()?;
        Ok(chain)
    }

    /// Walk from `start` up to a root, fetching each CA with `load`.
    pub fn walk<F>(start: &Serial, mut load: F) -> CaResult<Self>
    where
        F: FnMut(&Serial) -> anyhow::Result<Option<CertificateAuthority>>,
    {
        let mut ancestors = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(start.clone());

        while let Some(serial) = next {
            if !seen.insert(serial.clone()) {
                return Err(CaError::CorruptChain(format!(
                    "cycle detected at CA {}",
                    serial
                )));
            }
            let ca = load(&serial)
                .map_err(CaError::storage)?
                .ok_or_else(|| CaError::CorruptChain(format!("missing parent CA {}", serial)))?;
            next = ca.parent.clone();
            ancestors.push(ca);
        }

        debug!(start = %start, depth = ancestors.len(), "loaded CA chain");
        Ok(Chain { ancestors })
    }

    fn check_links(&self) -> CaResult<()> {
        let mut seen = HashSet::new();
        for (i, ca) in self.ancestors.iter().enumerate() {
            if !seen.insert(&ca.serial) {
                return Err(CaError::CorruptChain(format!(
                    "cycle detected at CA {}",
                    ca.serial
                )));
            }
            let expected = self.ancestors.get(i + 1).map(|p| &p.serial);
            if ca.parent.as_ref() != expected {
                return Err(CaError::CorruptChain(format!(
                    "CA {} does not link to the next ancestor",
                    ca.label()
                )));
            }
        }
        Ok(())
    }

    pub fn ancestors(&self) -> &[CertificateAuthority] {
        &self.ancestors
    }

    /// The CA that would sign a new child.
    pub fn parent(&self) -> Option<&CertificateAuthority> {
        self.ancestors.first()
    }

    pub fn is_empty(&self) -> bool {
        self.ancestors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ancestors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::ca;
    use std::collections::HashMap;

    fn index(cas: Vec<CertificateAuthority>) -> HashMap<Serial, CertificateAuthority> {
        cas.into_iter().map(|c| (c.serial.clone(), c)).collect()
    }

    #[test]
    fn test_walk_to_root() {
        let store = index(vec![
            ca("01", "root", None, Some(2)),
            ca("02", "a", Some("01"), Some(1)),
            ca("03", "a1", Some("02"), Some(0)),
        ]);
        let chain = Chain::walk(&Serial::parse("03").unwrap(), |s| Ok(store.get(s).cloned())).unwrap();
        let names: Vec<_> = chain.ancestors().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a1", "a", "root"]);
        assert_eq!(chain.parent().unwrap().name, "a1");
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_walk_detects_cycle() {
        let store = index(vec![
            ca("01", "x", Some("02"), None),
            ca("02", "y", Some("01"), None),
        ]);
        let err = Chain::walk(&Serial::parse("01").unwrap(), |s| Ok(store.get(s).cloned())).unwrap_err();
        assert!(matches!(err, CaError::CorruptChain(msg) if msg.contains("cycle")));
    }

    #[test]
    fn test_walk_detects_missing_parent() {
        let store = index(vec![ca("02", "orphan", Some("01"), None)]);
        let err = Chain::walk(&Serial::parse("02").unwrap(), |s| Ok(store.get(s).cloned())).unwrap_err();
        assert!(matches!(err, CaError::CorruptChain(msg) if msg.contains("missing parent CA 01")));
    }

    #[test]
    fn test_walk_surfaces_storage_errors() {
        let err = Chain::walk(&Serial::parse("01").unwrap(), |_| {
            Err(anyhow::anyhow!("store unreachable"))
        })
        .unwrap_err();
        assert!(matches!(err, CaError::Storage(_)));
    }

    #[test]
    fn test_from_ancestors_checks_links() {
        let ok = Chain::from_ancestors(vec![
            ca("02", "a", Some("01"), Some(0)),
            ca("01", "root", None, Some(1)),
        ]);
        assert!(ok.is_ok());

        let broken = Chain::from_ancestors(vec![
            ca("02", "a", Some("09"), Some(0)),
            ca("01", "root", None, Some(1)),
        ]);
        assert!(broken.is_err());
    }
}
