//! Basic-constraints path length propagation.
//!
//! Two rules apply when a CA is placed under a chain of ancestors:
//!
//! - every constrained ancestor `a` at `d` CA hops above the new CA (0 for the
//!   immediate parent) must still have budget, `a.pathlen - d >= 0`;
//! - the new CA's own pathlen may not exceed `parent.pathlen - 1`, and it may
//!   only be unconstrained under an unconstrained parent.
//!
//! A missing request means pathlen 0 for roots and intermediates alike, so no
//! further intermediates are allowed unless explicitly asked for.

use tracing::debug;

use crate::chain::Chain;
use crate::error::{CaError, CaResult};

/// Pathlen as requested by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathLenRequest {
    #[default]
    Default,
    Limited(u32),
    Unconstrained,
}

impl PathLenRequest {
    /// `None` means unconstrained.
    pub fn resolve(self) -> Option<u32> {
        match self {
            PathLenRequest::Default => Some(0),
            PathLenRequest::Limited(n) => Some(n),
            PathLenRequest::Unconstrained => None,
        }
    }
}

/// How deep a new direct child of a CA may delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildAllowance {
    /// The CA cannot sign intermediate CAs at all.
    NoIntermediates,
    /// Intermediates are allowed with a pathlen of at most this value.
    UpTo(u32),
    Unlimited,
}

impl ChildAllowance {
    pub fn allows_intermediate_ca(self) -> bool {
        !matches!(self, ChildAllowance::NoIntermediates)
    }
}

/// Validate `requested` against `chain` and return the pathlen to store on the
/// new CA (`None` = unconstrained).
pub fn validate(requested: PathLenRequest, chain: &Chain) -> CaResult<Option<u32>> {
    let effective = requested.resolve();

    for (depth, ancestor) in chain.ancestors().iter().enumerate() {
        if let Some(pathlen) = ancestor.pathlen {
            if (pathlen as i64) - (depth as i64) < 0 {
                return Err(CaError::PathLenExceeded {
                    ancestor: ancestor.label(),
                    required: Some(depth as u32),
                    available: pathlen as i64,
                });
            }
        }
    }

    if let Some(parent) = chain.parent() {
        if let Some(parent_pathlen) = parent.pathlen {
            let available = parent_pathlen as i64 - 1;
            let fits = matches!(effective, Some(n) if (n as i64) <= available);
            if !fits {
                return Err(CaError::PathLenExceeded {
                    ancestor: parent.label(),
                    required: effective,
                    available,
                });
            }
        }
    }

    debug!(?requested, ?effective, depth = chain.len(), "pathlen validated");
    Ok(effective)
}

/// What a new direct child of `chain.parent()` could be granted.
pub fn child_allowance(chain: &Chain) -> ChildAllowance {
    match validate(PathLenRequest::Unconstrained, chain) {
        Ok(_) => ChildAllowance::Unlimited,
        Err(_) => match chain.parent().and_then(|p| p.pathlen) {
            Some(parent_pathlen) if parent_pathlen >= 1 => {
                match validate(PathLenRequest::Limited(parent_pathlen - 1), chain) {
                    Ok(_) => ChildAllowance::UpTo(parent_pathlen - 1),
                    Err(_) => ChildAllowance::NoIntermediates,
                }
            }
            _ => ChildAllowance::NoIntermediates,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::ca;
    use crate::models::CertificateAuthority;

    /// Build a chain from root-first `(pathlen)` entries.
    fn chain(pathlens: &[Option<u32>]) -> Chain {
        let mut cas: Vec<CertificateAuthority> = Vec::new();
        for (i, pathlen) in pathlens.iter().enumerate() {
            let serial = format!("{:02X}", i + 1);
            let parent = (i > 0).then(|| format!("{:02X}", i));
            cas.push(ca(&serial, &format!("ca{}", i), parent.as_deref(), *pathlen));
        }
        cas.reverse();
        Chain::from_ancestors(cas).unwrap()
    }

    #[test]
    fn test_root_accepts_anything() {
        let root = Chain::empty();
        assert_eq!(validate(PathLenRequest::Default, &root).unwrap(), Some(0));
        assert_eq!(validate(PathLenRequest::Limited(7), &root).unwrap(), Some(7));
        assert_eq!(validate(PathLenRequest::Unconstrained, &root).unwrap(), None);
    }

    #[test]
    fn test_three_level_hierarchy() {
        // root pathlen=2, A pathlen=1, A.1 pathlen=0
        assert_eq!(validate(PathLenRequest::Limited(1), &chain(&[Some(2)])).unwrap(), Some(1));
        assert_eq!(
            validate(PathLenRequest::Limited(0), &chain(&[Some(2), Some(1)])).unwrap(),
            Some(0)
        );
        let err = validate(PathLenRequest::Default, &chain(&[Some(2), Some(1), Some(0)])).unwrap_err();
        match err {
            CaError::PathLenExceeded { ancestor, available, .. } => {
                assert!(ancestor.starts_with("ca2"));
                assert_eq!(available, -1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_child_cannot_equal_parent_pathlen() {
        let err = validate(PathLenRequest::Limited(1), &chain(&[Some(1)])).unwrap_err();
        assert!(matches!(
            err,
            CaError::PathLenExceeded { required: Some(1), available: 0, .. }
        ));
    }

    #[test]
    fn test_unconstrained_child_under_constrained_parent() {
        let err = validate(PathLenRequest::Unconstrained, &chain(&[Some(3)])).unwrap_err();
        assert!(matches!(err, CaError::PathLenExceeded { required: None, .. }));
    }

    #[test]
    fn test_default_is_not_inherited() {
        assert_eq!(validate(PathLenRequest::Default, &chain(&[None])).unwrap(), Some(0));
        assert_eq!(validate(PathLenRequest::Default, &chain(&[Some(5)])).unwrap(), Some(0));
    }

    #[test]
    fn test_unconstrained_chain() {
        assert_eq!(validate(PathLenRequest::Unconstrained, &chain(&[None, None])).unwrap(), None);
        assert_eq!(validate(PathLenRequest::Limited(9), &chain(&[None, None])).unwrap(), Some(9));
    }

    #[test]
    fn test_distant_ancestor_budget() {
        // root pathlen=1 with an over-granted intermediate below it (as an
        // imported CA could be): the root runs out two levels down.
        let err = validate(PathLenRequest::Default, &chain(&[Some(1), Some(5), Some(4)])).unwrap_err();
        match err {
            CaError::PathLenExceeded { ancestor, required, available } => {
                assert!(ancestor.starts_with("ca0"));
                assert_eq!(required, Some(2));
                assert_eq!(available, 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_effective_is_min_of_request_and_parent_budget() {
        // For chains of length 0..=5, whenever creation succeeds the stored
        // value equals the request, which is <= parent.pathlen - 1.
        for len in 0..=5usize {
            let pathlens: Vec<Option<u32>> = (0..len).map(|i| Some((len - i) as u32 + 1)).collect();
            let c = chain(&pathlens);
            for requested in 0..6u32 {
                let result = validate(PathLenRequest::Limited(requested), &c);
                match c.parent().and_then(|p| p.pathlen) {
                    Some(parent) => {
                        if requested + 1 <= parent {
                            assert_eq!(result.unwrap(), Some(requested.min(parent - 1)));
                        } else {
                            assert!(result.is_err());
                        }
                    }
                    None => assert_eq!(result.unwrap(), Some(requested)),
                }
            }
        }
    }

    #[test]
    fn test_child_allowance() {
        assert_eq!(child_allowance(&chain(&[None])), ChildAllowance::Unlimited);
        assert_eq!(child_allowance(&chain(&[Some(3)])), ChildAllowance::UpTo(2));
        assert_eq!(child_allowance(&chain(&[Some(0)])), ChildAllowance::NoIntermediates);
        assert_eq!(child_allowance(&chain(&[Some(1), Some(0)])), ChildAllowance::NoIntermediates);
        assert!(!ChildAllowance::NoIntermediates.allows_intermediate_ca());
        assert!(ChildAllowance::UpTo(0).allows_intermediate_ca());
    }
}
