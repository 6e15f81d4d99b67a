//! Name constraint subtrees and their propagation down a CA chain.
//!
//! Patterns are parsed once at the boundary (`DNS:.example.com`,
//! `IP:10.0.0.0/8`, `email:.example.com`, `URI:.example.com`,
//! `dirName:/C=AT/O=Org`) into [`GeneralSubtree`]. The merge step only works on
//! parsed values.
//!
//! Subsumption is only checked between patterns of the same kind. A requested
//! DNS pattern is never held against an ancestor's IP ranges.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chain::Chain;
use crate::error::{CaError, CaResult};
use crate::subject::Subject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    Dns,
    Ip,
    Email,
    Uri,
    DirectoryName,
}

impl NameKind {
    pub const ALL: [NameKind; 5] = [
        NameKind::Dns,
        NameKind::Ip,
        NameKind::Email,
        NameKind::Uri,
        NameKind::DirectoryName,
    ];
}

/// An IP address range in CIDR form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpRange {
    addr: IpAddr,
    prefix: u8,
}

impl IpRange {
    pub fn new(addr: IpAddr, prefix: u8) -> Option<Self> {
        if prefix > Self::width(&addr) {
            return None;
        }
        Some(IpRange { addr, prefix })
    }

    fn width(addr: &IpAddr) -> u8 {
        match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    fn bits(&self) -> u128 {
        match self.addr {
            IpAddr::V4(v4) => u32::from(v4) as u128,
            IpAddr::V6(v6) => u128::from(v6),
        }
    }

    fn mask(&self, prefix: u8) -> u128 {
        let width = Self::width(&self.addr) as u32;
        let full: u128 = if width == 128 {
            u128::MAX
        } else {
            (1u128 << width) - 1
        };
        if prefix == 0 {
            0
        } else {
            (full << (width - prefix as u32)) & full
        }
    }

    pub fn contains(&self, other: &IpRange) -> bool {
        let same_family = matches!(
            (self.addr, other.addr),
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_))
        );
        if !same_family || other.prefix < self.prefix {
            return false;
        }
        let mask = self.mask(self.prefix);
        self.bits() & mask == other.bits() & mask
    }

    /// Address followed by netmask, the encoding used in name constraints.
    pub fn to_constraint_bytes(&self) -> Vec<u8> {
        let mask = self.mask(self.prefix);
        match self.addr {
            IpAddr::V4(v4) => {
                let mut out = v4.octets().to_vec();
                out.extend_from_slice(&(mask as u32).to_be_bytes());
                out
            }
            IpAddr::V6(v6) => {
                let mut out = v6.octets().to_vec();
                out.extend_from_slice(&mask.to_be_bytes());
                out
            }
        }
    }

    /// Plain address bytes, the encoding used in subject alternative names.
    pub fn address_bytes(&self) -> Vec<u8> {
        match self.addr {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        }
    }

    /// A single address.
    pub fn host(addr: IpAddr) -> Self {
        let prefix = Self::width(&addr);
        IpRange { addr, prefix }
    }

    pub fn is_host(&self) -> bool {
        self.prefix == Self::width(&self.addr)
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }
}

impl FromStr for IpRange {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, ()> {
        let (addr, prefix) = match value.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (value, None),
        };
        let addr: IpAddr = addr.trim().parse().map_err(|_| ())?;
        let prefix = match prefix {
            None => Self::width(&addr),
            Some(p) => match p.parse::<u8>() {
                Ok(len) => len,
                // Dotted netmask, e.g. 255.255.0.0
                Err(_) => {
                    let mask: IpAddr = p.parse().map_err(|_| ())?;
                    netmask_prefix(&addr, &mask).ok_or(())?
                }
            },
        };
        IpRange::new(addr, prefix).ok_or(())
    }
}

fn netmask_prefix(addr: &IpAddr, mask: &IpAddr) -> Option<u8> {
    let (bits, width) = match (addr, mask) {
        (IpAddr::V4(_), IpAddr::V4(m)) => (u32::from(*m) as u128, 32u32),
        (IpAddr::V6(_), IpAddr::V6(m)) => (u128::from(*m), 128u32),
        _ => return None,
    };
    let ones = bits.count_ones();
    let shifted = if ones == 0 { 0 } else { bits >> (width - ones) };
    // The mask must be contiguous ones followed by zeros.
    if ones == 0 || shifted.count_ones() == ones && shifted.trailing_ones() == ones {
        Some(ones as u8)
    } else {
        None
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            write!(f, "{}", self.addr)
        } else {
            write!(f, "{}/{}", self.addr, self.prefix)
        }
    }
}

/// A single typed name pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GeneralSubtree {
    Dns(String),
    Ip(IpRange),
    Email(String),
    Uri(String),
    DirectoryName(Subject),
}

impl GeneralSubtree {
    pub fn parse(value: &str) -> CaResult<Self> {
        let invalid = || CaError::InvalidNameConstraint(value.to_string());
        let (kind, pattern) = value.split_once(':').ok_or_else(invalid)?;
        let pattern = pattern.trim();
        match kind.trim().to_ascii_lowercase().as_str() {
            "dns" => {
                if pattern.trim_start_matches('.').is_empty() {
                    return Err(invalid());
                }
                Ok(GeneralSubtree::Dns(pattern.to_ascii_lowercase()))
            }
            "ip" => pattern.parse().map(GeneralSubtree::Ip).map_err(|_| invalid()),
            "email" => {
                if pattern.is_empty() {
                    return Err(invalid());
                }
                Ok(GeneralSubtree::Email(pattern.to_string()))
            }
            "uri" => {
                if pattern.is_empty() {
                    return Err(invalid());
                }
                Ok(GeneralSubtree::Uri(pattern.to_ascii_lowercase()))
            }
            "dirname" => {
                let subject = Subject::parse(pattern).map_err(|_| invalid())?;
                if subject.is_empty() {
                    return Err(invalid());
                }
                Ok(GeneralSubtree::DirectoryName(subject))
            }
            _ => Err(invalid()),
        }
    }

    pub fn kind(&self) -> NameKind {
        match self {
            GeneralSubtree::Dns(_) => NameKind::Dns,
            GeneralSubtree::Ip(_) => NameKind::Ip,
            GeneralSubtree::Email(_) => NameKind::Email,
            GeneralSubtree::Uri(_) => NameKind::Uri,
            GeneralSubtree::DirectoryName(_) => NameKind::DirectoryName,
        }
    }

    /// True if every name matched by `other` is also matched by `self`.
    /// Patterns of different kinds never cover each other.
    pub fn covers(&self, other: &GeneralSubtree) -> bool {
        match (self, other) {
            (GeneralSubtree::Dns(parent), GeneralSubtree::Dns(child)) => {
                dns_covers(parent, child)
            }
            (GeneralSubtree::Ip(parent), GeneralSubtree::Ip(child)) => parent.contains(child),
            (GeneralSubtree::Email(parent), GeneralSubtree::Email(child)) => {
                email_covers(parent, child)
            }
            (GeneralSubtree::Uri(parent), GeneralSubtree::Uri(child)) => {
                host_covers(parent, &uri_host(child))
            }
            (GeneralSubtree::DirectoryName(parent), GeneralSubtree::DirectoryName(child)) => {
                parent.is_prefix_of(child)
            }
            _ => false,
        }
    }
}

/// DNS subtrees: `example.com` matches the domain itself and everything
/// below it, `.example.com` only what is below it. Neither matches
/// `badexample.com`.
fn dns_covers(parent: &str, child: &str) -> bool {
    if parent.starts_with('.') {
        return host_covers(parent, child);
    }
    let parent = parent.to_ascii_lowercase();
    let child = child.to_ascii_lowercase();
    let child = child.strip_prefix('.').unwrap_or(&child);
    child == parent || child.ends_with(&format!(".{}", parent))
}

/// Host subtrees as used by email and URI constraints: a leading dot means
/// "any subdomain", no leading dot means "exactly this host".
fn host_covers(parent: &str, child: &str) -> bool {
    let parent = parent.to_ascii_lowercase();
    let child = child.to_ascii_lowercase();
    match parent.strip_prefix('.') {
        Some(domain) => match child.strip_prefix('.') {
            Some(child_domain) => {
                child_domain == domain || child_domain.ends_with(&format!(".{}", domain))
            }
            None => child.ends_with(&format!(".{}", domain)),
        },
        None => child == parent,
    }
}

fn email_covers(parent: &str, child: &str) -> bool {
    if parent.contains('@') {
        return parent.eq_ignore_ascii_case(child);
    }
    let child_host = child.rsplit_once('@').map_or(child, |(_, host)| host);
    host_covers(parent, child_host)
}

/// Strip scheme, userinfo, port and path from a URI, leaving the host.
fn uri_host(uri: &str) -> String {
    let rest = uri.split_once("://").map_or(uri, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    host.split(':').next().unwrap_or(host).to_string()
}

impl fmt::Display for GeneralSubtree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneralSubtree::Dns(v) => write!(f, "DNS:{}", v),
            GeneralSubtree::Ip(v) => write!(f, "IP:{}", v),
            GeneralSubtree::Email(v) => write!(f, "email:{}", v),
            GeneralSubtree::Uri(v) => write!(f, "URI:{}", v),
            GeneralSubtree::DirectoryName(v) => write!(f, "dirName:{}", v),
        }
    }
}

impl TryFrom<String> for GeneralSubtree {
    type Error = CaError;

    fn try_from(value: String) -> CaResult<Self> {
        GeneralSubtree::parse(&value)
    }
}

impl From<GeneralSubtree> for String {
    fn from(subtree: GeneralSubtree) -> Self {
        subtree.to_string()
    }
}

/// Permitted and excluded subtrees of a single CA. Order is irrelevant,
/// duplicates are removed by exact equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameConstraintSet {
    #[serde(default)]
    pub permitted: Vec<GeneralSubtree>,
    #[serde(default)]
    pub excluded: Vec<GeneralSubtree>,
}

impl NameConstraintSet {
    pub fn new(permitted: Vec<GeneralSubtree>, excluded: Vec<GeneralSubtree>) -> Self {
        let mut set = NameConstraintSet::default();
        for p in permitted {
            set.add_permitted(p);
        }
        for e in excluded {
            set.add_excluded(e);
        }
        set
    }

    /// Parse CLI arguments of the form `permitted,DNS:.com` / `excluded,IP:10.0.0.0/8`.
    pub fn from_cli_args<S: AsRef<str>>(args: &[S]) -> CaResult<Self> {
        let mut set = NameConstraintSet::default();
        for arg in args {
            let arg = arg.as_ref();
            let (which, pattern) = arg
                .split_once(',')
                .ok_or_else(|| CaError::InvalidNameConstraint(arg.to_string()))?;
            let subtree = GeneralSubtree::parse(pattern)?;
            match which.trim().to_ascii_lowercase().as_str() {
                "permitted" => set.add_permitted(subtree),
                "excluded" => set.add_excluded(subtree),
                _ => return Err(CaError::InvalidNameConstraint(arg.to_string())),
            }
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.permitted.is_empty() && self.excluded.is_empty()
    }

    pub fn add_permitted(&mut self, subtree: GeneralSubtree) {
        if !self.permitted.contains(&subtree) {
            self.permitted.push(subtree);
        }
    }

    pub fn add_excluded(&mut self, subtree: GeneralSubtree) {
        if !self.excluded.contains(&subtree) {
            self.excluded.push(subtree);
        }
    }

    fn permitted_of(&self, kind: NameKind) -> impl Iterator<Item = &GeneralSubtree> {
        self.permitted.iter().filter(move |p| p.kind() == kind)
    }

    /// Whether a concrete name (e.g. a subject alternative name) may be used
    /// under these constraints.
    pub fn permits(&self, name: &GeneralSubtree) -> bool {
        let mut same_kind = self.permitted_of(name.kind()).peekable();
        let permitted = same_kind.peek().is_none() || same_kind.any(|p| p.covers(name));
        permitted && !self.excluded.iter().any(|e| e.covers(name))
    }

    /// Lines as shown by `view_ca`.
    pub fn describe(&self) -> Vec<String> {
        self.permitted
            .iter()
            .map(|p| format!("Permitted: {}", p))
            .chain(self.excluded.iter().map(|e| format!("Excluded: {}", e)))
            .collect()
    }
}

/// Validate `requested` against every ancestor in `chain` and compute the
/// constraint set to store on the new CA.
///
/// Permitted patterns may only narrow what an ancestor permits. Kinds the
/// request does not mention carry over from the nearest ancestor that
/// restricts them, so an empty request inherits the parent's permitted set.
/// Excluded subtrees accumulate from every ancestor.
pub fn merge(requested: &NameConstraintSet, chain: &Chain) -> CaResult<NameConstraintSet> {
    for ancestor in chain.ancestors() {
        let constraints = &ancestor.name_constraints;
        if constraints.permitted.is_empty() {
            continue;
        }
        for pattern in &requested.permitted {
            let mut same_kind = constraints.permitted_of(pattern.kind()).peekable();
            if same_kind.peek().is_none() {
                continue;
            }
            if !same_kind.any(|p| p.covers(pattern)) {
                return Err(CaError::NameConstraintViolation {
                    pattern: pattern.clone(),
                    ancestor: ancestor.label(),
                });
            }
        }
    }

    let mut merged = NameConstraintSet::new(requested.permitted.clone(), Vec::new());
    for kind in NameKind::ALL {
        if merged.permitted_of(kind).next().is_some() {
            continue;
        }
        let inherited = chain
            .ancestors()
            .iter()
            .find(|a| a.name_constraints.permitted_of(kind).next().is_some());
        if let Some(ancestor) = inherited {
            for p in ancestor.name_constraints.permitted_of(kind) {
                merged.add_permitted(p.clone());
            }
        }
    }

    for e in &requested.excluded {
        merged.add_excluded(e.clone());
    }
    for ancestor in chain.ancestors() {
        for e in &ancestor.name_constraints.excluded {
            merged.add_excluded(e.clone());
        }
    }

    for p in &merged.permitted {
        if let Some(e) = merged.excluded.iter().find(|e| e.covers(p)) {
            warn!(permitted = %p, excluded = %e, "permitted subtree is entirely excluded");
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::ca;

    fn gs(v: &str) -> GeneralSubtree {
        GeneralSubtree::parse(v).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(gs("DNS:.com").to_string(), "DNS:.com");
        assert_eq!(gs("dns:Example.COM").to_string(), "DNS:example.com");
        assert_eq!(gs("IP:10.0.0.0/8").to_string(), "IP:10.0.0.0/8");
        assert_eq!(gs("IP:10.0.0.0/255.0.0.0").to_string(), "IP:10.0.0.0/8");
        assert_eq!(gs("email:.example.com").to_string(), "email:.example.com");
        assert_eq!(gs("dirName:/C=AT/O=Org").to_string(), "dirName:/C=AT/O=Org");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(GeneralSubtree::parse("example.com").is_err());
        assert!(GeneralSubtree::parse("FOO:bar").is_err());
        assert!(GeneralSubtree::parse("IP:10.0.0.0/33").is_err());
        assert!(GeneralSubtree::parse("IP:10.0.0.0/255.0.255.0").is_err());
        assert!(GeneralSubtree::parse("email:").is_err());
        assert!(GeneralSubtree::parse("dirName:").is_err());
        assert!(GeneralSubtree::parse("DNS:").is_err());
        assert!(GeneralSubtree::parse("DNS: ").is_err());
        assert!(GeneralSubtree::parse("DNS:.").is_err());
    }

    #[test]
    fn test_dns_covers() {
        assert!(gs("DNS:com").covers(&gs("DNS:example.com")));
        assert!(gs("DNS:.com").covers(&gs("DNS:example.com")));
        assert!(gs("DNS:example.com").covers(&gs("DNS:example.com")));
        assert!(!gs("DNS:com").covers(&gs("DNS:net")));
        assert!(!gs("DNS:example.com").covers(&gs("DNS:badexample.com")));
        assert!(!gs("DNS:example.com").covers(&gs("DNS:com")));
    }

    #[test]
    fn test_dns_leading_dot_means_subdomains_only() {
        assert!(gs("DNS:.example.com").covers(&gs("DNS:www.example.com")));
        assert!(gs("DNS:.example.com").covers(&gs("DNS:.sub.example.com")));
        assert!(gs("DNS:.example.com").covers(&gs("DNS:.example.com")));
        assert!(!gs("DNS:.example.com").covers(&gs("DNS:example.com")));
        assert!(!gs("DNS:.example.com").covers(&gs("DNS:badexample.com")));
        assert!(gs("DNS:example.com").covers(&gs("DNS:.example.com")));
        assert!(gs("DNS:example.com").covers(&gs("DNS:.www.example.com")));

        let set = NameConstraintSet::new(vec![gs("DNS:.example.com")], vec![]);
        assert!(set.permits(&gs("DNS:www.example.com")));
        assert!(!set.permits(&gs("DNS:example.com")));
    }

    #[test]
    fn test_merge_narrows_and_inherits() {
        let mut root = ca("01", "root", None, Some(2));
        root.name_constraints = NameConstraintSet::new(
            vec![gs("DNS:.example.com"), gs("IP:10.0.0.0/8")],
            vec![gs("DNS:bad.example.com")],
        );
        let chain = Chain::from_ancestors(vec![root]).unwrap();

        let requested = NameConstraintSet::new(vec![gs("DNS:.www.example.com")], vec![gs("IP:10.9.0.0/16")]);
        let merged = merge(&requested, &chain).unwrap();
        assert_eq!(merged.permitted, vec![gs("DNS:.www.example.com"), gs("IP:10.0.0.0/8")]);
        assert_eq!(merged.excluded, vec![gs("IP:10.9.0.0/16"), gs("DNS:bad.example.com")]);

        // The bare domain is outside a subdomains-only parent.
        let err = merge(&NameConstraintSet::new(vec![gs("DNS:example.com")], vec![]), &chain).unwrap_err();
        match err {
            CaError::NameConstraintViolation { pattern, ancestor } => {
                assert_eq!(pattern, gs("DNS:example.com"));
                assert!(ancestor.contains("root"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_ip_covers() {
        assert!(gs("IP:10.0.0.0/8").covers(&gs("IP:10.1.0.0/16")));
        assert!(gs("IP:10.0.0.0/8").covers(&gs("IP:10.1.2.3")));
        assert!(!gs("IP:10.0.0.0/8").covers(&gs("IP:11.0.0.0/16")));
        assert!(!gs("IP:10.1.0.0/16").covers(&gs("IP:10.0.0.0/8")));
        assert!(!gs("IP:10.0.0.0/8").covers(&gs("IP:::1")));
        assert!(gs("IP:fd00::/8").covers(&gs("IP:fd12::/16")));
        assert!(gs("IP:0.0.0.0/0").covers(&gs("IP:192.168.1.1")));
    }

    #[test]
    fn test_email_covers() {
        assert!(gs("email:.example.com").covers(&gs("email:user@mail.example.com")));
        assert!(gs("email:.example.com").covers(&gs("email:.sub.example.com")));
        assert!(!gs("email:.example.com").covers(&gs("email:user@example.com")));
        assert!(gs("email:example.com").covers(&gs("email:user@example.com")));
        assert!(!gs("email:example.com").covers(&gs("email:user@mail.example.com")));
        assert!(gs("email:user@example.com").covers(&gs("email:USER@example.com")));
        assert!(!gs("email:user@example.com").covers(&gs("email:other@example.com")));
    }

    #[test]
    fn test_uri_covers() {
        assert!(gs("URI:.example.com").covers(&gs("URI:https://www.example.com/path")));
        assert!(gs("URI:example.com").covers(&gs("URI:http://user@example.com:8080/")));
        assert!(!gs("URI:example.com").covers(&gs("URI:http://www.example.com")));
    }

    #[test]
    fn test_directory_name_covers() {
        assert!(gs("dirName:/C=AT").covers(&gs("dirName:/C=AT/O=Org")));
        assert!(!gs("dirName:/C=AT/O=Org").covers(&gs("dirName:/C=AT")));
    }

    #[test]
    fn test_cross_kind_never_covers() {
        assert!(!gs("DNS:com").covers(&gs("email:.com")));
        assert!(!gs("URI:.example.com").covers(&gs("DNS:www.example.com")));
    }

    #[test]
    fn test_from_cli_args() {
        let set =
            NameConstraintSet::from_cli_args(&["permitted,DNS:.com", "excluded,DNS:.net", "permitted,DNS:.com"])
                .unwrap();
        assert_eq!(set.permitted, vec![gs("DNS:.com")]);
        assert_eq!(set.excluded, vec![gs("DNS:.net")]);
        assert_eq!(set.describe(), vec!["Permitted: DNS:.com", "Excluded: DNS:.net"]);

        assert!(NameConstraintSet::from_cli_args(&["allowed,DNS:.com"]).is_err());
        assert!(NameConstraintSet::from_cli_args(&["DNS:.com"]).is_err());
    }

    #[test]
    fn test_permits() {
        let set = NameConstraintSet::new(vec![gs("DNS:example.com")], vec![gs("DNS:bad.example.com")]);
        assert!(set.permits(&gs("DNS:www.example.com")));
        assert!(!set.permits(&gs("DNS:www.example.net")));
        assert!(!set.permits(&gs("DNS:x.bad.example.com")));
        // no IP restriction at all
        assert!(set.permits(&gs("IP:1.2.3.4")));
    }

    #[test]
    fn test_serde_round_trip() {
        let set = NameConstraintSet::new(vec![gs("IP:10.0.0.0/8")], vec![gs("dirName:/C=AT")]);
        let json = serde_json::to_string(&set).unwrap();
        assert!(json.contains("IP:10.0.0.0/8"));
        let back: NameConstraintSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_constraint_bytes() {
        match gs("IP:192.168.0.0/16") {
            GeneralSubtree::Ip(range) => {
                assert_eq!(range.to_constraint_bytes(), vec![192, 168, 0, 0, 255, 255, 0, 0]);
                assert!(!range.is_host());
            }
            _ => unreachable!(),
        }
    }
}
