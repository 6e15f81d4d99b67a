//! Serial numbers and prefix resolution.
//!
//! Serials are rendered canonically as uppercase, colon separated hex bytes
//! (`BD:5B:AB:...`). Operators may identify a CA or certificate by any unique
//! leading part of that string; separators and case are ignored when matching.

use std::fmt;

use openssl::bn::{BigNum, MsbOption};
use serde::{Deserialize, Serialize};

use crate::error::{CaError, CaResult};

const SERIAL_BITS: i32 = 128;

/// Canonical serial number of a CA or certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Serial(String);

impl Serial {
    /// Random positive 128-bit serial.
    pub fn random() -> anyhow::Result<Self> {
        let mut serial = BigNum::new()?;
        serial.rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;
        // A zero-valued serial is not allowed in X.509.
        if serial.num_bits() == 0 {
            serial.add_word(1)?;
        }
        Ok(Self::from_bytes(&serial.to_vec()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let hex = bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":");
        Serial(hex)
    }

    /// Parse a full serial in either `AB:CD` or `abcd` notation.
    pub fn parse(value: &str) -> CaResult<Self> {
        let compact = compact(value);
        if compact.is_empty()
            || compact.len() % 2 != 0
            || !compact.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(CaError::InvalidSerial(value.to_string()));
        }
        let bytes = (0..compact.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&compact[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| CaError::InvalidSerial(value.to_string()))?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0
            .split(':')
            .filter_map(|b| u8::from_str_radix(b, 16).ok())
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Serial without separators, used for file names.
    pub fn compact(&self) -> String {
        compact(&self.0)
    }

    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.compact().starts_with(&compact(prefix))
    }
}

fn compact(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Serial {
    type Error = CaError;

    fn try_from(value: String) -> CaResult<Self> {
        Serial::parse(&value)
    }
}

impl From<Serial> for String {
    fn from(serial: Serial) -> Self {
        serial.0
    }
}

/// Anything addressable by serial number.
pub trait Identified {
    fn serial(&self) -> &Serial;
}

/// Resolve `prefix` to exactly one record out of `candidates`.
///
/// An exact match on the full serial wins even when the same string is also a
/// prefix of a longer serial.
pub fn resolve<'a, T: Identified>(prefix: &str, candidates: &'a [T]) -> CaResult<&'a T> {
    let wanted = compact(prefix);
    if let Some(exact) = candidates.iter().find(|c| c.serial().compact() == wanted) {
        return Ok(exact);
    }

    let matches: Vec<&T> = candidates
        .iter()
        .filter(|c| c.serial().matches_prefix(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(CaError::NotFound(prefix.to_string())),
        [single] => Ok(*single),
        many => {
            let mut serials: Vec<String> = many.iter().map(|c| c.serial().to_string()).collect();
            serials.sort();
            Err(CaError::AmbiguousPrefix {
                prefix: prefix.to_string(),
                candidates: serials,
            })
        }
    }
}

/// Owned variant of [`resolve`] for candidate sets loaded from storage.
pub fn resolve_owned<T: Identified>(prefix: &str, candidates: Vec<T>) -> CaResult<T> {
    let index = {
        let found = resolve(prefix, &candidates)?;
        candidates
            .iter()
            .position(|c| c.serial() == found.serial())
            .ok_or_else(|| CaError::NotFound(prefix.to_string()))?
    };
    let mut candidates = candidates;
    Ok(candidates.swap_remove(index))
}
