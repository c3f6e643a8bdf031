//! Chain-tagged amounts and the reference-counted fee basis.
//!
//! Numeric fields cross the boundary as decimal-ASCII strings. Parsing is
//! strict: digits only, no sign, no exponent, and overflow is an error
//! rather than a silent wrap.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};
use crate::types::ChainKind;

/// Parse a decimal-ASCII string into a u128.
pub fn parse_decimal(s: &str) -> ParseResult<u128> {
    if s.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut value: u128 = 0;
    for byte in s.bytes() {
        let digit = match byte {
            b'0'..=b'9' => (byte - b'0') as u128,
            _ => return Err(ParseError::InvalidDigit(s.to_string())),
        };
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| ParseError::Overflow(s.to_string()))?;
    }
    Ok(value)
}

/// Parse a decimal-ASCII string into a u64.
pub fn parse_decimal_u64(s: &str) -> ParseResult<u64> {
    let value = parse_decimal(s)?;
    u64::try_from(value).map_err(|_| ParseError::Overflow(s.to_string()))
}

/// A chain-tagged amount.
///
/// No chain-specific arithmetic or unit formatting lives here; those are
/// layered by chain-specific code above this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount {
    chain: ChainKind,
    value: u128,
}

impl Amount {
    pub fn new(chain: ChainKind, value: u128) -> Self {
        Self {
            chain,
            value,
        }
    }

    pub fn zero(chain: ChainKind) -> Self {
        Self::new(chain, 0)
    }

    /// Parse from a decimal-ASCII string.
    pub fn parse(chain: ChainKind, s: &str) -> ParseResult<Self> {
        Ok(Self::new(chain, parse_decimal(s)?))
    }

    pub fn chain(&self) -> ChainKind {
        self.chain
    }

    pub fn value(&self) -> u128 {
        self.value
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[derive(Debug)]
struct FeeBasisInner {
    chain: ChainKind,
    price_per_cost_unit: u128,
    cost_units: u64,
}

/// A reference-counted, chain-tagged fee basis.
///
/// Holds the chain-specific inputs of a computed transaction fee (gas limit
/// and gas price, or fee-per-kb and size) opaquely. Cloning retains; dropping
/// the last handle releases. The entity layer's fee handling stays
/// chain-agnostic by only ever asking for the type tag.
#[derive(Debug, Clone)]
pub struct FeeBasis {
    inner: Arc<FeeBasisInner>,
}

impl FeeBasis {
    /// Create a fee basis from chain-specific inputs, opaque to this layer.
    pub fn new(chain: ChainKind, price_per_cost_unit: u128, cost_units: u64) -> Self {
        Self {
            inner: Arc::new(FeeBasisInner {
                chain,
                price_per_cost_unit,
                cost_units,
            }),
        }
    }

    /// The chain type tag.
    pub fn chain(&self) -> ChainKind {
        self.inner.chain
    }

    /// The chain-specific per-unit price input.
    pub fn price_per_cost_unit(&self) -> u128 {
        self.inner.price_per_cost_unit
    }

    /// The chain-specific cost-unit input.
    pub fn cost_units(&self) -> u64 {
        self.inner.cost_units
    }

    /// Take an additional reference. Equivalent to `clone`, named for the
    /// retain/release pairing at the boundary.
    pub fn retain(&self) -> Self {
        self.clone()
    }

    /// Number of live references, for ownership diagnostics.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl PartialEq for FeeBasis {
    fn eq(&self, other: &Self) -> bool {
        self.inner.chain == other.inner.chain
            && self.inner.price_per_cost_unit == other.inner.price_per_cost_unit
            && self.inner.cost_units == other.inner.cost_units
    }
}

impl Eq for FeeBasis {}
