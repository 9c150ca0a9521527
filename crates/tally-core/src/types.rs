use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a term on the ledger: an object, a relationship, or the
/// counter side of a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermId(pub String);

impl TermId {
    /// Create a term id from anything string-like
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string representation of the id
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account address of the signer receiving shares
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    /// Create an address from anything string-like
    #[inline]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl TxHash {
    /// Create a transaction hash from anything string-like
    #[inline]
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Side of a relationship a vote supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Deposit on the relationship itself
    For,
    /// Deposit on the relationship's counter side
    Against,
}

impl Direction {
    /// The other side
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Direction::For => Direction::Against,
            Direction::Against => Direction::For,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::For => write!(f, "for"),
            Direction::Against => write!(f, "against"),
        }
    }
}

/// Bonding curve governing a vault's share price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Curve {
    /// Linear share price
    Linear,
    /// Progressive (offset) share price
    Progressive,
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Curve::Linear => write!(f, "linear"),
            Curve::Progressive => write!(f, "progressive"),
        }
    }
}

/// Mapping between [`Curve`] and the numeric curve ids the ledger expects.
///
/// Numeric ids only appear when a ledger call is built; everything upstream
/// works with the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveIds {
    /// Ledger id of the linear curve
    pub linear: u64,
    /// Ledger id of the progressive curve
    pub progressive: u64,
}

impl Default for CurveIds {
    fn default() -> Self {
        Self {
            linear: 1,
            progressive: 2,
        }
    }
}

impl CurveIds {
    /// Ledger id for a curve
    #[inline]
    pub fn id_for(&self, curve: Curve) -> u64 {
        match curve {
            Curve::Linear => self.linear,
            Curve::Progressive => self.progressive,
        }
    }

    /// Curve for a ledger id, if the id is known
    pub fn curve_for(&self, id: u64) -> Option<Curve> {
        if id == self.linear {
            Some(Curve::Linear)
        } else if id == self.progressive {
            Some(Curve::Progressive)
        } else {
            None
        }
    }
}

/// Serde helpers for amounts in the smallest denomination.
///
/// Amounts are written as decimal strings so values above 2^53 survive JSON
/// consumers; reading accepts either a string or a plain integer.
pub mod amount_string {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    /// Serialize a `u128` as a decimal string
    pub fn serialize<S>(value: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    /// Deserialize a `u128` from a decimal string or an integer
    pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(AmountVisitor)
    }

    struct AmountVisitor;

    impl<'de> Visitor<'de> for AmountVisitor {
        type Value = u128;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a non-negative integer or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
            Ok(u128::from(v))
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
            u128::try_from(v).map_err(|_| E::custom(format!("negative amount: {}", v)))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
            v.trim()
                .parse::<u128>()
                .map_err(|e| E::custom(format!("invalid amount '{}': {}", v, e)))
        }
    }
}
