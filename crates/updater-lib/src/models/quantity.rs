//! Resource quantities with exact milli-unit precision
//!
//! The cluster API expresses CPU and memory as decimal strings with SI or
//! binary suffixes ("250m", "4", "8Gi", "60M"). Priority decisions compare
//! CPU in millicores and memory in bytes; truncating to whole units would
//! misclassify small but significant changes (10m vs 900m), so quantities
//! are kept as integer thousandths internally.

use anyhow::{anyhow, bail, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Resource dimensions the updater reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceName {
    Cpu,
    Memory,
}

impl ResourceName {
    /// The comparison base for this resource: millicores for CPU, bytes for
    /// memory. Divergence ratios and range checks all use this scale.
    pub fn base_value(&self, quantity: Quantity) -> i64 {
        match self {
            ResourceName::Cpu => quantity.milli_value(),
            ResourceName::Memory => quantity.value(),
        }
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceName::Cpu => write!(f, "cpu"),
            ResourceName::Memory => write!(f, "memory"),
        }
    }
}

/// Per-resource quantity map; ordered so iteration is deterministic.
pub type ResourceList = BTreeMap<ResourceName, Quantity>;

/// Build a resource list from optional CPU and memory strings.
///
/// Empty strings are treated as "not set", mirroring how the cluster API
/// omits absent requests.
pub fn resources(cpu: &str, memory: &str) -> Result<ResourceList> {
    let mut list = ResourceList::new();
    if !cpu.is_empty() {
        list.insert(ResourceName::Cpu, cpu.parse()?);
    }
    if !memory.is_empty() {
        list.insert(ResourceName::Memory, memory.parse()?);
    }
    Ok(list)
}

/// An exact resource quantity stored as integer thousandths of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quantity {
    millis: i64,
}

impl Quantity {
    pub fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    pub fn from_units(units: i64) -> Self {
        Self {
            millis: units * 1000,
        }
    }

    /// The quantity in thousandths of a unit (millicores for CPU).
    pub fn milli_value(&self) -> i64 {
        self.millis
    }

    /// The quantity in whole units, rounded away from zero (bytes for
    /// memory). Matches the cluster API convention that 1500m memory is
    /// treated as 2 bytes rather than 1.
    pub fn value(&self) -> i64 {
        if self.millis >= 0 {
            (self.millis + 999) / 1000
        } else {
            (self.millis - 999) / 1000
        }
    }

    pub fn is_zero(&self) -> bool {
        self.millis == 0
    }

    /// Clamp into the inclusive range defined by optional bounds.
    pub fn clamp_to(&self, min: Option<Quantity>, max: Option<Quantity>) -> Quantity {
        let mut out = *self;
        if let Some(max) = max {
            if out > max {
                out = max;
            }
        }
        if let Some(min) = min {
            if out < min {
                out = min;
            }
        }
        out
    }
}

/// Multipliers for the suffixes the cluster API accepts, in milli-units.
fn suffix_multiplier(suffix: &str) -> Option<i128> {
    let units: i128 = match suffix {
        "" => 1,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "E" => 1_000_000_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1i128 << 40,
        "Pi" => 1i128 << 50,
        "Ei" => 1i128 << 60,
        _ => return None,
    };
    Some(units * 1000)
}

impl FromStr for Quantity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("empty quantity");
        }

        let (negative, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let split = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);
        if number.is_empty() {
            bail!("quantity {:?} has no numeric part", s);
        }

        // "m" scales by 1/1000; everything else scales up from whole units.
        let scale_millis = if suffix == "m" {
            1
        } else {
            suffix_multiplier(suffix)
                .ok_or_else(|| anyhow!("unknown quantity suffix {:?}", suffix))?
        };

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if frac_part.contains('.') {
            bail!("malformed quantity {:?}", s);
        }

        let int: i128 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| anyhow!("malformed quantity {:?}", s))?
        };
        let mut millis = int
            .checked_mul(scale_millis)
            .ok_or_else(|| anyhow!("quantity {:?} overflows", s))?;

        if !frac_part.is_empty() {
            if frac_part.len() > 18 {
                bail!("quantity {:?} has too many fractional digits", s);
            }
            let frac: i128 = frac_part
                .parse()
                .map_err(|_| anyhow!("malformed quantity {:?}", s))?;
            let denom = 10i128.pow(frac_part.len() as u32);
            let scaled = frac
                .checked_mul(scale_millis)
                .ok_or_else(|| anyhow!("quantity {:?} overflows", s))?;
            if scaled % denom != 0 {
                bail!("quantity {:?} is finer than milli precision", s);
            }
            millis += scaled / denom;
        }

        if negative {
            millis = -millis;
        }
        let millis = i64::try_from(millis).map_err(|_| anyhow!("quantity {:?} overflows", s))?;
        Ok(Quantity { millis })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis % 1000 == 0 {
            write!(f, "{}", self.millis / 1000)
        } else {
            write!(f, "{}m", self.millis)
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct QuantityVisitor;

impl Visitor<'_> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a quantity string or integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Quantity, E> {
        v.parse().map_err(de::Error::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Quantity, E> {
        Ok(Quantity::from_units(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Quantity, E> {
        i64::try_from(v)
            .map(Quantity::from_units)
            .map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}
