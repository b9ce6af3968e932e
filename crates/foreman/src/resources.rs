//! # Resource Multisets
//!
//! A [`Resources`] value is a set of named, typed quantities: scalars
//! (`cpus:2`, `mem:1024`), ranges (`ports:[31000-32000]`), and sets
//! (`labels:{ssd,rack1}`). Addition, checked subtraction, and containment
//! are all componentwise; text form is `name:value;name:value`.
//!
//! Subtraction never goes negative: taking more than is present is an
//! accounting bug in the caller and surfaces as an error. That property is
//! what lets the master treat `total = free + offered + used` as an
//! invariant rather than a hope.
//!
//! ## Usage
//!
//! ```rust
//! use foreman::resources::Resources;
//!
//! let total = Resources::parse("cpus:4;mem:4096;ports:[31000-32000]").unwrap();
//! let task = Resources::parse("cpus:1;mem:512").unwrap();
//!
//! // Launching a task debits the pool; finishing it credits the pool back.
//! let free = total.minus(&task).unwrap();
//! assert!(free.contains(&task));
//! assert_eq!(free.plus(&task), total);
//!
//! // Over-subtraction is an error, not a negative balance.
//! assert!(task.minus(&total).is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Tolerance for scalar comparisons; resource arithmetic accumulates
/// floating-point error over repeated add/subtract cycles.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum ResourceError {
    #[error("cannot parse resource component '{0}'")]
    Parse(String),
    #[error("subtracting '{0}' would underflow")]
    Underflow(String),
    #[error("components named '{0}' have mismatched types")]
    TypeMismatch(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResourceValue {
    Scalar(f64),
    /// Inclusive intervals, kept sorted and coalesced.
    Ranges(Vec<(u64, u64)>),
    Set(BTreeSet<String>),
}

impl ResourceValue {
    fn is_empty(&self) -> bool {
        match self {
            ResourceValue::Scalar(v) => *v <= EPSILON,
            ResourceValue::Ranges(r) => r.is_empty(),
            ResourceValue::Set(s) => s.is_empty(),
        }
    }

    /// A scalar magnitude for fairness math: scalars count as themselves,
    /// ranges by how many values they span, sets by cardinality.
    fn quantity(&self) -> f64 {
        match self {
            ResourceValue::Scalar(v) => *v,
            ResourceValue::Ranges(r) => r.iter().map(|(a, b)| (b - a + 1) as f64).sum(),
            ResourceValue::Set(s) => s.len() as f64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    components: BTreeMap<String, ResourceValue>,
}

impl Resources {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Parses the text form `name:value;name:value`. Range values look like
    /// `[31000-32000,40000-41000]`, set values like `{a,b}`, anything else
    /// is a scalar.
    pub fn parse(text: &str) -> Result<Self, ResourceError> {
        let mut components = BTreeMap::new();
        for piece in text.split(';') {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            let (name, value) = piece
                .split_once(':')
                .ok_or_else(|| ResourceError::Parse(piece.to_string()))?;
            let name = name.trim();
            let value = value.trim();
            if name.is_empty() {
                return Err(ResourceError::Parse(piece.to_string()));
            }
            let parsed = if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
                ResourceValue::Ranges(normalize_ranges(parse_ranges(inner, piece)?))
            } else if let Some(inner) = value.strip_prefix('{').and_then(|v| v.strip_suffix('}')) {
                ResourceValue::Set(
                    inner
                        .split(',')
                        .map(|item| item.trim().to_string())
                        .filter(|item| !item.is_empty())
                        .collect(),
                )
            } else {
                ResourceValue::Scalar(
                    value
                        .parse::<f64>()
                        .map_err(|_| ResourceError::Parse(piece.to_string()))?,
                )
            };
            if !parsed.is_empty() {
                components.insert(name.to_string(), parsed);
            }
        }
        Ok(Self { components })
    }

    pub fn get(&self, name: &str) -> Option<&ResourceValue> {
        self.components.get(name)
    }

    /// Scalar magnitude of one component, zero when absent.
    pub fn scalar(&self, name: &str) -> f64 {
        match self.components.get(name) {
            Some(ResourceValue::Scalar(v)) => *v,
            _ => 0.0,
        }
    }

    /// `(name, magnitude)` pairs for fairness math.
    pub fn quantities(&self) -> impl Iterator<Item = (&str, f64)> {
        self.components
            .iter()
            .map(|(name, value)| (name.as_str(), value.quantity()))
    }

    /// Componentwise sum.
    pub fn plus(&self, other: &Resources) -> Resources {
        let mut result = self.clone();
        for (name, value) in &other.components {
            match result.components.get_mut(name) {
                None => {
                    result.components.insert(name.clone(), value.clone());
                }
                Some(ResourceValue::Scalar(mine)) => {
                    if let ResourceValue::Scalar(theirs) = value {
                        *mine += theirs;
                    }
                }
                Some(ResourceValue::Ranges(mine)) => {
                    if let ResourceValue::Ranges(theirs) = value {
                        mine.extend_from_slice(theirs);
                        *mine = normalize_ranges(mine.clone());
                    }
                }
                Some(ResourceValue::Set(mine)) => {
                    if let ResourceValue::Set(theirs) = value {
                        mine.extend(theirs.iter().cloned());
                    }
                }
            }
        }
        result
    }

    /// Componentwise difference. Underflow on any component fails the whole
    /// subtraction, leaving nothing half-applied.
    pub fn minus(&self, other: &Resources) -> Result<Resources, ResourceError> {
        let mut result = self.clone();
        for (name, value) in &other.components {
            if value.is_empty() {
                continue;
            }
            let mine = result
                .components
                .get_mut(name)
                .ok_or_else(|| ResourceError::Underflow(name.clone()))?;
            match (mine, value) {
                (ResourceValue::Scalar(mine), ResourceValue::Scalar(theirs)) => {
                    if *mine + EPSILON < *theirs {
                        return Err(ResourceError::Underflow(name.clone()));
                    }
                    *mine = (*mine - *theirs).max(0.0);
                }
                (ResourceValue::Ranges(mine), ResourceValue::Ranges(theirs)) => {
                    *mine = subtract_ranges(mine, theirs)
                        .ok_or_else(|| ResourceError::Underflow(name.clone()))?;
                }
                (ResourceValue::Set(mine), ResourceValue::Set(theirs)) => {
                    if !theirs.is_subset(mine) {
                        return Err(ResourceError::Underflow(name.clone()));
                    }
                    for item in theirs {
                        mine.remove(item);
                    }
                }
                _ => return Err(ResourceError::TypeMismatch(name.clone())),
            }
        }
        result.components.retain(|_, value| !value.is_empty());
        Ok(result)
    }

    /// True when every component of `other` fits inside this value.
    pub fn contains(&self, other: &Resources) -> bool {
        self.minus(other).is_ok()
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.components {
            if !first {
                write!(f, ";")?;
            }
            first = false;
            match value {
                ResourceValue::Scalar(v) => write!(f, "{name}:{v}")?,
                ResourceValue::Ranges(ranges) => {
                    write!(f, "{name}:[")?;
                    for (i, (a, b)) in ranges.iter().enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{a}-{b}")?;
                    }
                    write!(f, "]")?;
                }
                ResourceValue::Set(items) => {
                    write!(f, "{name}:{{")?;
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{item}")?;
                    }
                    write!(f, "}}")?;
                }
            }
        }
        Ok(())
    }
}

fn parse_ranges(inner: &str, piece: &str) -> Result<Vec<(u64, u64)>, ResourceError> {
    let mut ranges = Vec::new();
    for part in inner.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (lo, hi) = part
            .split_once('-')
            .ok_or_else(|| ResourceError::Parse(piece.to_string()))?;
        let lo = lo
            .trim()
            .parse::<u64>()
            .map_err(|_| ResourceError::Parse(piece.to_string()))?;
        let hi = hi
            .trim()
            .parse::<u64>()
            .map_err(|_| ResourceError::Parse(piece.to_string()))?;
        if lo > hi {
            return Err(ResourceError::Parse(piece.to_string()));
        }
        ranges.push((lo, hi));
    }
    Ok(ranges)
}

/// Sorts and coalesces overlapping or adjacent intervals.
fn normalize_ranges(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    ranges.sort_unstable();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (lo, hi) in ranges {
        match merged.last_mut() {
            Some((_, last_hi)) if lo <= last_hi.saturating_add(1) => {
                *last_hi = (*last_hi).max(hi);
            }
            _ => merged.push((lo, hi)),
        }
    }
    merged
}

/// Interval difference; `None` when `sub` is not fully contained in `from`.
fn subtract_ranges(from: &[(u64, u64)], sub: &[(u64, u64)]) -> Option<Vec<(u64, u64)>> {
    let mut result = from.to_vec();
    for &(lo, hi) in sub {
        let mut next = Vec::with_capacity(result.len() + 1);
        let mut carved = false;
        for &(a, b) in &result {
            if hi < a || lo > b {
                next.push((a, b));
            } else if lo >= a && hi <= b {
                carved = true;
                if a < lo {
                    next.push((a, lo - 1));
                }
                if hi < b {
                    next.push((hi + 1, b));
                }
            } else {
                // Straddles an interval boundary: not contained.
                return None;
            }
        }
        if !carved {
            return None;
        }
        result = next;
    }
    Some(result)
}
