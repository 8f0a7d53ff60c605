use std::cmp::Ordering;
use std::fmt::Display;

use reshard_core::{AxisRef, Mesh};

/// Borrowed view of a sequence of axes, split into a prefix and its last axis (the _tail_).
///
/// The empty sequence has no tail and an empty prefix. Sequences are ordered by their length first, then
/// lexicographically by their prefix, and finally by their tail.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AxesWithTail<'a> {
    prefix: &'a [AxisRef],
    tail: Option<&'a AxisRef>,
}

impl<'a> AxesWithTail<'a> {
    pub fn new(axes: &'a [AxisRef]) -> Self {
        match axes.split_last() {
            Some((tail, prefix)) => Self { prefix, tail: Some(tail) },
            None => Self::empty(),
        }
    }

    pub fn empty() -> Self {
        Self { prefix: &[], tail: None }
    }

    pub fn is_empty(&self) -> bool {
        self.tail.is_none()
    }

    /// Number of axes in this sequence.
    pub fn size(&self) -> usize {
        self.prefix.len() + usize::from(self.tail.is_some())
    }

    pub fn prefix(&self) -> &'a [AxisRef] {
        self.prefix
    }

    pub fn tail(&self) -> Option<&'a AxisRef> {
        self.tail
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a AxisRef> {
        self.prefix.iter().chain(self.tail)
    }

    pub fn to_vec(&self) -> Vec<AxisRef> {
        self.iter().cloned().collect()
    }

    /// Returns `true` if any axis of this sequence overlaps `axis`.
    pub fn overlaps_axis(&self, axis: &AxisRef) -> bool {
        self.iter().any(|own_axis| own_axis.overlaps(axis))
    }

    /// Returns `true` if any axis of this sequence overlaps any axis of `other`.
    pub fn overlaps(&self, other: &AxesWithTail<'_>) -> bool {
        other.iter().any(|axis| self.overlaps_axis(axis))
    }

    /// Returns `true` if this sequence is a strict prefix of `other`.
    ///
    /// All axes except the last one must match `other` exactly. The last axis must either be a prefix of the
    /// corresponding axis of `other` (when `other` is longer) or a strict prefix of the tail of `other` (when both
    /// have the same length). For example, `["x"]` and `["x", "y":(1)2]` are strict prefixes of `["x", "y"]`.
    pub fn strict_prefix_of(&self, other: &AxesWithTail<'_>) -> bool {
        let Some(tail) = self.tail else {
            return !other.is_empty();
        };
        if self.size() > other.size() {
            return false;
        }
        if self.prefix.iter().zip(other.prefix).any(|(lhs, rhs)| lhs != rhs) {
            return false;
        }
        if self.size() == other.size() {
            return other.tail.is_some_and(|other_tail| tail.strict_prefix_of(other_tail));
        }
        tail.prefix_of(&other.prefix[self.prefix.len()])
    }

    /// Product of the sizes of the axes of this sequence (`1` for the empty sequence).
    pub fn sharding_size(&self, mesh: &Mesh) -> usize {
        self.iter().map(|axis| axis.size(mesh)).product()
    }

    /// Sharding size of this sequence beyond `prefix`, which must be a prefix of this sequence.
    pub fn sharding_size_excluding(&self, mesh: &Mesh, prefix: &AxesWithTail<'_>) -> usize {
        self.sharding_size(mesh) / prefix.sharding_size(mesh)
    }
}

impl PartialOrd for AxesWithTail<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AxesWithTail<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.size()
            .cmp(&other.size())
            .then_with(|| self.prefix.cmp(other.prefix))
            .then_with(|| self.tail.cmp(&other.tail))
    }
}

impl Display for AxesWithTail<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("[")?;
        for (index, axis) in self.iter().enumerate() {
            if index > 0 {
                formatter.write_str(", ")?;
            }
            write!(formatter, "{axis}")?;
        }
        formatter.write_str("]")
    }
}

/// Axis sequence proposed for a factor. Ordered by factor index first and then by axes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FactorAxesPair<'a> {
    pub factor_index: usize,
    pub axes: AxesWithTail<'a>,
}

impl<'a> FactorAxesPair<'a> {
    pub fn new(factor_index: usize, axes: AxesWithTail<'a>) -> Self {
        Self { factor_index, axes }
    }

    /// Returns `true` if the axes of this pair overlap the axes of `other`, regardless of their factors.
    pub fn overlaps(&self, other: &FactorAxesPair<'_>) -> bool {
        self.axes.overlaps(&other.axes)
    }
}

impl Display for FactorAxesPair<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "#{} -> {}", self.factor_index, self.axes)
    }
}
