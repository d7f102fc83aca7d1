//! Frame formats and capability sets for sink-side negotiation.
//!
//! A sink publishes a [`CapabilitySet`]: an ordered list of
//! [`FrameCaps`] entries, each coupling pixel-format/size constraints
//! with the [`MemoryLayout`] those constraints apply to. Producers
//! intersect their own caps against it and send back a concrete,
//! fully-fixed capability set in the allocation query.
//!
//! # Design Principles
//!
//! - **Type safety**: enums instead of stringly-typed formats
//! - **Memory is part of the format**: each capability entry carries its
//!   memory layout, so "RGBA in system memory" and "RGBA as an opaque
//!   producer buffer" are distinct, non-intersecting entries
//! - **Preference order**: earlier entries in a set are preferred;
//!   intersection preserves the ordering of the set it is called on

use smallvec::SmallVec;

// ============================================================================
// CapsValue - constraint value for negotiation
// ============================================================================

/// A constraint on one format parameter: fixed, range, list, or any.
///
/// Supports intersection (finding common ground) and fixation
/// (choosing a single value).
#[derive(Clone, Debug, PartialEq, Default)]
pub enum CapsValue<T> {
    /// Exact value (fully constrained).
    Fixed(T),
    /// Range of acceptable values (inclusive).
    Range {
        /// Minimum acceptable value.
        min: T,
        /// Maximum acceptable value.
        max: T,
    },
    /// List of acceptable values, ordered by preference.
    List(Vec<T>),
    /// Any value accepted (unconstrained).
    #[default]
    Any,
}

impl<T: Clone + Ord> CapsValue<T> {
    /// Check if a value satisfies this constraint.
    pub fn accepts(&self, value: &T) -> bool {
        match self {
            Self::Fixed(v) => v == value,
            Self::Range { min, max } => value >= min && value <= max,
            Self::List(values) => values.contains(value),
            Self::Any => true,
        }
    }

    /// Intersect two constraints, finding the common values.
    ///
    /// Returns `None` if there is no overlap. List results preserve the
    /// order of `self`.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Any, other) => Some(other.clone()),
            (this, Self::Any) => Some(this.clone()),

            (Self::Fixed(a), Self::Fixed(b)) => (a == b).then(|| Self::Fixed(a.clone())),

            (Self::Fixed(v), Self::Range { min, max })
            | (Self::Range { min, max }, Self::Fixed(v)) => {
                (v >= min && v <= max).then(|| Self::Fixed(v.clone()))
            }

            (Self::Fixed(v), Self::List(list)) | (Self::List(list), Self::Fixed(v)) => {
                list.contains(v).then(|| Self::Fixed(v.clone()))
            }

            (
                Self::Range {
                    min: min1,
                    max: max1,
                },
                Self::Range {
                    min: min2,
                    max: max2,
                },
            ) => {
                let min = min1.max(min2).clone();
                let max = max1.min(max2).clone();
                match min.cmp(&max) {
                    std::cmp::Ordering::Greater => None,
                    std::cmp::Ordering::Equal => Some(Self::Fixed(min)),
                    std::cmp::Ordering::Less => Some(Self::Range { min, max }),
                }
            }

            (Self::Range { min, max }, Self::List(list))
            | (Self::List(list), Self::Range { min, max }) => {
                let common: Vec<T> = list
                    .iter()
                    .filter(|v| *v >= min && *v <= max)
                    .cloned()
                    .collect();
                Self::from_common(common)
            }

            (Self::List(list1), Self::List(list2)) => {
                let common: Vec<T> = list1
                    .iter()
                    .filter(|v| list2.contains(v))
                    .cloned()
                    .collect();
                Self::from_common(common)
            }
        }
    }

    /// Fixate: choose the preferred single value from the constraint.
    ///
    /// Returns the first value of a list, the minimum of a range, and
    /// `None` for `Any`.
    pub fn fixate(&self) -> Option<T> {
        match self {
            Self::Fixed(v) => Some(v.clone()),
            Self::Range { min, .. } => Some(min.clone()),
            Self::List(values) => values.first().cloned(),
            Self::Any => None,
        }
    }

    /// Check if this is a fixed value.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }

    /// Get the fixed value, if fixed.
    #[inline]
    pub fn as_fixed(&self) -> Option<&T> {
        match self {
            Self::Fixed(v) => Some(v),
            _ => None,
        }
    }

    fn from_common(common: Vec<T>) -> Option<Self> {
        match common.len() {
            0 => None,
            1 => Some(Self::Fixed(common.into_iter().next().unwrap())),
            _ => Some(Self::List(common)),
        }
    }
}

impl<T: Clone + Ord> From<T> for CapsValue<T> {
    fn from(value: T) -> Self {
        Self::Fixed(value)
    }
}

// ============================================================================
// Pixel formats and memory layouts
// ============================================================================

/// Pixel formats accepted by the sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PixelFormat {
    /// YUV 4:2:0 semi-planar (Y plane, then interleaved UV plane).
    Nv12,
    /// YUV 4:2:0 semi-planar with swapped chroma (VU plane).
    Nv21,
    /// YUV 4:2:0 planar (Y plane, then V plane, then U plane).
    Yv12,
    /// YUV 4:2:0 planar (Y plane, then U plane, then V plane).
    I420,
    /// RGBA 8-bit per channel, packed.
    Rgba,
    /// BGRA 8-bit per channel, packed.
    Bgra,
    /// Opaque hardware frames; the real layout and size are not visible
    /// to the sink.
    Encoded,
}

impl PixelFormat {
    /// Byte size of one frame at the given dimensions.
    ///
    /// Returns `None` for [`PixelFormat::Encoded`], whose real size is
    /// undefined at this layer.
    pub const fn bytes_for(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            Self::Nv12 | Self::Nv21 | Self::Yv12 | Self::I420 => Some(pixels * 3 / 2),
            Self::Rgba | Self::Bgra => Some(pixels * 4),
            Self::Encoded => None,
        }
    }
}

/// How frame memory is represented on the producer/sink boundary.
///
/// The layout is part of each capability entry: the same pixel format in
/// different layouts is a different capability, and layouts never
/// intersect with each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryLayout {
    /// Opaque producer buffer, handed over one at a time.
    SingleBuffer,
    /// Opaque producer-managed buffer queue with a fixed, producer-dictated
    /// depth. A pool for this layout must not impose its own minimum.
    QueueBuffer,
    /// Generic system memory.
    System,
}

// ============================================================================
// FrameCaps - one capability entry
// ============================================================================

/// One capability entry: format constraints plus the memory layout they
/// apply to.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameCaps {
    /// Pixel format constraint.
    pub pixel: CapsValue<PixelFormat>,
    /// Frame width constraint, in pixels.
    pub width: CapsValue<u32>,
    /// Frame height constraint, in pixels.
    pub height: CapsValue<u32>,
    /// Memory layout this entry applies to.
    pub memory: MemoryLayout,
}

impl FrameCaps {
    /// Entry accepting any format and size in the given layout.
    pub fn any(memory: MemoryLayout) -> Self {
        Self {
            pixel: CapsValue::Any,
            width: CapsValue::Any,
            height: CapsValue::Any,
            memory,
        }
    }

    /// Fully concrete entry.
    pub fn concrete(pixel: PixelFormat, width: u32, height: u32, memory: MemoryLayout) -> Self {
        Self {
            pixel: CapsValue::Fixed(pixel),
            width: CapsValue::Fixed(width),
            height: CapsValue::Fixed(height),
            memory,
        }
    }

    /// Intersect with another entry.
    ///
    /// Entries in different memory layouts never intersect.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        if self.memory != other.memory {
            return None;
        }
        Some(Self {
            pixel: self.pixel.intersect(&other.pixel)?,
            width: self.width.intersect(&other.width)?,
            height: self.height.intersect(&other.height)?,
            memory: self.memory,
        })
    }

    /// Check if every constraint is a fixed value.
    pub fn is_fixed(&self) -> bool {
        self.pixel.is_fixed() && self.width.is_fixed() && self.height.is_fixed()
    }

    /// Parse into a concrete [`FrameInfo`].
    ///
    /// Requires every constraint to be fixed; an entry with remaining
    /// freedom cannot describe the memory of an actual frame.
    pub fn info(&self) -> Option<FrameInfo> {
        Some(FrameInfo {
            pixel: *self.pixel.as_fixed()?,
            width: *self.width.as_fixed()?,
            height: *self.height.as_fixed()?,
            memory: self.memory,
        })
    }
}

// ============================================================================
// CapabilitySet
// ============================================================================

/// An ordered set of capability entries, immutable once published.
///
/// Earlier entries are preferred. Intersection walks `self` in order so
/// the result keeps the declared preference of the set it was called on.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct CapabilitySet(SmallVec<[FrameCaps; 3]>);

impl CapabilitySet {
    /// Create a set from entries, keeping their order.
    pub fn new(entries: impl IntoIterator<Item = FrameCaps>) -> Self {
        Self(entries.into_iter().collect())
    }

    /// Create a set with a single entry.
    pub fn single(entry: FrameCaps) -> Self {
        Self::new([entry])
    }

    /// The entries, in preference order.
    #[inline]
    pub fn entries(&self) -> &[FrameCaps] {
        &self.0
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the set has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append an entry (used when assembling a set before publication).
    pub fn push(&mut self, entry: FrameCaps) {
        self.0.push(entry);
    }

    /// Intersect with another set, preserving `self`'s ordering.
    ///
    /// Each of `self`'s entries contributes its intersections with
    /// `other`'s entries, in order. The result may be empty.
    pub fn intersect(&self, other: &Self) -> Self {
        let mut result = SmallVec::new();
        for ours in &self.0 {
            for theirs in &other.0 {
                if let Some(entry) = ours.intersect(theirs) {
                    result.push(entry);
                }
            }
        }
        Self(result)
    }

    /// Parse the set into a single concrete [`FrameInfo`].
    ///
    /// Succeeds only when the set holds exactly one entry and that entry
    /// is fully fixed.
    pub fn fixate(&self) -> Option<FrameInfo> {
        match self.0.as_slice() {
            [entry] => entry.info(),
            _ => None,
        }
    }
}

impl From<FrameCaps> for CapabilitySet {
    fn from(entry: FrameCaps) -> Self {
        Self::single(entry)
    }
}

// ============================================================================
// FrameInfo - a fully negotiated format
// ============================================================================

/// Frame byte size reported for opaque [`PixelFormat::Encoded`] frames.
///
/// The real size of an opaque hardware frame is undefined at this layer;
/// this placeholder is contractual and consumers key on its exact value.
pub const ENCODED_FRAME_SIZE: usize = 1;

/// A concrete, fully negotiated frame format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    /// Pixel format.
    pub pixel: PixelFormat,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Memory layout on the producer/sink boundary.
    pub memory: MemoryLayout,
}

impl FrameInfo {
    /// Byte size of one frame, or [`ENCODED_FRAME_SIZE`] for opaque
    /// frames.
    pub fn frame_size(&self) -> usize {
        self.pixel
            .bytes_for(self.width, self.height)
            .unwrap_or(ENCODED_FRAME_SIZE)
    }

    /// The caps entry describing exactly this format.
    pub fn to_caps(&self) -> CapabilitySet {
        CapabilitySet::single(FrameCaps::concrete(
            self.pixel,
            self.width,
            self.height,
            self.memory,
        ))
    }
}
