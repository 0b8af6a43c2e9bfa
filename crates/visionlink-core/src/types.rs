use crate::{
    Result,
    constants::{STATUS_DONE, STATUS_IDLE, STATUS_TRIGGERED},
    error::Error,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Clamp an arbitrary integer into the signed 16-bit register range.
///
/// # Examples
///
/// ```
/// use visionlink_core::clamp_word;
///
/// assert_eq!(clamp_word(40_000), i16::MAX);
/// assert_eq!(clamp_word(-40_000), i16::MIN);
/// assert_eq!(clamp_word(7), 7);
/// ```
#[must_use]
pub fn clamp_word(value: i64) -> i16 {
    value.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16
}

/// Meaning of the status/trigger word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    /// Controller idle; the next cycle is armed.
    Idle,
    /// Controller asserts a part is in position.
    Triggered,
    /// Station completed the cycle; the result word is valid.
    Done,
}

impl TriggerStatus {
    /// Interpret a raw status word.
    ///
    /// # Errors
    /// Returns `Error::UnknownStatus` for values outside the protocol.
    pub fn from_word(word: i16) -> Result<Self> {
        match word {
            STATUS_IDLE => Ok(Self::Idle),
            STATUS_TRIGGERED => Ok(Self::Triggered),
            STATUS_DONE => Ok(Self::Done),
            other => Err(Error::UnknownStatus(other)),
        }
    }

    /// The raw word written to or read from the register.
    #[must_use]
    pub fn as_word(&self) -> i16 {
        match self {
            Self::Idle => STATUS_IDLE,
            Self::Triggered => STATUS_TRIGGERED,
            Self::Done => STATUS_DONE,
        }
    }
}

impl fmt::Display for TriggerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Triggered => write!(f, "triggered"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// 1-based class identifier as written to the result register.
///
/// Detector adapters that produce zero-based class indices must convert them
/// with [`ClassId::from_index`]; nothing else in the workspace adds or
/// subtracts one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct ClassId(u16);

impl ClassId {
    /// Largest id that still fits into a signed register word.
    pub const MAX: u16 = i16::MAX as u16;

    /// Create a class id from its register value.
    ///
    /// # Errors
    /// Returns `Error::InvalidClassId` when `id` is 0 or does not fit into a
    /// signed 16-bit register.
    pub fn new(id: u16) -> Result<Self> {
        if id == 0 || id > Self::MAX {
            return Err(Error::InvalidClassId(format!(
                "class id must be 1-{}, got {id}",
                Self::MAX
            )));
        }
        Ok(Self(id))
    }

    /// Translate a zero-based detector class index into a register class id.
    ///
    /// # Errors
    /// Returns `Error::InvalidClassId` when the index is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use visionlink_core::ClassId;
    ///
    /// assert_eq!(ClassId::from_index(0).unwrap().get(), 1);
    /// assert_eq!(ClassId::from_index(3).unwrap().get(), 4);
    /// ```
    pub fn from_index(index: usize) -> Result<Self> {
        let id = index
            .checked_add(1)
            .and_then(|id| u16::try_from(id).ok())
            .ok_or_else(|| Error::InvalidClassId(format!("class index {index} out of range")))?;
        Self::new(id)
    }

    /// The raw 1-based id.
    #[must_use]
    pub fn get(&self) -> u16 {
        self.0
    }

    /// Zero-based index, for looking up names in a catalog.
    #[must_use]
    pub fn index(&self) -> usize {
        usize::from(self.0 - 1)
    }

    /// The value written into the result register.
    #[must_use]
    pub fn as_word(&self) -> i16 {
        clamp_word(i64::from(self.0))
    }
}

impl TryFrom<u16> for ClassId {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ClassId> for u16 {
    fn from(id: ClassId) -> Self {
        id.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Axis-aligned box in frame pixel coordinates: `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Create a box, requiring finite coordinates with `x1 <= x2` and `y1 <= y2`.
    ///
    /// # Errors
    /// Returns `Error::InvalidBoundingBox` when the corners are inverted or
    /// not finite.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self> {
        let finite = [x1, y1, x2, y2].iter().all(|v| v.is_finite());
        if !finite || x1 > x2 || y1 > y2 {
            return Err(Error::InvalidBoundingBox(format!(
                "[{x1}, {y1}, {x2}, {y2}]"
            )));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    #[must_use]
    pub fn as_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

impl TryFrom<[f32; 4]> for BoundingBox {
    type Error = Error;

    fn try_from(corners: [f32; 4]) -> Result<Self> {
        Self::new(corners[0], corners[1], corners[2], corners[3])
    }
}

/// One record produced by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: ClassId,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    /// Create a detection record.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfidence` when `confidence` is outside `[0, 1]`
    /// or NaN.
    pub fn new(class_id: ClassId, confidence: f32, bbox: BoundingBox) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::InvalidConfidence(confidence));
        }
        Ok(Self {
            class_id,
            confidence,
            bbox,
        })
    }
}

/// Where a cycle's decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Highest-confidence detection above the floor.
    Detected,
    /// Nothing cleared the floor; the configured default class was used.
    Fallback,
}

/// The single class chosen for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub class_id: ClassId,
    pub source: DecisionSource,
    /// Confidence of the winning detection, absent for fallbacks.
    pub confidence: Option<f32>,
}

impl Decision {
    #[must_use]
    pub fn detected(detection: &Detection) -> Self {
        Self {
            class_id: detection.class_id,
            source: DecisionSource::Detected,
            confidence: Some(detection.confidence),
        }
    }

    #[must_use]
    pub fn fallback(class_id: ClassId) -> Self {
        Self {
            class_id,
            source: DecisionSource::Fallback,
            confidence: None,
        }
    }

    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.source == DecisionSource::Fallback
    }
}

/// An image handed from a frame source to a detector.
///
/// The station never looks inside `data`; it only moves frames between
/// collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Create a frame stamped with the current time.
    ///
    /// # Errors
    /// Returns `Error::InvalidFrame` when either dimension is zero.
    pub fn new(width: u32, height: u32, data: impl Into<Bytes>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidFrame(format!(
                "dimensions must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            data: data.into(),
            captured_at: Utc::now(),
        })
    }

    /// A zero-filled 8-bit RGB frame of the given size.
    ///
    /// # Errors
    /// Returns `Error::InvalidFrame` when either dimension is zero.
    pub fn blank(width: u32, height: u32) -> Result<Self> {
        let len = width as usize * height as usize * 3;
        Self::new(width, height, vec![0u8; len])
    }
}
