use serde::{Deserialize, Serialize};

/// One acquisition frame as seen by the host.
///
/// A frame that failed its checksum is still reported, with every field set to
/// [`Sample::SENTINEL`], so batches keep their length and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sample {
    /// Frame counter assigned by the driver since the last `start()`.
    pub index: u32,
    /// Horizontal EOG channel magnitude (10-bit ADC value).
    pub horizontal: u32,
    /// Vertical EOG channel magnitude (10-bit ADC value).
    pub vertical: u32,
}

impl Sample {
    /// Marker written to all fields of a frame whose checksum did not match.
    pub const SENTINEL: u32 = 0xFFFF_FFFF;

    pub const INVALID: Sample = Sample {
        index: Self::SENTINEL,
        horizontal: Self::SENTINEL,
        vertical: Self::SENTINEL,
    };

    #[inline]
    pub fn new(index: u32, horizontal: u32, vertical: u32) -> Self {
        Self {
            index,
            horizontal,
            vertical,
        }
    }

    /// False when this sample is the checksum-failure marker.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_marker() {
        assert!(!Sample::INVALID.is_valid());
        assert!(Sample::new(0, 512, 512).is_valid());
        assert_eq!(Sample::INVALID.index, 0xFFFF_FFFF);
        assert_eq!(Sample::INVALID.horizontal, 0xFFFF_FFFF);
        assert_eq!(Sample::INVALID.vertical, 0xFFFF_FFFF);
    }

    #[test]
    fn serializes_field_names() {
        let json = serde_json::to_value(Sample::new(7, 512, 300)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "index": 7, "horizontal": 512, "vertical": 300 })
        );
        assert_eq!(
            serde_json::from_value::<Sample>(json).unwrap(),
            Sample::new(7, 512, 300)
        );
    }
}
