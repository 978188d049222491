use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Axis-aligned box in pixel coordinates.
///
/// Serialized as a `[x, y, w, h]` array; downstream log consumers expect
/// that layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }
}

impl Serialize for BoundingBox {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.x, self.y, self.w, self.h].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BoundingBox {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parts = <Vec<i32>>::deserialize(deserializer)?;
        let [x, y, w, h]: [i32; 4] = parts
            .try_into()
            .map_err(|_| D::Error::custom("bounding box must be a [x, y, w, h] array"))?;
        Ok(Self { x, y, w, h })
    }
}

/// One person detection, unified across backends.
///
/// Coordinates are in whatever space the producer documents: the engine
/// returns model-input space, and callers rescale to frame space before
/// use (see `DetectionEngine::rescale_to_frame`).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Confidence in [0, 1].
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_serializes_as_array() {
        let bbox = BoundingBox::new(10, 20, 30, 40);
        let json = serde_json::to_string(&bbox).unwrap();
        assert_eq!(json, "[10,20,30,40]");

        let back: BoundingBox = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bbox);
    }

    #[test]
    fn bbox_rejects_wrong_arity() {
        assert!(serde_json::from_str::<BoundingBox>("[1,2,3]").is_err());
    }
}
