//! Test doubles and fixtures shared by unit and behaviour tests.

use std::cell::RefCell;
use std::time::Duration;

use geo::{Coord, Geometry, Rect};

use crate::{AttributeValue, Attributes, FeatureId, FeatureRecord, Pause};

/// [`Pause`] that records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingPause {
    delays: RefCell<Vec<Duration>>,
}

impl RecordingPause {
    /// Delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.borrow().clone()
    }
}

impl Pause for RecordingPause {
    fn pause(&self, delay: Duration) {
        self.delays.borrow_mut().push(delay);
    }
}

/// Axis-aligned square with its lower-left corner at `(x, y)`.
pub fn square(x: f64, y: f64, side: f64) -> Geometry<f64> {
    Geometry::Polygon(Rect::new(Coord { x, y }, Coord { x: x + side, y: y + side }).to_polygon())
}

/// Record with a square geometry and the given attributes.
///
/// # Panics
///
/// Panics when `id` is empty.
pub fn record(id: &str, attributes: Vec<(&str, AttributeValue)>) -> FeatureRecord {
    FeatureRecord {
        id: FeatureId::new(id).expect("fixture ids are non-empty"),
        attributes: attributes
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect::<Attributes>(),
        geometry: square(-50.0, -10.0, 0.1),
    }
}
