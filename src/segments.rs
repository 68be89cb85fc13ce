/*!
 # Strip segments

 A [`Segment`] is an index-offset view over part of a shared strip. Effects
 render into a segment exactly as they would into a full strip.
*/

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::color::Rgbw;
use crate::strip::{SharedStrip, Strip};
use crate::{Error, Result};

/// A `[start, end)` pixel range as configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub start: usize,
    pub end: usize,
}

impl SegmentSpec {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A view over `count` pixels of the parent strip starting at `start`
#[derive(Clone)]
pub struct Segment {
    parent: SharedStrip,
    start: usize,
    count: usize,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("start", &self.start)
            .field("count", &self.count)
            .finish()
    }
}

impl Segment {
    /// Create a segment covering `[start, end)` of the parent
    pub fn new(parent: SharedStrip, start: usize, end: usize) -> Result<Self> {
        if end < start {
            return Err(Error::InvalidSegment(format!(
                "segment cannot end ({end}) before it starts ({start})"
            )));
        }
        if end - start == 0 {
            return Err(Error::InvalidSegment(
                "segment must be longer than 0".to_string(),
            ));
        }

        let available = parent.lock().num_pixels();
        if end > available {
            return Err(Error::InvalidSegment(format!(
                "segment end {end} is past the end of the strip ({available} pixels)"
            )));
        }

        Ok(Self {
            parent,
            start,
            count: end - start,
        })
    }

    /// A segment covering the whole parent strip
    pub fn whole(parent: SharedStrip) -> Result<Self> {
        let count = parent.lock().num_pixels();
        Self::new(parent, 0, count)
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.start + self.count
    }
}

impl Strip for Segment {
    fn begin(&mut self) -> Result<()> {
        self.parent.lock().begin()
    }

    fn num_pixels(&self) -> usize {
        self.count
    }

    fn set_pixel_color(&mut self, index: usize, color: Rgbw) {
        if index < self.count {
            self.parent.lock().set_pixel_color(index + self.start, color);
        }
    }

    fn show(&mut self) -> Result<()> {
        self.parent.lock().show()
    }

    fn set_brightness(&mut self, value: u8) {
        self.parent.lock().set_brightness(value);
    }

    fn brightness(&self) -> u8 {
        self.parent.lock().brightness()
    }
}

/// Owns every segment of one strip, addressed by id
///
/// Ids are assigned from 1 in creation order and never change.
#[derive(Debug)]
pub struct SegmentManager {
    segments: Vec<Segment>,
}

impl SegmentManager {
    /// Build one segment per spec, failing on the first invalid one
    #[instrument(skip(strip))]
    pub fn new(strip: &SharedStrip, specs: &[SegmentSpec]) -> Result<Self> {
        let segments = specs
            .iter()
            .map(|spec| Segment::new(strip.clone(), spec.start, spec.end))
            .collect::<Result<Vec<_>>>()?;

        debug!("Created {} segment(s)", segments.len());
        Ok(Self { segments })
    }

    /// Segment by id, if it exists
    pub fn get(&self, id: usize) -> Option<&Segment> {
        id.checked_sub(1).and_then(|index| self.segments.get(index))
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strip::{share, MemoryStrip};

    fn parent(n: usize) -> (MemoryStrip, SharedStrip) {
        let memory = MemoryStrip::new(n);
        let shared = share(Box::new(memory.clone()));
        (memory, shared)
    }

    #[test]
    fn test_rejects_reversed_and_empty() {
        let (_, strip) = parent(10);
        assert!(matches!(
            Segment::new(strip.clone(), 5, 3),
            Err(Error::InvalidSegment(_))
        ));
        assert!(matches!(
            Segment::new(strip.clone(), 0, 0),
            Err(Error::InvalidSegment(_))
        ));
        assert!(matches!(
            Segment::new(strip, 4, 11),
            Err(Error::InvalidSegment(_))
        ));
    }

    #[test]
    fn test_full_segment_covers_parent() {
        let (memory, strip) = parent(10);
        let mut segment = Segment::new(strip, 0, 10).unwrap();
        assert_eq!(segment.num_pixels(), 10);

        crate::strip::fill(&mut segment, Rgbw::new(1, 2, 3, 0));
        segment.show().unwrap();
        assert!(memory.shown().iter().all(|p| *p == Rgbw::new(1, 2, 3, 0)));
    }

    #[test]
    fn test_offset_and_bounds() {
        let (memory, strip) = parent(6);
        let mut segment = Segment::new(strip, 1, 4).unwrap();
        let red = Rgbw::new(255, 0, 0, 0);

        segment.set_pixel_color(0, red);
        // Past the segment end, must not bleed into the parent
        segment.set_pixel_color(3, red);
        segment.show().unwrap();

        let shown = memory.shown();
        assert_eq!(shown[0], Rgbw::BLACK);
        assert_eq!(shown[1], red);
        assert_eq!(shown[4], Rgbw::BLACK);
    }

    #[test]
    fn test_manager_ids() {
        let (_, strip) = parent(24);
        let manager = SegmentManager::new(
            &strip,
            &[SegmentSpec::new(1, 24), SegmentSpec::new(0, 12)],
        )
        .unwrap();

        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get(1).unwrap().start(), 1);
        assert_eq!(manager.get(2).unwrap().end(), 12);
        assert!(manager.get(0).is_none());
        assert!(manager.get(3).is_none());
    }
}
