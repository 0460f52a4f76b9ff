//! Rectangle-list regions for damage, clipping and transformed shapes
//!
//! Rectangles inside a `Region` never overlap. This keeps `area()` exact and
//! lets the XRender backend pass the list straight to
//! `SetPictureClipRectangles` / `CreateRegion`.

use super::window_state::Geometry;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    rects: Vec<Geometry>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Geometry) -> Self {
        let mut region = Self::new();
        if !rect.is_empty() {
            region.rects.push(rect);
        }
        region
    }

    pub fn from_rects(rects: impl IntoIterator<Item = Geometry>) -> Self {
        let mut region = Self::new();
        for rect in rects {
            region.add_rect(rect);
        }
        region
    }

    pub fn rects(&self) -> &[Geometry] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Number of pixels covered
    pub fn area(&self) -> u64 {
        self.rects
            .iter()
            .map(|r| r.width as u64 * r.height as u64)
            .sum()
    }

    pub fn bounding_rect(&self) -> Option<Geometry> {
        let first = self.rects.first()?;
        let (mut x1, mut y1, mut x2, mut y2) = (first.x, first.y, first.right(), first.bottom());
        for r in &self.rects[1..] {
            x1 = x1.min(r.x);
            y1 = y1.min(r.y);
            x2 = x2.max(r.right());
            y2 = y2.max(r.bottom());
        }
        Some(Geometry::new(x1, y1, (x2 - x1) as u32, (y2 - y1) as u32))
    }

    pub fn add_rect(&mut self, rect: Geometry) {
        if rect.is_empty() {
            return;
        }
        let mut pieces = vec![rect];
        for existing in &self.rects {
            pieces = pieces
                .into_iter()
                .flat_map(|piece| subtract_rect(&piece, existing))
                .collect();
            if pieces.is_empty() {
                return;
            }
        }
        self.rects.extend(pieces);
    }

    pub fn union(&self, other: &Region) -> Region {
        let mut result = self.clone();
        for rect in &other.rects {
            result.add_rect(*rect);
        }
        result
    }

    pub fn intersect(&self, other: &Region) -> Region {
        let rects = self
            .rects
            .iter()
            .flat_map(|a| other.rects.iter().filter_map(move |b| a.intersect(b)))
            .collect();
        Region { rects }
    }

    pub fn intersect_rect(&self, rect: &Geometry) -> Region {
        Region {
            rects: self.rects.iter().filter_map(|r| r.intersect(rect)).collect(),
        }
    }

    pub fn subtract(&self, other: &Region) -> Region {
        let mut rects = self.rects.clone();
        for hole in &other.rects {
            rects = rects
                .into_iter()
                .flat_map(|r| subtract_rect(&r, hole))
                .collect();
        }
        Region { rects }
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Region {
        Region {
            rects: self
                .rects
                .iter()
                .map(|r| Geometry::new(r.x + dx, r.y + dy, r.width, r.height))
                .collect(),
        }
    }

    /// Scale about the origin, rounding outwards so the result covers every
    /// pixel the scaled content touches
    pub fn scaled(&self, factor: f32) -> Region {
        if factor == 1.0 {
            return self.clone();
        }
        Region::from_rects(self.rects.iter().map(|r| scale_rect(r, factor)))
    }
}

fn scale_rect(r: &Geometry, factor: f32) -> Geometry {
    let x1 = (r.x as f32 * factor).floor() as i32;
    let y1 = (r.y as f32 * factor).floor() as i32;
    let x2 = (r.right() as f32 * factor).ceil() as i32;
    let y2 = (r.bottom() as f32 * factor).ceil() as i32;
    Geometry::new(x1, y1, (x2 - x1).max(0) as u32, (y2 - y1).max(0) as u32)
}

/// `a` minus `b` as up to four non-overlapping bands
fn subtract_rect(a: &Geometry, b: &Geometry) -> Vec<Geometry> {
    let Some(hole) = a.intersect(b) else {
        return vec![*a];
    };
    let mut out = Vec::with_capacity(4);
    if hole.y > a.y {
        out.push(Geometry::new(a.x, a.y, a.width, (hole.y - a.y) as u32));
    }
    if hole.bottom() < a.bottom() {
        out.push(Geometry::new(a.x, hole.bottom(), a.width, (a.bottom() - hole.bottom()) as u32));
    }
    if hole.x > a.x {
        out.push(Geometry::new(a.x, hole.y, (hole.x - a.x) as u32, hole.height));
    }
    if hole.right() < a.right() {
        out.push(Geometry::new(hole.right(), hole.y, (a.right() - hole.right()) as u32, hole.height));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_does_not_double_count() {
        let a = Region::from_rect(Geometry::new(0, 0, 10, 10));
        let b = Region::from_rect(Geometry::new(5, 5, 10, 10));
        let u = a.union(&b);
        assert_eq!(u.area(), 100 + 100 - 25);
        assert_eq!(u.bounding_rect(), Some(Geometry::new(0, 0, 15, 15)));
    }

    #[test]
    fn test_subtract_hole() {
        let screen = Region::from_rect(Geometry::new(0, 0, 100, 100));
        let window = Region::from_rect(Geometry::new(25, 25, 50, 50));
        let rest = screen.subtract(&window);
        assert_eq!(rest.area(), 100 * 100 - 50 * 50);
        assert!(rest.intersect(&window).is_empty());
    }

    #[test]
    fn test_intersect_and_empty() {
        let a = Region::from_rect(Geometry::new(0, 0, 10, 10));
        let b = Region::from_rect(Geometry::new(20, 20, 10, 10));
        assert!(a.intersect(&b).is_empty());
        assert!(Region::from_rect(Geometry::new(0, 0, 0, 10)).is_empty());
    }

    #[test]
    fn test_scaled_and_translated() {
        let r = Region::from_rect(Geometry::new(10, 10, 10, 10));
        assert_eq!(r.scaled(2.0).rects(), &[Geometry::new(20, 20, 20, 20)]);
        assert_eq!(r.translated(-10, 5).rects(), &[Geometry::new(0, 15, 10, 10)]);
    }
}
