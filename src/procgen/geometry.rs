//! Shared 2D geometry for road, block, and lot construction.
//!
//! Lines are kept in point + normal form so that intersections reduce to a
//! 2x2 linear solve and side tests to a cross product sign.

use bevy::prelude::*;
use rand::{rngs::StdRng, Rng};
use std::f32::consts::PI;

use super::GenerationError;

/// Tolerance below which a cross product counts as collinear.
pub const SIDE_EPSILON: f32 = 1e-5;

/// A line in point + normal form.
#[derive(Clone, Copy, Debug)]
pub struct Line {
    pub base: Vec2,
    pub normal: Vec2,
}

impl Line {
    pub fn new(base: Vec2, normal: Vec2) -> Result<Self, GenerationError> {
        if normal.length_squared() == 0.0 {
            return Err(GenerationError::ZeroNormal { base });
        }
        Ok(Self { base, normal })
    }

    /// Line through `p` and `q`; the normal is the perpendicular of p -> q.
    pub fn from_points(p: Vec2, q: Vec2) -> Result<Self, GenerationError> {
        let normal = perpendicular(q - p);
        if normal.length_squared() == 0.0 {
            return Err(GenerationError::DegenerateLine { p, q });
        }
        Ok(Self { base: p, normal })
    }

    /// The perpendicular line through `point`.
    pub fn perpendicular_through(&self, point: Vec2) -> Line {
        Line {
            base: point,
            normal: perpendicular(self.normal),
        }
    }

    /// Solves the two normal-form equations. `None` means the lines are
    /// parallel or collinear, which callers treat as a legitimate outcome.
    pub fn intersect(&self, other: &Line) -> Option<Vec2> {
        let (a1, b1) = (self.normal.x, self.normal.y);
        let (a2, b2) = (other.normal.x, other.normal.y);
        let c1 = a1 * self.base.x + b1 * self.base.y;
        let c2 = a2 * other.base.x + b2 * other.base.y;

        let determinant = a1 * b2 - a2 * b1;
        if determinant == 0.0 {
            return None;
        }
        Some(Vec2::new(
            (b2 * c1 - b1 * c2) / determinant,
            (a1 * c2 - a2 * c1) / determinant,
        ))
    }

    /// Which half-plane `point` falls in, relative to the line's direction.
    pub fn is_right_side(&self, point: Vec2) -> bool {
        let other = self.base + perpendicular(self.normal);
        let cross = (self.base.y - other.y) * (point.x - other.x)
            - (self.base.x - other.x) * (point.y - other.y);
        cross > 0.0
    }
}

/// Clockwise perpendicular of a direction vector.
pub fn perpendicular(dir: Vec2) -> Vec2 {
    Vec2::new(dir.y, -dir.x)
}

/// Sign of the cross product of (a - p) and (b - p): 1 clockwise,
/// -1 counter-clockwise, 0 collinear within [`SIDE_EPSILON`].
pub fn side_of(a: Vec2, b: Vec2, p: Vec2) -> i32 {
    let val = (a.y - p.y) * (b.x - p.x) - (a.x - p.x) * (b.y - p.y);
    if val > SIDE_EPSILON {
        1
    } else if val < -SIDE_EPSILON {
        -1
    } else {
        0
    }
}

/// Proper segment crossing test. Endpoint identity exemptions are the
/// caller's business; collinear overlap counts as a crossing.
pub fn segments_cross(a1: Vec2, a2: Vec2, b1: Vec2, b2: Vec2) -> bool {
    let o1 = side_of(a1, a2, b2);
    let o2 = side_of(a1, a2, b1);
    let o3 = side_of(b1, b2, a1);
    let o4 = side_of(b1, b2, a2);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    // Collinear segments still overlap when an endpoint lies inside the other.
    if o1 == 0 && o2 == 0 && o3 == 0 && o4 == 0 {
        return envelope_contains(a1, a2, b2)
            || envelope_contains(a1, a2, b1)
            || envelope_contains(b1, b2, a1)
            || envelope_contains(b1, b2, a2);
    }

    false
}

fn envelope_contains(a: Vec2, b: Vec2, p: Vec2) -> bool {
    p.x <= a.x.max(b.x) && p.x >= a.x.min(b.x) && p.y <= a.y.max(b.y) && p.y >= a.y.min(b.y)
}

/// Signed shoelace area; positive for counter-clockwise rings.
pub fn polygon_area(ring: &[Vec2]) -> f32 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut doubled = 0.0;
    for i in 0..ring.len() {
        let j = (i + 1) % ring.len();
        doubled += ring[i].x * ring[j].y - ring[j].x * ring[i].y;
    }
    doubled / 2.0
}

pub fn is_counter_clockwise(ring: &[Vec2]) -> bool {
    polygon_area(ring) > 0.0
}

/// True circular difference between two angles, in [0, PI].
pub fn radian_difference(rad1: f32, rad2: f32) -> f32 {
    let mut r1 = rad1;
    let mut r2 = rad2;
    while r1 < -PI {
        r1 += 2.0 * PI;
    }
    while r1 > PI {
        r1 -= 2.0 * PI;
    }
    while r2 < -PI {
        r2 += 2.0 * PI;
    }
    while r2 > PI {
        r2 -= 2.0 * PI;
    }

    if r1 < r2 {
        std::mem::swap(&mut r1, &mut r2);
    }
    let wrapped = r2 + 2.0 * PI - r1;
    if wrapped < r1 - r2 {
        wrapped
    } else {
        r1 - r2
    }
}

/// Bisector of two directions, flipped onto whichever side sits closer to
/// `rad2` so the midpoint of wrapped angle pairs comes out right.
pub fn average_radian(rad1: f32, rad2: f32) -> f32 {
    let mid = (rad1 + rad2) / 2.0;
    if radian_difference(mid, rad2) > radian_difference(mid + PI, rad2) {
        mid + PI
    } else {
        mid
    }
}

pub fn angle_of(dir: Vec2) -> f32 {
    dir.y.atan2(dir.x)
}

pub fn rotate(dir: Vec2, angle: f32) -> Vec2 {
    Vec2::from_angle(angle).rotate(dir)
}

/// Uniform whole-degree angle in [a, b), returned in radians. The bounds may
/// arrive reversed; an empty range collapses to `a`.
pub fn random_angle_radians(rng: &mut StdRng, a: i32, b: i32) -> f32 {
    let (a, b) = if b < a { (b, a) } else { (a, b) };
    let range = b - a;
    let degrees = if range == 0 { a } else { rng.gen_range(0..range) + a };
    degrees as f32 * PI / 180.0
}
