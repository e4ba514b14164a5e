//! Recursive block division into building lots.
//!
//! Each parcel is cut along a line derived from its minimum-area bounding
//! rectangle; cuts that fail to separate anything or produce an undersized
//! child are simply not applied. Heights and the park classification are
//! assigned afterwards from the shared seeded RNG.

use bevy::prelude::*;
use rand::{rngs::StdRng, Rng};

use super::blocks::Parcel;
use super::geometry::Line;
use super::CityConfig;

/// Minimum bounding-rectangle area for a lot to count as valid.
pub const MIN_LOT_AREA: f32 = 10.0;

/// Division stops past this depth.
const MAX_DIVISION_DEPTH: u32 = 6;

/// Parcels with more corners than this are left whole (and become parks).
const MAX_SIMPLE_CORNERS: usize = 10;

/// Consecutive corners closer than this merge after a slice.
const DUPLICATE_DISTANCE: f32 = 1e-3;

/// Smallest-area rectangle, aligned to one of the polygon's edges, that
/// contains all of its corners.
#[derive(Clone, Copy, Debug)]
pub struct BoundingRectangle {
    pub corners: [Vec2; 4],
    edges: [(Vec2, Vec2); 4],
}

impl BoundingRectangle {
    fn new(corners: [Vec2; 4]) -> Self {
        // Pair the corners into edges via the diagonal: the corner furthest
        // from the first one is diagonally opposite.
        let base = corners[0];
        let mut far_index = 0;
        let mut far_distance = 0.0;
        for (index, corner) in corners.iter().enumerate() {
            let distance = base.distance_squared(*corner);
            if distance > far_distance {
                far_distance = distance;
                far_index = index;
            }
        }
        let far_index = if far_index == 0 { 1 } else { far_index };
        let far = corners[far_index];

        let others: Vec<Vec2> = corners
            .iter()
            .enumerate()
            .filter(|&(index, _)| index != 0 && index != far_index)
            .map(|(_, &corner)| corner)
            .collect();

        Self {
            corners,
            edges: [
                (base, others[0]),
                (base, others[1]),
                (far, others[1]),
                (far, others[0]),
            ],
        }
    }

    pub fn area(&self) -> f32 {
        let first = self.edges[0].0.distance(self.edges[0].1);
        let second = self.edges[1].0.distance(self.edges[1].1);
        first * second
    }

    /// The randomized cut: offset along the longer edge pair by a fraction
    /// in {0.3, 0.4, 0.5, 0.6}, with the edge direction as the cut line's
    /// normal, so the cut runs across the long axis.
    pub fn cut_line(&self, rng: &mut StdRng) -> Option<Line> {
        let first = self.edges[0].0.distance(self.edges[0].1);
        let second = self.edges[1].0.distance(self.edges[1].1);
        let (a, b) = if first > second {
            self.edges[0]
        } else {
            self.edges[1]
        };

        let along = b - a;
        let offset = 0.3 + 0.1 * rng.gen_range(0..4) as f32;
        Line::new(a + along * offset, along).ok()
    }
}

/// The tight edge-aligned rectangle over every candidate base edge; `None`
/// for degenerate rings that no orientation can bound.
pub fn min_bounding_rectangle(ring: &[Vec2]) -> Option<BoundingRectangle> {
    if ring.len() < 3 {
        return None;
    }

    let mut best: Option<BoundingRectangle> = None;
    for i in 0..ring.len() {
        let j = (i + 1) % ring.len();
        let Ok(base) = Line::from_points(ring[i], ring[j]) else {
            continue;
        };
        let Some(rect) = bounding_for_direction(&base, ring) else {
            continue;
        };
        if best.map_or(true, |current| rect.area() < current.area()) {
            best = Some(rect);
        }
    }
    best
}

fn bounding_for_direction(base: &Line, ring: &[Vec2]) -> Option<BoundingRectangle> {
    let (side_min, side_max) = min_max_perpendicular(base, ring)?;
    let (lid_min, lid_max) = min_max_perpendicular(&side_min, ring)?;

    Some(BoundingRectangle::new([
        side_min.intersect(&lid_min)?,
        side_min.intersect(&lid_max)?,
        side_max.intersect(&lid_min)?,
        side_max.intersect(&lid_max)?,
    ]))
}

/// Of the perpendiculars to `base` through each corner, the two whose
/// crossings with `base` project furthest apart.
fn min_max_perpendicular(base: &Line, ring: &[Vec2]) -> Option<(Line, Line)> {
    let lines: Vec<Line> = ring
        .iter()
        .map(|&corner| base.perpendicular_through(corner))
        .collect();

    // Compare the coordinate that varies along the base line: x, unless the
    // line is vertical (its direction has normal.y as the x component).
    let key = |point: Vec2| {
        if base.normal.y == 0.0 {
            point.y
        } else {
            point.x
        }
    };

    let first = base.intersect(lines.first()?)?;
    let mut min_value = key(first);
    let mut max_value = min_value;
    let mut min_index = 0;
    let mut max_index = 0;

    for (index, line) in lines.iter().enumerate() {
        let Some(crossing) = base.intersect(line) else {
            continue;
        };
        let value = key(crossing);
        if value < min_value {
            min_value = value;
            min_index = index;
        }
        if value > max_value {
            max_value = value;
            max_index = index;
        }
    }

    Some((lines[min_index], lines[max_index]))
}

/// Why a slice produced nothing usable. All of these leave the parcel
/// undivided; none of them aborts the run.
#[derive(Clone, Copy, Debug)]
enum SliceFailure {
    NoSeparation,
    WrapSwitch,
    ParallelEdge,
    DegenerateEdge,
}

/// Recursively divide every parcel, then assign heights and park flags.
pub fn divide_parcels(parcels: Vec<Parcel>, config: &CityConfig, rng: &mut StdRng) -> Vec<Parcel> {
    info!("dividing {} blocks into lots", parcels.len());

    let mut lots = Vec::new();
    let mut failed_slices = 0usize;
    for parcel in parcels {
        divide(parcel, 1, rng, &mut lots, &mut failed_slices);
    }

    info!(
        "division done: {} lots, {} failed slices left undivided",
        lots.len(),
        failed_slices
    );

    assign_heights(&mut lots, config, rng);
    lots
}

fn divide(
    parcel: Parcel,
    depth: u32,
    rng: &mut StdRng,
    out: &mut Vec<Parcel>,
    failed_slices: &mut usize,
) {
    if depth > MAX_DIVISION_DEPTH || parcel.vertices.len() > MAX_SIMPLE_CORNERS {
        out.push(parcel);
        return;
    }

    let Some(rect) = min_bounding_rectangle(&parcel.vertices) else {
        out.push(parcel);
        return;
    };
    let Some(cut) = rect.cut_line(rng) else {
        out.push(parcel);
        return;
    };

    match slice_ring(&cut, &parcel.vertices) {
        Ok(pieces) if pieces.len() > 1 && pieces.iter().all(|piece| is_valid_lot(piece)) => {
            for piece in pieces {
                let child = Parcel {
                    vertices: piece,
                    height: parcel.height,
                    park: parcel.park,
                };
                divide(child, depth + 1, rng, out, failed_slices);
            }
        }
        Ok(_) => out.push(parcel),
        Err(failure) => {
            debug!("slice failed: {failure:?}");
            *failed_slices += 1;
            out.push(parcel);
        }
    }
}

fn is_valid_lot(ring: &[Vec2]) -> bool {
    min_bounding_rectangle(ring).is_some_and(|rect| rect.area() >= MIN_LOT_AREA)
}

/// Walk the ring once, splitting it at every change of side against the cut
/// line; one sub-polygon per maximal same-side run, the last run closing
/// across the wrap.
fn slice_ring(cut: &Line, ring: &[Vec2]) -> Result<Vec<Vec<Vec2>>, SliceFailure> {
    let n = ring.len();
    let mut pieces: Vec<Vec<Vec2>> = Vec::new();

    let mut on_right = cut.is_right_side(ring[0]);
    let mut first_switch: Option<usize> = None;
    let mut first_point = Vec2::ZERO;
    let mut last_switch = 0usize;
    let mut last_point = Vec2::ZERO;

    for i in 0..n {
        let next_index = (i + 1) % n;
        let next_on_right = cut.is_right_side(ring[next_index]);
        if next_on_right == on_right {
            continue;
        }

        let edge = Line::from_points(ring[i], ring[next_index])
            .map_err(|_| SliceFailure::DegenerateEdge)?;
        let Some(crossing) = cut.intersect(&edge) else {
            return Err(SliceFailure::ParallelEdge);
        };

        if first_switch.is_none() {
            if i == n - 1 {
                // A lone switch on the wrap edge cannot anchor a run.
                return Err(SliceFailure::WrapSwitch);
            }
            first_switch = Some(next_index);
            first_point = crossing;
        } else {
            let mut piece: Vec<Vec2> = ring[last_switch..=i].to_vec();
            piece.push(crossing);
            piece.push(last_point);
            pieces.push(piece);
        }

        last_switch = next_index;
        last_point = crossing;
        on_right = next_on_right;
    }

    let Some(first_switch) = first_switch else {
        return Err(SliceFailure::NoSeparation);
    };
    if pieces.is_empty() {
        return Err(SliceFailure::NoSeparation);
    }

    // Close the final run across the wrap.
    let mut last_piece: Vec<Vec2> = Vec::new();
    if last_switch != 0 {
        last_piece.extend_from_slice(&ring[last_switch..]);
    }
    last_piece.extend_from_slice(&ring[..first_switch]);
    last_piece.push(first_point);
    last_piece.push(last_point);
    pieces.push(last_piece);

    for piece in &mut pieces {
        merge_duplicate_corners(piece);
    }
    Ok(pieces)
}

/// Drop corners that coincide with their successor (including the wrap
/// pair); slicing through a vertex produces them.
fn merge_duplicate_corners(ring: &mut Vec<Vec2>) {
    let n = ring.len();
    if n < 2 {
        return;
    }
    let keep: Vec<bool> = (0..n)
        .map(|i| ring[i].distance_squared(ring[(i + 1) % n]) >= DUPLICATE_DISTANCE * DUPLICATE_DISTANCE)
        .collect();
    let mut index = 0;
    ring.retain(|_| {
        let kept = keep[index];
        index += 1;
        kept
    });
}

/// Randomized building heights with the scale-down cascade: tall results
/// usually halve, lots outside the central third of the map halve again,
/// and oversized rings flatten into parks at the base height.
pub fn assign_heights(lots: &mut [Parcel], config: &CityConfig, rng: &mut StdRng) {
    let border = config.map_size as f32;

    for lot in lots.iter_mut() {
        let Some(&anchor) = lot.vertices.first() else {
            continue;
        };

        let mut height =
            rng.gen::<f32>() * config.max_building_height + config.min_building_height;

        if height > config.max_building_height / 2.0 && rng.gen_range(0..10) != 2 {
            height /= 2.0;
        }
        if border - anchor.x.abs() < 2.0 * border / 3.0
            || border - anchor.y.abs() < 2.0 * border / 3.0
        {
            height /= 2.0;
        }
        if height < config.min_building_height {
            height += config.min_building_height;
        }

        if lot.vertices.len() > MAX_SIMPLE_CORNERS {
            height = config.block_height;
            lot.park = true;
        }

        lot.height = height;
    }
}
