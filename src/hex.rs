//! Axial hex coordinate math, pointy-top layout.

use serde::{Deserialize, Serialize};

use crate::error::WorldError;

/// The six axial unit vectors, pointy-top layout.
pub const NEIGHBOR_OFFSETS: [(i32, i32); 6] =
    [(1, 0), (1, -1), (0, -1), (-1, 0), (-1, 1), (0, 1)];

/// Axial coordinate on the infinite hex grid. `s = -q - r` is implicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Axial {
    pub q: i32,
    pub r: i32,
}

impl Axial {
    pub fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    /// Validate wire-shaped coordinates into an `Axial`.
    ///
    /// Rejects non-finite and fractional values, then runs the projected
    /// pixel round-trip as a guard against silent float ingestion.
    pub fn from_f64(q: f64, r: f64) -> Result<Self, WorldError> {
        if !q.is_finite() || !r.is_finite() || q.fract() != 0.0 || r.fract() != 0.0 {
            return Err(WorldError::invalid(format!(
                "coordinates must be integers, got ({q}, {r})"
            )));
        }
        if q.abs() > i32::MAX as f64 || r.abs() > i32::MAX as f64 {
            return Err(WorldError::invalid(format!(
                "coordinates out of range: ({q}, {r})"
            )));
        }
        let axial = Axial::new(q as i32, r as i32);
        let (px, py) = hex_to_pixel(axial, 1.0)?;
        if pixel_to_hex(px, py, 1.0)? != axial {
            return Err(WorldError::invalid(format!(
                "coordinates failed projection round-trip: ({q}, {r})"
            )));
        }
        Ok(axial)
    }

    /// All six neighbors.
    pub fn neighbors(&self) -> [Axial; 6] {
        NEIGHBOR_OFFSETS.map(|(dq, dr)| Axial::new(self.q + dq, self.r + dr))
    }

    /// Hex distance: `(|dq| + |dr| + |dq + dr|) / 2`.
    pub fn distance(&self, other: Axial) -> u32 {
        let dq = (self.q as i64 - other.q as i64).abs();
        let dr = (self.r as i64 - other.r as i64).abs();
        let ds = (self.q as i64 + self.r as i64 - other.q as i64 - other.r as i64).abs();
        ((dq + dr + ds) / 2) as u32
    }
}

fn check_size(size: f64) -> Result<(), WorldError> {
    if !size.is_finite() || size <= 0.0 {
        return Err(WorldError::invalid(format!(
            "hex size must be finite and positive, got {size}"
        )));
    }
    Ok(())
}

/// Axial to pixel center, pointy-top: `x = s·√3·(q + r/2)`, `y = s·1.5·r`.
pub fn hex_to_pixel(axial: Axial, size: f64) -> Result<(f64, f64), WorldError> {
    check_size(size)?;
    let q = axial.q as f64;
    let r = axial.r as f64;
    let x = size * 3f64.sqrt() * (q + r / 2.0);
    let y = size * 1.5 * r;
    Ok((x, y))
}

/// Pixel to the containing hex: axial inverse followed by cube rounding.
pub fn pixel_to_hex(x: f64, y: f64, size: f64) -> Result<Axial, WorldError> {
    check_size(size)?;
    let q = (3f64.sqrt() / 3.0 * x - y / 3.0) / size;
    let r = (2.0 / 3.0 * y) / size;
    Ok(cube_round(q, r))
}

/// Round fractional axial coordinates to the nearest hex, fixing up the
/// component with the largest rounding error so `q + r + s == 0` holds.
fn cube_round(qf: f64, rf: f64) -> Axial {
    let sf = -qf - rf;
    let mut q = qf.round();
    let mut r = rf.round();
    let s = sf.round();

    let dq = (q - qf).abs();
    let dr = (r - rf).abs();
    let ds = (s - sf).abs();

    if dq > dr && dq > ds {
        q = -r - s;
    } else if dr > ds {
        r = -q - s;
    }
    Axial::new(q as i32, r as i32)
}
