//! Surface-distance metrics between two binary masks on an anisotropic voxel grid.
//!
//! Masks are indexed `[slice, row, column]`. Surfaces are the 6-connected border
//! voxels, each weighted by the area of its exposed faces, so that the surface
//! statistics approximate area fractions rather than voxel counts.

use anyhow::{Result, bail};
use ndarray::{Array3, ArrayView3, Axis, Zip, s};

/// Percentile used for the robust Hausdorff distance.
pub const ROBUST_HAUSDORFF_PERCENT: f64 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelSpacing {
    pub row_mm: f64,
    pub column_mm: f64,
    pub slice_mm: f64,
}

impl VoxelSpacing {
    pub fn new(row_mm: f64, column_mm: f64, slice_mm: f64) -> Self {
        Self {
            row_mm,
            column_mm,
            slice_mm,
        }
    }

    /// Spacing per mask axis: `[slice, row, column]`.
    pub fn axes(&self) -> [f64; 3] {
        [self.slice_mm, self.row_mm, self.column_mm]
    }

    pub fn largest(&self) -> f64 {
        self.row_mm.max(self.column_mm).max(self.slice_mm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSample {
    pub distance_mm: f64,
    pub area_mm2: f64,
}

/// Directed border distances in both directions, each sorted by distance.
#[derive(Debug, Clone, Default)]
pub struct SurfaceDistances {
    pub a_to_b: Vec<SurfaceSample>,
    pub b_to_a: Vec<SurfaceSample>,
}

impl SurfaceDistances {
    pub fn robust_hausdorff(&self, percent: f64) -> f64 {
        if self.a_to_b.is_empty() || self.b_to_a.is_empty() {
            return f64::NAN;
        }
        percentile_distance(&self.a_to_b, percent).max(percentile_distance(&self.b_to_a, percent))
    }

    /// Fraction of both surfaces lying within `tolerance_mm` of the other surface.
    pub fn surface_overlap_at_tolerance(&self, tolerance_mm: f64) -> f64 {
        let within = |samples: &[SurfaceSample]| -> f64 {
            samples
                .iter()
                .filter(|sample| sample.distance_mm <= tolerance_mm)
                .map(|sample| sample.area_mm2)
                .sum()
        };
        let total = total_area(&self.a_to_b) + total_area(&self.b_to_a);
        if total <= 0.0 {
            return f64::NAN;
        }
        (within(&self.a_to_b) + within(&self.b_to_a)) / total
    }
}

fn total_area(samples: &[SurfaceSample]) -> f64 {
    samples.iter().map(|sample| sample.area_mm2).sum()
}

/// Smallest distance whose cumulative area fraction reaches `percent`.
fn percentile_distance(sorted: &[SurfaceSample], percent: f64) -> f64 {
    let total = total_area(sorted);
    let target = percent / 100.0;
    let mut cumulative = 0.0;
    for sample in sorted {
        cumulative += sample.area_mm2;
        if cumulative / total >= target {
            return sample.distance_mm;
        }
    }
    sorted.last().map_or(f64::NAN, |sample| sample.distance_mm)
}

fn ensure_same_shape(a: &Array3<bool>, b: &Array3<bool>) -> Result<()> {
    if a.dim() != b.dim() {
        bail!("mask shapes differ: {:?} vs {:?}", a.dim(), b.dim());
    }
    Ok(())
}

pub fn volumetric_dice(a: &Array3<bool>, b: &Array3<bool>) -> Result<f64> {
    ensure_same_shape(a, b)?;

    let mut count_a = 0_usize;
    let mut count_b = 0_usize;
    let mut both = 0_usize;
    Zip::from(a).and(b).for_each(|&x, &y| {
        count_a += usize::from(x);
        count_b += usize::from(y);
        both += usize::from(x && y);
    });

    if count_a + count_b == 0 {
        return Ok(f64::NAN);
    }
    Ok(2.0 * both as f64 / (count_a + count_b) as f64)
}

pub fn compute_surface_distances(
    a: &Array3<bool>,
    b: &Array3<bool>,
    spacing: VoxelSpacing,
) -> Result<SurfaceDistances> {
    ensure_same_shape(a, b)?;

    let Some((lo, hi)) = union_bounds(a, b) else {
        return Ok(SurfaceDistances::default());
    };

    // Every foreground voxel lies inside the bounds, so cropping loses no surface.
    let a = a.slice(s![lo[0]..=hi[0], lo[1]..=hi[1], lo[2]..=hi[2]]);
    let b = b.slice(s![lo[0]..=hi[0], lo[1]..=hi[1], lo[2]..=hi[2]]);
    let axes = spacing.axes();

    let area_a = surface_areas(a, axes);
    let area_b = surface_areas(b, axes);
    let to_a = distance_to_surface(&area_a, axes);
    let to_b = distance_to_surface(&area_b, axes);

    Ok(SurfaceDistances {
        a_to_b: directed(&area_a, &to_b),
        b_to_a: directed(&area_b, &to_a),
    })
}

fn union_bounds(a: &Array3<bool>, b: &Array3<bool>) -> Option<([usize; 3], [usize; 3])> {
    let mut bounds: Option<([usize; 3], [usize; 3])> = None;
    Zip::indexed(a).and(b).for_each(|(i, j, k), &x, &y| {
        if !(x || y) {
            return;
        }
        let idx = [i, j, k];
        match bounds.as_mut() {
            None => bounds = Some((idx, idx)),
            Some((lo, hi)) => {
                for axis in 0..3 {
                    lo[axis] = lo[axis].min(idx[axis]);
                    hi[axis] = hi[axis].max(idx[axis]);
                }
            }
        }
    });
    bounds
}

/// Exposed face area per voxel; zero for interior and background voxels.
fn surface_areas(mask: ArrayView3<bool>, axes: [f64; 3]) -> Array3<f64> {
    let face = [axes[1] * axes[2], axes[0] * axes[2], axes[0] * axes[1]];
    let (d0, d1, d2) = mask.dim();
    let dims = [d0, d1, d2];
    let mut areas = Array3::<f64>::zeros((d0, d1, d2));

    for ((i, j, k), &inside) in mask.indexed_iter() {
        if !inside {
            continue;
        }
        let idx = [i, j, k];
        let mut area = 0.0;
        for axis in 0..3 {
            for step in [-1_isize, 1] {
                let pos = idx[axis] as isize + step;
                let exposed = if pos < 0 || pos as usize >= dims[axis] {
                    true
                } else {
                    let mut neighbour = idx;
                    neighbour[axis] = pos as usize;
                    !mask[neighbour]
                };
                if exposed {
                    area += face[axis];
                }
            }
        }
        areas[[i, j, k]] = area;
    }

    areas
}

/// Euclidean distance from every voxel to the nearest voxel with non-zero area.
fn distance_to_surface(areas: &Array3<f64>, axes: [f64; 3]) -> Array3<f64> {
    let mut field = areas.mapv(|area| if area > 0.0 { 0.0 } else { f64::INFINITY });

    for (axis, &step) in axes.iter().enumerate() {
        for mut lane in field.lanes_mut(Axis(axis)) {
            let squared = squared_distance_1d(&lane.to_vec(), step);
            for (dst, value) in lane.iter_mut().zip(squared) {
                *dst = value;
            }
        }
    }

    field.mapv_inplace(f64::sqrt);
    field
}

/// Felzenszwalb–Huttenlocher lower envelope of parabolas for sample spacing `step`.
fn squared_distance_1d(f: &[f64], step: f64) -> Vec<f64> {
    let n = f.len();
    let mut out = vec![f64::INFINITY; n];
    let position = |index: usize| index as f64 * step;
    let intersection = |p: usize, q: usize| -> f64 {
        let (xp, xq) = (position(p), position(q));
        ((f[q] + xq * xq) - (f[p] + xp * xp)) / (2.0 * (xq - xp))
    };

    let mut vertices: Vec<usize> = Vec::with_capacity(n);
    let mut boundaries: Vec<f64> = Vec::with_capacity(n);
    for q in 0..n {
        if !f[q].is_finite() {
            continue;
        }
        let mut boundary = f64::NEG_INFINITY;
        while let (Some(&p), Some(&left)) = (vertices.last(), boundaries.last()) {
            let crossing = intersection(p, q);
            if crossing <= left {
                vertices.pop();
                boundaries.pop();
            } else {
                boundary = crossing;
                break;
            }
        }
        vertices.push(q);
        boundaries.push(boundary);
    }

    if vertices.is_empty() {
        return out;
    }

    let mut k = 0;
    for (i, slot) in out.iter_mut().enumerate() {
        let x = position(i);
        while k + 1 < vertices.len() && boundaries[k + 1] < x {
            k += 1;
        }
        let offset = x - position(vertices[k]);
        *slot = offset * offset + f[vertices[k]];
    }
    out
}

fn directed(areas: &Array3<f64>, distances: &Array3<f64>) -> Vec<SurfaceSample> {
    let mut samples: Vec<SurfaceSample> = areas
        .iter()
        .zip(distances.iter())
        .filter(|(area, _)| **area > 0.0)
        .map(|(&area_mm2, &distance_mm)| SurfaceSample {
            distance_mm,
            area_mm2,
        })
        .collect();
    samples.sort_by(|x, y| x.distance_mm.total_cmp(&y.distance_mm));
    samples
}
