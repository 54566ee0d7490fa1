use anyhow::{Result, bail};
use ndarray::{Array3, ArrayViewMut2, Axis};
use tracing::warn;

use super::structure_set::{Contour, Roi};
use super::volume::VolumeGeometry;

type Polygon = Vec<(f64, f64)>;

fn slice_for(contour: &Contour, geometry: &VolumeGeometry) -> Option<usize> {
    contour
        .referenced_sop_instance_uid
        .as_deref()
        .and_then(|uid| geometry.slice_by_uid(uid))
        .or_else(|| geometry.nearest_slice(contour.points[0]))
}

/// Even-odd fill over pixel centres; an edge covers `y` when one end is
/// above it and the other is not.
fn fill_even_odd(plane: &mut ArrayViewMut2<'_, bool>, polygons: &[Polygon]) {
    let (rows, columns) = plane.dim();
    let mut crossings = Vec::new();

    for row in 0..rows {
        let y = row as f64;
        crossings.clear();
        for polygon in polygons.iter().filter(|polygon| polygon.len() >= 3) {
            for (i, &(x0, y0)) in polygon.iter().enumerate() {
                let (x1, y1) = polygon[(i + 1) % polygon.len()];
                if (y0 > y) != (y1 > y) {
                    crossings.push(x0 + (y - y0) * (x1 - x0) / (y1 - y0));
                }
            }
        }
        crossings.sort_by(f64::total_cmp);

        for span in crossings.chunks_exact(2) {
            let start = span[0].ceil().max(0.0);
            let end = span[1].floor().min(columns as f64 - 1.0);
            if start > end {
                continue;
            }
            for column in start as usize..=end as usize {
                plane[[row, column]] = true;
            }
        }
    }
}

fn mark_vertices(plane: &mut ArrayViewMut2<'_, bool>, polygons: &[Polygon]) {
    let (rows, columns) = plane.dim();
    for &(x, y) in polygons.iter().flatten() {
        let (column, row) = (x.round(), y.round());
        if column >= 0.0 && row >= 0.0 && (column as usize) < columns && (row as usize) < rows {
            plane[[row as usize, column as usize]] = true;
        }
    }
}

/// Rasterizes all contours of `roi` onto the image grid, indexed
/// `[slice, row, column]`.
pub fn rasterize(roi: &Roi, geometry: &VolumeGeometry) -> Result<Array3<bool>> {
    let (slices, rows, columns) = geometry.shape();
    let mut polygons: Vec<Vec<Polygon>> = vec![Vec::new(); slices];
    let mut unplaced = 0usize;

    for contour in roi.contours.iter().filter(|c| !c.points.is_empty()) {
        if contour.points.iter().flatten().any(|v| !v.is_finite()) {
            bail!("ROI {:?} has non-finite contour coordinates", roi.name);
        }
        let Some(index) = slice_for(contour, geometry) else {
            unplaced += 1;
            continue;
        };
        polygons[index].push(
            contour
                .points
                .iter()
                .map(|&point| geometry.to_pixel(index, point))
                .collect(),
        );
    }

    if unplaced > 0 {
        warn!(
            roi = %roi.name,
            contours = unplaced,
            "contours outside the image series were skipped"
        );
    }

    let mut mask = Array3::from_elem((slices, rows, columns), false);
    for (index, slice_polygons) in polygons.iter().enumerate() {
        if slice_polygons.is_empty() {
            continue;
        }
        let mut plane = mask.index_axis_mut(Axis(0), index);
        fill_even_odd(&mut plane, slice_polygons);
        mark_vertices(&mut plane, slice_polygons);
    }
    Ok(mask)
}
