use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use dicom::dictionary_std::tags;
use dicom::object::{InMemDicomObject, OpenFileOptions};
use tracing::debug;

use super::{element_f64, element_f64s, element_str, element_usize};
use crate::geometry::VoxelSpacing;

const ORIENTATION_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq)]
pub struct SliceHeader {
    pub sop_instance_uid: Option<String>,
    pub position: [f64; 3],
    pub orientation: [f64; 6],
    /// `[row spacing, column spacing]` as stored in PixelSpacing.
    pub pixel_spacing: [f64; 2],
    pub slice_thickness: Option<f64>,
    pub rows: usize,
    pub columns: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedSlice {
    pub sop_instance_uid: Option<String>,
    pub position: [f64; 3],
    /// Position projected on the slice normal.
    pub offset: f64,
}

/// Geometry of an image series, slices ordered along the normal.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeGeometry {
    pub rows: usize,
    pub columns: usize,
    pub row_direction: [f64; 3],
    pub column_direction: [f64; 3],
    pub normal: [f64; 3],
    pub pixel_spacing: [f64; 2],
    pub spacing: VoxelSpacing,
    pub slices: Vec<PlacedSlice>,
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn fixed<const N: usize>(values: Vec<f64>, what: &str) -> Result<[f64; N]> {
    let len = values.len();
    values
        .try_into()
        .map_err(|_| anyhow::anyhow!("{what} has {len} values, expected {N}"))
}

pub fn read_slice_header(obj: &InMemDicomObject) -> Result<SliceHeader> {
    let position = element_f64s(obj, tags::IMAGE_POSITION_PATIENT)
        .context("missing ImagePositionPatient")?;
    let orientation = element_f64s(obj, tags::IMAGE_ORIENTATION_PATIENT)
        .context("missing ImageOrientationPatient")?;
    let pixel_spacing: [f64; 2] = fixed(
        element_f64s(obj, tags::PIXEL_SPACING).context("missing PixelSpacing")?,
        "PixelSpacing",
    )?;
    if pixel_spacing.iter().any(|mm| !mm.is_finite() || *mm <= 0.0) {
        bail!("PixelSpacing must be positive, got {pixel_spacing:?}");
    }

    Ok(SliceHeader {
        sop_instance_uid: element_str(obj, tags::SOP_INSTANCE_UID),
        position: fixed(position, "ImagePositionPatient")?,
        orientation: fixed(orientation, "ImageOrientationPatient")?,
        pixel_spacing,
        slice_thickness: element_f64(obj, tags::SLICE_THICKNESS).filter(|t| *t > 0.0),
        rows: element_usize(obj, tags::ROWS).context("missing Rows")?,
        columns: element_usize(obj, tags::COLUMNS).context("missing Columns")?,
    })
}

impl VolumeGeometry {
    pub fn from_headers(headers: Vec<SliceHeader>) -> Result<Self> {
        let Some(first) = headers.first() else {
            bail!("no image slices");
        };

        let row_direction = [
            first.orientation[0],
            first.orientation[1],
            first.orientation[2],
        ];
        let column_direction = [
            first.orientation[3],
            first.orientation[4],
            first.orientation[5],
        ];
        let normal = cross(row_direction, column_direction);
        let (rows, columns, pixel_spacing) = (first.rows, first.columns, first.pixel_spacing);

        for header in &headers {
            if header.rows != rows || header.columns != columns {
                bail!(
                    "slice {} is {}x{}, expected {rows}x{columns}",
                    header.sop_instance_uid.as_deref().unwrap_or("?"),
                    header.rows,
                    header.columns
                );
            }
            let drift = header
                .orientation
                .iter()
                .zip(first.orientation.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            if drift > ORIENTATION_TOLERANCE {
                bail!("inconsistent ImageOrientationPatient across slices");
            }
        }

        let thickness = first.slice_thickness;
        let mut slices: Vec<PlacedSlice> = headers
            .into_iter()
            .map(|header| PlacedSlice {
                offset: dot(header.position, normal),
                sop_instance_uid: header.sop_instance_uid,
                position: header.position,
            })
            .collect();
        slices.sort_by(|a, b| a.offset.total_cmp(&b.offset));

        let slice_mm = match thickness {
            Some(value) => value,
            None if slices.len() > 1 => {
                let span = slices[slices.len() - 1].offset - slices[0].offset;
                span / (slices.len() - 1) as f64
            }
            None => bail!("single slice without SliceThickness"),
        };
        if !slice_mm.is_finite() || slice_mm <= 0.0 {
            bail!("slice spacing must be positive, got {slice_mm}");
        }

        Ok(Self {
            rows,
            columns,
            row_direction,
            column_direction,
            normal,
            pixel_spacing,
            spacing: VoxelSpacing::new(pixel_spacing[0], pixel_spacing[1], slice_mm),
            slices,
        })
    }

    /// Mask shape: `(slices, rows, columns)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.slices.len(), self.rows, self.columns)
    }

    pub fn slice_by_uid(&self, uid: &str) -> Option<usize> {
        self.slices
            .iter()
            .position(|slice| slice.sop_instance_uid.as_deref() == Some(uid))
    }

    /// Slice whose plane lies within half a slice spacing of `point`.
    pub fn nearest_slice(&self, point: [f64; 3]) -> Option<usize> {
        let offset = dot(point, self.normal);
        let (index, distance) = self
            .slices
            .iter()
            .enumerate()
            .map(|(index, slice)| (index, (slice.offset - offset).abs()))
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        (distance <= self.spacing.slice_mm / 2.0 + 1e-6).then_some(index)
    }

    /// Continuous `(column, row)` pixel coordinates of `point` on slice `index`.
    pub fn to_pixel(&self, index: usize, point: [f64; 3]) -> (f64, f64) {
        let delta = sub(point, self.slices[index].position);
        (
            dot(delta, self.row_direction) / self.pixel_spacing[1],
            dot(delta, self.column_direction) / self.pixel_spacing[0],
        )
    }
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        if entry
            .file_type()
            .with_context(|| format!("failed to inspect {}", entry.path().display()))?
            .is_file()
        {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Reads every image header of `dir` (pixel data is not loaded).
pub fn load_volume_geometry(dir: &Path) -> Result<VolumeGeometry> {
    let files = list_files(dir)?;
    let mut headers = Vec::with_capacity(files.len());

    for path in &files {
        let obj = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .with_context(|| format!("failed to open image slice {}", path.display()))?;
        let header = read_slice_header(&obj)
            .with_context(|| format!("invalid image slice {}", path.display()))?;
        headers.push(header);
    }

    let geometry = VolumeGeometry::from_headers(headers)
        .with_context(|| format!("invalid image series in {}", dir.display()))?;
    debug!(
        dir = %dir.display(),
        slices = geometry.slices.len(),
        row_mm = geometry.spacing.row_mm,
        column_mm = geometry.spacing.column_mm,
        slice_mm = geometry.spacing.slice_mm,
        "loaded volume geometry"
    );
    Ok(geometry)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dicom_io::fixtures::{CtSlice, slice_object, write_ct_slice};

    pub(crate) fn axial_header(uid: &str, z: f64) -> SliceHeader {
        SliceHeader {
            sop_instance_uid: Some(uid.to_string()),
            position: [-10.0, -20.0, z],
            orientation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            pixel_spacing: [2.0, 1.0],
            slice_thickness: Some(3.0),
            rows: 16,
            columns: 12,
        }
    }

    #[test]
    fn slices_are_sorted_along_the_normal() {
        let headers = vec![
            axial_header("c", 6.0),
            axial_header("a", 0.0),
            axial_header("b", 3.0),
        ];

        let volume = VolumeGeometry::from_headers(headers).expect("volume");
        let order: Vec<&str> = volume
            .slices
            .iter()
            .filter_map(|s| s.sop_instance_uid.as_deref())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(volume.shape(), (3, 16, 12));
        assert_eq!(volume.spacing, VoxelSpacing::new(2.0, 1.0, 3.0));
        assert_eq!(volume.spacing.largest(), 3.0);
    }

    #[test]
    fn missing_thickness_falls_back_to_mean_slice_distance() {
        let mut headers = vec![axial_header("a", 0.0), axial_header("b", 2.5)];
        for header in &mut headers {
            header.slice_thickness = None;
        }
        let volume = VolumeGeometry::from_headers(headers).expect("volume");
        assert_eq!(volume.spacing.slice_mm, 2.5);
    }

    #[test]
    fn mismatched_slice_dimensions_are_rejected() {
        let mut odd = axial_header("b", 3.0);
        odd.rows = 8;
        assert!(VolumeGeometry::from_headers(vec![axial_header("a", 0.0), odd]).is_err());
    }

    #[test]
    fn points_map_to_pixels_and_slices() {
        let volume =
            VolumeGeometry::from_headers(vec![axial_header("a", 0.0), axial_header("b", 3.0)])
                .expect("volume");

        assert_eq!(volume.to_pixel(1, [-7.0, -12.0, 3.0]), (3.0, 4.0));
        assert_eq!(volume.nearest_slice([0.0, 0.0, 2.0]), Some(1));
        assert_eq!(volume.nearest_slice([0.0, 0.0, 10.0]), None);
        assert_eq!(volume.slice_by_uid("a"), Some(0));
    }

    #[test]
    fn non_positive_pixel_spacing_is_rejected() {
        let mut slice = CtSlice::axial("a", 0.0);
        assert!(read_slice_header(&slice_object(&slice)).is_ok());

        slice.pixel_spacing = [0.0, 1.0];
        let err = read_slice_header(&slice_object(&slice)).expect_err("zero spacing");
        assert!(err.to_string().contains("PixelSpacing"));

        slice.pixel_spacing = [1.0, -0.5];
        assert!(read_slice_header(&slice_object(&slice)).is_err());
    }

    #[test]
    fn coincident_slices_without_thickness_are_rejected() {
        let mut headers = vec![axial_header("a", 4.0), axial_header("b", 4.0)];
        for header in &mut headers {
            header.slice_thickness = None;
        }
        assert!(VolumeGeometry::from_headers(headers).is_err());
    }

    #[test]
    fn series_is_read_from_files_in_slice_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = [
            ("1.dcm", "1.2.9.3", 5.0),
            ("2.dcm", "1.2.9.1", 0.0),
            ("3.dcm", "1.2.9.2", 2.5),
        ];
        for (file, uid, z) in files {
            let mut slice = CtSlice::axial(uid, z);
            slice.slice_thickness = None;
            write_ct_slice(&dir.path().join(file), &slice);
        }

        let volume = load_volume_geometry(dir.path()).expect("volume");
        let order: Vec<&str> = volume
            .slices
            .iter()
            .filter_map(|s| s.sop_instance_uid.as_deref())
            .collect();
        assert_eq!(order, vec!["1.2.9.1", "1.2.9.2", "1.2.9.3"]);
        assert_eq!(volume.shape(), (3, 16, 12));
        assert_eq!(volume.spacing, VoxelSpacing::new(2.0, 1.0, 2.5));
    }

    #[test]
    fn unreadable_slice_fails_the_series() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_ct_slice(&dir.path().join("1.dcm"), &CtSlice::axial("1.2.9.1", 0.0));
        fs::write(dir.path().join("2.dcm"), b"not dicom").expect("junk file");

        let err = load_volume_geometry(dir.path()).expect_err("junk slice");
        assert!(format!("{err:#}").contains("2.dcm"));
    }
}
