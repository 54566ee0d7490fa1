//! DICOM access: CT volume geometry, RTSTRUCT parsing and contour rasterization.

#[cfg(test)]
mod fixtures;
mod raster;
mod structure_set;
mod study;
mod volume;

use dicom::core::Tag;
use dicom::object::InMemDicomObject;

pub use study::DicomLoader;

fn element_str(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    let value = obj.element(tag).ok()?.to_str().ok()?;
    let trimmed = value.trim_end_matches(['\0', ' ']).trim_start();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn element_f64s(obj: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    obj.element(tag).ok()?.to_multi_float64().ok()
}

fn element_f64(obj: &InMemDicomObject, tag: Tag) -> Option<f64> {
    obj.element(tag).ok()?.to_float64().ok()
}

fn element_usize(obj: &InMemDicomObject, tag: Tag) -> Option<usize> {
    obj.element(tag).ok()?.to_int::<u32>().ok().map(|v| v as usize)
}

fn element_items(obj: &InMemDicomObject, tag: Tag) -> &[InMemDicomObject] {
    obj.element(tag)
        .ok()
        .and_then(|element| element.items())
        .unwrap_or(&[])
}
