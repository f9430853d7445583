//! Image selection for the cloud driver.

use scaleway_rs::ScalewayImage;

use super::api::ImageQuery;
use super::error::ScalewayDriverError;

/// Picks the newest available image matching the requested architecture.
///
/// # Errors
///
/// Returns [`ScalewayDriverError::ImageNotFound`] when nothing matches.
pub(super) fn select_image_id(
    candidates: Vec<ScalewayImage>,
    query: &ImageQuery,
) -> Result<String, ScalewayDriverError> {
    candidates
        .into_iter()
        .filter(|image| image.arch == query.architecture)
        .filter(|image| image.state == "available")
        .max_by(|lhs, rhs| lhs.creation_date.cmp(&rhs.creation_date))
        .map(|image| image.id)
        .ok_or_else(|| ScalewayDriverError::ImageNotFound {
            label: query.label.clone(),
            arch: query.architecture.clone(),
            zone: query.zone.clone(),
        })
}
