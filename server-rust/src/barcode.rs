//! Barcode detector.
//!
//! The crop is JPEG-encoded in memory and handed to the opaque decoder;
//! whatever list of strings comes back is the result. At least one
//! non-empty value passes.

use image::RgbImage;

use aoi_types::{Roi, RoiOutcome};

use crate::engines::BarcodeDecoder;
use crate::vision;

pub fn detect(frame: &RgbImage, roi: &Roi, decoder: &dyn BarcodeDecoder) -> RoiOutcome {
    let Some(crop) = vision::crop(frame, roi.coords) else {
        return RoiOutcome::Error {
            message: format!("ROI {} rectangle lies outside the frame", roi.roi_id),
        };
    };

    let jpeg = match vision::encode_jpeg(&crop, vision::JPEG_QUALITY) {
        Ok(jpeg) => jpeg,
        Err(e) => {
            return RoiOutcome::Error {
                message: format!("ROI {}: jpeg encode failed: {e}", roi.roi_id),
            }
        }
    };

    match decoder.decode(&jpeg) {
        Ok(values) => {
            let passed = values.iter().any(|v| !v.trim().is_empty());
            RoiOutcome::Barcode { values, passed }
        }
        Err(e) => RoiOutcome::Error {
            message: format!("ROI {}: barcode decode failed: {e}", roi.roi_id),
        },
    }
}
