//! # aoi-types
//!
//! Shared data model for the AOI inspection suite.
//!
//! These types are used by:
//! - `aoi-server`: parsing product ROI configurations, running detectors,
//!   assembling inspection responses
//! - `aoi-client`: fetching ROI groups, driving the camera, submitting
//!   inspection requests
//!
//! ## Vocabulary conventions
//!
//! The same ROI entity travels under two field vocabularies that grew
//! independently: the server speaks `idx`/`type`/`coords`/`device_location`/
//! `feature_method`, the operator UI speaks `roi_id`/`roi_type_name`/
//! `coordinates`/`device_id`/`detection_method`. On top of that, old config
//! files store ROIs as positional arrays of 3 to 12 elements.
//!
//! All of that is funneled through [`codec`]: every accepted shape
//! normalizes into one canonical [`Roi`], and the two wire shapes are
//! produced from it on demand. No other component ever sees more than one
//! vocabulary.

pub mod codec;
pub mod result;
pub mod roi;
pub mod wire;

pub use codec::{normalize, validate, ClientRoi, RoiCodecError, ServerRoi, ValidationError};
pub use result::{OverallResult, RoiOutcome, RoiResult};
pub use roi::{
    devices_needing_barcode, group_key, group_rois, next_roi_id, ColorConfig, ColorRange, Roi,
    RoiRect, RoiType,
};
pub use wire::{
    CapturedGroup, ClientInfo, CloseSessionResponse, CreateProductRequest, CreateProductResponse,
    CreateSessionRequest, CreateSessionResponse, DeviceBarcodeEntry, DeviceSummary,
    GetRoisResponse, GoldenSampleInfo, GoldenSamplesResponse, InspectRequest, InspectResponse,
    InspectionSummary, ListProductsResponse, ProductInfo, RestoreGoldenRequest, RoiGroup,
    RoiGroupsResponse, SaveGoldenRequest, SaveRoisRequest, SaveRoisResponse,
};
