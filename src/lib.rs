//! topsgeo: geolocation for Sentinel-1 TOPS SLC subswaths
//!
//! Turns the sparse tie-point grid and burst table of one subswath into dense
//! per-pixel longitude, latitude, height, incidence angle, azimuth time and
//! ground range spacing rasters, with forward and inverse coordinate
//! transforms, resolution decimation and per-burst footprint polygons.

pub mod types;
pub mod core;
pub mod dataset;

// Re-export main types and functions for easier access
pub use crate::types::{
    Burst, CancellationToken, GeoError, GeoErrorKind, GeoResult, Raster, RasterExtent,
    RasterField, TiePoint,
};

pub use crate::core::{
    BurstFootprint, BurstGeometryBuilder, BurstTimeline, CoordinateTransform, FootprintParams,
    GeolocationInterpolator, GroundSpacingCalculator, ImageCoords, InterpolationParams,
    OverlapPolicy, RasterIndex, Resolution, ResolutionDecimator, TiePointTable, TransformParams,
    ValidLocation,
};

pub use crate::dataset::{BoundRaster, SessionConfig, SubswathDataset};
