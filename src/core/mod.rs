//! Core geolocation modules

pub mod timeline;
pub mod tie_points;
pub mod ground_spacing;
pub mod interpolate;
pub mod transform;
pub mod decimate;
pub mod footprint;

// Re-export main types
pub use timeline::{BurstTimeline, ValidLocation};
pub use tie_points::{TieCell, TiePointTable, MIN_TIE_POINTS};
pub use ground_spacing::{ground_spacing, GroundSpacingCalculator};
pub use interpolate::{GeolocationInterpolator, InterpolationParams};
pub use transform::{CoordinateTransform, ImageCoords, OverlapPolicy, RasterIndex, TransformParams};
pub use decimate::{Resolution, ResolutionDecimator};
pub use footprint::{subswath_footprint, BurstFootprint, BurstGeometryBuilder, FootprintParams};
