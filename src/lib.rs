//! Cityforge - procedural 2D city layout synthesis.
//!
//! Grows an arterial/local road network with an extended L-system, extracts
//! the city blocks the roads enclose, and recursively divides each block
//! into building lots. The output is abstract geometry; triangulation and
//! rendering are the consumer's concern.

pub mod procgen;

pub use procgen::{generate, CityConfig, CityGenPlugin, CityLayout, GenerationError, Parcel};
