//! Common utilities and data structures shared by the tilenav crates

mod geometry;
mod math;

pub use geometry::*;
pub use math::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed tile data: {0}")]
    BadFormat(String),

    #[error("tile format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("tile slot ({x}, {y}, {layer}) is already occupied")]
    SlotOccupied { x: i32, y: i32, layer: i32 },

    #[error("no free tile slot available")]
    NoFreeSlot,

    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tilenav operations
pub type Result<T> = std::result::Result<T, Error>;
