//! Read classic Macintosh volumes — HFS ("HFS Standard", 1985) and HFS+
//! (1998) — directly from raw block devices or disk images.
//!
//! The read path: probe the device for volume signatures
//! ([`probe`]), parse the Master Directory Block or HFS+ Volume Header
//! ([`volume`]), synthesize contiguous fork streams over scattered
//! allocation blocks with extents-overflow lookups ([`fork`]), walk the
//! catalog B-tree ([`btree`], [`catalog`]), and rehydrate files to the
//! host with their resource forks and type/creator codes intact
//! ([`extract`]).
//!
//! Everything is read-only; damaged trees are reported, not repaired.

pub mod btree;
pub mod catalog;
pub mod device;
pub mod error;
pub mod extract;
pub mod fork;
pub mod hfspath;
pub mod ops;
pub mod probe;
pub mod text;
pub mod volume;

pub use error::{MacFsError, Result};
pub use volume::{Volume, VolumeKind};
