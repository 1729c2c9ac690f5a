//! Domaenen-Kern: Geometrie, Kurven- und Tasten-Stores, Woerterbuch,
//! Parameterblock.

pub mod curve;
pub mod geometry;
pub mod keys;
pub mod params;
pub mod tree;

pub use curve::{CurvePoint, CurveStore, SpecialPoint};
pub use geometry::Point;
pub use keys::{fold_letter, Key, KeyMatch, KeyStore};
pub use params::Params;
pub use tree::{TreeNode, WordTree};
