//! Kurven-Matching-Engine fuer Swipe-Tastaturen.
//!
//! Aus einem Tastatur-Layout, einem gepackten Woerterbuch und einem
//! Finger-Strich (Polyline mit Zeitstempeln) entsteht eine bewertete
//! Kandidatenliste. Kern-Funktionalitaet als Library exportiert fuer
//! Tests, CLI und Einbettung.

pub mod core;
pub mod json;
pub mod matcher;
pub mod worker;

pub use core::{
    fold_letter, CurvePoint, CurveStore, Key, KeyMatch, KeyStore, Params, Point, SpecialPoint,
    TreeNode, WordTree,
};
pub use matcher::incremental::IncrementalMatch;
pub use matcher::scenario::{MatchCtx, Scenario, StepScore};
pub use matcher::{CurveMatch, Matcher, Stats};
pub use worker::{CurveWorker, WorkerCommand};
