//! Parser fuer das Eingabe-JSON (Parameter, Tasten, Kurve).

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::core::geometry::Point;
use crate::core::keys::Key;
use crate::core::params::Params;
use crate::matcher::CurveMatch;

#[derive(Debug, Deserialize)]
struct KeyJson {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
    k: String,
    corrected_x: Option<i32>,
    corrected_y: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct CurvePointJson {
    x: i32,
    y: i32,
    t: i32,
}

/// Befuellt den Matcher aus einem Eingabe-JSON.
///
/// Der aeussere `input`-Schluessel ist optional; `params` ueberschreibt eine
/// Teilmenge der aktuellen Parameter.
pub fn parse_input(cm: &mut CurveMatch, text: &str) -> Result<()> {
    let value: Value = serde_json::from_str(text).context("Eingabe ist kein gueltiges JSON")?;
    let obj = value.get("input").unwrap_or(&value);

    if let Some(params) = obj.get("params") {
        cm.set_params(Params::from_json(params).context("Parameter-Block fehlerhaft")?);
    }

    cm.clear_keys();
    if let Some(keys) = obj.get("keys") {
        let keys: Vec<KeyJson> =
            serde_json::from_value(keys.clone()).context("Tastenliste fehlerhaft")?;
        for k in keys {
            let label = k
                .k
                .chars()
                .next()
                .with_context(|| format!("Taste ohne Beschriftung bei ({}, {})", k.x, k.y))?;
            let mut key = Key::new(k.x, k.y, k.w, k.h, label);
            if let (Some(cx), Some(cy)) = (k.corrected_x, k.corrected_y) {
                key.corrected = Some(Point::new(cx, cy));
            }
            cm.add_key(key);
        }
    }

    cm.clear_curve_base();
    if let Some(curve) = obj.get("curve") {
        let points: Vec<CurvePointJson> =
            serde_json::from_value(curve.clone()).context("Kurvenliste fehlerhaft")?;
        for p in points {
            cm.push_point(Point::new(p.x, p.y), p.t);
        }
    }

    Ok(())
}
