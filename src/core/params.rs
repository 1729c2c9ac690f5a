//! Zentraler Parameterblock der Matching-Engine.
//!
//! Alle Stellschrauben als flacher Struct mit einkompilierten Defaults.
//! Der Aufrufer kann ueber das `params`-Objekt im Eingabe-JSON eine beliebige
//! Teilmenge ueberschreiben; fehlende Felder fallen auf die Defaults zurueck.
//! Zusaetzlich laesst sich derselbe Block als TOML-Datei neben der Binary
//! ablegen (Optionen-Mechanismus wie beim Editor).

use serde::{Deserialize, Serialize};

/// Alle Laufzeit-Parameter der Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    // ── Winkel- und Kurvenschwellen ─────────────────────────────
    /// Drei-Punkt-Drehsumme ab der ein Punkt als scharfe Kurve gilt (Grad)
    pub turn_threshold: i32,
    /// Schwelle fuer Kehrtwenden (Klasse 2)
    pub turn_threshold2: i32,
    /// Einzelwinkel-Schwelle: darunter gilt eine Kurve als verteilt (Klasse 6)
    pub turn_threshold3: i32,
    /// Schwelle fuer optionale kleine Kurven (Klasse 5)
    pub turn_threshold5: i32,
    /// Mindest-Drehwinkel, ab dem ein Schritt als Kurve zaehlt
    pub turn_min_angle: i32,
    /// Unmatched-Schwelle beim Kurven-Abgleich
    pub turn_max_angle: i32,
    /// Maximaler Richtungsfehler eines Segments (Grad)
    pub max_angle: i32,
    /// Maximaler Index-Abstand zwischen Kurvenpunkt und Taste
    pub max_turn_index_gap: i32,
    /// Innerer Index-Abstand fuer Doppel-Kandidaten
    pub min_turn_index_gap: i32,
    /// Suchfenster fuer Klasse-5-Punkte bei ST2-Pruefungen
    pub min_turn_index_gap_st: i32,

    // ── Distanz-Toleranzen ──────────────────────────────────────
    /// Distanz-Normierung fuer den ersten Buchstaben
    pub dist_max_start: i32,
    /// Distanz-Normierung fuer Folgebuchstaben
    pub dist_max_next: i32,
    /// Anisotropie-Faktor an Kurvenspitzen und scharfen Kurven
    pub anisotropy_ratio: f32,
    /// Absoluter Quer-Versatz eines Segments (Pixel)
    pub cos_max_gap: i32,
    /// Maximale Abweichung der Kurve von der Segment-Geraden
    pub curve_dist_threshold: i32,
    /// Gewicht der Viereck-Flaeche im Kurvenabweichungs-Score
    pub curve_surface_coef: f32,
    /// Strafe je uebersprungenem scharfen Kurvenpunkt
    pub sharp_turn_penalty: f32,
    /// Segmentlaenge, ab der der Richtungs-Score voll zaehlt
    pub curve_score_min_dist: i32,
    /// Mindest-Score fuer Doppelbelegung eines Kurvenpunkts
    pub same_point_score: f32,
    /// Maximaler Winkel zwischen Tasten-Sehne und Tangente bei Doppelbelegung
    pub same_point_max_angle: i32,

    // ── Expansions-Steuerung ────────────────────────────────────
    /// Abbruch nach so vielen Indizes ohne Verbesserung
    pub match_wait: i32,
    /// Fehler-Toleranz aktiv (ein verfehlter Buchstabe je Szenario)
    pub error_correct: i32,
    /// Ab dieser Wortlaenge sind weitere Fehler erlaubt
    pub error_ignore_count: i32,
    /// Fehler-Abschlag im finalen Ranking
    pub coef_error: f32,
    /// Fehler-Abschlag im Pruning-Score
    pub coef_error_tmp: f32,
    /// Zusatzlaenge, bevor ein Blatt-Szenario beendet werden darf
    pub end_scenario_wait: i32,
    /// Obergrenze der aktiven Szenarien (Beam-Breite)
    pub max_active_scenarios: i32,
    /// Obergrenze der ausgegebenen Kandidaten
    pub max_candidates: i32,
    /// Kandidaten unterhalb dieses Anteils vom Bestwert werden verworfen
    pub score_ratio: f32,

    // ── Preprocessing ───────────────────────────────────────────
    /// Geschwindigkeits-Verhaeltnis fuer Slow-Down-Punkte
    pub slow_down_ratio: f32,
    /// Untere Drehsummen-Schwelle fuer Wendepunkte
    pub inf_min: i32,
    /// Obere Drehsummen-Schwelle fuer Wendepunkte
    pub inf_max: i32,
    /// Unmatched-Spezialpunkte zaehlen nur unterhalb dieses Drehwinkels
    pub speed_min_angle: i32,
    /// Index-Toleranz beim Suchen unmatchter Spezialpunkte
    pub speed_max_index_gap: i32,
    /// Strafe fuer unmatchte Slow-Down-Punkte
    pub speed_penalty: f32,
    /// Strafe fuer unmatchte optionale Kurvenpunkte
    pub st5_score: f32,
    /// Erwartete Kehrtwende unterhalb dieses Winkels trotz ST2 -> Strafe
    pub st2_min: i32,
    /// Erwartete Kehrtwende oberhalb dieses Winkels ohne ST2 -> Strafe
    pub st2_max: i32,
    /// Lokale Drehrate, unter der ein ST2 als Zufall gilt
    pub st2_ignore: i32,
    /// Gesamtlaenge, unter der eine Kurve als Einzel-Tipper gilt
    pub dot_threshold: i32,

    // ── Kurvenabgleich (turn2) ──────────────────────────────────
    pub turn2_score1: f32,
    pub turn2_score_pow: f32,
    pub turn2_yscale: i32,
    pub turn2_yscaleratio: f32,
    pub turn2_min_y2: i32,
    /// Ab diesem Erwartungswinkel gilt die grosse Toleranz
    pub turn2_large_threshold: i32,
    pub turn2_large_y0: i32,
    pub turn2_xscale_tip: i32,
    pub turn2_yscale_tip: i32,
    pub turn2_powscale_tip: f32,
    /// Ignore-Regel: maximale Restlaenge nach der letzten Kurve
    pub turn2_ignore_maxlen: i32,
    /// Ignore-Regel: Mindestlaenge vor der letzten Kurve
    pub turn2_ignore_minlen: i32,
    /// Ignore-Regel: maximaler Quer-Versatz
    pub turn2_ignore_maxgap: i32,
    /// Zickzack-Ignore: Mindestwinkel der Nachbarkurven
    pub turn2_ignore_zz_minangle: i32,
    /// Zickzack-Ignore: Maximalwinkel der mittleren Kurve
    pub turn2_ignore_zz_maxangle: i32,
    /// Zickzack-Ignore: maximale Segmentlaenge
    pub turn2_ignore_zz_maxlen: i32,
    /// Score-Untergrenze fuer ignorierte Kurven
    pub turn2_ignore_score: f32,
    /// Abschlag fuer unmatchte Kurven
    pub turn_score_unmatched: f32,
    /// Segmentlaenge, die Kurvenbloecke trennt
    pub turn_separation: i32,
    /// Maximal uebertragbarer Drehwinkel zwischen Nachbarkurven
    pub turn_max_transfer: i32,
    /// Laengen-Normierung des Kurven-Transfers
    pub turn_optim: i32,
    /// "bonjour"-Regel: Mindestwinkel der Nachbarkurven
    pub bjr_min_turn: i32,
    /// "castle"-Regel: maximale Segmentlaenge vor der verpassten Kurve
    pub cst_max_length: i32,
    /// "castle"-Regel: Mindestwinkel der Vorgaengerkurve
    pub cst_min_turn1: i32,
    /// "castle"-Regel: Maximalwinkel der verpassten Kurve
    pub cst_max_turn2: i32,

    // ── Gegenrichtungs-Pruefung ─────────────────────────────────
    pub rt_turn_threshold: i32,
    pub rt_score_coef: f32,
    pub rt_score_coef_tip: f32,
    pub rt_tip_gaps: i32,
    /// Drehrate unterhalb derer ein Lauf als flach gilt
    pub rt2_low: i32,
    /// Drehrate ab der ein Lauf eine Richtung traegt
    pub rt2_high: i32,
    /// Mindestlaenge gerichteter Laeufe
    pub rt2_count_nz: i32,
    /// Mindestlaenge flacher Laeufe
    pub rt2_count_z: i32,
    /// Drehsumme, ab der ein flacher Lauf umklassifiziert wird
    pub rt2_flat_max: i32,
    /// Maximale Mittenabweichung des flachen Laufs
    pub rt2_offcenter: i32,
    pub rt2_score_coef: f32,

    // ── Gerade/Flach/Schleifen ──────────────────────────────────
    pub straight_score1: f32,
    pub straight_score2: f32,
    pub straight_slope: f32,
    /// Geradheits-Mass unterhalb dessen der Strich als Gerade gilt
    pub straight_threshold_low: f32,
    /// Geradheits-Mass oberhalb dessen gerade Kandidaten bestraft werden
    pub straight_threshold_high: f32,
    pub flat_max_angle: i32,
    pub flat_max_deviation: i32,
    pub flat_score: f32,
    /// Maximale vertikale Ausdehnung einreihiger Wortteile
    pub flat2_max_height: i32,
    pub flat2_score_max: f32,
    pub loop_penalty: f32,
    /// Erwartete Drehsumme, ab der eine Schleife immer erlaubt ist
    pub loop_threshold1: i32,
    /// Untere Drehsummen-Schwelle fuer Schleifen mit Gegenkurven
    pub loop_threshold2: i32,
    /// Mindestwinkel der Gegenkurven
    pub loop_threshold3: i32,
    /// Maximaler Punktabstand fuer die Schleifen-Wiederherstellung
    pub loop_recover_max_len: i32,
    /// Strafe fuer schlecht liegende geteilte Kurvenpunkte
    pub sp_bad: f32,
    /// Strafe fuer Ein-Punkt-Segmente an den Kurvenspitzen
    pub tip_small_segment: f32,
    /// Strafe fuer entgegengesetzte Tangenten an den Kurvenspitzen
    pub bad_tangent_score: f32,

    // ── Inkrementelle Steuerung ─────────────────────────────────
    /// Laengen-Verzoegerung bis ein Kind-Szenario reif ist
    pub incremental_length_lag: i32,
    /// Punktanzahl-Abstand zwischen zwei Update-Laeufen
    pub incremental_index_gap: i32,
    /// Laengen-Aufschlag nach einem fehlgeschlagenen Versuch
    pub incr_retry: i32,
    /// Aggressiver Modus: min-Laenge statt max-Laenge als Ausloeser
    pub aggressive_mode: f32,

    // ── Neue Distanz ────────────────────────────────────────────
    pub newdist_pow: f32,
    pub newdist_speed: f32,
    pub newdist_length_bias_pow: f32,
    pub newdist_c1: f32,
    pub newdist_c2: f32,
    pub newdist_c3: f32,
    pub newdist_c5: f32,
    pub newdist_c6: f32,
    pub newdist_ctip: f32,

    // ── Finale Kombination ──────────────────────────────────────
    pub final_coef_misc: f32,
    pub final_coef_turn: f32,
    pub final_coef_turn_exp: f32,
    pub final_newdist_pow: f32,
    pub final_newdist_range: i32,
    pub final_score_v1_coef: f32,
    pub final_score_v1_threshold: f32,
    /// Laengen-Bonus je Buchstabe
    pub length_penalty: f32,
    /// Exponent auf alle Zellen-Scores vor der Aggregation
    pub score_pow: f32,

    // ── Spalten-Gewichte ────────────────────────────────────────
    pub weight_distance: f32,
    pub weight_cos: f32,
    pub weight_curve: f32,
    pub weight_length: f32,
    pub weight_turn: f32,
    pub weight_misc: f32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            turn_threshold: 75,
            turn_threshold2: 140,
            turn_threshold3: 115,
            turn_threshold5: 45,
            turn_min_angle: 10,
            turn_max_angle: 10,
            max_angle: 45,
            max_turn_index_gap: 6,
            min_turn_index_gap: 2,
            min_turn_index_gap_st: 2,

            dist_max_start: 75,
            dist_max_next: 100,
            anisotropy_ratio: 1.5,
            cos_max_gap: 100,
            curve_dist_threshold: 85,
            curve_surface_coef: 20.0,
            sharp_turn_penalty: 0.6,
            curve_score_min_dist: 50,
            same_point_score: 0.1,
            same_point_max_angle: 120,

            match_wait: 7,
            error_correct: 1,
            error_ignore_count: 5,
            coef_error: 0.1,
            coef_error_tmp: 0.4,
            end_scenario_wait: 100,
            max_active_scenarios: 180,
            max_candidates: 50,
            score_ratio: 0.7,

            slow_down_ratio: 2.2,
            inf_min: 20,
            inf_max: 120,
            speed_min_angle: 15,
            speed_max_index_gap: 2,
            speed_penalty: 0.1,
            st5_score: 0.02,
            st2_min: 115,
            st2_max: 170,
            st2_ignore: 120,
            dot_threshold: 25,

            turn2_score1: 0.05,
            turn2_score_pow: 2.0,
            turn2_yscale: 30,
            turn2_yscaleratio: 2.8,
            turn2_min_y2: 5,
            turn2_large_threshold: 228,
            turn2_large_y0: 96,
            turn2_xscale_tip: 160,
            turn2_yscale_tip: 35,
            turn2_powscale_tip: 0.5,
            turn2_ignore_maxlen: 70,
            turn2_ignore_minlen: 150,
            turn2_ignore_maxgap: 25,
            turn2_ignore_zz_minangle: 70,
            turn2_ignore_zz_maxangle: 45,
            turn2_ignore_zz_maxlen: 40,
            turn2_ignore_score: 0.5,
            turn_score_unmatched: 0.3,
            turn_separation: 160,
            turn_max_transfer: 55,
            turn_optim: 160,
            bjr_min_turn: 120,
            cst_max_length: 100,
            cst_min_turn1: 120,
            cst_max_turn2: 45,

            rt_turn_threshold: 5,
            rt_score_coef: 0.12,
            rt_score_coef_tip: 0.01,
            rt_tip_gaps: 3,
            rt2_low: 3,
            rt2_high: 8,
            rt2_count_nz: 2,
            rt2_count_z: 5,
            rt2_flat_max: 60,
            rt2_offcenter: 5,
            rt2_score_coef: 0.1,

            straight_score1: 0.5,
            straight_score2: 0.2,
            straight_slope: 0.5,
            straight_threshold_low: 0.35,
            straight_threshold_high: 1.0,
            flat_max_angle: 10,
            flat_max_deviation: 45,
            flat_score: 0.25,
            flat2_max_height: 130,
            flat2_score_max: 0.3,
            loop_penalty: 0.2,
            loop_threshold1: 225,
            loop_threshold2: 120,
            loop_threshold3: 60,
            loop_recover_max_len: 60,
            sp_bad: 0.2,
            tip_small_segment: 0.02,
            bad_tangent_score: 0.2,

            incremental_length_lag: 100,
            incremental_index_gap: 5,
            incr_retry: 50,
            aggressive_mode: 0.0,

            newdist_pow: 2.0,
            newdist_speed: 3.12,
            newdist_length_bias_pow: 0.5,
            newdist_c1: 0.43,
            newdist_c2: 0.42,
            newdist_c3: 2.63,
            newdist_c5: 0.67,
            newdist_c6: 0.67,
            newdist_ctip: 0.71,

            final_coef_misc: 1.0,
            final_coef_turn: 11.0,
            final_coef_turn_exp: 0.33,
            final_newdist_pow: 1.0,
            final_newdist_range: 40,
            final_score_v1_coef: 1.0,
            final_score_v1_threshold: 0.12,
            length_penalty: 0.001,
            score_pow: 1.0,

            weight_distance: 2.0,
            weight_cos: 2.0,
            weight_curve: 3.0,
            weight_length: 1.0,
            weight_turn: 4.0,
            weight_misc: 8.0,
        }
    }
}

impl Params {
    /// Defaults plus Teilmengen-Override aus einem JSON-Objekt.
    pub fn from_json(value: &serde_json::Value) -> anyhow::Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("Parameter-Override fehlerhaft: {e}"))
    }

    /// Laedt Parameter aus einer TOML-Datei. Bei Fehler: Standardwerte.
    pub fn load_from_file(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(params) => {
                    log::info!("Parameter geladen aus: {}", path.display());
                    params
                }
                Err(e) => {
                    log::warn!("Parameter-Datei fehlerhaft, verwende Standardwerte: {}", e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Ermittelt den Pfad zur Parameter-Datei neben der Binary.
    pub fn config_path() -> std::path::PathBuf {
        std::env::current_exe()
            .unwrap_or_else(|_| std::path::PathBuf::from("swipe-cli"))
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join("swipe_curve_matcher.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_override_keeps_defaults() {
        let value = serde_json::json!({ "dist_max_next": 140, "score_pow": 2.0 });
        let params = Params::from_json(&value).expect("Override erwartet");
        assert_eq!(params.dist_max_next, 140);
        assert_eq!(params.score_pow, 2.0);
        // nicht ueberschriebene Felder behalten die Defaults
        assert_eq!(params.dist_max_start, Params::default().dist_max_start);
        assert_eq!(params.max_candidates, 50);
    }

    #[test]
    fn test_roundtrip_serialization() {
        let params = Params::default();
        let json = serde_json::to_value(&params).expect("Serialisierung erwartet");
        let back = Params::from_json(&json).expect("Deserialisierung erwartet");
        assert_eq!(back.turn_threshold, params.turn_threshold);
        assert_eq!(back.weight_misc, params.weight_misc);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let value = serde_json::json!({ "no_such_param": 1 });
        assert!(Params::from_json(&value).is_ok());
    }
}
