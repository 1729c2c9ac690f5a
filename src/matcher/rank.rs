//! Finales Ranking der Kandidaten.
//!
//! Kombiniert mehrere unabhaengige Signale: den aggregierten Roh-Score, die
//! neue Distanzmetrik und den Fehlerzaehler. Das Maximum wird auf die
//! Qualitaets-Basislinie normiert, damit Scores ueber Laeufe vergleichbar
//! bleiben.

use crate::core::params::Params;
use crate::matcher::scenario::Scenario;

/// Berechnet die finalen Scores aller Kandidaten.
pub fn sort_candidates(candidates: &mut [Scenario], params: &Params) {
    if candidates.is_empty() {
        return;
    }

    let mut min_dist = candidates[0].new_distance();
    let mut max_score_v1 = 0.0f32;
    for c in candidates.iter() {
        min_dist = min_dist.min(c.new_distance());
        max_score_v1 = max_score_v1.max(c.score_v1());
    }

    // Qualitaets-Basislinie: bester Roh-Score abzueglich Fehler-Abschlag
    let mut quality = 0.0f32;
    for c in candidates.iter() {
        let s = c.score_v1() - params.coef_error * c.error_count().min(2) as f32;
        quality = quality.max(s);
    }

    let mut adjusted = Vec::with_capacity(candidates.len());
    let mut max_adjusted = 0.0f32;
    for c in candidates.iter() {
        let sc = c.avg_scores();
        let adj = (params.final_coef_misc * sc.misc
            + params.final_coef_turn * sc.turn.max(0.0).powf(params.final_coef_turn_exp)
            - params.final_score_v1_coef
                * (max_score_v1 - params.final_score_v1_threshold - c.score_v1()).max(0.0)
            - 0.1
                * ((c.new_distance() - min_dist) / params.final_newdist_range as f32)
                    .powf(params.final_newdist_pow))
            / (1.0 + params.final_coef_turn)
            - params.coef_error * c.error_count() as f32;
        max_adjusted = max_adjusted.max(adj);
        adjusted.push(adj);
    }

    for (c, adj) in candidates.iter_mut().zip(adjusted) {
        c.final_score = Some(quality + adj - max_adjusted);
    }
}
