//! Post-Processing abgeschlossener Szenarien.
//!
//! Kurvenabgleich (Soll- vs. Ist-Drehung), Drehwinkel-Transfer,
//! Gegenrichtungs- und Flachheits-Pruefungen, Gerade/Schleifen-Heuristiken,
//! Misc-Boni und die alternative Distanzmetrik. Alles deterministisch:
//! gleiches Szenario und gleiche Kurve ergeben denselben Score.

use crate::core::curve::SpecialPoint;
use crate::core::geometry::{angle_p, dist_line_point, distance, sin_angle};
use crate::matcher::scenario::{MatchCtx, Scenario, StepScore};
use crate::matcher::score::{Column, ScoreSheet};

/// Ein Kurvenblock: zusammenhaengende Schritte gleicher Drehrichtung.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TurnRecord {
    pub start_step: usize,
    pub end_step: usize,
    pub actual: f32,
    pub expected: f32,
    pub expected_real: f32,
    pub corrected: f32,
    pub direction: i32,
    pub corrected_direction: i32,
    pub length_before: f32,
    pub length_after: f32,
    pub length: f32,
    pub unmatched: bool,
}

/// Richtungs-Sentinel fuer nicht analysierbare Bloecke.
const RT_DIRECTION_UNKNOWN: i32 = 99;

fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl Scenario {
    /// Finaler Bewertungslauf fuer ein abgeschlossenes Szenario.
    ///
    /// `false` verwirft das Szenario.
    pub fn post_process(&mut self, ctx: &MatchCtx<'_>) -> bool {
        self.calc_new_distance(ctx);

        let count = self.count();
        if count == 1 {
            // Einzel-Tipper: immer perfekte Nebenscores
            self.eval_score(ctx);
            return true;
        }

        for i in 0..count {
            self.scores[i].misc = self.calc_score_misc(ctx, i);
        }

        let turns = self.calc_turn_score_all(ctx);
        self.calc_straight_score_all(ctx, &turns);
        self.calc_loop_score_all(ctx, &turns);
        self.calc_flat2_score_all(ctx);
        self.shared_turn_workaround(ctx);

        // zwei unabhaengige Fehler-Storni koennen den Zaehler unter null
        // druecken; das betrifft nur schlechte Kandidaten
        if self.error_count < 0 {
            self.error_count = 0;
        }

        self.eval_score(ctx) > 0.0
    }

    // ── Kurvenabgleich ──────────────────────────────────────────

    /// Baut die Kurvenbloecke und bewertet den Soll/Ist-Abgleich.
    fn calc_turn_score_all(&mut self, ctx: &MatchCtx<'_>) -> Vec<TurnRecord> {
        let count = self.count();
        if count < 2 {
            return Vec::new();
        }
        let params = ctx.params;
        let curve = ctx.curve;
        let idx_hist: Vec<usize> = self.index_history.iter().map(|&v| v as usize).collect();

        let mut a_actual = vec![0.0f32; count];
        let mut a_expected = vec![0.0f32; count];
        let mut a_expected_real = vec![0.0f32; count];
        let mut a_same = vec![false; count];
        let mut segment_length = vec![0.0f32; count];

        if count >= 2 && idx_hist[0] == idx_hist[1] {
            a_same[0] = true;
        }

        // Ist-Drehraten aus den Matchpunkten
        let mut i1 = idx_hist[0];
        let mut i_pending = 1usize;
        for i in 1..count - 1 {
            let i2 = idx_hist[i];
            let i3 = idx_hist[i + 1];
            let p1 = curve.point(i1);
            let p2 = curve.point(i2);
            let p3 = curve.point(i3);
            segment_length[i] = distance(p2, p3);
            if i == 1 {
                segment_length[0] = distance(p1, p2);
            }
            a_same[i] = i2 == i3;
            if i3 > i2 && i2 > i1 {
                let actual = angle_p(p2 - p1, p3 - p2).to_degrees();
                // bei Doppelbelegung die Drehung auf alle Treffer verteilen
                for j in i_pending..=i {
                    a_actual[j] = actual / (1 + i - i_pending) as f32;
                }
                i_pending = i + 1;
                i1 = i2;
            }
        }
        for j in i_pending..count {
            a_actual[j] = 0.0;
        }

        // Soll-Drehraten aus den Tastenzentren (roh und korrigiert)
        for i in 1..count - 1 {
            let l1 = self.letter_history[i - 1];
            let l2 = self.letter_history[i];
            let l3 = self.letter_history[i + 1];
            let k1 = ctx.keys.get_raw(l1);
            let k2 = ctx.keys.get_raw(l2);
            let k3 = ctx.keys.get_raw(l3);
            let ck1 = ctx.keys.get(l1);
            let ck2 = ctx.keys.get(l2);
            let ck3 = ctx.keys.get(l3);

            let mut expected = angle_p(k2 - k1, k3 - k2).to_degrees();
            let mut c_expected = angle_p(ck2 - ck1, ck3 - ck2).to_degrees();

            // +180 und -180 sind dieselbe Kehrtwende
            let actual = a_actual[i];
            if expected.abs() >= 130.0 && actual.abs() > 130.0 && expected * actual < 0.0 {
                expected -= 360.0 * sign(expected);
            }
            if c_expected.abs() >= 130.0 && actual.abs() > 130.0 && c_expected * actual < 0.0 {
                c_expected -= 360.0 * sign(c_expected);
            }

            let mut new_expected = expected;
            if c_expected * expected < 0.0 || (expected - actual).abs() > 100.0 {
                // Extremfaelle nicht anfassen
            } else if (actual - expected) * (actual - c_expected) < 0.0 {
                // Ist liegt zwischen roh und korrigiert
                new_expected = actual;
            } else if (actual - c_expected).abs() < (actual - expected).abs() {
                new_expected = c_expected;
            }

            a_expected[i] = new_expected;
            a_expected_real[i] = expected;
        }

        // Doppelbelegung: Soll-Drehung auf beide Buchstaben verteilen
        for i in 1..count - 1 {
            if a_same[i] && !a_same[i + 1] {
                let e = 0.5 * (a_expected[i] + a_expected[i + 1]);
                a_expected[i] = e;
                a_expected[i + 1] = e;
                let er = 0.5 * (a_expected_real[i] + a_expected_real[i + 1]);
                a_expected_real[i] = er;
                a_expected_real[i + 1] = er;
            }
        }

        // Kehrtwenden-Variante fuer geteilte Matchpunkte
        for i in 1..count - 1 {
            if i > 1 && a_same[i - 1] {
                continue;
            }
            let mut actual = 0.0;
            let mut expected = 0.0;
            let mut j = i;
            loop {
                actual += a_actual[j];
                expected += a_expected[j];
                if !a_same[j] {
                    break;
                }
                j += 1;
                if j >= count - 1 {
                    break;
                }
            }
            if i == j || j > i + 1 {
                continue;
            }
            let k1 = ctx.keys.get_raw(self.letter_history[i]);
            let k2 = ctx.keys.get_raw(self.letter_history[j]);
            let tgt = self.actual_curve_tangent(ctx, idx_hist[i]);
            if (k2 - k1).vec2().dot(tgt) < 0.0 && curve.special(idx_hist[i]) != SpecialPoint::UTurn {
                continue;
            }
            let new_expected = expected - 360.0 * sign(expected);
            if expected.abs() >= 100.0
                && actual.abs() > 100.0
                && expected * actual < 0.0
                && (new_expected - actual).abs() < (expected - actual).abs()
                && actual.abs() < 360.0
            {
                for v in a_expected.iter_mut().take(j + 1).skip(i) {
                    *v = new_expected / (j - i + 1) as f32;
                }
            }
        }

        // scheinbar fehlende Schleifen wiederherstellen (kleine, durch die
        // Matchpunkt-Lage versteckte Schleifen)
        for i in 1..count.saturating_sub(2) {
            let sum_actual = a_actual[i] + a_actual[i + 1];
            let sum_expected = a_expected[i] + a_expected[i + 1];
            if sum_expected.abs() > params.loop_threshold1 as f32
                && a_expected[i] * a_expected[i + 1] > 0.0
                && (sum_actual - sum_expected).abs() > 270.0
            {
                let mid = (idx_hist[i] + idx_hist[i + 1]) / 2;
                if sum_expected * curve.turn_smooth(mid) as f32 > 0.0 {
                    let pt1 = curve.point(idx_hist[i]);
                    let pt2 = curve.point(idx_hist[i + 1]);
                    if distance(pt1, pt2) < params.loop_recover_max_len as f32 {
                        let new_value = (sum_actual - 360.0 * sign(sum_actual)) / 2.0;
                        a_actual[i] = new_value;
                        a_actual[i + 1] = new_value;
                    }
                }
            }
        }

        // Soll- und Ist-Kurven blockweise einander zuordnen
        let min_angle = params.turn_min_angle as f32;
        let max_angle = params.turn_max_angle as f32;
        let mut turns: Vec<TurnRecord> = Vec::new();
        let mut typ_exp = vec![0i32; count];
        let mut typ_act = vec![0i32; count];

        let mut i0 = 1usize;
        for i in 1..count - 1 {
            if !(segment_length[i] > params.turn_separation as f32 || i == count - 2) {
                continue;
            }
            // Block [i0, i]: Kurven koennen Blockgrenzen nicht ueberlappen

            // Schritt 1: offensichtliche Paare
            for j in i0..=i {
                if a_expected[j].abs() > 130.0 && a_actual[j].abs() > 130.0 {
                    typ_exp[j] = 2;
                    typ_act[j] = 2;
                } else if a_expected[j].abs() > min_angle
                    && a_actual[j].abs() > min_angle
                    && a_expected[j] * a_actual[j] > 0.0
                {
                    let direction = if a_actual[j] > 0.0 { 1 } else { -1 };
                    typ_exp[j] = direction;
                    typ_act[j] = direction;
                }
            }

            // Schritt 1.5: halbweiche Paare
            for j in i0..=i {
                if (a_expected[j].abs() > min_angle || a_actual[j].abs() > min_angle)
                    && a_expected[j] * a_actual[j] > 0.0
                {
                    let direction = if a_actual[j] > 0.0 { 1 } else { -1 };
                    typ_exp[j] = direction;
                    typ_act[j] = direction;
                }
            }

            // Schritt 2a: eng beieinander liegende, unzugeordnete Kurven
            // verschmelzen (Nutzer schneidet ab)
            for j in i0..i {
                let crossed = (a_expected[j].abs() > min_angle
                    && a_actual[j].abs() < min_angle
                    && a_expected[j + 1].abs() < min_angle
                    && a_actual[j + 1].abs() > min_angle
                    && a_expected[j] * a_actual[j + 1] > 0.0)
                    || (a_expected[j].abs() < min_angle
                        && a_actual[j].abs() > min_angle
                        && a_expected[j + 1].abs() > min_angle
                        && a_actual[j + 1].abs() < min_angle
                        && a_actual[j] * a_expected[j + 1] > 0.0);
                if typ_act[j] == 0
                    && typ_exp[j] == 0
                    && typ_act[j + 1] == 0
                    && typ_exp[j + 1] == 0
                    && crossed
                    && j + 2 < count
                    && (idx_hist[j + 2] as i64 - idx_hist[j + 1] as i64)
                        < params.max_turn_index_gap as i64
                {
                    let a = (a_actual[j] + a_actual[j + 1]) / 2.0;
                    let e = (a_expected[j] + a_expected[j + 1]) / 2.0;
                    a_actual[j] = a;
                    a_actual[j + 1] = a;
                    a_expected[j] = e;
                    a_expected[j + 1] = e;
                    let d = if a > 0.0 { 1 } else { -1 };
                    typ_act[j] = d;
                    typ_exp[j] = d;
                    typ_act[j + 1] = d;
                    typ_exp[j + 1] = d;
                }
            }

            // Schritt 2b: Luecken neben zugeordneten Kurven fuellen
            for j in i0..=i {
                if (typ_exp[j] == 1 || typ_exp[j] == -1) && typ_exp[j] == typ_act[j] {
                    let direction = typ_exp[j];
                    for incr in [-1i64, 1] {
                        let k = j as i64 + incr;
                        if k < i0 as i64 || k > i as i64 {
                            continue;
                        }
                        let k = k as usize;
                        if typ_exp[k] == 0 && a_expected[k] * direction as f32 > 0.0 {
                            typ_exp[k] = direction;
                        }
                        if typ_act[k] == 0 && a_actual[k] * direction as f32 > 0.0 {
                            typ_act[k] = direction;
                        }
                    }
                }
            }

            // Schritt 3: unbestimmte Kurven aufloesen
            for j in i0..=i {
                if typ_exp[j] == 2 && typ_act[j] == 2 {
                    let mut direction = 0;
                    for incr in [-1i64, 1] {
                        let k = j as i64 + incr;
                        if k < i0 as i64 || k > i as i64 {
                            continue;
                        }
                        let k = k as usize;
                        if typ_exp[k] == 0 && a_expected[k].abs() > min_angle {
                            let nd = if a_expected[k] > 0.0 { 1 } else { -1 };
                            if direction == 0 || nd == direction {
                                direction = nd;
                                typ_exp[k] = nd;
                            }
                        }
                        if typ_act[k] == 0 && a_actual[k].abs() > min_angle {
                            let nd = if a_actual[k] > 0.0 { 1 } else { -1 };
                            if direction == 0 || nd == direction {
                                direction = nd;
                                typ_act[k] = nd;
                            }
                        }
                    }
                    if direction == 0 {
                        direction = if a_actual[j] + a_expected[j] > 0.0 { 1 } else { -1 };
                    }
                    typ_act[j] = direction;
                    typ_exp[j] = direction;
                }
            }

            // Schritt 4: Kurvenliste aufbauen, unzugeordnete Kurven erkennen
            let mut current_turn: i64 = -1;
            let mut current_dir = 0i32;
            for j in i0..=i {
                if typ_act[j] == 2 || typ_exp[j] == 2 {
                    // unbestimmte Kurve, sollte nach Schritt 3 nicht vorkommen
                    self.scores[j].turn = -1.0;
                    return Vec::new();
                }

                let mut bad_turn = typ_act[j] == 0 && a_actual[j].abs() > max_angle;
                if typ_exp[j] == 0 && a_expected[j].abs() > max_angle {
                    bad_turn = true;

                    // Schnelle Folge grosser Kurven: die mittlere kleine ist
                    // einhaendig kaum sauber zu zeichnen
                    let min_turn = params.bjr_min_turn as f32;
                    let mut f1 = 0;
                    let mut f2 = 0;
                    if j > i0 && a_expected[j - 1].abs() > min_turn {
                        f1 = 2;
                    } else if j == i0 && i0 > 0 {
                        f1 = 1;
                    }
                    if j < i && a_expected[j + 1].abs() > min_turn {
                        f2 = 2;
                    } else if j == i && i < count - 2 {
                        f2 = 1;
                    }
                    if f1 + f2 > 2 && min_turn > 0.0 && a_expected[j].abs() < min_turn {
                        if self.scores[j].cos < 0.0 {
                            self.error_count -= 1;
                        }
                        self.scores[j].cos = 0.0;
                        bad_turn = false;
                    }
                }

                // Grosse Kurve, kurze Distanz, kleine Gegenkurve: die zweite
                // wird beim schnellen Schreiben oft verschluckt
                if bad_turn && j > 0 && segment_length[j - 1] < params.cst_max_length as f32 {
                    let turn1 = a_expected[j - 1];
                    let turn2 = a_expected[j];
                    if turn1.abs() > params.cst_min_turn1 as f32
                        && turn2.abs() < params.cst_max_turn2 as f32
                    {
                        bad_turn = false;
                    }
                }

                if bad_turn {
                    turns.push(TurnRecord {
                        start_step: j,
                        end_step: j,
                        expected: a_actual[j],
                        actual: a_expected[j],
                        direction: 1,
                        unmatched: true,
                        ..TurnRecord::default()
                    });
                    current_turn = -1;
                    current_dir = 0;
                    continue;
                }

                let p1 = typ_exp[j] == 1 || typ_act[j] == 1;
                let p_1 = typ_exp[j] == -1 || typ_act[j] == -1;

                let mut new_dir = 0;
                let mut overlap = false;
                let mut finish = false;
                if current_dir == 0 && (p1 || p_1) {
                    new_dir = if p1 { 1 } else { -1 };
                } else if (p1 && current_dir == -1) || (p_1 && current_dir == 1) {
                    new_dir = if p1 { 1 } else { -1 };
                    overlap = p1 && p_1;
                    finish = true;
                } else if current_dir != 0 && !(p1 || p_1) {
                    finish = true;
                }

                if finish {
                    if overlap {
                        let t = &mut turns[current_turn as usize];
                        t.end_step = j;
                        if typ_act[j] == current_dir {
                            t.actual += a_actual[j];
                        }
                        if typ_exp[j] == current_dir {
                            t.expected += a_expected[j];
                        }
                    }
                    current_dir = 0;
                }

                if new_dir != 0 {
                    current_dir = new_dir;
                    current_turn = turns.len() as i64;
                    turns.push(TurnRecord {
                        start_step: j,
                        end_step: j,
                        direction: new_dir,
                        ..TurnRecord::default()
                    });
                }

                if current_dir != 0 {
                    let t = &mut turns[current_turn as usize];
                    t.end_step = j;
                    if typ_act[j] == current_dir {
                        t.actual += a_actual[j];
                    }
                    if typ_exp[j] == current_dir {
                        t.expected += a_expected[j];
                    }
                }
            }

            i0 = i + 1;
        }

        // Schritt 5: korrigierte Winkel und Laengen
        let turn_count = turns.len();
        for t in turns.iter_mut() {
            t.corrected = t.actual;
            t.expected_real = (t.start_step..=t.end_step).map(|k| a_expected_real[k]).sum();
        }
        for i in 0..=turn_count {
            let s1 = if i > 0 { turns[i - 1].end_step } else { 0 };
            let s2 = if i < turn_count {
                turns[i].start_step
            } else {
                count - 1
            };
            let l: f32 = (s1..s2).map(|k| segment_length[k]).sum();
            if i > 0 {
                turns[i - 1].length_after = l;
            }
            if i < turn_count {
                turns[i].length_before = l;
            }
        }

        if turn_count > 0 {
            turn_transfer(&mut turns, params);

            // Schritt 6: Bewertung jeder Kurve
            for i in 0..turn_count {
                let mut length = 0.0;
                for k in turns[i].start_step..turns[i].end_step {
                    length += distance(curve.point(idx_hist[k]), curve.point(idx_hist[k + 1]));
                }
                turns[i].length = length;

                let d = turns[i];
                let actual = d.corrected;
                let expected = d.expected;
                let l1 = d.length_before;
                let l2 = d.length_after;
                let len = l1.min(l2);
                let tip_case = i == 0 || i == turn_count - 1;

                let yscale = params.turn2_yscale as f32;
                let xtip = if turn_count == 1 {
                    len
                } else if i > 0 {
                    l2
                } else {
                    l1
                };
                let y = (actual - expected).abs();
                let y1 = yscale;
                let y2 = (y1 * params.turn2_yscaleratio).max(y1 + params.turn2_min_y2 as f32);
                let mut y0 = 0.0;
                if expected.abs() > params.turn2_large_threshold as f32 {
                    y0 = params.turn2_large_y0 as f32;
                } else if tip_case && xtip < params.turn2_xscale_tip as f32 {
                    y0 = params.turn2_yscale_tip as f32
                        * (1.0 - xtip / params.turn2_xscale_tip as f32)
                            .powf(params.turn2_powscale_tip);
                }

                let sc1 = params.turn2_score1;
                let mut score = 1.0;
                let mut unmatched = d.unmatched;
                if actual * expected < 0.0 {
                    score = 0.0;
                } else if expected.abs() > 2.0 * params.turn2_min_y2 as f32
                    && actual.abs() < params.turn2_min_y2 as f32
                {
                    // eine erwartete Kurve ist faktisch zu klein ausgefallen
                    unmatched = true;
                } else if y <= y0 {
                    score = 1.0;
                } else if (y - y0) < y1 {
                    score = 1.0 - sc1 * (y - y0) / y1;
                } else {
                    score = 1.0
                        - sc1
                        - (1.0 - sc1) * (((y - y0) - y1) / (y2 - y1)).powf(params.turn2_score_pow);
                }

                if unmatched {
                    score -= params.turn_score_unmatched;
                }
                if score < 0.0 {
                    // behalten, falls alle anderen noch schlechter sind
                    score = 0.01;
                }

                // seltene Ignore-Faelle
                let mut ignore = false;
                if unmatched {
                    if i == turn_count - 1
                        && l2 < params.turn2_ignore_maxlen as f32
                        && l1 > params.turn2_ignore_minlen as f32
                    {
                        let gap = ((expected - actual).abs().to_radians()).sin() * l2;
                        if gap < params.turn2_ignore_maxgap as f32 {
                            ignore = true;
                        }
                    }
                    if i > 0 && i < turn_count - 1 {
                        let exp_before = turns[i - 1].expected;
                        let exp_after = turns[i + 1].expected;
                        if exp_before.abs() > params.turn2_ignore_zz_minangle as f32
                            && exp_after.abs() > params.turn2_ignore_zz_minangle as f32
                            && exp_before * exp_after > 0.0
                            && exp_after * expected < 0.0
                            && expected.abs() < params.turn2_ignore_zz_maxangle as f32
                            && (l1 < params.turn2_ignore_zz_maxlen as f32
                                || l2 < params.turn2_ignore_zz_maxlen as f32)
                        {
                            ignore = true;
                        }
                    }
                    if ignore && score < params.turn2_ignore_score {
                        score = params.turn2_ignore_score;
                    }
                }

                turns[i].unmatched = unmatched;
                let step = turns[i].end_step;
                if self.scores[step + 1].turn >= 0.0 {
                    self.scores[step + 1].turn = score;
                }
            }

            // Kehrtwenden gegen ST2-Spezialpunkte querpruefen
            for i in 1..count - 1 {
                if a_same[i] || a_same[i - 1] {
                    continue;
                }
                let curve_index = idx_hist[i];
                let mut st = curve.special(curve_index);
                if st == SpecialPoint::None {
                    let w = params.min_turn_index_gap_st as usize;
                    let lo = curve_index.saturating_sub(w);
                    let hi = (curve_index + w).min(curve.size() - 1);
                    if (lo..=hi).any(|j| curve.special(j) == SpecialPoint::SmallTurn) {
                        st = SpecialPoint::SmallTurn;
                    }
                }
                let expected = a_expected[i];

                let mut fail = 0.0f32;
                if expected.abs() > params.st2_max as f32
                    && st != SpecialPoint::UTurn
                    && st != SpecialPoint::SmallTurn
                {
                    if st != SpecialPoint::SharpTurn {
                        fail = 1.0;
                    }
                } else if expected.abs() < params.st2_min as f32 && st == SpecialPoint::UTurn {
                    let mut reason = 0;
                    let local_turn = self.local_turn(ctx, curve_index);
                    if local_turn.abs() < params.st2_ignore {
                        // zufaelliges ST2 (zitternde Hand)
                        reason = 1;
                    } else {
                        for (j, d) in turns.iter().enumerate() {
                            if d.expected.abs() >= params.st2_min as f32
                                && d.expected.abs() <= 540.0 - 2.0 * params.st2_min as f32
                                && i >= d.start_step
                                && i <= d.end_step
                                && d.length < params.curve_score_min_dist as f32
                            {
                                reason = 10 + j;
                                break;
                            } else if i >= d.start_step
                                && i <= d.end_step
                                && d.start_step < d.end_step
                            {
                                // lange Kurven behandeln wir nicht
                                reason = 2;
                                break;
                            }
                        }
                    }
                    if reason == 0 {
                        fail = 1.0;
                    }
                }
                if fail > 0.0 {
                    let psc = &mut self.scores[i + 1].turn;
                    if *psc == 0.0 {
                        *psc = 1.0;
                    }
                    *psc -= fail * params.sharp_turn_penalty;
                }
            }
        } else {
            // keine Kurve = immer ein perfekter Abgleich
            for i in 1..count - 1 {
                if self.scores[i + 1].turn >= 0.0 {
                    self.scores[i + 1].turn = 1.0;
                }
            }
        }

        // Gegenrichtungs-Pruefung entlang der theoretischen Kurvenliste
        if turns.is_empty() {
            self.check_reverse_turn(ctx, 0, count - 1, 0, 0);
        } else {
            for t in turns.iter_mut() {
                t.corrected_direction = t.direction;
                if t.actual.abs() > 140.0 || t.expected.abs() > 140.0 {
                    if t.start_step == t.end_step {
                        let ci = self.index_history[t.end_step] as usize;
                        if curve.special(ci) != SpecialPoint::UTurn {
                            // ST2 wird bereits in der Pruefung selbst korrigiert
                            let ts = curve.turn_smooth(ci);
                            t.corrected_direction = ts.signum();
                        }
                    } else if t.start_step + 1 == t.end_step
                        && t.length > params.turn_separation as f32 / 2.0
                    {
                        let t1 = curve.turn_smooth(self.index_history[t.start_step] as usize);
                        let t2 = curve.turn_smooth(self.index_history[t.end_step] as usize);
                        if t1 != 0 && t2 != 0 && t1 * t2 < 0 {
                            // Teil-Schleife in einer Mehr-Buchstaben-Kurve
                            t.corrected_direction = RT_DIRECTION_UNKNOWN;
                        }
                    }
                }
            }
            for i in 0..turns.len() {
                let d1 = turns[i];
                if i == 0 {
                    self.check_reverse_turn(ctx, 0, d1.start_step, 0, d1.corrected_direction);
                }
                if d1.end_step > d1.start_step {
                    self.check_reverse_turn(
                        ctx,
                        d1.start_step,
                        d1.end_step,
                        d1.corrected_direction,
                        d1.corrected_direction,
                    );
                }
                if i < turns.len() - 1 {
                    let d2 = turns[i + 1];
                    self.check_reverse_turn(
                        ctx,
                        d1.end_step,
                        d2.start_step,
                        d1.corrected_direction,
                        d2.corrected_direction,
                    );
                } else {
                    self.check_reverse_turn(ctx, d1.end_step, count - 1, d1.corrected_direction, 0);
                }
            }
        }

        // lokal flache Abschnitte: zwischen Spitzen, Geraden und 180°-Kurven
        // muss die Kurve nahe an der Sehne bleiben
        let is_flat = |a: f32| {
            a.abs() < params.flat_max_angle as f32
                || (a.abs() - 180.0).abs() < params.flat_max_angle as f32
        };
        for i in 0..count - 1 {
            if (i == 0 || is_flat(a_expected[i])) && (i == count - 2 || is_flat(a_expected[i + 1]))
            {
                let i1 = idx_hist[i];
                let i2 = idx_hist[i + 1];
                let pt1 = curve.point(i1);
                let pt2 = curve.point(i2);
                let mut max_dist = 0.0f32;
                let mut j = i1 + 1;
                while j + 1 < i2 {
                    max_dist = max_dist.max(dist_line_point(pt1, pt2, curve.point(j)));
                    j += 2;
                }
                let score = (max_dist / params.flat_max_deviation as f32 - 1.0).max(0.0);
                if score > 0.0 {
                    self.scores[i].misc -= 0.5 * params.flat_score * score;
                    self.scores[i + 1].misc -= 0.5 * params.flat_score * score;
                }
            }
        }

        turns
    }

    /// Summierte lokale Drehrate rund um einen Kurvenindex.
    fn local_turn(&self, ctx: &MatchCtx<'_>, index: usize) -> i32 {
        let size = ctx.curve.size() as i64;
        let turn0 = ctx.curve.turn_smooth(index);
        let mut total = turn0;
        for dir in [-1i64, 1] {
            for j in 1..=4i64 {
                let k = index as i64 + dir * j;
                if k < 0 || k >= size {
                    break;
                }
                let turn = ctx.curve.turn_smooth(k as usize);
                if turn * turn0 < 0 {
                    break;
                }
                total += turn;
            }
        }
        total
    }

    /// Kurven-Art am Matchpunkt: 1 = runde Kurve, 0 = spitze Kurve,
    /// -1 = Gegenkurve (Schleife).
    pub(crate) fn get_turn_kind(&self, ctx: &MatchCtx<'_>, step: usize) -> i32 {
        let curve = ctx.curve;
        let i = self.index_history[step] as usize;
        let im1 = i.saturating_sub(1);
        let ip1 = (i + 1).min(curve.size() - 1);
        if curve.turn(i).abs() > 120
            || (curve.turn(im1) + curve.turn(i) + curve.turn(ip1)).abs() > 150
        {
            return 0;
        }
        let tg_expected = self.computed_curve_tangent(ctx, step);
        let tg_actual = self.actual_curve_tangent(ctx, i);
        if tg_expected.dot(tg_actual) < 0.0 {
            -1
        } else {
            1
        }
    }

    /// Prueft Drehraten gegen die erwartete Richtung zwischen zwei Kurven.
    fn check_reverse_turn(
        &mut self,
        ctx: &MatchCtx<'_>,
        step1: usize,
        step2: usize,
        direction1: i32,
        direction2: i32,
    ) {
        if direction1 == RT_DIRECTION_UNKNOWN || direction2 == RT_DIRECTION_UNKNOWN {
            return;
        }
        let params = ctx.params;
        let curve = ctx.curve;
        let i1 = self.index_history[step1] as usize;
        let i2 = self.index_history[step2] as usize;

        let threshold = params.rt_turn_threshold;
        let coef_score = if direction1 != 0 && direction2 != 0 {
            params.rt_score_coef
        } else {
            params.rt_score_coef_tip
        };
        let tip_gap = params.rt_tip_gaps as usize;

        let mut direction1 = direction1;
        let mut direction2 = direction2;
        let mut st2 = 0;
        if curve.hard_turn(i1) == SpecialPoint::UTurn {
            let kind = self.get_turn_kind(ctx, step1);
            if kind == 0 {
                st2 |= 1;
            } else if kind < 0 {
                direction1 = -direction1;
            }
        }
        if curve.hard_turn(i2) == SpecialPoint::UTurn {
            let kind = self.get_turn_kind(ctx, step2);
            if kind == 0 {
                st2 |= 2;
            } else if kind < 0 {
                direction2 = -direction2;
            }
        }

        let lo = i1.max(tip_gap);
        let hi = i2.min(curve.size().saturating_sub(1 + tip_gap));

        if st2 == 0 {
            // Standard-Pruefung ohne spitze Kehrtwenden
            let mut direction = direction1;
            let mut bad = 0;
            let mut i = lo;
            while i <= hi {
                let turn = (0.5 * curve.turn_smooth(i) as f32
                    + 0.25 * curve.turn_smooth(i.saturating_sub(1)) as f32
                    + 0.25 * curve.turn_smooth(i) as f32) as i32;
                if turn.abs() > threshold && (turn * direction < 0 || direction == 0) {
                    if direction2 != direction1
                        && direction == direction1
                        && turn * direction2 >= 0
                    {
                        direction = direction2;
                        continue;
                    }
                    bad += 1;
                }
                i += 1;
            }
            let score = bad as f32 / (i2 as f32 - i1 as f32 + 1.0);
            if score > 0.0 {
                for k in step1..=step2 {
                    self.scores[k].misc -= coef_score * score / (step2 - step1 + 1) as f32;
                }
            }
        }

        // Lauf-Zerlegung: zu viele Richtungs-/Flachheits-Wechsel bedeuten
        // eine uebersprungene Taste (laeuft auch im Standardfall mit)
        const TYPE_NONE: i32 = 99;
        struct Part {
            start: usize,
            end: usize,
            typ: i32,
        }
        let mut parts: Vec<Part> = Vec::new();
        let mut last_type = TYPE_NONE;
        let mut type_count = 0;
        let mut start_index = 0usize;
        let mut i = lo;
        while i <= hi {
            if i > i1 && i < i2 && curve.special(i) == SpecialPoint::UTurn {
                return;
            }
            let turn = curve.turn_smooth(i);
            let typ = if turn.abs() < params.rt2_low {
                0
            } else if turn >= params.rt2_high {
                1
            } else if turn <= -params.rt2_high {
                -1
            } else {
                TYPE_NONE
            };
            if typ == TYPE_NONE {
                i += 1;
                continue;
            }
            if typ == last_type {
                type_count += 1;
            } else {
                let needed = if last_type != 0 {
                    params.rt2_count_nz
                } else {
                    params.rt2_count_z
                };
                if last_type != TYPE_NONE && type_count >= needed {
                    parts.push(Part {
                        start: start_index,
                        end: i - 1,
                        typ: last_type,
                    });
                }
                type_count = 1;
                last_type = typ;
                start_index = i;
            }
            i += 1;
        }
        let needed = if last_type != 0 {
            params.rt2_count_nz
        } else {
            params.rt2_count_z
        };
        if last_type != TYPE_NONE && type_count >= needed {
            parts.push(Part {
                start: start_index,
                end: hi,
                typ: last_type,
            });
        }

        // flache Laeufe mit grosser Drehsumme umklassifizieren
        for p in parts.iter_mut() {
            if p.typ == 0 {
                let turn: i32 = (p.start..=p.end).map(|j| curve.turn_smooth(j)).sum();
                if turn.abs() > params.rt2_flat_max {
                    p.typ = if turn > 0 { 1 } else { -1 };
                }
            }
        }
        let mut i = 0;
        while i + 1 < parts.len() {
            if parts[i].typ == parts[i + 1].typ {
                parts[i].end = parts[i + 1].end;
                parts.remove(i + 1);
            } else {
                i += 1;
            }
        }

        let n = parts.len();
        let mut score = 0.0;
        if n > 3 {
            score = 1.0;
        } else if n == 3 && parts[1].typ != 0 {
            score = 1.0;
        } else if n >= 2 {
            let mut count0 = 0;
            for p in &parts {
                if p.typ == 0 {
                    count0 += 1;
                    if step2 == step1 + 1 {
                        let c = ((p.start + p.end) as i64 - (i2 + i1) as i64) / 2;
                        if c.abs() >= params.rt2_offcenter as i64 {
                            score = 1.0;
                        }
                    }
                }
            }
            if count0 >= 2 {
                score = 1.0;
            }
        }

        if score > 0.0 {
            for k in step1..=step2 {
                self.scores[k].misc -=
                    params.rt2_score_coef * score / (step2 - step1 + 1) as f32;
            }
        }
    }

    // ── Gerade/Schleifen/Flach-Heuristiken ─────────────────────

    fn calc_straight_score_all(&mut self, ctx: &MatchCtx<'_>, turns: &[TurnRecord]) {
        let params = ctx.params;
        let count = self.count();
        let straight = ctx.curve.straight;
        if straight < 0.0 {
            return;
        }

        let mut real_turn_count = 0;
        for d in turns {
            let small = d.expected_real.abs() < 10.0
                || ((d.length_after < 45.0 || d.length_before < 45.0)
                    && d.expected_real.abs() < 30.0);
            if !small {
                real_turn_count += 1;
            }
        }

        let mut result = 0.0;
        if straight < params.straight_threshold_low {
            // Nutzer hat eine Gerade gezogen: Kandidaten mit echten Kurven
            // passen nicht
            let coef = 1.0 - straight;
            if real_turn_count > 0 {
                result = -params.straight_score1 * coef * real_turn_count as f32;
            }

            // stimmt die Orientierung der Geraden?
            let a_sin = if self.letter_history[0] == self.letter_history[count - 1] {
                1.0
            } else {
                let k1 = ctx.keys.get_raw(self.letter_history[0]);
                let k2 = ctx.keys.get_raw(self.letter_history[count - 1]);
                let p1 = ctx.curve.point(0);
                let p2 = ctx.curve.point(self.index);
                let kv = (k2 - k1).vec2();
                let pv = (p2 - p1).vec2();
                if kv.length_squared() == 0.0 || pv.length_squared() == 0.0 {
                    0.0
                } else {
                    sin_angle(kv, pv).abs()
                }
            };
            let coef_slope = (1.0 - a_sin * a_sin).max(0.0).sqrt() - 1.0;
            result += params.straight_slope * coef_slope;
        } else if straight > params.straight_threshold_high && real_turn_count == 0 {
            // kurvige Eingabe: Strafe fuer geometrisch gerade Kandidaten
            let coef = (straight - 1.0).min(1.0);
            result = -params.straight_score2 * coef;
        }

        if result != 0.0 {
            for i in 0..count {
                self.scores[i].misc += result / count as f32;
            }
        }
    }

    fn calc_loop_score_all(&mut self, ctx: &MatchCtx<'_>, turns: &[TurnRecord]) {
        let params = ctx.params;
        for (i, d) in turns.iter().enumerate() {
            for j in d.start_step..=d.end_step {
                if self.get_turn_kind(ctx, j) != -1 {
                    continue;
                }
                let exp = d.expected;
                let mut ok = false;
                if exp.abs() > params.loop_threshold1 as f32 {
                    ok = true;
                } else if exp.abs() > params.loop_threshold2 as f32
                    && i > 0
                    && i < turns.len() - 1
                {
                    let exp1 = turns[i - 1].expected;
                    let exp2 = turns[i + 1].expected;
                    if (exp1 * exp < 0.0 && exp1.abs() > params.loop_threshold3 as f32)
                        || (exp2 * exp < 0.0 && exp2.abs() > params.loop_threshold3 as f32)
                    {
                        ok = true;
                    }
                }
                if !ok {
                    self.scores[j].misc -= params.loop_penalty;
                }
            }
        }
    }

    /// Hoehe der Kurve ueber dem x-Bereich der Schritte [i1, i2].
    ///
    /// Nicht einfach ymax - ymin: schwer erreichbare Bereiche erzeugen
    /// bogenfoermige Striche, deshalb spaltenweise Abtastung.
    fn flat2_height(&self, ctx: &MatchCtx<'_>, s1: usize, s2: usize) -> i32 {
        let curve = ctx.curve;
        let mut xmin = 0;
        let mut xmax = 0;
        for i in s1..=s2 {
            let x = ctx.keys.get_raw(self.letter_history[i]).x;
            if x < xmin || xmin == 0 {
                xmin = x;
            }
            if x > xmax {
                xmax = x;
            }
        }

        let mut max_height = 0;
        let index1 = self.index_history[s1] as usize;
        let index2 = self.index_history[s2] as usize;
        let step = ctx.keys.average_width.max(1);
        let mut x = xmin;
        while x < xmax {
            let mut ymin = 0;
            let mut ymax = 0;
            for index in index1..index2 {
                let p1 = curve.point(index);
                let p2 = curve.point(index + 1);
                if p1.x == p2.x {
                    continue;
                }
                if (p1.x - x) as i64 * (p2.x - x) as i64 <= 0 {
                    let y =
                        p1.y + ((p2.y - p1.y) as f32 * (x - p1.x) as f32 / (p2.x - p1.x) as f32)
                            as i32;
                    if y < ymin || ymin == 0 {
                        ymin = y;
                    }
                    if y > ymax {
                        ymax = y;
                    }
                }
            }
            max_height = max_height.max(ymax - ymin);
            x += step;
        }
        max_height
    }

    fn flat2_score_part(&mut self, ctx: &MatchCtx<'_>, s1: usize, s2: usize) {
        let height = self.flat2_height(ctx, s1, s2);
        if height > ctx.params.flat2_max_height {
            for j in s1..=s2 {
                self.scores[j].misc -= ctx.params.flat2_score_max / (s2 - s1 + 1) as f32;
            }
        }
    }

    /// Einreihige Wortteile muessen auch eine flache Kurve zeichnen.
    ///
    /// Funktioniert nur fuer zeilenbasierte Layouts, nicht fuer runde.
    fn calc_flat2_score_all(&mut self, ctx: &MatchCtx<'_>) {
        let count = self.count();
        let mut i1 = 0;
        let y = ctx.keys.get_raw(self.letter_history[0]).y;
        while i1 < count - 1 && ctx.keys.get_raw(self.letter_history[i1 + 1]).y == y {
            i1 += 1;
        }
        if i1 >= 2 {
            self.flat2_score_part(ctx, 0, i1);
        }
        if i1 < count - 1 {
            let mut i2 = count - 1;
            let y = ctx.keys.get_raw(self.letter_history[i2]).y;
            while i2 > 0 && ctx.keys.get_raw(self.letter_history[i2 - 1]).y == y {
                i2 -= 1;
            }
            if i2 < count - 2 {
                self.flat2_score_part(ctx, i2, count - 1);
            }
        }
    }

    // ── Misc-Boni und Workarounds ───────────────────────────────

    fn calc_score_misc(&self, ctx: &MatchCtx<'_>, i: usize) -> f32 {
        let params = ctx.params;
        let curve = ctx.curve;
        let count = self.count();
        let mut score = 0.0;

        // Ein-Punkt-Segment an der Spitze: der Strich war zu kurz
        if (i == 0 && self.index_history[1] <= 1)
            || (i == count - 1
                && self.index_history[count - 1] - self.index_history[count - 2] <= 1)
        {
            score -= params.tip_small_segment;
        }

        // Slow-Down- und optionale Punkte innerhalb eines Segments muessen
        // einer Taste zugeordnet sein
        if i > 0 {
            let maxgap = params.speed_max_index_gap as usize;
            let from = self.index_history[i - 1] as usize + maxgap;
            let to = (self.index_history[i] as usize).saturating_sub(maxgap);
            for j in from..to {
                let st = curve.special(j);
                if (st == SpecialPoint::SlowDown || st == SpecialPoint::SmallTurn)
                    && curve.turn_smooth(j).abs() < params.speed_min_angle
                {
                    score -= if st == SpecialPoint::SlowDown {
                        params.speed_penalty
                    } else {
                        params.st5_score
                    };
                }
            }
        }

        // entgegengesetzte Tangente an der Kurvenspitze: kleine Kurzkurven,
        // die der Kurvenabgleich uebersieht
        let cl = curve.size();
        if cl > 4 && count > 1 && (i == 0 || i == count - 1) {
            let (tg_act, tg_exp) = if i == 0 {
                (
                    (curve.point(2) - curve.point(0)).vec2(),
                    (ctx.keys.get(self.letter_history[1]) - ctx.keys.get(self.letter_history[0]))
                        .vec2(),
                )
            } else {
                (
                    (curve.point(cl - 1) - curve.point(cl - 3)).vec2(),
                    (ctx.keys.get(self.letter_history[count - 1])
                        - ctx.keys.get(self.letter_history[count - 2]))
                    .vec2(),
                )
            };
            if tg_act.length_squared() > 0.0 && tg_exp.length_squared() > 0.0 {
                let acos = tg_act.dot(tg_exp) / (tg_act.length() * tg_exp.length());
                if acos < 0.0 {
                    score += params.bad_tangent_score * acos;
                }
            }
        }

        score
    }

    /// Geteilte scharfe Kurve zwischen zwei Tasten: der Abweichungs-Score
    /// arbeitet dort nicht, deshalb neutralisieren.
    fn shared_turn_workaround(&mut self, ctx: &MatchCtx<'_>) {
        let params = ctx.params;
        let curve = ctx.curve;
        let count = self.count();
        let gap = params.max_turn_index_gap as usize;
        for i in 0..count - 1 {
            let i1 = self.index_history[i] as usize;
            let i2 = self.index_history[i + 1] as usize;
            for j in i1 + 1..i2.saturating_sub(1) {
                if curve.hard_turn(j) == SpecialPoint::SharpTurn && j - i1 <= gap && i2 - j <= gap
                {
                    if self.scores[i + 1].curve < 0.0 {
                        // der Schritt war nur wegen dieser Kurve ein Fehler
                        self.error_count -= 1;
                    }
                    self.scores[i + 1].curve = 0.0;
                    let len = distance(curve.point(i1), curve.point(i2));
                    let dlp = dist_line_point(curve.point(i1), curve.point(i2), curve.point(j));
                    if dlp > len * 1.1 {
                        self.scores[i + 1].misc -= params.sp_bad;
                    }
                }
            }
        }
    }

    // ── Neue Distanz ────────────────────────────────────────────

    /// Alternative gewichtete Lp-Distanz zwischen Matchpunkten und Tasten.
    fn calc_new_distance(&mut self, ctx: &MatchCtx<'_>) {
        let params = ctx.params;
        let curve = ctx.curve;
        let count = self.count();
        let coef_by_class = |st: SpecialPoint, tip: bool| -> f32 {
            if tip {
                return params.newdist_ctip;
            }
            match st {
                SpecialPoint::None => 1.0,
                SpecialPoint::SharpTurn => params.newdist_c1,
                SpecialPoint::UTurn => params.newdist_c2,
                SpecialPoint::SlowDown => params.newdist_c3,
                SpecialPoint::Inflection => 0.0,
                SpecialPoint::SmallTurn => params.newdist_c5,
                SpecialPoint::MovableTurn => params.newdist_c6,
            }
        };
        let exponent = params.newdist_pow;

        let mut dist_exp = 0.0;
        let mut ctotal = 0.0;
        for i in 0..count {
            let key = ctx.keys.get(self.letter_history[i]);
            let index = self.index_history[i] as usize;
            let pt = curve.point(index);
            let speed = curve.speed(index);
            let st = curve.special(index);
            let tip = i == 0 || i == count - 1;

            let dist = if (st == SpecialPoint::SmallTurn || st == SpecialPoint::MovableTurn)
                && !tip
            {
                // bewegliche Punkte: senkrechter Abstand zur lokalen Sehne
                let v1 = (curve.point(self.index_history[i + 1] as usize)
                    - curve.point(self.index_history[i - 1] as usize))
                .vec2();
                let v2 = (key - pt).vec2();
                if v1.length_squared() > 0.0 {
                    v1.perp_dot(v2).abs() / v1.length()
                } else {
                    distance(key, pt)
                }
            } else {
                distance(key, pt)
            };

            let c = coef_by_class(st, tip) / (1.0 + params.newdist_speed * speed as f32 / 1000.0);
            ctotal += c;
            dist_exp += c * dist.powf(exponent);
        }

        self.new_dist = if ctotal > 0.0 {
            (count as f32).powf(params.newdist_length_bias_pow)
                * (dist_exp / ctotal).powf(1.0 / exponent)
        } else {
            0.0
        };
    }

    // ── Aggregation ─────────────────────────────────────────────

    /// Kombiniert alle Einzel-Scores zu einem Roh-Score (`score_v1`).
    pub(crate) fn eval_score(&mut self, ctx: &MatchCtx<'_>) -> f32 {
        let params = ctx.params;
        let count = self.count();
        if count == 0 {
            self.score_v1 = Some(0.0);
            return 0.0;
        }

        let mut segment_length = vec![0.0f32; count];
        let mut total_length = 0.0;
        for i in 0..count.saturating_sub(1) {
            let d = distance(
                ctx.keys.get(self.letter_history[i]),
                ctx.keys.get(self.letter_history[i + 1]),
            );
            segment_length[i] = d;
            total_length += d;
        }

        let weights = [
            params.weight_cos,
            params.weight_curve,
            -params.weight_misc,
            params.weight_distance,
            -params.weight_length,
            params.weight_turn,
        ];
        let mut sheet = ScoreSheet::new(weights, params.score_pow);

        for i in 0..count {
            // Tasten-Zeile
            sheet.start_line();
            sheet.set_line_coef(1.0 / count as f32);
            sheet.add_score(self.scores[i].distance, Column::Distance);
            if i > 0 && i < count - 1 {
                sheet.add_score(self.scores[i + 1].turn, Column::Turn);
            } else if i == 1 && count == 2 {
                // kein Bias zugunsten von 3+-Buchstaben-Szenarien
                sheet.add_score(1.0, Column::Turn);
            } else if i == 0 && count == 1 {
                // Einzel-Tipper hat immer perfekte Nebenscores
                sheet.add_score(1.0, Column::Turn);
                sheet.add_score(1.0, Column::Angle);
                sheet.add_score(1.0, Column::Curve);
            }
            sheet.end_line();

            // Segment-Zeile
            sheet.start_line();
            if i < count - 1 && total_length > 0.0 {
                sheet.set_line_coef(segment_length[i] / total_length);
                sheet.add_score(self.scores[i + 1].cos, Column::Angle);
                sheet.add_score(self.scores[i + 1].curve, Column::Curve);
                sheet.add_score(self.scores[i + 1].length, Column::Length);
            }
            sheet.add_bonus(self.scores[i].misc, Column::Misc);
            sheet.end_line();
        }

        let score1 = sheet.score();
        let score = score1 * (1.0 + params.length_penalty * count as f32);
        assert!(
            score.is_finite(),
            "Score nicht endlich fuer '{}'",
            String::from_utf8_lossy(&self.letter_history)
        );
        if self.debug {
            log::debug!(
                "eval_score {}: {:.3} -> {:.3} (err={}, good={})",
                String::from_utf8_lossy(&self.letter_history),
                score1,
                score,
                self.error_count,
                self.good_count
            );
        }

        self.avg_score = StepScore {
            distance: sheet.column_avg(Column::Distance),
            turn: sheet.column_avg(Column::Turn),
            cos: sheet.column_avg(Column::Angle),
            curve: sheet.column_avg(Column::Curve),
            length: sheet.column_avg(Column::Length),
            misc: sheet.column_avg(Column::Misc),
        };
        self.min_score = StepScore {
            distance: sheet.column_min(Column::Distance),
            turn: sheet.column_min(Column::Turn),
            cos: sheet.column_min(Column::Angle),
            curve: sheet.column_min(Column::Curve),
            length: sheet.column_min(Column::Length),
            misc: sheet.column_min(Column::Misc),
        };
        self.min_total = sheet.min_total();
        self.score_v1 = Some(score);
        score
    }
}

/// Drehwinkel-Transfer zwischen Nachbarkurven.
///
/// Nutzer schneiden enge Folgen ab; bis zu
/// `turn_max_transfer * (1 - len/turn_optim)` Grad duerfen zwischen
/// benachbarten Kurven wandern, damit solche Striche nicht als unzugeordnet
/// gelten.
fn turn_transfer(turns: &mut [TurnRecord], params: &crate::core::params::Params) {
    let n = turns.len();
    loop {
        let mut change = false;
        let mut give = vec![0.0f32; n * 2];

        for i in 0..n {
            let d = turns[i];
            let mut nb_wants = [0.0f32; 2];
            for ni in 0..2usize {
                let j = i as i64 - 1 + 2 * ni as i64;
                if j < 0 || j >= n as i64 {
                    continue;
                }
                let d2 = turns[j as usize];
                let len = if ni == 1 {
                    d.length_after
                } else {
                    d.length_before
                };
                let max_change =
                    params.turn_max_transfer as f32 * (1.0 - len / params.turn_optim as f32);
                if max_change <= 0.0 {
                    continue;
                }
                nb_wants[ni] =
                    (d2.expected.max(d2.actual - max_change)).min(d2.actual + max_change)
                        - d2.corrected;
            }

            let i_want = d.expected - d.corrected;
            let they_want = nb_wants[0] + nb_wants[1];
            let give_count = i32::from(nb_wants[0] != 0.0) + i32::from(nb_wants[1] != 0.0);
            if give_count == 0 {
                continue;
            }
            let sgn = sign(they_want);
            if they_want * i_want > 0.0 {
                // hier gibt es nichts zu verteilen
            } else if they_want.abs() <= i_want.abs() {
                give[i * 2] = -nb_wants[0];
                give[i * 2 + 1] = -nb_wants[1];
            } else if give_count <= 1 {
                let f0 = if nb_wants[0] != 0.0 { 1.0 } else { 0.0 };
                let f1 = if nb_wants[1] != 0.0 { 1.0 } else { 0.0 };
                give[i * 2] = sgn * f0 * i_want.abs();
                give[i * 2 + 1] = sgn * f1 * i_want.abs();
            } else {
                let w1 = nb_wants[0].abs();
                let w2 = nb_wants[1].abs();
                let mut g1 = 0.0;
                let mut g2 = 0.0;
                let mut rest = i_want.abs();
                let minw = w1.min(w2);
                if rest < minw * 2.0 {
                    g1 += rest / 2.0;
                    g2 += rest / 2.0;
                } else {
                    g1 += minw;
                    g2 += minw;
                    rest -= minw * 2.0;
                    if g1 > g2 {
                        g1 += rest;
                    } else {
                        g2 += rest;
                    }
                }
                give[i * 2] = sgn * g1;
                give[i * 2 + 1] = sgn * g2;
            }
        }

        for i in 0..n {
            for ni in 0..2usize {
                let j = i as i64 - 1 + 2 * ni as i64;
                if (i as i64) > j || j < 0 || j >= n as i64 {
                    continue;
                }
                let j = j as usize;
                let t_ij = give[i * 2 + ni];
                let t_ji = give[j * 2 + (1 - ni)];
                let absv = t_ij.abs().min(t_ji.abs());
                if absv <= 2.0 {
                    continue;
                }
                let diff = turns[i].expected - turns[i].corrected;
                let sens = if diff > 0.0 { 1.0 } else { -1.0 };
                turns[i].corrected += sens * absv;
                turns[j].corrected -= sens * absv;
                change = true;
            }
        }

        if !change {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::Params;
    use crate::matcher::scenario::tests::Fixture;
    use crate::matcher::Stats;
    use approx::assert_relative_eq;

    fn run_to_candidates(fx: &Fixture) -> Vec<Scenario> {
        let ctx = fx.ctx();
        let mut st = Stats::default();
        let mut frontier = vec![Scenario::root(&fx.tree)];
        let mut finished = Vec::new();
        while let Some(scenario) = frontier.pop() {
            let mut children = Vec::new();
            scenario.next_key(&ctx, &mut children, &mut st);
            for child in children {
                if child.is_finished() {
                    finished.push(child);
                } else {
                    frontier.push(child);
                }
            }
        }
        finished
    }

    #[test]
    fn test_post_process_is_deterministic() {
        let fx = Fixture::new(&["tip"], b"tip");
        let ctx = fx.ctx();
        let mut candidates = run_to_candidates(&fx);
        assert_eq!(candidates.len(), 1);
        let mut a = candidates[0].clone();
        let mut b = candidates.remove(0);
        assert!(a.post_process(&ctx));
        assert!(b.post_process(&ctx));
        assert_eq!(a.score_v1(), b.score_v1());
        assert_eq!(a.new_distance(), b.new_distance());
    }

    #[test]
    fn test_straight_word_scores_well() {
        let fx = Fixture::new(&["tip"], b"tip");
        let ctx = fx.ctx();
        let mut candidates = run_to_candidates(&fx);
        let s = &mut candidates[0];
        assert!(s.post_process(&ctx));
        assert!(s.score_v1() > 0.3, "score_v1 = {}", s.score_v1());
        // alle Segment-Richtungen passen
        assert!(s.avg_scores().cos >= 0.8);
        // exakt getroffene Tasten ergeben eine kleine neue Distanz
        assert!(s.new_distance() < 40.0);
    }

    #[test]
    fn test_turn_transfer_moves_angle_between_neighbours() {
        let params = Params::default();
        let mut turns = vec![
            TurnRecord {
                start_step: 1,
                end_step: 1,
                actual: 120.0,
                expected: 90.0,
                corrected: 120.0,
                direction: 1,
                length_before: 50.0,
                length_after: 20.0,
                ..TurnRecord::default()
            },
            TurnRecord {
                start_step: 2,
                end_step: 2,
                actual: 60.0,
                expected: 90.0,
                corrected: 60.0,
                direction: 1,
                length_before: 20.0,
                length_after: 50.0,
                ..TurnRecord::default()
            },
        ];
        turn_transfer(&mut turns, &params);
        // Gesamtdrehung bleibt erhalten, beide naehern sich ihrem Soll
        assert_relative_eq!(turns[0].corrected + turns[1].corrected, 180.0, epsilon = 1e-3);
        assert!(turns[0].corrected < 120.0);
        assert!(turns[1].corrected > 60.0);
    }

    #[test]
    fn test_v_stroke_matches_turn() {
        // "hey": h -> e ist eine scharfe Kehre bei 'e'
        let fx = Fixture::new(&["hey"], b"hey");
        let ctx = fx.ctx();
        let mut candidates = run_to_candidates(&fx);
        assert!(!candidates.is_empty(), "hey muss matchbar sein");
        let s = &mut candidates[0];
        assert!(s.post_process(&ctx));
        assert!(s.score_v1() > 0.0);
    }
}
