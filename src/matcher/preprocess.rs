//! Kurven-Preprocessing: Drehraten, Geschwindigkeit und Spezialpunkte.
//!
//! Laeuft einmal pro neu eingetroffenem Punkt-Schub. Alle Durchgaenge
//! verfeinern dieselben Arrays in-place und koennen auf ein Suffix der Kurve
//! beschraenkt werden (abgeleitete Werte brauchen ein Nachbarschaftsfenster,
//! deshalb beginnt jedes Suffix einige Punkte vor dem letzten gueltigen
//! Index). Zweifacher Lauf ueber dieselben Punkte laesst alle Arrays
//! unveraendert.

use glam::Vec2;

use crate::core::curve::{CurvePoint, SpecialPoint};
use crate::core::geometry::{angle, distance};
use crate::core::params::Params;

/// Annotiert die Kurve ab `last_curve_index` (0 = kompletter Lauf).
pub fn preprocess(curve: &mut [CurvePoint], params: &Params, last_curve_index: usize) {
    let l = curve.len();
    if l < 8 {
        // zu kurz, vermutlich ein einfaches Zwei-Buchstaben-Wort
        return;
    }
    let last = if last_curve_index < 8 {
        0
    } else {
        last_curve_index
    };
    // Fensterstart: einige Punkte vor dem letzten gueltigen Index
    let start = |i0: usize, back: usize| -> usize {
        if last > back + i0 {
            last - back
        } else {
            i0
        }
    };

    compute_turn_angles(curve, last, start(1, 2));
    compute_speed(curve, start(0, 4));
    detect_sharp_turns(curve, params, start(2, 8));
    detect_small_turns(curve, params, start(2, 8));
    detect_slow_down_points(curve, params, start(0, 0));
    detect_inflection_points(curve, params, start(3, 6));
}

fn turn_between(a: Vec2, b: Vec2) -> i32 {
    if a.length_squared() == 0.0 || b.length_squared() == 0.0 {
        return 0;
    }
    (angle(a, b).to_degrees()).round() as i32
}

fn compute_turn_angles(curve: &mut [CurvePoint], last: usize, from: usize) {
    let l = curve.len();
    for i in from..l - 1 {
        let v_in = (curve[i].pos - curve[i - 1].pos).vec2();
        let v_out = (curve[i + 1].pos - curve[i].pos).vec2();
        curve[i].turn_angle = turn_between(v_in, v_out);
    }
    // Randwerte kopieren (vor dem zweiten Punkt liegt oft eine Verzoegerung)
    if last == 0 {
        curve[0].turn_angle = curve[1].turn_angle;
    }
    curve[l - 1].turn_angle = curve[l - 2].turn_angle;

    for i in from..l - 1 {
        curve[i].turn_smooth = (0.5 * curve[i].turn_angle as f32
            + 0.25 * curve[i - 1].turn_angle as f32
            + 0.25 * curve[i + 1].turn_angle as f32) as i32;
    }
    if last == 0 {
        curve[0].turn_smooth = curve[1].turn_smooth;
    }
    curve[l - 1].turn_smooth = curve[l - 2].turn_smooth;
}

fn compute_speed(curve: &mut [CurvePoint], from: usize) {
    let l = curve.len();
    for i in from..l {
        let (i1, i2) = if i < 2 {
            (0, 4)
        } else if i + 2 > l - 1 {
            (l - 5, l - 1)
        } else {
            (i - 2, i + 2)
        };
        let mut dist = 0.0;
        for j in i1..i2 {
            dist += distance(curve[j].pos, curve[j + 1].pos);
        }
        if curve[i2].t > curve[i1].t {
            curve[i].speed = (1000.0 * dist / (curve[i2].t - curve[i1].t) as f32) as i32;
        } else {
            // Null-Zeitintervall: Wert des Vorgaengers uebernehmen
            curve[i].speed = if i > 0 { curve[i - 1].speed } else { 1 };
        }
    }
}

fn detect_sharp_turns(curve: &mut [CurvePoint], params: &Params, from: usize) {
    let l = curve.len();
    let mut sharp_turn_index: i64 = -1;
    let mut last_total_turn: i32 = -1;
    let mut wait_for_next_st: i32 = 0;

    for i in from..l - 2 {
        let mut total = 0i32;
        let mut t_index = 0i64;
        for j in i - 1..=i + 1 {
            total += curve[j].turn_angle;
            t_index += curve[j].turn_angle as i64 * j as i64;
        }

        if total.abs() < last_total_turn
            && last_total_turn > params.turn_threshold
            && wait_for_next_st < 0
            && sharp_turn_index >= 2
            && (sharp_turn_index as usize) < l - 2
        {
            let mut idx = sharp_turn_index as usize;
            // sehr scharfe Einzelwinkel im aktuellen Fenster gewinnen
            for j in i - 1..=i + 1 {
                if curve[j].turn_angle.abs() > params.turn_threshold2 {
                    idx = j;
                }
            }

            let max_single = (idx - 1..=idx + 1)
                .map(|j| curve[j].turn_angle.abs())
                .max()
                .unwrap_or(0);
            let spread: i32 = (idx.saturating_sub(3)..=(idx + 3).min(l - 1))
                .map(|j| curve[j].turn_angle)
                .sum();

            curve[idx].special = if last_total_turn > params.turn_threshold2 {
                SpecialPoint::UTurn
            } else if spread.abs() > params.turn_threshold2 && max_single < params.turn_threshold3
            {
                // breit verteilte Drehung: Schleifen-Umgebung, Punkt darf wandern
                SpecialPoint::MovableTurn
            } else {
                SpecialPoint::SharpTurn
            };
            wait_for_next_st = 2;

            // Normalenvektor aus der Differenz der Einheits-Tangenten
            if idx >= 2 && idx + 2 <= l - 1 {
                let t1 = (curve[idx - 1].pos - curve[idx - 2].pos).vec2();
                let t2 = (curve[idx + 2].pos - curve[idx + 1].pos).vec2();
                if t1.length_squared() > 0.0 && t2.length_squared() > 0.0 {
                    curve[idx].normal = 100.0 * (t1.normalize() - t2.normalize());
                }
            }
        }

        if total.abs() > params.turn_threshold {
            sharp_turn_index = (t_index as f64 / total as f64).abs().round() as i64;
        }

        last_total_turn = total.abs();
        wait_for_next_st -= 1;
    }
}

fn detect_small_turns(curve: &mut [CurvePoint], params: &Params, from: usize) {
    let l = curve.len();
    let gap = params.max_turn_index_gap as usize;
    let total3 = |curve: &[CurvePoint], i: usize| -> i32 {
        curve[i - 1].turn_angle + curve[i].turn_angle + curve[i + 1].turn_angle
    };

    for i in from.max(2)..l - 2 {
        let total = total3(curve, i).abs();
        if total <= params.turn_threshold5 || total > params.turn_threshold {
            continue;
        }
        // lokales Maximum der Drei-Punkt-Drehsumme
        if total < total3(curve, i - 1).abs() || total <= total3(curve, i + 1).abs() {
            continue;
        }
        // nicht in der Naehe eines vorhandenen Spezialpunkts
        let lo = i.saturating_sub(gap);
        let hi = (i + gap).min(l - 1);
        if (lo..=hi).any(|j| curve[j].special != SpecialPoint::None) {
            continue;
        }
        curve[i].special = SpecialPoint::SmallTurn;
    }
}

fn detect_slow_down_points(curve: &mut [CurvePoint], params: &Params, from: usize) {
    let l = curve.len();
    let maxd = params.max_turn_index_gap as usize;
    if l < 2 * maxd + 1 {
        return;
    }
    for i in from.max(maxd)..l - maxd {
        let spd0 = curve[i].speed;
        let mut ok = 0;
        for j in i - maxd..=i + maxd {
            let spd = curve[j].speed;
            if spd < spd0 || curve[j].special != SpecialPoint::None {
                ok = 0;
                break;
            }
            if spd as f32 > params.slow_down_ratio * spd0 as f32 {
                ok |= if j > i { 2 } else { 1 };
            }
        }
        if ok == 3 {
            curve[i].special = SpecialPoint::SlowDown;
        }
    }
}

fn detect_inflection_points(curve: &mut [CurvePoint], params: &Params, from: usize) {
    let l = curve.len();
    let mut max_inf: i64 = 0;
    let mut max_inf_idx = 0usize;

    for i in from.max(3)..l - 3 {
        let s1 = curve[i - 3].turn_angle + curve[i - 2].turn_angle + curve[i - 1].turn_angle;
        let s2 = curve[i].turn_angle + curve[i + 1].turn_angle + curve[i + 2].turn_angle;
        let near_special = (i - 3..i + 3).any(|j| curve[j].special != SpecialPoint::None);

        if s1 as i64 * s2 as i64 >= 0
            || near_special
            || s1.abs() >= params.inf_max
            || s2.abs() >= params.inf_max
            || s1.abs() <= params.inf_min
            || s2.abs() <= params.inf_min
        {
            if max_inf != 0 {
                curve[max_inf_idx].special = SpecialPoint::Inflection;
                max_inf = 0;
            }
            continue;
        }

        let cur = -(s1 as i64) * (s2 as i64);
        if cur > max_inf {
            max_inf = cur;
            max_inf_idx = i - usize::from(s2.abs() > s1.abs());
        }
    }
    if max_inf != 0 {
        curve[max_inf_idx].special = SpecialPoint::Inflection;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::Point;

    fn straight_line(n: i32) -> Vec<CurvePoint> {
        (0..n)
            .map(|i| CurvePoint::new(Point::new(i * 10, 0), i * 16))
            .collect()
    }

    /// Winkel-Strich: horizontal nach rechts, dann um `turn_deg` abknicken.
    fn bent_line(turn_deg: f32) -> Vec<CurvePoint> {
        let mut points = Vec::new();
        for i in 0..12 {
            points.push(CurvePoint::new(Point::new(i * 10, 0), i * 16));
        }
        let rad = turn_deg.to_radians();
        let (dx, dy) = (rad.cos(), rad.sin());
        let base = Point::new(110, 0);
        for i in 1..12 {
            let p = Point::new(
                base.x + (dx * 10.0 * i as f32) as i32,
                base.y + (dy * 10.0 * i as f32) as i32,
            );
            points.push(CurvePoint::new(p, (11 + i) * 16));
        }
        points
    }

    #[test]
    fn test_straight_line_has_no_special_points() {
        let params = Params::default();
        let mut curve = straight_line(20);
        preprocess(&mut curve, &params, 0);
        assert!(curve.iter().all(|p| p.special == SpecialPoint::None));
        assert!(curve.iter().all(|p| p.turn_angle == 0));
    }

    #[test]
    fn test_sharp_turn_detected_at_corner() {
        let params = Params::default();
        let mut curve = bent_line(100.0);
        preprocess(&mut curve, &params, 0);
        // Die Ecke liegt bei Index 11; Erkennung in unmittelbarer Naehe
        let found: Vec<usize> = (8..15)
            .filter(|&i| curve[i].special == SpecialPoint::SharpTurn)
            .collect();
        assert_eq!(found.len(), 1, "genau eine scharfe Kurve erwartet");
        let idx = found[0];
        assert!(curve[idx].normal.length() > 0.0);
    }

    #[test]
    fn test_u_turn_classified_as_class_two() {
        let params = Params::default();
        let mut curve = bent_line(160.0);
        preprocess(&mut curve, &params, 0);
        assert!(
            (8..15).any(|i| curve[i].special == SpecialPoint::UTurn),
            "Kehrtwende erwartet"
        );
    }

    #[test]
    fn test_speed_constant_sampling() {
        let params = Params::default();
        let mut curve = straight_line(20);
        preprocess(&mut curve, &params, 0);
        // 10 Pixel je 16 ms -> 625 Einheiten/s ueber das ganze Fenster
        for p in &curve {
            assert_eq!(p.speed, 625);
        }
    }

    #[test]
    fn test_preprocess_is_idempotent() {
        let params = Params::default();
        let mut curve = bent_line(120.0);
        preprocess(&mut curve, &params, 0);
        let snapshot: Vec<_> = curve
            .iter()
            .map(|p| (p.turn_angle, p.turn_smooth, p.speed, p.special, p.normal))
            .collect();
        preprocess(&mut curve, &params, 0);
        let again: Vec<_> = curve
            .iter()
            .map(|p| (p.turn_angle, p.turn_smooth, p.speed, p.special, p.normal))
            .collect();
        assert_eq!(snapshot, again);
    }

    #[test]
    fn test_slow_down_point() {
        let params = Params::default();
        // konstantes Tempo, dann deutliche Verlangsamung in der Mitte
        let mut points = Vec::new();
        let mut x = 0;
        let mut t = 0;
        for i in 0..30 {
            let step = if (13..=16).contains(&i) { 2 } else { 14 };
            x += step;
            t += 16;
            points.push(CurvePoint::new(Point::new(x, 0), t));
        }
        preprocess(&mut points, &params, 0);
        assert!(
            points.iter().any(|p| p.special == SpecialPoint::SlowDown),
            "Slow-Down-Punkt erwartet"
        );
    }
}
