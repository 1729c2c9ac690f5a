//! End-to-End-Tests der Matching-Engine auf einem synthetischen
//! 10x4-QWERTY-Layout mit 100-Pixel-Tasten.

use std::sync::Arc;

use glam::Vec2;
use swipe_curve_matcher::{
    json, CurveMatch, IncrementalMatch, Key, KeyStore, Matcher, Params, Point, SpecialPoint,
    WordTree,
};

/// QWERTY-Layout: drei Buchstabenreihen, versetzt wie auf echten Tastaturen.
fn qwerty_keys() -> Vec<Key> {
    let rows = ["qwertyuiop", "asdfghjkl", "zxcvbnm"];
    let mut keys = Vec::new();
    for (row, letters) in rows.iter().enumerate() {
        for (col, c) in letters.chars().enumerate() {
            let x = 50 + 100 * col as i32 + 50 * row as i32;
            let y = 50 + 100 * row as i32;
            keys.push(Key::new(x, y, 100, 100, c));
        }
    }
    keys
}

/// Polyline durch die Tastenzentren der Buchstabenfolge.
fn trace_word(keys: &KeyStore, word: &[u8], step: f32) -> Vec<(Point, i32)> {
    let centers: Vec<Vec2> = word.iter().map(|&l| keys.get(l).vec2()).collect();
    trace_polyline(&centers, step)
}

fn trace_polyline(waypoints: &[Vec2], step: f32) -> Vec<(Point, i32)> {
    let mut points = Vec::new();
    let mut t = 0;
    for pair in waypoints.windows(2) {
        let len = pair[0].distance(pair[1]);
        let n = (len / step).ceil().max(1.0) as i32;
        for i in 0..n {
            let p = pair[0].lerp(pair[1], i as f32 / n as f32);
            points.push((Point::new(p.x.round() as i32, p.y.round() as i32), t));
            t += 16;
        }
    }
    let last = waypoints.last().expect("mindestens ein Wegpunkt");
    points.push((Point::new(last.x.round() as i32, last.y.round() as i32), t));
    points
}

fn run_matcher(words: &[&str], points: &[(Point, i32)], params: Params) -> CurveMatch {
    let mut cm = CurveMatch::new();
    cm.set_params(params);
    cm.set_tree(Arc::new(WordTree::from_words(words)));
    for key in qwerty_keys() {
        cm.add_key(key);
    }
    for &(p, t) in points {
        cm.add_point(p, t);
    }
    cm.end_curve(1);
    cm
}

fn candidate_names(cm: &CurveMatch) -> Vec<String> {
    let keys = cm.key_store();
    cm.candidates().iter().map(|c| c.name(keys)).collect()
}

// ── Szenario 1: gerader Strich quer ueber die oberste Reihe ─────────

#[test]
fn straight_top_row_stroke_finds_word() {
    let key_store = KeyStore::from_keys(&qwerty_keys());
    let points = trace_word(&key_store, b"qp", 14.0);
    let cm = run_matcher(&["quip", "tip", "rut", "it"], &points, Params::default());

    let names = candidate_names(&cm);
    assert!(!names.is_empty(), "Kandidaten erwartet");
    // nur "quip" startet bei q und endet bei p
    assert_eq!(names[0], "quip", "names = {names:?}");
    for c in cm.candidates() {
        assert!(
            c.avg_scores().cos >= 0.8,
            "Richtungs-Score zu niedrig: {}",
            c.avg_scores().cos
        );
    }
}

// ── Szenario 2: V-foermiger Strich mit Kehrtwende ───────────────────

#[test]
fn v_stroke_detects_u_turn_at_inner_key() {
    let key_store = KeyStore::from_keys(&qwerty_keys());
    let points = trace_word(&key_store, b"hey", 14.0);
    let cm = run_matcher(&["hey", "he", "hay"], &points, Params::default());

    // Die Kehrtwende muss als Klasse 2 nahe der e-Taste erkannt sein
    let e_center = key_store.get(b'e');
    let u_turns: Vec<usize> = cm
        .curve()
        .iter()
        .enumerate()
        .filter(|(_, p)| p.special == SpecialPoint::UTurn)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(u_turns.len(), 1, "genau eine Kehrtwende erwartet");
    let turn_index = u_turns[0];
    let turn_pos = cm.curve()[turn_index].pos;
    assert!(
        (turn_pos.vec2() - e_center.vec2()).length() < 60.0,
        "Kehrtwende liegt nicht bei 'e': {turn_pos:?}"
    );

    let names = candidate_names(&cm);
    assert!(names.contains(&"hey".to_string()), "names = {names:?}");

    // jede hey-Zuordnung bindet 'e' nahe der Kehrtwende
    let gap = cm.params().max_turn_index_gap as i64;
    let result = json::result_to_json(&cm);
    for c in result["candidates"].as_array().expect("Array") {
        if c["name"] == "hey" {
            let e_index = c["detail"][1]["index"].as_i64().expect("Index");
            assert!(
                (e_index - turn_index as i64).abs() <= gap,
                "e-Index {e_index} zu weit von der Kehrtwende {turn_index}"
            );
        }
    }
}

// ── Szenario 3: Schleife durch 'o' ──────────────────────────────────

#[test]
fn loop_through_o_still_matches() {
    let key_store = KeyStore::from_keys(&qwerty_keys());
    let p_center = key_store.get(b'p').vec2();
    let o_center = key_store.get(b'o').vec2();
    let l_center = key_store.get(b'l').vec2();

    // p -> o, dann eine tangential anschliessende 450-Grad-Schleife durch
    // die o-Taste, Ausstieg nach unten Richtung l
    let mut waypoints = vec![p_center, o_center];
    let radius = 30.0;
    let center = o_center + Vec2::new(0.0, radius);
    let steps = 30;
    for i in 1..=steps {
        let phi = 1.25 * std::f32::consts::TAU * i as f32 / steps as f32;
        waypoints.push(center + Vec2::new(-radius * phi.sin(), -radius * phi.cos()));
    }
    waypoints.push(l_center);
    let points = trace_polyline(&waypoints, 10.0);
    let cm = run_matcher(&["pol", "pal"], &points, Params::default());

    let names = candidate_names(&cm);
    assert_eq!(names[0], "pol", "names = {names:?}");
    // "pal" verlangt einen Abstecher zur a-Taste, den die Kurve nie macht
    assert!(!names.contains(&"pal".to_string()), "names = {names:?}");
}

// ── Szenario 4: Punkt-Tipper ────────────────────────────────────────

#[test]
fn dot_click_selects_single_letter_words() {
    let key_store = KeyStore::from_keys(&qwerty_keys());
    let center = key_store.get(b'i');
    let points: Vec<(Point, i32)> = (0..4)
        .map(|k| (Point::new(center.x + k, center.y + k % 2), k * 16))
        .collect();
    let cm = run_matcher(&["i", "in", "it", "a"], &points, Params::default());

    let names = candidate_names(&cm);
    assert!(names.contains(&"i".to_string()), "names = {names:?}");
    for c in cm.candidates() {
        assert_eq!(c.count(), 1, "Dot-Kandidaten haben genau einen Buchstaben");
        assert!(c.score() > 0.0);
    }
}

// ── Szenario 5: verfehlte Taste mit Fehler-Toleranz ─────────────────

/// q-w-e-r-t-y sauber entlang der obersten Reihe, dann ein weiter Bogen
/// nach unten statt des direkten Wegs zur p-Taste.
fn detour_points() -> Vec<(Point, i32)> {
    let key_store = KeyStore::from_keys(&qwerty_keys());
    let mut waypoints: Vec<Vec2> = b"qwerty".iter().map(|&l| key_store.get(l).vec2()).collect();
    // Bogen von y(550) nach p(950): Durchhang 100 Pixel
    for i in 1..=16 {
        let s = i as f32 / 16.0;
        let x = 550.0 + 400.0 * s;
        let y = 50.0 + 100.0 * (std::f32::consts::PI * s).sin();
        waypoints.push(Vec2::new(x, y));
    }
    trace_polyline(&waypoints, 10.0)
}

#[test]
fn detour_recovered_with_error_correct() {
    let points = detour_points();
    let cm = run_matcher(&["qwertyp", "qwerty"], &points, Params::default());
    let names = candidate_names(&cm);
    assert!(
        names.contains(&"qwertyp".to_string()),
        "names = {names:?}"
    );
    let c = cm
        .candidates()
        .iter()
        .find(|c| c.name(cm.key_store()) == "qwertyp")
        .expect("Kandidat erwartet");
    assert!(c.error_count() >= 1, "Fehlerzaehler erwartet");
}

#[test]
fn detour_rejected_without_error_correct() {
    let points = detour_points();
    let params = Params {
        error_correct: 0,
        ..Params::default()
    };
    let cm = run_matcher(&["qwertyp", "qwerty"], &points, params);
    let names = candidate_names(&cm);
    assert!(
        !names.contains(&"qwertyp".to_string()),
        "names = {names:?}"
    );
}

// ── Szenario 6: inkrementell == einmalig ────────────────────────────

#[test]
fn incremental_matches_oneshot_top_candidates() {
    let key_store = KeyStore::from_keys(&qwerty_keys());
    // feine Abtastung: ~200 Punkte
    let points = trace_word(&key_store, b"hey", 3.2);
    assert!(points.len() >= 190, "Kurve hat {} Punkte", points.len());

    let words = ["hey", "he", "hay", "her", "grey"];
    let one = run_matcher(&words, &points, Params::default());

    let mut inc = IncrementalMatch::new();
    inc.base_mut()
        .set_tree(Arc::new(WordTree::from_words(&words)));
    for key in qwerty_keys() {
        inc.base_mut().add_key(key);
    }
    for &(p, t) in &points {
        inc.add_point(p, t);
    }
    inc.end_curve(1);

    let one_names = candidate_names(&one);
    let inc_names = candidate_names(inc.base());
    assert_eq!(one_names, inc_names);
    for (a, b) in one.candidates().iter().zip(inc.base().candidates()) {
        assert!(
            (a.score() - b.score()).abs() < 1e-4,
            "{}: {} != {}",
            a.name(one.key_store()),
            a.score(),
            b.score()
        );
    }
}

// ── Gesetze: Parameter-Monotonie und JSON-Roundtrip ─────────────────

#[test]
fn larger_distance_tolerance_never_loses_candidates() {
    let key_store = KeyStore::from_keys(&qwerty_keys());
    let points = trace_word(&key_store, b"tip", 14.0);
    let words = ["tip", "top", "rut", "pit"];

    let narrow = run_matcher(&words, &points, Params::default());
    let wide = run_matcher(
        &words,
        &points,
        Params {
            dist_max_next: 150,
            ..Params::default()
        },
    );
    assert!(wide.candidates().len() >= narrow.candidates().len());
}

#[test]
fn sharper_turn_penalty_never_raises_scores() {
    let key_store = KeyStore::from_keys(&qwerty_keys());
    let points = trace_word(&key_store, b"hey", 14.0);
    let words = ["hey", "he", "hay"];

    let soft = run_matcher(&words, &points, Params::default());
    let hard = run_matcher(
        &words,
        &points,
        Params {
            sharp_turn_penalty: 2.0,
            ..Params::default()
        },
    );

    for c_hard in hard.candidates() {
        let name = c_hard.name(hard.key_store());
        if let Some(c_soft) = soft
            .candidates()
            .iter()
            .find(|c| c.name(soft.key_store()) == name)
        {
            assert!(
                c_hard.score_v1() <= c_soft.score_v1() + 1e-5,
                "{name}: {} > {}",
                c_hard.score_v1(),
                c_soft.score_v1()
            );
        }
    }
}

#[test]
fn input_json_roundtrip_preserves_fields() {
    let text = r#"{ "input": {
        "keys": [ {"x": 50, "y": 50, "w": 100, "h": 100, "k": "q"},
                   {"x": 150, "y": 50, "w": 100, "h": 100, "k": "w"} ],
        "curve": [ {"x": 50, "y": 50, "t": 0}, {"x": 90, "y": 52, "t": 16},
                    {"x": 150, "y": 50, "t": 32} ]
    } }"#;
    let mut cm = CurveMatch::new();
    json::parse_input(&mut cm, text).expect("Parsen erwartet");

    let echo = json::input_to_json(&cm).to_string();
    let mut cm2 = CurveMatch::new();
    json::parse_input(&mut cm2, &echo).expect("Echo parsebar");

    assert_eq!(cm2.keys().len(), 2);
    assert_eq!(cm2.curve().len(), 3);
    for (a, b) in cm.curve().iter().zip(cm2.curve()) {
        assert_eq!(a.pos, b.pos);
        assert_eq!(a.t, b.t);
    }
    for (a, b) in cm.keys().iter().zip(cm2.keys()) {
        assert_eq!(a.label, b.label);
        assert_eq!((a.x, a.y, a.width, a.height), (b.x, b.y, b.width, b.height));
    }
}
