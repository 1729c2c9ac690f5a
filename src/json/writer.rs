//! Writer fuer das Ergebnis-JSON (Kandidaten, Detail-Scores, Statistik).

use serde_json::{json, Value};

use crate::matcher::scenario::{Scenario, StepScore};
use crate::matcher::CurveMatch;

fn score_to_json(score: &StepScore) -> Value {
    json!({
        "score_distance": score.distance,
        "score_cos": score.cos,
        "score_turn": score.turn,
        "score_curve": score.curve,
        "score_length": score.length,
        "score_misc": score.misc,
    })
}

fn candidate_to_json(cm: &CurveMatch, c: &Scenario) -> Value {
    let keys = cm.key_store();
    let tree = cm.tree().expect("Kandidaten nur mit Woerterbuch");

    let detail: Vec<Value> = (0..c.count())
        .map(|i| {
            let mut entry = score_to_json(&c.scores[i]);
            let obj = entry.as_object_mut().expect("Objekt");
            obj.insert(
                "letter".into(),
                json!((keys.logical_letter(c.letter_history[i]) as char).to_string()),
            );
            obj.insert("index".into(), json!(c.index_history[i]));
            entry
        })
        .collect();

    json!({
        "name": c.name(keys),
        "score": c.score(),
        "finished": c.is_finished(),
        "distance": c.distance() as i32,
        "error": c.error_count(),
        "words": c.word_list(tree),
        "word_list": c.words(tree, keys),
        "detail": detail,
        "avg_score": score_to_json(&c.avg_scores()),
        "min_score": score_to_json(&c.min_scores()),
    })
}

/// Eingabe-Echo: Parameter, Tasten und annotierte Kurve.
pub fn input_to_json(cm: &CurveMatch) -> Value {
    let keys: Vec<Value> = cm
        .keys()
        .iter()
        .map(|k| {
            let mut obj = json!({
                "x": k.x, "y": k.y, "w": k.width, "h": k.height,
                "k": k.label.to_string(),
            });
            if let Some(c) = k.corrected {
                let o = obj.as_object_mut().expect("Objekt");
                o.insert("corrected_x".into(), json!(c.x));
                o.insert("corrected_y".into(), json!(c.y));
            }
            obj
        })
        .collect();

    let curve: Vec<Value> = cm
        .curve()
        .iter()
        .map(|p| {
            let mut obj = json!({
                "x": p.pos.x, "y": p.pos.y, "t": p.t,
                "speed": p.speed,
                "turn_angle": p.turn_angle,
                "turn_smooth": p.turn_smooth,
                "sharp_turn": p.special.as_u8(),
            });
            if p.normal.length_squared() > 0.0 {
                let o = obj.as_object_mut().expect("Objekt");
                o.insert("normalx".into(), json!(p.normal.x));
                o.insert("normaly".into(), json!(p.normal.y));
            }
            obj
        })
        .collect();

    json!({
        "params": serde_json::to_value(cm.params()).expect("Parameter serialisierbar"),
        "keys": keys,
        "curve": curve,
    })
}

/// Das komplette Ergebnis-Dokument.
pub fn result_to_json(cm: &CurveMatch) -> Value {
    let candidates: Vec<Value> = cm
        .candidates()
        .iter()
        .map(|c| candidate_to_json(cm, c))
        .collect();
    let stats = cm.stats();

    json!({
        "id": cm.id,
        "input": input_to_json(cm),
        "candidates": candidates,
        "stats": {
            "time": stats.time,
            "count": stats.count,
            "fork": stats.fork,
            "skim": stats.skim,
        },
    })
}

pub fn input_to_string(cm: &CurveMatch) -> String {
    input_to_json(cm).to_string()
}

pub fn result_to_string(cm: &CurveMatch) -> String {
    result_to_json(cm).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::parse_input;

    #[test]
    fn test_input_roundtrip() {
        let mut cm = CurveMatch::new();
        let text = r#"{
            "keys": [ {"x": 50, "y": 60, "w": 100, "h": 90, "k": "q"} ],
            "curve": [ {"x": 1, "y": 2, "t": 0}, {"x": 3, "y": 4, "t": 16} ]
        }"#;
        parse_input(&mut cm, text).expect("Parsen erwartet");

        let echo = input_to_json(&cm);
        let mut cm2 = CurveMatch::new();
        parse_input(&mut cm2, &echo.to_string()).expect("Echo muss parsebar sein");

        assert_eq!(cm2.keys().len(), 1);
        assert_eq!(cm2.keys()[0].label, 'q');
        assert_eq!(cm2.keys()[0].height, 90);
        assert_eq!(cm2.curve().len(), 2);
        assert_eq!(cm2.curve()[1].pos.x, 3);
        assert_eq!(cm2.curve()[1].t, 16);
    }

    #[test]
    fn test_result_shape_is_stable() {
        let cm = CurveMatch::new();
        let result = result_to_json(&cm);
        assert!(result.get("id").is_some());
        assert!(result.get("input").is_some());
        assert!(result["candidates"].as_array().expect("Array").is_empty());
        assert!(result["stats"].get("time").is_some());
        assert!(result["stats"].get("skim").is_some());
    }
}
