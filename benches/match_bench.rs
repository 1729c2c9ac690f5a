use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec2;
use std::hint::black_box;
use std::sync::Arc;
use swipe_curve_matcher::{
    CurveMatch, IncrementalMatch, Key, KeyStore, Matcher, Point, WordTree,
};

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

fn dictionary() -> Vec<String> {
    // kleines synthetisches Woerterbuch mit gemeinsamen Praefixen
    let stems = ["th", "wh", "re", "st", "tr", "qu", "pr", "gr"];
    let tails = ["e", "en", "ing", "ust", "ip", "ow", "ey", "ode", "aint"];
    let mut words = Vec::new();
    for stem in stems {
        for tail in tails {
            words.push(format!("{stem}{tail}"));
        }
    }
    words
}

fn trace_word(keys: &KeyStore, word: &[u8], step: f32) -> Vec<(Point, i32)> {
    let mut points = Vec::new();
    let mut t = 0;
    for pair in word.windows(2) {
        let from = keys.get(pair[0]).vec2();
        let to = keys.get(pair[1]).vec2();
        let n = (from.distance(to) / step).ceil().max(1.0) as i32;
        for i in 0..n {
            let p: Vec2 = from.lerp(to, i as f32 / n as f32);
            points.push((Point::new(p.x.round() as i32, p.y.round() as i32), t));
            t += 16;
        }
    }
    let last = keys.get(*word.last().expect("Wort nicht leer"));
    points.push((last, t));
    points
}

fn bench_oneshot_match(c: &mut Criterion) {
    let words = dictionary();
    let tree = Arc::new(WordTree::from_words(&words));
    let key_store = KeyStore::from_keys(&qwerty_keys());
    let points = trace_word(&key_store, b"trust", 8.0);

    c.bench_function("oneshot_match_trust", |b| {
        b.iter(|| {
            let mut cm = CurveMatch::new();
            cm.set_tree(tree.clone());
            for key in qwerty_keys() {
                cm.add_key(key);
            }
            for &(p, t) in &points {
                cm.add_point(black_box(p), t);
            }
            cm.end_curve(-1);
            black_box(cm.candidates().len())
        })
    });
}

fn bench_incremental_feed(c: &mut Criterion) {
    let words = dictionary();
    let tree = Arc::new(WordTree::from_words(&words));
    let key_store = KeyStore::from_keys(&qwerty_keys());

    let mut group = c.benchmark_group("incremental_feed");
    for &step in &[12.0f32, 6.0f32] {
        let points = trace_word(&key_store, b"whey", step);
        group.bench_with_input(
            BenchmarkId::new("whey", points.len()),
            &points,
            |b, points| {
                b.iter(|| {
                    let mut inc = IncrementalMatch::new();
                    inc.base_mut().set_tree(tree.clone());
                    for key in qwerty_keys() {
                        inc.base_mut().add_key(key);
                    }
                    for &(p, t) in points {
                        inc.add_point(black_box(p), t);
                    }
                    inc.end_curve(-1);
                    black_box(inc.base().candidates().len())
                })
            },
        );
    }
    group.finish();
}

criterion_group!(match_benches, bench_oneshot_match, bench_incremental_feed);
criterion_main!(match_benches);
