//! Matching-Treiber: Einmal-Lauf (Beam-Suche) und gemeinsame Infrastruktur.

pub mod incremental;
pub mod post;
pub mod preprocess;
pub mod rank;
pub mod scenario;
pub mod score;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use indexmap::IndexMap;

use crate::core::curve::{CurvePoint, CurveStore};
use crate::core::geometry::{distance, Point};
use crate::core::keys::{Key, KeyStore};
use crate::core::params::Params;
use crate::core::tree::WordTree;
use self::scenario::{MatchCtx, Scenario};

/// Laufzeit-Zaehler eines Match-Laufs.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    /// Laufzeit in Millisekunden
    pub time: i32,
    /// erzeugte Szenarien
    pub count: i32,
    /// Expansionen mit mehr als einem Nachfolger
    pub fork: i32,
    /// weggefilterte Szenarien
    pub skim: i32,
    /// vertagte Expansionen (inkrementeller Modus)
    pub retry: i32,
}

/// Gemeinsame Treiber-Schnittstelle fuer CLI und Worker-Thread.
pub trait Matcher: Send {
    /// Verwirft Kurve und alle laufenden Szenarien.
    fn clear_curve(&mut self);
    /// Haengt einen Kurvenpunkt an (`timestamp` < 0: Uhrzeit verwenden).
    fn add_point(&mut self, point: Point, timestamp: i32);
    /// Schliesst die Kurve ab und erzeugt die Kandidaten.
    fn end_curve(&mut self, id: i32);
    /// Zugriff auf den gemeinsamen Matcher-Zustand.
    fn base(&self) -> &CurveMatch;
    fn base_mut(&mut self) -> &mut CurveMatch;
}

/// Einmal-Matcher: kompletter Beam-Lauf nach Kurvenende.
#[derive(Clone)]
pub struct CurveMatch {
    pub(crate) params: Params,
    pub(crate) keys: Vec<Key>,
    pub(crate) curve: Vec<CurvePoint>,
    pub(crate) tree: Option<Arc<WordTree>>,
    pub(crate) key_store: KeyStore,
    pub(crate) candidates: Vec<Scenario>,
    pub(crate) stats: Stats,
    pub(crate) id: i32,
    pub(crate) debug: bool,
    pub(crate) done: bool,
    log_file: Option<PathBuf>,
    start_time: Option<Instant>,
}

impl Default for CurveMatch {
    fn default() -> Self {
        Self::new()
    }
}

impl CurveMatch {
    pub fn new() -> Self {
        Self {
            params: Params::default(),
            keys: Vec::new(),
            curve: Vec::new(),
            tree: None,
            key_store: KeyStore::default(),
            candidates: Vec::new(),
            stats: Stats::default(),
            id: -1,
            debug: false,
            done: false,
            log_file: None,
            start_time: None,
        }
    }

    /// Laedt das gepackte Woerterbuch.
    pub fn load_tree(&mut self, path: &Path) -> Result<()> {
        let tree = WordTree::load_from_file(path)?;
        log::info!("Woerterbuch geladen: {}", path.display());
        self.tree = Some(Arc::new(tree));
        Ok(())
    }

    /// Setzt ein bereits geladenes Woerterbuch (read-only, teilbar).
    pub fn set_tree(&mut self, tree: Arc<WordTree>) {
        self.tree = Some(tree);
    }

    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn set_log_file(&mut self, path: Option<PathBuf>) {
        self.log_file = path;
    }

    pub fn clear_keys(&mut self) {
        self.keys.clear();
    }

    /// Registriert eine Taste; nur beschriftete Tasten zaehlen.
    pub fn add_key(&mut self, key: Key) {
        if key.letter() != 0 {
            self.keys.push(key);
        }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn curve(&self) -> &[CurvePoint] {
        &self.curve
    }

    pub fn candidates(&self) -> &[Scenario] {
        &self.candidates
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.key_store
    }

    pub fn tree(&self) -> Option<&Arc<WordTree>> {
        self.tree.as_ref()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub(crate) fn clear_curve_base(&mut self) {
        self.curve.clear();
        self.candidates.clear();
        self.done = false;
        self.start_time = None;
    }

    /// Haengt einen Punkt mit kumulierter Laenge an.
    pub(crate) fn push_point(&mut self, point: Point, timestamp: i32) {
        let now = Instant::now();
        if self.curve.is_empty() {
            self.start_time = Some(now);
        }
        let t = if timestamp >= 0 {
            timestamp
        } else {
            self.start_time
                .map(|s| now.duration_since(s).as_millis() as i32)
                .unwrap_or(0)
        };
        let mut p = CurvePoint::new(point, t);
        if let Some(last) = self.curve.last() {
            p.length = last.length + distance(last.pos, point) as i32;
        }
        self.curve.push(p);
    }

    /// Haengt eine Zeile an die Log-Datei an (IN/OUT-Mitschnitt).
    pub fn log_line(&self, text: &str) {
        let Some(path) = &self.log_file else {
            return;
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{text}"));
        if let Err(e) = result {
            log::warn!("Log-Datei nicht schreibbar: {e}");
        }
    }

    /// Der komplette Einmal-Lauf.
    pub fn match_oneshot(&mut self) -> bool {
        self.candidates.clear();
        self.stats = Stats::default();

        let Some(tree) = self.tree.clone() else {
            return false;
        };
        if self.keys.is_empty() || self.curve.is_empty() {
            return false;
        }

        let timer = Instant::now();

        preprocess::preprocess(&mut self.curve, &self.params, 0);
        let mut store = CurveStore::from_points(&self.curve, self.params.dot_threshold);
        store.finished = true;
        if store.size() < 3 && !store.is_dot {
            log::debug!("Kurve zu kurz: {} Punkte", store.size());
            return false;
        }
        self.key_store = KeyStore::from_keys(&self.keys);

        let ctx = MatchCtx::new(&store, &self.key_store, &self.params, &tree);

        let mut root = Scenario::root(&tree);
        root.set_debug(self.debug);
        let mut frontier = vec![root];
        let mut stats = Stats::default();
        let mut candidates = Vec::new();

        let mut depth = 0;
        while !frontier.is_empty() {
            let mut next_frontier = Vec::new();
            for s in &frontier {
                let mut children = Vec::new();
                s.next_key(&ctx, &mut children, &mut stats);
                for mut child in children {
                    if child.is_finished() {
                        if child.post_process(&ctx) {
                            candidates.push(child);
                        }
                    } else {
                        next_frontier.push(child);
                    }
                }
            }
            depth += 1;
            frontier = next_frontier;
            if depth >= 3 {
                scenario_filter(
                    &mut frontier,
                    &self.key_store,
                    0.0,
                    15,
                    self.params.max_active_scenarios,
                    false,
                    &mut stats,
                );
                log::debug!(
                    "Tiefe {depth}: {} Szenarien, {} Kandidaten",
                    frontier.len(),
                    candidates.len()
                );
            }
        }

        scenario_filter(
            &mut candidates,
            &self.key_store,
            self.params.score_ratio,
            10,
            self.params.max_candidates,
            true,
            &mut stats,
        );
        rank::sort_candidates(&mut candidates, &self.params);
        candidates.sort_by(|a, b| b.score().total_cmp(&a.score()));

        stats.time = timer.elapsed().as_millis() as i32;
        self.stats = stats;
        self.candidates = candidates;
        self.done = true;

        log::debug!(
            "Kandidaten: {} (time={}, nodes={}, forks={}, skim={})",
            self.candidates.len(),
            self.stats.time,
            self.stats.count,
            self.stats.fork,
            self.stats.skim
        );

        !self.candidates.is_empty()
    }

    pub(crate) fn end_curve_base(&mut self, id: i32) {
        self.id = id;
        self.log_line(&format!("IN: {}", crate::json::input_to_string(self)));
        if !self.done {
            self.match_oneshot();
        }
        self.log_line(&format!("OUT: {}", crate::json::result_to_string(self)));
    }
}

impl Matcher for CurveMatch {
    fn clear_curve(&mut self) {
        self.clear_curve_base();
    }

    fn add_point(&mut self, point: Point, timestamp: i32) {
        self.push_point(point, timestamp);
    }

    fn end_curve(&mut self, id: i32) {
        self.end_curve_base(id);
    }

    fn base(&self) -> &CurveMatch {
        self
    }

    fn base_mut(&mut self) -> &mut CurveMatch {
        self
    }
}

/// Filtert eine Szenario-Liste nach Score und entfernt Namens-Duplikate.
///
/// Duplikate werden nur zusammengelegt, wenn keines der beiden frisch aus
/// einem Fork stammt (`finished` erzwingt das Zusammenlegen); vom Paar
/// ueberlebt der hoehere Score.
pub(crate) fn scenario_filter(
    scenarios: &mut Vec<Scenario>,
    keys: &KeyStore,
    score_ratio: f32,
    min_size: usize,
    max_size: i32,
    finished: bool,
    stats: &mut Stats,
) {
    scenarios.sort_by(|a, b| a.score().total_cmp(&b.score()));

    let max_score = scenarios
        .iter()
        .map(|s| s.score())
        .fold(0.0f32, f32::max);

    let mut dejavu: IndexMap<String, usize> = IndexMap::new();
    let mut i = 0;
    while i < scenarios.len() {
        let sc = scenarios[i].score();
        if sc < max_score * score_ratio && scenarios.len() > min_size {
            stats.skim += 1;
            scenarios.remove(i);
        } else if finished || !scenarios[i].fork_last() {
            let name = scenarios[i].name(keys);
            if let Some(&i0) = dejavu.get(&name) {
                // aufsteigend sortiert: der spaetere Eintrag hat den
                // hoeheren Score, der fruehere fliegt raus
                scenarios.remove(i0);
                for v in dejavu.values_mut() {
                    if *v > i0 {
                        *v -= 1;
                    }
                }
                dejavu.swap_remove(&name);
                i -= 1;
            } else {
                dejavu.insert(name, i);
                i += 1;
            }
        } else {
            i += 1;
        }
    }

    while max_size > 1 && scenarios.len() > max_size as usize {
        stats.skim += 1;
        scenarios.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::scenario::tests::{curve_through, qwerty_keys};

    fn matcher_with(words: &[&str], trace: &[u8]) -> CurveMatch {
        let mut cm = CurveMatch::new();
        cm.set_tree(Arc::new(WordTree::from_words(words)));
        for key in qwerty_keys() {
            cm.add_key(key);
        }
        let key_store = KeyStore::from_keys(&qwerty_keys());
        for p in curve_through(&key_store, trace, 14.0) {
            cm.push_point(p.pos, p.t);
        }
        cm
    }

    #[test]
    fn test_oneshot_finds_straight_word() {
        let mut cm = matcher_with(&["tip", "top", "rut"], b"tip");
        assert!(cm.match_oneshot());
        let keys = cm.key_store().clone();
        let names: Vec<String> = cm.candidates().iter().map(|c| c.name(&keys)).collect();
        assert!(names.contains(&"tip".to_string()), "names = {names:?}");
        // Kandidaten absteigend sortiert
        for w in cm.candidates().windows(2) {
            assert!(w[0].score() >= w[1].score());
        }
    }

    #[test]
    fn test_empty_without_tree_or_keys() {
        let mut cm = CurveMatch::new();
        cm.push_point(Point::new(0, 0), 0);
        assert!(!cm.match_oneshot());
    }

    #[test]
    fn test_too_short_curve_is_rejected() {
        let mut cm = matcher_with(&["tip"], b"tip");
        cm.clear_curve();
        // zwei weit auseinanderliegende Punkte: kein Dot, keine echte Kurve
        cm.push_point(Point::new(100, 100), 0);
        cm.push_point(Point::new(600, 100), 16);
        assert!(!cm.match_oneshot());
        assert!(cm.candidates().is_empty());
    }

    #[test]
    fn test_dot_click_yields_single_letter_words() {
        let mut cm = matcher_with(&["i", "in", "a"], b"ii");
        cm.clear_curve();
        // kurzer Tipper auf der i-Taste
        let center = KeyStore::from_keys(&qwerty_keys()).get(b'i');
        for k in 0..4 {
            cm.push_point(Point::new(center.x + k, center.y), k * 16);
        }
        assert!(cm.match_oneshot());
        let keys = cm.key_store().clone();
        for c in cm.candidates() {
            assert_eq!(c.count(), 1);
            assert!(c.score() > 0.0);
        }
        let names: Vec<String> = cm.candidates().iter().map(|c| c.name(&keys)).collect();
        assert!(names.contains(&"i".to_string()));
        // "in" hat zwei Buchstaben und darf nicht auftauchen
        assert!(!names.iter().any(|n| n.len() > 1));
    }

    #[test]
    fn test_scenario_filter_dedup_keeps_best() {
        let mut stats = Stats::default();
        let keys = KeyStore::from_keys(&qwerty_keys());
        let mut a = Scenario::default();
        a.letter_history = vec![b't', b'o'];
        a.index_history = vec![0, 9];
        a.temp_score = 0.4;
        a.last_fork = -1;
        let mut b = a.clone();
        b.temp_score = 0.9;
        let mut list = vec![a, b];
        scenario_filter(&mut list, &keys, 0.0, 1, -1, false, &mut stats);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].temp_score(), 0.9);
    }

    #[test]
    fn test_scenario_filter_respects_fork_exemption() {
        let mut stats = Stats::default();
        let keys = KeyStore::from_keys(&qwerty_keys());
        let mut a = Scenario::default();
        a.letter_history = vec![b't', b'o', b'p', b's'];
        a.index_history = vec![0, 5, 9, 12];
        a.temp_score = 0.4;
        a.last_fork = 4; // frisch geforkt
        let mut b = a.clone();
        b.temp_score = 0.9;
        let mut list = vec![a, b];
        scenario_filter(&mut list, &keys, 0.0, 1, -1, false, &mut stats);
        // beide ueberleben, solange der Fork frisch ist
        assert_eq!(list.len(), 2);
        // mit finished=true wird trotzdem zusammengelegt
        scenario_filter(&mut list, &keys, 0.0, 1, -1, true, &mut stats);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_scenario_filter_size_cap() {
        let mut stats = Stats::default();
        let keys = KeyStore::from_keys(&qwerty_keys());
        let mut list: Vec<Scenario> = (0..10)
            .map(|i| {
                let mut s = Scenario::default();
                s.letter_history = vec![b'a' + i as u8];
                s.index_history = vec![i as u16];
                s.temp_score = i as f32 / 10.0;
                s.last_fork = -1;
                s
            })
            .collect();
        scenario_filter(&mut list, &keys, 0.0, 1, 4, false, &mut stats);
        assert_eq!(list.len(), 4);
        // die besten vier bleiben
        assert!(list.iter().all(|s| s.temp_score() >= 0.6));
    }
}
