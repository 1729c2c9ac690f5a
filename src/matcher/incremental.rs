//! Inkrementelles Matching: Szenarien reifen mit wachsender Kurvenlaenge.
//!
//! Jedes vertagte Szenario kennt fuer jeden moeglichen Folgebuchstaben eine
//! minimale und maximale Kurvenlaenge. Erst wenn die kumulierte Laenge die
//! Schwelle kreuzt (oder die Kurve endet), wird expandiert — so ist beim
//! Abheben des Fingers fast alles schon gerechnet.

use std::time::Instant;

use indexmap::IndexMap;

use crate::core::curve::CurveStore;
use crate::core::geometry::Point;
use crate::core::keys::KeyStore;
use crate::core::tree::TreeNode;
use crate::matcher::preprocess::preprocess;
use crate::matcher::scenario::{MatchCtx, Scenario};
use crate::matcher::{rank, scenario_filter, CurveMatch, Matcher, Stats};

/// Laengen-Schwellen fuer einen moeglichen Folgebuchstaben.
#[derive(Debug, Clone, Copy)]
struct NextLetter {
    node: TreeNode,
    min_length: i32,
    max_length: i32,
    /// Nur noch das End-Szenario steht aus (laeuft erst bei Kurvenende)
    end_only: bool,
}

impl NextLetter {
    fn new(node: TreeNode, min_length: i32, max_length: i32) -> Self {
        Self {
            node,
            min_length,
            max_length,
            end_only: false,
        }
    }

    /// Eintrag, der erst beim finalen Lauf ausgeloest wird.
    fn end_pending(node: TreeNode) -> Self {
        Self {
            node,
            min_length: i32::MAX,
            max_length: i32::MAX,
            end_only: true,
        }
    }
}

/// Ergebnis einer vertagten Expansion.
enum EvalOutcome {
    /// Buchstabe vollstaendig abgearbeitet
    Done,
    /// Nicht-End-Teil fertig, End-Szenario wartet auf das Kurvenende
    DoneEndPending,
    /// Kurvenende zu nah, spaeter erneut versuchen
    Retry,
}

/// Ein Szenario samt Reife-Schwellen je Folgebuchstabe.
#[derive(Debug, Clone)]
struct DelayedScenario {
    scenario: Scenario,
    next: IndexMap<u8, NextLetter>,
    dead: bool,
}

/// Inkrementeller Matcher; Punkte treffen einzeln ein.
pub struct IncrementalMatch {
    cm: CurveMatch,
    delayed: Vec<DelayedScenario>,
    cumulative_length: i32,
    next_iteration_length: i32,
    last_curve_index: usize,
    next_iteration_index: usize,
    timer: Option<Instant>,
}

impl Default for IncrementalMatch {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalMatch {
    pub fn new() -> Self {
        Self {
            cm: CurveMatch::new(),
            delayed: Vec::new(),
            cumulative_length: 0,
            next_iteration_length: 0,
            last_curve_index: 0,
            next_iteration_index: 0,
            timer: None,
        }
    }

    /// Baut einen inkrementellen Matcher um einen vorbereiteten Zustand.
    pub fn from_base(cm: CurveMatch) -> Self {
        Self {
            cm,
            ..Self::new()
        }
    }

    fn update_next_iteration_length(next: &mut i32, length: i32) {
        if *next <= 0 || length < *next {
            *next = length;
        }
    }

    /// Erste Iteration: Wurzel-Szenario vertagen.
    fn incremental_match_begin(&mut self) {
        self.cm.candidates.clear();
        self.delayed.clear();
        let Some(tree) = self.cm.tree.clone() else {
            return;
        };
        if self.cm.keys.is_empty() {
            return;
        }

        self.cm.key_store = KeyStore::from_keys(&self.cm.keys);
        self.cm.stats = Stats::default();
        self.next_iteration_length = 0;
        self.last_curve_index = 0;

        let mut root = Scenario::root(&tree);
        root.set_debug(self.cm.debug);
        let mut next = IndexMap::new();
        for child in tree.children(tree.root()) {
            next.insert(child.letter, NextLetter::new(child, 5, 5));
        }
        self.delayed.push(DelayedScenario {
            scenario: root,
            next,
            dead: false,
        });
        log::debug!("incremental_match_begin: delayed={}", self.delayed.len());
    }

    /// Sofortiger Lauf mit optimistischen Schwellen.
    pub fn aggressive_match(&mut self) {
        self.incremental_match_update(false, true);
    }

    /// Ein Update-Lauf: reife Buchstaben expandieren, Rest weiter vertagen.
    fn incremental_match_update(&mut self, finished: bool, aggressive: bool) {
        if self.cm.tree.is_none() || self.cm.keys.is_empty() || self.delayed.is_empty() {
            return;
        }
        if self.cumulative_length < self.next_iteration_length && !finished {
            return;
        }
        if self.cm.curve.len() < 5 && !finished {
            return;
        }

        log::debug!(
            "incremental_match_update: finished={}, punkte={}, laenge={}",
            finished,
            self.cm.curve.len(),
            self.cumulative_length
        );

        let aggressive = aggressive || self.cm.params.aggressive_mode != 0.0;
        let mut next_iteration_length = -1;

        preprocess(&mut self.cm.curve, &self.cm.params, self.last_curve_index);
        let mut store = CurveStore::from_points(&self.cm.curve, self.cm.params.dot_threshold);
        store.finished = finished;

        // Kontext auf lokalen Kopien, damit der Matcher-Zustand waehrend des
        // Laufs veraenderbar bleibt
        let tree = self.cm.tree.clone().unwrap();
        let key_store = self.cm.key_store.clone();
        let params = self.cm.params.clone();
        let ctx = MatchCtx::new(&store, &key_store, &params, &tree);

        let mut stats = self.cm.stats;
        let mut candidates = std::mem::take(&mut self.cm.candidates);
        let mut new_delayed: Vec<DelayedScenario> = Vec::new();

        let old_delayed = std::mem::take(&mut self.delayed);
        for mut ds in old_delayed {
            if ds.dead {
                continue;
            }
            let letters: Vec<u8> = ds.next.keys().copied().collect();
            for letter in letters {
                let nl = ds.next[&letter];
                let trigger = if aggressive {
                    nl.min_length
                } else {
                    nl.max_length
                };
                if self.cumulative_length >= trigger || finished {
                    let outcome = eval_child_scenario(
                        &ctx,
                        &ds.scenario,
                        nl,
                        finished,
                        aggressive,
                        self.cumulative_length,
                        &mut candidates,
                        &mut new_delayed,
                        &mut next_iteration_length,
                        &mut stats,
                    );
                    match outcome {
                        EvalOutcome::Done => {
                            ds.next.swap_remove(&letter);
                        }
                        EvalOutcome::DoneEndPending => {
                            ds.next.insert(letter, NextLetter::end_pending(nl.node));
                        }
                        EvalOutcome::Retry => {
                            // Kurvenende zu nah: spaeter erneut versuchen
                            let nl = ds.next.get_mut(&letter).unwrap();
                            nl.min_length = self.cumulative_length + self.cm.params.incr_retry;
                            if nl.min_length > nl.max_length {
                                nl.max_length = nl.min_length;
                            }
                        }
                    }
                } else {
                    Self::update_next_iteration_length(&mut next_iteration_length, trigger);
                }
            }
            if !ds.next.is_empty() {
                new_delayed.push(ds);
            }
        }

        self.delayed = new_delayed;
        self.last_curve_index = self.cm.curve.len();
        self.delayed_scenarios_filter(&mut stats);

        if finished {
            // letzter Lauf: Post-Processing und finales Ranking
            candidates.retain_mut(|c| c.post_process(&ctx));
            scenario_filter(
                &mut candidates,
                &self.cm.key_store,
                self.cm.params.score_ratio,
                10,
                self.cm.params.max_candidates,
                true,
                &mut stats,
            );
            rank::sort_candidates(&mut candidates, &self.cm.params);
            candidates.sort_by(|a, b| b.score().total_cmp(&a.score()));
        }

        log::debug!(
            "incremental_match_update: szenarien={}, laenge={} (next={}), skim={}, fork={}, nodes={}, retry={}",
            self.delayed.len(),
            self.cumulative_length,
            next_iteration_length,
            stats.skim,
            stats.fork,
            stats.count,
            stats.retry
        );

        self.cm.candidates = candidates;
        self.cm.stats = stats;
        self.next_iteration_length = next_iteration_length;
        self.next_iteration_index =
            self.cm.curve.len() + self.cm.params.incremental_index_gap as usize;
    }

    /// Haelt die vertagte Liste klein und entfernt Namens-Duplikate.
    fn delayed_scenarios_filter(&mut self, stats: &mut Stats) {
        let nb = self.delayed.len();
        let max_active = self.cm.params.max_active_scenarios as usize;
        let mut min_score = f32::MIN;
        if nb > max_active {
            let mut scores: Vec<f32> = self
                .delayed
                .iter()
                .map(|ds| ds.scenario.temp_score())
                .collect();
            scores.sort_by(f32::total_cmp);
            min_score = scores[nb - 1 - max_active];
        }

        let mut dejavu: IndexMap<String, usize> = IndexMap::new();
        for i in 0..self.delayed.len() {
            let sc = self.delayed[i].scenario.temp_score();
            if sc < min_score {
                stats.skim += 1;
                self.delayed[i].dead = true;
                continue;
            }
            if self.delayed[i].scenario.fork_last() {
                continue;
            }
            let name = self.delayed[i].scenario.name(&self.cm.key_store);
            if let Some(&i0) = dejavu.get(&name) {
                let s0 = self.delayed[i0].scenario.temp_score();
                if sc > s0 {
                    self.delayed[i0].dead = true;
                    dejavu.insert(name, i);
                } else {
                    self.delayed[i].dead = true;
                }
            } else {
                dejavu.insert(name, i);
            }
        }
        self.delayed.retain(|ds| !ds.dead);
    }
}

/// Expandiert ein vertagtes Szenario ueber den Standard-Pfad.
///
/// Ohne aggressiven Modus laufen waehrend des Zeichnens nur die
/// Nicht-End-Expansionen; End-Szenarien werden auf das Kurvenende
/// verschoben, damit beide Treiber identische Kandidaten liefern.
/// Der aggressive Modus tauscht diese Stabilitaet gegen fruehe Ergebnisse.
#[allow(clippy::too_many_arguments)]
fn eval_child_scenario(
    ctx: &MatchCtx<'_>,
    scenario: &Scenario,
    nl: NextLetter,
    finished: bool,
    aggressive: bool,
    cumulative_length: i32,
    candidates: &mut Vec<Scenario>,
    result: &mut Vec<DelayedScenario>,
    next_iteration_length: &mut i32,
    stats: &mut Stats,
) -> EvalOutcome {
    let mut children = Vec::new();

    if nl.end_only {
        scenario.child_scenario_end(ctx, nl.node, &mut children, stats);
        candidates.extend(children);
        return EvalOutcome::Done;
    }

    let mut end_pending = false;
    if finished || aggressive {
        if !scenario.child_scenario(ctx, nl.node, &mut children, stats, !finished) {
            stats.retry += 1;
            return EvalOutcome::Retry;
        }
    } else {
        let (ok, wants_end) = scenario.child_scenario_partial(ctx, nl.node, &mut children, stats);
        if !ok {
            stats.retry += 1;
            return EvalOutcome::Retry;
        }
        end_pending = wants_end;
    }

    for child in children {
        if child.is_finished() {
            candidates.push(child);
        } else {
            incremental_next_keys(
                ctx,
                child,
                finished,
                aggressive,
                cumulative_length,
                candidates,
                result,
                next_iteration_length,
                stats,
            );
        }
    }
    if end_pending {
        EvalOutcome::DoneEndPending
    } else {
        EvalOutcome::Done
    }
}

/// Vertagt ein frisches Szenario: je Folgebuchstabe die Laengen-Schwellen
/// berechnen und sofort expandieren, was schon reif ist.
#[allow(clippy::too_many_arguments)]
fn incremental_next_keys(
    ctx: &MatchCtx<'_>,
    scenario: Scenario,
    finished: bool,
    aggressive: bool,
    cumulative_length: i32,
    candidates: &mut Vec<Scenario>,
    result: &mut Vec<DelayedScenario>,
    next_iteration_length: &mut i32,
    stats: &mut Stats,
) {
    let mut delayed_children: IndexMap<u8, NextLetter> = IndexMap::new();

    for child in scenario.next_letters(ctx) {
        let letter = child.letter;
        let (mut min_length, max_length) = if finished {
            (-1, -1)
        } else {
            scenario.next_length(ctx, letter)
        };

        let mut keep: Option<NextLetter> = Some(NextLetter::new(
            child,
            min_length,
            max_length.max(min_length),
        ));
        if cumulative_length >= max_length || finished {
            let outcome = eval_child_scenario(
                ctx,
                &scenario,
                NextLetter::new(child, min_length, max_length),
                finished,
                aggressive,
                cumulative_length,
                candidates,
                result,
                next_iteration_length,
                stats,
            );
            match outcome {
                EvalOutcome::Done => {
                    keep = None;
                }
                EvalOutcome::DoneEndPending => {
                    keep = Some(NextLetter::end_pending(child));
                }
                EvalOutcome::Retry => {
                    min_length = cumulative_length + ctx.params.incr_retry;
                    keep = Some(NextLetter::new(child, min_length, max_length.max(min_length)));
                }
            }
        }

        if let Some(nl) = keep {
            if !nl.end_only {
                IncrementalMatch::update_next_iteration_length(next_iteration_length, nl.max_length);
            }
            delayed_children.insert(letter, nl);
        }
    }

    if !delayed_children.is_empty() {
        result.push(DelayedScenario {
            scenario,
            next: delayed_children,
            dead: false,
        });
    }
}

impl Matcher for IncrementalMatch {
    fn clear_curve(&mut self) {
        self.cm.clear_curve_base();
        self.delayed.clear();
        self.cumulative_length = 0;
        self.next_iteration_length = 0;
        self.next_iteration_index = 0;
        self.last_curve_index = 0;
    }

    fn add_point(&mut self, point: Point, timestamp: i32) {
        let first_point = self.cm.curve.is_empty();
        if first_point {
            self.delayed.clear();
            self.next_iteration_index = 0;
            self.timer = Some(Instant::now());
        }
        self.cm.push_point(point, timestamp);
        self.cumulative_length = self.cm.curve.last().map(|p| p.length).unwrap_or(0);

        if first_point {
            self.incremental_match_begin();
        } else if self.cm.curve.len() >= self.next_iteration_index {
            self.incremental_match_update(false, false);
        }
        if let Some(t) = self.timer {
            self.cm.stats.time = t.elapsed().as_millis() as i32;
        }
    }

    fn end_curve(&mut self, id: i32) {
        self.incremental_match_update(true, false);
        self.cm.done = true;
        self.cm.end_curve_base(id);
    }

    fn base(&self) -> &CurveMatch {
        &self.cm
    }

    fn base_mut(&mut self) -> &mut CurveMatch {
        &mut self.cm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree::WordTree;
    use crate::matcher::scenario::tests::{curve_through, qwerty_keys};
    use std::sync::Arc;

    fn feed(words: &[&str], trace: &[u8]) -> (IncrementalMatch, CurveMatch) {
        let tree = Arc::new(WordTree::from_words(words));
        let key_store = KeyStore::from_keys(&qwerty_keys());
        let points = curve_through(&key_store, trace, 14.0);

        let mut inc = IncrementalMatch::new();
        inc.cm.set_tree(tree.clone());
        let mut one = CurveMatch::new();
        one.set_tree(tree);
        for key in qwerty_keys() {
            inc.cm.add_key(key.clone());
            one.add_key(key);
        }
        for p in &points {
            inc.add_point(p.pos, p.t);
            one.add_point(p.pos, p.t);
        }
        inc.end_curve(1);
        one.end_curve(1);
        (inc, one)
    }

    #[test]
    fn test_incremental_finds_word() {
        let (inc, _) = feed(&["tip", "top"], b"tip");
        let keys = inc.base().key_store().clone();
        let names: Vec<String> = inc
            .base()
            .candidates()
            .iter()
            .map(|c| c.name(&keys))
            .collect();
        assert!(names.contains(&"tip".to_string()), "names = {names:?}");
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let (inc, one) = feed(&["tip", "top", "rut", "to", "tin"], b"tip");
        let keys = one.key_store().clone();
        let inc_names: Vec<String> = inc
            .base()
            .candidates()
            .iter()
            .map(|c| c.name(&keys))
            .collect();
        let one_names: Vec<String> = one.candidates().iter().map(|c| c.name(&keys)).collect();
        assert_eq!(inc_names, one_names);
        for (a, b) in inc.base().candidates().iter().zip(one.candidates()) {
            assert!((a.score() - b.score()).abs() < 1e-5);
        }
    }

    #[test]
    fn test_clear_curve_resets_state() {
        let (mut inc, _) = feed(&["tip"], b"tip");
        inc.clear_curve();
        assert!(inc.base().candidates().is_empty());
        assert!(inc.base().curve().is_empty());
        assert_eq!(inc.cumulative_length, 0);
    }
}
