//! Szenario: die partielle Zuordnung eines Wort-Praefixes zu Kurven-Indizes.
//!
//! Ein Szenario ist ein Werttyp mit eigenen History-Puffern; Kurven-, Tasten-
//! und Parameterdaten werden nicht referenziert, sondern pro Operation als
//! [`MatchCtx`] hereingereicht. Kinder entstehen per Klon plus einem Schritt,
//! spaetere Mutationen des Elternteils beruehren sie nicht.

use glam::Vec2;

use crate::core::curve::{CurveStore, SpecialPoint};
use crate::core::geometry::{angle, dist_line_point, distance, sin_angle, surface4, Point};
use crate::core::keys::KeyStore;
use crate::core::params::Params;
use crate::core::tree::{TreeNode, WordTree};
use crate::matcher::Stats;

/// Geteilter, unveraenderlicher Kontext fuer alle Szenario-Operationen.
pub struct MatchCtx<'a> {
    pub curve: &'a CurveStore,
    pub keys: &'a KeyStore,
    pub params: &'a Params,
    pub tree: &'a WordTree,
    /// Interne Tasten-IDs im Startradius um den ersten Kurvenpunkt
    /// (Spatial-Vorfilter fuer die Wurzel-Expansion)
    pub start_keys: Vec<u8>,
}

impl<'a> MatchCtx<'a> {
    /// Baut den Kontext und berechnet den Startradius-Vorfilter.
    pub fn new(
        curve: &'a CurveStore,
        keys: &'a KeyStore,
        params: &'a Params,
        tree: &'a WordTree,
    ) -> Self {
        // Anisotropie kann die effektive Distanz hoechstens um diesen Faktor
        // verkleinern, der euklidische Radius ist also eine sichere Huelle.
        let start_keys = if curve.size() > 0 && !curve.is_dot {
            let radius = params.dist_max_start as f32 * params.anisotropy_ratio.max(1.0);
            keys.within_radius(curve.point(0), radius)
                .into_iter()
                .map(|m| m.letter)
                .collect()
        } else {
            Vec::new()
        };
        Self {
            curve,
            keys,
            params,
            tree,
            start_keys,
        }
    }
}

/// Die sechs Einzel-Scores eines Schritts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepScore {
    pub distance: f32,
    pub turn: f32,
    pub cos: f32,
    pub curve: f32,
    pub misc: f32,
    pub length: f32,
}

/// Kandidat eines `get_next_key_match`-Laufs.
#[derive(Debug, Clone, Copy)]
struct NextIndex {
    index: usize,
    score: f32,
}

/// Ein Wort-Praefix, ausgerichtet auf eine Folge von Kurven-Indizes.
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    pub(crate) node: TreeNode,
    pub(crate) finished: bool,
    pub(crate) index: usize,
    pub(crate) index_history: Vec<u16>,
    pub(crate) letter_history: Vec<u8>,
    pub(crate) scores: Vec<StepScore>,
    pub(crate) temp_score: f32,
    /// Roh-Score aus der Aggregation (None bis zum Post-Processing)
    pub(crate) score_v1: Option<f32>,
    /// Endgueltiger Score aus dem finalen Ranking
    pub(crate) final_score: Option<f32>,
    pub(crate) last_fork: i32,
    pub(crate) error_count: i32,
    pub(crate) good_count: i32,
    pub(crate) dist: f32,
    pub(crate) dist_sqr: f32,
    pub(crate) new_dist: f32,
    pub(crate) avg_score: StepScore,
    pub(crate) min_score: StepScore,
    pub(crate) min_total: f32,
    pub(crate) debug: bool,
}

impl Scenario {
    /// Wurzel-Szenario (leeres Praefix am Baum-Ursprung).
    pub fn root(tree: &WordTree) -> Self {
        Self {
            node: tree.root(),
            last_fork: -1,
            new_dist: -1.0,
            ..Self::default()
        }
    }

    /// Anzahl zugeordneter Buchstaben.
    pub fn count(&self) -> usize {
        self.letter_history.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn error_count(&self) -> i32 {
        self.error_count
    }

    /// RMS-Distanz zwischen Kurvenpunkten und Tastenzentren.
    pub fn distance(&self) -> f32 {
        self.dist
    }

    pub fn new_distance(&self) -> f32 {
        self.new_dist
    }

    pub fn curve_index(&self) -> usize {
        self.index
    }

    pub fn temp_score(&self) -> f32 {
        self.temp_score
    }

    pub fn score_v1(&self) -> f32 {
        self.score_v1.unwrap_or(0.0)
    }

    /// Aktuell bester bekannter Score (final > roh > Pruning-Score).
    pub fn score(&self) -> f32 {
        self.final_score
            .or(self.score_v1)
            .unwrap_or(self.temp_score)
    }

    pub fn avg_scores(&self) -> StepScore {
        self.avg_score
    }

    pub fn min_scores(&self) -> StepScore {
        self.min_score
    }

    /// Kleinster Einzel-Score ueber alle Zellen.
    pub fn min_total(&self) -> f32 {
        self.min_total
    }

    /// Anzahl der tatsaechlich getroffenen Tasten-Rechtecke.
    pub fn good_count(&self) -> i32 {
        self.good_count
    }

    /// Name des Szenarios: logische Buchstaben des Praefixes.
    pub fn name(&self, keys: &KeyStore) -> String {
        self.letter_history
            .iter()
            .map(|&l| keys.logical_letter(l) as char)
            .collect()
    }

    /// Rohe Payload-Wortliste (CSV, `=` fuer die eigene Schreibweise).
    pub fn word_list(&self, tree: &WordTree) -> String {
        tree.word_list(self.node)
    }

    /// Aufgeloeste Wortliste (`=` durch den Namen ersetzt).
    pub fn words(&self, tree: &WordTree, keys: &KeyStore) -> Vec<String> {
        let name = self.name(keys);
        self.word_list(tree)
            .split(',')
            .filter(|w| !w.is_empty())
            .map(|w| if w == "=" { name.clone() } else { w.to_string() })
            .collect()
    }

    /// Fork innerhalb der letzten zwei Expansionsstufen unterdrueckt Dedup.
    pub fn fork_last(&self) -> bool {
        self.last_fork >= self.count() as i32 - 1
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    // ── Einzel-Scores ───────────────────────────────────────────

    /// Distanz-Score der Taste am Kurvenindex.
    ///
    /// `count_pos`: 0 = erster Buchstabe, -1 = letzter, sonst innen.
    /// Liefert (Score, korrigierte Distanz).
    pub(crate) fn calc_distance_score(
        &self,
        ctx: &MatchCtx<'_>,
        letter: u8,
        index: usize,
        count_pos: i32,
    ) -> (f32, f32) {
        let params = ctx.params;
        let curve = ctx.curve;
        let ratio = if count_pos > 0 {
            params.dist_max_next as f32
        } else {
            params.dist_max_start as f32
        };
        let k = ctx.keys.get(letter);

        let mut cplus = 1.0 / params.anisotropy_ratio;
        let mut cminus = 1.0 / params.anisotropy_ratio;
        let mut axis = Vec2::ZERO;

        // Nutzer-Nachlaessigkeit an Anfang, Ende und scharfen Kurven
        // toleranter behandeln -> anisotrope Norm
        if count_pos == 0 {
            if curve.raw_size() >= 2 {
                axis = Vec2::new(
                    (curve.x(1) - curve.x(0)) as f32,
                    (curve.y(1) - curve.y(0)) as f32,
                );
            }
        } else if count_pos == -1 {
            let idx = curve.size() - 1;
            axis = Vec2::new(
                (curve.x(idx) - curve.x(idx - 1)) as f32,
                (curve.y(idx) - curve.y(idx - 1)) as f32,
            );
        } else if curve.hard_turn(index) != SpecialPoint::None {
            axis = curve.normal(index);
            cminus = 1.0;
        } else {
            cplus = 0.0;
            cminus = 0.0;
        }

        let px = (k.x - curve.x(index)) as f32;
        let py = (k.y - curve.y(index)) as f32;

        let dist = if (cplus == 0.0 && cminus == 0.0) || axis.length_squared() == 0.0 {
            (px * px + py * py).sqrt() / ratio
        } else {
            let d = axis.length();
            let u = (px * axis.x + py * axis.y) / d;
            let v = (px * axis.y - py * axis.x) / d;
            let cu = if u > 0.0 { cplus } else { cminus };
            let mut dist = ((u * cu / ratio).powi(2) + (v / ratio).powi(2)).sqrt();
            if dist < 1.0 && count_pos <= 0 {
                // Kurvenspitzen: zu kurze oder zu lange Striche nicht
                // ueberbestrafen (wirkt nur aufs Ranking, nicht aufs Filtern)
                dist = ((u * cu / ratio / 2.0).powi(2) + (v / ratio).powi(2)).sqrt();
            }
            dist
        };

        (1.0 - dist, ratio * dist)
    }

    /// Richtungs-Score des Segments (Taste->Taste vs. Kurve->Kurve).
    pub(crate) fn calc_cos_score(
        &self,
        ctx: &MatchCtx<'_>,
        prev_letter: u8,
        letter: u8,
        index: usize,
        new_index: usize,
    ) -> f32 {
        let k1 = ctx.keys.get(prev_letter);
        let k2 = ctx.keys.get(letter);
        let p1 = ctx.curve.point(index);
        let p2 = ctx.curve.point(new_index);
        if index == new_index {
            return 0.0;
        }
        self.cos_score_for(ctx, k1, k2, p1.vec2(), p2.vec2())
    }

    fn cos_score_for(&self, ctx: &MatchCtx<'_>, k1: Point, k2: Point, p1: Vec2, p2: Vec2) -> f32 {
        let params = ctx.params;
        let kv = (k2 - k1).vec2();
        let pv = p2 - p1;
        if kv.length_squared() == 0.0 || pv.length_squared() == 0.0 {
            return 0.0;
        }
        let a_sin = sin_angle(kv, pv).abs();
        let max_gap = params.cos_max_gap as f32;
        let max_sin = (params.max_angle as f32).to_radians().sin();
        let len = kv.length();
        let gap = len * a_sin;
        // kurze Kurvensegmente nicht fuer ihre Richtung ueberbestrafen
        let coef_sin = (pv.length() / params.curve_score_min_dist as f32 / 2.0).min(1.0);
        if kv.dot(pv) < 0.0 {
            -1.0
        } else {
            1.0 - (gap / max_gap).max(coef_sin * a_sin / max_sin)
        }
    }

    /// Abweichungs-Score: wie weit verlaesst die Kurve die Segment-Gerade.
    pub(crate) fn calc_curve_score(
        &self,
        ctx: &MatchCtx<'_>,
        prev_letter: u8,
        letter: u8,
        index: usize,
        new_index: usize,
    ) -> f32 {
        let params = ctx.params;
        let curve = ctx.curve;
        let k_begin = ctx.keys.get(prev_letter);
        let k_end = ctx.keys.get(letter);
        let pt_begin = curve.point(index);
        let pt_end = curve.point(new_index);
        let surface = surface4(k_begin, pt_begin, pt_end, k_end);

        let mut max_dist = 0.0f32;
        let mut total_dist = 0.0f32;
        let mut samples = 0;
        let mut i = index + 2;
        while i + 1 < new_index {
            let d = dist_line_point(k_begin, k_end, curve.point(i));
            max_dist = max_dist.max(d);
            total_dist += d;
            samples += 1;
            i += 4;
        }
        let avg_dist = if samples > 0 {
            total_dist / samples as f32
        } else {
            0.0
        };

        let mut sharp_turns = 0;
        for i in index + 2..new_index.saturating_sub(2) {
            if curve.hard_turn(i) != SpecialPoint::None {
                sharp_turns += 1;
            }
        }

        let length = distance(k_begin, k_end);
        let coef = (0.5 + length / params.curve_dist_threshold as f32 / 4.0).min(1.0);
        let scale = params.curve_dist_threshold as f32 * coef;
        let s1 = (max_dist.max(2.0 * avg_dist) / scale).powi(2);
        let s2 = params.curve_surface_coef * surface / 1e6;
        let s3 = params.sharp_turn_penalty * sharp_turns as f32;

        1.0 - s1 - s2 - s3
    }

    /// Tangente aus den Nachbar-Matchpunkten des Szenarios.
    pub(crate) fn computed_curve_tangent(&self, ctx: &MatchCtx<'_>, step: usize) -> Vec2 {
        let i1 = self.index_history[step] as usize;
        let mut d1 = Vec2::ZERO;
        let mut d2 = Vec2::ZERO;
        if step > 0 {
            let i0 = self.index_history[step - 1] as usize;
            if i0 < i1 {
                let d = (ctx.curve.point(i1) - ctx.curve.point(i0)).vec2();
                d1 = d.normalize_or_zero() * 1000.0;
            }
        }
        if step + 1 < self.count() {
            let i2 = self.index_history[step + 1] as usize;
            if i2 > i1 {
                let d = (ctx.curve.point(i2) - ctx.curve.point(i1)).vec2();
                d2 = d.normalize_or_zero() * 1000.0;
            }
        }
        d1 + d2
    }

    /// Lokale Kurventangente (an scharfen Kurven unzuverlaessig).
    pub(crate) fn actual_curve_tangent(&self, ctx: &MatchCtx<'_>, index: usize) -> Vec2 {
        let i = index.clamp(1, ctx.curve.size().saturating_sub(2));
        (ctx.curve.point(i + 1) - ctx.curve.point(i - 1)).vec2()
    }

    // ── Ausrichtungs-Suche ──────────────────────────────────────

    /// Sucht ab `start_index` die Kurvenindizes, an denen der Buchstabe
    /// gebunden werden kann.
    ///
    /// Jeder Kandidat traegt seinen eigenen Distanz-Score. Das Overflow-Flag
    /// meldet im inkrementellen Modus, dass das Kurvenende zu nah ist.
    fn get_next_key_match(
        &self,
        ctx: &MatchCtx<'_>,
        letter: u8,
        start_index: usize,
        incremental: bool,
    ) -> (Vec<NextIndex>, bool) {
        let params = ctx.params;
        let curve = ctx.curve;
        let size = curve.size() as i64;

        let mut score = f32::MIN;
        let mut steps_taken: i64 = 0;
        let mut retry: i64 = 0;
        let mut max_score = f32::MIN;
        let mut max_score_index: i64 = -1;
        let gap = params.max_turn_index_gap as i64;
        let mut last_turn_point: i64 = 0;
        let mut last_turn_score = 0.0f32;
        let mut overflow = false;
        let mut failed = 0;
        let mut finished = false;
        let mut list: Vec<NextIndex> = Vec::new();

        let start_st = curve.hard_turn(start_index);
        let mut index = start_index as i64;
        let mut step: i64 = 1;
        let count_pos = self.count() as i32;

        loop {
            if incremental && index >= size - 4 {
                // Spezialpunkt-Erkennung arbeitet nahe dem Kurvenende noch
                // nicht, im inkrementellen Modus spaeter erneut versuchen
                overflow = true;
                break;
            }
            if index >= size - 1 {
                break;
            }

            let (new_score, _) = self.calc_distance_score(ctx, letter, index as usize, count_pos);
            if new_score > max_score {
                max_score = new_score;
                max_score_index = index;
            }
            if new_score > score {
                retry = 0;
            } else {
                retry += step;
                if retry > params.match_wait as i64 && steps_taken > params.match_wait as i64 {
                    break;
                }
            }
            score = new_score;

            let mut st = curve.special(index as usize);
            if st == SpecialPoint::Inflection {
                st = SpecialPoint::None;
            }
            if st != SpecialPoint::None && !st.is_mandatory() && last_turn_point > 0 {
                // weiche Punkte haben keinen Vorrang mehr
                st = SpecialPoint::None;
            }

            if st != SpecialPoint::None && index > start_index as i64 {
                if last_turn_point > 0 && curve.special(last_turn_point as usize).is_mandatory() {
                    // es gibt schon eine harte Kurve fuer diesen Buchstaben
                    break;
                }
                if st == SpecialPoint::MovableTurn && index <= start_index as i64 + gap {
                    // darf noch zum vorherigen Matchpunkt gehoeren
                } else {
                    last_turn_point = index;
                    last_turn_score = score;
                    if st == SpecialPoint::UTurn {
                        list.clear();
                        if score > 0.0 {
                            list.push(NextIndex {
                                index: index as usize,
                                score,
                            });
                        }
                        if max_score_index < index && max_score > 0.0 {
                            list.push(NextIndex {
                                index: max_score_index as usize,
                                score: max_score,
                            });
                        }
                        if list.is_empty() {
                            failed = 1;
                        }
                        finished = true;
                        break;
                    }
                }
            }

            if last_turn_point > 0
                && curve.hard_turn(last_turn_point as usize).is_mandatory()
                && index > last_turn_point + gap
            {
                // nicht ueber einen unkonsumierten Pflichtpunkt hinauslaufen
                break;
            }

            // weit weg von der Taste: Schritt vergroessern, aber nie ueber
            // eine scharfe Kurve hinweg
            step = 1;
            if new_score < -1.0 {
                let wanted = ((-0.5 - new_score) * params.dist_max_next as f32 / 20.0) as i64;
                let mut i = 1;
                while i < wanted
                    && index + i < size - 1
                    && curve.hard_turn((index + i) as usize) == SpecialPoint::None
                {
                    i += 1;
                }
                step = i.max(1);
            }

            steps_taken += step;
            index += step;
        }

        if max_score <= 0.0 {
            // Zieltaste nie angenaehert
            failed = 10;
        }

        if !finished && failed == 0 {
            let push_max = |list: &mut Vec<NextIndex>| {
                list.push(NextIndex {
                    index: max_score_index as usize,
                    score: max_score,
                });
            };
            if last_turn_point == 0 {
                push_max(&mut list);
            } else if max_score_index < last_turn_point - gap {
                push_max(&mut list);
            } else if max_score_index <= last_turn_point + gap {
                let last_st = curve.special(last_turn_point as usize);
                if matches!(
                    last_st,
                    SpecialPoint::SlowDown | SpecialPoint::SmallTurn | SpecialPoint::MovableTurn
                ) {
                    push_max(&mut list);
                } else {
                    if last_turn_score > 0.0 {
                        list.push(NextIndex {
                            index: last_turn_point as usize,
                            score: last_turn_score,
                        });
                    }
                    let maxd = params.min_turn_index_gap as i64;
                    if (max_score_index < last_turn_point - maxd)
                        || (max_score_index > last_turn_point + maxd
                            && start_st == SpecialPoint::None
                            && (start_index as i64 >= last_turn_point - gap
                                || !last_st.is_mandatory()))
                        || (list.is_empty() && !last_st.is_mandatory())
                    {
                        push_max(&mut list);
                    }
                }
            } else {
                let last_st = curve.special(last_turn_point as usize);
                if last_st.is_mandatory() {
                    // Pflichtpunkt wurde uebersprungen
                    failed = 20;
                } else {
                    push_max(&mut list);
                }
            }
        }

        if failed != 0 {
            log::trace!(
                "get_next_key_match {}:{} fail={}",
                String::from_utf8_lossy(&self.letter_history),
                letter as char,
                failed
            );
            return (Vec::new(), overflow);
        }
        (list, overflow)
    }

    // ── Kind-Szenarien ──────────────────────────────────────────

    /// Expandiert das Szenario um alle moeglichen Folgebuchstaben.
    pub fn next_key(&self, ctx: &MatchCtx<'_>, result: &mut Vec<Scenario>, st: &mut Stats) {
        for child in ctx.tree.children(self.node) {
            self.child_scenario(ctx, child, result, st, false);
        }
    }

    /// Moegliche Folgebuchstaben (Baum-Kinder) des Szenarios.
    pub fn next_letters(&self, ctx: &MatchCtx<'_>) -> Vec<TreeNode> {
        ctx.tree.children(self.node)
    }

    /// Erzeugt Kind-Szenarien fuer einen Baum-Kindknoten.
    ///
    /// `false` nur im inkrementellen Modus: das Kurvenende ist zu nah, der
    /// Aufrufer muss es spaeter erneut versuchen.
    pub fn child_scenario(
        &self,
        ctx: &MatchCtx<'_>,
        child: TreeNode,
        result: &mut Vec<Scenario>,
        st: &mut Stats,
        incremental: bool,
    ) -> bool {
        let has_payload = ctx.tree.has_payload(child);
        let is_leaf = ctx.tree.is_leaf(child);
        let partial = incremental && !ctx.curve.finished;
        let is_dot = ctx.curve.is_dot;

        // Schritt 1: Nicht-End-Szenarien
        if !is_dot && (!is_leaf || (partial && has_payload)) {
            let len_before = result.len();
            if !self.child_scenario_internal(ctx, child, result, st, partial, false) {
                return false;
            }
            if is_leaf {
                // Treffer dienen nur der Pruefung, ob die Kurve lang genug
                // fuer das End-Szenario ist
                if result.len() > len_before {
                    let curve_index = result[len_before..]
                        .iter()
                        .map(|s| s.index)
                        .max()
                        .unwrap_or(0);
                    result.truncate(len_before);
                    if ctx.curve.total_length()
                        < ctx.curve.length(curve_index) + ctx.params.end_scenario_wait
                    {
                        return false;
                    }
                } else {
                    return true;
                }
            }
        }

        // Schritt 2: End-Szenario
        if has_payload && (self.count() > 0 || is_dot) {
            self.child_scenario_internal(ctx, child, result, st, partial, true);
        }
        true
    }

    /// Teilexpansion fuer den inkrementellen Modus: nur Nicht-End-Szenarien.
    ///
    /// End-Szenarien werden bis zum Kurvenende aufgeschoben, damit ihr
    /// letzter Matchpunkt auf der fertigen Kurve liegt. Liefert
    /// `(ok, end_steht_aus)`; bei `ok == false` muss der Aufrufer spaeter
    /// erneut anfragen.
    pub fn child_scenario_partial(
        &self,
        ctx: &MatchCtx<'_>,
        child: TreeNode,
        result: &mut Vec<Scenario>,
        st: &mut Stats,
    ) -> (bool, bool) {
        let has_payload = ctx.tree.has_payload(child);
        let is_leaf = ctx.tree.is_leaf(child);
        let wants_end = has_payload && (self.count() > 0 || ctx.curve.is_dot);
        if !ctx.curve.is_dot
            && !is_leaf
            && !self.child_scenario_internal(ctx, child, result, st, true, false)
        {
            return (false, wants_end);
        }
        (true, wants_end)
    }

    /// Aufgeschobener End-Szenario-Lauf nach Kurvenende.
    pub fn child_scenario_end(
        &self,
        ctx: &MatchCtx<'_>,
        child: TreeNode,
        result: &mut Vec<Scenario>,
        st: &mut Stats,
    ) {
        if ctx.tree.has_payload(child) && (self.count() > 0 || ctx.curve.is_dot) {
            self.child_scenario_internal(ctx, child, result, st, false, true);
        }
    }

    fn child_scenario_internal(
        &self,
        ctx: &MatchCtx<'_>,
        child: TreeNode,
        result: &mut Vec<Scenario>,
        st: &mut Stats,
        incremental: bool,
        end_scenario: bool,
    ) -> bool {
        // Diakritika: alle Tasten probieren, die den Buchstaben bedienen
        for &internal in ctx.keys.keys_for_letter(child.letter) {
            if !self.child_scenario_with_letter(
                ctx,
                internal,
                child,
                result,
                st,
                incremental,
                end_scenario,
            ) {
                return false;
            }
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn child_scenario_with_letter(
        &self,
        ctx: &MatchCtx<'_>,
        letter: u8,
        child: TreeNode,
        result: &mut Vec<Scenario>,
        st: &mut Stats,
        incremental: bool,
        end_scenario: bool,
    ) -> bool {
        let params = ctx.params;
        let curve = ctx.curve;
        let count = self.count();
        let prev_letter = self.letter_history.last().copied().unwrap_or(0);
        let index = self.index;

        let mut new_index_list: Vec<NextIndex> = Vec::new();

        if count == 0 {
            // erster Buchstabe: Spatial-Vorfilter, dann Distanz am Startpunkt
            if !curve.is_dot && !ctx.start_keys.contains(&letter) {
                return true;
            }
            let (score, _) = self.calc_distance_score(ctx, letter, 0, 0);
            new_index_list.push(NextIndex { index: 0, score });
        } else if end_scenario {
            let new_index = curve.size() - 1;
            let mut st_found = false;
            for i in index + 1..=new_index {
                let sp = curve.special(i);
                st_found |= sp.is_mandatory()
                    && (sp != SpecialPoint::MovableTurn
                        || i > index + params.max_turn_index_gap as usize);
            }
            if !st_found {
                let (score, _) = self.calc_distance_score(ctx, letter, new_index, -1);
                new_index_list.push(NextIndex {
                    index: new_index,
                    score,
                });
            }
        } else {
            let (list, overflow) = self.get_next_key_match(ctx, letter, index, incremental);
            if incremental && overflow {
                return false; // spaeter nochmal fragen
            }
            if list.is_empty() {
                return true;
            }
            new_index_list = list;
        }

        if new_index_list.len() >= 2 {
            st.fork += 1;
        }

        let mut continue_count = 0;
        let mut first_index: Option<usize> = None;

        for nit in &new_index_list {
            let new_index = nit.index;
            let distance_score = nit.score;

            // drei aufeinanderfolgende Buchstaben auf demselben Kurvenpunkt
            // sind nie plausibel
            if count > 2 && new_index <= self.index_history[count - 2] as usize + 1 {
                continue;
            }

            let mut score = StepScore {
                distance: distance_score,
                ..StepScore::default()
            };
            let mut err = false;

            if count > 0 {
                if new_index > index {
                    score.cos = self.calc_cos_score(ctx, prev_letter, letter, index, new_index);
                    score.curve = self.calc_curve_score(ctx, prev_letter, letter, index, new_index);
                } else {
                    // Doppelbelegung desselben Kurvenpunkts
                    let mut sc = -1.0;
                    if curve.special(new_index) != SpecialPoint::UTurn {
                        let tgt = self.actual_curve_tangent(ctx, index);
                        let k1 = ctx.keys.get(prev_letter);
                        let k2 = ctx.keys.get(letter);
                        if k1 == k2 {
                            // Doppelbuchstabe: kein Sehnenwinkel definiert
                            sc = params.same_point_score;
                        } else {
                            let a = angle((k2 - k1).vec2(), tgt).to_degrees();
                            if a.abs() <= params.same_point_max_angle as f32 {
                                let p1 = curve.point(index).vec2();
                                sc = self
                                    .cos_score_for(ctx, k1, k2, p1, p1 + tgt)
                                    .max(params.same_point_score);
                            }
                        }
                    }
                    score.cos = sc;
                    err = sc < 0.0;
                }
            }

            let mut ok =
                score.distance >= 0.0 && score.curve >= 0.0 && score.cos >= 0.0 && !err;

            // Fehler-Toleranz: ein verfehlter Buchstabe je Szenario ist bei
            // langen Woertern oft die richtige Loesung
            let mut error_ignore = false;
            if params.error_correct != 0
                && !ok
                && count >= 2
                && (self.error_count < 1 || count >= params.error_ignore_count as usize)
            {
                let limit = if end_scenario { 0.0 } else { -0.45 };
                if score.distance > limit
                    && (score.cos >= 0.0
                        || score.curve >= 0.0
                        || count >= params.error_ignore_count as usize)
                {
                    error_ignore = true;
                    ok = true;
                }
            }

            if !ok {
                continue;
            }

            let mut child_scenario = self.clone();
            child_scenario.node = child;
            child_scenario.index = new_index;
            child_scenario.index_history.push(new_index as u16);
            child_scenario.letter_history.push(letter);
            child_scenario.scores.push(score);
            child_scenario.finished = end_scenario;
            child_scenario.error_count = self.error_count + i32::from(error_ignore);

            // tatsaechlich getroffene Tasten zaehlen
            let key = ctx.keys.get(letter);
            let size = ctx.keys.size(letter);
            let pt = curve.point(new_index);
            if (pt.x - key.x).abs() * 2 <= size.x && (pt.y - key.y).abs() * 2 <= size.y {
                child_scenario.good_count += 1;
            }

            let dx = (key.x - pt.x) as f32;
            let dy = (key.y - pt.y) as f32;
            child_scenario.dist_sqr = self.dist_sqr + dx * dx + dy * dy;
            child_scenario.dist = (child_scenario.dist_sqr / (count + 1) as f32).sqrt();

            // Pruning-Score: monoton in der laufenden Distanz
            child_scenario.temp_score = 1.0 / (1.0 + child_scenario.dist / 30.0)
                - params.coef_error_tmp * child_scenario.error_count as f32;

            continue_count += 1;
            if continue_count >= 2 {
                if let Some(fi) = first_index.take() {
                    result[fi].last_fork = count as i32 + 1;
                }
                child_scenario.last_fork = count as i32 + 1;
            } else {
                first_index = Some(result.len());
            }

            st.count += 1;
            result.push(child_scenario);
        }

        true
    }

    /// Laengen-Schwellen fuer ein moegliches Kind-Szenario (inkrementell).
    ///
    /// `max` ist die pessimistische, `min` die optimistische Schaetzung der
    /// Kurvenlaenge, ab der sich eine Expansion lohnt.
    pub fn next_length(&self, ctx: &MatchCtx<'_>, next_letter: u8) -> (i32, i32) {
        if self.count() == 0 {
            return (1, 1);
        }
        let last_letter = *self.letter_history.last().unwrap();
        let last_length = ctx.curve.length(self.index);
        if last_letter == next_letter {
            return (last_length, last_length);
        }
        let dist = distance(ctx.keys.get(last_letter), ctx.keys.get(next_letter));
        let params = ctx.params;
        let max_length = last_length
            + ((1.0 + dist / params.dist_max_next as f32 / 20.0)
                * (params.incremental_length_lag as f32 + dist)) as i32;
        let min_length = last_length + (dist - params.incremental_length_lag as f32 / 2.0).max(0.0) as i32;
        (min_length, max_length)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::curve::{CurvePoint, CurveStore};
    use crate::core::keys::{Key, KeyStore};
    use crate::core::tree::WordTree;
    use crate::matcher::preprocess::preprocess;

    /// 10x4-QWERTY-Layout mit 100-Pixel-Tasten.
    pub fn qwerty_keys() -> Vec<Key> {
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

    /// Kurve entlang der Tastenzentren, `step` Pixel pro Punkt.
    pub fn curve_through(keys: &KeyStore, word: &[u8], step: f32) -> Vec<CurvePoint> {
        let mut points: Vec<CurvePoint> = Vec::new();
        let mut t = 0;
        for pair in word.windows(2) {
            let from = keys.get(pair[0]).vec2();
            let to = keys.get(pair[1]).vec2();
            let len = from.distance(to);
            let n = (len / step).ceil() as i32;
            for i in 0..n {
                let p = from.lerp(to, i as f32 / n as f32);
                points.push(CurvePoint::new(
                    Point::new(p.x.round() as i32, p.y.round() as i32),
                    t,
                ));
                t += 16;
            }
        }
        let last = keys.get(*word.last().unwrap());
        points.push(CurvePoint::new(last, t));
        points
    }

    pub struct Fixture {
        pub keys: KeyStore,
        pub curve: CurveStore,
        pub params: Params,
        pub tree: WordTree,
    }

    impl Fixture {
        pub fn new(words: &[&str], trace: &[u8]) -> Self {
            let params = Params::default();
            let keys = KeyStore::from_keys(&qwerty_keys());
            let mut points = curve_through(&keys, trace, 14.0);
            preprocess(&mut points, &params, 0);
            let mut curve = CurveStore::from_points(&points, params.dot_threshold);
            curve.finished = true;
            Self {
                keys,
                curve,
                params,
                tree: WordTree::from_words(words),
            }
        }

        pub fn ctx(&self) -> MatchCtx<'_> {
            MatchCtx::new(&self.curve, &self.keys, &self.params, &self.tree)
        }
    }

    #[test]
    fn test_first_letter_accepts_near_key_only() {
        let fx = Fixture::new(&["tip", "pit"], b"tip");
        let ctx = fx.ctx();
        let root = Scenario::root(&fx.tree);
        let mut st = Stats::default();
        let mut result = Vec::new();
        root.next_key(&ctx, &mut result, &mut st);
        // Kurve startet auf 't': nur das t-Kind ueberlebt, 'p' ist zu weit weg
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].letter_history, vec![b't']);
        assert_eq!(result[0].index_history, vec![0]);
        assert!(result[0].scores[0].distance > 0.5);
    }

    #[test]
    fn test_start_keys_prefilter_contains_start_letter() {
        let fx = Fixture::new(&["tip"], b"tip");
        let ctx = fx.ctx();
        assert!(ctx.start_keys.contains(&b't'));
        assert!(!ctx.start_keys.contains(&b'z'));
    }

    #[test]
    fn test_full_word_expansion_reaches_leaf() {
        let fx = Fixture::new(&["tip"], b"tip");
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
        assert_eq!(finished.len(), 1);
        let s = &finished[0];
        assert_eq!(s.name(&fx.keys), "tip");
        // Indizes monoton, nie drei gleiche hintereinander
        for w in s.index_history.windows(2) {
            assert!(w[1] >= w[0]);
        }
        assert_eq!(s.error_count(), 0);
    }

    #[test]
    fn test_temp_score_monotone_in_distance() {
        let fx = Fixture::new(&["tip"], b"tip");
        let params = &fx.params;
        let mut near = Scenario::root(&fx.tree);
        near.letter_history = vec![b't'];
        near.dist_sqr = 100.0;
        near.dist = 10.0;
        near.temp_score = 1.0 / (1.0 + near.dist / 30.0);
        let mut far = near.clone();
        far.dist = 50.0;
        far.temp_score = 1.0 / (1.0 + far.dist / 30.0);
        assert!(near.temp_score > far.temp_score);
        // Fehler druecken den Pruning-Score bei gleicher Distanz
        let mut with_error = near.clone();
        with_error.error_count = 1;
        with_error.temp_score = 1.0 / (1.0 + with_error.dist / 30.0)
            - params.coef_error_tmp * with_error.error_count as f32;
        assert!(with_error.temp_score < near.temp_score);
    }

    #[test]
    fn test_trie_descent_invariant() {
        let fx = Fixture::new(&["tip", "tin"], b"tip");
        let ctx = fx.ctx();
        let mut st = Stats::default();
        let mut frontier = vec![Scenario::root(&fx.tree)];
        let mut all = Vec::new();
        while let Some(scenario) = frontier.pop() {
            let mut children = Vec::new();
            scenario.next_key(&ctx, &mut children, &mut st);
            for child in children {
                all.push(child.clone());
                if !child.is_finished() {
                    frontier.push(child);
                }
            }
        }
        for s in &all {
            let logical: Vec<u8> = s
                .letter_history
                .iter()
                .map(|&l| fx.keys.logical_letter(l))
                .collect();
            let node = fx.tree.descend(&logical).expect("Praefix muss im Baum liegen");
            assert_eq!(node, s.node);
        }
    }

    #[test]
    fn test_clone_isolates_history() {
        let fx = Fixture::new(&["tip"], b"tip");
        let mut parent = Scenario::root(&fx.tree);
        parent.letter_history = vec![b't'];
        parent.index_history = vec![0];
        parent.scores = vec![StepScore::default()];
        let child = parent.clone();
        parent.letter_history.push(b'i');
        parent.index_history.push(5);
        assert_eq!(child.letter_history, vec![b't']);
        assert_eq!(child.index_history, vec![0]);
    }

    #[test]
    fn test_fork_last_window() {
        let fx = Fixture::new(&["tip"], b"tip");
        let mut s = Scenario::root(&fx.tree);
        s.letter_history = vec![b't', b'i'];
        s.last_fork = 2;
        assert!(s.fork_last());
        s.letter_history.push(b'p');
        assert!(s.fork_last()); // eine Stufe spaeter noch unterdrueckt
        s.letter_history.push(b's');
        assert!(!s.fork_last());
    }
}
