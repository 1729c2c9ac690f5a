//! Kurven-Datenstrukturen: Rohpunkte plus kompakter spaltenweiser Store.
//!
//! Der Store haelt alle abgeleiteten Punkt-Attribute in parallelen Arrays,
//! weil die Expansion pro Match viele tausend Index-Zugriffe macht.

use glam::Vec2;

use crate::core::geometry::{distance, Point};

/// Klassifikation geometrisch/kinematisch markanter Kurvenpunkte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SpecialPoint {
    /// Unauffaelliger Punkt
    #[default]
    None = 0,
    /// Scharfe Richtungsaenderung
    SharpTurn = 1,
    /// Kehrtwende, muss exakt auf einer Taste liegen
    UTurn = 2,
    /// Geschwindigkeits-Minimum
    SlowDown = 3,
    /// Wendepunkt (nur informativ)
    Inflection = 4,
    /// Kleine Kurve, darf optional eine Taste binden
    SmallTurn = 5,
    /// Verschiebbare scharfe Kurve (Schleifen-Umgebung)
    MovableTurn = 6,
}

impl SpecialPoint {
    /// Klassen, die zwingend von einem Buchstaben konsumiert werden muessen.
    pub fn is_mandatory(self) -> bool {
        matches!(
            self,
            SpecialPoint::SharpTurn | SpecialPoint::UTurn | SpecialPoint::MovableTurn
        )
    }

    /// Stabiler Wire-Wert (0..=6).
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Ein einzelner Kurvenpunkt mit abgeleiteten Attributen.
#[derive(Debug, Clone, Copy)]
pub struct CurvePoint {
    pub pos: Point,
    /// Millisekunden seit Strichbeginn
    pub t: i32,
    /// Geschwindigkeit (Einheiten/Sekunde)
    pub speed: i32,
    /// Roh-Drehwinkel an diesem Index (Grad, vorzeichenbehaftet)
    pub turn_angle: i32,
    /// Geglaetteter Drehwinkel
    pub turn_smooth: i32,
    pub special: SpecialPoint,
    /// Normalenvektor an scharfen Kurven (Anisotropie-Achse)
    pub normal: Vec2,
    /// Kumulierte Bogenlaenge bis zu diesem Punkt
    pub length: i32,
    /// Optionale geglaettete Koordinaten (ueberschreiben die rohen im Store)
    pub smooth: Option<Point>,
    /// Beendet eine Kurve (Mehr-Kurven-Kontexte)
    pub end_marker: bool,
}

impl CurvePoint {
    /// Neuer Rohpunkt ohne abgeleitete Attribute.
    pub fn new(pos: Point, t: i32) -> Self {
        Self {
            pos,
            t,
            speed: 1,
            turn_angle: 0,
            turn_smooth: 0,
            special: SpecialPoint::None,
            normal: Vec2::ZERO,
            length: 0,
            smooth: None,
            end_marker: false,
        }
    }

    /// Markierungs-Punkt, der das Kurvenende signalisiert.
    pub fn end_marker() -> Self {
        let mut p = Self::new(Point::new(0, 0), 0);
        p.end_marker = true;
        p
    }
}

/// Spaltenweiser Kurven-Store fuer das Matching.
///
/// Positions-Spalten nutzen die geglaetteten Koordinaten (falls vorhanden),
/// `point()` liefert den Rohpunkt.
#[derive(Debug, Clone, Default)]
pub struct CurveStore {
    points: Vec<Point>,
    xs: Vec<i32>,
    ys: Vec<i32>,
    turn: Vec<i32>,
    turn_smooth: Vec<i32>,
    special: Vec<SpecialPoint>,
    normal: Vec<Vec2>,
    speed: Vec<i32>,
    length: Vec<i32>,
    timestamp: Vec<i32>,
    /// Aktive Punktanzahl (bei Dots 1, die Spalten bleiben voll befuellt)
    active: usize,
    /// Kurve wurde vom Nutzer abgeschlossen
    pub finished: bool,
    /// Gesamtlaenge unter der Punkt-Schwelle: nur Einzel-Buchstaben-Match
    pub is_dot: bool,
    /// Geradheits-Mass: Bogenlaenge/Sehne - 1 (0 = perfekte Gerade, <0 = unbekannt)
    pub straight: f32,
}

impl CurveStore {
    /// Baut den Store aus den Kurvenpunkten.
    ///
    /// Liegt die Gesamtlaenge unter `min_length`, gilt die Kurve als
    /// "Dot" (einfacher Tipper) und nur der erste Punkt bleibt aktiv.
    pub fn from_points(curve: &[CurvePoint], min_length: i32) -> Self {
        let mut store = Self::default();
        store.set_curve(curve, min_length);
        store
    }

    /// Befuellt den Store neu (inkrementelle Laeufe rufen das je Update auf).
    pub fn set_curve(&mut self, curve: &[CurvePoint], min_length: i32) {
        self.clear();

        let mut total = 0f32;
        for p in curve {
            if p.end_marker {
                self.finished = true;
                break;
            }
            let pos = p.smooth.unwrap_or(p.pos);
            if let (Some(&px), Some(&py)) = (self.xs.last(), self.ys.last()) {
                total += distance(Point::new(px, py), pos);
            }
            self.points.push(p.pos);
            self.xs.push(pos.x);
            self.ys.push(pos.y);
            self.turn.push(p.turn_angle);
            self.turn_smooth.push(p.turn_smooth);
            self.special.push(p.special);
            self.normal.push(p.normal);
            self.speed.push(p.speed);
            self.length.push(total as i32);
            self.timestamp.push(p.t);
        }

        self.active = self.points.len();
        if !self.points.is_empty() && total as i32 <= min_length {
            self.active = 1;
            self.is_dot = true;
        }

        self.straight = if self.size() >= 2 {
            let chord = distance(
                Point::new(self.xs[0], self.ys[0]),
                Point::new(*self.xs.last().unwrap(), *self.ys.last().unwrap()),
            )
            .max(1.0);
            total / chord - 1.0
        } else {
            -1.0
        };
    }

    fn clear(&mut self) {
        self.points.clear();
        self.xs.clear();
        self.ys.clear();
        self.turn.clear();
        self.turn_smooth.clear();
        self.special.clear();
        self.normal.clear();
        self.speed.clear();
        self.length.clear();
        self.timestamp.clear();
        self.active = 0;
        self.finished = false;
        self.is_dot = false;
        self.straight = -1.0;
    }

    /// Anzahl aktiver Punkte.
    pub fn size(&self) -> usize {
        self.active
    }

    /// Anzahl gespeicherter Rohpunkte (bei Dots groesser als `size`).
    pub fn raw_size(&self) -> usize {
        self.points.len()
    }

    /// Rohposition am Index.
    pub fn point(&self, index: usize) -> Point {
        self.points[index]
    }

    /// Geglaettete X-Koordinate.
    pub fn x(&self, index: usize) -> i32 {
        self.xs[index]
    }

    /// Geglaettete Y-Koordinate.
    pub fn y(&self, index: usize) -> i32 {
        self.ys[index]
    }

    pub fn turn(&self, index: usize) -> i32 {
        self.turn[index]
    }

    pub fn turn_smooth(&self, index: usize) -> i32 {
        self.turn_smooth[index]
    }

    /// Vollstaendige Spezialpunkt-Klasse.
    pub fn special(&self, index: usize) -> SpecialPoint {
        self.special[index]
    }

    /// Nur "harte" Kurvenklassen (1, 2), alles andere wird als None gemeldet.
    pub fn hard_turn(&self, index: usize) -> SpecialPoint {
        match self.special[index] {
            st @ (SpecialPoint::SharpTurn | SpecialPoint::UTurn) => st,
            _ => SpecialPoint::None,
        }
    }

    pub fn normal(&self, index: usize) -> Vec2 {
        self.normal[index]
    }

    pub fn speed(&self, index: usize) -> i32 {
        self.speed[index]
    }

    /// Kumulierte Bogenlaenge bis zum Index.
    pub fn length(&self, index: usize) -> i32 {
        self.length[index]
    }

    pub fn timestamp(&self, index: usize) -> i32 {
        self.timestamp[index]
    }

    /// Gesamtlaenge der Kurve.
    pub fn total_length(&self) -> i32 {
        if self.active == 0 {
            return 0;
        }
        self.length[self.active - 1]
    }
}
