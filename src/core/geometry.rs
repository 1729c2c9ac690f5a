//! Reine Geometrie-Funktionen fuer die Kurven-Analyse.
//!
//! Layer-neutral: wird von Preprocessing, Scenario-Scoring und
//! Post-Processing gemeinsam genutzt, ohne Zirkel-Abhaengigkeiten.

use glam::Vec2;
use std::ops::{Add, Mul, Sub};

/// Ein Punkt im Tastatur-Koordinatensystem (Integer-Pixel).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    /// Erstellt einen neuen Punkt.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Float-Sicht auf den Punkt fuer glam-basierte Rechnungen.
    pub fn vec2(self) -> Vec2 {
        Vec2::new(self.x as f32, self.y as f32)
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, other: Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, other: Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f32> for Point {
    type Output = Point;
    fn mul(self, factor: f32) -> Point {
        Point::new(
            (self.x as f32 * factor) as i32,
            (self.y as f32 * factor) as i32,
        )
    }
}

/// Euklidische Distanz zwischen zwei Punkten.
pub fn distance(p1: Point, p2: Point) -> f32 {
    p1.vec2().distance(p2.vec2())
}

/// Kosinus des Winkels zwischen zwei Richtungsvektoren.
pub fn cos_angle(v1: Vec2, v2: Vec2) -> f32 {
    v1.dot(v2) / (v1.length() * v2.length())
}

/// Sinus des Winkels zwischen zwei Richtungsvektoren (vorzeichenbehaftet).
pub fn sin_angle(v1: Vec2, v2: Vec2) -> f32 {
    v1.perp_dot(v2) / (v1.length() * v2.length())
}

/// Vorzeichenbehafteter Winkel zwischen zwei Vektoren in Radiant [-PI, PI].
///
/// Ueber `acos` mit Kreuzprodukt-Vorzeichen; der Kosinus wird wegen
/// Rundungsfehlern auf [-1, 1] geklemmt.
pub fn angle(v1: Vec2, v2: Vec2) -> f32 {
    let cosa = cos_angle(v1, v2);
    let value = if cosa >= 1.0 {
        0.0
    } else if cosa <= -1.0 {
        std::f32::consts::PI
    } else {
        cosa.acos()
    };
    if v1.perp_dot(v2) < 0.0 {
        -value
    } else {
        value
    }
}

/// Winkel zwischen zwei Punkt-Differenzen (Komfort-Variante von [`angle`]).
pub fn angle_p(p1: Point, p2: Point) -> f32 {
    angle(p1.vec2(), p2.vec2())
}

/// Senkrechter Abstand des Punkts `p` zur Geraden durch `a` und `b`.
pub fn dist_line_point(a: Point, b: Point, p: Point) -> f32 {
    let av = a.vec2();
    let bv = b.vec2();
    let pv = p.vec2();
    let lp = av.distance(bv);
    if lp < f32::EPSILON {
        return av.distance(pv);
    }
    let u = (pv - av).dot(bv - av) / (lp * lp);
    let proj = av + (bv - av) * u;
    proj.distance(pv)
}

/// Absolute Flaeche des Vierecks `a-b-c-d` (Schnuersenkel-Formel).
pub fn surface4(a: Point, b: Point, c: Point, d: Point) -> f32 {
    let (a, b, c, d) = (a.vec2(), b.vec2(), c.vec2(), d.vec2());
    let sum = a.perp_dot(b) + b.perp_dot(c) + c.perp_dot(d) + d.perp_dot(a);
    0.5 * sum.abs()
}
