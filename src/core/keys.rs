//! Tasten-Store: schneller Zugriff auf Tastenzentren und Umkehr-Index.
//!
//! Die Engine arbeitet ausschliesslich mit internen Ein-Byte-Buchstaben-IDs;
//! der Umkehr-Index bildet einen logischen Buchstaben auf alle Tasten ab,
//! die ihn bedienen koennen (Diakritika-Tasten bedienen auch den Basis-
//! Buchstaben).

use kiddo::{KdTree, SquaredEuclidean};

use crate::core::geometry::Point;

/// Eine Taste des Layouts: Rechteck plus Beschriftung.
#[derive(Debug, Clone)]
pub struct Key {
    /// Tastenzentrum
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    /// Angezeigtes Zeichen
    pub label: char,
    /// Korrigiertes Zentrum aus dem Verzerrungs-Kollaborator (falls vorhanden)
    pub corrected: Option<Point>,
}

impl Key {
    pub fn new(x: i32, y: i32, width: i32, height: i32, label: char) -> Self {
        Self {
            x,
            y,
            width,
            height,
            label,
            corrected: None,
        }
    }

    /// Basis-Buchstabe der Beschriftung (Diakritika werden gefaltet).
    pub fn letter(&self) -> u8 {
        fold_letter(self.label)
    }
}

/// Faltet eine Tastenbeschriftung auf ihren ASCII-Basis-Buchstaben.
pub fn fold_letter(c: char) -> u8 {
    let c = c.to_lowercase().next().unwrap_or(c);
    match c {
        'a'..='z' => c as u8,
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => b'a',
        'ç' => b'c',
        'è' | 'é' | 'ê' | 'ë' => b'e',
        'ì' | 'í' | 'î' | 'ï' => b'i',
        'ñ' => b'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => b'o',
        'ù' | 'ú' | 'û' | 'ü' => b'u',
        'ý' | 'ÿ' => b'y',
        'ß' => b's',
        _ => 0,
    }
}

/// Treffer einer Distanzabfrage gegen den Tasten-Index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyMatch {
    /// Interne Buchstaben-ID der Taste
    pub letter: u8,
    /// Euklidische Distanz zum Suchpunkt
    pub distance: f32,
}

/// Read-only Store ueber alle Tasten eines Layouts.
#[derive(Debug, Clone)]
pub struct KeyStore {
    /// Zentrum je interner ID (korrigiert, falls Korrektur vorliegt)
    points: [Point; 256],
    /// Rohes Layout-Zentrum je interner ID
    points_raw: [Point; 256],
    /// Breite/Hoehe je interner ID
    dim: [Point; 256],
    /// Logischer Buchstabe -> interne IDs
    letter_to_keys: Vec<Vec<u8>>,
    /// Interne ID -> logischer Buchstabe
    key_to_letter: [u8; 256],
    pub average_width: i32,
    pub average_height: i32,
    tree: KdTree<f64, 2>,
    tree_ids: Vec<u8>,
}

impl Default for KeyStore {
    fn default() -> Self {
        Self {
            points: [Point::new(0, 0); 256],
            points_raw: [Point::new(0, 0); 256],
            dim: [Point::new(0, 0); 256],
            letter_to_keys: vec![Vec::new(); 256],
            key_to_letter: [0; 256],
            average_width: 0,
            average_height: 0,
            tree: (&Vec::<[f64; 2]>::new()).into(),
            tree_ids: Vec::new(),
        }
    }
}

impl KeyStore {
    /// Baut den Store aus der Tastenliste.
    pub fn from_keys(keys: &[Key]) -> Self {
        let mut store = Self::default();
        store.set_keys(keys);
        store
    }

    /// Befuellt den Store neu; vergibt interne IDs fuer Diakritika-Tasten.
    pub fn set_keys(&mut self, keys: &[Key]) {
        *self = Self::default();

        // deterministische ID-Vergabe: Tasten nach Beschriftung sortieren
        let mut sorted: Vec<&Key> = keys.iter().collect();
        sorted.sort_by_key(|k| k.label);

        let mut additional_letter = b'0';
        let mut count = 0;
        let mut sum_width = 0;
        let mut sum_height = 0;
        let mut entries: Vec<[f64; 2]> = Vec::new();

        for key in sorted {
            let letter = key.letter();
            if letter == 0 {
                continue;
            }
            // Original-Taste ohne Diakritika behaelt ihren Buchstaben als ID,
            // Diakritika-Tasten bekommen eine Kunst-ID ('0', '1', ...)
            let internal = if key.label.is_ascii() && key.label.to_ascii_lowercase() as u8 == letter
            {
                letter
            } else {
                let id = additional_letter;
                additional_letter += 1;
                id
            };

            self.letter_to_keys[letter as usize].push(internal);
            self.key_to_letter[internal as usize] = letter;

            let idx = internal as usize;
            self.points_raw[idx] = Point::new(key.x, key.y);
            self.points[idx] = key.corrected.unwrap_or(Point::new(key.x, key.y));
            self.dim[idx] = Point::new(key.width, key.height);

            entries.push([self.points[idx].x as f64, self.points[idx].y as f64]);
            self.tree_ids.push(internal);

            count += 1;
            sum_width += key.width;
            sum_height += key.height;
        }

        if count > 0 {
            self.average_width = sum_width / count;
            self.average_height = sum_height / count;
        }
        self.tree = (&entries).into();
    }

    /// Interne IDs, die den logischen Buchstaben bedienen koennen.
    pub fn keys_for_letter(&self, letter: u8) -> &[u8] {
        &self.letter_to_keys[letter as usize]
    }

    /// Logischer Buchstabe einer internen ID (fuer Anzeige und Dedup).
    pub fn logical_letter(&self, internal: u8) -> u8 {
        let l = self.key_to_letter[internal as usize];
        if l != 0 {
            l
        } else {
            internal
        }
    }

    /// Korrigiertes Tastenzentrum.
    pub fn get(&self, letter: u8) -> Point {
        self.points[letter as usize]
    }

    /// Rohes Layout-Zentrum.
    pub fn get_raw(&self, letter: u8) -> Point {
        self.points_raw[letter as usize]
    }

    /// Breite/Hoehe der Taste als Punkt.
    pub fn size(&self, letter: u8) -> Point {
        self.dim[letter as usize]
    }

    /// Naechste Taste zur Position.
    pub fn nearest(&self, query: Point) -> Option<KeyMatch> {
        if self.tree_ids.is_empty() {
            return None;
        }
        let result = self
            .tree
            .nearest_one::<SquaredEuclidean>(&[query.x as f64, query.y as f64]);
        let letter = *self.tree_ids.get(result.item as usize)?;
        Some(KeyMatch {
            letter,
            distance: (result.distance as f32).sqrt(),
        })
    }

    /// Alle Tasten innerhalb eines Radius, nach Distanz sortiert.
    pub fn within_radius(&self, query: Point, radius: f32) -> Vec<KeyMatch> {
        if self.tree_ids.is_empty() || radius.is_sign_negative() {
            return Vec::new();
        }
        let mut results: Vec<KeyMatch> = self
            .tree
            .within::<SquaredEuclidean>(
                &[query.x as f64, query.y as f64],
                (radius * radius) as f64,
            )
            .into_iter()
            .filter_map(|entry| {
                let letter = *self.tree_ids.get(entry.item as usize)?;
                Some(KeyMatch {
                    letter,
                    distance: (entry.distance as f32).sqrt(),
                })
            })
            .collect();
        results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        results
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_keys() -> Vec<Key> {
        vec![
            Key::new(50, 50, 100, 100, 'a'),
            Key::new(150, 50, 100, 100, 'b'),
            Key::new(250, 50, 100, 100, 'c'),
        ]
    }

    #[test]
    fn test_letter_index_plain_keys() {
        let store = KeyStore::from_keys(&sample_keys());
        assert_eq!(store.keys_for_letter(b'a'), &[b'a']);
        assert_eq!(store.get(b'b'), Point::new(150, 50));
        assert_eq!(store.get_raw(b'b'), Point::new(150, 50));
        assert_eq!(store.size(b'c'), Point::new(100, 100));
        assert_eq!(store.average_width, 100);
    }

    #[test]
    fn test_diacritic_key_gets_internal_id() {
        let mut keys = sample_keys();
        keys.push(Key::new(350, 50, 100, 100, 'ç'));
        let store = KeyStore::from_keys(&keys);
        // 'c' kann ueber die eigene Taste und die ç-Taste gematcht werden
        let ids = store.keys_for_letter(b'c');
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&b'c'));
        assert!(ids.contains(&b'0'));
        assert_eq!(store.get(b'0'), Point::new(350, 50));
    }

    #[test]
    fn test_corrected_center_override() {
        let mut keys = sample_keys();
        keys[0].corrected = Some(Point::new(58, 46));
        let store = KeyStore::from_keys(&keys);
        assert_eq!(store.get(b'a'), Point::new(58, 46));
        assert_eq!(store.get_raw(b'a'), Point::new(50, 50));
    }

    #[test]
    fn test_spatial_queries() {
        let store = KeyStore::from_keys(&sample_keys());
        let nearest = store.nearest(Point::new(160, 60)).expect("Treffer erwartet");
        assert_eq!(nearest.letter, b'b');

        let hits = store.within_radius(Point::new(95, 50), 60.0);
        let letters: Vec<u8> = hits.iter().map(|m| m.letter).collect();
        assert_eq!(letters, vec![b'a', b'b']);
    }
}
