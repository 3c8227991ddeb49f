//! Keyboard geometry: turns a layout description plus a canvas size into a
//! polygon for every key, and caches the result until one of those inputs
//! changes.
//!
//! Sharps sit exactly halfway between their neighbouring naturals rather
//! than offset the way a real action is. Naturals are notched on whichever
//! sides have a sharp next to them.

use crate::types::{NoteClass, Pitch};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

// ─── Parameters ─────────────────────────────────────────────────────────────

/// Keyboard range and proportions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutParams {
    /// Space left of the first key, in canvas units.
    pub left_margin: f64,
    /// Space right of the last key.
    pub right_margin: f64,
    /// Black key width as a fraction of white key width.
    pub black_key_width_ratio: f64,
    /// Black key height as a fraction of white key height.
    pub black_key_height_ratio: f64,
    /// White key height as a multiple of white key width.
    pub white_key_height_ratio: f64,
    /// Removed from every key edge (never added), so keys never touch.
    pub padding: f64,
    /// MIDI key number of the leftmost key (A0 = 21).
    pub first_key: u8,
    pub num_keys: u8,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            left_margin: 50.0,
            right_margin: 50.0,
            black_key_width_ratio: 0.53,
            black_key_height_ratio: 0.65,
            white_key_height_ratio: 4.5,
            padding: 1.0,
            first_key: 36,
            num_keys: 49,
        }
    }
}

impl LayoutParams {
    /// Full 88-key piano, A0 to C8.
    pub fn piano_88() -> Self {
        Self {
            first_key: 21,
            num_keys: 88,
            ..Self::default()
        }
    }

    /// Hash of every field; floats are hashed by bit pattern.
    pub fn content_hash(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.left_margin.to_bits().hash(&mut h);
        self.right_margin.to_bits().hash(&mut h);
        self.black_key_width_ratio.to_bits().hash(&mut h);
        self.black_key_height_ratio.to_bits().hash(&mut h);
        self.white_key_height_ratio.to_bits().hash(&mut h);
        self.padding.to_bits().hash(&mut h);
        self.first_key.hash(&mut h);
        self.num_keys.hash(&mut h);
        h.finish()
    }

    /// Last key number in the range (inclusive).
    pub fn last_key(&self) -> u8 {
        (self.first_key as u16 + (self.num_keys as u16).saturating_sub(1)) as u8
    }

    pub fn contains(&self, key: u8) -> bool {
        key >= self.first_key && (key as u16) < self.first_key as u16 + self.num_keys as u16
    }

    /// Number of naturals in `[first_key, first_key + num_keys)`.
    pub fn count_white_keys(&self) -> usize {
        let mut note = NoteClass::of_key(self.first_key);
        let mut count = 0;
        for _ in 0..self.num_keys {
            if note.is_white() {
                count += 1;
            }
            note = note.next();
        }
        count
    }
}

// ─── Geometry ───────────────────────────────────────────────────────────────

/// Polygon for one key, vertices in drawing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyGeometry {
    pub key: u8,
    pub polygon: Vec<(f64, f64)>,
    pub is_black: bool,
}

impl KeyGeometry {
    /// Leftmost and rightmost x of the polygon.
    pub fn x_span(&self) -> (f64, f64) {
        self.polygon
            .iter()
            .fold((f64::MAX, f64::MIN), |(lo, hi), &(x, _)| (lo.min(x), hi.max(x)))
    }

    /// Topmost and bottommost y of the polygon.
    pub fn y_span(&self) -> (f64, f64) {
        self.polygon
            .iter()
            .fold((f64::MAX, f64::MIN), |(lo, hi), &(_, y)| (lo.min(y), hi.max(y)))
    }

    pub fn pitch(&self) -> Pitch {
        Pitch::from_key(self.key)
    }
}

/// Key dimensions shared by every key of a layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyMetrics {
    pub white_key_width: f64,
    pub black_key_width: f64,
    pub white_key_height: f64,
    pub black_key_height: f64,
    pub num_white_keys: usize,
}

/// A fully computed keyboard.
#[derive(Debug, Clone)]
pub struct KeyboardLayout {
    pub metrics: KeyMetrics,
    pub keys: HashMap<u8, KeyGeometry>,
}

impl KeyboardLayout {
    pub fn geometry(&self, key: u8) -> Option<&KeyGeometry> {
        self.keys.get(&key)
    }

    pub fn white_keys(&self) -> impl Iterator<Item = &KeyGeometry> {
        self.keys.values().filter(|g| !g.is_black)
    }

    pub fn black_keys(&self) -> impl Iterator<Item = &KeyGeometry> {
        self.keys.values().filter(|g| g.is_black)
    }
}

// ─── Shape table ────────────────────────────────────────────────────────────

/// One vertex as a linear combination of the key dimensions:
/// `x = center + wx·(white/2) + bx·(black/2) + px·padding`,
/// `y = top + wy·white_h + by·black_h + py·padding`.
#[derive(Clone, Copy)]
struct Vertex {
    wx: f64,
    bx: f64,
    px: f64,
    wy: f64,
    by: f64,
    py: f64,
}

const fn v(wx: f64, bx: f64, px: f64, wy: f64, by: f64, py: f64) -> Vertex {
    Vertex { wx, bx, px, wy, by, py }
}

/// C and F: notch on the right for the following sharp.
const NOTCH_RIGHT: &[Vertex] = &[
    v(-1.0, 0.0, 1.0, 0.0, 0.0, 0.0),
    v(1.0, -1.0, -1.0, 0.0, 0.0, 0.0),
    v(1.0, -1.0, -1.0, 0.0, 1.0, 1.0),
    v(1.0, 0.0, -1.0, 0.0, 1.0, 1.0),
    v(1.0, 0.0, -1.0, 1.0, 0.0, -1.0),
    v(-1.0, 0.0, 1.0, 1.0, 0.0, -1.0),
];

/// E and B: notch on the left for the preceding sharp.
const NOTCH_LEFT: &[Vertex] = &[
    v(-1.0, 1.0, 1.0, 0.0, 0.0, 0.0),
    v(1.0, 0.0, -1.0, 0.0, 0.0, 0.0),
    v(1.0, 0.0, -1.0, 1.0, 0.0, -1.0),
    v(-1.0, 0.0, 1.0, 1.0, 0.0, -1.0),
    v(-1.0, 0.0, 1.0, 0.0, 1.0, 1.0),
    v(-1.0, 1.0, 1.0, 0.0, 1.0, 1.0),
];

/// D, G and A: sharps on both sides.
const NOTCH_BOTH: &[Vertex] = &[
    v(-1.0, 1.0, 1.0, 0.0, 0.0, 0.0),
    v(1.0, -1.0, -1.0, 0.0, 0.0, 0.0),
    v(1.0, -1.0, -1.0, 0.0, 1.0, 1.0),
    v(1.0, 0.0, -1.0, 0.0, 1.0, 1.0),
    v(1.0, 0.0, -1.0, 1.0, 0.0, -1.0),
    v(-1.0, 0.0, 1.0, 1.0, 0.0, -1.0),
    v(-1.0, 0.0, 1.0, 0.0, 1.0, 1.0),
    v(-1.0, 1.0, 1.0, 0.0, 1.0, 1.0),
];

const SHARP: &[Vertex] = &[
    v(0.0, -1.0, 1.0, 0.0, 0.0, 0.0),
    v(0.0, 1.0, -1.0, 0.0, 0.0, 0.0),
    v(0.0, 1.0, -1.0, 0.0, 1.0, -1.0),
    v(0.0, -1.0, 1.0, 0.0, 1.0, -1.0),
];

/// Shape per note class, C first.
const SHAPES: [&[Vertex]; 12] = [
    NOTCH_RIGHT, // C
    SHARP,       // C#
    NOTCH_BOTH,  // D
    SHARP,       // D#
    NOTCH_LEFT,  // E
    NOTCH_RIGHT, // F
    SHARP,       // F#
    NOTCH_BOTH,  // G
    SHARP,       // G#
    NOTCH_BOTH,  // A
    SHARP,       // A#
    NOTCH_LEFT,  // B
];

fn polygon_for(note: NoteClass, center: f64, top: f64, m: &KeyMetrics, padding: f64) -> Vec<(f64, f64)> {
    let white_half = m.white_key_width / 2.0;
    let black_half = m.black_key_width / 2.0;
    SHAPES[note.index()]
        .iter()
        .map(|p| {
            let x = center + p.wx * white_half + p.bx * black_half + p.px * padding;
            let y = top + p.wy * m.white_key_height + p.by * m.black_key_height + p.py * padding;
            (x, y)
        })
        .collect()
}

// ─── Computation ────────────────────────────────────────────────────────────

/// Compute every key polygon for a canvas. Keys sit on the bottom edge.
///
/// The first key is centred half a white key in from the left margin. When
/// `first_key` is a sharp every natural is shifted right by that half width,
/// so the last natural runs half a white key into the right margin.
///
/// # Panics
///
/// On configurations that cannot produce a keyboard: no keys, a range
/// running past key 127, no naturals in range, or non-positive key sizes.
pub fn compute_layout(params: &LayoutParams, canvas_height: f64, canvas_width: f64) -> KeyboardLayout {
    assert!(params.num_keys > 0, "layout needs at least one key");
    assert!(
        params.first_key as u16 + params.num_keys as u16 <= 128,
        "key range {}+{} runs past key 127",
        params.first_key,
        params.num_keys
    );

    let num_white_keys = params.count_white_keys();
    assert!(num_white_keys > 0, "key range contains no white keys");

    let white_key_width =
        (canvas_width - params.left_margin - params.right_margin) / num_white_keys as f64;
    let black_key_width = white_key_width * params.black_key_width_ratio;
    let white_key_height = white_key_width * params.white_key_height_ratio;
    let black_key_height = white_key_height * params.black_key_height_ratio;

    assert!(
        white_key_width > 0.0 && black_key_width > 0.0,
        "non-positive key width (white={white_key_width}, black={black_key_width})"
    );
    assert!(
        white_key_height > 0.0 && black_key_height > 0.0,
        "non-positive key height (white={white_key_height}, black={black_key_height})"
    );

    let metrics = KeyMetrics {
        white_key_width,
        black_key_width,
        white_key_height,
        black_key_height,
        num_white_keys,
    };

    let top = canvas_height - white_key_height;
    let x_step = white_key_width / 2.0;
    let mut x_center = params.left_margin + x_step;
    let mut note = NoteClass::of_key(params.first_key);
    let mut keys = HashMap::with_capacity(params.num_keys as usize);

    for i in 0..params.num_keys {
        let key = params.first_key + i;
        keys.insert(
            key,
            KeyGeometry {
                key,
                polygon: polygon_for(note, x_center, top, &metrics, params.padding),
                is_black: note.is_black(),
            },
        );
        x_center += x_step;
        // No sharp between this key and the next: skip the phantom half step.
        if !note.next_interval_is_semitone() {
            x_center += x_step;
        }
        note = note.next();
    }

    KeyboardLayout { metrics, keys }
}

// ─── Cache ──────────────────────────────────────────────────────────────────

/// Identity of the inputs a layout was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LayoutKey {
    height_bits: u64,
    width_bits: u64,
    params_hash: u64,
}

/// Owned layout cache, recomputed only when the canvas size or the
/// parameters change.
#[derive(Debug, Default)]
pub struct KeyLayout {
    key: Option<LayoutKey>,
    layout: Option<KeyboardLayout>,
}

impl KeyLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the cache up to date. Returns true if the layout was recomputed.
    pub fn update(&mut self, params: &LayoutParams, canvas_height: f64, canvas_width: f64) -> bool {
        let key = LayoutKey {
            height_bits: canvas_height.to_bits(),
            width_bits: canvas_width.to_bits(),
            params_hash: params.content_hash(),
        };
        if self.key == Some(key) && self.layout.is_some() {
            return false;
        }
        debug!(
            "Recomputing key layout: {}x{} keys {}..={}",
            canvas_width,
            canvas_height,
            params.first_key,
            params.last_key()
        );
        self.layout = Some(compute_layout(params, canvas_height, canvas_width));
        self.key = Some(key);
        true
    }

    /// Drop the cached layout; the next `update` recomputes.
    pub fn invalidate(&mut self) {
        self.key = None;
        self.layout = None;
    }

    /// Geometry for a key, or `None` if the key is outside the configured
    /// range or nothing has been computed yet. Callers skip drawing it.
    pub fn geometry(&self, key: u8) -> Option<&KeyGeometry> {
        self.layout.as_ref().and_then(|l| l.geometry(key))
    }

    pub fn metrics(&self) -> Option<&KeyMetrics> {
        self.layout.as_ref().map(|l| &l.metrics)
    }

    pub fn layout(&self) -> Option<&KeyboardLayout> {
        self.layout.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    /// x-span of the vertices on the polygon's top edge.
    fn top_span(g: &KeyGeometry) -> (f64, f64) {
        let (top, _) = g.y_span();
        g.polygon
            .iter()
            .filter(|&&(_, y)| (y - top).abs() < EPS)
            .fold((f64::MAX, f64::MIN), |(lo, hi), &(x, _)| (lo.min(x), hi.max(x)))
    }

    #[test]
    fn test_88_key_scenario() {
        let params = LayoutParams::piano_88();
        let layout = compute_layout(&params, 300.0, 1000.0);
        assert_eq!(layout.keys.len(), 88);
        assert_eq!(layout.white_keys().count(), 52);
        assert_eq!(layout.black_keys().count(), 36);
        for g in layout.keys.values() {
            let (lo, hi) = g.x_span();
            assert!(hi - lo > 0.0, "key {} has width {}", g.key, hi - lo);
        }
    }

    #[test]
    fn test_widths_plus_margins_fill_canvas() {
        for (first, num, width) in [(21u8, 88u8, 1000.0), (36, 49, 1280.0), (60, 13, 333.3), (61, 5, 200.0)] {
            let params = LayoutParams { first_key: first, num_keys: num, ..LayoutParams::default() };
            let layout = compute_layout(&params, 400.0, width);
            let m = layout.metrics;
            let total = m.white_key_width * m.num_white_keys as f64 + params.left_margin + params.right_margin;
            assert!((total - width).abs() < 1e-6, "total={} width={}", total, width);
        }
    }

    #[test]
    fn test_polygon_vertex_counts() {
        let params = LayoutParams { first_key: 60, num_keys: 12, ..LayoutParams::default() };
        let layout = compute_layout(&params, 400.0, 800.0);
        let counts: Vec<usize> = (60..72).map(|k| layout.geometry(k).unwrap().polygon.len()).collect();
        //            C  C# D  D# E  F  F# G  G# A  A# B
        assert_eq!(counts, vec![6, 4, 8, 4, 6, 6, 4, 8, 4, 8, 4, 6]);
    }

    #[test]
    fn test_adjacent_keys_do_not_overlap() {
        let params = LayoutParams::piano_88();
        let layout = compute_layout(&params, 300.0, 1000.0);

        // Naturals never overlap each other.
        let mut whites: Vec<&KeyGeometry> = layout.white_keys().collect();
        whites.sort_by_key(|g| g.key);
        for pair in whites.windows(2) {
            let (_, prev_hi) = pair[0].x_span();
            let (next_lo, _) = pair[1].x_span();
            assert!(prev_hi < next_lo, "keys {} and {} overlap", pair[0].key, pair[1].key);
        }

        // A sharp sits between the notches of its neighbours, above their wide part.
        for k in params.first_key..=params.last_key() {
            let g = layout.geometry(k).unwrap();
            if !g.is_black {
                continue;
            }
            let (lo, hi) = g.x_span();
            let (_, bottom) = g.y_span();
            for n in [k - 1, k + 1] {
                let Some(nb) = layout.geometry(n) else { continue };
                let (nlo, nhi) = top_span(nb);
                assert!(hi < nlo || lo > nhi, "sharp {} overlaps top of {}", k, n);
                let notch_y = nb
                    .polygon
                    .iter()
                    .map(|&(_, y)| y)
                    .filter(|&y| y > nb.y_span().0 + EPS)
                    .fold(f64::MAX, f64::min);
                assert!(bottom < notch_y, "sharp {} reaches into body of {}", k, n);
            }
        }
    }

    #[test]
    fn test_sharps_centered_between_naturals() {
        let params = LayoutParams { first_key: 60, num_keys: 3, padding: 0.0, ..LayoutParams::default() };
        let layout = compute_layout(&params, 200.0, 400.0);
        let (c_lo, _) = layout.geometry(60).unwrap().x_span();
        let (_, d_hi) = layout.geometry(62).unwrap().x_span();
        let (s_lo, s_hi) = layout.geometry(61).unwrap().x_span();
        assert!(((s_lo + s_hi) / 2.0 - (c_lo + d_hi) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_keys_sit_on_canvas_bottom() {
        let params = LayoutParams::default();
        let layout = compute_layout(&params, 500.0, 1200.0);
        let g = layout.geometry(48).unwrap();
        let (top, bottom) = g.y_span();
        assert!((bottom - (500.0 - params.padding)).abs() < 1e-9);
        assert!((top - (500.0 - layout.metrics.white_key_height)).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_lookup_is_none() {
        let mut cache = KeyLayout::new();
        assert!(cache.geometry(60).is_none());
        cache.update(&LayoutParams::default(), 300.0, 1000.0);
        assert!(cache.geometry(35).is_none());
        assert!(cache.geometry(36).is_some());
        assert!(cache.geometry(84).is_some());
        assert!(cache.geometry(85).is_none());
    }

    #[test]
    fn test_cache_recomputes_only_on_change() {
        let mut cache = KeyLayout::new();
        let mut params = LayoutParams::default();
        assert!(cache.update(&params, 300.0, 1000.0));
        assert!(!cache.update(&params, 300.0, 1000.0));
        assert!(cache.update(&params, 300.0, 1001.0));
        assert!(cache.update(&params, 301.0, 1001.0));
        params.padding = 2.0;
        assert!(cache.update(&params, 301.0, 1001.0));
        assert!(!cache.update(&params, 301.0, 1001.0));
        cache.invalidate();
        assert!(cache.update(&params, 301.0, 1001.0));
    }

    #[test]
    #[should_panic(expected = "at least one key")]
    fn test_zero_keys_panics() {
        let params = LayoutParams { num_keys: 0, ..LayoutParams::default() };
        compute_layout(&params, 300.0, 1000.0);
    }

    #[test]
    #[should_panic(expected = "non-positive key width")]
    fn test_margins_wider_than_canvas_panic() {
        let params = LayoutParams { left_margin: 600.0, right_margin: 600.0, ..LayoutParams::default() };
        compute_layout(&params, 300.0, 1000.0);
    }

    #[test]
    fn test_sharp_first_key_shifts_naturals_right() {
        // C#, D, D#: one natural, so it is the full content width wide.
        let params = LayoutParams {
            first_key: 61,
            num_keys: 3,
            ..LayoutParams::default()
        };
        let layout = compute_layout(&params, 400.0, 1200.0);
        let w = layout.metrics.white_key_width;
        assert!((w - 1100.0).abs() < EPS);

        let (_, d_right) = layout.geometry(62).unwrap().x_span();
        let content_right = 1200.0 - params.right_margin;
        assert!((d_right - (content_right + w / 2.0 - params.padding)).abs() < EPS);
    }
}
