//! Projection of note intervals onto the scrolling timeline above the keys.
//!
//! The timeline spans `duration_ms` of time over `timeline_height` pixels.
//! Incoming (practice) mode puts "now" at the bottom edge, touching the
//! keyboard, with future notes falling towards it. Outgoing (realtime) mode
//! also puts "now" at the bottom but lets played notes rise away from it.

use crate::interval_store::{NoteInterval, NoteIntervalStore};
use crate::key_layout::{KeyGeometry, KeyboardLayout};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineParams {
    pub duration_ms: i64,
    /// Notes scroll out of the keyboard (realtime) instead of into it.
    pub out: bool,
}

impl Default for TimelineParams {
    fn default() -> Self {
        Self {
            duration_ms: 3000,
            out: false,
        }
    }
}

impl TimelineParams {
    /// Time shown at the top edge.
    pub fn top_ms(&self, now_ms: i64) -> i64 {
        if self.out {
            now_ms - self.duration_ms
        } else {
            now_ms + self.duration_ms
        }
    }

    /// y of time `t_ms`, unclipped.
    fn project(&self, t_ms: i64, now_ms: i64, timeline_height: f64) -> f64 {
        let top = self.top_ms(now_ms);
        let from_top = if self.out { t_ms - top } else { top - t_ms };
        from_top as f64 / self.duration_ms as f64 * timeline_height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One drawable note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineNote {
    pub key: u8,
    pub track: u32,
    pub rect: Rect,
    /// Incoming mode only: the note has reached the keyboard and is due now.
    pub sounding: bool,
}

/// Height of the timeline area above the keyboard.
pub fn timeline_height(canvas_height: f64, white_key_height: f64) -> f64 {
    (canvas_height - white_key_height).max(0.0)
}

/// Rectangle for `interval` on the key column described by `geometry`, or
/// `None` when nothing of it is on screen. Open intervals are live presses:
/// outgoing mode draws them up to the bottom edge, incoming mode hides them.
pub fn note_rect(
    interval: &NoteInterval,
    geometry: &KeyGeometry,
    now_ms: i64,
    timeline_height: f64,
    canvas_width: f64,
    params: &TimelineParams,
) -> Option<Rect> {
    if params.duration_ms <= 0 || timeline_height <= 0.0 {
        return None;
    }
    let (y_start, y_end) = if params.out {
        let y_end = interval
            .end_ms
            .map_or(timeline_height, |end| params.project(end, now_ms, timeline_height));
        (params.project(interval.start_ms, now_ms, timeline_height), y_end)
    } else {
        let end = interval.end_ms?;
        let y_start = if interval.start_ms > now_ms {
            params.project(interval.start_ms, now_ms, timeline_height)
        } else {
            timeline_height
        };
        (y_start, params.project(end, now_ms, timeline_height))
    };

    let top = y_start.min(y_end).max(0.0);
    let bottom = y_start.max(y_end).min(timeline_height);
    if bottom <= top {
        return None;
    }

    let (x_min, x_max) = geometry.x_span();
    Some(Rect {
        x: x_min,
        y: top,
        width: (x_max - x_min).min(canvas_width),
        height: bottom - top,
    })
}

/// y of every beat line inside the timeline, top to bottom.
pub fn beat_line_offsets(now_ms: i64, bpm: f64, timeline_height: f64, params: &TimelineParams) -> Vec<f64> {
    if !(bpm > 0.0) || params.duration_ms <= 0 || timeline_height <= 0.0 {
        return Vec::new();
    }
    let ms_per_beat = 60_000.0 / bpm;
    let (lo, hi) = if params.out {
        (now_ms - params.duration_ms, now_ms)
    } else {
        (now_ms, now_ms + params.duration_ms)
    };
    let top = params.top_ms(now_ms) as f64;
    let duration = params.duration_ms as f64;

    let mut beat = (lo as f64 / ms_per_beat).floor() * ms_per_beat;
    if beat <= lo as f64 {
        beat += ms_per_beat;
    }
    let mut lines = Vec::new();
    while beat <= hi as f64 {
        let from_top = if params.out { beat - top } else { top - beat };
        lines.push(from_top / duration * timeline_height);
        beat += ms_per_beat;
    }
    lines.sort_by(|a, b| a.total_cmp(b));
    lines
}

/// Intervals that ended before this can no longer be seen.
pub fn prune_cutoff(now_ms: i64, params: &TimelineParams) -> i64 {
    if params.out {
        now_ms - params.duration_ms
    } else {
        now_ms
    }
}

/// Snapshot `store` once and project everything visible. Keys outside the
/// layout are skipped.
pub fn visible_notes(
    store: &NoteIntervalStore,
    layout: &KeyboardLayout,
    now_ms: i64,
    canvas_height: f64,
    canvas_width: f64,
    params: &TimelineParams,
) -> Vec<TimelineNote> {
    let height = timeline_height(canvas_height, layout.metrics.white_key_height);
    let mut notes = Vec::new();
    for (key, intervals) in store.snapshot() {
        let Some(geometry) = layout.geometry(key) else {
            continue;
        };
        for interval in &intervals {
            if let Some(rect) = note_rect(interval, geometry, now_ms, height, canvas_width, params) {
                notes.push(TimelineNote {
                    key,
                    track: interval.track,
                    rect,
                    sounding: !params.out && interval.contains(now_ms),
                });
            }
        }
    }
    notes
}
