use std::fmt::Write;

use crate::events::EventSequence;
use crate::keymap::KeyLayout;

/// Formats seconds as `mm:ss.fff`, rounded to the millisecond.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let minutes = total_ms / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;
    format!("{minutes:02}:{secs:02}.{ms:03}")
}

/// Renders a sequence as LRCp text, one event per line.
pub fn write_lrcp(sequence: &EventSequence) -> String {
    let mut out = String::new();
    for event in sequence {
        let tokens: Vec<String> = event.keys().iter().map(|k| k.to_string()).collect();
        let start = format_timestamp(event.start());
        let end = format_timestamp(event.end());
        if start == end {
            let _ = writeln!(out, "[{start}] {}", tokens.join(" "));
        } else {
            let _ = writeln!(out, "[{start}][{end}] {}", tokens.join(" "));
        }
    }
    out
}

/// Renders the physical keys pressed over time. Presses starting within
/// `window_ms` of a group's first press are shown together as `(a d g)`.
pub fn key_notation(sequence: &EventSequence, layout: &KeyLayout, window_ms: u32) -> String {
    let mut presses: Vec<(f64, char)> = sequence
        .iter()
        .flat_map(|e| e.keys().iter().map(move |k| (e.start(), layout.key_char(*k))))
        .collect();
    if presses.is_empty() {
        return String::new();
    }
    presses.sort_by(|a, b| a.0.total_cmp(&b.0));

    let gap = window_ms as f64 / 1000.0;
    let mut lines = Vec::new();
    let mut group: Vec<char> = Vec::new();
    let mut group_start = presses[0].0;

    for (t, key) in presses {
        if t - group_start > gap && !group.is_empty() {
            lines.push(render_group(&mut group));
            group_start = t;
        }
        group.push(key);
    }
    lines.push(render_group(&mut group));

    lines.join("\n")
}

fn render_group(group: &mut Vec<char>) -> String {
    group.sort_unstable();
    let rendered = if group.len() == 1 {
        group[0].to_string()
    } else {
        let keys: Vec<String> = group.iter().map(|c| c.to_string()).collect();
        format!("({})", keys.join(" "))
    };
    group.clear();
    rendered
}
