//! Plotly figure specs for the dashboard panels.

use super::transform::{ArtistRow, FeaturePoint, Grid, KeyShare, MoodShare, RadarTrace};
use crate::error::Result;
use crate::frame::QueryFrame;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const HEIGHT: u32 = 500;
const SET1: [&str; 9] = [
    "#E41A1C", "#377EB8", "#4DAF4A", "#984EA3", "#FF7F00", "#FFFF33", "#A65628", "#F781BF",
    "#999999",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Line,
    StackedBar,
    HorizontalBar,
    Heatmap,
    Scatter,
    Radar,
}

/// A figure ready for `Plotly.newPlot(el, figure.data, figure.layout)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chart {
    pub kind: ChartKind,
    pub title: String,
    pub figure: Value,
}

/// Fixed colors for the mood categories.
pub fn mood_color(mood: &str) -> Option<&'static str> {
    match mood {
        "Happy" => Some("#1DB954"),
        "Sad" => Some("#191414"),
        "Ambivalent" => Some("#CCCCCC"),
        _ => None,
    }
}

fn mode_color(mode: &str) -> Option<&'static str> {
    match mode {
        "Major" => Some("#1DB954"),
        "Minor" => Some("#191414"),
        _ => None,
    }
}

/// `tempo_scaled` -> `Tempo (scaled)`
pub fn axis_label(feature: &str) -> String {
    let mut chars = feature.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    capitalized.replace("_scaled", " (scaled)")
}

fn layout(title: &str, extra: Value) -> Value {
    let mut base = json!({ "title": { "text": title }, "height": HEIGHT });
    if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), extra) {
        base.extend(extra);
    }
    base
}

pub fn features_line(points: &[FeaturePoint]) -> Chart {
    let mut series: Vec<(&str, Vec<&FeaturePoint>)> = Vec::new();
    for p in points {
        match series.iter_mut().find(|(f, _)| *f == p.feature) {
            Some((_, pts)) => pts.push(p),
            None => series.push((p.feature.as_str(), vec![p])),
        }
    }
    let data: Vec<Value> = series
        .iter()
        .enumerate()
        .map(|(i, (feature, pts))| {
            json!({
                "type": "scatter",
                "mode": "lines+markers",
                "name": feature,
                "x": pts.iter().map(|p| &p.decade).collect::<Vec<_>>(),
                "y": pts.iter().map(|p| p.value).collect::<Vec<_>>(),
                "line": { "shape": "spline", "color": SET1[i % SET1.len()] },
            })
        })
        .collect();
    let title = "Audio Features Evolution Across Decades";
    Chart {
        kind: ChartKind::Line,
        title: title.into(),
        figure: json!({
            "data": data,
            "layout": layout(title, json!({
                "xaxis": { "title": { "text": "Decade" } },
                "yaxis": { "title": { "text": "Average Value (0-1)" } },
                "legend": { "title": { "text": "Audio Feature" } },
            })),
        }),
    }
}

pub fn mood_stacked_bar(shares: &[MoodShare]) -> Chart {
    let mut by_mood: BTreeMap<&str, Vec<&MoodShare>> = BTreeMap::new();
    for s in shares {
        by_mood.entry(s.mood.as_str()).or_default().push(s);
    }
    let data: Vec<Value> = by_mood
        .iter()
        .map(|(mood, rows)| {
            let mut trace = json!({
                "type": "bar",
                "name": mood,
                "x": rows.iter().map(|r| &r.decade).collect::<Vec<_>>(),
                "y": rows.iter().map(|r| r.percentage).collect::<Vec<_>>(),
            });
            if let Some(color) = mood_color(mood) {
                trace["marker"] = json!({ "color": color });
            }
            trace
        })
        .collect();
    let title = "Mood Distribution by Decade";
    Chart {
        kind: ChartKind::StackedBar,
        title: title.into(),
        figure: json!({
            "data": data,
            "layout": layout(title, json!({
                "barmode": "stack",
                "xaxis": { "title": { "text": "Decade" } },
                "yaxis": { "title": { "text": "Percentage of Tracks" } },
                "legend": { "title": { "text": "Mood" } },
            })),
        }),
    }
}

pub fn key_bar(shares: &[KeyShare]) -> Chart {
    let mut by_mode: BTreeMap<&str, Vec<&KeyShare>> = BTreeMap::new();
    for s in shares {
        by_mode.entry(s.mode.as_str()).or_default().push(s);
    }
    let data: Vec<Value> = by_mode
        .iter()
        .map(|(mode, rows)| {
            let mut trace = json!({
                "type": "bar",
                "orientation": "h",
                "name": mode,
                "x": rows.iter().map(|r| r.percentage).collect::<Vec<_>>(),
                "y": rows.iter().map(|r| &r.key_mode).collect::<Vec<_>>(),
            });
            if let Some(color) = mode_color(mode) {
                trace["marker"] = json!({ "color": color });
            }
            trace
        })
        .collect();
    let title = "Most Popular Musical Keys";
    Chart {
        kind: ChartKind::HorizontalBar,
        title: title.into(),
        figure: json!({
            "data": data,
            "layout": layout(title, json!({
                "xaxis": { "title": { "text": "Percentage of Tracks" } },
                "yaxis": { "title": { "text": "Musical Key" }, "categoryorder": "total ascending" },
                "legend": { "title": { "text": "Mode" } },
            })),
        }),
    }
}

pub fn valence_heatmap(grid: &Grid) -> Chart {
    let title = "Average 'Happiness' (Valence) by Musical Key";
    Chart {
        kind: ChartKind::Heatmap,
        title: title.into(),
        figure: json!({
            "data": [{
                "type": "heatmap",
                "x": grid.x,
                "y": grid.y,
                "z": grid.z,
                "colorscale": "Viridis",
                "colorbar": { "title": { "text": "Avg. Valence (0-1)" } },
            }],
            "layout": layout(title, json!({
                "xaxis": { "title": { "text": "Musical Key" } },
                "yaxis": { "title": { "text": "Mode" } },
            })),
        }),
    }
}

pub fn correlation_heatmap(grid: &Grid) -> Chart {
    let text: Vec<Vec<String>> = grid
        .z
        .iter()
        .map(|row| {
            row.iter()
                .map(|v| v.map(|v| format!("{v:.2}")).unwrap_or_default())
                .collect()
        })
        .collect();
    let title = "Correlation Between Audio Features";
    Chart {
        kind: ChartKind::Heatmap,
        title: title.into(),
        figure: json!({
            "data": [{
                "type": "heatmap",
                "x": grid.x,
                "y": grid.y,
                "z": grid.z,
                "text": text,
                "texttemplate": "%{text}",
                "colorscale": "RdBu",
                "reversescale": true,
                "zmin": -1,
                "zmax": 1,
            }],
            "layout": layout(title, json!({ "yaxis": { "autorange": "reversed" } })),
        }),
    }
}

/// Sample rows as points colored by mood.
pub fn feature_scatter(sample: &QueryFrame, x: &str, y: &str) -> Result<Chart> {
    let xs = sample.float_column(x)?;
    let ys = sample.float_column(y)?;
    let moods = sample.text_column("mood")?;
    let mut by_mood: BTreeMap<String, (Vec<Option<f64>>, Vec<Option<f64>>)> = BTreeMap::new();
    for ((xv, yv), mood) in xs.into_iter().zip(ys).zip(moods) {
        let entry = by_mood.entry(mood.unwrap_or_default()).or_default();
        entry.0.push(xv);
        entry.1.push(yv);
    }
    let data: Vec<Value> = by_mood
        .iter()
        .map(|(mood, (xs, ys))| {
            let mut trace = json!({
                "type": "scattergl",
                "mode": "markers",
                "name": mood,
                "x": xs,
                "y": ys,
                "opacity": 0.7,
            });
            if let Some(color) = mood_color(mood) {
                trace["marker"] = json!({ "color": color });
            }
            trace
        })
        .collect();
    let title = format!(
        "Relationship: {} vs {}",
        capitalize(x),
        capitalize(y)
    );
    Ok(Chart {
        kind: ChartKind::Scatter,
        figure: json!({
            "data": data,
            "layout": layout(&title, json!({
                "xaxis": { "title": { "text": axis_label(x) } },
                "yaxis": { "title": { "text": axis_label(y) } },
                "legend": { "title": { "text": "Mood" } },
            })),
        }),
        title,
    })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn artist_radar(traces: &[RadarTrace], decade: &str) -> Chart {
    let data: Vec<Value> = traces
        .iter()
        .map(|t| {
            json!({
                "type": "scatterpolar",
                "r": t.r,
                "theta": ["Danceability", "Energy", "Valence", "Popularity"],
                "fill": "toself",
                "name": t.artist,
            })
        })
        .collect();
    let title = format!("Artist Comparison in {decade}");
    Chart {
        kind: ChartKind::Radar,
        figure: json!({
            "data": data,
            "layout": {
                "title": { "text": title },
                "height": 400,
                "polar": { "radialaxis": { "visible": true, "range": [0, 1] } },
            },
        }),
        title,
    }
}

/// Rows for the top-artists table.
pub fn artist_table_rows(rows: &[ArtistRow]) -> Vec<Vec<Value>> {
    rows.iter()
        .map(|r| vec![json!(r.decade), json!(r.artist), json!(r.track_count)])
        .collect()
}
