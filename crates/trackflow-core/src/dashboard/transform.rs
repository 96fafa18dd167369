//! Reshaping of query frames into chart-ready series.

use crate::error::Result;
use crate::frame::QueryFrame;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Circle of fifths, the column order of the valence heatmap.
pub const KEY_ORDER: [&str; 12] = [
    "C", "G", "D", "A", "E", "B", "F#/Gb", "C#/Db", "G#/Ab", "D#/Eb", "A#/Bb", "F",
];
pub const MODE_ORDER: [&str; 2] = ["Major", "Minor"];

const FEATURE_AVERAGES: [&str; 4] = [
    "avg_danceability",
    "avg_energy",
    "avg_valence",
    "avg_acousticness",
];
const TOP_KEYS: usize = 12;
const TOP_ARTISTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeaturePoint {
    pub decade: String,
    pub feature: String,
    pub value: Option<f64>,
    pub track_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoodShare {
    pub decade: String,
    pub mood: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyShare {
    pub key_mode: String,
    pub mode: String,
    pub track_count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grid {
    pub x: Vec<String>,
    pub y: Vec<String>,
    /// Row-major, `z[y][x]`.
    pub z: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtistRow {
    pub decade: String,
    pub artist: String,
    pub track_count: i64,
    pub avg_danceability: Option<f64>,
    pub avg_energy: Option<f64>,
    pub avg_valence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarTrace {
    pub artist: String,
    /// Danceability, energy, valence, popularity.
    pub r: [f64; 4],
}

/// Wide per-decade averages to long `(decade, feature, value)` rows with the
/// `avg_` prefix stripped.
pub fn melt_features(frame: &QueryFrame) -> Result<Vec<FeaturePoint>> {
    let decades = frame.text_column("decade")?;
    let counts: Vec<Option<i64>> = frame.column("track_count")?.map(|c| c.as_i64()).collect();
    let mut out = Vec::with_capacity(frame.len() * FEATURE_AVERAGES.len());
    for column in FEATURE_AVERAGES {
        let values = frame.float_column(column)?;
        let feature = column.trim_start_matches("avg_").to_string();
        for ((decade, value), count) in decades.iter().zip(values).zip(counts.iter()) {
            out.push(FeaturePoint {
                decade: decade.clone().unwrap_or_default(),
                feature: feature.clone(),
                value,
                track_count: *count,
            });
        }
    }
    Ok(out)
}

/// Mood counts pivoted per decade and normalized to percentages. Every
/// decade/mood pair is present; missing pairs count as zero.
pub fn mood_percentages(frame: &QueryFrame) -> Result<Vec<MoodShare>> {
    let decades = frame.text_column("decade")?;
    let moods = frame.text_column("mood")?;
    let counts = frame.float_column("track_count")?;

    let mut pivot: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    let mut all_moods = BTreeSet::new();
    for ((decade, mood), count) in decades.into_iter().zip(moods).zip(counts) {
        let (Some(decade), Some(mood)) = (decade, mood) else {
            continue;
        };
        all_moods.insert(mood.clone());
        *pivot.entry(decade).or_default().entry(mood).or_default() += count.unwrap_or(0.0);
    }

    let mut out = Vec::new();
    for mood in &all_moods {
        for (decade, row) in &pivot {
            let total: f64 = row.values().sum();
            let count = row.get(mood).copied().unwrap_or(0.0);
            let percentage = if total > 0.0 { count / total * 100.0 } else { 0.0 };
            out.push(MoodShare {
                decade: decade.clone(),
                mood: mood.clone(),
                percentage,
            });
        }
    }
    Ok(out)
}

/// `key mode` labels with their share of all tracks, most common first,
/// limited to the top twelve.
pub fn key_shares(frame: &QueryFrame) -> Result<Vec<KeyShare>> {
    let keys = frame.text_column("key_description")?;
    let modes = frame.text_column("modality_description")?;
    let counts: Vec<i64> = frame
        .column("track_count")?
        .map(|c| c.as_i64().unwrap_or(0))
        .collect();
    let total: i64 = counts.iter().sum();

    let mut shares: Vec<KeyShare> = keys
        .into_iter()
        .zip(modes)
        .zip(counts)
        .map(|((key, mode), track_count)| {
            let key = key.unwrap_or_default();
            let mode = mode.unwrap_or_default();
            KeyShare {
                key_mode: format!("{key} {mode}"),
                mode,
                track_count,
                percentage: if total > 0 {
                    track_count as f64 / total as f64 * 100.0
                } else {
                    0.0
                },
            }
        })
        .collect();
    shares.sort_by(|a, b| b.track_count.cmp(&a.track_count));
    shares.truncate(TOP_KEYS);
    Ok(shares)
}

/// Average valence laid out as modes × keys in circle-of-fifths order.
///
/// Pairs absent from the data read zero when both their key and mode occur
/// somewhere in the frame, and are blank otherwise.
pub fn valence_heatmap(frame: &QueryFrame) -> Result<Grid> {
    let keys = frame.text_column("key_description")?;
    let modes = frame.text_column("modality_description")?;
    let valence = frame.float_column("avg_valence")?;

    let mut cells: BTreeMap<(String, String), f64> = BTreeMap::new();
    let mut seen_keys = BTreeSet::new();
    let mut seen_modes = BTreeSet::new();
    for ((key, mode), v) in keys.into_iter().zip(modes).zip(valence) {
        let (Some(key), Some(mode)) = (key, mode) else {
            continue;
        };
        seen_keys.insert(key.clone());
        seen_modes.insert(mode.clone());
        if let Some(v) = v {
            cells.insert((mode, key), v);
        }
    }

    let z = MODE_ORDER
        .iter()
        .map(|mode| {
            KEY_ORDER
                .iter()
                .map(|key| {
                    if !seen_keys.contains(*key) || !seen_modes.contains(*mode) {
                        return None;
                    }
                    Some(
                        cells
                            .get(&(mode.to_string(), key.to_string()))
                            .copied()
                            .unwrap_or(0.0),
                    )
                })
                .collect()
        })
        .collect();
    Ok(Grid {
        x: KEY_ORDER.iter().map(|s| s.to_string()).collect(),
        y: MODE_ORDER.iter().map(|s| s.to_string()).collect(),
        z,
    })
}

/// Pairwise Pearson correlation over rows where both values are present.
/// Undefined coefficients (fewer than two rows, zero variance) are blank.
pub fn correlation_matrix(frame: &QueryFrame, columns: &[&str]) -> Result<Grid> {
    let series = columns
        .iter()
        .map(|c| frame.float_column(c))
        .collect::<Result<Vec<_>>>()?;
    let z = series
        .iter()
        .map(|a| series.iter().map(|b| pearson(a, b)).collect())
        .collect();
    let labels: Vec<String> = columns.iter().map(|s| s.to_string()).collect();
    Ok(Grid {
        x: labels.clone(),
        y: labels,
        z,
    })
}

fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

/// The three artists with the most tracks in each decade, decades ascending.
pub fn top_artists(frame: &QueryFrame) -> Result<Vec<ArtistRow>> {
    let decades = frame.text_column("decade")?;
    let artists = frame.text_column("primary_artist")?;
    let counts: Vec<i64> = frame
        .column("track_count")?
        .map(|c| c.as_i64().unwrap_or(0))
        .collect();
    let dance = frame.float_column("avg_danceability")?;
    let energy = frame.float_column("avg_energy")?;
    let valence = frame.float_column("avg_valence")?;

    let mut by_decade: BTreeMap<String, Vec<ArtistRow>> = BTreeMap::new();
    for i in 0..frame.len() {
        let Some(decade) = decades[i].clone() else {
            continue;
        };
        by_decade.entry(decade.clone()).or_default().push(ArtistRow {
            decade,
            artist: artists[i].clone().unwrap_or_default(),
            track_count: counts[i],
            avg_danceability: dance[i],
            avg_energy: energy[i],
            avg_valence: valence[i],
        });
    }

    let mut out = Vec::new();
    for (_, mut rows) in by_decade {
        // Stable: ties keep query order.
        rows.sort_by(|a, b| b.track_count.cmp(&a.track_count));
        rows.truncate(TOP_ARTISTS);
        out.extend(rows);
    }
    Ok(out)
}

/// Distinct decades of `rows`, ascending.
pub fn artist_decades(rows: &[ArtistRow]) -> Vec<String> {
    rows.iter()
        .map(|r| r.decade.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// One trace per artist of `decade`; popularity is track count relative to
/// the decade's busiest artist.
pub fn radar(rows: &[ArtistRow], decade: &str) -> Vec<RadarTrace> {
    let in_decade: Vec<&ArtistRow> = rows.iter().filter(|r| r.decade == decade).collect();
    let max = in_decade.iter().map(|r| r.track_count).max().unwrap_or(0);
    in_decade
        .into_iter()
        .map(|r| RadarTrace {
            artist: r.artist.clone(),
            r: [
                r.avg_danceability.unwrap_or(0.0),
                r.avg_energy.unwrap_or(0.0),
                r.avg_valence.unwrap_or(0.0),
                if max > 0 {
                    r.track_count as f64 / max as f64
                } else {
                    0.0
                },
            ],
        })
        .collect()
}
