use crate::config::DashboardConfig;
use crate::sql::{ParamValue, Query};
use serde::Serialize;

/// Numeric per-track columns offered for correlation and scatter axes.
pub const SAMPLE_FEATURES: [&str; 5] = [
    "danceability",
    "energy",
    "acousticness",
    "valence",
    "tempo_scaled",
];

const DEFAULT_SELECTION_LEN: usize = 5;

/// Decades bound into the analysis queries.
///
/// Values always come from the distinct-decades domain; anything else the
/// caller asked for is dropped. An empty filter means every decade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecadeFilter {
    decades: Vec<String>,
}

impl DecadeFilter {
    /// `None` selects the first five decades of the domain.
    pub fn resolve(requested: Option<&[String]>, domain: &[String]) -> Self {
        let decades = match requested {
            None => domain.iter().take(DEFAULT_SELECTION_LEN).cloned().collect(),
            Some(requested) => domain
                .iter()
                .filter(|d| requested.iter().any(|r| r == *d))
                .cloned()
                .collect(),
        };
        Self { decades }
    }

    pub fn decades(&self) -> &[String] {
        &self.decades
    }

    pub fn is_empty(&self) -> bool {
        self.decades.is_empty()
    }

    fn clause(&self) -> &'static str {
        if self.decades.is_empty() {
            ""
        } else {
            " AND decade IN UNNEST(@decades)"
        }
    }

    fn bind(&self, query: Query) -> Query {
        if self.decades.is_empty() {
            query
        } else {
            query.bind("decades", ParamValue::StringArray(self.decades.clone()))
        }
    }
}

/// Statement builders for the analysis view.
#[derive(Debug, Clone)]
pub struct AnalysisQueries {
    view: String,
    sample_limit: usize,
    min_artist_tracks: u32,
}

impl AnalysisQueries {
    /// `view` must already be a validated `project.dataset.view` name.
    pub fn new(view: impl Into<String>, sample_limit: usize, min_artist_tracks: u32) -> Self {
        Self {
            view: view.into(),
            sample_limit,
            min_artist_tracks,
        }
    }

    pub fn from_config(config: &DashboardConfig) -> Self {
        Self::new(
            config.analysis_view.clone(),
            config.sample_limit,
            config.min_artist_tracks,
        )
    }

    pub fn decades(&self) -> Query {
        Query::new(
            "decades",
            format!(
                "SELECT DISTINCT decade FROM `{}` WHERE decade IS NOT NULL ORDER BY decade",
                self.view
            ),
        )
    }

    pub fn features(&self, filter: &DecadeFilter) -> Query {
        let sql = format!(
            "SELECT decade, AVG(danceability) AS avg_danceability, AVG(energy) AS avg_energy, \
             AVG(valence) AS avg_valence, AVG(acousticness) AS avg_acousticness, \
             COUNT(*) AS track_count \
             FROM `{}` WHERE decade IS NOT NULL{} GROUP BY decade ORDER BY decade",
            self.view,
            filter.clause()
        );
        filter.bind(Query::new("features", sql))
    }

    pub fn moods(&self, filter: &DecadeFilter) -> Query {
        let sql = format!(
            "SELECT decade, mood, COUNT(*) AS track_count \
             FROM `{}` WHERE decade IS NOT NULL{} GROUP BY decade, mood ORDER BY decade, mood",
            self.view,
            filter.clause()
        );
        filter.bind(Query::new("moods", sql))
    }

    pub fn keys(&self, filter: &DecadeFilter) -> Query {
        let sql = format!(
            "SELECT key_description, modality_description, COUNT(*) AS track_count, \
             AVG(valence) AS avg_valence \
             FROM `{}` WHERE decade IS NOT NULL{} \
             GROUP BY key_description, modality_description ORDER BY track_count DESC",
            self.view,
            filter.clause()
        );
        filter.bind(Query::new("keys", sql))
    }

    pub fn sample(&self, filter: &DecadeFilter) -> Query {
        let sql = format!(
            "SELECT danceability, energy, acousticness, valence, tempo / 200 AS tempo_scaled, mood \
             FROM `{}` WHERE decade IS NOT NULL{} ORDER BY RAND() LIMIT {}",
            self.view,
            filter.clause(),
            self.sample_limit
        );
        filter.bind(Query::new("sample", sql))
    }

    pub fn artists(&self, filter: &DecadeFilter) -> Query {
        let sql = format!(
            "SELECT decade, primary_artist, COUNT(*) AS track_count, \
             AVG(danceability) AS avg_danceability, AVG(energy) AS avg_energy, \
             AVG(valence) AS avg_valence \
             FROM `{}` WHERE decade IS NOT NULL{} GROUP BY decade, primary_artist \
             HAVING COUNT(*) > {} ORDER BY decade, track_count DESC",
            self.view,
            filter.clause(),
            self.min_artist_tracks
        );
        filter.bind(Query::new("artists", sql))
    }
}
