//! Analysis dashboard model.
//!
//! A render is one idempotent pass: resolve the decade domain, bind the
//! selection into parameterized statements, run each through the result
//! cache and turn every frame into its panels. A failing statement only
//! blanks the panels it feeds.

pub mod charts;
pub mod queries;
pub mod transform;

pub use charts::{Chart, ChartKind};
pub use queries::{AnalysisQueries, DecadeFilter, SAMPLE_FEATURES};

use crate::cache::{CacheStats, TtlCache};
use crate::config::DashboardConfig;
use crate::error::{PipelineError, Result};
use crate::frame::QueryFrame;
use crate::sql::Query;
use crate::warehouse::Warehouse;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub const SETUP_COMMAND: &str = "gcloud auth application-default login";
const DECADES_ERROR: &str =
    "Error fetching decade data from BigQuery. Please check your connection and dataset.";
const DEFAULT_X: &str = "energy";
const DEFAULT_Y: &str = "danceability";

/// Filter state carried by a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// `None` means "not chosen yet" and selects the default decades.
    pub decades: Option<Vec<String>>,
    pub x: Option<String>,
    pub y: Option<String>,
    pub artist_decade: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelBody {
    Chart(Chart),
    Table(Table),
    Error { message: String },
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Panel {
    pub id: &'static str,
    pub section: &'static str,
    pub insight: &'static str,
    pub body: PanelBody,
}

impl Panel {
    pub fn is_error(&self) -> bool {
        matches!(self.body, PanelBody::Error { .. })
    }
}

/// The rendered dashboard with the filter state that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub decades: Vec<String>,
    pub selected: Vec<String>,
    pub features: Vec<&'static str>,
    pub x: String,
    pub y: String,
    pub artist_decades: Vec<String>,
    pub artist_decade: Option<String>,
    pub panels: Vec<Panel>,
}

impl DashboardView {
    pub fn panel(&self, id: &str) -> Option<&Panel> {
        self.panels.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupNotice {
    pub message: String,
    pub command: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "page", rename_all = "snake_case")]
pub enum Page {
    /// Credentials are missing or rejected.
    Setup(SetupNotice),
    Error { message: String, detail: String },
    Dashboard(DashboardView),
}

/// Shared dashboard state: warehouse handle, statements and result cache.
#[derive(Debug)]
pub struct Dashboard {
    warehouse: Arc<dyn Warehouse>,
    queries: AnalysisQueries,
    cache: TtlCache<String, QueryFrame>,
}

impl Dashboard {
    pub fn new(warehouse: Arc<dyn Warehouse>, config: &DashboardConfig) -> Self {
        Self {
            warehouse,
            queries: AnalysisQueries::from_config(config),
            cache: TtlCache::new(config.cache_ttl()),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// How long a query result is served from the cache.
    pub fn cache_ttl(&self) -> std::time::Duration {
        self.cache.ttl()
    }

    async fn run(&self, query: &Query) -> Result<Arc<QueryFrame>> {
        let key = query.cache_key();
        self.cache
            .get_or_try_insert_with(&key, || async {
                debug!(label = %query.label, "cache miss, querying warehouse");
                self.warehouse.query(query).await
            })
            .await
            .map_err(|e| {
                warn!(label = %query.label, error = %e, "query failed");
                e
            })
    }

    pub async fn render(&self, selection: &Selection) -> Page {
        let domain = match self.run(&self.queries.decades()).await {
            Ok(frame) => frame
                .text_column("decade")
                .map(|col| col.into_iter().flatten().collect::<Vec<_>>()),
            Err(e) => Err(e),
        };
        let domain = match domain {
            Ok(domain) if !domain.is_empty() => domain,
            Ok(_) => {
                return Page::Error {
                    message: DECADES_ERROR.into(),
                    detail: "the analysis view returned no decades".into(),
                }
            }
            Err(e) if e.is_connectivity() => {
                return Page::Setup(SetupNotice {
                    message: "Please set up authentication to proceed.".into(),
                    command: SETUP_COMMAND,
                    detail: e.to_string(),
                })
            }
            Err(e) => {
                return Page::Error {
                    message: DECADES_ERROR.into(),
                    detail: e.to_string(),
                }
            }
        };

        let filter = DecadeFilter::resolve(selection.decades.as_deref(), &domain);
        let x = pick_feature(selection.x.as_deref(), DEFAULT_X);
        let y = pick_feature(selection.y.as_deref(), DEFAULT_Y);

        let features_q = self.queries.features(&filter);
        let moods_q = self.queries.moods(&filter);
        let keys_q = self.queries.keys(&filter);
        let sample_q = self.queries.sample(&filter);
        let artists_q = self.queries.artists(&filter);
        let (features, moods, keys, sample, artists) = tokio::join!(
            self.run(&features_q),
            self.run(&moods_q),
            self.run(&keys_q),
            self.run(&sample_q),
            self.run(&artists_q),
        );

        let mut panels = Vec::with_capacity(9);
        panels.push(build(SECTION_DECADES, "features", FEATURES_INSIGHT, &features, |f| {
            Ok(PanelBody::Chart(charts::features_line(&transform::melt_features(f)?)))
        }));
        panels.push(build(SECTION_DECADES, "moods", MOODS_INSIGHT, &moods, |f| {
            Ok(PanelBody::Chart(charts::mood_stacked_bar(&transform::mood_percentages(f)?)))
        }));
        panels.push(build(SECTION_KEYS, "keys", KEYS_INSIGHT, &keys, |f| {
            Ok(PanelBody::Chart(charts::key_bar(&transform::key_shares(f)?)))
        }));
        panels.push(build(SECTION_KEYS, "valence", VALENCE_INSIGHT, &keys, |f| {
            Ok(PanelBody::Chart(charts::valence_heatmap(&transform::valence_heatmap(f)?)))
        }));
        panels.push(build(SECTION_RELATIONSHIPS, "correlation", CORRELATION_INSIGHT, &sample, |f| {
            Ok(PanelBody::Chart(charts::correlation_heatmap(
                &transform::correlation_matrix(f, &SAMPLE_FEATURES)?,
            )))
        }));
        panels.push(build(SECTION_RELATIONSHIPS, "scatter", SCATTER_INSIGHT, &sample, |f| {
            Ok(PanelBody::Chart(charts::feature_scatter(f, &x, &y)?))
        }));

        let top = artists
            .as_ref()
            .map_err(clone_error)
            .and_then(|f| transform::top_artists(f));
        let artist_decades = top.as_ref().map(|t| transform::artist_decades(t)).unwrap_or_default();
        let artist_decade = selection
            .artist_decade
            .as_ref()
            .filter(|d| artist_decades.contains(d))
            .or_else(|| artist_decades.first())
            .cloned();
        panels.push(panel_from(
            SECTION_INSIGHTS,
            "top_artists",
            "",
            top.as_ref().map_err(clone_error).map(|rows| {
                if rows.is_empty() {
                    return PanelBody::Empty;
                }
                PanelBody::Table(Table {
                    columns: vec!["Decade".into(), "Artist".into(), "Number of Tracks".into()],
                    rows: charts::artist_table_rows(rows),
                })
            }),
        ));
        panels.push(panel_from(
            SECTION_INSIGHTS,
            "radar",
            RADAR_INSIGHT,
            top.as_ref().map_err(clone_error).map(|rows| match &artist_decade {
                Some(decade) => PanelBody::Chart(charts::artist_radar(
                    &transform::radar(rows, decade),
                    decade,
                )),
                None => PanelBody::Empty,
            }),
        ));

        Page::Dashboard(DashboardView {
            decades: domain,
            selected: filter.decades().to_vec(),
            features: SAMPLE_FEATURES.to_vec(),
            x,
            y,
            artist_decades,
            artist_decade,
            panels,
        })
    }
}

const SECTION_DECADES: &str = "Music Across Decades";
const SECTION_KEYS: &str = "Musical Key Insights";
const SECTION_RELATIONSHIPS: &str = "Audio Feature Relationships";
const SECTION_INSIGHTS: &str = "Additional Insights";

const FEATURES_INSIGHT: &str = "How danceability, energy, valence and acousticness have moved across the decades.";
const MOODS_INSIGHT: &str = "Share of happy, sad and ambivalent tracks within each decade.";
const KEYS_INSIGHT: &str = "The most commonly used keys and modes in the selected decades.";
const VALENCE_INSIGHT: &str = "Average valence of tracks in each key and mode.";
const CORRELATION_INSIGHT: &str = "Pairwise correlation of audio features over a random sample of tracks.";
const SCATTER_INSIGHT: &str = "Sampled tracks on two chosen features, colored by mood.";
const RADAR_INSIGHT: &str = "Profile of the top artists of the chosen decade.";

fn pick_feature(requested: Option<&str>, default: &str) -> String {
    requested
        .filter(|f| SAMPLE_FEATURES.contains(f))
        .unwrap_or(default)
        .to_string()
}

/// Errors are shared across the panels fed by one statement.
fn clone_error(e: &PipelineError) -> PipelineError {
    PipelineError::Query(e.to_string())
}

fn build<F>(
    section: &'static str,
    id: &'static str,
    insight: &'static str,
    frame: &Result<Arc<QueryFrame>>,
    render: F,
) -> Panel
where
    F: FnOnce(&QueryFrame) -> Result<PanelBody>,
{
    let body = match frame {
        Ok(f) if f.is_empty() => Ok(PanelBody::Empty),
        Ok(f) => render(f.as_ref()),
        Err(e) => Err(clone_error(e)),
    };
    panel_from(section, id, insight, body)
}

fn panel_from(
    section: &'static str,
    id: &'static str,
    insight: &'static str,
    body: Result<PanelBody>,
) -> Panel {
    let body = body.unwrap_or_else(|e| PanelBody::Error {
        message: e.to_string(),
    });
    Panel {
        id,
        section,
        insight,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Cell;
    use crate::warehouse::{JobHandle, JobState, LoadJobSpec, TableRef};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Answers by statement label; unknown labels fail.
    #[derive(Debug, Default)]
    struct Canned {
        frames: Vec<(&'static str, QueryFrame)>,
        fail_decades: Option<fn() -> PipelineError>,
        executed: Mutex<Vec<Query>>,
    }

    #[async_trait]
    impl Warehouse for Canned {
        async fn submit_load(&self, _spec: &LoadJobSpec) -> Result<JobHandle> {
            Err(PipelineError::Remote("unsupported".into()))
        }
        async fn job_state(&self, _job: &JobHandle) -> Result<JobState> {
            Err(PipelineError::Remote("unsupported".into()))
        }
        async fn table_row_count(&self, _table: &TableRef) -> Result<u64> {
            Err(PipelineError::Remote("unsupported".into()))
        }
        async fn query(&self, query: &Query) -> Result<QueryFrame> {
            self.executed.lock().push(query.clone());
            if query.label == "decades" {
                if let Some(fail) = self.fail_decades {
                    return Err(fail());
                }
            }
            self.frames
                .iter()
                .find(|(label, _)| *label == query.label)
                .map(|(_, f)| f.clone())
                .ok_or_else(|| PipelineError::Query(format!("{} exploded", query.label)))
        }
    }

    fn decades_frame() -> QueryFrame {
        QueryFrame::with_rows(
            &["decade"],
            ["1960s", "1970s", "1980s", "1990s", "2000s", "2010s"]
                .iter()
                .map(|d| vec![Cell::from(*d)])
                .collect(),
        )
        .unwrap()
    }

    fn moods_frame() -> QueryFrame {
        QueryFrame::with_rows(
            &["decade", "mood", "track_count"],
            vec![
                vec!["1990s".into(), "Happy".into(), 2i64.into()],
                vec!["1990s".into(), "Sad".into(), 2i64.into()],
            ],
        )
        .unwrap()
    }

    fn features_frame() -> QueryFrame {
        QueryFrame::with_rows(
            &[
                "decade",
                "avg_danceability",
                "avg_energy",
                "avg_valence",
                "avg_acousticness",
                "track_count",
            ],
            vec![
                vec!["1990s".into(), 0.6.into(), 0.7.into(), 0.5.into(), 0.2.into(), 10i64.into()],
                vec!["2000s".into(), 0.65.into(), 0.75.into(), 0.45.into(), 0.15.into(), 12i64.into()],
            ],
        )
        .unwrap()
    }

    fn sample_frame() -> QueryFrame {
        QueryFrame::with_rows(
            &["danceability", "energy", "acousticness", "valence", "tempo_scaled", "mood"],
            vec![
                vec![0.5.into(), 0.6.into(), 0.1.into(), 0.8.into(), 0.6.into(), "Happy".into()],
                vec![0.7.into(), 0.4.into(), 0.3.into(), 0.2.into(), 0.5.into(), "Sad".into()],
                vec![0.6.into(), 0.9.into(), 0.2.into(), 0.5.into(), 0.7.into(), "Ambivalent".into()],
            ],
        )
        .unwrap()
    }

    fn artists_frame() -> QueryFrame {
        QueryFrame::with_rows(
            &[
                "decade",
                "primary_artist",
                "track_count",
                "avg_danceability",
                "avg_energy",
                "avg_valence",
            ],
            vec![
                vec!["1990s".into(), "Oasis".into(), 9i64.into(), 0.4.into(), 0.8.into(), 0.5.into()],
                vec!["1990s".into(), "Blur".into(), 7i64.into(), 0.5.into(), 0.7.into(), 0.6.into()],
            ],
        )
        .unwrap()
    }

    fn chart_kind(view: &DashboardView, id: &str) -> ChartKind {
        match &view.panel(id).unwrap().body {
            PanelBody::Chart(chart) => chart.kind,
            other => panic!("{id}: expected a chart, got {other:?}"),
        }
    }

    fn dashboard(wh: Canned) -> (Arc<Canned>, Dashboard) {
        let wh = Arc::new(wh);
        let dash = Dashboard::new(wh.clone(), &DashboardConfig::default());
        (wh, dash)
    }

    #[tokio::test]
    async fn failing_statement_only_blanks_its_panels() {
        let (_, dash) = dashboard(Canned {
            frames: vec![("decades", decades_frame()), ("moods", moods_frame())],
            ..Default::default()
        });
        let Page::Dashboard(view) = dash.render(&Selection::default()).await else {
            panic!("expected dashboard page");
        };
        let moods = view.panel("moods").unwrap();
        match &moods.body {
            PanelBody::Chart(chart) => assert_eq!(chart.kind, ChartKind::StackedBar),
            other => panic!("unexpected body {other:?}"),
        }
        for id in ["features", "keys", "valence", "correlation", "scatter", "top_artists", "radar"] {
            assert!(view.panel(id).unwrap().is_error(), "{id} should carry an error");
        }
        assert_eq!(view.selected, vec!["1960s", "1970s", "1980s", "1990s", "2000s"]);
        assert_eq!(view.x, "energy");
        assert_eq!(view.y, "danceability");
    }

    #[tokio::test]
    async fn one_failing_statement_leaves_other_charts_intact() {
        let (_, dash) = dashboard(Canned {
            frames: vec![
                ("decades", decades_frame()),
                ("features", features_frame()),
                ("moods", moods_frame()),
                ("sample", sample_frame()),
                ("artists", artists_frame()),
            ],
            ..Default::default()
        });
        let selection = Selection {
            decades: Some(vec!["1990s".into(), "2000s".into()]),
            ..Default::default()
        };
        let Page::Dashboard(view) = dash.render(&selection).await else {
            panic!("expected dashboard page");
        };

        assert!(view.panel("keys").unwrap().is_error());
        assert!(view.panel("valence").unwrap().is_error());
        assert_eq!(chart_kind(&view, "features"), ChartKind::Line);
        assert_eq!(chart_kind(&view, "moods"), ChartKind::StackedBar);
        assert_eq!(chart_kind(&view, "correlation"), ChartKind::Heatmap);
        assert_eq!(chart_kind(&view, "scatter"), ChartKind::Scatter);
        assert_eq!(chart_kind(&view, "radar"), ChartKind::Radar);
        assert!(matches!(view.panel("top_artists").unwrap().body, PanelBody::Table(_)));
        assert_eq!(view.artist_decade.as_deref(), Some("1990s"));
    }

    #[tokio::test]
    async fn auth_failure_renders_setup_page() {
        let (_, dash) = dashboard(Canned {
            fail_decades: Some(|| PipelineError::Auth("no credentials".into())),
            ..Default::default()
        });
        match dash.render(&Selection::default()).await {
            Page::Setup(notice) => {
                assert_eq!(notice.command, SETUP_COMMAND);
                assert!(notice.detail.contains("no credentials"));
            }
            other => panic!("unexpected page {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_decades_failure_renders_error_page() {
        let (_, dash) = dashboard(Canned {
            fail_decades: Some(|| PipelineError::Query("syntax".into())),
            ..Default::default()
        });
        match dash.render(&Selection::default()).await {
            Page::Error { message, .. } => assert_eq!(message, DECADES_ERROR),
            other => panic!("unexpected page {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_render_is_served_from_cache() {
        let (wh, dash) = dashboard(Canned {
            frames: vec![("decades", decades_frame()), ("moods", moods_frame())],
            ..Default::default()
        });
        let selection = Selection {
            decades: Some(vec!["1990s".into(), "2000s".into(), "1850s".into()]),
            ..Default::default()
        };
        dash.render(&selection).await;
        let first = wh.executed.lock().len();
        assert_eq!(first, 6);
        dash.render(&selection).await;
        // Failed statements are retried, successful ones are not.
        let executed = wh.executed.lock();
        assert_eq!(executed.len(), first + 4);
        let moods: Vec<&Query> = executed.iter().filter(|q| q.label == "moods").collect();
        assert_eq!(moods.len(), 1);
        assert!(moods[0].cache_key().contains("IN ('1990s', '2000s')"));
        drop(executed);
        assert_eq!(dash.cache_stats().hits, 2);
    }

    #[tokio::test]
    async fn expired_results_are_queried_again() {
        let wh = Arc::new(Canned {
            frames: vec![("decades", decades_frame()), ("moods", moods_frame())],
            ..Default::default()
        });
        let config = DashboardConfig {
            cache_ttl_secs: 1,
            ..Default::default()
        };
        let dash = Dashboard::new(wh.clone(), &config);
        let moods_runs = || wh.executed.lock().iter().filter(|q| q.label == "moods").count();

        dash.render(&Selection::default()).await;
        dash.render(&Selection::default()).await;
        assert_eq!(moods_runs(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        dash.render(&Selection::default()).await;
        assert_eq!(moods_runs(), 2);
        assert_eq!(dash.cache_stats().expired_evictions, 2);
    }

    #[tokio::test]
    async fn invalid_axes_fall_back_to_defaults() {
        let (_, dash) = dashboard(Canned {
            frames: vec![("decades", decades_frame())],
            ..Default::default()
        });
        let selection = Selection {
            x: Some("valence".into()),
            y: Some("drop table".into()),
            ..Default::default()
        };
        let Page::Dashboard(view) = dash.render(&selection).await else {
            panic!("expected dashboard page");
        };
        assert_eq!(view.x, "valence");
        assert_eq!(view.y, "danceability");
    }
}
