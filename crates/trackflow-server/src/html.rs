//! Server-side HTML for the dashboard page. Charts are drawn client-side by
//! plotly.js from the figure specs embedded in the page.

use std::fmt::Write as _;
use trackflow_core::dashboard::{
    charts::axis_label, DashboardView, Page, Panel, PanelBody, SetupNotice,
};

const TITLE: &str = "Spotify Music Analysis Dashboard";
const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";

const STYLE: &str = r#"
body { font-family: sans-serif; margin: 0; display: flex; color: #191414; }
aside { width: 240px; padding: 1rem; background: #f4f4f4; min-height: 100vh; }
main { flex: 1; padding: 1rem 2rem; }
h1 { color: #1DB954; text-align: center; }
h2 { color: #191414; border-bottom: 2px solid #1DB954; padding-bottom: .25rem; }
.grid { display: grid; grid-template-columns: 1fr 1fr; gap: 1rem; }
.panel { min-height: 120px; }
.insight { font-size: .9rem; color: #555; }
.error { background: #fdecea; color: #8a1c1c; padding: .75rem; border-radius: 4px; }
.notice { background: #e8f0fe; padding: .75rem; border-radius: 4px; }
table { border-collapse: collapse; width: 100%; }
th, td { text-align: left; padding: .3rem .5rem; border-bottom: 1px solid #ddd; }
"#;

/// Minimal escaping for text and attribute values.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// JSON safe to place inside a `<script>` element.
fn script_json(value: &serde_json::Value) -> String {
    value.to_string().replace("</", "<\\/")
}

pub fn render_page(page: &Page) -> String {
    let body = match page {
        Page::Setup(notice) => setup_body(notice),
        Page::Error { message, detail } => format!(
            "<main><h1>{}</h1><div class=\"error\">{}</div><p class=\"insight\">{}</p></main>",
            TITLE,
            escape(message),
            escape(detail)
        ),
        Page::Dashboard(view) => dashboard_body(view),
    };
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>{TITLE}</title>\n<style>{STYLE}</style>\n\
         <script src=\"{PLOTLY_CDN}\"></script>\n</head>\n<body>\n{body}\n</body>\n</html>\n"
    )
}

fn setup_body(notice: &SetupNotice) -> String {
    format!(
        r#"<main>
<h1>{title}</h1>
<div class="error">{message}</div>
<div class="notice">Run '{command}' in your terminal, then restart the dashboard.</div>
<h2>Authentication Instructions</h2>
<ol>
<li>Open a terminal.</li>
<li>Run <code>{command}</code>.</li>
<li>Log in with a Google account that can read the analysis dataset.</li>
<li>Close the browser window once authentication succeeds.</li>
<li>Restart the dashboard.</li>
</ol>
<p>This creates application default credentials the dashboard uses to reach the warehouse.</p>
<p class="insight">{detail}</p>
</main>"#,
        title = TITLE,
        message = escape(&notice.message),
        command = escape(notice.command),
        detail = escape(&notice.detail),
    )
}

fn dashboard_body(view: &DashboardView) -> String {
    let mut out = String::new();
    out.push_str(&filters(view));
    out.push_str("<main>\n");
    let _ = write!(out, "<h1>{TITLE}</h1>\n<p>Explore trends and patterns in music across decades, keys and audio features.</p>\n");

    let mut section: Option<&str> = None;
    let mut open = false;
    for panel in &view.panels {
        if section != Some(panel.section) {
            if open {
                out.push_str("</div>\n");
            }
            let _ = write!(out, "<h2>{}</h2>\n<div class=\"grid\">\n", escape(panel.section));
            section = Some(panel.section);
            open = true;
        }
        out.push_str(&panel_html(panel));
    }
    if open {
        out.push_str("</div>\n");
    }
    out.push_str("<hr><p class=\"insight\">Data source: Spotify tracks dataset in BigQuery.</p>\n</main>");
    out
}

fn filters(view: &DashboardView) -> String {
    let mut out = String::from("<aside>\n<form method=\"get\" action=\"/\">\n<h3>Filters</h3>\n");
    out.push_str("<input type=\"hidden\" name=\"decades\" value=\"\">\n<fieldset><legend>Select Decades</legend>\n");
    for decade in &view.decades {
        let checked = if view.selected.contains(decade) { " checked" } else { "" };
        let _ = write!(
            out,
            "<label><input type=\"checkbox\" name=\"decades\" value=\"{d}\"{checked}> {d}</label><br>\n",
            d = escape(decade)
        );
    }
    out.push_str("</fieldset>\n");
    out.push_str(&select("x", "X-axis feature", &view.features, &view.x));
    out.push_str(&select("y", "Y-axis feature", &view.features, &view.y));
    if !view.artist_decades.is_empty() {
        let options: Vec<&str> = view.artist_decades.iter().map(String::as_str).collect();
        let current = view.artist_decade.as_deref().unwrap_or_default();
        out.push_str(&select(
            "artist_decade",
            "Decade for artist comparison",
            &options,
            current,
        ));
    }
    out.push_str("<p><button type=\"submit\">Apply</button></p>\n</form>\n</aside>\n");
    out
}

fn select(name: &str, label: &str, options: &[&str], current: &str) -> String {
    let mut out = format!("<p><label>{}<br><select name=\"{}\">", escape(label), name);
    for option in options {
        let selected = if *option == current { " selected" } else { "" };
        let _ = write!(
            out,
            "<option value=\"{}\"{selected}>{}</option>",
            escape(option),
            escape(&axis_label(option))
        );
    }
    out.push_str("</select></label></p>\n");
    out
}

fn panel_html(panel: &Panel) -> String {
    let id = format!("panel-{}", panel.id);
    let content = match &panel.body {
        PanelBody::Chart(chart) => format!(
            "<div id=\"{id}\"></div>\n<script>(function(){{var f={};Plotly.newPlot(\"{id}\",f.data,f.layout,{{responsive:true}});}})();</script>",
            script_json(&chart.figure)
        ),
        PanelBody::Table(table) => {
            let mut t = String::from("<h3>Top Artists by Decade</h3><table><thead><tr>");
            for c in &table.columns {
                let _ = write!(t, "<th>{}</th>", escape(c));
            }
            t.push_str("</tr></thead><tbody>");
            for row in &table.rows {
                t.push_str("<tr>");
                for cell in row {
                    let text = match cell {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    let _ = write!(t, "<td>{}</td>", escape(&text));
                }
                t.push_str("</tr>");
            }
            t.push_str("</tbody></table>");
            t
        }
        PanelBody::Error { message } => {
            format!("<div class=\"error\">Error executing query: {}</div>", escape(message))
        }
        PanelBody::Empty => {
            "<div class=\"notice\">No data for the selected decades.</div>".to_string()
        }
    };
    let insight = if panel.insight.is_empty() {
        String::new()
    } else {
        format!("\n<p class=\"insight\">{}</p>", escape(panel.insight))
    };
    format!("<div class=\"panel\">\n{content}{insight}\n</div>\n")
}
