//! Landing page served at `/`.

use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the root `/` endpoint.
#[instrument(skip(state))]
pub async fn root_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing / request");

    let version = env!("CARGO_PKG_VERSION");
    let built = option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown");
    let metrics_path = state.config.metrics_path();

    let uptime_secs = state.uptime_seconds();
    let hours = uptime_secs / 3600;
    let minutes = (uptime_secs % 3600) / 60;
    let seconds = uptime_secs % 60;
    let uptime_str = format!("{}h {}m {}s", hours, minutes, seconds);

    let clusters: String = state
        .config
        .clusters
        .iter()
        .map(|c| format!("<li><code>{}</code></li>", c.cluster_label))
        .collect();

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Ceph Exporter</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            margin: 0;
            padding: 20px;
            background: #f5f5f5;
            line-height: 1.6;
        }}
        .container {{
            max-width: 900px;
            margin: 0 auto;
            background: white;
            padding: 40px;
            border-radius: 8px;
            box-shadow: 0 2px 8px rgba(0,0,0,0.1);
        }}
        h1 {{
            color: #333;
            border-bottom: 3px solid #007bff;
            padding-bottom: 15px;
        }}
        a {{
            color: #007bff;
            font-weight: 600;
            text-decoration: none;
        }}
        .info {{
            background: #e9ecef;
            padding: 15px;
            border-radius: 4px;
        }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Ceph Exporter</h1>
        <div class="info">Version <b>{version}</b> (built {built}) &middot; Uptime <b>{uptime_str}</b></div>
        <h2>Endpoints</h2>
        <ul>
            <li><a href="{metrics_path}">{metrics_path}</a> Prometheus metrics for every cluster</li>
            <li><a href="/health">/health</a> Liveness summary</li>
        </ul>
        <h2>Clusters</h2>
        <ul>{clusters}</ul>
    </div>
</body>
</html>"#
    );

    Html(html)
}
