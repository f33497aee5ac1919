//! `GET /dashboard`: category breakdown of every stored email, drawn with
//! Chart.js from counts embedded in the page.

use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use tracing::error;

use super::AppState;

const DASHBOARD_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>SmartMail Dashboard</title>
  <script src="https://cdn.jsdelivr.net/npm/chart.js"></script>
  <style>
    body {
      font-family: system-ui, -apple-system, sans-serif;
      background: #f5f6f8; color: #202124;
      margin: 0; padding: 2rem;
    }
    .card {
      max-width: 720px; margin: 0 auto; padding: 1.5rem 2rem;
      border-radius: 12px; background: #fff;
      box-shadow: 0 1px 3px rgba(0, 0, 0, 0.12);
    }
    h1 { font-size: 1.4rem; margin: 0 0 1rem; }
    p.empty { color: #5f6368; }
  </style>
</head>
<body>
  <div class="card">
    <h1>Email categories</h1>
    <canvas id="categoryChart"></canvas>
    <p class="empty" id="empty" hidden>No emails processed yet.</p>
  </div>
  <script>
    const chartData = {{chart_data}};
    const labels = Object.keys(chartData);
    if (labels.length === 0) {
      document.getElementById("empty").hidden = false;
    }
    new Chart(document.getElementById("categoryChart"), {
      type: "doughnut",
      data: {
        labels: labels,
        datasets: [{ label: "Emails", data: labels.map((k) => chartData[k]) }]
      }
    });
  </script>
</body>
</html>
"#;

/// GET /dashboard
pub(super) async fn dashboard(State(state): State<AppState>) -> Response {
    match state.triage.store().category_counts() {
        Ok(counts) => Html(render(&counts)).into_response(),
        Err(e) => {
            error!(error = %e, "dashboard query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("<h1>Error generating dashboard: {}</h1>", escape_html(&e.to_string()))),
            )
                .into_response()
        }
    }
}

/// Page with `counts` embedded as a JSON object literal.
pub(super) fn render(counts: &BTreeMap<String, i64>) -> String {
    let json = serde_json::to_string(counts).unwrap_or_else(|_| "{}".to_string());
    // Category labels come from the model; keep them from closing the script tag.
    let json = json.replace("</", "<\\/");
    DASHBOARD_HTML.replace("{{chart_data}}", &json)
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
