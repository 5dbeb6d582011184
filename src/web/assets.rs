//! Static asset serving

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};

/// Serve the CSS stylesheet
pub async fn serve_css() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/css")],
        CSS_CONTENT,
    )
}

const CSS_CONTENT: &str = r##"
:root {
    --primary: #2563eb;
    --bg: #f5f5f4;
    --bg-card: #ffffff;
    --border: #d6d3d1;
    --text: #1c1917;
    --text-dim: #78716c;
    --error: #dc2626;
    --success: #16a34a;
    --warning: #d97706;
}

* {
    box-sizing: border-box;
    margin: 0;
    padding: 0;
}

body {
    background-color: var(--bg);
    color: var(--text);
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
    line-height: 1.5;
    min-height: 100vh;
}

.container {
    max-width: 480px;
    margin: 0 auto;
    padding: 20px;
}

.header {
    text-align: center;
    margin-bottom: 24px;
}

.title {
    font-size: 1.6rem;
    letter-spacing: 0.08em;
}

.subtitle,
.meta {
    color: var(--text-dim);
    font-size: 0.85rem;
}

.status-bar {
    border: 1px solid var(--border);
    border-radius: 8px;
    padding: 12px 16px;
    margin-bottom: 16px;
    background: var(--bg-card);
}

.status-connected { border-color: var(--success); color: var(--success); }
.status-connecting { border-color: var(--warning); color: var(--warning); }
.status-failed { border-color: var(--error); color: var(--error); }

.network-list {
    display: flex;
    flex-direction: column;
    gap: 8px;
    margin-bottom: 16px;
}

.network-card button {
    width: 100%;
    display: flex;
    align-items: center;
    gap: 10px;
    padding: 14px;
    border: 1px solid var(--border);
    border-radius: 8px;
    background: var(--bg-card);
    font-size: 1rem;
    text-align: left;
    cursor: pointer;
}

.network-card .ssid {
    flex: 1;
    font-weight: 600;
    overflow: hidden;
    text-overflow: ellipsis;
}

.signal {
    display: flex;
    align-items: flex-end;
    gap: 2px;
    height: 16px;
}

.bar {
    width: 4px;
    background: var(--border);
    border-radius: 1px;
}

.bar.filled { background: var(--primary); }

.signal-pct {
    margin-left: 6px;
    font-size: 0.75rem;
    color: var(--text-dim);
}

.empty {
    text-align: center;
    color: var(--text-dim);
    padding: 24px 0;
}

.manual-form,
.modal-content {
    display: flex;
    flex-direction: column;
    gap: 10px;
    padding: 16px;
    border: 1px solid var(--border);
    border-radius: 8px;
    background: var(--bg-card);
}

.manual-form h2,
.modal-content h2 {
    font-size: 1.1rem;
}

input[type="text"],
input[type="password"] {
    padding: 12px;
    border: 1px solid var(--border);
    border-radius: 6px;
    font-size: 1rem;
}

.manual-btn,
.btn-connect,
.btn-cancel {
    display: block;
    width: 100%;
    padding: 12px;
    margin-bottom: 10px;
    border: none;
    border-radius: 6px;
    font-size: 1rem;
    text-align: center;
    text-decoration: none;
    cursor: pointer;
}

.manual-btn { background: var(--bg-card); color: var(--primary); border: 1px solid var(--primary); }
.btn-connect { background: var(--primary); color: #ffffff; }
.btn-cancel { background: var(--border); color: var(--text); }

.modal-actions {
    display: flex;
    gap: 10px;
}

@media (max-width: 360px) {
    .container {
        padding: 12px;
    }

    .title {
        font-size: 1.2rem;
    }
}
"##;
