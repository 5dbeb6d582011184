//! Server-rendered portal pages

use crate::controller::{NetworkInfo, ServiceState, StatusSnapshot};

fn page(title: &str, device_name: &str, body: &str, script: &str) -> String {
    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0, user-scalable=no">
    <title>{device} - {title}</title>
    <link rel="stylesheet" href="/style.css">
</head>
<body>
    <div class="container">
        <header class="header">
            <h1 class="title">{device}</h1>
            <p class="subtitle">WIFI SETUP</p>
        </header>
{body}
    </div>
    <script>{script}</script>
</body>
</html>"##,
        device = html_escape(device_name),
        title = html_escape(title),
        body = body,
        script = script,
    )
}

/// Landing page with the network list
pub fn render_portal_page(
    device_name: &str,
    state: ServiceState,
    networks: &[NetworkInfo],
    message: Option<&str>,
) -> String {
    let networks_html = if networks.is_empty() {
        r#"<p class="empty">No networks found yet. Press Rescan to search.</p>"#.to_string()
    } else {
        networks.iter().map(render_network_card).collect()
    };

    let message_html = message
        .map(|m| format!(r#"<div class="status-bar status-waiting">{}</div>"#, html_escape(m)))
        .unwrap_or_default();

    let body = format!(
        r#"        {message_html}
        <div class="status-bar" data-state="{state}">
            <span id="status-text">Select a network to connect</span>
        </div>

        <main class="network-list" id="network-list">
            {networks_html}
        </main>

        <button class="manual-btn" id="rescan-btn" onclick="rescan()">Rescan</button>

        <form class="manual-form" method="post" action="/connect">
            <h2>Enter Network Manually</h2>
            <input type="text" name="ssid" placeholder="Network Name (SSID)" required>
            <input type="password" name="password" placeholder="Password (leave empty for open)">
            <button type="submit" class="btn-connect">Connect</button>
        </form>"#,
        message_html = message_html,
        state = state,
        networks_html = networks_html,
    );

    page("WiFi Setup", device_name, &body, PORTAL_SCRIPT)
}

fn render_network_card(network: &NetworkInfo) -> String {
    let encrypted = network.security.is_encrypted();
    format!(
        r#"
            <form class="network-card" method="get" action="/confirm">
                <input type="hidden" name="ssid" value="{ssid}">
                <input type="hidden" name="encrypted" value="{encrypted}">
                <button type="submit">
                    <span class="lock-icon">{lock}</span>
                    <span class="ssid">{ssid}</span>
                    <span class="meta">{frequency}</span>
                    <span class="signal">{bars}<span class="signal-pct">{signal}%</span></span>
                </button>
            </form>"#,
        ssid = html_escape(&network.ssid),
        encrypted = if encrypted { "encrypted" } else { "unencrypted" },
        lock = if encrypted { "🔒" } else { "🔓" },
        frequency = html_escape(&network.frequency),
        bars = signal_to_bars(network.signal_strength),
        signal = network.signal_strength,
    )
}

// Rebuilds the list from /api/scan with the same markup as render_network_card
const PORTAL_SCRIPT: &str = r#"
async function rescan() {
    const button = document.getElementById('rescan-btn');
    const status = document.getElementById('status-text');
    button.disabled = true;
    status.textContent = 'Scanning... the setup network may drop briefly';
    try {
        const response = await fetch('/api/scan');
        const data = await response.json();
        const list = document.getElementById('network-list');
        list.replaceChildren();
        for (const net of data.networks || []) {
            const form = document.createElement('form');
            form.className = 'network-card';
            form.method = 'get';
            form.action = '/confirm';
            const encrypted = net.security === 'encrypted';
            for (const [name, value] of [['ssid', net.ssid], ['encrypted', encrypted ? 'encrypted' : 'unencrypted']]) {
                const input = document.createElement('input');
                input.type = 'hidden';
                input.name = name;
                input.value = value;
                form.appendChild(input);
            }
            const button = document.createElement('button');
            button.type = 'submit';
            button.textContent = (encrypted ? '🔒 ' : '🔓 ') + net.ssid + '  ' + net.signal_strength + '%';
            form.appendChild(button);
            list.appendChild(form);
        }
        status.textContent = data.message || 'Select a network to connect';
    } catch (err) {
        status.textContent = 'Scan failed, reconnect to the setup network and retry';
    }
    button.disabled = false;
}
"#;

/// Password entry for the chosen network
pub fn render_confirm_page(device_name: &str, ssid: &str, encrypted: bool) -> String {
    let password_html = if encrypted {
        r#"<input type="password" name="password" placeholder="Password" required minlength="8" autofocus>"#
    } else {
        r#"<p class="meta">Open network, no password needed.</p><input type="hidden" name="password" value="">"#
    };

    let body = format!(
        r#"        <form class="modal-content" method="post" action="/connect">
            <h2>Connect to</h2>
            <p class="ssid">{ssid}</p>
            <input type="hidden" name="ssid" value="{ssid}">
            {password_html}
            <div class="modal-actions">
                <a class="btn-cancel" href="/">Back</a>
                <button type="submit" class="btn-connect">Connect</button>
            </div>
        </form>"#,
        ssid = html_escape(ssid),
        password_html = password_html,
    );

    page("Connect", device_name, &body, "")
}

/// Connection progress page. Polls /api/status and follows the device to its
/// new address once connected.
pub fn render_status_page(device_name: &str, status: &StatusSnapshot) -> String {
    let body = format!(
        r#"        <div id="status" class="status-bar {class}">
            <span id="status-text">{text}</span>
        </div>
        <p id="status-detail" class="meta">{detail}</p>
        <div class="actions">
            <a class="manual-btn" id="home-link" href="/">Back to network list</a>
            <a class="manual-btn" id="change-link" href="/change-network">Change network</a>
        </div>"#,
        class = status_class(status),
        text = html_escape(&status_text(status)),
        detail = html_escape(status.message.as_deref().or(status.error.as_deref()).unwrap_or("")),
    );

    page("Status", device_name, &body, STATUS_SCRIPT)
}

const STATUS_SCRIPT: &str = r#"
async function poll() {
    try {
        const response = await fetch('/api/status');
        const data = await response.json();
        const bar = document.getElementById('status');
        const text = document.getElementById('status-text');
        const detail = document.getElementById('status-detail');
        detail.textContent = data.message || data.error || '';
        if (data.connected) {
            bar.className = 'status-bar status-connected';
            text.textContent = 'Connected to ' + (data.ssid || 'network');
            if (data.redirect_url) {
                detail.textContent = 'Device is now reachable at ' + data.redirect_url;
            }
            return;
        }
        if (data.connecting) {
            bar.className = 'status-bar status-connecting';
            text.textContent = 'Connecting to ' + (data.target_ssid || 'network') + '... (' + data.elapsed_seconds + 's)';
        } else if (data.current_state === 'hotspot_mode') {
            bar.className = 'status-bar status-failed';
            text.textContent = 'Not connected. Choose a network to try again.';
        }
    } catch (err) {
        // The setup network goes away while the device switches networks
        document.getElementById('status-text').textContent = 'Switching networks...';
    }
    setTimeout(poll, 2000);
}
setTimeout(poll, 1000);
"#;

fn status_class(status: &StatusSnapshot) -> &'static str {
    if status.connected {
        "status-connected"
    } else if status.connecting {
        "status-connecting"
    } else if status.current_state == ServiceState::Error {
        "status-failed"
    } else {
        "status-waiting"
    }
}

fn status_text(status: &StatusSnapshot) -> String {
    if status.connected {
        return format!("Connected to {}", status.ssid.as_deref().unwrap_or("network"));
    }
    if status.connecting {
        return format!(
            "Connecting to {}... ({}s)",
            status.target_ssid.as_deref().unwrap_or("network"),
            status.elapsed_seconds
        );
    }
    match status.current_state {
        ServiceState::HotspotMode => "Not connected. Choose a network to try again.".to_string(),
        ServiceState::Initializing => "Changing network configuration...".to_string(),
        ServiceState::Error => "Setup network unavailable, retrying...".to_string(),
        ServiceState::Connecting | ServiceState::Connected => "Checking status...".to_string(),
    }
}

/// Countdown shown before the device drops its current network
pub fn render_change_network_page(
    device_name: &str,
    countdown_secs: u64,
    hotspot_ssid: &str,
    setup_url: &str,
) -> String {
    let body = format!(
        r#"        <div class="status-bar status-connecting">
            <span>Returning to setup mode in <span id="countdown">{countdown}</span>s</span>
        </div>
        <p class="meta">When the countdown ends, join the <strong>{ssid}</strong> network
            and open <strong>{url}</strong> to choose a new network.</p>"#,
        countdown = countdown_secs,
        ssid = html_escape(hotspot_ssid),
        url = html_escape(setup_url),
    );

    let script = format!(
        r#"
let remaining = {countdown};
const timer = setInterval(() => {{
    remaining -= 1;
    document.getElementById('countdown').textContent = Math.max(remaining, 0);
    if (remaining <= 0) {{
        clearInterval(timer);
    }}
}}, 1000);
"#,
        countdown = countdown_secs,
    );

    page("Change Network", device_name, &body, &script)
}

fn signal_to_bars(signal: u8) -> String {
    let bars = (signal as f32 / 25.0).ceil() as usize;
    (0..4)
        .map(|i| {
            let height = (i + 1) * 25;
            format!(
                r#"<span class="bar{}" style="height: {}%"></span>"#,
                if i < bars { " filled" } else { "" },
                height
            )
        })
        .collect()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
