//! Server-rendered pages

use std::fmt::Write;

use crate::models::run::RunRecord;
use crate::server::guard::Flash;
use crate::storage::runs::{yes_no, CSV_HEADERS};

const STYLE: &str = r#"
body { font-family: sans-serif; margin: 2rem auto; max-width: 60rem; color: #222; }
nav a { margin-right: 1rem; }
label { display: block; margin-top: 0.75rem; font-weight: bold; }
input[type=text], input[type=password], select, textarea { width: 100%; padding: 0.3rem; }
table { border-collapse: collapse; width: 100%; margin-top: 1rem; }
th, td { border: 1px solid #ccc; padding: 0.3rem 0.5rem; text-align: left; }
pre { background: #111; color: #ddd; padding: 1rem; max-height: 40rem; overflow: auto; }
.flash { padding: 0.5rem; border: 1px solid #3a3; background: #efe; }
.flash.error { border-color: #a33; background: #fee; }
.success { color: #282; } .failed { color: #b22; } .unknown, .pending { color: #888; }
"#;

// Posts the form and renders the `text/event-stream` response as it arrives
const DEPLOY_SCRIPT: &str = r#"
document.getElementById('deploy-form').addEventListener('submit', async (event) => {
  event.preventDefault();
  const output = document.getElementById('output');
  const status = document.getElementById('status');
  output.textContent = '';
  status.textContent = 'Running...';
  const response = await fetch('/', {
    method: 'POST',
    headers: { 'Content-Type': 'application/x-www-form-urlencoded' },
    body: new URLSearchParams(new FormData(event.target)),
  });
  if (!response.ok) {
    status.textContent = await response.text();
    return;
  }
  const reader = response.body.pipeThrough(new TextDecoderStream()).getReader();
  let buffer = '';
  for (;;) {
    const { value, done } = await reader.read();
    if (done) break;
    buffer += value;
    const events = buffer.split('\n\n');
    buffer = events.pop();
    for (const block of events) {
      const data = block.split('\n')
        .filter((l) => l.startsWith('data:'))
        .map((l) => l.slice(5).replace(/^ /, ''))
        .join('\n');
      if (data.startsWith('PLAYBOOK_EXIT=')) {
        const code = data.slice('PLAYBOOK_EXIT='.length);
        status.textContent = code === '0' ? 'Finished successfully.' : 'Finished with exit code ' + code + '.';
      } else {
        output.textContent += data + '\n';
        output.scrollTop = output.scrollHeight;
      }
    }
  }
});
"#;

/// Escape text for HTML element and attribute content
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn layout(title: &str, user: Option<&str>, flash: Option<Flash>, body: &str) -> String {
    let nav = match user {
        Some(user) => format!(
            r#"<nav><a href="/">Deploy</a><a href="/history">History</a><a href="/logout">Log out ({})</a></nav>"#,
            escape_html(user)
        ),
        None => String::new(),
    };
    let flash = match flash {
        Some(flash) => format!(
            r#"<p class="flash{}">{}</p>"#,
            if flash.is_error() { " error" } else { "" },
            flash.message()
        ),
        None => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title} - Nessus Agent Deployer</title><style>{STYLE}</style></head>
<body>
{nav}
<h1>{title}</h1>
{flash}
{body}
</body>
</html>"#,
        title = escape_html(title),
    )
}

pub fn login_page(flash: Option<Flash>) -> String {
    let body = r#"<form method="post" action="/login">
<label for="username">Username</label><input type="text" id="username" name="username" autofocus>
<label for="password">Password</label><input type="password" id="password" name="password">
<p><button type="submit">Log in</button></p>
</form>"#;
    layout("Log in", None, flash, body)
}

pub fn index_page(user: &str, accounts: &[&str], flash: Option<Flash>) -> String {
    let mut options = String::from(r#"<option value="">(enter credentials below)</option>"#);
    for account in accounts {
        let account = escape_html(account);
        let _ = write!(options, r#"<option value="{account}">{account}</option>"#);
    }

    let body = format!(
        r#"<form id="deploy-form">
<label for="predefined_account">Predefined account</label>
<select id="predefined_account" name="predefined_account">{options}</select>
<label for="username">SSH username</label><input type="text" id="username" name="username">
<label for="password">SSH password</label><input type="password" id="password" name="password">
<label for="sudo_password">Escalation password</label><input type="password" id="sudo_password" name="sudo_password">
<label for="activation_key">Activation key</label><input type="password" id="activation_key" name="activation_key">
<label for="escalate_method">Escalation method</label>
<select id="escalate_method" name="escalate_method">
<option value="">(account default)</option><option value="sudo">sudo</option><option value="dzdo">dzdo</option><option value="su">su</option>
</select>
<label for="hosts">Hosts (one per line)</label><textarea id="hosts" name="hosts" rows="6"></textarea>
<label for="groups">Agent groups</label><input type="text" id="groups" name="groups">
<label for="mode">Mode</label>
<select id="mode" name="mode"><option value="cloud">cloud</option><option value="manager">manager</option></select>
<label for="manager_host">Manager host</label><input type="text" id="manager_host" name="manager_host">
<label for="manager_port">Manager port</label><input type="text" id="manager_port" name="manager_port" placeholder="8834">
<label><input type="checkbox" name="remove_rapid7" value="true" checked> Remove Rapid7 agent</label>
<p><button type="submit">Deploy</button></p>
</form>
<p id="status"></p>
<pre id="output"></pre>
<script>{DEPLOY_SCRIPT}</script>"#
    );
    layout("Deploy Nessus Agent", Some(user), flash, &body)
}

pub fn history_page(user: &str, runs: &[RunRecord]) -> String {
    let mut rows = String::new();
    for run in runs {
        let (ok, failed, other) = run.tally();
        let _ = write!(
            rows,
            r#"<tr><td><a href="/history/{id}">#{id}</a></td><td>{when}</td><td>{initiator}</td><td>{exit}</td><td>{ok} ok / {failed} failed / {other} other</td><td><a href="/history/{id}/csv">CSV</a></td></tr>"#,
            id = run.id,
            when = run.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            initiator = escape_html(&run.initiator),
            exit = exit_label(run.exit_code),
        );
    }

    let body = if runs.is_empty() {
        "<p>No deployments yet.</p>".to_string()
    } else {
        format!(
            "<table><tr><th>Run</th><th>Started</th><th>Initiator</th><th>Exit</th><th>Hosts</th><th></th></tr>{rows}</table>"
        )
    };
    layout("Deployment History", Some(user), None, &body)
}

pub fn run_page(user: &str, run: &RunRecord) -> String {
    let mut header = String::new();
    for column in CSV_HEADERS {
        let _ = write!(header, "<th>{column}</th>");
    }

    let mut rows = String::new();
    for (host, result) in &run.host_results {
        let _ = write!(
            rows,
            r#"<tr><td>{host}</td><td>{removed}</td><td>{installed}</td><td class="{status}">{status}</td><td>{details}</td></tr>"#,
            host = escape_html(host),
            removed = yes_no(result.removed_legacy_agent),
            installed = yes_no(result.installed_agent),
            status = result.status,
            details = escape_html(&result.details),
        );
    }

    let body = format!(
        r#"<p>Started {when} by {initiator}. Exit code: {exit}. <a href="/history/{id}/csv">Download CSV</a></p>
<table><tr>{header}<th>Details</th></tr>{rows}</table>
<h2>Log</h2>
<pre>{log}</pre>"#,
        when = run.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        initiator = escape_html(&run.initiator),
        exit = exit_label(run.exit_code),
        id = run.id,
        log = escape_html(&run.raw_log),
    );
    layout(&format!("Run #{}", run.id), Some(user), None, &body)
}

fn exit_label(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "n/a".to_string())
}
