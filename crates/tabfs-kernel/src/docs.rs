//! Route reference page.
//!
//! Renders the `description` and `usage` metadata of declared routes as a
//! single HTML page, so the filesystem can document itself. Synthesized
//! ancestors carry no metadata and are left out.

use std::fmt::Write;

use crate::route::{RouteKind, RouteSpec};

/// Documentation for one declared route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDoc {
    pub pattern: String,
    pub is_dir: bool,
    pub description: Option<String>,
    pub usage: Vec<String>,
}

impl RouteDoc {
    pub fn from_spec(pattern: &str, spec: &RouteSpec) -> Self {
        Self {
            pattern: pattern.to_string(),
            is_dir: spec.kind() == Some(RouteKind::Directory),
            description: spec.description_text().map(str::to_string),
            usage: spec.usage_examples().to_vec(),
        }
    }

    /// Usage examples with `$0` replaced by the relative path.
    pub fn expanded_usage(&self) -> impl Iterator<Item = String> + '_ {
        let relative = self.pattern.trim_start_matches('/');
        self.usage.iter().map(move |u| u.replace("$0", relative))
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

const HEAD: &str = r#"<!doctype html>
<html>
  <head>
    <meta charset="utf-8">
    <title>Routes</title>
    <style>
      dt:not(:first-of-type) { margin-top: 1em; }
      .description { font-style: italic; white-space: pre-line; }
      .missing { background-color: #f99; }
      summary { color: #555; }
    </style>
  </head>
  <body>
    <p>Every folder and file served by this filesystem.</p>
    <p>Variables such as :TAB_TITLE and #TAB_ID stand in for concrete values.</p>
    <dl>
"#;

const TAIL: &str = "    </dl>\n  </body>\n</html>\n";

/// Render `docs` in order as an HTML definition list.
pub fn render_html(docs: &[RouteDoc]) -> String {
    let mut html = String::from(HEAD);
    for doc in docs {
        let icon = if doc.is_dir { "&#x1F4C1;" } else { "&#x1F4C4;" };
        let _ = writeln!(
            html,
            "      <dt>{icon} {}</dt>",
            escape(doc.pattern.trim_start_matches('/'))
        );
        match &doc.description {
            Some(text) => {
                let _ = writeln!(html, "      <dd class=\"description\">{}</dd>", escape(text));
            }
            None => html.push_str("      <dd class=\"missing\">No description.</dd>\n"),
        }
        if doc.usage.is_empty() {
            html.push_str("      <dd class=\"missing\">No usage examples.</dd>\n");
            continue;
        }
        html.push_str("      <dd><details><summary>Usage examples</summary><ul>\n");
        for usage in doc.expanded_usage() {
            let _ = writeln!(html, "        <li><code>{}</code></li>", escape(&usage));
        }
        html.push_str("      </ul></details></dd>\n");
    }
    html.push_str(TAIL);
    html
}
