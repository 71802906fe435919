//! Text and JSON renderings of a finding shared by the built-in sinks.

use std::fmt::Write as _;

use serde::Serialize;
use warden_core::{Block, Finding};

/// Renders a finding as markdown.
///
/// Blocks of unknown type are skipped.
#[must_use]
pub fn render_markdown(finding: &Finding) -> String {
    let mut out = format!(
        "{} *{}* ({})\n",
        finding.severity.emoji(),
        finding.title,
        finding.severity
    );
    if !finding.description.is_empty() {
        let _ = writeln!(out, "{}", finding.description);
    }
    let subject = &finding.subject;
    if let Some(name) = &subject.name {
        let _ = writeln!(
            out,
            "_{} {}/{}_",
            subject.kind.as_deref().unwrap_or("resource"),
            subject.namespace.as_deref().unwrap_or("-"),
            name
        );
    }
    for enrichment in &finding.enrichments {
        if let Some(title) = &enrichment.title {
            let _ = writeln!(out, "\n**{title}**");
        }
        for block in &enrichment.blocks {
            render_block(&mut out, block);
        }
    }
    out
}

fn render_block(out: &mut String, block: &Block) {
    match block {
        Block::Markdown { text } => {
            let _ = writeln!(out, "{text}");
        }
        Block::Table { name, headers, rows } => {
            if let Some(name) = name {
                let _ = writeln!(out, "{name}");
            }
            let _ = writeln!(out, "| {} |", headers.join(" | "));
            let _ = writeln!(out, "|{}", "---|".repeat(headers.len()));
            for row in rows {
                let _ = writeln!(out, "| {} |", row.join(" | "));
            }
        }
        Block::File { filename, contents } => {
            let _ = writeln!(out, "[{filename}, {} bytes]", contents.len());
        }
        Block::Graph { title, points } => {
            let _ = writeln!(out, "[graph: {title}, {} points]", points.len());
        }
        Block::Callback { text, callback_id } => {
            let _ = writeln!(out, "[{text}] ({callback_id})");
        }
        Block::Unknown => {}
    }
}

/// JSON body posted by the webhook sink and written by the file sink.
#[derive(Debug, Clone, Serialize)]
pub struct FindingPayload<'a> {
    /// Cluster the finding came from.
    pub cluster: &'a str,
    /// Markdown rendering for receivers that only show text.
    pub text: String,
    /// Deduplication fingerprint.
    pub fingerprint: String,
    /// Whether finding persistence is available.
    pub platform_enabled: bool,
    /// The structured finding.
    pub finding: &'a Finding,
}

impl<'a> FindingPayload<'a> {
    /// Builds the payload for a finding.
    #[must_use]
    pub fn new(cluster: &'a str, finding: &'a Finding, platform_enabled: bool) -> Self {
        Self {
            cluster,
            text: render_markdown(finding),
            fingerprint: finding.fingerprint(),
            platform_enabled,
            finding,
        }
    }
}
