//! Named-variable substitution for anomaly messages.
//!
//! Templates use `{token}` markers from a fixed set (see [`TemplateVar`]).
//! Anything else in braces is copied through verbatim, so a typo in an
//! operator template shows up in the message rather than failing delivery.

use chrono::{DateTime, Utc};

use crate::types::AnomalyWithGame;

/// Layout used when no custom template is configured.
pub const DEFAULT_TEMPLATE: &str = "{arrow} {title}: online {direction}\n\
Now: {current} ({delta} vs mean {mean})\n\
Stddev {stddev}, threshold {threshold} ({n_sigma} sigma)\n\
{time}\n\
{url}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateVar {
    Title,
    /// "up" / "down"
    Direction,
    /// ▲ / ▼
    Arrow,
    Delta,
    NSigma,
    Threshold,
    Current,
    Mean,
    Stddev,
    Url,
    Time,
}

impl TemplateVar {
    pub const ALL: [TemplateVar; 11] = [
        TemplateVar::Title,
        TemplateVar::Direction,
        TemplateVar::Arrow,
        TemplateVar::Delta,
        TemplateVar::NSigma,
        TemplateVar::Threshold,
        TemplateVar::Current,
        TemplateVar::Mean,
        TemplateVar::Stddev,
        TemplateVar::Url,
        TemplateVar::Time,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            TemplateVar::Title => "title",
            TemplateVar::Direction => "direction",
            TemplateVar::Arrow => "arrow",
            TemplateVar::Delta => "delta",
            TemplateVar::NSigma => "n_sigma",
            TemplateVar::Threshold => "threshold",
            TemplateVar::Current => "current",
            TemplateVar::Mean => "mean",
            TemplateVar::Stddev => "stddev",
            TemplateVar::Url => "url",
            TemplateVar::Time => "time",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.token() == token)
    }
}

/// Values available to a template, already formatted for display.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageVars {
    pub title: String,
    pub direction: String,
    pub arrow: String,
    pub delta: String,
    pub n_sigma: String,
    pub threshold: String,
    pub current: String,
    pub mean: String,
    pub stddev: String,
    pub url: String,
    pub time: String,
}

impl MessageVars {
    /// `n_sigma` is the sensitivity in force when the message is rendered.
    pub fn new(item: &AnomalyWithGame, n_sigma: f64) -> Self {
        let a = &item.anomaly;
        Self {
            title: item.game_title.clone(),
            direction: a.direction.to_string(),
            arrow: a.direction.glyph().to_string(),
            delta: format!("{:+}", a.delta.round() as i64),
            n_sigma: format!("{n_sigma}"),
            threshold: format!("{:.1}", a.threshold),
            current: format!("{}", a.current_online().round() as i64),
            mean: format!("{:.1}", a.mean),
            stddev: format!("{:.1}", a.stddev),
            url: item.reference_url.clone(),
            time: format_timestamp(a.timestamp_ms),
        }
    }

    fn value(&self, var: TemplateVar) -> &str {
        match var {
            TemplateVar::Title => &self.title,
            TemplateVar::Direction => &self.direction,
            TemplateVar::Arrow => &self.arrow,
            TemplateVar::Delta => &self.delta,
            TemplateVar::NSigma => &self.n_sigma,
            TemplateVar::Threshold => &self.threshold,
            TemplateVar::Current => &self.current,
            TemplateVar::Mean => &self.mean,
            TemplateVar::Stddev => &self.stddev,
            TemplateVar::Url => &self.url,
            TemplateVar::Time => &self.time,
        }
    }
}

/// `YYYY-MM-DD HH:MM:SS UTC`; the raw number if out of chrono's range.
pub fn format_timestamp(timestamp_ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(timestamp_ms) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => timestamp_ms.to_string(),
    }
}

/// Substitute known `{token}` markers; leave everything else untouched.
pub fn render(template: &str, vars: &MessageVars) -> String {
    let mut out = String::with_capacity(template.len() + 64);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let token = &after[..close];
        if token.contains('{') {
            // Stray brace: emit it and rescan from the next one.
            out.push('{');
            rest = after;
            continue;
        }
        match TemplateVar::parse(token) {
            Some(var) => out.push_str(vars.value(var)),
            None => {
                out.push('{');
                out.push_str(token);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Render with the operator template if one is set, else [`DEFAULT_TEMPLATE`].
pub fn render_message(item: &AnomalyWithGame, n_sigma: f64, custom: Option<&str>) -> String {
    let vars = MessageVars::new(item, n_sigma);
    render(custom.unwrap_or(DEFAULT_TEMPLATE), &vars)
}
