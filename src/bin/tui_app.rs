use serde::Deserialize;

// ---------------------------------------------------------------------------
// API response types (mirror routes.rs shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: i64,
    pub run_state: String,
    pub last_sample_at_ms: Option<i64>,
    pub last_delivery_at_ms: Option<i64>,
    pub samples_written: u64,
    pub messages_delivered: u64,
    pub undelivered_anomalies: i64,
    pub failing_games: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct LiveReading {
    pub ccu: Option<i64>,
    pub observed_at_ms: Option<i64>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct GameResponse {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub reference_url: String,
    pub live: Option<LiveReading>,
}

/// `AnomalyWithGame` flattened by the server.
#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct AnomalyResponse {
    pub id: Option<i64>,
    pub game_id: i64,
    pub timestamp_ms: i64,
    pub delta: f64,
    pub mean: f64,
    pub stddev: f64,
    pub threshold: f64,
    pub direction: String,
    pub delivered: bool,
    pub game_title: String,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct ProgressResponse {
    pub index_in_cycle: usize,
    pub total_games: usize,
    pub current_game_title: String,
    pub successful_samples: u64,
    pub failed_samples: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct SummaryResponse {
    pub successful_samples: u64,
    pub failed_samples: u64,
    pub items_processed: u64,
    pub average_time_per_game_ms: f64,
    pub stop_reason: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct RunStatusResponse {
    pub state: String,
    pub run_id: Option<u64>,
    pub progress: Option<ProgressResponse>,
    pub last_summary: Option<SummaryResponse>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LatencyResponse {
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub sample_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct DeliveryResponse {
    delivered: u64,
    errors: u64,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub health: HealthResponse,
    pub run: RunStatusResponse,
    pub games: Vec<GameResponse>,
    pub anomalies: Vec<AnomalyResponse>,
    pub latency: LatencyResponse,
    /// Outcome of the last start/stop/deliver action, shown in the footer.
    pub last_action: Option<String>,
    pub base_url: String,
}

impl AppState {
    pub fn new(base_url: String) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            health: HealthResponse::default(),
            run: RunStatusResponse::default(),
            games: Vec::new(),
            anomalies: Vec::new(),
            latency: LatencyResponse::default(),
            last_action: None,
            base_url,
        }
    }

    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let health_url = format!("{}/health", self.base_url);
        let status_url = format!("{}/sampling/status", self.base_url);
        let games_url = format!("{}/games", self.base_url);
        let anomalies_url = format!("{}/anomalies?limit=100", self.base_url);
        let latency_url = format!("{}/stats/latency", self.base_url);

        let (health_res, status_res, games_res, anomalies_res, latency_res) = tokio::join!(
            client.get(&health_url).send(),
            client.get(&status_url).send(),
            client.get(&games_url).send(),
            client.get(&anomalies_url).send(),
            client.get(&latency_url).send(),
        );

        let (health_res, games_res, anomalies_res) = match (health_res, games_res, anomalies_res) {
            (Ok(h), Ok(g), Ok(a)) => (h, g, a),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                self.status = ConnectionStatus::Error(format!("{e}"));
                return;
            }
        };

        let (health, games, anomalies) = tokio::join!(
            health_res.json::<HealthResponse>(),
            games_res.json::<Vec<GameResponse>>(),
            anomalies_res.json::<Vec<AnomalyResponse>>(),
        );

        match (health, games, anomalies) {
            (Ok(h), Ok(g), Ok(a)) => {
                self.health = h;
                self.games = g;
                self.anomalies = a;
                self.status = ConnectionStatus::Connected;

                if let Ok(s) = status_res {
                    if let Ok(run) = s.json::<RunStatusResponse>().await {
                        self.run = run;
                    }
                }
                if let Ok(l) = latency_res {
                    if let Ok(latency) = l.json::<LatencyResponse>().await {
                        self.latency = latency;
                    }
                }
            }
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                self.status = ConnectionStatus::Error(format!("parse error: {e}"));
            }
        }
    }

    /// Start an unbounded sampling run.
    pub async fn start_sampling(&mut self, client: &reqwest::Client) {
        let url = format!("{}/sampling/start", self.base_url);
        self.last_action = Some(match client.post(&url).send().await {
            Ok(resp) if resp.status().is_success() => "sampling started".to_string(),
            Ok(resp) if resp.status() == reqwest::StatusCode::CONFLICT => "a run is already active".to_string(),
            Ok(resp) => format!("start failed: HTTP {}", resp.status()),
            Err(e) => format!("start failed: {e}"),
        });
    }

    pub async fn stop_sampling(&mut self, client: &reqwest::Client) {
        let url = format!("{}/sampling/stop", self.base_url);
        self.last_action = Some(match client.post(&url).send().await {
            Ok(resp) if resp.status().is_success() => "stop requested".to_string(),
            Ok(resp) => format!("stop failed: HTTP {}", resp.status()),
            Err(e) => format!("stop failed: {e}"),
        });
    }

    pub async fn deliver_pending(&mut self, client: &reqwest::Client) {
        let url = format!("{}/anomalies/deliver", self.base_url);
        let outcome = match client.post(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<DeliveryResponse>().await {
                Ok(r) => format!("delivered {}, errors {}", r.delivered, r.errors),
                Err(e) => format!("deliver: bad response: {e}"),
            },
            Ok(resp) => format!("deliver failed: HTTP {}", resp.status()),
            Err(e) => format!("deliver failed: {e}"),
        };
        self.last_action = Some(outcome);
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

pub fn format_ccu(ccu: Option<i64>) -> String {
    match ccu {
        Some(v) if v >= 1_000_000 => format!("{:.2}M", v as f64 / 1_000_000.0),
        Some(v) if v >= 10_000 => format!("{:.1}k", v as f64 / 1_000.0),
        Some(v) => v.to_string(),
        None => "—".to_string(),
    }
}

pub fn format_delta(delta: f64) -> String {
    format!("{:+}", delta.round() as i64)
}

/// Epoch ms to HH:MM:SS (UTC).
pub fn format_time_ms(ms: i64) -> String {
    let secs = (ms / 1000).max(0) as u64;
    let h = (secs / 3600) % 24;
    let m = (secs / 60) % 60;
    let s = secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

#[allow(dead_code)]
fn main() {
    // Shared by src/bin/tui.rs via `mod tui_app`; not a standalone binary.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ccu_is_abbreviated() {
        assert_eq!(format_ccu(Some(950)), "950");
        assert_eq!(format_ccu(Some(12_345)), "12.3k");
        assert_eq!(format_ccu(Some(2_500_000)), "2.50M");
        assert_eq!(format_ccu(None), "—");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("Café Racer", 5), "Café…");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn time_of_day_from_epoch_ms() {
        assert_eq!(format_time_ms(1_700_000_000_000), "22:13:20");
        assert_eq!(format_delta(-12.6), "-13");
    }
}
