mod tui_app;

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use tui_app::{format_ccu, format_delta, format_time_ms, truncate, AppState, ConnectionStatus};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(io::Error::other)?;

    let mut app = AppState::new(base_url);

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut games_table_state = TableState::default();
    games_table_state.select(None);

    let result = run_loop(&mut terminal, &mut app, &client, &mut games_table_state).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
    games_state: &mut TableState,
) -> io::Result<()> {
    let refresh_interval = Duration::from_secs(2);
    let mut last_tick = std::time::Instant::now();

    loop {
        terminal.draw(|f| render(f, app, games_state))?;

        let timeout = refresh_interval
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let mut refresh_now = false;
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => refresh_now = true,
                        KeyCode::Char('s') => {
                            app.start_sampling(client).await;
                            refresh_now = true;
                        }
                        KeyCode::Char('x') => {
                            app.stop_sampling(client).await;
                            refresh_now = true;
                        }
                        KeyCode::Char('d') => {
                            app.deliver_pending(client).await;
                            refresh_now = true;
                        }
                        KeyCode::Down | KeyCode::Char('j') => {
                            let max = app.games.len().saturating_sub(1);
                            let next = games_state.selected().map_or(0, |i| (i + 1).min(max));
                            games_state.select(Some(next));
                        }
                        KeyCode::Up | KeyCode::Char('k') => {
                            let prev = games_state.selected().map_or(0, |i| i.saturating_sub(1));
                            games_state.select(Some(prev));
                        }
                        _ => {}
                    }
                    if refresh_now {
                        app.refresh(client).await;
                        last_tick = std::time::Instant::now();
                    }
                }
            }
        }

        if last_tick.elapsed() >= refresh_interval {
            app.refresh(client).await;
            last_tick = std::time::Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState, games_state: &mut TableState) {
    let area = f.area();

    // Outer vertical split: header | body | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // body
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_body(f, app, games_state, chunks[1]);
    render_footer(f, app, chunks[2]);
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match &app.status {
        ConnectionStatus::Connected => ("● connected".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 40)), Color::Red),
    };

    let run_color = match app.run.state.as_str() {
        "running" => Color::Green,
        "stopping" => Color::Yellow,
        _ => Color::DarkGray,
    };
    let run_text = match &app.run.progress {
        Some(p) if app.run.state == "running" => format!(
            "{} {}/{} ({} ok, {} failed)",
            app.run.state,
            p.index_in_cycle + 1,
            p.total_games,
            p.successful_samples,
            p.failed_samples
        ),
        _ => app.run.state.clone(),
    };

    let p95 = app.latency.p95_ms.map_or("—".to_string(), |v| format!("{v}ms p95"));

    let title_spans = vec![
        Span::styled(
            " CCU Watch  ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(run_text, Style::default().fg(run_color)),
        Span::raw("  │  "),
        Span::styled(
            format!("{} pending", app.health.undelivered_anomalies),
            Style::default().fg(if app.health.undelivered_anomalies > 0 {
                Color::Yellow
            } else {
                Color::White
            }),
        ),
        Span::raw("  │  "),
        Span::styled(
            format!("{} samples", app.health.samples_written),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(p95, Style::default().fg(Color::White)),
    ];

    let paragraph = Paragraph::new(Line::from(title_spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    f.render_widget(paragraph, area);
}

fn render_body(f: &mut Frame, app: &AppState, games_state: &mut TableState, area: Rect) {
    // Horizontal split: games (45%) | anomalies (55%)
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(area);

    render_games_table(f, app, games_state, halves[0]);
    render_anomalies_table(f, app, halves[1]);
}

fn render_games_table(f: &mut Frame, app: &AppState, state: &mut TableState, area: Rect) {
    let header_cells = ["#", "Game", "CCU", "Seen"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = app
        .games
        .iter()
        .enumerate()
        .map(|(i, g)| {
            let ccu = g.live.as_ref().and_then(|l| l.ccu);
            let seen = g
                .live
                .as_ref()
                .and_then(|l| l.observed_at_ms)
                .map_or("—".to_string(), format_time_ms);
            let failing = g.live.as_ref().is_some_and(|l| l.consecutive_failures > 0);
            let ccu_color = if failing { Color::Red } else { Color::Cyan };

            Row::new(vec![
                Cell::from(format!("{}", i + 1)).style(Style::default().fg(Color::DarkGray)),
                Cell::from(truncate(&g.title, 28)),
                Cell::from(format_ccu(ccu)).style(Style::default().fg(ccu_color)),
                Cell::from(seen).style(Style::default().fg(Color::DarkGray)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Min(10),
            Constraint::Length(8),
            Constraint::Length(8),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                " GAMES ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
    )
    .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD));

    f.render_stateful_widget(table, area, state);
}

fn render_anomalies_table(f: &mut Frame, app: &AppState, area: Rect) {
    let header_cells = ["Time", "Game", "", "Delta", "Mean", "Thr", "Sent"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = app
        .anomalies
        .iter()
        .map(|a| {
            let (arrow, color) = if a.direction == "up" {
                ("▲", Color::Green)
            } else {
                ("▼", Color::Red)
            };
            let sent = if a.delivered { "yes" } else { "pending" };
            let sent_color = if a.delivered { Color::DarkGray } else { Color::Yellow };

            Row::new(vec![
                Cell::from(format_time_ms(a.timestamp_ms)).style(Style::default().fg(Color::DarkGray)),
                Cell::from(truncate(&a.game_title, 22)),
                Cell::from(arrow).style(Style::default().fg(color)),
                Cell::from(format_delta(a.delta)).style(Style::default().fg(color)),
                Cell::from(format!("{:.1}", a.mean)),
                Cell::from(format!("{:.1}", a.threshold)),
                Cell::from(sent).style(Style::default().fg(sent_color)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(8),
            Constraint::Min(10),
            Constraint::Length(1),
            Constraint::Length(7),
            Constraint::Length(8),
            Constraint::Length(7),
            Constraint::Length(7),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                " RECENT ANOMALIES ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
    );

    f.render_widget(table, area);
}

fn render_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let mut spans = vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refresh  "),
        Span::styled("[s/x] ", Style::default().fg(Color::Yellow)),
        Span::raw("start/stop  "),
        Span::styled("[d] ", Style::default().fg(Color::Yellow)),
        Span::raw("deliver  "),
        Span::styled("[↑↓ / j k] ", Style::default().fg(Color::Yellow)),
        Span::raw("scroll  "),
    ];
    match &app.last_action {
        Some(msg) => spans.push(Span::styled(truncate(msg, 48), Style::default().fg(Color::Cyan))),
        None => spans.push(Span::styled("auto-refresh: 2s", Style::default().fg(Color::DarkGray))),
    }
    let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}
