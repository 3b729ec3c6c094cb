use std::{
    collections::VecDeque,
    sync::mpsc::{Receiver, TryRecvError},
    time::Duration,
};

use anyhow::Result;
use crossterm::{
    event::{self, Event as CEvent, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use driftwatch_types::events::{EventPayload, LifecyclePhase, LoopEvent};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame, Terminal,
};

const MAX_LOG_ENTRIES: usize = 120;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub enum UiMessage {
    Event(LoopEvent),
    Shutdown,
}

/// Everything the status view shows, folded from loop events.
#[derive(Debug, Default)]
struct StatusView {
    phase: Option<LifecyclePhase>,
    rendered: u64,
    failures: u64,
    last_tick: u64,
    changed_pixels: u64,
    last_total_ms: Option<u64>,
    log: VecDeque<String>,
}

impl StatusView {
    fn apply(&mut self, event: &LoopEvent) {
        match &event.payload {
            EventPayload::Lifecycle(lifecycle) => self.phase = Some(lifecycle.phase),
            EventPayload::Tick(tick) => {
                self.rendered += 1;
                self.last_tick = tick.tick;
                self.changed_pixels = tick.changed_pixels;
                self.last_total_ms = Some(tick.latency.total_ms);
            }
            EventPayload::Failure(failure) => {
                self.failures += 1;
                self.last_tick = self.last_tick.max(failure.tick);
            }
            EventPayload::Batch(_) | EventPayload::Unknown(_) => {}
        }
        if self.log.len() == MAX_LOG_ENTRIES {
            self.log.pop_front();
        }
        self.log.push_back(format_event(event));
    }

    fn finished(&self) -> bool {
        self.phase == Some(LifecyclePhase::Shutdown)
    }

    fn status_line(&self) -> String {
        let phase = match self.phase {
            None => "starting",
            Some(LifecyclePhase::Boot) => "booting",
            Some(LifecyclePhase::Running) => "recording",
            Some(LifecyclePhase::Shutdown) => "stopped",
        };
        let latency = self
            .last_total_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".into());
        format!(
            "{phase} · tick {} · {} rendered · {} failed · {} px changed · {latency}",
            self.last_tick, self.rendered, self.failures, self.changed_pixels
        )
    }
}

pub fn run(receiver: Receiver<UiMessage>, summary: String) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;

    let res = run_loop(&mut terminal, receiver, summary.as_str());

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    res
}

fn run_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    receiver: Receiver<UiMessage>,
    summary: &str,
) -> Result<()> {
    let mut view = StatusView::default();
    loop {
        let closed = drain(&receiver, &mut view);
        terminal.draw(|f| draw(f, &view, summary))?;
        if closed || view.finished() {
            return Ok(());
        }
        if event::poll(POLL_INTERVAL)? {
            if let CEvent::Key(key) = event::read()? {
                if stop_requested(key) {
                    return Ok(());
                }
            }
        }
    }
}

/// Apply every queued event; true once the sender side is done.
fn drain(receiver: &Receiver<UiMessage>, view: &mut StatusView) -> bool {
    loop {
        match receiver.try_recv() {
            Ok(UiMessage::Event(event)) => view.apply(&event),
            Ok(UiMessage::Shutdown) | Err(TryRecvError::Disconnected) => return true,
            Err(TryRecvError::Empty) => return false,
        }
    }
}

/// Raw mode swallows SIGINT, so Ctrl-C arrives as a key press.
fn stop_requested(key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

fn draw(f: &mut Frame, view: &StatusView, summary: &str) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(0)].as_ref())
        .split(f.size());
    draw_header(f, chunks[0], view, summary);

    let items: Vec<ListItem> = view
        .log
        .iter()
        .rev()
        .map(|entry| ListItem::new(entry.as_str()))
        .collect();
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Recent events"));
    f.render_widget(list, chunks[1]);
}

fn draw_header(f: &mut Frame, area: Rect, view: &StatusView, summary: &str) {
    let header = Paragraph::new(vec![
        Line::from(vec![
            Span::styled(
                "Driftwatch",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            Span::raw(view.status_line()),
        ]),
        Line::from(vec![
            Span::styled("config:", Style::default().fg(Color::Magenta)),
            Span::raw(" "),
            Span::raw(summary),
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Yellow)),
            Span::raw(" to stop"),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).title("Recording"));
    f.render_widget(header, area);
}

fn format_event(event: &LoopEvent) -> String {
    let timestamp = event.timestamp.format("%H:%M:%S");
    match &event.payload {
        EventPayload::Lifecycle(lifecycle) => format!(
            "[{}] Lifecycle::{:?} {}",
            timestamp,
            lifecycle.phase,
            lifecycle.details.clone().unwrap_or_default()
        ),
        EventPayload::Tick(tick) => format!(
            "[{}] Tick #{} changed={} capture={}ms process={}ms render={}ms total={}ms",
            timestamp,
            tick.tick,
            tick.changed_pixels,
            tick.latency.capture_ms,
            tick.latency.process_ms,
            tick.latency.render_ms,
            tick.latency.total_ms
        ),
        EventPayload::Failure(failure) => format!(
            "[{}] {} failure (tick {}, {}): {}",
            timestamp,
            failure.stage,
            failure.tick,
            if failure.continuing { "continuing" } else { "stopping" },
            failure.message
        ),
        EventPayload::Batch(pair) => format!(
            "[{}] Batch {} vs {} score={}",
            timestamp, pair.first, pair.second, pair.score
        ),
        EventPayload::Unknown(value) => format!("[{}] Unknown payload {}", timestamp, value),
    }
}
