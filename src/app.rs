use std::cmp::Ordering;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{DefaultTerminal, Frame};
use tokio::runtime::Handle;

use crate::core::connection::{Connection, Direction as ConnDirection};
use crate::core::monitor::ConnectionMonitor;
use crate::widgets::{ConnectionTableWidget, HelpWidget, SearchWidget, SummaryWidget};

use ratatui::layout::{Layout, Direction, Constraint};
use ratatui::widgets::Paragraph;
use ratatui::style::{Style, Color};
use ratatui::text::{Span, Line};

const INPUT_POLL: Duration = Duration::from_millis(100);
const RESCAN_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    App,
    Ping,
    Loss,
    TxRate,
    RxRate,
    State,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::App => "App",
            SortField::Ping => "Ping",
            SortField::Loss => "Loss",
            SortField::TxRate => "TX",
            SortField::RxRate => "RX",
            SortField::State => "State",
        }
    }

    fn compare(&self, a: &Connection, b: &Connection) -> Ordering {
        match self {
            SortField::App => a.app_name.to_lowercase().cmp(&b.app_name.to_lowercase()),
            SortField::Ping => a.ping.cmp(&b.ping),
            SortField::Loss => a.loss.total_cmp(&b.loss),
            SortField::TxRate => a.tx_rate.total_cmp(&b.tx_rate),
            SortField::RxRate => a.rx_rate.total_cmp(&b.rx_rate),
            SortField::State => a.state.as_str().cmp(b.state.as_str()),
        }
    }
}

fn direction_rank(direction: ConnDirection) -> u8 {
    match direction {
        ConnDirection::Outbound => 0,
        ConnDirection::Inbound => 1,
    }
}

/// Orders by `field`, then outbound before inbound. The direction tie-break
/// does not flip with `ascending`.
pub fn sort_connections(connections: &mut [Connection], field: SortField, ascending: bool) {
    connections.sort_by(|a, b| {
        let primary = field.compare(a, b);
        let primary = if ascending { primary } else { primary.reverse() };

        primary
            .then_with(|| direction_rank(a.direction).cmp(&direction_rank(b.direction)))
            .then_with(|| a.pid.cmp(&b.pid))
            .then_with(|| a.local_port.cmp(&b.local_port))
            .then_with(|| a.remote_addr.cmp(&b.remote_addr))
            .then_with(|| a.remote_port.cmp(&b.remote_port))
    });
}

pub struct App {
    pub table_widget: ConnectionTableWidget,
    pub summary_widget: SummaryWidget,
    pub search_widget: SearchWidget,
    pub monitor: Arc<ConnectionMonitor>,
    pub runtime: Handle,
    pub current_filter: String,
    pub sort_field: SortField,
    pub sort_ascending: bool,
    pub paused: bool,
    pub show_help: bool,
    pub exit: bool,
    pub last_tick: Instant,
    pub tick_rate: Duration,
}

impl App {
    pub fn new(monitor: Arc<ConnectionMonitor>, runtime: Handle) -> Self {
        App {
            table_widget: ConnectionTableWidget::new(),
            summary_widget: SummaryWidget::new(monitor.source_name()),
            search_widget: SearchWidget::new(),
            monitor,
            runtime,
            current_filter: String::new(),
            sort_field: SortField::App,
            sort_ascending: true,
            paused: false,
            show_help: false,
            exit: false,
            last_tick: Instant::now(),
            tick_rate: Duration::from_secs(2),
        }
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.current_filter = filter.unwrap_or_default();
        self
    }

    pub fn with_tick_rate(mut self, tick_rate: Duration) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    pub fn run(&mut self, terminal: &mut DefaultTerminal) -> io::Result<()> {
        self.refresh_rows();

        while !self.exit {
            let timeout = self.tick_rate
                .checked_sub(self.last_tick.elapsed())
                .unwrap_or(Duration::ZERO)
                .min(INPUT_POLL);

            if event::poll(timeout)? {
                self.handle_events()?;
            }

            if self.last_tick.elapsed() >= self.tick_rate {
                self.tick();
                self.last_tick = Instant::now();
            }

            terminal.draw(|frame| self.draw(frame))?;
        }
        Ok(())
    }

    fn tick(&mut self) {
        if !self.paused {
            self.refresh_rows();
        }
    }

    fn refresh_rows(&mut self) {
        let mut rows = self.monitor.search(&self.current_filter);
        sort_connections(&mut rows, self.sort_field, self.sort_ascending);

        self.summary_widget.update(&rows);
        self.table_widget.set_sort(self.sort_field, self.sort_ascending);
        self.table_widget.set_rows(rows);
    }

    fn resort(&mut self) {
        let mut rows = self.table_widget.rows().to_vec();
        sort_connections(&mut rows, self.sort_field, self.sort_ascending);
        self.table_widget.set_sort(self.sort_field, self.sort_ascending);
        self.table_widget.set_rows(rows);
    }

    fn rescan(&mut self) {
        let monitor = Arc::clone(&self.monitor);
        self.runtime.spawn(async move {
            monitor.scan().await;
        });
        // Re-read shortly after the scan has had time to land
        self.last_tick = Instant::now()
            .checked_sub(self.tick_rate.saturating_sub(RESCAN_SETTLE))
            .unwrap_or_else(Instant::now);
    }

    fn draw(&self, frame: &mut Frame) {
        let main_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4),   // Summary
                Constraint::Min(5),      // Connections
                Constraint::Length(1),   // Status bar
            ])
            .margin(1)
            .split(frame.area());

        frame.render_widget(&self.summary_widget, main_chunks[0]);
        frame.render_widget(&self.table_widget, main_chunks[1]);

        let mut status_text = Vec::new();

        let filter_str = if self.current_filter.is_empty() {
            "No search active".to_string()
        } else {
            format!("Search: {}", self.current_filter)
        };
        status_text.push(Span::styled(filter_str, Style::default().fg(Color::Yellow)));
        status_text.push(Span::raw(" | "));

        let sort_str = format!(
            "Sort: {} ({})",
            self.sort_field.as_str(),
            if self.sort_ascending { "asc" } else { "desc" }
        );
        status_text.push(Span::styled(sort_str, Style::default().fg(Color::Cyan)));
        status_text.push(Span::raw(" | "));

        if self.paused {
            status_text.push(Span::styled("PAUSED", Style::default().fg(Color::Red)));
            status_text.push(Span::raw(" | "));
        }
        if !self.monitor.config().ping_enabled {
            status_text.push(Span::styled("Ping off", Style::default().fg(Color::DarkGray)));
            status_text.push(Span::raw(" | "));
        }

        for (key, action) in [
            ("/", ": Search "),
            ("c", ": Clear "),
            ("p", ": Pause "),
            ("r", ": Refresh "),
            ("1-6", ": Sort "),
            ("?", ": Help "),
            ("q", ": Quit"),
        ] {
            status_text.push(Span::styled(key, Style::default().fg(Color::Green)));
            status_text.push(Span::raw(action));
        }

        let status_bar = Paragraph::new(Line::from(status_text));
        frame.render_widget(status_bar, main_chunks[2]);

        if self.search_widget.is_active() {
            frame.render_widget(&self.search_widget, frame.area());
        } else if self.show_help {
            frame.render_widget(&HelpWidget, frame.area());
        }
    }

    fn handle_events(&mut self) -> io::Result<()> {
        if let Event::Key(key_event) = event::read()? {
            if key_event.kind == KeyEventKind::Press {
                self.handle_key_event(key_event);
            }
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        if key_event.modifiers.contains(KeyModifiers::CONTROL) && key_event.code == KeyCode::Char('c') {
            self.exit();
            return;
        }

        if self.search_widget.is_active() {
            if let Some(new_filter) = self.search_widget.handle_key_event(key_event) {
                self.apply_filter(new_filter);
            }
            return;
        }

        if self.show_help {
            self.show_help = false;
            return;
        }

        match key_event.code {
            KeyCode::Char('q') => self.exit(),
            KeyCode::Char('/') => self.search_widget.show(&self.current_filter),
            KeyCode::Char('c') => self.apply_filter(String::new()),
            KeyCode::Char('p') => self.toggle_pause(),
            KeyCode::Char('r') => self.rescan(),
            KeyCode::Char('?') => self.show_help = true,
            KeyCode::Char('1') => self.toggle_sort(SortField::App),
            KeyCode::Char('2') => self.toggle_sort(SortField::Ping),
            KeyCode::Char('3') => self.toggle_sort(SortField::Loss),
            KeyCode::Char('4') => self.toggle_sort(SortField::TxRate),
            KeyCode::Char('5') => self.toggle_sort(SortField::RxRate),
            KeyCode::Char('6') => self.toggle_sort(SortField::State),
            KeyCode::Up | KeyCode::Char('k') => self.table_widget.select_prev(1),
            KeyCode::Down | KeyCode::Char('j') => self.table_widget.select_next(1),
            KeyCode::PageUp => {
                let page = self.table_widget.page_size();
                self.table_widget.select_prev(page);
            }
            KeyCode::PageDown => {
                let page = self.table_widget.page_size();
                self.table_widget.select_next(page);
            }
            KeyCode::Home | KeyCode::Char('g') => self.table_widget.select_first(),
            KeyCode::End | KeyCode::Char('G') => self.table_widget.select_last(),
            _ => {}
        }
    }

    fn toggle_sort(&mut self, field: SortField) {
        if self.sort_field == field {
            self.sort_ascending = !self.sort_ascending;
        } else {
            self.sort_field = field;
            self.sort_ascending = true;
        }
        self.resort();
    }

    fn toggle_pause(&mut self) {
        self.paused = !self.paused;
        self.summary_widget.set_paused(self.paused);
        if !self.paused {
            self.refresh_rows();
        }
    }

    fn apply_filter(&mut self, filter: String) {
        self.current_filter = filter;
        self.table_widget.select_first();
        self.refresh_rows();
    }

    fn exit(&mut self) {
        self.exit = true
    }
}
