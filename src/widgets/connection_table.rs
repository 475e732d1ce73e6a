use std::cell::Cell as StdCell;
use std::net::SocketAddr;
use std::time::Duration;

use ratatui::{
    buffer::Buffer,
    layout::{Rect, Constraint},
    style::{Stylize, Style, Color},
    widgets::{Block, Table, Row, Cell, Widget, BorderType},
};

use crate::app::SortField;
use crate::core::connection::{Connection, Direction};
use crate::core::utils::{format_age, format_bytes, format_ping, format_rate};

// Borders, header and its margin
const TABLE_CHROME_ROWS: u16 = 4;

pub fn ping_color(rtt: Duration, ping_count: u32) -> Color {
    if ping_count == 0 || rtt.is_zero() {
        return Color::DarkGray;
    }
    match rtt.as_millis() {
        0..=49 => Color::Green,
        50..=149 => Color::Yellow,
        _ => Color::Red,
    }
}

pub fn loss_color(loss: f64, ping_count: u32) -> Color {
    if ping_count == 0 {
        Color::DarkGray
    } else if loss < 1.0 {
        Color::Green
    } else if loss < 10.0 {
        Color::Yellow
    } else {
        Color::Red
    }
}

pub struct ConnectionTableWidget {
    rows: Vec<Connection>,
    selected: usize,
    scroll_offset: usize,
    sort_field: SortField,
    ascending: bool,
    // Written during render so key handling knows the page size
    visible_rows: StdCell<usize>,
}

impl ConnectionTableWidget {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            selected: 0,
            scroll_offset: 0,
            sort_field: SortField::App,
            ascending: true,
            visible_rows: StdCell::new(15),
        }
    }

    pub fn set_rows(&mut self, rows: Vec<Connection>) {
        self.rows = rows;
        if self.selected >= self.rows.len() {
            self.selected = self.rows.len().saturating_sub(1);
        }
        self.keep_selection_visible();
    }

    pub fn rows(&self) -> &[Connection] {
        &self.rows
    }

    pub fn set_sort(&mut self, field: SortField, ascending: bool) {
        self.sort_field = field;
        self.ascending = ascending;
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn select_prev(&mut self, amount: usize) {
        self.selected = self.selected.saturating_sub(amount);
        self.keep_selection_visible();
    }

    pub fn select_next(&mut self, amount: usize) {
        let last = self.rows.len().saturating_sub(1);
        self.selected = (self.selected + amount).min(last);
        self.keep_selection_visible();
    }

    pub fn select_first(&mut self) {
        self.selected = 0;
        self.scroll_offset = 0;
    }

    pub fn select_last(&mut self) {
        self.selected = self.rows.len().saturating_sub(1);
        self.keep_selection_visible();
    }

    pub fn page_size(&self) -> usize {
        self.visible_rows.get().max(1)
    }

    fn keep_selection_visible(&mut self) {
        let visible = self.page_size();
        if self.selected < self.scroll_offset {
            self.scroll_offset = self.selected;
        } else if self.selected >= self.scroll_offset + visible {
            self.scroll_offset = self.selected + 1 - visible;
        }
        let max_scroll = self.rows.len().saturating_sub(visible);
        self.scroll_offset = self.scroll_offset.min(max_scroll);
    }

    fn header_label(&self, field: SortField, label: &str) -> String {
        if self.sort_field == field {
            let arrow = if self.ascending { "▲" } else { "▼" };
            format!("{}{}", label, arrow)
        } else {
            label.to_string()
        }
    }
}

impl Widget for &ConnectionTableWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let visible_rows = area.height.saturating_sub(TABLE_CHROME_ROWS) as usize;
        self.visible_rows.set(visible_rows);

        let total_rows = self.rows.len();
        let mut start_idx = self.scroll_offset.min(total_rows);
        if visible_rows > 0 && self.selected >= start_idx + visible_rows {
            start_idx = self.selected + 1 - visible_rows;
        }
        let end_idx = (start_idx + visible_rows).min(total_rows);

        let rows: Vec<Row> = self.rows[start_idx..end_idx].iter().enumerate().map(|(offset, conn)| {
            let direction_style = match conn.direction {
                Direction::Outbound => Style::new().fg(Color::Cyan),
                Direction::Inbound => Style::new().fg(Color::Magenta),
            };
            let loss = if conn.ping_count == 0 {
                "-".to_string()
            } else {
                format!("{:.0}%", conn.loss)
            };
            let loss_style = Style::new().fg(loss_color(conn.loss, conn.ping_count));

            let row = Row::new(vec![
                Cell::from(conn.pid.to_string()),
                Cell::from(conn.app_name.clone()),
                Cell::from(format_ping(conn.ping, conn.ping_count))
                    .style(Style::new().fg(ping_color(conn.ping, conn.ping_count))),
                Cell::from(loss).style(loss_style),
                Cell::from(conn.direction.as_str()).style(direction_style),
                Cell::from(conn.protocol.as_str()),
                Cell::from(SocketAddr::new(conn.local_addr, conn.local_port).to_string()),
                Cell::from(SocketAddr::new(conn.remote_addr, conn.remote_port).to_string()),
                Cell::from(conn.state.as_str()),
                Cell::from(format_rate(conn.tx_rate)),
                Cell::from(format_rate(conn.rx_rate)),
                Cell::from(format_age(conn.age)),
            ]);

            if start_idx + offset == self.selected {
                row.style(Style::new().bg(Color::DarkGray).bold())
            } else {
                row
            }
        }).collect();

        let widths = [
            Constraint::Length(7),       // PID
            Constraint::Percentage(14),  // App
            Constraint::Length(7),       // Ping
            Constraint::Length(5),       // Loss
            Constraint::Length(4),       // Dir
            Constraint::Length(5),       // Proto
            Constraint::Percentage(18),  // Local
            Constraint::Percentage(22),  // Remote
            Constraint::Length(12),      // State
            Constraint::Length(10),      // TX
            Constraint::Length(10),      // RX
            Constraint::Length(7),       // Age
        ];

        let title = match self.rows.get(self.selected()) {
            Some(conn) => format!(
                "Connections ({}) | {} pid {}: {} sent, {} received",
                total_rows,
                conn.app_name,
                conn.pid,
                format_bytes(conn.tx_bytes),
                format_bytes(conn.rx_bytes),
            ),
            None => format!("Connections ({})", total_rows),
        };

        let table = Table::new(rows, widths)
            .header(
                Row::new(vec![
                    "PID".to_string(),
                    self.header_label(SortField::App, "App"),
                    self.header_label(SortField::Ping, "Ping"),
                    self.header_label(SortField::Loss, "Loss"),
                    "Dir".to_string(),
                    "Proto".to_string(),
                    "Local".to_string(),
                    "Remote".to_string(),
                    self.header_label(SortField::State, "State"),
                    self.header_label(SortField::TxRate, "TX/s"),
                    self.header_label(SortField::RxRate, "RX/s"),
                    "Age".to_string(),
                ])
                .style(Style::new().bold().fg(Color::White))
                .bottom_margin(1)
            )
            .block(
                Block::bordered()
                    .title(title)
                    .title_style(Style::new().bold().fg(Color::Cyan))
                    .border_type(BorderType::Plain)
                    .border_style(Style::new().fg(Color::Blue))
            );

        table.render(area, buf);
    }
}
