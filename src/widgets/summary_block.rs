use std::time::Duration;

use ratatui::{
    buffer::Buffer,
    layout::{Rect, Alignment},
    style::{Stylize, Style, Color},
    text::{Line, Span, Text},
    widgets::{Block, Paragraph, Widget, BorderType},
};

use crate::core::connection::{Connection, ConnState, Direction};
use crate::core::utils::{format_ping, format_rate};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub total: usize,
    pub established: usize,
    pub inbound: usize,
    pub outbound: usize,
    /// Mean of the latest ping over connections that have been probed
    pub mean_ping: Option<Duration>,
    pub tx_rate: f64,
    pub rx_rate: f64,
}

impl Summary {
    pub fn from_connections(connections: &[Connection]) -> Self {
        let mut summary = Summary {
            total: connections.len(),
            ..Summary::default()
        };

        let mut ping_total = Duration::ZERO;
        let mut probed: u32 = 0;

        for conn in connections {
            if conn.state == ConnState::Established {
                summary.established += 1;
            }
            match conn.direction {
                Direction::Inbound => summary.inbound += 1,
                Direction::Outbound => summary.outbound += 1,
            }
            if conn.ping_count > 0 && !conn.ping.is_zero() {
                ping_total += conn.ping;
                probed += 1;
            }
            summary.tx_rate += conn.tx_rate;
            summary.rx_rate += conn.rx_rate;
        }

        if probed > 0 {
            summary.mean_ping = Some(ping_total / probed);
        }
        summary
    }
}

pub struct SummaryWidget {
    summary: Summary,
    source: &'static str,
    paused: bool,
}

impl SummaryWidget {
    pub fn new(source: &'static str) -> Self {
        Self {
            summary: Summary::default(),
            source,
            paused: false,
        }
    }

    pub fn update(&mut self, connections: &[Connection]) {
        self.summary = Summary::from_connections(connections);
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }
}

impl Widget for &SummaryWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let value = Style::default().fg(Color::Green).bold();
        let summary = &self.summary;

        let mean_ping = match summary.mean_ping {
            Some(ping) => format_ping(ping, 1),
            None => "-".to_string(),
        };

        let text = Text::from(vec![
            Line::from(vec![
                Span::raw("Connections: "),
                Span::styled(summary.total.to_string(), value),
                Span::raw("  Established: "),
                Span::styled(summary.established.to_string(), value),
                Span::raw("  Out: "),
                Span::styled(summary.outbound.to_string(), Style::default().fg(Color::Cyan).bold()),
                Span::raw("  In: "),
                Span::styled(summary.inbound.to_string(), Style::default().fg(Color::Magenta).bold()),
            ]),
            Line::from(vec![
                Span::raw("Avg ping: "),
                Span::styled(mean_ping, value),
                Span::raw("  TX: "),
                Span::styled(format_rate(summary.tx_rate), value),
                Span::raw("  RX: "),
                Span::styled(format_rate(summary.rx_rate), value),
                Span::raw("  Source: "),
                Span::raw(self.source),
            ]),
        ]);

        let title = if self.paused { "pingtrack [PAUSED]" } else { "pingtrack" };
        let title_color = if self.paused { Color::Yellow } else { Color::Cyan };

        let paragraph = Paragraph::new(text)
            .block(
                Block::bordered()
                    .title(title)
                    .title_style(Style::new().bold().fg(title_color))
                    .border_type(BorderType::Plain)
                    .border_style(Style::new().fg(Color::Blue))
            )
            .alignment(Alignment::Left);

        paragraph.render(area, buf);
    }
}
