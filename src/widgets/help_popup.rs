use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Stylize, Style, Color},
    text::{Line, Span, Text},
    widgets::{Block, BorderType, Paragraph, Widget, Clear},
};

const BINDINGS: &[(&str, &str)] = &[
    ("/", "Search by app name"),
    ("c", "Clear search"),
    ("p", "Pause / resume updates"),
    ("r", "Rescan now"),
    ("1-6", "Sort by App, Ping, Loss, TX, RX, State"),
    ("", "(press again to reverse)"),
    ("↑↓ / j k", "Move selection"),
    ("PgUp PgDn", "Move one page"),
    ("g / G", "First / last row"),
    ("?", "Toggle this help"),
    ("q / Ctrl+C", "Quit"),
];

pub struct HelpWidget;

impl Widget for &HelpWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let popup_width = area.width.min(56);
        let popup_height = (BINDINGS.len() as u16 + 4).min(area.height);

        let popup_area = Rect {
            x: area.x + (area.width.saturating_sub(popup_width)) / 2,
            y: area.y + (area.height.saturating_sub(popup_height)) / 2,
            width: popup_width,
            height: popup_height,
        };

        Clear.render(popup_area, buf);

        let mut lines = vec![Line::raw("")];
        lines.extend(BINDINGS.iter().map(|(key, action)| {
            Line::from(vec![
                Span::styled(format!("  {:<12}", key), Style::new().fg(Color::Green).bold()),
                Span::raw(*action),
            ])
        }));

        Paragraph::new(Text::from(lines))
            .block(
                Block::bordered()
                    .title("Keys (any key to close)")
                    .title_style(Style::new().bold().fg(Color::Yellow))
                    .border_type(BorderType::Plain)
                    .border_style(Style::new().fg(Color::Yellow))
            )
            .render(popup_area, buf);
    }
}
