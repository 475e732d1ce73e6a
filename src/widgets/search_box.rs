use ratatui::{
    buffer::Buffer,
    layout::{Rect, Layout, Direction, Constraint, Alignment},
    style::{Stylize, Style, Color},
    text::{Line, Span},
    widgets::{Block, BorderType, Paragraph, Widget, Clear},
};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind};

/// App name search input. Editing starts from the active filter; Enter hands
/// the new text back, Esc drops it.
pub struct SearchWidget {
    input: String,
    active: bool,
}

impl SearchWidget {
    pub fn new() -> Self {
        Self {
            input: String::new(),
            active: false,
        }
    }

    pub fn show(&mut self, current_filter: &str) {
        self.active = true;
        self.input = current_filter.to_string();
    }

    pub fn hide(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn handle_key_event(&mut self, key_event: KeyEvent) -> Option<String> {
        if !self.active || key_event.kind != KeyEventKind::Press {
            return None;
        }

        match key_event.code {
            KeyCode::Esc => {
                self.hide();
                None
            }
            KeyCode::Enter => {
                self.hide();
                Some(self.input.trim().to_string())
            }
            KeyCode::Char(c) => {
                self.input.push(c);
                None
            }
            KeyCode::Backspace => {
                self.input.pop();
                None
            }
            _ => None,
        }
    }
}

impl Widget for &SearchWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if !self.active {
            return;
        }

        let popup_width = area.width.min(50);
        let popup_height = 6;

        let hmargin = (area.width.saturating_sub(popup_width)) / 2;
        let vmargin = (area.height.saturating_sub(popup_height)) / 2;

        let popup_area = Rect {
            x: area.x + hmargin,
            y: area.y + vmargin,
            width: popup_width,
            height: popup_height.min(area.height),
        };

        Clear.render(popup_area, buf);

        let block = Block::bordered()
            .title("Search by app")
            .title_style(Style::new().bold().fg(Color::Yellow))
            .border_type(BorderType::Plain)
            .border_style(Style::new().fg(Color::Yellow));

        let inner_area = block.inner(popup_area);
        block.render(popup_area, buf);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),  // Input
                Constraint::Length(1),  // Empty space
                Constraint::Length(1),  // Instructions
            ])
            .split(inner_area);

        let input = Paragraph::new(Line::from(vec![
            Span::styled("/ ", Style::new().fg(Color::White)),
            Span::styled(format!("{}_", self.input), Style::new().fg(Color::Yellow)),
        ]));
        input.render(layout[0], buf);

        let instructions = Paragraph::new("Enter: Apply  |  Esc: Cancel")
            .style(Style::new().fg(Color::Gray))
            .alignment(Alignment::Center);
        instructions.render(layout[2], buf);
    }
}
