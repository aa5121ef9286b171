use std::io::{self, Write, stdout};

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{self, ClearType},
};

#[derive(Debug, PartialEq, Eq)]
pub enum ReadLineResult {
    Line(String),
    Interrupted,
    Eof,
}

struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Editable line plus the history cursor. Positions are in chars, not bytes.
#[derive(Debug, Default)]
struct LineState {
    input: String,
    cursor: usize,
    history_index: Option<usize>,
    draft: String,
}

impl LineState {
    /// Apply one key press. Returns `Some` when the line is finished.
    fn apply(&mut self, key: KeyEvent, history: &[String]) -> Option<ReadLineResult> {
        match (key.modifiers, key.code) {
            (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                return Some(ReadLineResult::Interrupted);
            }
            (KeyModifiers::CONTROL, KeyCode::Char('d')) => {
                if self.input.is_empty() {
                    return Some(ReadLineResult::Eof);
                }
            }
            (_, KeyCode::Enter) => {
                return Some(ReadLineResult::Line(std::mem::take(&mut self.input)));
            }
            (KeyModifiers::CONTROL, KeyCode::Char('a')) | (_, KeyCode::Home) => self.cursor = 0,
            (KeyModifiers::CONTROL, KeyCode::Char('e')) | (_, KeyCode::End) => {
                self.cursor = self.len();
            }
            (KeyModifiers::CONTROL, KeyCode::Char('u')) => {
                self.input.clear();
                self.cursor = 0;
            }
            (KeyModifiers::ALT, KeyCode::Backspace)
            | (KeyModifiers::CONTROL, KeyCode::Char('w')) => self.delete_word(),
            (_, KeyCode::Backspace) => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    let off = self.byte_offset(self.cursor);
                    self.input.remove(off);
                }
            }
            (_, KeyCode::Delete) => {
                if self.cursor < self.len() {
                    let off = self.byte_offset(self.cursor);
                    self.input.remove(off);
                }
            }
            (_, KeyCode::Left) => self.cursor = self.cursor.saturating_sub(1),
            (_, KeyCode::Right) => self.cursor = (self.cursor + 1).min(self.len()),
            (_, KeyCode::Up) => self.history_up(history),
            (_, KeyCode::Down) => self.history_down(history),
            (_, KeyCode::Char(c)) => {
                let off = self.byte_offset(self.cursor);
                self.input.insert(off, c);
                self.cursor += 1;
            }
            _ => {}
        }
        None
    }

    fn len(&self) -> usize {
        self.input.chars().count()
    }

    fn byte_offset(&self, char_idx: usize) -> usize {
        self.input
            .char_indices()
            .nth(char_idx)
            .map_or(self.input.len(), |(i, _)| i)
    }

    fn delete_word(&mut self) {
        let chars: Vec<char> = self.input.chars().collect();
        let mut i = self.cursor;
        while i > 0 && !chars[i - 1].is_alphanumeric() {
            i -= 1;
        }
        while i > 0 && chars[i - 1].is_alphanumeric() {
            i -= 1;
        }
        let start = self.byte_offset(i);
        let end = self.byte_offset(self.cursor);
        self.input.drain(start..end);
        self.cursor = i;
    }

    /// Step back through entries that start with what was typed before browsing.
    fn history_up(&mut self, history: &[String]) {
        let searched = match self.history_index {
            None => {
                self.draft.clone_from(&self.input);
                history
            }
            Some(i) => &history[..i],
        };
        let prefix = self.draft.as_str();
        let Some(idx) = searched.iter().rposition(|e| e.starts_with(prefix)) else {
            return;
        };
        self.history_index = Some(idx);
        self.input.clone_from(&history[idx]);
        self.cursor = self.len();
    }

    fn history_down(&mut self, history: &[String]) {
        let Some(i) = self.history_index else { return };
        let prefix = self.draft.as_str();
        let next = history[i + 1..]
            .iter()
            .position(|e| e.starts_with(prefix))
            .map(|offset| i + 1 + offset);
        if let Some(idx) = next {
            self.history_index = Some(idx);
            self.input.clone_from(&history[idx]);
        } else {
            self.history_index = None;
            self.input = std::mem::take(&mut self.draft);
        }
        self.cursor = self.len();
    }
}

/// Read one line in raw mode. Blocks; call from `spawn_blocking`.
pub fn read_line(prompt: &str, history: &[String]) -> io::Result<ReadLineResult> {
    let _guard = RawModeGuard::enter()?;
    let mut state = LineState::default();

    render(prompt, &state)?;
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        // Windows reports release and repeat events too
        if key.kind != KeyEventKind::Press {
            continue;
        }
        if let Some(result) = state.apply(key, history) {
            write!(stdout(), "\r\n")?;
            stdout().flush()?;
            return Ok(result);
        }
        render(prompt, &state)?;
    }
}

fn render(prompt: &str, state: &LineState) -> io::Result<()> {
    let mut out = stdout();
    let before_cursor: String = state.input.chars().take(state.cursor).collect();
    let col = display_width(prompt) + display_width(&before_cursor);
    write!(
        out,
        "\r{}{}{}{}",
        terminal::Clear(ClearType::CurrentLine),
        prompt,
        state.input,
        cursor::MoveToColumn(u16::try_from(col).unwrap_or(u16::MAX)),
    )?;
    out.flush()
}

fn display_width(s: &str) -> usize {
    use unicode_width::UnicodeWidthStr;
    UnicodeWidthStr::width(s)
}
