use std::collections::VecDeque;
use std::io::{Write, stdout};

use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};
use medbot_core::channel::{Channel, ChannelError, ChannelMessage};

use crate::line_editor::{self, ReadLineResult};

const PROMPT: &str = "You: ";
const MAX_HISTORY: usize = 1000;

/// In-memory input history for Up/Down recall. Never written to disk.
#[derive(Debug, Default)]
struct InputHistory {
    entries: VecDeque<String>,
}

impl InputHistory {
    fn add(&mut self, line: &str) {
        if line.is_empty() || self.entries.back().is_some_and(|last| last == line) {
            return;
        }
        if self.entries.len() == MAX_HISTORY {
            self.entries.pop_front();
        }
        self.entries.push_back(line.to_owned());
    }

    fn snapshot(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }
}

/// Terminal channel: raw-mode line input on stdin, answers on stdout.
#[derive(Debug, Default)]
pub struct CliChannel {
    history: InputHistory,
    status_shown: bool,
}

impl CliChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn show_status(&mut self, text: &str) -> Result<(), ChannelError> {
        let mut out = stdout();
        write!(out, "\r{}", Clear(ClearType::CurrentLine))?;
        if !text.is_empty() {
            write!(out, "{}", text.dim())?;
        }
        out.flush()?;
        self.status_shown = !text.is_empty();
        Ok(())
    }
}

/// `exit` and `quit` end the chat like Ctrl-D does.
fn is_exit_word(line: &str) -> bool {
    matches!(line, "exit" | "quit")
}

impl Channel for CliChannel {
    async fn recv(&mut self) -> Result<Option<ChannelMessage>, ChannelError> {
        let entries = self.history.snapshot();
        let result = tokio::task::spawn_blocking(move || line_editor::read_line(PROMPT, &entries))
            .await
            .map_err(|e| ChannelError::Other(e.to_string()))??;

        let line = match result {
            ReadLineResult::Interrupted | ReadLineResult::Eof => {
                tracing::debug!("terminal input closed");
                return Ok(None);
            }
            ReadLineResult::Line(l) => l,
        };

        let trimmed = line.trim();
        if is_exit_word(trimmed) {
            tracing::debug!("exit requested");
            return Ok(None);
        }
        self.history.add(trimmed);

        // blank lines go through so the chat loop can explain the rejection
        Ok(Some(ChannelMessage {
            text: trimmed.to_owned(),
        }))
    }

    async fn send(&mut self, text: &str) -> Result<(), ChannelError> {
        if self.status_shown {
            self.show_status("")?;
        }
        println!("{} {text}", "MedBot:".bold());
        Ok(())
    }

    async fn send_typing(&mut self) -> Result<(), ChannelError> {
        self.show_status("MedBot is typing...")
    }

    async fn send_status(&mut self, text: &str) -> Result<(), ChannelError> {
        if text.is_empty() && !self.status_shown {
            return Ok(());
        }
        self.show_status(text)
    }

    async fn confirm(&mut self, prompt: &str) -> Result<bool, ChannelError> {
        let prompt = format!("{prompt} [y/N]: ");
        let result = tokio::task::spawn_blocking(move || line_editor::read_line(&prompt, &[]))
            .await
            .map_err(|e| ChannelError::Other(e.to_string()))??;

        match result {
            ReadLineResult::Line(line) => Ok(line.trim().eq_ignore_ascii_case("y")),
            ReadLineResult::Interrupted | ReadLineResult::Eof => Ok(false),
        }
    }
}
