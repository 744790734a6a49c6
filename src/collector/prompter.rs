// file: src/collector/prompter.rs
// version: 1.0.0
// guid: 2d4f6a8c-0e2b-4c5d-9f1a-3b5d7f9a1c3e

//! Operator prompts
//!
//! [`InquirePrompter`] talks to the terminal; [`ScriptedPrompter`] replays
//! canned answers so collection logic can be exercised without a TTY.

use crate::error::AutoInstallError;
use crate::executor::Secret;
use crate::Result;
use colored::Colorize;
use inquire::{Confirm, MultiSelect, Password, PasswordDisplayMode, Select, Text};
use std::collections::VecDeque;

pub trait Prompter: Send {
    fn text(&mut self, message: &str, default: Option<&str>, help: Option<&str>) -> Result<String>;

    /// Masked single entry; confirmation is handled by the caller
    fn secret(&mut self, message: &str) -> Result<Secret>;

    /// Index of the chosen option
    fn select(&mut self, message: &str, options: &[String], default: usize) -> Result<usize>;

    /// Indices of the chosen options
    fn multi_select(&mut self, message: &str, options: &[String]) -> Result<Vec<usize>>;

    fn confirm(&mut self, message: &str, default: bool) -> Result<bool>;

    /// Show a message that needs no answer
    fn notice(&mut self, message: &str);
}

/// Terminal prompts backed by `inquire`
#[derive(Debug, Default)]
pub struct InquirePrompter;

impl InquirePrompter {
    pub fn new() -> Self {
        Self
    }
}

impl Prompter for InquirePrompter {
    fn text(&mut self, message: &str, default: Option<&str>, help: Option<&str>) -> Result<String> {
        let mut prompt = Text::new(message);
        if let Some(default) = default {
            prompt = prompt.with_default(default);
        }
        if let Some(help) = help {
            prompt = prompt.with_help_message(help);
        }
        Ok(prompt.prompt()?)
    }

    fn secret(&mut self, message: &str) -> Result<Secret> {
        let value = Password::new(message)
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .prompt()?;
        Ok(Secret::new(value))
    }

    fn select(&mut self, message: &str, options: &[String], default: usize) -> Result<usize> {
        let choice = Select::new(message, options.to_vec())
            .with_starting_cursor(default.min(options.len().saturating_sub(1)))
            .raw_prompt()?;
        Ok(choice.index)
    }

    fn multi_select(&mut self, message: &str, options: &[String]) -> Result<Vec<usize>> {
        let choices = MultiSelect::new(message, options.to_vec()).raw_prompt()?;
        Ok(choices.into_iter().map(|c| c.index).collect())
    }

    fn confirm(&mut self, message: &str, default: bool) -> Result<bool> {
        Ok(Confirm::new(message).with_default(default).prompt()?)
    }

    fn notice(&mut self, message: &str) {
        eprintln!("{}", message.cyan());
    }
}

/// One canned answer for [`ScriptedPrompter`]
#[derive(Debug, Clone)]
pub enum Answer {
    Text(String),
    Secret(String),
    Select(usize),
    MultiSelect(Vec<usize>),
    Confirm(bool),
    /// Accept the offered default
    Default,
}

/// Prompter that replays a fixed list of answers
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<Answer>,
    questions: Vec<String>,
    notices: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Every prompt message shown, in order
    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }

    fn next(&mut self, message: &str) -> Result<Answer> {
        self.questions.push(message.to_string());
        self.answers.pop_front().ok_or_else(|| {
            AutoInstallError::PromptError(format!("No scripted answer for '{}'", message))
        })
    }

    fn mismatch(message: &str, answer: &Answer) -> AutoInstallError {
        AutoInstallError::PromptError(format!(
            "Scripted answer {:?} does not fit prompt '{}'",
            answer, message
        ))
    }
}

impl Prompter for ScriptedPrompter {
    fn text(&mut self, message: &str, default: Option<&str>, _help: Option<&str>) -> Result<String> {
        match self.next(message)? {
            Answer::Text(value) => Ok(value),
            Answer::Default => Ok(default.unwrap_or_default().to_string()),
            other => Err(Self::mismatch(message, &other)),
        }
    }

    fn secret(&mut self, message: &str) -> Result<Secret> {
        match self.next(message)? {
            Answer::Secret(value) => Ok(Secret::new(value)),
            other => Err(Self::mismatch(message, &other)),
        }
    }

    fn select(&mut self, message: &str, options: &[String], default: usize) -> Result<usize> {
        match self.next(message)? {
            Answer::Select(index) if index < options.len() => Ok(index),
            Answer::Default => Ok(default),
            other => Err(Self::mismatch(message, &other)),
        }
    }

    fn multi_select(&mut self, message: &str, options: &[String]) -> Result<Vec<usize>> {
        match self.next(message)? {
            Answer::MultiSelect(indices) if indices.iter().all(|i| *i < options.len()) => {
                Ok(indices)
            }
            other => Err(Self::mismatch(message, &other)),
        }
    }

    fn confirm(&mut self, message: &str, default: bool) -> Result<bool> {
        match self.next(message)? {
            Answer::Confirm(value) => Ok(value),
            Answer::Default => Ok(default),
            other => Err(Self::mismatch(message, &other)),
        }
    }

    fn notice(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_answers_in_order() {
        let mut p = ScriptedPrompter::new([
            Answer::Text("box".into()),
            Answer::Default,
            Answer::Select(1),
        ]);
        assert_eq!(p.text("Hostname", None, None).unwrap(), "box");
        assert_eq!(p.text("Locale", Some("en_US.UTF-8"), None).unwrap(), "en_US.UTF-8");
        let opts = vec!["a".to_string(), "b".to_string()];
        assert_eq!(p.select("Pick", &opts, 0).unwrap(), 1);
        assert_eq!(p.questions().len(), 3);
        assert!(p.confirm("More?", true).is_err());
    }

    #[test]
    fn test_mismatched_answer_is_an_error() {
        let mut p = ScriptedPrompter::new([Answer::Confirm(true)]);
        assert!(matches!(
            p.text("Hostname", None, None),
            Err(AutoInstallError::PromptError(_))
        ));
    }
}
