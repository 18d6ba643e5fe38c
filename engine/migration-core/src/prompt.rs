//! Interactive gating.

use std::io::{BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    Execute,
    Skip,
    Quit,
}

/// Decides the fate of a statement (or batch) in interactive mode. Tests
/// and embedders supply their own; the console implementation asks on
/// stdin.
pub trait MigrationPrompt: Send + Sync {
    fn ask(&self, statement: &str) -> PromptAnswer;
}

/// Prompts on the terminal: `[E]xecute / [S]kip / [Q]uit`.
#[derive(Debug, Default)]
pub struct ConsolePrompt;

impl MigrationPrompt for ConsolePrompt {
    fn ask(&self, statement: &str) -> PromptAnswer {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();

        println!("{statement}");

        loop {
            print!("[E]xecute / [S]kip / [Q]uit: ");
            let _ = stdout.flush();

            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                return PromptAnswer::Quit;
            }

            match line.trim().to_ascii_lowercase().as_str() {
                "e" | "execute" | "" => return PromptAnswer::Execute,
                "s" | "skip" => return PromptAnswer::Skip,
                "q" | "quit" => return PromptAnswer::Quit,
                _ => continue,
            }
        }
    }
}

/// Answers every prompt the same way. Used by tests and by auto-merge.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrompt(pub PromptAnswer);

impl MigrationPrompt for FixedPrompt {
    fn ask(&self, _statement: &str) -> PromptAnswer {
        self.0
    }
}
