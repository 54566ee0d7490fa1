use std::io::{BufRead, Write};

use anyhow::{Context, Result};

use crate::config::Configuration;
use crate::taxonomy::{LabelDecider, LabelDecision};

/// Asks a human on a line-oriented terminal. End of input discards.
pub struct PromptDecider<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptDecider<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, question: &str) -> Result<Option<String>> {
        write!(self.output, "{question}").context("failed to write prompt")?;
        self.output.flush().context("failed to flush prompt")?;

        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("failed to read answer")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_ascii_uppercase()))
    }
}

impl<R: BufRead, W: Write> LabelDecider for PromptDecider<R, W> {
    fn decide(&mut self, label: &str, config: &Configuration) -> Result<LabelDecision> {
        loop {
            let Some(answer) =
                self.ask(&format!("Do you want to keep {label}? Enter Y (yes) or N (no)\n"))?
            else {
                return Ok(LabelDecision::Discard);
            };
            match answer.as_str() {
                "Y" => break,
                "N" => return Ok(LabelDecision::Discard),
                _ => writeln!(self.output, "Please answer Y or N.")?,
            }
        }

        let choices = config
            .roles
            .iter()
            .map(|role| format!("{} ({})", role.key, role.name))
            .collect::<Vec<_>>()
            .join(", ");

        loop {
            let Some(answer) =
                self.ask(&format!("To which role is {label} an alias? Enter {choices}\n"))?
            else {
                return Ok(LabelDecision::Discard);
            };
            match config.role_index_by_key(&answer) {
                Some(role) => return Ok(LabelDecision::Keep { role }),
                None => writeln!(self.output, "Unknown role key {answer:?}.")?,
            }
        }
    }
}

/// Non-interactive policy: every unknown label is dropped.
#[derive(Debug, Default)]
pub struct DiscardDecider;

impl LabelDecider for DiscardDecider {
    fn decide(&mut self, _label: &str, _config: &Configuration) -> Result<LabelDecision> {
        Ok(LabelDecision::Discard)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::config::sample_config;

    fn decide_with(answers: &str, label: &str) -> (LabelDecision, String) {
        let config = sample_config();
        let mut output = Vec::new();
        let decision = {
            let mut decider = PromptDecider::new(Cursor::new(answers.as_bytes()), &mut output);
            decider.decide(label, &config).expect("prompt should not fail")
        };
        (decision, String::from_utf8(output).expect("utf8 prompt"))
    }

    #[test]
    fn answering_no_discards() {
        let (decision, transcript) = decide_with("n\n", "SpinalCord");
        assert_eq!(decision, LabelDecision::Discard);
        assert!(transcript.contains("keep SpinalCord"));
    }

    #[test]
    fn answering_yes_then_key_keeps_under_role() {
        let (decision, transcript) = decide_with("y\nb\n", "Vessie");
        assert_eq!(decision, LabelDecision::Keep { role: 1 });
        assert!(transcript.contains("P (Prostate), B (Bladder)"));
    }

    #[test]
    fn invalid_answers_are_asked_again() {
        let (decision, transcript) = decide_with("maybe\nY\nX\nP\n", "CTV");
        assert_eq!(decision, LabelDecision::Keep { role: 0 });
        assert!(transcript.contains("Please answer Y or N."));
        assert!(transcript.contains("Unknown role key \"X\"."));
    }

    #[test]
    fn end_of_input_discards() {
        let (decision, _) = decide_with("Y\n", "CTV");
        assert_eq!(decision, LabelDecision::Discard);
    }
}
