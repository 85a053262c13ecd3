use dialoguer::Confirm as ConfirmDialog;

/// Blocking yes/no question put to the user before any install step.
pub trait Confirm {
    fn confirm(&self, message: &str) -> bool;
}

/// Interactive terminal prompt. Defaults to "no"; a closed or broken
/// terminal also counts as "no".
pub struct TerminalPrompt;

impl Confirm for TerminalPrompt {
    fn confirm(&self, message: &str) -> bool {
        match ConfirmDialog::new()
            .with_prompt(message)
            .default(false)
            .interact()
        {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("confirmation prompt failed: {e}");
                false
            }
        }
    }
}

/// Answers every question the same way, for `--yes` / `--no` runs.
pub struct FixedAnswer(pub bool);

impl Confirm for FixedAnswer {
    fn confirm(&self, message: &str) -> bool {
        let reply = if self.0 { "yes" } else { "no" };
        println!("{message} [y/N]: {reply}");
        self.0
    }
}
