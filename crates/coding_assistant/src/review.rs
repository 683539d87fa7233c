//! Interactive change review on top of a [`Console`].

use mlx_code::{BatchDecision, ChangeReviewer, PendingChange};

use crate::console::Console;

pub struct ConsoleReviewer<'a> {
    console: &'a mut dyn Console,
}

impl<'a> ConsoleReviewer<'a> {
    pub fn new(console: &'a mut dyn Console) -> Self {
        Self { console }
    }
}

impl ChangeReviewer for ConsoleReviewer<'_> {
    fn confirm_unusual_extension(&mut self, display: &str) -> bool {
        self.console
            .confirm(&format!("Warning: {display} has an unusual extension. Continue?"))
    }

    fn review_batch(&mut self, changes: &[PendingChange]) -> BatchDecision {
        for change in changes {
            self.console.println("");
            if change.is_unchanged() {
                self.console
                    .println(&format!("{}: no changes", change.display()));
            } else {
                let diff = change.render_diff();
                self.console.print(&diff);
                if !diff.ends_with('\n') {
                    self.console.println("");
                }
            }
        }

        let prompt = format!(
            "\nApply {} change(s)? [a]ll / [i]ndividually / [c]ancel: ",
            changes.len()
        );
        match self.console.read_line(&prompt) {
            Ok(Some(answer)) => match answer.trim().to_ascii_lowercase().as_str() {
                "a" | "all" | "y" | "yes" => BatchDecision::ApplyAll,
                "i" | "individually" => BatchDecision::Individually,
                _ => BatchDecision::CancelAll,
            },
            _ => BatchDecision::CancelAll,
        }
    }

    fn confirm_change(&mut self, change: &PendingChange) -> bool {
        self.console
            .confirm(&format!("Apply changes to {}?", change.display()))
    }
}
