use console::{Emoji, style};

use crate::core::orchestrator::RunSummary;

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_summary(summary: &RunSummary) {
    print_status("tasks", &summary.total.to_string());
    print_status("succeeded", &summary.succeeded.to_string());
    print_status("skipped", &summary.skipped.to_string());
    print_status("failed", &summary.failed.to_string());
    print_status("groups completed", &summary.groups_completed.to_string());
    if summary.is_success() {
        print_success("sync finished");
    } else {
        print_warn(&format!("sync finished with {} failed tasks", summary.failed));
    }
}

/// A titled block of `command  description` lines for the help screen.
pub struct GuideSection {
    title: String,
    commands: Vec<(String, String)>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            commands: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.commands.push((name.to_string(), description.to_string()));
        self
    }

    pub fn print(&self) {
        println!("\n {}", style(&self.title).bold().underlined());
        let width = self.commands.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
        for (name, description) in &self.commands {
            println!(
                "   {:<width$}  {}",
                style(name).green(),
                description,
                width = width
            );
        }
    }
}
