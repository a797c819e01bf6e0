use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");
pub static PICTURE: Emoji<'_, '_> = Emoji("🖼️  ", "[image] ");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
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

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

pub fn print_banner() {
    println!();
    println!(
        "{}",
        style("multichat · chat, draw, restyle and read images")
            .bold()
            .cyan()
    );
    println!();
}

pub fn print_goodbye() {
    println!(
        "\n{} {}",
        SPARKLE,
        style("Conversation saved. See you next time!").bold().cyan()
    );
}

enum GuideLine {
    Command { usage: String, about: String },
    Status { label: String, value: String },
    Info(String),
    Blank,
}

/// A titled block of help lines, printed in one go.
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
}

impl GuideSection {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, usage: impl Into<String>, about: impl Into<String>) -> Self {
        self.lines.push(GuideLine::Command {
            usage: usage.into(),
            about: about.into(),
        });
        self
    }

    pub fn status(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.lines.push(GuideLine::Status {
            label: label.into(),
            value: value.into(),
        });
        self
    }

    pub fn info(mut self, text: impl Into<String>) -> Self {
        self.lines.push(GuideLine::Info(text.into()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    pub fn print(self) {
        println!("{}", style(&self.title).bold().underlined());
        let width = self
            .lines
            .iter()
            .filter_map(|line| match line {
                GuideLine::Command { usage, .. } => Some(usage.chars().count()),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        for line in &self.lines {
            match line {
                GuideLine::Command { usage, about } => {
                    println!("  {:<width$}  {}", style(usage).cyan(), about, width = width);
                }
                GuideLine::Status { label, value } => print_status(label, value),
                GuideLine::Info(text) => println!("  {}", style(text).dim()),
                GuideLine::Blank => println!(),
            }
        }
    }
}
