//! Step and key/value lines for the CLI
//!
//! Fancy terminals get `cliclack` markers; everything else gets a bracketed
//! tag so the output stays greppable in CI logs.

use super::context::UiContext;
use console::{style, Style};

/// Tag printed in place of a `cliclack` marker
#[derive(Clone, Copy)]
enum Tag {
    Ok,
    Warn,
}

impl Tag {
    fn styled(self) -> console::StyledObject<&'static str> {
        match self {
            Tag::Ok => style("[OK]").green(),
            Tag::Warn => style("[WARN]").yellow(),
        }
    }
}

/// Heading printed before a block of key/value lines
pub fn intro(ctx: &UiContext, title: &str) {
    if ctx.use_fancy_output() {
        cliclack::intro(style(title).cyan().bold()).ok();
    } else {
        println!("{}\n", style(title).cyan().bold());
    }
}

/// Closing line pointing at the command that fixes a stale store
pub fn outro_warn(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::outro(style(message).yellow().bold()).ok();
    } else {
        println!("\n{} {}", Tag::Warn.styled(), message);
    }
}

/// A completed step, optionally with a dimmed detail
pub fn step_ok(ctx: &UiContext, message: &str, detail: Option<&str>) {
    let line = match detail {
        Some(detail) if ctx.use_fancy_output() => format!("{} ({})", message, style(detail).dim()),
        Some(detail) => format!("{} ({})", message, detail),
        None => message.to_string(),
    };
    if ctx.use_fancy_output() {
        cliclack::log::success(line).ok();
    } else {
        println!("  {} {}", Tag::Ok.styled(), line);
    }
}

/// A failed check and what to run about it
pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::warning(format!("{} - {}", message, style(hint).dim())).ok();
    } else {
        println!("  {} {} - {}", Tag::Warn.styled(), message, hint);
    }
}

pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.use_fancy_output() {
        println!("  {}: {}", style(key).dim(), value);
    } else {
        println!("  {}: {}", key, value);
    }
}

/// Key/value line colored, or tagged, by whether the value is healthy
pub fn key_value_status(ctx: &UiContext, key: &str, value: &str, ok: bool) {
    let tag = if ok { Tag::Ok } else { Tag::Warn };
    if ctx.use_fancy_output() {
        let value_style = if ok {
            Style::new().green()
        } else {
            Style::new().yellow()
        };
        println!("  {}: {}", style(key).dim(), value_style.apply_to(value));
    } else {
        println!("  {} {}: {}", tag.styled(), key, value);
    }
}
