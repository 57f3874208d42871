use crate::error::{ErrorContext, LockyardError};
use colored::{ColoredString, Colorize};

pub fn format_error_chain(error: &LockyardError) -> String {
    ErrorContext::new(error).to_string()
}

/// Format error for the operator's terminal.
///
/// Suggestions may span several lines; each non-empty line becomes a bullet.
pub fn format_error_with_color(error: &LockyardError, use_color: bool) -> String {
    let context = ErrorContext::new(error);
    let mut output = format!(
        "{} {error}\n",
        paint("Error:", use_color, |text| text.red().bold())
    );

    if let Some(details) = &context.details {
        output.push_str(&format!("\n{details}\n"));
    }

    if let Some(suggestion) = &context.suggestion {
        output.push_str(&format!(
            "\n{}\n",
            paint("Suggestions:", use_color, |text| text.yellow().bold())
        ));
        for line in suggestion.lines().filter(|line| !line.trim().is_empty()) {
            let bullet = format!("• {}", line.trim());
            output.push_str(&paint(&bullet, use_color, |text| text.cyan()));
            output.push('\n');
        }
    }

    output
}

fn paint(text: &str, use_color: bool, style: fn(ColoredString) -> ColoredString) -> String {
    if use_color {
        style(text.normal()).to_string()
    } else {
        text.to_string()
    }
}
