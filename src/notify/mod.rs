//! Concrete notifier implementations (C7).

pub mod loki;
pub mod stdout;

pub use loki::LokiNotifier;
pub use stdout::StdoutNotifier;

/// Title-cases a log line's free-text message before handing it to a
/// notifier, matching the original catalog's convention of presenting a
/// human-facing summary rather than the raw lowercase log text.
pub fn title_case(message: &str) -> String {
    message
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
