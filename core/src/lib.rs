// Allow some clippy lints for legacy code - to be fixed gradually
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

pub mod amount;
pub mod backoff;
pub mod config;
pub mod domain;
pub mod error;
pub mod hmac_sign;
pub mod ids;
pub mod logging;
pub mod template;
pub mod time;

pub fn get_cli_styles() -> clap::builder::Styles {
    use clap::builder::styling::*;

    clap::builder::Styles::styled()
        .usage(Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Yellow))))
        .header(Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Yellow))))
        .literal(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .invalid(Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Red))))
        .error(Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Red))))
        .valid(Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green))))
}
