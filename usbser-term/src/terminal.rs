//! Interactive session on one open port
//!
//! Received data goes to stdout, break transitions and status to stderr.
//! Each stdin line is sent with the configured line ending; a line that is
//! exactly `~b` sends a break and `~.` ends the session.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use usbser_port::{PortEvent, PortEventReceiver, SerialPort};
use usbser_protocol::LineConfig;

use crate::settings::LineEnding;

/// What one line of user input asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(Vec<u8>),
    Break,
    Quit,
}

pub fn parse_input(line: &str, ending: LineEnding) -> Input {
    match line.trim_end_matches(['\r', '\n']) {
        "~." => Input::Quit,
        "~b" => Input::Break,
        text => {
            let mut data = text.as_bytes().to_vec();
            data.extend_from_slice(ending.as_bytes());
            Input::Send(data)
        }
    }
}

/// `48 65 6c 6c 6f`
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Options for one session
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub line: LineConfig,
    pub hex: bool,
    pub break_duration: Duration,
    pub line_ending: LineEnding,
}

/// Open `port`, run until `~.`, end of input or Ctrl-C, then close it
pub async fn run(port: Box<dyn SerialPort>, options: SessionOptions) -> Result<()> {
    let name = port.port_name();
    let events = port.subscribe();
    port.open()
        .with_context(|| format!("failed to open {}", name))?;

    if let Err(e) = port.apply_line_config(&options.line) {
        port.close();
        return Err(e).with_context(|| format!("failed to configure {} as {}", name, options.line));
    }
    eprintln!(
        "Connected to {} at {}. Type ~b for break, ~. to quit.",
        name,
        port.line_config()
    );

    let printer = tokio::spawn(print_events(events, options.hex));
    let result = input_loop(port.as_ref(), &options).await;

    port.close();
    printer.abort();
    eprintln!("Disconnected from {}", name);
    result
}

async fn input_loop(port: &dyn SerialPort, options: &SessionOptions) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };
        let Some(line) = line else {
            debug!("stdin closed");
            return Ok(());
        };

        match parse_input(&line, options.line_ending) {
            Input::Quit => return Ok(()),
            Input::Break => {
                if let Err(e) = port.trigger_break(options.break_duration) {
                    eprintln!("break failed: {}", e);
                }
            }
            Input::Send(data) => {
                if let Err(e) = port.send_data(&data) {
                    eprintln!("send failed: {}", e);
                }
            }
        }
    }
}

async fn print_events(mut events: PortEventReceiver, hex: bool) {
    let mut stdout = std::io::stdout();
    loop {
        match events.recv().await {
            Ok(PortEvent::Data(data)) => {
                let text = if hex {
                    format!("{}\n", format_hex(&data))
                } else {
                    String::from_utf8_lossy(&data).into_owned()
                };
                if stdout
                    .write_all(text.as_bytes())
                    .and_then(|_| stdout.flush())
                    .is_err()
                {
                    return;
                }
            }
            Ok(PortEvent::BreakChanged(active)) => {
                eprintln!("[break {}]", if active { "on" } else { "off" });
            }
            Err(RecvError::Lagged(skipped)) => warn!("Dropped {} events", skipped),
            Err(RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_escapes() {
        assert_eq!(parse_input("~.", LineEnding::CrLf), Input::Quit);
        assert_eq!(parse_input("~b\r\n", LineEnding::CrLf), Input::Break);
        assert_eq!(
            parse_input("~bx", LineEnding::None),
            Input::Send(b"~bx".to_vec())
        );
    }

    #[test]
    fn test_parse_appends_line_ending() {
        assert_eq!(
            parse_input("AT", LineEnding::CrLf),
            Input::Send(b"AT\r\n".to_vec())
        );
        assert_eq!(parse_input("", LineEnding::Cr), Input::Send(b"\r".to_vec()));
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(b"Hi\n"), "48 69 0a");
        assert_eq!(format_hex(&[]), "");
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn plain_lines_are_sent_verbatim(text in "[^~\r\n][^\r\n]{0,40}") {
            let expected = format!("{}\n", text).into_bytes();
            prop_assert_eq!(parse_input(&text, LineEnding::Lf), Input::Send(expected));
        }

        #[test]
        fn hex_has_three_chars_per_byte(data in proptest::collection::vec(any::<u8>(), 1..64)) {
            prop_assert_eq!(format_hex(&data).len(), data.len() * 3 - 1);
        }
    }
}
