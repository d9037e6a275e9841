//! Line-based keyboard control on stdin.

use assistant_core::Control;
use std::io::BufRead;
use std::sync::mpsc::Sender;
use std::thread;
use tracing::{debug, warn};

/// Enter toggles, `c` interrupts speech, `q` quits.
pub fn parse_line(line: &str) -> Option<Control> {
    match line.trim().to_lowercase().as_str() {
        "" => Some(Control::Interact),
        "c" | "cancel" | "stop" => Some(Control::Cancel),
        "q" | "quit" | "exit" => Some(Control::Quit),
        _ => None,
    }
}

/// Forward stdin commands until EOF or quit. EOF closes this sender.
pub fn spawn_stdin_reader(controls: Sender<Control>) -> std::io::Result<()> {
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("stdin read failed: {e}");
                        break;
                    }
                };
                match parse_line(&line) {
                    Some(control) => {
                        if controls.send(control).is_err() || control == Control::Quit {
                            break;
                        }
                    }
                    None => debug!(%line, "unrecognized command"),
                }
            }
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands() {
        assert_eq!(parse_line(""), Some(Control::Interact));
        assert_eq!(parse_line("  \n"), Some(Control::Interact));
        assert_eq!(parse_line("Q"), Some(Control::Quit));
        assert_eq!(parse_line("stop"), Some(Control::Cancel));
        assert_eq!(parse_line("hello"), None);
    }
}
