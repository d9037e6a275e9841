//! Terminal status line for the assistant's state.

use assistant_core::AssistantState;
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Label and colour shown for each state.
pub fn status(state: AssistantState) -> (&'static str, Color) {
    match state {
        AssistantState::Idle => ("Ready", Color::Blue),
        AssistantState::Listening => ("Listening...", Color::Red),
        AssistantState::Thinking => ("Thinking...", Color::Ansi256(208)),
        AssistantState::Speaking => ("Speaking...", Color::Green),
    }
}

/// Write one status line. Whether colour is emitted is up to `out`.
pub fn write_status<W: WriteColor>(out: &mut W, state: AssistantState) -> io::Result<()> {
    let (label, color) = status(state);
    out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
    write!(out, "● {label}")?;
    out.reset()?;
    writeln!(out)?;
    out.flush()
}

/// Observer that prints every state change to stdout. `ColorChoice::Auto`
/// drops colour when stdout is not a terminal or `NO_COLOR` is set.
pub fn stdout_presenter(choice: ColorChoice) -> impl FnMut(AssistantState) + Send + 'static {
    let mut stdout = StandardStream::stdout(choice);
    move |state| {
        let _ = write_status(&mut stdout, state);
    }
}
