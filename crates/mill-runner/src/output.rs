use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use colored::{Color, Colorize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// A shared destination for whole output lines.
pub type Sink = Arc<Mutex<dyn Write + Send>>;

const PALETTE: [Color; 9] = [
    Color::BrightYellow,
    Color::BrightBlue,
    Color::BrightMagenta,
    Color::BrightCyan,
    Color::BrightWhite,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
];

/// Where captured stdout and stderr lines end up.
#[derive(Clone)]
pub struct Sinks {
    pub out: Sink,
    pub err: Sink,
}

impl Default for Sinks {
    fn default() -> Self {
        Self {
            out: Arc::new(Mutex::new(std::io::stdout())),
            err: Arc::new(Mutex::new(std::io::stderr())),
        }
    }
}

impl std::fmt::Debug for Sinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sinks").finish_non_exhaustive()
    }
}

/// Palette entry for the `n`th process.
pub fn palette_color(n: usize) -> Color {
    PALETTE[n % PALETTE.len()]
}

/// `label` right-aligned to `width`, followed by a separator.
pub fn prefix(label: &str, width: usize, color: Option<Color>) -> String {
    let text = format!("{label:>width$} | ");
    match color {
        Some(c) => text.color(c).to_string(),
        None => text,
    }
}

/// Write one line under the sink lock so concurrent writers never split it.
pub fn write_line(sink: &Sink, prefix: &str, line: &str) {
    let mut out = sink.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = writeln!(out, "{prefix}{line}");
    let _ = out.flush();
}

/// Copy `reader` into `sink` line by line until EOF.
pub async fn pump<R>(reader: R, sink: Sink, prefix: String)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        write_line(&sink, &prefix, &line);
    }
}
