//! Interactive confirmation before an existing backup is replaced.

use diffsnap_engine::OverwriteDecider;
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Asks on the terminal. End of input counts as "no".
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl OverwriteDecider for TerminalPrompt {
    fn confirm_overwrite(&self, path: &Path) -> bool {
        let stdin = io::stdin();
        ask_overwrite(&mut stdin.lock(), &mut io::stderr(), path)
    }
}

/// Ask until the answer is yes or no. An empty answer means no.
pub fn ask_overwrite<R: BufRead, W: Write>(input: &mut R, output: &mut W, path: &Path) -> bool {
    loop {
        let _ = write!(output, "{} already exists. Overwrite it? [y/N] ", path.display());
        let _ = output.flush();

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => return false,
            Ok(_) => {}
        }

        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => return true,
            "" | "n" | "no" => return false,
            other => {
                let _ = writeln!(output, "'{}' is not an answer, type y or n.", other);
            }
        }
    }
}
