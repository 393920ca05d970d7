//! Confirmation prompts.

use anyhow::Result;

use super::RealRuntime;

use std::io::{self, BufRead, Write};

/// Writes `prompt (y/n): ` and reads one answer line; anything but y/yes is a no.
pub(crate) fn confirm_with_io<R: BufRead, W: Write>(
    prompt: &str,
    input: &mut R,
    output: &mut W,
) -> Result<bool> {
    write!(output, "{} (y/n): ", prompt)?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        // EOF (e.g. stdin closed in a script) counts as a refusal
        writeln!(output)?;
        return Ok(false);
    }

    let answer = line.trim().to_lowercase();
    Ok(matches!(answer.as_str(), "y" | "yes"))
}

impl RealRuntime {
    pub(crate) fn confirm_impl(&self, prompt: &str) -> Result<bool> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut stdin_lock = stdin.lock();
        confirm_with_io(prompt, &mut stdin_lock, &mut stdout)
    }
}
