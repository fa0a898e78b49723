// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! POSIX-like command-line splitting: single quotes are literal, double
//! quotes honor backslash escapes, bare backslashes escape the next char.

use crate::error::TermError;

/// Split a command line into the program and its arguments.
pub fn split_command_line(line: &str) -> Result<(String, Vec<String>), TermError> {
    let words = split_words(line)?;
    let mut iter = words.into_iter();
    let command = iter.next().ok_or(TermError::EmptyCommand)?;
    Ok((command, iter.collect()))
}

/// Split a line into shell words.
pub fn split_words(line: &str) -> Result<Vec<String>, TermError> {
    #[derive(PartialEq)]
    enum Mode {
        Plain,
        Single,
        Double,
    }

    let mut words = Vec::new();
    let mut current = String::new();
    let mut has_word = false;
    let mut mode = Mode::Plain;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match mode {
            Mode::Plain => match ch {
                '\'' => {
                    mode = Mode::Single;
                    has_word = true;
                }
                '"' => {
                    mode = Mode::Double;
                    has_word = true;
                }
                '\\' => {
                    let escaped = chars.next().ok_or(TermError::UnterminatedQuote)?;
                    current.push(escaped);
                    has_word = true;
                }
                c if c.is_whitespace() => {
                    if has_word {
                        words.push(std::mem::take(&mut current));
                        has_word = false;
                    }
                }
                c => {
                    current.push(c);
                    has_word = true;
                }
            },
            Mode::Single => match ch {
                '\'' => mode = Mode::Plain,
                c => current.push(c),
            },
            Mode::Double => match ch {
                '"' => mode = Mode::Plain,
                '\\' => {
                    let escaped = chars.next().ok_or(TermError::UnterminatedQuote)?;
                    // Inside double quotes only a few escapes are special;
                    // the backslash is preserved otherwise.
                    match escaped {
                        '"' | '\\' | '$' | '`' => current.push(escaped),
                        other => {
                            current.push('\\');
                            current.push(other);
                        }
                    }
                }
                c => current.push(c),
            },
        }
    }

    if mode != Mode::Plain {
        return Err(TermError::UnterminatedQuote);
    }
    if has_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
#[path = "shell_tests.rs"]
mod tests;
