//! Item key parsing.
//!
//! An item key is a metric name optionally followed by a bracketed parameter list,
//! e.g. `system.hostname` or `vfs.fs.size[/,free]`. Parameters may be quoted
//! (`"a,b"`, with `\"` escaping a quote) or be a one-level array (`[a,b]`, kept
//! verbatim including brackets).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing an item key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemKeyError {
    /// The key (or its name part) is empty.
    #[error("item key is empty")]
    Empty,
    /// A character not allowed at this position.
    #[error("invalid character {character:?} at position {position}")]
    InvalidCharacter {
        /// Byte offset into the key text.
        position: usize,
        /// Offending character.
        character: char,
    },
    /// The parameter list or a quoted parameter is not closed.
    #[error("unterminated parameter list")]
    Unterminated,
    /// Text follows the closing bracket.
    #[error("unexpected data after parameter list at position {position}")]
    TrailingData {
        /// Byte offset of the first trailing character.
        position: usize,
    },
}

/// A parsed item key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    raw: String,
    name_len: usize,
    params: Vec<String>,
}

impl ItemKey {
    /// Parse an item key.
    ///
    /// # Errors
    ///
    /// Returns an [`ItemKeyError`] when the name contains characters other than
    /// ASCII alphanumerics, `.`, `_` and `-`, or the parameter list is malformed.
    pub fn parse(text: &str) -> Result<Self, ItemKeyError> {
        let name_len = text.find('[').unwrap_or(text.len());
        let name = &text[..name_len];
        if name.is_empty() {
            return Err(ItemKeyError::Empty);
        }
        if let Some((position, character)) = name
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(ItemKeyError::InvalidCharacter { position, character });
        }

        let params = if name_len < text.len() {
            parse_params(&text[name_len..], name_len)?
        } else {
            Vec::new()
        };

        Ok(Self {
            raw: text.to_string(),
            name_len,
            params,
        })
    }

    /// Metric name without parameters (`vfs.fs.size`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.raw[..self.name_len]
    }

    /// Parsed parameters, unquoted.
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Original key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ItemKey {
    type Err = ItemKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn skip_spaces(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) {
    while chars.next_if(|&(_, c)| c == ' ').is_some() {}
}

/// Parse `[p1,p2,...]`; `offset` is the position of the opening bracket in the key.
fn parse_params(src: &str, offset: usize) -> Result<Vec<String>, ItemKeyError> {
    let mut params = Vec::new();
    let mut chars = src.char_indices().peekable();
    // opening bracket
    chars.next();

    loop {
        skip_spaces(&mut chars);
        match chars.peek().copied() {
            None => return Err(ItemKeyError::Unterminated),
            Some((_, '"')) => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        None => return Err(ItemKeyError::Unterminated),
                        Some((_, '\\')) => {
                            if chars.next_if(|&(_, c)| c == '"').is_some() {
                                value.push('"');
                            } else {
                                value.push('\\');
                            }
                        }
                        Some((_, '"')) => break,
                        Some((_, c)) => value.push(c),
                    }
                }
                skip_spaces(&mut chars);
                params.push(value);
            }
            Some((_, '[')) => {
                let mut value = String::new();
                loop {
                    match chars.next() {
                        None => return Err(ItemKeyError::Unterminated),
                        Some((_, ']')) => {
                            value.push(']');
                            break;
                        }
                        Some((_, c)) => value.push(c),
                    }
                }
                skip_spaces(&mut chars);
                params.push(value);
            }
            Some(_) => {
                let mut value = String::new();
                while let Some((_, c)) = chars.next_if(|&(_, c)| c != ',' && c != ']') {
                    value.push(c);
                }
                params.push(value.trim_end().to_string());
            }
        }

        match chars.next() {
            Some((_, ',')) => {}
            Some((_, ']')) => {
                return match chars.next() {
                    Some((position, _)) => Err(ItemKeyError::TrailingData {
                        position: offset + position,
                    }),
                    None => Ok(params),
                };
            }
            Some((position, character)) => {
                return Err(ItemKeyError::InvalidCharacter {
                    position: offset + position,
                    character,
                });
            }
            None => return Err(ItemKeyError::Unterminated),
        }
    }
}
