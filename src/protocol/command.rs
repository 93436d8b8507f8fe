//! Control-channel command model and its `::`-delimited text form.
//!
//! ```text
//! SYNC::<file>::<type>::<name>::<value>
//! ASYNC::<file>::<type>::<name>::<value>
//! SCREENSHOT::<filePath>
//! ```
//!
//! ## Field escaping
//!
//! The four value fields of `SYNC`/`ASYNC` are escaped so that a raw `::`
//! in the encoded line is always a delimiter:
//!
//! * `\` is written as `\\`, line feed as `\n`, carriage return as `\r`;
//! * a `:` is written as `\:` when it touches another `:` or sits at either
//!   end of the field.
//!
//! Fields without backslashes, line breaks, or such colons encode to
//! themselves, so ordinary values are byte-identical to the unescaped form.
//! The `SCREENSHOT` path is the trailing field and is sent raw; it may not
//! contain line breaks.

use std::borrow::Cow;
use std::fmt::{Display, Formatter};

use tracing::warn;

use crate::{AppError, Result};

/// Field delimiter.
pub const DELIMITER: &str = "::";

const TAG_SYNC: &str = "SYNC";
const TAG_ASYNC: &str = "ASYNC";
const TAG_SCREENSHOT: &str = "SCREENSHOT";

/// One named-value assignment carried by `SYNC` and `ASYNC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueUpdate {
    /// Interface definition file the value belongs to.
    pub file: String,
    /// Declared value type (`string`, `int`, `float`, `bool`, ...).
    pub value_type: String,
    /// Dotted interface value name.
    pub name: String,
    /// Wire value, already normalized for its type.
    pub value: String,
}

impl ValueUpdate {
    /// Build an update, normalizing booleans to `true`/`false`.
    #[must_use]
    pub fn new(file: &str, value_type: &str, name: &str, value: &str) -> Self {
        Self {
            file: file.to_owned(),
            value_type: value_type.to_owned(),
            name: name.to_owned(),
            value: normalize_value(value_type, value).into_owned(),
        }
    }
}

/// A single control-channel command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set a named value and apply it immediately.
    Sync(ValueUpdate),
    /// Same fields as [`Command::Sync`], non-blocking intent.
    Async(ValueUpdate),
    /// Ask the client to write a capture to the given path.
    Screenshot {
        /// Destination path on the client's file system.
        path: String,
    },
}

impl Command {
    /// `SYNC` command with boolean normalization.
    #[must_use]
    pub fn sync(file: &str, value_type: &str, name: &str, value: &str) -> Self {
        Self::Sync(ValueUpdate::new(file, value_type, name, value))
    }

    /// `ASYNC` command with boolean normalization.
    #[must_use]
    pub fn asynchronous(file: &str, value_type: &str, name: &str, value: &str) -> Self {
        Self::Async(ValueUpdate::new(file, value_type, name, value))
    }

    /// `SCREENSHOT` command.
    #[must_use]
    pub fn screenshot(path: impl Into<String>) -> Self {
        Self::Screenshot { path: path.into() }
    }

    /// Command tag as it appears on the wire.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Sync(_) => TAG_SYNC,
            Self::Async(_) => TAG_ASYNC,
            Self::Screenshot { .. } => TAG_SCREENSHOT,
        }
    }

    /// Encode to the wire line, without the trailing newline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ProtocolViolation` if a screenshot path contains a
    /// line break, which the raw trailing field cannot carry.
    pub fn encode(&self) -> Result<String> {
        match self {
            Self::Sync(update) | Self::Async(update) => {
                let fields = [
                    &update.file,
                    &update.value_type,
                    &update.name,
                    &update.value,
                ];
                let mut line = String::from(self.tag());
                for field in fields {
                    let escaped = escape_field(field);
                    if let Cow::Owned(_) = escaped {
                        warn!(
                            tag = self.tag(),
                            name = %update.name,
                            "field contains reserved characters; sending escaped"
                        );
                    }
                    line.push_str(DELIMITER);
                    line.push_str(&escaped);
                }
                Ok(line)
            }
            Self::Screenshot { path } => {
                if path.contains(['\n', '\r']) {
                    return Err(AppError::ProtocolViolation(
                        "screenshot path contains a line break".into(),
                    ));
                }
                Ok(format!("{TAG_SCREENSHOT}{DELIMITER}{path}"))
            }
        }
    }

    /// Parse one wire line (trailing `\r`/`\n` tolerated).
    ///
    /// # Errors
    ///
    /// Returns `AppError::ProtocolViolation` for unknown tags, wrong field
    /// counts, or dangling escapes.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (tag, rest) = line
            .split_once(DELIMITER)
            .ok_or_else(|| AppError::ProtocolViolation(format!("missing delimiter: {line}")))?;

        match tag {
            TAG_SCREENSHOT => Ok(Self::screenshot(rest)),
            TAG_SYNC | TAG_ASYNC => {
                let fields = split_fields(rest)?;
                let [file, value_type, name, value]: [String; 4] =
                    fields.try_into().map_err(|fields: Vec<String>| {
                        AppError::ProtocolViolation(format!(
                            "{tag} expects 4 fields, got {}",
                            fields.len()
                        ))
                    })?;
                let update = ValueUpdate {
                    file,
                    value_type,
                    name,
                    value,
                };
                if tag == TAG_SYNC {
                    Ok(Self::Sync(update))
                } else {
                    Ok(Self::Async(update))
                }
            }
            other => Err(AppError::ProtocolViolation(format!(
                "unknown command tag: {other}"
            ))),
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.encode() {
            Ok(line) => f.write_str(&line),
            Err(_) => write!(f, "{}{DELIMITER}<unencodable>", self.tag()),
        }
    }
}

/// Normalize a value for transmission.
///
/// For `bool` values, `"0"`, `"false"`, and `"False"` become `"false"` and
/// anything else becomes `"true"`. Other types pass through unchanged.
#[must_use]
pub fn normalize_value<'a>(value_type: &str, value: &'a str) -> Cow<'a, str> {
    if value_type != "bool" {
        return Cow::Borrowed(value);
    }
    match value {
        "0" | "false" | "False" => Cow::Borrowed("false"),
        _ => Cow::Borrowed("true"),
    }
}

/// Escape one `SYNC`/`ASYNC` field. Borrowed when nothing needed escaping.
#[must_use]
pub fn escape_field(field: &str) -> Cow<'_, str> {
    let chars: Vec<char> = field.chars().collect();
    let needs_escape = |idx: usize| -> bool {
        match chars[idx] {
            '\\' | '\n' | '\r' => true,
            ':' => {
                idx == 0
                    || idx + 1 == chars.len()
                    || chars[idx - 1] == ':'
                    || chars[idx + 1] == ':'
            }
            _ => false,
        }
    };

    if !(0..chars.len()).any(needs_escape) {
        return Cow::Borrowed(field);
    }

    let mut out = String::with_capacity(field.len() + 4);
    for (idx, ch) in chars.iter().enumerate() {
        if needs_escape(idx) {
            out.push('\\');
            out.push(match ch {
                '\n' => 'n',
                '\r' => 'r',
                other => *other,
            });
        } else {
            out.push(*ch);
        }
    }
    Cow::Owned(out)
}

/// Split an escaped field list on unescaped `::` and unescape each field.
fn split_fields(rest: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = rest.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('n') => current.push('\n'),
                Some('r') => current.push('\r'),
                Some(other) => current.push(other),
                None => {
                    return Err(AppError::ProtocolViolation(
                        "dangling escape at end of line".into(),
                    ))
                }
            },
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                fields.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    fields.push(current);
    Ok(fields)
}
