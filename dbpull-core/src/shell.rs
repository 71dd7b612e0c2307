//! Structured construction of remote shell command lines.
//!
//! Commands are assembled from typed segments instead of string
//! concatenation. Operator and tool tokens are emitted verbatim, every value
//! is quoted for a POSIX shell, and secret values are kept apart so that the
//! text written to logs and error messages can be redacted.

use std::fmt;
use zeroize::Zeroizing;

/// Placeholder written in place of secret values.
pub const REDACTED: &str = "****";

/// Quotes a single word for a POSIX shell.
///
/// Words made only of characters that are never special to the shell are
/// returned unchanged; everything else is wrapped in single quotes, with
/// embedded single quotes rendered as `'\''`.
///
/// # Example
/// ```rust
/// use dbpull_core::shell::quote;
///
/// assert_eq!(quote("/var/www/site"), "/var/www/site");
/// assert_eq!(quote("it's"), r"'it'\''s'");
/// assert_eq!(quote(""), "''");
/// ```
pub fn quote(word: &str) -> String {
    if word.is_empty() {
        return "''".to_string();
    }
    if word.chars().all(is_safe_char) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

const fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, '_' | '@' | '%' | '+' | '=' | ':' | ',' | '.' | '/' | '-')
}

#[derive(Clone)]
enum Segment {
    /// Emitted verbatim; only for fixed tokens chosen by this crate
    Raw(&'static str),
    /// Quoted value
    Arg(String),
    /// Quoted value whose suffix is hidden in redacted output
    Secret {
        prefix: &'static str,
        value: Zeroizing<String>,
    },
}

/// A shell command line destined for the remote host.
///
/// # Example
/// ```rust
/// use dbpull_core::shell::RemoteCommand;
///
/// let cmd = RemoteCommand::new()
///     .cd("/var/www/my site")
///     .raw("ls");
/// assert_eq!(cmd.render(), "cd '/var/www/my site' && ls");
/// ```
#[derive(Clone, Default)]
pub struct RemoteCommand {
    segments: Vec<Segment>,
}

impl RemoteCommand {
    /// Creates an empty command.
    pub const fn new() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Appends a fixed token (tool name, flag or operator) verbatim.
    #[must_use]
    pub fn raw(mut self, token: &'static str) -> Self {
        self.segments.push(Segment::Raw(token));
        self
    }

    /// Appends a value, quoted for the shell.
    #[must_use]
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.segments.push(Segment::Arg(value.into()));
        self
    }

    /// Appends `<prefix><value>` as one quoted word; only `<prefix>` survives
    /// redaction.
    #[must_use]
    pub fn secret(mut self, prefix: &'static str, value: &str) -> Self {
        self.segments.push(Segment::Secret {
            prefix,
            value: Zeroizing::new(value.to_string()),
        });
        self
    }

    /// Prefixes the command with `cd <dir> &&`.
    #[must_use]
    pub fn cd(self, dir: &str) -> Self {
        self.raw("cd").arg(dir).raw("&&")
    }

    /// Appends `&&` and then every segment of `next`. The operator is left
    /// out when the command is empty or already ends in `&&` (after
    /// [`RemoteCommand::cd`]).
    #[must_use]
    pub fn and(mut self, next: Self) -> Self {
        if !self.segments.is_empty() && !self.ends_with_and() {
            self.segments.push(Segment::Raw("&&"));
        }
        self.segments.extend(next.segments);
        self
    }

    /// Appends `| <next>`.
    #[must_use]
    pub fn pipe(mut self, next: Self) -> Self {
        self.segments.push(Segment::Raw("|"));
        self.segments.extend(next.segments);
        self
    }

    fn ends_with_and(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Raw("&&")))
    }

    /// Whether no segment has been added yet.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The exact text sent to the remote shell, secrets included.
    pub fn render(&self) -> String {
        self.join(false)
    }

    /// The command text with secret values replaced by [`REDACTED`].
    pub fn redacted(&self) -> String {
        self.join(true)
    }

    fn join(&self, redact: bool) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Raw(token) => (*token).to_string(),
                Segment::Arg(value) => quote(value),
                Segment::Secret { prefix, value } => {
                    if redact {
                        format!("{prefix}{REDACTED}")
                    } else {
                        quote(&format!("{prefix}{}", value.as_str()))
                    }
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemoteCommand")
            .field(&self.redacted())
            .finish()
    }
}
