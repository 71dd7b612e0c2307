//! Bitrix CMS.
//!
//! Database access lives in `bitrix/.settings.php` as `'key' => 'value',`
//! lines inside the `connections` section.

use super::FrameworkDetector;
use crate::shell::RemoteCommand;

/// Directory entry that marks a Bitrix application root.
const MARKER: &str = "bitrix";

/// Settings file relative to the application root.
const SETTINGS_FILE: &str = "bitrix/.settings.php";

/// Settings keys in credential order.
const KEYS: [&str; 4] = ["host", "database", "login", "password"];

/// Detects Bitrix installations and reads their `.settings.php`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitrixDetector;

impl BitrixDetector {
    /// Prints the bare value of `'<key>' => '<value>',`.
    ///
    /// The third whitespace field is the quoted value with its trailing
    /// comma; `sed` strips the opening quote, then the comma and closing
    /// quote.
    fn field_command(key: &str) -> RemoteCommand {
        RemoteCommand::new()
            .raw("cat")
            .arg(SETTINGS_FILE)
            .pipe(RemoteCommand::new().raw("grep").arg(format!("'{key}' =>")))
            .pipe(RemoteCommand::new().raw("awk").arg("{print $3}"))
            .pipe(
                RemoteCommand::new()
                    .raw("sed")
                    .raw("-e")
                    .arg("s/^.//")
                    .raw("-e")
                    .arg("s/.$//")
                    .raw("-e")
                    .arg("s/.$//"),
            )
    }
}

impl FrameworkDetector for BitrixDetector {
    fn name(&self) -> &'static str {
        "Bitrix"
    }

    fn detect(&self, listing: &str) -> bool {
        listing.contains(MARKER)
    }

    fn extraction_command(&self, dir: &str) -> RemoteCommand {
        KEYS.iter().fold(RemoteCommand::new().cd(dir), |cmd, key| {
            cmd.and(Self::field_command(key))
        })
    }
}
