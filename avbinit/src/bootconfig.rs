// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Parser for the kernel command line. The boot loader passes boot policy to
//! early user space as `androidboot.*` entries, including the slot suffix and
//! the dm-verity enforcement mode.

/// Namespace prefix for entries directed at user space.
pub const ANDROIDBOOT_PREFIX: &str = "androidboot.";

const QUOTE: char = '"';

/// An ordered view of the kernel command line as key/value pairs. Duplicate
/// keys are preserved in order and values may be empty. Parsing never fails;
/// lookups report absence.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BootConfig {
    entries: Vec<(String, String)>,
}

impl BootConfig {
    /// Tokenize a raw command line. Tokens are separated by runs of spaces
    /// outside double quotes. Quote characters toggle whether a space splits
    /// and are stripped from the output; there is no other escape mechanism.
    /// An unbalanced quote extends the final token to the end of the input.
    pub fn parse(cmdline: &str) -> Self {
        let mut entries = Vec::new();
        let mut token = String::new();
        let mut in_quote = false;

        for c in cmdline.chars() {
            match c {
                QUOTE => in_quote = !in_quote,
                ' ' if !in_quote => push_token(&mut entries, &mut token),
                _ => token.push(c),
            }
        }
        push_token(&mut entries, &mut token);

        Self { entries }
    }

    /// All parsed pairs, in command-line order.
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Value of the first entry whose key is exactly `prefix` + `key`.
    pub fn find_prefixed(&self, prefix: &str, key: &str) -> Option<&str> {
        let full_key = format!("{prefix}{key}");

        self.entries
            .iter()
            .find(|(k, _)| *k == full_key)
            .map(|(_, v)| v.as_str())
    }

    /// Value of the first `androidboot.`-namespaced entry for a bare key.
    pub fn find(&self, key: &str) -> Option<&str> {
        self.find_prefixed(ANDROIDBOOT_PREFIX, key)
    }
}

// The key/value split happens after quote stripping, so a quoted space ends
// up inside the key when it precedes the first '='.
fn push_token(entries: &mut Vec<(String, String)>, token: &mut String) {
    if token.is_empty() {
        return;
    }

    match token.find('=') {
        // No difference between <key> and <key>=.
        None => entries.push((std::mem::take(token), String::new())),
        Some(pos) => {
            let value = token[pos + 1..].to_owned();
            token.truncate(pos);
            entries.push((std::mem::take(token), value));
        }
    }
}
