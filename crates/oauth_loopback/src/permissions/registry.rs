//! The static permission table and its textual form.

use std::collections::{HashMap, HashSet};

use crate::error::OAuthError;
use crate::permissions::descriptor::{split_identifier, Effect, OwnedDescriptor, PermissionDescriptor};

static OAUTH_PERMISSIONS: &[PermissionDescriptor] =
    crate::command_permissions!(namespace = "oauth", commands = [cancel, start]);

const HEADER_IDENTIFIER: &str = "Identifier";
const HEADER_DESCRIPTION: &str = "Description";

/// A read-only table of permission descriptors.
///
/// # Example
///
/// ```
/// use oauth_loopback::permissions::PermissionRegistry;
///
/// let registry = PermissionRegistry::oauth();
/// assert_eq!(registry.len(), 4);
///
/// let start = registry.lookup("oauth:allow-start").unwrap();
/// assert_eq!(
///     start.description,
///     "Enables the start command without any pre-configured scope."
/// );
/// assert!(registry.lookup("oauth:allow-refresh").is_none());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PermissionRegistry {
    entries: &'static [PermissionDescriptor],
}

impl PermissionRegistry {
    /// Wrap an arbitrary static table. Call [`validate`](Self::validate) to
    /// check it.
    pub const fn new(entries: &'static [PermissionDescriptor]) -> Self {
        Self { entries }
    }

    /// The oauth plugin's table: allow/deny for `cancel` and `start`.
    pub fn oauth() -> Self {
        Self::new(OAUTH_PERMISSIONS)
    }

    /// Find a descriptor by exact identifier match
    pub fn lookup(&self, identifier: &str) -> Option<&'static PermissionDescriptor> {
        self.entries.iter().find(|d| d.identifier == identifier)
    }

    /// Iterate entries in table order
    pub fn iter(&self) -> impl Iterator<Item = &'static PermissionDescriptor> + use<> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Namespace of the first entry, if it parses
    pub fn namespace(&self) -> Option<&'static str> {
        let first = self.entries.first()?;
        split_identifier(first.identifier).ok().map(|(ns, _, _)| ns)
    }

    /// Distinct command names, in order of first appearance
    pub fn commands(&self) -> Vec<&'static str> {
        let mut seen = Vec::new();
        for descriptor in self.entries {
            if let Ok((_, _, command)) = split_identifier(descriptor.identifier) {
                if !seen.contains(&command) {
                    seen.push(command);
                }
            }
        }
        seen
    }

    /// The `(allow, deny)` entries for a command, if both exist
    pub fn pair(
        &self,
        command: &str,
    ) -> Option<(&'static PermissionDescriptor, &'static PermissionDescriptor)> {
        let find = |effect: Effect| {
            self.entries.iter().find(|d| {
                matches!(split_identifier(d.identifier), Ok((_, e, c)) if e == effect && c == command)
            })
        };
        Some((find(Effect::Allow)?, find(Effect::Deny)?))
    }

    /// Check the table invariants.
    ///
    /// - every identifier parses as `<namespace>:<allow|deny>-<command>`
    /// - identifiers are unique
    /// - all entries share one namespace
    /// - every command has exactly one allow and exactly one deny entry
    pub fn validate(&self) -> Result<(), OAuthError> {
        validate_identifiers(self.entries.iter().map(|d| d.identifier))
    }

    /// Render the table as a two-column markdown table.
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "| {} | {} |\n|---|---|\n",
            HEADER_IDENTIFIER, HEADER_DESCRIPTION
        );
        for descriptor in self.entries {
            out.push_str(&format!(
                "| `{}` | {} |\n",
                descriptor.identifier, descriptor.description
            ));
        }
        out
    }

    /// Read a table in the format produced by [`to_markdown`](Self::to_markdown).
    ///
    /// The header and separator rows are required. Backticks around the
    /// identifier are optional. The parsed table must satisfy the same
    /// invariants as [`validate`](Self::validate).
    pub fn parse_markdown(text: &str) -> Result<Vec<OwnedDescriptor>, OAuthError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(n, line)| (n + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let (header_no, header) = lines
            .next()
            .ok_or_else(|| OAuthError::InvalidRegistry("empty table".to_string()))?;
        let (first, second) = split_row(header).ok_or_else(|| {
            OAuthError::InvalidRegistry(format!("line {}: malformed header row", header_no))
        })?;
        if !first.eq_ignore_ascii_case(HEADER_IDENTIFIER) || !second.eq_ignore_ascii_case(HEADER_DESCRIPTION)
        {
            return Err(OAuthError::InvalidRegistry(format!(
                "line {}: expected '{} | {}' header",
                header_no, HEADER_IDENTIFIER, HEADER_DESCRIPTION
            )));
        }

        let (sep_no, separator) = lines.next().ok_or_else(|| {
            OAuthError::InvalidRegistry("missing separator row".to_string())
        })?;
        if !is_separator(separator) {
            return Err(OAuthError::InvalidRegistry(format!(
                "line {}: expected separator row",
                sep_no
            )));
        }

        let mut descriptors = Vec::new();
        for (line_no, line) in lines {
            let (identifier, description) = split_row(line).ok_or_else(|| {
                OAuthError::InvalidRegistry(format!("line {}: expected two columns", line_no))
            })?;
            let identifier = identifier.trim_matches('`').trim();
            if identifier.is_empty() || description.is_empty() {
                return Err(OAuthError::InvalidRegistry(format!(
                    "line {}: empty cell",
                    line_no
                )));
            }
            descriptors.push(OwnedDescriptor {
                identifier: identifier.to_string(),
                description: description.to_string(),
            });
        }

        validate_identifiers(descriptors.iter().map(|d| d.identifier.as_str()))?;
        Ok(descriptors)
    }
}

impl IntoIterator for PermissionRegistry {
    type Item = &'static PermissionDescriptor;
    type IntoIter = std::slice::Iter<'static, PermissionDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Split `| a | b |` into `("a", "b")`. The description may itself contain `|`.
fn split_row(line: &str) -> Option<(&str, &str)> {
    let inner = line.strip_prefix('|')?;
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    let (first, second) = inner.split_once('|')?;
    Some((first.trim(), second.trim()))
}

fn is_separator(line: &str) -> bool {
    match split_row(line) {
        Some((a, b)) => [a, b]
            .iter()
            .all(|cell| !cell.is_empty() && cell.chars().all(|c| c == '-' || c == ':')),
        None => false,
    }
}

fn validate_identifiers<'a>(identifiers: impl Iterator<Item = &'a str>) -> Result<(), OAuthError> {
    let mut seen = HashSet::new();
    let mut namespace: Option<&str> = None;
    // command -> (allow count, deny count)
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    let mut order = Vec::new();

    for identifier in identifiers {
        let (ns, effect, command) = split_identifier(identifier)?;

        if !seen.insert(identifier) {
            return Err(OAuthError::InvalidRegistry(format!(
                "duplicate identifier '{}'",
                identifier
            )));
        }

        match namespace {
            None => namespace = Some(ns),
            Some(expected) if expected != ns => {
                return Err(OAuthError::InvalidRegistry(format!(
                    "identifier '{}' is outside namespace '{}'",
                    identifier, expected
                )));
            }
            Some(_) => {}
        }

        let entry = counts.entry(command).or_insert_with(|| {
            order.push(command);
            (0, 0)
        });
        match effect {
            Effect::Allow => entry.0 += 1,
            Effect::Deny => entry.1 += 1,
        }
    }

    for command in order {
        let (allow, deny) = counts[command];
        if allow != 1 || deny != 1 {
            return Err(OAuthError::InvalidRegistry(format!(
                "command '{}' needs exactly one allow and one deny entry (found {} allow, {} deny)",
                command, allow, deny
            )));
        }
    }

    Ok(())
}
