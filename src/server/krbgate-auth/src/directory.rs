//! Directory capability consumed by group resolution.
//!
//! The wire client sits behind these traits. A session is opened per
//! request; dropping it must release the underlying connection so that a
//! cancelled request never leaks one.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::LdapConfig;
use crate::error::DirectoryError;

/// One search result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Distinguished name.
    pub dn: String,
    /// Attribute values keyed by attribute name.
    pub attrs: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Values of an attribute, matched case-insensitively.
    pub fn values(&self, attr: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }
}

/// Opens directory sessions.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Connects to the first reachable server of `config`.
    async fn connect(&self, config: &LdapConfig) -> Result<Box<dyn DirectorySession>, DirectoryError>;
}

/// An open directory connection.
#[async_trait]
pub trait DirectorySession: Send {
    /// Authenticates the connection.
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), DirectoryError>;

    /// Runs a subtree search.
    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Closes the connection gracefully.
    async fn close(self: Box<Self>) -> Result<(), DirectoryError>;
}

/// Escapes a value for use inside an LDAP filter (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    ldap3::ldap_escape(value).into_owned()
}

/// Extracts a group name from a membership value.
///
/// `CN=Admins,OU=Groups,DC=example,DC=com` yields `Admins`; values that are
/// not DNs are returned as-is. RFC 4514 escapes in the value are decoded,
/// so `CN=Smith\, John` yields `Smith, John`.
pub fn group_name(value: &str) -> String {
    let first_rdn = first_rdn(value);
    match first_rdn.split_once('=') {
        Some((attr, name))
            if !attr.is_empty()
                && attr.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.') =>
        {
            unescape_rdn_value(name)
        },
        _ => value.to_string(),
    }
}

/// Decodes an RFC 4514 attribute value: `\,` style escapes and `\XX` hex
/// pairs. Unescaped surrounding spaces are dropped, escaped ones kept.
fn unescape_rdn_value(value: &str) -> String {
    let value = value.trim_start();
    let mut bytes = Vec::with_capacity(value.len());
    // Length of `bytes` after the last escaped byte; trailing trim stops there.
    let mut kept = 0;
    let mut rest = value.as_bytes();
    while let Some((&b, tail)) = rest.split_first() {
        rest = tail;
        if b != b'\\' {
            bytes.push(b);
            continue;
        }
        let hex = rest
            .get(..2)
            .and_then(|pair| std::str::from_utf8(pair).ok())
            .and_then(|pair| u8::from_str_radix(pair, 16).ok());
        match (hex, rest.split_first()) {
            (Some(decoded), _) => {
                bytes.push(decoded);
                rest = &rest[2..];
            },
            (None, Some((&escaped, tail))) => {
                bytes.push(escaped);
                rest = tail;
            },
            (None, None) => bytes.push(b),
        }
        kept = bytes.len();
    }
    while bytes.len() > kept && bytes.last() == Some(&b' ') {
        bytes.pop();
    }
    String::from_utf8(bytes).unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

fn first_rdn(dn: &str) -> &str {
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            ',' | '+' if !escaped => return &dn[..i],
            _ => escaped = false,
        }
    }
    dn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(escape_filter_value("alice"), "alice");
        let escaped = escape_filter_value("a*)(uid=*");
        assert!(!escaped.contains(['*', '(', ')']));
        assert!(escaped.to_ascii_lowercase().starts_with("a\\2a\\29\\28"));
    }

    #[test]
    fn test_group_name() {
        assert_eq!(group_name("CN=Admins,OU=Groups,DC=example,DC=com"), "Admins");
        assert_eq!(group_name("cn=dev ops,ou=groups"), "dev ops");
        assert_eq!(group_name("admins"), "admins");
    }

    #[test]
    fn test_group_name_unescapes_value() {
        assert_eq!(group_name("CN=Smith\\, John,OU=Groups"), "Smith, John");
        assert_eq!(group_name("CN=R\\+D\\;Ops,OU=Groups"), "R+D;Ops");
        assert_eq!(group_name("CN=\\\"Quoted\\\",OU=Groups"), "\"Quoted\"");
        assert_eq!(group_name("CN=back\\\\slash,OU=Groups"), "back\\slash");
        assert_eq!(group_name("CN=\\#hash,OU=Groups"), "#hash");
        assert_eq!(group_name("CN=trailing\\ ,OU=Groups"), "trailing ");
        assert_eq!(group_name("CN=\\ leading,OU=Groups"), " leading");
        assert_eq!(group_name("CN=caf\\C3\\A9,OU=Groups"), "café");
        assert_eq!(group_name("CN=a\\2cb,OU=Groups"), "a,b");
    }

    #[test]
    fn test_entry_values_case_insensitive() {
        let mut entry = DirectoryEntry::default();
        entry
            .attrs
            .insert("memberOf".to_string(), vec!["CN=A".to_string()]);
        assert_eq!(entry.values("memberof"), ["CN=A".to_string()]);
        assert!(entry.values("mail").is_empty());
    }
}
