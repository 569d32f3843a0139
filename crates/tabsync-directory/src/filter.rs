//! LDAP filter construction helpers.

/// Escape special characters in LDAP filter values (RFC 4515).
///
/// Characters that must be escaped: `\` `*` `(` `)` NUL.
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

/// Windows FILETIME epoch offset: 100-nanosecond intervals between
/// 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET: i64 = 116_444_736_000_000_000;

/// Convert a Unix timestamp (seconds) to the directory's native
/// 100-nanosecond FILETIME integer form.
#[must_use]
pub fn unix_to_filetime(unix_secs: i64) -> i64 {
    unix_secs * 10_000_000 + FILETIME_UNIX_OFFSET
}

/// Filter matching an account that is neither expired nor disabled at the
/// given point in time.
///
/// `accountExpires` of 0 means "never expires"; the `userAccountControl`
/// ACCOUNTDISABLE bit (0x2) is matched with the LDAP bitwise-AND rule.
#[must_use]
pub fn enabled_account_filter(now_unix_secs: i64) -> String {
    format!(
        "(&(|(accountExpires=0)(accountExpires>={}))(!(userAccountControl:1.2.840.113556.1.4.803:=2)))",
        unix_to_filetime(now_unix_secs)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_rfc4515_metacharacters() {
        assert_eq!(escape_filter_value("a*b"), "a\\2ab");
        assert_eq!(escape_filter_value("(x)"), "\\28x\\29");
        assert_eq!(escape_filter_value("back\\slash"), "back\\5cslash");
        assert_eq!(escape_filter_value("nul\0byte"), "nul\\00byte");
        assert_eq!(escape_filter_value("plain"), "plain");
    }

    #[test]
    fn filetime_conversion_matches_known_value() {
        // 2020-01-01T00:00:00Z
        assert_eq!(unix_to_filetime(1_577_836_800), 132_223_104_000_000_000);
    }

    #[test]
    fn enabled_filter_embeds_timestamp() {
        let f = enabled_account_filter(0);
        assert!(f.contains("accountExpires>=116444736000000000"));
        assert!(f.contains("userAccountControl:1.2.840.113556.1.4.803:=2"));
    }
}
