//! Fixed sentinels for the conformance testing mode.
//!
//! When the connect parameters equal the three login sentinels, a connector
//! must never touch a real backend: every operation returns the canned
//! values below. The host uses this mode to validate the plugin contract
//! without network access, so the values are identical across connectors.

use chrono::{NaiveDate, NaiveDateTime};

/// Sentinel server address enabling testing mode.
pub const TEST_SERVER: &str = "*server*";
/// Sentinel user name enabling testing mode.
pub const TEST_USER: &str = "*userid*";
/// Sentinel password enabling testing mode.
pub const TEST_PASS: &str = "*passwd*";

/// The single project visible in testing mode.
pub const TEST_PROJECT: &str = "*project*";
/// The single changed record reported in testing mode.
pub const TEST_RECORD: &str = "*defect*";
/// The single field present on the canned record.
pub const TEST_FIELD: &str = "*name*";
/// The value of [`TEST_FIELD`].
pub const TEST_VALUE: &str = "*value*";
/// The canned operator message.
pub const TEST_MESSAGE: &str = "Test message";

/// Whether the three connect parameters select testing mode.
pub fn is_test_login(server: &str, user: &str, password: &str) -> bool {
    server == TEST_SERVER && user == TEST_USER && password == TEST_PASS
}

/// The fixed server clock reported in testing mode.
pub fn canned_server_date() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2006, 5, 6)
        .expect("valid canned date")
        .and_hms_opt(12, 34, 56)
        .expect("valid canned time")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_match_is_exact() {
        assert!(is_test_login(TEST_SERVER, TEST_USER, TEST_PASS));
        assert!(!is_test_login("server", TEST_USER, TEST_PASS));
        assert!(!is_test_login(TEST_SERVER, "user", TEST_PASS));
        assert!(!is_test_login(TEST_SERVER, TEST_USER, ""));
    }

    #[test]
    fn canned_date_is_stable() {
        assert_eq!(
            canned_server_date().format("%Y/%m/%d %H:%M:%S").to_string(),
            "2006/05/06 12:34:56"
        );
    }
}
