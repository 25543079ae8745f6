//! Typed view over vendor window records.
//!
//! The vendor returns loosely-structured JSON; only the fields the
//! lifecycle manager needs are lifted into named fields, everything else
//! rides along in `extra` so window creation can clone a template config
//! without understanding it.

use serde::{Deserialize, Serialize};

use crate::models::account::normalize_email;

/// Device profile a window is configured as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Desktop => "desktop",
            DeviceClass::Mobile => "mobile",
        }
    }

    /// Vendor wire value for the `ostype` field.
    pub fn vendor_os_type(&self) -> &'static str {
        match self {
            DeviceClass::Desktop => "PC",
            DeviceClass::Mobile => "Android",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "desktop" => Some(DeviceClass::Desktop),
            "mobile" => Some(DeviceClass::Mobile),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A managed browser window (fingerprinted profile) as reported by the
/// vendor API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Bound account identity, when the vendor tracks one.
    #[serde(rename = "userName", default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Free-text remark; older windows carry the account line here instead
    /// of `userName`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    /// Creation sequence number, used for least-recently-created eviction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(rename = "ostype", default, skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(
        rename = "browserFingerPrint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub fingerprint: Option<serde_json::Value>,
    /// Remaining vendor fields, preserved verbatim for template cloning.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Separators accepted when an account line is packed into the remark
/// field (`email----password----recovery----secret`).
const REMARK_SEPARATORS: [&str; 6] = ["----", "---", "|", ",", ";", "\t"];

/// Pull the leading email out of a packed remark line.
pub fn email_from_remark(remark: &str) -> Option<String> {
    let remark = remark.trim();
    if remark.is_empty() {
        return None;
    }
    for sep in REMARK_SEPARATORS {
        if remark.contains(sep) {
            return remark
                .split(sep)
                .next()
                .map(|part| normalize_email(part))
                .filter(|e| !e.is_empty());
        }
    }
    remark
        .split_whitespace()
        .next()
        .map(normalize_email)
        .filter(|e| !e.is_empty())
}

impl WindowInfo {
    /// Whether this window is bound to the given account. The `userName`
    /// field wins; windows without one fall back to the remark prefix.
    pub fn matches_email(&self, email: &str) -> bool {
        let target = normalize_email(email);
        if target.is_empty() {
            return false;
        }
        if let Some(user) = self.user_name.as_deref() {
            let user = normalize_email(user);
            if !user.is_empty() {
                return user == target;
            }
        }
        match self.remark.as_deref().and_then(email_from_remark) {
            Some(remark_email) => remark_email == target,
            None => false,
        }
    }

    /// Device class derived from the window's os fields, checking the
    /// fingerprint sub-config when the top-level fields are absent.
    pub fn device_class(&self) -> DeviceClass {
        let mut haystacks: Vec<String> = Vec::new();
        if let Some(v) = &self.os_type {
            haystacks.push(v.to_lowercase());
        }
        if let Some(v) = &self.os {
            haystacks.push(v.to_lowercase());
        }
        if let Some(fp) = &self.fingerprint {
            for key in ["ostype", "os"] {
                if let Some(v) = fp.get(key).and_then(|v| v.as_str()) {
                    haystacks.push(v.to_lowercase());
                }
            }
        }
        if haystacks.iter().any(|h| h.contains("android")) {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }

    pub fn seq(&self) -> i64 {
        self.seq.unwrap_or(0)
    }

    /// Display name for log lines: window name, bound user, or the id.
    pub fn display_name(&self) -> &str {
        self.user_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(user_name: Option<&str>, remark: Option<&str>) -> WindowInfo {
        WindowInfo {
            id: "w1".to_string(),
            name: None,
            user_name: user_name.map(String::from),
            remark: remark.map(String::from),
            seq: None,
            os_type: None,
            os: None,
            fingerprint: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_match_by_user_name() {
        let w = window(Some("User@Example.com"), None);
        assert!(w.matches_email("user@example.com"));
        assert!(!w.matches_email("other@example.com"));
    }

    #[test]
    fn test_user_name_wins_over_remark() {
        let w = window(Some("a@x.com"), Some("b@x.com----pw"));
        assert!(w.matches_email("a@x.com"));
        assert!(!w.matches_email("b@x.com"));
    }

    #[test]
    fn test_match_by_remark_prefix() {
        let w = window(None, Some("c@x.com----pw----rec@x.com----SECRET"));
        assert!(w.matches_email("C@x.com"));
        let w = window(None, Some("d@x.com extra words"));
        assert!(w.matches_email("d@x.com"));
        let w = window(None, Some(""));
        assert!(!w.matches_email("d@x.com"));
    }

    #[test]
    fn test_device_class_from_fingerprint() {
        let mut w = window(None, None);
        assert_eq!(w.device_class(), DeviceClass::Desktop);

        w.os_type = Some("Android".to_string());
        assert_eq!(w.device_class(), DeviceClass::Mobile);

        w.os_type = None;
        w.fingerprint = Some(serde_json::json!({"os": "Linux armv8l", "ostype": "Android"}));
        assert_eq!(w.device_class(), DeviceClass::Mobile);
    }

    #[test]
    fn test_extra_fields_survive_round_trip() {
        let raw = serde_json::json!({
            "id": "abc",
            "userName": "a@x.com",
            "seq": 7,
            "proxyType": "noproxy",
            "browserFingerPrint": {"coreVersion": "140"}
        });
        let info: WindowInfo = serde_json::from_value(raw).unwrap();
        assert_eq!(info.seq(), 7);
        assert_eq!(
            info.extra.get("proxyType").and_then(|v| v.as_str()),
            Some("noproxy")
        );
    }
}
