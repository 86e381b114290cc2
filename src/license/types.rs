use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::state_machine::EntitlementState;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineIdentity {
    pub machine_id: String,
    pub computer_name: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActivationType {
    Full,
    Trial,
    #[default]
    #[serde(rename = "")]
    None,
}

impl ActivationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationType::Full => "full",
            ActivationType::Trial => "trial",
            ActivationType::None => "",
        }
    }
}

/// The persisted entitlement.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRecord {
    pub is_activated: bool,
    pub activation_type: ActivationType,
    pub activation_code: String,
    pub machine_id: String,
    pub activation_date: DateTime<Utc>,
    pub is_trial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_start_date: Option<DateTime<Utc>>,
}

impl ActivationRecord {
    pub fn full(code: &str, machine_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            is_activated: true,
            activation_type: ActivationType::Full,
            activation_code: code.to_string(),
            machine_id: machine_id.to_string(),
            activation_date: now,
            is_trial: false,
            trial_days: None,
            trial_start_date: None,
        }
    }

    pub fn trial(code: &str, machine_id: &str, days: u32, now: DateTime<Utc>) -> Self {
        Self {
            is_activated: true,
            activation_type: ActivationType::Trial,
            activation_code: code.to_string(),
            machine_id: machine_id.to_string(),
            activation_date: now,
            is_trial: true,
            trial_days: Some(days),
            trial_start_date: Some(now),
        }
    }

    /// Checks the shape invariants a stored record must satisfy.
    ///
    /// A record that is not activated never entitles anything, so it fails too.
    pub fn is_consistent(&self) -> bool {
        if !self.is_activated || self.activation_code.trim().is_empty() {
            return false;
        }
        if self.is_trial {
            self.activation_type == ActivationType::Trial
                && matches!(self.trial_days, Some(d) if (1..=365).contains(&d))
                && self.trial_start_date.is_some()
        } else {
            self.activation_type == ActivationType::Full
        }
    }

    /// The entitled state this record grants, if any.
    pub fn granted_state(&self) -> Option<EntitlementState> {
        if !self.is_consistent() {
            return None;
        }
        match self.activation_type {
            ActivationType::Full => Some(EntitlementState::FullActive),
            ActivationType::Trial => Some(EntitlementState::TrialActive),
            ActivationType::None => None,
        }
    }
}

/// Watermark used by the tamper detector. Never decreases.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TamperCheckState {
    pub last_known_good_timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct TamperCheck {
    pub manipulated: bool,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest<'a> {
    pub activation_code: &'a str,
    pub machine_id: &'a str,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest<'a> {
    pub activation_code: &'a str,
    pub machine_id: &'a str,
    pub computer_name: &'a str,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(default)]
    pub valid: bool,
    #[serde(rename = "type", default, deserialize_with = "lenient_activation_type")]
    pub activation_type: ActivationType,
    #[serde(default)]
    pub deactivated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Null, missing or unrecognised `type` values decode as `ActivationType::None`.
fn lenient_activation_type<'de, D>(deserializer: D) -> Result<ActivationType, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw.as_ref().and_then(|v| v.as_str()) {
        Some("full") => ActivationType::Full,
        Some("trial") => ActivationType::Trial,
        _ => ActivationType::None,
    })
}

impl VerifyResponse {
    /// A previously valid code that the authority no longer honours.
    pub fn is_revocation(&self) -> bool {
        self.deactivated || (self.success && !self.valid)
    }

    /// Good enough to accept a brand-new activation of `expected`.
    pub fn confirms(&self, expected: ActivationType) -> bool {
        self.success && self.valid && !self.deactivated && self.activation_type == expected
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiError {
    #[serde(default)]
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LicenseStatus {
    pub status: EntitlementState,
    pub trial_days_left: Option<i64>,
    pub license_type: Option<String>,
    pub activation_code: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Notifications for the hosting shell when entitlement ends.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EntitlementEvent {
    TrialExpired,
    Revoked { message: String },
    Locked,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_record_uses_camel_case_wire_names() {
        let record = ActivationRecord::trial("HT-5-ABCDEF12", "machine-1", 5, at());
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["isActivated"], true);
        assert_eq!(json["activationType"], "trial");
        assert_eq!(json["trialDays"], 5);
        assert!(json.get("trialStartDate").is_some());
    }

    #[test]
    fn test_full_record_omits_trial_fields() {
        let record = ActivationRecord::full("HK-ABCDEF12-A-B-C", "machine-1", at());
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["activationType"], "full");
        assert!(json.get("trialDays").is_none());
        assert!(json.get("trialStartDate").is_none());
    }

    #[test]
    fn test_empty_activation_type_parses() {
        let parsed: ActivationType = serde_json::from_str("\"\"").unwrap();
        assert_eq!(parsed, ActivationType::None);
    }

    #[test]
    fn test_consistency_rules() {
        assert!(ActivationRecord::full("c", "m", at()).is_consistent());
        assert!(ActivationRecord::trial("c", "m", 30, at()).is_consistent());

        let mut broken = ActivationRecord::trial("c", "m", 30, at());
        broken.trial_start_date = None;
        assert!(!broken.is_consistent());

        let mut wrong_type = ActivationRecord::full("c", "m", at());
        wrong_type.activation_type = ActivationType::Trial;
        assert!(!wrong_type.is_consistent());

        let mut too_long = ActivationRecord::trial("c", "m", 30, at());
        too_long.trial_days = Some(400);
        assert!(!too_long.is_consistent());
    }

    #[test]
    fn test_unactivated_record_grants_nothing() {
        let mut record = ActivationRecord::full("c", "m", at());
        record.is_activated = false;
        record.activation_type = ActivationType::None;
        assert!(!record.is_consistent());
        assert_eq!(record.granted_state(), None);

        let mut flag_only = ActivationRecord::full("c", "m", at());
        flag_only.is_activated = false;
        assert_eq!(flag_only.granted_state(), None);

        let mut untyped = ActivationRecord::full("c", "m", at());
        untyped.activation_type = ActivationType::None;
        assert_eq!(untyped.granted_state(), None);

        assert_eq!(
            ActivationRecord::full("c", "m", at()).granted_state(),
            Some(EntitlementState::FullActive)
        );
        assert_eq!(
            ActivationRecord::trial("c", "m", 3, at()).granted_state(),
            Some(EntitlementState::TrialActive)
        );
    }

    #[test]
    fn test_unusual_type_values_still_decode() {
        let null_type: VerifyResponse = serde_json::from_str(
            r#"{"success":true,"valid":false,"type":null,"deactivated":true}"#,
        )
        .unwrap();
        assert_eq!(null_type.activation_type, ActivationType::None);
        assert!(null_type.is_revocation());

        let unknown_type: VerifyResponse = serde_json::from_str(
            r#"{"success":true,"valid":true,"type":"lifetime","deactivated":true,"message":"refunded"}"#,
        )
        .unwrap();
        assert_eq!(unknown_type.activation_type, ActivationType::None);
        assert!(unknown_type.is_revocation());
        assert!(!unknown_type.confirms(ActivationType::Full));

        let missing_type: VerifyResponse =
            serde_json::from_str(r#"{"success":true,"valid":true}"#).unwrap();
        assert!(!missing_type.confirms(ActivationType::Full));
        assert!(!missing_type.confirms(ActivationType::Trial));
    }

    #[test]
    fn test_verify_response_decoding() {
        let body = r#"{"success":true,"valid":true,"type":"trial","deactivated":false}"#;
        let parsed: VerifyResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.confirms(ActivationType::Trial));
        assert!(!parsed.confirms(ActivationType::Full));
        assert!(!parsed.is_revocation());
    }

    #[test]
    fn test_revocation_detection() {
        let deactivated: VerifyResponse =
            serde_json::from_str(r#"{"success":true,"valid":true,"type":"full","deactivated":true}"#)
                .unwrap();
        assert!(deactivated.is_revocation());

        let invalid: VerifyResponse =
            serde_json::from_str(r#"{"success":true,"valid":false,"type":"full","deactivated":false}"#)
                .unwrap();
        assert!(invalid.is_revocation());

        let server_fault: VerifyResponse =
            serde_json::from_str(r#"{"success":false,"message":"database unavailable"}"#).unwrap();
        assert!(!server_fault.is_revocation());
    }
}
