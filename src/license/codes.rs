//! Activation code grammar and offline structural validation.
//!
//! Two code shapes exist:
//!
//! - full: `HK-<MACHINEHASH>-<R1>-<R2>-<R3>`
//! - trial: `HT-<DAYS>-<MACHINEHASH>`
//!
//! `MACHINEHASH` is the first 8 hex characters (uppercase) of the SHA-256 of
//! the machine id. The random tokens of a full code are opaque here; whether a
//! code is genuine, unused or revoked is decided by the remote authority.

use sha2::{Digest, Sha256};

use super::error::{LicenseError, LicenseResult};
use super::types::ActivationType;

pub const FULL_PREFIX: &str = "HK";
pub const TRIAL_PREFIX: &str = "HT";
pub const MAX_TRIAL_DAYS: u32 = 365;

const FULL_TOKENS: usize = 5;
const TRIAL_TOKENS: usize = 3;
const MACHINE_HASH_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialGrant {
    pub days: u32,
}

/// A code that passed local validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationCode {
    Full { code: String },
    Trial { code: String, days: u32 },
}

impl ActivationCode {
    /// Normalizes `raw`, picks the grammar from its prefix and validates it against `machine_id`.
    pub fn parse(raw: &str, machine_id: &str) -> LicenseResult<Self> {
        let code = normalize(raw);
        match code.split('-').next() {
            Some(FULL_PREFIX) => {
                validate_full(&code, machine_id)?;
                Ok(Self::Full { code })
            }
            Some(TRIAL_PREFIX) => {
                let grant = validate_trial(&code, machine_id)?;
                Ok(Self::Trial {
                    code,
                    days: grant.days,
                })
            }
            _ => Err(LicenseError::Format(format!(
                "code must start with {}- (full) or {}- (trial)",
                FULL_PREFIX, TRIAL_PREFIX
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Full { code } | Self::Trial { code, .. } => code,
        }
    }

    pub fn activation_type(&self) -> ActivationType {
        match self {
            Self::Full { .. } => ActivationType::Full,
            Self::Trial { .. } => ActivationType::Trial,
        }
    }
}

pub fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}

/// First 8 uppercase hex characters of SHA-256(machine_id).
pub fn machine_hash(machine_id: &str) -> String {
    let digest = Sha256::digest(machine_id.as_bytes());
    let mut hash = hex::encode_upper(digest);
    hash.truncate(MACHINE_HASH_LEN);
    hash
}

pub fn validate_full(code: &str, machine_id: &str) -> LicenseResult<()> {
    let code = normalize(code);
    let tokens: Vec<&str> = code.split('-').collect();

    if tokens.len() != FULL_TOKENS {
        return Err(LicenseError::Format(
            "expected HK-XXXXXXXX-XXXX-XXXX-XXXX".to_string(),
        ));
    }
    if tokens[0] != FULL_PREFIX {
        return Err(LicenseError::Format("code must start with HK".to_string()));
    }

    check_machine(tokens[1], machine_id)
}

pub fn validate_trial(code: &str, machine_id: &str) -> LicenseResult<TrialGrant> {
    let code = normalize(code);
    let tokens: Vec<&str> = code.split('-').collect();

    if tokens.len() != TRIAL_TOKENS || tokens[0] != TRIAL_PREFIX {
        return Err(LicenseError::Format(
            "expected HT-<DAYS>-XXXXXXXX".to_string(),
        ));
    }

    let days = match tokens[1].parse::<u32>() {
        Ok(days) if (1..=MAX_TRIAL_DAYS).contains(&days) => days,
        _ => return Err(LicenseError::InvalidDayCount(tokens[1].to_string())),
    };

    check_machine(tokens[2], machine_id)?;
    Ok(TrialGrant { days })
}

fn check_machine(token: &str, machine_id: &str) -> LicenseResult<()> {
    let expected = machine_hash(machine_id);
    if token != expected {
        return Err(LicenseError::MachineMismatch { expected });
    }
    Ok(())
}

/// Masks everything but the prefix and last token, for logs and status output.
pub fn mask_code(code: &str) -> String {
    let tokens: Vec<&str> = code.split('-').collect();
    match tokens.as_slice() {
        [] | [_] => "****".to_string(),
        [first, middle @ .., last] => {
            let mut masked = vec![first.to_string()];
            masked.extend(middle.iter().map(|t| "*".repeat(t.len())));
            masked.push(last.to_string());
            masked.join("-")
        }
    }
}
