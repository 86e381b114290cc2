use crate::license::codes::mask_code;
use crate::license::{ActivationRecord, ErrorKind, LicenseStatus, MachineIdentity, TamperCheck};
use crate::log_context;
use crate::state::app_state::AppState;
use crate::utils::logger::{log_async_operation, LogContext};

/// Identity of this till, for display and for support requests
pub fn get_machine_info(state: &AppState) -> MachineIdentity {
    state.entitlement.machine_info().clone()
}

pub fn check_trial_used(state: &AppState) -> bool {
    state.entitlement.store().trial_used()
}

pub fn mark_trial_used(state: &AppState) -> Result<(), String> {
    state
        .entitlement
        .store()
        .mark_trial_used()
        .map_err(|e| format!("Failed to record trial use: {}", e))
}

/// Persist a record produced elsewhere and re-derive the session from it
pub fn save_activation(state: &AppState, record: ActivationRecord) -> Result<LicenseStatus, String> {
    let machine_id = &state.entitlement.machine_info().machine_id;
    if &record.machine_id != machine_id {
        return Err("Activation record belongs to a different machine".to_string());
    }
    if !record.is_activated {
        return Err("Activation record is not activated".to_string());
    }
    if record.granted_state().is_none() {
        return Err("Activation record is incomplete".to_string());
    }

    state
        .entitlement
        .store()
        .save(&record)
        .map_err(|e| format!("Failed to save activation: {}", e))?;
    state.entitlement.initialize();
    Ok(state.entitlement.status())
}

pub fn load_activation(state: &AppState) -> Option<ActivationRecord> {
    state.entitlement.store().load()
}

pub fn delete_activation(state: &AppState) -> Result<(), String> {
    state
        .entitlement
        .reset()
        .map_err(|e| format!("Failed to delete activation: {}", e))
}

pub fn check_time_manipulation(state: &AppState) -> TamperCheck {
    state.entitlement.check_time_manipulation()
}

/// Activate a full or trial code entered by the user
pub async fn activate_license(state: &AppState, code: String) -> Result<LicenseStatus, String> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err("Activation code cannot be empty".to_string());
    }

    let context = LogContext {
        fields: log_context! { "code" => mask_code(trimmed) },
    };
    log_async_operation("activate_license", Some(context), || state.entitlement.activate(trimmed))
        .await
        .map_err(|e| {
            match e.kind() {
                ErrorKind::Input => log::warn!("Activation refused: {}", e),
                _ => log::error!("Failed to activate license: {}", e),
            }
            e.to_string()
        })
}

pub fn check_license_status(state: &AppState) -> LicenseStatus {
    state.entitlement.status()
}

pub fn is_entitled(state: &AppState) -> bool {
    state.entitlement.is_entitled()
}

pub fn days_remaining(state: &AppState) -> i64 {
    state.entitlement.days_remaining()
}
