//! Field validation for advisor and request intake.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ConsultError, Result};
use crate::types::{NewAdvisor, NewConsultationRequest, UpdateAdvisor};

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9][0-9 \-]{6,19}$").unwrap());

/// Validate email format
pub fn validate_email(email: &str) -> Result<()> {
    if !EMAIL_REGEX.is_match(email) {
        return Err(ConsultError::Validation(format!(
            "invalid email address: {email}"
        )));
    }
    Ok(())
}

/// Validate phone number format
pub fn validate_phone(phone: &str) -> Result<()> {
    if !PHONE_REGEX.is_match(phone) {
        return Err(ConsultError::Validation(format!(
            "invalid phone number: {phone}"
        )));
    }
    Ok(())
}

/// Validate advisor creation fields. Email uniqueness is checked against
/// the store, not here.
pub fn validate_new_advisor(new: &NewAdvisor) -> Result<()> {
    if new.name.trim().is_empty() {
        return Err(ConsultError::Validation("advisor name is required".into()));
    }
    validate_phone(&new.phone)?;
    validate_email(&new.email)?;
    if new.specialties.is_empty() {
        return Err(ConsultError::Validation(
            "advisor needs at least one specialty".into(),
        ));
    }
    Ok(())
}

/// Validate the populated fields of an advisor update
pub fn validate_update_advisor(update: &UpdateAdvisor) -> Result<()> {
    if let Some(name) = &update.name {
        if name.trim().is_empty() {
            return Err(ConsultError::Validation("advisor name is required".into()));
        }
    }
    if let Some(phone) = &update.phone {
        validate_phone(phone)?;
    }
    if let Some(email) = &update.email {
        validate_email(email)?;
    }
    if let Some(specialties) = &update.specialties {
        if specialties.is_empty() {
            return Err(ConsultError::Validation(
                "advisor needs at least one specialty".into(),
            ));
        }
    }
    Ok(())
}

/// Validate consultation intake fields
pub fn validate_new_request(new: &NewConsultationRequest) -> Result<()> {
    if new.requester_name.trim().is_empty() {
        return Err(ConsultError::Validation(
            "requester name is required".into(),
        ));
    }
    validate_phone(&new.phone)?;
    if let Some(email) = &new.email {
        validate_email(email)?;
    }
    if new.contact_methods.is_empty() {
        return Err(ConsultError::Validation(
            "at least one preferred contact method is required".into(),
        ));
    }
    if new.details.trim().is_empty() {
        return Err(ConsultError::Validation(
            "problem details are required".into(),
        ));
    }
    Ok(())
}
