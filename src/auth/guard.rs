//! Capability checks shared by the item registry and the transaction engine.
//!
//! The predicates are pure; the `require_*` helpers turn a failed predicate
//! into the matching [`ServiceError`].

use chrono::{Datelike, NaiveDate};
use uuid::Uuid;

use super::Identity;
use crate::errors::ServiceError;

pub const ADULT_AGE: u32 = 18;

/// Verification levels a caller may be required to hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Required {
    EmailVerified,
    FullyVerified,
    Adult,
}

pub fn is_owner(identity: &Identity, owner_id: Uuid) -> bool {
    identity.user_id == owner_id
}

/// Both sides must be known and equal.
pub fn is_same_municipality(a: Option<Uuid>, b: Option<Uuid>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

/// True when buyer and seller are the same user.
pub fn blocks_self_transaction(buyer_id: Uuid, seller_id: Uuid) -> bool {
    buyer_id == seller_id
}

/// Full years between `date_of_birth` and `today`.
pub fn age_on(date_of_birth: NaiveDate, today: NaiveDate) -> u32 {
    if today < date_of_birth {
        return 0;
    }
    let mut years = today.year() - date_of_birth.year();
    if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

pub fn meets_verification_level(identity: &Identity, required: Required, today: NaiveDate) -> bool {
    match required {
        Required::EmailVerified => identity.email_verified,
        Required::FullyVerified => identity.fully_verified,
        Required::Adult => identity
            .date_of_birth
            .map(|dob| age_on(dob, today) >= ADULT_AGE)
            .unwrap_or(false),
    }
}

pub fn require_owner(identity: &Identity, owner_id: Uuid, message: &str) -> Result<(), ServiceError> {
    if is_owner(identity, owner_id) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(message.to_string()))
    }
}

pub fn require_same_municipality(
    caller: Option<Uuid>,
    target: Option<Uuid>,
) -> Result<(), ServiceError> {
    if is_same_municipality(caller, target) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "Transactions are limited to your municipality".to_string(),
        ))
    }
}

pub fn require_distinct_parties(buyer_id: Uuid, seller_id: Uuid) -> Result<(), ServiceError> {
    if blocks_self_transaction(buyer_id, seller_id) {
        Err(ServiceError::Forbidden(
            "You cannot transact with your own item".to_string(),
        ))
    } else {
        Ok(())
    }
}

pub fn require_verification(
    identity: &Identity,
    required: Required,
    today: NaiveDate,
) -> Result<(), ServiceError> {
    if meets_verification_level(identity, required, today) {
        return Ok(());
    }
    let message = match required {
        Required::EmailVerified => "Email verification required",
        Required::FullyVerified => "Full account verification required",
        Required::Adult => "You must be at least 18 years old",
    };
    Err(ServiceError::PreconditionFailed(message.to_string()))
}
