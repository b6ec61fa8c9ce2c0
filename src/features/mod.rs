//! Resource models and their per-resource behaviour

pub mod analytics;
pub mod audits;
pub mod companies;
pub mod employees;
pub mod equipments;
#[allow(clippy::module_inception)]
pub mod features;
pub mod loans;
pub mod modules;
pub mod notifications;
pub mod push_subscriptions;
pub mod roles;
pub mod s3;
pub mod suppliers;
pub mod users;

use axum::Router;
use std::sync::Arc;

use crate::api::crud;
use crate::auth::service::AUTH_SESSIONS;
use crate::registry::{MODELS, RegistryError};
use crate::resource::ResourceDescriptor;
use crate::state::AppState;

/// Every model the API knows, in registration order
pub fn descriptors() -> [&'static ResourceDescriptor; 15] {
    [
        &companies::COMPANIES,
        &features::FEATURES,
        &modules::MODULES,
        &roles::ROLES,
        &users::USERS,
        &employees::EMPLOYEES,
        &suppliers::SUPPLIERS,
        &equipments::EQUIPMENTS,
        &loans::LOANS,
        &notifications::NOTIFICATIONS,
        &push_subscriptions::PUSH_SUBSCRIPTIONS,
        &audits::AUDITS,
        &s3::S3_OBJECTS,
        &analytics::ANALYTICS,
        &AUTH_SESSIONS,
    ]
}

/// Populate the process-wide registry; safe to call more than once
pub fn register_all() -> Result<(), RegistryError> {
    for descriptor in descriptors() {
        MODELS.register(descriptor)?;
    }
    tracing::debug!(models = MODELS.len(), "resource models registered");
    Ok(())
}

/// JSON:API routes of every resource, custom actions included
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(crud::routes::<companies::Company>())
        .merge(crud::routes::<features::Feature>())
        .merge(crud::routes::<modules::Module>())
        .merge(crud::routes::<roles::Role>())
        .merge(crud::routes::<users::User>())
        .merge(crud::routes::<employees::Employee>())
        .merge(crud::routes::<suppliers::Supplier>())
        .merge(crud::routes::<equipments::Equipment>())
        .merge(crud::routes::<loans::Loan>())
        .merge(crud::routes::<notifications::Notification>())
        .merge(crud::routes::<push_subscriptions::PushSubscription>())
        .merge(crud::routes::<audits::Audit>())
        .merge(crud::routes::<s3::S3Object>())
        .merge(crate::api::actions::routes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_idempotent() {
        register_all().unwrap();
        let before = MODELS.len();
        register_all().unwrap();
        assert_eq!(MODELS.len(), before);
        for descriptor in descriptors() {
            assert_eq!(MODELS.by_endpoint(descriptor.endpoint).unwrap().label, descriptor.label);
        }
    }
}
