use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::{Authenticator, DESCRIPTION, LOGIN_PATH, LOGOUT_PATH};
use crate::authn::{AuthenticationFeedbackHandler, AuthenticationHandler};
use crate::config::AuthenticatorConfig;
use crate::holder::{AuthenticationHandlerHolder, AuthenticationRequirementHolder};

/// The source reported for requirements read from the authenticator configuration
pub const CONFIG_SOURCE: &str = "Authenticator configuration";

/// Identifies a component that registered handlers or requirements, so they can be removed again
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceId(pub u64);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service {}", self.0)
    }
}

/// Holders registered by other components, by the id they were registered under
pub(super) type Registered<H> = BTreeMap<ServiceId, Vec<Arc<H>>>;

impl Authenticator {
    /// Applies a new configuration. The requirement set is rebuilt from scratch and swapped in at
    /// once, so requests never see a partially applied configuration
    #[instrument(level = "debug", skip_all)]
    pub async fn on_config_changed(&self, config: AuthenticatorConfig) {
        // Holding the registrations serializes reloads with requirement registrations
        let registered = self.registered_requirements.lock().await;

        let config = Arc::new(config);
        let previous = std::mem::replace(&mut *self.config.write().await, config.clone());
        let (old, new) = (previous.sudo_settings(), config.sudo_settings());
        if old.cookie_name != new.cookie_name {
            info!(
                from = %old.cookie_name,
                to = %new.cookie_name,
                "Impersonation cookie name changed"
            );
        }
        if old.parameter_name != new.parameter_name {
            info!(
                from = %old.parameter_name,
                to = %new.parameter_name,
                "Impersonation parameter name changed"
            );
        }

        let mut holders = vec![Arc::new(AuthenticationRequirementHolder::new(
            "/",
            !config.anonymous_allowed,
            CONFIG_SOURCE,
        ))];
        holders.extend(
            config
                .requirements
                .iter()
                .filter_map(|entry| entry.to_holder(CONFIG_SOURCE))
                .map(Arc::new),
        );
        holders.push(Arc::new(AuthenticationRequirementHolder::new(
            LOGIN_PATH,
            false,
            DESCRIPTION,
        )));
        holders.push(Arc::new(AuthenticationRequirementHolder::new(
            LOGOUT_PATH,
            false,
            DESCRIPTION,
        )));
        holders.extend(registered.values().flatten().cloned());

        debug!(count = holders.len(), "Replacing authentication requirements");
        self.requirements.replace_all(holders).await;
    }

    /// Registers the handler for each of the given paths. Blank paths are ignored. Registering
    /// again under the same id replaces the earlier registration
    #[instrument(level = "debug", skip(self, handler, feedback))]
    pub async fn on_handler_registered(
        &self,
        id: ServiceId,
        paths: &[&str],
        handler: Arc<dyn AuthenticationHandler>,
        feedback: Option<Arc<dyn AuthenticationFeedbackHandler>>,
        description: &str,
    ) {
        let mut registered = self.registered_handlers.lock().await;
        if let Some(old) = registered.remove(&id) {
            remove_handlers(self, old).await;
        }

        let mut holders = Vec::new();
        for path in paths.iter().filter(|p| !p.trim().is_empty()) {
            let mut holder = AuthenticationHandlerHolder::new(path, handler.clone(), description);
            if let Some(feedback) = feedback.clone() {
                holder = holder.with_feedback(feedback);
            }
            let holder = Arc::new(holder);
            self.handlers.add_holder(holder.clone()).await;
            holders.push(holder);
        }
        if holders.is_empty() {
            warn!("Handler registered without any path, ignoring it");
            return;
        }
        registered.insert(id, holders);
    }

    /// Replaces the registration of the handler, for example because its paths changed
    pub async fn on_handler_modified(
        &self,
        id: ServiceId,
        paths: &[&str],
        handler: Arc<dyn AuthenticationHandler>,
        feedback: Option<Arc<dyn AuthenticationFeedbackHandler>>,
        description: &str,
    ) {
        self.on_handler_unregistered(id).await;
        self.on_handler_registered(id, paths, handler, feedback, description)
            .await;
    }

    /// Removes all holders registered under the id. Unknown ids are ignored
    #[instrument(level = "debug", skip(self))]
    pub async fn on_handler_unregistered(&self, id: ServiceId) {
        let removed = self.registered_handlers.lock().await.remove(&id);
        if let Some(holders) = removed {
            remove_handlers(self, holders).await;
        }
    }

    /// Registers authentication requirements on behalf of another component. The patterns use
    /// the same `+/path` and `-/path` syntax as the configuration. These requirements survive
    /// configuration changes until they are unregistered
    #[instrument(level = "debug", skip(self))]
    pub async fn on_requirements_registered(&self, id: ServiceId, source: &str, patterns: &[&str]) {
        let mut registered = self.registered_requirements.lock().await;
        if let Some(old) = registered.remove(&id) {
            remove_requirements(self, old).await;
        }

        let holders: Vec<_> = patterns
            .iter()
            .filter_map(|p| AuthenticationRequirementHolder::from_config(p, source))
            .map(Arc::new)
            .collect();
        for holder in holders.iter() {
            self.requirements.add_holder(holder.clone()).await;
        }
        if !holders.is_empty() {
            registered.insert(id, holders);
        }
    }

    /// Removes the requirements registered under the id. Unknown ids are ignored
    #[instrument(level = "debug", skip(self))]
    pub async fn on_requirements_unregistered(&self, id: ServiceId) {
        let mut registered = self.registered_requirements.lock().await;
        if let Some(holders) = registered.remove(&id) {
            remove_requirements(self, holders).await;
        }
    }
}

async fn remove_handlers(
    authenticator: &Authenticator,
    holders: Vec<Arc<AuthenticationHandlerHolder>>,
) {
    for holder in holders.iter() {
        authenticator.handlers.remove_holder(holder).await;
    }
}

async fn remove_requirements(
    authenticator: &Authenticator,
    holders: Vec<Arc<AuthenticationRequirementHolder>>,
) {
    for holder in holders.iter() {
        authenticator.requirements.remove_holder(holder).await;
    }
}
