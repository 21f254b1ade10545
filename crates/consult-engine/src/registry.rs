//! Advisor registry: validated CRUD over the advisor store.
//!
//! Counter maintenance (`total_assigned`, `total_completed`, the running
//! completion-time average) never goes through this module; only the
//! assignment and lifecycle paths in the engine touch counters, through the
//! store's atomic operations.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use laborline_consult_core::{
    validation, Advisor, AdvisorFilter, AdvisorId, ConsultError, NewAdvisor, UpdateAdvisor,
};

use crate::store::{AdvisorStore, RequestStore};
use crate::error::Result;

/// Registry of labor-law advisors
pub struct AdvisorRegistry {
    advisors: Arc<dyn AdvisorStore>,
    requests: Arc<dyn RequestStore>,
}

impl AdvisorRegistry {
    pub fn new(advisors: Arc<dyn AdvisorStore>, requests: Arc<dyn RequestStore>) -> Self {
        Self { advisors, requests }
    }

    /// Register a new advisor. Starts active with zeroed counters.
    pub async fn create(&self, new: NewAdvisor) -> Result<Advisor> {
        validation::validate_new_advisor(&new)?;
        let advisor = Advisor::from_new(new, Utc::now());
        AdvisorStore::insert(&*self.advisors, advisor.clone()).await?;
        info!("👤 Registered advisor {} ({})", advisor.name, advisor.id);
        Ok(advisor)
    }

    pub async fn get(&self, id: &AdvisorId) -> Result<Advisor> {
        self.advisors
            .get(id)
            .await?
            .ok_or_else(|| ConsultError::NotFound(format!("advisor {id}")).into())
    }

    /// Apply a partial profile update. `None` fields keep their current
    /// value; `messenger: Some(None)` clears the messenger handle.
    pub async fn update(&self, id: &AdvisorId, update: UpdateAdvisor) -> Result<Advisor> {
        validation::validate_update_advisor(&update)?;
        let mut advisor = self.get(id).await?;

        if let Some(name) = update.name {
            advisor.name = name;
        }
        if let Some(phone) = update.phone {
            advisor.phone = phone;
        }
        if let Some(email) = update.email {
            advisor.email = email;
        }
        if let Some(messenger) = update.messenger {
            advisor.messenger = messenger;
        }
        if let Some(region) = update.region {
            advisor.region = region;
        }
        if let Some(notes) = update.notes {
            advisor.notes = notes;
        }
        if let Some(specialties) = update.specialties {
            advisor.specialties = specialties;
        }
        advisor.updated_at = Utc::now();

        self.advisors.update_profile(&advisor).await?;
        debug!("Updated advisor profile {}", advisor.id);
        Ok(advisor)
    }

    /// Enable or disable an advisor. Disabling blocks new assignments but
    /// leaves existing links and counters untouched.
    pub async fn set_active(&self, id: &AdvisorId, active: bool) -> Result<Advisor> {
        if !self.advisors.set_active(id, active, Utc::now()).await? {
            return Err(ConsultError::NotFound(format!("advisor {id}")).into());
        }
        let advisor = self.get(id).await?;
        info!(
            "👤 Advisor {} is now {}",
            advisor.id,
            if active { "active" } else { "inactive" }
        );
        Ok(advisor)
    }

    /// Remove an advisor permanently.
    ///
    /// Refused while the advisor still holds PENDING or PROCESSING
    /// requests; those must be reassigned or resolved first. Links from
    /// terminal requests are severed with an audit note, so statistics
    /// over past requests degrade gracefully rather than dangling.
    /// Returns the number of severed links.
    pub async fn delete(&self, id: &AdvisorId) -> Result<u64> {
        let advisor = self.get(id).await?;

        let active = self.requests.count_active_for(id).await?;
        if active > 0 {
            return Err(ConsultError::HasActiveAssignments { count: active }.into());
        }

        let severed = self
            .requests
            .sever_advisor(id, Utc::now(), &format!("advisor {} removed", advisor.name))
            .await?;
        if !self.advisors.delete(id).await? {
            return Err(ConsultError::NotFound(format!("advisor {id}")).into());
        }

        info!(
            "👤 Removed advisor {} ({severed} past link(s) severed)",
            advisor.id
        );
        Ok(severed)
    }

    /// Filtered advisor search with pagination; most recent first
    pub async fn search(&self, filter: &AdvisorFilter) -> Result<(Vec<Advisor>, u64)> {
        self.advisors.search(filter).await
    }

    pub async fn list_all(&self) -> Result<Vec<Advisor>> {
        self.advisors.list_all().await
    }
}
