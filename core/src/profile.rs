/// Display profile lookup for conversation headers and list rows
use crate::local_store::ProfileCache;
use crate::model::{Conversation, Identity, Profile};
use crate::store::DocumentStore;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ProfileResolver {
    store: Arc<dyn DocumentStore>,
    cache: ProfileCache,
    viewer: Identity,
}

impl ProfileResolver {
    pub fn new(store: Arc<dyn DocumentStore>, cache: ProfileCache, viewer: Identity) -> Self {
        Self {
            store,
            cache,
            viewer,
        }
    }

    /// Cache the signed-in user's own fields
    pub fn remember_viewer(&self) {
        if let Err(e) = self.cache.put(&self.viewer.profile()) {
            warn!("Could not cache own profile: {}", e);
        }
    }

    /// Profile of whoever the viewer is talking to
    pub async fn counterpart_profile(&self, conversation: &Conversation) -> Profile {
        let viewer = self.viewer.participant_id.as_str();
        match conversation.counterpart_of(viewer) {
            Some(other) if other == viewer => self.own_profile(),
            Some(other) => self.lookup(other).await,
            None => self.own_profile(),
        }
    }

    /// Store first, cache on failure or absence, id as last resort
    pub async fn lookup(&self, participant_id: &str) -> Profile {
        match self.store.get_profile(participant_id).await {
            Ok(Some(profile)) => {
                if let Err(e) = self.cache.put(&profile) {
                    warn!("Could not cache profile of {}: {}", participant_id, e);
                }
                return profile;
            }
            Ok(None) => debug!("No profile stored for {}", participant_id),
            Err(e) => warn!("Profile lookup for {} failed: {}", participant_id, e),
        }
        self.cached_or_placeholder(participant_id)
    }

    fn own_profile(&self) -> Profile {
        match self.cache.get(&self.viewer.participant_id) {
            Ok(Some(profile)) => profile,
            _ => self.viewer.profile(),
        }
    }

    fn cached_or_placeholder(&self, participant_id: &str) -> Profile {
        match self.cache.get(participant_id) {
            Ok(Some(profile)) => profile,
            Ok(None) => Profile::placeholder(participant_id),
            Err(e) => {
                warn!("Profile cache read for {} failed: {}", participant_id, e);
                Profile::placeholder(participant_id)
            }
        }
    }
}
