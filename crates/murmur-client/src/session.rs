//! Session lifecycle: auth edge in, viewer profile out.
//!
//! The auth provider is an external collaborator; the host calls
//! [`Session::set_identity`] on every auth-state change. For a confirmed
//! identity the session layers a live watch on the user's profile document
//! (role and display-name changes arrive without a re-login) and publishes
//! the folded [`UserProfile`] on a `watch` channel that the feed worker, the
//! moderation worker, and the intents layer all observe.
//!
//! Unconfirmed addresses are treated as signed out — the global gate on all
//! functionality. Any identity change cancels the previous profile watch
//! before the next one opens, the same privacy rule the feed follows.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use murmur_types::{AuthUser, UserProfile};

use crate::backend::DocumentBackend;

/// Owns the identity channel and the profile-document watch.
pub struct Session<B> {
    backend: Arc<B>,
    profile_tx: watch::Sender<Option<UserProfile>>,
    watch_task: Option<JoinHandle<()>>,
}

impl<B: DocumentBackend + 'static> Session<B> {
    pub fn new(backend: Arc<B>) -> Self {
        let (profile_tx, _) = watch::channel(None);
        Self { backend, profile_tx, watch_task: None }
    }

    /// The channel every consumer of "who is signed in" follows.
    pub fn profiles(&self) -> watch::Receiver<Option<UserProfile>> {
        self.profile_tx.subscribe()
    }

    /// Current viewer, if any.
    pub fn current(&self) -> Option<UserProfile> {
        self.profile_tx.borrow().clone()
    }

    /// Feed the next auth-provider state in. `None` is sign-out.
    pub fn set_identity(&mut self, auth: Option<AuthUser>) {
        // Cancel the previous user's profile watch before anything is
        // published for the new state.
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }

        let Some(auth) = auth else {
            info!("signed out");
            self.profile_tx.send_replace(None);
            return;
        };

        if !auth.email_confirmed {
            // Gate: an unconfirmed address gets no session at all.
            info!(user = %auth.id.short(), "identity with unconfirmed email, gating out");
            self.profile_tx.send_replace(None);
            return;
        }

        match self.backend.watch_profile(auth.id) {
            Ok(mut profile_watch) => {
                let tx = self.profile_tx.clone();
                self.watch_task = Some(tokio::spawn(async move {
                    // The guard lives as long as this task; aborting the task
                    // on the next identity change drops it and cancels the
                    // watch.
                    let _guard = profile_watch.guard;
                    while let Some(record) = profile_watch.updates.recv().await {
                        debug!(user = %auth.id.short(), admin = record.is_admin, "profile update");
                        tx.send_replace(Some(UserProfile::from_parts(auth, record)));
                    }
                    debug!("profile watch closed");
                }));
                info!(user = %auth.id.short(), "signed in, profile watch open");
            }
            Err(err) => {
                // Sign-in still succeeds, with no privileges and no display
                // name.
                warn!(%err, "profile watch failed, using minimal profile");
                self.profile_tx.send_replace(Some(UserProfile::minimal(auth)));
            }
        }
    }
}

impl<B> Drop for Session<B> {
    fn drop(&mut self) {
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
    }
}
