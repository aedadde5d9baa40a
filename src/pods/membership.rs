use crate::backend::{BackendError, DynBackend, NewPod, PodId, PodWithMembers, Profile, ProfileId};
use crate::error::{PodError, PodResult};

/// True iff `profile_id` is among the pod's resolved members.
pub fn is_member(pod: &PodWithMembers, profile_id: &ProfileId) -> bool {
    pod.members.iter().any(|member| &member.id == profile_id)
}

/// Outcome of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinOutcome {
    Joined,
    AlreadyMember,
}

/// Creates, lists and joins pods on behalf of one profile.
///
/// Keeps the last successfully fetched pod list; a failed refresh leaves it
/// as it was.
pub struct PodMembershipManager {
    backend: DynBackend,
    profile: Option<Profile>,
    pods: Vec<PodWithMembers>,
}

impl PodMembershipManager {
    pub fn new(backend: DynBackend, profile: Option<Profile>) -> Self {
        Self {
            backend,
            profile,
            pods: Vec::new(),
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn pods(&self) -> &[PodWithMembers] {
        &self.pods
    }

    /// Membership of the bound profile; false when no profile is bound.
    pub fn is_member(&self, pod: &PodWithMembers) -> bool {
        self.profile
            .as_ref()
            .is_some_and(|profile| is_member(pod, &profile.id))
    }

    pub async fn list_pods(&mut self) -> PodResult<&[PodWithMembers]> {
        match self.backend.pods_with_members().await {
            Ok(pods) => {
                tracing::debug!(count = pods.len(), "pods listed");
                self.pods = pods;
                Ok(&self.pods)
            }
            Err(e) => {
                tracing::error!("Error fetching pods: {}", e);
                Err(PodError::fetch("pods")(e))
            }
        }
    }

    /// Insert the pod, then the creator's membership. A failed membership
    /// insert deletes the pod again.
    pub async fn create_pod(
        &mut self,
        name: &str,
        description: Option<&str>,
    ) -> PodResult<PodWithMembers> {
        let creator = self.profile.clone().ok_or(PodError::Unauthenticated)?;

        let name = name.trim();
        if name.is_empty() {
            return Err(PodError::InvalidInput("Pod name is required".into()));
        }
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let pod = self
            .backend
            .insert_pod(NewPod {
                name: name.to_string(),
                description,
            })
            .await
            .map_err(PodError::write("pod"))?;

        if let Err(source) = self.backend.insert_member(&pod.id, &creator.id).await {
            tracing::warn!(pod_id = %pod.id, "creator membership failed, removing pod: {}", source);
            return match self.backend.delete_pod(&pod.id).await {
                Ok(_) => Err(PodError::Write {
                    what: "pod membership",
                    source,
                }),
                Err(rollback) => {
                    tracing::error!(pod_id = %pod.id, "orphan pod left behind: {}", rollback);
                    Err(PodError::WriteRollback {
                        what: "pod membership",
                        source,
                        rollback,
                    })
                }
            };
        }

        tracing::info!(pod_id = %pod.id, name = %pod.name, creator = %creator.id, "pod created");
        self.refresh_after_write().await;

        Ok(PodWithMembers {
            pod,
            members: vec![creator],
        })
    }

    /// Joining twice is not an error; the backend keeps one row per pair.
    pub async fn join_pod(&mut self, pod_id: &PodId) -> PodResult<JoinOutcome> {
        let profile = self.profile.as_ref().ok_or(PodError::Unauthenticated)?;

        let outcome = match self.backend.insert_member(pod_id, &profile.id).await {
            Ok(_) => JoinOutcome::Joined,
            Err(BackendError::Conflict(_)) => JoinOutcome::AlreadyMember,
            Err(BackendError::NotFound(_)) => return Err(PodError::NotFound("Pod")),
            Err(e) => return Err(PodError::write("pod membership")(e)),
        };

        tracing::info!(pod_id = %pod_id, profile_id = %profile.id, ?outcome, "pod join");
        self.refresh_after_write().await;
        Ok(outcome)
    }

    /// The write already succeeded; a failed re-list only keeps the old list.
    async fn refresh_after_write(&mut self) {
        if let Err(e) = self.list_pods().await {
            tracing::warn!("re-list after write failed: {}", e);
        }
    }
}
