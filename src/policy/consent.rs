//! Consent grants and the group/consent fallback walk.
//!
//! A direct subscribe denial on another tenant's shared property is not
//! final: the owner may have granted a consent to a group the requesting
//! device belongs to. The resolver walks those grants and memberships to
//! find an alternate path to allow.

use crate::error::Result;
use crate::policy::client::{PolicyApi, PolicyDecision};
use crate::resource::NAMESPACE;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Stored permission allowing subjects or groups to act on resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentGrant {
    pub id: String,
    pub subjects: Vec<String>,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    pub effect: Effect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// Walks consent grants and group memberships after a subscribe denial.
pub struct ConsentResolver {
    policy: Arc<dyn PolicyApi>,
}

impl ConsentResolver {
    pub fn new(policy: Arc<dyn PolicyApi>) -> Self {
        Self { policy }
    }

    /// If `resource` names another tenant's shared property, return the
    /// qualified property id consents are stored under.
    pub fn shared_property_id(resource: &str) -> Option<String> {
        let tokens: Vec<&str> = resource.split(':').collect();
        match tokens.as_slice() {
            [ns, "things", thing, "properties", property]
                if *ns == NAMESPACE
                    && !thing.is_empty()
                    && !property.is_empty()
                    && !property.contains('*')
                    && !property.contains('#') =>
            {
                Some(format!("{}:properties:{}", NAMESPACE, property))
            }
            _ => None,
        }
    }

    /// Walk all consents on the shared property behind `resource` looking
    /// for an allow grant whose subject is a group containing `subject`.
    ///
    /// Returns `None` when `resource` is not a shared-property path (the
    /// fallback does not apply). The first successful membership check
    /// short-circuits to allow; exhausting every candidate is a deny.
    pub async fn resolve(&self, subject: &str, resource: &str) -> Result<Option<PolicyDecision>> {
        let Some(property) = Self::shared_property_id(resource) else {
            return Ok(None);
        };

        let grants = self.policy.list_consents(&property).await?;
        tracing::debug!(
            subject,
            property = %property,
            grant_count = grants.len(),
            "walking consent grants after subscribe denial"
        );

        for grant in grants.iter().filter(|g| g.effect == Effect::Allow) {
            for grant_subject in &grant.subjects {
                match self
                    .policy
                    .check_group_membership(subject, grant_subject)
                    .await
                {
                    Ok(true) => {
                        tracing::info!(
                            subject,
                            grant = %grant.id,
                            group = %grant_subject,
                            "consent fallback granted access"
                        );
                        return Ok(Some(PolicyDecision::Allow));
                    }
                    Ok(false) => {}
                    // A failed probe is "not a member"; keep walking.
                    Err(e) => {
                        tracing::warn!(
                            subject,
                            group = %grant_subject,
                            error = %e,
                            "membership probe failed, treating as non-member"
                        );
                    }
                }
            }
        }

        Ok(Some(PolicyDecision::Deny))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::resource::Action;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct StubPolicy {
        grants: Vec<ConsentGrant>,
        memberships: Vec<(&'static str, &'static str)>,
        broken_groups: Vec<&'static str>,
    }

    #[async_trait]
    impl PolicyApi for StubPolicy {
        async fn check(
            &self,
            _subject: &str,
            _action: Action,
            _resource: &str,
        ) -> Result<PolicyDecision> {
            Ok(PolicyDecision::Deny)
        }

        async fn list_consents(&self, _resource: &str) -> Result<Vec<ConsentGrant>> {
            Ok(self.grants.clone())
        }

        async fn check_group_membership(&self, member: &str, group: &str) -> Result<bool> {
            if self.broken_groups.contains(&group) {
                return Err(GatewayError::PolicyEngine("engine unreachable".to_string()));
            }
            Ok(self.memberships.iter().any(|(m, g)| *m == member && *g == group))
        }
    }

    fn grant(id: &str, subjects: &[&str], effect: Effect) -> ConsentGrant {
        ConsentGrant {
            id: id.to_string(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            actions: vec!["read".to_string()],
            resources: vec!["dcd:properties:XYZ".to_string()],
            effect,
        }
    }

    #[test]
    fn recognises_the_shared_property_shape() {
        assert_eq!(
            ConsentResolver::shared_property_id("dcd:things:ABC:properties:XYZ"),
            Some("dcd:properties:XYZ".to_string())
        );
        assert_eq!(
            ConsentResolver::shared_property_id("dcd:things:ABC:properties:*"),
            None
        );
        assert_eq!(ConsentResolver::shared_property_id("dcd:things:ABC"), None);
        assert_eq!(
            ConsentResolver::shared_property_id("other:things:ABC:properties:XYZ"),
            None
        );
    }

    #[tokio::test]
    async fn membership_in_a_granted_group_allows() {
        let resolver = ConsentResolver::new(Arc::new(StubPolicy {
            grants: vec![grant("c1", &["group-1"], Effect::Allow)],
            memberships: vec![("thing-9", "group-1")],
            broken_groups: vec![],
        }));

        let decision = resolver
            .resolve("thing-9", "dcd:things:ABC:properties:XYZ")
            .await
            .unwrap();
        assert_eq!(decision, Some(PolicyDecision::Allow));
    }

    #[tokio::test]
    async fn deny_grants_are_skipped() {
        let resolver = ConsentResolver::new(Arc::new(StubPolicy {
            grants: vec![grant("c1", &["group-1"], Effect::Deny)],
            memberships: vec![("thing-9", "group-1")],
            broken_groups: vec![],
        }));

        let decision = resolver
            .resolve("thing-9", "dcd:things:ABC:properties:XYZ")
            .await
            .unwrap();
        assert_eq!(decision, Some(PolicyDecision::Deny));
    }

    #[tokio::test]
    async fn exhausting_all_candidates_denies() {
        let resolver = ConsentResolver::new(Arc::new(StubPolicy {
            grants: vec![
                grant("c1", &["group-1", "group-2"], Effect::Allow),
                grant("c2", &["group-3"], Effect::Allow),
            ],
            memberships: vec![],
            broken_groups: vec![],
        }));

        let decision = resolver
            .resolve("thing-9", "dcd:things:ABC:properties:XYZ")
            .await
            .unwrap();
        assert_eq!(decision, Some(PolicyDecision::Deny));
    }

    #[tokio::test]
    async fn a_failed_probe_does_not_stop_the_walk() {
        let resolver = ConsentResolver::new(Arc::new(StubPolicy {
            grants: vec![grant("c1", &["group-bad", "group-good"], Effect::Allow)],
            memberships: vec![("thing-9", "group-good")],
            broken_groups: vec!["group-bad"],
        }));

        let decision = resolver
            .resolve("thing-9", "dcd:things:ABC:properties:XYZ")
            .await
            .unwrap();
        assert_eq!(decision, Some(PolicyDecision::Allow));
    }

    #[tokio::test]
    async fn non_shared_resources_do_not_invoke_the_fallback() {
        let resolver = ConsentResolver::new(Arc::new(StubPolicy {
            grants: vec![],
            memberships: vec![],
            broken_groups: vec![],
        }));

        let decision = resolver.resolve("thing-9", "dcd:things:ABC").await.unwrap();
        assert_eq!(decision, None);
    }
}
