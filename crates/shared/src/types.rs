//! Common types used across Karvico

use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Plans
// =============================================================================

/// Canonical subscription plan tier.
///
/// Earlier product generations sold the same tiers under different names
/// ("basic" for Silver, "premium" for Pro). Those identifiers still appear in
/// stored rows and in Stripe metadata, so the alias table lives here in
/// `FromStr` and is resolved exactly once. Everything downstream works with
/// the canonical variant; plan ordering is owned by the billing catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Silver,
    Pro,
    Enterprise,
}

impl Default for Plan {
    fn default() -> Self {
        Self::Free
    }
}

/// Error for plan identifiers the alias table does not recognize
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plan identifier: {0}")]
pub struct UnknownPlan(pub String);

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Silver => "silver",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    /// All canonical plans, lowest tier first
    pub const ALL: [Plan; 4] = [Plan::Free, Plan::Silver, Plan::Pro, Plan::Enterprise];
}

impl FromStr for Plan {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            // Legacy synonyms from the first pricing page
            "silver" | "basic" => Ok(Self::Silver),
            "pro" | "premium" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(UnknownPlan(other.to_string())),
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl<'de> Deserialize<'de> for Plan {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Plan::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Subscription status
// =============================================================================

/// Lifecycle status of a subscription record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Error for status values outside the lifecycle vocabulary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown subscription status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for SubscriptionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            // Stripe spells it with one "l"
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Modules
// =============================================================================

/// A gated product capability.
///
/// The minimum plan rank required for each module is configured in the
/// billing catalog, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Dashboard,
    MembersArea,
    Crm,
    Scheduling,
    Courses,
    AiAnalytics,
    FinancialReports,
    Automations,
    WhiteLabel,
}

/// Error for module identifiers that do not exist
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown module identifier: {0}")]
pub struct UnknownModule(pub String);

impl Module {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::MembersArea => "members_area",
            Self::Crm => "crm",
            Self::Scheduling => "scheduling",
            Self::Courses => "courses",
            Self::AiAnalytics => "ai_analytics",
            Self::FinancialReports => "financial_reports",
            Self::Automations => "automations",
            Self::WhiteLabel => "white_label",
        }
    }

    pub const ALL: [Module; 9] = [
        Module::Dashboard,
        Module::MembersArea,
        Module::Crm,
        Module::Scheduling,
        Module::Courses,
        Module::AiAnalytics,
        Module::FinancialReports,
        Module::Automations,
        Module::WhiteLabel,
    ];
}

impl FromStr for Module {
    type Err = UnknownModule;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dashboard" => Ok(Self::Dashboard),
            "members_area" => Ok(Self::MembersArea),
            "crm" => Ok(Self::Crm),
            "scheduling" => Ok(Self::Scheduling),
            "courses" => Ok(Self::Courses),
            "ai_analytics" => Ok(Self::AiAnalytics),
            "financial_reports" => Ok(Self::FinancialReports),
            "automations" => Ok(Self::Automations),
            "white_label" => Ok(Self::WhiteLabel),
            other => Err(UnknownModule(other.to_string())),
        }
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Canonical subscription state for one user.
///
/// Values of this type have already been normalized: an expired `Active`
/// status has been demoted to `Inactive`, and unrecognized stored plan
/// identifiers have been folded to `Free`. The entitlement resolver only
/// ever sees normalized subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: Uuid,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub expires_at: Option<OffsetDateTime>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

impl Subscription {
    /// The synthesized default for users with no stored record: free tier,
    /// active, no expiration. Also the fail-open result when the store
    /// cannot be reached.
    pub fn default_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            plan: Plan::Free,
            status: SubscriptionStatus::Active,
            expires_at: None,
            stripe_customer_id: None,
            stripe_subscription_id: None,
        }
    }

    /// Apply the expiration invariant: a past `expires_at` demotes `Active`
    /// to `Inactive`. `Cancelled` is preserved so a cancellation remains
    /// visible after its final period lapses.
    pub fn normalized(mut self, now: OffsetDateTime) -> Self {
        if let Some(expires_at) = self.expires_at {
            if expires_at <= now && self.status == SubscriptionStatus::Active {
                self.status = SubscriptionStatus::Inactive;
            }
        }
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn plan_aliases_resolve_to_canonical_tier() {
        assert_eq!("basic".parse::<Plan>().unwrap(), Plan::Silver);
        assert_eq!("silver".parse::<Plan>().unwrap(), Plan::Silver);
        assert_eq!("premium".parse::<Plan>().unwrap(), Plan::Pro);
        assert_eq!("pro".parse::<Plan>().unwrap(), Plan::Pro);
        assert_eq!("PRO".parse::<Plan>().unwrap(), Plan::Pro);
    }

    #[test]
    fn unknown_plan_is_an_error_not_a_panic() {
        let err = "platinum".parse::<Plan>().unwrap_err();
        assert_eq!(err, UnknownPlan("platinum".to_string()));
    }

    #[test]
    fn cancelled_status_accepts_both_spellings() {
        assert_eq!(
            "canceled".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Cancelled
        );
        assert_eq!(
            "cancelled".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Cancelled
        );
    }

    #[test]
    fn expired_active_subscription_normalizes_to_inactive() {
        let now = OffsetDateTime::now_utc();
        let sub = Subscription {
            expires_at: Some(now - Duration::days(1)),
            plan: Plan::Pro,
            ..Subscription::default_for(Uuid::new_v4())
        };
        assert_eq!(sub.normalized(now).status, SubscriptionStatus::Inactive);
    }

    #[test]
    fn future_expiration_stays_active() {
        let now = OffsetDateTime::now_utc();
        let sub = Subscription {
            expires_at: Some(now + Duration::days(30)),
            ..Subscription::default_for(Uuid::new_v4())
        };
        assert_eq!(sub.normalized(now).status, SubscriptionStatus::Active);
    }

    #[test]
    fn cancelled_survives_normalization_after_expiry() {
        let now = OffsetDateTime::now_utc();
        let mut sub = Subscription::default_for(Uuid::new_v4());
        sub.status = SubscriptionStatus::Cancelled;
        sub.expires_at = Some(now - Duration::days(2));
        assert_eq!(sub.normalized(now).status, SubscriptionStatus::Cancelled);
    }

    #[test]
    fn default_subscription_is_free_and_active() {
        let user_id = Uuid::new_v4();
        let sub = Subscription::default_for(user_id);
        assert_eq!(sub.plan, Plan::Free);
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.expires_at.is_none());
        assert!(sub.stripe_subscription_id.is_none());
    }
}
