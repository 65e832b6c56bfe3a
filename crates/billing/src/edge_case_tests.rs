// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Entitlement System
//!
//! Tests critical boundary conditions in:
//! - Plan catalog construction and monotonicity
//! - Entitlement resolution across plan ranks
//! - Webhook signature verification
//! - Payment failure policy configuration

#[cfg(test)]
mod catalog_tests {
    use crate::catalog::PlanCatalog;
    use crate::client::PriceIds;
    use karvico_shared::{Module, Plan};

    fn catalog() -> PlanCatalog {
        PlanCatalog::new(&PriceIds {
            silver: Some("price_silver_123".to_string()),
            pro: Some("price_pro_123".to_string()),
        })
        .unwrap()
    }

    // =========================================================================
    // Every lower-ranked plan's module set is a subset of every higher one
    // =========================================================================
    #[test]
    fn entitlements_are_monotonic_across_the_whole_ladder() {
        let catalog = catalog();
        for lower in Plan::ALL {
            for higher in Plan::ALL {
                if catalog.rank_of(lower) < catalog.rank_of(higher) {
                    let lower_set = catalog.modules_for(lower);
                    let higher_set = catalog.modules_for(higher);
                    assert!(
                        lower_set.is_subset(&higher_set),
                        "{} should be a subset of {}",
                        lower,
                        higher
                    );
                }
            }
        }
    }

    // =========================================================================
    // Rank-0 modules appear in every plan's set, including free
    // =========================================================================
    #[test]
    fn rank_zero_modules_are_in_every_plan() {
        let catalog = catalog();
        for plan in Plan::ALL {
            let set = catalog.modules_for(plan);
            assert!(set.contains(&Module::Dashboard));
            assert!(set.contains(&Module::MembersArea));
        }
    }

    // =========================================================================
    // Configured price ids map to their plans
    // =========================================================================
    #[test]
    fn known_price_ids_resolve_to_their_plan() {
        let catalog = catalog();
        assert_eq!(catalog.plan_for_price_id("price_silver_123"), Plan::Silver);
        assert_eq!(catalog.plan_for_price_id("price_pro_123"), Plan::Pro);
    }

    // =========================================================================
    // Unknown price id - resolves to lowest paid tier, never an error
    // =========================================================================
    #[test]
    fn unknown_price_id_defaults_to_lowest_paid_tier() {
        let catalog = catalog();
        assert_eq!(
            catalog.plan_for_price_id("price_from_another_deployment"),
            Plan::Silver
        );
    }

    // =========================================================================
    // A deployment with no price ids still builds and still defaults sanely
    // =========================================================================
    #[test]
    fn empty_price_map_still_defaults_to_lowest_paid_tier() {
        let catalog = PlanCatalog::new(&PriceIds::default()).unwrap();
        assert_eq!(catalog.plan_for_price_id("price_anything"), Plan::Silver);
    }

    // =========================================================================
    // required_plan_for names the cheapest sufficient plan
    // =========================================================================
    #[test]
    fn required_plan_is_the_cheapest_sufficient_one() {
        let catalog = catalog();
        assert_eq!(catalog.required_plan_for(Module::Dashboard), Plan::Free);
        assert_eq!(catalog.required_plan_for(Module::Crm), Plan::Silver);
        assert_eq!(catalog.required_plan_for(Module::AiAnalytics), Plan::Pro);
        assert_eq!(
            catalog.required_plan_for(Module::WhiteLabel),
            Plan::Enterprise
        );
    }
}

#[cfg(test)]
mod entitlement_tests {
    use crate::catalog::PlanCatalog;
    use crate::client::PriceIds;
    use crate::entitlement::EntitlementResolver;
    use karvico_shared::{Module, Plan, Subscription, SubscriptionStatus};
    use std::sync::Arc;
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    fn resolver() -> EntitlementResolver {
        let catalog = PlanCatalog::new(&PriceIds::default()).unwrap();
        EntitlementResolver::new(Arc::new(catalog))
    }

    // =========================================================================
    // Every plan at or above a module's rank is accepted, synonyms included
    // =========================================================================
    #[test]
    fn all_plans_at_or_above_rank_one_unlock_crm() {
        let resolver = resolver();
        for raw in ["silver", "basic", "pro", "premium", "enterprise"] {
            let sub = Subscription {
                plan: raw.parse::<Plan>().unwrap(),
                ..Subscription::default_for(Uuid::new_v4())
            };
            assert!(
                resolver.can_access(&sub, Module::Crm),
                "plan identifier {:?} should unlock crm",
                raw
            );
        }
    }

    // =========================================================================
    // Same inputs, same answer - the resolver is a pure function
    // =========================================================================
    #[test]
    fn decisions_are_deterministic() {
        let resolver = resolver();
        let sub = Subscription {
            plan: Plan::Silver,
            ..Subscription::default_for(Uuid::new_v4())
        };
        let first = resolver.check_access(&sub, Module::AiAnalytics);
        let second = resolver.check_access(&sub, Module::AiAnalytics);
        assert_eq!(first, second);
    }

    // =========================================================================
    // Expired top tier is denied every module above rank 0
    // =========================================================================
    #[test]
    fn expired_enterprise_keeps_only_rank_zero_modules() {
        let now = OffsetDateTime::now_utc();
        let sub = Subscription {
            plan: Plan::Enterprise,
            expires_at: Some(now - Duration::minutes(1)),
            ..Subscription::default_for(Uuid::new_v4())
        }
        .normalized(now);

        let resolver = resolver();
        for module in Module::ALL {
            let allowed = resolver.can_access(&sub, module);
            let rank_zero = resolver.catalog().is_always_free(module);
            assert_eq!(
                allowed, rank_zero,
                "expired subscription should only reach rank-0 modules, got {} for {}",
                allowed, module
            );
        }
    }

    // =========================================================================
    // Expiration exactly now counts as expired
    // =========================================================================
    #[test]
    fn expiration_boundary_is_inclusive() {
        let now = OffsetDateTime::now_utc();
        let sub = Subscription {
            plan: Plan::Pro,
            expires_at: Some(now),
            ..Subscription::default_for(Uuid::new_v4())
        }
        .normalized(now);
        assert_eq!(sub.status, SubscriptionStatus::Inactive);
    }

    // =========================================================================
    // Denials carry the upgrade target
    // =========================================================================
    #[test]
    fn denial_names_the_minimum_plan() {
        let resolver = resolver();
        let sub = Subscription::default_for(Uuid::new_v4());

        let crm = resolver.check_access(&sub, Module::Crm);
        assert_eq!(crm.required_plan, Some(Plan::Silver));

        let analytics = resolver.check_access(&sub, Module::AiAnalytics);
        assert_eq!(analytics.required_plan, Some(Plan::Pro));
    }
}

#[cfg(test)]
mod webhook_tests {
    use crate::error::BillingError;
    use crate::webhooks::{verify_signature, BILLING_PERIOD};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    const SECRET: &str = "whsec_test123secret456";

    fn now_timestamp() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    fn sign(payload: &str, timestamp: i64, secret: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    // =========================================================================
    // Correctly signed payload - accepted
    // =========================================================================
    #[test]
    fn valid_signature_is_accepted() {
        let payload = r#"{"id":"evt_123","type":"checkout.session.completed"}"#;
        let ts = now_timestamp();
        let header = format!("t={},v1={}", ts, sign(payload, ts, SECRET));
        assert!(verify_signature(payload, &header, SECRET).is_ok());
    }

    // =========================================================================
    // Tampered payload - rejected
    // =========================================================================
    #[test]
    fn tampered_payload_is_rejected() {
        let payload = r#"{"id":"evt_123","type":"checkout.session.completed"}"#;
        let ts = now_timestamp();
        let header = format!("t={},v1={}", ts, sign(payload, ts, SECRET));
        let tampered = r#"{"id":"evt_123","type":"customer.subscription.deleted"}"#;
        assert!(matches!(
            verify_signature(tampered, &header, SECRET),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    // =========================================================================
    // Wrong secret - rejected
    // =========================================================================
    #[test]
    fn wrong_secret_is_rejected() {
        let payload = r#"{"id":"evt_123"}"#;
        let ts = now_timestamp();
        let header = format!("t={},v1={}", ts, sign(payload, ts, "whsec_other"));
        assert!(verify_signature(payload, &header, SECRET).is_err());
    }

    // =========================================================================
    // Timestamp 10 minutes old - beyond the 5-minute tolerance, rejected
    // =========================================================================
    #[test]
    fn stale_timestamp_is_rejected() {
        let payload = r#"{"id":"evt_123"}"#;
        let ts = now_timestamp() - 600;
        let header = format!("t={},v1={}", ts, sign(payload, ts, SECRET));
        assert!(verify_signature(payload, &header, SECRET).is_err());
    }

    // =========================================================================
    // Malformed header - rejected, not panicked
    // =========================================================================
    #[test]
    fn malformed_header_is_rejected() {
        let payload = r#"{"id":"evt_123"}"#;
        for header in ["", "t=notanumber,v1=abc", "v1=deadbeef", "t=123"] {
            assert!(
                verify_signature(payload, header, SECRET).is_err(),
                "header {:?} should be rejected",
                header
            );
        }
    }

    // =========================================================================
    // Default billing period matches a monthly subscription
    // =========================================================================
    #[test]
    fn fallback_billing_period_is_thirty_days() {
        assert_eq!(BILLING_PERIOD.whole_days(), 30);
    }
}

#[cfg(test)]
mod policy_tests {
    use crate::webhooks::PaymentFailurePolicy;
    use serial_test::serial;

    #[test]
    fn policy_parses_both_spellings() {
        assert_eq!(
            "log-only".parse::<PaymentFailurePolicy>().unwrap(),
            PaymentFailurePolicy::LogOnly
        );
        assert_eq!(
            "demote_to_free".parse::<PaymentFailurePolicy>().unwrap(),
            PaymentFailurePolicy::DemoteToFree
        );
        assert!("suspend".parse::<PaymentFailurePolicy>().is_err());
    }

    #[test]
    #[serial]
    fn unset_env_defaults_to_log_only() {
        std::env::remove_var("KARVICO_PAYMENT_FAILURE_POLICY");
        assert_eq!(
            PaymentFailurePolicy::from_env(),
            PaymentFailurePolicy::LogOnly
        );
    }

    #[test]
    #[serial]
    fn env_opt_in_enables_demotion() {
        std::env::set_var("KARVICO_PAYMENT_FAILURE_POLICY", "demote-to-free");
        assert_eq!(
            PaymentFailurePolicy::from_env(),
            PaymentFailurePolicy::DemoteToFree
        );
        std::env::remove_var("KARVICO_PAYMENT_FAILURE_POLICY");
    }

    #[test]
    #[serial]
    fn unrecognized_env_value_falls_back_to_log_only() {
        std::env::set_var("KARVICO_PAYMENT_FAILURE_POLICY", "suspend-account");
        assert_eq!(
            PaymentFailurePolicy::from_env(),
            PaymentFailurePolicy::LogOnly
        );
        std::env::remove_var("KARVICO_PAYMENT_FAILURE_POLICY");
    }
}
