//! Subscription address resolution.
//!
//! Transport addresses have the fixed shape
//! `projects/<project-id>/subscriptions/<name>`; only `<name>` matters to the
//! dispatcher.

use oncely_core::{EnvelopeError, EnvelopeResult, SubscriptionName};

const PROJECTS: &str = "projects";
const SUBSCRIPTIONS: &str = "subscriptions";

/// Extract the subscription name from a transport address.
///
/// Anything that is not exactly four `/`-separated segments with the two
/// literal markers in place and non-empty ids is rejected.
pub fn resolve_subscription(address: &str) -> EnvelopeResult<SubscriptionName> {
    let mut parts = address.split('/');

    match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(PROJECTS), Some(project), Some(SUBSCRIPTIONS), Some(name), None)
            if !project.is_empty() && !name.is_empty() =>
        {
            SubscriptionName::new(name)
                .map_err(|e| EnvelopeError::invalid_subscription(format!("{address}: {e}")))
        }
        _ => Err(EnvelopeError::invalid_subscription(format!(
            "{address:?} does not match projects/<project-id>/subscriptions/<name>"
        ))),
    }
}

/// Build the transport address for a subscription.
pub fn subscription_address(project_id: &str, subscription: &SubscriptionName) -> String {
    format!("{PROJECTS}/{project_id}/{SUBSCRIPTIONS}/{subscription}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn resolves_well_formed_address() {
        let name = resolve_subscription("projects/acme-prod/subscriptions/quote_approved").unwrap();
        assert_eq!(name.as_str(), "quote_approved");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in [
            "",
            "quote_approved",
            "projects/acme/subscriptions",
            "projects/acme/subscriptions/",
            "projects//subscriptions/quote_approved",
            "project/acme/subscriptions/quote_approved",
            "projects/acme/topics/quote_approved",
            "projects/acme/subscriptions/quote_approved/extra",
            "/projects/acme/subscriptions/quote_approved",
        ] {
            let err = resolve_subscription(bad).unwrap_err();
            assert!(matches!(err, EnvelopeError::InvalidSubscription(_)), "accepted {bad:?}");
        }
    }

    #[test]
    fn address_builder_is_resolvable() {
        let name = SubscriptionName::new("invoice_paid").unwrap();
        let address = subscription_address("local", &name);
        assert_eq!(address, "projects/local/subscriptions/invoice_paid");
        assert_eq!(resolve_subscription(&address).unwrap(), name);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any non-empty slash-free project and name resolve back to the name.
        #[test]
        fn resolves_generated_addresses(
            project in "[a-z][a-z0-9-]{0,20}",
            name in "[A-Za-z0-9_.-]{1,40}",
        ) {
            let address = format!("projects/{project}/subscriptions/{name}");
            let resolved = resolve_subscription(&address).unwrap();
            prop_assert_eq!(resolved.as_str(), name.as_str());
        }

        /// Property: a wrong literal marker is always rejected.
        #[test]
        fn rejects_wrong_markers(
            marker in "[a-z]{1,12}",
            name in "[a-z_]{1,20}",
        ) {
            prop_assume!(marker != "subscriptions");
            let address = format!("projects/p/{marker}/{name}");
            prop_assert!(resolve_subscription(&address).is_err());
        }
    }
}
