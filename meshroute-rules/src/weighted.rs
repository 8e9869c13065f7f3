//! Weighted selection of a rule's destination.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::RouteError;
use crate::rule::{DestinationWeight, RouteRule, Tags};

/// Logical target picked from a route list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDestination {
    pub destination: String,
    pub tags: Tags,
    /// Position of the chosen entry in the rule's route list.
    pub index: usize,
}

/// Sum of weights, treating a single entry as 100.
pub fn effective_total(route: &[DestinationWeight]) -> u64 {
    match route {
        [_] => 100,
        entries => entries.iter().map(|entry| u64::from(entry.weight)).sum(),
    }
}

/// Checks the route list can be resolved without drawing.
pub fn check_route(rule: &str, route: &[DestinationWeight]) -> Result<u64, RouteError> {
    if route.is_empty() {
        return Err(RouteError::configuration(rule, "route list is empty"));
    }
    match effective_total(route) {
        0 => Err(RouteError::configuration(
            rule,
            "route weights sum to zero",
        )),
        total => Ok(total),
    }
}

/// Picks a destination for `rule` using the thread-local generator.
pub fn resolve(rule: &RouteRule) -> Result<ResolvedDestination, RouteError> {
    resolve_with(
        rule.display_name(),
        &rule.destination,
        &rule.route,
        &mut rand::thread_rng(),
    )
}

/// Picks a destination from `route`, inheriting `parent_destination` for
/// entries that leave theirs empty. Weights are normalized by their sum.
pub fn resolve_with<R: Rng + ?Sized>(
    rule: &str,
    parent_destination: &str,
    route: &[DestinationWeight],
    rng: &mut R,
) -> Result<ResolvedDestination, RouteError> {
    let total = check_route(rule, route)?;

    let index = if route.len() == 1 {
        0
    } else {
        let draw = rng.gen_range(0..total);
        let mut upper = 0u64;
        route
            .iter()
            .position(|entry| {
                upper += u64::from(entry.weight);
                draw < upper
            })
            .unwrap_or(route.len() - 1)
    };

    let entry = &route[index];
    let destination = entry
        .destination
        .as_deref()
        .filter(|destination| !destination.is_empty())
        .unwrap_or(parent_destination)
        .to_string();

    Ok(ResolvedDestination {
        destination,
        tags: entry.tags.clone(),
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn weight(version: &str, weight: u32) -> DestinationWeight {
        DestinationWeight {
            destination: None,
            tags: Tags::from([("version".to_string(), version.to_string())]),
            weight,
        }
    }

    #[test]
    fn single_entry_is_always_chosen() {
        let mut rng = StdRng::seed_from_u64(7);
        let route = vec![weight("v1", 10)];
        for _ in 0..100 {
            let picked = resolve_with("r", "reviews", &route, &mut rng).unwrap();
            assert_eq!(picked.index, 0);
            assert_eq!(picked.destination, "reviews");
        }
    }

    #[test]
    fn split_converges_to_weights() {
        let mut rng = StdRng::seed_from_u64(42);
        let route = vec![weight("v2", 25), weight("v1", 75)];
        let draws = 20_000;
        let v2 = (0..draws)
            .filter(|_| resolve_with("r", "reviews", &route, &mut rng).unwrap().index == 0)
            .count();
        let share = v2 as f64 / draws as f64;
        assert!((share - 0.25).abs() < 0.02, "v2 share was {share}");
    }

    #[test]
    fn weights_not_summing_to_hundred_are_normalized() {
        let mut rng = StdRng::seed_from_u64(3);
        let route = vec![weight("v1", 1), weight("v2", 3)];
        let draws = 20_000;
        let v2 = (0..draws)
            .filter(|_| resolve_with("r", "reviews", &route, &mut rng).unwrap().index == 1)
            .count();
        let share = v2 as f64 / draws as f64;
        assert!((share - 0.75).abs() < 0.02, "v2 share was {share}");
    }

    #[test]
    fn zero_weight_entries_are_never_chosen() {
        let mut rng = StdRng::seed_from_u64(11);
        let route = vec![weight("v1", 0), weight("v2", 100), weight("v3", 0)];
        for _ in 0..500 {
            assert_eq!(resolve_with("r", "reviews", &route, &mut rng).unwrap().index, 1);
        }
    }

    #[test]
    fn zero_total_is_a_configuration_error() {
        let route = vec![weight("v1", 0), weight("v2", 0)];
        let err = resolve_with("r", "reviews", &route, &mut rand::thread_rng()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn empty_route_is_a_configuration_error() {
        assert!(resolve_with("r", "reviews", &[], &mut rand::thread_rng())
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn explicit_destination_overrides_parent() {
        let route = vec![DestinationWeight {
            destination: Some("reviews-canary".into()),
            ..weight("v3", 100)
        }];
        let picked = resolve_with("r", "reviews", &route, &mut rand::thread_rng()).unwrap();
        assert_eq!(picked.destination, "reviews-canary");
        assert_eq!(picked.tags.get("version").map(String::as_str), Some("v3"));
    }
}
