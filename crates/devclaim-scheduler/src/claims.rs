//! Claim lookup shared by the filter and bind paths.

use devclaim_state::{Claim, ObjectStore, Workload, claim_key};

use crate::error::{SchedulerError, SchedulerResult};

/// Fetch every claim a workload declares, in declaration order.
///
/// Fails on the first claim that is missing or requests nothing.
pub fn resolve_claims(store: &dyn ObjectStore, workload: &Workload) -> SchedulerResult<Vec<Claim>> {
    let mut claims = Vec::with_capacity(workload.claim_names.len());
    for name in &workload.claim_names {
        let key = claim_key(&workload.namespace, name);
        let claim = store
            .get_claim(&workload.namespace, name)?
            .ok_or_else(|| SchedulerError::ClaimNotFound(key.clone()))?;
        if claim.is_empty_request() {
            return Err(SchedulerError::InvalidClaim(key));
        }
        claims.push(claim);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use devclaim_state::StateStore;

    #[test]
    fn resolves_in_declaration_order() {
        let store = StateStore::open_in_memory().unwrap();
        for name in ["b", "a"] {
            let mut c = Claim::new("ml", name);
            c.desired_count = 1;
            store.put_claim(&c).unwrap();
        }
        let wl = Workload::new("ml", "train", "u").with_claim("b").with_claim("a");
        let claims = resolve_claims(&store, &wl).unwrap();
        let names: Vec<_> = claims.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn missing_claim() {
        let store = StateStore::open_in_memory().unwrap();
        let wl = Workload::new("ml", "train", "u").with_claim("ghost");
        assert!(matches!(
            resolve_claims(&store, &wl),
            Err(SchedulerError::ClaimNotFound(k)) if k == "ml/ghost"
        ));
    }

    #[test]
    fn empty_request_is_invalid() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_claim(&Claim::new("ml", "empty")).unwrap();
        let wl = Workload::new("ml", "train", "u").with_claim("empty");
        assert!(matches!(
            resolve_claims(&store, &wl),
            Err(SchedulerError::InvalidClaim(_))
        ));
    }
}
