//! Tenant access policy

use std::collections::HashSet;

use crate::{Error, TenantId, TenantIdRef};

/// The additionally-allowed tenant entry that permits any tenant
pub const ANY_TENANT: &str = "*";

/// The tenants for which a credential may acquire tokens
///
/// A credential always serves its home tenant. Requests for other tenants are
/// only honored when that tenant is additionally allowed, or when the
/// [`ANY_TENANT`] wildcard was configured. A disallowed tenant is rejected; it
/// is never replaced by the home tenant.
#[derive(Clone, Debug)]
pub struct TenantPolicy {
    home: TenantId,
    allow_any: bool,
    additional: HashSet<TenantId>,
}

impl TenantPolicy {
    /// Constructs a policy that only serves the home tenant
    pub fn new(home: impl Into<TenantId>) -> Result<Self, Error> {
        let home = home.into();
        validate_tenant_id(home.as_str())?;

        Ok(Self {
            home,
            allow_any: false,
            additional: HashSet::new(),
        })
    }

    /// Adds tenants to the allow-list
    ///
    /// Including [`ANY_TENANT`] allows any tenant the principal can reach.
    pub fn with_additionally_allowed<I, S>(mut self, tenants: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tenant in tenants {
            let tenant = tenant.into();
            if tenant == ANY_TENANT {
                self.allow_any = true;
            } else {
                validate_tenant_id(&tenant)?;
                self.additional.insert(TenantId::new(tenant));
            }
        }

        Ok(self)
    }

    /// Gets the home tenant
    #[inline]
    pub fn home(&self) -> &TenantIdRef {
        &self.home
    }

    /// Whether any tenant may be requested
    #[inline]
    pub fn allows_any(&self) -> bool {
        self.allow_any
    }

    /// Determines the tenant a request should be sent to
    ///
    /// No override, or an override naming the home tenant, resolves to the home
    /// tenant. Any other override must be allowed by the policy.
    pub fn resolve(&self, requested: Option<&TenantIdRef>) -> Result<TenantId, Error> {
        let requested = match requested {
            Some(tenant) if tenant != &*self.home => tenant,
            _ => return Ok(self.home.clone()),
        };

        validate_tenant_id(requested.as_str())?;

        if self.allow_any || self.additional.contains(requested) {
            tracing::info!(
                home_tenant = %self.home,
                tenant = %requested,
                "token requested for a tenant other than the home tenant; using the requested tenant"
            );
            Ok(requested.to_owned())
        } else {
            tracing::debug!(
                home_tenant = %self.home,
                tenant = %requested,
                "rejecting request for tenant not allowed by policy"
            );
            Err(Error::TenantPolicyViolation {
                tenant: requested.to_owned(),
            })
        }
    }
}

/// Checks that a tenant ID is safe to embed into an authority URL
pub fn validate_tenant_id(tenant: &str) -> Result<(), Error> {
    let valid = !tenant.is_empty()
        && tenant
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidTenantId {
            tenant: tenant.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TenantPolicy {
        TenantPolicy::new("T1")
            .unwrap()
            .with_additionally_allowed(["T2"])
            .unwrap()
    }

    #[test]
    fn no_override_resolves_to_home() {
        assert_eq!(policy().resolve(None).unwrap(), TenantId::from_static("T1"));
    }

    #[test]
    fn home_override_resolves_to_home() {
        let home = TenantId::from_static("T1");
        assert_eq!(policy().resolve(Some(&*home)).unwrap(), home);
    }

    #[test]
    fn additionally_allowed_tenant_is_used() {
        let t2 = TenantId::from_static("T2");
        assert_eq!(policy().resolve(Some(&*t2)).unwrap(), t2);
    }

    #[test]
    fn unlisted_tenant_is_rejected() {
        let t3 = TenantId::from_static("T3");
        match policy().resolve(Some(&*t3)) {
            Err(Error::TenantPolicyViolation { tenant }) => assert_eq!(tenant, t3),
            other => panic!("expected tenant policy violation, got {:?}", other),
        }
    }

    #[test]
    fn wildcard_permits_any_tenant() {
        let policy = TenantPolicy::new("T1")
            .unwrap()
            .with_additionally_allowed(["*"])
            .unwrap();
        let other = TenantId::from_static("anything-else");

        assert!(policy.allows_any());
        assert_eq!(policy.resolve(Some(&*other)).unwrap(), other);
    }

    #[test]
    fn malformed_tenants_are_rejected() {
        assert!(matches!(
            TenantPolicy::new("bad/tenant"),
            Err(Error::InvalidTenantId { .. })
        ));
        assert!(matches!(
            TenantPolicy::new("T1").unwrap().with_additionally_allowed(["?x"]),
            Err(Error::InvalidTenantId { .. })
        ));

        let wildcard = TenantPolicy::new("T1")
            .unwrap()
            .with_additionally_allowed([ANY_TENANT])
            .unwrap();
        let injected = TenantId::from_static("evil/../tenant");
        assert!(matches!(
            wildcard.resolve(Some(&*injected)),
            Err(Error::InvalidTenantId { .. })
        ));
    }

    #[test]
    fn empty_tenant_is_invalid() {
        assert!(validate_tenant_id("").is_err());
        assert!(validate_tenant_id("72f988bf-86f1-41af-91ab-2d7cd011db47").is_ok());
        assert!(validate_tenant_id("contoso.onmicrosoft.com").is_ok());
    }
}
