// Access policy selection
// Author: kelexine (https://github.com/kelexine)

use crate::config::AccessConfig;
use serde::Serialize;

/// How remote calls are routed, decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    /// Direct calls without a credential.
    DirectUnauthenticated,
    /// Direct calls carrying the next credential from the rotator.
    DirectWithCredential,
    /// Everything goes through the same-origin server proxy or an intermediary.
    ServerProxied,
}

impl AccessPolicy {
    /// Production deployments and forced proxy mode are server-proxied;
    /// otherwise the presence of credentials decides.
    pub fn from_config(access: &AccessConfig, has_credentials: bool) -> Self {
        if access.production || access.force_server_proxy {
            AccessPolicy::ServerProxied
        } else {
            Self::direct(has_credentials)
        }
    }

    /// Policy for the server-side proxy endpoint itself. It always calls the
    /// API directly, since proxying to itself would loop.
    pub fn for_server(has_credentials: bool) -> Self {
        Self::direct(has_credentials)
    }

    fn direct(has_credentials: bool) -> Self {
        if has_credentials {
            AccessPolicy::DirectWithCredential
        } else {
            AccessPolicy::DirectUnauthenticated
        }
    }

    pub fn is_server_proxied(&self) -> bool {
        *self == AccessPolicy::ServerProxied
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessPolicy::DirectUnauthenticated => "direct_unauthenticated",
            AccessPolicy::DirectWithCredential => "direct_with_credential",
            AccessPolicy::ServerProxied => "server_proxied",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_config() {
        let mut access = AccessConfig::default();
        assert_eq!(AccessPolicy::from_config(&access, false), AccessPolicy::DirectUnauthenticated);
        assert_eq!(AccessPolicy::from_config(&access, true), AccessPolicy::DirectWithCredential);

        access.force_server_proxy = true;
        assert_eq!(AccessPolicy::from_config(&access, true), AccessPolicy::ServerProxied);

        access.force_server_proxy = false;
        access.production = true;
        assert!(AccessPolicy::from_config(&access, false).is_server_proxied());
    }

    #[test]
    fn test_server_never_proxies_to_itself() {
        assert_eq!(AccessPolicy::for_server(true), AccessPolicy::DirectWithCredential);
        assert_eq!(AccessPolicy::for_server(false).as_str(), "direct_unauthenticated");
    }
}
