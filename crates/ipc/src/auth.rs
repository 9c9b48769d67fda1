//! Request authentication.
//!
//! An [`Authenticator`] inspects the call context and returns `Ok` or
//! `Unauthenticated`. The chain tries each authenticator in order: the first
//! success admits the call, and when none succeeds the first failure is
//! returned. An empty chain denies by default, which startup validation
//! turns into a refusal to boot.

use tonic::metadata::MetadataMap;
use tonic::Status;
use tracing::debug;
use x509_parser::prelude::FromDer;

/// The slice of a request an authenticator may inspect.
pub struct AuthContext<'a> {
    /// Request metadata (headers).
    pub metadata: &'a MetadataMap,
    /// DER-encoded verified client certificates, leaf first, when the
    /// transport performed mutual TLS.
    pub peer_certs: Option<&'a [Vec<u8>]>,
}

/// Evaluates one authentication mechanism.
pub trait Authenticator: Send + Sync {
    /// `Ok(())` admits the call.
    fn authenticate(&self, ctx: &AuthContext<'_>) -> Result<(), Status>;
}

/// Shared-secret bearer token carried in a configurable metadata header.
pub struct TokenAuthenticator {
    header: String,
    secret: String,
}

impl TokenAuthenticator {
    /// The header name is compared lower-cased, per gRPC metadata rules.
    pub fn new(header: &str, secret: &str) -> Self {
        TokenAuthenticator {
            header: header.to_lowercase(),
            secret: secret.trim().to_string(),
        }
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, ctx: &AuthContext<'_>) -> Result<(), Status> {
        let value = ctx
            .metadata
            .get(&self.header)
            .ok_or_else(|| Status::unauthenticated("missing authorization header"))?;
        let raw = value
            .to_str()
            .map_err(|_| Status::unauthenticated("malformed authorization header"))?;
        let token = raw
            .strip_prefix("Bearer ")
            .ok_or_else(|| Status::unauthenticated("expected Bearer scheme"))?
            .trim();
        if token == self.secret {
            Ok(())
        } else {
            Err(Status::unauthenticated("invalid token"))
        }
    }
}

/// TLS client-certificate authentication against a common-name allow-list.
pub struct CommonNameAuthenticator {
    allowed: Vec<String>,
}

impl CommonNameAuthenticator {
    /// Builds from the configured allow-list.
    pub fn new(allowed: Vec<String>) -> Self {
        CommonNameAuthenticator { allowed }
    }
}

impl Authenticator for CommonNameAuthenticator {
    fn authenticate(&self, ctx: &AuthContext<'_>) -> Result<(), Status> {
        let certs = ctx
            .peer_certs
            .filter(|certs| !certs.is_empty())
            .ok_or_else(|| Status::unauthenticated("client certificate required"))?;
        let leaf = certs
            .first()
            .ok_or_else(|| Status::unauthenticated("client certificate required"))?;
        let (_, cert) = x509_parser::certificate::X509Certificate::from_der(leaf)
            .map_err(|_| Status::unauthenticated("unparseable client certificate"))?;
        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .ok_or_else(|| Status::unauthenticated("client certificate has no common name"))?;
        if self.allowed.iter().any(|allowed| allowed == cn) {
            Ok(())
        } else {
            debug!(target: "rpc", cn, "client CN not in allow-list");
            Err(Status::unauthenticated("client CN not allowed"))
        }
    }
}

/// An ordered chain of authenticators; first success wins.
pub struct AuthChain {
    authenticators: Vec<Box<dyn Authenticator>>,
}

impl AuthChain {
    /// Builds a chain. An empty chain denies everything.
    pub fn new(authenticators: Vec<Box<dyn Authenticator>>) -> Self {
        AuthChain { authenticators }
    }

    /// Whether any mechanism is configured.
    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }

    /// Runs the chain: first success returns `Ok`; otherwise the first
    /// failure is returned. Empty chains deny by default.
    pub fn authenticate(&self, ctx: &AuthContext<'_>) -> Result<(), Status> {
        let mut first_failure: Option<Status> = None;
        for authenticator in &self.authenticators {
            match authenticator.authenticate(ctx) {
                Ok(()) => return Ok(()),
                Err(status) => {
                    if first_failure.is_none() {
                        first_failure = Some(status);
                    }
                }
            }
        }
        Err(first_failure
            .unwrap_or_else(|| Status::unauthenticated("no authentication mechanism configured")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    fn metadata_with(header: &str, value: &str) -> MetadataMap {
        let mut metadata = MetadataMap::new();
        metadata.insert(
            header.parse::<tonic::metadata::AsciiMetadataKey>().unwrap(),
            MetadataValue::try_from(value).unwrap(),
        );
        metadata
    }

    #[test]
    fn bearer_token_accepted_after_trim() {
        let auth = TokenAuthenticator::new("Authorization", "s3cret");
        let metadata = metadata_with("authorization", "Bearer   s3cret  ");
        let ctx = AuthContext {
            metadata: &metadata,
            peer_certs: None,
        };
        assert!(auth.authenticate(&ctx).is_ok());
    }

    #[test]
    fn wrong_token_and_wrong_scheme_rejected() {
        let auth = TokenAuthenticator::new("authorization", "s3cret");
        for bad in ["Bearer nope", "Basic s3cret", "s3cret"] {
            let metadata = metadata_with("authorization", bad);
            let ctx = AuthContext {
                metadata: &metadata,
                peer_certs: None,
            };
            assert!(auth.authenticate(&ctx).is_err(), "value {bad:?}");
        }
    }

    #[test]
    fn custom_header_is_lowercased() {
        let auth = TokenAuthenticator::new("X-NHB-Auth", "tok");
        let metadata = metadata_with("x-nhb-auth", "Bearer tok");
        let ctx = AuthContext {
            metadata: &metadata,
            peer_certs: None,
        };
        assert!(auth.authenticate(&ctx).is_ok());
    }

    #[test]
    fn empty_chain_denies() {
        let chain = AuthChain::new(vec![]);
        let metadata = MetadataMap::new();
        let ctx = AuthContext {
            metadata: &metadata,
            peer_certs: None,
        };
        assert!(chain.authenticate(&ctx).is_err());
    }

    #[test]
    fn chain_short_circuits_on_success() {
        struct Deny;
        impl Authenticator for Deny {
            fn authenticate(&self, _: &AuthContext<'_>) -> Result<(), Status> {
                Err(Status::unauthenticated("deny"))
            }
        }
        struct Allow;
        impl Authenticator for Allow {
            fn authenticate(&self, _: &AuthContext<'_>) -> Result<(), Status> {
                Ok(())
            }
        }
        let chain = AuthChain::new(vec![Box::new(Deny), Box::new(Allow)]);
        let metadata = MetadataMap::new();
        let ctx = AuthContext {
            metadata: &metadata,
            peer_certs: None,
        };
        assert!(chain.authenticate(&ctx).is_ok());

        let deny_only = AuthChain::new(vec![Box::new(Deny), Box::new(Deny)]);
        let err = deny_only.authenticate(&ctx).unwrap_err();
        assert_eq!(err.message(), "deny");
    }

    #[test]
    fn missing_client_cert_rejected() {
        let auth = CommonNameAuthenticator::new(vec!["relay-1".to_string()]);
        let metadata = MetadataMap::new();
        let ctx = AuthContext {
            metadata: &metadata,
            peer_certs: None,
        };
        assert!(auth.authenticate(&ctx).is_err());
    }
}
