//! Dial-side transport security.

use tonic::transport::{Certificate, ClientTlsConfig, Endpoint, Identity};

use nhb_types::config::{is_loopback, NetworkSecurity};
use nhb_types::error::RelayError;

/// Applies the network-security descriptor to a dial endpoint.
///
/// Mutual TLS is the default; plaintext is permitted only when the
/// configuration opts in, the runtime flag opts in, and the target resolves
/// to loopback. Anything else fails fast so a misconfigured node never
/// dials out in the clear.
pub async fn configure_endpoint(
    endpoint: Endpoint,
    target: &str,
    security: &NetworkSecurity,
    runtime_allow_insecure: bool,
) -> Result<Endpoint, RelayError> {
    match &security.tls {
        Some(material) => {
            let cert = tokio::fs::read(&material.cert_path)
                .await
                .map_err(|e| RelayError::Dial(format!("read client cert: {e}")))?;
            let key = tokio::fs::read(&material.key_path)
                .await
                .map_err(|e| RelayError::Dial(format!("read client key: {e}")))?;
            let mut tls = ClientTlsConfig::new().identity(Identity::from_pem(cert, key));
            if let Some(ca_path) = &material.ca_path {
                let ca = tokio::fs::read(ca_path)
                    .await
                    .map_err(|e| RelayError::Dial(format!("read CA cert: {e}")))?;
                tls = tls.ca_certificate(Certificate::from_pem(ca));
            }
            if let Some(domain) = &security.server_name_override {
                tls = tls.domain_name(domain.clone());
            }
            endpoint
                .tls_config(tls)
                .map_err(|e| RelayError::Dial(format!("tls config: {e}")))
        }
        None => {
            let permitted =
                security.allow_insecure && runtime_allow_insecure && is_loopback(target);
            if !permitted {
                return Err(RelayError::InsecureRefused(format!(
                    "plaintext dial to {target} requires allow_insecure in config, \
                     the runtime flag, and a loopback target"
                )));
            }
            Ok(endpoint)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plaintext_requires_triple_opt_in() {
        let endpoint = Endpoint::from_static("http://127.0.0.1:9555");
        let security = NetworkSecurity {
            allow_insecure: true,
            ..Default::default()
        };

        // Missing runtime flag.
        assert!(matches!(
            configure_endpoint(endpoint.clone(), "http://127.0.0.1:9555", &security, false).await,
            Err(RelayError::InsecureRefused(_))
        ));

        // Non-loopback target.
        assert!(matches!(
            configure_endpoint(endpoint.clone(), "http://10.0.0.5:9555", &security, true).await,
            Err(RelayError::InsecureRefused(_))
        ));

        // All three conditions hold.
        assert!(
            configure_endpoint(endpoint, "http://127.0.0.1:9555", &security, true)
                .await
                .is_ok()
        );
    }
}
