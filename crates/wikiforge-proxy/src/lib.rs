//! wikiforge-proxy — routing and TLS for tenant domains.
//!
//! Two adapters live here:
//!
//! - [`NginxProxy`]: renders a routing rule for `(domain, port)` into a
//!   staging file, atomically activates it, validates the full proxy
//!   configuration, and only then signals a reload.
//! - [`CertbotIssuer`]: obtains and revokes domain-validated
//!   certificates through the certbot CLI, wrapped as a typed adapter.
//!
//! Both shell out to external tools (`nginx -t`, `systemctl reload`,
//! `certbot`) through the typed runner in [`command`]; the argv vectors
//! come from configuration so tests substitute `true`/`false`.

pub mod command;
pub mod tls;
pub mod vhost;

pub use tls::CertbotIssuer;
pub use vhost::NginxProxy;
