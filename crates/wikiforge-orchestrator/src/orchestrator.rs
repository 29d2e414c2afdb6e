//! The provisioning pipeline and its compensating rollback.
//!
//! Forward order: conflict check → port + names → database → container →
//! proxy route → certificate → `Deployed`. Any step failure (or an
//! elapsed pipeline deadline) runs the inverse of every completed step
//! in strict reverse order before the error is surfaced. Compensation
//! errors are collected, never aborted on: an instance that still has
//! external resources after rollback stays `Failed` with the residuals
//! recorded, and the caller sees `RollbackIncomplete`.
//!
//! Teardown is the same compensation sequence applied to a `Deployed`
//! (or `Failed`, for operator retries) instance.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};
use uuid::Uuid;

use wikiforge_core::names::{InstanceNames, validate_slug};
use wikiforge_core::{
    AdapterError, CertificateIssuer, ContainerRuntime, ContainerSpec, DatabaseProvisioner,
    ForgeConfig, ReverseProxy,
};
use wikiforge_core::config::Retention;
use wikiforge_state::{Instance, InstanceRegistry, InstanceStatus, StateError};

use crate::error::{OrchestratorError, OrchestratorResult, Step};
use crate::ports::PortAllocator;

/// Port Wiki.js listens on inside its container.
const WIKI_CONTAINER_PORT: u16 = 3000;

/// Mount point for per-instance data inside the container.
const WIKI_DATA_MOUNT: &str = "/wiki/data";

/// A provisioning request as accepted from the request layer.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub tenant_name: String,
    pub slug: String,
}

/// Sequences provisioning and teardown pipelines.
///
/// All collaborators are injected; pipelines for different instances may
/// run concurrently, sharing only the port reservation set and the
/// registry's serialized writes.
pub struct Orchestrator {
    config: ForgeConfig,
    registry: InstanceRegistry,
    ports: PortAllocator,
    runtime: Arc<dyn ContainerRuntime>,
    databases: Arc<dyn DatabaseProvisioner>,
    proxy: Arc<dyn ReverseProxy>,
    certs: Arc<dyn CertificateIssuer>,
}

impl Orchestrator {
    /// Assemble the orchestrator and reseed port reservations from the
    /// registry's live instances.
    pub fn new(
        config: ForgeConfig,
        registry: InstanceRegistry,
        ports: PortAllocator,
        runtime: Arc<dyn ContainerRuntime>,
        databases: Arc<dyn DatabaseProvisioner>,
        proxy: Arc<dyn ReverseProxy>,
        certs: Arc<dyn CertificateIssuer>,
    ) -> OrchestratorResult<Self> {
        let claimed = registry.active_ports()?;
        if !claimed.is_empty() {
            info!(count = claimed.len(), "reseeding port reservations from registry");
        }
        ports.reserve_existing(claimed);

        Ok(Self {
            config,
            registry,
            ports,
            runtime,
            databases,
            proxy,
            certs,
        })
    }

    /// Provision a new instance for a tenant.
    pub async fn provision(&self, req: ProvisionRequest) -> OrchestratorResult<Instance> {
        validate_slug(&req.slug).map_err(|e| OrchestratorError::Validation(e.to_string()))?;

        // Fast-path idempotency check. The registry's conflict-checked
        // insert below is the atomic backstop.
        if let Some(existing) = self.registry.get_by_slug(&req.slug)? {
            return Err(OrchestratorError::Conflict(format!(
                "slug {} is already {:?} (instance {})",
                req.slug, existing.status, existing.id
            )));
        }

        let port = self.ports.allocate()?;
        let names = InstanceNames::derive(&req.slug, port, &self.config.orchestrator.base_domain);
        let now = epoch_secs();
        let mut instance = Instance {
            id: Uuid::new_v4().to_string(),
            tenant_name: req.tenant_name,
            slug: req.slug,
            port,
            container_name: names.container,
            db_name: names.database,
            domain: names.domain,
            status: InstanceStatus::Pending,
            status_detail: None,
            residual_resources: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.registry.insert(&instance) {
            self.ports.release(port);
            return Err(match e {
                StateError::Conflict(msg) => OrchestratorError::Conflict(msg),
                other => other.into(),
            });
        }

        instance.status = InstanceStatus::Provisioning;
        instance.updated_at = epoch_secs();
        if let Err(e) = self.registry.update(&instance) {
            // No external resource exists yet; the claim can go back.
            self.ports.release(port);
            return Err(e.into());
        }
        info!(id = %instance.id, slug = %instance.slug, port, "provisioning started");

        let mut completed: Vec<Step> = Vec::new();
        match self.run_pipeline(&instance, &mut completed).await {
            Ok(()) => {
                instance.status = InstanceStatus::Deployed;
                instance.updated_at = epoch_secs();
                self.registry.update(&instance)?;
                info!(id = %instance.id, domain = %instance.domain, "instance deployed");
                Ok(instance)
            }
            Err(trigger) => {
                error!(id = %instance.id, error = %trigger, "pipeline failed, rolling back");
                let residuals = self.roll_back(&mut instance, &completed).await?;
                if residuals.is_empty() {
                    Err(trigger)
                } else {
                    Err(OrchestratorError::RollbackIncomplete {
                        trigger: trigger.to_string(),
                        residuals,
                    })
                }
            }
        }
    }

    /// Tear down an instance, undoing every pipeline step.
    ///
    /// Permitted from `Deployed` and — so operators can retry clearing
    /// residual resources — from `Failed`. Teardown of a `Removed`
    /// instance is an idempotent no-op.
    pub async fn teardown(&self, id: &str) -> OrchestratorResult<Instance> {
        let mut instance = self
            .registry
            .get(id)?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        let prior = instance.status;
        match prior {
            InstanceStatus::Removed => {
                info!(id = %instance.id, "instance already removed");
                return Ok(instance);
            }
            InstanceStatus::Deployed | InstanceStatus::Failed => {}
            other => {
                return Err(OrchestratorError::Conflict(format!(
                    "instance {id} is {other:?}; teardown requires Deployed or Failed"
                )));
            }
        }

        // A Failed instance was already compensated; only the steps that
        // left residuals may be touched again. Its port reservation was
        // released back then and may belong to a newer instance by now,
        // so it must not be released a second time either.
        let steps = match prior {
            InstanceStatus::Deployed => self.pipeline_steps(),
            _ => residual_steps(&instance),
        };

        instance.status = InstanceStatus::RollingBack;
        instance.updated_at = epoch_secs();
        self.registry.update(&instance)?;
        info!(id = %instance.id, slug = %instance.slug, "teardown started");

        let residuals = self.compensate(&instance, &steps).await;
        if prior == InstanceStatus::Deployed {
            self.ports.release(instance.port);
        }

        if residuals.is_empty() {
            instance.status = InstanceStatus::Removed;
            instance.status_detail = None;
            instance.residual_resources = Vec::new();
            instance.updated_at = epoch_secs();
            self.registry.update(&instance)?;
            if self.config.orchestrator.retention == Retention::Purge {
                self.registry.delete(&instance.id)?;
            }
            info!(id = %instance.id, "instance removed");
            Ok(instance)
        } else {
            instance.status = InstanceStatus::Failed;
            instance.status_detail = Some("teardown left residual resources".to_string());
            instance.residual_resources = residuals.clone();
            instance.updated_at = epoch_secs();
            self.registry.update(&instance)?;
            Err(OrchestratorError::RollbackIncomplete {
                trigger: "teardown".to_string(),
                residuals,
            })
        }
    }

    /// Get an instance by id.
    pub fn get(&self, id: &str) -> OrchestratorResult<Instance> {
        self.registry
            .get(id)?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    /// List instances, oldest first.
    pub fn list(&self, offset: usize, limit: usize) -> OrchestratorResult<Vec<Instance>> {
        Ok(self.registry.list(offset, limit)?)
    }

    // ── Internal ────────────────────────────────────────────────────

    /// Run the forward pipeline, recording each completed step.
    ///
    /// The advisory deadline is checked between steps only; an in-flight
    /// external call is always allowed to finish.
    async fn run_pipeline(
        &self,
        instance: &Instance,
        completed: &mut Vec<Step>,
    ) -> Result<(), OrchestratorError> {
        let started = Instant::now();
        let deadline = Duration::from_secs(self.config.orchestrator.pipeline_deadline_secs);

        self.databases
            .create_database(&instance.db_name)
            .await
            .map_err(|source| step_failed(Step::Database, source))?;
        completed.push(Step::Database);
        check_deadline(started, deadline)?;

        self.runtime
            .ensure_network()
            .await
            .map_err(|source| step_failed(Step::Container, source))?;
        self.runtime
            .start(&self.container_spec(instance))
            .await
            .map_err(|source| step_failed(Step::Container, source))?;
        completed.push(Step::Container);
        check_deadline(started, deadline)?;

        self.proxy
            .activate(&instance.domain, instance.port)
            .await
            .map_err(|source| step_failed(Step::ProxyRoute, source))?;
        completed.push(Step::ProxyRoute);
        check_deadline(started, deadline)?;

        if self.config.acme.enabled {
            self.certs
                .issue(&instance.domain)
                .await
                .map_err(|source| step_failed(Step::Certificate, source))?;
            completed.push(Step::Certificate);
        }

        Ok(())
    }

    /// Drive a failed pipeline through `RollingBack` into `Failed` and
    /// return whatever compensation could not undo.
    async fn roll_back(
        &self,
        instance: &mut Instance,
        completed: &[Step],
    ) -> OrchestratorResult<Vec<String>> {
        instance.status = InstanceStatus::RollingBack;
        instance.updated_at = epoch_secs();
        self.registry.update(instance)?;

        let residuals = self.compensate(instance, completed).await;
        self.ports.release(instance.port);

        instance.status = InstanceStatus::Failed;
        instance.residual_resources = residuals.clone();
        instance.updated_at = epoch_secs();
        self.registry.update(instance)?;
        Ok(residuals)
    }

    /// Undo completed steps in strict reverse order.
    ///
    /// Every compensation is attempted even when an earlier one fails;
    /// failures are collected as residual-resource descriptions, never
    /// silently dropped.
    async fn compensate(&self, instance: &Instance, completed: &[Step]) -> Vec<String> {
        let mut residuals = Vec::new();

        for step in completed.iter().rev() {
            let result = match step {
                Step::Certificate => self.certs.revoke(&instance.domain).await,
                Step::ProxyRoute => {
                    self.proxy
                        .deactivate(&instance.domain, instance.port)
                        .await
                }
                Step::Container => self.runtime.stop_and_remove(&instance.container_name).await,
                Step::Database => self.databases.drop_database(&instance.db_name).await,
            };
            match result {
                Ok(()) => info!(id = %instance.id, %step, "compensated"),
                Err(e) => {
                    warn!(id = %instance.id, %step, error = %e, "compensation failed");
                    residuals.push(format!("{step}: {e}"));
                }
            }
        }

        residuals
    }

    /// The full forward step set, as teardown must undo it.
    fn pipeline_steps(&self) -> Vec<Step> {
        let mut steps = vec![Step::Database, Step::Container, Step::ProxyRoute];
        if self.config.acme.enabled {
            steps.push(Step::Certificate);
        }
        steps
    }

    /// Assemble the container spec from configuration and the derived
    /// instance names. Nothing here comes from the tenant request.
    fn container_spec(&self, instance: &Instance) -> ContainerSpec {
        let db = &self.config.database;
        let env = vec![
            ("DB_TYPE".to_string(), "postgres".to_string()),
            ("DB_HOST".to_string(), db.wiki_db_host.clone()),
            ("DB_PORT".to_string(), db.wiki_db_port.to_string()),
            ("DB_USER".to_string(), db.wiki_db_user.clone()),
            ("DB_PASS".to_string(), db.wiki_db_password.clone()),
            ("DB_NAME".to_string(), instance.db_name.clone()),
            (
                "WIKI_ADMIN_EMAIL".to_string(),
                self.config.wiki.admin_email.clone(),
            ),
            (
                "WIKI_ADMIN_PASSWORD".to_string(),
                self.config.wiki.admin_password.clone(),
            ),
        ];

        ContainerSpec {
            name: instance.container_name.clone(),
            image: self.config.docker.image.clone(),
            env,
            network: self.config.docker.network.clone(),
            host_port: instance.port,
            container_port: WIKI_CONTAINER_PORT,
            volume: Some((
                self.config.docker.volume_root.join(instance.port.to_string()),
                WIKI_DATA_MOUNT.to_string(),
            )),
        }
    }
}

fn step_failed(step: Step, source: AdapterError) -> OrchestratorError {
    OrchestratorError::StepFailed { step, source }
}

/// Steps whose compensation previously failed, recovered from the
/// residual descriptions (each is prefixed with the step name).
fn residual_steps(instance: &Instance) -> Vec<Step> {
    [
        Step::Database,
        Step::Container,
        Step::ProxyRoute,
        Step::Certificate,
    ]
    .into_iter()
    .filter(|step| {
        let prefix = format!("{step}:");
        instance
            .residual_resources
            .iter()
            .any(|r| r.starts_with(&prefix))
    })
    .collect()
}

fn check_deadline(started: Instant, deadline: Duration) -> Result<(), OrchestratorError> {
    if started.elapsed() > deadline {
        Err(OrchestratorError::DeadlineExceeded)
    } else {
        Ok(())
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use wikiforge_core::AdapterResult;

    /// One fake world standing in for Docker, PostgreSQL, nginx, and the
    /// CA at once. Records every mutating call in order and can be told
    /// to fail specific operations.
    #[derive(Default)]
    struct MockWorld {
        calls: Mutex<Vec<String>>,
        containers: Mutex<HashSet<String>>,
        databases: Mutex<HashSet<String>>,
        routes: Mutex<HashSet<String>>,
        certs: Mutex<HashSet<String>>,
        fail_on: Mutex<HashSet<&'static str>>,
    }

    impl MockWorld {
        fn fail(&self, op: &'static str) {
            self.fail_on.lock().unwrap().insert(op);
        }

        fn heal(&self, op: &'static str) {
            self.fail_on.lock().unwrap().remove(op);
        }

        fn log(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn should_fail(&self, op: &str) -> bool {
            self.fail_on.lock().unwrap().contains(op)
        }

        fn is_clean(&self) -> bool {
            self.containers.lock().unwrap().is_empty()
                && self.databases.lock().unwrap().is_empty()
                && self.routes.lock().unwrap().is_empty()
                && self.certs.lock().unwrap().is_empty()
        }
    }

    #[async_trait]
    impl ContainerRuntime for MockWorld {
        async fn ensure_network(&self) -> AdapterResult<()> {
            Ok(())
        }

        async fn start(&self, spec: &ContainerSpec) -> AdapterResult<()> {
            self.log(format!("container.start {}", spec.name));
            if self.should_fail("container.start") {
                return Err(AdapterError::CreateFailed("image rejected".to_string()));
            }
            let mut containers = self.containers.lock().unwrap();
            if containers.contains(&spec.name) {
                return Err(AdapterError::Conflict(spec.name.clone()));
            }
            containers.insert(spec.name.clone());
            Ok(())
        }

        async fn stop_and_remove(&self, name: &str) -> AdapterResult<()> {
            self.log(format!("container.remove {name}"));
            if self.should_fail("container.remove") {
                return Err(AdapterError::Unavailable("docker down".to_string()));
            }
            self.containers.lock().unwrap().remove(name);
            Ok(())
        }

        async fn exists(&self, name: &str) -> AdapterResult<bool> {
            Ok(self.containers.lock().unwrap().contains(name))
        }
    }

    #[async_trait]
    impl DatabaseProvisioner for MockWorld {
        async fn create_database(&self, name: &str) -> AdapterResult<()> {
            self.log(format!("db.create {name}"));
            if self.should_fail("db.create") {
                return Err(AdapterError::CreateFailed("permission denied".to_string()));
            }
            self.databases.lock().unwrap().insert(name.to_string());
            Ok(())
        }

        async fn drop_database(&self, name: &str) -> AdapterResult<()> {
            self.log(format!("db.drop {name}"));
            if self.should_fail("db.drop") {
                return Err(AdapterError::Unavailable("postgres down".to_string()));
            }
            self.databases.lock().unwrap().remove(name);
            Ok(())
        }

        async fn database_exists(&self, name: &str) -> AdapterResult<bool> {
            Ok(self.databases.lock().unwrap().contains(name))
        }
    }

    #[async_trait]
    impl ReverseProxy for MockWorld {
        async fn activate(&self, domain: &str, port: u16) -> AdapterResult<()> {
            self.log(format!("proxy.activate {domain}:{port}"));
            if self.should_fail("proxy.activate") {
                return Err(AdapterError::ConfigInvalid("nginx -t failed".to_string()));
            }
            self.routes.lock().unwrap().insert(format!("{domain}:{port}"));
            Ok(())
        }

        async fn deactivate(&self, domain: &str, port: u16) -> AdapterResult<()> {
            self.log(format!("proxy.deactivate {domain}:{port}"));
            if self.should_fail("proxy.deactivate") {
                return Err(AdapterError::Unavailable("reload failed".to_string()));
            }
            self.routes.lock().unwrap().remove(&format!("{domain}:{port}"));
            Ok(())
        }

        async fn route_exists(&self, domain: &str, port: u16) -> AdapterResult<bool> {
            Ok(self
                .routes
                .lock()
                .unwrap()
                .contains(&format!("{domain}:{port}")))
        }
    }

    #[async_trait]
    impl CertificateIssuer for MockWorld {
        async fn issue(&self, domain: &str) -> AdapterResult<()> {
            self.log(format!("cert.issue {domain}"));
            if self.should_fail("cert.issue") {
                return Err(AdapterError::IssuanceFailed("rate limited".to_string()));
            }
            self.certs.lock().unwrap().insert(domain.to_string());
            Ok(())
        }

        async fn revoke(&self, domain: &str) -> AdapterResult<()> {
            self.log(format!("cert.revoke {domain}"));
            if self.should_fail("cert.revoke") {
                return Err(AdapterError::IssuanceFailed("delete failed".to_string()));
            }
            self.certs.lock().unwrap().remove(domain);
            Ok(())
        }
    }

    fn test_config() -> ForgeConfig {
        let mut config = ForgeConfig::default();
        config.ports.start = 8001;
        config.ports.end = 8003;
        config.orchestrator.base_domain = "example.com".to_string();
        config
    }

    fn test_orchestrator(config: ForgeConfig, world: Arc<MockWorld>) -> Orchestrator {
        let registry = InstanceRegistry::open_in_memory().unwrap();
        let ports = PortAllocator::with_probe(config.ports.start, config.ports.end, |_| true);
        Orchestrator::new(
            config,
            registry,
            ports,
            world.clone(),
            world.clone(),
            world.clone(),
            world,
        )
        .unwrap()
    }

    fn acme_request() -> ProvisionRequest {
        ProvisionRequest {
            tenant_name: "acme".to_string(),
            slug: "acme-1".to_string(),
        }
    }

    #[tokio::test]
    async fn provisions_first_free_port_with_derived_names() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world.clone());

        let instance = orchestrator.provision(acme_request()).await.unwrap();

        assert_eq!(instance.port, 8001);
        assert_eq!(instance.container_name, "wiki_8001");
        assert_eq!(instance.db_name, "wikisaas_db_acme_1");
        assert_eq!(instance.domain, "acme-1.example.com");
        assert_eq!(instance.status, InstanceStatus::Deployed);

        assert!(world.exists("wiki_8001").await.unwrap());
        assert!(world.database_exists("wikisaas_db_acme_1").await.unwrap());
        assert!(world.route_exists("acme-1.example.com", 8001).await.unwrap());
        assert!(world.certs.lock().unwrap().contains("acme-1.example.com"));

        // The durable record matches what was returned.
        let stored = orchestrator.get(&instance.id).unwrap();
        assert_eq!(stored, instance);
    }

    #[tokio::test]
    async fn concurrent_instances_get_distinct_ports() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world);

        let first = orchestrator.provision(acme_request()).await.unwrap();
        let second = orchestrator
            .provision(ProvisionRequest {
                tenant_name: "umbrella".to_string(),
                slug: "umbrella".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(first.port, 8001);
        assert_eq!(second.port, 8002);
    }

    #[tokio::test]
    async fn validation_failure_touches_nothing() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world.clone());

        let result = orchestrator
            .provision(ProvisionRequest {
                tenant_name: "acme".to_string(),
                slug: "Not A Slug".to_string(),
            })
            .await;

        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
        assert!(world.calls().is_empty());
        assert!(orchestrator.list(0, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_slug_is_rejected_while_deployed() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world);

        orchestrator.provision(acme_request()).await.unwrap();
        let result = orchestrator.provision(acme_request()).await;

        assert!(matches!(result, Err(OrchestratorError::Conflict(_))));
    }

    #[tokio::test]
    async fn duplicate_slug_is_rejected_while_provisioning() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world);

        // Pin an instance in Provisioning, as a concurrent pipeline would.
        let now = epoch_secs();
        let mut inflight = Instance {
            id: "inflight".to_string(),
            tenant_name: "acme".to_string(),
            slug: "acme-1".to_string(),
            port: 8002,
            container_name: "wiki_8002".to_string(),
            db_name: "wikisaas_db_acme_1".to_string(),
            domain: "acme-1.example.com".to_string(),
            status: InstanceStatus::Pending,
            status_detail: None,
            residual_resources: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        orchestrator.registry.insert(&inflight).unwrap();
        inflight.status = InstanceStatus::Provisioning;
        orchestrator.registry.update(&inflight).unwrap();

        let result = orchestrator.provision(acme_request()).await;
        assert!(matches!(result, Err(OrchestratorError::Conflict(_))));
    }

    #[tokio::test]
    async fn slug_is_reusable_after_teardown() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world);

        let first = orchestrator.provision(acme_request()).await.unwrap();
        orchestrator.teardown(&first.id).await.unwrap();

        let second = orchestrator.provision(acme_request()).await.unwrap();
        assert_ne!(first.id, second.id);
        // The released port is allocated again.
        assert_eq!(second.port, 8001);
    }

    #[tokio::test]
    async fn proxy_failure_rolls_back_container_database_and_port() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world.clone());
        world.fail("proxy.activate");

        let result = orchestrator.provision(acme_request()).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::StepFailed {
                step: Step::ProxyRoute,
                ..
            })
        ));

        // Nothing created at steps 1..k-1 remains.
        assert!(!world.exists("wiki_8001").await.unwrap());
        assert!(!world.database_exists("wikisaas_db_acme_1").await.unwrap());
        assert!(world.is_clean());

        // The instance ended Failed with the trigger attached.
        let failed = &orchestrator.list(0, 10).unwrap()[0];
        assert_eq!(failed.status, InstanceStatus::Failed);
        assert!(failed.residual_resources.is_empty());

        // Port 8001 is free again for the next request.
        world.heal("proxy.activate");
        let next = orchestrator
            .provision(ProvisionRequest {
                tenant_name: "umbrella".to_string(),
                slug: "umbrella".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(next.port, 8001);
    }

    #[tokio::test]
    async fn certificate_failure_compensates_in_reverse_order() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world.clone());
        world.fail("cert.issue");

        let result = orchestrator.provision(acme_request()).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::StepFailed {
                step: Step::Certificate,
                ..
            })
        ));
        assert!(world.is_clean());

        // Route is removed first, then container, then database.
        let calls = world.calls();
        let failure = calls
            .iter()
            .position(|c| c == "cert.issue acme-1.example.com")
            .unwrap();
        assert_eq!(
            calls[failure + 1..],
            [
                "proxy.deactivate acme-1.example.com:8001".to_string(),
                "container.remove wiki_8001".to_string(),
                "db.drop wikisaas_db_acme_1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn database_failure_needs_no_compensation_calls() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world.clone());
        world.fail("db.create");

        let result = orchestrator.provision(acme_request()).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::StepFailed {
                step: Step::Database,
                ..
            })
        ));

        // Only the failed create was attempted.
        assert_eq!(world.calls(), vec!["db.create wikisaas_db_acme_1".to_string()]);
    }

    #[tokio::test]
    async fn compensation_failures_become_residuals() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world.clone());
        world.fail("cert.issue");
        world.fail("db.drop");

        let result = orchestrator.provision(acme_request()).await;
        let Err(OrchestratorError::RollbackIncomplete { trigger, residuals }) = result else {
            panic!("expected RollbackIncomplete");
        };
        assert!(trigger.contains("certificate"));
        assert_eq!(residuals.len(), 1);
        assert!(residuals[0].starts_with("database:"));

        // Later compensations still ran despite the database failure.
        assert!(!world.exists("wiki_8001").await.unwrap());

        let failed = &orchestrator.list(0, 10).unwrap()[0];
        assert_eq!(failed.status, InstanceStatus::Failed);
        assert_eq!(failed.residual_resources, residuals);
    }

    #[tokio::test]
    async fn failed_instance_with_residuals_can_be_torn_down_again() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world.clone());
        world.fail("cert.issue");
        world.fail("db.drop");

        orchestrator.provision(acme_request()).await.unwrap_err();
        let failed = orchestrator.list(0, 10).unwrap()[0].clone();

        // Postgres is back; the operator retries.
        world.heal("db.drop");
        let calls_before = world.calls().len();
        let removed = orchestrator.teardown(&failed.id).await.unwrap();
        assert_eq!(removed.status, InstanceStatus::Removed);
        assert!(world.is_clean());

        // Only the residual step is compensated again; resources that
        // were already cleaned up (and whose names may have been
        // re-claimed since) are left alone.
        let retry_calls = &world.calls()[calls_before..];
        assert_eq!(retry_calls, ["db.drop wikisaas_db_acme_1".to_string()]);
    }

    #[tokio::test]
    async fn teardown_undoes_every_step() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world.clone());

        let instance = orchestrator.provision(acme_request()).await.unwrap();
        let removed = orchestrator.teardown(&instance.id).await.unwrap();

        assert_eq!(removed.status, InstanceStatus::Removed);
        assert!(world.is_clean());

        // Retention is keep by default: the record survives as Removed.
        let stored = orchestrator.get(&instance.id).unwrap();
        assert_eq!(stored.status, InstanceStatus::Removed);
    }

    #[tokio::test]
    async fn teardown_purges_record_when_configured() {
        let world = Arc::new(MockWorld::default());
        let mut config = test_config();
        config.orchestrator.retention = Retention::Purge;
        let orchestrator = test_orchestrator(config, world);

        let instance = orchestrator.provision(acme_request()).await.unwrap();
        orchestrator.teardown(&instance.id).await.unwrap();

        assert!(matches!(
            orchestrator.get(&instance.id),
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn teardown_is_idempotent_once_removed() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world.clone());

        let instance = orchestrator.provision(acme_request()).await.unwrap();
        orchestrator.teardown(&instance.id).await.unwrap();

        let calls_before = world.calls().len();
        let again = orchestrator.teardown(&instance.id).await.unwrap();
        assert_eq!(again.status, InstanceStatus::Removed);
        // No further side effects.
        assert_eq!(world.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn teardown_of_unknown_instance_is_not_found() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world);

        let result = orchestrator.teardown("no-such-id").await;
        assert!(matches!(result, Err(OrchestratorError::NotFound(_))));
    }

    #[tokio::test]
    async fn teardown_of_in_flight_instance_conflicts() {
        let world = Arc::new(MockWorld::default());
        let orchestrator = test_orchestrator(test_config(), world);

        let now = epoch_secs();
        let pending = Instance {
            id: "pending-id".to_string(),
            tenant_name: "acme".to_string(),
            slug: "acme-1".to_string(),
            port: 8001,
            container_name: "wiki_8001".to_string(),
            db_name: "wikisaas_db_acme_1".to_string(),
            domain: "acme-1.example.com".to_string(),
            status: InstanceStatus::Pending,
            status_detail: None,
            residual_resources: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        orchestrator.registry.insert(&pending).unwrap();

        let result = orchestrator.teardown("pending-id").await;
        assert!(matches!(result, Err(OrchestratorError::Conflict(_))));
    }

    #[tokio::test]
    async fn exhausted_port_range_fails_before_side_effects() {
        let world = Arc::new(MockWorld::default());
        let mut config = test_config();
        config.ports.end = 8002; // a single port
        let orchestrator = test_orchestrator(config, world.clone());

        orchestrator.provision(acme_request()).await.unwrap();
        let calls_before = world.calls().len();

        let result = orchestrator
            .provision(ProvisionRequest {
                tenant_name: "umbrella".to_string(),
                slug: "umbrella".to_string(),
            })
            .await;

        assert!(matches!(result, Err(OrchestratorError::PortsExhausted)));
        assert_eq!(world.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn disabled_acme_skips_certificate_step() {
        let world = Arc::new(MockWorld::default());
        let mut config = test_config();
        config.acme.enabled = false;
        let orchestrator = test_orchestrator(config, world.clone());

        let instance = orchestrator.provision(acme_request()).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Deployed);

        orchestrator.teardown(&instance.id).await.unwrap();
        assert!(!world.calls().iter().any(|c| c.starts_with("cert.")));
    }

    #[tokio::test]
    async fn elapsed_deadline_triggers_rollback() {
        let world = Arc::new(MockWorld::default());
        let mut config = test_config();
        config.orchestrator.pipeline_deadline_secs = 0;
        let orchestrator = test_orchestrator(config, world.clone());

        let result = orchestrator.provision(acme_request()).await;
        assert!(matches!(result, Err(OrchestratorError::DeadlineExceeded)));

        // The database created before the deadline check was dropped.
        assert!(world.is_clean());
        let failed = &orchestrator.list(0, 10).unwrap()[0];
        assert_eq!(failed.status, InstanceStatus::Failed);
    }

    #[tokio::test]
    async fn startup_reseeds_reservations_from_registry() {
        let world = Arc::new(MockWorld::default());
        let registry = InstanceRegistry::open_in_memory().unwrap();

        let now = epoch_secs();
        registry
            .insert(&Instance {
                id: "survivor".to_string(),
                tenant_name: "acme".to_string(),
                slug: "acme-1".to_string(),
                port: 8001,
                container_name: "wiki_8001".to_string(),
                db_name: "wikisaas_db_acme_1".to_string(),
                domain: "acme-1.example.com".to_string(),
                status: InstanceStatus::Pending,
                status_detail: None,
                residual_resources: Vec::new(),
                created_at: now,
                updated_at: now,
            })
            .unwrap();

        let config = test_config();
        let ports = PortAllocator::with_probe(config.ports.start, config.ports.end, |_| true);
        let orchestrator = Orchestrator::new(
            config,
            registry,
            ports,
            world.clone(),
            world.clone(),
            world.clone(),
            world,
        )
        .unwrap();

        // 8001 is claimed by the surviving record; the next instance
        // must not collide with it.
        let instance = orchestrator
            .provision(ProvisionRequest {
                tenant_name: "umbrella".to_string(),
                slug: "umbrella".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(instance.port, 8002);
    }
}
