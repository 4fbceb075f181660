//! Implementation of [Resolver] for a Consul-style naming service
//!
//! Targets look like `consul://127.0.0.1:8500/my-service?healthy=true`. The
//! resolver issues blocking queries against the agent for the named service,
//! and publishes every answer as a new snapshot of addresses.

use crate::address::{Address, State};
use crate::backoff::Backoff;
use crate::naming::{self, QueryMeta, QueryOptions, ServiceEntry, SharedNamingService};
#[cfg(feature = "probes")]
use crate::probes;
use crate::resolver::{self, BoxedResolver, Resolver, SharedStateSink};
use crate::target::Target;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

/// The scheme of targets resolved through the naming service.
pub const SCHEME: &str = "consul";

// How long do we wait before retrying a failed query, at first?
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_millis(10);

// How long can the wait between failed queries grow?
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(1);

/// What to watch, and how, parsed from a target.
///
/// Options are passed as the query string of the target's endpoint, e.g.
/// `consul://127.0.0.1:8500/svc?tag=primary&healthy=true&wait=14s`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsulTarget {
    /// How to reach the agent. Taken from the target's agent, and the
    /// `token` and `tls` options.
    pub agent: naming::Agent,

    /// The name of the service to watch.
    pub service: String,

    /// Only return instances with this tag.
    ///
    /// Option: `tag`. Default: None
    pub tag: Option<String>,

    /// Only return instances passing their health checks.
    ///
    /// Option: `healthy`. Default: false
    pub healthy: bool,

    /// How long the agent may block each query.
    ///
    /// Option: `wait`. Default: None, the agent's default
    pub wait: Option<Duration>,

    /// Option: `dc`. Default: None, the agent's datacenter
    pub datacenter: Option<String>,

    /// Sort instances by round trip time from this node.
    ///
    /// Option: `near`. Default: None
    pub near: Option<String>,

    /// Publish at most this many addresses. Zero means no limit.
    ///
    /// Option: `limit`. Default: 0
    pub limit: usize,

    /// Option: `min-backoff`. Default: 10 milliseconds
    pub min_backoff: Duration,

    /// Option: `max-backoff`. Default: 1 second
    pub max_backoff: Duration,

    /// Option: `allow-stale`. Default: false
    pub allow_stale: bool,

    /// Option: `require-consistent`. Default: false
    pub require_consistent: bool,
}

impl Default for ConsulTarget {
    fn default() -> Self {
        Self {
            agent: naming::Agent::default(),
            service: String::new(),
            tag: None,
            healthy: false,
            wait: None,
            datacenter: None,
            near: None,
            limit: 0,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            allow_stale: false,
            require_consistent: false,
        }
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|err| format!("bad duration {value:?}: {err}"))
}

fn parse_bool(value: &str) -> Result<bool, String> {
    value
        .parse()
        .map_err(|_| format!("bad boolean {value:?}"))
}

impl ConsulTarget {
    /// Parses the watch parameters out of a target.
    pub fn from_target(target: &Target) -> Result<Self, resolver::Error> {
        let invalid = |reason: String| resolver::Error::InvalidTarget {
            target: target.to_string(),
            reason,
        };

        let (service, query) = match target.endpoint.split_once('?') {
            Some((service, query)) => (service, query),
            None => (target.endpoint.as_str(), ""),
        };
        if service.is_empty() || service.contains('/') {
            return Err(invalid(format!("bad service name {service:?}")));
        }

        let mut result = Self {
            agent: naming::Agent {
                address: target.agent.clone(),
                ..Default::default()
            },
            service: service.to_string(),
            ..Default::default()
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.as_ref();
            match key.as_ref() {
                "tag" => result.tag = Some(value.to_string()),
                "healthy" => result.healthy = parse_bool(value).map_err(invalid)?,
                "wait" => result.wait = Some(parse_duration(value).map_err(invalid)?),
                "dc" => result.datacenter = Some(value.to_string()),
                "near" => result.near = Some(value.to_string()),
                "limit" => {
                    result.limit = value
                        .parse()
                        .map_err(|_| invalid(format!("bad limit {value:?}")))?
                }
                "min-backoff" => result.min_backoff = parse_duration(value).map_err(invalid)?,
                "max-backoff" => result.max_backoff = parse_duration(value).map_err(invalid)?,
                "allow-stale" => result.allow_stale = parse_bool(value).map_err(invalid)?,
                "require-consistent" => {
                    result.require_consistent = parse_bool(value).map_err(invalid)?
                }
                "token" => result.agent.token = Some(value.to_string()),
                "tls" => result.agent.tls = parse_bool(value).map_err(invalid)?,
                other => return Err(invalid(format!("unknown option {other:?}"))),
            }
        }
        if result.allow_stale && result.require_consistent {
            return Err(invalid(
                "allow-stale and require-consistent are exclusive".to_string(),
            ));
        }
        if result.min_backoff.is_zero() || result.max_backoff.is_zero() {
            return Err(invalid("backoff durations must be non-zero".to_string()));
        }
        if result.min_backoff > result.max_backoff {
            return Err(invalid(format!(
                "min-backoff {:?} exceeds max-backoff {:?}",
                result.min_backoff, result.max_backoff
            )));
        }
        Ok(result)
    }

    // Zero durations would retry a failing naming service in a tight loop,
    // so they fall back to the defaults.
    fn backoff(&self) -> Backoff {
        let or_default = |value: Duration, default: Duration| {
            if value.is_zero() {
                default
            } else {
                value
            }
        };
        Backoff::new(
            or_default(self.min_backoff, DEFAULT_MIN_BACKOFF),
            or_default(self.max_backoff, DEFAULT_MAX_BACKOFF),
        )
    }

    fn query_options(&self, wait_index: u64) -> QueryOptions {
        QueryOptions {
            wait_index,
            wait_time: self.wait,
            datacenter: self.datacenter.clone(),
            near: self.near.clone(),
            allow_stale: self.allow_stale,
            require_consistent: self.require_consistent,
        }
    }
}

impl fmt::Display for ConsulTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "service={:?} healthy={} tag={:?}",
            self.service, self.healthy, self.tag
        )
    }
}

// Formats "host:port", bracketing IPv6 hosts.
fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn entry_to_address(entry: ServiceEntry) -> Address {
    let host = if entry.service_address.is_empty() {
        &entry.node_address
    } else {
        &entry.service_address
    };
    let mut address = Address::new(host_port(host, entry.port));
    if let Some(weight) = entry.weight {
        address.attributes.set_weight(weight);
    }
    for (key, value) in entry.meta {
        address.attributes.insert_metadata(key, value);
    }
    address
}

// A request to retry a failed query without waiting out the backoff.
//
// Requests made while a query is in flight are dropped when the next query
// starts. Requests made after a query fails are kept until the worker waits.
#[derive(Default)]
struct ResolveNow {
    requested: AtomicBool,
    notify: Notify,
}

impl ResolveNow {
    fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    // Completes once a request is pending, consuming it.
    async fn requested(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag, so a request landing in
            // between still wakes us.
            notified.as_mut().enable();
            if self.requested.swap(false, Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// Watches the naming service for one target.
struct ConsulResolverWorker {
    client: SharedNamingService,
    target: ConsulTarget,
    backoff: Backoff,

    // The index of the last successful query, used to block on the next one.
    last_index: u64,

    // Lets the owner of the resolver cut a backoff short.
    resolve_now: Arc<ResolveNow>,

    // The most recent snapshot, consumed by the forwarding task.
    snapshot_tx: watch::Sender<Option<Vec<Address>>>,
}

impl ConsulResolverWorker {
    async fn query(&self) -> Result<(Vec<ServiceEntry>, QueryMeta), naming::Error> {
        self.client
            .service(
                &self.target.service,
                self.target.tag.as_deref(),
                self.target.healthy,
                &self.target.query_options(self.last_index),
            )
            .await
    }

    // The naming service may reset its index (e.g. after a restart). If the
    // index moves backwards, start over with a non-blocking query.
    fn observe_index(&mut self, index: u64) {
        self.last_index = if index < self.last_index { 0 } else { index };
    }

    fn publish(&mut self, entries: Vec<ServiceEntry>, meta: QueryMeta) {
        self.observe_index(meta.last_index);
        event!(
            Level::INFO,
            count = entries.len(),
            request_time = ?meta.request_time,
            target = %self.target,
            "Endpoints fetched"
        );

        let mut addresses: Vec<_> = entries.into_iter().map(entry_to_address).collect();
        if self.target.limit != 0 {
            addresses.truncate(self.target.limit);
        }

        #[cfg(feature = "probes")]
        probes::resolve__done!(|| (
            self.target.service.as_str(),
            addresses.len() as u64
        ));

        // Never blocks: an unconsumed snapshot is simply replaced.
        self.snapshot_tx.send_replace(Some(addresses));
    }

    #[instrument(skip_all, name = "ConsulResolverWorker::run")]
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            self.resolve_now.clear();
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.query() => result,
            };

            match result {
                Ok((entries, meta)) => {
                    self.backoff.reset();
                    self.publish(entries, meta);
                }
                Err(err) => {
                    let delay = self.backoff.next_delay();
                    event!(
                        Level::WARN,
                        ?err,
                        ?delay,
                        target = %self.target,
                        "Couldn't fetch endpoints"
                    );
                    #[cfg(feature = "probes")]
                    probes::resolve__failed!(|| (
                        self.target.service.as_str(),
                        err.to_string()
                    ));

                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {},
                        _ = self.resolve_now.requested() => {
                            event!(Level::DEBUG, "Retrying immediately on request");
                        },
                    }
                }
            }
        }
    }
}

// Hands snapshots to the consumer, so a slow consumer never stalls the
// naming service queries.
async fn forward_snapshots(
    mut snapshot_rx: watch::Receiver<Option<Vec<Address>>>,
    sink: SharedStateSink,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                event!(Level::INFO, "Watch has been finished");
                return;
            }
            changed = snapshot_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let Some(addresses) = snapshot_rx.borrow_and_update().clone() else {
                    continue;
                };
                if let Err(err) = sink.update_state(State::new(addresses)) {
                    sink.report_error(err);
                }
            }
        }
    }
}

/// Watches a service through a naming service agent.
pub struct ConsulResolver {
    cancel: CancellationToken,
    resolve_now: Arc<ResolveNow>,
    handles: Vec<JoinHandle<()>>,
}

impl ConsulResolver {
    /// Starts watching `target` through `client`, publishing to `sink`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        client: SharedNamingService,
        target: ConsulTarget,
        sink: SharedStateSink,
    ) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let resolve_now = Arc::new(ResolveNow::default());
        let worker = ConsulResolverWorker {
            client,
            backoff: target.backoff(),
            target,
            last_index: 0,
            resolve_now: resolve_now.clone(),
            snapshot_tx,
        };

        let handles = vec![
            tokio::task::spawn(worker.run(cancel.clone())),
            tokio::task::spawn(forward_snapshots(snapshot_rx, sink, cancel.clone())),
        ];
        Self {
            cancel,
            resolve_now,
            handles,
        }
    }
}

impl Drop for ConsulResolver {
    fn drop(&mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

#[async_trait::async_trait]
impl Resolver for ConsulResolver {
    fn resolve_now(&self) {
        self.resolve_now.request();
    }

    async fn close(&mut self) {
        self.cancel.cancel();
        crate::join::join_all(&mut self.handles).await;
    }
}

/// Builds [ConsulResolver]s for targets with the [SCHEME] scheme.
pub struct ConsulResolverBuilder {
    connector: naming::SharedConnector,
}

impl ConsulResolverBuilder {
    pub fn new(connector: naming::SharedConnector) -> Self {
        Self { connector }
    }
}

impl resolver::Builder for ConsulResolverBuilder {
    fn scheme(&self) -> &str {
        SCHEME
    }

    fn build(
        &self,
        target: &Target,
        sink: SharedStateSink,
    ) -> Result<BoxedResolver, resolver::Error> {
        let target = ConsulTarget::from_target(target)?;
        let client = self.connector.connect(&target.agent)?;
        Ok(Box::new(ConsulResolver::new(client, target, sink)))
    }
}
