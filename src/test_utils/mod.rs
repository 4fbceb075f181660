//! Utilities to help with testing waypoint

use crate::address::{Address, State};
use crate::balancer::{self, Feedback, Outcome, PickResult, Picker};
use crate::naming::{self, Agent, NamingService, QueryMeta, QueryOptions, ServiceEntry};
use crate::resolver::{self, StateSink};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn setup_tracing_subscriber() {
    use tracing_subscriber::fmt::format::FmtSpan;
    let _ = tracing_subscriber::fmt()
        .with_thread_names(true)
        .with_span_events(FmtSpan::ENTER)
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// Counts the outcomes reported for picked addresses.
#[derive(Default)]
pub struct CountingFeedback {
    successes: AtomicUsize,
    failures: AtomicUsize,
}

impl CountingFeedback {
    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl Feedback for CountingFeedback {
    fn done(&self, outcome: Outcome) {
        if outcome.is_success() {
            self.successes.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Always picks the same address, attaching feedback to every pick.
pub struct FeedbackPicker {
    address: Address,
    feedback: Arc<CountingFeedback>,
}

impl FeedbackPicker {
    pub fn new(address: Address, feedback: Arc<CountingFeedback>) -> Self {
        Self { address, feedback }
    }
}

impl Picker for FeedbackPicker {
    fn pick(&self) -> Result<PickResult, balancer::Error> {
        Ok(PickResult {
            address: self.address.clone(),
            feedback: Some(self.feedback.clone()),
        })
    }
}

type Response = Result<(Vec<ServiceEntry>, QueryMeta), naming::Error>;

/// A query made against a [FakeNamingService].
#[derive(Clone, Debug)]
pub struct RecordedQuery {
    pub service: String,
    pub tag: Option<String>,
    pub healthy_only: bool,
    pub options: QueryOptions,
}

/// A naming service which replays scripted responses.
///
/// Each query consumes one response. Once no responses are queued, queries
/// block, the same way a long-poll would while nothing changes.
pub struct FakeNamingService {
    responses: tokio::sync::Mutex<mpsc::UnboundedReceiver<Response>>,
    queries: Mutex<Vec<RecordedQuery>>,
}

/// Queues responses for a [FakeNamingService].
#[derive(Clone)]
pub struct NamingScript {
    tx: mpsc::UnboundedSender<Response>,
}

impl NamingScript {
    /// Queues a successful response with the given index.
    pub fn respond(&self, entries: Vec<ServiceEntry>, last_index: u64) {
        let _ = self.tx.send(Ok((
            entries,
            QueryMeta {
                last_index,
                request_time: Duration::from_millis(1),
            },
        )));
    }

    /// Queues a failed response.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .tx
            .send(Err(naming::Error::Unavailable(reason.to_string())));
    }
}

impl FakeNamingService {
    pub fn new() -> (Arc<Self>, NamingScript) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Arc::new(Self {
            responses: tokio::sync::Mutex::new(rx),
            queries: Mutex::new(vec![]),
        });
        (service, NamingScript { tx })
    }

    /// Returns every query made so far.
    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl NamingService for FakeNamingService {
    async fn service(
        &self,
        service: &str,
        tag: Option<&str>,
        healthy_only: bool,
        options: &QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, QueryMeta), naming::Error> {
        self.queries.lock().unwrap().push(RecordedQuery {
            service: service.to_string(),
            tag: tag.map(str::to_string),
            healthy_only,
            options: options.clone(),
        });
        let mut responses = self.responses.lock().await;
        match responses.recv().await {
            Some(response) => response,
            None => std::future::pending().await,
        }
    }
}

/// Hands out the same naming service for every agent, remembering which
/// agents were asked for.
pub struct FakeConnector {
    service: Arc<FakeNamingService>,
    agents: Mutex<Vec<Agent>>,
}

impl FakeConnector {
    pub fn new(service: Arc<FakeNamingService>) -> Self {
        Self {
            service,
            agents: Mutex::new(vec![]),
        }
    }

    pub fn agents(&self) -> Vec<Agent> {
        self.agents.lock().unwrap().clone()
    }
}

impl naming::Connector for FakeConnector {
    fn connect(&self, agent: &Agent) -> Result<naming::SharedNamingService, naming::Error> {
        self.agents.lock().unwrap().push(agent.clone());
        Ok(self.service.clone())
    }
}

/// A [StateSink] which forwards every state it receives over a channel.
pub struct RecordingSink {
    tx: mpsc::UnboundedSender<State>,
    errors: AtomicUsize,
    rejections: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<State>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                errors: AtomicUsize::new(0),
                rejections: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    /// Counts the errors reported through [StateSink::report_error].
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    /// Fails the next `count` calls to [StateSink::update_state].
    pub fn reject_next(&self, count: usize) {
        self.rejections.store(count, Ordering::SeqCst);
    }
}

impl StateSink for RecordingSink {
    fn update_state(&self, state: State) -> Result<(), resolver::Error> {
        let rejected = self
            .rejections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(resolver::Error::Other(anyhow::anyhow!("state rejected")));
        }
        let _ = self.tx.send(state);
        Ok(())
    }

    fn report_error(&self, _err: resolver::Error) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

/// Waits for the next state pushed to a [RecordingSink].
pub async fn next_state(rx: &mut mpsc::UnboundedReceiver<State>) -> State {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for state")
        .expect("Sink closed")
}

/// Returns the "host:port" of every address in a state.
pub fn addrs(state: &State) -> Vec<&str> {
    state.addresses.iter().map(|a| a.addr.as_str()).collect()
}
