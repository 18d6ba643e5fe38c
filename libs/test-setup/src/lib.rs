//! Test doubles for the connection layer.
//!
//! Unit and scenario tests run the whole engine against a scripted
//! [`FakeConnection`]: canned result sets keyed by SQL fragments, a journal
//! of every statement executed, and optional injected failures. No test
//! needs a live server.

use once_cell::sync::Lazy;
use sql_connection::{
    ConnectionError, ConnectionFactory, ConnectionResult, Queryable, ResultSet, Value,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

static LOG_INIT: Lazy<()> = Lazy::new(|| {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
});

/// Installs the test tracing subscriber once per process. Controlled by
/// `RUST_LOG`, silent by default.
pub fn init_logging() {
    Lazy::force(&LOG_INIT);
}

/// Builds a [`ResultSet`] from column names and rows.
pub fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> ResultSet {
    ResultSet::new(columns.iter().map(|c| (*c).to_owned()).collect(), rows)
}

/// An empty result set.
pub fn no_rows() -> ResultSet {
    ResultSet::default()
}

#[derive(Default)]
struct FakeConnectionState {
    /// Fragment-matched canned responses, first match wins.
    responses: Vec<(String, ResultSet)>,
    /// Fragment-matched injected failures, checked before responses.
    failures: Vec<(String, String)>,
    /// Every statement the engine sent, in order.
    journal: Vec<String>,
}

/// A scripted connection. Cloning shares the script and the journal, so a
/// test can keep a handle while the engine owns a boxed clone.
#[derive(Clone, Default)]
pub struct FakeConnection {
    state: Arc<Mutex<FakeConnectionState>>,
}

impl FakeConnection {
    pub fn new() -> Self {
        FakeConnection::default()
    }

    /// Registers a canned result for any statement containing `fragment`.
    pub fn on_query(&self, fragment: impl Into<String>, result: ResultSet) -> &Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .push((fragment.into(), result));
        self
    }

    /// Makes any statement containing `fragment` fail with `message`.
    pub fn fail_on(&self, fragment: impl Into<String>, message: impl Into<String>) -> &Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((fragment.into(), message.into()));
        self
    }

    /// Every statement executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().journal.clone()
    }

    /// Whether any executed statement contains `fragment`.
    pub fn has_executed(&self, fragment: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .journal
            .iter()
            .any(|sql| sql.contains(fragment))
    }

    fn record(&self, sql: &str) -> ConnectionResult<ResultSet> {
        let mut state = self.state.lock().unwrap();
        state.journal.push(sql.to_owned());

        if let Some((_, message)) = state.failures.iter().find(|(fragment, _)| sql.contains(fragment.as_str())) {
            return Err(ConnectionError::Other(message.clone()));
        }

        let response = state
            .responses
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_default();

        Ok(response)
    }
}

#[async_trait::async_trait]
impl Queryable for FakeConnection {
    async fn query_raw(&self, sql: &str, _params: &[Value]) -> ConnectionResult<ResultSet> {
        self.record(sql)
    }

    async fn execute_raw(&self, sql: &str, _params: &[Value]) -> ConnectionResult<u64> {
        self.record(sql).map(|r| r.len() as u64)
    }

    async fn raw_cmd(&self, sql: &str) -> ConnectionResult<()> {
        self.record(sql).map(|_| ())
    }
}

#[derive(Default)]
struct FactoryState {
    connections: HashMap<String, FakeConnection>,
    failures: HashMap<String, String>,
}

/// A [`ConnectionFactory`] handing out pre-registered fakes per connection
/// string. Unregistered strings get a fresh silent fake.
#[derive(Clone, Default)]
pub struct FakeConnectionFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl FakeConnectionFactory {
    pub fn new() -> Self {
        FakeConnectionFactory::default()
    }

    pub fn register(&self, connection_string: impl Into<String>, connection: FakeConnection) -> &Self {
        self.state
            .lock()
            .unwrap()
            .connections
            .insert(connection_string.into(), connection);
        self
    }

    /// Makes `connect` fail for the given connection string.
    pub fn fail_for(&self, connection_string: impl Into<String>, message: impl Into<String>) -> &Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(connection_string.into(), message.into());
        self
    }
}

#[async_trait::async_trait]
impl ConnectionFactory for FakeConnectionFactory {
    async fn connect(&self, connection_string: &str) -> ConnectionResult<Box<dyn Queryable>> {
        let mut state = self.state.lock().unwrap();

        if let Some(message) = state.failures.get(connection_string) {
            return Err(ConnectionError::Other(message.clone()));
        }

        let connection = state
            .connections
            .entry(connection_string.to_owned())
            .or_default()
            .clone();

        Ok(Box::new(connection))
    }
}
