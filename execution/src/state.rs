use anyhow::Result;
use arbuz_types::{Account, Key, Match, UserId, Value};
use std::{collections::BTreeMap, future::Future};

#[cfg(any(test, feature = "mocks"))]
use std::collections::HashMap;

/// Key-value storage behind the ledger, journal and match tables.
///
/// Futures are `Send` so controllers can drive them from spawned tasks.
pub trait State: Send + Sync {
    fn get(&self, key: &Key) -> impl Future<Output = Result<Option<Value>>> + Send;
    fn insert(&mut self, key: Key, value: Value) -> impl Future<Output = Result<()>> + Send;
    fn delete(&mut self, key: &Key) -> impl Future<Output = Result<()>> + Send;

    /// Applies a committed [Batch]. Backends with transactions should override this so the
    /// changes land all-or-nothing.
    fn apply(&mut self, changes: Vec<(Key, Status)>) -> impl Future<Output = Result<()>> + Send {
        async move {
            for (key, status) in changes {
                match status {
                    Status::Update(value) => self.insert(key, value).await?,
                    Status::Delete => self.delete(&key).await?,
                }
            }
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "mocks"))]
#[derive(Default)]
pub struct Memory {
    state: HashMap<Key, Value>,
}

#[cfg(any(test, feature = "mocks"))]
impl Memory {
    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

#[cfg(any(test, feature = "mocks"))]
impl State for Memory {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(self.state.get(key).cloned())
    }

    async fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        self.state.insert(key, value);
        Ok(())
    }

    async fn delete(&mut self, key: &Key) -> Result<()> {
        self.state.remove(key);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Status {
    Update(Value),
    Delete,
}

/// Write-back overlay over a [State].
///
/// Reads fall through to the underlying store; writes are buffered until [Batch::commit]
/// hands them back for a single [State::apply]. Dropping a batch discards its writes, which
/// is how a failed multi-account mutation leaves no partial state behind.
pub struct Batch<'a, S: State> {
    state: &'a S,
    pending: BTreeMap<Key, Status>,
}

impl<'a, S: State> Batch<'a, S> {
    pub fn new(state: &'a S) -> Self {
        Self {
            state,
            pending: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn commit(self) -> Vec<(Key, Status)> {
        self.pending.into_iter().collect()
    }
}

impl<S: State> State for Batch<'_, S> {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(match self.pending.get(key) {
            Some(Status::Update(value)) => Some(value.clone()),
            Some(Status::Delete) => None,
            None => self.state.get(key).await?,
        })
    }

    async fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        self.pending.insert(key, Status::Update(value));
        Ok(())
    }

    async fn delete(&mut self, key: &Key) -> Result<()> {
        self.pending.insert(key.clone(), Status::Delete);
        Ok(())
    }
}

pub async fn load_account<S: State>(state: &S, user: UserId) -> Result<Option<Account>> {
    Ok(match state.get(&Key::Account(user)).await? {
        Some(Value::Account(account)) => Some(account),
        _ => None,
    })
}

pub async fn load_match<S: State>(state: &S, id: u64) -> Result<Option<Match>> {
    Ok(match state.get(&Key::Match(id)).await? {
        Some(Value::Match(m)) => Some(m),
        _ => None,
    })
}

/// Bumps the counter stored at `key` and returns the new value (first id is 1).
pub async fn next_id<S: State>(state: &mut S, key: Key) -> Result<u64> {
    let current = match state.get(&key).await? {
        Some(Value::Counter(value)) => value,
        _ => 0,
    };
    let next = current.saturating_add(1);
    state.insert(key, Value::Counter(next)).await?;
    Ok(next)
}
