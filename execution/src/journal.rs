//! Append-only game journal.
//!
//! Rows are keyed by a monotonically increasing id. Each user additionally keeps a
//! newest-first index of their last [MAX_USER_GAMES] ids, which is what history queries read.

use crate::state::{next_id, State};
use anyhow::Result;
use arbuz_types::{storage::MAX_USER_GAMES, GameRecord, Key, UserId, Value};

/// Stores `record` under a fresh id and returns that id.
pub async fn append<S: State>(state: &mut S, mut record: GameRecord) -> Result<u64> {
    let id = next_id(state, Key::GameCounter).await?;
    record.id = id;
    let user = record.user_id;
    state.insert(Key::Game(id), Value::Game(record)).await?;

    let mut ids = user_games(state, user).await?;
    ids.insert(0, id);
    ids.truncate(MAX_USER_GAMES);
    state
        .insert(Key::UserGames(user), Value::GameIndex(ids))
        .await?;
    Ok(id)
}

pub async fn get<S: State>(state: &S, id: u64) -> Result<Option<GameRecord>> {
    Ok(match state.get(&Key::Game(id)).await? {
        Some(Value::Game(record)) => Some(record),
        _ => None,
    })
}

async fn user_games<S: State>(state: &S, user: UserId) -> Result<Vec<u64>> {
    Ok(match state.get(&Key::UserGames(user)).await? {
        Some(Value::GameIndex(ids)) => ids,
        _ => Vec::new(),
    })
}

/// The user's most recent games, newest first.
pub async fn recent<S: State>(state: &S, user: UserId, limit: usize) -> Result<Vec<GameRecord>> {
    let ids = user_games(state, user).await?;
    let mut records = Vec::with_capacity(limit.min(ids.len()));
    for id in ids.into_iter().take(limit) {
        if let Some(record) = get(state, id).await? {
            records.push(record);
        }
    }
    Ok(records)
}
