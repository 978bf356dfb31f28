//! Redis-backed lock using server-side scripts.

use {
    async_trait::async_trait,
    redis::{Client, RedisResult, Script, Value, aio::MultiplexedConnection},
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{Result, lock::LockClient};

const ACQUIRE_SCRIPT: &str = r#"
return redis.call("SET", KEYS[1], ARGV[1], "NX", "PX", ARGV[2])
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
else
  return 0
end
"#;

/// Lock client talking to a single Redis endpoint.
///
/// One multiplexed connection is shared by every tick task of the process.
/// When a call fails in a way that leaves the connection unusable (the server
/// restarted, the socket was reset) the connection is dropped and the next
/// call opens a fresh one from the stored client.
pub struct RedisLock {
    client: Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    acquire: Script,
    release: Script,
}

impl RedisLock {
    /// Open a connection to `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// Connects eagerly so an unreachable store is reported at startup.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!("connected to redis");
        Ok(Self {
            client,
            conn: Mutex::new(Some(conn)),
            acquire: Script::new(ACQUIRE_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        })
    }

    async fn connection(&self) -> RedisResult<MultiplexedConnection> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        info!("reconnected to redis");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Forget the shared connection when `result` failed in a way that leaves
    /// it unusable.
    async fn check<T>(&self, result: RedisResult<T>) -> Result<T> {
        if let Err(ref err) = result
            && (err.is_io_error() || err.is_unrecoverable_error())
        {
            warn!(error = %err, "redis connection lost, reconnecting on next call");
            self.conn.lock().await.take();
        }
        Ok(result?)
    }
}

#[async_trait]
impl LockClient for RedisLock {
    async fn acquire(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool> {
        let mut conn = self.check(self.connection().await).await?;
        let reply: RedisResult<Value> = self
            .acquire
            .key(key)
            .arg(token)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await;
        Ok(acquired(&self.check(reply).await?))
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.check(self.connection().await).await?;
        let deleted: RedisResult<i64> = self
            .release
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await;
        Ok(self.check(deleted).await? == 1)
    }
}

/// `SET NX` replies `OK` when set and nil when the key already exists.
fn acquired(reply: &Value) -> bool {
    !matches!(reply, Value::Nil)
}
