//! Data-center aware client on top of [`Sender`].
//!
//! The client owns one home sender plus lazily opened senders for other
//! DCs. Its invoke loop applies the [`RetryPolicy`] and follows migrate
//! errors, and every key a sender derives is written to the
//! [`SessionStore`].

use std::collections::HashMap;
use std::io;
use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tether_tl_types::{Deserializable, RemoteCall};
use tokio::sync::Mutex;

use crate::errors::{ConnectError, InvocationError, MigrateReason};
use crate::retry::{AutoSleep, RetryContext, RetryPolicy};
use crate::sender::{AuthKeyCallback, Sender, SenderConfig};
use crate::session_store::SessionStore;
use crate::transport::Connector;

/// Settings for a [`Client`].
#[derive(Clone)]
pub struct ClientConfig {
    /// Used for every sender the client opens.
    pub sender: SenderConfig,
    /// How to react to flood waits and I/O errors (default: [`AutoSleep`]).
    pub retry_policy: Arc<dyn RetryPolicy>,
    /// DC redirects (home migrations included) followed within one call.
    pub max_migrations: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            sender: SenderConfig::default(),
            retry_policy: Arc::new(AutoSleep::default()),
            max_migrations: 3,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("sender", &self.sender)
            .field("max_migrations", &self.max_migrations)
            .finish_non_exhaustive()
    }
}

/// Routes calls to the right DC and retries what can be retried.
pub struct Client<C: Connector + Clone> {
    connector: C,
    config: ClientConfig,
    store: Arc<dyn SessionStore>,
    home: Mutex<(i32, Arc<Sender>)>,
    others: Mutex<HashMap<i32, Arc<Sender>>>,
}

impl<C: Connector + Clone> Client<C> {
    /// Load the session from `store` (or start from the default DC table)
    /// and connect to the home DC.
    pub async fn connect(
        connector: C,
        store: Arc<dyn SessionStore>,
        config: ClientConfig,
    ) -> Result<Self, ConnectError> {
        let session = match store.load()? {
            Some(session) => session,
            None => {
                let session = Default::default();
                store.save(&session)?;
                session
            }
        };
        let home_dc_id = session.home_dc_id;

        let sender = open_sender(&connector, &store, &config.sender, home_dc_id).await?;
        tracing::info!("[tether] client ready on DC{home_dc_id}");
        Ok(Self {
            connector,
            config,
            store,
            home: Mutex::new((home_dc_id, Arc::new(sender))),
            others: Mutex::new(HashMap::new()),
        })
    }

    /// The DC calls go to by default.
    pub async fn home_dc_id(&self) -> i32 {
        self.home.lock().await.0
    }

    /// The sender for the home DC.
    pub async fn sender(&self) -> Arc<Sender> {
        Arc::clone(&self.home.lock().await.1)
    }

    /// Invoke `request` on the home DC.
    pub async fn invoke<R: RemoteCall>(&self, request: &R) -> Result<R::Return, InvocationError> {
        let body = self.call(None, request.to_bytes()).await?;
        Ok(R::Return::from_bytes(&body)?)
    }

    /// Invoke a serialized request on the home DC.
    pub async fn invoke_raw(&self, body: Vec<u8>) -> Result<Vec<u8>, InvocationError> {
        self.call(None, body).await
    }

    /// Invoke `request` on a specific DC without moving the home DC.
    pub async fn invoke_on_dc<R: RemoteCall>(
        &self,
        dc_id: i32,
        request: &R,
    ) -> Result<R::Return, InvocationError> {
        let body = self.call(Some(dc_id), request.to_bytes()).await?;
        Ok(R::Return::from_bytes(&body)?)
    }

    /// Disconnect every sender.
    pub async fn disconnect(&self) {
        let others: Vec<_> = self.others.lock().await.drain().map(|(_, s)| s).collect();
        for sender in others {
            sender.disconnect().await;
        }
        self.sender().await.disconnect().await;
    }

    /// The retry loop. `target` is `None` for the home DC.
    async fn call(&self, mut target: Option<i32>, body: Vec<u8>) -> Result<Vec<u8>, InvocationError> {
        let mut fail_count = NonZeroU32::MIN;
        let mut slept_so_far = Duration::ZERO;
        let mut migrations = 0;

        loop {
            let sender = match target {
                None => self.sender().await,
                Some(dc_id) => self.dc_sender(dc_id).await?,
            };
            let error = match sender.invoke(body.clone()).await {
                Ok(answer) => return Ok(answer),
                Err(e) => e,
            };

            let migrate = match &error {
                InvocationError::Rpc(rpc) => rpc.migrate_to(),
                _ => None,
            };
            if let Some((reason, dc_id)) = migrate {
                let current = match target {
                    Some(dc_id) => dc_id,
                    None => self.home_dc_id().await,
                };
                if dc_id == current || migrations >= self.config.max_migrations {
                    tracing::warn!("[tether] not following {reason:?} redirect to DC{dc_id}");
                } else if matches!(reason, MigrateReason::File | MigrateReason::Stats) {
                    tracing::debug!("[tether] request served by DC{dc_id}, redirecting");
                    migrations += 1;
                    target = Some(dc_id);
                    continue;
                } else if target.is_none() {
                    migrations += 1;
                    self.migrate_to(dc_id).await?;
                    continue;
                }
            }

            let ctx = RetryContext { fail_count, slept_so_far, error };
            match self.config.retry_policy.should_retry(&ctx) {
                ControlFlow::Continue(delay) => {
                    tokio::time::sleep(delay).await;
                    slept_so_far += delay;
                    fail_count = fail_count.saturating_add(1);
                }
                ControlFlow::Break(()) => return Err(ctx.error),
            }
        }
    }

    async fn dc_sender(&self, dc_id: i32) -> Result<Arc<Sender>, InvocationError> {
        {
            let home = self.home.lock().await;
            if home.0 == dc_id {
                return Ok(Arc::clone(&home.1));
            }
        }
        let mut others = self.others.lock().await;
        if let Some(sender) = others.get(&dc_id) {
            return Ok(Arc::clone(sender));
        }
        let sender = Arc::new(open_sender(&self.connector, &self.store, &self.config.sender, dc_id).await?);
        others.insert(dc_id, Arc::clone(&sender));
        Ok(sender)
    }

    /// Make `dc_id` the home DC. The old home sender stays available for
    /// [`Client::invoke_on_dc`].
    async fn migrate_to(&self, dc_id: i32) -> Result<(), InvocationError> {
        tracing::info!("[tether] migrating to DC{dc_id}");
        let sender = self.dc_sender(dc_id).await?;
        self.others.lock().await.remove(&dc_id);
        let (old_dc_id, old) = std::mem::replace(&mut *self.home.lock().await, (dc_id, sender));
        self.others.lock().await.insert(old_dc_id, old);

        let mut session = self.store.load()?.unwrap_or_default();
        session.home_dc_id = dc_id;
        self.store.save(&session)?;
        Ok(())
    }
}

async fn open_sender<C: Connector + Clone>(
    connector: &C,
    store: &Arc<dyn SessionStore>,
    config: &SenderConfig,
    dc_id: i32,
) -> Result<Sender, ConnectError> {
    let session = store.load()?.unwrap_or_default();
    let dc = session
        .dc(dc_id)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown DC{dc_id}")))?;

    let keys = Arc::clone(store);
    let on_auth_key: AuthKeyCallback = Arc::new(move |auth| {
        if let Err(e) = keys.set_auth_key(dc_id, auth) {
            tracing::warn!("[tether] could not store auth key for DC{dc_id}: {e}");
        }
    });
    Sender::connect(connector.clone(), dc.addr.clone(), dc.auth(), Some(on_auth_key), config.clone()).await
}
