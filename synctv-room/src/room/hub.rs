//! Live connection registry of one room
//!
//! Every connection gets its own bounded queue. Broadcasts try all queues
//! without waiting first; only connections whose queue is full are retried,
//! concurrently and with a timeout. A connection that still cannot accept the
//! message is dropped, while everyone else keeps receiving.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::current::{Current, Status};
use crate::{
    config::HubConfig,
    models::{ConnectionId, RoomId, RoomSettings, UserId},
    Error, Result,
};

/// Room event delivered to connected clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    Chat { sender: UserId, content: String },
    Current(Current),
    Status(Status),
    MoviesChanged,
    PeopleChanged { people: usize },
    SettingsChanged(RoomSettings),
}

impl Message {
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::Current(_) => "current",
            Self::Status(_) => "status",
            Self::MoviesChanged => "movies_changed",
            Self::PeopleChanged { .. } => "people_changed",
            Self::SettingsChanged(_) => "settings_changed",
        }
    }
}

/// Connections skipped by a broadcast
#[derive(Debug, Clone, Default)]
pub struct BroadcastOptions {
    pub ignore_connection: Option<ConnectionId>,
    pub ignore_user: Option<UserId>,
}

impl BroadcastOptions {
    #[must_use]
    pub fn ignore_connection(mut self, connection_id: ConnectionId) -> Self {
        self.ignore_connection = Some(connection_id);
        self
    }

    #[must_use]
    pub fn ignore_user(mut self, user_id: UserId) -> Self {
        self.ignore_user = Some(user_id);
        self
    }

    fn skips(&self, client: &Client) -> bool {
        self.ignore_connection.as_ref() == Some(&client.connection_id)
            || self.ignore_user.as_ref() == Some(&client.user_id)
    }
}

/// Sending half of one live connection
///
/// The transport owns the matching [`ClientReceiver`] and writes whatever it
/// yields to the wire.
#[derive(Debug)]
pub struct Client {
    user_id: UserId,
    connection_id: ConnectionId,
    sender: mpsc::Sender<Arc<Message>>,
    closed: CancellationToken,
}

/// Receiving half of one live connection
#[derive(Debug)]
pub struct ClientReceiver {
    receiver: mpsc::Receiver<Arc<Message>>,
    closed: CancellationToken,
}

impl Client {
    #[must_use]
    pub fn new(user_id: UserId, queue_size: usize) -> (Arc<Self>, ClientReceiver) {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let closed = CancellationToken::new();
        let client = Arc::new(Self {
            user_id,
            connection_id: ConnectionId::new(),
            sender,
            closed: closed.clone(),
        });
        (client, ClientReceiver { receiver, closed })
    }

    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub const fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Queue a message without waiting
    pub fn send(&self, message: Arc<Message>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::InvalidOperation("Connection closed".to_string()));
        }
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => {
                Error::ResourceExhausted("Connection send queue full".to_string())
            }
            TrySendError::Closed(_) => Error::InvalidOperation("Connection closed".to_string()),
        })
    }

    /// Queue a message, waiting up to `timeout` for room in the queue
    pub async fn send_timeout(&self, message: Arc<Message>, timeout: Duration) -> Result<()> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(Error::Canceled("Connection closed".to_string())),
            sent = tokio::time::timeout(timeout, self.sender.send(message)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(Error::InvalidOperation("Connection closed".to_string())),
                Err(_) => Err(Error::ResourceExhausted(format!(
                    "Connection send queue still full after {timeout:?}"
                ))),
            },
        }
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_closed()
    }
}

impl ClientReceiver {
    /// Next queued message; `None` once the connection is closed
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            message = self.receiver.recv() => message,
        }
    }

    /// Queued message if one is ready
    pub fn try_recv(&mut self) -> Option<Arc<Message>> {
        if self.closed.is_cancelled() {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

pub struct Hub {
    room_id: RoomId,
    config: HubConfig,
    clients: DashMap<UserId, Vec<Arc<Client>>>,
    /// Users refused at registration, checked under their registry entry
    banned: DashSet<UserId>,
    connections: AtomicUsize,
    closed: AtomicBool,
}

impl Hub {
    #[must_use]
    pub fn new(room_id: RoomId, config: HubConfig) -> Self {
        Self {
            room_id,
            config,
            clients: DashMap::new(),
            banned: DashSet::new(),
            connections: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// New unregistered connection with this hub's queue size
    #[must_use]
    pub fn new_client(&self, user_id: UserId) -> (Arc<Client>, ClientReceiver) {
        Client::new(user_id, self.config.client_queue_size)
    }

    pub fn register_client(&self, client: Arc<Client>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::InvalidOperation(format!(
                "Hub of room {} is closed",
                self.room_id
            )));
        }
        if client.is_closed() {
            return Err(Error::InvalidOperation("Connection already closed".to_string()));
        }

        self.reserve_connection()?;

        {
            let mut clients = self.clients.entry(client.user_id.clone()).or_default();
            if self.banned.contains(&client.user_id) {
                drop(clients);
                self.clients
                    .remove_if(&client.user_id, |_, clients| clients.is_empty());
                self.connections.fetch_sub(1, Ordering::AcqRel);
                return Err(Error::PermissionDenied(format!(
                    "User {} is banned from room {}",
                    client.user_id, self.room_id
                )));
            }
            if clients
                .iter()
                .any(|c| c.connection_id == client.connection_id)
            {
                drop(clients);
                self.connections.fetch_sub(1, Ordering::AcqRel);
                return Err(Error::InvalidOperation(format!(
                    "Connection {} already registered",
                    client.connection_id
                )));
            }
            clients.push(Arc::clone(&client));
        }

        // close() may have drained the registry while we were inserting
        if self.is_closed() {
            self.remove_client(&client);
            client.close();
            return Err(Error::InvalidOperation(format!(
                "Hub of room {} is closed",
                self.room_id
            )));
        }

        info!(
            room_id = %self.room_id,
            user_id = %client.user_id,
            connection_id = %client.connection_id,
            "Client registered"
        );
        self.notify_people_changed();
        Ok(())
    }

    fn reserve_connection(&self) -> Result<()> {
        let max = self.config.max_connections;
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|n| {
                Error::ResourceExhausted(format!(
                    "Room {} reached its limit of {n} connections",
                    self.room_id
                ))
            })
    }

    /// Remove and close a connection; returns false if it was not registered
    pub fn unregister_client(&self, client: &Client) -> bool {
        client.close();
        if !self.remove_client(client) {
            return false;
        }
        info!(
            room_id = %self.room_id,
            user_id = %client.user_id,
            connection_id = %client.connection_id,
            "Client unregistered"
        );
        self.notify_people_changed();
        true
    }

    fn remove_client(&self, client: &Client) -> bool {
        let removed = match self.clients.get_mut(&client.user_id) {
            Some(mut clients) => {
                let before = clients.len();
                clients.retain(|c| c.connection_id != client.connection_id);
                before != clients.len()
            }
            None => false,
        };
        self.clients
            .remove_if(&client.user_id, |_, clients| clients.is_empty());
        if removed {
            self.connections.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Deliver to every connection not skipped by `options`
    ///
    /// Returns how many connections accepted the message.
    pub async fn broadcast(&self, message: Message, options: &BroadcastOptions) -> usize {
        let targets: Vec<Arc<Client>> = self
            .clients
            .iter()
            .flat_map(|entry| entry.value().clone())
            .filter(|client| !options.skips(client))
            .collect();

        let delivered = self.deliver(targets, Arc::new(message)).await;
        debug!(room_id = %self.room_id, delivered, "Broadcast complete");
        delivered
    }

    /// Best-effort delivery to all connections of one user; 0 if offline
    pub async fn send_to_user(&self, user_id: &UserId, message: Message) -> usize {
        let targets = self
            .clients
            .get(user_id)
            .map(|clients| clients.clone())
            .unwrap_or_default();
        self.deliver(targets, Arc::new(message)).await
    }

    async fn deliver(&self, targets: Vec<Arc<Client>>, message: Arc<Message>) -> usize {
        let mut delivered = 0;
        let mut backlogged = Vec::new();
        let mut failed = Vec::new();

        for client in targets {
            match client.sender.try_send(Arc::clone(&message)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => backlogged.push(client),
                Err(TrySendError::Closed(_)) => failed.push(client),
            }
        }

        if !backlogged.is_empty() {
            let timeout = self.config.send_timeout();
            let retries = backlogged.into_iter().map(|client| {
                let message = Arc::clone(&message);
                async move {
                    let sent = client.send_timeout(message, timeout).await;
                    (client, sent)
                }
            });
            for (client, sent) in join_all(retries).await {
                match sent {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!(
                            room_id = %self.room_id,
                            user_id = %client.user_id,
                            connection_id = %client.connection_id,
                            message_type = message.message_type(),
                            error = %e,
                            "Dropping unresponsive client"
                        );
                        failed.push(client);
                    }
                }
            }
        }

        if !failed.is_empty() {
            let mut removed = false;
            for client in &failed {
                client.close();
                removed |= self.remove_client(client);
            }
            if removed {
                self.notify_people_changed();
            }
        }

        delivered
    }

    /// Tell everyone the head count changed, without waiting on anyone
    fn notify_people_changed(&self) {
        let message = Arc::new(Message::PeopleChanged {
            people: self.people_num(),
        });
        let mut dead = Vec::new();
        for entry in &self.clients {
            for client in entry.value() {
                match client.sender.try_send(Arc::clone(&message)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        debug!(connection_id = %client.connection_id, "Skipping people update for backlogged client");
                    }
                    Err(TrySendError::Closed(_)) => dead.push(Arc::clone(client)),
                }
            }
        }
        for client in dead {
            self.remove_client(&client);
        }
    }

    /// Refuse future registrations of a user and disconnect the current ones
    ///
    /// The mark is set before the kick; registrations check it under the
    /// user's registry entry.
    pub fn ban_user(&self, user_id: &UserId) -> usize {
        self.banned.insert(user_id.clone());
        self.kick_user(user_id)
    }

    pub fn unban_user(&self, user_id: &UserId) -> bool {
        self.banned.remove(user_id).is_some()
    }

    #[must_use]
    pub fn is_banned(&self, user_id: &UserId) -> bool {
        self.banned.contains(user_id)
    }

    /// Disconnect every connection of a user
    pub fn kick_user(&self, user_id: &UserId) -> usize {
        let Some((_, clients)) = self.clients.remove(user_id) else {
            return 0;
        };
        for client in &clients {
            client.close();
        }
        self.connections.fetch_sub(clients.len(), Ordering::AcqRel);
        info!(room_id = %self.room_id, user_id = %user_id, connections = clients.len(), "User kicked");
        self.notify_people_changed();
        clients.len()
    }

    #[must_use]
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.clients
            .get(user_id)
            .is_some_and(|clients| !clients.is_empty())
    }

    /// Distinct connected users
    #[must_use]
    pub fn people_num(&self) -> usize {
        self.clients.iter().filter(|e| !e.value().is_empty()).count()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Disconnect everyone; later registrations are refused
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let users: Vec<UserId> = self.clients.iter().map(|e| e.key().clone()).collect();
        let mut disconnected = 0;
        for user_id in users {
            if let Some((_, clients)) = self.clients.remove(&user_id) {
                for client in &clients {
                    client.close();
                }
                self.connections.fetch_sub(clients.len(), Ordering::AcqRel);
                disconnected += clients.len();
            }
        }
        info!(room_id = %self.room_id, disconnected, "Hub closed");
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.close();
    }
}
