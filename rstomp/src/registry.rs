//! Connection & subscription registry shared by all client connections.
//!
//! The registry is the broker's only shared mutable state. It maps
//! connections to their outbound sinks, keeps the two directional
//! subscription maps in lock-step and owns the authentication table that
//! holds each login to a single live connection.
//!
//! Every operation is atomic with respect to the maps it touches: compound
//! updates go through `DashMap` entry guards, and `fanout` keeps the
//! destination entry exclusively held across its snapshot-and-dispatch so
//! two concurrent publishes to one destination reach every subscriber in
//! the same order. Delivery itself is an unbounded enqueue onto the
//! recipient's own event loop and never blocks the publisher.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;

use rstomp_codec::Frame;

use crate::types::{
    ConnectionId, DashMap, Destination, Login, Message, Passcode, Reason, SubscriptionId, Tx,
};

/// Result of a CONNECT credential check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Credentials accepted; `new_account` is true when the login was
    /// first seen and registered on the fly.
    Success { new_account: bool },
    /// The login is already active on another live connection.
    AlreadyLoggedIn,
    /// The login exists and the passcode does not match.
    WrongPasscode,
}

#[derive(Debug)]
struct UserEntry {
    passcode: Passcode,
    /// The connection currently authenticated as this login, if any.
    owner: Option<ConnectionId>,
}

#[derive(Clone, Default)]
pub struct Registry {
    handlers: Arc<DashMap<ConnectionId, Tx>>,
    subscriptions: Arc<DashMap<ConnectionId, HashMap<Destination, SubscriptionId>>>,
    subscribers: Arc<DashMap<Destination, HashMap<ConnectionId, SubscriptionId>>>,
    users: Arc<DashMap<Login, UserEntry>>,
}

impl Registry {
    #[inline]
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Attaches a connection's outbound sink.
    pub fn register(&self, conn_id: ConnectionId, tx: Tx) {
        self.handlers.insert(conn_id, tx);
        self.subscriptions.entry(conn_id).or_default();
    }

    /// Removes every trace of a connection in one logical step: the
    /// authentication marker, both subscription maps and the sink.
    pub fn deregister(&self, conn_id: ConnectionId) {
        self.deauthenticate(conn_id);
        if let Some((_, subs)) = self.subscriptions.remove(&conn_id) {
            for destination in subs.into_keys() {
                self.remove_subscriber(&destination, conn_id);
            }
        }
        self.handlers.remove(&conn_id);
        log::debug!("{} deregistered", conn_id);
    }

    /// Checks CONNECT credentials and claims the login for `conn_id` on
    /// success. An unknown login is registered as a new account.
    pub fn authenticate(&self, conn_id: ConnectionId, login: Login, passcode: Passcode) -> AuthOutcome {
        match self.users.entry(login) {
            Entry::Vacant(entry) => {
                entry.insert(UserEntry { passcode, owner: Some(conn_id) });
                AuthOutcome::Success { new_account: true }
            }
            Entry::Occupied(mut entry) => {
                let user = entry.get_mut();
                if user.passcode != passcode {
                    AuthOutcome::WrongPasscode
                } else if user.owner.is_some_and(|owner| owner != conn_id) {
                    AuthOutcome::AlreadyLoggedIn
                } else {
                    user.owner = Some(conn_id);
                    AuthOutcome::Success { new_account: false }
                }
            }
        }
    }

    /// Releases whatever login `conn_id` holds, if any. Accounts persist
    /// for the process lifetime, only the live marker is cleared.
    pub fn deauthenticate(&self, conn_id: ConnectionId) {
        for mut user in self.users.iter_mut() {
            if user.owner == Some(conn_id) {
                user.owner = None;
            }
        }
    }

    /// Registers the (connection, destination, subscription id) triple,
    /// overwriting any prior id this connection had for the destination.
    pub fn subscribe(&self, conn_id: ConnectionId, destination: Destination, subscription_id: SubscriptionId) {
        self.subscriptions
            .entry(conn_id)
            .or_default()
            .insert(destination.clone(), subscription_id.clone());
        self.subscribers.entry(destination).or_default().insert(conn_id, subscription_id);
    }

    /// Drops the connection's subscription to `destination` from both
    /// directional maps. Returns whether a subscription existed.
    pub fn unsubscribe(&self, conn_id: ConnectionId, destination: &str) -> bool {
        let removed = self
            .subscriptions
            .get_mut(&conn_id)
            .map(|mut subs| subs.remove(destination).is_some())
            .unwrap_or(false);
        self.remove_subscriber(destination, conn_id);
        removed
    }

    fn remove_subscriber(&self, destination: &str, conn_id: ConnectionId) {
        if let Some(mut subs) = self.subscribers.get_mut(destination) {
            subs.remove(&conn_id);
            let empty = subs.is_empty();
            drop(subs);
            if empty {
                // no empty-set litter in the destination map
                self.subscribers.remove_if(destination, |_, subs| subs.is_empty());
            }
        }
    }

    /// Snapshot of a destination's current subscribers.
    pub fn subscribers_of(&self, destination: &str) -> Vec<(ConnectionId, SubscriptionId)> {
        self.subscribers
            .get(destination)
            .map(|subs| subs.iter().map(|(conn_id, sid)| (*conn_id, sid.clone())).collect())
            .unwrap_or_default()
    }

    /// The subscription id `conn_id` holds for `destination`, if any.
    pub fn subscription_id(&self, conn_id: ConnectionId, destination: &str) -> Option<SubscriptionId> {
        self.subscriptions.get(&conn_id)?.get(destination).cloned()
    }

    /// The destination owning `subscription_id` for this connection.
    pub fn destination_for(&self, conn_id: ConnectionId, subscription_id: &str) -> Option<Destination> {
        let subs = self.subscriptions.get(&conn_id)?;
        subs.iter().find_map(|(dest, sid)| if **sid == *subscription_id { Some(dest.clone()) } else { None })
    }

    /// Hands a frame to one connection's sink.
    pub fn deliver(&self, conn_id: ConnectionId, frame: Frame) -> std::result::Result<(), Reason> {
        let Some(tx) = self.handlers.get(&conn_id).map(|tx| tx.clone()) else {
            return Err(Reason::from_static("the connection has gone"));
        };
        if tx.unbounded_send(Message::Forward(frame)).is_err() {
            return Err(Reason::from_static("connection Tx is closed"));
        }
        Ok(())
    }

    /// Snapshot-and-dispatch fan-out for one published message.
    ///
    /// `make` builds the frame for each recipient. The destination entry
    /// stays exclusively held for the whole loop, so concurrent publishes
    /// to the same destination are serialized. A vanished recipient is
    /// reported in the error list and does not abort the remaining
    /// deliveries.
    pub fn fanout<F>(
        &self,
        destination: &str,
        mut make: F,
    ) -> std::result::Result<(), Vec<(ConnectionId, Reason)>>
    where
        F: FnMut(ConnectionId, &SubscriptionId) -> Frame,
    {
        let Some(subs) = self.subscribers.get_mut(destination) else {
            return Ok(());
        };
        let mut errs = Vec::new();
        for (&conn_id, subscription_id) in subs.iter() {
            let frame = make(conn_id, subscription_id);
            if let Err(reason) = self.deliver(conn_id, frame) {
                errs.push((conn_id, reason));
            }
        }
        if errs.is_empty() {
            Ok(())
        } else {
            Err(errs)
        }
    }
}
