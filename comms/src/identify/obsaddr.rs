// Copyright 2021, The Lattice Developers
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Tracks the addresses remote peers report having observed us on.
//!
//! A single reporter is never believed: observers are bucketed into groups by network prefix, and an
//! address is only surfaced once [ACTIVATION_THRESH] distinct groups have vouched for it within the TTL
//! window. An adversary controlling many peers in one subnet therefore cannot forge our external address;
//! the threshold demands topological diversity.

use crate::{
    connection_manager::{ConnectionDirection, PeerConnection},
    event::LocalAddressesUpdated,
    peer_manager::NodeIdentity,
};
use futures::{
    channel::{mpsc, oneshot},
    stream::Fuse,
    SinkExt,
    StreamExt,
};
use lattice_shutdown::ShutdownSignal;
use log::*;
use multiaddr::{Multiaddr, Protocol};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::broadcast,
    task,
    task::JoinHandle,
    time,
};

const LOG_TARGET: &str = "comms::identify::obsaddr";

/// Number of distinct observer groups that must vouch for an address within the TTL window before it is
/// reported as one of ours.
pub const ACTIVATION_THRESH: usize = 4;

/// How long an observation from a group keeps counting without being renewed.
pub const DEFAULT_OBSERVED_ADDR_TTL: Duration = Duration::from_secs(30 * 60);

/// Observations are load-shedding: when the worker is busy, reports beyond this backlog are dropped.
const OBSERVATION_BUFFER_SIZE: usize = 16;

const REQUEST_BUFFER_SIZE: usize = 16;

#[derive(Debug)]
struct Observation {
    observed: Multiaddr,
    local: Multiaddr,
    observer: Multiaddr,
    direction: ConnectionDirection,
}

#[derive(Debug)]
enum ObservedAddrRequest {
    GetAddrs(oneshot::Sender<Vec<Multiaddr>>),
    GetAddrsFor(Multiaddr, oneshot::Sender<Vec<Multiaddr>>),
    /// Replace the TTL and sweep immediately
    SetTtl(Duration, oneshot::Sender<()>),
}

/// Handle to the observed-address worker. Cheap to clone.
#[derive(Clone)]
pub struct ObservedAddrManager {
    node_identity: Arc<NodeIdentity>,
    observation_tx: mpsc::Sender<Observation>,
    request_tx: mpsc::Sender<ObservedAddrRequest>,
}

impl ObservedAddrManager {
    /// Spawn the worker. It runs until the shutdown signal resolves.
    pub fn spawn(
        node_identity: Arc<NodeIdentity>,
        address_events: broadcast::Receiver<Arc<LocalAddressesUpdated>>,
        shutdown_signal: ShutdownSignal,
    ) -> (Self, JoinHandle<()>)
    {
        let (observation_tx, observation_rx) = mpsc::channel(OBSERVATION_BUFFER_SIZE);
        let (request_tx, request_rx) = mpsc::channel(REQUEST_BUFFER_SIZE);

        let worker = ObservedAddrWorker {
            ttl: DEFAULT_OBSERVED_ADDR_TTL,
            entries: HashMap::new(),
            observation_rx: observation_rx.fuse(),
            request_rx: request_rx.fuse(),
            address_events: address_events.fuse(),
            shutdown_signal,
        };
        let join_handle = task::spawn(worker.run());

        (
            Self {
                node_identity,
                observation_tx,
                request_tx,
            },
            join_handle,
        )
    }

    /// Record that `observed` was reported as our address, as seen over the given connection.
    ///
    /// Reports are only accepted when the connection's local address is one of our listen addresses: the
    /// external mapping of an ephemeral dial-out port is not reusable and tells us nothing about
    /// reachability. Delivery is best effort; when the worker is backlogged the report is dropped.
    pub fn record(&self, conn: &PeerConnection, observed: Multiaddr) {
        if !self.node_identity.listen_addresses().contains(conn.local_address()) {
            debug!(
                target: LOG_TARGET,
                "Ignoring observed address '{}': connection local address '{}' is not a listen address",
                observed,
                conn.local_address()
            );
            return;
        }

        let observation = Observation {
            observed,
            local: conn.local_address().clone(),
            observer: conn.address().clone(),
            direction: conn.direction(),
        };
        if let Err(err) = self.observation_tx.clone().try_send(observation) {
            if err.is_full() {
                trace!(target: LOG_TARGET, "Dropping observed address: worker is busy");
            }
        }
    }

    /// The addresses currently believed external, across every local address.
    pub async fn addrs(&self) -> Vec<Multiaddr> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .request_tx
            .clone()
            .send(ObservedAddrRequest::GetAddrs(reply_tx))
            .await
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// The addresses currently believed external for the given local listen address.
    pub async fn addrs_for(&self, local: &Multiaddr) -> Vec<Multiaddr> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .request_tx
            .clone()
            .send(ObservedAddrRequest::GetAddrsFor(local.clone(), reply_tx))
            .await
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Replace the TTL. An eviction sweep runs before this returns.
    pub async fn set_ttl(&self, ttl: Duration) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .request_tx
            .clone()
            .send(ObservedAddrRequest::SetTtl(ttl, reply_tx))
            .await
            .is_err()
        {
            return;
        }
        let _ = reply_rx.await;
    }
}

/// An address some set of peers claim to have observed us on, for one of our local addresses and one
/// connection direction.
#[derive(Debug)]
struct ObservedAddr {
    addr: Multiaddr,
    direction: ConnectionDirection,
    /// observer group -> the last time that group reported this address
    seen_by: HashMap<Vec<u8>, Instant>,
}

impl ObservedAddr {
    fn is_activated(&self, ttl: Duration) -> bool {
        let now = Instant::now();
        self.seen_by
            .values()
            .filter(|seen| now.duration_since(**seen) <= ttl)
            .count() >=
            ACTIVATION_THRESH
    }
}

struct ObservedAddrWorker {
    ttl: Duration,
    /// local listen address -> addresses observed for it
    entries: HashMap<Multiaddr, Vec<ObservedAddr>>,
    observation_rx: Fuse<mpsc::Receiver<Observation>>,
    request_rx: Fuse<mpsc::Receiver<ObservedAddrRequest>>,
    address_events: Fuse<broadcast::Receiver<Arc<LocalAddressesUpdated>>>,
    shutdown_signal: ShutdownSignal,
}

impl ObservedAddrWorker {
    async fn run(mut self) {
        let mut shutdown_signal = self.shutdown_signal.clone();
        let mut ticker = time::interval_at(time::Instant::now() + self.ttl, self.ttl).fuse();

        loop {
            futures::select! {
                observation = self.observation_rx.select_next_some() => {
                    self.handle_observation(observation);
                },

                request = self.request_rx.select_next_some() => {
                    match request {
                        ObservedAddrRequest::GetAddrs(reply) => {
                            let _ = reply.send(self.activated_addrs());
                        },
                        ObservedAddrRequest::GetAddrsFor(local, reply) => {
                            let _ = reply.send(self.activated_addrs_for(&local));
                        },
                        ObservedAddrRequest::SetTtl(ttl, reply) => {
                            self.ttl = ttl;
                            self.gc();
                            ticker = time::interval_at(time::Instant::now() + ttl, ttl).fuse();
                            let _ = reply.send(());
                        },
                    }
                },

                event = self.address_events.select_next_some() => {
                    if let Ok(event) = event {
                        self.reconcile_local_addrs(&event.current);
                    }
                },

                _ = ticker.select_next_some() => {
                    self.gc();
                },

                _ = shutdown_signal => {
                    debug!(target: LOG_TARGET, "Observed address worker shutting down");
                    break;
                },
            }
        }
    }

    fn handle_observation(&mut self, observation: Observation) {
        let group = observer_group(&observation.observer);
        let now = Instant::now();
        trace!(
            target: LOG_TARGET,
            "Observation of '{}' (local '{}', {}) by group {:02x?}",
            observation.observed,
            observation.local,
            observation.direction,
            group
        );

        let observed = observation.observed.clone();
        let direction = observation.direction;
        let entries = self.entries.entry(observation.local).or_default();
        match entries
            .iter_mut()
            .find(|e| e.addr == observed && e.direction == direction)
        {
            Some(entry) => {
                entry.seen_by.insert(group, now);
            },
            None => {
                let mut seen_by = HashMap::new();
                seen_by.insert(group, now);
                entries.push(ObservedAddr {
                    addr: observation.observed,
                    direction: observation.direction,
                    seen_by,
                });
            },
        }
    }

    /// Drop observer groups not heard from within the TTL, entries with no remaining groups, and local
    /// addresses with no remaining entries.
    fn gc(&mut self) {
        let now = Instant::now();
        let ttl = self.ttl;
        for entries in self.entries.values_mut() {
            for entry in entries.iter_mut() {
                entry.seen_by.retain(|_, seen| now.duration_since(*seen) <= ttl);
            }
            entries.retain(|e| !e.seen_by.is_empty());
        }
        self.entries.retain(|_, entries| !entries.is_empty());
    }

    /// Forget observations for local addresses we no longer listen on.
    fn reconcile_local_addrs(&mut self, current: &[Multiaddr]) {
        self.entries.retain(|local, _| current.contains(local));
    }

    fn activated_addrs(&self) -> Vec<Multiaddr> {
        let mut addrs: Vec<_> = self
            .entries
            .values()
            .flatten()
            .filter(|e| e.is_activated(self.ttl))
            .map(|e| e.addr.clone())
            .collect();
        addrs.sort_by_key(|a| a.to_vec());
        addrs.dedup();
        addrs
    }

    fn activated_addrs_for(&self, local: &Multiaddr) -> Vec<Multiaddr> {
        let mut addrs: Vec<_> = self
            .entries
            .get(local)
            .into_iter()
            .flatten()
            .filter(|e| e.is_activated(self.ttl))
            .map(|e| e.addr.clone())
            .collect();
        addrs.sort_by_key(|a| a.to_vec());
        addrs.dedup();
        addrs
    }
}

/// The equivalence class used to count independent observers: the masked network prefix for IP-bearing
/// addresses (/16 for IPv4, /32 for IPv6), the full address bytes otherwise.
fn observer_group(observer: &Multiaddr) -> Vec<u8> {
    match observer.iter().next() {
        Some(Protocol::Ip4(ip)) => ip.octets()[..2].to_vec(),
        Some(Protocol::Ip6(ip)) => ip.octets()[..4].to_vec(),
        _ => observer.to_vec(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{fake_connection, node_id, node_identity};
    use lattice_shutdown::Shutdown;

    const LOCAL_ADDR: &str = "/ip4/10.0.0.5/tcp/9000";

    struct Harness {
        manager: ObservedAddrManager,
        identity: Arc<NodeIdentity>,
        _shutdown: Shutdown,
    }

    fn new_harness() -> Harness {
        let identity = node_identity(&[LOCAL_ADDR]);
        let shutdown = Shutdown::new();
        let (_, events) = broadcast::channel(8);
        let (manager, _) = ObservedAddrManager::spawn(Arc::clone(&identity), events, shutdown.to_signal());
        Harness {
            manager,
            identity,
            _shutdown: shutdown,
        }
    }

    impl Harness {
        /// Report `observed` from a peer whose remote multiaddr is `observer`.
        async fn observe(&self, observed: &str, observer: &str) {
            let conn = fake_connection(node_id(1), LOCAL_ADDR, observer, ConnectionDirection::Outbound);
            self.manager.record(&conn, observed.parse().unwrap());
            // give the worker a turn
            time::delay_for(Duration::from_millis(5)).await;
        }
    }

    fn addrs(strs: &[&str]) -> Vec<Multiaddr> {
        strs.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn observer_grouping() {
        let a: Multiaddr = "/ip4/1.2.3.4/tcp/1000".parse().unwrap();
        let b: Multiaddr = "/ip4/1.2.99.99/tcp/2000".parse().unwrap();
        let c: Multiaddr = "/ip4/1.3.3.4/tcp/1000".parse().unwrap();
        // Same /16, different hosts and ports
        assert_eq!(observer_group(&a), observer_group(&b));
        assert_ne!(observer_group(&a), observer_group(&c));

        let d: Multiaddr = "/ip6/2001:db8::1/tcp/1000".parse().unwrap();
        let e: Multiaddr = "/ip6/2001:db8:ffff::2/tcp/1000".parse().unwrap();
        let f: Multiaddr = "/ip6/2002:db8::1/tcp/1000".parse().unwrap();
        // Same /32
        assert_eq!(observer_group(&d), observer_group(&e));
        assert_ne!(observer_group(&d), observer_group(&f));

        let g: Multiaddr = "/dns4/observer.example/tcp/1000".parse().unwrap();
        assert_eq!(observer_group(&g), g.to_vec());
    }

    #[tokio_macros::test_basic]
    async fn activation_requires_four_distinct_groups() {
        let harness = new_harness();
        let observed = "/ip4/9.9.9.9/tcp/1234";

        assert!(harness.manager.addrs().await.is_empty());

        // Three distinct /16 groups: not enough
        harness.observe(observed, "/ip4/1.2.3.4/tcp/1000").await;
        harness.observe(observed, "/ip4/5.6.3.4/tcp/1000").await;
        harness.observe(observed, "/ip4/7.8.3.4/tcp/1000").await;
        assert!(harness.manager.addrs().await.is_empty());

        // Another observer in an already-counted /16 still does not help
        harness.observe(observed, "/ip4/1.2.200.200/tcp/7777").await;
        assert!(harness.manager.addrs().await.is_empty());

        // A fourth distinct group activates the address
        harness.observe(observed, "/ip4/77.1.2.3/tcp/1000").await;
        assert_eq!(harness.manager.addrs().await, addrs(&[observed]));
        assert_eq!(
            harness.manager.addrs_for(&LOCAL_ADDR.parse().unwrap()).await,
            addrs(&[observed])
        );
    }

    #[tokio_macros::test_basic]
    async fn observers_in_one_subnet_never_activate() {
        let harness = new_harness();
        let observed = "/ip4/9.9.9.9/tcp/1234";

        // Five observers, all in 1.2.0.0/16: one group
        for host in &["1.2.3.4", "1.2.3.5", "1.2.3.10", "1.2.77.1", "1.2.200.9"] {
            harness
                .observe(observed, &format!("/ip4/{}/tcp/1000", host))
                .await;
        }
        assert!(harness.manager.addrs().await.is_empty());
    }

    #[tokio_macros::test_basic]
    async fn inbound_and_outbound_are_tracked_separately() {
        let harness = new_harness();
        let observed: Multiaddr = "/ip4/9.9.9.9/tcp/1234".parse().unwrap();

        // Two groups report inbound, two report outbound: neither direction reaches the threshold
        for (observer, direction) in &[
            ("/ip4/1.0.0.1/tcp/1000", ConnectionDirection::Inbound),
            ("/ip4/2.0.0.1/tcp/1000", ConnectionDirection::Inbound),
            ("/ip4/3.0.0.1/tcp/1000", ConnectionDirection::Outbound),
            ("/ip4/4.0.0.1/tcp/1000", ConnectionDirection::Outbound),
        ] {
            let conn = fake_connection(node_id(1), LOCAL_ADDR, observer, *direction);
            harness.manager.record(&conn, observed.clone());
        }
        time::delay_for(Duration::from_millis(10)).await;
        assert!(harness.manager.addrs().await.is_empty());

        // Two more outbound groups push the outbound entry over the threshold
        for observer in &["/ip4/5.0.0.1/tcp/1000", "/ip4/6.0.0.1/tcp/1000"] {
            let conn = fake_connection(node_id(1), LOCAL_ADDR, observer, ConnectionDirection::Outbound);
            harness.manager.record(&conn, observed.clone());
        }
        time::delay_for(Duration::from_millis(10)).await;
        assert_eq!(harness.manager.addrs().await, vec![observed]);
    }

    #[tokio_macros::test_basic]
    async fn ttl_expiry_empties_addrs() {
        let harness = new_harness();
        let observed = "/ip4/9.9.9.9/tcp/1234";

        for observer in &[
            "/ip4/1.0.0.1/tcp/1000",
            "/ip4/2.0.0.1/tcp/1000",
            "/ip4/3.0.0.1/tcp/1000",
            "/ip4/4.0.0.1/tcp/1000",
        ] {
            harness.observe(observed, observer).await;
        }
        assert_eq!(harness.manager.addrs().await, addrs(&[observed]));

        harness.manager.set_ttl(Duration::from_millis(200)).await;
        // Immediately after the TTL change the observations are still in-window
        assert_eq!(harness.manager.addrs().await, addrs(&[observed]));

        time::delay_for(Duration::from_millis(210)).await;
        assert!(harness.manager.addrs().await.is_empty());

        // One observer keeps reporting; a single in-window group is still below the threshold
        for _ in 0..4usize {
            harness.observe(observed, "/ip4/1.0.0.1/tcp/1000").await;
            time::delay_for(Duration::from_millis(50)).await;
        }
        assert!(harness.manager.addrs().await.is_empty());
    }

    #[tokio_macros::test_basic]
    async fn reports_from_non_listen_local_addresses_are_ignored() {
        let harness = new_harness();
        let observed: Multiaddr = "/ip4/9.9.9.9/tcp/1234".parse().unwrap();

        for observer in &[
            "/ip4/1.0.0.1/tcp/1000",
            "/ip4/2.0.0.1/tcp/1000",
            "/ip4/3.0.0.1/tcp/1000",
            "/ip4/4.0.0.1/tcp/1000",
        ] {
            // Ephemeral dial-out port, not one of our listen addresses
            let conn = fake_connection(node_id(1), "/ip4/10.0.0.5/tcp/41234", observer, ConnectionDirection::Outbound);
            harness.manager.record(&conn, observed.clone());
        }
        time::delay_for(Duration::from_millis(10)).await;
        assert!(harness.manager.addrs().await.is_empty());
    }

    #[tokio_macros::test_basic]
    async fn local_address_removal_prunes_entries() {
        let identity = node_identity(&[LOCAL_ADDR]);
        let shutdown = Shutdown::new();
        let (events_tx, events_rx) = broadcast::channel(8);
        let (manager, _) = ObservedAddrManager::spawn(Arc::clone(&identity), events_rx, shutdown.to_signal());

        let observed = "/ip4/9.9.9.9/tcp/1234";
        for observer in &[
            "/ip4/1.0.0.1/tcp/1000",
            "/ip4/2.0.0.1/tcp/1000",
            "/ip4/3.0.0.1/tcp/1000",
            "/ip4/4.0.0.1/tcp/1000",
        ] {
            let conn = fake_connection(node_id(1), LOCAL_ADDR, observer, ConnectionDirection::Outbound);
            manager.record(&conn, observed.parse().unwrap());
        }
        time::delay_for(Duration::from_millis(10)).await;
        assert_eq!(manager.addrs().await, addrs(&[observed]));

        // We stop listening on the local address the observations were made for
        identity.set_listen_addresses(vec![]);
        events_tx
            .send(Arc::new(LocalAddressesUpdated { current: vec![] }))
            .unwrap();
        time::delay_for(Duration::from_millis(10)).await;

        assert!(manager.addrs().await.is_empty());
    }
}
