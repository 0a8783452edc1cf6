//! The client proper: one UDP socket, one session, and a poll loop that
//! drains inbound datagrams, dispatches them, and fires due timers.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use glam::{Quat, Vec3};
use tokio::net::{lookup_host, UdpSocket};
use tokio::select;
use tokio::time;
use tracing::{debug, error, info, warn};

use protocol::packet::{is_sourced, peek_type, PacketHeader, PacketType};

use crate::assets::{AssetCache, AssetFetcher, FetchState, NoopFetcher};
use crate::config::ClientConfig;
use crate::credentials::{Anonymous, CredentialsProvider};
use crate::directory::{find_service, ServiceType};
use crate::entities::{Applied, EntityKind, EntityRecord, EntityStream};
use crate::handshake::{
    build_connect_request, build_ice_ping_reply, build_ping, parse_connection_denied,
    parse_ice_ping, unix_micros, ConnectReason, DomainListReply, PingLocality,
};
use crate::session::{ConnectionState, Session};

const MAX_DATAGRAM_SIZE: usize = 1500;

pub struct DomainClient {
    config: ClientConfig,
    socket: UdpSocket,
    local_addr: SocketAddr,
    domain_addr: SocketAddr,
    session: Session,
    state: ConnectionState,
    entities: EntityStream,
    assets: AssetCache,
    fetcher: Box<dyn AssetFetcher>,
    credentials: Box<dyn CredentialsProvider>,
    last_received: Instant,
    last_ping: Instant,
    last_handshake: Instant,
    connected_since: Option<Instant>,
}

impl DomainClient {
    pub async fn new(config: ClientConfig) -> anyhow::Result<DomainClient> {
        DomainClient::with_collaborators(config, Box::new(Anonymous), Box::new(NoopFetcher)).await
    }

    pub async fn with_collaborators(
        config: ClientConfig,
        credentials: Box<dyn CredentialsProvider>,
        fetcher: Box<dyn AssetFetcher>,
    ) -> anyhow::Result<DomainClient> {
        let domain_addr = lookup_host((config.domain_host.as_str(), config.domain_udp_port))
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| {
                anyhow!(
                    "could not resolve {} to an IPv4 address",
                    config.domain_host
                )
            })?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let local_addr = socket.local_addr()?;
        // make sure write readiness has been observed once, so the initial
        // handshake sends do not land on an unregistered socket
        socket.writable().await?;

        info!(
            "connecting to domain {} ({}) from {}",
            config.domain_host, domain_addr, local_addr
        );

        let now = Instant::now();
        let mut client = DomainClient {
            config,
            socket,
            local_addr,
            domain_addr,
            session: Session::new(),
            state: ConnectionState::Disconnected,
            entities: EntityStream::new(),
            assets: AssetCache::new(),
            fetcher,
            credentials,
            last_received: now,
            last_ping: now,
            last_handshake: now,
            connected_since: None,
        };

        if client.config.simulation_mode {
            client.seed_demo_entities();
            info!("simulation mode enabled, demo entities seeded");
        }

        client.start_handshake(ConnectReason::Connect);
        Ok(client)
    }

    /// One synchronous pass: drain whatever the socket buffered, apply
    /// queued asset completions, then fire due timers. Never blocks and
    /// never fails - every error is logged and the caller keeps its loop.
    pub fn poll(&mut self) {
        self.drain_inbound();
        self.assets.apply_completions();
        self.check_liveness();
        self.run_timers();
    }

    /// Async driver around [`DomainClient::poll`]: wakes on socket
    /// readiness or a coarse tick, whichever comes first.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut ticks = time::interval(Duration::from_millis(100));
        loop {
            self.poll();
            select! {
                r = self.socket.readable() => r?,
                _ = ticks.tick() => {}
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn domain_addr(&self) -> SocketAddr {
        self.domain_addr
    }

    pub fn entities(&self) -> &EntityStream {
        &self.entities
    }

    pub fn consume_updated_entities(&mut self) -> Vec<EntityRecord> {
        self.entities.consume_updated_entities()
    }

    pub fn consume_deleted_entity_ids(&mut self) -> Vec<u64> {
        self.entities.consume_deleted_entity_ids()
    }

    pub fn asset_state(&self, url: &str) -> FetchState {
        self.assets.state(url)
    }

    fn entity_service_addr(&self) -> Option<SocketAddr> {
        match self.state {
            ConnectionState::Connected { entity_service } => entity_service,
            _ => None,
        }
    }

    fn drain_inbound(&mut self) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((len, from)) => {
                    self.last_received = Instant::now();
                    self.handle_datagram(&buf[..len], from);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("udp receive error: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_datagram(&mut self, data: &[u8], from: SocketAddr) {
        // entity-service datagrams carry their record kind in the leading
        // byte instead of a packet header; domain control traffic wins if
        // both ever share an address
        if from != self.domain_addr && self.entity_service_addr() == Some(from) {
            self.ingest_entity_datagram(data);
            return;
        }

        let Some(packet_type) = peek_type(data) else {
            debug!("runt datagram ({} byte(s)) from {}", data.len(), from);
            return;
        };

        let mut buf = data;
        let header = match PacketHeader::deser(&mut buf, is_sourced(packet_type)) {
            Ok(header) => header,
            Err(e) => {
                debug!(
                    "dropping {:?} datagram from {}: {} ({} byte(s) available)",
                    packet_type,
                    from,
                    e,
                    data.len()
                );
                return;
            }
        };

        if self.config.verbose_protocol_logging {
            debug!(
                "<<< {:?} seq={} {} payload byte(s) from {}",
                header.packet_type,
                header.sequence_number,
                buf.len(),
                from
            );
        }

        match header.packet_type {
            PacketType::DomainList => self.handle_domain_list(buf),
            PacketType::DomainConnectionDenied => {
                let denial = parse_connection_denied(buf);
                warn!(
                    "domain connection denied (code {}): {}",
                    denial.reason_code,
                    denial.reason.as_deref().unwrap_or("no reason given")
                );
                self.session.reset_assignment();
                self.connected_since = None;
                self.state = ConnectionState::Disconnected;
            }
            PacketType::Ping => {
                // answer in kind, echoing the payload
                let payload = buf.to_vec();
                self.send_packet(PacketType::PingReply, &payload, from);
            }
            PacketType::PingReply => {}
            PacketType::IcePing => match parse_ice_ping(buf) {
                Ok((peer_id, subtype)) => {
                    let reply = build_ice_ping_reply(&peer_id, subtype);
                    self.send_packet(PacketType::IcePingReply, &reply, from);
                }
                Err(e) => debug!("malformed ice ping from {}: {}", from, e),
            },
            PacketType::IcePingReply => {}
            other => debug!("ignoring {:?} packet from {}", other, from),
        }
    }

    fn handle_domain_list(&mut self, payload: &[u8]) {
        let reply = match DomainListReply::parse(payload) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    "unparseable domain list ({} byte(s)): {}",
                    payload.len(),
                    e
                );
                return;
            }
        };

        self.session.domain_id = reply.domain_id;
        self.session.local_id = reply.local_id;
        self.session.permissions = reply.permissions;
        self.session.authenticated = reply.authenticated;
        if self.connected_since.is_none() {
            self.connected_since = Some(Instant::now());
        }

        info!(
            "domain list from {}: local id {}, {} assignment record(s)",
            reply.domain_id,
            reply.local_id,
            reply.directory.len()
        );

        match find_service(&reply.directory, ServiceType::EntityServer) {
            Some(record) => {
                let addr = record.public_address;
                info!("entity service at {}", addr);
                self.state = ConnectionState::Connected {
                    entity_service: Some(addr),
                };
                self.send_entity_query(addr);
            }
            None => {
                // directories are sometimes incomplete on the first reply;
                // the retry timer re-requests the list
                debug!("no entity service advertised yet");
                self.state = ConnectionState::Connected {
                    entity_service: None,
                };
            }
        }
    }

    fn ingest_entity_datagram(&mut self, data: &[u8]) {
        match self.entities.ingest(data) {
            Ok(Applied::Upserted(id)) => self.queue_asset_fetches(id),
            Ok(_) => {}
            Err(e) => debug!(
                "discarding entity record ({} byte(s)): {}",
                data.len(),
                e
            ),
        }
    }

    fn queue_asset_fetches(&mut self, id: u64) {
        let Some(entity) = self.entities.get(id) else {
            return;
        };
        let refs = [entity.model_ref.clone(), entity.texture_ref.clone()];
        for url in refs.iter().filter(|url| !url.is_empty()) {
            self.assets.ensure_fetched(self.fetcher.as_mut(), url);
        }
    }

    fn check_liveness(&mut self) {
        if !matches!(self.state, ConnectionState::Connected { .. }) {
            return;
        }
        let silent_for = self.last_received.elapsed();
        if silent_for > self.config.silent_server_timeout {
            warn!(
                "no traffic from {} for {:?}, restarting the handshake",
                self.domain_addr, silent_for
            );
            self.start_handshake(ConnectReason::SilentDomainDisconnect);
        }
    }

    fn run_timers(&mut self) {
        let now = Instant::now();

        if self.state != ConnectionState::Disconnected
            && now.duration_since(self.last_ping) >= self.config.ping_interval
        {
            self.last_ping = now;
            let payload = build_ping(PingLocality::Local, unix_micros());
            self.send_packet(PacketType::Ping, &payload, self.domain_addr);
        }

        let needs_handshake = matches!(
            self.state,
            ConnectionState::Disconnected
                | ConnectionState::AwaitingListReply
                | ConnectionState::Connected {
                    entity_service: None
                }
        );
        if needs_handshake
            && now.duration_since(self.last_handshake) >= self.config.handshake_retry_interval
        {
            if self.state == ConnectionState::Disconnected {
                self.start_handshake(ConnectReason::Connect);
            } else {
                debug!("re-sending connect and list request");
                self.send_connect_request(ConnectReason::Connect, 0);
                self.send_list_request();
                self.last_handshake = now;
            }
        }
    }

    fn start_handshake(&mut self, reason: ConnectReason) {
        let previous_uptime_usec = match reason {
            ConnectReason::Connect => 0,
            _ => self
                .connected_since
                .map(|since| since.elapsed().as_micros() as u64)
                .unwrap_or(0),
        };
        self.session.reset_assignment();
        self.connected_since = None;

        self.send_connect_request(reason, previous_uptime_usec);
        self.send_list_request();
        self.state = ConnectionState::AwaitingListReply;
        self.last_handshake = Instant::now();
    }

    fn send_connect_request(&mut self, reason: ConnectReason, previous_uptime_usec: u64) {
        let payload = build_connect_request(
            &self.session,
            self.local_addr,
            self.local_addr,
            reason,
            previous_uptime_usec,
            &self.credentials.credentials(),
        );
        self.send_packet(PacketType::DomainConnectRequest, &payload, self.domain_addr);
    }

    fn send_list_request(&mut self) {
        self.send_packet(PacketType::DomainListRequest, &[], self.domain_addr);
    }

    fn send_entity_query(&mut self, addr: SocketAddr) {
        // a zero "conical views" byte asks for everything in scope
        self.send_packet(PacketType::EntityQuery, &[0], addr);
    }

    fn send_packet(&mut self, packet_type: PacketType, payload: &[u8], to: SocketAddr) {
        let datagram = match self.session.frame_packet(packet_type, payload) {
            Ok(datagram) => datagram,
            Err(e) => {
                error!("cannot frame {:?}: {}", packet_type, e);
                return;
            }
        };

        match self.socket.try_send_to(&datagram, to) {
            Ok(_) => {
                if self.config.verbose_protocol_logging {
                    debug!(
                        ">>> {:?} {} byte(s) to {}",
                        packet_type,
                        datagram.len(),
                        to
                    );
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                debug!("socket not ready, dropping {:?}", packet_type);
            }
            Err(e) => warn!("failed to send {:?} to {}: {}", packet_type, to, e),
        }
    }

    fn seed_demo_entities(&mut self) {
        for (id, name, x) in [(1u64, "DemoCubeA", -0.5f32), (2, "DemoCubeB", 0.5)] {
            self.entities.seed(EntityRecord {
                id,
                name: name.to_owned(),
                position: Vec3::new(x, 1.25, -2.0),
                rotation: Quat::IDENTITY,
                dimensions: Vec3::splat(0.25),
                model_ref: String::new(),
                texture_ref: String::new(),
                color: Vec3::ONE,
                kind: EntityKind::Box,
                alpha: 1.0,
            });
        }
    }
}
