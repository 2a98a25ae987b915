use super::state::NodeState;
use crate::ingestion::{CsvSource, Record, RecordSource};
use crate::protocol::{
    ControlMessage, Envelope, JoinState, Outcome, PeerAddr, QueryMessage, QueryRequest, Relink,
    Reply, TopologyDescriptor, TopologySlice,
};
use crate::routing::Placement;
use crate::transport::{self, MAX_DATAGRAM};
use anyhow::{bail, Context, Result};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// Startup parameters of one ring member process.
pub struct NodeConfig {
    pub username: String,
    pub coordinator: SocketAddr,
    pub bind_ip: IpAddr,
    pub accept_port: u16,
    pub query_port: u16,
    pub egress_port: u16,
    pub dataset: PathBuf,
    pub key_field: String,
}

/// What handling one coordinator reply asks the submit loop to do next.
struct ReplyOutcome {
    keep_running: bool,
    follow_up: Option<String>,
}

impl ReplyOutcome {
    fn done() -> Self {
        Self {
            keep_running: true,
            follow_up: None,
        }
    }
}

/// One ring member.
///
/// Two listener loops share the state behind one mutex: the accept loop
/// handles topology and record traffic, the query loop handles point queries.
/// The egress socket originates control messages toward the successor and the
/// coordinator; its request/response exchanges block on a single reply with
/// no timeout, so an unresponsive peer stalls the protocol rather than
/// corrupting it.
pub struct NodeService {
    pub state: Arc<Mutex<NodeState>>,
    accept_socket: UdpSocket,
    query_socket: UdpSocket,
    egress: UdpSocket,
    coordinator: SocketAddr,
    dataset: PathBuf,
    key_field: String,
}

impl NodeService {
    pub async fn bind(config: NodeConfig) -> Result<Arc<Self>> {
        let accept_socket =
            UdpSocket::bind(SocketAddr::new(config.bind_ip, config.accept_port)).await?;
        let query_socket =
            UdpSocket::bind(SocketAddr::new(config.bind_ip, config.query_port)).await?;
        let egress = UdpSocket::bind(SocketAddr::new(config.bind_ip, config.egress_port)).await?;

        Ok(Arc::new(Self {
            state: Arc::new(Mutex::new(NodeState::new(config.username))),
            accept_socket,
            query_socket,
            egress,
            coordinator: config.coordinator,
            dataset: config.dataset,
            key_field: config.key_field,
        }))
    }

    pub fn accept_addr(&self) -> Result<SocketAddr> {
        Ok(self.accept_socket.local_addr()?)
    }

    pub fn query_addr(&self) -> Result<SocketAddr> {
        Ok(self.query_socket.local_addr()?)
    }

    /// Spawn the two listener loops.
    pub async fn start(self: Arc<Self>) {
        let accept = self.clone();
        tokio::spawn(async move {
            accept.accept_loop().await;
        });

        let query = self.clone();
        tokio::spawn(async move {
            query.query_loop().await;
        });

        tracing::info!(
            "listening on {} (control) and {} (query)",
            self.accept_addr().map(|a| a.to_string()).unwrap_or_default(),
            self.query_addr().map(|a| a.to_string()).unwrap_or_default()
        );
    }

    async fn accept_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.accept_socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    match serde_json::from_slice::<Envelope<ControlMessage>>(&buf[..len]) {
                        Ok(envelope) => {
                            if let Err(error) = self.handle_control(envelope.message, src).await {
                                tracing::error!(
                                    "error handling control message from {}: {:#}",
                                    src,
                                    error
                                );
                            }
                        }
                        Err(error) => {
                            tracing::warn!("malformed control datagram from {}: {}", src, error);
                        }
                    }
                }
                Err(error) => {
                    tracing::error!("failed to receive on the accept port: {}", error);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn query_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.query_socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    match serde_json::from_slice::<Envelope<QueryMessage>>(&buf[..len]) {
                        Ok(envelope) => {
                            if let Err(error) = self.handle_query(envelope).await {
                                tracing::error!(
                                    "error handling query message from {}: {:#}",
                                    src,
                                    error
                                );
                            }
                        }
                        Err(error) => {
                            tracing::warn!("malformed query datagram from {}: {}", src, error);
                        }
                    }
                }
                Err(error) => {
                    tracing::error!("failed to receive on the query port: {}", error);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Control channel: topology assignment and reconfiguration
    // ------------------------------------------------------------------

    async fn handle_control(&self, message: ControlMessage, src: SocketAddr) -> Result<()> {
        match message {
            ControlMessage::SetId(slice) => {
                {
                    let mut state = self.state.lock().await;
                    state.install_slice(&slice);
                    tracing::info!("{}", state.summary());
                }
                let ack = Envelope::success(ControlMessage::Ack(None));
                transport::send(&self.accept_socket, src, &ack).await
            }

            ControlMessage::Record(record) => self.insert_record(record, false).await,

            ControlMessage::LeavingTeardown => {
                let (leaving, joining, successor) = {
                    let mut state = self.state.lock().await;
                    state.clear_shard();
                    (state.leaving, state.joining, state.successor)
                };
                let successor = successor.context("leaving-teardown outside a ring")?;

                if leaving {
                    // the circulation is back at the leaver: every shard is
                    // empty, renumber from the successor
                    tracing::info!("shards cleared around the ring, renumbering from 0");
                    self.send_control(successor.accept, ControlMessage::ResetId(0))
                        .await
                } else if joining {
                    tracing::info!("shards cleared around the ring, rebuilding under the new size");
                    self.send_control(
                        successor.accept,
                        ControlMessage::RebuildDht(self.accept_addr()?),
                    )
                    .await
                } else {
                    self.send_control(successor.accept, ControlMessage::LeavingTeardown)
                        .await
                }
            }

            ControlMessage::ResetId(new_id) => {
                let leaving = self.state.lock().await.leaving;
                if leaving {
                    // every remaining member renumbered; relink the neighbors
                    // around this node before redistribution
                    tracing::info!("ring renumbered, relinking neighbors");
                    self.convert_neighbors().await
                } else {
                    let successor = {
                        let mut state = self.state.lock().await;
                        state.renumber(new_id);
                        state.successor
                    }
                    .context("reset-id outside a ring")?;
                    self.send_control(successor.accept, ControlMessage::ResetId(new_id + 1))
                        .await
                }
            }

            ControlMessage::ResetN(mut join_state) => {
                let mut state = self.state.lock().await;

                if state.username == join_state.username {
                    // fully propagated: adopt the final position and force a
                    // redistribution pass under the new ring size
                    let prev = join_state
                        .prev
                        .context("join state circulated without an insertion point")?;
                    state.adopt_join_position(prev, join_state.n);
                    let successor = state.successor.context("joining member has no successor")?;
                    tracing::info!("{}", state.summary());
                    drop(state);
                    self.send_control(successor.accept, ControlMessage::LeavingTeardown)
                        .await
                } else if state.is_leader() {
                    let ring_size = state.grow_ring().context("reset-n outside a ring")?;
                    join_state.n = ring_size;
                    // the joiner takes the last position, right before the leader
                    state.predecessor = Some(join_state.addr);
                    let successor = state.successor.context("leader has no successor")?;
                    drop(state);
                    self.send_control(successor.accept, ControlMessage::ResetN(join_state))
                        .await
                } else {
                    let ring_size = state.grow_ring().context("reset-n outside a ring")?;
                    let ring_id = state.ring_id.context("reset-n outside a ring")?;
                    if ring_size - 2 == ring_id {
                        // this is the insertion point: splice the joiner in as
                        // the new successor
                        join_state.prev = Some(self.accept_addr()?);
                        state.splice_successor(join_state.addr, join_state.query);
                    }
                    let successor = state.successor.context("reset-n outside a ring")?;
                    drop(state);
                    self.send_control(successor.accept, ControlMessage::ResetN(join_state))
                        .await
                }
            }

            ControlMessage::ResetLeft(relink) => {
                let mut state = self.state.lock().await;
                if state.successor.map(|peer| peer.accept) == Some(relink.current) {
                    // this node pointed at the leaver; bypass it
                    state.splice_successor(relink.new, relink.query);
                    drop(state);
                    self.send_control(relink.current, ControlMessage::ResetComplete)
                        .await
                } else {
                    let successor = state.successor.context("reset-left outside a ring")?;
                    drop(state);
                    self.send_control(successor.accept, ControlMessage::ResetLeft(relink))
                        .await
                }
            }

            ControlMessage::ResetRight(predecessor) => {
                let username = {
                    let mut state = self.state.lock().await;
                    state.predecessor = Some(predecessor);
                    state.username.clone()
                };
                // report identity back; after a renumbering this node holds
                // position 0, so the leaver learns the new leader
                let reply = Envelope::success(ControlMessage::Ack(Some(username)));
                transport::send(&self.accept_socket, src, &reply).await
            }

            ControlMessage::ResetComplete => {
                let successor = self
                    .state
                    .lock()
                    .await
                    .successor
                    .context("reset-complete outside a ring")?;
                tracing::info!("neighbors relinked, rebuilding the DHT");
                self.send_control(
                    successor.accept,
                    ControlMessage::RebuildDht(self.accept_addr()?),
                )
                .await
            }

            ControlMessage::RebuildDht(return_addr) => {
                tracing::info!("rebuilding the DHT from the bulk dataset");
                self.bulk_load().await?;
                self.send_control(return_addr, ControlMessage::DhtRebuilt)
                    .await
            }

            ControlMessage::DhtRebuilt => {
                let (joining, new_leader, username) = {
                    let mut state = self.state.lock().await;
                    let joining = state.joining;
                    state.joining = false;
                    state.leaving = false;
                    (joining, state.new_leader.take(), state.username.clone())
                };
                let line = if joining {
                    format!("dht-rebuilt {}", username)
                } else {
                    let new_leader =
                        new_leader.context("leave finished without learning the new leader")?;
                    format!("dht-rebuilt {} {}", username, new_leader)
                };
                self.submit(line).await.map(|_| ())
            }

            ControlMessage::Teardown => {
                let (is_leader, successor, username) = {
                    let state = self.state.lock().await;
                    (state.is_leader(), state.successor, state.username.clone())
                };
                if is_leader {
                    // the circulation is complete; report and go Free
                    self.state.lock().await.clear_all();
                    self.submit(format!("teardown-complete {}", username))
                        .await
                        .map(|_| ())
                } else {
                    let successor = successor.context("teardown outside a ring")?;
                    self.state.lock().await.clear_all();
                    self.send_control(successor.accept, ControlMessage::Teardown)
                        .await
                }
            }

            ControlMessage::CheckNodes => {
                let (is_origin, successor, summary) = {
                    let mut state = self.state.lock().await;
                    let is_origin = state.check_origin;
                    state.check_origin = false;
                    (is_origin, state.successor, state.summary())
                };
                tracing::info!("{}", summary);
                if !is_origin {
                    if let Some(successor) = successor {
                        return self
                            .send_control(successor.accept, ControlMessage::CheckNodes)
                            .await;
                    }
                }
                Ok(())
            }

            ControlMessage::Ack(_) => {
                tracing::debug!("stray ack from {}", src);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Query channel
    // ------------------------------------------------------------------

    async fn handle_query(&self, envelope: Envelope<QueryMessage>) -> Result<()> {
        match envelope.message {
            QueryMessage::Query(request) => self.route_query(request).await,
            QueryMessage::QueryResult(record) => {
                let pending = self.state.lock().await.pending_query.take();
                match (pending, record) {
                    (Some(key), Some(record)) => {
                        tracing::info!(
                            "query result for `{}`:\n{}",
                            key,
                            serde_json::to_string_pretty(&record)?
                        );
                    }
                    (Some(key), None) => {
                        tracing::info!("query for `{}`: record not found", key);
                    }
                    (None, _) => {
                        tracing::debug!("query result without a pending query");
                    }
                }
                Ok(())
            }
        }
    }

    async fn route_query(&self, request: QueryRequest) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.place(&request.key) {
            None => {
                drop(state);
                self.send_query_result(request.origin, None).await
            }
            Some(Placement::Local { bucket }) => {
                let found = state.shard.lookup(bucket, &request.key).cloned();
                state.forwarded_query = false;
                drop(state);
                self.send_query_result(request.origin, found).await
            }
            Some(Placement::Forward { .. }) => {
                if state.forwarded_query {
                    // already forwarded once without resolution: the query has
                    // made a full revolution
                    state.forwarded_query = false;
                    drop(state);
                    self.send_query_result(request.origin, None).await
                } else {
                    state.forwarded_query = true;
                    let successor = state.successor.context("query forward outside a ring")?;
                    drop(state);
                    let envelope = Envelope::success(QueryMessage::Query(request));
                    transport::send(&self.query_socket, successor.query, &envelope).await
                }
            }
        }
    }

    async fn send_query_result(&self, origin: SocketAddr, record: Option<Record>) -> Result<()> {
        let envelope = match record {
            Some(record) => Envelope::success(QueryMessage::QueryResult(Some(record))),
            None => Envelope::failure(QueryMessage::QueryResult(None)),
        };
        transport::send(&self.query_socket, origin, &envelope).await
    }

    // ------------------------------------------------------------------
    // Coordinator channel
    // ------------------------------------------------------------------

    /// Send one text command to the coordinator, wait for its reply, and act
    /// on it. Returns `false` once the client should terminate.
    pub async fn submit(&self, line: String) -> Result<bool> {
        let mut next = Some(line);
        let mut keep_running = true;

        while let Some(line) = next.take() {
            tracing::debug!("-> coordinator: {}", line);
            self.egress
                .send_to(line.as_bytes(), self.coordinator)
                .await
                .with_context(|| format!("failed to reach the coordinator at {}", self.coordinator))?;
            let (envelope, _) = transport::recv::<Reply>(&self.egress).await?;
            let outcome = self.handle_reply(envelope).await?;
            keep_running = outcome.keep_running;
            next = outcome.follow_up;
        }

        Ok(keep_running)
    }

    async fn handle_reply(&self, envelope: Envelope<Reply>) -> Result<ReplyOutcome> {
        if envelope.result == Outcome::Failure {
            if let Reply::Error(message) = &envelope.message {
                tracing::warn!("coordinator refused: {}", message);
            }
            return Ok(ReplyOutcome::done());
        }

        match envelope.message {
            Reply::Registered(info) => {
                tracing::info!("{}", info);
                Ok(ReplyOutcome::done())
            }

            Reply::Deregistered(info) => {
                tracing::info!("{}", info);
                Ok(ReplyOutcome {
                    keep_running: false,
                    follow_up: None,
                })
            }

            Reply::Topology(descriptors) => {
                tracing::info!("granted leadership of a ring of {}", descriptors.len());
                {
                    let mut state = self.state.lock().await;
                    state.install_ring(&descriptors);
                    tracing::info!("{}", state.summary());
                }
                self.fan_out_topology(&descriptors).await?;
                self.bulk_load().await?;
                let username = self.state.lock().await.username.clone();
                Ok(ReplyOutcome {
                    keep_running: true,
                    follow_up: Some(format!("dht-complete {}", username)),
                })
            }

            Reply::SetupComplete => {
                tracing::info!("coordinator acknowledged the completed DHT");
                Ok(ReplyOutcome::done())
            }

            Reply::QueryNode(descriptor) => {
                self.begin_query(&descriptor).await?;
                Ok(ReplyOutcome::done())
            }

            Reply::JoinGrant(leader) => {
                let (username, accept, query) = {
                    let mut state = self.state.lock().await;
                    state.joining = true;
                    state.successor = Some(PeerAddr {
                        accept: leader.accept,
                        query: leader.query,
                    });
                    (state.username.clone(), self.accept_addr()?, self.query_addr()?)
                };
                let join_state = JoinState {
                    username,
                    n: 0,
                    addr: accept,
                    query,
                    prev: None,
                };
                tracing::info!("joining the ring through the leader at {}", leader.accept);
                self.send_control(leader.accept, ControlMessage::ResetN(join_state))
                    .await?;
                Ok(ReplyOutcome::done())
            }

            Reply::LeaveGrant => {
                let successor = {
                    let mut state = self.state.lock().await;
                    state.leaving = true;
                    state.successor
                }
                .context("cannot leave outside a ring")?;
                tracing::info!("leaving the ring, clearing shards first");
                self.send_control(successor.accept, ControlMessage::LeavingTeardown)
                    .await?;
                Ok(ReplyOutcome::done())
            }

            Reply::RebuiltAck => {
                tracing::info!("coordinator acknowledged the rebuilt ring");
                Ok(ReplyOutcome::done())
            }

            Reply::TeardownGrant => {
                let (is_leader, successor) = {
                    let state = self.state.lock().await;
                    (state.is_leader(), state.successor)
                };
                if !is_leader {
                    tracing::warn!("only the leader can tear down the ring");
                    return Ok(ReplyOutcome::done());
                }
                let successor = successor.context("teardown outside a ring")?;
                self.send_control(successor.accept, ControlMessage::Teardown)
                    .await?;
                Ok(ReplyOutcome::done())
            }

            Reply::TeardownDone => {
                tracing::info!("ring torn down; every member is Free again");
                Ok(ReplyOutcome::done())
            }

            Reply::Listing(lines) => {
                for line in lines {
                    tracing::info!("{}", line);
                }
                Ok(ReplyOutcome::done())
            }

            Reply::Error(message) => {
                tracing::warn!("coordinator error: {}", message);
                Ok(ReplyOutcome::done())
            }
        }
    }

    // ------------------------------------------------------------------
    // Construction, load, and queries driven by this member
    // ------------------------------------------------------------------

    /// Initialize every other ring member with its topology slice, one
    /// synchronous set-id exchange at a time.
    async fn fan_out_topology(&self, descriptors: &[TopologyDescriptor]) -> Result<()> {
        let count = descriptors.len();
        for position in 1..count {
            let slice = TopologySlice {
                prev: descriptors[position - 1].clone(),
                me: descriptors[position].clone(),
                next: descriptors[(position + 1) % count].clone(),
            };
            let target = slice.me.accept_addr();
            let username = slice.me.username.clone();

            let envelope = Envelope::success(ControlMessage::SetId(slice));
            let ack: Envelope<ControlMessage> =
                transport::request(&self.egress, target, &envelope).await?;
            if !ack.is_success() {
                bail!("member `{}` at {} rejected set-id", username, target);
            }
            tracing::info!("initialized ring member `{}`", username);
        }
        Ok(())
    }

    /// Stream the entire bulk dataset through Insert, one record at a time.
    async fn bulk_load(&self) -> Result<()> {
        let mut source = CsvSource::open(&self.dataset, &self.key_field)?;
        let mut total = 0usize;

        tracing::info!("routing records through the ring");
        while let Some(record) = source.next_record()? {
            self.insert_record(record, true).await?;
            total += 1;
            if total % 50 == 0 {
                tracing::info!("{} records routed so far", total);
            }
        }
        tracing::info!("{} records routed in total", total);
        Ok(())
    }

    /// Insert: store locally when owned, otherwise forward one hop to the
    /// successor. Bulk loading escalates repeated send failures to a fatal
    /// error; steady-state forwards are logged and dropped.
    async fn insert_record(&self, record: Record, bulk: bool) -> Result<()> {
        let successor = {
            let mut state = self.state.lock().await;
            let placement = state
                .place(&record.key)
                .context("cannot place a record outside a ring")?;
            match placement {
                Placement::Local { bucket } => {
                    state.shard.insert(bucket, record);
                    return Ok(());
                }
                Placement::Forward { .. } => {
                    state.successor.context("no successor to forward to")?
                }
            }
        };

        let envelope = Envelope::success(ControlMessage::Record(record));
        if bulk {
            transport::send_with_retry(&self.egress, successor.accept, &envelope).await
        } else {
            if let Err(error) = transport::send(&self.egress, successor.accept, &envelope).await {
                tracing::warn!("dropping record forward to {}: {}", successor.accept, error);
            }
            Ok(())
        }
    }

    /// Remember the key being queried, then ask the coordinator for an entry
    /// point with `query-dht`.
    pub async fn run_query(&self, key: String) -> Result<bool> {
        let username = {
            let mut state = self.state.lock().await;
            state.pending_query = Some(key);
            state.username.clone()
        };
        self.submit(format!("query-dht {}", username)).await
    }

    async fn begin_query(&self, entry: &TopologyDescriptor) -> Result<()> {
        let key = self
            .state
            .lock()
            .await
            .pending_query
            .clone()
            .context("no query is pending")?;
        let request = QueryRequest {
            key,
            origin: self.query_addr()?,
        };
        tracing::info!(
            "querying through `{}` at {}",
            entry.username,
            entry.query_addr()
        );
        let envelope = Envelope::success(QueryMessage::Query(request));
        transport::send(&self.query_socket, entry.query_addr(), &envelope).await
    }

    // ------------------------------------------------------------------
    // Leave-side relinking and diagnostics
    // ------------------------------------------------------------------

    /// After the renumbering circulation returns to the leaver: teach the
    /// successor its new predecessor (and learn the new leader from it), then
    /// circulate reset-left until the predecessor rewires around this node.
    async fn convert_neighbors(&self) -> Result<()> {
        let (predecessor, successor) = {
            let state = self.state.lock().await;
            (
                state.predecessor.context("leaver has no predecessor")?,
                state.successor.context("leaver has no successor")?,
            )
        };

        let envelope = Envelope::success(ControlMessage::ResetRight(predecessor));
        let reply: Envelope<ControlMessage> =
            transport::request(&self.egress, successor.accept, &envelope).await?;
        let new_leader = match reply.message {
            ControlMessage::Ack(Some(username)) => username,
            other => bail!("unexpected reset-right reply: {:?}", other),
        };
        tracing::info!("new leader after the leave: `{}`", new_leader);
        self.state.lock().await.new_leader = Some(new_leader);

        let relink = Relink {
            current: self.accept_addr()?,
            new: successor.accept,
            query: successor.query,
        };
        self.send_control(successor.accept, ControlMessage::ResetLeft(relink))
            .await
    }

    /// Local diagnostic dump.
    pub async fn node_info(&self) -> String {
        self.state.lock().await.summary()
    }

    /// Start a one-revolution check-nodes circulation.
    pub async fn start_check_nodes(&self) -> Result<()> {
        let successor = {
            let mut state = self.state.lock().await;
            state.check_origin = true;
            state.successor
        }
        .context("check-nodes outside a ring")?;
        self.send_control(successor.accept, ControlMessage::CheckNodes)
            .await
    }

    async fn send_control(&self, target: SocketAddr, message: ControlMessage) -> Result<()> {
        let envelope = Envelope::success(message);
        transport::send(&self.egress, target, &envelope).await
    }
}
