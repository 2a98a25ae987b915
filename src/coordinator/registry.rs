use super::types::{Member, RegistryError, Role, MAX_USERNAME_LEN};
use crate::protocol::{Command, LeaderAddrs, Reply, TopologyDescriptor};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

/// The single source of truth for which users exist, their roles, and which
/// structural change is in flight.
///
/// All command handling funnels through [`Registry::dispatch`]; the lifecycle
/// flags serialize structural changes, so one reconfiguration runs at a time
/// and every other command is rejected as busy until it completes.
pub struct Registry {
    members: HashMap<String, Member>,
    /// Registration order; drives the deterministic member selection in
    /// `setup-dht`.
    order: Vec<String>,
    reserved_ports: HashSet<u16>,
    /// Usernames in ring position order, leader first. Empty when no DHT
    /// exists.
    ring: Vec<String>,
    leader: Option<String>,
    dht_exists: bool,
    creating: bool,
    stabilizing: bool,
    tearing_down: bool,
    pending_join: Option<String>,
    pending_leave: Option<String>,
}

impl Registry {
    pub fn new(coordinator_port: u16) -> Self {
        let mut reserved_ports = HashSet::new();
        reserved_ports.insert(coordinator_port);
        Self {
            members: HashMap::new(),
            order: Vec::new(),
            reserved_ports,
            ring: Vec::new(),
            leader: None,
            dht_exists: false,
            creating: false,
            stabilizing: false,
            tearing_down: false,
            pending_join: None,
            pending_leave: None,
        }
    }

    pub fn dispatch(&mut self, command: Command) -> Result<Reply, RegistryError> {
        self.check_busy(&command)?;

        match command {
            Command::Register {
                username,
                ip,
                accept_port,
                query_port,
            } => self.register(username, ip, accept_port, query_port),
            Command::Deregister { username } => self.deregister(&username),
            Command::SetupDht { n, leader } => self.setup_dht(n, &leader),
            Command::DhtComplete { username } => self.dht_complete(&username),
            Command::QueryDht { username } => self.query_dht(&username),
            Command::JoinDht { username } => self.join_dht(username),
            Command::LeaveDht { username } => self.leave_dht(username),
            Command::DhtRebuilt {
                username,
                new_leader,
            } => self.dht_rebuilt(&username, new_leader),
            Command::TeardownDht { username } => self.teardown_dht(&username),
            Command::TeardownComplete { username } => self.teardown_complete(&username),
            Command::DisplayUsers => Ok(Reply::Listing(self.display_users())),
            Command::DisplayDht => Ok(Reply::Listing(self.display_dht())),
        }
    }

    /// The concurrency gate: while a structural change is in flight, only the
    /// command that completes it may pass.
    fn check_busy(&self, command: &Command) -> Result<(), RegistryError> {
        if self.creating && !matches!(command, Command::DhtComplete { .. }) {
            return Err(RegistryError::Busy("DHT creation"));
        }
        if self.stabilizing
            && !matches!(
                command,
                Command::DhtRebuilt { .. } | Command::TeardownComplete { .. }
            )
        {
            return Err(RegistryError::Busy("DHT stabilization"));
        }
        if self.tearing_down && !matches!(command, Command::TeardownComplete { .. }) {
            return Err(RegistryError::Busy("DHT teardown"));
        }
        Ok(())
    }

    fn register(
        &mut self,
        username: String,
        ip: IpAddr,
        accept_port: u16,
        query_port: u16,
    ) -> Result<Reply, RegistryError> {
        if username.is_empty()
            || username.chars().count() > MAX_USERNAME_LEN
            || !username.chars().all(char::is_alphabetic)
        {
            return Err(RegistryError::InvalidUsername(username));
        }
        if self.members.contains_key(&username) {
            return Err(RegistryError::UsernameTaken(username));
        }
        for port in [accept_port, query_port] {
            if self.reserved_ports.contains(&port) {
                return Err(RegistryError::PortReserved(port));
            }
        }
        if accept_port == query_port {
            return Err(RegistryError::PortReserved(query_port));
        }

        self.reserved_ports.insert(accept_port);
        self.reserved_ports.insert(query_port);
        self.order.push(username.clone());
        self.members.insert(
            username.clone(),
            Member {
                username: username.clone(),
                ip,
                accept_port,
                query_port,
                role: Role::Free,
            },
        );

        Ok(Reply::Registered(format!("user `{}` registered", username)))
    }

    fn deregister(&mut self, username: &str) -> Result<Reply, RegistryError> {
        let member = self
            .members
            .get(username)
            .ok_or_else(|| RegistryError::UnknownUser(username.to_string()))?;
        if member.role != Role::Free {
            return Err(RegistryError::NotFree(username.to_string()));
        }

        let member = self.members.remove(username).expect("member looked up above");
        self.reserved_ports.remove(&member.accept_port);
        self.reserved_ports.remove(&member.query_port);
        self.order.retain(|name| name != username);

        Ok(Reply::Deregistered(format!(
            "user `{}` removed; terminate the client",
            username
        )))
    }

    fn setup_dht(&mut self, n: usize, leader: &str) -> Result<Reply, RegistryError> {
        if self.dht_exists {
            return Err(RegistryError::DhtExists);
        }
        let leader_member = self
            .members
            .get(leader)
            .ok_or_else(|| RegistryError::UnknownUser(leader.to_string()))?;
        if leader_member.role != Role::Free {
            return Err(RegistryError::NotFree(leader.to_string()));
        }

        let available = self
            .members
            .values()
            .filter(|member| member.role == Role::Free)
            .count();
        if n < 2 || n > available {
            return Err(RegistryError::RingSize { n, available });
        }

        // leader takes position 0; the rest fill up in registration order
        let mut ring = vec![leader.to_string()];
        for username in &self.order {
            if ring.len() == n {
                break;
            }
            if username == leader {
                continue;
            }
            if self.members[username].role == Role::Free {
                ring.push(username.clone());
            }
        }

        for (position, username) in ring.iter().enumerate() {
            let member = self.members.get_mut(username).expect("ring built from members");
            member.role = if position == 0 { Role::Leader } else { Role::InDht };
        }

        self.ring = ring;
        self.leader = Some(leader.to_string());
        self.dht_exists = true;
        self.creating = true;

        Ok(Reply::Topology(self.topology()))
    }

    fn dht_complete(&mut self, username: &str) -> Result<Reply, RegistryError> {
        if !self.creating {
            return Err(RegistryError::NotCreating);
        }
        if self.leader.as_deref() != Some(username) {
            return Err(RegistryError::NotLeader(username.to_string()));
        }

        self.creating = false;
        Ok(Reply::SetupComplete)
    }

    fn query_dht(&mut self, username: &str) -> Result<Reply, RegistryError> {
        if !self.dht_exists {
            return Err(RegistryError::NoDht);
        }
        let caller = self
            .members
            .get(username)
            .ok_or_else(|| RegistryError::UnknownUser(username.to_string()))?;
        if caller.role != Role::Free {
            return Err(RegistryError::NotFree(username.to_string()));
        }

        let position = rand::thread_rng().gen_range(0..self.ring.len());
        Ok(Reply::QueryNode(self.descriptor(position)))
    }

    fn join_dht(&mut self, username: String) -> Result<Reply, RegistryError> {
        if !self.dht_exists {
            return Err(RegistryError::NoDht);
        }
        let member = self
            .members
            .get(&username)
            .ok_or_else(|| RegistryError::UnknownUser(username.clone()))?;
        if member.role != Role::Free {
            return Err(RegistryError::NotFree(username));
        }

        let leader = self.leader_member()?;
        let grant = LeaderAddrs {
            accept: leader.accept_addr(),
            query: leader.query_addr(),
        };

        self.stabilizing = true;
        self.pending_join = Some(username);
        Ok(Reply::JoinGrant(grant))
    }

    fn leave_dht(&mut self, username: String) -> Result<Reply, RegistryError> {
        if !self.dht_exists {
            return Err(RegistryError::NoDht);
        }
        if self.ring.len() < 2 {
            return Err(RegistryError::RingSize {
                n: self.ring.len(),
                available: self.ring.len(),
            });
        }
        let member = self
            .members
            .get(&username)
            .ok_or_else(|| RegistryError::UnknownUser(username.clone()))?;
        if !matches!(member.role, Role::InDht | Role::Leader) {
            return Err(RegistryError::NotInRing(username));
        }

        self.stabilizing = true;
        self.pending_leave = Some(username);
        Ok(Reply::LeaveGrant)
    }

    fn dht_rebuilt(
        &mut self,
        username: &str,
        new_leader: Option<String>,
    ) -> Result<Reply, RegistryError> {
        if let Some(pending) = self.pending_join.clone() {
            if pending != username {
                return Err(RegistryError::PendingMismatch {
                    reporting: username.to_string(),
                    pending,
                });
            }

            self.members
                .get_mut(username)
                .ok_or_else(|| RegistryError::UnknownUser(username.to_string()))?
                .role = Role::InDht;
            // the joiner takes position n-1, the end of the ring
            self.ring.push(username.to_string());
            self.pending_join = None;
            self.stabilizing = false;
            return Ok(Reply::RebuiltAck);
        }

        if let Some(pending) = self.pending_leave.clone() {
            if pending != username {
                return Err(RegistryError::PendingMismatch {
                    reporting: username.to_string(),
                    pending,
                });
            }
            let new_leader = new_leader.ok_or(RegistryError::MissingNewLeader)?;
            if !self.ring.iter().any(|name| name == &new_leader) || new_leader == username {
                return Err(RegistryError::NotInRing(new_leader));
            }

            if let Some(old_leader) = self.leader.take() {
                if old_leader != username {
                    self.members
                        .get_mut(&old_leader)
                        .expect("leader is registered")
                        .role = Role::InDht;
                }
            }
            self.members
                .get_mut(&new_leader)
                .expect("membership checked above")
                .role = Role::Leader;
            self.members
                .get_mut(username)
                .ok_or_else(|| RegistryError::UnknownUser(username.to_string()))?
                .role = Role::Free;

            // renumbering started 0 at the leaver's successor, so rotating the
            // remaining members to put the new leader first matches the ring
            self.ring.retain(|name| name != username);
            let position = self
                .ring
                .iter()
                .position(|name| name == &new_leader)
                .expect("membership checked above");
            self.ring.rotate_left(position);

            self.leader = Some(new_leader);
            self.pending_leave = None;
            self.stabilizing = false;
            return Ok(Reply::RebuiltAck);
        }

        Err(RegistryError::NothingPending)
    }

    fn teardown_dht(&mut self, username: &str) -> Result<Reply, RegistryError> {
        if !self.dht_exists {
            return Err(RegistryError::NoDht);
        }
        if self.leader.as_deref() != Some(username) {
            return Err(RegistryError::NotLeader(username.to_string()));
        }

        self.tearing_down = true;
        Ok(Reply::TeardownGrant)
    }

    fn teardown_complete(&mut self, username: &str) -> Result<Reply, RegistryError> {
        if !self.tearing_down && !self.stabilizing {
            return Err(RegistryError::NotTearingDown);
        }
        if self.leader.as_deref() != Some(username) {
            return Err(RegistryError::NotLeader(username.to_string()));
        }

        for name in &self.ring {
            if let Some(member) = self.members.get_mut(name) {
                member.role = Role::Free;
            }
        }
        self.ring.clear();
        self.leader = None;
        self.dht_exists = false;
        self.creating = false;
        self.stabilizing = false;
        self.tearing_down = false;
        self.pending_join = None;
        self.pending_leave = None;

        Ok(Reply::TeardownDone)
    }

    fn display_users(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|username| self.members.get(username))
            .map(|member| {
                format!(
                    "{} {:?} accept={} query={}",
                    member.username,
                    member.role,
                    member.accept_addr(),
                    member.query_addr()
                )
            })
            .collect()
    }

    fn display_dht(&self) -> Vec<String> {
        if !self.dht_exists {
            return vec!["no DHT exists".to_string()];
        }
        self.ring
            .iter()
            .enumerate()
            .filter_map(|(position, username)| {
                self.members
                    .get(username)
                    .map(|member| format!("{}: {} @ {}", position, username, member.accept_addr()))
            })
            .collect()
    }

    fn topology(&self) -> Vec<TopologyDescriptor> {
        (0..self.ring.len()).map(|position| self.descriptor(position)).collect()
    }

    fn descriptor(&self, position: usize) -> TopologyDescriptor {
        let member = &self.members[&self.ring[position]];
        TopologyDescriptor {
            n: self.ring.len(),
            ring_id: position,
            username: member.username.clone(),
            ip: member.ip,
            accept_port: member.accept_port,
            query_port: member.query_port,
        }
    }

    fn leader_member(&self) -> Result<&Member, RegistryError> {
        let username = self.leader.as_deref().ok_or(RegistryError::NoDht)?;
        self.members
            .get(username)
            .ok_or_else(|| RegistryError::UnknownUser(username.to_string()))
    }

    // Inspection helpers.

    pub fn role_of(&self, username: &str) -> Option<Role> {
        self.members.get(username).map(|member| member.role)
    }

    pub fn ring(&self) -> &[String] {
        &self.ring
    }

    pub fn leader(&self) -> Option<&str> {
        self.leader.as_deref()
    }

    pub fn dht_exists(&self) -> bool {
        self.dht_exists
    }

    pub fn is_busy(&self) -> bool {
        self.creating || self.stabilizing || self.tearing_down
    }
}
