use crate::core::peer::PeerAddr;
use crate::hub::service::Hub;
use crate::hub::types::{ChunkRef, RpcPayload};
use crate::raft::protocol::{
    AppendEntriesRequest, AppendEntriesResponse, AppendStatus, ClientAppendRequest,
    ClientAppendResponse, VoteRequest, VoteResponse, WireEntry,
};
use crate::raft::types::{EntryPayload, LogEntry, RaftLockState, RaftRole};
use crate::table::container::RowContainer;

use rand::Rng;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Base heartbeat timeout; election timeouts are drawn uniformly from one to
/// three times this value.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(150);
/// Idle delay between tracker rounds; effectively the heartbeat period.
const HEARTBEAT_SEND_PERIOD: Duration = Duration::from_millis(50);
/// Per-RPC deadline for append-entries and vote traffic. Short, so a dead
/// peer cannot stall its tracker for long.
const RAFT_RPC_TIMEOUT: Duration = Duration::from_millis(150);
/// Bound on leader-redirect hops for one client submission.
const MAX_FORWARD_ATTEMPTS: usize = 10;

fn random_election_timeout() -> Duration {
    let base = HEARTBEAT_TIMEOUT.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(base..3 * base))
}

struct NodeState {
    role: RaftRole,
    current_term: u64,
    leader: Option<PeerAddr>,
    /// Highest term seen in any vote request; a later candidacy starts above
    /// it.
    last_vote_request_term: u64,
    election_timeout: Duration,
}

/// One chunk's Raft participant.
///
/// The node owns the replicated log and drives the chunk's row container
/// from the committed prefix. All mutation of the container, the lock view
/// and the peer set happens in [`apply_entry`](Self::apply_entry), which
/// runs exactly once per committed index on every peer.
pub struct RaftNode {
    meta: ChunkRef,
    hub: Arc<Hub>,
    pub container: Arc<RowContainer>,
    state: Mutex<NodeState>,
    /// Log with a sentinel at position zero; indexes are dense.
    log: RwLock<Vec<LogEntry>>,
    commit_index: Mutex<u64>,
    chunk_lock: Mutex<RaftLockState>,
    /// Raft peers, local address excluded.
    peers: Mutex<BTreeSet<PeerAddr>>,
    last_heartbeat: Mutex<Instant>,
    trackers_run: AtomicBool,
    is_exiting: AtomicBool,
    new_entries: Notify,
    entry_replicated: Notify,
    commit_advanced: Notify,
    tracker_handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl RaftNode {
    pub fn new(meta: ChunkRef, hub: Arc<Hub>, peers: Vec<PeerAddr>) -> Arc<Self> {
        let local = hub.local().clone();
        Arc::new(Self {
            meta,
            hub,
            container: Arc::new(RowContainer::new()),
            state: Mutex::new(NodeState {
                role: RaftRole::Follower,
                current_term: 0,
                leader: None,
                last_vote_request_term: 0,
                election_timeout: random_election_timeout(),
            }),
            log: RwLock::new(vec![LogEntry::sentinel()]),
            commit_index: Mutex::new(0),
            chunk_lock: Mutex::new(RaftLockState::default()),
            peers: Mutex::new(peers.into_iter().filter(|peer| *peer != local).collect()),
            last_heartbeat: Mutex::new(Instant::now()),
            trackers_run: AtomicBool::new(false),
            is_exiting: AtomicBool::new(false),
            new_entries: Notify::new(),
            entry_replicated: Notify::new(),
            commit_advanced: Notify::new(),
            tracker_handles: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// Starts the state manager. The founding peer of a chunk starts
    /// directly as leader of term zero; everyone else starts as follower.
    pub fn start(self: &Arc<Self>, as_leader: bool) {
        if as_leader {
            let mut state = self.state.lock().unwrap();
            state.role = RaftRole::Leader;
            state.leader = Some(self.hub.local().clone());
        }
        let node = Arc::clone(self);
        tokio::spawn(async move {
            node.state_manager().await;
        });
    }

    pub fn stop(&self) {
        self.is_exiting.store(true, Ordering::SeqCst);
        self.trackers_run.store(false, Ordering::SeqCst);
        self.entry_replicated.notify_waiters();
        self.new_entries.notify_waiters();
        self.commit_advanced.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        !self.is_exiting.load(Ordering::SeqCst)
    }

    pub fn role(&self) -> RaftRole {
        self.state.lock().unwrap().role
    }

    pub fn term(&self) -> u64 {
        self.state.lock().unwrap().current_term
    }

    pub fn known_leader(&self) -> Option<PeerAddr> {
        self.state.lock().unwrap().leader.clone()
    }

    pub fn commit(&self) -> u64 {
        *self.commit_index.lock().unwrap()
    }

    pub fn lock_state(&self) -> RaftLockState {
        self.chunk_lock.lock().unwrap().clone()
    }

    pub fn has_peer(&self, peer: &PeerAddr) -> bool {
        self.peers.lock().unwrap().contains(peer)
    }

    pub fn peer_list(&self) -> Vec<PeerAddr> {
        self.peers.lock().unwrap().iter().cloned().collect()
    }

    fn local(&self) -> &PeerAddr {
        self.hub.local()
    }

    fn last_log_coordinates(&self) -> (u64, u64) {
        let log = self.log.read().unwrap();
        let last = log.last().unwrap_or_else(|| panic!("raft log lost its sentinel"));
        (last.index, last.term)
    }

    // --- State management ---

    async fn state_manager(self: Arc<Self>) {
        let mut election_due = false;
        while self.is_running() {
            if election_due {
                election_due = false;
                self.conduct_election().await;
            }

            let role = self.role();
            match role {
                RaftRole::Follower | RaftRole::Candidate => {
                    let timeout = self.state.lock().unwrap().election_timeout;
                    let elapsed = self.last_heartbeat.lock().unwrap().elapsed();
                    if elapsed >= timeout {
                        tracing::debug!(
                            "{}: chunk {} heartbeat timed out after {:?}",
                            self.local(),
                            self.meta.chunk_id,
                            elapsed
                        );
                        election_due = true;
                    } else {
                        tokio::time::sleep(timeout - elapsed).await;
                    }
                }
                RaftRole::Leader => {
                    self.run_leader_session().await;
                }
            }
        }
    }

    /// Leader main loop: keep one tracker per peer alive and advance the
    /// commit index as entries replicate.
    async fn run_leader_session(self: &Arc<Self>) {
        self.trackers_run.store(true, Ordering::SeqCst);
        let term = self.term();
        let mut tracked: BTreeSet<PeerAddr> = BTreeSet::new();

        while self.trackers_run.load(Ordering::SeqCst) && self.is_running() {
            // Launch trackers for peers that joined since the last sweep
            // (including everyone on the first pass).
            for peer in self.peer_list() {
                if tracked.insert(peer.clone()) {
                    let node = Arc::clone(self);
                    let handle = tokio::spawn(async move {
                        node.follower_tracker(peer, term).await;
                    });
                    self.tracker_handles.lock().await.push(handle);
                }
            }

            self.leader_commit_replicated_entries();
            let _ = tokio::time::timeout(HEARTBEAT_SEND_PERIOD, self.entry_replicated.notified())
                .await;
        }

        tracing::debug!("{}: chunk {} lost leadership", self.local(), self.meta.chunk_id);
        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.tracker_handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn conduct_election(self: &Arc<Self>) {
        let (term, last_log_index, last_log_term) = {
            let mut state = self.state.lock().unwrap();
            state.role = RaftRole::Candidate;
            state.current_term = (state.current_term + 1).max(state.last_vote_request_term + 1);
            state.leader = None;
            let (last_log_index, last_log_term) = self.last_log_coordinates();
            (state.current_term, last_log_index, last_log_term)
        };

        tracing::debug!(
            "{}: candidate for chunk {} in term {}",
            self.local(),
            self.meta.chunk_id,
            term
        );

        let peers = self.peer_list();
        let mut ballots = Vec::new();
        for peer in &peers {
            let node = Arc::clone(self);
            let peer = peer.clone();
            ballots.push(tokio::spawn(async move {
                node.request_vote_from(&peer, term, last_log_index, last_log_term)
                    .await
            }));
        }

        let mut votes = 0usize;
        for ballot in ballots {
            if let Ok(true) = ballot.await {
                votes += 1;
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            // Strict majority of the whole cluster, own vote included.
            if state.role == RaftRole::Candidate && votes + 1 > (peers.len() + 1) / 2 {
                state.role = RaftRole::Leader;
                state.leader = Some(self.local().clone());
                state.election_timeout = random_election_timeout();
                tracing::info!(
                    "{}: elected leader of chunk {} for term {} with {} votes",
                    self.local(),
                    self.meta.chunk_id,
                    state.current_term,
                    votes + 1
                );
            } else if state.role == RaftRole::Candidate {
                state.role = RaftRole::Follower;
                state.leader = None;
                // A long back-off after losing keeps a stale-logged peer from
                // monopolizing elections it can never win.
                state.election_timeout = 4 * random_election_timeout();
            }
        }
        *self.last_heartbeat.lock().unwrap() = Instant::now();
    }

    async fn request_vote_from(
        &self,
        peer: &PeerAddr,
        term: u64,
        last_log_index: u64,
        last_log_term: u64,
    ) -> bool {
        let request = VoteRequest {
            term,
            last_log_index,
            last_log_term,
            commit_index: self.commit(),
        };
        let payload = RpcPayload::RaftRequestVote {
            meta: self.meta.clone(),
            request,
        };
        match self
            .hub
            .request_with_timeout(peer, payload, RAFT_RPC_TIMEOUT)
            .await
        {
            Ok(RpcPayload::RaftVoteResponse(response)) => response.granted,
            Ok(other) => {
                tracing::warn!("Unexpected vote response from {}: {:?}", peer, other);
                false
            }
            Err(e) => {
                tracing::debug!("Vote request to {} failed: {}", peer, e);
                false
            }
        }
    }

    // --- Log replication (leader side) ---

    /// Per-peer replication loop. Pushes one entry at a time, rewinding
    /// `next_index` on mismatch; with nothing to send it degenerates into
    /// the heartbeat.
    async fn follower_tracker(self: Arc<Self>, peer: PeerAddr, term: u64) {
        let mut next_index = self.commit() + 1;

        while self.trackers_run.load(Ordering::SeqCst) {
            let mut append_success = false;
            while !append_success && self.trackers_run.load(Ordering::SeqCst) {
                let (request, sending_heartbeat) = self.build_append_request(term, next_index);

                let response = match self
                    .hub
                    .request_with_timeout(
                        &peer,
                        RpcPayload::RaftAppendEntries {
                            meta: self.meta.clone(),
                            request,
                        },
                        RAFT_RPC_TIMEOUT,
                    )
                    .await
                {
                    Ok(RpcPayload::RaftAppendEntriesResponse(response)) => response,
                    Ok(other) => {
                        tracing::warn!("Unexpected append response from {}: {:?}", peer, other);
                        tokio::time::sleep(HEARTBEAT_SEND_PERIOD).await;
                        continue;
                    }
                    Err(e) => {
                        // An unreachable peer fails fast; pace the retries.
                        tracing::trace!("Append entries to {} failed: {}", peer, e);
                        tokio::time::sleep(HEARTBEAT_SEND_PERIOD).await;
                        continue;
                    }
                };

                append_success = matches!(
                    response.status,
                    AppendStatus::Success | AppendStatus::AlreadyPresent
                );
                if append_success {
                    if !sending_heartbeat {
                        self.mark_replicated(next_index, &peer);
                        next_index += 1;
                        self.entry_replicated.notify_waiters();
                    }
                } else {
                    // Mismatch: step one entry back and retry.
                    assert!(
                        next_index > 1,
                        "{}: cannot rewind chunk {} log for {} past the sentinel",
                        self.local(),
                        self.meta.chunk_id,
                        peer
                    );
                    next_index -= 1;
                    if response.commit_index >= next_index
                        && response.status != AppendStatus::Rejected
                    {
                        panic!(
                            "{}: conflicting entry already committed on {} (peer commit {}, \
                             peer log {}/{})",
                            self.local(),
                            peer,
                            response.commit_index,
                            response.last_log_index,
                            response.last_log_term
                        );
                    }
                }
            }

            if self.trackers_run.load(Ordering::SeqCst) {
                let _ =
                    tokio::time::timeout(HEARTBEAT_SEND_PERIOD, self.new_entries.notified()).await;
            }
        }
    }

    fn build_append_request(&self, term: u64, next_index: u64) -> (AppendEntriesRequest, bool) {
        let log = self.log.read().unwrap();
        let last = log.last().unwrap();
        let mut request = AppendEntriesRequest {
            term,
            commit_index: self.commit(),
            last_log_index: last.index,
            last_log_term: last.term,
            previous_log_index: None,
            previous_log_term: None,
            entry: None,
        };
        if next_index > last.index {
            // Nothing new; pure heartbeat.
            return (request, true);
        }
        let position = next_index as usize;
        let entry = &log[position];
        let previous = &log[position - 1];
        request.previous_log_index = Some(previous.index);
        request.previous_log_term = Some(previous.term);
        request.entry = Some(WireEntry {
            term: entry.term,
            sender: entry.sender.clone(),
            serial_id: entry.serial_id,
            payload: entry.payload.clone(),
        });
        (request, false)
    }

    fn mark_replicated(&self, index: u64, peer: &PeerAddr) {
        let mut log = self.log.write().unwrap();
        if let Some(entry) = log.get_mut(index as usize) {
            entry.replicators.insert(peer.clone());
        }
    }

    /// Advances the commit index over every entry replicated on a strict
    /// majority, applying as it goes.
    fn leader_commit_replicated_entries(self: &Arc<Self>) {
        loop {
            let advanced = {
                let log = self.log.read().unwrap();
                let mut commit = self.commit_index.lock().unwrap();
                let next = (*commit + 1) as usize;
                match log.get(next) {
                    Some(entry) => {
                        let peer_count = self.peers.lock().unwrap().len();
                        if entry.replicators.len() > peer_count {
                            panic!(
                                "{}: replication count {} exceeds peer count {} for entry {}",
                                self.local(),
                                entry.replicators.len(),
                                peer_count,
                                entry.index
                            );
                        }
                        // Strict majority of the whole cluster, the leader
                        // counting as one replica of its own entry.
                        if entry.replicators.len() + 1 > (peer_count + 1) / 2 {
                            *commit = entry.index;
                            self.apply_entry(entry);
                            true
                        } else {
                            false
                        }
                    }
                    None => false,
                }
            };
            if advanced {
                self.commit_advanced.notify_waiters();
            } else {
                return;
            }
        }
    }

    /// Appends an entry locally; returns its index, or zero if this peer is
    /// not the leader.
    pub fn append_as_leader(
        &self,
        payload: EntryPayload,
        sender: PeerAddr,
        serial_id: u64,
        retrying: bool,
    ) -> u64 {
        let term = {
            let state = self.state.lock().unwrap();
            if state.role != RaftRole::Leader {
                return 0;
            }
            state.current_term
        };

        let mut log = self.log.write().unwrap();
        if retrying {
            // The entry may already be in the log from an earlier attempt.
            if let Some(existing) = log
                .iter()
                .rev()
                .find(|entry| entry.sender == sender && entry.serial_id == serial_id)
            {
                return existing.index;
            }
        }
        let index = log.last().unwrap().index + 1;
        log.push(LogEntry {
            index,
            term,
            sender,
            serial_id,
            payload,
            replicators: BTreeSet::new(),
        });
        drop(log);
        self.new_entries.notify_waiters();
        index
    }

    // --- Client submissions ---

    /// Submits a mutation to the log, forwarding to the leader when this
    /// peer is not it. Returns the log index, or zero when no leader could
    /// be reached.
    pub async fn submit(
        self: &Arc<Self>,
        payload: EntryPayload,
        serial_id: u64,
        retrying: bool,
    ) -> u64 {
        let local_index =
            self.append_as_leader(payload.clone(), self.local().clone(), serial_id, retrying);
        if local_index > 0 {
            return local_index;
        }

        let request = ClientAppendRequest {
            serial_id,
            retrying,
            payload,
        };
        let mut target = self.known_leader();
        for attempt in 0..MAX_FORWARD_ATTEMPTS {
            if !self.is_running() {
                return 0;
            }
            let peer = match target.take().or_else(|| {
                // No leader hint: rotate through the swarm.
                let peers = self.peer_list();
                if peers.is_empty() {
                    None
                } else {
                    Some(peers[attempt % peers.len()].clone())
                }
            }) {
                Some(peer) => peer,
                None => return 0,
            };
            match self
                .hub
                .request_with_timeout(
                    &peer,
                    RpcPayload::RaftClientAppend {
                        meta: self.meta.clone(),
                        request: request.clone(),
                    },
                    RAFT_RPC_TIMEOUT,
                )
                .await
            {
                Ok(RpcPayload::RaftClientAppendResponse(response)) => {
                    if response.index > 0 {
                        return response.index;
                    }
                    target = response.leader.filter(|hint| *hint != peer);
                }
                Ok(other) => {
                    tracing::warn!("Unexpected client append response: {:?}", other);
                }
                Err(e) => {
                    tracing::debug!("Client append to {} failed: {}", peer, e);
                }
            }
            tokio::time::sleep(HEARTBEAT_SEND_PERIOD).await;
        }
        0
    }

    /// Blocks until the entry at `index` reaches the committed prefix, then
    /// reports whether it is still the caller's entry. A truncated-and-
    /// replaced entry yields false, prompting a retry with a fresh serial.
    pub async fn check_if_entry_committed(&self, index: u64, serial_id: u64) -> bool {
        loop {
            if self.commit() >= index {
                let log = self.log.read().unwrap();
                return match log.get(index as usize) {
                    // Serials are per-process counters, so the sender has to
                    // match as well.
                    Some(entry) => {
                        entry.serial_id == serial_id && entry.sender == *self.local()
                    }
                    None => false,
                };
            }
            if !self.is_running() {
                return false;
            }
            let _ =
                tokio::time::timeout(HEARTBEAT_SEND_PERIOD, self.commit_advanced.notified()).await;
        }
    }

    // --- Handlers ---

    pub fn handle_append_entries(
        self: &Arc<Self>,
        sender: PeerAddr,
        request: AppendEntriesRequest,
    ) -> AppendEntriesResponse {
        let commit_before = self.commit();
        let mut state = self.state.lock().unwrap();
        let sender_changed =
            state.leader.as_ref() != Some(&sender) || request.term != state.current_term;

        let (last_log_index, last_log_term) = {
            let log = self.log.read().unwrap();
            let last = log.last().unwrap();
            (last.index, last.term)
        };
        let is_sender_log_newer = request.last_log_term > last_log_term
            || (request.last_log_term == last_log_term
                && request.last_log_index >= last_log_index);

        if sender_changed {
            if request.term > state.current_term
                || (request.term == state.current_term && state.leader.is_none())
                || (request.term < state.current_term
                    && state.leader.is_none()
                    && is_sender_log_newer)
            {
                // Adopt the sender: it has a newer term, or it is the first
                // known leader for the current one, or we are leaderless and
                // its log is ahead of ours.
                state.current_term = request.term;
                state.leader = Some(sender.clone());
                if state.role != RaftRole::Follower {
                    state.role = RaftRole::Follower;
                    self.trackers_run.store(false, Ordering::SeqCst);
                    self.entry_replicated.notify_waiters();
                }
                *self.last_heartbeat.lock().unwrap() = Instant::now();
            } else if state.role == RaftRole::Follower
                && request.term == state.current_term
                && state.current_term > 0
                && state.leader.is_some()
            {
                panic!(
                    "{}: two leaders in term {} for chunk {}: {} and {}",
                    self.local(),
                    state.current_term,
                    self.meta.chunk_id,
                    state.leader.as_ref().unwrap(),
                    sender
                );
            } else {
                return AppendEntriesResponse {
                    term: state.current_term,
                    status: AppendStatus::Rejected,
                    last_log_index,
                    last_log_term,
                    commit_index: commit_before,
                };
            }
        } else {
            *self.last_heartbeat.lock().unwrap() = Instant::now();
        }
        let term = state.current_term;
        drop(state);

        let status = self.follower_append_new_entries(&request);
        if status == AppendStatus::Success {
            self.follower_commit_new_entries(&request);
        }

        let (last_log_index, last_log_term) = self.last_log_coordinates();
        AppendEntriesResponse {
            term,
            status,
            last_log_index,
            last_log_term,
            commit_index: self.commit(),
        }
    }

    fn follower_append_new_entries(&self, request: &AppendEntriesRequest) -> AppendStatus {
        let (wire, previous_index, previous_term) = match (
            &request.entry,
            request.previous_log_index,
            request.previous_log_term,
        ) {
            (Some(wire), Some(previous_index), Some(previous_term)) => {
                (wire, previous_index, previous_term)
            }
            // No new entry attached; the heartbeat is trivially successful.
            _ => return AppendStatus::Success,
        };

        let mut log = self.log.write().unwrap();
        let last = log.last().unwrap();
        if previous_index == last.index && previous_term == last.term {
            let index = last.index + 1;
            log.push(LogEntry {
                index,
                term: wire.term,
                sender: wire.sender.clone(),
                serial_id: wire.serial_id,
                payload: wire.payload.clone(),
                replicators: BTreeSet::new(),
            });
            AppendStatus::Success
        } else if previous_index < last.index {
            // Leader is rewinding over a conflict.
            let position = previous_index as usize;
            match log.get(position) {
                Some(stored_previous) if stored_previous.term == previous_term => {
                    let conflicting = &log[position + 1];
                    if conflicting.term == wire.term
                        && conflicting.serial_id == wire.serial_id
                        && conflicting.payload == wire.payload
                    {
                        return AppendStatus::AlreadyPresent;
                    }
                    let commit = self.commit();
                    if commit >= conflicting.index {
                        panic!(
                            "{}: leader rewind would truncate committed entry {} (commit {})",
                            self.local(),
                            conflicting.index,
                            commit
                        );
                    }
                    tracing::debug!(
                        "{}: truncating chunk {} log from index {}",
                        self.local(),
                        self.meta.chunk_id,
                        position + 1
                    );
                    log.truncate(position + 1);
                    let index = log.last().unwrap().index + 1;
                    log.push(LogEntry {
                        index,
                        term: wire.term,
                        sender: wire.sender.clone(),
                        serial_id: wire.serial_id,
                        payload: wire.payload.clone(),
                        replicators: BTreeSet::new(),
                    });
                    AppendStatus::Success
                }
                _ => AppendStatus::Failed,
            }
        } else {
            // Our log is behind the leader's previous coordinates.
            AppendStatus::Failed
        }
    }

    fn follower_commit_new_entries(self: &Arc<Self>, request: &AppendEntriesRequest) {
        let log = self.log.read().unwrap();
        let last_index = log.last().unwrap().index;
        let mut commit = self.commit_index.lock().unwrap();
        assert!(
            *commit <= last_index,
            "{}: commit index {} beyond log end {}",
            self.local(),
            *commit,
            last_index
        );
        if *commit < request.commit_index && *commit < last_index {
            let target = request.commit_index.min(last_index);
            for index in (*commit + 1)..=target {
                self.apply_entry(&log[index as usize]);
            }
            *commit = target;
            drop(commit);
            drop(log);
            self.commit_advanced.notify_waiters();
        }
    }

    pub fn handle_request_vote(&self, sender: PeerAddr, request: VoteRequest) -> VoteResponse {
        let (last_log_index, last_log_term) = self.last_log_coordinates();
        let is_candidate_log_newer = request.last_log_term > last_log_term
            || (request.last_log_term == last_log_term
                && request.last_log_index >= last_log_index);

        let granted = {
            let mut state = self.state.lock().unwrap();
            state.last_vote_request_term = state.last_vote_request_term.max(request.term);
            if request.term > state.current_term && is_candidate_log_newer {
                state.current_term = request.term;
                state.leader = None;
                if state.role == RaftRole::Leader {
                    self.trackers_run.store(false, Ordering::SeqCst);
                    self.entry_replicated.notify_waiters();
                }
                state.role = RaftRole::Follower;
                tracing::debug!(
                    "{}: voting for {} in term {}",
                    self.local(),
                    sender,
                    request.term
                );
                true
            } else {
                tracing::debug!(
                    "{}: declining vote for {} in term {} (log newer: {})",
                    self.local(),
                    sender,
                    request.term,
                    is_candidate_log_newer
                );
                false
            }
        };

        *self.last_heartbeat.lock().unwrap() = Instant::now();
        self.state.lock().unwrap().election_timeout = random_election_timeout();

        VoteResponse {
            granted,
            previous_log_index: last_log_index,
            previous_log_term: last_log_term,
        }
    }

    pub fn handle_client_append(
        self: &Arc<Self>,
        sender: PeerAddr,
        request: ClientAppendRequest,
    ) -> ClientAppendResponse {
        let index =
            self.append_as_leader(request.payload, sender, request.serial_id, request.retrying);
        ClientAppendResponse {
            index,
            leader: self.known_leader(),
        }
    }

    // --- Applying the committed prefix ---

    /// Feeds one committed entry into the chunk state. Runs on every peer,
    /// in log order, exactly once per index.
    fn apply_entry(self: &Arc<Self>, entry: &LogEntry) {
        match &entry.payload {
            EntryPayload::Noop => {}
            EntryPayload::Insert(revision) | EntryPayload::Update(revision) => {
                self.container.patch(revision.clone());
            }
            EntryPayload::Lock => {
                let mut lock = self.chunk_lock.lock().unwrap();
                if lock.holder.is_none() {
                    lock.holder = Some(entry.sender.clone());
                    lock.lock_index = entry.index;
                }
                // A lock entry committed while the lock is held simply fails;
                // the requester observes it is not the holder and retries.
            }
            EntryPayload::Unlock { lock_index } => {
                let mut lock = self.chunk_lock.lock().unwrap();
                if lock.lock_index == *lock_index {
                    lock.holder = None;
                    lock.lock_index = 0;
                }
            }
            EntryPayload::AddPeer(peer) => {
                if peer != self.local() {
                    // The leader session sweep picks new peers up and starts
                    // their trackers.
                    self.peers.lock().unwrap().insert(peer.clone());
                    self.entry_replicated.notify_waiters();
                }
            }
            EntryPayload::RemovePeer(peer) => {
                if peer == self.local() {
                    tracing::info!(
                        "{}: removed from chunk {}, stopping raft node",
                        self.local(),
                        self.meta.chunk_id
                    );
                } else {
                    self.peers.lock().unwrap().remove(peer);
                    self.hub.mark_left(peer);
                }
            }
        }
    }
}
