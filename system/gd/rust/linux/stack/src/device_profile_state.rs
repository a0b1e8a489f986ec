//! Per-device coordinator of profile connections.
//!
//! A [`DeviceProfileState`] serializes every connect, disconnect, incoming-connection and unpair
//! request for one bonded remote device. Requests are [`Command`]s on a FIFO queue. While a
//! profile transition is in flight, commands that cannot be handled yet are deferred and replayed
//! in their original order once the machine is back in [`State::Stable`].
//!
//! Nothing in here blocks. Collaborator completions and timers come back as new commands or as
//! `on_*` events, each of which drains the queue before returning.

use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::config::ProfileStateConfig;
use crate::incoming_access::{AccessDecision, IncomingAccessPolicy, IncomingAccessRecord, Trust};
use crate::profile_services::{
    BondState, ProfileCollaborators, ProfileConnectionState, ProfilePriority,
};
use crate::uuid::{Profile, UuidHelper};

/// Profiles with their own transition states.
const CONNECTION_PROFILES: [Profile; 3] = [Profile::Hfp, Profile::A2dp, Profile::Hid];

/// Which side initiated a profile action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    ConnectHfpOutgoing,
    ConnectHfpIncoming,
    ConnectA2dpOutgoing,
    ConnectA2dpIncoming,
    ConnectHidOutgoing,
    ConnectHidIncoming,
    DisconnectHfpOutgoing,
    DisconnectHfpIncoming,
    DisconnectA2dpOutgoing,
    DisconnectA2dpIncoming,
    DisconnectHidOutgoing,
    DisconnectHidIncoming,
    DisconnectPbapOutgoing,
    Unpair,
    /// Lifts the unpairing guard once the lower stack had time to drop the bond.
    UnpairComplete,
    AutoConnectProfiles,
    /// Connects the given sibling profile after an accepted incoming connection.
    ConnectOtherProfiles(Profile),
    TransitionToStable,
    /// The user's answer to an access prompt.
    AccessRequestReply(Trust),
    /// Timeout of the access prompt with the given sequence number.
    AccessRequestExpiry(u32),
}

impl Command {
    /// Profile, initiator and connect (true) or disconnect (false) of a command that has a
    /// transition state.
    pub fn profile_action(&self) -> Option<(Profile, Direction, bool)> {
        use Direction::{Incoming, Outgoing};
        match self {
            Command::ConnectHfpOutgoing => Some((Profile::Hfp, Outgoing, true)),
            Command::ConnectHfpIncoming => Some((Profile::Hfp, Incoming, true)),
            Command::ConnectA2dpOutgoing => Some((Profile::A2dp, Outgoing, true)),
            Command::ConnectA2dpIncoming => Some((Profile::A2dp, Incoming, true)),
            Command::ConnectHidOutgoing => Some((Profile::Hid, Outgoing, true)),
            Command::ConnectHidIncoming => Some((Profile::Hid, Incoming, true)),
            Command::DisconnectHfpOutgoing => Some((Profile::Hfp, Outgoing, false)),
            Command::DisconnectHfpIncoming => Some((Profile::Hfp, Incoming, false)),
            Command::DisconnectA2dpOutgoing => Some((Profile::A2dp, Outgoing, false)),
            Command::DisconnectA2dpIncoming => Some((Profile::A2dp, Incoming, false)),
            Command::DisconnectHidOutgoing => Some((Profile::Hid, Outgoing, false)),
            Command::DisconnectHidIncoming => Some((Profile::Hid, Incoming, false)),
            _ => None,
        }
    }

    pub fn is_connect(&self) -> bool {
        matches!(self.profile_action(), Some((_, _, true)))
    }

    pub fn connect(profile: Profile, direction: Direction) -> Option<Command> {
        match (profile, direction) {
            (Profile::Hfp, Direction::Outgoing) => Some(Command::ConnectHfpOutgoing),
            (Profile::Hfp, Direction::Incoming) => Some(Command::ConnectHfpIncoming),
            (Profile::A2dp, Direction::Outgoing) => Some(Command::ConnectA2dpOutgoing),
            (Profile::A2dp, Direction::Incoming) => Some(Command::ConnectA2dpIncoming),
            (Profile::Hid, Direction::Outgoing) => Some(Command::ConnectHidOutgoing),
            (Profile::Hid, Direction::Incoming) => Some(Command::ConnectHidIncoming),
            (Profile::Pbap, _) => None,
        }
    }

    pub fn disconnect(profile: Profile, direction: Direction) -> Option<Command> {
        match (profile, direction) {
            (Profile::Hfp, Direction::Outgoing) => Some(Command::DisconnectHfpOutgoing),
            (Profile::Hfp, Direction::Incoming) => Some(Command::DisconnectHfpIncoming),
            (Profile::A2dp, Direction::Outgoing) => Some(Command::DisconnectA2dpOutgoing),
            (Profile::A2dp, Direction::Incoming) => Some(Command::DisconnectA2dpIncoming),
            (Profile::Hid, Direction::Outgoing) => Some(Command::DisconnectHidOutgoing),
            (Profile::Hid, Direction::Incoming) => Some(Command::DisconnectHidIncoming),
            (Profile::Pbap, Direction::Outgoing) => Some(Command::DisconnectPbapOutgoing),
            (Profile::Pbap, Direction::Incoming) => None,
        }
    }

    /// Collaborator that has to be bound before the command can run, if any.
    fn required_service(&self) -> Option<Profile> {
        match self {
            Command::ConnectHfpOutgoing
            | Command::ConnectHfpIncoming
            | Command::DisconnectHfpOutgoing
            | Command::ConnectOtherProfiles(Profile::Hfp) => Some(Profile::Hfp),
            Command::DisconnectPbapOutgoing => Some(Profile::Pbap),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// No profile transition in progress.
    Stable,
    OutgoingHfp,
    IncomingHfp,
    OutgoingA2dp,
    IncomingA2dp,
    OutgoingHid,
    IncomingHid,
}

impl State {
    fn transition(profile: Profile, direction: Direction) -> State {
        match (profile, direction) {
            (Profile::Hfp, Direction::Outgoing) => State::OutgoingHfp,
            (Profile::Hfp, Direction::Incoming) => State::IncomingHfp,
            (Profile::A2dp, Direction::Outgoing) => State::OutgoingA2dp,
            (Profile::A2dp, Direction::Incoming) => State::IncomingA2dp,
            (Profile::Hid, Direction::Outgoing) => State::OutgoingHid,
            (Profile::Hid, Direction::Incoming) => State::IncomingHid,
            (Profile::Pbap, _) => State::Stable,
        }
    }

    /// Profile and initiator of a transition state. None for `Stable`.
    pub fn profile_action(&self) -> Option<(Profile, Direction)> {
        match self {
            State::Stable => None,
            State::OutgoingHfp => Some((Profile::Hfp, Direction::Outgoing)),
            State::IncomingHfp => Some((Profile::Hfp, Direction::Incoming)),
            State::OutgoingA2dp => Some((Profile::A2dp, Direction::Outgoing)),
            State::IncomingA2dp => Some((Profile::A2dp, Direction::Incoming)),
            State::OutgoingHid => Some((Profile::Hid, Direction::Outgoing)),
            State::IncomingHid => Some((Profile::Hid, Direction::Incoming)),
        }
    }
}

/// Profile connection coordinator for one bonded remote device.
pub struct DeviceProfileState {
    device: String,
    state: State,

    /// Command the current transition state was entered with, and whether its action started.
    current_command: Option<Command>,
    status: bool,

    queue: VecDeque<Command>,
    deferred: VecDeque<Command>,
    /// Commands waiting for a collaborator to bind.
    parked: Vec<(Profile, Command)>,

    profile_status: HashMap<Profile, ProfileConnectionState>,
    bound: HashSet<Profile>,

    policy: IncomingAccessPolicy,
    pending_incoming: Option<Profile>,
    access_reply_received: bool,
    /// Sequence number of the latest access prompt. Expiries of older prompts are stale.
    prompt_id: u32,
    wake_lock_held: bool,

    unpairing: bool,
    unpair_disconnects: HashSet<Profile>,
    auto_connection_pending: bool,
    pairing_request_received: bool,
    expecting_sdp_complete: bool,
    quit: bool,

    collaborators: ProfileCollaborators,
    config: ProfileStateConfig,
}

impl DeviceProfileState {
    /// Creates the coordinator in `Stable` with the persisted access record of `device`.
    /// `trusted` marks the device as allowed right away, e.g. when the user just paired it.
    ///
    /// The headset and phone book services start out unbound; see
    /// [`DeviceProfileState::on_service_connected`].
    pub fn new(
        device: String,
        collaborators: ProfileCollaborators,
        config: ProfileStateConfig,
        trusted: bool,
    ) -> DeviceProfileState {
        let policy =
            IncomingAccessPolicy::new(collaborators.bond.get_incoming_state(&device), &config);
        let mut dps = DeviceProfileState {
            device,
            state: State::Stable,
            current_command: None,
            status: false,
            queue: VecDeque::new(),
            deferred: VecDeque::new(),
            parked: vec![],
            profile_status: CONNECTION_PROFILES
                .iter()
                .map(|p| (*p, ProfileConnectionState::Disconnected))
                .collect(),
            bound: [Profile::A2dp, Profile::Hid].iter().cloned().collect(),
            policy,
            pending_incoming: None,
            access_reply_received: false,
            prompt_id: 0,
            wake_lock_held: false,
            unpairing: false,
            unpair_disconnects: HashSet::new(),
            auto_connection_pending: false,
            pairing_request_received: false,
            expecting_sdp_complete: false,
            quit: false,
            collaborators,
            config,
        };
        if trusted {
            dps.set_trust(Trust::Allowed);
        }
        dps
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_unpairing(&self) -> bool {
        self.unpairing
    }

    pub fn access_record(&self) -> IncomingAccessRecord {
        *self.policy.record()
    }

    /// Commands waiting for the machine to return to `Stable`, in replay order.
    pub fn deferred_commands(&self) -> Vec<Command> {
        self.deferred.iter().cloned().collect()
    }

    pub fn profile_status(&self, profile: Profile) -> ProfileConnectionState {
        self.profile_status.get(&profile).cloned().unwrap_or(ProfileConnectionState::Disconnected)
    }

    /// Queues `command` and processes the queue until it is empty.
    pub fn handle_command(&mut self, command: Command) {
        self.post(command);
        self.process_pending();
    }

    /// Processes queued commands one at a time until none is left.
    pub fn process_pending(&mut self) {
        while let Some(command) = self.queue.pop_front() {
            if self.quit {
                return;
            }
            self.process_message(command);
        }
    }

    /// Tears the coordinator down. Later commands and events are ignored.
    pub fn quit(&mut self) {
        if self.quit {
            return;
        }
        info!("[{}]: Quitting device profile state in {:?}", self.device, self.state);
        self.quit = true;
        if self.pending_incoming.take().is_some() && !self.access_reply_received {
            self.collaborators.prompt.cancel_access_request(&self.device);
        }
        self.release_wake_lock();
        self.queue.clear();
        self.deferred.clear();
        self.parked.clear();
    }

    /// A profile service reported a connection state change for this device.
    pub fn on_profile_state_changed(
        &mut self,
        profile: Profile,
        prev_state: ProfileConnectionState,
        state: ProfileConnectionState,
    ) {
        if self.quit || !CONNECTION_PROFILES.contains(&profile) {
            return;
        }
        debug!("[{}]: {} state {:?} -> {:?}", self.device, profile, prev_state, state);

        // A live connection is evidence of trust.
        if state == ProfileConnectionState::Connected {
            self.set_trust(Trust::Allowed);
        }
        self.profile_status.insert(profile, state);

        if prev_state == ProfileConnectionState::Connected
            && state == ProfileConnectionState::Disconnected
        {
            if let Some(command) = Command::disconnect(profile, Direction::Incoming) {
                self.post(command);
            }
        }
        if state == ProfileConnectionState::Connected
            || state == ProfileConnectionState::Disconnected
        {
            self.post(Command::TransitionToStable);
        }
        self.process_pending();
    }

    /// The ACL link dropped. A failed incoming connection is not always reported otherwise.
    pub fn on_acl_disconnected(&mut self) {
        if self.quit {
            return;
        }
        self.post(Command::TransitionToStable);
        self.process_pending();
    }

    pub fn on_pairing_request(&mut self) {
        self.pairing_request_received = true;
    }

    pub fn on_bond_state_changed(&mut self, state: BondState) {
        if self.quit {
            return;
        }
        match state {
            BondState::Bonded if self.pairing_request_received => {
                self.set_trust(Trust::Allowed);
                self.pairing_request_received = false;
            }
            BondState::NotBonded => self.pairing_request_received = false,
            BondState::Bonded => self.expecting_sdp_complete = true,
            BondState::Bonding => (),
        }
    }

    /// Service discovery finished for this device.
    pub fn on_uuids_updated(&mut self) {
        self.expecting_sdp_complete = false;
    }

    /// A collaborator service became available. Commands parked on it are replayed.
    pub fn on_service_connected(&mut self, profile: Profile) {
        if self.quit {
            return;
        }
        info!("[{}]: {} service connected", self.device, profile);
        self.bound.insert(profile);
        if profile == Profile::Hfp {
            self.profile_status.insert(Profile::Hfp, ProfileConnectionState::Disconnected);
        }

        let (ready, waiting): (Vec<_>, Vec<_>) =
            self.parked.drain(..).partition(|(p, _)| *p == profile);
        self.parked = waiting;
        for (_, command) in ready {
            self.post(command);
        }

        if profile == Profile::Hfp && self.auto_connection_pending {
            self.auto_connection_pending = false;
            self.post(Command::AutoConnectProfiles);
        }
        self.process_pending();
    }

    /// A collaborator service went away. If the headset service dies while connected, nobody
    /// else knows its last state, so the disconnection is reported from here.
    pub fn on_service_disconnected(&mut self, profile: Profile) {
        if self.quit {
            return;
        }
        warn!("[{}]: {} service disconnected", self.device, profile);
        self.bound.remove(&profile);
        if profile != Profile::Hfp {
            return;
        }
        let prev_state = self.profile_status(Profile::Hfp);
        if prev_state != ProfileConnectionState::Disconnected {
            self.profile_status.insert(Profile::Hfp, ProfileConnectionState::Disconnected);
            self.collaborators.bond.send_connection_state_change(
                &self.device,
                Profile::Hfp,
                ProfileConnectionState::Disconnected,
                prev_state,
            );
        }
    }

    fn post(&mut self, command: Command) {
        if !self.quit {
            self.queue.push_back(command);
        }
    }

    fn defer(&mut self, command: Command) {
        debug!("[{}]: Deferring {:?} in {:?}", self.device, command, self.state);
        self.deferred.push_back(command);
    }

    fn park(&mut self, profile: Profile, command: Command) {
        info!("[{}]: {:?} waits for the {} service", self.device, command, profile);
        self.parked.push((profile, command));
    }

    /// Retries the current transition's command once the machine is stable again.
    fn retry_current(&mut self) {
        if !self.status {
            return;
        }
        if let Some(command) = self.current_command {
            if !self.deferred.contains(&command) {
                self.defer(command);
            }
        }
    }

    fn is_bound(&self, profile: Profile) -> bool {
        self.bound.contains(&profile)
    }

    fn now_millis(&self) -> i64 {
        self.collaborators.clock.now_millis()
    }

    fn set_trust(&mut self, trust: Trust) {
        self.policy.set_trust(trust);
        self.persist();
    }

    fn persist(&mut self) {
        self.collaborators.bond.write_incoming_state(&self.device, self.policy.record());
    }

    fn release_wake_lock(&mut self) {
        if self.wake_lock_held {
            self.collaborators.power.release_wake_lock();
            self.wake_lock_held = false;
        }
    }

    fn process_message(&mut self, command: Command) {
        debug!("[{}]: {:?} processing {:?}", self.device, self.state, command);
        if command.is_connect() && self.unpairing {
            info!("[{}]: Discarding {:?} while unpairing", self.device, command);
            return;
        }
        let handled = match command {
            Command::AccessRequestReply(trust) => self.on_access_reply(trust),
            Command::AccessRequestExpiry(id) => self.on_access_expiry(id),
            _ => match self.state.profile_action() {
                None => self.process_stable(command),
                Some((profile, Direction::Outgoing)) => self.process_outgoing(profile, command),
                Some((profile, Direction::Incoming)) => self.process_incoming(profile, command),
            },
        };
        if !handled {
            warn!("[{}]: {:?} not handled in {:?}", self.device, command, self.state);
        }
    }

    fn transition_to(&mut self, state: State, command: Command) {
        info!("[{}]: {:?} -> {:?} with {:?}", self.device, self.state, state, command);
        self.state = state;

        if state == State::Stable {
            self.current_command = None;
            self.status = false;
            while let Some(deferred) = self.deferred.pop_back() {
                self.queue.push_front(deferred);
            }
            return;
        }

        self.current_command = Some(command);
        self.status = self.process_command(command);
        if !self.status {
            self.post(Command::TransitionToStable);
        }
    }

    fn process_stable(&mut self, command: Command) -> bool {
        if let Some((profile, direction, _)) = command.profile_action() {
            self.transition_to(State::transition(profile, direction), command);
            return true;
        }

        match command {
            Command::DisconnectPbapOutgoing | Command::UnpairComplete => {
                self.process_command(command);
            }
            Command::Unpair => self.unpair(),
            Command::AutoConnectProfiles => self.auto_connect_profiles(),
            Command::ConnectOtherProfiles(profile) => self.connect_other_profiles(profile),
            Command::TransitionToStable => (),
            _ => return false,
        }
        true
    }

    fn process_outgoing(&mut self, profile: Profile, command: Command) -> bool {
        let connecting = self.current_command.map_or(false, |c| c.is_connect());

        if let Some((target, direction, connect)) = command.profile_action() {
            if target == profile {
                match (direction, connect) {
                    (Direction::Outgoing, true) => {
                        // A disconnect followed by a connect.
                        if !connecting {
                            self.defer(command);
                        }
                    }
                    (Direction::Incoming, true) => {
                        if connecting {
                            self.cancel_connect(profile);
                            self.transition_to(State::transition(profile, direction), command);
                        } else {
                            self.defer(command);
                        }
                    }
                    (Direction::Outgoing, false) => {
                        if connecting {
                            self.cancel_connect(profile);
                            self.current_command = Some(command);
                            self.status = self.process_command(command);
                            if !self.status {
                                self.post(Command::TransitionToStable);
                            }
                        }
                    }
                    (Direction::Incoming, false) => {
                        // The remote closed the channel under our connect.
                        if connecting {
                            self.cancel_connect(profile);
                        }
                    }
                }
            } else if target == Profile::Hfp && connect {
                // HFP negotiation runs alongside an A2DP or HID one. The interrupted action
                // may fail because of it, so it gets another go.
                self.process_command(command);
                self.retry_current();
            } else if direction == Direction::Incoming && !connect {
                // Tearing down another profile can abort ours.
                self.retry_current();
            } else {
                self.defer(command);
            }
            return true;
        }

        self.process_in_transition(command)
    }

    fn process_incoming(&mut self, profile: Profile, command: Command) -> bool {
        if let Some((target, direction, connect)) = command.profile_action() {
            if target == profile {
                if direction == Direction::Outgoing {
                    self.defer(command);
                } else {
                    debug!("[{}]: Ignoring {:?} in {:?}", self.device, command, self.state);
                }
            } else if direction == Direction::Incoming && !connect {
                debug!("[{}]: Ignoring {:?}", self.device, command);
            } else {
                self.defer(command);
            }
            return true;
        }

        self.process_in_transition(command)
    }

    /// Commands treated alike by every transition state.
    fn process_in_transition(&mut self, command: Command) -> bool {
        match command {
            Command::DisconnectPbapOutgoing
            | Command::Unpair
            | Command::UnpairComplete
            | Command::AutoConnectProfiles
            | Command::ConnectOtherProfiles(_) => self.defer(command),
            Command::TransitionToStable => self.transition_to(State::Stable, command),
            _ => return false,
        }
        true
    }

    /// Runs the collaborator action behind `command`. Returns false if nothing was started.
    fn process_command(&mut self, command: Command) -> bool {
        debug!("[{}]: Processing command {:?}", self.device, command);
        if let Some(profile) = command.required_service() {
            if !self.is_bound(profile) {
                self.park(profile, command);
                return false;
            }
        }

        if let Some((profile, direction, connect)) = command.profile_action() {
            return match (direction, connect) {
                (Direction::Outgoing, true) => match self.collaborators.service(profile) {
                    Some(service) => service.connect(&self.device),
                    None => false,
                },
                (Direction::Incoming, true) => {
                    self.check_remote_uuids(profile);
                    self.process_incoming_connect(profile);
                    true
                }
                (Direction::Outgoing, false) => self.disconnect_outgoing(profile),
                // The remote already tore the connection down.
                (Direction::Incoming, false) => true,
            };
        }

        match command {
            Command::DisconnectPbapOutgoing => self.collaborators.pbap.disconnect(),
            Command::Unpair => self.remove_bond(),
            Command::UnpairComplete => {
                info!("[{}]: Unpair complete", self.device);
                self.unpairing = false;
                false
            }
            _ => {
                error!("[{}]: Unknown command {:?}", self.device, command);
                false
            }
        }
    }

    fn cancel_connect(&mut self, profile: Profile) {
        if !self.is_bound(profile) {
            return;
        }
        if let Some(service) = self.collaborators.service(profile) {
            info!("[{}]: Cancelling outgoing {} connect", self.device, profile);
            service.cancel_connect(&self.device);
        }
    }

    /// A user disconnect also stops the profile from auto-connecting. The phone book goes
    /// with the headset.
    fn disconnect_outgoing(&mut self, profile: Profile) -> bool {
        if profile == Profile::Hfp {
            self.defer(Command::DisconnectPbapOutgoing);
        }
        let keep_priority = profile == Profile::Hfp && self.collaborators.bond.is_turning_off();
        let device = &self.device;
        match self.collaborators.service(profile) {
            Some(service) => {
                if !keep_priority && service.get_priority(device) == ProfilePriority::AutoConnect {
                    service.set_priority(device, ProfilePriority::On);
                }
                service.disconnect(device)
            }
            None => false,
        }
    }

    fn check_remote_uuids(&mut self, profile: Profile) {
        let uuids = self.collaborators.bond.get_remote_uuids(&self.device);
        if !UuidHelper::is_profile_present(&profile, &uuids) {
            debug!("[{}]: {} UUIDs missing, refreshing over SDP", self.device, profile);
            if !self.collaborators.bond.fetch_remote_uuids(&self.device) {
                warn!("[{}]: Failed to start SDP", self.device);
            }
        }
    }

    fn process_incoming_connect(&mut self, profile: Profile) {
        self.pending_incoming = Some(profile);
        match self.policy.decide(self.now_millis()) {
            AccessDecision::Accept => self.handle_incoming_connection(profile, true),
            AccessDecision::Reject => {
                info!("[{}]: Rejecting {} inside the reject window", self.device, profile);
                self.handle_incoming_connection(profile, false);
            }
            AccessDecision::Prompt => self.send_access_request(),
        }
    }

    fn send_access_request(&mut self) {
        self.access_reply_received = false;
        self.prompt_id = self.prompt_id.wrapping_add(1);
        if !self.collaborators.power.is_screen_on() {
            self.collaborators.power.acquire_wake_lock();
            self.wake_lock_held = true;
        }
        self.collaborators.prompt.send_access_request(&self.device);
        self.collaborators.timer.post_delayed(
            Command::AccessRequestExpiry(self.prompt_id),
            self.config.access_request_timeout,
        );
    }

    fn on_access_reply(&mut self, trust: Trust) -> bool {
        self.release_wake_lock();
        let profile = match self.pending_incoming {
            Some(profile) => profile,
            None => return false,
        };
        self.access_reply_received = true;
        self.set_trust(trust);
        self.handle_incoming_connection(profile, trust == Trust::Allowed);
        true
    }

    fn on_access_expiry(&mut self, id: u32) -> bool {
        match self.pending_incoming {
            Some(profile) if !self.access_reply_received && id == self.prompt_id => {
                info!("[{}]: Access request for {} expired", self.device, profile);
                self.handle_incoming_connection(profile, false);
                self.collaborators.prompt.cancel_access_request(&self.device);
                self.release_wake_lock();
            }
            _ => debug!("[{}]: Stale access request expiry", self.device),
        }
        true
    }

    fn handle_incoming_connection(&mut self, profile: Profile, accept: bool) {
        info!("[{}]: Incoming {} connection, accept: {}", self.device, profile, accept);
        self.pending_incoming = None;
        let now = self.now_millis();

        if !accept {
            let rejected = match self.collaborators.service(profile) {
                Some(service) => service.reject_incoming(&self.device),
                None => false,
            };
            if !rejected {
                warn!("[{}]: Failed to reject incoming {}", self.device, profile);
            }
            self.post(Command::TransitionToStable);
            self.policy.record_outcome(false, now);
            self.persist();
            return;
        }

        self.policy.record_outcome(true, now);
        self.persist();
        if !self.collaborators.bond.avoid_auto_connect(&self.device) {
            let connect_others = match profile {
                Profile::Hfp => {
                    self.profile_status(Profile::Hfp) == ProfileConnectionState::Disconnected
                }
                Profile::A2dp => true,
                _ => false,
            };
            if connect_others {
                self.schedule_other_profiles(profile);
            }
        }

        let accepted = match self.collaborators.service(profile) {
            Some(service) => service.accept_incoming(&self.device),
            None => false,
        };
        if !accepted {
            warn!("[{}]: Failed to accept incoming {}", self.device, profile);
            self.post(Command::TransitionToStable);
        }
    }

    /// Remotes often bring up a single profile after link loss. Follow up with its sibling.
    fn schedule_other_profiles(&mut self, profile: Profile) {
        let sibling = match profile {
            Profile::Hfp => Profile::A2dp,
            Profile::A2dp => Profile::Hfp,
            _ => return,
        };
        if !self.is_bound(sibling) {
            return;
        }
        let wanted = match self.collaborators.service_ref(sibling) {
            Some(service) => {
                if service.get_priority(&self.device) > ProfilePriority::Off {
                    !service.get_connected_or_connecting_devices().contains(&self.device)
                } else {
                    self.expecting_sdp_complete
                }
            }
            None => false,
        };
        if wanted {
            debug!("[{}]: Scheduling {} connect", self.device, sibling);
            self.collaborators.timer.post_delayed(
                Command::ConnectOtherProfiles(sibling),
                self.config.connect_other_profiles_delay,
            );
        }
    }

    fn unpair(&mut self) {
        self.unpairing = true;
        for profile in CONNECTION_PROFILES.iter() {
            if self.profile_status(*profile) != ProfileConnectionState::Disconnected
                && self.unpair_disconnects.insert(*profile)
            {
                info!("[{}]: Disconnecting {} before unpair", self.device, profile);
                if let Some(command) = Command::disconnect(*profile, Direction::Outgoing) {
                    self.post(command);
                }
                self.defer(Command::Unpair);
                return;
            }
        }
        self.unpair_disconnects.clear();
        self.process_command(Command::Unpair);
    }

    fn remove_bond(&mut self) -> bool {
        let now = self.now_millis();
        self.policy.reset(now);
        self.persist();
        self.collaborators
            .timer
            .post_delayed(Command::UnpairComplete, self.config.unpair_complete_delay);
        self.unpairing = true;
        if self.collaborators.bond.remove_bond(&self.device) {
            true
        } else {
            error!("[{}]: Failed to remove bond", self.device);
            self.unpairing = false;
            false
        }
    }

    fn is_docked(&self) -> bool {
        self.collaborators.dock.is_device_docked(&self.device)
    }

    /// Whether `profile` is set to `priority` or above and has no connection in flight.
    fn may_connect(&self, profile: Profile, priority: ProfilePriority) -> bool {
        match self.collaborators.service_ref(profile) {
            Some(service) => {
                service.get_priority(&self.device) >= priority
                    && service.get_connected_or_connecting_devices().is_empty()
            }
            None => false,
        }
    }

    fn auto_connect_profiles(&mut self) {
        if self.is_docked() {
            debug!("[{}]: Not auto connecting a dock", self.device);
            return;
        }
        if !self.is_bound(Profile::Hfp) {
            info!("[{}]: Auto connect waits for the headset service", self.device);
            self.auto_connection_pending = true;
            return;
        }

        if self.may_connect(Profile::Hfp, ProfilePriority::AutoConnect) {
            self.post(Command::ConnectHfpOutgoing);
        }
        if self.may_connect(Profile::A2dp, ProfilePriority::AutoConnect) {
            self.post(Command::ConnectA2dpOutgoing);
        }
        if self.collaborators.hid.get_priority(&self.device) == ProfilePriority::AutoConnect {
            self.post(Command::ConnectHidOutgoing);
        }
    }

    fn connect_other_profiles(&mut self, profile: Profile) {
        if self.is_docked() {
            return;
        }
        let command = Command::ConnectOtherProfiles(profile);
        if let Some(service) = command.required_service() {
            if !self.is_bound(service) {
                self.park(service, command);
                return;
            }
        }
        if self.may_connect(profile, ProfilePriority::On) {
            info!("[{}]: {} connect other profiles", self.device, profile);
            if let Some(connect) = Command::connect(profile, Direction::Outgoing) {
                self.post(connect);
            }
        }
    }
}

impl Drop for DeviceProfileState {
    fn drop(&mut self) {
        self.release_wake_lock();
    }
}
