#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bt_common::time::Clock;
use bt_device_profile::config::ProfileStateConfig;
use bt_device_profile::device_profile_state::{Command, DeviceProfileState};
use bt_device_profile::incoming_access::{IncomingAccessRecord, RejectWindow, Trust};
use bt_device_profile::incoming_state_store::{IncomingStateStore, SharedIncomingStateStore};
use bt_device_profile::profile_services::{
    IAccessPrompt, IBondController, ICommandTimer, IDockQuery, IPbapService, IPowerManager,
    IProfileService, ProfileCollaborators, ProfileConnectionState, ProfilePriority,
};
use bt_device_profile::uuid::{Profile, Uuid};

pub const ADDR: &str = "00:11:22:33:44:55";
pub const START_MS: i64 = 1_700_000_000_000;

pub fn start_test(f: impl Future<Output = ()>) {
    tokio_test::block_on(async move {
        bt_common::init_logging();
        f.await;
    });
}

/// Everything the fakes observe and report, shared between them and the test.
pub struct World {
    /// Calls made into the fakes, e.g. `hfp.connect` or `prompt.send`.
    pub calls: Vec<String>,
    /// Calls that return false.
    pub failing: HashSet<String>,
    pub priorities: HashMap<Profile, ProfilePriority>,
    /// Devices each profile service is connected or connecting to.
    pub busy: HashMap<Profile, HashSet<String>>,
    pub records: HashMap<String, IncomingAccessRecord>,
    pub uuids: Vec<Uuid>,
    pub turning_off: bool,
    pub avoid_auto_connect: bool,
    pub docked: bool,
    pub screen_on: bool,
    pub delayed: Vec<(Command, Duration)>,
    pub now_ms: i64,
}

pub type SharedWorld = Arc<Mutex<World>>;

pub fn new_world() -> SharedWorld {
    Arc::new(Mutex::new(World {
        calls: vec![],
        failing: HashSet::new(),
        priorities: HashMap::new(),
        busy: HashMap::new(),
        records: HashMap::new(),
        uuids: [
            bt_device_profile::uuid::HFP,
            bt_device_profile::uuid::A2DP_SINK,
            bt_device_profile::uuid::HID,
        ]
        .iter()
        .filter_map(Uuid::from_string)
        .collect(),
        turning_off: false,
        avoid_auto_connect: false,
        docked: false,
        screen_on: true,
        delayed: vec![],
        now_ms: START_MS,
    }))
}

pub fn lock(world: &SharedWorld) -> MutexGuard<World> {
    world.lock().unwrap()
}

impl World {
    pub fn count(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    /// Calls with the given prefix, in the order they were made.
    pub fn calls_of(&self, prefix: &str) -> Vec<String> {
        self.calls.iter().filter(|c| c.starts_with(prefix)).cloned().collect()
    }

    pub fn priority(&self, profile: Profile) -> ProfilePriority {
        self.priorities.get(&profile).cloned().unwrap_or(ProfilePriority::On)
    }

    pub fn delayed_commands(&self) -> Vec<Command> {
        self.delayed.iter().map(|(c, _)| *c).collect()
    }

    pub fn set_record(&mut self, trust: Trust, start_ms: i64, duration_ms: i64) {
        self.records.insert(
            ADDR.to_string(),
            IncomingAccessRecord { trust, window: RejectWindow { start_ms, duration_ms } },
        );
    }

    fn record_call(&mut self, call: String) -> bool {
        let ok = !self.failing.contains(&call);
        self.calls.push(call);
        ok
    }
}

struct FakeProfileService {
    world: SharedWorld,
    profile: Profile,
    name: &'static str,
}

impl FakeProfileService {
    fn call(&self, what: &str) -> bool {
        self.world.lock().unwrap().record_call(format!("{}.{}", self.name, what))
    }
}

impl IProfileService for FakeProfileService {
    fn connect(&mut self, _device: &str) -> bool {
        self.call("connect")
    }

    fn disconnect(&mut self, _device: &str) -> bool {
        self.call("disconnect")
    }

    fn cancel_connect(&mut self, _device: &str) {
        self.call("cancel_connect");
    }

    fn accept_incoming(&mut self, _device: &str) -> bool {
        self.call("accept_incoming")
    }

    fn reject_incoming(&mut self, _device: &str) -> bool {
        self.call("reject_incoming")
    }

    fn get_priority(&self, _device: &str) -> ProfilePriority {
        self.world.lock().unwrap().priority(self.profile)
    }

    fn set_priority(&mut self, _device: &str, priority: ProfilePriority) {
        self.world.lock().unwrap().priorities.insert(self.profile, priority);
        self.call("set_priority");
    }

    fn get_connected_or_connecting_devices(&self) -> HashSet<String> {
        self.world.lock().unwrap().busy.get(&self.profile).cloned().unwrap_or_default()
    }
}

struct FakePbap(SharedWorld);

impl IPbapService for FakePbap {
    fn disconnect(&mut self) -> bool {
        self.0.lock().unwrap().record_call("pbap.disconnect".into())
    }
}

struct FakeBond {
    world: SharedWorld,
    store: Option<SharedIncomingStateStore>,
}

impl IBondController for FakeBond {
    fn remove_bond(&mut self, _device: &str) -> bool {
        self.world.lock().unwrap().record_call("bond.remove_bond".into())
    }

    fn get_incoming_state(&self, device: &str) -> Option<IncomingAccessRecord> {
        match &self.store {
            Some(store) => store.lock().unwrap().get(device),
            None => self.world.lock().unwrap().records.get(device).copied(),
        }
    }

    fn write_incoming_state(&mut self, device: &str, record: &IncomingAccessRecord) {
        if let Some(store) = &self.store {
            store.lock().unwrap().set(device, record);
        }
        self.world.lock().unwrap().records.insert(device.to_string(), *record);
    }

    fn is_turning_off(&self) -> bool {
        self.world.lock().unwrap().turning_off
    }

    fn get_remote_uuids(&self, _device: &str) -> Vec<Uuid> {
        self.world.lock().unwrap().uuids.clone()
    }

    fn fetch_remote_uuids(&mut self, _device: &str) -> bool {
        self.world.lock().unwrap().record_call("bond.fetch_uuids".into())
    }

    fn avoid_auto_connect(&self, _device: &str) -> bool {
        self.world.lock().unwrap().avoid_auto_connect
    }

    fn send_connection_state_change(
        &mut self,
        _device: &str,
        profile: Profile,
        state: ProfileConnectionState,
        prev_state: ProfileConnectionState,
    ) {
        let call = format!("bond.state_change {} {:?} -> {:?}", profile, prev_state, state);
        self.world.lock().unwrap().record_call(call);
    }
}

struct FakePrompt(SharedWorld);

impl IAccessPrompt for FakePrompt {
    fn send_access_request(&mut self, _device: &str) {
        self.0.lock().unwrap().record_call("prompt.send".into());
    }

    fn cancel_access_request(&mut self, _device: &str) {
        self.0.lock().unwrap().record_call("prompt.cancel".into());
    }
}

struct FakeDock(SharedWorld);

impl IDockQuery for FakeDock {
    fn is_device_docked(&self, _device: &str) -> bool {
        self.0.lock().unwrap().docked
    }
}

struct FakePower(SharedWorld);

impl IPowerManager for FakePower {
    fn is_screen_on(&self) -> bool {
        self.0.lock().unwrap().screen_on
    }

    fn acquire_wake_lock(&mut self) {
        self.0.lock().unwrap().record_call("power.acquire".into());
    }

    fn release_wake_lock(&mut self) {
        self.0.lock().unwrap().record_call("power.release".into());
    }
}

/// Records delayed commands; tests deliver them with [`fire_timers`].
pub struct FakeTimer(SharedWorld);

impl ICommandTimer for FakeTimer {
    fn post_delayed(&mut self, command: Command, delay: Duration) {
        self.0.lock().unwrap().delayed.push((command, delay));
    }
}

struct FakeClock(SharedWorld);

impl Clock for FakeClock {
    fn now_millis(&self) -> i64 {
        self.0.lock().unwrap().now_ms
    }
}

pub fn shared_store(path: &str) -> SharedIncomingStateStore {
    Arc::new(Mutex::new(IncomingStateStore::new(path)))
}

pub fn fake_timer(world: &SharedWorld) -> Box<dyn ICommandTimer + Send> {
    Box::new(FakeTimer(world.clone()))
}

pub fn collaborators(
    world: &SharedWorld,
    timer: Box<dyn ICommandTimer + Send>,
    store: Option<SharedIncomingStateStore>,
) -> ProfileCollaborators {
    let service = |profile, name| {
        Box::new(FakeProfileService { world: world.clone(), profile, name })
            as Box<dyn IProfileService + Send>
    };
    ProfileCollaborators {
        headset: service(Profile::Hfp, "hfp"),
        a2dp: service(Profile::A2dp, "a2dp"),
        hid: service(Profile::Hid, "hid"),
        pbap: Box::new(FakePbap(world.clone())),
        bond: Box::new(FakeBond { world: world.clone(), store }),
        prompt: Box::new(FakePrompt(world.clone())),
        dock: Box::new(FakeDock(world.clone())),
        power: Box::new(FakePower(world.clone())),
        timer,
        clock: Box::new(FakeClock(world.clone())),
    }
}

/// A coordinator whose headset and phone book services are not bound yet.
pub fn new_unbound_state(world: &SharedWorld) -> DeviceProfileState {
    DeviceProfileState::new(
        ADDR.to_string(),
        collaborators(world, fake_timer(world), None),
        ProfileStateConfig::default(),
        false,
    )
}

/// A coordinator with every collaborator bound.
pub fn new_state(world: &SharedWorld) -> DeviceProfileState {
    let mut dps = new_unbound_state(world);
    dps.on_service_connected(Profile::Hfp);
    dps.on_service_connected(Profile::Pbap);
    dps
}

/// Delivers, in order, every delayed command accepted by `filter`.
pub fn fire_timers<F>(world: &SharedWorld, dps: &mut DeviceProfileState, filter: F)
where
    F: Fn(&Command) -> bool,
{
    let due: Vec<Command> = {
        let mut w = world.lock().unwrap();
        let (due, pending): (Vec<_>, Vec<_>) = w.delayed.drain(..).partition(|(c, _)| filter(c));
        w.delayed = pending;
        due.into_iter().map(|(c, _)| c).collect()
    };
    for command in due {
        dps.handle_command(command);
    }
}

pub fn advance(world: &SharedWorld, ms: i64) {
    world.lock().unwrap().now_ms += ms;
}

pub fn connect_profile(dps: &mut DeviceProfileState, profile: Profile) {
    dps.on_profile_state_changed(
        profile,
        ProfileConnectionState::Disconnected,
        ProfileConnectionState::Connecting,
    );
    dps.on_profile_state_changed(
        profile,
        ProfileConnectionState::Connecting,
        ProfileConnectionState::Connected,
    );
}

pub fn disconnect_profile(dps: &mut DeviceProfileState, profile: Profile) {
    dps.on_profile_state_changed(
        profile,
        ProfileConnectionState::Connected,
        ProfileConnectionState::Disconnected,
    );
}
