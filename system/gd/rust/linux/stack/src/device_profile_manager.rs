//! Runs one [`DeviceProfileState`] per bonded device, each on its own task.

use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::config::{ProfileStateConfig, CONFIG_FILE};
use crate::device_profile_state::{Command, DeviceProfileState, State};
use crate::incoming_state_store::{
    IncomingStateStore, SharedIncomingStateStore, INCOMING_STATE_FILE,
};
use crate::profile_services::{BondState, ICommandTimer, ProfileConnectionState};
use crate::uuid::Profile;
use crate::Message;

const DEVICE_CHANNEL_SIZE: usize = 10;

/// Messages handled by the mainloop of a single device.
#[derive(Debug)]
pub enum DeviceMessage {
    Command(Command),
    ProfileStateChanged(Profile, ProfileConnectionState, ProfileConnectionState),
    AclDisconnected,
    PairingRequest,
    BondStateChanged(BondState),
    UuidsUpdated,
    ServiceConnected(Profile),
    ServiceDisconnected(Profile),
    Quit,
}

/// Delivers delayed commands back onto a device's channel. Pending timers do not keep the
/// channel open.
pub struct TokioCommandTimer {
    tx: mpsc::WeakSender<DeviceMessage>,
}

impl TokioCommandTimer {
    pub fn new(tx: mpsc::WeakSender<DeviceMessage>) -> TokioCommandTimer {
        TokioCommandTimer { tx }
    }
}

impl ICommandTimer for TokioCommandTimer {
    /// Needs to run inside a tokio runtime.
    fn post_delayed(&mut self, command: Command, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(DeviceMessage::Command(command)).await;
            }
        });
    }
}

pub struct DeviceProfileContext {
    tx: mpsc::Sender<DeviceMessage>,
    rx: mpsc::Receiver<DeviceMessage>,
    dps: DeviceProfileState,
    state: Arc<Mutex<State>>,
}

impl DeviceProfileContext {
    /// Builds the coordinator with a timer feeding the new context's channel.
    pub fn new<F>(build: F) -> DeviceProfileContext
    where
        F: FnOnce(Box<dyn ICommandTimer + Send>) -> DeviceProfileState,
    {
        let (tx, rx) = mpsc::channel::<DeviceMessage>(DEVICE_CHANNEL_SIZE);
        let dps = build(Box::new(TokioCommandTimer::new(tx.downgrade())));
        let state = Arc::new(Mutex::new(dps.state()));
        DeviceProfileContext { tx, rx, dps, state }
    }

    pub fn get_proxy(&self) -> DeviceProfileProxy {
        DeviceProfileProxy {
            device: self.dps.device().to_string(),
            tx: self.tx.clone(),
            state: self.state.clone(),
        }
    }
}

/// Handle to a running device mainloop.
#[derive(Clone)]
pub struct DeviceProfileProxy {
    device: String,
    tx: mpsc::Sender<DeviceMessage>,
    state: Arc<Mutex<State>>,
}

impl DeviceProfileProxy {
    pub fn get_device(&self) -> &str {
        &self.device
    }

    /// Posts a command without waiting. Ordering against other posts is not guaranteed; use
    /// [`DeviceProfileProxy::send`] for that.
    pub fn post_command(&self, command: Command) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(DeviceMessage::Command(command)).await;
        });
    }

    /// Returns false if the mainloop is gone.
    pub async fn send(&self, message: DeviceMessage) -> bool {
        self.tx.send(message).await.is_ok()
    }

    /// State of the coordinator after the last handled message.
    pub fn get_state(&self) -> State {
        match self.state.lock() {
            Ok(state) => *state,
            Err(_) => State::Stable,
        }
    }
}

/// Runs until [`DeviceMessage::Quit`] or until every proxy is dropped.
pub async fn mainloop(context: DeviceProfileContext) {
    let DeviceProfileContext { tx, mut rx, mut dps, state: shared_state } = context;
    drop(tx);

    loop {
        let m = match rx.recv().await {
            Some(m) => m,
            None => {
                dps.quit();
                info!("[{}]: Exiting device profile mainloop", dps.device());
                break;
            }
        };

        debug!("[{}]: Message handler: {:?}", dps.device(), m);

        match m {
            DeviceMessage::Command(command) => dps.handle_command(command),
            DeviceMessage::ProfileStateChanged(profile, prev_state, state) => {
                dps.on_profile_state_changed(profile, prev_state, state)
            }
            DeviceMessage::AclDisconnected => dps.on_acl_disconnected(),
            DeviceMessage::PairingRequest => dps.on_pairing_request(),
            DeviceMessage::BondStateChanged(state) => dps.on_bond_state_changed(state),
            DeviceMessage::UuidsUpdated => dps.on_uuids_updated(),
            DeviceMessage::ServiceConnected(profile) => dps.on_service_connected(profile),
            DeviceMessage::ServiceDisconnected(profile) => dps.on_service_disconnected(profile),
            DeviceMessage::Quit => {
                dps.quit();
                info!("[{}]: Device profile mainloop quit", dps.device());
                break;
            }
        }

        if let Ok(mut state) = shared_state.lock() {
            *state = dps.state();
        }
    }
}

/// Creates the coordinator for a device, given the timer and config it should use.
pub type DeviceProfileFactory = Box<
    dyn Fn(&str, Box<dyn ICommandTimer + Send>, &ProfileStateConfig) -> DeviceProfileState
        + Send
        + Sync,
>;

/// Owns the mainloops of all bonded devices and routes [`Message`]s to them.
pub struct DeviceProfileManager {
    devices: HashMap<String, DeviceProfileProxy>,
    bound_services: HashSet<Profile>,
    factory: DeviceProfileFactory,
    config: ProfileStateConfig,
    store: SharedIncomingStateStore,
}

impl DeviceProfileManager {
    /// Uses the config at [`CONFIG_FILE`] and the access records at [`INCOMING_STATE_FILE`].
    pub fn new(factory: DeviceProfileFactory) -> DeviceProfileManager {
        let store = Arc::new(Mutex::new(IncomingStateStore::new(INCOMING_STATE_FILE)));
        DeviceProfileManager::new_with(factory, ProfileStateConfig::load(CONFIG_FILE), store)
    }

    pub fn new_with(
        factory: DeviceProfileFactory,
        config: ProfileStateConfig,
        store: SharedIncomingStateStore,
    ) -> DeviceProfileManager {
        DeviceProfileManager {
            devices: HashMap::new(),
            bound_services: HashSet::new(),
            factory,
            config,
            store,
        }
    }

    /// Access record storage shared with the bond controller.
    pub fn get_incoming_state_store(&self) -> SharedIncomingStateStore {
        self.store.clone()
    }

    pub fn get_proxy(&self, address: &str) -> Option<DeviceProfileProxy> {
        self.devices.get(address).cloned()
    }

    pub fn get_devices(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    /// Starts the mainloop for `address` unless it already runs. Services bound so far are
    /// announced to the new coordinator.
    pub async fn add_device(&mut self, address: &str) -> DeviceProfileProxy {
        if let Some(proxy) = self.devices.get(address) {
            return proxy.clone();
        }

        info!("[{}]: Starting device profile state", address);
        let factory = &self.factory;
        let config = &self.config;
        let context = DeviceProfileContext::new(|timer| factory(address, timer, config));
        let proxy = context.get_proxy();
        tokio::spawn(mainloop(context));

        for profile in self.bound_services.iter() {
            proxy.send(DeviceMessage::ServiceConnected(*profile)).await;
        }
        self.devices.insert(address.to_string(), proxy.clone());
        proxy
    }

    pub async fn remove_device(&mut self, address: &str) {
        if let Some(proxy) = self.devices.remove(address) {
            info!("[{}]: Stopping device profile state", address);
            proxy.send(DeviceMessage::Quit).await;
        }
    }

    async fn send_to(&self, address: &str, message: DeviceMessage) {
        match self.devices.get(address) {
            Some(proxy) => {
                if !proxy.send(message).await {
                    warn!("[{}]: Device profile mainloop is gone", address);
                }
            }
            None => debug!("[{}]: No device profile state for {:?}", address, message),
        }
    }

    pub async fn dispatch(&mut self, message: Message) {
        match message {
            Message::Command(address, command) => {
                self.send_to(&address, DeviceMessage::Command(command)).await
            }
            Message::ProfileStateChanged(address, profile, prev_state, state) => {
                let message = DeviceMessage::ProfileStateChanged(profile, prev_state, state);
                self.send_to(&address, message).await
            }
            Message::AclDisconnected(address) => {
                self.send_to(&address, DeviceMessage::AclDisconnected).await
            }
            Message::ConnectionAccessReply(address, trust) => {
                let command = Command::AccessRequestReply(trust);
                self.send_to(&address, DeviceMessage::Command(command)).await
            }
            Message::PairingRequest(address) => {
                self.add_device(&address).await;
                self.send_to(&address, DeviceMessage::PairingRequest).await
            }
            Message::BondStateChanged(address, state) => match state {
                BondState::Bonding | BondState::Bonded => {
                    self.add_device(&address).await;
                    self.send_to(&address, DeviceMessage::BondStateChanged(state)).await
                }
                BondState::NotBonded => {
                    self.send_to(&address, DeviceMessage::BondStateChanged(state)).await;
                    self.remove_device(&address).await;
                    if let Ok(mut store) = self.store.lock() {
                        store.remove(&address);
                    }
                }
            },
            Message::UuidsUpdated(address) => {
                self.send_to(&address, DeviceMessage::UuidsUpdated).await
            }
            Message::ServiceConnected(profile) => {
                self.bound_services.insert(profile);
                for proxy in self.devices.values() {
                    proxy.send(DeviceMessage::ServiceConnected(profile)).await;
                }
            }
            Message::ServiceDisconnected(profile) => {
                self.bound_services.remove(&profile);
                for proxy in self.devices.values() {
                    proxy.send(DeviceMessage::ServiceDisconnected(profile)).await;
                }
            }
            Message::SetDebugLogging(_) => warn!("Logging is not controlled per device"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Runtime;

    #[test]
    fn test_tokio_timer_delivers_command() {
        Runtime::new().unwrap().block_on(async {
            let (tx, mut rx) = mpsc::channel::<DeviceMessage>(DEVICE_CHANNEL_SIZE);
            let mut timer = TokioCommandTimer::new(tx.downgrade());
            timer.post_delayed(Command::UnpairComplete, Duration::from_millis(20));
            timer.post_delayed(Command::AccessRequestExpiry(1), Duration::from_millis(1));

            match rx.recv().await {
                Some(DeviceMessage::Command(Command::AccessRequestExpiry(1))) => (),
                m => panic!("Unexpected message {:?}", m),
            }
            match rx.recv().await {
                Some(DeviceMessage::Command(Command::UnpairComplete)) => (),
                m => panic!("Unexpected message {:?}", m),
            }
        });
    }

    #[test]
    fn test_tokio_timer_does_not_hold_channel_open() {
        Runtime::new().unwrap().block_on(async {
            let (tx, mut rx) = mpsc::channel::<DeviceMessage>(DEVICE_CHANNEL_SIZE);
            let mut timer = TokioCommandTimer::new(tx.downgrade());
            timer.post_delayed(Command::UnpairComplete, Duration::from_millis(1));
            drop(tx);

            assert!(rx.recv().await.is_none());
        });
    }
}
