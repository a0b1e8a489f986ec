//! Per-device Bluetooth profile connection coordination.
//!
//! This crate serializes profile connection requests (Handsfree, A2DP, HID and the phone book
//! that follows the headset) for every bonded remote device, arbitrates remote-initiated
//! connections against a per-device trust record, and sequences unpairing. Profile services,
//! bonding, the access prompt UI and power management stay behind the traits in
//! [`profile_services`].

pub mod bluetooth_logging;
pub mod config;
pub mod device_profile_manager;
pub mod device_profile_state;
pub mod incoming_access;
pub mod incoming_state_store;
pub mod profile_services;
pub mod uuid;

use log::info;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::channel;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::bluetooth_logging::{BluetoothLogging, IBluetoothLogging};
use crate::device_profile_manager::DeviceProfileManager;
use crate::device_profile_state::Command;
use crate::incoming_access::Trust;
use crate::profile_services::{BondState, ProfileConnectionState};
use crate::uuid::Profile;

/// Message types that are sent to the main dispatch loop. Device addresses come first.
#[derive(Debug)]
pub enum Message {
    /// A request for the coordinator of a device, e.g. a user connect or unpair.
    Command(String, Command),
    /// Previous and new state reported by a profile service.
    ProfileStateChanged(String, Profile, ProfileConnectionState, ProfileConnectionState),
    AclDisconnected(String),
    ConnectionAccessReply(String, Trust),
    PairingRequest(String),
    BondStateChanged(String, BondState),
    UuidsUpdated(String),
    ServiceConnected(Profile),
    ServiceDisconnected(Profile),
    /// Daemon-wide debug logging switch.
    SetDebugLogging(bool),
}

/// Umbrella class for the profile coordination stack.
pub struct Stack {}

impl Stack {
    /// Creates an mpsc channel for passing messages to the main dispatch loop.
    pub fn create_channel() -> (Sender<Message>, Receiver<Message>) {
        channel::<Message>(1)
    }

    /// Runs the main dispatch loop until every sender is dropped.
    pub async fn dispatch(
        mut rx: Receiver<Message>,
        mut manager: DeviceProfileManager,
        logging: Arc<Mutex<Box<BluetoothLogging>>>,
    ) {
        loop {
            let m = rx.recv().await;

            match m {
                Some(Message::SetDebugLogging(enabled)) => {
                    if let Ok(mut logging) = logging.lock() {
                        logging.set_debug_logging(enabled);
                    }
                }
                Some(m) => manager.dispatch(m).await,
                None => {
                    info!("Message dispatch loop quit");
                    break;
                }
            }
        }
    }
}
